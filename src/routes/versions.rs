use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::documents::{to_annotation_response, to_tag_response, AnnotationResponse, TagResponse};
use crate::auth::Session;
use crate::error::AppResult;
use crate::services::documents::{self as document_service, SignedUrl};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddTagRequest {
    pub name: String,
    pub color: String,
}

#[derive(Deserialize)]
pub struct AddAnnotationRequest {
    pub content: String,
}

pub async fn signed_url(
    State(state): State<AppState>,
    session: Session,
    Path(version_id): Path<Uuid>,
) -> AppResult<Json<SignedUrl>> {
    let signed = document_service::signed_url(&state, &session, version_id).await?;
    Ok(Json(signed))
}

pub async fn add_tag(
    State(state): State<AppState>,
    session: Session,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<AddTagRequest>,
) -> AppResult<(StatusCode, Json<TagResponse>)> {
    let tag =
        document_service::add_tag(&state, &session, version_id, &payload.name, &payload.color)
            .await?;
    Ok((StatusCode::CREATED, Json(to_tag_response(tag))))
}

pub async fn remove_tag(
    State(state): State<AppState>,
    session: Session,
    Path((version_id, tag_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    document_service::remove_tag(&state, &session, version_id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_annotations(
    State(state): State<AppState>,
    session: Session,
    Path(version_id): Path<Uuid>,
) -> AppResult<Json<Vec<AnnotationResponse>>> {
    let annotations = document_service::list_annotations(&state, &session, version_id).await?;
    Ok(Json(
        annotations
            .into_iter()
            .map(to_annotation_response)
            .collect(),
    ))
}

pub async fn add_annotation(
    State(state): State<AppState>,
    session: Session,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<AddAnnotationRequest>,
) -> AppResult<(StatusCode, Json<AnnotationResponse>)> {
    let annotation =
        document_service::add_annotation(&state, &session, version_id, &payload.content).await?;
    Ok((StatusCode::CREATED, Json(to_annotation_response(annotation))))
}
