use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConfirmQuery;
use crate::auth::Session;
use crate::error::AppResult;
use crate::models::Comment;
use crate::services::comments as comment_service;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct CommentListQuery {
    pub document_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub document_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub document_id: Option<Uuid>,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: NaiveDateTime,
}

fn to_comment_response(comment: Comment) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        deal_id: comment.deal_id,
        document_id: comment.document_id,
        user_id: comment.user_id,
        content: comment.content,
        created_at: comment.created_at,
    }
}

pub async fn list_comments(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
    Query(query): Query<CommentListQuery>,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let comments = comment_service::list(&state, &session, deal_id, query.document_id).await?;
    Ok(Json(comments.into_iter().map(to_comment_response).collect()))
}

pub async fn create_comment(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
    Json(payload): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let comment = comment_service::create(
        &state,
        &session,
        deal_id,
        payload.document_id,
        &payload.content,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(to_comment_response(comment))))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    session: Session,
    Path(comment_id): Path<Uuid>,
    Query(query): Query<ConfirmQuery>,
) -> AppResult<StatusCode> {
    comment_service::delete(&state, &session, comment_id, query.confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}
