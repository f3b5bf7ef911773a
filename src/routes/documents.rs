use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use super::ConfirmQuery;
use crate::auth::Session;
use crate::domain::{AnalysisType, DocumentStatus};
use crate::error::{AppError, AppResult};
use crate::models::{Document, DocumentAnalysis, DocumentVersion, VersionAnnotation, VersionTag};
use crate::services::analysis as analysis_service;
use crate::services::documents::{
    self as document_service, UploadFile, UploadOutcome, UploadTarget, VersionDetail,
};
use crate::state::AppState;

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub name: String,
    pub storage_path: String,
    pub uploaded_by: Uuid,
    pub size_bytes: i64,
    pub mime_type: String,
    pub status: String,
    pub version: i32,
    pub latest_version_id: Uuid,
    pub category: String,
    pub milestone_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub storage_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub checksum: String,
    pub uploaded_by: Uuid,
    pub uploaded_at: NaiveDateTime,
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct TagResponse {
    pub id: Uuid,
    pub version_id: Uuid,
    pub name: String,
    pub color: String,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct AnnotationResponse {
    pub id: Uuid,
    pub version_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct VersionDetailResponse {
    #[serde(flatten)]
    pub version: VersionResponse,
    pub tags: Vec<TagResponse>,
    pub annotations: Vec<AnnotationResponse>,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    #[serde(flatten)]
    pub document: DocumentResponse,
    pub versions: Vec<VersionDetailResponse>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub document: DocumentResponse,
    pub version: VersionResponse,
    pub created: bool,
}

#[derive(Serialize)]
pub struct AnalysisResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub analysis_type: String,
    pub status: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DocumentStatus,
}

/// `null` or an omitted `milestone_id` unlinks the document.
#[derive(Deserialize)]
pub struct LinkMilestoneRequest {
    pub milestone_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct RunAnalysisRequest {
    pub analysis_type: AnalysisType,
}

pub fn to_document_response(document: Document) -> DocumentResponse {
    DocumentResponse {
        id: document.id,
        deal_id: document.deal_id,
        name: document.name,
        storage_path: document.storage_path,
        uploaded_by: document.uploaded_by,
        size_bytes: document.size_bytes,
        mime_type: document.mime_type,
        status: document.status,
        version: document.version,
        latest_version_id: document.latest_version_id,
        category: document.category,
        milestone_id: document.milestone_id,
        created_at: document.created_at,
        updated_at: document.updated_at,
    }
}

pub fn to_version_response(version: DocumentVersion) -> VersionResponse {
    VersionResponse {
        id: version.id,
        document_id: version.document_id,
        version_number: version.version_number,
        storage_path: version.storage_path,
        size_bytes: version.size_bytes,
        mime_type: version.mime_type,
        checksum: version.checksum,
        uploaded_by: version.uploaded_by,
        uploaded_at: version.uploaded_at,
        description: version.description,
    }
}

pub fn to_tag_response(tag: VersionTag) -> TagResponse {
    TagResponse {
        id: tag.id,
        version_id: tag.version_id,
        name: tag.name,
        color: tag.color,
        created_at: tag.created_at,
    }
}

pub fn to_annotation_response(annotation: VersionAnnotation) -> AnnotationResponse {
    AnnotationResponse {
        id: annotation.id,
        version_id: annotation.version_id,
        user_id: annotation.user_id,
        content: annotation.content,
        created_at: annotation.created_at,
    }
}

fn to_version_detail_response(detail: VersionDetail) -> VersionDetailResponse {
    VersionDetailResponse {
        version: to_version_response(detail.version),
        tags: detail.tags.into_iter().map(to_tag_response).collect(),
        annotations: detail
            .annotations
            .into_iter()
            .map(to_annotation_response)
            .collect(),
    }
}

fn to_upload_response(outcome: UploadOutcome) -> UploadResponse {
    UploadResponse {
        document: to_document_response(outcome.document),
        version: to_version_response(outcome.version),
        created: outcome.created,
    }
}

fn to_analysis_response(analysis: DocumentAnalysis) -> AnalysisResponse {
    AnalysisResponse {
        id: analysis.id,
        document_id: analysis.document_id,
        analysis_type: analysis.analysis_type,
        status: analysis.status,
        result: analysis.result,
        error: analysis.error,
        updated_at: analysis.updated_at,
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let documents = document_service::list_documents(&state, &session, deal_id).await?;
    Ok(Json(
        documents.into_iter().map(to_document_response).collect(),
    ))
}

async fn text_field(field: axum::extract::multipart::Field<'_>, label: &str) -> AppResult<String> {
    field.text().await.map_err(|err| {
        error!(error = %err, field = label, "invalid multipart text field");
        AppError::bad_request(format!("invalid {label}: {err}"))
    })
}

fn optional_uuid(value: &str, label: &str) -> AppResult<Option<Uuid>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(trimmed)
        .map(Some)
        .map_err(|_| AppError::bad_request(format!("{label} must be a valid UUID")))
}

pub async fn upload_document(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut category = String::new();
    let mut document_id: Option<Uuid> = None;
    let mut milestone_id: Option<Uuid> = None;
    let mut description: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                original_name = field.file_name().map(|n| n.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("category") => category = text_field(field, "category").await?,
            Some("document_id") => {
                let value = text_field(field, "document_id").await?;
                document_id = optional_uuid(&value, "document_id")?;
            }
            Some("milestone_id") => {
                let value = text_field(field, "milestone_id").await?;
                milestone_id = optional_uuid(&value, "milestone_id")?;
            }
            Some("description") => {
                let value = text_field(field, "description").await?;
                description = Some(value).filter(|text| !text.trim().is_empty());
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let file_name = original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;
    let file_name_for_log = file_name.clone();

    let outcome = match document_service::upload(
        &state,
        &session,
        UploadFile {
            file_name,
            content_type,
            bytes,
        },
        UploadTarget {
            deal_id,
            category,
            document_id,
            milestone_id,
            description,
        },
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(
                error = %err,
                %deal_id,
                file_name = %file_name_for_log,
                "document upload failed"
            );
            return Err(err);
        }
    };

    info!(
        document_id = %outcome.document.id,
        version = outcome.version.version_number,
        created = outcome.created,
        "document upload succeeded"
    );
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(to_upload_response(outcome))))
}

pub async fn get_document(
    State(state): State<AppState>,
    session: Session,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentDetailResponse>> {
    let detail = document_service::document_detail(&state, &session, document_id).await?;
    Ok(Json(DocumentDetailResponse {
        document: to_document_response(detail.document),
        versions: detail
            .versions
            .into_iter()
            .map(to_version_detail_response)
            .collect(),
    }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    session: Session,
    Path(document_id): Path<Uuid>,
    Query(query): Query<ConfirmQuery>,
) -> AppResult<StatusCode> {
    document_service::delete_document(&state, &session, document_id, query.confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_document_status(
    State(state): State<AppState>,
    session: Session,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let document =
        document_service::update_status(&state, &session, document_id, payload.status).await?;
    Ok(Json(to_document_response(document)))
}

pub async fn link_milestone(
    State(state): State<AppState>,
    session: Session,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<LinkMilestoneRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let document =
        document_service::link_milestone(&state, &session, document_id, payload.milestone_id)
            .await?;
    Ok(Json(to_document_response(document)))
}

pub async fn list_versions(
    State(state): State<AppState>,
    session: Session,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<VersionDetailResponse>>> {
    let versions = document_service::list_versions(&state, &session, document_id).await?;
    Ok(Json(
        versions
            .into_iter()
            .map(to_version_detail_response)
            .collect(),
    ))
}

pub async fn restore_version(
    State(state): State<AppState>,
    session: Session,
    Path((document_id, version_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<UploadResponse>> {
    let outcome =
        document_service::restore_version(&state, &session, document_id, version_id).await?;
    Ok(Json(to_upload_response(outcome)))
}

pub async fn list_analyses(
    State(state): State<AppState>,
    session: Session,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<AnalysisResponse>>> {
    let analyses = analysis_service::list(&state, &session, document_id).await?;
    Ok(Json(
        analyses.into_iter().map(to_analysis_response).collect(),
    ))
}

pub async fn run_analysis(
    State(state): State<AppState>,
    session: Session,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<RunAnalysisRequest>,
) -> AppResult<Json<AnalysisResponse>> {
    let analysis =
        analysis_service::analyze(&state, &session, document_id, payload.analysis_type).await?;
    Ok(Json(to_analysis_response(analysis)))
}
