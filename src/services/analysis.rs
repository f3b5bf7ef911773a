use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::ai::AnalysisInput;
use crate::auth::Session;
use crate::domain::AnalysisType;
use crate::error::{AppError, AppResult};
use crate::models::{Document, DocumentAnalysis, NewDocumentAnalysis};
use crate::permissions::require_participant;
use crate::state::AppState;
use crate::store::{AnalysisStore, DocumentStore};

pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

fn is_text(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || matches!(
            mime_type,
            "application/json" | "application/xml" | "application/csv"
        )
}

async fn load_input(state: &AppState, document: &Document) -> AppResult<AnalysisInput> {
    let version = state.store().find_version(document.latest_version_id).await?;
    let text = if is_text(&version.mime_type) {
        let bytes = state
            .storage
            .get_object(&version.storage_path)
            .await
            .map_err(|err| AppError::upstream(format!("storage read failed: {err}")))?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        None
    };

    Ok(AnalysisInput {
        document_name: document.name.clone(),
        mime_type: version.mime_type,
        category: document.category.clone(),
        text,
    })
}

/// Runs one analysis of the latest version and caches the outcome. A failure
/// is cached too and then reported as `Upstream`.
pub async fn analyze(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
    analysis_type: AnalysisType,
) -> AppResult<DocumentAnalysis> {
    let document = state.store().find_document(document_id).await?;
    require_participant(state.store(), document.deal_id, session).await?;

    let outcome = match load_input(state, &document).await {
        Ok(input) => state
            .ai
            .analyze(analysis_type, &input)
            .await
            .map_err(|err| err.to_string()),
        Err(err) => Err(err.message().to_string()),
    };

    let now = Utc::now().naive_utc();
    let (status, result, failure) = match outcome {
        Ok(result) => (STATUS_COMPLETED, Some(result), None),
        Err(message) => {
            error!(
                %document_id,
                analysis_type = %analysis_type,
                error = %message,
                "document analysis failed"
            );
            (STATUS_FAILED, None, Some(message))
        }
    };

    let saved = state
        .store()
        .save_analysis(
            NewDocumentAnalysis {
                id: Uuid::new_v4(),
                document_id: document.id,
                analysis_type: analysis_type.as_str().to_string(),
                status: status.to_string(),
                result,
                error: failure.clone(),
            },
            now,
        )
        .await?;

    if let Some(message) = failure {
        return Err(AppError::upstream(format!("analysis failed: {message}")));
    }
    info!(%document_id, analysis_type = %analysis_type, "document analysis cached");
    Ok(saved)
}

/// Cached analyses, failed ones included.
pub async fn list(
    state: &AppState,
    session: &Session,
    document_id: Uuid,
) -> AppResult<Vec<DocumentAnalysis>> {
    let document = state.store().find_document(document_id).await?;
    require_participant(state.store(), document.deal_id, session).await?;
    state.store().list_analyses(document.id).await
}
