use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;
use tracing::info;

use crate::error::AppResult;
use crate::services::signatures::{self as signature_service, EnvelopeUpdate};
use crate::state::AppState;

const SECRET_HEADER: &str = "x-esign-secret";

#[derive(Serialize)]
pub struct WebhookResponse {
    pub envelope_id: String,
    pub recorded: usize,
}

/// Status callback from the e-signature provider, authenticated by a shared
/// secret header instead of a session.
pub async fn esign_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<EnvelopeUpdate>,
) -> AppResult<Json<WebhookResponse>> {
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    signature_service::verify_webhook_secret(&state.config, provided)?;

    let envelope_id = update.envelope_id.clone();
    let saved = signature_service::apply_webhook(&state, update).await?;
    info!(%envelope_id, recorded = saved.len(), "e-signature webhook applied");

    Ok(Json(WebhookResponse {
        envelope_id,
        recorded: saved.len(),
    }))
}
