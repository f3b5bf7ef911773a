//! Milestone signing-status aggregation and the e-signature webhook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Session;
use crate::config::AppConfig;
use crate::domain::{SignatureStatus, SigningState};
use crate::error::{AppError, AppResult};
use crate::models::{DocumentSignature, NewDocumentSignature, User};
use crate::permissions::require_participant;
use crate::realtime::{ChangeEvent, ChangeKind, ChangeTable};
use crate::state::AppState;
use crate::store::{DocumentStore, MilestoneStore, SignatureStore};

const ADMIN_SIGNER_ROLE: &str = "admin";
const DEFAULT_SIGNER_ROLE: &str = "signer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningStatus {
    pub status: SigningState,
    pub user_has_signed: bool,
    pub admin_has_signed: bool,
    pub pending_signers: Vec<String>,
    pub signer_names: Vec<String>,
}

impl SigningStatus {
    pub fn not_started() -> Self {
        Self {
            status: SigningState::NotStarted,
            user_has_signed: false,
            admin_has_signed: false,
            pending_signers: Vec::new(),
            signer_names: Vec::new(),
        }
    }
}

fn has_status(signature: &DocumentSignature, status: SignatureStatus) -> bool {
    signature.status == status.as_str()
}

fn counts_as_signed(signature: &DocumentSignature) -> bool {
    signature
        .status
        .parse::<SignatureStatus>()
        .map(|status| status.counts_as_signed())
        .unwrap_or(false)
}

/// Pure aggregation over one milestone's signatures. Status precedence is
/// completed, then partially_completed, then sent, independent of signer.
pub fn aggregate_signing_status(
    assigned_users: &[User],
    signatures: &[DocumentSignature],
    user_email: Option<&str>,
) -> SigningStatus {
    if signatures.is_empty() {
        return SigningStatus::not_started();
    }

    let status = [
        (SignatureStatus::Completed, SigningState::Completed),
        (
            SignatureStatus::PartiallyCompleted,
            SigningState::PartiallyCompleted,
        ),
        (SignatureStatus::Sent, SigningState::Sent),
    ]
    .into_iter()
    .find(|(wanted, _)| signatures.iter().any(|sig| has_status(sig, *wanted)))
    .map(|(_, state)| state)
    .unwrap_or(SigningState::NotStarted);

    let signed: Vec<&DocumentSignature> = signatures
        .iter()
        .filter(|sig| counts_as_signed(sig))
        .collect();

    let user_has_signed = user_email.is_some_and(|email| {
        signed
            .iter()
            .any(|sig| sig.signer_email.eq_ignore_ascii_case(email.trim()))
    });
    let admin_has_signed = signed
        .iter()
        .any(|sig| sig.signer_role.eq_ignore_ascii_case(ADMIN_SIGNER_ROLE));

    let mut pending_signers: Vec<String> = Vec::new();
    for sig in signatures
        .iter()
        .filter(|sig| has_status(sig, SignatureStatus::Sent))
    {
        if !pending_signers
            .iter()
            .any(|email| email.eq_ignore_ascii_case(&sig.signer_email))
        {
            pending_signers.push(sig.signer_email.clone());
        }
    }

    let signer_names = assigned_users
        .iter()
        .filter(|user| {
            signed
                .iter()
                .any(|sig| sig.signer_email.eq_ignore_ascii_case(&user.email))
        })
        .map(|user| user.label().to_string())
        .collect();

    SigningStatus {
        status,
        user_has_signed,
        admin_has_signed,
        pending_signers,
        signer_names,
    }
}

/// Signing status of a milestone for `user_email`, defaulting to the caller.
pub async fn compute_status(
    state: &AppState,
    session: &Session,
    milestone_id: Uuid,
    user_email: Option<&str>,
) -> AppResult<SigningStatus> {
    let milestone = state.store().find_milestone(milestone_id).await?;
    require_participant(state.store(), milestone.deal_id, session).await?;

    let assigned = state.store().assigned_users(milestone.id).await?;
    let documents = state.store().documents_for_milestone(milestone.id).await?;
    if documents.is_empty() {
        return Ok(SigningStatus::not_started());
    }

    let document_ids: Vec<Uuid> = documents.iter().map(|document| document.id).collect();
    let signatures = state
        .store()
        .signatures_for_documents(milestone.deal_id, &document_ids)
        .await?;

    let email = user_email.unwrap_or(&session.email);
    Ok(aggregate_signing_status(&assigned, &signatures, Some(email)))
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeUpdate {
    pub envelope_id: String,
    pub deal_id: Uuid,
    pub document_id: Uuid,
    pub recipients: Vec<RecipientUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientUpdate {
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    pub status: SignatureStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Rejects webhook calls unless the shared secret is configured and matches.
pub fn verify_webhook_secret(config: &AppConfig, provided: Option<&str>) -> AppResult<()> {
    match (&config.esign_webhook_secret, provided) {
        (Some(expected), Some(provided)) if expected.as_str() == provided.trim() => Ok(()),
        (None, _) => {
            warn!("e-signature webhook called but ESIGN_WEBHOOK_SECRET is not configured");
            Err(AppError::unauthorized())
        }
        _ => Err(AppError::unauthorized()),
    }
}

/// Records one provider status update. Each recipient is upserted by
/// envelope and signer email.
pub async fn apply_webhook(
    state: &AppState,
    update: EnvelopeUpdate,
) -> AppResult<Vec<DocumentSignature>> {
    let envelope_id = update.envelope_id.trim().to_string();
    if envelope_id.is_empty() {
        return Err(AppError::bad_request("envelope_id is required"));
    }
    if update.recipients.is_empty() {
        return Err(AppError::bad_request("at least one recipient is required"));
    }

    let document = state.store().find_document(update.document_id).await?;
    if document.deal_id != update.deal_id {
        return Err(AppError::bad_request("document does not belong to this deal"));
    }

    let now = Utc::now();
    let mut saved = Vec::with_capacity(update.recipients.len());
    for recipient in update.recipients {
        let email = recipient.email.trim().to_ascii_lowercase();
        if !email.contains('@') {
            return Err(AppError::bad_request(format!(
                "invalid signer email '{}'",
                recipient.email
            )));
        }
        let role = recipient
            .role
            .map(|role| role.trim().to_ascii_lowercase())
            .filter(|role| !role.is_empty())
            .unwrap_or_else(|| DEFAULT_SIGNER_ROLE.to_string());
        let completed_at = match recipient.status {
            SignatureStatus::Completed => {
                Some(recipient.completed_at.unwrap_or(now).naive_utc())
            }
            _ => recipient.completed_at.map(|at| at.naive_utc()),
        };

        let signature = state
            .store()
            .upsert_signature(
                NewDocumentSignature {
                    id: Uuid::new_v4(),
                    deal_id: document.deal_id,
                    document_id: document.id,
                    envelope_id: envelope_id.clone(),
                    signer_email: email,
                    signer_role: role,
                    status: recipient.status.as_str().to_string(),
                    sent_at: Some(now.naive_utc()),
                    completed_at,
                },
                now.naive_utc(),
            )
            .await?;
        saved.push(signature);
    }

    info!(
        envelope_id = %envelope_id,
        document_id = %document.id,
        recipients = saved.len(),
        "e-signature status recorded"
    );
    for signature in &saved {
        state.changes.publish(
            ChangeEvent::new(
                ChangeTable::DocumentSignatures,
                ChangeKind::Update,
                document.deal_id,
                signature.id,
            )
            .with_milestone(document.milestone_id),
        );
    }

    Ok(saved)
}
