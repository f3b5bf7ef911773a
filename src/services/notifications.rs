use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::auth::Session;
use crate::error::{AppError, AppResult};
use crate::models::{NewNotification, Notification};
use crate::state::AppState;
use crate::store::{DealStore, NotificationStore};

pub const KIND_DOCUMENT_UPLOADED: &str = "document_uploaded";
pub const KIND_DOCUMENT_VERSION: &str = "document_version";
pub const KIND_COMMENT: &str = "comment";

/// Notifies every participant of the deal except the actor. Failures are
/// logged and swallowed: a notification never fails the write it reports.
pub async fn notify_participants(
    state: &AppState,
    deal_id: Uuid,
    actor: &Session,
    kind: &str,
    message: String,
) {
    let participants = match state.store().list_participants(deal_id).await {
        Ok(participants) => participants,
        Err(err) => {
            warn!(%deal_id, error = %err, "could not load participants for notification");
            return;
        }
    };

    let notifications: Vec<NewNotification> = participants
        .into_iter()
        .filter(|(participant, _)| participant.user_id != actor.user_id)
        .map(|(participant, _)| NewNotification {
            id: Uuid::new_v4(),
            user_id: participant.user_id,
            deal_id: Some(deal_id),
            kind: kind.to_string(),
            message: message.clone(),
        })
        .collect();

    if let Err(err) = state.store().insert_notifications(notifications).await {
        warn!(%deal_id, kind, error = %err, "failed to record notifications");
    }
}

pub async fn list(
    state: &AppState,
    session: &Session,
    unread_only: bool,
) -> AppResult<Vec<Notification>> {
    state
        .store()
        .list_notifications(session.user_id, unread_only)
        .await
}

/// Marks one of the caller's notifications as read. Another user's
/// notification is reported as missing.
pub async fn mark_read(state: &AppState, session: &Session, notification_id: Uuid) -> AppResult<()> {
    let updated = state
        .store()
        .mark_notification_read(notification_id, session.user_id, Utc::now().naive_utc())
        .await?;
    if updated == 0 {
        // Already read is fine; unknown or foreign is not.
        let owned = state.store().list_notifications(session.user_id, false).await?;
        if !owned.iter().any(|n| n.id == notification_id) {
            return Err(AppError::not_found());
        }
    }
    Ok(())
}
