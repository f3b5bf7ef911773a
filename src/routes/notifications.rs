use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Session;
use crate::error::AppResult;
use crate::models::Notification;
use crate::services::notifications as notification_service;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub deal_id: Option<Uuid>,
    pub kind: String,
    pub message: String,
    pub read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

fn to_notification_response(notification: Notification) -> NotificationResponse {
    NotificationResponse {
        id: notification.id,
        deal_id: notification.deal_id,
        kind: notification.kind,
        message: notification.message,
        read: notification.read_at.is_some(),
        read_at: notification.read_at,
        created_at: notification.created_at,
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<NotificationQuery>,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let notifications = notification_service::list(&state, &session, query.unread).await?;
    Ok(Json(
        notifications
            .into_iter()
            .map(to_notification_response)
            .collect(),
    ))
}

pub async fn mark_read(
    State(state): State<AppState>,
    session: Session,
    Path(notification_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    notification_service::mark_read(&state, &session, notification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
