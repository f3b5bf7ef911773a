use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::NaiveDateTime;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::auth::{to_user_response, UserResponse};
use crate::auth::Session;
use crate::domain::MilestoneStatus;
use crate::error::{AppError, AppResult};
use crate::models::Milestone;
use crate::permissions::require_participant;
use crate::realtime::{ChangeFilter, ChangeTable, RefreshBridge};
use crate::services::milestones::{
    self as milestone_service, CreateMilestone, MilestoneUpdate, MilestoneWithAssignees,
};
use crate::services::signatures::{self as signature_service, SigningStatus};
use crate::state::AppState;
use crate::store::MilestoneStore;
use crate::utils::json::{classify_nullable, classify_nullable_datetime, NullableValue};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
pub struct CreateMilestoneRequest {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub order_index: Option<i32>,
}

#[derive(Deserialize)]
pub struct AssignUserRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize, Default)]
pub struct SigningStatusQuery {
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct MilestoneResponse {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub order_index: i32,
    pub assignees: Vec<UserResponse>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

fn to_milestone_response(milestone: Milestone, assignees: Vec<UserResponse>) -> MilestoneResponse {
    MilestoneResponse {
        id: milestone.id,
        deal_id: milestone.deal_id,
        title: milestone.title,
        description: milestone.description,
        status: milestone.status,
        due_date: milestone.due_date,
        completed_at: milestone.completed_at,
        order_index: milestone.order_index,
        assignees,
        created_at: milestone.created_at,
        updated_at: milestone.updated_at,
    }
}

pub async fn list_milestones(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
) -> AppResult<Json<Vec<MilestoneResponse>>> {
    let milestones = milestone_service::list(&state, &session, deal_id).await?;
    Ok(Json(
        milestones
            .into_iter()
            .map(|MilestoneWithAssignees { milestone, assignees }| {
                to_milestone_response(milestone, assignees.iter().map(to_user_response).collect())
            })
            .collect(),
    ))
}

pub async fn create_milestone(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
    Json(payload): Json<CreateMilestoneRequest>,
) -> AppResult<(StatusCode, Json<MilestoneResponse>)> {
    let due_date = match payload.due_date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            crate::utils::json::parse_datetime(raw).map_err(AppError::bad_request)?,
        ),
        _ => None,
    };

    let milestone = milestone_service::create(
        &state,
        &session,
        deal_id,
        CreateMilestone {
            title: payload.title,
            description: payload.description,
            due_date,
            order_index: payload.order_index,
        },
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(to_milestone_response(milestone, Vec::new())),
    ))
}

/// Partial update: omitted fields are untouched, `null` clears nullable ones.
pub async fn update_milestone(
    State(state): State<AppState>,
    session: Session,
    Path(milestone_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<MilestoneResponse>> {
    if !body.is_object() {
        return Err(AppError::bad_request("request body must be a JSON object"));
    }

    let title = match classify_nullable(body.get("title")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("title cannot be null")),
        NullableValue::Value(title) => Some(title),
    };
    let status = match classify_nullable(body.get("status")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => None,
        NullableValue::Null => return Err(AppError::bad_request("status cannot be null")),
        NullableValue::Value(raw) => Some(raw.parse::<MilestoneStatus>()?),
    };
    let description = classify_nullable(body.get("description")).map_err(AppError::bad_request)?;
    let due_date = classify_nullable_datetime(body.get("due_date")).map_err(AppError::bad_request)?;

    let update = MilestoneUpdate {
        title,
        description,
        status,
        due_date,
    };
    let milestone = milestone_service::update(&state, &session, milestone_id, update).await?;
    let assignees = state.store().assigned_users(milestone.id).await?;
    Ok(Json(to_milestone_response(
        milestone,
        assignees.iter().map(to_user_response).collect(),
    )))
}

pub async fn assign_user(
    State(state): State<AppState>,
    session: Session,
    Path(milestone_id): Path<Uuid>,
    Json(payload): Json<AssignUserRequest>,
) -> AppResult<Json<Vec<UserResponse>>> {
    let assignees =
        milestone_service::assign_user(&state, &session, milestone_id, payload.user_id).await?;
    Ok(Json(assignees.iter().map(to_user_response).collect()))
}

pub async fn signing_status(
    State(state): State<AppState>,
    session: Session,
    Path(milestone_id): Path<Uuid>,
    Query(query): Query<SigningStatusQuery>,
) -> AppResult<Json<SigningStatus>> {
    let status =
        signature_service::compute_status(&state, &session, milestone_id, query.email.as_deref())
            .await?;
    Ok(Json(status))
}

/// Pushes a `signing_status` event with the initial aggregate and again after
/// every debounced burst of signature or document changes. Closing the
/// connection stops the refresh task.
pub async fn signing_status_stream(
    State(state): State<AppState>,
    session: Session,
    Path(milestone_id): Path<Uuid>,
    Query(query): Query<SigningStatusQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let milestone = state.store().find_milestone(milestone_id).await?;
    require_participant(state.store(), milestone.deal_id, &session).await?;

    // The deal-wide documents channel covers documents moved off this
    // milestone; the milestones channel covers assignee changes.
    let filters = vec![
        ChangeFilter::deal(ChangeTable::DocumentSignatures, milestone.deal_id),
        ChangeFilter::milestone(ChangeTable::Documents, milestone.id),
        ChangeFilter::deal(ChangeTable::Documents, milestone.deal_id),
        ChangeFilter::milestone(ChangeTable::Milestones, milestone.id),
    ];
    debug!(
        %milestone_id,
        filters = ?filters.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "opening signing status stream"
    );

    let fetch_state = state.clone();
    let email = query.email;
    let handle = RefreshBridge::spawn(
        &state.changes,
        filters,
        state.config.realtime_debounce(),
        move || {
            let state = fetch_state.clone();
            let session = session.clone();
            let email = email.clone();
            async move {
                signature_service::compute_status(&state, &session, milestone_id, email.as_deref())
                    .await
            }
        },
    );

    let stream = WatchStream::new(handle.subscribe()).filter_map(move |snapshot| {
        // The handle lives as long as the stream; dropping it stops the bridge.
        let _bridge = &handle;
        let status = snapshot?;
        match serde_json::to_string(&status) {
            Ok(json) => Some(Ok(Event::default().event("signing_status").data(json))),
            Err(err) => {
                warn!(%milestone_id, error = %err, "failed to encode signing status");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    ))
}
