use chrono::{NaiveDateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::auth::Session;
use crate::domain::MilestoneStatus;
use crate::error::{AppError, AppResult};
use crate::models::{Milestone, MilestoneChanges, NewMilestone, NewMilestoneAssignment, User};
use crate::permissions::{ensure, require_participant, resolve_capabilities};
use crate::realtime::{ChangeEvent, ChangeKind, ChangeTable};
use crate::state::AppState;
use crate::store::{DealStore, MilestoneStore};
use crate::utils::json::NullableValue;

pub struct CreateMilestone {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDateTime>,
    pub order_index: Option<i32>,
}

#[derive(Debug)]
pub struct MilestoneUpdate {
    pub title: Option<String>,
    pub description: NullableValue<String>,
    pub status: Option<MilestoneStatus>,
    pub due_date: NullableValue<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct MilestoneWithAssignees {
    pub milestone: Milestone,
    pub assignees: Vec<User>,
}

fn valid_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("milestone title must not be empty"));
    }
    Ok(title.to_string())
}

/// `completed_at` follows the status: stamped when entering `completed`,
/// cleared when leaving it, untouched otherwise.
fn completion_change(
    current: MilestoneStatus,
    next: MilestoneStatus,
    now: NaiveDateTime,
) -> Option<Option<NaiveDateTime>> {
    match (current == MilestoneStatus::Completed, next == MilestoneStatus::Completed) {
        (false, true) => Some(Some(now)),
        (true, false) => Some(None),
        _ => None,
    }
}

pub async fn list(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
) -> AppResult<Vec<MilestoneWithAssignees>> {
    require_participant(state.store(), deal_id, session).await?;
    let milestones = state.store().list_milestones(deal_id).await?;

    let mut listed = Vec::with_capacity(milestones.len());
    for milestone in milestones {
        let assignees = state.store().assigned_users(milestone.id).await?;
        listed.push(MilestoneWithAssignees {
            milestone,
            assignees,
        });
    }
    Ok(listed)
}

pub async fn create(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
    input: CreateMilestone,
) -> AppResult<Milestone> {
    let role = require_participant(state.store(), deal_id, session).await?;
    ensure(
        resolve_capabilities(role).can_manage_milestones,
        format!("the {role} role cannot manage milestones"),
    )?;
    let title = valid_title(&input.title)?;

    let order_index = match input.order_index {
        Some(index) if index < 0 => {
            return Err(AppError::bad_request("order_index must not be negative"))
        }
        Some(index) => index,
        None => state.store().next_milestone_index(deal_id).await?,
    };

    let milestone = state
        .store()
        .insert_milestone(NewMilestone {
            id: Uuid::new_v4(),
            deal_id,
            title,
            description: input
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            status: MilestoneStatus::NotStarted.as_str().to_string(),
            due_date: input.due_date,
            order_index,
        })
        .await?;

    info!(%deal_id, milestone_id = %milestone.id, "milestone created");
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Milestones,
            ChangeKind::Insert,
            deal_id,
            milestone.id,
        )
        .with_milestone(Some(milestone.id)),
    );
    Ok(milestone)
}

pub async fn update(
    state: &AppState,
    session: &Session,
    milestone_id: Uuid,
    update: MilestoneUpdate,
) -> AppResult<Milestone> {
    let milestone = state.store().find_milestone(milestone_id).await?;
    let role = require_participant(state.store(), milestone.deal_id, session).await?;
    ensure(
        resolve_capabilities(role).can_manage_milestones,
        format!("the {role} role cannot manage milestones"),
    )?;

    let now = Utc::now().naive_utc();
    let current: MilestoneStatus = milestone.status.parse()?;
    let title = update.title.as_deref().map(valid_title).transpose()?;
    let description = match update.description {
        NullableValue::Value(text) if text.trim().is_empty() => NullableValue::Null,
        NullableValue::Value(text) => NullableValue::Value(text.trim().to_string()),
        other => other,
    };

    let changes = MilestoneChanges {
        title,
        description: description.into_change(),
        status: update.status.map(|status| status.as_str().to_string()),
        due_date: update.due_date.into_change(),
        completed_at: update
            .status
            .and_then(|next| completion_change(current, next, now)),
        updated_at: Some(now),
    };

    let updated = state.store().update_milestone(milestone.id, changes).await?;
    info!(
        milestone_id = %updated.id,
        status = %updated.status,
        user_id = %session.user_id,
        "milestone updated"
    );
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Milestones,
            ChangeKind::Update,
            updated.deal_id,
            updated.id,
        )
        .with_milestone(Some(updated.id)),
    );
    Ok(updated)
}

/// Assigns a participant of the same deal to the milestone and returns the
/// full assignee list.
pub async fn assign_user(
    state: &AppState,
    session: &Session,
    milestone_id: Uuid,
    user_id: Uuid,
) -> AppResult<Vec<User>> {
    let milestone = state.store().find_milestone(milestone_id).await?;
    let role = require_participant(state.store(), milestone.deal_id, session).await?;
    ensure(
        resolve_capabilities(role).can_manage_milestones,
        format!("the {role} role cannot manage milestones"),
    )?;

    if state
        .store()
        .participant_role(milestone.deal_id, user_id)
        .await?
        .is_none()
    {
        return Err(AppError::bad_request(
            "only participants of this deal can be assigned",
        ));
    }

    state
        .store()
        .assign_user(NewMilestoneAssignment {
            milestone_id: milestone.id,
            user_id,
        })
        .await?;

    info!(%milestone_id, %user_id, "user assigned to milestone");
    state.changes.publish(
        ChangeEvent::new(
            ChangeTable::Milestones,
            ChangeKind::Update,
            milestone.deal_id,
            milestone.id,
        )
        .with_milestone(Some(milestone.id)),
    );
    state.store().assigned_users(milestone.id).await
}
