//! Deal-scoped authorization. Every role decision in the service layer goes
//! through [`resolve_capabilities`] or one of the checks below.

use std::fmt::Display;

use serde::Serialize;
use uuid::Uuid;

use crate::auth::Session;
use crate::domain::{DealRole, DealStatus};
use crate::error::{AppError, AppResult};
use crate::models::Comment;
use crate::store::{DealStore, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub can_upload: bool,
    pub can_modify_documents: bool,
    pub can_delete_documents: bool,
    pub can_review_documents: bool,
    pub can_change_deal_status: bool,
    pub can_manage_participants: bool,
    /// Adding a participant with the `admin` role.
    pub can_grant_admin: bool,
    pub can_manage_milestones: bool,
    pub can_comment: bool,
    pub can_delete_any_comment: bool,
}

pub fn resolve_capabilities(role: DealRole) -> Capabilities {
    match role {
        DealRole::Admin => Capabilities {
            can_upload: true,
            can_modify_documents: true,
            can_delete_documents: true,
            can_review_documents: true,
            can_change_deal_status: true,
            can_manage_participants: true,
            can_grant_admin: true,
            can_manage_milestones: true,
            can_comment: true,
            can_delete_any_comment: true,
        },
        DealRole::Seller => Capabilities {
            can_upload: true,
            can_modify_documents: true,
            can_delete_documents: true,
            can_review_documents: true,
            can_change_deal_status: true,
            can_manage_participants: true,
            can_grant_admin: false,
            can_manage_milestones: true,
            can_comment: true,
            can_delete_any_comment: false,
        },
        DealRole::Lawyer => Capabilities {
            can_upload: true,
            can_modify_documents: true,
            can_delete_documents: true,
            can_review_documents: true,
            can_change_deal_status: false,
            can_manage_participants: false,
            can_grant_admin: false,
            can_manage_milestones: true,
            can_comment: true,
            can_delete_any_comment: true,
        },
        DealRole::Buyer => Capabilities {
            can_upload: false,
            can_modify_documents: false,
            can_delete_documents: false,
            can_review_documents: false,
            can_change_deal_status: false,
            can_manage_participants: false,
            can_grant_admin: false,
            can_manage_milestones: false,
            can_comment: true,
            can_delete_any_comment: false,
        },
    }
}

/// Fails with `PermissionDenied` carrying `reason` unless `allowed`.
pub fn ensure(allowed: bool, reason: impl Display) -> AppResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden(reason))
    }
}

/// Resolves the caller's role in the deal. Non-participants are denied, which
/// also hides whether the deal exists.
pub async fn require_participant(
    store: &dyn RecordStore,
    deal_id: Uuid,
    session: &Session,
) -> AppResult<DealRole> {
    match store.participant_role(deal_id, session.user_id).await? {
        Some(role) => role.parse(),
        None => Err(AppError::forbidden("you are not a participant of this deal")),
    }
}

/// Deal status transition table keyed by the acting role. Role and terminal
/// state checks come first so a same-state request is only a validation error
/// for a role that could have moved the deal.
pub fn check_deal_transition(role: DealRole, from: DealStatus, to: DealStatus) -> AppResult<()> {
    let allowed: &[DealStatus] = match role {
        DealRole::Admin => DealStatus::ALL,
        DealRole::Seller => match from {
            DealStatus::Draft => &[DealStatus::Active, DealStatus::Cancelled],
            DealStatus::Active => &[
                DealStatus::Pending,
                DealStatus::Completed,
                DealStatus::Cancelled,
            ],
            DealStatus::Pending => &[
                DealStatus::Active,
                DealStatus::Completed,
                DealStatus::Cancelled,
            ],
            DealStatus::Completed | DealStatus::Cancelled => {
                return Err(AppError::forbidden(format!(
                    "a {from} deal cannot be changed by a seller"
                )));
            }
        },
        other => {
            return Err(AppError::forbidden(format!(
                "the {other} role cannot change the deal status"
            )));
        }
    };

    if from == to {
        return Err(AppError::bad_request(format!("deal is already {to}")));
    }
    ensure(
        allowed.contains(&to),
        format!("a {role} cannot move a deal from {from} to {to}"),
    )
}

pub fn can_delete_comment(comment: &Comment, acting_user_id: Uuid, role: DealRole) -> bool {
    comment.user_id == acting_user_id || matches!(role, DealRole::Admin | DealRole::Lawyer)
}
