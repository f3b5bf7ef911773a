use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::normalize_email;
use crate::auth::Session;
use crate::domain::{DealRole, DealStatus};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::models::{Deal, DealParticipant, NewDeal, NewDealParticipant, User};
use crate::permissions::{
    check_deal_transition, ensure, require_participant, resolve_capabilities, Capabilities,
};
use crate::realtime::{ChangeEvent, ChangeKind, ChangeTable};
use crate::state::AppState;
use crate::store::{DealStore, UserStore};

const MAX_TITLE_LEN: usize = 255;

fn unknown_user(email: &str) -> AppError {
    AppError::new(ErrorKind::NotFound, format!("no user with email {email}"))
}

pub struct CreateDeal {
    pub title: String,
    pub description: Option<String>,
    pub buyer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DealDetail {
    pub deal: Deal,
    pub role: DealRole,
    pub participants: Vec<(DealParticipant, User)>,
}

/// Creates a draft deal. The creator becomes its seller; an optional buyer is
/// added in the same transaction.
pub async fn create_deal(state: &AppState, session: &Session, input: CreateDeal) -> AppResult<Deal> {
    let title = input.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request(format!(
            "title must be between 1 and {MAX_TITLE_LEN} characters"
        )));
    }

    let buyer = match input.buyer_email.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let email = normalize_email(raw)?;
            let user = state
                .store()
                .find_user_by_email(&email)
                .await?
                .ok_or_else(|| unknown_user(&email))?;
            if user.id == session.user_id {
                return Err(AppError::bad_request("the seller cannot also be the buyer"));
            }
            Some(user)
        }
        _ => None,
    };

    let deal_id = Uuid::new_v4();
    let mut participants = vec![NewDealParticipant {
        deal_id,
        user_id: session.user_id,
        role: DealRole::Seller.as_str().to_string(),
    }];
    if let Some(buyer) = &buyer {
        participants.push(NewDealParticipant {
            deal_id,
            user_id: buyer.id,
            role: DealRole::Buyer.as_str().to_string(),
        });
    }

    let deal = state
        .store()
        .insert_deal(
            NewDeal {
                id: deal_id,
                title: title.to_string(),
                description: input
                    .description
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
                status: DealStatus::Draft.as_str().to_string(),
                seller_id: session.user_id,
                buyer_id: buyer.as_ref().map(|buyer| buyer.id),
            },
            participants,
        )
        .await?;

    info!(deal_id = %deal.id, user_id = %session.user_id, "deal created");
    state.changes.publish(ChangeEvent::new(
        ChangeTable::Deals,
        ChangeKind::Insert,
        deal.id,
        deal.id,
    ));
    Ok(deal)
}

/// Deals the caller participates in, with the caller's role in each.
pub async fn list_deals(state: &AppState, session: &Session) -> AppResult<Vec<(Deal, DealRole)>> {
    state
        .store()
        .list_deals_for_user(session.user_id)
        .await?
        .into_iter()
        .map(|(deal, role)| Ok((deal, role.parse::<DealRole>()?)))
        .collect()
}

pub async fn get_deal(state: &AppState, session: &Session, deal_id: Uuid) -> AppResult<DealDetail> {
    let role = require_participant(state.store(), deal_id, session).await?;
    let deal = state.store().find_deal(deal_id).await?;
    let participants = state.store().list_participants(deal_id).await?;
    Ok(DealDetail {
        deal,
        role,
        participants,
    })
}

pub async fn capabilities(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
) -> AppResult<(DealRole, Capabilities)> {
    let role = require_participant(state.store(), deal_id, session).await?;
    Ok((role, resolve_capabilities(role)))
}

/// Role-gated status transition. Completing or cancelling a deal must be
/// confirmed explicitly.
pub async fn change_status(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
    to: DealStatus,
    confirmed: bool,
) -> AppResult<Deal> {
    let role = require_participant(state.store(), deal_id, session).await?;
    let deal = state.store().find_deal(deal_id).await?;
    let from: DealStatus = deal.status.parse()?;

    check_deal_transition(role, from, to)?;
    if to.is_destructive() && !confirmed {
        return Err(AppError::bad_request(format!(
            "moving a deal to {to} must be confirmed"
        )));
    }

    let updated = state
        .store()
        .update_deal_status(deal_id, to.as_str(), Utc::now().naive_utc())
        .await?;

    info!(%deal_id, %from, %to, user_id = %session.user_id, "deal status changed");
    state.changes.publish(ChangeEvent::new(
        ChangeTable::Deals,
        ChangeKind::Update,
        deal_id,
        deal_id,
    ));
    Ok(updated)
}

pub async fn list_participants(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
) -> AppResult<Vec<(DealParticipant, User)>> {
    require_participant(state.store(), deal_id, session).await?;
    state.store().list_participants(deal_id).await
}

pub async fn add_participant(
    state: &AppState,
    session: &Session,
    deal_id: Uuid,
    email: &str,
    role: DealRole,
) -> AppResult<(DealParticipant, User)> {
    let acting_role = require_participant(state.store(), deal_id, session).await?;
    let capabilities = resolve_capabilities(acting_role);
    ensure(
        capabilities.can_manage_participants,
        format!("the {acting_role} role cannot manage participants"),
    )?;
    ensure(
        role != DealRole::Admin || capabilities.can_grant_admin,
        format!("the {acting_role} role cannot grant the admin role"),
    )?;

    let email = normalize_email(email)?;
    let user = state
        .store()
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| unknown_user(&email))?;

    if state.store().participant_role(deal_id, user.id).await?.is_some() {
        return Err(AppError::conflict(format!(
            "{email} is already a participant of this deal"
        )));
    }

    let participant = state
        .store()
        .insert_participant(
            NewDealParticipant {
                deal_id,
                user_id: user.id,
                role: role.as_str().to_string(),
            },
            Utc::now().naive_utc(),
        )
        .await?;

    info!(%deal_id, user_id = %user.id, %role, "participant added");
    state.changes.publish(ChangeEvent::new(
        ChangeTable::Deals,
        ChangeKind::Update,
        deal_id,
        deal_id,
    ));
    Ok((participant, user))
}
