use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Session;
use crate::domain::{DealRole, DealStatus};
use crate::error::AppResult;
use crate::models::{Deal, DealParticipant, User};
use crate::permissions::Capabilities;
use crate::services::deals::{self as deal_service, CreateDeal};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateDealRequest {
    pub title: String,
    pub description: Option<String>,
    pub buyer_email: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateDealStatusRequest {
    pub status: DealStatus,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Deserialize)]
pub struct AddParticipantRequest {
    pub email: String,
    pub role: DealRole,
}

#[derive(Serialize)]
pub struct DealResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub health_score: i32,
    pub seller_id: Uuid,
    pub buyer_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<DealRole>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct ParticipantResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub joined_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct DealDetailResponse {
    #[serde(flatten)]
    pub deal: DealResponse,
    pub participants: Vec<ParticipantResponse>,
}

#[derive(Serialize)]
pub struct CapabilitiesResponse {
    pub role: DealRole,
    #[serde(flatten)]
    pub capabilities: Capabilities,
}

pub fn to_deal_response(deal: Deal, role: Option<DealRole>) -> DealResponse {
    DealResponse {
        id: deal.id,
        title: deal.title,
        description: deal.description,
        status: deal.status,
        health_score: deal.health_score,
        seller_id: deal.seller_id,
        buyer_id: deal.buyer_id,
        role,
        created_at: deal.created_at,
        updated_at: deal.updated_at,
    }
}

fn to_participant_response((participant, user): (DealParticipant, User)) -> ParticipantResponse {
    ParticipantResponse {
        user_id: participant.user_id,
        email: user.email,
        display_name: user.display_name,
        role: participant.role,
        joined_at: participant.joined_at,
    }
}

pub async fn list_deals(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Vec<DealResponse>>> {
    let deals = deal_service::list_deals(&state, &session).await?;
    Ok(Json(
        deals
            .into_iter()
            .map(|(deal, role)| to_deal_response(deal, Some(role)))
            .collect(),
    ))
}

pub async fn create_deal(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateDealRequest>,
) -> AppResult<(StatusCode, Json<DealResponse>)> {
    let deal = deal_service::create_deal(
        &state,
        &session,
        CreateDeal {
            title: payload.title,
            description: payload.description,
            buyer_email: payload.buyer_email,
        },
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(to_deal_response(deal, Some(DealRole::Seller))),
    ))
}

pub async fn get_deal(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
) -> AppResult<Json<DealDetailResponse>> {
    let detail = deal_service::get_deal(&state, &session, deal_id).await?;
    Ok(Json(DealDetailResponse {
        deal: to_deal_response(detail.deal, Some(detail.role)),
        participants: detail
            .participants
            .into_iter()
            .map(to_participant_response)
            .collect(),
    }))
}

pub async fn update_deal_status(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
    Json(payload): Json<UpdateDealStatusRequest>,
) -> AppResult<Json<DealResponse>> {
    let deal = deal_service::change_status(
        &state,
        &session,
        deal_id,
        payload.status,
        payload.confirmed,
    )
    .await?;
    Ok(Json(to_deal_response(deal, None)))
}

pub async fn get_capabilities(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
) -> AppResult<Json<CapabilitiesResponse>> {
    let (role, capabilities) = deal_service::capabilities(&state, &session, deal_id).await?;
    Ok(Json(CapabilitiesResponse { role, capabilities }))
}

pub async fn list_participants(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
) -> AppResult<Json<Vec<ParticipantResponse>>> {
    let participants = deal_service::list_participants(&state, &session, deal_id).await?;
    Ok(Json(
        participants
            .into_iter()
            .map(to_participant_response)
            .collect(),
    ))
}

pub async fn add_participant(
    State(state): State<AppState>,
    session: Session,
    Path(deal_id): Path<Uuid>,
    Json(payload): Json<AddParticipantRequest>,
) -> AppResult<(StatusCode, Json<ParticipantResponse>)> {
    let added =
        deal_service::add_participant(&state, &session, deal_id, &payload.email, payload.role)
            .await?;
    Ok((StatusCode::CREATED, Json(to_participant_response(added))))
}
