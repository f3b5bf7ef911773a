use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub mod auth;
pub mod comments;
pub mod deals;
pub mod documents;
pub mod health;
pub mod milestones;
pub mod notifications;
pub mod versions;
pub mod webhooks;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 256;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let deals_routes = Router::new()
        .route("/", get(deals::list_deals).post(deals::create_deal))
        .route("/:deal_id", get(deals::get_deal))
        .route("/:deal_id/status", post(deals::update_deal_status))
        .route("/:deal_id/capabilities", get(deals::get_capabilities))
        .route(
            "/:deal_id/participants",
            get(deals::list_participants).post(deals::add_participant),
        )
        .route(
            "/:deal_id/documents",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:deal_id/milestones",
            get(milestones::list_milestones).post(milestones::create_milestone),
        )
        .route(
            "/:deal_id/comments",
            get(comments::list_comments).post(comments::create_comment),
        );

    let documents_routes = Router::new()
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/status", patch(documents::update_document_status))
        .route("/:id/milestone", patch(documents::link_milestone))
        .route("/:id/versions", get(documents::list_versions))
        .route(
            "/:id/versions/:version_id/restore",
            post(documents::restore_version),
        )
        .route(
            "/:id/analysis",
            get(documents::list_analyses).post(documents::run_analysis),
        );

    let versions_routes = Router::new()
        .route("/:id/url", get(versions::signed_url))
        .route("/:id/tags", post(versions::add_tag))
        .route("/:id/tags/:tag_id", delete(versions::remove_tag))
        .route(
            "/:id/annotations",
            get(versions::list_annotations).post(versions::add_annotation),
        );

    let milestones_routes = Router::new()
        .route("/:id", patch(milestones::update_milestone))
        .route("/:id/assignees", post(milestones::assign_user))
        .route("/:id/signing-status", get(milestones::signing_status))
        .route(
            "/:id/signing-status/stream",
            get(milestones::signing_status_stream),
        );

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/:id/read", post(notifications::mark_read));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/deals", deals_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/versions", versions_routes)
        .nest("/api/milestones", milestones_routes)
        .route("/api/comments/:id", delete(comments::delete_comment))
        .nest("/api/notifications", notifications_routes)
        .route("/api/webhooks/esign", post(webhooks::esign_status))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// `?confirm=true` on destructive endpoints.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}
