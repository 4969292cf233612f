use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod assignments;
pub mod cases;
pub mod health;
pub mod participants;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let cases_routes = Router::new()
        .route("/", get(cases::list_cases).post(cases::create_case))
        .route("/:case_id", get(cases::get_case))
        .route("/:case_id/status", patch(cases::update_case_status))
        .route(
            "/:case_id/participants",
            get(participants::list_participants),
        )
        .route(
            "/:case_id/participants/invite",
            post(participants::invite_participant),
        )
        .route(
            "/:case_id/participants/accept",
            post(participants::accept_invite),
        )
        .route(
            "/:case_id/participants/:user_id",
            patch(participants::update_participant).delete(participants::remove_participant),
        );

    let assignments_routes = Router::new()
        .route(
            "/",
            get(assignments::list_assignments).post(assignments::create_assignment),
        )
        .route("/unassigned", get(assignments::list_unassigned_cases))
        .route("/mediator-workload", get(assignments::mediator_workload))
        .route("/:id/reassign", put(assignments::reassign_mediator))
        .route("/:id", delete(assignments::unassign_mediator));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/cases", cases_routes)
        .nest("/api/case-assignments", assignments_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
}
