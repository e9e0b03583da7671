pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        // Self-service routes, authenticated by the tokens in their links
        .nest("/api", api_routes())

        // Coordinator routes
        .nest("/admin", admin_routes(app_state.clone()))

        .with_state(app_state)

        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/workshops", get(handlers::workshops::list_public))
        .route("/workshops/:id", get(handlers::workshops::get_public))
        .route("/workshops/:id/checkin", get(handlers::onboarding::roster))
        .route("/workshops/:id/checkin", post(handlers::onboarding::check_in))
        .route("/waitlist", post(handlers::waitlist::join_public))
        .route("/pay/:token", post(handlers::registrations::begin_payment))
        .route("/pay/:token/decline", post(handlers::registrations::decline))
        .route("/onboarding/:token", post(handlers::onboarding::submit))
        .route("/payments/webhook", post(handlers::payments::webhook))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/workshops", get(handlers::workshops::list).post(handlers::workshops::create))
        .route(
            "/workshops/:id",
            get(handlers::workshops::get)
                .put(handlers::workshops::update)
                .delete(handlers::workshops::delete),
        )
        .route("/workshops/:id/publish", post(handlers::workshops::publish))
        .route("/workshops/:id/cancel", post(handlers::workshops::cancel))
        .route("/workshops/:id/finish", post(handlers::workshops::finish))
        .route("/workshops/:id/capacity", put(handlers::workshops::raise_capacity))
        .route("/workshops/:id/top-up", post(handlers::workshops::top_up))
        .route(
            "/workshops/:id/registrations",
            get(handlers::registrations::list_for_workshop).post(handlers::registrations::register_direct),
        )
        .route("/registrations/:id", get(handlers::registrations::get))
        .route("/registrations/:id/cancel", post(handlers::registrations::cancel))
        .route("/registrations/:id/refund", post(handlers::refunds::request))
        .route("/registrations/:id/refund-eligibility", get(handlers::refunds::eligibility))
        .route("/waitlist", get(handlers::waitlist::list).post(handlers::waitlist::join))
        .route("/waitlist/:id", get(handlers::waitlist::get).delete(handlers::waitlist::remove))
        .route("/waitlist/:id/priority", put(handlers::waitlist::set_priority))
        .route("/refunds", get(handlers::refunds::list))
        .route("/refunds/:id", get(handlers::refunds::get))
        .route("/refunds/:id/retry", post(handlers::refunds::retry))
        .route("/refunds/:id/cancel", post(handlers::refunds::cancel))
        .route("/jobs", get(handlers::admin::list_jobs))
        .route("/jobs/:name", post(handlers::admin::run_job))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_coordinator,
        ))
}
