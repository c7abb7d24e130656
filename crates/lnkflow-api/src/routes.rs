//! API routes

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{team_middleware, AppState};
use crate::handlers::{health, rules};

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes (no team context required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness));

    // Automation rule routes, team-scoped
    let automation_routes = Router::new()
        .route("/", get(rules::list_rules))
        .route("/", post(rules::create_rule))
        .route("/stats", get(rules::get_stats))
        .route("/check-event", post(rules::check_event))
        .route("/bulk/enable", post(rules::bulk_enable))
        .route("/bulk/disable", post(rules::bulk_disable))
        .route("/bulk", delete(rules::bulk_delete))
        .route("/:rule_id", get(rules::get_rule))
        .route("/:rule_id", put(rules::update_rule))
        .route("/:rule_id", delete(rules::delete_rule))
        .route("/:rule_id/enable", post(rules::enable_rule))
        .route("/:rule_id/disable", post(rules::disable_rule))
        .route("/:rule_id/execute", post(rules::execute_rule))
        .route("/:rule_id/duplicate", post(rules::duplicate_rule))
        .route("/:rule_id/history", get(rules::get_history));

    let api_v1 = Router::new()
        .nest("/teams/:team_id/automation", automation_routes)
        .layer(middleware::from_fn(team_middleware))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
}
