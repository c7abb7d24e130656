//! Team context
//!
//! Authentication itself is owned by the platform's gateway; by the
//! time a request reaches this service the caller's team is asserted
//! in the `X-Team-Id` header. This module extracts it and enforces
//! that path-addressed resources belong to that team.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use lnkflow_common::types::TeamId;
use std::sync::Arc;
use tracing::warn;

use lnkflow_engine::{EventGateway, RuleExecutor};
use lnkflow_store::repository::RuleRepository;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RuleRepository>,
    pub executor: Arc<RuleExecutor>,
    pub gateway: Arc<EventGateway>,
}

/// Caller identity established upstream
#[derive(Debug, Clone, Copy)]
pub struct TeamContext {
    pub team_id: TeamId,
}

impl TeamContext {
    pub fn is_authorized_for_team(&self, team_id: TeamId) -> bool {
        self.team_id == team_id
    }
}

/// Middleware that extracts the asserted team from `X-Team-Id`
pub async fn team_middleware(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let team_id = request
        .headers()
        .get("x-team-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<TeamId>().ok())
        .ok_or_else(|| {
            warn!(path = request.uri().path(), "missing or malformed X-Team-Id");
            StatusCode::UNAUTHORIZED
        })?;

    request.extensions_mut().insert(TeamContext { team_id });
    Ok(next.run(request).await)
}

/// Reject requests addressing another team's resources
pub fn require_team_access(context: &TeamContext, team_id: TeamId) -> Result<(), StatusCode> {
    if !context.is_authorized_for_team(team_id) {
        warn!(
            caller = %context.team_id,
            target = %team_id,
            "cross-team access denied"
        );
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}
