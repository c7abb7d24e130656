//! Automation rule handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use lnkflow_common::types::{
    ActionConfig, CampaignId, ExecutionLog, RuleId, RuleSettings, RuleStatus, TriggerCondition,
    TriggerType,
};
use lnkflow_common::Error;
use lnkflow_engine::{schedule, validate_rule, TriggeredRule};
use lnkflow_store::models::{AutomationRule, CreateRule, RuleFilter, RuleStats, UpdateRule};

use crate::auth::{require_team_access, AppState, TeamContext};

/// Error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn forbidden() -> ApiError {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse {
            error: "forbidden".to_string(),
            message: "Not authorized for this team".to_string(),
        }),
    )
}

fn not_found(id: RuleId) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not_found".to_string(),
            message: format!("Rule {} not found", id),
        }),
    )
}

fn map_error(e: Error) -> ApiError {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: e.code().to_lowercase(),
            message: e.to_string(),
        }),
    )
}

fn team_guard(context: &TeamContext, team_id: Uuid) -> Result<(), ApiError> {
    require_team_access(context, team_id).map_err(|_| forbidden())
}

/// Query parameters for listing rules. Pagination is 1-based
/// `page` + `limit`.
#[derive(Debug, Deserialize)]
pub struct ListRulesQuery {
    pub status: Option<String>,
    pub trigger_type: Option<String>,
    pub campaign_id: Option<CampaignId>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    50
}

/// Rule list response
#[derive(Debug, Serialize)]
pub struct RuleListResponse {
    pub data: Vec<RuleResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Rule response. Execution history is large and served by its own
/// endpoint; everything else is included.
#[derive(Debug, Serialize)]
pub struct RuleResponse {
    pub id: RuleId,
    pub team_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: String,
    pub trigger_condition: TriggerCondition,
    pub actions: Vec<ActionConfig>,
    pub priority: i32,
    pub campaign_id: Option<CampaignId>,
    pub campaign_ids: Vec<CampaignId>,
    pub status: String,
    pub is_enabled: bool,
    pub execution_count: i32,
    pub max_executions: i32,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub settings: RuleSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AutomationRule> for RuleResponse {
    fn from(r: AutomationRule) -> Self {
        Self {
            id: r.id,
            team_id: r.team_id,
            name: r.name,
            description: r.description,
            trigger_type: r.trigger_type,
            trigger_condition: r.trigger_condition.0,
            actions: r.actions.0,
            priority: r.priority,
            campaign_id: r.campaign_id,
            campaign_ids: r.campaign_ids.0,
            status: r.status,
            is_enabled: r.is_enabled,
            execution_count: r.execution_count,
            max_executions: r.max_executions,
            last_executed_at: r.last_executed_at,
            next_scheduled_at: r.next_scheduled_at,
            settings: r.settings.0,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Request body for creating a rule
#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_condition: TriggerCondition,
    pub actions: Vec<ActionConfig>,
    pub priority: Option<i32>,
    pub campaign_id: Option<CampaignId>,
    pub campaign_ids: Option<Vec<CampaignId>>,
    pub max_executions: Option<i32>,
    pub settings: Option<RuleSettings>,
}

/// Request body for updating a rule
#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_condition: Option<TriggerCondition>,
    pub actions: Option<Vec<ActionConfig>>,
    pub priority: Option<i32>,
    pub campaign_id: Option<CampaignId>,
    pub campaign_ids: Option<Vec<CampaignId>>,
    pub status: Option<RuleStatus>,
    pub is_enabled: Option<bool>,
    pub max_executions: Option<i32>,
    pub settings: Option<RuleSettings>,
}

/// Query parameters for execution history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Request body for the bulk endpoints
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    #[serde(alias = "ruleIds")]
    pub rule_ids: Vec<RuleId>,
}

/// Per-id outcome of a bulk operation
#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub id: RuleId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub results: Vec<BulkResult>,
}

/// Request body for the internal event endpoint
#[derive(Debug, Deserialize)]
pub struct CheckEventRequest {
    #[serde(alias = "eventType")]
    pub event_type: TriggerType,
    #[serde(alias = "eventData")]
    pub event_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CheckEventResponse {
    pub triggered: Vec<TriggeredRule>,
}

/// List rules for a team
///
/// GET /api/v1/teams/:team_id/automation
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path(team_id): Path<Uuid>,
    Query(query): Query<ListRulesQuery>,
) -> Result<Json<RuleListResponse>, ApiError> {
    team_guard(&context, team_id)?;

    let page = query.page.max(1);
    let limit = query.limit.max(0);
    let filter = RuleFilter {
        status: query.status.and_then(|s| s.parse().ok()),
        trigger_type: query.trigger_type.and_then(|s| s.parse().ok()),
        campaign_id: query.campaign_id,
        limit,
        offset: (page - 1) * limit,
    };

    let rules = state
        .store
        .list_by_team(team_id, &filter)
        .await
        .map_err(|e| {
            error!("Failed to list rules: {}", e);
            map_error(e)
        })?;
    let total = state
        .store
        .count_by_team(team_id, &filter)
        .await
        .map_err(|e| {
            error!("Failed to count rules: {}", e);
            map_error(e)
        })?;

    Ok(Json(RuleListResponse {
        data: rules.into_iter().map(RuleResponse::from).collect(),
        total,
        page,
        limit,
    }))
}

/// Create a rule
///
/// POST /api/v1/teams/:team_id/automation
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path(team_id): Path<Uuid>,
    Json(input): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<RuleResponse>), ApiError> {
    team_guard(&context, team_id)?;

    if input.name.is_empty() {
        return Err(map_error(Error::Validation(
            "Rule name is required".to_string(),
        )));
    }
    validate_rule(input.trigger_type, &input.trigger_condition, &input.actions)
        .map_err(map_error)?;

    let next_scheduled_at =
        schedule::next_run(input.trigger_type, &input.trigger_condition, Utc::now());

    let rule = state
        .store
        .create(CreateRule {
            team_id,
            name: input.name,
            description: input.description,
            trigger_type: input.trigger_type,
            trigger_condition: input.trigger_condition,
            actions: input.actions,
            priority: input.priority,
            campaign_id: input.campaign_id,
            campaign_ids: input.campaign_ids,
            max_executions: input.max_executions,
            settings: input.settings,
            next_scheduled_at,
        })
        .await
        .map_err(|e| {
            error!("Failed to create rule: {}", e);
            map_error(e)
        })?;

    info!(rule_id = %rule.id, %team_id, "rule created");
    Ok((StatusCode::CREATED, Json(rule.into())))
}

/// Get one rule
///
/// GET /api/v1/teams/:team_id/automation/:rule_id
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RuleResponse>, ApiError> {
    team_guard(&context, team_id)?;

    let rule = state
        .store
        .get_by_team(team_id, rule_id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;
    Ok(Json(rule.into()))
}

/// Update a rule
///
/// PUT /api/v1/teams/:team_id/automation/:rule_id
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateRuleRequest>,
) -> Result<Json<RuleResponse>, ApiError> {
    team_guard(&context, team_id)?;

    let existing = state
        .store
        .get_by_team(team_id, rule_id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;

    // Validate the rule as it will look after the merge
    let trigger_type = existing.trigger_type().ok_or_else(|| {
        map_error(Error::Internal(format!(
            "Rule {} has malformed trigger type",
            rule_id
        )))
    })?;
    let merged_condition = input
        .trigger_condition
        .clone()
        .unwrap_or_else(|| existing.trigger_condition.0.clone());
    let merged_actions = input
        .actions
        .clone()
        .unwrap_or_else(|| existing.actions.0.clone());
    validate_rule(trigger_type, &merged_condition, &merged_actions).map_err(map_error)?;

    // The schedule is recomputed from the merged state; a disabled or
    // non-active rule carries no next run
    let enabled = input.is_enabled.unwrap_or(existing.is_enabled);
    let status = input.status.or_else(|| existing.status());
    let next_scheduled_at = if enabled && status == Some(RuleStatus::Active) {
        schedule::next_run(trigger_type, &merged_condition, Utc::now())
    } else {
        None
    };

    let updated = state
        .store
        .update(
            team_id,
            rule_id,
            UpdateRule {
                name: input.name,
                description: input.description,
                trigger_condition: input.trigger_condition,
                actions: input.actions,
                priority: input.priority,
                campaign_id: input.campaign_id,
                campaign_ids: input.campaign_ids,
                status: input.status,
                is_enabled: input.is_enabled,
                max_executions: input.max_executions,
                settings: input.settings,
                next_scheduled_at,
            },
        )
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;

    Ok(Json(updated.into()))
}

/// Delete a rule (hard delete)
///
/// DELETE /api/v1/teams/:team_id/automation/:rule_id
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    team_guard(&context, team_id)?;

    let deleted = state
        .store
        .delete(team_id, rule_id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(not_found(rule_id));
    }
    info!(%rule_id, %team_id, "rule deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Re-enable a rule. A completed rule comes back as active with a
/// freshly computed schedule.
///
/// POST /api/v1/teams/:team_id/automation/:rule_id/enable
pub async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RuleResponse>, ApiError> {
    team_guard(&context, team_id)?;
    set_enabled(&state, team_id, rule_id, true).await
}

/// Disable a rule. Clears the schedule so the sweep never selects it.
///
/// POST /api/v1/teams/:team_id/automation/:rule_id/disable
pub async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RuleResponse>, ApiError> {
    team_guard(&context, team_id)?;
    set_enabled(&state, team_id, rule_id, false).await
}

async fn set_enabled(
    state: &AppState,
    team_id: Uuid,
    rule_id: Uuid,
    enabled: bool,
) -> Result<Json<RuleResponse>, ApiError> {
    let rule = state
        .store
        .get_by_team(team_id, rule_id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;

    let update = enable_update(&rule, enabled);
    let updated = state
        .store
        .update(team_id, rule_id, update)
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;
    info!(%rule_id, %team_id, enabled, "rule toggled");
    Ok(Json(updated.into()))
}

/// Build the update for an enable/disable transition.
fn enable_update(rule: &AutomationRule, enabled: bool) -> UpdateRule {
    if enabled {
        UpdateRule {
            is_enabled: Some(true),
            status: Some(RuleStatus::Active),
            next_scheduled_at: rule
                .trigger_type()
                .and_then(|t| schedule::next_run(t, &rule.trigger_condition.0, Utc::now())),
            ..Default::default()
        }
    } else {
        UpdateRule {
            is_enabled: Some(false),
            // active → paused; completed and error states are left as-is
            status: (rule.status() == Some(RuleStatus::Active)).then_some(RuleStatus::Paused),
            next_scheduled_at: None,
            ..Default::default()
        }
    }
}

/// Manually run a rule, bypassing the enabled/cap/cooldown gates
///
/// POST /api/v1/teams/:team_id/automation/:rule_id/execute
pub async fn execute_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ExecutionLog>, ApiError> {
    team_guard(&context, team_id)?;

    // Scope check before handing off to the executor
    state
        .store
        .get_by_team(team_id, rule_id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;

    let log = state
        .executor
        .execute(rule_id, true)
        .await
        .map_err(|e| {
            error!(%rule_id, "manual execution failed: {}", e);
            map_error(e)
        })?;
    Ok(Json(log))
}

/// Duplicate a rule. The copy starts fresh: zero executions, empty
/// history, active and enabled.
///
/// POST /api/v1/teams/:team_id/automation/:rule_id/duplicate
pub async fn duplicate_rule(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<RuleResponse>), ApiError> {
    team_guard(&context, team_id)?;

    let source = state
        .store
        .get_by_team(team_id, rule_id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;
    let trigger_type = source.trigger_type().ok_or_else(|| {
        map_error(Error::Internal(format!(
            "Rule {} has malformed trigger type",
            rule_id
        )))
    })?;

    let next_scheduled_at =
        schedule::next_run(trigger_type, &source.trigger_condition.0, Utc::now());
    let copy = state
        .store
        .create(CreateRule {
            team_id,
            name: format!("{} (copy)", source.name),
            description: source.description.clone(),
            trigger_type,
            trigger_condition: source.trigger_condition.0.clone(),
            actions: source.actions.0.clone(),
            priority: Some(source.priority),
            campaign_id: source.campaign_id,
            campaign_ids: Some(source.campaign_ids.0.clone()),
            max_executions: Some(source.max_executions),
            settings: Some(source.settings.0.clone()),
            next_scheduled_at,
        })
        .await
        .map_err(map_error)?;

    info!(source = %rule_id, copy = %copy.id, "rule duplicated");
    Ok((StatusCode::CREATED, Json(copy.into())))
}

/// Execution history, newest first
///
/// GET /api/v1/teams/:team_id/automation/:rule_id/history?limit=N
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path((team_id, rule_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ExecutionLog>>, ApiError> {
    team_guard(&context, team_id)?;

    let rule = state
        .store
        .get_by_team(team_id, rule_id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found(rule_id))?;

    let limit = query.limit.unwrap_or(50);
    let history: Vec<ExecutionLog> = rule
        .execution_history
        .0
        .into_iter()
        .rev()
        .take(limit)
        .collect();
    Ok(Json(history))
}

/// Aggregate rule statistics for the team (7-day recency window)
///
/// GET /api/v1/teams/:team_id/automation/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path(team_id): Path<Uuid>,
) -> Result<Json<RuleStats>, ApiError> {
    team_guard(&context, team_id)?;

    let since = Utc::now() - Duration::days(7);
    let stats = state
        .store
        .stats(team_id, since)
        .await
        .map_err(map_error)?;
    Ok(Json(stats))
}

/// Internal service-to-service event ingestion
///
/// POST /api/v1/teams/:team_id/automation/check-event
pub async fn check_event(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path(team_id): Path<Uuid>,
    Json(input): Json<CheckEventRequest>,
) -> Result<Json<CheckEventResponse>, ApiError> {
    team_guard(&context, team_id)?;

    let triggered = state
        .gateway
        .on_event(team_id, input.event_type, &input.event_data)
        .await
        .map_err(|e| {
            error!(%team_id, "event handling failed: {}", e);
            map_error(e)
        })?;
    Ok(Json(CheckEventResponse { triggered }))
}

#[derive(Debug, Clone, Copy)]
enum BulkOp {
    Enable,
    Disable,
    Delete,
}

/// POST /api/v1/teams/:team_id/automation/bulk/enable
pub async fn bulk_enable(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path(team_id): Path<Uuid>,
    Json(input): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, ApiError> {
    team_guard(&context, team_id)?;
    Ok(Json(run_bulk(&state, team_id, input.rule_ids, BulkOp::Enable).await))
}

/// POST /api/v1/teams/:team_id/automation/bulk/disable
pub async fn bulk_disable(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path(team_id): Path<Uuid>,
    Json(input): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, ApiError> {
    team_guard(&context, team_id)?;
    Ok(Json(run_bulk(&state, team_id, input.rule_ids, BulkOp::Disable).await))
}

/// DELETE /api/v1/teams/:team_id/automation/bulk
pub async fn bulk_delete(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<TeamContext>,
    Path(team_id): Path<Uuid>,
    Json(input): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, ApiError> {
    team_guard(&context, team_id)?;
    Ok(Json(run_bulk(&state, team_id, input.rule_ids, BulkOp::Delete).await))
}

/// Apply one operation to each id independently. A failure on one id is
/// reported in its result and never aborts the batch.
async fn run_bulk(state: &AppState, team_id: Uuid, ids: Vec<RuleId>, op: BulkOp) -> BulkResponse {
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        results.push(bulk_one(state, team_id, id, op).await);
    }
    BulkResponse { results }
}

async fn bulk_one(state: &AppState, team_id: Uuid, id: RuleId, op: BulkOp) -> BulkResult {
    let failure = |error: String| BulkResult {
        id,
        success: false,
        error: Some(error),
    };

    let rule = match state.store.get(id).await {
        Ok(Some(rule)) => rule,
        Ok(None) => return failure("Rule not found".to_string()),
        Err(e) => return failure(e.to_string()),
    };
    if rule.team_id != team_id {
        return failure("无权操作".to_string());
    }

    let outcome = match op {
        BulkOp::Enable => state
            .store
            .update(team_id, id, enable_update(&rule, true))
            .await
            .map(|_| ()),
        BulkOp::Disable => state
            .store
            .update(team_id, id, enable_update(&rule, false))
            .await
            .map(|_| ()),
        BulkOp::Delete => state.store.delete(team_id, id).await.map(|_| ()),
    };

    match outcome {
        Ok(()) => BulkResult {
            id,
            success: true,
            error: None,
        },
        Err(e) => failure(e.to_string()),
    }
}
