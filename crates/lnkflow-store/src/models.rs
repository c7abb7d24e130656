//! Rule store models

use chrono::{DateTime, Utc};
use lnkflow_common::types::{
    ActionConfig, CampaignId, ExecutionLog, RuleId, RuleSettings, RuleStatus, TeamId,
    TriggerCondition, TriggerType, EXECUTION_HISTORY_LIMIT,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Automation rule model, the aggregate root of the engine.
///
/// `trigger_type` and `status` are stored as their wire strings; use
/// [`AutomationRule::trigger_type`] / [`AutomationRule::status`] to get
/// the typed value. Malformed legacy values parse to `None` and the
/// engine treats them as "no match" / "no schedule".
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub team_id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: String,
    pub trigger_condition: Json<TriggerCondition>,
    pub actions: Json<Vec<ActionConfig>>,
    pub priority: i32,
    pub campaign_id: Option<CampaignId>,
    pub campaign_ids: Json<Vec<CampaignId>>,
    pub status: String,
    pub is_enabled: bool,
    pub execution_count: i32,
    /// 0 means unlimited
    pub max_executions: i32,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub execution_history: Json<Vec<ExecutionLog>>,
    pub settings: Json<RuleSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationRule {
    /// Typed trigger type, or `None` for malformed data
    pub fn trigger_type(&self) -> Option<TriggerType> {
        self.trigger_type.parse().ok()
    }

    /// Typed status, or `None` for malformed data
    pub fn status(&self) -> Option<RuleStatus> {
        self.status.parse().ok()
    }

    /// Whether the execution cap has been reached
    pub fn has_reached_max_executions(&self) -> bool {
        self.max_executions > 0 && self.execution_count >= self.max_executions
    }

    /// Append a log entry, evicting the oldest entries beyond the bound
    pub fn append_history(&mut self, log: ExecutionLog) {
        self.execution_history.0.push(log);
        let len = self.execution_history.0.len();
        if len > EXECUTION_HISTORY_LIMIT {
            self.execution_history.0.drain(..len - EXECUTION_HISTORY_LIMIT);
        }
    }
}

/// Create rule input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRule {
    pub team_id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_condition: TriggerCondition,
    pub actions: Vec<ActionConfig>,
    pub priority: Option<i32>,
    pub campaign_id: Option<CampaignId>,
    pub campaign_ids: Option<Vec<CampaignId>>,
    pub max_executions: Option<i32>,
    pub settings: Option<RuleSettings>,
    /// Computed by the schedule calculator for schedule-based triggers
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

/// Update rule input.
///
/// `next_scheduled_at` is always written: callers recompute it from the
/// merged rule, so a `None` here clears the schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRule {
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
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

/// Filter for listing rules
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub status: Option<RuleStatus>,
    pub trigger_type: Option<TriggerType>,
    pub campaign_id: Option<CampaignId>,
    pub limit: i64,
    pub offset: i64,
}

/// Aggregate rule statistics for a team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStats {
    pub total: i64,
    pub active: i64,
    pub paused: i64,
    pub completed: i64,
    pub total_executions: i64,
    /// Executions recorded in history within the stats window (7 days)
    pub recent_executions: i64,
}
