//! In-memory rule repository
//!
//! Backs engine and handler tests; mirrors the semantics of the
//! database repository including the conditional execution persist.

use crate::models::{AutomationRule, CreateRule, RuleFilter, RuleStats, UpdateRule};
use crate::repository::rules::RuleRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lnkflow_common::types::{
    ExecutionLog, ExecutionStatus, RuleId, RuleStatus, TeamId, TriggerType,
};
use lnkflow_common::Result;
use sqlx::types::Json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory rule repository
#[derive(Default)]
pub struct MemoryRuleRepository {
    rules: RwLock<HashMap<RuleId, AutomationRule>>,
}

impl MemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches_filter(rule: &AutomationRule, filter: &RuleFilter) -> bool {
        if let Some(status) = filter.status {
            if rule.status != status.to_string() {
                return false;
            }
        }
        if let Some(trigger_type) = filter.trigger_type {
            if rule.trigger_type != trigger_type.to_string() {
                return false;
            }
        }
        if let Some(campaign_id) = filter.campaign_id {
            let scoped = rule.campaign_id == Some(campaign_id)
                || rule.campaign_ids.0.contains(&campaign_id);
            if !scoped {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl RuleRepository for MemoryRuleRepository {
    async fn create(&self, input: CreateRule) -> Result<AutomationRule> {
        let now = Utc::now();
        let rule = AutomationRule {
            id: Uuid::now_v7(),
            team_id: input.team_id,
            name: input.name,
            description: input.description,
            trigger_type: input.trigger_type.to_string(),
            trigger_condition: Json(input.trigger_condition),
            actions: Json(input.actions),
            priority: input.priority.unwrap_or(0),
            campaign_id: input.campaign_id,
            campaign_ids: Json(input.campaign_ids.unwrap_or_default()),
            status: RuleStatus::Active.to_string(),
            is_enabled: true,
            execution_count: 0,
            max_executions: input.max_executions.unwrap_or(0),
            last_executed_at: None,
            next_scheduled_at: input.next_scheduled_at,
            execution_history: Json(vec![]),
            settings: Json(input.settings.unwrap_or_default()),
            created_at: now,
            updated_at: now,
        };

        self.rules.write().await.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get(&self, id: RuleId) -> Result<Option<AutomationRule>> {
        Ok(self.rules.read().await.get(&id).cloned())
    }

    async fn get_by_team(&self, team_id: TeamId, id: RuleId) -> Result<Option<AutomationRule>> {
        Ok(self
            .rules
            .read()
            .await
            .get(&id)
            .filter(|r| r.team_id == team_id)
            .cloned())
    }

    async fn list_by_team(
        &self,
        team_id: TeamId,
        filter: &RuleFilter,
    ) -> Result<Vec<AutomationRule>> {
        let rules = self.rules.read().await;
        let mut matched: Vec<AutomationRule> = rules
            .values()
            .filter(|r| r.team_id == team_id && Self::matches_filter(r, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn count_by_team(&self, team_id: TeamId, filter: &RuleFilter) -> Result<i64> {
        let rules = self.rules.read().await;
        Ok(rules
            .values()
            .filter(|r| r.team_id == team_id && Self::matches_filter(r, filter))
            .count() as i64)
    }

    async fn update(
        &self,
        team_id: TeamId,
        id: RuleId,
        input: UpdateRule,
    ) -> Result<Option<AutomationRule>> {
        let mut rules = self.rules.write().await;
        let Some(rule) = rules.get_mut(&id).filter(|r| r.team_id == team_id) else {
            return Ok(None);
        };

        if let Some(name) = input.name {
            rule.name = name;
        }
        if let Some(description) = input.description {
            rule.description = Some(description);
        }
        if let Some(condition) = input.trigger_condition {
            rule.trigger_condition = Json(condition);
        }
        if let Some(actions) = input.actions {
            rule.actions = Json(actions);
        }
        if let Some(priority) = input.priority {
            rule.priority = priority;
        }
        if let Some(campaign_id) = input.campaign_id {
            rule.campaign_id = Some(campaign_id);
        }
        if let Some(campaign_ids) = input.campaign_ids {
            rule.campaign_ids = Json(campaign_ids);
        }
        if let Some(status) = input.status {
            rule.status = status.to_string();
        }
        if let Some(is_enabled) = input.is_enabled {
            rule.is_enabled = is_enabled;
        }
        if let Some(max_executions) = input.max_executions {
            rule.max_executions = max_executions;
        }
        if let Some(settings) = input.settings {
            rule.settings = Json(settings);
        }
        rule.next_scheduled_at = input.next_scheduled_at;
        rule.updated_at = Utc::now();

        Ok(Some(rule.clone()))
    }

    async fn delete(&self, team_id: TeamId, id: RuleId) -> Result<bool> {
        let mut rules = self.rules.write().await;
        match rules.get(&id) {
            Some(r) if r.team_id == team_id => {
                rules.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<AutomationRule>> {
        let rules = self.rules.read().await;
        let mut due: Vec<AutomationRule> = rules
            .values()
            .filter(|r| {
                r.is_enabled
                    && r.status == "active"
                    && r.trigger_type()
                        .map(|t| t.is_schedule_based())
                        .unwrap_or(false)
                    && r.next_scheduled_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_scheduled_at);
        Ok(due)
    }

    async fn list_candidates(
        &self,
        team_id: TeamId,
        trigger_type: TriggerType,
    ) -> Result<Vec<AutomationRule>> {
        let rules = self.rules.read().await;
        let mut candidates: Vec<AutomationRule> = rules
            .values()
            .filter(|r| {
                r.team_id == team_id
                    && r.trigger_type == trigger_type.to_string()
                    && r.is_enabled
                    && r.status == "active"
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(candidates)
    }

    async fn append_history(&self, id: RuleId, log: ExecutionLog) -> Result<()> {
        let mut rules = self.rules.write().await;
        if let Some(rule) = rules.get_mut(&id) {
            rule.append_history(log);
            rule.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn persist_execution(
        &self,
        updated: &AutomationRule,
        expected_count: i32,
        log: ExecutionLog,
    ) -> Result<bool> {
        let mut rules = self.rules.write().await;
        let Some(rule) = rules.get_mut(&updated.id) else {
            return Ok(false);
        };
        if rule.execution_count != expected_count {
            return Ok(false);
        }

        rule.status = updated.status.clone();
        rule.is_enabled = updated.is_enabled;
        rule.execution_count = updated.execution_count;
        rule.last_executed_at = updated.last_executed_at;
        rule.next_scheduled_at = updated.next_scheduled_at;
        rule.append_history(log);
        rule.updated_at = Utc::now();
        Ok(true)
    }

    async fn stats(&self, team_id: TeamId, since: DateTime<Utc>) -> Result<RuleStats> {
        let rules = self.rules.read().await;
        let team: Vec<&AutomationRule> =
            rules.values().filter(|r| r.team_id == team_id).collect();

        let count_status =
            |s: &str| team.iter().filter(|r| r.status == s).count() as i64;

        let recent_executions = team
            .iter()
            .flat_map(|r| r.execution_history.0.iter())
            .filter(|e| e.status != ExecutionStatus::Skipped && e.timestamp >= since)
            .count() as i64;

        Ok(RuleStats {
            total: team.len() as i64,
            active: count_status("active"),
            paused: count_status("paused"),
            completed: count_status("completed"),
            total_executions: team.iter().map(|r| r.execution_count as i64).sum(),
            recent_executions,
        })
    }
}
