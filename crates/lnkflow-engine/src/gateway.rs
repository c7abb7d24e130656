//! Event Gateway
//!
//! Entry point for platform events (metric thresholds crossed,
//! campaign lifecycle changes). Finds the team's matching rules and
//! runs them in priority order. One misbehaving rule never blocks the
//! others.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use lnkflow_common::types::{ExecutionStatus, RuleId, TeamId, TriggerType};
use lnkflow_common::Result;
use lnkflow_store::repository::RuleRepository;

use crate::executor::RuleExecutor;
use crate::matcher;

/// Outcome of one rule triggered by an event.
#[derive(Debug, Clone, Serialize)]
pub struct TriggeredRule {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct EventGateway {
    store: Arc<dyn RuleRepository>,
    executor: Arc<RuleExecutor>,
}

impl EventGateway {
    pub fn new(store: Arc<dyn RuleRepository>, executor: Arc<RuleExecutor>) -> Self {
        Self { store, executor }
    }

    /// Handle one event: every enabled active rule of the team with a
    /// matching condition executes, highest priority first. All matching
    /// rules run; rules are independent.
    pub async fn on_event(
        &self,
        team_id: TeamId,
        trigger_type: TriggerType,
        event: &Value,
    ) -> Result<Vec<TriggeredRule>> {
        let candidates = self.store.list_candidates(team_id, trigger_type).await?;
        debug!(
            %team_id,
            trigger_type = %trigger_type,
            candidates = candidates.len(),
            "event received"
        );

        let mut triggered = Vec::new();
        for rule in candidates {
            if !matcher::matches(&rule, event) {
                continue;
            }
            match self.executor.execute(rule.id, false).await {
                Ok(log) => triggered.push(TriggeredRule {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    status: log.status,
                    message: log.message,
                }),
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "event-triggered execution failed");
                    triggered.push(TriggeredRule {
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        status: ExecutionStatus::Failed,
                        message: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(triggered)
    }
}
