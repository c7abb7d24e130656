//! Rule Executor
//!
//! Runs one rule end to end: claim, gate, dispatch actions in order,
//! record the outcome, and decide the rule's disposition. Every
//! execution attempt leaves exactly one rule-level history entry, skips
//! included.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use lnkflow_common::types::{
    ActionConfig, ExecutionLog, ExecutionStatus, RuleId, RuleStatus,
};
use lnkflow_common::{Error, Result};
use lnkflow_store::models::AutomationRule;
use lnkflow_store::repository::RuleRepository;

use crate::dispatch::{ActionDispatcher, ActionOutcome};
use crate::schedule;

/// Executes automation rules. One shared instance serves the sweep
/// loop, the event gateway and the API's manual-execute endpoint.
pub struct RuleExecutor {
    store: Arc<dyn RuleRepository>,
    dispatcher: Arc<ActionDispatcher>,
    // Per-rule claim locks. Entries are created on demand and never
    // removed; the map is bounded by the number of distinct rules this
    // process has executed.
    locks: Mutex<HashMap<RuleId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RuleExecutor {
    pub fn new(store: Arc<dyn RuleRepository>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a rule by id. `force` bypasses the enabled, max-executions
    /// and cooldown gates (manual runs from the API) but never the
    /// concurrency claim.
    pub async fn execute(&self, rule_id: RuleId, force: bool) -> Result<ExecutionLog> {
        let lock = self.claim_lock(rule_id);
        let Ok(_guard) = lock.try_lock_owned() else {
            let log = ExecutionLog::skipped(Utc::now(), "Concurrent execution in progress");
            self.store.append_history(rule_id, log.clone()).await?;
            return Ok(log);
        };

        // Fresh read under the claim so gating sees the latest counters
        let rule = self
            .store
            .get(rule_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Rule {} not found", rule_id)))?;

        if !force {
            if let Some(skip) = self.gate(&rule).await? {
                return Ok(skip);
            }
        }

        self.run(rule).await
    }

    fn claim_lock(&self, rule_id: RuleId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(rule_id).or_default().clone()
    }

    /// Pre-execution gates. Returns the skip log if the rule must not
    /// run; skips are recorded in history without touching the
    /// execution count.
    async fn gate(&self, rule: &AutomationRule) -> Result<Option<ExecutionLog>> {
        let now = Utc::now();

        if !rule.is_enabled {
            let log = ExecutionLog::skipped(now, "Rule is disabled");
            self.store.append_history(rule.id, log.clone()).await?;
            return Ok(Some(log));
        }

        if rule.has_reached_max_executions() {
            let log = ExecutionLog::skipped(now, "Max executions reached");
            // A rule at its cap is finished; flip it to completed so the
            // sweep stops picking it up
            let mut updated = rule.clone();
            updated.status = RuleStatus::Completed.to_string();
            updated.next_scheduled_at = None;
            self.store
                .persist_execution(&updated, rule.execution_count, log.clone())
                .await?;
            return Ok(Some(log));
        }

        if let (Some(cooldown), Some(last)) =
            (rule.settings.0.cooldown_minutes, rule.last_executed_at)
        {
            // Values outside TimeDelta's range act as a cooldown that
            // never elapses
            let cooling = match Duration::try_minutes(cooldown) {
                Some(window) => now.signed_duration_since(last) < window,
                None => true,
            };
            if cooldown > 0 && cooling {
                let log = ExecutionLog::skipped(now, "Cooldown period not elapsed");
                self.store.append_history(rule.id, log.clone()).await?;
                return Ok(Some(log));
            }
        }

        Ok(None)
    }

    async fn run(&self, mut rule: AutomationRule) -> Result<ExecutionLog> {
        let expected_count = rule.execution_count;
        let actions = rule.actions.0.clone();

        debug!(rule_id = %rule.id, actions = actions.len(), "executing rule");

        // Actions run in list order; a failure is recorded and the rest
        // of the list still runs
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in &actions {
            outcomes.push(self.dispatcher.dispatch(&rule, action).await);
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        let now = Utc::now();
        let log = ExecutionLog {
            timestamp: now,
            status: if failed > 0 {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Success
            },
            message: Some(if failed > 0 {
                format!("Executed {} actions, {} failed", outcomes.len(), failed)
            } else {
                format!("Executed {} actions", outcomes.len())
            }),
            details: Some(json!({
                "actions": outcomes,
            })),
        };

        // Bookkeeping: failed runs still count as executions
        rule.execution_count += 1;
        rule.last_executed_at = Some(now);
        self.disposition(&mut rule, now);

        let persisted = self
            .store
            .persist_execution(&rule, expected_count, log.clone())
            .await?;
        if !persisted {
            // Another process executed this rule concurrently; its run
            // wins and ours is recorded as a skip
            warn!(rule_id = %rule.id, "lost execution race, discarding result");
            let skip = ExecutionLog::skipped(Utc::now(), "Concurrent execution in progress");
            self.store.append_history(rule.id, skip.clone()).await?;
            return Ok(skip);
        }

        info!(
            rule_id = %rule.id,
            status = %log.status,
            execution_count = rule.execution_count,
            "rule executed"
        );

        self.notify(&rule, &log, &outcomes).await;
        Ok(log)
    }

    /// Post-execution state: completion, one-shot retirement, or the
    /// next scheduled run.
    fn disposition(&self, rule: &mut AutomationRule, now: chrono::DateTime<Utc>) {
        if rule.settings.0.execute_once {
            rule.status = RuleStatus::Completed.to_string();
            rule.is_enabled = false;
            rule.next_scheduled_at = None;
            return;
        }

        if rule.has_reached_max_executions() {
            rule.status = RuleStatus::Completed.to_string();
            rule.next_scheduled_at = None;
            return;
        }

        rule.next_scheduled_at = rule
            .trigger_type()
            .and_then(|t| schedule::next_run(t, &rule.trigger_condition.0, now));
    }

    /// Best-effort notification after a run. Failures are logged and
    /// never affect the recorded outcome.
    async fn notify(&self, rule: &AutomationRule, log: &ExecutionLog, outcomes: &[ActionOutcome]) {
        let settings = &rule.settings.0;
        let should_notify = settings.notify_on_execution
            || (settings.notify_on_error && log.status == ExecutionStatus::Failed);
        if !should_notify {
            return;
        }

        // Notification targets are the rule's own email recipients
        let recipients: Vec<String> = rule
            .actions
            .0
            .iter()
            .filter_map(|a| match a {
                ActionConfig::SendEmail { recipients, .. } => Some(recipients.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        if recipients.is_empty() {
            debug!(rule_id = %rule.id, "notification requested but rule has no email recipients");
            return;
        }

        let subject = format!("Automation rule '{}': {}", rule.name, log.status);
        let body = format!(
            "Rule '{}' ran at {} with status {}.\n{}\n\nAction results:\n{}",
            rule.name,
            log.timestamp,
            log.status,
            log.message.as_deref().unwrap_or(""),
            serde_json::to_string_pretty(outcomes).unwrap_or_default(),
        );

        if let Err(e) = self
            .dispatcher
            .notifier()
            .send(&recipients, &subject, &body)
            .await
        {
            warn!(rule_id = %rule.id, error = %e, "failed to send execution notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{NoopCampaignControl, NoopNotifier};
    use chrono::Duration;
    use lnkflow_common::config::EngineConfig;
    use lnkflow_common::types::{RuleSettings, TriggerCondition, TriggerType};
    use lnkflow_store::models::CreateRule;
    use lnkflow_store::repository::MemoryRuleRepository;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn executor(store: Arc<MemoryRuleRepository>) -> RuleExecutor {
        let dispatcher = Arc::new(ActionDispatcher::new(
            &EngineConfig::default(),
            Arc::new(NoopCampaignControl),
            Arc::new(NoopNotifier),
        ));
        RuleExecutor::new(store, dispatcher)
    }

    fn create_input(settings: RuleSettings, max_executions: Option<i32>) -> CreateRule {
        CreateRule {
            team_id: Uuid::new_v4(),
            name: "executor test".to_string(),
            description: None,
            trigger_type: TriggerType::CampaignCreated,
            trigger_condition: TriggerCondition::default(),
            actions: vec![ActionConfig::PauseCampaign {
                campaign_id: Some(Uuid::new_v4()),
            }],
            priority: None,
            campaign_id: None,
            campaign_ids: None,
            max_executions,
            settings: Some(settings),
            next_scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn test_successful_execution_records_history() {
        let store = Arc::new(MemoryRuleRepository::new());
        let rule = store
            .create(create_input(RuleSettings::default(), None))
            .await
            .unwrap();

        let log = executor(store.clone()).execute(rule.id, false).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Success);

        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.execution_count, 1);
        assert!(after.last_executed_at.is_some());
        assert_eq!(after.execution_history.0.len(), 1);
        assert_eq!(after.status, "active");
    }

    #[tokio::test]
    async fn test_disabled_rule_skips_without_counting() {
        let store = Arc::new(MemoryRuleRepository::new());
        let rule = store
            .create(create_input(RuleSettings::default(), None))
            .await
            .unwrap();
        store
            .update(
                rule.team_id,
                rule.id,
                lnkflow_store::models::UpdateRule {
                    is_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let log = executor(store.clone()).execute(rule.id, false).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Skipped);
        assert_eq!(log.message.as_deref(), Some("Rule is disabled"));

        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.execution_count, 0);
        assert_eq!(after.execution_history.0.len(), 1);
    }

    #[tokio::test]
    async fn test_force_bypasses_disabled_gate() {
        let store = Arc::new(MemoryRuleRepository::new());
        let rule = store
            .create(create_input(RuleSettings::default(), None))
            .await
            .unwrap();
        store
            .update(
                rule.team_id,
                rule.id,
                lnkflow_store::models::UpdateRule {
                    is_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let log = executor(store.clone()).execute(rule.id, true).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Success);
        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.execution_count, 1);
    }

    #[tokio::test]
    async fn test_max_executions_completes_rule() {
        let store = Arc::new(MemoryRuleRepository::new());
        let rule = store
            .create(create_input(RuleSettings::default(), Some(2)))
            .await
            .unwrap();
        let exec = executor(store.clone());

        exec.execute(rule.id, false).await.unwrap();
        let after_first = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after_first.execution_count, 1);
        assert_eq!(after_first.status, "active");

        // Second run hits the cap and retires the rule
        exec.execute(rule.id, false).await.unwrap();
        let after_second = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after_second.execution_count, 2);
        assert_eq!(after_second.status, "completed");

        // Third attempt is gated off
        let log = exec.execute(rule.id, false).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Skipped);
        assert_eq!(log.message.as_deref(), Some("Max executions reached"));
        let after_third = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after_third.execution_count, 2);
    }

    #[tokio::test]
    async fn test_execute_once_retires_rule() {
        let store = Arc::new(MemoryRuleRepository::new());
        let settings = RuleSettings {
            execute_once: true,
            ..Default::default()
        };
        let rule = store.create(create_input(settings, None)).await.unwrap();

        let log = executor(store.clone()).execute(rule.id, false).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Success);

        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.status, "completed");
        assert!(!after.is_enabled);
        assert!(after.next_scheduled_at.is_none());
    }

    #[tokio::test]
    async fn test_cooldown_skips() {
        let store = Arc::new(MemoryRuleRepository::new());
        let settings = RuleSettings {
            cooldown_minutes: Some(30),
            ..Default::default()
        };
        let rule = store.create(create_input(settings, None)).await.unwrap();
        let exec = executor(store.clone());

        exec.execute(rule.id, false).await.unwrap();
        let log = exec.execute(rule.id, false).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Skipped);
        assert_eq!(log.message.as_deref(), Some("Cooldown period not elapsed"));

        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.execution_count, 1);
        assert_eq!(after.execution_history.0.len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_cooldown_skips_instead_of_panicking() {
        let store = Arc::new(MemoryRuleRepository::new());
        let settings = RuleSettings {
            cooldown_minutes: Some(i64::MAX),
            ..Default::default()
        };
        let rule = store.create(create_input(settings, None)).await.unwrap();
        let exec = executor(store.clone());

        exec.execute(rule.id, false).await.unwrap();
        let log = exec.execute(rule.id, false).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Skipped);
        assert_eq!(log.message.as_deref(), Some("Cooldown period not elapsed"));

        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.execution_count, 1);
    }

    #[tokio::test]
    async fn test_partial_action_failure_counts_and_records() {
        let store = Arc::new(MemoryRuleRepository::new());
        let mut input = create_input(RuleSettings::default(), None);
        input.actions = vec![
            // No target campaign anywhere: this one fails
            ActionConfig::ResumeCampaign { campaign_id: None },
            ActionConfig::PauseCampaign {
                campaign_id: Some(Uuid::new_v4()),
            },
        ];
        let rule = store.create(input).await.unwrap();

        let log = executor(store.clone()).execute(rule.id, false).await.unwrap();
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert_eq!(
            log.message.as_deref(),
            Some("Executed 2 actions, 1 failed")
        );

        // Both outcomes are in the details and the run still counted
        let details = log.details.unwrap();
        assert_eq!(details["actions"].as_array().unwrap().len(), 2);
        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.execution_count, 1);
        assert_eq!(after.status, "active");
    }

    #[tokio::test]
    async fn test_schedule_rule_gets_next_run() {
        let store = Arc::new(MemoryRuleRepository::new());
        let mut input = create_input(RuleSettings::default(), None);
        input.trigger_type = TriggerType::Schedule;
        input.trigger_condition = TriggerCondition {
            schedule_type: Some(lnkflow_common::types::ScheduleType::Daily),
            schedule_time: Some("09:00".to_string()),
            ..Default::default()
        };
        let rule = store.create(input).await.unwrap();

        executor(store.clone()).execute(rule.id, false).await.unwrap();
        let after = store.get(rule.id).await.unwrap().unwrap();
        let next = after.next_scheduled_at.expect("next run computed");
        assert!(next > Utc::now());
        assert!(next < Utc::now() + Duration::days(2));
    }

    #[tokio::test]
    async fn test_concurrent_execution_loser_is_skipped() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(300)))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryRuleRepository::new());
        let mut input = create_input(RuleSettings::default(), None);
        input.actions = vec![ActionConfig::SendWebhook {
            webhook_url: server.uri(),
            payload_template: None,
        }];
        let rule = store.create(input).await.unwrap();

        let exec = Arc::new(executor(store.clone()));
        let first = {
            let exec = exec.clone();
            let id = rule.id;
            tokio::spawn(async move { exec.execute(id, false).await })
        };
        // Let the first call claim the rule before racing it
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let second = exec.execute(rule.id, false).await.unwrap();

        assert_eq!(second.status, ExecutionStatus::Skipped);
        assert_eq!(
            second.message.as_deref(),
            Some("Concurrent execution in progress")
        );

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, ExecutionStatus::Success);

        // Exactly one run counted; history has the run plus the skip
        let after = store.get(rule.id).await.unwrap().unwrap();
        assert_eq!(after.execution_count, 1);
        let statuses: Vec<ExecutionStatus> = after
            .execution_history
            .0
            .iter()
            .map(|e| e.status)
            .collect();
        assert!(statuses.contains(&ExecutionStatus::Success));
        assert!(statuses.contains(&ExecutionStatus::Skipped));
    }

    #[tokio::test]
    async fn test_unknown_rule_is_not_found() {
        let store = Arc::new(MemoryRuleRepository::new());
        let err = executor(store).execute(Uuid::new_v4(), false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
