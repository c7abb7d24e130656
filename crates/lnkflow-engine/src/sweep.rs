//! Periodic sweep
//!
//! Ticks on a fixed interval, collects schedule-based rules whose next
//! run is due, and hands them to the executor with bounded
//! concurrency. A tick that overruns the interval is not stacked; the
//! next tick is skipped until the running one finishes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use lnkflow_common::config::EngineConfig;
use lnkflow_common::Result;
use lnkflow_store::repository::RuleRepository;

use crate::executor::RuleExecutor;

pub struct SweepLoop {
    store: Arc<dyn RuleRepository>,
    executor: Arc<RuleExecutor>,
    interval: Duration,
    concurrency: usize,
    tick_guard: tokio::sync::Mutex<()>,
}

impl SweepLoop {
    pub fn new(
        store: Arc<dyn RuleRepository>,
        executor: Arc<RuleExecutor>,
        engine_config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            executor,
            interval: Duration::from_secs(engine_config.sweep_interval_secs),
            concurrency: engine_config.sweep_concurrency.max(1),
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the sweep until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.interval.as_secs(),
            concurrency = self.concurrency,
            "sweep loop started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "sweep tick failed");
            }
        }
    }

    /// One sweep pass. Public so tests and operational tooling can
    /// trigger it directly.
    pub async fn tick(&self) -> Result<usize> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            warn!("previous sweep tick still running, skipping");
            return Ok(0);
        };

        let due = self.store.list_due(Utc::now()).await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!(due = due.len(), "sweep found due rules");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(due.len());
        for rule in due {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let executor = self.executor.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = executor.execute(rule.id, false).await {
                    // One broken rule must not take down the tick
                    error!(rule_id = %rule.id, error = %e, "sweep execution failed");
                }
            }));
        }

        let executed = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{ActionDispatcher, NoopCampaignControl, NoopNotifier};
    use chrono::Duration as ChronoDuration;
    use lnkflow_common::types::{
        ActionConfig, ScheduleType, TriggerCondition, TriggerType,
    };
    use lnkflow_store::models::CreateRule;
    use lnkflow_store::repository::MemoryRuleRepository;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn sweep(store: Arc<MemoryRuleRepository>) -> SweepLoop {
        let dispatcher = Arc::new(ActionDispatcher::new(
            &EngineConfig::default(),
            Arc::new(NoopCampaignControl),
            Arc::new(NoopNotifier),
        ));
        let executor = Arc::new(RuleExecutor::new(store.clone(), dispatcher));
        SweepLoop::new(store, executor, &EngineConfig::default())
    }

    fn due_rule(team_id: Uuid) -> CreateRule {
        CreateRule {
            team_id,
            name: "due rule".to_string(),
            description: None,
            trigger_type: TriggerType::Schedule,
            trigger_condition: TriggerCondition {
                schedule_type: Some(ScheduleType::Daily),
                schedule_time: Some("09:00".to_string()),
                ..Default::default()
            },
            actions: vec![ActionConfig::PauseCampaign {
                campaign_id: Some(Uuid::new_v4()),
            }],
            priority: None,
            campaign_id: None,
            campaign_ids: None,
            max_executions: None,
            settings: None,
            next_scheduled_at: Some(Utc::now() - ChronoDuration::minutes(1)),
        }
    }

    #[tokio::test]
    async fn test_tick_executes_due_rules() {
        let store = Arc::new(MemoryRuleRepository::new());
        let team = Uuid::new_v4();
        let a = store.create(due_rule(team)).await.unwrap();
        let b = store.create(due_rule(team)).await.unwrap();
        // Not due yet
        let mut future = due_rule(team);
        future.next_scheduled_at = Some(Utc::now() + ChronoDuration::hours(1));
        let c = store.create(future).await.unwrap();

        let executed = sweep(store.clone()).tick().await.unwrap();
        assert_eq!(executed, 2);

        assert_eq!(store.get(a.id).await.unwrap().unwrap().execution_count, 1);
        assert_eq!(store.get(b.id).await.unwrap().unwrap().execution_count, 1);
        assert_eq!(store.get(c.id).await.unwrap().unwrap().execution_count, 0);
        // Executed rules get a fresh next run in the future
        let next = store
            .get(a.id)
            .await
            .unwrap()
            .unwrap()
            .next_scheduled_at
            .expect("rescheduled");
        assert!(next > Utc::now());
    }

    #[tokio::test]
    async fn test_tick_with_nothing_due() {
        let store = Arc::new(MemoryRuleRepository::new());
        assert_eq!(sweep(store).tick().await.unwrap(), 0);
    }
}
