//! Automation rule repository

use crate::db::DatabasePool;
use crate::models::{AutomationRule, CreateRule, RuleFilter, RuleStats, UpdateRule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lnkflow_common::types::{ExecutionLog, RuleId, TeamId, TriggerType};
use lnkflow_common::{Error, Result};
use sqlx::types::Json;
use uuid::Uuid;

/// Rule repository trait, the engine's store boundary
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, input: CreateRule) -> Result<AutomationRule>;
    async fn get(&self, id: RuleId) -> Result<Option<AutomationRule>>;
    async fn get_by_team(&self, team_id: TeamId, id: RuleId) -> Result<Option<AutomationRule>>;
    async fn list_by_team(&self, team_id: TeamId, filter: &RuleFilter)
        -> Result<Vec<AutomationRule>>;
    async fn count_by_team(&self, team_id: TeamId, filter: &RuleFilter) -> Result<i64>;
    async fn update(
        &self,
        team_id: TeamId,
        id: RuleId,
        input: UpdateRule,
    ) -> Result<Option<AutomationRule>>;
    async fn delete(&self, team_id: TeamId, id: RuleId) -> Result<bool>;

    /// Enabled, active, schedule-based rules whose next run is due
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<AutomationRule>>;

    /// Enabled, active rules of a trigger type for a team, highest priority first
    async fn list_candidates(
        &self,
        team_id: TeamId,
        trigger_type: TriggerType,
    ) -> Result<Vec<AutomationRule>>;

    /// Append one history entry, evicting the oldest past the bound
    async fn append_history(&self, id: RuleId, log: ExecutionLog) -> Result<()>;

    /// Persist the outcome of an execution atomically: counters,
    /// status, schedule, and the run's log appended to the bounded
    /// history. The write is conditional on the rule's pre-execution
    /// `execution_count`; a `false` return means a concurrent
    /// execution won the race. History is appended rather than
    /// replaced so entries written by other callers during the run
    /// are preserved.
    async fn persist_execution(
        &self,
        rule: &AutomationRule,
        expected_count: i32,
        log: ExecutionLog,
    ) -> Result<bool>;

    /// Aggregate counts for a team; `since` bounds recent executions
    async fn stats(&self, team_id: TeamId, since: DateTime<Utc>) -> Result<RuleStats>;
}

/// Database rule repository
pub struct DbRuleRepository {
    pool: DatabasePool,
}

impl DbRuleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleRepository for DbRuleRepository {
    async fn create(&self, input: CreateRule) -> Result<AutomationRule> {
        let id = Uuid::now_v7();

        sqlx::query_as::<_, AutomationRule>(
            r#"
            INSERT INTO automation_rules (
                id, team_id, name, description, trigger_type, trigger_condition,
                actions, priority, campaign_id, campaign_ids, status, is_enabled,
                execution_count, max_executions, next_scheduled_at,
                execution_history, settings
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'active', true,
                    0, $11, $12, '[]', $13)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.team_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.trigger_type.to_string())
        .bind(Json(&input.trigger_condition))
        .bind(Json(&input.actions))
        .bind(input.priority.unwrap_or(0))
        .bind(input.campaign_id)
        .bind(Json(input.campaign_ids.unwrap_or_default()))
        .bind(input.max_executions.unwrap_or(0))
        .bind(input.next_scheduled_at)
        .bind(Json(input.settings.unwrap_or_default()))
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(&self, id: RuleId) -> Result<Option<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>("SELECT * FROM automation_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_by_team(&self, team_id: TeamId, id: RuleId) -> Result<Option<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(
            "SELECT * FROM automation_rules WHERE id = $1 AND team_id = $2",
        )
        .bind(id)
        .bind(team_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_team(
        &self,
        team_id: TeamId,
        filter: &RuleFilter,
    ) -> Result<Vec<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(
            r#"
            SELECT * FROM automation_rules
            WHERE team_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR trigger_type = $3)
              AND ($4::uuid IS NULL OR campaign_id = $4
                   OR campaign_ids @> to_jsonb(ARRAY[$4::uuid]))
            ORDER BY priority DESC, created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(team_id)
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.trigger_type.map(|t| t.to_string()))
        .bind(filter.campaign_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn count_by_team(&self, team_id: TeamId, filter: &RuleFilter) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM automation_rules
            WHERE team_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR trigger_type = $3)
              AND ($4::uuid IS NULL OR campaign_id = $4
                   OR campaign_ids @> to_jsonb(ARRAY[$4::uuid]))
            "#,
        )
        .bind(team_id)
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.trigger_type.map(|t| t.to_string()))
        .bind(filter.campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count.0)
    }

    async fn update(
        &self,
        team_id: TeamId,
        id: RuleId,
        input: UpdateRule,
    ) -> Result<Option<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(
            r#"
            UPDATE automation_rules SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                trigger_condition = COALESCE($5, trigger_condition),
                actions = COALESCE($6, actions),
                priority = COALESCE($7, priority),
                campaign_id = COALESCE($8, campaign_id),
                campaign_ids = COALESCE($9, campaign_ids),
                status = COALESCE($10, status),
                is_enabled = COALESCE($11, is_enabled),
                max_executions = COALESCE($12, max_executions),
                settings = COALESCE($13, settings),
                next_scheduled_at = $14,
                updated_at = NOW()
            WHERE id = $1 AND team_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(team_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.trigger_condition.as_ref().map(Json))
        .bind(input.actions.as_ref().map(Json))
        .bind(input.priority)
        .bind(input.campaign_id)
        .bind(input.campaign_ids.as_ref().map(Json))
        .bind(input.status.map(|s| s.to_string()))
        .bind(input.is_enabled)
        .bind(input.max_executions)
        .bind(input.settings.as_ref().map(Json))
        .bind(input.next_scheduled_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn delete(&self, team_id: TeamId, id: RuleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1 AND team_id = $2")
            .bind(id)
            .bind(team_id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(
            r#"
            SELECT * FROM automation_rules
            WHERE is_enabled
              AND status = 'active'
              AND trigger_type IN ('schedule', 'time_based')
              AND next_scheduled_at IS NOT NULL
              AND next_scheduled_at <= $1
            ORDER BY next_scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_candidates(
        &self,
        team_id: TeamId,
        trigger_type: TriggerType,
    ) -> Result<Vec<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(
            r#"
            SELECT * FROM automation_rules
            WHERE team_id = $1
              AND trigger_type = $2
              AND is_enabled
              AND status = 'active'
            ORDER BY priority DESC
            "#,
        )
        .bind(team_id)
        .bind(trigger_type.to_string())
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn append_history(&self, id: RuleId, log: ExecutionLog) -> Result<()> {
        // `- 0` drops the oldest entry when the array is at the bound
        sqlx::query(
            r#"
            UPDATE automation_rules SET
                execution_history = CASE
                    WHEN jsonb_array_length(execution_history) >= 100
                    THEN (execution_history - 0) || $2::jsonb
                    ELSE execution_history || $2::jsonb
                END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(log))
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn persist_execution(
        &self,
        rule: &AutomationRule,
        expected_count: i32,
        log: ExecutionLog,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE automation_rules SET
                status = $3,
                is_enabled = $4,
                execution_count = $5,
                last_executed_at = $6,
                next_scheduled_at = $7,
                execution_history = CASE
                    WHEN jsonb_array_length(execution_history) >= 100
                    THEN (execution_history - 0) || $8::jsonb
                    ELSE execution_history || $8::jsonb
                END,
                updated_at = NOW()
            WHERE id = $1 AND execution_count = $2
            "#,
        )
        .bind(rule.id)
        .bind(expected_count)
        .bind(&rule.status)
        .bind(rule.is_enabled)
        .bind(rule.execution_count)
        .bind(rule.last_executed_at)
        .bind(rule.next_scheduled_at)
        .bind(Json(log))
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self, team_id: TeamId, since: DateTime<Utc>) -> Result<RuleStats> {
        let (total, active, paused, completed, total_executions): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'active'),
                    COUNT(*) FILTER (WHERE status = 'paused'),
                    COUNT(*) FILTER (WHERE status = 'completed'),
                    COALESCE(SUM(execution_count), 0)::bigint
                FROM automation_rules
                WHERE team_id = $1
                "#,
            )
            .bind(team_id)
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let (recent_executions,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM automation_rules r,
                 jsonb_array_elements(r.execution_history) AS e
            WHERE r.team_id = $1
              AND e->>'status' <> 'skipped'
              AND (e->>'timestamp')::timestamptz >= $2
            "#,
        )
        .bind(team_id)
        .bind(since)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(RuleStats {
            total,
            active,
            paused,
            completed,
            total_executions,
            recent_executions,
        })
    }
}
