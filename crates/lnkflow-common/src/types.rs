//! Common types for lnkflow

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for teams
pub type TeamId = Uuid;

/// Unique identifier for automation rules
pub type RuleId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for links
pub type LinkId = Uuid;

/// Maximum number of entries kept in a rule's execution history.
/// Oldest entries are evicted first when the bound is exceeded.
pub const EXECUTION_HISTORY_LIMIT: usize = 100;

/// Trigger types for automation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Schedule,
    TimeBased,
    ClicksThreshold,
    ConversionsThreshold,
    BudgetThreshold,
    CampaignStatusChange,
    LinkStatusChange,
    CampaignCreated,
    CampaignEnded,
}

impl TriggerType {
    /// Whether this trigger is driven by the periodic sweep rather than events
    pub fn is_schedule_based(&self) -> bool {
        matches!(self, TriggerType::Schedule | TriggerType::TimeBased)
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerType::Schedule => "schedule",
            TriggerType::TimeBased => "time_based",
            TriggerType::ClicksThreshold => "clicks_threshold",
            TriggerType::ConversionsThreshold => "conversions_threshold",
            TriggerType::BudgetThreshold => "budget_threshold",
            TriggerType::CampaignStatusChange => "campaign_status_change",
            TriggerType::LinkStatusChange => "link_status_change",
            TriggerType::CampaignCreated => "campaign_created",
            TriggerType::CampaignEnded => "campaign_ended",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TriggerType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| crate::Error::Validation(format!("Unknown trigger type: {}", s)))
    }
}

/// Lifecycle status of an automation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Paused,
    Completed,
    /// Operator-driven state. The executor never transitions into it;
    /// it is reachable only through an explicit status update.
    Error,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuleStatus::Active => "active",
            RuleStatus::Paused => "paused",
            RuleStatus::Completed => "completed",
            RuleStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RuleStatus::Active),
            "paused" => Ok(RuleStatus::Paused),
            "completed" => Ok(RuleStatus::Completed),
            "error" => Ok(RuleStatus::Error),
            other => Err(crate::Error::Validation(format!(
                "Unknown rule status: {}",
                other
            ))),
        }
    }
}

/// Recurrence type for schedule triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Once,
    Daily,
    Weekly,
    Monthly,
}

/// Comparison operator for threshold triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl ThresholdOperator {
    /// Apply the operator to an observed value against a threshold
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Gte => value >= threshold,
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Lte => value <= threshold,
            ThresholdOperator::Eq => value == threshold,
        }
    }
}

/// Trigger condition attached to a rule.
///
/// The shape depends on the rule's trigger type; fields that don't
/// apply are simply absent. A condition with none of the recognized
/// fields set matches every event of its trigger type, the
/// permissive default used by pure campaign-lifecycle triggers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerCondition {
    // Schedule fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_type: Option<ScheduleType>,
    /// Time of day, "HH:mm"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    /// Days of week (0 = Sunday .. 6 = Saturday) or days of month (1-31)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_days: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_date: Option<NaiveDate>,

    // Threshold fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<ThresholdOperator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    // Status-change fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_status: Option<String>,

    // Scope restriction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<CampaignId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_ids: Option<Vec<CampaignId>>,
}

/// One action a rule performs when it fires.
///
/// Order within a rule's action list is execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    SendEmail {
        recipients: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    SendWebhook {
        webhook_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload_template: Option<String>,
    },
    SendSlack {
        #[serde(skip_serializing_if = "Option::is_none")]
        slack_channel: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    PauseCampaign {
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<CampaignId>,
    },
    ResumeCampaign {
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<CampaignId>,
    },
    EndCampaign {
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<CampaignId>,
    },
    ArchiveCampaign {
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<CampaignId>,
    },
    PauseLinks {
        link_ids: Vec<LinkId>,
    },
    UpdateLinks {
        link_ids: Vec<LinkId>,
        updates: serde_json::Value,
    },
    RedirectLinks {
        link_ids: Vec<LinkId>,
        new_destination: String,
    },
    AdjustBudget {
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<CampaignId>,
        budget_adjustment: f64,
    },
    ReallocateBudget {
        #[serde(skip_serializing_if = "Option::is_none")]
        from_campaign_id: Option<CampaignId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to_campaign_id: Option<CampaignId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
    },
    AddTags {
        tags: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        link_ids: Option<Vec<LinkId>>,
    },
    RemoveTags {
        tags: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        link_ids: Option<Vec<LinkId>>,
    },
    CreateReport {
        #[serde(skip_serializing_if = "Option::is_none")]
        report_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        recipients: Option<Vec<String>>,
    },
    DuplicateCampaign {
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<CampaignId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name_suffix: Option<String>,
    },
}

impl ActionConfig {
    /// The wire discriminant for this action
    pub fn action_type(&self) -> &'static str {
        match self {
            ActionConfig::SendEmail { .. } => "send_email",
            ActionConfig::SendWebhook { .. } => "send_webhook",
            ActionConfig::SendSlack { .. } => "send_slack",
            ActionConfig::PauseCampaign { .. } => "pause_campaign",
            ActionConfig::ResumeCampaign { .. } => "resume_campaign",
            ActionConfig::EndCampaign { .. } => "end_campaign",
            ActionConfig::ArchiveCampaign { .. } => "archive_campaign",
            ActionConfig::PauseLinks { .. } => "pause_links",
            ActionConfig::UpdateLinks { .. } => "update_links",
            ActionConfig::RedirectLinks { .. } => "redirect_links",
            ActionConfig::AdjustBudget { .. } => "adjust_budget",
            ActionConfig::ReallocateBudget { .. } => "reallocate_budget",
            ActionConfig::AddTags { .. } => "add_tags",
            ActionConfig::RemoveTags { .. } => "remove_tags",
            ActionConfig::CreateReport { .. } => "create_report",
            ActionConfig::DuplicateCampaign { .. } => "duplicate_campaign",
        }
    }
}

/// Outcome status of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// One entry in a rule's execution history. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExecutionLog {
    pub fn skipped(now: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp: now,
            status: ExecutionStatus::Skipped,
            message: Some(message.into()),
            details: None,
        }
    }
}

/// Per-rule behavioral settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Minimum minutes between two executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<i64>,
    /// Permanently disable the rule after its first execution
    pub execute_once: bool,
    pub notify_on_execution: bool,
    pub notify_on_error: bool,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            cooldown_minutes: None,
            execute_once: false,
            notify_on_execution: false,
            notify_on_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trigger_type_roundtrip() {
        assert_eq!(TriggerType::TimeBased.to_string(), "time_based");
        assert_eq!(
            "clicks_threshold".parse::<TriggerType>().unwrap(),
            TriggerType::ClicksThreshold
        );
        assert!("bogus".parse::<TriggerType>().is_err());
    }

    #[test]
    fn test_action_config_tag() {
        let action: ActionConfig = serde_json::from_value(serde_json::json!({
            "type": "send_webhook",
            "webhook_url": "https://example.com/hook"
        }))
        .unwrap();
        assert_eq!(action.action_type(), "send_webhook");

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "send_webhook");
    }

    #[test]
    fn test_operator_compare() {
        assert!(ThresholdOperator::Gte.compare(100.0, 100.0));
        assert!(!ThresholdOperator::Gt.compare(100.0, 100.0));
        assert!(ThresholdOperator::Lt.compare(99.0, 100.0));
        assert!(ThresholdOperator::Eq.compare(5.0, 5.0));
    }

    #[test]
    fn test_empty_condition_deserializes() {
        let cond: TriggerCondition = serde_json::from_str("{}").unwrap();
        assert_eq!(cond, TriggerCondition::default());
    }

    #[test]
    fn test_settings_defaults() {
        let settings: RuleSettings = serde_json::from_str("{}").unwrap();
        assert!(!settings.execute_once);
        assert!(settings.cooldown_minutes.is_none());
    }
}
