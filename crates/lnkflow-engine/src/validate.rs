//! Rule payload validation
//!
//! Checked at create/update time so the executor can assume stored
//! rules are structurally sound. Validation is about required fields;
//! semantic no-ops (a schedule date in the past, an unreachable
//! threshold) are allowed and simply never fire.

use lnkflow_common::types::{ActionConfig, ScheduleType, TriggerCondition, TriggerType};
use lnkflow_common::{Error, Result};

/// Validate a rule's trigger condition and action list.
pub fn validate_rule(
    trigger_type: TriggerType,
    condition: &TriggerCondition,
    actions: &[ActionConfig],
) -> Result<()> {
    if actions.is_empty() {
        return Err(Error::Validation(
            "Rule must have at least one action".to_string(),
        ));
    }

    validate_condition(trigger_type, condition)?;
    for action in actions {
        validate_action(action)?;
    }
    Ok(())
}

fn validate_condition(trigger_type: TriggerType, condition: &TriggerCondition) -> Result<()> {
    match trigger_type {
        TriggerType::Schedule | TriggerType::TimeBased => {
            let schedule_type = condition.schedule_type.ok_or_else(|| {
                Error::Validation("Schedule trigger requires schedule_type".to_string())
            })?;
            if condition.schedule_time.is_none() {
                return Err(Error::Validation(
                    "Schedule trigger requires schedule_time".to_string(),
                ));
            }
            match schedule_type {
                ScheduleType::Once => {
                    if condition.schedule_date.is_none() {
                        return Err(Error::Validation(
                            "One-shot schedule requires schedule_date".to_string(),
                        ));
                    }
                }
                ScheduleType::Daily => {}
                ScheduleType::Weekly => {
                    let days = require_days(condition, "Weekly")?;
                    if days.iter().any(|d| *d > 6) {
                        return Err(Error::Validation(
                            "Weekly schedule_days must be 0-6".to_string(),
                        ));
                    }
                }
                ScheduleType::Monthly => {
                    let days = require_days(condition, "Monthly")?;
                    if days.iter().any(|d| *d < 1 || *d > 31) {
                        return Err(Error::Validation(
                            "Monthly schedule_days must be 1-31".to_string(),
                        ));
                    }
                }
            }
        }
        TriggerType::ClicksThreshold
        | TriggerType::ConversionsThreshold
        | TriggerType::BudgetThreshold => {
            if condition.threshold.is_none()
                || condition.operator.is_none()
                || condition.metric.is_none()
            {
                return Err(Error::Validation(
                    "Threshold trigger requires threshold, operator and metric".to_string(),
                ));
            }
        }
        TriggerType::CampaignStatusChange | TriggerType::LinkStatusChange => {
            if condition.to_status.is_none() {
                return Err(Error::Validation(
                    "Status-change trigger requires to_status".to_string(),
                ));
            }
        }
        // Pure lifecycle triggers carry no required condition fields
        TriggerType::CampaignCreated | TriggerType::CampaignEnded => {}
    }
    Ok(())
}

fn require_days<'a>(condition: &'a TriggerCondition, kind: &str) -> Result<&'a Vec<u32>> {
    condition
        .schedule_days
        .as_ref()
        .filter(|days| !days.is_empty())
        .ok_or_else(|| {
            Error::Validation(format!("{} schedule requires non-empty schedule_days", kind))
        })
}

fn validate_action(action: &ActionConfig) -> Result<()> {
    match action {
        ActionConfig::SendEmail { recipients, .. } => {
            if recipients.is_empty() {
                return Err(Error::Validation(
                    "send_email requires at least one recipient".to_string(),
                ));
            }
        }
        ActionConfig::SendWebhook { webhook_url, .. } => {
            if webhook_url.is_empty() {
                return Err(Error::Validation(
                    "send_webhook requires webhook_url".to_string(),
                ));
            }
        }
        ActionConfig::PauseLinks { link_ids } | ActionConfig::UpdateLinks { link_ids, .. } => {
            if link_ids.is_empty() {
                return Err(Error::Validation(format!(
                    "{} requires non-empty link_ids",
                    action.action_type()
                )));
            }
        }
        ActionConfig::RedirectLinks {
            link_ids,
            new_destination,
        } => {
            if link_ids.is_empty() {
                return Err(Error::Validation(
                    "redirect_links requires non-empty link_ids".to_string(),
                ));
            }
            if new_destination.is_empty() {
                return Err(Error::Validation(
                    "redirect_links requires new_destination".to_string(),
                ));
            }
        }
        ActionConfig::AddTags { tags, .. } | ActionConfig::RemoveTags { tags, .. } => {
            if tags.is_empty() {
                return Err(Error::Validation(format!(
                    "{} requires non-empty tags",
                    action.action_type()
                )));
            }
        }
        // Remaining actions resolve their target at dispatch time
        _ => {}
    }
    Ok(())
}
