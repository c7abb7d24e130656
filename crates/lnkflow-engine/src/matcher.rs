//! Trigger Condition Matcher
//!
//! Pure predicate over a rule's stored condition and an incoming event
//! payload. Malformed or partial conditions never raise: they degrade
//! to "no match" so legacy data cannot crash the event path.

use lnkflow_common::types::CampaignId;
use lnkflow_store::models::AutomationRule;
use serde_json::Value;

/// Does `rule`'s trigger condition match the incoming event payload?
pub fn matches(rule: &AutomationRule, event: &Value) -> bool {
    let condition = &rule.trigger_condition.0;

    // Scope restriction short-circuits regardless of other fields
    if !campaign_in_scope(
        condition.campaign_id,
        condition.campaign_ids.as_deref(),
        event,
    ) {
        return false;
    }

    // Threshold condition: all three fields required, metric must be
    // present in the event
    let has_threshold_fields = condition.threshold.is_some()
        || condition.operator.is_some()
        || condition.metric.is_some();
    if has_threshold_fields {
        let (Some(threshold), Some(operator), Some(metric)) = (
            condition.threshold,
            condition.operator,
            condition.metric.as_deref(),
        ) else {
            return false;
        };
        let Some(value) = event.get(metric).and_then(Value::as_f64) else {
            return false;
        };
        return operator.compare(value, threshold);
    }

    // Status-change condition
    if let Some(to_status) = condition.to_status.as_deref() {
        if event.get("newStatus").and_then(Value::as_str) != Some(to_status) {
            return false;
        }
        if let Some(from_status) = condition.from_status.as_deref() {
            if event.get("oldStatus").and_then(Value::as_str) != Some(from_status) {
                return false;
            }
        }
        return true;
    }

    // No recognized condition fields: permissive default. Rules with
    // pure lifecycle triggers carry no extra qualifier and always match
    // within their trigger type and campaign scope.
    true
}

fn campaign_in_scope(
    campaign_id: Option<CampaignId>,
    campaign_ids: Option<&[CampaignId]>,
    event: &Value,
) -> bool {
    let restricted = campaign_id.is_some()
        || campaign_ids.map(|ids| !ids.is_empty()).unwrap_or(false);
    if !restricted {
        return true;
    }

    let Some(event_campaign) = event
        .get("campaignId")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<CampaignId>().ok())
    else {
        return false;
    };

    if campaign_id == Some(event_campaign) {
        return true;
    }
    campaign_ids
        .map(|ids| ids.contains(&event_campaign))
        .unwrap_or(false)
}
