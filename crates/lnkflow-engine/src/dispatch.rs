//! Action Dispatcher
//!
//! Turns one `ActionConfig` into one side effect: an outbound webhook,
//! a notification email, or a call into the campaign/link control
//! plane. Each dispatch is independently bounded by the configured
//! action timeout so a hung endpoint cannot stall the rest of the
//! rule's action list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use lnkflow_common::config::{EngineConfig, NotificationConfig};
use lnkflow_common::types::{ActionConfig, CampaignId, ExecutionStatus, LinkId};
use lnkflow_common::{Error, Result};
use lnkflow_store::models::AutomationRule;

type HmacSha256 = Hmac<Sha256>;

/// Result of dispatching a single action within a rule execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success(action: &ActionConfig, result: Value) -> Self {
        Self {
            action: action.action_type().to_string(),
            status: ExecutionStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(action: &ActionConfig, error: impl ToString) -> Self {
        Self {
            action: action.action_type().to_string(),
            status: ExecutionStatus::Failed,
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Control-plane operations on campaigns and links. The engine only
/// knows this seam; the real implementation lives with the campaign
/// service.
#[async_trait]
pub trait CampaignControl: Send + Sync {
    async fn pause_campaign(&self, campaign_id: CampaignId) -> Result<Value>;
    async fn resume_campaign(&self, campaign_id: CampaignId) -> Result<Value>;
    async fn end_campaign(&self, campaign_id: CampaignId) -> Result<Value>;
    async fn archive_campaign(&self, campaign_id: CampaignId) -> Result<Value>;
    async fn duplicate_campaign(
        &self,
        campaign_id: CampaignId,
        name_suffix: Option<&str>,
    ) -> Result<Value>;
    async fn pause_links(&self, link_ids: &[LinkId]) -> Result<Value>;
    async fn update_links(&self, link_ids: &[LinkId], updates: &Value) -> Result<Value>;
    async fn redirect_links(&self, link_ids: &[LinkId], new_destination: &str) -> Result<Value>;
    async fn adjust_budget(&self, campaign_id: CampaignId, adjustment: f64) -> Result<Value>;
    async fn reallocate_budget(
        &self,
        from: Option<CampaignId>,
        to: Option<CampaignId>,
        amount: Option<f64>,
    ) -> Result<Value>;
    async fn add_tags(&self, tags: &[String], link_ids: Option<&[LinkId]>) -> Result<Value>;
    async fn remove_tags(&self, tags: &[String], link_ids: Option<&[LinkId]>) -> Result<Value>;
}

/// Control plane that acknowledges every operation without touching
/// anything. Used in tests and in deployments where the campaign
/// service is not wired up yet.
pub struct NoopCampaignControl;

macro_rules! acknowledged {
    ($op:expr) => {
        Ok(json!({ "operation": $op, "applied": false }))
    };
}

#[async_trait]
impl CampaignControl for NoopCampaignControl {
    async fn pause_campaign(&self, _campaign_id: CampaignId) -> Result<Value> {
        acknowledged!("pause_campaign")
    }
    async fn resume_campaign(&self, _campaign_id: CampaignId) -> Result<Value> {
        acknowledged!("resume_campaign")
    }
    async fn end_campaign(&self, _campaign_id: CampaignId) -> Result<Value> {
        acknowledged!("end_campaign")
    }
    async fn archive_campaign(&self, _campaign_id: CampaignId) -> Result<Value> {
        acknowledged!("archive_campaign")
    }
    async fn duplicate_campaign(
        &self,
        _campaign_id: CampaignId,
        _name_suffix: Option<&str>,
    ) -> Result<Value> {
        acknowledged!("duplicate_campaign")
    }
    async fn pause_links(&self, _link_ids: &[LinkId]) -> Result<Value> {
        acknowledged!("pause_links")
    }
    async fn update_links(&self, _link_ids: &[LinkId], _updates: &Value) -> Result<Value> {
        acknowledged!("update_links")
    }
    async fn redirect_links(&self, _link_ids: &[LinkId], _new_destination: &str) -> Result<Value> {
        acknowledged!("redirect_links")
    }
    async fn adjust_budget(&self, _campaign_id: CampaignId, _adjustment: f64) -> Result<Value> {
        acknowledged!("adjust_budget")
    }
    async fn reallocate_budget(
        &self,
        _from: Option<CampaignId>,
        _to: Option<CampaignId>,
        _amount: Option<f64>,
    ) -> Result<Value> {
        acknowledged!("reallocate_budget")
    }
    async fn add_tags(&self, _tags: &[String], _link_ids: Option<&[LinkId]>) -> Result<Value> {
        acknowledged!("add_tags")
    }
    async fn remove_tags(&self, _tags: &[String], _link_ids: Option<&[LinkId]>) -> Result<Value> {
        acknowledged!("remove_tags")
    }
}

/// Outbound notification seam (email today).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}

/// Notifier that silently drops everything. Used when notifications
/// are disabled.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, recipients: &[String], subject: &str, _body: &str) -> Result<()> {
        debug!(
            recipients = recipients.len(),
            subject, "notifications disabled, dropping email"
        );
        Ok(())
    }
}

/// SMTP-backed notifier.
pub struct SmtpNotifier {
    config: NotificationConfig,
}

impl SmtpNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
            .map_err(|e| Error::Dispatch(format!("Failed to create SMTP transport: {}", e)))?
            .port(self.config.smtp_port);

        if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(transport.timeout(Some(Duration::from_secs(30))).build())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        let mut builder = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| Error::Dispatch(format!("Invalid from address: {}", e)))?,
            )
            .subject(subject);
        for recipient in recipients {
            builder = builder.to(recipient
                .parse()
                .map_err(|e| Error::Dispatch(format!("Invalid recipient {}: {}", recipient, e)))?);
        }
        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| Error::Dispatch(format!("Failed to build email: {}", e)))?;

        let mailer = self.transport()?;
        mailer
            .send(email)
            .await
            .map_err(|e| Error::Dispatch(format!("SMTP send failed: {}", e)))?;
        Ok(())
    }
}

/// Dispatches rule actions. One instance is shared across the sweep
/// loop and the API.
pub struct ActionDispatcher {
    http_client: reqwest::Client,
    campaigns: Arc<dyn CampaignControl>,
    notifier: Arc<dyn Notifier>,
    webhook_secret: Option<String>,
    action_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        engine_config: &EngineConfig,
        campaigns: Arc<dyn CampaignControl>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let action_timeout = Duration::from_millis(engine_config.action_timeout_ms);
        let http_client = reqwest::Client::builder()
            .timeout(action_timeout)
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            campaigns,
            notifier: notifier.clone(),
            webhook_secret: engine_config.webhook_secret.clone(),
            action_timeout,
        }
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    /// Dispatch one action and record the outcome. Errors are captured
    /// in the outcome rather than propagated so one failing action
    /// never aborts the rest of the rule's list.
    pub async fn dispatch(&self, rule: &AutomationRule, action: &ActionConfig) -> ActionOutcome {
        let result = tokio::time::timeout(self.action_timeout, self.run_action(rule, action)).await;
        match result {
            Ok(Ok(value)) => ActionOutcome::success(action, value),
            Ok(Err(e)) => {
                warn!(
                    rule_id = %rule.id,
                    action = action.action_type(),
                    error = %e,
                    "action dispatch failed"
                );
                ActionOutcome::failure(action, e)
            }
            Err(_) => {
                warn!(
                    rule_id = %rule.id,
                    action = action.action_type(),
                    timeout_ms = self.action_timeout.as_millis() as u64,
                    "action dispatch timed out"
                );
                ActionOutcome::failure(action, "Action timed out")
            }
        }
    }

    async fn run_action(&self, rule: &AutomationRule, action: &ActionConfig) -> Result<Value> {
        match action {
            ActionConfig::SendEmail {
                recipients,
                subject,
                body,
            } => {
                let subject = subject
                    .clone()
                    .unwrap_or_else(|| format!("Automation rule fired: {}", rule.name));
                let body = body
                    .clone()
                    .unwrap_or_else(|| format!("Rule '{}' executed at {}", rule.name, Utc::now()));
                self.notifier.send(recipients, &subject, &body).await?;
                Ok(json!({ "sent": recipients.len() }))
            }
            ActionConfig::SendWebhook {
                webhook_url,
                payload_template,
            } => {
                self.send_webhook(rule, webhook_url, payload_template.as_deref())
                    .await
            }
            ActionConfig::SendSlack { slack_channel, .. } => {
                // Slack delivery is not wired up; report as such instead
                // of failing the whole execution
                Ok(json!({
                    "status": "not_implemented",
                    "channel": slack_channel,
                }))
            }
            ActionConfig::PauseCampaign { campaign_id } => {
                let target = self.target_campaign(rule, *campaign_id)?;
                self.campaigns.pause_campaign(target).await
            }
            ActionConfig::ResumeCampaign { campaign_id } => {
                let target = self.target_campaign(rule, *campaign_id)?;
                self.campaigns.resume_campaign(target).await
            }
            ActionConfig::EndCampaign { campaign_id } => {
                let target = self.target_campaign(rule, *campaign_id)?;
                self.campaigns.end_campaign(target).await
            }
            ActionConfig::ArchiveCampaign { campaign_id } => {
                let target = self.target_campaign(rule, *campaign_id)?;
                self.campaigns.archive_campaign(target).await
            }
            ActionConfig::DuplicateCampaign {
                campaign_id,
                name_suffix,
            } => {
                let target = self.target_campaign(rule, *campaign_id)?;
                self.campaigns
                    .duplicate_campaign(target, name_suffix.as_deref())
                    .await
            }
            ActionConfig::PauseLinks { link_ids } => self.campaigns.pause_links(link_ids).await,
            ActionConfig::UpdateLinks { link_ids, updates } => {
                self.campaigns.update_links(link_ids, updates).await
            }
            ActionConfig::RedirectLinks {
                link_ids,
                new_destination,
            } => {
                self.campaigns
                    .redirect_links(link_ids, new_destination)
                    .await
            }
            ActionConfig::AdjustBudget {
                campaign_id,
                budget_adjustment,
            } => {
                let target = self.target_campaign(rule, *campaign_id)?;
                self.campaigns.adjust_budget(target, *budget_adjustment).await
            }
            ActionConfig::ReallocateBudget {
                from_campaign_id,
                to_campaign_id,
                amount,
            } => {
                self.campaigns
                    .reallocate_budget(*from_campaign_id, *to_campaign_id, *amount)
                    .await
            }
            ActionConfig::AddTags { tags, link_ids } => {
                self.campaigns.add_tags(tags, link_ids.as_deref()).await
            }
            ActionConfig::RemoveTags { tags, link_ids } => {
                self.campaigns.remove_tags(tags, link_ids.as_deref()).await
            }
            ActionConfig::CreateReport { report_type, .. } => Ok(json!({
                "status": "not_implemented",
                "report_type": report_type,
            })),
        }
    }

    /// Campaign an action applies to: explicit in the action config,
    /// otherwise inherited from the rule.
    fn target_campaign(
        &self,
        rule: &AutomationRule,
        explicit: Option<CampaignId>,
    ) -> Result<CampaignId> {
        explicit
            .or(rule.campaign_id)
            .or_else(|| rule.campaign_ids.0.first().copied())
            .ok_or_else(|| Error::Dispatch("Action has no target campaign".to_string()))
    }

    /// POST a JSON notification about the rule firing. Single attempt,
    /// no retries; a non-2xx response is a failure.
    async fn send_webhook(
        &self,
        rule: &AutomationRule,
        webhook_url: &str,
        payload_template: Option<&str>,
    ) -> Result<Value> {
        let payload = json!({
            "ruleId": rule.id,
            "ruleName": rule.name,
            "triggerType": rule.trigger_type,
            "timestamp": Utc::now(),
            "message": payload_template,
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|e| Error::Internal(format!("Failed to serialize webhook payload: {}", e)))?;

        let mut request = self
            .http_client
            .post(webhook_url)
            .header("Content-Type", "application/json");

        if let Some(ref secret) = self.webhook_secret {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|e| Error::Internal(format!("Invalid HMAC key: {}", e)))?;
            mac.update(&body);
            let signature = hex::encode(mac.finalize().into_bytes());
            request = request.header("X-Webhook-Signature", format!("sha256={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Dispatch(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Dispatch(format!(
                "Webhook returned status {}",
                status
            )));
        }

        Ok(json!({ "status_code": status.as_u16() }))
    }
}
