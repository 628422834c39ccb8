// Admin alerting: pending-alert dedup and notification fan-out

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::DurableStore;
use crate::models::{AdminAlert, AlertStatus, FraudFinding};

const NOTIFY_ATTEMPTS: u32 = 3;
const NOTIFY_RETRY_DELAY: Duration = Duration::from_millis(250);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, admin_id: &str, alert: &AdminAlert) -> Result<()>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_active_admins(&self) -> Result<Vec<String>>;
    async fn resolve_display_name(&self, user_id: &str) -> Result<String>;
}

/// Directory backed by a fixed admin roster from configuration.
pub struct StaticDirectory {
    admins: Vec<String>,
}

impl StaticDirectory {
    pub fn new(admins: Vec<String>) -> Self {
        Self { admins }
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn list_active_admins(&self) -> Result<Vec<String>> {
        Ok(self.admins.clone())
    }

    async fn resolve_display_name(&self, user_id: &str) -> Result<String> {
        Ok(user_id.to_string())
    }
}

/// Posts alerts to a staff notification webhook.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, admin_id: &str, alert: &AdminAlert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "admin_id": admin_id, "alert": alert }))
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}

/// Fallback sink when no webhook is configured: alerts land in the
/// operational log only.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, admin_id: &str, alert: &AdminAlert) -> Result<()> {
        info!(
            "Alert {} [{}] for admin {}: {}",
            alert.id,
            alert.severity.as_str(),
            admin_id,
            alert.title
        );
        Ok(())
    }
}

/// Turns fraud findings into pending AdminAlerts and fans them out to every
/// active staff account. Creation never depends on delivery succeeding.
pub struct AlertDispatcher {
    store: Arc<dyn DurableStore>,
    directory: Arc<dyn UserDirectory>,
    sink: Arc<dyn NotificationSink>,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn DurableStore>,
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            directory,
            sink,
        }
    }

    /// Create (or update) the alert for a finding and notify all admins.
    /// A pending alert for the same (user, rule) absorbs the new evidence
    /// instead of duplicating.
    pub async fn raise(&self, finding: &FraudFinding) -> Result<String> {
        let evidence = serde_json::to_value(&finding.evidence)?;

        if let Some(alert_id) = self
            .store
            .find_pending_alert(&finding.user_id, finding.rule)
            .await?
        {
            self.store
                .merge_alert_evidence(&alert_id, &evidence, finding.created_at)
                .await?;
            debug!(
                "Updated pending alert {} for {} / {}",
                alert_id, finding.user_id, finding.rule
            );
            return Ok(alert_id);
        }

        let display_name = self
            .directory
            .resolve_display_name(&finding.user_id)
            .await
            .unwrap_or_else(|_| finding.user_id.clone());
        let alert = AdminAlert {
            id: Uuid::new_v4().to_string(),
            kind: finding.rule.to_string(),
            title: format!("Suspicious activity: {}", finding.rule),
            description: format!(
                "{} tripped the {} rule ({} spins of evidence)",
                display_name,
                finding.rule,
                finding.evidence.len()
            ),
            severity: finding.severity,
            status: AlertStatus::Pending,
            related_user_id: Some(finding.user_id.clone()),
            metadata: evidence,
            created_at: finding.created_at,
            updated_at: finding.created_at,
        };
        self.store.insert_alert(&alert).await?;
        info!(
            "Raised {} alert {} for user {}",
            alert.severity.as_str(),
            alert.id,
            finding.user_id
        );

        self.fan_out(&alert).await;
        Ok(alert.id)
    }

    /// At-least-once fan-out: each admin is notified on its own task with
    /// independent retries, so one failing recipient never starves the rest.
    async fn fan_out(&self, alert: &AdminAlert) {
        let admins = match self.directory.list_active_admins().await {
            Ok(admins) => admins,
            Err(err) => {
                warn!("Could not list admins for alert fan-out: {err}");
                return;
            }
        };

        let mut tasks = tokio::task::JoinSet::new();
        for admin_id in admins {
            let sink = Arc::clone(&self.sink);
            let alert = alert.clone();
            tasks.spawn(async move {
                if let Err(err) = notify_with_retry(&*sink, &admin_id, &alert).await {
                    warn!(
                        "Notification to {} failed after {} attempts: {err}",
                        admin_id, NOTIFY_ATTEMPTS
                    );
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

async fn notify_with_retry(
    sink: &dyn NotificationSink,
    admin_id: &str,
    alert: &AdminAlert,
) -> Result<()> {
    let mut delay = NOTIFY_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        match sink.notify(admin_id, alert).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt >= NOTIFY_ATTEMPTS {
                    return Err(err);
                }
                warn!("Notification attempt {attempt} to {admin_id} failed, retrying: {err}");
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}
