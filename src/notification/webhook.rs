use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::models::approval::ApprovalStatus;

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier, e.g. "acta.approved", "acta.notify_failed".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub project_id: String,
    /// Event-specific details (status, comment, error code, ...).
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn notified(project_id: &str, notified_at: DateTime<Utc>, rotated: bool) -> Self {
        Self {
            event_type: "acta.notified".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            project_id: project_id.to_string(),
            details: serde_json::json!({
                "notified_at": notified_at.to_rfc3339(),
                "token_rotated": rotated,
            }),
        }
    }

    pub fn notify_failed(project_id: &str, error: &AppError) -> Self {
        Self {
            event_type: "acta.notify_failed".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            project_id: project_id.to_string(),
            details: serde_json::json!({
                "code": error.code(),
                "retryable": error.is_retryable(),
                "reason": error.to_string(),
            }),
        }
    }

    /// A record reached a terminal state. `actor` is "recipient" or "sweeper".
    pub fn resolved(
        project_id: &str,
        status: ApprovalStatus,
        resolved_at: DateTime<Utc>,
        comment: Option<&str>,
        actor: &str,
    ) -> Self {
        Self {
            event_type: format!("acta.{}", status.as_str()),
            timestamp: Utc::now().to_rfc3339(),
            project_id: project_id.to_string(),
            details: serde_json::json!({
                "status": status,
                "resolved_at": resolved_at.to_rfc3339(),
                "comment": comment,
                "actor": actor,
            }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Delivers webhook events to a single URL.
/// Supports:
/// - HMAC-SHA256 signing (X-Acta-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    backoff: Arc<[Duration]>,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self::with_backoff(&[
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(25),
        ])
    }

    /// One attempt per entry; each attempt first waits its delay.
    pub fn with_backoff(backoff: &[Duration]) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Acta-Webhook/1.0")
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default webhook HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            backoff: Arc::from(backoff),
        }
    }

    /// Send a webhook event to a single URL with retry.
    ///
    /// If `signing_secret` is `Some`, the request body is signed with HMAC-SHA256
    /// and the signature is sent in the `X-Acta-Signature` header.
    pub async fn send_signed(
        &self,
        url: &str,
        event: &WebhookEvent,
        signing_secret: Option<&str>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = signing_secret.map(|s| hmac_sha256_hex(s, &payload));

        for (attempt, delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay.as_secs(),
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(*delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-acta-delivery-id", &delivery_id)
                .header("x-acta-timestamp", &timestamp)
                .header("x-acta-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-acta-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        project_id = %event.project_id,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        warn!(
            url,
            event_type = %event.event_type,
            delivery_id = %delivery_id,
            "webhook delivery failed after all retries"
        );
        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Fan-out of approval events to every configured webhook URL.
///
/// Delivery runs on a spawned task so callers never wait on a slow receiver.
/// With no URLs configured `emit` is a no-op.
#[derive(Clone, Default)]
pub struct DecisionEvents {
    notifier: WebhookNotifier,
    urls: Arc<[String]>,
    secret: Option<Arc<str>>,
}

impl DecisionEvents {
    pub fn new(notifier: WebhookNotifier, urls: Vec<String>, secret: Option<String>) -> Self {
        Self {
            notifier,
            urls: Arc::from(urls),
            secret: secret.map(Arc::from),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.urls.is_empty()
    }

    pub fn emit(&self, event: WebhookEvent) {
        if self.urls.is_empty() {
            return;
        }

        let notifier = self.notifier.clone();
        let urls = self.urls.clone();
        let secret = self.secret.clone();

        tokio::spawn(async move {
            for url in urls.iter() {
                if let Err(e) = notifier.send_signed(url, &event, secret.as_deref()).await {
                    warn!(url, error = %e, "webhook dispatch ultimately failed");
                }
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────
