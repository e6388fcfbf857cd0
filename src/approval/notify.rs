use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use super::token::TokenIssuer;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::approval::{ApprovalRecord, ApprovalStatus, Decision};
use crate::notification::email::{escape_html, EmailAttachment, Mailer, OutboundEmail};
use crate::notification::webhook::{DecisionEvents, WebhookEvent};
use crate::store::artifact::{Artifact, ArtifactStore};
use crate::store::{NotifiedUpdate, RecordStore};

const BRAND_COLOR: &str = "#4AC795";
const REJECT_COLOR: &str = "#E74C3C";

/// Immutable notifier configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub public_base_url: Url,
    pub subject_prefix: String,
    pub cc: Vec<String>,
    /// File name the artifact is attached under.
    pub attachment_name: String,
}

impl NotifierSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let public_base_url = Url::parse(&cfg.public_base_url)?;
        if public_base_url.cannot_be_a_base() {
            anyhow::bail!("public base URL cannot carry a path: {}", cfg.public_base_url);
        }
        Ok(Self {
            public_base_url,
            subject_prefix: cfg.subject_prefix.clone(),
            cc: cfg.email_cc.clone(),
            attachment_name: cfg.attachment_name.clone(),
        })
    }
}

/// The Approve / Reject links embedded in an approval email.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionLinks {
    pub approve: String,
    pub reject: String,
}

impl ActionLinks {
    pub fn build(base: &Url, project_id: &str, token: &str) -> Self {
        Self {
            approve: action_link(base, project_id, token, Decision::Approve),
            reject: action_link(base, project_id, token, Decision::Reject),
        }
    }
}

fn action_link(base: &Url, project_id: &str, token: &str, decision: Decision) -> String {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("approve");
    }
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("project_id", project_id)
        .append_pair("token", token)
        .append_pair("status", decision.as_link_param());
    url.to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyResult {
    pub project_id: String,
    pub token: String,
    pub notified_at: DateTime<Utc>,
    pub links: ActionLinks,
    /// True when a forced resend superseded an earlier token.
    pub rotated: bool,
}

/// Sends approval requests and records the NOTIFIED transition.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn RecordStore>,
    artifacts: ArtifactStore,
    mailer: Arc<dyn Mailer>,
    issuer: TokenIssuer,
    settings: Arc<NotifierSettings>,
    events: DecisionEvents,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn RecordStore>,
        artifacts: ArtifactStore,
        mailer: Arc<dyn Mailer>,
        settings: NotifierSettings,
        events: DecisionEvents,
    ) -> Self {
        Self {
            issuer: TokenIssuer::new(store.clone()),
            store,
            artifacts,
            mailer,
            settings: Arc::new(settings),
            events,
        }
    }

    /// Email the approval request for `project_id`.
    ///
    /// A NOTIFIED record is only re-sent with `force_resend`, which rotates
    /// the token. Failures are returned to the trigger and announced as
    /// `acta.notify_failed`.
    pub async fn notify(&self, project_id: &str, force_resend: bool) -> Result<NotifyResult, AppError> {
        let result = self.try_notify(project_id, force_resend).await;
        match &result {
            Ok(r) => {
                tracing::info!(
                    project_id,
                    rotated = r.rotated,
                    "approval request sent"
                );
                self.events
                    .emit(WebhookEvent::notified(project_id, r.notified_at, r.rotated));
            }
            Err(e) => {
                tracing::warn!(
                    project_id,
                    code = e.code(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "approval request failed"
                );
                self.events.emit(WebhookEvent::notify_failed(project_id, e));
            }
        }
        result
    }

    async fn try_notify(&self, project_id: &str, force_resend: bool) -> Result<NotifyResult, AppError> {
        let record = self
            .store
            .get(project_id)
            .await?
            .ok_or_else(|| AppError::RecordNotFound(project_id.to_string()))?;

        match record.status {
            ApprovalStatus::Pending => {}
            ApprovalStatus::Notified if force_resend => {}
            ApprovalStatus::Notified => {
                return Err(AppError::AlreadyNotified(project_id.to_string()));
            }
            status => {
                return Err(AppError::InvalidState {
                    project_id: project_id.to_string(),
                    status,
                });
            }
        }

        let artifact = match self.artifacts.fetch(&record.document_ref).await {
            Ok(a) => a,
            Err(AppError::ArtifactMissing(reason)) => {
                if let Err(e) = self.store.annotate_error(project_id, &reason).await {
                    tracing::error!(project_id, error = %e, "failed to annotate record");
                }
                return Err(AppError::ArtifactMissing(reason));
            }
            Err(e) => return Err(e),
        };

        let token = self.issuer.issue(project_id).await?;
        let links = ActionLinks::build(&self.settings.public_base_url, project_id, &token);
        let email = self.compose(&record, &links, artifact);

        self.mailer
            .send(&email)
            .await
            .map_err(|e| AppError::RecipientRejected(format!("{:#}", e)))?;

        let notified_at = Utc::now();
        let applied = self
            .store
            .record_notified(&NotifiedUpdate {
                project_id: project_id.to_string(),
                expected_status: record.status,
                expected_token: record.approval_token.clone(),
                token: token.clone(),
                notified_at,
            })
            .await?;
        if !applied {
            // Another notify won; its token is the live one.
            return Err(AppError::StoreConflict(project_id.to_string()));
        }

        Ok(NotifyResult {
            project_id: project_id.to_string(),
            token,
            notified_at,
            links,
            rotated: record.approval_token.is_some(),
        })
    }

    fn compose(&self, record: &ApprovalRecord, links: &ActionLinks, artifact: Artifact) -> OutboundEmail {
        let project = escape_html(&record.project_id);
        let approve = escape_html(&links.approve);
        let reject = escape_html(&links.reject);

        let html_body = format!(
            r#"<html><body style="font-family:Verdana,Arial">
  <h3>Acta Approval Request – {project}</h3>
  <p>Please review the attached Acta and click:</p>
  <p>
    <a href="{approve}" style="padding:10px 18px;background:{BRAND_COLOR};color:#fff;text-decoration:none;border-radius:4px">&#10004; Approve</a>
    &nbsp;
    <a href="{reject}" style="padding:10px 18px;background:{REJECT_COLOR};color:#fff;text-decoration:none;border-radius:4px">&#10006; Reject</a>
  </p>
  <p style="font-size:12px;color:#888">Each link can be used once. A comment can be added with &amp;comment=... on the link.</p>
</body></html>"#
        );

        let text_body = format!(
            "Acta Approval Request – {}\n\nPlease review the attached Acta.\n\nApprove: {}\nReject:  {}\n",
            record.project_id, links.approve, links.reject
        );

        OutboundEmail {
            to: record.recipient_email.clone(),
            cc: self.settings.cc.clone(),
            subject: format!("{} • {}", self.settings.subject_prefix, record.project_id),
            text_body,
            html_body,
            attachment: Some(EmailAttachment {
                file_name: attachment_name(&self.settings.attachment_name, &artifact.file_name),
                content_type: artifact.content_type.to_string(),
                bytes: artifact.bytes.to_vec(),
            }),
        }
    }
}

/// Keep the configured name but the artifact's own extension.
fn attachment_name(configured: &str, artifact_file: &str) -> String {
    let stem = configured
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(configured);
    match artifact_file.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => configured.to_string(),
    }
}
