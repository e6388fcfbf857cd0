use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::approval::{ApprovalRecord, ApprovalStatus, Decision};
use crate::notification::webhook::{DecisionEvents, WebhookEvent};
use crate::store::{RecordStore, Transition};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolveResult {
    pub project_id: String,
    pub status: ApprovalStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    /// True when the record was already terminal and nothing was written.
    pub replayed: bool,
}

impl ResolveResult {
    fn replay(record: &ApprovalRecord) -> Self {
        Self {
            project_id: record.project_id.clone(),
            status: record.status,
            resolved_at: record.resolved_at,
            comment: record.comment.clone(),
            replayed: true,
        }
    }
}

/// Applies approve/reject decisions arriving through approval links.
#[derive(Clone)]
pub struct CallbackHandler {
    store: Arc<dyn RecordStore>,
    events: DecisionEvents,
}

impl CallbackHandler {
    pub fn new(store: Arc<dyn RecordStore>, events: DecisionEvents) -> Self {
        Self { store, events }
    }

    pub async fn resolve(
        &self,
        token: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<ResolveResult, AppError> {
        self.resolve_link(None, token, decision, comment).await
    }

    /// Like [`resolve`](Self::resolve), but a link that names a different
    /// project than the token's record is treated as an unknown token.
    pub async fn resolve_link(
        &self,
        project_id: Option<&str>,
        token: &str,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<ResolveResult, AppError> {
        let record = self.lookup(project_id, token).await?;

        if record.is_terminal() {
            tracing::debug!(
                project_id = %record.project_id,
                status = %record.status,
                "callback replay on resolved record"
            );
            return Ok(ResolveResult::replay(&record));
        }
        if record.status != ApprovalStatus::Notified {
            return Err(AppError::InvalidState {
                project_id: record.project_id,
                status: record.status,
            });
        }

        let transition = Transition {
            project_id: record.project_id.clone(),
            expected_token: token.to_string(),
            status: decision.status(),
            resolved_at: Utc::now(),
            comment: comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
        };

        if self.store.transition(&transition).await? {
            tracing::info!(
                project_id = %transition.project_id,
                status = %transition.status,
                "approval decision recorded"
            );
            self.events.emit(WebhookEvent::resolved(
                &transition.project_id,
                transition.status,
                transition.resolved_at,
                transition.comment.as_deref(),
                "recipient",
            ));
            return Ok(ResolveResult {
                project_id: transition.project_id,
                status: transition.status,
                resolved_at: Some(transition.resolved_at),
                comment: transition.comment,
                replayed: false,
            });
        }

        // Lost the conditional write: report whatever the winner recorded.
        let current = self.lookup(project_id, token).await?;
        if current.is_terminal() {
            tracing::debug!(
                project_id = %current.project_id,
                status = %current.status,
                "callback lost race, replaying winner"
            );
            return Ok(ResolveResult::replay(&current));
        }
        Err(AppError::InvalidState {
            project_id: current.project_id,
            status: current.status,
        })
    }

    async fn lookup(&self, project_id: Option<&str>, token: &str) -> Result<ApprovalRecord, AppError> {
        if token.trim().is_empty() {
            return Err(AppError::UnknownToken);
        }
        match self.store.find_by_token(token).await? {
            Some(record) if project_id.map_or(true, |p| p == record.project_id) => Ok(record),
            Some(record) => {
                tracing::warn!(
                    project_id = %record.project_id,
                    link_project_id = project_id.unwrap_or_default(),
                    "approval link names a different project than its token"
                );
                Err(AppError::UnknownToken)
            }
            None => Err(AppError::UnknownToken),
        }
    }
}
