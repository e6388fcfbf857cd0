//! Background job: close out approvals nobody answered.
//!
//! Every NOTIFIED record whose `notified_at + deadline` has passed is moved
//! to EXPIRED, or to APPROVED with an explanatory comment under the
//! auto-approve policy. Each record is closed with the same conditional
//! write the callback uses, so a decision that lands first always wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::ExpiryPolicy;
use crate::errors::AppError;
use crate::models::approval::{ApprovalRecord, ApprovalStatus};
use crate::notification::webhook::{DecisionEvents, WebhookEvent};
use crate::store::{RecordStore, Transition};

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    /// Records past the deadline when the sweep started.
    pub examined: usize,
    pub closed: usize,
    /// Resolved or re-sent by someone else before we got to them.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn RecordStore>,
    policy: ExpiryPolicy,
    events: DecisionEvents,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn RecordStore>, policy: ExpiryPolicy, events: DecisionEvents) -> Self {
        Self {
            store,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Close every NOTIFIED record with `notified_at + deadline <= now`.
    /// Safe to re-run; a failure on one record does not stop the batch.
    pub async fn sweep(&self, now: DateTime<Utc>, deadline: chrono::Duration) -> Result<SweepReport, AppError> {
        if deadline <= chrono::Duration::zero() {
            return Err(AppError::InvalidRequest("expiry deadline must be positive".into()));
        }
        let cutoff = now.checked_sub_signed(deadline).ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "expiry deadline of {} is out of range",
                describe_deadline(deadline)
            ))
        })?;
        let candidates = self.store.list_notified_before(cutoff).await?;
        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        for record in &candidates {
            match self.close(record, now, deadline).await {
                Ok(true) => report.closed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        project_id = %record.project_id,
                        error = %e,
                        "expiry sweep: failed to close record"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                closed = report.closed,
                skipped = report.skipped,
                failed = report.failed,
                policy = %self.policy,
                "expiry sweep complete"
            );
        }
        Ok(report)
    }

    async fn close(
        &self,
        record: &ApprovalRecord,
        now: DateTime<Utc>,
        deadline: chrono::Duration,
    ) -> anyhow::Result<bool> {
        let Some(token) = record.approval_token.clone() else {
            return Ok(false);
        };

        let (status, comment) = match self.policy {
            ExpiryPolicy::Expire => (ApprovalStatus::Expired, None),
            ExpiryPolicy::AutoApprove => (
                ApprovalStatus::Approved,
                Some(format!("Automatically approved after {}", describe_deadline(deadline))),
            ),
        };

        let transition = Transition {
            project_id: record.project_id.clone(),
            expected_token: token,
            status,
            resolved_at: now,
            comment,
        };
        let applied = self.store.transition(&transition).await?;
        if applied {
            tracing::debug!(project_id = %record.project_id, status = %status, "expiry sweep: closed record");
            self.events.emit(WebhookEvent::resolved(
                &transition.project_id,
                transition.status,
                transition.resolved_at,
                transition.comment.as_deref(),
                "sweeper",
            ));
        }
        Ok(applied)
    }
}

/// Spawn the periodic sweep. Call this once at startup.
pub fn spawn(sweeper: ExpirySweeper, every: Duration, deadline: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.sweep(Utc::now(), deadline).await {
                tracing::error!("expiry sweep failed: {}", e);
            }
        }
    })
}

/// Deadline from a whole number of hours, as taken from the API, CLI and
/// `ACTA_EXPIRY_HOURS`.
pub fn deadline_from_hours(hours: i64) -> Result<chrono::Duration, AppError> {
    if hours <= 0 {
        return Err(AppError::InvalidRequest(
            "deadline_hours must be positive".into(),
        ));
    }
    chrono::Duration::try_hours(hours)
        .filter(|d| Utc::now().checked_sub_signed(*d).is_some())
        .ok_or_else(|| AppError::InvalidRequest(format!("deadline_hours={} is out of range", hours)))
}

/// "5 days", "36 hours", "90 minutes".
pub fn describe_deadline(deadline: chrono::Duration) -> String {
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };
    let minutes = deadline.num_minutes();
    if minutes > 0 && minutes % (24 * 60) == 0 {
        plural(minutes / (24 * 60), "day")
    } else if minutes > 0 && minutes % 60 == 0 {
        plural(minutes / 60, "hour")
    } else if minutes > 0 {
        plural(minutes, "minute")
    } else {
        plural(deadline.num_seconds(), "second")
    }
}
