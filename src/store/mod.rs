//! Record store: approval rows keyed by `project_id` with a secondary
//! index on `approval_token`.
//!
//! Every state change goes through a conditional write: the update only
//! lands if the stored status (and token) still match what the caller read.
//! Losing that race is reported as `Ok(false)`, never as an error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::approval::{ApprovalRecord, ApprovalStatus};

pub mod artifact;
pub mod memory;
pub mod postgres;

/// Conditional write issued by the notifier once the email went out.
#[derive(Debug, Clone)]
pub struct NotifiedUpdate {
    pub project_id: String,
    /// PENDING for a first notify, NOTIFIED for a forced resend.
    pub expected_status: ApprovalStatus,
    /// Token the caller observed; the new token supersedes it.
    pub expected_token: Option<String>,
    pub token: String,
    pub notified_at: DateTime<Utc>,
}

/// Conditional move of a NOTIFIED record into a terminal state.
#[derive(Debug, Clone)]
pub struct Transition {
    pub project_id: String,
    pub expected_token: String,
    pub status: ApprovalStatus,
    pub resolved_at: DateTime<Utc>,
    pub comment: Option<String>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Returns `false` if the project id is taken.
    async fn insert(&self, record: &ApprovalRecord) -> anyhow::Result<bool>;

    async fn get(&self, project_id: &str) -> anyhow::Result<Option<ApprovalRecord>>;

    /// Secondary-index lookup. Superseded tokens never match.
    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<ApprovalRecord>>;

    async fn token_exists(&self, token: &str) -> anyhow::Result<bool>;

    async fn list(&self, status: Option<ApprovalStatus>) -> anyhow::Result<Vec<ApprovalRecord>>;

    /// NOTIFIED records whose `notified_at` is at or before `cutoff`.
    async fn list_notified_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ApprovalRecord>>;

    async fn record_notified(&self, update: &NotifiedUpdate) -> anyhow::Result<bool>;

    async fn annotate_error(&self, project_id: &str, message: &str) -> anyhow::Result<()>;

    async fn transition(&self, update: &Transition) -> anyhow::Result<bool>;

    async fn ping(&self) -> anyhow::Result<()>;
}

/// Open the configured store: Postgres when `DATABASE_URL` is set,
/// otherwise the in-process map.
pub async fn connect(cfg: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    match &cfg.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = postgres::PgStore::connect(url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL is not set — using the in-process record store. \
                 State is lost on restart and not shared between instances."
            );
            Ok(Arc::new(memory::MemoryStore::new()))
        }
    }
}
