use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{NotifiedUpdate, RecordStore, Transition};
use crate::models::approval::{ApprovalRecord, ApprovalStatus};

const RECORD_COLUMNS: &str = "project_id, approval_token, status, recipient_email, document_ref, \
     comment, last_error, created_at, notified_at, resolved_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert(&self, record: &ApprovalRecord) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO approval_records
                   (project_id, approval_token, status, recipient_email, document_ref,
                    comment, last_error, created_at, notified_at, resolved_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (project_id) DO NOTHING"#,
        )
        .bind(&record.project_id)
        .bind(&record.approval_token)
        .bind(record.status)
        .bind(&record.recipient_email)
        .bind(&record.document_ref)
        .bind(&record.comment)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.notified_at)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("insert approval record failed: {:?}", e);
            e
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, project_id: &str) -> anyhow::Result<Option<ApprovalRecord>> {
        let row = sqlx::query_as::<_, ApprovalRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_records WHERE project_id = $1"
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<ApprovalRecord>> {
        let row = sqlx::query_as::<_, ApprovalRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_records WHERE approval_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn token_exists(&self, token: &str) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM approval_records WHERE approval_token = $1)",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list(&self, status: Option<ApprovalStatus>) -> anyhow::Result<Vec<ApprovalRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, ApprovalRecord>(&format!(
                    "SELECT {RECORD_COLUMNS} FROM approval_records WHERE status = $1 ORDER BY created_at ASC"
                ))
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ApprovalRecord>(&format!(
                    "SELECT {RECORD_COLUMNS} FROM approval_records ORDER BY created_at ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn list_notified_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ApprovalRecord>> {
        let rows = sqlx::query_as::<_, ApprovalRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_records \
             WHERE status = 'notified' AND notified_at <= $1 \
             ORDER BY notified_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_notified(&self, update: &NotifiedUpdate) -> anyhow::Result<bool> {
        if !update
            .expected_status
            .can_transition_to(ApprovalStatus::Notified)
        {
            anyhow::bail!(
                "cannot notify a record in state {}",
                update.expected_status
            );
        }

        // Overwriting approval_token drops the prior token from the unique index.
        let result = sqlx::query(
            r#"UPDATE approval_records
               SET approval_token = $1, status = 'notified', notified_at = $2, last_error = NULL
               WHERE project_id = $3
                 AND status = $4
                 AND approval_token IS NOT DISTINCT FROM $5"#,
        )
        .bind(&update.token)
        .bind(update.notified_at)
        .bind(&update.project_id)
        .bind(update.expected_status)
        .bind(&update.expected_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn annotate_error(&self, project_id: &str, message: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE approval_records SET last_error = $1 WHERE project_id = $2")
            .bind(message)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transition(&self, update: &Transition) -> anyhow::Result<bool> {
        if !update.status.is_terminal() {
            anyhow::bail!("{} is not a terminal status", update.status);
        }

        let result = sqlx::query(
            r#"UPDATE approval_records
               SET status = $1, resolved_at = $2, comment = $3
               WHERE project_id = $4
                 AND status = 'notified'
                 AND approval_token = $5"#,
        )
        .bind(update.status)
        .bind(update.resolved_at)
        .bind(&update.comment)
        .bind(&update.project_id)
        .bind(&update.expected_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
