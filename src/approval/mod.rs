//! Acta approval state machine.
//!
//! PENDING → NOTIFIED → APPROVED | REJECTED | EXPIRED
//!
//! 1. The extraction pipeline registers a PENDING record ([`register`]).
//! 2. [`notify::Notifier`] issues a token, emails the links and marks it NOTIFIED.
//! 3. [`callback::CallbackHandler`] records the recipient's decision.
//! 4. [`crate::jobs::expiry::ExpirySweeper`] closes records nobody answered.

use chrono::Utc;

use crate::errors::AppError;
use crate::models::approval::ApprovalRecord;
use crate::store::RecordStore;

pub mod callback;
pub mod notify;
pub mod token;

/// Insert a PENDING record. Returns the stored record and whether it was
/// created by this call; registering an existing project id is a no-op.
pub async fn register(
    store: &dyn RecordStore,
    project_id: &str,
    recipient_email: &str,
    document_ref: &str,
) -> Result<(ApprovalRecord, bool), AppError> {
    let project_id = project_id.trim();
    let recipient_email = recipient_email.trim();
    let document_ref = document_ref.trim();

    if project_id.is_empty() {
        return Err(AppError::InvalidRequest("project_id is required".into()));
    }
    if !is_plausible_email(recipient_email) {
        return Err(AppError::InvalidRequest(format!(
            "recipient_email is not an email address: {:?}",
            recipient_email
        )));
    }
    if url::Url::parse(document_ref).is_err() {
        return Err(AppError::InvalidRequest(format!(
            "document_ref must be a URI: {:?}",
            document_ref
        )));
    }

    let record = ApprovalRecord::pending(project_id, recipient_email, document_ref, Utc::now());
    let created = store.insert(&record).await?;
    if created {
        tracing::info!(project_id, "registered Acta record");
        return Ok((record, true));
    }

    let existing = store
        .get(project_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("record {} vanished after insert conflict", project_id)))?;
    tracing::debug!(project_id, status = %existing.status, "Acta record already registered");
    Ok((existing, false))
}

fn is_plausible_email(raw: &str) -> bool {
    match raw.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !raw.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::ApprovalStatus;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_plausible_email() {
        assert!(is_plausible_email("a@b.com"));
        assert!(is_plausible_email("first.last@client.example.co"));
        assert!(!is_plausible_email("a@b"));
        assert!(!is_plausible_email("@b.com"));
        assert!(!is_plausible_email("a b@c.com"));
        assert!(!is_plausible_email(""));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let store = MemoryStore::new();
        let (record, created) = register(&store, "P1", "a@b.com", "s3://bucket/P1.pdf")
            .await
            .unwrap();
        assert!(created);
        assert_eq!(record.status, ApprovalStatus::Pending);

        let (again, created) = register(&store, "P1", "other@b.com", "s3://bucket/other.pdf")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.recipient_email, "a@b.com");
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let store = MemoryStore::new();
        assert!(matches!(
            register(&store, " ", "a@b.com", "s3://bucket/P1.pdf").await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            register(&store, "P1", "nobody", "s3://bucket/P1.pdf").await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            register(&store, "P1", "a@b.com", "P1.pdf").await,
            Err(AppError::InvalidRequest(_))
        ));
    }
}
