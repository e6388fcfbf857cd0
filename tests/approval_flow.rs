//! End-to-end approval lifecycle against the in-process store.
//!
//! Every test builds a fresh [`AppState`] with a `MemoryStore`, an
//! in-memory artifact bucket and a recording mailer, so no external
//! services are needed.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Duration, Utc};
use object_store::{memory::InMemory, path::Path, ObjectStore};

use acta::approval::{self, callback::ResolveResult};
use acta::config::{Config, ExpiryPolicy};
use acta::errors::AppError;
use acta::models::approval::{ApprovalStatus, Decision};
use acta::notification::email::RecordingMailer;
use acta::notification::webhook::DecisionEvents;
use acta::store::artifact::ArtifactStore;
use acta::store::memory::MemoryStore;
use acta::store::RecordStore;
use acta::AppState;

struct Harness {
    state: AppState,
    store: Arc<MemoryStore>,
    mailer: RecordingMailer,
}

async fn harness_with(config: Config, mailer: RecordingMailer) -> Harness {
    let bucket = Arc::new(InMemory::new());
    bucket
        .put(&Path::from("acta/P1.pdf"), Bytes::from_static(b"%PDF-1.4 P1").into())
        .await
        .unwrap();
    bucket
        .put(&Path::from("acta/P2.pdf"), Bytes::from_static(b"%PDF-1.4 P2").into())
        .await
        .unwrap();

    let artifacts = ArtifactStore::new("us-east-2", None);
    artifacts.register("s3", "bucket", bucket);

    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_events(
        config,
        store.clone(),
        artifacts,
        Arc::new(mailer.clone()),
        DecisionEvents::disabled(),
    )
    .unwrap();

    Harness {
        state,
        store,
        mailer,
    }
}

async fn harness() -> Harness {
    harness_with(Config::default(), RecordingMailer::new()).await
}

async fn register(h: &Harness, project_id: &str, document_ref: &str) {
    approval::register(h.store.as_ref(), project_id, "client@example.com", document_ref)
        .await
        .unwrap();
}

/// Register and notify P1; returns its live token.
async fn notified_p1(h: &Harness) -> String {
    register(h, "P1", "s3://bucket/acta/P1.pdf").await;
    h.state.notifier.notify("P1", false).await.unwrap().token
}

#[tokio::test]
async fn test_notify_then_approve_with_comment() {
    let h = harness().await;
    register(&h, "P1", "s3://bucket/acta/P1.pdf").await;

    let sent = h.state.notifier.notify("P1", false).await.unwrap();
    assert!(!sent.rotated);

    let record = h.store.get("P1").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Notified);
    assert_eq!(record.approval_token.as_deref(), Some(sent.token.as_str()));
    assert_eq!(record.notified_at, Some(sent.notified_at));

    let emails = h.mailer.sent();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, "client@example.com");
    assert!(emails[0].subject.contains("P1"));
    assert!(emails[0].text_body.contains(&sent.links.approve));
    assert!(emails[0].text_body.contains(&sent.links.reject));
    let attachment = emails[0].attachment.as_ref().unwrap();
    assert_eq!(attachment.file_name, "Acta.pdf");
    assert_eq!(attachment.content_type, "application/pdf");
    assert_eq!(attachment.bytes, b"%PDF-1.4 P1");

    let resolved = h
        .state
        .callbacks
        .resolve(&sent.token, Decision::Approve, Some("looks good"))
        .await
        .unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert!(!resolved.replayed);

    let record = h.store.get("P1").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Approved);
    assert_eq!(record.comment.as_deref(), Some("looks good"));
    assert_eq!(record.resolved_at, resolved.resolved_at);

    // A later reject on the same token is ignored.
    let replay = h
        .state
        .callbacks
        .resolve(&sent.token, Decision::Reject, None)
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.status, ApprovalStatus::Approved);
    assert_eq!(h.store.get("P1").await.unwrap().unwrap(), record);
}

#[tokio::test]
async fn test_unknown_token_writes_nothing() {
    let h = harness().await;
    let token = notified_p1(&h).await;
    let before = h.store.get("P1").await.unwrap().unwrap();

    let err = h
        .state
        .callbacks
        .resolve("not-a-real-token", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownToken));

    let err = h
        .state
        .callbacks
        .resolve("", Decision::Reject, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownToken));

    assert_eq!(h.store.get("P1").await.unwrap().unwrap(), before);
    assert_eq!(before.approval_token.as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn test_link_for_another_project_is_unknown() {
    let h = harness().await;
    let token = notified_p1(&h).await;

    let err = h
        .state
        .callbacks
        .resolve_link(Some("P2"), &token, Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownToken));
    assert_eq!(
        h.store.get("P1").await.unwrap().unwrap().status,
        ApprovalStatus::Notified
    );

    let ok = h
        .state
        .callbacks
        .resolve_link(Some("P1"), &token, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(ok.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_repeat_click_replays_first_decision() {
    let h = harness().await;
    let token = notified_p1(&h).await;

    let first = h
        .state
        .callbacks
        .resolve(&token, Decision::Approve, Some("looks good"))
        .await
        .unwrap();
    let second = h
        .state
        .callbacks
        .resolve(&token, Decision::Approve, Some("again"))
        .await
        .unwrap();

    assert!(second.replayed);
    assert_eq!(second.status, ApprovalStatus::Approved);
    assert_eq!(second.resolved_at, first.resolved_at);
    assert_eq!(second.comment.as_deref(), Some("looks good"));
}

#[tokio::test]
async fn test_terminal_state_is_immutable() {
    let h = harness().await;
    let token = notified_p1(&h).await;

    h.state
        .callbacks
        .resolve(&token, Decision::Reject, Some("wrong dates"))
        .await
        .unwrap();
    let rejected = h.store.get("P1").await.unwrap().unwrap();

    // A conflicting click replays the rejection.
    let replay = h
        .state
        .callbacks
        .resolve(&token, Decision::Approve, None)
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.status, ApprovalStatus::Rejected);

    // The sweeper leaves it alone even far past the deadline.
    let report = h
        .state
        .sweeper
        .sweep(Utc::now() + Duration::days(30), Duration::days(5))
        .await
        .unwrap();
    assert_eq!(report.examined, 0);

    // Notify refuses a resolved record.
    let err = h.state.notifier.notify("P1", true).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidState {
            status: ApprovalStatus::Rejected,
            ..
        }
    ));

    assert_eq!(h.store.get("P1").await.unwrap().unwrap(), rejected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approve_and_reject_agree() {
    for _ in 0..20 {
        let h = harness().await;
        let token = notified_p1(&h).await;

        let approve = {
            let callbacks = h.state.callbacks.clone();
            let token = token.clone();
            tokio::spawn(async move { callbacks.resolve(&token, Decision::Approve, None).await })
        };
        let reject = {
            let callbacks = h.state.callbacks.clone();
            let token = token.clone();
            tokio::spawn(async move { callbacks.resolve(&token, Decision::Reject, None).await })
        };

        let a: ResolveResult = approve.await.unwrap().unwrap();
        let r: ResolveResult = reject.await.unwrap().unwrap();

        let record = h.store.get("P1").await.unwrap().unwrap();
        assert!(record.is_terminal());
        // Exactly one call wrote; both report the stored outcome.
        assert_ne!(a.replayed, r.replayed);
        assert_eq!(a.status, record.status);
        assert_eq!(r.status, record.status);
        assert_eq!(a.resolved_at, record.resolved_at);
        assert_eq!(r.resolved_at, record.resolved_at);
    }
}

#[tokio::test]
async fn test_sweep_expires_after_deadline() {
    let h = harness().await;
    let token = notified_p1(&h).await;
    let notified_at = h.store.get("P1").await.unwrap().unwrap().notified_at.unwrap();
    let deadline = Duration::days(5);

    // Not yet due.
    let early = h
        .state
        .sweeper
        .sweep(notified_at + deadline - Duration::seconds(1), deadline)
        .await
        .unwrap();
    assert_eq!(early.closed, 0);

    let now = notified_at + deadline + Duration::seconds(1);
    let report = h.state.sweeper.sweep(now, deadline).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.closed, 1);

    let record = h.store.get("P1").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Expired);
    assert_eq!(record.resolved_at, Some(now));

    // A late click sees the expiry.
    let late = h
        .state
        .callbacks
        .resolve(&token, Decision::Approve, None)
        .await
        .unwrap();
    assert!(late.replayed);
    assert_eq!(late.status, ApprovalStatus::Expired);

    // Re-running is a no-op.
    let again = h.state.sweeper.sweep(now, deadline).await.unwrap();
    assert_eq!(again.examined, 0);
}

#[tokio::test]
async fn test_sweep_auto_approve_policy() {
    let config = Config {
        expiry_policy: ExpiryPolicy::AutoApprove,
        ..Config::default()
    };
    let h = harness_with(config, RecordingMailer::new()).await;
    notified_p1(&h).await;

    let report = h
        .state
        .sweeper
        .sweep(Utc::now() + Duration::days(6), Duration::days(5))
        .await
        .unwrap();
    assert_eq!(report.closed, 1);

    let record = h.store.get("P1").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Approved);
    assert_eq!(
        record.comment.as_deref(),
        Some("Automatically approved after 5 days")
    );
}

#[tokio::test]
async fn test_sweep_skips_pending_records() {
    let h = harness().await;
    register(&h, "P2", "s3://bucket/acta/P2.pdf").await;

    let report = h
        .state
        .sweeper
        .sweep(Utc::now() + Duration::days(30), Duration::days(5))
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(
        h.store.get("P2").await.unwrap().unwrap().status,
        ApprovalStatus::Pending
    );
}

#[tokio::test]
async fn test_missing_artifact_keeps_record_pending() {
    let h = harness().await;
    register(&h, "P9", "s3://bucket/acta/P9.pdf").await;

    let err = h.state.notifier.notify("P9", false).await.unwrap_err();
    assert!(matches!(err, AppError::ArtifactMissing(_)));
    assert!(!err.is_retryable());

    let record = h.store.get("P9").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Pending);
    assert!(record.approval_token.is_none());
    assert!(record.last_error.as_deref().unwrap_or_default().contains("P9.pdf"));
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_local_file_reference_is_not_attached() {
    let h = harness().await;
    register(&h, "P7", "file:///etc/passwd").await;

    let err = h.state.notifier.notify("P7", false).await.unwrap_err();
    assert!(matches!(err, AppError::ArtifactMissing(_)));

    let record = h.store.get("P7").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Pending);
    assert!(record.approval_token.is_none());
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_rejected_email_keeps_record_pending() {
    let h = harness_with(Config::default(), RecordingMailer::failing("550 mailbox unavailable")).await;
    register(&h, "P1", "s3://bucket/acta/P1.pdf").await;

    let err = h.state.notifier.notify("P1", false).await.unwrap_err();
    assert!(matches!(err, AppError::RecipientRejected(_)));
    assert!(err.is_retryable());

    let record = h.store.get("P1").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Pending);
    assert!(record.approval_token.is_none());
    assert!(record.notified_at.is_none());
}

#[tokio::test]
async fn test_second_notify_requires_force() {
    let h = harness().await;
    let token = notified_p1(&h).await;

    let err = h.state.notifier.notify("P1", false).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyNotified(_)));
    assert_eq!(h.mailer.sent().len(), 1);

    let resent = h.state.notifier.notify("P1", true).await.unwrap();
    assert!(resent.rotated);
    assert_ne!(resent.token, token);
    assert_eq!(h.mailer.sent().len(), 2);

    // The superseded link no longer resolves.
    let err = h
        .state
        .callbacks
        .resolve(&token, Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownToken));

    let ok = h
        .state
        .callbacks
        .resolve(&resent.token, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(ok.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_notify_unknown_project() {
    let h = harness().await;
    let err = h.state.notifier.notify("nope", false).await.unwrap_err();
    assert!(matches!(err, AppError::RecordNotFound(_)));
}

#[tokio::test]
async fn test_blank_comment_is_not_stored() {
    let h = harness().await;
    let token = notified_p1(&h).await;

    h.state
        .callbacks
        .resolve(&token, Decision::Approve, Some("   "))
        .await
        .unwrap();
    assert!(h.store.get("P1").await.unwrap().unwrap().comment.is_none());
}
