//! HTTP surface tests: the public `/approve` page, admin auth and the
//! JSON envelopes of the admin API. Requests go straight into the router
//! with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use object_store::{memory::InMemory, path::Path, ObjectStore};
use serde_json::{json, Value};
use tower::ServiceExt;

use acta::config::Config;
use acta::models::approval::ApprovalStatus;
use acta::notification::email::RecordingMailer;
use acta::notification::webhook::DecisionEvents;
use acta::store::artifact::ArtifactStore;
use acta::store::memory::MemoryStore;
use acta::store::RecordStore;
use acta::{api, AppState};

const ADMIN_KEY: &str = "test-admin-key-123";

async fn app() -> (Router, Arc<MemoryStore>) {
    let bucket = Arc::new(InMemory::new());
    bucket
        .put(&Path::from("P1.pdf"), Bytes::from_static(b"%PDF-1.4").into())
        .await
        .unwrap();
    let artifacts = ArtifactStore::new("us-east-2", None);
    artifacts.register("s3", "bucket", bucket);

    let config = Config {
        admin_key: Some(ADMIN_KEY.into()),
        public_base_url: "https://acta.example.com/prod".into(),
        ..Config::default()
    };
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_events(
        config,
        store.clone(),
        artifacts,
        Arc::new(RecordingMailer::new()),
        DecisionEvents::disabled(),
    )
    .unwrap();

    (api::router(Arc::new(state)), store)
}

fn admin_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-admin-key", ADMIN_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {}", ADMIN_KEY))
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Register P1 and notify it over the API; returns the notify body.
async fn register_and_notify(app: &Router) -> Value {
    let resp = app
        .clone()
        .oneshot(admin_post(
            "/api/v1/records",
            json!({
                "project_id": "P1",
                "recipient_email": "client@example.com",
                "document_ref": "s3://bucket/P1.pdf",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .clone()
        .oneshot(admin_post("/api/v1/notify", json!({ "project_id": "P1" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    json_body(resp).await
}

#[tokio::test]
async fn test_health_probes() {
    let (app, _) = app().await;

    let resp = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(text_body(resp).await, "ok");
}

#[tokio::test]
async fn test_admin_api_requires_key() {
    let (app, _) = app().await;

    let resp = app.clone().oneshot(get("/api/v1/records")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/v1/records")
        .header("x-admin-key", "wrong-key-value")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app.oneshot(admin_get("/api/v1/records")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_notify_envelope_and_links() {
    let (app, store) = app().await;
    let body = register_and_notify(&app).await;

    assert_eq!(body["statusCode"], 200);
    let token = body["body"]["token"].as_str().unwrap();
    let approve = body["body"]["links"]["approve"].as_str().unwrap();
    assert!(approve.starts_with("https://acta.example.com/prod/approve?project_id=P1&token="));
    assert!(approve.contains(token));
    assert!(approve.ends_with("&status=approved"));

    let record = store.get("P1").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Notified);
}

#[tokio::test]
async fn test_notify_errors_use_error_envelope() {
    let (app, _) = app().await;
    register_and_notify(&app).await;

    let resp = app
        .clone()
        .oneshot(admin_post("/api/v1/notify", json!({ "project_id": "P1" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = json_body(resp).await;
    assert_eq!(body["statusCode"], 409);
    assert_eq!(body["error"]["code"], "already_notified");
    assert_eq!(body["error"]["retryable"], false);

    let resp = app
        .oneshot(admin_post("/api/v1/notify", json!({ "project_id": "P404" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["error"]["code"], "record_not_found");
}

#[tokio::test]
async fn test_approve_link_records_decision() {
    let (app, store) = app().await;
    let body = register_and_notify(&app).await;
    let token = body["body"]["token"].as_str().unwrap();

    let uri = format!(
        "/approve?project_id=P1&token={}&status=rejected&comment=Wrong%20totals",
        token
    );
    let resp = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    assert!(resp.headers().contains_key("x-request-id"));
    let page = text_body(resp).await;
    assert!(page.contains("Acta rejected"));

    let record = store.get("P1").await.unwrap().unwrap();
    assert_eq!(record.status, ApprovalStatus::Rejected);
    assert_eq!(record.comment.as_deref(), Some("Wrong totals"));

    // Clicking Approve afterwards only replays the rejection.
    let uri = format!("/approve?project_id=P1&token={}&status=approved", token);
    let resp = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(text_body(resp).await.contains("already recorded"));
    assert_eq!(
        store.get("P1").await.unwrap().unwrap().status,
        ApprovalStatus::Rejected
    );
}

#[tokio::test]
async fn test_approve_page_is_always_200() {
    let (app, _) = app().await;

    for uri in [
        "/approve",
        "/approve?token=abc",
        "/approve?token=abc&status=maybe",
        "/approve?token=abc&status=approved",
        "/approve?token=&status=approved",
    ] {
        let resp = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        let page = text_body(resp).await;
        assert!(page.contains("<html>"), "{}", uri);
    }
}

#[tokio::test]
async fn test_record_endpoints() {
    let (app, _) = app().await;
    register_and_notify(&app).await;

    // Re-registering is a 200 no-op.
    let resp = app
        .clone()
        .oneshot(admin_post(
            "/api/v1/records",
            json!({
                "project_id": "P1",
                "recipient_email": "someone-else@example.com",
                "document_ref": "s3://bucket/other.pdf",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["recipient_email"], "client@example.com");

    let resp = app.clone().oneshot(admin_get("/api/v1/records/P1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "notified");

    let resp = app
        .clone()
        .oneshot(admin_get("/api/v1/records?status=pending"))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await.as_array().unwrap().len(), 0);

    let resp = app
        .clone()
        .oneshot(admin_get("/api/v1/records?status=bogus"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app.oneshot(admin_get("/api/v1/records/P404")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_validation() {
    let (app, _) = app().await;
    let resp = app
        .oneshot(admin_post(
            "/api/v1/records",
            json!({
                "project_id": "P1",
                "recipient_email": "not-an-email",
                "document_ref": "s3://bucket/P1.pdf",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_sweep_endpoint() {
    let (app, store) = app().await;
    register_and_notify(&app).await;

    // Default five-day deadline: nothing is due yet.
    let resp = app
        .clone()
        .oneshot(admin_post("/api/v1/sweep", json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["body"]["closed"], 0);

    let resp = app
        .clone()
        .oneshot(admin_post("/api/v1/sweep?deadline_hours=0", json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(
        store.get("P1").await.unwrap().unwrap().status,
        ApprovalStatus::Notified
    );
}

#[tokio::test]
async fn test_sweep_rejects_out_of_range_deadline() {
    let (app, store) = app().await;
    register_and_notify(&app).await;

    for hours in ["3000000000", "9223372036854775807", "-5"] {
        let uri = format!("/api/v1/sweep?deadline_hours={}", hours);
        let resp = app.clone().oneshot(admin_post(&uri, json!({}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", hours);
        let body = json_body(resp).await;
        assert_eq!(body["error"]["code"], "invalid_request", "{}", hours);
    }

    // The service keeps answering afterwards.
    let resp = app
        .oneshot(admin_post("/api/v1/sweep?deadline_hours=1", json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(
        store.get("P1").await.unwrap().unwrap().status,
        ApprovalStatus::Notified
    );
}
