use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::approval;
use crate::errors::AppError;
use crate::jobs::expiry;
use crate::models::approval::{ApprovalRecord, ApprovalStatus};
use crate::AppState;

// -- Notify trigger --

#[derive(Deserialize)]
pub struct NotifyRequest {
    pub project_id: String,
    #[serde(default)]
    pub force_resend: bool,
}

/// POST /api/v1/notify: email the approval request for one record.
pub async fn notify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NotifyRequest>,
) -> Result<Json<Value>, AppError> {
    let project_id = payload.project_id.trim();
    if project_id.is_empty() {
        return Err(AppError::InvalidRequest("project_id is required".into()));
    }

    let result = state.notifier.notify(project_id, payload.force_resend).await?;
    Ok(Json(json!({
        "statusCode": 200,
        "body": result,
    })))
}

// -- Records --

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub project_id: String,
    pub recipient_email: String,
    pub document_ref: String,
}

/// POST /api/v1/records: 201 when created, 200 when the project already exists.
pub async fn register_record(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApprovalRecord>), AppError> {
    let (record, created) = approval::register(
        state.store.as_ref(),
        &payload.project_id,
        &payload.recipient_email,
        &payload.document_ref,
    )
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(record)))
}

#[derive(Deserialize)]
pub struct ListRecordsQuery {
    pub status: Option<String>,
}

pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRecordsQuery>,
) -> Result<Json<Vec<ApprovalRecord>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<ApprovalStatus>)
        .transpose()
        .map_err(AppError::InvalidRequest)?;

    let records = state.store.list(status).await?;
    Ok(Json(records))
}

pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Json<ApprovalRecord>, AppError> {
    let record = state
        .store
        .get(&project_id)
        .await?
        .ok_or(AppError::RecordNotFound(project_id))?;
    Ok(Json(record))
}

// -- Sweep --

#[derive(Deserialize)]
pub struct SweepQuery {
    /// Overrides the configured deadline for this run.
    pub deadline_hours: Option<i64>,
}

/// POST /api/v1/sweep: run the expiry sweep now.
pub async fn sweep(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SweepQuery>,
) -> Result<Json<Value>, AppError> {
    let deadline = match params.deadline_hours {
        Some(h) => expiry::deadline_from_hours(h)?,
        None => state.config.expiry_deadline,
    };

    let report = state.sweeper.sweep(Utc::now(), deadline).await?;
    Ok(Json(json!({
        "statusCode": 200,
        "body": report,
    })))
}
