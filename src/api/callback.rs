//! `GET /approve`, the target of the Approve / Reject links.
//!
//! A person clicks this in a mail client, so every outcome is a 200 with a
//! small HTML page. Failures are described, never surfaced as HTTP errors.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Html,
};
use serde::Deserialize;

use crate::approval::callback::ResolveResult;
use crate::errors::AppError;
use crate::models::approval::{ApprovalStatus, Decision};
use crate::notification::email::escape_html;
use crate::AppState;

const SUCCESS_COLOR: &str = "#4AC795";
const FAILURE_COLOR: &str = "#E74C3C";
const NEUTRAL_COLOR: &str = "#555555";

/// Every field is optional so a mangled link still gets a page.
#[derive(Debug, Default, Deserialize)]
pub struct ApproveParams {
    pub token: Option<String>,
    pub status: Option<String>,
    pub comment: Option<String>,
    pub project_id: Option<String>,
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    params: Option<Query<ApproveParams>>,
) -> Html<String> {
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let token = params.token.as_deref().map(str::trim).unwrap_or_default();
    let decision = params.status.as_deref().and_then(Decision::parse);

    let Some(decision) = decision.filter(|_| !token.is_empty()) else {
        tracing::debug!("approval callback with missing or invalid parameters");
        return render_page(
            "Invalid request",
            "This approval link is incomplete. Please use the link from your email.",
            FAILURE_COLOR,
        );
    };

    let outcome = state
        .callbacks
        .resolve_link(
            params.project_id.as_deref().map(str::trim).filter(|p| !p.is_empty()),
            token,
            decision,
            params.comment.as_deref(),
        )
        .await;

    match outcome {
        Ok(result) => outcome_page(&result),
        Err(AppError::UnknownToken) => render_page(
            "Link not valid",
            "This approval link is invalid or has been replaced by a newer email.",
            FAILURE_COLOR,
        ),
        Err(AppError::InvalidState { project_id, status }) => render_page(
            "Not awaiting approval",
            &format!("Acta {} is {} and cannot be decided yet.", project_id, status),
            NEUTRAL_COLOR,
        ),
        Err(e) => {
            tracing::error!(error = %e, "approval callback failed");
            render_page(
                "Something went wrong",
                "Your response could not be recorded. Please try the link again later.",
                FAILURE_COLOR,
            )
        }
    }
}

fn outcome_page(result: &ResolveResult) -> Html<String> {
    let (title, color) = match result.status {
        ApprovalStatus::Approved => ("Acta approved", SUCCESS_COLOR),
        ApprovalStatus::Rejected => ("Acta rejected", FAILURE_COLOR),
        ApprovalStatus::Expired => ("Approval request expired", NEUTRAL_COLOR),
        ApprovalStatus::Pending | ApprovalStatus::Notified => ("Acta pending", NEUTRAL_COLOR),
    };

    let message = if result.replayed {
        format!(
            "A response for Acta {} was already recorded: {}.",
            result.project_id, result.status
        )
    } else {
        format!(
            "Thank you. Acta {} has been marked as {}.",
            result.project_id, result.status
        )
    };
    render_page(title, &message, color)
}

fn render_page(title: &str, message: &str, color: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>{title}</title></head>
<body style="font-family:Verdana,Arial;text-align:center;padding-top:60px">
  <h2 style="color:{color}">{title}</h2>
  <p>{message}</p>
</body></html>"#,
        title = escape_html(title),
        message = escape_html(message),
        color = color,
    ))
}
