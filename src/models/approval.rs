use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One Acta awaiting (or past) sign-off. Keyed by `project_id`, with a
/// secondary lookup on `approval_token`.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct ApprovalRecord {
    pub project_id: String,
    pub approval_token: Option<String>,
    pub status: ApprovalStatus,
    pub recipient_email: String,
    pub document_ref: String,
    pub comment: Option<String>,
    /// Set when a notify attempt failed for a reason an operator has to fix.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRecord {
    pub fn pending(
        project_id: impl Into<String>,
        recipient_email: impl Into<String>,
        document_ref: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            approval_token: None,
            status: ApprovalStatus::Pending,
            recipient_email: recipient_email.into(),
            document_ref: document_ref.into(),
            comment: None,
            last_error: None,
            created_at,
            notified_at: None,
            resolved_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Notified,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Notified => "notified",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    /// Forward-only lifecycle. NOTIFIED -> NOTIFIED is a resend with a rotated token.
    pub fn can_transition_to(self, next: ApprovalStatus) -> bool {
        use ApprovalStatus::*;
        matches!(
            (self, next),
            (Pending, Notified)
                | (Notified, Notified)
                | (Notified, Approved)
                | (Notified, Rejected)
                | (Notified, Expired)
        )
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "notified" => Ok(ApprovalStatus::Notified),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "expired" => Ok(ApprovalStatus::Expired),
            other => Err(format!("unknown approval status: {}", other)),
        }
    }
}

/// The action carried by an approval link.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Accepts the link form (`approved`/`rejected`) and the verb form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Decision::Approve),
            "rejected" | "reject" => Some(Decision::Reject),
            _ => None,
        }
    }

    pub fn status(self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }

    /// Value of the `status` query parameter in outbound links.
    pub fn as_link_param(self) -> &'static str {
        self.status().as_str()
    }
}
