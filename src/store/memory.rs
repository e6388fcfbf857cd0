use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{NotifiedUpdate, RecordStore, Transition};
use crate::models::approval::{ApprovalRecord, ApprovalStatus};

/// In-process record store for local development and tests.
///
/// Conditional writes run under the per-entry write lock of the records
/// map. Writers lock `records` before `tokens`; readers never hold both.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, ApprovalRecord>>,
    /// token -> project_id
    tokens: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: &ApprovalRecord) -> anyhow::Result<bool> {
        match self.records.entry(record.project_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                if let Some(token) = &record.approval_token {
                    match self.tokens.entry(token.clone()) {
                        Entry::Occupied(_) => anyhow::bail!("approval token already in use"),
                        Entry::Vacant(t) => {
                            t.insert(record.project_id.clone());
                        }
                    }
                }
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, project_id: &str) -> anyhow::Result<Option<ApprovalRecord>> {
        Ok(self.records.get(project_id).map(|r| r.value().clone()))
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<ApprovalRecord>> {
        let project_id = match self.tokens.get(token) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        // The index may briefly lag a rotation; the record is authoritative.
        Ok(self
            .records
            .get(&project_id)
            .filter(|r| r.approval_token.as_deref() == Some(token))
            .map(|r| r.value().clone()))
    }

    async fn token_exists(&self, token: &str) -> anyhow::Result<bool> {
        Ok(self.tokens.contains_key(token))
    }

    async fn list(&self, status: Option<ApprovalStatus>) -> anyhow::Result<Vec<ApprovalRecord>> {
        let mut rows: Vec<ApprovalRecord> = self
            .records
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn list_notified_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ApprovalRecord>> {
        let mut rows: Vec<ApprovalRecord> = self
            .records
            .iter()
            .filter(|r| {
                r.status == ApprovalStatus::Notified
                    && r.notified_at.map_or(false, |at| at <= cutoff)
            })
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.notified_at.cmp(&b.notified_at));
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

        let Some(mut record) = self.records.get_mut(&update.project_id) else {
            return Ok(false);
        };
        if record.status != update.expected_status
            || record.approval_token != update.expected_token
        {
            return Ok(false);
        }

        match self.tokens.entry(update.token.clone()) {
            Entry::Occupied(_) => anyhow::bail!("approval token already in use"),
            Entry::Vacant(slot) => {
                slot.insert(update.project_id.clone());
            }
        }
        if let Some(old) = record.approval_token.replace(update.token.clone()) {
            self.tokens.remove(&old);
        }
        record.status = ApprovalStatus::Notified;
        record.notified_at = Some(update.notified_at);
        record.last_error = None;
        Ok(true)
    }

    async fn annotate_error(&self, project_id: &str, message: &str) -> anyhow::Result<()> {
        if let Some(mut record) = self.records.get_mut(project_id) {
            record.last_error = Some(message.to_string());
        }
        Ok(())
    }

    async fn transition(&self, update: &Transition) -> anyhow::Result<bool> {
        if !update.status.is_terminal() {
            anyhow::bail!("{} is not a terminal status", update.status);
        }

        let Some(mut record) = self.records.get_mut(&update.project_id) else {
            return Ok(false);
        };
        if record.status != ApprovalStatus::Notified
            || record.approval_token.as_deref() != Some(update.expected_token.as_str())
        {
            return Ok(false);
        }

        record.status = update.status;
        record.resolved_at = Some(update.resolved_at);
        record.comment = update.comment.clone();
        Ok(true)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
