//! Acta approval service.
//!
//! Emails a client an approval request for an Acta document with one-time
//! Approve / Reject links, records the decision when a link is clicked and
//! closes requests nobody answered. The binary in `main.rs` wires these
//! pieces behind an HTTP server and a CLI; integration tests in `tests/`
//! build the same [`AppState`] around in-process doubles.

use std::sync::Arc;

pub mod api;
pub mod approval;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod notification;
pub mod store;

use approval::callback::CallbackHandler;
use approval::notify::{Notifier, NotifierSettings};
use jobs::expiry::ExpirySweeper;
use notification::email::Mailer;
use notification::webhook::{DecisionEvents, WebhookNotifier};
use store::artifact::ArtifactStore;
use store::RecordStore;

/// Shared application state passed to handlers, the CLI and the sweeper.
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub notifier: Notifier,
    pub callbacks: CallbackHandler,
    pub sweeper: ExpirySweeper,
    pub config: config::Config,
}

impl AppState {
    pub fn new(
        config: config::Config,
        store: Arc<dyn RecordStore>,
        artifacts: ArtifactStore,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let events = DecisionEvents::new(
            WebhookNotifier::new(),
            config.webhook_urls.clone(),
            config.webhook_secret.clone(),
        );
        Self::with_events(config, store, artifacts, mailer, events)
    }

    pub fn with_events(
        config: config::Config,
        store: Arc<dyn RecordStore>,
        artifacts: ArtifactStore,
        mailer: Arc<dyn Mailer>,
        events: DecisionEvents,
    ) -> anyhow::Result<Self> {
        let settings = NotifierSettings::from_config(&config)?;
        if events.is_enabled() {
            tracing::info!(
                count = config.webhook_urls.len(),
                "decision webhooks enabled"
            );
        }

        Ok(Self {
            notifier: Notifier::new(store.clone(), artifacts, mailer, settings, events.clone()),
            callbacks: CallbackHandler::new(store.clone(), events.clone()),
            sweeper: ExpirySweeper::new(store.clone(), config.expiry_policy, events),
            store,
            config,
        })
    }
}
