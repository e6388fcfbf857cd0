use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::{Config, SmtpSettings};

/// A fully composed approval email.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachment: Option<EmailAttachment>,
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Email transport. Any error means the message was not accepted.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()>;
}

/// Pick the transport for this process: SMTP when configured, otherwise a
/// mailer that only logs.
pub fn from_config(cfg: &Config) -> anyhow::Result<Arc<dyn Mailer>> {
    match &cfg.smtp {
        Some(smtp) => Ok(Arc::new(SmtpMailer::new(smtp, &cfg.email_source)?)),
        None => {
            tracing::warn!("ACTA_SMTP_HOST is not set — approval emails will be logged, not sent");
            Ok(Arc::new(LogMailer))
        }
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings, sender: &str) -> anyhow::Result<Self> {
        let from: Mailbox = sender
            .parse()
            .with_context(|| format!("invalid sender address: {}", sender))?;

        let mut builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .with_context(|| format!("invalid SMTP relay: {}", settings.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        builder = builder.port(settings.port);

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &OutboundEmail) -> anyhow::Result<Message> {
        let to: Mailbox = email
            .to
            .parse()
            .with_context(|| format!("invalid recipient address: {}", email.to))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone());
        for cc in &email.cc {
            let mailbox: Mailbox = cc
                .parse()
                .with_context(|| format!("invalid cc address: {}", cc))?;
            builder = builder.cc(mailbox);
        }

        let body = MultiPart::alternative_plain_html(email.text_body.clone(), email.html_body.clone());

        let message = match &email.attachment {
            Some(a) => {
                let content_type = ContentType::parse(&a.content_type)
                    .map_err(|e| anyhow::anyhow!("invalid content type {}: {}", a.content_type, e))?;
                builder.multipart(
                    MultiPart::mixed()
                        .multipart(body)
                        .singlepart(Attachment::new(a.file_name.clone()).body(a.bytes.clone(), content_type)),
                )?
            }
            None => builder.multipart(body)?,
        };
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
        let message = self.build_message(email)?;
        let response = self
            .transport
            .send(message)
            .await
            .context("SMTP relay refused the message")?;

        tracing::info!(
            to = %email.to,
            code = %response.code(),
            "approval email accepted by SMTP relay"
        );
        Ok(())
    }
}

/// Development mailer: logs the message and reports success.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            attachment = email.attachment.as_ref().map(|a| a.file_name.as_str()).unwrap_or("-"),
            "approval email (not sent, no SMTP relay configured):\n{}",
            email.text_body
        );
        Ok(())
    }
}

/// Keeps every message in memory. Used by tests and local tooling.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    fail_with: Option<String>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose relay refuses every message.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            sent: Arc::default(),
            fail_with: Some(reason.into()),
        }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
        if let Some(reason) = &self.fail_with {
            anyhow::bail!("{}", reason);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }
}

/// Minimal HTML escaping for values interpolated into email and page bodies.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
