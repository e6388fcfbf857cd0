use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// What the sweeper does with an approval nobody answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    Expire,
    AutoApprove,
}

impl FromStr for ExpiryPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "expire" | "expired" => Ok(ExpiryPolicy::Expire),
            "auto_approve" | "auto_approved" => Ok(ExpiryPolicy::AutoApprove),
            other => anyhow::bail!("invalid expiry policy: {} (expected expire|auto_approve)", other),
        }
    }
}

impl fmt::Display for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryPolicy::Expire => f.write_str("expire"),
            ExpiryPolicy::AutoApprove => f.write_str("auto_approve"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// STARTTLS relay; disable only for a local catcher such as MailHog.
    pub starttls: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Unset selects the in-process record store.
    pub database_url: Option<String>,
    pub admin_key: Option<String>,
    /// Base of the Approve / Reject links, e.g. `https://acta.example.com/prod`.
    pub public_base_url: String,
    pub email_source: String,
    pub email_cc: Vec<String>,
    pub subject_prefix: String,
    pub attachment_name: String,
    /// Unset logs outgoing mail instead of sending it.
    pub smtp: Option<SmtpSettings>,
    pub artifact_region: String,
    pub artifact_endpoint: Option<String>,
    /// Directory `file://` document references may read from. Unset refuses them.
    pub artifact_local_root: Option<String>,
    pub expiry_deadline: chrono::Duration,
    pub expiry_policy: ExpiryPolicy,
    /// Zero disables the background sweep.
    pub sweep_interval: Duration,
    /// Comma-separated list of webhook URLs to notify on approval events.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            admin_key: None,
            public_base_url: "http://localhost:8080".into(),
            email_source: "acta-automation@localhost".into(),
            email_cc: Vec::new(),
            subject_prefix: "Acta Approval".into(),
            attachment_name: "Acta.pdf".into(),
            smtp: None,
            artifact_region: "us-east-2".into(),
            artifact_endpoint: None,
            artifact_local_root: None,
            expiry_deadline: chrono::Duration::days(5),
            expiry_policy: ExpiryPolicy::Expire,
            sweep_interval: Duration::from_secs(24 * 3600),
            webhook_urls: Vec::new(),
            webhook_secret: None,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();
    let production = is_production();

    let smtp = match env_opt("ACTA_SMTP_HOST") {
        Some(host) => Some(SmtpSettings {
            host,
            port: env_parse("ACTA_SMTP_PORT")?.unwrap_or(587),
            username: env_opt("ACTA_SMTP_USERNAME"),
            password: env_opt("ACTA_SMTP_PASSWORD"),
            starttls: env_parse("ACTA_SMTP_STARTTLS")?.unwrap_or(true),
        }),
        None => None,
    };

    let cfg = Config {
        port: env_parse("ACTA_PORT")?.unwrap_or(defaults.port),
        database_url: env_opt("DATABASE_URL"),
        admin_key: env_opt("ACTA_ADMIN_KEY"),
        public_base_url: env_opt("ACTA_PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
        email_source: env_opt("ACTA_EMAIL_SOURCE").unwrap_or(defaults.email_source),
        email_cc: split_list(&std::env::var("ACTA_EMAIL_CC").unwrap_or_default()),
        subject_prefix: env_opt("ACTA_EMAIL_SUBJECT_PREFIX").unwrap_or(defaults.subject_prefix),
        attachment_name: env_opt("ACTA_ATTACHMENT_NAME").unwrap_or(defaults.attachment_name),
        smtp,
        artifact_region: env_opt("ACTA_ARTIFACT_REGION")
            .or_else(|| env_opt("AWS_REGION"))
            .unwrap_or(defaults.artifact_region),
        artifact_endpoint: env_opt("ACTA_ARTIFACT_ENDPOINT"),
        artifact_local_root: env_opt("ACTA_ARTIFACT_LOCAL_ROOT"),
        expiry_deadline: match env_parse::<i64>("ACTA_EXPIRY_HOURS")? {
            Some(h) => deadline_from_hours(h)?,
            None => defaults.expiry_deadline,
        },
        expiry_policy: env_parse("ACTA_EXPIRY_POLICY")?.unwrap_or(defaults.expiry_policy),
        sweep_interval: env_parse::<u64>("ACTA_SWEEP_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval),
        webhook_urls: split_list(&std::env::var("ACTA_WEBHOOK_URLS").unwrap_or_default()),
        webhook_secret: env_opt("ACTA_WEBHOOK_SECRET"),
    };

    cfg.validate(production)?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self, production: bool) -> anyhow::Result<()> {
        let base = url::Url::parse(&self.public_base_url)
            .with_context(|| format!("ACTA_PUBLIC_BASE_URL is not a URL: {}", self.public_base_url))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("ACTA_PUBLIC_BASE_URL must be an http(s) URL: {}", self.public_base_url);
        }
        if self.expiry_deadline <= chrono::Duration::zero() {
            anyhow::bail!("ACTA_EXPIRY_HOURS must be positive");
        }
        if chrono::Utc::now()
            .checked_sub_signed(self.expiry_deadline)
            .is_none()
        {
            anyhow::bail!("ACTA_EXPIRY_HOURS is out of range");
        }

        if !production {
            if self.admin_key.is_none() {
                eprintln!("⚠️  ACTA_ADMIN_KEY is not set — the admin API will refuse every request.");
            }
            return Ok(());
        }

        if self.database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set in production");
        }
        if self.admin_key.is_none() {
            anyhow::bail!("ACTA_ADMIN_KEY must be set in production");
        }
        if self.smtp.is_none() {
            anyhow::bail!("ACTA_SMTP_HOST must be set in production");
        }
        if base.scheme() != "https" {
            anyhow::bail!("ACTA_PUBLIC_BASE_URL must use https in production");
        }
        if self.artifact_local_root.is_some() {
            anyhow::bail!("ACTA_ARTIFACT_LOCAL_ROOT is not allowed in production");
        }
        Ok(())
    }
}

fn is_production() -> bool {
    std::env::var("ACTA_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .map(|v| v == "production")
        .unwrap_or(false)
}

fn deadline_from_hours(hours: i64) -> anyhow::Result<chrono::Duration> {
    chrono::Duration::try_hours(hours)
        .ok_or_else(|| anyhow::anyhow!("invalid ACTA_EXPIRY_HOURS={}: out of range", hours))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {}={}: {}", key, raw, e)),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
