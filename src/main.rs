use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use acta::cli::{Cli, Commands, RecordCommands};
use acta::config::{self, Config};
use acta::models::approval::ApprovalStatus;
use acta::notification::email;
use acta::store::artifact::ArtifactStore;
use acta::{api, approval, jobs, store, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Notify { project_id, force }) => {
            let state = build_state(cfg).await?;
            let result = state.notifier.notify(&project_id, force).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Some(Commands::Sweep { deadline_hours }) => {
            let state = build_state(cfg).await?;
            let deadline = match deadline_hours {
                Some(h) => jobs::expiry::deadline_from_hours(h)?,
                None => state.config.expiry_deadline,
            };
            let report = state.sweeper.sweep(Utc::now(), deadline).await?;
            println!(
                "Examined {}, closed {}, skipped {}, failed {} ({}).",
                report.examined,
                report.closed,
                report.skipped,
                report.failed,
                state.sweeper.policy()
            );
            Ok(())
        }
        Some(Commands::Record { command }) => {
            let db = store::connect(&cfg).await?;
            handle_record_command(db.as_ref(), command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "acta-approval"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "acta=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn build_state(cfg: Config) -> anyhow::Result<Arc<AppState>> {
    let db = store::connect(&cfg).await?;
    let artifacts = ArtifactStore::new(cfg.artifact_region.clone(), cfg.artifact_endpoint.clone())
        .with_local_root(cfg.artifact_local_root.as_ref().map(PathBuf::from));
    let mailer = email::from_config(&cfg).context("failed to configure mailer")?;
    Ok(Arc::new(AppState::new(cfg, db, artifacts, mailer)?))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let state = build_state(cfg).await?;

    if state.config.sweep_interval.is_zero() {
        tracing::info!("Background expiry sweep disabled");
    } else {
        jobs::expiry::spawn(
            state.sweeper.clone(),
            state.config.sweep_interval,
            state.config.expiry_deadline,
        );
        tracing::info!(
            every_secs = state.config.sweep_interval.as_secs(),
            deadline = %jobs::expiry::describe_deadline(state.config.expiry_deadline),
            policy = %state.config.expiry_policy,
            "Background expiry sweep started"
        );
    }

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Acta approval service listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_record_command(db: &dyn store::RecordStore, cmd: RecordCommands) -> anyhow::Result<()> {
    match cmd {
        RecordCommands::Register {
            project_id,
            recipient,
            document_ref,
        } => {
            let (record, created) = approval::register(db, &project_id, &recipient, &document_ref).await?;
            if created {
                println!("Registered {} for {}.", record.project_id, record.recipient_email);
            } else {
                println!("{} already registered ({}).", record.project_id, record.status);
            }
        }
        RecordCommands::List { status } => {
            let status = status
                .as_deref()
                .map(str::parse::<ApprovalStatus>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let records = db.list(status).await?;

            if records.is_empty() {
                println!("No records.");
                return Ok(());
            }

            println!("{:<24} {:<10} {:<32} NOTIFIED", "PROJECT", "STATUS", "RECIPIENT");
            for r in records {
                let notified = r
                    .notified_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<24} {:<10} {:<32} {}",
                    r.project_id, r.status, r.recipient_email, notified
                );
            }
        }
        RecordCommands::Show { project_id } => {
            let record = db
                .get(&project_id)
                .await?
                .with_context(|| format!("record {} not found", project_id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}
