use clap::{Parser, Subcommand};

/// Acta — email-driven approval of Acta documents
#[derive(Parser)]
#[command(name = "acta", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the background expiry sweep
    Serve {
        /// Port to bind (defaults to ACTA_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Email the approval request for a registered record
    Notify {
        #[arg(long)]
        project_id: String,
        /// Re-send a NOTIFIED record with a fresh token
        #[arg(long)]
        force: bool,
    },

    /// Close approvals past their deadline once and exit
    Sweep {
        /// Overrides ACTA_EXPIRY_HOURS for this run
        #[arg(long)]
        deadline_hours: Option<i64>,
    },

    /// Manage approval records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Register a PENDING record
    Register {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        recipient: String,
        /// Artifact URI, e.g. s3://bucket/acta/P1.pdf
        #[arg(long)]
        document_ref: String,
    },
    /// List records, optionally filtered by status
    List {
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show one record
    Show { project_id: String },
}
