use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "signoff")]
#[command(about = "Conditional multi-step approval workflows")]
#[command(long_about = "Signoff routes requests through an ordered chain of approvers. Steps whose \
                       conditions do not hold for the request are skipped automatically. Get started \
                       with 'signoff templates sync' to load your approval lines.")]
pub struct Cli {
    /// Additional configuration file, applied over signoff.toml and .signoff-rc
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a new request and open its first mandatory step
    Submit {
        /// Request type code, e.g. PURCHASE
        #[arg(long = "type", help = "Request type whose approval line to use")]
        request_type: String,
        /// Submitting actor
        #[arg(long, help = "Actor id of the submitter")]
        actor: i64,
        /// Short human title
        #[arg(long)]
        title: Option<String>,
        /// Request payload as inline JSON
        #[arg(long, conflicts_with = "payload_file", help = "Payload JSON, e.g. '{\"amount\": 1500000}'")]
        payload: Option<String>,
        /// Read the payload from a JSON file
        #[arg(long, help = "Path to a JSON file holding the payload")]
        payload_file: Option<PathBuf>,
        /// Attachment references, repeatable
        #[arg(long = "attach", help = "Opaque file reference to attach (repeatable)")]
        attachments: Vec<String>,
    },
    /// Approve the step currently awaiting your signature
    Approve {
        #[arg(long, help = "Request id")]
        request: i64,
        #[arg(long, help = "Actor id of the approver")]
        actor: i64,
        #[arg(long, help = "Role code the approver acts under")]
        role: String,
        #[arg(long, help = "Opaque reference to a stored signature")]
        signature: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject the request at the step currently awaiting your signature
    Reject {
        #[arg(long, help = "Request id")]
        request: i64,
        #[arg(long, help = "Actor id of the approver")]
        actor: i64,
        #[arg(long, help = "Role code the approver acts under")]
        role: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// List open requests waiting on you
    Inbox {
        #[arg(long, help = "Actor id")]
        actor: i64,
        #[arg(long, help = "Role code held by the actor")]
        role: String,
        #[arg(long, help = "Print JSON instead of a table")]
        json: bool,
    },
    /// Show a request with its steps and attachments
    Show {
        #[arg(long, help = "Request id")]
        request: i64,
        #[arg(long, help = "Print JSON instead of a summary")]
        json: bool,
    },
    /// Show the audit trail of a request
    History {
        #[arg(long, help = "Request id")]
        request: i64,
        #[arg(long, help = "Print JSON instead of a timeline")]
        json: bool,
    },
    /// List requests, optionally filtered
    List {
        #[arg(long, help = "Only requests in this status, e.g. IN_PROGRESS")]
        status: Option<String>,
        #[arg(long = "type", help = "Only requests of this type")]
        request_type: Option<String>,
        #[arg(long, help = "Print JSON instead of a table")]
        json: bool,
    },
    /// Mark an approved request as handed to downstream processing
    Export {
        #[arg(long, help = "Request id")]
        request: i64,
        #[arg(long, help = "Actor id performing the export")]
        actor: i64,
    },
    /// Manage step templates
    Templates {
        #[command(subcommand)]
        command: TemplateCommands,
    },
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// Write the templates from configuration into the database
    Sync {
        #[arg(long, help = "Validate and show what would be written without changing anything")]
        dry_run: bool,
    },
    /// Show the stored approval line of each request type
    List {
        #[arg(long = "type", help = "Only this request type")]
        request_type: Option<String>,
    },
}
