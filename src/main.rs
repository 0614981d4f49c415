use anyhow::Result;
use clap::Parser;

mod cli;

use cli::commands::{
    decide::{ApproveCommand, RejectCommand},
    export::ExportCommand,
    inbox::InboxCommand,
    list::ListCommand,
    show::{HistoryCommand, ShowCommand},
    show_how_to_get_started,
    submit::SubmitCommand,
    templates::{TemplatesListCommand, TemplatesSyncCommand},
};
use cli::{Cli, Commands, TemplateCommands};
use signoff::WorkflowError;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = signoff::init_config(cli.config.as_deref())?;
    signoff::init_telemetry(&config.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            // Default behavior: no subcommand - explain how to get started
            None => show_how_to_get_started().await,
            Some(Commands::Submit {
                request_type,
                actor,
                title,
                payload,
                payload_file,
                attachments,
            }) => {
                SubmitCommand::new(request_type, actor)
                    .with_title(title)
                    .with_payload(payload, payload_file)
                    .with_attachments(attachments)
                    .execute()
                    .await
            }
            Some(Commands::Approve {
                request,
                actor,
                role,
                signature,
                comment,
            }) => {
                ApproveCommand::new(request, actor, &role)
                    .with_signature(signature)
                    .with_comment(comment)
                    .execute()
                    .await
            }
            Some(Commands::Reject {
                request,
                actor,
                role,
                comment,
            }) => {
                RejectCommand::new(request, actor, &role)
                    .with_comment(comment)
                    .execute()
                    .await
            }
            Some(Commands::Inbox { actor, role, json }) => {
                InboxCommand::new(actor, role).with_json(json).execute().await
            }
            Some(Commands::Show { request, json }) => ShowCommand::new(request, json).execute().await,
            Some(Commands::History { request, json }) => {
                HistoryCommand::new(request, json).execute().await
            }
            Some(Commands::List {
                status,
                request_type,
                json,
            }) => {
                ListCommand::new(status.as_deref(), request_type, json)?
                    .execute()
                    .await
            }
            Some(Commands::Export { request, actor }) => {
                ExportCommand::new(request, actor).execute().await
            }
            Some(Commands::Templates { command }) => match command {
                TemplateCommands::Sync { dry_run } => {
                    TemplatesSyncCommand::new(dry_run).execute().await
                }
                TemplateCommands::List { request_type } => {
                    TemplatesListCommand::new(request_type).execute().await
                }
            },
        }
    });

    if let Err(e) = &result {
        // Workflow refusals carry a stable code scripts can match on
        if let Some(workflow_error) = e.downcast_ref::<WorkflowError>() {
            eprintln!("❌ {}: {}", workflow_error.code(), workflow_error);
            std::process::exit(2);
        }
    }
    result
}
