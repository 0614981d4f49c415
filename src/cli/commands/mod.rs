use anyhow::{Context, Result};
use signoff::workflow::{CachedTemplateReader, LoadedRequest, Request, Task, TaskStatus};
use signoff::{DatabaseManager, SqliteStore, WorkflowOrchestrator};
use std::sync::Arc;

pub mod decide;
pub mod export;
pub mod inbox;
pub mod list;
pub mod show;
pub mod submit;
pub mod templates;

/// Everything a command needs to drive the engine
pub struct Engine {
    pub store: SqliteStore,
    pub orchestrator: WorkflowOrchestrator,
}

/// Open the database, build the orchestrator and run `f` against it.
/// The pool is closed afterwards whether `f` succeeds or not.
pub async fn with_engine<F, Fut, R>(f: F) -> Result<R>
where
    F: FnOnce(Engine) -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    let config = signoff::config()?;
    let settings = config
        .database
        .as_ref()
        .context("No [database] section configured")?;

    let database = DatabaseManager::new(settings).await?;
    let store = database.store();
    let templates = CachedTemplateReader::new(
        store.clone(),
        config.engine.template_cache_capacity,
        config.template_cache_ttl(),
    );
    let orchestrator = WorkflowOrchestrator::new(Arc::new(store.clone()), Arc::new(templates))
        .with_assignments(Arc::new(config.roster()));

    let result = f(Engine {
        store,
        orchestrator,
    })
    .await;

    signoff::workflow_metrics().log_stats();
    database.shutdown().await;
    result
}

pub async fn show_how_to_get_started() -> Result<()> {
    println!("✍️  signoff - Conditional Multi-Step Approvals");
    println!();
    println!("To get started:");
    println!("  🗂️  signoff templates sync   # Load approval lines from signoff.toml");
    println!("  📝 signoff submit          # Submit a request");
    println!("  📥 signoff inbox           # See what awaits your signature");
    println!("  ✅ signoff approve         # Sign the active step");
    println!();
    println!("Inspecting requests:");
    println!("  🔎 signoff show            # Steps and status of one request");
    println!("  🧾 signoff history         # Audit trail of one request");
    println!("  📋 signoff list            # All requests");
    println!();
    println!("💡 Run 'signoff <command> --help' for the options of each command.");
    Ok(())
}

pub(crate) fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Waiting => "⏳",
        TaskStatus::Requested => "👉",
        TaskStatus::Approved => "✅",
        TaskStatus::Rejected => "❌",
        TaskStatus::AutoSkipped => "⏭️ ",
    }
}

pub(crate) fn print_request_line(request: &Request) {
    println!(
        "  #{:<6} {:<14} {:<12} step {:<3} {}",
        request.id,
        request.request_type_code,
        request.status.as_str(),
        request.current_order,
        request.title.as_deref().unwrap_or("")
    );
}

pub(crate) fn print_task_line(task: &Task) {
    let assignee = match task.assignee_actor_id {
        Some(actor_id) => format!("{} (actor {})", task.assignee_role_code, actor_id),
        None => task.assignee_role_code.clone(),
    };
    println!(
        "   {} {:>2}. {:<28} {}",
        status_icon(task.status),
        task.order,
        assignee,
        task.status.as_str()
    );
    if let Some(comment) = &task.comment {
        println!("        💬 {}", comment);
    }
}

pub(crate) fn print_loaded_request(loaded: &LoadedRequest) {
    let request = &loaded.request;
    println!(
        "📄 Request #{} ({}) - {}",
        request.id, request.request_type_code, request.status
    );
    if let Some(title) = &request.title {
        println!("   📌 {}", title);
    }
    println!("   👤 Submitted by actor {}", request.created_by);
    println!();
    println!("🪜 STEPS:");
    for task in &loaded.tasks {
        print_task_line(task);
    }
    if !loaded.attachments.is_empty() {
        println!();
        println!("📎 ATTACHMENTS:");
        for attachment in &loaded.attachments {
            println!(
                "   {} {}",
                attachment.file_ref,
                attachment.file_name.as_deref().unwrap_or("")
            );
        }
    }
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
