use anyhow::Result;
use signoff::workflow::{StepTemplate, StepTemplateReader};

use crate::cli::commands::with_engine;

pub struct TemplatesSyncCommand {
    pub dry_run: bool,
}

impl TemplatesSyncCommand {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub async fn execute(&self) -> Result<()> {
        let config = signoff::config()?;
        let catalog = config.catalog()?;

        let count = catalog.templates().count();
        if count == 0 {
            println!("📋 No [[templates]] configured, nothing to sync");
            return Ok(());
        }

        if self.dry_run {
            println!("🔍 DRY RUN: {} template(s) would be written", count);
            for template in catalog.templates() {
                print_template(template);
            }
            return Ok(());
        }

        with_engine(|engine| async move {
            println!("🗂️  Syncing {} template(s)...", count);
            for template in catalog.templates() {
                let stored = engine.store.upsert_template(template).await?;
                print_template(&stored);
            }
            println!("✅ Templates synced");
            Ok(())
        })
        .await
    }
}

pub struct TemplatesListCommand {
    pub request_type: Option<String>,
}

impl TemplatesListCommand {
    pub fn new(request_type: Option<String>) -> Self {
        Self { request_type }
    }

    pub async fn execute(&self) -> Result<()> {
        with_engine(|engine| async move {
            let types: Vec<String> = match &self.request_type {
                Some(code) => vec![code.clone()],
                None => engine
                    .store
                    .request_types()
                    .await?
                    .into_iter()
                    .map(|(code, _)| code)
                    .collect(),
            };

            if types.is_empty() {
                println!("📋 No templates stored. Run 'signoff templates sync' first.");
                return Ok(());
            }

            for code in types {
                let steps = engine.store.templates_for(&code).await?;
                println!("🪜 {} ({} step(s))", code, steps.len());
                for template in &steps {
                    print_template(template);
                }
            }
            Ok(())
        })
        .await
    }
}

fn print_template(template: &StepTemplate) {
    let mut line = format!(
        "   {:>2}. {:<16} {}",
        template.order,
        template.role_code,
        if template.required { "required" } else { "optional" }
    );
    if let Some(actor_id) = template.assignee_actor_id {
        line.push_str(&format!(" actor={}", actor_id));
    }
    if let Some(conditions) = &template.conditions {
        line.push_str(&format!(" when {}", conditions.source()));
    }
    println!("{}", line);
}
