use anyhow::Result;
use signoff::workflow::RequestId;

use crate::cli::commands::{print_json, print_loaded_request, with_engine};

pub struct ShowCommand {
    pub request_id: RequestId,
    pub json: bool,
}

impl ShowCommand {
    pub fn new(request_id: RequestId, json: bool) -> Self {
        Self { request_id, json }
    }

    pub async fn execute(&self) -> Result<()> {
        with_engine(|engine| async move {
            let loaded = engine.orchestrator.request(self.request_id).await?;
            if self.json {
                return print_json(&loaded);
            }
            print_loaded_request(&loaded);
            Ok(())
        })
        .await
    }
}

pub struct HistoryCommand {
    pub request_id: RequestId,
    pub json: bool,
}

impl HistoryCommand {
    pub fn new(request_id: RequestId, json: bool) -> Self {
        Self { request_id, json }
    }

    pub async fn execute(&self) -> Result<()> {
        with_engine(|engine| async move {
            let events = engine.orchestrator.history(self.request_id).await?;
            if self.json {
                return print_json(&events);
            }

            println!("🧾 Audit trail of request #{}", self.request_id);
            for event in &events {
                let actor = event
                    .actor_id
                    .map(|id| format!("actor {}", id))
                    .unwrap_or_else(|| "system".to_string());
                println!(
                    "  {} {:<24} {:<10} {}",
                    event.created_at.format("%Y-%m-%d %H:%M:%S"),
                    event.action.as_str(),
                    actor,
                    event.detail
                );
            }
            Ok(())
        })
        .await
    }
}
