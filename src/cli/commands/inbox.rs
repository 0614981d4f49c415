use anyhow::Result;
use signoff::workflow::ActorId;

use crate::cli::commands::{print_json, print_request_line, with_engine};

pub struct InboxCommand {
    pub actor: ActorId,
    pub role: String,
    pub json: bool,
}

impl InboxCommand {
    pub fn new(actor: ActorId, role: String) -> Self {
        Self {
            actor,
            role,
            json: false,
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub async fn execute(&self) -> Result<()> {
        with_engine(|engine| async move {
            let requests = engine.orchestrator.inbox(self.actor, &self.role).await?;
            if self.json {
                return print_json(&requests);
            }

            if requests.is_empty() {
                println!("📭 Nothing awaits your signature");
                return Ok(());
            }
            println!("📥 {} request(s) awaiting your signature:", requests.len());
            for request in &requests {
                print_request_line(request);
            }
            Ok(())
        })
        .await
    }
}
