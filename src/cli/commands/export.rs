use anyhow::Result;
use signoff::workflow::{ActorId, RequestId};

use crate::cli::commands::with_engine;

pub struct ExportCommand {
    pub request_id: RequestId,
    pub actor: ActorId,
}

impl ExportCommand {
    pub fn new(request_id: RequestId, actor: ActorId) -> Self {
        Self { request_id, actor }
    }

    pub async fn execute(&self) -> Result<()> {
        with_engine(|engine| async move {
            let request = engine
                .orchestrator
                .mark_exported(self.request_id, self.actor)
                .await?;
            println!("📤 Request #{} marked {}", request.id, request.status);
            Ok(())
        })
        .await
    }
}
