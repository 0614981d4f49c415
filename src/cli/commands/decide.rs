use anyhow::Result;
use signoff::workflow::{ActorId, Decision, RequestId, RequestStatus};

use crate::cli::commands::with_engine;

pub struct ApproveCommand {
    pub decision: Decision,
}

impl ApproveCommand {
    pub fn new(request_id: RequestId, actor: ActorId, role: &str) -> Self {
        Self {
            decision: Decision::new(request_id, actor, role),
        }
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        if let Some(signature) = signature {
            self.decision = self.decision.with_signature(&signature);
        }
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        if let Some(comment) = comment {
            self.decision = self.decision.with_comment(&comment);
        }
        self
    }

    pub async fn execute(&self) -> Result<()> {
        let decision = self.decision.clone();
        with_engine(|engine| async move {
            let request = engine.orchestrator.approve(decision).await?;
            println!("✅ Signed request #{}", request.id);
            if request.status == RequestStatus::Approved {
                println!("🎉 All steps complete, request is APPROVED");
            } else {
                let loaded = engine.orchestrator.request(request.id).await?;
                if let Some(task) = loaded.active_task() {
                    println!(
                        "👉 Next: {} at step {}",
                        task.assignee_role_code, task.order
                    );
                }
            }
            Ok(())
        })
        .await
    }
}

pub struct RejectCommand {
    pub decision: Decision,
}

impl RejectCommand {
    pub fn new(request_id: RequestId, actor: ActorId, role: &str) -> Self {
        Self {
            decision: Decision::new(request_id, actor, role),
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        if let Some(comment) = comment {
            self.decision = self.decision.with_comment(&comment);
        }
        self
    }

    pub async fn execute(&self) -> Result<()> {
        let decision = self.decision.clone();
        with_engine(|engine| async move {
            let request = engine.orchestrator.reject(decision).await?;
            println!("❌ Rejected request #{} at step {}", request.id, request.current_order);
            Ok(())
        })
        .await
    }
}
