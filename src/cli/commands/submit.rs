use anyhow::{Context, Result};
use serde_json::Value;
use signoff::workflow::{ActorId, Attachment, Submission};
use std::path::PathBuf;

use crate::cli::commands::{print_loaded_request, with_engine};

pub struct SubmitCommand {
    pub request_type: String,
    pub actor: ActorId,
    pub title: Option<String>,
    pub payload: Option<String>,
    pub payload_file: Option<PathBuf>,
    pub attachments: Vec<String>,
}

impl SubmitCommand {
    pub fn new(request_type: String, actor: ActorId) -> Self {
        Self {
            request_type,
            actor,
            title: None,
            payload: None,
            payload_file: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_payload(mut self, payload: Option<String>, payload_file: Option<PathBuf>) -> Self {
        self.payload = payload;
        self.payload_file = payload_file;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Payload from the inline flag or the file, `{}` when neither is given
    fn read_payload(&self) -> Result<Value> {
        let raw = match (&self.payload, &self.payload_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read payload file {}", path.display()))?,
            (None, None) => return Ok(Value::Object(Default::default())),
        };
        serde_json::from_str(&raw).context("Payload is not valid JSON")
    }

    pub async fn execute(&self) -> Result<()> {
        let payload = self.read_payload()?;
        let mut submission = Submission::new(&self.request_type, self.actor, payload);
        if let Some(title) = &self.title {
            submission = submission.with_title(title);
        }
        for file_ref in &self.attachments {
            submission = submission.with_attachment(Attachment::new(file_ref));
        }

        with_engine(|engine| async move {
            let loaded = engine.orchestrator.instantiate(submission).await?;
            println!("📝 Submitted request #{}", loaded.request.id);
            println!();
            print_loaded_request(&loaded);
            println!();
            match loaded.active_task() {
                Some(task) => println!(
                    "👉 Awaiting signature from {} at step {}",
                    task.assignee_role_code, task.order
                ),
                None => println!("🎉 No signature needed, request is {}", loaded.request.status),
            }
            Ok(())
        })
        .await
    }
}
