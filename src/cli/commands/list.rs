use anyhow::{anyhow, Result};
use signoff::workflow::RequestStatus;
use signoff::RequestFilter;

use crate::cli::commands::{print_json, print_request_line, with_engine};

pub struct ListCommand {
    pub filter: RequestFilter,
    pub json: bool,
}

impl ListCommand {
    pub fn new(status: Option<&str>, request_type: Option<String>, json: bool) -> Result<Self> {
        let status = status
            .map(|s| s.parse::<RequestStatus>().map_err(|e| anyhow!(e)))
            .transpose()?;
        Ok(Self {
            filter: RequestFilter {
                status,
                request_type_code: request_type,
            },
            json,
        })
    }

    pub async fn execute(&self) -> Result<()> {
        with_engine(|engine| async move {
            let requests = engine.orchestrator.list_requests(&self.filter).await?;
            if self.json {
                return print_json(&requests);
            }

            if requests.is_empty() {
                println!("📋 No matching requests");
                return Ok(());
            }
            println!("📋 {} request(s):", requests.len());
            for request in &requests {
                print_request_line(request);
            }
            Ok(())
        })
        .await
    }
}
