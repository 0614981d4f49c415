//! Shared pipelines and helpers for workflow tests
#![allow(dead_code)]

use serde_json::json;
use signoff::store::MemoryStore;
use signoff::workflow::{
    AuditAction, RequestId, RuleSet, StepTemplate, TemplateCatalog, WorkflowOrchestrator,
};
use signoff::WorkflowStore;
use std::sync::Arc;

pub const STAFF: i64 = 100;
pub const TEAM_LEAD: i64 = 200;
pub const CEO: i64 = 300;

/// STAFF (required) -> TEAM_LEAD (only when amount > 100000) -> CEO (required)
pub fn purchase_templates() -> Vec<StepTemplate> {
    vec![
        StepTemplate::new(1, "PURCHASE", 1, "STAFF"),
        StepTemplate::new(2, "PURCHASE", 2, "TEAM_LEAD")
            .with_required(false)
            .with_conditions(RuleSet::parse(json!({ "amount": { "gt": 100000 } }))),
        StepTemplate::new(3, "PURCHASE", 3, "CEO"),
    ]
}

/// Orchestrator over a fresh in-memory store
pub fn memory_engine(templates: Vec<StepTemplate>) -> (Arc<WorkflowOrchestrator>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let catalog = TemplateCatalog::new(templates).expect("valid templates");
    let engine = WorkflowOrchestrator::new(store.clone(), Arc::new(catalog));
    (Arc::new(engine), store)
}

/// Audit actions of one request in write order
pub async fn audit_actions(store: &dyn WorkflowStore, request_id: RequestId) -> Vec<AuditAction> {
    store
        .audit_trail(request_id)
        .await
        .expect("audit trail")
        .into_iter()
        .map(|event| event.action)
        .collect()
}
