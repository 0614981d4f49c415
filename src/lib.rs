// signoff - conditional multi-step approval workflows
// This exposes the engine, its stores and the ambient setup for embedding and testing

pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod observability;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use config::{config, init_config, SignoffConfig};
#[cfg(feature = "database")]
pub use database::DatabaseManager;
pub use observability::{create_workflow_span, workflow_metrics, OperationTimer, WorkflowMetrics};
pub use store::{MemoryStore, RequestFilter, StoreError, WorkflowStore, WorkflowTx};
#[cfg(feature = "database")]
pub use store::SqliteStore;
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use workflow::{
    Attachment, AuditAction, AuditEvent, CachedTemplateReader, Decision, LoadedRequest, Request,
    RequestStatus, RoleRoster, RuleSet, StepTemplate, StepTemplateReader, Submission, Task,
    TaskStatus, TemplateCatalog, WorkflowError, WorkflowOrchestrator,
};
