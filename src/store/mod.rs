//! Task store abstractions
//!
//! The orchestrator never holds workflow state in memory. Every write goes
//! through a unit of work obtained from [`WorkflowStore::begin`], which
//! exposes the narrow repositories the engine needs. Committing publishes
//! all writes at once; dropping the transaction discards them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::workflow::types::{
    ActorId, Attachment, AuditAction, AuditEvent, Request, RequestId, RequestStatus, Task,
    TaskStatus, TemplateId,
};

pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Write conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: i64 },

    #[error("Unique constraint violated: {0}")]
    Duplicate(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Fields supplied when a request is first persisted
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub request_type_code: String,
    pub title: Option<String>,
    pub created_by: ActorId,
}

/// Fields supplied when a task is created from its template
#[derive(Debug, Clone)]
pub struct NewTask {
    pub request_id: RequestId,
    pub step_template_id: TemplateId,
    pub order: u32,
    pub assignee_role_code: String,
    pub assignee_actor_id: Option<ActorId>,
}

/// Audit record before the store assigns id and timestamp
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub request_id: Option<RequestId>,
    pub task_id: Option<i64>,
    pub actor_id: Option<ActorId>,
    pub action: AuditAction,
    pub detail: Value,
}

/// Request rows, payloads and attachments
#[async_trait]
pub trait RequestRepository: Send {
    /// Persist a new request in PENDING with `current_order = 1`
    async fn insert_request(&mut self, new: &NewRequest) -> Result<Request, StoreError>;

    /// Load a request and hold it against concurrent writers until commit
    async fn request_for_update(&mut self, id: RequestId) -> Result<Option<Request>, StoreError>;

    /// Write back `request`, provided its `version` still matches the stored one.
    /// Returns the stored copy with the bumped version.
    async fn update_request(&mut self, request: &Request) -> Result<Request, StoreError>;

    async fn insert_payload(&mut self, id: RequestId, payload: &Value) -> Result<(), StoreError>;

    async fn payload(&mut self, id: RequestId) -> Result<Value, StoreError>;

    async fn insert_attachments(
        &mut self,
        id: RequestId,
        attachments: &[Attachment],
    ) -> Result<(), StoreError>;
}

/// Per-step task rows
#[async_trait]
pub trait TaskRepository: Send {
    async fn insert_task(&mut self, new: &NewTask) -> Result<Task, StoreError>;

    /// Tasks of one request in `status`, ascending by order
    async fn tasks_in_status(
        &mut self,
        request_id: RequestId,
        status: TaskStatus,
    ) -> Result<Vec<Task>, StoreError>;

    /// All tasks of one request, ascending by order
    async fn tasks_for_request(&mut self, request_id: RequestId) -> Result<Vec<Task>, StoreError>;

    /// The REQUESTED task at `order` that the actor may act on
    async fn requested_task_for(
        &mut self,
        request_id: RequestId,
        order: u32,
        actor_id: ActorId,
        role_code: &str,
    ) -> Result<Option<Task>, StoreError>;

    /// Write back `task`, provided the stored status is still `expected`
    async fn update_task(&mut self, task: &Task, expected: TaskStatus) -> Result<(), StoreError>;
}

/// Append-only audit trail
#[async_trait]
pub trait AuditSink: Send {
    async fn append(&mut self, event: NewAuditEvent) -> Result<AuditEvent, StoreError>;
}

/// One atomic unit of work
#[async_trait]
pub trait WorkflowTx: RequestRepository + TaskRepository + AuditSink {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Durable home of requests, tasks, payloads and audit events
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, StoreError>;

    async fn request(&self, id: RequestId) -> Result<Option<Request>, StoreError>;

    async fn tasks(&self, request_id: RequestId) -> Result<Vec<Task>, StoreError>;

    async fn payload(&self, request_id: RequestId) -> Result<Option<Value>, StoreError>;

    async fn attachments(&self, request_id: RequestId) -> Result<Vec<Attachment>, StoreError>;

    async fn audit_trail(&self, request_id: RequestId) -> Result<Vec<AuditEvent>, StoreError>;

    /// Open requests with a REQUESTED task for this actor, most recently updated first
    async fn inbox(&self, actor_id: ActorId, role_code: &str) -> Result<Vec<Request>, StoreError>;

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<Request>, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub request_type_code: Option<String>,
}

impl RequestFilter {
    pub fn matches(&self, request: &Request) -> bool {
        self.status.map_or(true, |s| request.status == s)
            && self
                .request_type_code
                .as_deref()
                .map_or(true, |code| request.request_type_code == code)
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
