use thiserror::Error;

use super::types::{RequestId, RequestStatus, TaskEvent, TaskStatus};
use crate::store::StoreError;

/// An edge that is not part of the task or request state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Task cannot handle {event:?} while {from}")]
    Task { from: TaskStatus, event: TaskEvent },
    #[error("Request cannot move from {from} to {to}")]
    Request { from: RequestStatus, to: RequestStatus },
}

/// Invalid administrator configuration for a request type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Step order must be positive (request type {request_type_code})")]
    ZeroOrder { request_type_code: String },
    #[error("Duplicate step order {order} for request type {request_type_code}")]
    DuplicateOrder {
        request_type_code: String,
        order: u32,
    },
    #[error("Duplicate step template id {id}")]
    DuplicateId { id: i64 },
}

/// Errors surfaced to callers of the orchestrator
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("No step templates configured for request type {request_type_code}")]
    RequestTypeUnknown { request_type_code: String },

    #[error("Request not found: {request_id}")]
    RequestNotFound { request_id: RequestId },

    #[error("No permission or not your turn on request {request_id}")]
    NotYourTurn { request_id: RequestId },

    #[error("Request {request_id} was modified concurrently")]
    ConcurrentModification { request_id: RequestId },

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Invalid step template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::RequestTypeUnknown { .. } => "REQUEST_TYPE_UNKNOWN",
            WorkflowError::RequestNotFound { .. } => "REQUEST_NOT_FOUND",
            WorkflowError::NotYourTurn { .. } => "NO_PERMISSION_OR_NOT_YOUR_TURN",
            WorkflowError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            WorkflowError::InvalidTransition(_) => "INVALID_TRANSITION",
            WorkflowError::InvalidTemplate(_) => "INVALID_TEMPLATE",
            WorkflowError::Store(_) => "STORE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
