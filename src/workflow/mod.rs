//! Conditional multi-step approval workflows
//!
//! A request type is configured as an ordered pipeline of step templates.
//! Submitting a request instantiates one task per step; the
//! [`WorkflowOrchestrator`] then walks the pipeline, requesting a signature
//! from each mandatory step's role and skipping steps whose conditions do
//! not hold for the request payload.

pub mod conditions;
pub mod errors;
pub mod orchestrator;
pub mod templates;
pub mod types;

pub use conditions::{evaluate, AssignmentContext, Predicate, RoleRoster, RuleSet};
pub use errors::{Result, TemplateError, TransitionError, WorkflowError};
pub use orchestrator::WorkflowOrchestrator;
pub use templates::{CachedTemplateReader, StepTemplateReader, TemplateCatalog};
pub use types::{
    ActorId, Attachment, AuditAction, AuditEvent, AuditEventId, Decision, LoadedRequest, Request,
    RequestId, RequestStatus, StepTemplate, Submission, Task, TaskEvent, TaskId, TaskStatus,
    TemplateId,
};
