// Workflow data model - requests, tasks, step templates and audit events
// Records reference each other by integer id only; the store owns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::conditions::RuleSet;
use super::errors::TransitionError;

pub type RequestId = i64;
pub type TaskId = i64;
pub type TemplateId = i64;
pub type AuditEventId = i64;
pub type ActorId = i64;

/// Lifecycle of one workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Rejected,
    Approved,
    Exported,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Exported => "EXPORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Rejected | RequestStatus::Approved | RequestStatus::Exported
        )
    }

    /// Requests that can still show up in someone's inbox
    pub fn is_open(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::InProgress)
    }

    /// Validate a request-level status change
    pub fn transition(self, to: RequestStatus) -> Result<RequestStatus, TransitionError> {
        use RequestStatus::*;

        match (self, to) {
            (Pending, InProgress)
            | (Pending, Approved)
            | (InProgress, Approved)
            | (InProgress, Rejected)
            | (Approved, Exported) => Ok(to),
            _ => Err(TransitionError::Request { from: self, to }),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RequestStatus::Pending),
            "IN_PROGRESS" => Ok(RequestStatus::InProgress),
            "REJECTED" => Ok(RequestStatus::Rejected),
            "APPROVED" => Ok(RequestStatus::Approved),
            "EXPORTED" => Ok(RequestStatus::Exported),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// Status of a single sign-off step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Requested,
    Approved,
    Rejected,
    AutoSkipped,
}

/// Events that move a task through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    Request,
    Approve,
    Reject,
    AutoSkip,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Requested => "REQUESTED",
            TaskStatus::Approved => "APPROVED",
            TaskStatus::Rejected => "REJECTED",
            TaskStatus::AutoSkipped => "AUTO_SKIPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Approved | TaskStatus::Rejected | TaskStatus::AutoSkipped
        )
    }

    /// WAITING -> REQUESTED -> {APPROVED | REJECTED}, or WAITING -> AUTO_SKIPPED.
    pub fn apply(self, event: TaskEvent) -> Result<TaskStatus, TransitionError> {
        match (self, event) {
            (TaskStatus::Waiting, TaskEvent::Request) => Ok(TaskStatus::Requested),
            (TaskStatus::Waiting, TaskEvent::AutoSkip) => Ok(TaskStatus::AutoSkipped),
            (TaskStatus::Requested, TaskEvent::Approve) => Ok(TaskStatus::Approved),
            (TaskStatus::Requested, TaskEvent::Reject) => Ok(TaskStatus::Rejected),
            (from, event) => Err(TransitionError::Task { from, event }),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Ok(TaskStatus::Waiting),
            "REQUESTED" => Ok(TaskStatus::Requested),
            "APPROVED" => Ok(TaskStatus::Approved),
            "REJECTED" => Ok(TaskStatus::Rejected),
            "AUTO_SKIPPED" => Ok(TaskStatus::AutoSkipped),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// One workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub request_type_code: String,
    pub title: Option<String>,
    pub created_by: ActorId,
    pub status: RequestStatus,
    /// Order of the step awaiting action; past-the-end once approved
    pub current_order: u32,
    /// Bumped on every persisted change, used for conflict detection
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Administrator-configured definition of one ordered step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTemplate {
    #[serde(default)]
    pub id: TemplateId,
    pub request_type_code: String,
    pub order: u32,
    pub role_code: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub conditions: Option<RuleSet>,
    /// Grouping key for concurrent steps; carried but not evaluated
    #[serde(default)]
    pub parallel_group_id: Option<String>,
    /// Specific actor expected to sign, in addition to anyone holding the role
    #[serde(default)]
    pub assignee_actor_id: Option<ActorId>,
}

fn default_required() -> bool {
    true
}

impl StepTemplate {
    pub fn new(id: TemplateId, request_type_code: &str, order: u32, role_code: &str) -> Self {
        Self {
            id,
            request_type_code: request_type_code.to_string(),
            order,
            role_code: role_code.to_string(),
            required: true,
            conditions: None,
            parallel_group_id: None,
            assignee_actor_id: None,
        }
    }

    pub fn with_conditions(mut self, conditions: RuleSet) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_assignee(mut self, actor_id: ActorId) -> Self {
        self.assignee_actor_id = Some(actor_id);
        self
    }

    pub fn with_parallel_group(mut self, group: &str) -> Self {
        self.parallel_group_id = Some(group.to_string());
        self
    }
}

/// Runtime instance of one step template for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub request_id: RequestId,
    pub step_template_id: TemplateId,
    pub order: u32,
    pub assignee_role_code: String,
    pub assignee_actor_id: Option<ActorId>,
    pub status: TaskStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub signature_ref: Option<String>,
    pub comment: Option<String>,
}

impl Task {
    /// Whether the given actor may act on this task
    pub fn is_assigned_to(&self, actor_id: ActorId, role_code: &str) -> bool {
        self.assignee_role_code == role_code || self.assignee_actor_id == Some(actor_id)
    }
}

/// Opaque file reference attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_ref: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Attachment {
    pub fn new(file_ref: &str) -> Self {
        Self {
            file_ref: file_ref.to_string(),
            file_name: None,
        }
    }
}

/// Fixed audit vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    TaskRequested,
    TaskApproved,
    TaskRejected,
    AutoSkipped,
    RequestStatusChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TaskRequested => "TASK_REQUESTED",
            AuditAction::TaskApproved => "TASK_APPROVED",
            AuditAction::TaskRejected => "TASK_REJECTED",
            AuditAction::AutoSkipped => "AUTO_SKIPPED",
            AuditAction::RequestStatusChanged => "REQUEST_STATUS_CHANGED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TASK_REQUESTED" => Ok(AuditAction::TaskRequested),
            "TASK_APPROVED" => Ok(AuditAction::TaskApproved),
            "TASK_REJECTED" => Ok(AuditAction::TaskRejected),
            "AUTO_SKIPPED" => Ok(AuditAction::AutoSkipped),
            "REQUEST_STATUS_CHANGED" => Ok(AuditAction::RequestStatusChanged),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// Immutable record of one state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub request_id: Option<RequestId>,
    pub task_id: Option<TaskId>,
    /// `None` for system actions such as auto-skip
    pub actor_id: Option<ActorId>,
    pub action: AuditAction,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A request together with everything it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedRequest {
    pub request: Request,
    pub tasks: Vec<Task>,
    pub attachments: Vec<Attachment>,
    pub payload: serde_json::Value,
}

impl LoadedRequest {
    /// The task currently awaiting a signature, if any
    pub fn active_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Requested)
    }

    pub fn task_at(&self, order: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.order == order)
    }
}

/// Input to `WorkflowOrchestrator::instantiate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub request_type_code: String,
    pub title: Option<String>,
    pub payload: serde_json::Value,
    pub created_by: ActorId,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Submission {
    pub fn new(request_type_code: &str, created_by: ActorId, payload: serde_json::Value) -> Self {
        Self {
            request_type_code: request_type_code.to_string(),
            title: None,
            payload,
            created_by,
            attachments: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// An approve or reject action by one actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub request_id: RequestId,
    pub actor_id: ActorId,
    pub actor_role_code: String,
    #[serde(default)]
    pub signature_ref: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Decision {
    pub fn new(request_id: RequestId, actor_id: ActorId, actor_role_code: &str) -> Self {
        Self {
            request_id,
            actor_id,
            actor_role_code: actor_role_code.to_string(),
            signature_ref: None,
            comment: None,
        }
    }

    pub fn with_signature(mut self, signature_ref: &str) -> Self {
        self.signature_ref = Some(signature_ref.to_string());
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle_edges() {
        assert_eq!(
            TaskStatus::Waiting.apply(TaskEvent::Request).unwrap(),
            TaskStatus::Requested
        );
        assert_eq!(
            TaskStatus::Waiting.apply(TaskEvent::AutoSkip).unwrap(),
            TaskStatus::AutoSkipped
        );
        assert_eq!(
            TaskStatus::Requested.apply(TaskEvent::Approve).unwrap(),
            TaskStatus::Approved
        );
        assert_eq!(
            TaskStatus::Requested.apply(TaskEvent::Reject).unwrap(),
            TaskStatus::Rejected
        );
    }

    #[test]
    fn test_illegal_task_transitions_rejected() {
        assert!(TaskStatus::Waiting.apply(TaskEvent::Approve).is_err());
        assert!(TaskStatus::Requested.apply(TaskEvent::AutoSkip).is_err());
        assert!(TaskStatus::Requested.apply(TaskEvent::Request).is_err());

        for terminal in [TaskStatus::Approved, TaskStatus::Rejected, TaskStatus::AutoSkipped] {
            assert!(terminal.is_terminal());
            for event in [TaskEvent::Request, TaskEvent::Approve, TaskEvent::Reject, TaskEvent::AutoSkip] {
                assert!(terminal.apply(event).is_err(), "{terminal} accepted {event:?}");
            }
        }
    }

    #[test]
    fn test_request_status_transitions() {
        use RequestStatus::*;

        assert!(Pending.transition(InProgress).is_ok());
        assert!(Pending.transition(Approved).is_ok());
        assert!(InProgress.transition(Rejected).is_ok());
        assert!(Approved.transition(Exported).is_ok());

        assert!(Rejected.transition(Approved).is_err());
        assert!(Approved.transition(Rejected).is_err());
        assert!(Exported.transition(Approved).is_err());
        assert!(Pending.transition(Exported).is_err());
    }

    #[test]
    fn test_status_strings_round_trip() {
        assert_eq!("IN_PROGRESS".parse::<RequestStatus>().unwrap(), RequestStatus::InProgress);
        assert_eq!("auto_skipped".parse::<TaskStatus>().unwrap(), TaskStatus::AutoSkipped);
        assert_eq!(
            serde_json::to_value(AuditAction::RequestStatusChanged).unwrap(),
            serde_json::json!("REQUEST_STATUS_CHANGED")
        );
        assert!("DONE".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn test_task_assignment_matches_role_or_actor() {
        let task = Task {
            id: 1,
            request_id: 1,
            step_template_id: 1,
            order: 1,
            assignee_role_code: "CEO".to_string(),
            assignee_actor_id: Some(42),
            status: TaskStatus::Requested,
            signed_at: None,
            signature_ref: None,
            comment: None,
        };

        assert!(task.is_assigned_to(7, "CEO"));
        assert!(task.is_assigned_to(42, "STAFF"));
        assert!(!task.is_assigned_to(7, "STAFF"));
    }

    #[test]
    fn test_step_template_defaults_required() {
        let template: StepTemplate = serde_json::from_value(serde_json::json!({
            "id": 3,
            "request_type_code": "PURCHASE",
            "order": 1,
            "role_code": "STAFF"
        }))
        .unwrap();

        assert!(template.required);
        assert!(template.conditions.is_none());
        assert!(template.parallel_group_id.is_none());
    }
}
