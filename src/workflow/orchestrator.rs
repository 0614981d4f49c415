//! Workflow orchestration
//!
//! [`WorkflowOrchestrator`] instantiates a request's task pipeline from its
//! step templates and advances it one step at a time. It keeps no state of
//! its own: every call opens a unit of work on the task store, and either
//! all of its writes (task and request changes plus their audit events)
//! commit together or none do.
//!
//! At most one task per request is ever `REQUESTED`, and its order always
//! equals the request's `current_order`. Approve and reject re-read both
//! under the store's write lock, so a caller that loses a race finds no
//! matching task and gets `NO_PERMISSION_OR_NOT_YOUR_TURN`.
//!
//! Step templates are resolved before the unit of work opens. A store that
//! also serves templates may share one connection pool with its
//! transactions, and a transaction waiting on a second connection would
//! hold the write lock until the pool times out.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use super::conditions::{evaluate, AssignmentContext};
use super::errors::{Result, WorkflowError};
use super::templates::StepTemplateReader;
use super::types::{
    ActorId, AuditAction, AuditEvent, Decision, LoadedRequest, Request, RequestId,
    RequestStatus, StepTemplate, Submission, Task, TaskEvent, TaskStatus, TemplateId,
};
use crate::observability::{create_workflow_span, workflow_metrics, OperationTimer};
use crate::store::{
    NewAuditEvent, NewRequest, NewTask, RequestFilter, StoreError, WorkflowStore, WorkflowTx,
};
use crate::telemetry::generate_correlation_id;

const AUTO_SKIP_COMMENT: &str = "auto-skip";

/// Step templates of one pipeline, keyed by id
type StepRules = HashMap<TemplateId, StepTemplate>;

pub struct WorkflowOrchestrator {
    store: Arc<dyn WorkflowStore>,
    templates: Arc<dyn StepTemplateReader>,
    assignments: Option<Arc<dyn AssignmentContext>>,
}

impl WorkflowOrchestrator {
    pub fn new(store: Arc<dyn WorkflowStore>, templates: Arc<dyn StepTemplateReader>) -> Self {
        Self {
            store,
            templates,
            assignments: None,
        }
    }

    /// Supply the role directory consulted by role-presence conditions
    pub fn with_assignments(mut self, assignments: Arc<dyn AssignmentContext>) -> Self {
        self.assignments = Some(assignments);
        self
    }

    /// Create a request with one WAITING task per step template, then advance it.
    pub async fn instantiate(&self, submission: Submission) -> Result<LoadedRequest> {
        let span = create_workflow_span("instantiate", &generate_correlation_id());
        self.run_instantiate(submission).instrument(span).await
    }

    /// Resume the pipeline of `request_id` at its current order.
    ///
    /// A no-op when the request is terminal or already has an active task.
    pub async fn advance(&self, request_id: RequestId, acting_actor: ActorId) -> Result<Request> {
        let span = create_workflow_span("advance", &generate_correlation_id());
        self.run_advance(request_id, acting_actor).instrument(span).await
    }

    /// Sign the active step and move the pipeline forward.
    pub async fn approve(&self, decision: Decision) -> Result<Request> {
        let span = create_workflow_span("approve", &generate_correlation_id());
        self.run_approve(decision).instrument(span).await
    }

    /// Reject the active step; the request is finished and no later step opens.
    pub async fn reject(&self, decision: Decision) -> Result<Request> {
        let span = create_workflow_span("reject", &generate_correlation_id());
        self.run_reject(decision).instrument(span).await
    }

    /// Hand an approved request over to downstream processing.
    pub async fn mark_exported(&self, request_id: RequestId, actor_id: ActorId) -> Result<Request> {
        let span = create_workflow_span("export", &generate_correlation_id());
        self.run_export(request_id, actor_id).instrument(span).await
    }

    /// Open requests waiting on this actor, most recently updated first
    pub async fn inbox(&self, actor_id: ActorId, role_code: &str) -> Result<Vec<Request>> {
        Ok(self.store.inbox(actor_id, role_code).await?)
    }

    /// A request with its tasks, attachments and payload
    pub async fn request(&self, request_id: RequestId) -> Result<LoadedRequest> {
        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or(WorkflowError::RequestNotFound { request_id })?;

        Ok(LoadedRequest {
            tasks: self.store.tasks(request_id).await?,
            attachments: self.store.attachments(request_id).await?,
            payload: self.store.payload(request_id).await?.unwrap_or(Value::Null),
            request,
        })
    }

    /// Audit trail of one request in write order
    pub async fn history(&self, request_id: RequestId) -> Result<Vec<AuditEvent>> {
        if self.store.request(request_id).await?.is_none() {
            return Err(WorkflowError::RequestNotFound { request_id });
        }
        Ok(self.store.audit_trail(request_id).await?)
    }

    pub async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<Request>> {
        Ok(self.store.list_requests(filter).await?)
    }

    async fn run_instantiate(&self, submission: Submission) -> Result<LoadedRequest> {
        let timer = OperationTimer::new("instantiate");
        let templates = self
            .templates
            .templates_for(&submission.request_type_code)
            .await?;
        if templates.is_empty() {
            warn!(request_type = %submission.request_type_code, "No step templates configured");
            return Err(WorkflowError::RequestTypeUnknown {
                request_type_code: submission.request_type_code,
            });
        }

        let ids: Vec<TemplateId> = templates.iter().map(|t| t.id).collect();
        let rules = self.step_rules(ids).await?;

        let mut tx = self.store.begin().await?;
        let request = tx
            .insert_request(&NewRequest {
                request_type_code: submission.request_type_code.clone(),
                title: submission.title.clone(),
                created_by: submission.created_by,
            })
            .await?;
        tx.insert_payload(request.id, &submission.payload).await?;
        tx.insert_attachments(request.id, &submission.attachments)
            .await?;

        for template in &templates {
            tx.insert_task(&NewTask {
                request_id: request.id,
                step_template_id: template.id,
                order: template.order,
                assignee_role_code: template.role_code.clone(),
                assignee_actor_id: template.assignee_actor_id,
            })
            .await?;
        }

        workflow_metrics().record_request_created();
        info!(
            request_id = request.id,
            request_type = %request.request_type_code,
            steps = templates.len(),
            actor_id = submission.created_by,
            "Request created"
        );

        let request = self
            .advance_in(
                tx.as_mut(),
                &rules,
                request,
                &submission.payload,
                submission.created_by,
            )
            .await?;
        let tasks = tx.tasks_for_request(request.id).await?;
        tx.commit().await?;
        timer.finish();

        Ok(LoadedRequest {
            request,
            tasks,
            attachments: submission.attachments,
            payload: submission.payload,
        })
    }

    async fn run_advance(&self, request_id: RequestId, acting_actor: ActorId) -> Result<Request> {
        let rules = self.rules_for_request(request_id).await?;
        let mut tx = self.store.begin().await?;
        let request = tx
            .request_for_update(request_id)
            .await?
            .ok_or(WorkflowError::RequestNotFound { request_id })?;
        let payload = tx.payload(request_id).await?;
        let request = self
            .advance_in(tx.as_mut(), &rules, request, &payload, acting_actor)
            .await?;
        tx.commit().await?;
        Ok(request)
    }

    async fn run_approve(&self, decision: Decision) -> Result<Request> {
        let timer = OperationTimer::new("approve");
        let rules = self.rules_for_request(decision.request_id).await?;
        let mut tx = self.store.begin().await?;
        let (request, mut task) = self.claim_active_task(tx.as_mut(), &decision).await?;

        task.status = task.status.apply(TaskEvent::Approve)?;
        task.signed_at = Some(chrono::Utc::now());
        task.signature_ref = decision.signature_ref.clone();
        task.comment = decision.comment.clone();
        self.write_task(tx.as_mut(), &task, TaskStatus::Requested, decision.request_id)
            .await?;

        self.audit(
            tx.as_mut(),
            &request,
            Some(&task),
            Some(decision.actor_id),
            AuditAction::TaskApproved,
            json!({
                "order": task.order,
                "role": task.assignee_role_code,
                "actor_role": decision.actor_role_code,
                "signature_ref": task.signature_ref,
                "comment": task.comment,
            }),
        )
        .await?;

        workflow_metrics().record_approval();
        info!(
            request_id = request.id,
            task_id = task.id,
            order = task.order,
            actor_id = decision.actor_id,
            "Task approved"
        );

        let payload = tx.payload(request.id).await?;
        let request = self
            .advance_in(tx.as_mut(), &rules, request, &payload, decision.actor_id)
            .await?;
        tx.commit().await?;
        timer.finish();
        Ok(request)
    }

    async fn run_reject(&self, decision: Decision) -> Result<Request> {
        let timer = OperationTimer::new("reject");
        let mut tx = self.store.begin().await?;
        let (mut request, mut task) = self.claim_active_task(tx.as_mut(), &decision).await?;

        task.status = task.status.apply(TaskEvent::Reject)?;
        task.signed_at = Some(chrono::Utc::now());
        task.comment = decision.comment.clone();
        self.write_task(tx.as_mut(), &task, TaskStatus::Requested, decision.request_id)
            .await?;

        let previous = request.status;
        request.status = previous.transition(RequestStatus::Rejected)?;
        let request = self.write_request(tx.as_mut(), &request).await?;

        self.audit(
            tx.as_mut(),
            &request,
            Some(&task),
            Some(decision.actor_id),
            AuditAction::TaskRejected,
            json!({
                "order": task.order,
                "role": task.assignee_role_code,
                "actor_role": decision.actor_role_code,
                "comment": task.comment,
                "previous_status": previous,
                "status": request.status,
            }),
        )
        .await?;

        tx.commit().await?;
        workflow_metrics().record_rejection();
        info!(
            request_id = request.id,
            task_id = task.id,
            order = task.order,
            actor_id = decision.actor_id,
            "Request rejected"
        );
        timer.finish();
        Ok(request)
    }

    async fn run_export(&self, request_id: RequestId, actor_id: ActorId) -> Result<Request> {
        let mut tx = self.store.begin().await?;
        let mut request = tx
            .request_for_update(request_id)
            .await?
            .ok_or(WorkflowError::RequestNotFound { request_id })?;

        let previous = request.status;
        request.status = previous.transition(RequestStatus::Exported)?;
        let request = self.write_request(tx.as_mut(), &request).await?;
        self.audit(
            tx.as_mut(),
            &request,
            None,
            Some(actor_id),
            AuditAction::RequestStatusChanged,
            json!({ "previous_status": previous, "status": request.status }),
        )
        .await?;
        tx.commit().await?;

        info!(request_id, actor_id, "Request exported");
        Ok(request)
    }

    /// Walk WAITING tasks in order: request the first mandatory one, auto-skip
    /// the rest on the way, and approve the request if none is mandatory.
    async fn advance_in(
        &self,
        tx: &mut dyn WorkflowTx,
        rules: &StepRules,
        mut request: Request,
        payload: &Value,
        acting_actor: ActorId,
    ) -> Result<Request> {
        if request.status.is_terminal() {
            return Ok(request);
        }
        if !tx
            .tasks_in_status(request.id, TaskStatus::Requested)
            .await?
            .is_empty()
        {
            return Ok(request);
        }

        let waiting = tx.tasks_in_status(request.id, TaskStatus::Waiting).await?;
        for mut task in waiting {
            if self.signature_required(rules, &task, payload) {
                task.status = task.status.apply(TaskEvent::Request)?;
                self.write_task(tx, &task, TaskStatus::Waiting, request.id)
                    .await?;

                let previous = request.status;
                if previous != RequestStatus::InProgress {
                    request.status = previous.transition(RequestStatus::InProgress)?;
                }
                request.current_order = task.order;
                request = self.write_request(tx, &request).await?;

                self.audit(
                    tx,
                    &request,
                    Some(&task),
                    Some(acting_actor),
                    AuditAction::TaskRequested,
                    json!({
                        "order": task.order,
                        "role": task.assignee_role_code,
                        "assignee_actor_id": task.assignee_actor_id,
                        "previous_status": previous,
                        "status": request.status,
                    }),
                )
                .await?;

                workflow_metrics().record_step_requested();
                info!(
                    request_id = request.id,
                    task_id = task.id,
                    order = task.order,
                    role = %task.assignee_role_code,
                    "Signature requested"
                );
                return Ok(request);
            }

            task.status = task.status.apply(TaskEvent::AutoSkip)?;
            task.signed_at = Some(chrono::Utc::now());
            task.comment = Some(AUTO_SKIP_COMMENT.to_string());
            self.write_task(tx, &task, TaskStatus::Waiting, request.id)
                .await?;
            self.audit(
                tx,
                &request,
                Some(&task),
                None,
                AuditAction::AutoSkipped,
                json!({
                    "order": task.order,
                    "role": task.assignee_role_code,
                    "reason": "conditions not met",
                }),
            )
            .await?;

            workflow_metrics().record_step_skipped();
            info!(
                request_id = request.id,
                task_id = task.id,
                order = task.order,
                "Step auto-skipped"
            );
        }

        let previous = request.status;
        let last_order = tx
            .tasks_for_request(request.id)
            .await?
            .iter()
            .map(|t| t.order)
            .max()
            .unwrap_or(0);
        request.status = previous.transition(RequestStatus::Approved)?;
        request.current_order = last_order + 1;
        request = self.write_request(tx, &request).await?;

        self.audit(
            tx,
            &request,
            None,
            Some(acting_actor),
            AuditAction::RequestStatusChanged,
            json!({ "previous_status": previous, "status": request.status }),
        )
        .await?;

        info!(request_id = request.id, "Request approved");
        Ok(request)
    }

    /// Resolve the templates behind `ids`; ids the reader no longer knows are left out.
    async fn step_rules(&self, ids: impl IntoIterator<Item = TemplateId>) -> Result<StepRules> {
        let mut rules = StepRules::new();
        for id in ids {
            if rules.contains_key(&id) {
                continue;
            }
            if let Some(template) = self.templates.template(id).await? {
                rules.insert(id, template);
            }
        }
        Ok(rules)
    }

    /// Templates behind the tasks of an existing request. Task rows never
    /// change their template, so reading them outside the unit of work is safe.
    async fn rules_for_request(&self, request_id: RequestId) -> Result<StepRules> {
        let tasks = self.store.tasks(request_id).await?;
        let ids: Vec<TemplateId> = tasks.iter().map(|t| t.step_template_id).collect();
        self.step_rules(ids)
            .await
    }

    fn signature_required(&self, rules: &StepRules, task: &Task, payload: &Value) -> bool {
        let Some(template) = rules.get(&task.step_template_id) else {
            warn!(
                task_id = task.id,
                template_id = task.step_template_id,
                "Step template missing, requiring signature"
            );
            return true;
        };

        evaluate(
            template.required,
            template.conditions.as_ref(),
            payload,
            self.assignments.as_deref(),
        )
    }

    /// Load the request and the REQUESTED task at its current order that the
    /// deciding actor may act on.
    async fn claim_active_task(
        &self,
        tx: &mut dyn WorkflowTx,
        decision: &Decision,
    ) -> Result<(Request, Task)> {
        let request_id = decision.request_id;
        let request = tx
            .request_for_update(request_id)
            .await?
            .ok_or(WorkflowError::RequestNotFound { request_id })?;

        let task = tx
            .requested_task_for(
                request_id,
                request.current_order,
                decision.actor_id,
                &decision.actor_role_code,
            )
            .await?;

        match task {
            Some(task) if !request.status.is_terminal() => Ok((request, task)),
            _ => {
                warn!(
                    request_id,
                    actor_id = decision.actor_id,
                    role = %decision.actor_role_code,
                    current_order = request.current_order,
                    "No requested task for actor"
                );
                Err(WorkflowError::NotYourTurn { request_id })
            }
        }
    }

    async fn write_task(
        &self,
        tx: &mut dyn WorkflowTx,
        task: &Task,
        expected: TaskStatus,
        request_id: RequestId,
    ) -> Result<()> {
        match tx.update_task(task, expected).await {
            Err(StoreError::Conflict { .. }) => {
                workflow_metrics().record_conflict();
                Err(WorkflowError::NotYourTurn { request_id })
            }
            other => Ok(other?),
        }
    }

    async fn write_request(&self, tx: &mut dyn WorkflowTx, request: &Request) -> Result<Request> {
        match tx.update_request(request).await {
            Err(StoreError::Conflict { .. }) => {
                workflow_metrics().record_conflict();
                Err(WorkflowError::ConcurrentModification {
                    request_id: request.id,
                })
            }
            other => Ok(other?),
        }
    }

    async fn audit(
        &self,
        tx: &mut dyn WorkflowTx,
        request: &Request,
        task: Option<&Task>,
        actor_id: Option<ActorId>,
        action: AuditAction,
        detail: Value,
    ) -> Result<()> {
        tx.append(NewAuditEvent {
            request_id: Some(request.id),
            task_id: task.map(|t| t.id),
            actor_id,
            action,
            detail,
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::workflow::conditions::{MockAssignmentContext, RuleSet};
    use crate::workflow::templates::TemplateCatalog;
    use crate::workflow::types::StepTemplate;

    fn orchestrator(templates: Vec<StepTemplate>) -> (WorkflowOrchestrator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(TemplateCatalog::new(templates).unwrap());
        (WorkflowOrchestrator::new(store.clone(), catalog), store)
    }

    #[tokio::test]
    async fn test_first_mandatory_step_is_requested() {
        let (engine, _) = orchestrator(vec![
            StepTemplate::new(1, "LEAVE", 1, "TEAM_LEAD"),
            StepTemplate::new(2, "LEAVE", 2, "HR"),
        ]);

        let loaded = engine
            .instantiate(Submission::new("LEAVE", 5, json!({ "days": 3 })))
            .await
            .unwrap();

        assert_eq!(loaded.request.status, RequestStatus::InProgress);
        assert_eq!(loaded.request.current_order, 1);
        assert_eq!(loaded.tasks[0].status, TaskStatus::Requested);
        assert_eq!(loaded.tasks[1].status, TaskStatus::Waiting);
    }

    #[tokio::test]
    async fn test_optional_steps_are_skipped_until_mandatory() {
        let (engine, _) = orchestrator(vec![
            StepTemplate::new(1, "LEAVE", 1, "TEAM_LEAD").with_required(false),
            StepTemplate::new(2, "LEAVE", 2, "HR"),
        ]);

        let loaded = engine
            .instantiate(Submission::new("LEAVE", 5, json!({})))
            .await
            .unwrap();

        let skipped = loaded.task_at(1).unwrap();
        assert_eq!(skipped.status, TaskStatus::AutoSkipped);
        assert_eq!(skipped.comment.as_deref(), Some(AUTO_SKIP_COMMENT));
        assert!(skipped.signed_at.is_some());
        assert_eq!(loaded.active_task().unwrap().order, 2);
        assert_eq!(loaded.request.current_order, 2);
    }

    #[tokio::test]
    async fn test_advance_is_noop_while_a_step_is_active() {
        let (engine, store) = orchestrator(vec![
            StepTemplate::new(1, "LEAVE", 1, "TEAM_LEAD"),
            StepTemplate::new(2, "LEAVE", 2, "HR"),
        ]);
        let loaded = engine
            .instantiate(Submission::new("LEAVE", 5, json!({})))
            .await
            .unwrap();

        let request = engine.advance(loaded.request.id, 5).await.unwrap();

        assert_eq!(request, loaded.request);
        assert_eq!(store.audit_trail(request.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_template_requires_signature() {
        let store = Arc::new(MemoryStore::new());
        let steps =
            TemplateCatalog::new(vec![StepTemplate::new(1, "LEAVE", 1, "HR").with_required(false)])
                .unwrap();
        // The pipeline is read from one catalog, step lookups from an empty one.
        struct SplitReader(TemplateCatalog);

        #[async_trait::async_trait]
        impl StepTemplateReader for SplitReader {
            async fn templates_for(&self, code: &str) -> std::result::Result<Vec<StepTemplate>, StoreError> {
                self.0.templates_for(code).await
            }

            async fn template(&self, _id: i64) -> std::result::Result<Option<StepTemplate>, StoreError> {
                Ok(None)
            }
        }

        let engine = WorkflowOrchestrator::new(store, Arc::new(SplitReader(steps)));
        let loaded = engine
            .instantiate(Submission::new("LEAVE", 5, json!({})))
            .await
            .unwrap();

        assert_eq!(loaded.active_task().unwrap().order, 1);
    }

    #[tokio::test]
    async fn test_role_presence_condition_uses_assignment_context() {
        let rules = RuleSet::parse(json!({ "has_role": "CFO" }));
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(
            TemplateCatalog::new(vec![
                StepTemplate::new(1, "BUDGET", 1, "CFO").with_conditions(rules),
                StepTemplate::new(2, "BUDGET", 2, "CEO"),
            ])
            .unwrap(),
        );
        let mut roster = MockAssignmentContext::new();
        roster
            .expect_has_actor_for_role()
            .with(mockall::predicate::eq("CFO"))
            .return_const(false);

        let engine =
            WorkflowOrchestrator::new(store, catalog).with_assignments(Arc::new(roster));
        let loaded = engine
            .instantiate(Submission::new("BUDGET", 5, json!({})))
            .await
            .unwrap();

        assert_eq!(loaded.task_at(1).unwrap().status, TaskStatus::AutoSkipped);
        assert_eq!(loaded.active_task().unwrap().assignee_role_code, "CEO");
    }

    #[tokio::test]
    async fn test_designated_actor_may_sign_without_role() {
        let (engine, _) = orchestrator(vec![
            StepTemplate::new(1, "LEAVE", 1, "HR").with_assignee(77),
        ]);
        let loaded = engine
            .instantiate(Submission::new("LEAVE", 5, json!({})))
            .await
            .unwrap();
        assert_eq!(loaded.tasks[0].assignee_actor_id, Some(77));

        let request = engine
            .approve(Decision::new(loaded.request.id, 77, "STAFF"))
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_export_only_from_approved() {
        let (engine, store) = orchestrator(vec![
            StepTemplate::new(1, "LEAVE", 1, "HR").with_required(false),
            StepTemplate::new(2, "TRIP", 1, "HR"),
        ]);
        let approved = engine
            .instantiate(Submission::new("LEAVE", 5, json!({})))
            .await
            .unwrap();
        let open = engine
            .instantiate(Submission::new("TRIP", 5, json!({})))
            .await
            .unwrap();

        let exported = engine.mark_exported(approved.request.id, 9).await.unwrap();
        assert_eq!(exported.status, RequestStatus::Exported);
        let last = store.audit_trail(exported.id).await.unwrap().pop().unwrap();
        assert_eq!(last.action, AuditAction::RequestStatusChanged);
        assert_eq!(last.detail["status"], "EXPORTED");

        let err = engine.mark_exported(open.request.id, 9).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        let err = engine.mark_exported(exported.id, 9).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_unknown_request_reports_not_found() {
        let (engine, _) = orchestrator(vec![StepTemplate::new(1, "LEAVE", 1, "HR")]);

        let err = engine.approve(Decision::new(404, 1, "HR")).await.unwrap_err();
        assert_eq!(err.code(), "REQUEST_NOT_FOUND");
        let err = engine.request(404).await.unwrap_err();
        assert_eq!(err.code(), "REQUEST_NOT_FOUND");
        let err = engine.history(404).await.unwrap_err();
        assert_eq!(err.code(), "REQUEST_NOT_FOUND");
        let err = engine.advance(404, 1).await.unwrap_err();
        assert_eq!(err.code(), "REQUEST_NOT_FOUND");
    }
}
