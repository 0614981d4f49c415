// In-memory task store
// Records live in id-keyed maps; a transaction works on a staged copy of the
// whole state while holding the store lock, so writers are fully serialized.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    now, AuditSink, NewAuditEvent, NewRequest, NewTask, RequestFilter, RequestRepository,
    StoreError, TaskRepository, WorkflowStore, WorkflowTx,
};
use crate::workflow::types::{
    ActorId, Attachment, AuditEvent, Request, RequestId, RequestStatus, Task, TaskStatus,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_request_id: i64,
    next_task_id: i64,
    next_audit_id: i64,
    requests: BTreeMap<RequestId, Request>,
    tasks: BTreeMap<i64, Task>,
    payloads: HashMap<RequestId, Value>,
    attachments: HashMap<RequestId, Vec<Attachment>>,
    audit: Vec<AuditEvent>,
}

impl MemoryState {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn tasks_of(&self, request_id: RequestId) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.request_id == request_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.order);
        tasks
    }
}

/// Task store kept entirely in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Unit of work over a [`MemoryStore`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn tasks(&self, request_id: RequestId) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.lock().await.tasks_of(request_id))
    }

    async fn payload(&self, request_id: RequestId) -> Result<Option<Value>, StoreError> {
        Ok(self.state.lock().await.payloads.get(&request_id).cloned())
    }

    async fn attachments(&self, request_id: RequestId) -> Result<Vec<Attachment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .attachments
            .get(&request_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn audit_trail(&self, request_id: RequestId) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .audit
            .iter()
            .filter(|e| e.request_id == Some(request_id))
            .cloned()
            .collect())
    }

    async fn inbox(&self, actor_id: ActorId, role_code: &str) -> Result<Vec<Request>, StoreError> {
        let state = self.state.lock().await;
        let mut requests: Vec<Request> = state
            .requests
            .values()
            .filter(|r| r.status.is_open())
            .filter(|r| {
                state.tasks.values().any(|t| {
                    t.request_id == r.id
                        && t.status == TaskStatus::Requested
                        && t.is_assigned_to(actor_id, role_code)
                })
            })
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(requests)
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<Request>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .requests
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RequestRepository for MemoryTx {
    async fn insert_request(&mut self, new: &NewRequest) -> Result<Request, StoreError> {
        let id = MemoryState::next_id(&mut self.staged.next_request_id);
        let created_at = now();
        let request = Request {
            id,
            request_type_code: new.request_type_code.clone(),
            title: new.title.clone(),
            created_by: new.created_by,
            status: RequestStatus::Pending,
            current_order: 1,
            version: 0,
            created_at,
            updated_at: created_at,
        };
        self.staged.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn request_for_update(&mut self, id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.staged.requests.get(&id).cloned())
    }

    async fn update_request(&mut self, request: &Request) -> Result<Request, StoreError> {
        let stored = self
            .staged
            .requests
            .get_mut(&request.id)
            .ok_or(StoreError::NotFound {
                entity: "request",
                id: request.id,
            })?;

        if stored.version != request.version {
            return Err(StoreError::Conflict {
                entity: "request",
                id: request.id,
            });
        }

        *stored = Request {
            version: request.version + 1,
            updated_at: now(),
            ..request.clone()
        };
        Ok(stored.clone())
    }

    async fn insert_payload(&mut self, id: RequestId, payload: &Value) -> Result<(), StoreError> {
        if self.staged.payloads.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("payload for request {id}")));
        }
        self.staged.payloads.insert(id, payload.clone());
        Ok(())
    }

    async fn payload(&mut self, id: RequestId) -> Result<Value, StoreError> {
        self.staged
            .payloads
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "payload",
                id,
            })
    }

    async fn insert_attachments(
        &mut self,
        id: RequestId,
        attachments: &[Attachment],
    ) -> Result<(), StoreError> {
        self.staged
            .attachments
            .entry(id)
            .or_default()
            .extend_from_slice(attachments);
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MemoryTx {
    async fn insert_task(&mut self, new: &NewTask) -> Result<Task, StoreError> {
        let duplicate = self
            .staged
            .tasks
            .values()
            .any(|t| t.request_id == new.request_id && t.step_template_id == new.step_template_id);
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "task for template {} on request {}",
                new.step_template_id, new.request_id
            )));
        }

        let id = MemoryState::next_id(&mut self.staged.next_task_id);
        let task = Task {
            id,
            request_id: new.request_id,
            step_template_id: new.step_template_id,
            order: new.order,
            assignee_role_code: new.assignee_role_code.clone(),
            assignee_actor_id: new.assignee_actor_id,
            status: TaskStatus::Waiting,
            signed_at: None,
            signature_ref: None,
            comment: None,
        };
        self.staged.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn tasks_in_status(
        &mut self,
        request_id: RequestId,
        status: TaskStatus,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .staged
            .tasks_of(request_id)
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    async fn tasks_for_request(&mut self, request_id: RequestId) -> Result<Vec<Task>, StoreError> {
        Ok(self.staged.tasks_of(request_id))
    }

    async fn requested_task_for(
        &mut self,
        request_id: RequestId,
        order: u32,
        actor_id: ActorId,
        role_code: &str,
    ) -> Result<Option<Task>, StoreError> {
        Ok(self
            .staged
            .tasks
            .values()
            .find(|t| {
                t.request_id == request_id
                    && t.order == order
                    && t.status == TaskStatus::Requested
                    && t.is_assigned_to(actor_id, role_code)
            })
            .cloned())
    }

    async fn update_task(&mut self, task: &Task, expected: TaskStatus) -> Result<(), StoreError> {
        let stored = self
            .staged
            .tasks
            .get_mut(&task.id)
            .ok_or(StoreError::NotFound {
                entity: "task",
                id: task.id,
            })?;

        if stored.status != expected {
            return Err(StoreError::Conflict {
                entity: "task",
                id: task.id,
            });
        }

        *stored = task.clone();
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryTx {
    async fn append(&mut self, event: NewAuditEvent) -> Result<AuditEvent, StoreError> {
        let id = MemoryState::next_id(&mut self.staged.next_audit_id);
        let stored = AuditEvent {
            id,
            request_id: event.request_id,
            task_id: event.task_id,
            actor_id: event.actor_id,
            action: event.action,
            detail: event.detail,
            created_at: now(),
        };
        self.staged.audit.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl WorkflowTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::AuditAction;
    use serde_json::json;

    fn purchase() -> NewRequest {
        NewRequest {
            request_type_code: "PURCHASE".to_string(),
            title: Some("Laptops".to_string()),
            created_by: 1,
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            let request = tx.insert_request(&purchase()).await.unwrap();
            tx.insert_payload(request.id, &json!({ "amount": 1 })).await.unwrap();
        }

        assert!(store.request(1).await.unwrap().is_none());
        assert!(store.payload(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_publishes_all_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let request = tx.insert_request(&purchase()).await.unwrap();
        tx.insert_task(&NewTask {
            request_id: request.id,
            step_template_id: 10,
            order: 1,
            assignee_role_code: "STAFF".to_string(),
            assignee_actor_id: None,
        })
        .await
        .unwrap();
        tx.append(NewAuditEvent {
            request_id: Some(request.id),
            task_id: None,
            actor_id: None,
            action: AuditAction::RequestStatusChanged,
            detail: json!({}),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let stored = store.request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(stored.current_order, 1);
        assert_eq!(store.tasks(request.id).await.unwrap().len(), 1);
        assert_eq!(store.audit_trail(request.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_request_version_conflicts() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let request = tx.insert_request(&purchase()).await.unwrap();

        let updated = tx.update_request(&request).await.unwrap();
        assert_eq!(updated.version, 1);

        let err = tx.update_request(&request).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { entity: "request", .. }));
    }

    #[tokio::test]
    async fn test_task_update_checks_expected_status() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let request = tx.insert_request(&purchase()).await.unwrap();
        let mut task = tx
            .insert_task(&NewTask {
                request_id: request.id,
                step_template_id: 10,
                order: 1,
                assignee_role_code: "STAFF".to_string(),
                assignee_actor_id: None,
            })
            .await
            .unwrap();

        task.status = TaskStatus::Requested;
        let err = tx.update_task(&task, TaskStatus::Requested).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { entity: "task", .. }));

        tx.update_task(&task, TaskStatus::Waiting).await.unwrap();
        let found = tx
            .requested_task_for(request.id, 1, 99, "STAFF")
            .await
            .unwrap();
        assert_eq!(found.map(|t| t.id), Some(task.id));
    }
}
