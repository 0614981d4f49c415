// SQLite task store
// One sqlx transaction per unit of work; the pool also serves step templates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    now, AuditSink, NewAuditEvent, NewRequest, NewTask, RequestFilter, RequestRepository,
    StoreError, TaskRepository, WorkflowStore, WorkflowTx,
};
use crate::workflow::conditions::RuleSet;
use crate::workflow::templates::StepTemplateReader;
use crate::workflow::types::{
    ActorId, Attachment, AuditAction, AuditEvent, Request, RequestId, RequestStatus, StepTemplate,
    Task, TaskStatus, TemplateId,
};

const REQUEST_COLUMNS: &str = "id, request_type_code, title, created_by, status, current_order, \
                               version, created_at, updated_at";
const TASK_COLUMNS: &str = "id, request_id, step_template_id, step_order, assignee_role_code, \
                            assignee_actor_id, status, signed_at, signature_ref, comment";
const TEMPLATE_COLUMNS: &str = "id, request_type_code, step_order, role_code, required, \
                                conditions, parallel_group_id, assignee_actor_id";

/// Task store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a step template, or replace the one already at its (type, order)
    pub async fn upsert_template(&self, template: &StepTemplate) -> Result<StepTemplate, StoreError> {
        let conditions = template
            .conditions
            .as_ref()
            .map(|rules| serde_json::to_string(rules.source()))
            .transpose()?;

        let row = sqlx::query(
            r#"
            INSERT INTO step_templates
                (request_type_code, step_order, role_code, required, conditions,
                 parallel_group_id, assignee_actor_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (request_type_code, step_order) DO UPDATE SET
                role_code = excluded.role_code,
                required = excluded.required,
                conditions = excluded.conditions,
                parallel_group_id = excluded.parallel_group_id,
                assignee_actor_id = excluded.assignee_actor_id
            RETURNING id
            "#,
        )
        .bind(&template.request_type_code)
        .bind(i64::from(template.order))
        .bind(&template.role_code)
        .bind(template.required)
        .bind(conditions)
        .bind(&template.parallel_group_id)
        .bind(template.assignee_actor_id)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        info!(
            template_id = id,
            request_type = %template.request_type_code,
            order = template.order,
            role = %template.role_code,
            "Step template stored"
        );

        Ok(StepTemplate {
            id,
            ..template.clone()
        })
    }

    /// All configured request types with their step counts
    pub async fn request_types(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT request_type_code, COUNT(*) AS steps
            FROM step_templates
            GROUP BY request_type_code
            ORDER BY request_type_code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("request_type_code")?, row.try_get("steps")?)))
            .collect()
    }
}

/// Unit of work over a [`SqliteStore`]
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse::<T>().map_err(StoreError::Corrupt)
}

fn to_order(raw: i64) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("step order out of range: {raw}")))
}

fn request_from_row(row: &SqliteRow) -> Result<Request, StoreError> {
    let status: String = row.try_get("status")?;
    let version: i64 = row.try_get("version")?;

    Ok(Request {
        id: row.try_get("id")?,
        request_type_code: row.try_get("request_type_code")?,
        title: row.try_get("title")?,
        created_by: row.try_get("created_by")?,
        status: parse_enum(&status)?,
        current_order: to_order(row.try_get("current_order")?)?,
        version: u64::try_from(version)
            .map_err(|_| StoreError::Corrupt(format!("negative request version: {version}")))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.try_get("status")?;

    Ok(Task {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        step_template_id: row.try_get("step_template_id")?,
        order: to_order(row.try_get("step_order")?)?,
        assignee_role_code: row.try_get("assignee_role_code")?,
        assignee_actor_id: row.try_get("assignee_actor_id")?,
        status: parse_enum(&status)?,
        signed_at: row.try_get("signed_at")?,
        signature_ref: row.try_get("signature_ref")?,
        comment: row.try_get("comment")?,
    })
}

fn template_from_row(row: &SqliteRow) -> Result<StepTemplate, StoreError> {
    let conditions: Option<String> = row.try_get("conditions")?;
    let conditions = conditions
        .map(|raw| serde_json::from_str::<Value>(&raw).map(RuleSet::parse))
        .transpose()?;

    Ok(StepTemplate {
        id: row.try_get("id")?,
        request_type_code: row.try_get("request_type_code")?,
        order: to_order(row.try_get("step_order")?)?,
        role_code: row.try_get("role_code")?,
        required: row.try_get("required")?,
        conditions,
        parallel_group_id: row.try_get("parallel_group_id")?,
        assignee_actor_id: row.try_get("assignee_actor_id")?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditEvent, StoreError> {
    let action: String = row.try_get("action")?;
    let detail: String = row.try_get("detail")?;

    Ok(AuditEvent {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        task_id: row.try_get("task_id")?,
        actor_id: row.try_get("actor_id")?,
        action: parse_enum::<AuditAction>(&action)?,
        detail: serde_json::from_str(&detail)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn request(&self, id: RequestId) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn tasks(&self, request_id: RequestId) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE request_id = ?1 ORDER BY step_order ASC"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn payload(&self, request_id: RequestId) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT payload FROM request_payloads WHERE request_id = ?1")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    async fn attachments(&self, request_id: RequestId) -> Result<Vec<Attachment>, StoreError> {
        let rows = sqlx::query(
            "SELECT file_ref, file_name FROM attachments WHERE request_id = ?1 ORDER BY id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Attachment {
                    file_ref: row.try_get("file_ref")?,
                    file_name: row.try_get("file_name")?,
                })
            })
            .collect()
    }

    async fn audit_trail(&self, request_id: RequestId) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, request_id, task_id, actor_id, action, detail, created_at
            FROM audit_events
            WHERE request_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn inbox(&self, actor_id: ActorId, role_code: &str) -> Result<Vec<Request>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM requests r
            WHERE r.status IN ('PENDING', 'IN_PROGRESS')
              AND EXISTS (
                  SELECT 1 FROM tasks t
                  WHERE t.request_id = r.id
                    AND t.status = 'REQUESTED'
                    AND (t.assignee_role_code = ?1 OR t.assignee_actor_id = ?2)
              )
            ORDER BY r.updated_at DESC, r.id DESC
            "#
        ))
        .bind(role_code)
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<Request>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
            FROM requests
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR request_type_code = ?2)
            ORDER BY id ASC
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.request_type_code.as_deref())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }
}

#[async_trait]
impl StepTemplateReader for SqliteStore {
    async fn templates_for(&self, request_type_code: &str) -> Result<Vec<StepTemplate>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM step_templates \
             WHERE request_type_code = ?1 ORDER BY step_order ASC"
        ))
        .bind(request_type_code)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(template_from_row).collect()
    }

    async fn template(&self, id: TemplateId) -> Result<Option<StepTemplate>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM step_templates WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(template_from_row).transpose()
    }
}

#[async_trait]
impl RequestRepository for SqliteTx {
    async fn insert_request(&mut self, new: &NewRequest) -> Result<Request, StoreError> {
        let created_at = now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO requests
                (request_type_code, title, created_by, status, current_order, version,
                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, 0, ?5, ?5)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(&new.request_type_code)
        .bind(&new.title)
        .bind(new.created_by)
        .bind(RequestStatus::Pending.as_str())
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        request_from_row(&row)
    }

    async fn request_for_update(&mut self, id: RequestId) -> Result<Option<Request>, StoreError> {
        // SQLite has no SELECT .. FOR UPDATE; a no-op write takes the write
        // lock before anything is read, so racing writers queue up here.
        sqlx::query("UPDATE requests SET version = version WHERE id = ?1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn update_request(&mut self, request: &Request) -> Result<Request, StoreError> {
        let expected = i64::try_from(request.version)
            .map_err(|_| StoreError::Corrupt(format!("request version overflow: {}", request.version)))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE requests
            SET status = ?1, current_order = ?2, title = ?3,
                version = version + 1, updated_at = ?4
            WHERE id = ?5 AND version = ?6
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request.status.as_str())
        .bind(i64::from(request.current_order))
        .bind(&request.title)
        .bind(now())
        .bind(request.id)
        .bind(expected)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => request_from_row(&row),
            None => {
                let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM requests WHERE id = ?1")
                    .bind(request.id)
                    .fetch_optional(&mut *self.tx)
                    .await?;
                debug!(request_id = request.id, version = request.version, "Request update matched no row");
                Err(match exists {
                    Some(_) => StoreError::Conflict {
                        entity: "request",
                        id: request.id,
                    },
                    None => StoreError::NotFound {
                        entity: "request",
                        id: request.id,
                    },
                })
            }
        }
    }

    async fn insert_payload(&mut self, id: RequestId, payload: &Value) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO request_payloads (request_id, payload) VALUES (?1, ?2)")
            .bind(id)
            .bind(serde_json::to_string(payload)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn payload(&mut self, id: RequestId) -> Result<Value, StoreError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT payload FROM request_payloads WHERE request_id = ?1")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        let raw = raw.ok_or(StoreError::NotFound {
            entity: "payload",
            id,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn insert_attachments(
        &mut self,
        id: RequestId,
        attachments: &[Attachment],
    ) -> Result<(), StoreError> {
        for attachment in attachments {
            sqlx::query("INSERT INTO attachments (request_id, file_ref, file_name) VALUES (?1, ?2, ?3)")
                .bind(id)
                .bind(&attachment.file_ref)
                .bind(&attachment.file_name)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for SqliteTx {
    async fn insert_task(&mut self, new: &NewTask) -> Result<Task, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks
                (request_id, step_template_id, step_order, assignee_role_code,
                 assignee_actor_id, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(new.request_id)
        .bind(new.step_template_id)
        .bind(i64::from(new.order))
        .bind(&new.assignee_role_code)
        .bind(new.assignee_actor_id)
        .bind(TaskStatus::Waiting.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        task_from_row(&row)
    }

    async fn tasks_in_status(
        &mut self,
        request_id: RequestId,
        status: TaskStatus,
    ) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE request_id = ?1 AND status = ?2 ORDER BY step_order ASC"
        ))
        .bind(request_id)
        .bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn tasks_for_request(&mut self, request_id: RequestId) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE request_id = ?1 ORDER BY step_order ASC"
        ))
        .bind(request_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn requested_task_for(
        &mut self,
        request_id: RequestId,
        order: u32,
        actor_id: ActorId,
        role_code: &str,
    ) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE request_id = ?1
              AND step_order = ?2
              AND status = 'REQUESTED'
              AND (assignee_role_code = ?3 OR assignee_actor_id = ?4)
            LIMIT 1
            "#
        ))
        .bind(request_id)
        .bind(i64::from(order))
        .bind(role_code)
        .bind(actor_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_task(&mut self, task: &Task, expected: TaskStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?1, signed_at = ?2, signature_ref = ?3, comment = ?4
            WHERE id = ?5 AND status = ?6
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.signed_at)
        .bind(&task.signature_ref)
        .bind(&task.comment)
        .bind(task.id)
        .bind(expected.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                entity: "task",
                id: task.id,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SqliteTx {
    async fn append(&mut self, event: NewAuditEvent) -> Result<AuditEvent, StoreError> {
        let created_at: DateTime<Utc> = now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO audit_events (request_id, task_id, actor_id, action, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(event.request_id)
        .bind(event.task_id)
        .bind(event.actor_id)
        .bind(event.action.as_str())
        .bind(serde_json::to_string(&event.detail)?)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(AuditEvent {
            id,
            request_id: event.request_id,
            task_id: event.task_id,
            actor_id: event.actor_id,
            action: event.action,
            detail: event.detail,
            created_at,
        })
    }
}

#[async_trait]
impl WorkflowTx for SqliteTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
