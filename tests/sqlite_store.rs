// Engine behaviour against the SQLite task store
#![cfg(feature = "database")]

mod fixtures;

use fixtures::{purchase_templates, CEO, STAFF, TEAM_LEAD};
use futures::future::join_all;
use serde_json::json;
use signoff::config::DatabaseConfig;
use signoff::store::{NewRequest, StoreError};
use signoff::workflow::{
    Attachment, AuditAction, Decision, RequestStatus, StepTemplateReader, Submission, TaskStatus,
};
use signoff::{
    DatabaseManager, RequestFilter, SqliteStore, WorkflowError, WorkflowOrchestrator, WorkflowStore,
};
use std::sync::Arc;
use tempfile::TempDir;

async fn open(dir: &TempDir) -> DatabaseManager {
    open_with(dir, 4).await
}

async fn open_with(dir: &TempDir, max_connections: u32) -> DatabaseManager {
    let settings = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("signoff.db").display()),
        max_connections,
        auto_migrate: true,
    };
    DatabaseManager::new(&settings).await.unwrap()
}

async fn seeded_engine(database: &DatabaseManager) -> (WorkflowOrchestrator, SqliteStore) {
    let store = database.store();
    for template in purchase_templates() {
        store.upsert_template(&template).await.unwrap();
    }
    let engine = WorkflowOrchestrator::new(Arc::new(store.clone()), Arc::new(store.clone()));
    (engine, store)
}

#[tokio::test]
async fn test_templates_round_trip_with_conditions() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir).await;
    let (_, store) = seeded_engine(&database).await;

    let steps = store.templates_for("PURCHASE").await.unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(
        steps.iter().map(|t| t.role_code.as_str()).collect::<Vec<_>>(),
        vec!["STAFF", "TEAM_LEAD", "CEO"]
    );
    assert!(!steps[1].required);
    assert_eq!(
        steps[1].conditions.as_ref().unwrap().source(),
        &json!({ "amount": { "gt": 100000 } })
    );
    assert_eq!(store.template(steps[2].id).await.unwrap(), Some(steps[2].clone()));
    assert!(steps.iter().all(|t| t.parallel_group_id.is_none()));
    assert_eq!(store.request_types().await.unwrap(), vec![("PURCHASE".to_string(), 3)]);
}

#[tokio::test]
async fn test_upsert_replaces_step_at_same_order() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir).await;
    let (_, store) = seeded_engine(&database).await;

    let mut replacement = purchase_templates().remove(2).with_parallel_group("board");
    replacement.role_code = "CFO".to_string();
    store.upsert_template(&replacement).await.unwrap();

    let steps = store.templates_for("PURCHASE").await.unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[2].role_code, "CFO");
    assert_eq!(steps[2].parallel_group_id.as_deref(), Some("board"));
}

#[tokio::test]
async fn test_full_approval_persists() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir).await;
    let (engine, store) = seeded_engine(&database).await;

    let loaded = engine
        .instantiate(
            Submission::new("PURCHASE", STAFF, json!({ "amount": 50000 }))
                .with_title("Monitors")
                .with_attachment(Attachment::new("blob://quote.pdf")),
        )
        .await
        .unwrap();
    let id = loaded.request.id;
    assert_eq!(loaded.active_task().unwrap().order, 1);

    engine.approve(Decision::new(id, STAFF, "STAFF")).await.unwrap();
    let request = engine.approve(Decision::new(id, CEO, "CEO")).await.unwrap();
    assert_eq!(request.status, RequestStatus::Approved);
    assert_eq!(request.current_order, 4);

    let actions: Vec<_> = store
        .audit_trail(id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::TaskRequested,
            AuditAction::TaskApproved,
            AuditAction::AutoSkipped,
            AuditAction::TaskRequested,
            AuditAction::TaskApproved,
            AuditAction::RequestStatusChanged,
        ]
    );

    // Reopen the database: everything survives
    database.shutdown().await;
    let database = open(&dir).await;
    let store = database.store();
    let stored = store.request(id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Approved);
    assert_eq!(stored.title.as_deref(), Some("Monitors"));
    assert_eq!(store.payload(id).await.unwrap(), Some(json!({ "amount": 50000 })));
    assert_eq!(store.attachments(id).await.unwrap()[0].file_ref, "blob://quote.pdf");
    let statuses: Vec<_> = store.tasks(id).await.unwrap().iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Approved, TaskStatus::AutoSkipped, TaskStatus::Approved]
    );
}

#[tokio::test]
async fn test_wrong_turn_and_unknown_type() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir).await;
    let (engine, store) = seeded_engine(&database).await;

    let id = engine
        .instantiate(Submission::new("PURCHASE", STAFF, json!({ "amount": 200000 })))
        .await
        .unwrap()
        .request
        .id;
    let err = engine
        .approve(Decision::new(id, TEAM_LEAD, "TEAM_LEAD"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_PERMISSION_OR_NOT_YOUR_TURN");

    let err = engine
        .instantiate(Submission::new("LEAVE", STAFF, json!({})))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REQUEST_TYPE_UNKNOWN");
    assert_eq!(
        store.list_requests(&RequestFilter::default()).await.unwrap().len(),
        1
    );

    let inbox = store.inbox(STAFF, "STAFF").await.unwrap();
    assert_eq!(inbox.iter().map(|r| r.id).collect::<Vec<_>>(), vec![id]);
}

#[tokio::test]
async fn test_stale_version_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir).await;
    let store = database.store();

    let mut tx = store.begin().await.unwrap();
    let created = tx
        .insert_request(&NewRequest {
            request_type_code: "PURCHASE".to_string(),
            title: None,
            created_by: STAFF,
        })
        .await
        .unwrap();
    let mut fresh = tx.request_for_update(created.id).await.unwrap().unwrap();
    fresh.status = RequestStatus::InProgress;
    let updated = tx.update_request(&fresh).await.unwrap();
    assert_eq!(updated.version, created.version + 1);

    let err = tx.update_request(&fresh).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir).await;
    let store = database.store();

    {
        let mut tx = store.begin().await.unwrap();
        tx.insert_request(&NewRequest {
            request_type_code: "PURCHASE".to_string(),
            title: None,
            created_by: STAFF,
        })
        .await
        .unwrap();
    }

    assert!(store
        .list_requests(&RequestFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_audit_events_are_append_only() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir).await;
    let (engine, _) = seeded_engine(&database).await;
    engine
        .instantiate(Submission::new("PURCHASE", STAFF, json!({ "amount": 1 })))
        .await
        .unwrap();

    let update = sqlx::query("UPDATE audit_events SET action = 'TASK_APPROVED'")
        .execute(database.pool())
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM audit_events")
        .execute(database.pool())
        .await;
    assert!(delete.is_err());
}

/// Eight approvers race for the first step of one request. The store also
/// serves the templates, so template reads share the pool with the racing
/// transactions.
async fn race_first_step(max_connections: u32) {
    let dir = TempDir::new().unwrap();
    let database = open_with(&dir, max_connections).await;
    let (engine, store) = seeded_engine(&database).await;
    let engine = Arc::new(engine);
    let id = engine
        .instantiate(Submission::new("PURCHASE", STAFF, json!({ "amount": 200000 })))
        .await
        .unwrap()
        .request
        .id;

    let attempts = (0..8).map(|n| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .approve(Decision::new(id, STAFF + n, "STAFF"))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, WorkflowError::NotYourTurn { .. }),
            "unexpected error: {err}"
        );
    }

    let tasks = store.tasks(id).await.unwrap();
    let requested: Vec<_> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Requested)
        .collect();
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].order, 2);
    assert_eq!(store.request(id).await.unwrap().unwrap().current_order, 2);
    database.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_approvals_on_small_pool() {
    race_first_step(2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_approvals_on_wider_pool() {
    race_first_step(4).await;
}
