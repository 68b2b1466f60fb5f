//! Engine test-suite, run against the in-memory store.
//!
//! Every test drives the public `WorkflowEngine` API only; store
//! internals are observed through the read queries and the memory
//! store's row counters.

use std::sync::Arc;

use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::error::EngineError;
use crate::models::{
    Decision, InstanceStatus, Ref, StepStatus, WorkflowDefinition, WorkflowStep,
    SUBMIT_STEP_KEY,
};
use crate::resolver::AssignmentRule;
use crate::store::memory::MemoryStore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn step(key: &str, order: i32, rule: AssignmentRule) -> WorkflowStep {
    WorkflowStep {
        id: Uuid::new_v4(),
        step_key: key.into(),
        name: format!("{key} step"),
        step_order: order,
        assignment_rule: rule,
    }
}

fn definition(code: &str, version: i32, steps: Vec<WorkflowStep>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: Uuid::new_v4(),
        code: code.into(),
        name: format!("{code} workflow"),
        version,
        is_active: true,
        steps,
    }
}

/// SUBMIT -> MANAGER_APPROVAL (submitter) -> FINANCE_APPROVAL (finance-1).
fn three_step_definition() -> WorkflowDefinition {
    definition(
        "PROJECT_PROPOSAL",
        1,
        vec![
            step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter),
            step("MANAGER_APPROVAL", 2, AssignmentRule::User("manager-1".into())),
            step("FINANCE_APPROVAL", 3, AssignmentRule::User("finance-1".into())),
        ],
    )
}

async fn engine_with(defs: Vec<WorkflowDefinition>) -> (WorkflowEngine, MemoryStore) {
    let store = MemoryStore::new();
    for def in defs {
        store.publish_definition(def).await;
    }
    (WorkflowEngine::new(Arc::new(store.clone())), store)
}

// ---------------------------------------------------------------------------
// create_instance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_fails_without_an_active_definition() {
    let (engine, store) = engine_with(vec![]).await;

    let err = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "1"), "user-a")
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DefinitionNotFound { code } if code == "PROJECT_PROPOSAL"));
    assert_eq!(store.instance_count().await, 0);
    assert_eq!(store.step_instance_count().await, 0);
    assert_eq!(store.action_count().await, 0);
}

#[tokio::test]
async fn create_opens_the_first_approval_step() {
    let (engine, store) = engine_with(vec![three_step_definition()]).await;

    let state = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "1"), "user-a")
        .await
        .unwrap();

    assert_eq!(state.status, InstanceStatus::InProgress);
    let current = state.current_step.unwrap();
    assert_eq!(current.step_key, "MANAGER_APPROVAL");
    assert_eq!(current.assigned_to, vec!["manager-1".to_owned()]);

    // SUBMIT auto-approved plus one pending step.
    assert_eq!(store.instance_count().await, 1);
    assert_eq!(store.step_instance_count().await, 2);

    let detail = engine.instance_detail(state.instance_id).await.unwrap();
    assert_eq!(detail.current_step_key.as_deref(), Some("MANAGER_APPROVAL"));

    let submit = detail
        .step_instances
        .iter()
        .find(|si| si.status == StepStatus::Approved)
        .unwrap();
    assert_eq!(submit.acted_by.as_deref(), Some("user-a"));
    assert_eq!(submit.comment.as_deref(), Some("Submitted"));

    let trail = engine.action_trail(state.instance_id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action.to_string(), "SUBMIT");
    assert_eq!(trail[0].actor_id, "user-a");
}

#[tokio::test]
async fn submitter_rule_assigns_the_creator() {
    let (engine, _store) = engine_with(vec![definition(
        "PROJECT_PROPOSAL",
        1,
        vec![
            step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter),
            step("MANAGER_APPROVAL", 2, AssignmentRule::Submitter),
        ],
    )])
    .await;

    let state = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "123"), "user-a")
        .await
        .unwrap();

    assert_eq!(state.status, InstanceStatus::InProgress);
    let current = state.current_step.unwrap();
    assert_eq!(current.step_key, "MANAGER_APPROVAL");
    assert_eq!(current.assigned_to, vec!["user-a".to_owned()]);
}

#[tokio::test]
async fn one_instance_per_reference_even_after_terminal() {
    let (engine, store) = engine_with(vec![definition(
        "PROJECT_PROPOSAL",
        1,
        vec![step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter)],
    )])
    .await;

    // Submit-only definition approves immediately, so the first instance
    // is terminal by the time the second create runs.
    let first = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "1"), "user-a")
        .await
        .unwrap();
    assert_eq!(first.status, InstanceStatus::Approved);

    let err = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "1"), "user-b")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateInstance { .. }));

    // The failed create left nothing behind.
    assert_eq!(store.instance_count().await, 1);
    assert_eq!(store.step_instance_count().await, 1);
    assert_eq!(store.action_count().await, 1);
}

#[tokio::test]
async fn submit_only_definition_approves_outright() {
    let (engine, store) = engine_with(vec![definition(
        "AUTO",
        1,
        vec![step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter)],
    )])
    .await;

    let state = engine
        .create_instance("AUTO", Ref::new("doc", "7"), "user-a")
        .await
        .unwrap();

    assert_eq!(state.status, InstanceStatus::Approved);
    assert!(state.current_step.is_none());
    assert_eq!(store.step_instance_count().await, 1);

    let detail = engine.instance_detail(state.instance_id).await.unwrap();
    assert!(detail.current_step_key.is_none());
}

#[tokio::test]
async fn create_uses_the_highest_active_version() {
    let mut v1 = three_step_definition();
    v1.is_active = false;
    let mut v2 = definition(
        "PROJECT_PROPOSAL",
        2,
        vec![
            step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter),
            step("DIRECTOR_APPROVAL", 2, AssignmentRule::User("director-1".into())),
        ],
    );
    v2.id = v1.id;
    let (engine, _store) = engine_with(vec![v1, v2]).await;

    let state = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "1"), "user-a")
        .await
        .unwrap();

    let current = state.current_step.unwrap();
    assert_eq!(current.step_key, "DIRECTOR_APPROVAL");
}

#[tokio::test]
async fn definition_without_submit_step_is_a_config_defect() {
    let (engine, store) = engine_with(vec![definition(
        "BROKEN",
        1,
        vec![step("REVIEW", 1, AssignmentRule::Submitter)],
    )])
    .await;

    let err = engine
        .create_instance("BROKEN", Ref::new("doc", "1"), "user-a")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::MissingSubmitStep { code, version: 1 } if code == "BROKEN"
    ));
    assert_eq!(store.instance_count().await, 0);
}

#[tokio::test]
async fn unresolvable_assignment_rolls_the_whole_create_back() {
    let (engine, store) = engine_with(vec![definition(
        "PROJECT_PROPOSAL",
        1,
        vec![
            step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter),
            step("MANAGER_APPROVAL", 2, AssignmentRule::User(String::new())),
        ],
    )])
    .await;

    let err = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "1"), "user-a")
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::UnresolvableAssignment { .. }));
    // The instance and SUBMIT rows were written inside the transaction;
    // the failure must leave none of them behind.
    assert_eq!(store.instance_count().await, 0);
    assert_eq!(store.step_instance_count().await, 0);
    assert_eq!(store.action_count().await, 0);
}

// ---------------------------------------------------------------------------
// advance
// ---------------------------------------------------------------------------

/// Create an instance and return (instance_id, pending step_instance_id).
async fn created(engine: &WorkflowEngine) -> (Uuid, Uuid) {
    let state = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "1"), "user-a")
        .await
        .unwrap();
    let pending = pending_step(engine, state.instance_id).await;
    (state.instance_id, pending)
}

async fn pending_step(engine: &WorkflowEngine, instance_id: Uuid) -> Uuid {
    engine
        .instance_detail(instance_id)
        .await
        .unwrap()
        .step_instances
        .iter()
        .find(|si| si.status == StepStatus::Pending)
        .map(|si| si.id)
        .unwrap()
}

#[tokio::test]
async fn approval_chain_runs_to_approved_with_full_trail() {
    let (engine, _store) = engine_with(vec![three_step_definition()]).await;
    let (instance_id, manager_step) = created(&engine).await;

    let state = engine
        .advance(instance_id, manager_step, "manager-1", Decision::Approve, Some("fine"))
        .await
        .unwrap();
    assert_eq!(state.status, InstanceStatus::InProgress);
    assert_eq!(state.current_step.unwrap().step_key, "FINANCE_APPROVAL");

    let finance_step = pending_step(&engine, instance_id).await;
    let state = engine
        .advance(instance_id, finance_step, "finance-1", Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(state.status, InstanceStatus::Approved);
    assert!(state.current_step.is_none());

    let trail = engine.action_trail(instance_id).await.unwrap();
    let kinds: Vec<String> = trail.iter().map(|e| e.action.to_string()).collect();
    assert_eq!(kinds, vec!["SUBMIT", "APPROVE", "APPROVE"]);

    let detail = engine.instance_detail(instance_id).await.unwrap();
    assert_eq!(detail.instance.status, InstanceStatus::Approved);
    let manager = detail.step_instances.iter().find(|si| si.id == manager_step).unwrap();
    assert_eq!(manager.comment.as_deref(), Some("fine"));
    assert_eq!(manager.acted_by.as_deref(), Some("manager-1"));
    assert!(manager.acted_at.is_some());
}

#[tokio::test]
async fn rejection_is_terminal() {
    let (engine, _store) = engine_with(vec![three_step_definition()]).await;
    let (instance_id, manager_step) = created(&engine).await;

    let state = engine
        .advance(instance_id, manager_step, "manager-1", Decision::Reject, Some("no budget"))
        .await
        .unwrap();
    assert_eq!(state.status, InstanceStatus::Rejected);
    assert!(state.current_step.is_none());

    // No later step exists and the acted step cannot be acted on again.
    let err = engine
        .advance(instance_id, manager_step, "manager-1", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let trail = engine.action_trail(instance_id).await.unwrap();
    assert_eq!(trail.last().unwrap().action.to_string(), "REJECT");
}

#[tokio::test]
async fn non_assignee_is_refused() {
    let (engine, _store) = engine_with(vec![three_step_definition()]).await;
    let (instance_id, manager_step) = created(&engine).await;

    let err = engine
        .advance(instance_id, manager_step, "intruder", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotAuthorized { actor, .. } if actor == "intruder"
    ));

    // The step is still pending and the instance unchanged.
    let detail = engine.instance_detail(instance_id).await.unwrap();
    assert_eq!(detail.instance.status, InstanceStatus::InProgress);
    let step = detail.step_instances.iter().find(|si| si.id == manager_step).unwrap();
    assert_eq!(step.status, StepStatus::Pending);
}

#[tokio::test]
async fn unknown_ids_are_distinct_failures() {
    let (engine, _store) = engine_with(vec![three_step_definition()]).await;
    let (instance_id, _) = created(&engine).await;

    let err = engine
        .advance(Uuid::new_v4(), Uuid::new_v4(), "manager-1", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InstanceNotFound(_)));

    let err = engine
        .advance(instance_id, Uuid::new_v4(), "manager-1", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StepInstanceNotFound(_)));
}

#[tokio::test]
async fn step_of_another_instance_is_invalid_state() {
    let (engine, _store) = engine_with(vec![three_step_definition()]).await;
    let (first_id, _) = created(&engine).await;

    let second = engine
        .create_instance("PROJECT_PROPOSAL", Ref::new("doc", "2"), "user-b")
        .await
        .unwrap();
    let second_step = pending_step(&engine, second.instance_id).await;

    let err = engine
        .advance(first_id, second_step, "manager-1", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn concurrent_decisions_close_the_step_exactly_once() {
    let (engine, store) = engine_with(vec![three_step_definition()]).await;
    let (instance_id, manager_step) = created(&engine).await;

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .advance(instance_id, manager_step, "manager-1", Decision::Approve, None)
                .await
        })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .advance(instance_id, manager_step, "manager-1", Decision::Reject, None)
                .await
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::InvalidState { .. })))
        .count();
    assert_eq!((ok, lost), (1, 1));

    // SUBMIT + manager + at most one follow-up step, never two.
    assert!(store.step_instance_count().await <= 3);
    let trail = engine.action_trail(instance_id).await.unwrap();
    assert_eq!(trail.len(), 2);
}

#[tokio::test]
async fn advance_follows_the_pinned_version() {
    let v1 = three_step_definition();
    let workflow_id = v1.id;
    let (engine, store) = engine_with(vec![v1]).await;
    let (instance_id, manager_step) = created(&engine).await;

    // A new active version appears mid-flight; the running instance
    // must keep following version 1.
    store.set_definition_active(workflow_id, false).await;
    let mut v2 = definition(
        "PROJECT_PROPOSAL",
        2,
        vec![
            step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter),
            step("CEO_APPROVAL", 2, AssignmentRule::User("ceo-1".into())),
        ],
    );
    v2.id = workflow_id;
    store.publish_definition(v2).await;

    let state = engine
        .advance(instance_id, manager_step, "manager-1", Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(state.current_step.unwrap().step_key, "FINANCE_APPROVAL");
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inbox_lists_pending_work_oldest_first() {
    let (engine, _store) = engine_with(vec![definition(
        "PROJECT_PROPOSAL",
        1,
        vec![
            step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter),
            step("MANAGER_APPROVAL", 2, AssignmentRule::User("manager-1".into())),
        ],
    )])
    .await;

    for n in 0..3 {
        engine
            .create_instance("PROJECT_PROPOSAL", Ref::new("doc", n.to_string()), "user-a")
            .await
            .unwrap();
    }

    let page = engine.inbox("manager-1", 1, 2).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].reference.id, "0");
    assert_eq!(page.items[1].reference.id, "1");
    assert_eq!(page.items[0].workflow_code, "PROJECT_PROPOSAL");
    assert_eq!(page.items[0].step_key, "MANAGER_APPROVAL");

    let page = engine.inbox("manager-1", 2, 2).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].reference.id, "2");

    // Other users see nothing.
    let page = engine.inbox("user-a", 1, 10).await.unwrap();
    assert_eq!(page.total, 0);
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn inbox_drops_items_once_the_instance_is_terminal() {
    let (engine, _store) = engine_with(vec![definition(
        "PROJECT_PROPOSAL",
        1,
        vec![
            step(SUBMIT_STEP_KEY, 1, AssignmentRule::Submitter),
            step("MANAGER_APPROVAL", 2, AssignmentRule::User("manager-1".into())),
        ],
    )])
    .await;
    let (instance_id, manager_step) = created(&engine).await;

    assert_eq!(engine.inbox("manager-1", 1, 10).await.unwrap().total, 1);

    engine
        .advance(instance_id, manager_step, "manager-1", Decision::Reject, None)
        .await
        .unwrap();

    assert_eq!(engine.inbox("manager-1", 1, 10).await.unwrap().total, 0);
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn instance_detail_of_unknown_id_fails() {
    let (engine, _store) = engine_with(vec![three_step_definition()]).await;
    let err = engine.instance_detail(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EngineError::InstanceNotFound(_)));
}

#[tokio::test]
async fn action_trail_of_unknown_id_is_empty() {
    let (engine, _store) = engine_with(vec![three_step_definition()]).await;
    let trail = engine.action_trail(Uuid::new_v4()).await.unwrap();
    assert!(trail.is_empty());
}
