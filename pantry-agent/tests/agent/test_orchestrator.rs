//! Orchestrator loop: plan validation, reflection control flow, the cycle
//! cap, and honest truncated finishes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pantry_agent::orchestrator::{Orchestrator, OrchestratorConfig, TurnRequest};
use pantry_agent::schema::SchemaGuard;
use pantry_agent_sdk::{async_trait, AgentError, BlockKind, BlockReasoner, Task};
use serde_json::{json, Value};

use super::common::{orchestrator, seeded_store, ScriptedPlanner, ScriptedReasoner};

fn select_fridge_payload() -> serde_json::Value {
    json!({
        "table_name": "fridge_items",
        "action_type": "SELECT",
        "columns": [],
        "values": [],
        "explanation": "list everything in the fridge"
    })
}

#[tokio::test]
async fn test_select_then_reflect_surfaces_retrieved_rows() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "list fridge items"),
        Task::new(BlockKind::Reflect, "answer the user"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        select_fridge_payload(),
        json!({
            "final_message": "You have 3 items in your fridge.",
            "data_output": [
                {"name": "Milk"},
                {"name": "Eggs"},
                {"name": "Spinach"}
            ]
        }),
    ]);
    let orch = orchestrator(seeded_store(), planner, reasoner);

    let outcome = orch
        .run_turn(TurnRequest::new("what's in my fridge?"))
        .await
        .unwrap();

    assert_eq!(outcome.response, "You have 3 items in your fridge.");
    let rows = outcome.data_output.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["name"], json!("Milk"));
    assert!(!outcome.truncated);
    assert_eq!(outcome.cycles, 1);
}

#[tokio::test]
async fn test_fabricated_rows_are_dropped_from_output() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "list fridge items"),
        Task::new(BlockKind::Reflect, "answer the user"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        select_fridge_payload(),
        json!({
            "final_message": "Here is what you have.",
            "data_output": [
                {"name": "Milk"},
                {"name": "Caviar"}
            ]
        }),
    ]);
    let orch = orchestrator(seeded_store(), planner, reasoner);

    let outcome = orch
        .run_turn(TurnRequest::new("what's in my fridge?"))
        .await
        .unwrap();

    // The invented row never reached any SELECT result, so it is dropped
    let rows = outcome.data_output.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Milk"));
}

#[tokio::test]
async fn test_plan_without_terminal_task_is_rejected() {
    let planner = ScriptedPlanner::with_plan(vec![Task::new(BlockKind::Sql, "list items")]);
    let reasoner = ScriptedReasoner::with_payloads(vec![]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let err = orch
        .run_turn(TurnRequest::new("what's in my fridge?"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::PlanInvalid(_)));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_reflection_cap_forces_truncated_done() {
    // Every reflection asks for one more chat task; the cap must cut this
    // off after exactly five cycles.
    let planner = ScriptedPlanner::with_plan(vec![Task::new(BlockKind::Reflect, "decide")]);
    let mut payloads = Vec::new();
    for _ in 0..5 {
        payloads.push(json!({
            "additional_tasks": [{"block": "chat_block", "description": "keep going"}]
        }));
        payloads.push(json!({"response_text": "still working on it"}));
    }
    let reasoner = ScriptedReasoner::with_payloads(payloads);
    let orch = orchestrator(seeded_store(), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("loop forever")).await.unwrap();

    assert!(outcome.truncated);
    assert_eq!(outcome.cycles, 5);
    // The fallback keeps the last honest chat reply
    assert!(outcome.response.contains("still working on it"));
}

#[tokio::test]
async fn test_recoverable_failure_is_retried_via_reflection() {
    // First insert fails at the store level; reflection appends a retry.
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "add butter"),
        Task::new(BlockKind::Reflect, "check the insert"),
    ]);
    let bad_insert = json!({
        "table_name": "fridge_items",
        "action_type": "INSERT",
        "columns": ["name", "quantity"],
        "values": ["Butter"],
        "explanation": "mismatched values"
    });
    let good_insert = json!({
        "table_name": "fridge_items",
        "action_type": "INSERT",
        "columns": ["name", "quantity"],
        "values": ["Butter", 1],
        "explanation": "add butter"
    });
    let reasoner = ScriptedReasoner::with_payloads(vec![
        bad_insert,
        json!({
            "additional_tasks": [{"block": "sql_block", "description": "retry the insert"}]
        }),
        good_insert,
        json!({"final_message": "Butter was added to your fridge."}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("add butter")).await.unwrap();

    assert_eq!(outcome.response, "Butter was added to your fridge.");
    assert_eq!(outcome.cycles, 2);
    let rows = store
        .select("fridge_items", &[], Some("WHERE name = 'Butter'"))
        .unwrap();
    assert_eq!(rows.len(), 1);
}

/// Reasoner double whose first call stalls past the block timeout; later
/// calls answer immediately from a script.
struct StallingReasoner {
    delay: Duration,
    calls: AtomicUsize,
    payloads: Mutex<Vec<Value>>,
}

#[async_trait]
impl BlockReasoner for StallingReasoner {
    async fn propose(&self, _task: &Task, _memory: &Value) -> Result<Value, AgentError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.delay).await;
        }
        let mut payloads = self.payloads.lock().unwrap();
        if payloads.is_empty() {
            return Err(AgentError::Transport("stalling reasoner exhausted".to_string()));
        }
        Ok(payloads.remove(0))
    }
}

#[tokio::test]
async fn test_reasoner_timeout_is_a_recoverable_failure_not_an_abort() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Chat, "answer conversationally"),
        Task::new(BlockKind::Reflect, "finish"),
    ]);
    let reasoner = Arc::new(StallingReasoner {
        delay: Duration::from_millis(500),
        calls: AtomicUsize::new(0),
        payloads: Mutex::new(vec![json!({
            "final_message": "I couldn't reach my reasoning backend for that step."
        })]),
    });
    let orch = Orchestrator::new(
        Arc::new(SchemaGuard::default_rules()),
        seeded_store(),
        planner,
        reasoner,
        OrchestratorConfig {
            max_reflections: 5,
            block_timeout: Duration::from_millis(50),
        },
    );

    // The chat call times out; the session must keep going and let the
    // reflection answer over the recorded failure.
    let outcome = orch.run_turn(TurnRequest::new("hi")).await.unwrap();

    assert_eq!(
        outcome.response,
        "I couldn't reach my reasoning backend for that step."
    );
    assert!(!outcome.truncated);
    assert!(outcome.trace[0].contains("timed out"));
}

#[tokio::test]
async fn test_cancellation_between_tasks() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "list fridge items"),
        Task::new(BlockKind::Reflect, "answer"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![select_fridge_payload()]);
    let orch = orchestrator(seeded_store(), planner, reasoner);

    let cancel = Arc::new(AtomicBool::new(true));
    cancel.store(true, Ordering::SeqCst);
    let err = orch
        .run_turn(TurnRequest::new("what's in my fridge?").with_cancel(cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
}

#[tokio::test]
async fn test_parsed_item_flows_into_insert() {
    // parse_block output merges into the following INSERT's columns
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Parse, "parse the new item"),
        Task::new(BlockKind::Sql, "insert the item"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "raw_text": "add 2 liters of milk",
            "parsed_item": {"name": "milk", "quantity": 2.0, "unit": "liters"},
            "explanation": "structured item"
        }),
        json!({
            "table_name": "fridge_items",
            "action_type": "INSERT",
            "columns": [],
            "values": [],
            "explanation": "insert parsed item"
        }),
        json!({"final_message": "Added 2 liters of milk."}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch
        .run_turn(TurnRequest::new("add 2 liters of milk"))
        .await
        .unwrap();

    assert_eq!(outcome.response, "Added 2 liters of milk.");
    let rows = store
        .select("fridge_items", &[], Some("WHERE name = 'milk'"))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["quantity"], json!(2.0));
}

#[tokio::test]
async fn test_select_after_failed_insert_does_not_mask_the_failure() {
    // A read-only success between the failed write and the reflection must
    // not launder the failure into a success claim.
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "add butter"),
        Task::new(BlockKind::Sql, "list fridge items"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "fridge_items",
            "action_type": "INSERT",
            "columns": ["name", "flavor"],
            "values": ["Butter", "salted"],
            "explanation": "flavor is not an allowed column"
        }),
        select_fridge_payload(),
        json!({"final_message": "Butter was added to your fridge!"}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("add butter")).await.unwrap();

    assert!(outcome.response.starts_with("Sorry, an error occurred"));
    assert!(outcome.response.contains("flavor"));
    let rows = store
        .select("fridge_items", &[], Some("WHERE name = 'Butter'"))
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_unresolved_failure_overrides_cheerful_reflection() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "add butter"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "fridge_items",
            "action_type": "INSERT",
            "columns": ["name"],
            "values": [],
            "explanation": "broken insert"
        }),
        json!({"final_message": "Butter was added!"}),
    ]);
    let orch = orchestrator(seeded_store(), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("add butter")).await.unwrap();

    assert!(outcome.response.starts_with("Sorry, an error occurred"));
    assert!(outcome.data_output.is_none());
}
