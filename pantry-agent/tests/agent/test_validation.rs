//! Schema-guard enforcement: rejected instructions never reach the store,
//! and batch mutations commit all rows or none.

use std::sync::Arc;

use pantry_agent::orchestrator::TurnRequest;
use pantry_agent_sdk::{BlockKind, Task};
use serde_json::json;

use super::common::{orchestrator, seeded_store, ScriptedPlanner, ScriptedReasoner};

#[tokio::test]
async fn test_unknown_table_rejected_before_store() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "insert a user"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "users",
            "action_type": "INSERT",
            "columns": ["name"],
            "values": ["mallory"],
            "explanation": "not an allowed table"
        }),
        json!({"final_message": "User added!"}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("add a user")).await.unwrap();

    assert_eq!(store.call_count(), 0);
    assert!(outcome.response.starts_with("Sorry, an error occurred"));
    assert!(outcome.response.contains("users"));
}

#[tokio::test]
async fn test_unknown_column_rejected_before_store() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "update the password"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "fridge_items",
            "action_type": "UPDATE",
            "columns": ["password"],
            "values": ["hunter2"],
            "where_clause": "WHERE name = 'Milk'",
            "explanation": "not an allowed column"
        }),
        json!({"final_message": "Updated!"}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("update")).await.unwrap();

    assert_eq!(store.call_count(), 0);
    assert!(outcome.response.contains("password"));
}

#[tokio::test]
async fn test_write_denied_on_readonly_table() {
    // invoices allows SELECT and INSERT only
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "delete an invoice"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "invoices",
            "action_type": "DELETE",
            "columns": [],
            "values": [],
            "where_clause": "WHERE id = 1",
            "explanation": "disallowed action"
        }),
        json!({"final_message": "Invoice deleted!"}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("delete invoice 1")).await.unwrap();

    assert_eq!(store.call_count(), 0);
    let rows = store.select("invoices", &[], None).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(outcome.response.starts_with("Sorry, an error occurred"));
}

#[tokio::test]
async fn test_update_without_where_clause_rejected() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::Sql, "mark everything purchased"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "shopping_items",
            "action_type": "UPDATE",
            "columns": ["purchased"],
            "values": [1],
            "explanation": "missing where clause"
        }),
        json!({"final_message": "All done!"}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    orch.run_turn(TurnRequest::new("mark all purchased")).await.unwrap();

    assert_eq!(store.call_count(), 0);
    let rows = store
        .select("shopping_items", &[], Some("WHERE purchased = 1"))
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_batch_with_one_invalid_row_commits_nothing() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::BatchUpdate, "mark two items purchased"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "shopping_items",
            "rows": [
                {
                    "columns": ["purchased"],
                    "values": [1],
                    "where_clause": "WHERE name = 'Cheese'"
                },
                {
                    // Second row is missing its where clause
                    "columns": ["purchased"],
                    "values": [1]
                }
            ],
            "explanation": "batch update"
        }),
        json!({"final_message": "Both items marked purchased!"}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch
        .run_turn(TurnRequest::new("mark cheese and tomatoes purchased"))
        .await
        .unwrap();

    // Rejected before the store, so even the valid first row did not commit
    assert_eq!(store.call_count(), 0);
    let rows = store
        .select("shopping_items", &[], Some("WHERE purchased = 1"))
        .unwrap();
    assert!(rows.is_empty());
    assert!(outcome.response.starts_with("Sorry, an error occurred"));
    assert!(outcome.response.contains("row 1"));
}

#[tokio::test]
async fn test_valid_batch_commits_every_row() {
    let planner = ScriptedPlanner::with_plan(vec![
        Task::new(BlockKind::BatchInsert, "stock up the fridge"),
        Task::new(BlockKind::Reflect, "confirm"),
    ]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({
            "table_name": "fridge_items",
            "rows": [
                {"columns": ["name", "quantity"], "values": ["Butter", 1]},
                {"columns": ["name", "quantity"], "values": ["Yogurt", 4]}
            ],
            "explanation": "batch insert"
        }),
        json!({"final_message": "Added 2 items to your fridge."}),
    ]);
    let store = seeded_store();
    let orch = orchestrator(Arc::clone(&store), planner, reasoner);

    let outcome = orch.run_turn(TurnRequest::new("add butter and yogurt")).await.unwrap();

    assert_eq!(outcome.response, "Added 2 items to your fridge.");
    assert_eq!(store.call_count(), 1);
    let rows = store.select("fridge_items", &[], None).unwrap();
    assert_eq!(rows.len(), 5);
}
