//! Caller-facing service boundary: conversation history, document ingest
//! and search, and context flowing between turns.

use std::sync::Arc;

use pantry_agent::schema::SchemaGuard;
use pantry_agent::service::AgentService;
use pantry_agent_sdk::{BlockKind, Task};
use serde_json::json;

use super::common::{seeded_store, test_config, ScriptedPlanner, ScriptedReasoner};

fn chat_plan() -> Vec<Task> {
    vec![
        Task::new(BlockKind::Chat, "answer conversationally"),
        Task::new(BlockKind::Reflect, "finish"),
    ]
}

fn service(
    planner: Arc<ScriptedPlanner>,
    reasoner: Arc<ScriptedReasoner>,
) -> (AgentService, Arc<pantry_agent::store::Store>) {
    let store = seeded_store();
    let service = AgentService::with_store(
        Arc::clone(&store),
        Arc::new(SchemaGuard::default_rules()),
        planner,
        reasoner,
        &test_config(),
    );
    (service, store)
}

#[tokio::test]
async fn test_handle_message_persists_the_exchange() {
    let planner = ScriptedPlanner::with_plan(chat_plan());
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({"response_text": "Hello! How can I help with your pantry?"}),
        json!({"final_message": "Hello! How can I help with your pantry?"}),
    ]);
    let (service, _store) = service(planner, reasoner);

    let reply = service.handle_message("hi there", None).await.unwrap();
    assert_eq!(reply.response, "Hello! How can I help with your pantry?");
    assert!(!reply.truncated);

    let history = service.history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user_message, "hi there");
    assert_eq!(history[0].response, reply.response);
}

#[tokio::test]
async fn test_prior_exchanges_reach_the_reasoner_as_context() {
    let planner = ScriptedPlanner::with_plans(vec![chat_plan(), chat_plan()]);
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({"response_text": "You asked about milk."}),
        json!({"final_message": "You asked about milk."}),
        json!({"response_text": "Yes, as I said."}),
        json!({"final_message": "Yes, as I said."}),
    ]);
    let (service, _store) = service(planner, Arc::clone(&reasoner));

    service.handle_message("do I have milk?", None).await.unwrap();
    service.handle_message("are you sure?", None).await.unwrap();

    // The second turn's snapshots must carry the first exchange
    let snapshots = reasoner.snapshots.lock().unwrap();
    let second_turn = &snapshots[2];
    let context = second_turn["conversation_context"].as_str().unwrap();
    assert!(context.contains("User: do I have milk?"));
    assert!(context.contains("Assistant: You asked about milk."));
}

#[tokio::test]
async fn test_model_override_reaches_the_snapshot() {
    let planner = ScriptedPlanner::with_plan(chat_plan());
    let reasoner = ScriptedReasoner::with_payloads(vec![
        json!({"response_text": "ok"}),
        json!({"final_message": "ok"}),
    ]);
    let (service, _store) = service(planner, Arc::clone(&reasoner));

    service
        .handle_message("hi", Some("gpt-4o".to_string()))
        .await
        .unwrap();

    let snapshots = reasoner.snapshots.lock().unwrap();
    assert_eq!(snapshots[0]["agent_model"], json!("gpt-4o"));
}

#[tokio::test]
async fn test_ingest_defaults_description_to_file_stem() {
    let planner = ScriptedPlanner::with_plans(vec![]);
    let reasoner = ScriptedReasoner::with_payloads(vec![]);
    let (service, _store) = service(planner, reasoner);

    let receipt = service
        .ingest_document("receipt_january.txt", b"Milk 2x 1.20\nButter 1x 2.50", None)
        .unwrap();
    assert!(receipt.doc_id > 0);
    assert_eq!(receipt.description, "Uploaded document: receipt_january");
}

#[tokio::test]
async fn test_search_ranks_by_keyword_hits() {
    let planner = ScriptedPlanner::with_plans(vec![]);
    let reasoner = ScriptedReasoner::with_payloads(vec![]);
    let (service, _store) = service(planner, reasoner);

    service
        .ingest_document("a.txt", b"milk milk milk", Some("dairy heavy".to_string()))
        .unwrap();
    service
        .ingest_document("b.txt", b"milk and bread", Some("mixed".to_string()))
        .unwrap();
    service
        .ingest_document("c.txt", b"only vegetables", Some("greens".to_string()))
        .unwrap();

    let matches = service.search_documents("milk", 5).unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].filename, "a.txt");
    assert!(matches[0].snippet.contains("milk"));
}

#[tokio::test]
async fn test_search_with_no_matches_is_empty() {
    let planner = ScriptedPlanner::with_plans(vec![]);
    let reasoner = ScriptedReasoner::with_payloads(vec![]);
    let (service, _store) = service(planner, reasoner);

    assert!(service.search_documents("caviar", 5).unwrap().is_empty());
    assert!(service.search_documents("   ", 5).unwrap().is_empty());
}
