//! Common test utilities: scripted planner/reasoner doubles and fixtures.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pantry_agent::orchestrator::{Orchestrator, OrchestratorConfig};
use pantry_agent::schema::SchemaGuard;
use pantry_agent::store::Store;
use pantry_agent::AgentConfig;
use pantry_agent_sdk::{async_trait, AgentError, BlockReasoner, Planner, Task};
use serde_json::Value;

/// Planner double that replays pre-scripted plans, one per turn.
pub struct ScriptedPlanner {
    plans: Mutex<VecDeque<Vec<Task>>>,
}

impl ScriptedPlanner {
    pub fn with_plan(tasks: Vec<Task>) -> Arc<Self> {
        Self::with_plans(vec![tasks])
    }

    pub fn with_plans(plans: Vec<Vec<Task>>) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into()),
        })
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        _user_text: &str,
        _schema_description: &str,
        _model: Option<&str>,
    ) -> Result<Vec<Task>, AgentError> {
        self.plans
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::PlanInvalid("scripted planner exhausted".to_string()))
    }
}

/// Reasoner double that replays pre-scripted payloads in order and records
/// every memory snapshot it was shown.
pub struct ScriptedReasoner {
    payloads: Mutex<VecDeque<Value>>,
    pub snapshots: Mutex<Vec<Value>>,
}

impl ScriptedReasoner {
    pub fn with_payloads(payloads: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(payloads.into()),
            snapshots: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BlockReasoner for ScriptedReasoner {
    async fn propose(&self, _task: &Task, memory: &Value) -> Result<Value, AgentError> {
        self.snapshots.lock().unwrap().push(memory.clone());
        self.payloads
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Transport("scripted reasoner exhausted".to_string()))
    }
}

/// In-memory store with schema and demo rows.
pub fn seeded_store() -> Arc<Store> {
    let store = Store::in_memory().unwrap();
    store.init_schema().unwrap();
    store.seed_demo_data().unwrap();
    Arc::new(store)
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        database_path: PathBuf::from(":memory:"),
        schema_rules_path: None,
        model: "test-model".to_string(),
        max_reflections: 5,
        block_timeout: Duration::from_secs(5),
        history_window: 5,
        api_base: "http://localhost:0".to_string(),
        api_key: "test-key".to_string(),
    }
}

pub fn orchestrator(
    store: Arc<Store>,
    planner: Arc<ScriptedPlanner>,
    reasoner: Arc<ScriptedReasoner>,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(SchemaGuard::default_rules()),
        store,
        planner,
        reasoner,
        OrchestratorConfig {
            max_reflections: 5,
            block_timeout: Duration::from_secs(5),
        },
    )
}
