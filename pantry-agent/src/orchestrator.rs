//! The orchestrator loop: one user turn from plan to terminal answer.
//!
//! State machine per session:
//!
//! ```text
//! PLANNING -> EXECUTING <-> REFLECTING -> DONE
//!     \------------------------------\-> FAILED
//! ```
//!
//! Block failures never abort the loop; they are recorded in task memory and
//! judged at the next reflection. The loop itself fails only on an invalid
//! plan, a dead reasoner transport, or cancellation. A reflection cycle cap
//! bounds replanning: once reached, the session is forced to a truncated
//! DONE with whatever honest answer memory supports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use pantry_agent_sdk::{
    log_block_completed, log_block_failed, log_block_started, log_plan_created,
    log_plan_rejected, log_reflection_continued, log_session_done, log_session_failed,
};
use pantry_agent_sdk::{AgentError, BlockKind, BlockReasoner, BlockResult, Planner, Task};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::blocks::{run_reflection, BlockContext, BlockRegistry, ReflectDecision};
use crate::memory::TaskMemory;
use crate::queue::PlanQueue;
use crate::schema::SchemaGuard;
use crate::store::Store;

/// Loop tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Reflection cycles allowed before the session is forced to finish.
    pub max_reflections: usize,
    /// Budget for one planner or reasoner call.
    pub block_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_reflections: 5,
            block_timeout: Duration::from_secs(60),
        }
    }
}

/// One caller-visible turn.
pub struct TurnRequest {
    pub user_text: String,
    pub conversation_context: String,
    pub model: Option<String>,
    pub cancel: Arc<AtomicBool>,
}

impl TurnRequest {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            conversation_context: String::new(),
            model: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.conversation_context = context.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Terminal result of one turn.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: String,
    pub response: String,
    pub data_output: Option<Vec<Map<String, Value>>>,
    /// True when the reflection cap forced the finish.
    pub truncated: bool,
    /// Reflection cycles consumed.
    pub cycles: usize,
    /// Human-readable step log, one line per executed block.
    pub trace: Vec<String>,
}

pub struct Orchestrator {
    guard: Arc<SchemaGuard>,
    store: Arc<Store>,
    planner: Arc<dyn Planner>,
    reasoner: Arc<dyn BlockReasoner>,
    registry: BlockRegistry,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        guard: Arc<SchemaGuard>,
        store: Arc<Store>,
        planner: Arc<dyn Planner>,
        reasoner: Arc<dyn BlockReasoner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            guard,
            store,
            planner,
            reasoner,
            registry: BlockRegistry::standard(),
            config,
        }
    }

    /// Run one turn to a terminal state.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<SessionOutcome, AgentError> {
        let session_id = Uuid::new_v4().to_string();

        let mut memory = TaskMemory::new(request.user_text.clone());
        memory.set_conversation_context(request.conversation_context.clone());
        if let Some(model) = &request.model {
            memory.set_model_override(model.clone());
        }

        // PLANNING
        let plan = match tokio::time::timeout(
            self.config.block_timeout,
            self.planner.plan(
                &request.user_text,
                &self.guard.describe(),
                request.model.as_deref(),
            ),
        )
        .await
        {
            Err(_) => {
                let err = AgentError::Transport("planner call timed out".to_string());
                log_session_failed!(session_id, err);
                return Err(err);
            }
            Ok(Err(e)) => {
                if let AgentError::PlanInvalid(reason) = &e {
                    log_plan_rejected!(session_id, reason);
                }
                log_session_failed!(session_id, e);
                return Err(e);
            }
            Ok(Ok(plan)) => plan,
        };

        let mut queue = match PlanQueue::from_plan(plan) {
            Ok(queue) => queue,
            Err(e) => {
                log_plan_rejected!(session_id, e);
                log_session_failed!(session_id, e);
                return Err(e);
            }
        };
        log_plan_created!(session_id, queue.len());

        // EXECUTING <-> REFLECTING
        let mut cycles = 0usize;
        let mut trace = Vec::new();
        let mut index = 0usize;

        while let Some(task) = queue.pop() {
            if request.cancel.load(Ordering::SeqCst) {
                let err = AgentError::Cancelled;
                log_session_failed!(session_id, err);
                return Err(err);
            }

            let ctx = BlockContext {
                session_id: &session_id,
                guard: &self.guard,
                store: &self.store,
                reasoner: self.reasoner.as_ref(),
                memory: &memory,
                timeout: self.config.block_timeout,
                today: Local::now().date_naive(),
            };

            if task.block == BlockKind::Reflect {
                if cycles >= self.config.max_reflections {
                    return Ok(self.finish_truncated(session_id, memory, cycles, trace));
                }
                cycles += 1;

                log_block_started!(session_id, index, task.block.as_str(), task.description);
                let (result, decision) = run_reflection(&task, &ctx).await;
                record(&mut memory, &mut trace, &session_id, index, &task, &result);
                index += 1;

                match decision {
                    ReflectDecision::Terminate {
                        final_message,
                        data_output,
                    } => {
                        log_session_done!(session_id, cycles, false);
                        return Ok(SessionOutcome {
                            session_id,
                            response: final_message,
                            data_output,
                            truncated: false,
                            cycles,
                            trace,
                        });
                    }
                    ReflectDecision::Continue { tasks } => {
                        let appended = queue.extend_from_reflection(tasks);
                        log_reflection_continued!(session_id, cycles, appended);
                    }
                    // Failure is already in memory; the next reflect task, or
                    // the drained-queue fallback, takes it from there.
                    ReflectDecision::Inconclusive => {}
                }
                continue;
            }

            log_block_started!(session_id, index, task.block.as_str(), task.description);
            let result = self.registry.dispatch(&task, &ctx).await;
            record(&mut memory, &mut trace, &session_id, index, &task, &result);
            index += 1;
        }

        // Queue drained without a terminal decision.
        Ok(self.finish_truncated(session_id, memory, cycles, trace))
    }

    /// Force a truncated DONE: answer with whatever memory honestly supports.
    fn finish_truncated(
        &self,
        session_id: String,
        memory: TaskMemory,
        cycles: usize,
        trace: Vec<String>,
    ) -> SessionOutcome {
        log_session_done!(session_id, cycles, true);
        SessionOutcome {
            session_id,
            response: fallback_response(&memory),
            data_output: None,
            truncated: true,
            cycles,
            trace,
        }
    }
}

fn record(
    memory: &mut TaskMemory,
    trace: &mut Vec<String>,
    session_id: &str,
    index: usize,
    task: &Task,
    result: &BlockResult,
) {
    match result {
        BlockResult::Success { payload } => {
            let summary = summarize_payload(payload);
            log_block_completed!(session_id, index, task.block.as_str(), summary);
            trace.push(format!("{}: {}", task.block.as_str(), summary));
        }
        BlockResult::Failure { error, recoverable } => {
            log_block_failed!(session_id, index, task.block.as_str(), error, *recoverable);
            trace.push(format!("{}: failed: {}", task.block.as_str(), error));
        }
    }
    let input = serde_json::to_value(task).unwrap_or(Value::Null);
    memory.append(task.block, input, result.clone());
}

fn summarize_payload(payload: &Value) -> String {
    if let Some(count) = payload.get("row_count").and_then(Value::as_u64) {
        return format!("{} rows returned", count);
    }
    if let Some(affected) = payload.get("rows_affected").and_then(Value::as_u64) {
        return format!("{} rows affected", affected);
    }
    if let Some(appended) = payload.get("additional_tasks").and_then(Value::as_u64) {
        return format!("{} follow-up tasks", appended);
    }
    "ok".to_string()
}

/// Best-effort answer when the cap fires before reflection terminates.
fn fallback_response(memory: &TaskMemory) -> String {
    if let Some(entry) = memory.unresolved_store_failure() {
        let error = entry.result.error().unwrap_or("unknown error");
        return format!("Sorry, an error occurred with your request:\n{}", error);
    }
    if let Some(payload) = memory.latest_success(BlockKind::Chat) {
        if let Some(text) = payload.get("response_text").and_then(Value::as_str) {
            return format!(
                "{}\n\n(I stopped before fully completing your request.)",
                text
            );
        }
    }
    if let Some(rows) = memory.latest_rows() {
        return format!(
            "I found {} matching items but could not finish reasoning about them. \
             Please try rephrasing your request.",
            rows.len()
        );
    }
    "I couldn't complete your request within the allowed number of steps. \
     Please try rephrasing it."
        .to_string()
}
