//! Block handlers and their registry.
//!
//! Each block kind maps to a handler with the uniform contract
//! `execute(task, context) → BlockResult`. Handlers obtain their structured
//! arguments from the block reasoner, re-validate them against the schema
//! guard, and report failures as data — a failing block never aborts the
//! session, the result just lands in task memory for reflection to judge.

mod batch;
mod chat;
mod parse;
mod reflect;
mod sql;

pub use batch::BatchBlockHandler;
pub use chat::ChatBlockHandler;
pub use parse::ParseBlockHandler;
pub use reflect::{run_reflection, ReflectDecision};
pub use sql::SqlBlockHandler;

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use pantry_agent_sdk::{async_trait, BlockKind, BlockReasoner, BlockResult, Task};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::memory::TaskMemory;
use crate::schema::SchemaGuard;
use crate::store::Store;

/// Everything a handler may touch while executing one task.
pub struct BlockContext<'a> {
    pub session_id: &'a str,
    pub guard: &'a SchemaGuard,
    pub store: &'a Store,
    pub reasoner: &'a dyn BlockReasoner,
    pub memory: &'a TaskMemory,
    /// Budget for one reasoner call; overruns become recoverable failures.
    pub timeout: Duration,
    /// Reference date for relative expressions like "expires next week".
    pub today: NaiveDate,
}

#[async_trait]
pub trait BlockHandler: Send + Sync {
    fn kind(&self) -> BlockKind;
    async fn execute(&self, task: &Task, ctx: &BlockContext<'_>) -> BlockResult;
}

/// Maps block kinds to handlers. The reflect block is not here: it is the
/// control-flow hinge and is invoked by the orchestrator directly.
pub struct BlockRegistry {
    handlers: HashMap<BlockKind, Box<dyn BlockHandler>>,
}

impl BlockRegistry {
    pub fn standard() -> Self {
        let handlers: Vec<Box<dyn BlockHandler>> = vec![
            Box::new(SqlBlockHandler),
            Box::new(ParseBlockHandler),
            Box::new(BatchBlockHandler::insert()),
            Box::new(BatchBlockHandler::update()),
            Box::new(BatchBlockHandler::delete()),
            Box::new(ChatBlockHandler),
        ];
        Self {
            handlers: handlers.into_iter().map(|h| (h.kind(), h)).collect(),
        }
    }

    pub async fn dispatch(&self, task: &Task, ctx: &BlockContext<'_>) -> BlockResult {
        match self.handlers.get(&task.block) {
            Some(handler) => handler.execute(task, ctx).await,
            None => BlockResult::failure(
                format!("no handler registered for {}", task.block.as_str()),
                false,
            ),
        }
    }
}

/// Ask the reasoner for this task's argument payload. Timeouts and transport
/// errors become recoverable failures recorded in memory, not crashes.
pub(crate) async fn propose_payload(
    task: &Task,
    ctx: &BlockContext<'_>,
) -> Result<Value, BlockResult> {
    let snapshot = ctx.memory.snapshot();
    match tokio::time::timeout(ctx.timeout, ctx.reasoner.propose(task, &snapshot)).await {
        Err(_) => Err(BlockResult::failure(
            format!("{} reasoner call timed out", task.block.as_str()),
            true,
        )),
        Ok(Err(e)) => Err(BlockResult::failure(
            format!("{} reasoner error: {}", task.block.as_str(), e),
            true,
        )),
        Ok(Ok(payload)) => Ok(payload),
    }
}

/// Deserialize a reasoner payload into the block's typed arguments.
pub(crate) fn parse_args<T: DeserializeOwned>(
    payload: Value,
    block: BlockKind,
) -> Result<T, BlockResult> {
    serde_json::from_value(payload).map_err(|e| {
        BlockResult::failure(
            format!("malformed {} payload: {}", block.as_str(), e),
            true,
        )
    })
}
