//! Shared contracts for the pantry-agent orchestration engine.
//!
//! The engine decomposes a natural-language request into an ordered plan of
//! typed blocks, executes them against a relational store, and decides via a
//! reflection step whether to answer or keep going. This crate holds the
//! pieces both sides of that boundary agree on:
//!
//! - [`Task`], [`BlockKind`], [`Action`] and [`BlockResult`] — the planned
//!   unit of work and its outcome
//! - the typed argument payloads each block handler expects
//! - the [`Planner`] and [`BlockReasoner`] capability traits consumed by the
//!   engine (an LLM backend implements them; tests script them)
//! - [`AgentLog`] structured events and their emit macros
//! - the [`AgentError`] taxonomy for failures that abort a whole turn

mod log;

pub use crate::log::AgentLog;

// Re-export async trait for convenience
pub use async_trait::async_trait;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Closed set of block kinds the engine knows how to execute.
///
/// Adding a kind means adding a handler and a schema-guard rule; the planner
/// cannot invent new kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    #[serde(alias = "sql_block")]
    Sql,
    #[serde(alias = "parse_block")]
    Parse,
    #[serde(alias = "batch_insert_block")]
    BatchInsert,
    #[serde(alias = "batch_update_block")]
    BatchUpdate,
    #[serde(alias = "batch_delete_block")]
    BatchDelete,
    #[serde(alias = "chat_block")]
    Chat,
    #[serde(alias = "reflect_block", alias = "output", alias = "output_block")]
    Reflect,
}

impl BlockKind {
    /// Canonical wire name, matching what planners are prompted to emit.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Sql => "sql_block",
            BlockKind::Parse => "parse_block",
            BlockKind::BatchInsert => "batch_insert_block",
            BlockKind::BatchUpdate => "batch_update_block",
            BlockKind::BatchDelete => "batch_delete_block",
            BlockKind::Chat => "chat_block",
            BlockKind::Reflect => "reflect_block",
        }
    }

    /// Parse a planner-emitted block name. Accepts both the `_block` suffixed
    /// form and the bare kind name.
    pub fn parse(name: &str) -> Option<Self> {
        let bare = name.trim().strip_suffix("_block").unwrap_or(name.trim());
        match bare {
            "sql" => Some(BlockKind::Sql),
            "parse" => Some(BlockKind::Parse),
            "batch_insert" => Some(BlockKind::BatchInsert),
            "batch_update" => Some(BlockKind::BatchUpdate),
            "batch_delete" => Some(BlockKind::BatchDelete),
            "chat" => Some(BlockKind::Chat),
            // output_block is the degenerate non-replanning reflect
            "reflect" | "output" => Some(BlockKind::Reflect),
            _ => None,
        }
    }

    /// Whether this kind can legally end a plan segment.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlockKind::Reflect)
    }

    /// Whether executing this kind touches the backing store.
    pub fn touches_store(&self) -> bool {
        matches!(
            self,
            BlockKind::Sql
                | BlockKind::BatchInsert
                | BlockKind::BatchUpdate
                | BlockKind::BatchDelete
        )
    }
}

/// One planned invocation of a block.
///
/// Identity is positional within the plan queue; a task is immutable once
/// created and consumed exactly once by the orchestrator loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub block: BlockKind,
    pub description: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reasoning: String,
    /// Block-specific fields (e.g. `final_message`, `additional_tasks`).
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(block: BlockKind, description: impl Into<String>) -> Self {
        Self {
            block,
            description: description.into(),
            title: String::new(),
            reasoning: String::new(),
            extra: Map::new(),
        }
    }
}

/// SQL action a block may request against a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Select,
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Select => "SELECT",
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Action::Select)
    }

    /// UPDATE and DELETE must carry a row-targeting where clause.
    pub fn requires_where_clause(&self) -> bool {
        matches!(self, Action::Update | Action::Delete)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one block execution, recorded verbatim in task memory.
///
/// A `Failure` is never upgraded to a fabricated success by a later step;
/// reflection must surface or retry it explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockResult {
    Success { payload: Value },
    Failure { error: String, recoverable: bool },
}

impl BlockResult {
    pub fn success(payload: Value) -> Self {
        BlockResult::Success { payload }
    }

    pub fn failure(error: impl Into<String>, recoverable: bool) -> Self {
        BlockResult::Failure {
            error: error.into(),
            recoverable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BlockResult::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            BlockResult::Success { payload } => Some(payload),
            BlockResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BlockResult::Success { .. } => None,
            BlockResult::Failure { error, .. } => Some(error),
        }
    }
}

// ============================================================================
// Block argument payloads
// ============================================================================
//
// These are the structured payloads the block reasoner is asked to produce.
// The engine treats them as untrusted generator output: each is re-validated
// against the schema guard before anything touches the store.

/// Arguments for `sql_block`: exactly one statement against one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlBlockArgs {
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Value>,
    pub action_type: Action,
    #[serde(default)]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub explanation: String,
}

/// One row of a batch mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchRow {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub where_clause: Option<String>,
}

/// Arguments for the batch blocks: N rows applied all-or-nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchBlockArgs {
    pub table_name: String,
    #[serde(default)]
    pub rows: Vec<BatchRow>,
    #[serde(default)]
    pub explanation: String,
}

/// Arguments for `parse_block`: free text in, structured item out.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParseBlockArgs {
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub parsed_item: Map<String, Value>,
    #[serde(default)]
    pub explanation: String,
}

/// Arguments for `chat_block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBlockArgs {
    pub response_text: String,
}

/// Arguments for `reflect_block`: the terminal-or-continue decision.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReflectBlockArgs {
    /// User-facing text; present exactly when the reflection terminates.
    #[serde(default)]
    pub final_message: Option<String>,
    /// Display-ready projection of retrieved rows. Must be traceable to a
    /// prior success entry; the engine drops anything that is not.
    #[serde(default)]
    pub data_output: Option<Vec<Map<String, Value>>>,
    /// New tasks appended to the plan queue when the reflection continues.
    #[serde(default)]
    pub additional_tasks: Option<Vec<Task>>,
}

// ============================================================================
// Errors that abort a whole turn
// ============================================================================

/// Failure taxonomy for the orchestration engine.
///
/// Block-level failures are *data* ([`BlockResult::Failure`] entries in task
/// memory) and never abort a session. Only the variants here do.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Planner output was malformed or not terminal-shaped.
    #[error("planner produced an invalid plan: {0}")]
    PlanInvalid(String),

    /// Unrecoverable transport failure talking to the reasoner backend.
    #[error("reasoner transport error: {0}")]
    Transport(String),

    /// The session was cancelled between tasks.
    #[error("session cancelled")]
    Cancelled,

    /// The backing store could not be opened or initialized.
    #[error("store error: {0}")]
    Store(String),
}

// ============================================================================
// Consumed capabilities
// ============================================================================

/// External planning capability: turns a user request plus a schema
/// description into an ordered task list whose last task is terminal-shaped.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        user_text: &str,
        schema_description: &str,
        model: Option<&str>,
    ) -> Result<Vec<Task>, AgentError>;
}

/// External per-block reasoning capability: given a task and a snapshot of
/// task memory, returns the block-specific argument payload as raw JSON.
///
/// The engine always re-validates the returned payload before acting on it.
#[async_trait]
pub trait BlockReasoner: Send + Sync {
    async fn propose(&self, task: &Task, memory: &Value) -> Result<Value, AgentError>;
}
