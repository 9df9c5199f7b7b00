//! Task memory: the append-only audit log of one session.
//!
//! Every block invocation appends exactly one entry with its input and its
//! [`BlockResult`]; entries are never mutated afterwards, so corrections
//! happen by appending new entries. A latest-of-kind index lets the parse
//! and reflect blocks reference "the most recent sql result" without
//! re-scanning history.

use std::collections::HashMap;

use pantry_agent_sdk::{BlockKind, BlockResult};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// One write-once audit record.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub index: usize,
    pub block: BlockKind,
    pub input: Value,
    pub result: BlockResult,
}

/// Append-only log plus latest-of-kind index for one session.
#[derive(Debug)]
pub struct TaskMemory {
    original_request: String,
    conversation_context: String,
    model_override: Option<String>,
    entries: Vec<MemoryEntry>,
    latest: HashMap<BlockKind, usize>,
}

impl TaskMemory {
    pub fn new(original_request: impl Into<String>) -> Self {
        Self {
            original_request: original_request.into(),
            conversation_context: String::new(),
            model_override: None,
            entries: Vec::new(),
            latest: HashMap::new(),
        }
    }

    /// Attach the recent-history window shown to the reasoner.
    pub fn set_conversation_context(&mut self, context: impl Into<String>) {
        self.conversation_context = context.into();
    }

    /// Per-turn model selector, forwarded to the reasoner backend.
    pub fn set_model_override(&mut self, model: impl Into<String>) {
        self.model_override = Some(model.into());
    }

    pub fn original_request(&self) -> &str {
        &self.original_request
    }

    /// Append a result. Returns the entry index.
    pub fn append(&mut self, block: BlockKind, input: Value, result: BlockResult) -> usize {
        let index = self.entries.len();
        self.entries.push(MemoryEntry {
            index,
            block,
            input,
            result,
        });
        self.latest.insert(block, index);
        index
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry of the given kind, regardless of outcome.
    pub fn latest(&self, kind: BlockKind) -> Option<&MemoryEntry> {
        self.latest.get(&kind).map(|&i| &self.entries[i])
    }

    /// Most recent successful payload of the given kind.
    pub fn latest_success(&self, kind: BlockKind) -> Option<&Value> {
        self.latest(kind).and_then(|entry| entry.result.payload())
    }

    /// Rows from the most recent successful `sql_block` SELECT, if any.
    pub fn latest_rows(&self) -> Option<&Vec<Value>> {
        self.latest_success(BlockKind::Sql)
            .and_then(|payload| payload.get("rows"))
            .and_then(Value::as_array)
    }

    /// The structured item produced by the most recent successful parse.
    pub fn latest_parsed_item(&self) -> Option<&Map<String, Value>> {
        self.latest_success(BlockKind::Parse)
            .and_then(|payload| payload.get("parsed_item"))
            .and_then(Value::as_object)
    }

    /// The most recent store-touching failure that no later successful
    /// mutation has repaired. Reflection must not report success for the
    /// operation while this is non-empty. Only a success that actually wrote
    /// rows counts as repair; a read-only SELECT proves nothing about an
    /// earlier failed write and does not clear it.
    pub fn unresolved_store_failure(&self) -> Option<&MemoryEntry> {
        for entry in self.entries.iter().rev() {
            if !entry.block.touches_store() {
                continue;
            }
            match &entry.result {
                BlockResult::Success { payload } => {
                    if payload.get("rows_affected").is_some() {
                        return None;
                    }
                }
                BlockResult::Failure { .. } => return Some(entry),
            }
        }
        None
    }

    /// Every row object present in any success payload: SELECT row sets and
    /// parsed items. Used to check that reflection's `data_output`
    /// fabricates nothing.
    pub fn success_rows(&self) -> Vec<&Map<String, Value>> {
        let mut rows = Vec::new();
        for entry in &self.entries {
            let Some(payload) = entry.result.payload() else {
                continue;
            };
            if let Some(array) = payload.get("rows").and_then(Value::as_array) {
                rows.extend(array.iter().filter_map(Value::as_object));
            }
            if let Some(item) = payload.get("parsed_item").and_then(Value::as_object) {
                rows.push(item);
            }
        }
        rows
    }

    /// JSON snapshot handed to the reasoner as context. Mirrors the shape of
    /// the audit log plus convenience keys for the most recent results.
    pub fn snapshot(&self) -> Value {
        let mut recent = Map::new();
        for (kind, &index) in &self.latest {
            recent.insert(
                format!("last_{}_result", kind.as_str()),
                serde_json::to_value(&self.entries[index].result).unwrap_or(Value::Null),
            );
        }

        json!({
            "original_user_input": self.original_request,
            "conversation_context": self.conversation_context,
            "agent_model": self.model_override,
            "entries": self.entries,
            "recent": Value::Object(recent),
        })
    }
}
