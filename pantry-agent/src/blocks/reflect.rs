//! `reflect_block`: the terminal decision point of a session.
//!
//! Reflection reads the whole task memory and either finishes the session
//! with a user-facing answer or appends follow-up tasks. It is the only
//! block allowed to extend the plan, and the only place where structured
//! data may surface to the caller. Surfaced rows are checked against the
//! audit log: a row no earlier success produced is dropped, never shown.

use pantry_agent_sdk::{BlockKind, BlockResult, ReflectBlockArgs, Task};
use serde_json::{json, Map, Value};

use crate::blocks::{parse_args, propose_payload, BlockContext};

/// What the orchestrator should do after one reflection pass.
#[derive(Debug)]
pub enum ReflectDecision {
    /// Finish the session with this answer.
    Terminate {
        final_message: String,
        data_output: Option<Vec<Map<String, Value>>>,
    },
    /// Keep going with these follow-up tasks.
    Continue { tasks: Vec<Task> },
    /// Reflection itself failed; the orchestrator decides what happens next.
    Inconclusive,
}

pub async fn run_reflection(
    task: &Task,
    ctx: &BlockContext<'_>,
) -> (BlockResult, ReflectDecision) {
    let payload = match propose_payload(task, ctx).await {
        Ok(payload) => payload,
        Err(failure) => return (failure, ReflectDecision::Inconclusive),
    };
    let args: ReflectBlockArgs = match parse_args(payload, BlockKind::Reflect) {
        Ok(args) => args,
        Err(failure) => return (failure, ReflectDecision::Inconclusive),
    };

    // Continuation takes precedence: if the reasoner asked for more work,
    // any draft answer it also produced is premature.
    if let Some(tasks) = args.additional_tasks {
        if !tasks.is_empty() {
            let result = BlockResult::success(json!({
                "additional_tasks": tasks.len(),
            }));
            return (result, ReflectDecision::Continue { tasks });
        }
    }

    let Some(draft_message) = args.final_message else {
        return (
            BlockResult::failure(
                "reflection produced neither a final message nor follow-up tasks",
                true,
            ),
            ReflectDecision::Inconclusive,
        );
    };

    let (final_message, data_output, dropped) =
        resolve_final_answer(draft_message, args.data_output, ctx);

    let result = BlockResult::success(json!({
        "final_message": &final_message,
        "data_output": &data_output,
        "rows_dropped": dropped,
    }));
    (
        result,
        ReflectDecision::Terminate {
            final_message,
            data_output,
        },
    )
}

/// Apply the honesty overrides to a draft answer. The reasoner's own wording
/// is kept only when memory agrees the operation actually went as claimed.
fn resolve_final_answer(
    draft: String,
    data_output: Option<Vec<Map<String, Value>>>,
    ctx: &BlockContext<'_>,
) -> (String, Option<Vec<Map<String, Value>>>, usize) {
    // A failed write that nothing later repaired cannot be described as a
    // success, whatever the reasoner drafted.
    if let Some(entry) = ctx.memory.unresolved_store_failure() {
        let error = entry.result.error().unwrap_or("unknown error");
        let message = format!("Sorry, an error occurred with your request:\n{}", error);
        return (message, None, 0);
    }

    let mut message = draft;
    if let Some(payload) = ctx.memory.latest_success(BlockKind::Sql) {
        if payload.get("rows_affected").and_then(Value::as_u64) == Some(0) {
            message =
                "No matching items were found to update or delete, so nothing was changed."
                    .to_string();
        } else if payload.get("row_count").and_then(Value::as_u64) == Some(0) {
            message = "No matching items found.".to_string();
        }
    }

    match data_output {
        None => (message, None, 0),
        Some(rows) => {
            let total = rows.len();
            let kept = filter_traceable(rows, ctx);
            let dropped = total - kept.len();
            let output = if kept.is_empty() { None } else { Some(kept) };
            (message, output, dropped)
        }
    }
}

/// Keep only rows whose every key/value pair is backed by some row an
/// earlier successful block produced.
fn filter_traceable(
    rows: Vec<Map<String, Value>>,
    ctx: &BlockContext<'_>,
) -> Vec<Map<String, Value>> {
    let evidence = ctx.memory.success_rows();
    rows.into_iter()
        .filter(|row| {
            evidence.iter().any(|source| {
                row.iter().all(|(key, value)| source.get(key) == Some(value))
            })
        })
        .collect()
}
