//! Prompt templates for the OpenAI-backed planner and block reasoner.

use pantry_agent_sdk::{BlockKind, Task};

/// System prompt for the planning call. The model must answer with a JSON
/// array of tasks whose last element is a reflect task.
pub fn plan_system_prompt(schema_description: &str) -> String {
    format!(
        r#"You are a task planner for a household pantry assistant backed by a SQL database.

Decompose the user's request into an ordered JSON array of tasks. Each task is an object:
  {{"block": "<kind>", "title": "<short label>", "description": "<what to do>", "reasoning": "<why>"}}

Available block kinds:
- "sql_block": run exactly one SELECT, INSERT, UPDATE or DELETE against one table
- "parse_block": turn free text into a structured item (name, quantity, unit, ...)
- "batch_insert_block" / "batch_update_block" / "batch_delete_block": apply many rows of the same mutation in one transaction
- "chat_block": answer conversationally without touching the database
- "reflect_block": review all results so far and either produce the final answer or append more tasks

Rules:
- The LAST task must always be "reflect_block".
- Use "parse_block" before inserting items described in free text.
- Prefer one "sql_block" SELECT before updates or deletes, so reflection can verify what exists.
- Never invent tables or columns. The database schema is:

{schema_description}

Respond with ONLY the JSON array, no prose."#
    )
}

/// User message for the planning call.
pub fn plan_user_prompt(user_text: &str) -> String {
    format!("User request: {user_text}")
}

/// System prompt for a single block's argument proposal. The model sees the
/// full task-memory snapshot and must answer with one JSON object.
pub fn block_system_prompt(task: &Task) -> String {
    let contract = match task.block {
        BlockKind::Sql => {
            r#"Respond with a JSON object:
  {"table_name": "...", "action_type": "SELECT|INSERT|UPDATE|DELETE",
   "columns": [...], "values": [...], "where_clause": "WHERE ..." or null,
   "explanation": "..."}
For SELECT, "columns" may be empty to mean all columns. For UPDATE and
DELETE a where_clause is mandatory. Use values from earlier results in the
memory snapshot; never invent ids."#
        }
        BlockKind::Parse => {
            r#"Respond with a JSON object:
  {"raw_text": "...", "parsed_item": {"name": ..., "quantity": ..., ...},
   "explanation": "..."}
Only include fields of parsed_item you can actually infer from the text.
OMIT anything unknown; never fill placeholders or nulls."#
        }
        BlockKind::BatchInsert | BlockKind::BatchUpdate | BlockKind::BatchDelete => {
            r#"Respond with a JSON object:
  {"table_name": "...",
   "rows": [{"columns": [...], "values": [...], "where_clause": "WHERE ..." or null}, ...],
   "explanation": "..."}
Every row of a batch update or delete needs its own where_clause."#
        }
        BlockKind::Chat => {
            r#"Respond with a JSON object: {"response_text": "..."}
Be warm and concise. Use the conversation context in the memory snapshot."#
        }
        BlockKind::Reflect => {
            r#"Review every entry in the memory snapshot, then respond with ONE of:
  {"final_message": "...", "data_output": [ ...row objects... ]}   to finish, or
  {"additional_tasks": [ {"block": ..., "description": ...}, ... ]} to continue.
data_output may only contain rows that appear in earlier successful results;
omit it when there is nothing to show. If a database step failed, either
propose follow-up tasks that fix it or report the failure honestly."#
        }
    };

    format!(
        "You are executing one step of a pantry assistant's plan.\n\
         Step: {}\n\
         Goal: {}\n\n\
         The user message contains a JSON snapshot of everything done so far.\n\n\
         {}\n\nRespond with ONLY the JSON, no prose.",
        task.block.as_str(),
        task.description,
        contract
    )
}

/// Strip markdown code fences some models wrap around JSON answers.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_start().strip_suffix("```").unwrap_or(inner).trim()
}
