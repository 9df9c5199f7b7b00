//! `chat_block`: a conversational reply with no store access.

use pantry_agent_sdk::{async_trait, BlockKind, BlockResult, ChatBlockArgs, Task};
use serde_json::{json, Value};

use crate::blocks::{parse_args, propose_payload, BlockContext, BlockHandler};

pub struct ChatBlockHandler;

#[async_trait]
impl BlockHandler for ChatBlockHandler {
    fn kind(&self) -> BlockKind {
        BlockKind::Chat
    }

    async fn execute(&self, task: &Task, ctx: &BlockContext<'_>) -> BlockResult {
        let payload = match propose_payload(task, ctx).await {
            Ok(payload) => payload,
            Err(failure) => return failure,
        };

        // Smaller models sometimes answer with a bare string or under a
        // generic "response" key instead of the documented shape.
        let response_text = match extract_response_text(&payload) {
            Some(text) => text,
            None => {
                let args: ChatBlockArgs = match parse_args(payload, BlockKind::Chat) {
                    Ok(args) => args,
                    Err(failure) => return failure,
                };
                args.response_text
            }
        };

        if response_text.trim().is_empty() {
            return BlockResult::failure("chat reasoner returned an empty reply", true);
        }

        BlockResult::success(json!({ "response_text": response_text }))
    }
}

fn extract_response_text(payload: &Value) -> Option<String> {
    if let Some(text) = payload.as_str() {
        return Some(text.to_string());
    }
    payload
        .get("response")
        .and_then(Value::as_str)
        .map(str::to_string)
}
