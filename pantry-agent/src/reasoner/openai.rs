//! OpenAI chat-completions backend for the [`Planner`] and [`BlockReasoner`]
//! capabilities.

use pantry_agent_sdk::{async_trait, AgentError, BlockKind, BlockReasoner, Planner, Task};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::reasoner::prompts;

pub struct OpenAiReasoner {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    default_model: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiReasoner {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            default_model: default_model.into(),
        }
    }

    /// One chat-completions round trip; returns the raw assistant text.
    async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<String, AgentError> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "temperature": 0.7,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }))
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Transport(format!(
                "chat completions returned {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AgentError::Transport(format!("malformed completion body: {}", e)))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AgentError::Transport("completion had no content".to_string()))
    }
}

#[async_trait]
impl Planner for OpenAiReasoner {
    async fn plan(
        &self,
        user_text: &str,
        schema_description: &str,
        model: Option<&str>,
    ) -> Result<Vec<Task>, AgentError> {
        let model = model.unwrap_or(&self.default_model);
        let system = prompts::plan_system_prompt(schema_description);
        let user = prompts::plan_user_prompt(user_text);
        let raw = self.complete(model, &system, &user).await?;
        parse_plan(&raw)
    }
}

#[async_trait]
impl BlockReasoner for OpenAiReasoner {
    async fn propose(&self, task: &Task, memory: &Value) -> Result<Value, AgentError> {
        // Per-turn model selector travels inside the memory snapshot.
        let model = memory
            .get("agent_model")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_model)
            .to_string();
        let system = prompts::block_system_prompt(task);
        let user = serde_json::to_string_pretty(memory)
            .map_err(|e| AgentError::Transport(format!("snapshot serialization: {}", e)))?;
        let raw = self.complete(&model, &system, &user).await?;
        let stripped = prompts::strip_code_fences(&raw);
        serde_json::from_str(stripped).map_err(|e| {
            AgentError::Transport(format!(
                "{} reasoner answered with invalid JSON: {}",
                task.block.as_str(),
                e
            ))
        })
    }
}

/// Parse the planner's JSON array into tasks, tolerating the loose field
/// names models tend to emit ("type" for "block", bare kind names).
fn parse_plan(raw: &str) -> Result<Vec<Task>, AgentError> {
    let stripped = prompts::strip_code_fences(raw);
    let value: Value = serde_json::from_str(stripped)
        .map_err(|e| AgentError::PlanInvalid(format!("plan is not valid JSON: {}", e)))?;
    let array = value
        .as_array()
        .ok_or_else(|| AgentError::PlanInvalid("plan is not a JSON array".to_string()))?;

    let mut tasks = Vec::with_capacity(array.len());
    for (i, entry) in array.iter().enumerate() {
        let object = entry
            .as_object()
            .ok_or_else(|| AgentError::PlanInvalid(format!("task {} is not an object", i)))?;
        let kind_name = object
            .get("block")
            .or_else(|| object.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::PlanInvalid(format!("task {} has no block kind", i)))?;
        let block = BlockKind::parse(kind_name)
            .ok_or_else(|| AgentError::PlanInvalid(format!("unknown block kind '{}'", kind_name)))?;

        let field = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let mut task = Task::new(block, field("description"));
        task.title = field("title");
        task.reasoning = field("reasoning");
        for (key, val) in object {
            if !matches!(key.as_str(), "block" | "type" | "description" | "title" | "reasoning") {
                task.extra.insert(key.clone(), val.clone());
            }
        }
        tasks.push(task);
    }
    Ok(tasks)
}
