//! Caller-facing service: the stable boundary in front of the orchestrator.
//!
//! Callers send a message (optionally with a per-turn model selector) and
//! get back a response; documents can be ingested and searched; the
//! conversation history is persisted across turns.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use pantry_agent_sdk::{AgentError, BlockReasoner, Planner};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::AgentConfig;
use crate::orchestrator::{Orchestrator, OrchestratorConfig, TurnRequest};
use crate::schema::SchemaGuard;
use crate::store::{DocumentMatch, Exchange, Store};

/// One completed turn, as seen by the caller.
#[derive(Debug, Serialize)]
pub struct AgentReply {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_output: Option<Vec<Map<String, Value>>>,
    pub session_id: String,
    pub truncated: bool,
    pub trace: Vec<String>,
}

/// Receipt for an ingested document.
#[derive(Debug, Serialize)]
pub struct IngestedDocument {
    pub doc_id: i64,
    pub description: String,
}

pub struct AgentService {
    store: Arc<Store>,
    orchestrator: Orchestrator,
    history_window: usize,
}

impl AgentService {
    pub fn new(
        config: &AgentConfig,
        planner: Arc<dyn Planner>,
        reasoner: Arc<dyn BlockReasoner>,
    ) -> Result<Self> {
        let store = Arc::new(
            Store::open(config.database_path.clone())
                .context("failed to open the pantry database")?,
        );
        store.init_schema()?;

        let guard = Arc::new(match &config.schema_rules_path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read schema rules {}", path.display()))?;
                SchemaGuard::from_yaml(&yaml)?
            }
            None => SchemaGuard::default_rules(),
        });

        Ok(Self::assemble(store, guard, planner, reasoner, config))
    }

    /// Build a service on an already-open store. Used by tests and by the
    /// demo seeding path.
    pub fn with_store(
        store: Arc<Store>,
        guard: Arc<SchemaGuard>,
        planner: Arc<dyn Planner>,
        reasoner: Arc<dyn BlockReasoner>,
        config: &AgentConfig,
    ) -> Self {
        Self::assemble(store, guard, planner, reasoner, config)
    }

    fn assemble(
        store: Arc<Store>,
        guard: Arc<SchemaGuard>,
        planner: Arc<dyn Planner>,
        reasoner: Arc<dyn BlockReasoner>,
        config: &AgentConfig,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            guard,
            Arc::clone(&store),
            planner,
            reasoner,
            OrchestratorConfig {
                max_reflections: config.max_reflections,
                block_timeout: config.block_timeout,
            },
        );
        Self {
            store,
            orchestrator,
            history_window: config.history_window,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run one user turn end to end and persist the exchange.
    pub async fn handle_message(
        &self,
        message: &str,
        model: Option<String>,
    ) -> Result<AgentReply, AgentError> {
        let context = self
            .conversation_context()
            .map_err(|e| AgentError::Store(e.to_string()))?;

        let mut request = TurnRequest::new(message).with_context(context);
        if let Some(model) = model {
            request = request.with_model(model);
        }
        let outcome = self.orchestrator.run_turn(request).await?;

        self.store
            .append_exchange(message, &outcome.response)
            .map_err(|e| AgentError::Store(e.to_string()))?;

        Ok(AgentReply {
            response: outcome.response,
            data_output: outcome.data_output,
            session_id: outcome.session_id,
            truncated: outcome.truncated,
            trace: outcome.trace,
        })
    }

    /// Store an uploaded document and return its id. The description falls
    /// back to the file stem when the caller gives none.
    pub fn ingest_document(
        &self,
        filename: &str,
        content: &[u8],
        description: Option<String>,
    ) -> Result<IngestedDocument> {
        let text = String::from_utf8_lossy(content).into_owned();
        let description = description.unwrap_or_else(|| {
            let stem = Path::new(filename)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(filename);
            format!("Uploaded document: {}", stem)
        });
        let doc_id = self.store.insert_document(filename, content, &text, &description)?;
        Ok(IngestedDocument {
            doc_id,
            description,
        })
    }

    pub fn search_documents(&self, query: &str, top_k: usize) -> Result<Vec<DocumentMatch>> {
        self.store.search_documents(query, top_k)
    }

    /// Most recent exchanges, oldest first.
    pub fn history(&self, limit: usize) -> Result<Vec<Exchange>> {
        self.store.recent_exchanges(limit)
    }

    /// Rolling window of recent exchanges formatted for the reasoner.
    fn conversation_context(&self) -> Result<String> {
        let exchanges = self.store.recent_exchanges(self.history_window)?;
        let mut lines = Vec::with_capacity(exchanges.len() * 2);
        for exchange in exchanges {
            lines.push(format!("User: {}", exchange.user_message));
            lines.push(format!("Assistant: {}", exchange.response));
        }
        Ok(lines.join("\n"))
    }
}
