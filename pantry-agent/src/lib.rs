//! Pantry agent: an LLM-driven task orchestration engine over SQLite.
//!
//! A user request is planned into an ordered queue of typed blocks, each
//! block is executed with schema-guard validation in front of every store
//! access, and a reflection step decides when the session has an honest
//! answer. See the crate modules:
//!
//! - [`schema`]: the table/column/action allow-list guard
//! - [`store`]: SQLite persistence, batch transactions, documents, history
//! - [`memory`]: the append-only per-session audit log
//! - [`queue`]: the plan queue, extendable only through reflection
//! - [`blocks`]: block handlers and their registry
//! - [`orchestrator`]: the per-turn state machine
//! - [`reasoner`]: the OpenAI planner/reasoner backend
//! - [`service`]: the caller-facing boundary

pub mod blocks;
pub mod config;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod reasoner;
pub mod schema;
pub mod service;
pub mod store;

pub use config::AgentConfig;
pub use orchestrator::{Orchestrator, OrchestratorConfig, SessionOutcome, TurnRequest};
pub use service::{AgentReply, AgentService, IngestedDocument};
