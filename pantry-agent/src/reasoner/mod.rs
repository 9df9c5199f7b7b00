//! LLM backends implementing the planner and block-reasoner capabilities.

mod openai;
pub mod prompts;

pub use openai::OpenAiReasoner;
