//! Structured logging events emitted by the orchestration engine.
//!
//! Events serialize as tagged JSON and are written to stderr as
//! `__AGENT_EVENT__:<json>` lines so an outer shell (TUI, log collector) can
//! parse them out of the raw stream.

use serde::{Deserialize, Serialize};

/// One structured engine event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentLog {
    /// Planner produced the initial queue
    PlanCreated {
        session_id: String,
        task_count: usize,
    },
    /// Planner output was rejected before execution
    PlanRejected {
        session_id: String,
        reason: String,
    },
    /// A block was popped from the queue and dispatched
    BlockStarted {
        session_id: String,
        index: usize,
        block: String,
        description: String,
    },
    /// Block finished with a success entry
    BlockCompleted {
        session_id: String,
        index: usize,
        block: String,
        summary: String,
    },
    /// Block finished with a failure entry
    BlockFailed {
        session_id: String,
        index: usize,
        block: String,
        error: String,
        recoverable: bool,
    },
    /// Schema guard refused an instruction before any store call
    ValidationRejected {
        session_id: String,
        table: String,
        reason: String,
    },
    /// Reflection appended more tasks to the queue
    ReflectionContinued {
        session_id: String,
        cycle: usize,
        appended: usize,
    },
    /// Session reached a terminal answer
    SessionDone {
        session_id: String,
        cycles: usize,
        truncated: bool,
    },
    /// Session aborted with a structured error
    SessionFailed {
        session_id: String,
        error: String,
    },
}

impl AgentLog {
    /// Emit this event to stderr for outer-shell parsing.
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("__AGENT_EVENT__:{}", json);
            // Force flush stderr in async contexts
            let _ = std::io::stderr().flush();
        }
    }
}

#[macro_export]
macro_rules! log_plan_created {
    ($session:expr, $count:expr) => {
        $crate::AgentLog::PlanCreated {
            session_id: $session.to_string(),
            task_count: $count,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_plan_rejected {
    ($session:expr, $reason:expr) => {
        $crate::AgentLog::PlanRejected {
            session_id: $session.to_string(),
            reason: $reason.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_block_started {
    ($session:expr, $index:expr, $block:expr, $desc:expr) => {
        $crate::AgentLog::BlockStarted {
            session_id: $session.to_string(),
            index: $index,
            block: $block.to_string(),
            description: $desc.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_block_completed {
    ($session:expr, $index:expr, $block:expr, $summary:expr) => {
        $crate::AgentLog::BlockCompleted {
            session_id: $session.to_string(),
            index: $index,
            block: $block.to_string(),
            summary: $summary.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_block_failed {
    ($session:expr, $index:expr, $block:expr, $error:expr, $recoverable:expr) => {
        $crate::AgentLog::BlockFailed {
            session_id: $session.to_string(),
            index: $index,
            block: $block.to_string(),
            error: $error.to_string(),
            recoverable: $recoverable,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_validation_rejected {
    ($session:expr, $table:expr, $reason:expr) => {
        $crate::AgentLog::ValidationRejected {
            session_id: $session.to_string(),
            table: $table.to_string(),
            reason: $reason.to_string(),
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_reflection_continued {
    ($session:expr, $cycle:expr, $appended:expr) => {
        $crate::AgentLog::ReflectionContinued {
            session_id: $session.to_string(),
            cycle: $cycle,
            appended: $appended,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_session_done {
    ($session:expr, $cycles:expr, $truncated:expr) => {
        $crate::AgentLog::SessionDone {
            session_id: $session.to_string(),
            cycles: $cycles,
            truncated: $truncated,
        }
        .emit();
    };
}

#[macro_export]
macro_rules! log_session_failed {
    ($session:expr, $error:expr) => {
        $crate::AgentLog::SessionFailed {
            session_id: $session.to_string(),
            error: $error.to_string(),
        }
        .emit();
    };
}
