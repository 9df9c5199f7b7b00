//! Plan queue: the ordered, mutable list of pending tasks for one session.
//!
//! Seeded once by the planner and extendable only through reflection output.
//! A plan segment must end in a terminal (reflect) task; the initial plan is
//! rejected outright when it does not, and reflection-appended segments are
//! normalized by appending a reflect task, so the queue can never drain
//! without a terminal decision.

use std::collections::VecDeque;

use pantry_agent_sdk::{AgentError, BlockKind, Task};

#[derive(Debug)]
pub struct PlanQueue {
    tasks: VecDeque<Task>,
}

impl PlanQueue {
    /// Build the initial queue from planner output. Fails with `PlanInvalid`
    /// when the plan is empty or its last task is not terminal-shaped.
    pub fn from_plan(tasks: Vec<Task>) -> Result<Self, AgentError> {
        if tasks.is_empty() {
            return Err(AgentError::PlanInvalid("planner returned no tasks".to_string()));
        }
        if let Some(last) = tasks.last() {
            if !last.block.is_terminal() {
                return Err(AgentError::PlanInvalid(format!(
                    "plan must end with a reflect task, ends with {}",
                    last.block.as_str()
                )));
            }
        }
        Ok(Self {
            tasks: tasks.into(),
        })
    }

    /// Pop the next pending task.
    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Append a reflection-proposed segment. Returns the number of tasks
    /// actually appended, including the normalizing reflect task when the
    /// segment was not terminal-shaped.
    pub fn extend_from_reflection(&mut self, tasks: Vec<Task>) -> usize {
        if tasks.is_empty() {
            return 0;
        }
        let needs_terminal = !tasks.last().map(|t| t.block.is_terminal()).unwrap_or(false);
        let mut appended = tasks.len();
        self.tasks.extend(tasks);
        if needs_terminal {
            self.tasks.push_back(Task::new(
                BlockKind::Reflect,
                "Review the results so far and decide whether to answer or continue",
            ));
            appended += 1;
        }
        appended
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
