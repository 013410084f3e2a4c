//! FlowRunner – drives a session through its graph until the graph ends.
//!
//! `Graph::execute_session` runs exactly one task. Batch workloads such as a
//! consultation want the whole state machine in one call, so the runner loops
//! step by step and stops either at `End` or when the step budget is spent.
//! The budget is the only bound on a looping graph; pick it from whatever
//! limits the loop (for example the round cap of a discussion).

use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::{FlowError, Result},
    graph::{ExecutionStatus, Graph},
    session::Session,
};

/// Default number of steps a session may take before it is aborted.
pub const DEFAULT_MAX_STEPS: usize = 64;

#[derive(Clone)]
pub struct FlowRunner {
    graph: Arc<Graph>,
    max_steps: usize,
}

impl FlowRunner {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            graph,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Run the session to completion and return the final task's response.
    pub async fn run(&self, session: &mut Session) -> Result<Option<String>> {
        loop {
            if session.steps >= self.max_steps {
                return Err(FlowError::StepLimitExceeded {
                    session_id: session.id.clone(),
                    max_steps: self.max_steps,
                });
            }

            let result = self.graph.execute_session(session).await?;
            debug!(
                session_id = %session.id,
                step = session.steps,
                current_task = %session.current_task_id,
                status = ?result.status,
                "step finished"
            );

            if result.status == ExecutionStatus::Completed {
                info!(
                    session_id = %session.id,
                    graph_id = %self.graph.id,
                    steps = session.steps,
                    "session completed"
                );
                return Ok(result.response);
            }
        }
    }
}
