use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

use crate::{
    context::Context,
    error::{FlowError, Result},
    session::Session,
    task::{NextAction, Task, TaskResult},
};

/// Type alias for edge condition functions
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Edge between tasks in the graph
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
}

/// A graph of tasks that can be executed one step at a time
pub struct Graph {
    pub id: String,
    tasks: DashMap<String, Arc<dyn Task>>,
    edges: Vec<Edge>,
    start_task_id: Option<String>,
}

impl Graph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: DashMap::new(),
            edges: Vec::new(),
            start_task_id: None,
        }
    }

    /// Execute the session's current task and advance its pointer.
    ///
    /// Exactly one task runs per call. The returned status tells the caller
    /// whether the graph reached an `End`.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        let task_id = session.current_task_id.clone();
        let span = info_span!("task", session_id = %session.id, task_id = %task_id);
        let result = self
            .execute_single_task(&task_id, session.context.clone())
            .instrument(span)
            .await?;

        session.steps += 1;
        session.status_message = result.status_message.clone();

        match &result.next_action {
            NextAction::Continue => match self.find_next_task(&result.task_id, &session.context) {
                Some(next_task_id) => {
                    debug!(from = %result.task_id, to = %next_task_id, "following edge");
                    session.current_task_id = next_task_id;
                    Ok(ExecutionResult {
                        response: result.response,
                        status: ExecutionStatus::Paused,
                    })
                }
                None => Err(FlowError::TaskExecutionFailed(format!(
                    "no outgoing edge from {}",
                    result.task_id
                ))),
            },
            NextAction::GoTo(target_id) => {
                if self.tasks.contains_key(target_id) {
                    session.current_task_id = target_id.clone();
                    Ok(ExecutionResult {
                        response: result.response,
                        status: ExecutionStatus::Paused,
                    })
                } else {
                    Err(FlowError::TaskNotFound(target_id.clone()))
                }
            }
            NextAction::End => {
                session.current_task_id = result.task_id.clone();
                Ok(ExecutionResult {
                    response: result.response,
                    status: ExecutionStatus::Completed,
                })
            }
        }
    }

    async fn execute_single_task(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        // Clone the Arc out so the map guard is not held across the await
        let task = self
            .get_task(task_id)
            .ok_or_else(|| FlowError::TaskNotFound(task_id.to_string()))?;

        let mut result = task.run(context).await?;
        result.task_id = task_id.to_string();
        Ok(result)
    }

    /// Find the next task based on edges and conditions.
    ///
    /// Edges are checked in insertion order; the first unconditional edge or
    /// conditional edge whose predicate holds wins.
    pub fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        self.edges
            .iter()
            .filter(|edge| edge.from == current_task_id)
            .find(|edge| match &edge.condition {
                Some(condition) => condition(context),
                None => true,
            })
            .map(|edge| edge.to.clone())
    }

    pub fn start_task_id(&self) -> Option<String> {
        self.start_task_id.clone()
    }

    pub fn get_task(&self, task_id: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(task_id).map(|entry| entry.clone())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(id),
        }
    }

    /// Add a task; the first task added becomes the start task.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.tasks.is_empty() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    /// Branch from `from` to `yes` when `condition` holds, otherwise to `no`.
    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        condition: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        let from = from.into();
        self.graph.edges.push(Edge {
            from: from.clone(),
            to: yes.into(),
            condition: Some(Arc::new(condition)),
        });
        self.graph.edges.push(Edge {
            from,
            to: no.into(),
            condition: None,
        });
        self
    }

    pub fn set_start_task(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if self.graph.tasks.contains_key(&task_id) {
            self.graph.start_task_id = Some(task_id);
        }
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// Status of graph execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The session pointer moved to another task; more steps remain
    Paused,
    /// The graph reached an `End`
    Completed,
}
