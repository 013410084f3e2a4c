use thiserror::Error;

/// Errors raised while building or executing a task graph.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Session {session_id} exceeded the step budget of {max_steps}")]
    StepLimitExceeded { session_id: String, max_steps: usize },

    /// A task failed with a domain error; callers can recover it with
    /// [`FlowError::downcast_ref`].
    #[error(transparent)]
    Task(#[from] anyhow::Error),
}

impl FlowError {
    /// Borrow the domain error carried by a [`FlowError::Task`], if it has type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            FlowError::Task(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("bad reply")]
    struct BadReply;

    #[test]
    fn test_downcast_domain_error() {
        let err: FlowError = anyhow::Error::new(BadReply).into();
        assert!(err.downcast_ref::<BadReply>().is_some());
        assert_eq!(err.to_string(), "bad reply");

        let other = FlowError::TaskNotFound("x".to_string());
        assert!(other.downcast_ref::<BadReply>().is_none());
    }
}
