use thiserror::Error;

use crate::generation::GenerationError;

/// Errors that fail a single patient's consultation.
#[derive(Debug, Error)]
pub enum ConsultationError {
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// The model answered, but not in the shape the protocol requires.
    #[error("Malformed {stage} output: {reply}")]
    MalformedOutput { stage: &'static str, reply: String },

    #[error("Unknown diagnosis field: {0}")]
    UnknownField(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Workflow error: {0}")]
    Flow(consult_flow::FlowError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ConsultationError {
    pub fn malformed(stage: &'static str, reply: impl Into<String>) -> Self {
        ConsultationError::MalformedOutput {
            stage,
            reply: reply.into(),
        }
    }
}

/// Startup errors: bad configuration, unknown engines, unreadable inputs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown engine: {0}")]
    UnknownEngine(String),

    #[error("Environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot load diagnoses for doctor {doctor}: {source}")]
    DiagnosisSource {
        doctor: String,
        #[source]
        source: ConsultationError,
    },
}

/// Domain errors travel through the engine as opaque task errors; recover them
/// on the way out.
impl From<consult_flow::FlowError> for ConsultationError {
    fn from(err: consult_flow::FlowError) -> Self {
        match err {
            consult_flow::FlowError::Task(inner) => match inner.downcast::<ConsultationError>() {
                Ok(domain) => domain,
                Err(other) => ConsultationError::Flow(consult_flow::FlowError::Task(other)),
            },
            other => ConsultationError::Flow(other),
        }
    }
}

impl From<ConsultationError> for consult_flow::FlowError {
    fn from(err: ConsultationError) -> Self {
        match err {
            ConsultationError::Flow(inner) => inner,
            other => consult_flow::FlowError::Task(anyhow::Error::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsultationError>;
