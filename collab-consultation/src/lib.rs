//! Collaborative consultation: a panel of doctor agents diagnoses a patient
//! independently, then revises in rounds until a host agent judges that the
//! panel agrees or the round budget runs out.

pub mod agents;
pub mod config;
pub mod diagnosis;
pub mod dialogue;
pub mod error;
pub mod generation;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod record_log;
pub mod registry;
pub mod sections;
pub mod tasks;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use agents::{DoctorAgent, HostAgent, LlmPatient, LlmReporter, PatientPort, ReporterPort};
pub use config::{ConsultationConfig, DiscussionMode};
pub use diagnosis::{DiagnosisField, StructuredDiagnosis};
pub use error::{ConfigError, ConsultationError, Result};
pub use generation::{GenerationError, GenerationPort};
pub use models::{DiscussionRecord, PatientId, PatientProfile};
pub use orchestrator::{CollaborativeConsultation, RunSummary};
pub use record_log::RecordLog;
pub use registry::EngineRegistry;
