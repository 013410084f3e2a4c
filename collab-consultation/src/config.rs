//! YAML run configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::generation::{BackendKind, RetryPolicy};
use crate::models::PatientProfile;

const MIN_DOCTORS: usize = 2;
const MAX_DOCTORS: usize = 26;

/// How doctors revise between agreement checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionMode {
    /// Doctors see each other's opinions only
    #[default]
    #[serde(alias = "Parallel")]
    Parallel,
    /// Doctors also see the host's ranked disagreement points
    #[serde(alias = "Parallel_with_Critique")]
    ParallelWithCritique,
}

impl DiscussionMode {
    pub fn wants_critique(self) -> bool {
        matches!(self, DiscussionMode::ParallelWithCritique)
    }
}

/// One named model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: BackendKind,
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model to switch to once when the primary rejects a request
    #[serde(default)]
    pub fallback_model: Option<String>,
}

impl EngineConfig {
    pub fn api_key_env(&self) -> &str {
        match (&self.api_key_env, self.backend) {
            (Some(var), _) => var,
            (None, BackendKind::OpenRouter) => "OPENROUTER_API_KEY",
            (None, BackendKind::OpenAi) => "OPENAI_API_KEY",
        }
    }
}

fn default_max_tokens() -> u64 {
    2048
}

/// Where a doctor's initial diagnoses come from when not interviewing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosisSource {
    /// Prior single-doctor consultation log; the last dialog turn is the diagnosis
    Transcript { path: PathBuf },
    /// Evaluation rows for one doctor
    Evaluation { path: PathBuf, doctor_key: String },
}

impl DiagnosisSource {
    /// Identifier persisted in `doctor_ids`.
    pub fn id(&self) -> String {
        match self {
            DiagnosisSource::Transcript { path } => path.display().to_string(),
            DiagnosisSource::Evaluation { path, doctor_key } => {
                format!("{}#{}", path.display(), doctor_key)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorConfig {
    pub engine: String,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub diagnosis_source: Option<DiagnosisSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub engine: String,
    #[serde(default)]
    pub system_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationConfig {
    pub patient_database: PathBuf,
    #[serde(default)]
    pub doctor_database: Option<String>,
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
    #[serde(default = "default_max_discussion_turn")]
    pub max_discussion_turn: u32,
    #[serde(default = "default_max_conversation_turn")]
    pub max_conversation_turn: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Use only the first n configured doctors
    #[serde(default)]
    pub number_of_doctors: Option<usize>,
    #[serde(default)]
    pub discussion_mode: DiscussionMode,
    pub engines: HashMap<String, EngineConfig>,
    pub doctors: Vec<DoctorConfig>,
    pub host: AgentConfig,
    pub patient: AgentConfig,
    pub reporter: AgentConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_save_path() -> PathBuf {
    PathBuf::from("dialog_history.jsonl")
}

fn default_max_discussion_turn() -> u32 {
    4
}

fn default_max_conversation_turn() -> u32 {
    10
}

fn default_max_workers() -> usize {
    4
}

impl ConsultationConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: ConsultationConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml(&text)
    }

    /// Doctors taking part, after applying `number_of_doctors`.
    pub fn active_doctors(&self) -> &[DoctorConfig] {
        let n = self
            .number_of_doctors
            .unwrap_or(self.doctors.len())
            .min(self.doctors.len());
        &self.doctors[..n]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let doctors = self.active_doctors().len();
        if !(MIN_DOCTORS..=MAX_DOCTORS).contains(&doctors) {
            return Err(ConfigError::Invalid(format!(
                "a consultation needs between {} and {} doctors, got {}",
                MIN_DOCTORS, MAX_DOCTORS, doctors
            )));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".to_string()));
        }

        let referenced = self
            .active_doctors()
            .iter()
            .map(|d| d.engine.as_str())
            .chain([
                self.host.engine.as_str(),
                self.patient.engine.as_str(),
                self.reporter.engine.as_str(),
            ]);
        for engine in referenced {
            if !self.engines.contains_key(engine) {
                return Err(ConfigError::UnknownEngine(engine.to_string()));
            }
        }
        Ok(())
    }

    pub async fn load_patients(&self) -> Result<Vec<PatientProfile>, ConfigError> {
        let text = tokio::fs::read_to_string(&self.patient_database)
            .await
            .map_err(|source| ConfigError::Read {
                path: self.patient_database.display().to_string(),
                source,
            })?;
        Ok(serde_json::from_str(&text)?)
    }
}
