use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DiagnosisSource;
use crate::diagnosis::{
    DiagnosisField, DiagnosisLookup, FieldSelector, StructuredDiagnosis, opinion_format,
};
use crate::dialogue::{self, DialogTurn};
use crate::error::Result;
use crate::generation::GenerationPort;
use crate::memory::{MemoryStore, Turn};
use crate::models::{Findings, PatientId, PatientProfile};
use crate::sections;

use super::{PatientPort, ReporterPort};

const DEFAULT_SYSTEM_MESSAGE: &str = "You are a professional and patient doctor. A patient will consult you about their condition. You should:\n\
(1) Not make a diagnosis too early when information is insufficient.\n\
(2) Ask the patient questions proactively and repeatedly to gather enough information.\n\
(3) Ask only one short question at a time.\n\
(4) Ask the patient to take examinations when necessary and wait for the results.\n\
(5) Finally, based on the patient's condition and examination results, give the diagnosis result, the diagnosis basis and the treatment plan.\n\
(6) The diagnosis result must name a specific disease; the treatment plan must not include examinations.";

const GREETING: &str = "Hello, what seems to be the problem?";

/// One doctor's opinion as shown to the rest of the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerOpinion {
    pub label: String,
    pub diagnosis: StructuredDiagnosis,
}

impl PeerOpinion {
    pub fn header(&self) -> String {
        sections::header(&format!("Doctor {}", self.label))
    }

    /// Header plus result, basis and plan.
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.header(), self.diagnosis.render_opinion())
    }

    /// Header plus whichever findings sections the doctor holds.
    pub fn render_findings(&self) -> String {
        let body: String = DiagnosisField::FINDINGS
            .iter()
            .filter_map(|field| {
                self.diagnosis
                    .get(*field)
                    .map(|value| sections::render(field.section_name(), value))
            })
            .collect();
        format!("{}\n{}", self.header(), body)
    }
}

#[derive(Deserialize)]
struct TranscriptLine {
    patient_id: PatientId,
    dialog_history: Vec<TranscriptTurn>,
}

#[derive(Deserialize)]
struct TranscriptTurn {
    content: String,
}

#[derive(Deserialize)]
struct EvaluationLine {
    doctor_name: String,
    patient_id: PatientId,
    doctor_diagnosis: EvaluatedDiagnosis,
}

#[derive(Deserialize)]
struct EvaluatedDiagnosis {
    diagnosis: String,
}

/// An independent opinion-holder on the panel.
///
/// Diagnoses and conversation histories are keyed by patient, so a single
/// doctor can take part in many consultations running at the same time.
pub struct DoctorAgent {
    label: String,
    generator: Arc<dyn GenerationPort>,
    source_id: String,
    greeting: String,
    diagnoses: DashMap<PatientId, StructuredDiagnosis>,
    memory: MemoryStore<PatientId>,
}

impl DoctorAgent {
    pub fn new(
        label: impl Into<String>,
        generator: Arc<dyn GenerationPort>,
        system_message: Option<String>,
    ) -> Self {
        let source_id = generator.model_name().to_string();
        Self {
            label: label.into(),
            generator,
            source_id,
            greeting: GREETING.to_string(),
            diagnoses: DashMap::new(),
            memory: MemoryStore::new(
                system_message.unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string()),
            ),
        }
    }

    /// Panel label for the `index`-th doctor: A, B, C, ...
    pub fn label_for(index: usize) -> String {
        char::from(b'A' + (index % 26) as u8).to_string()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn name(&self) -> String {
        format!("Doctor {}", self.label)
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Where this doctor's opinions come from, persisted in `doctor_ids`.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn diagnosis(&self, patient_id: &PatientId) -> StructuredDiagnosis {
        self.diagnoses.entry(patient_id.clone()).or_default().clone()
    }

    /// `selector` is a field key or `ALL`; anything else is rejected.
    pub fn get_diagnosis(&self, patient_id: &PatientId, selector: &str) -> Result<DiagnosisLookup> {
        let selector: FieldSelector = selector.parse()?;
        Ok(self.diagnosis(patient_id).lookup(selector))
    }

    pub fn field(&self, patient_id: &PatientId, field: DiagnosisField) -> Option<String> {
        self.diagnoses
            .get(patient_id)
            .and_then(|record| record.get(field).map(str::to_string))
    }

    pub fn has_diagnosis(&self, patient_id: &PatientId) -> bool {
        self.diagnoses
            .get(patient_id)
            .is_some_and(|record| !record.is_empty())
    }

    pub fn opinion(&self, patient_id: &PatientId) -> PeerOpinion {
        PeerOpinion {
            label: self.label.clone(),
            diagnosis: self.diagnosis(patient_id),
        }
    }

    /// Merge `update` into this doctor's record for the patient.
    pub fn load_diagnosis(&self, patient_id: &PatientId, update: &StructuredDiagnosis) {
        self.diagnoses
            .entry(patient_id.clone())
            .or_default()
            .merge(update);
    }

    pub fn load_diagnosis_text(&self, patient_id: &PatientId, text: &str) -> StructuredDiagnosis {
        self.load_diagnosis(patient_id, &StructuredDiagnosis::parse(text));
        self.diagnosis(patient_id)
    }

    /// Preload initial diagnoses from `source`. Returns the number of patients loaded.
    pub async fn load_source(&mut self, source: &DiagnosisSource) -> Result<usize> {
        self.source_id = source.id();
        let loaded = match source {
            DiagnosisSource::Transcript { path } => {
                let text = tokio::fs::read_to_string(path).await?;
                let mut loaded = 0;
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    let entry: TranscriptLine = serde_json::from_str(line)?;
                    match entry.dialog_history.last() {
                        Some(turn) => {
                            self.load_diagnosis_text(&entry.patient_id, &turn.content);
                            loaded += 1;
                        }
                        None => warn!(
                            doctor = %self.label,
                            patient_id = %entry.patient_id,
                            "Transcript has no dialog turns"
                        ),
                    }
                }
                loaded
            }
            DiagnosisSource::Evaluation { path, doctor_key } => {
                let text = tokio::fs::read_to_string(path).await?;
                let mut loaded = 0;
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    let entry: EvaluationLine = serde_json::from_str(line)?;
                    if &entry.doctor_name != doctor_key {
                        continue;
                    }
                    self.load_diagnosis_text(&entry.patient_id, &entry.doctor_diagnosis.diagnosis);
                    loaded += 1;
                }
                loaded
            }
        };
        info!(doctor = %self.label, source = %self.source_id, loaded, "Loaded diagnoses");
        Ok(loaded)
    }

    /// Open the interview: remember and return the greeting.
    pub fn greet(&self, patient_id: &PatientId) -> String {
        self.memory
            .append(patient_id, Turn::assistant(self.greeting.clone()));
        self.greeting.clone()
    }

    /// One turn of the running conversation with this patient.
    pub async fn speak(&self, patient_id: &PatientId, content: &str) -> Result<String> {
        let mut conversation = self.memory.history(patient_id);
        conversation.push(Turn::user(content));
        let reply = self.generator.respond(&conversation).await?;
        self.memory.record_exchange(patient_id, content, reply.clone());
        Ok(reply)
    }

    /// Reset the conversation with one patient, or with every patient.
    pub fn forget(&self, patient_id: Option<&PatientId>) {
        self.memory.forget(patient_id);
    }

    pub fn history_len(&self, patient_id: &PatientId) -> usize {
        self.memory.len(patient_id)
    }

    /// Initial five-field diagnosis: preloaded if available, otherwise from an
    /// interview with the patient.
    pub async fn independent_diagnose(
        &self,
        profile: &PatientProfile,
        patient: &dyn PatientPort,
        reporter: &dyn ReporterPort,
        max_turns: u32,
    ) -> Result<StructuredDiagnosis> {
        if self.has_diagnosis(&profile.id) {
            debug!(doctor = %self.label, patient_id = %profile.id, "Using preloaded diagnosis");
            return Ok(self.diagnosis(&profile.id));
        }

        let transcript = dialogue::interview(self, profile, patient, reporter, max_turns).await?;
        let summary = transcript
            .last()
            .map(|turn: &DialogTurn| turn.content.clone())
            .unwrap_or_default();
        Ok(self.load_diagnosis_text(&profile.id, &summary))
    }

    /// Reconsider the current opinion against the shared findings.
    pub async fn revise_with_findings(
        &self,
        patient_id: &PatientId,
        findings: &Findings,
    ) -> Result<StructuredDiagnosis> {
        self.load_diagnosis(patient_id, &findings.as_diagnosis());
        let current = self.diagnosis(patient_id);

        let system_message = format!(
            "You are a professional doctor.\n\
             You are diagnosing a patient whose symptoms and auxiliary examinations are:\n{}\
             You will now receive a preliminary medical opinion containing a diagnosis result, \
             a diagnosis basis and a treatment plan.\n\
             (1) The opinion may be right or may contain mistakes; use it for reference only.\n\
             (2) Based on the symptoms and examination results, give a more correct and reasonable \
             diagnosis result, diagnosis basis and treatment plan.\n\
             (3) Answer in the following format.\n{}",
            current.render_fields(&DiagnosisField::FINDINGS),
            opinion_format()
        );
        let conversation = [
            Turn::system(system_message),
            Turn::user(current.render_opinion()),
        ];
        let reply = self.generator.respond(&conversation).await?;
        debug!(doctor = %self.label, patient_id = %patient_id, "Revised with findings");
        Ok(self.load_diagnosis_text(patient_id, &reply))
    }

    /// Reconcile with the panel. `peers` must exclude this doctor and hold the
    /// opinions as they stood when the round began.
    pub async fn revise_with_peers(
        &self,
        patient_id: &PatientId,
        peers: &[PeerOpinion],
        critique: Option<&str>,
    ) -> Result<StructuredDiagnosis> {
        let current = self.diagnosis(patient_id);

        let mut steps = vec![
            "You will now receive the opinions of other doctors, each with a diagnosis result, \
             a diagnosis basis and a treatment plan. Review and analyse them critically."
                .to_string(),
        ];
        if critique.is_some() {
            steps.push(
                "Pay attention to the points of disagreement raised by the chief physician."
                    .to_string(),
            );
        }
        steps.push(
            "If another doctor's opinion is more reasonable than yours in some part, adopt it to \
             improve your own."
                .to_string(),
        );
        steps.push(
            "If you believe your opinion is more scientific and reasonable, keep it unchanged."
                .to_string(),
        );
        steps.push("Answer in the following format.".to_string());
        let steps: String = steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("({}) {}\n", i + 1, step))
            .collect();

        let system_message = format!(
            "You are a professional doctor, {}.\n\
             You are diagnosing a patient whose symptoms and auxiliary examinations are:\n{}\
             Your preliminary opinion on this patient is:\n{}{}{}",
            self.name(),
            current.render_fields(&DiagnosisField::FINDINGS),
            current.render_opinion(),
            steps,
            opinion_format()
        );

        let mut content: String = peers
            .iter()
            .filter(|peer| peer.label != self.label)
            .map(PeerOpinion::render)
            .collect();
        if let Some(critique) = critique {
            content.push_str(&format!("{}\n{}", sections::header("Chief Physician"), critique));
        }

        let conversation = [Turn::system(system_message), Turn::user(content)];
        let reply = self.generator.respond(&conversation).await?;
        let revised = self.load_diagnosis_text(patient_id, &reply);
        debug!(
            doctor = %self.label,
            patient_id = %patient_id,
            result = revised.get(DiagnosisField::DiagnosisResult).unwrap_or("none"),
            "Revised with peers"
        );
        Ok(revised)
    }
}

impl std::fmt::Debug for DoctorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoctorAgent")
            .field("label", &self.label)
            .field("model", &self.model_name())
            .field("source_id", &self.source_id)
            .finish()
    }
}
