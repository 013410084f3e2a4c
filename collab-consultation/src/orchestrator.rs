//! Runs the consultation for every pending patient of a database.
//!
//! Patients are processed by a bounded pool of workers. A patient whose
//! consultation fails is logged and skipped; the record log is the only
//! completion marker, so a rerun picks the failures up again.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

use crate::agents::{DoctorAgent, HostAgent, LlmPatient, LlmReporter, ReporterPort, Verdict};
use crate::config::{ConsultationConfig, DiscussionMode};
use crate::error::{ConfigError, Result};
use crate::generation::GenerationPort;
use crate::models::{DiscussionRecord, Escalation, Findings, PatientId, PatientProfile, RoundSnapshot};
use crate::record_log::RecordLog;
use crate::registry::EngineRegistry;
use crate::tasks::{ConsultationPanel, PatientCase, session_keys};
use crate::workflow::{create_consultation_session, create_flow_runner};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Names written into every record to identify who took part.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub doctor_database: Option<String>,
    pub host: String,
    pub patient: String,
    pub reporter: String,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct CollaborativeConsultation {
    panel: Arc<ConsultationPanel>,
    patient_generator: Arc<dyn GenerationPort>,
    patient_system_message: Option<String>,
    log: Arc<RecordLog>,
    max_workers: usize,
    roster: Roster,
    started_at: String,
}

impl CollaborativeConsultation {
    pub fn new(
        panel: ConsultationPanel,
        patient_generator: Arc<dyn GenerationPort>,
        log: RecordLog,
    ) -> Self {
        Self {
            panel: Arc::new(panel),
            patient_generator,
            patient_system_message: None,
            log: Arc::new(log),
            max_workers: 1,
            roster: Roster::default(),
            started_at: chrono::Local::now().format(TIME_FORMAT).to_string(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }

    pub fn with_patient_system_message(mut self, system_message: Option<String>) -> Self {
        self.patient_system_message = system_message;
        self
    }

    /// Override the session timestamp stamped on every record.
    pub fn with_started_at(mut self, started_at: impl Into<String>) -> Self {
        self.started_at = started_at.into();
        self
    }

    /// Assemble the panel from configuration. Doctors are labelled A, B, C, ...
    /// in roster order and preload their diagnosis sources here.
    pub async fn from_config(
        config: &ConsultationConfig,
        registry: &EngineRegistry,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let mut doctors = Vec::new();
        for (i, doctor_config) in config.active_doctors().iter().enumerate() {
            let mut doctor = DoctorAgent::new(
                DoctorAgent::label_for(i),
                registry.get(&doctor_config.engine)?,
                doctor_config.system_message.clone(),
            );
            if let Some(source) = &doctor_config.diagnosis_source {
                doctor
                    .load_source(source)
                    .await
                    .map_err(|source| ConfigError::DiagnosisSource {
                        doctor: doctor.name(),
                        source,
                    })?;
            }
            doctors.push(Arc::new(doctor));
        }

        let host = HostAgent::new(
            registry.get(&config.host.engine)?,
            config.host.system_message.clone(),
        );
        let reporter: Arc<dyn ReporterPort> = Arc::new(LlmReporter::new(
            registry.get(&config.reporter.engine)?,
            config.reporter.system_message.clone(),
        ));
        let panel = ConsultationPanel {
            doctors,
            host: Arc::new(host),
            reporter,
            mode: config.discussion_mode,
            max_rounds: config.max_discussion_turn,
            max_conversation_turn: config.max_conversation_turn,
        };

        let roster = Roster {
            doctor_database: config.doctor_database.clone(),
            host: config.host.engine.clone(),
            patient: config.patient.engine.clone(),
            reporter: config.reporter.engine.clone(),
        };

        Ok(Self::new(
            panel,
            registry.get(&config.patient.engine)?,
            RecordLog::new(&config.save_path),
        )
        .with_max_workers(config.max_workers)
        .with_roster(roster)
        .with_patient_system_message(config.patient.system_message.clone()))
    }

    pub fn panel(&self) -> &ConsultationPanel {
        &self.panel
    }

    pub fn mode(&self) -> DiscussionMode {
        self.panel.mode
    }

    pub fn log(&self) -> &RecordLog {
        &self.log
    }

    /// When this session was set up; shared by all records it writes.
    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    /// Patients without a record yet, in random order.
    pub async fn pending_patients(&self, patients: Vec<PatientProfile>) -> Result<Vec<PatientProfile>> {
        let completed: HashSet<PatientId> = self.log.completed_ids().await?;
        let total = patients.len();
        let mut pending: Vec<PatientProfile> = patients
            .into_iter()
            .filter(|patient| !completed.contains(&patient.id))
            .collect();
        pending.shuffle(&mut rand::rng());

        info!(
            total,
            completed = completed.len(),
            pending = pending.len(),
            "Resolved pending patients"
        );
        Ok(pending)
    }

    /// Consult every pending patient with at most `max_workers` running at once.
    pub async fn run(&self, patients: Vec<PatientProfile>) -> Result<RunSummary> {
        let started = Instant::now();
        let pending = self.pending_patients(patients).await?;
        let total = pending.len();
        info!(
            pending = total,
            workers = self.max_workers,
            mode = ?self.panel.mode,
            save_path = %self.log.path().display(),
            "Starting consultations"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();
        for profile in pending {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let patient_id = profile.id.clone();
            let span = info_span!("consultation", patient_id = %patient_id);
            set.spawn(
                async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (patient_id, None),
                    };
                    let outcome = this.consult_patient(profile).await;
                    (patient_id, Some(outcome))
                }
                .instrument(span),
            );
        }

        let mut completed = 0;
        let mut failed = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Some(Ok(record)))) => {
                    completed += 1;
                    info!(
                        patient_id = %record.patient_id,
                        final_turn = record.final_turn,
                        converged = record.converged,
                        done = completed + failed,
                        total,
                        "Consultation finished"
                    );
                }
                Ok((patient_id, Some(Err(e)))) => {
                    failed += 1;
                    error!(patient_id = %patient_id, error = %e, "Consultation failed");
                }
                Ok((patient_id, None)) => {
                    failed += 1;
                    warn!(patient_id = %patient_id, "Worker pool closed before consultation started");
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "Consultation worker panicked");
                }
            }
        }

        let summary = RunSummary {
            pending: total,
            completed,
            failed,
            elapsed: started.elapsed(),
        };
        info!(
            pending = summary.pending,
            completed = summary.completed,
            failed = summary.failed,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Run finished"
        );
        Ok(summary)
    }

    /// Run one patient's consultation to the end and append its record.
    pub async fn consult_patient(&self, profile: PatientProfile) -> Result<DiscussionRecord> {
        let patient_id = profile.id.clone();
        let patient = Arc::new(LlmPatient::new(
            profile.clone(),
            self.patient_generator.clone(),
            self.patient_system_message.clone(),
        ));
        let case = Arc::new(PatientCase { profile, patient });

        let runner = create_flow_runner(self.panel.clone(), case.clone());
        let mut session = create_consultation_session(runner.graph());
        let outcome = runner.run(&mut session).await;
        self.forget_patient(&patient_id);
        outcome?;

        let context = &session.context;
        let findings: Findings = context.require(session_keys::FINDINGS)?;
        let diagnosis: String = context.require(session_keys::FINAL_DIAGNOSIS)?;
        let record = DiscussionRecord {
            patient_id: patient_id.clone(),
            final_turn: context.get_sync(session_keys::ROUND).unwrap_or(0),
            converged: context.get_sync::<Verdict>(session_keys::VERDICT) == Some(Verdict::Stop),
            diagnosis,
            symptom_and_examination: findings.render().trim().to_string(),
            escalations: context
                .get_sync::<Vec<Escalation>>(session_keys::ESCALATIONS)
                .unwrap_or_default(),
            discussion: context
                .get_sync::<Vec<RoundSnapshot>>(session_keys::DISCUSSION)
                .unwrap_or_default(),
            doctor_database: self.roster.doctor_database.clone(),
            doctor_ids: self
                .panel
                .doctors
                .iter()
                .map(|d| d.source_id().to_string())
                .collect(),
            doctor_engine_names: self
                .panel
                .doctors
                .iter()
                .map(|d| d.model_name().to_string())
                .collect(),
            host: self.roster.host.clone(),
            host_engine_name: self.panel.host.model_name().to_string(),
            patient: self.roster.patient.clone(),
            patient_engine_name: self.patient_generator.model_name().to_string(),
            reporter: self.roster.reporter.clone(),
            reporter_engine_name: self.panel.reporter.model_name().to_string(),
            time: self.started_at.clone(),
        };

        self.log.append(&record).await?;
        Ok(record)
    }

    /// Doctors are shared between patients; drop this patient's conversations.
    fn forget_patient(&self, patient_id: &PatientId) {
        for doctor in &self.panel.doctors {
            doctor.forget(Some(patient_id));
        }
    }
}
