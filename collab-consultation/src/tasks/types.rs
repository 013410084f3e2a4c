use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::agents::{DoctorAgent, HostAgent, PatientPort, PeerOpinion, ReporterPort};
use crate::config::DiscussionMode;
use crate::diagnosis::StructuredDiagnosis;
use crate::error::Result;
use crate::models::{DoctorSnapshot, PatientId, PatientProfile};

pub mod session_keys {
    /// Canonical findings handed to every doctor
    pub const FINDINGS: &str = "findings";
    pub const ESCALATIONS: &str = "escalations";
    /// Peer-revision rounds completed so far
    pub const ROUND: &str = "round";
    pub const VERDICT: &str = "verdict";
    pub const CRITIQUE: &str = "critique";
    /// Per-round snapshots of every doctor's record
    pub const DISCUSSION: &str = "discussion";
    pub const FINAL_DIAGNOSIS: &str = "final_diagnosis";
}

/// Agents and limits shared by every consultation of a run.
pub struct ConsultationPanel {
    pub doctors: Vec<Arc<DoctorAgent>>,
    pub host: Arc<HostAgent>,
    pub reporter: Arc<dyn ReporterPort>,
    pub mode: DiscussionMode,
    pub max_rounds: u32,
    pub max_conversation_turn: u32,
}

impl ConsultationPanel {
    /// Every doctor's current opinion, in panel order.
    pub fn opinions(&self, patient_id: &PatientId) -> Vec<PeerOpinion> {
        self.doctors.iter().map(|d| d.opinion(patient_id)).collect()
    }

    pub fn snapshots(&self, patient_id: &PatientId) -> Vec<DoctorSnapshot> {
        self.doctors
            .iter()
            .enumerate()
            .map(|(i, doctor)| DoctorSnapshot {
                doctor_id: i,
                doctor_name: doctor.name(),
                doctor_engine_name: doctor.model_name().to_string(),
                diagnosis: doctor.diagnosis(patient_id),
            })
            .collect()
    }
}

/// The patient under consultation.
pub struct PatientCase {
    pub profile: PatientProfile,
    pub patient: Arc<dyn PatientPort>,
}

impl PatientCase {
    pub fn id(&self) -> &PatientId {
        &self.profile.id
    }
}

/// Run one operation per doctor concurrently and wait for all of them.
pub(crate) async fn for_each_doctor<F, Fut>(doctors: &[Arc<DoctorAgent>], make: F) -> Result<()>
where
    F: Fn(usize, Arc<DoctorAgent>) -> Fut,
    Fut: Future<Output = Result<StructuredDiagnosis>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (i, doctor) in doctors.iter().enumerate() {
        set.spawn(make(i, doctor.clone()));
    }
    while let Some(joined) = set.join_next().await {
        joined??;
    }
    Ok(())
}
