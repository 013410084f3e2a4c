pub mod doctor;
pub mod host;
pub mod patient;
pub mod reporter;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::MedicalRecord;

pub use doctor::{DoctorAgent, PeerOpinion};
pub use host::{HostAgent, Judgement, Reconciliation, Verdict};
pub use patient::LlmPatient;
pub use reporter::LlmReporter;

/// The simulated patient, answering whoever addresses them.
#[async_trait]
pub trait PatientPort: Send + Sync {
    fn model_name(&self) -> &str;

    /// Answer `query` from `addressed_role`. The exchange is kept in the
    /// history shared with `counterpart` only when `persist` is set.
    async fn answer(
        &self,
        counterpart: &str,
        addressed_role: &str,
        query: &str,
        persist: bool,
    ) -> Result<String>;
}

/// Examination desk answering from a patient's recorded results only.
#[async_trait]
pub trait ReporterPort: Send + Sync {
    fn model_name(&self) -> &str;

    async fn answer(&self, record: &MedicalRecord, query: &str) -> Result<String>;
}
