use async_trait::async_trait;
use consult_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::types::{ConsultationPanel, PatientCase, for_each_doctor};

/// Every doctor forms an opinion on their own, from a preloaded diagnosis or
/// an interview.
pub struct IndependentDiagnosisTask {
    panel: Arc<ConsultationPanel>,
    case: Arc<PatientCase>,
}

impl IndependentDiagnosisTask {
    pub fn new(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> Self {
        Self { panel, case }
    }
}

#[async_trait]
impl Task for IndependentDiagnosisTask {
    async fn run(&self, _context: Context) -> Result<TaskResult> {
        let patient_id = self.case.id().clone();
        info!(patient_id = %patient_id, doctors = self.panel.doctors.len(), "Collecting independent diagnoses");

        let max_turns = self.panel.max_conversation_turn;
        for_each_doctor(&self.panel.doctors, |_, doctor| {
            let case = self.case.clone();
            let reporter = self.panel.reporter.clone();
            async move {
                doctor
                    .independent_diagnose(
                        &case.profile,
                        case.patient.as_ref(),
                        reporter.as_ref(),
                        max_turns,
                    )
                    .await
            }
        })
        .await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some("Independent diagnoses collected".to_string()),
        ))
    }
}
