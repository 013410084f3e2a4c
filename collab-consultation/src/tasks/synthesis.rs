use async_trait::async_trait;
use consult_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::types::{ConsultationPanel, PatientCase};
use crate::models::Findings;

/// The host writes the final diagnosis from the panel's last opinions.
pub struct SynthesisTask {
    panel: Arc<ConsultationPanel>,
    case: Arc<PatientCase>,
}

impl SynthesisTask {
    pub fn new(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> Self {
        Self { panel, case }
    }
}

#[async_trait]
impl Task for SynthesisTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let patient_id = self.case.id();
        let findings: Findings = context.require(session_keys::FINDINGS)?;

        let diagnosis = self
            .panel
            .host
            .synthesize(&self.panel.opinions(patient_id), &findings)
            .await?;
        context
            .set(session_keys::FINAL_DIAGNOSIS, &diagnosis)
            .await?;
        info!(patient_id = %patient_id, "Final diagnosis written");

        Ok(TaskResult::new(Some(diagnosis), NextAction::End))
    }
}
