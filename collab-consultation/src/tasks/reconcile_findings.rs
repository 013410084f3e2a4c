use async_trait::async_trait;
use consult_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::types::{ConsultationPanel, PatientCase};

/// The host merges the doctors' symptoms and examinations into one summary.
pub struct ReconcileFindingsTask {
    panel: Arc<ConsultationPanel>,
    case: Arc<PatientCase>,
}

impl ReconcileFindingsTask {
    pub fn new(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> Self {
        Self { panel, case }
    }
}

#[async_trait]
impl Task for ReconcileFindingsTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let patient_id = self.case.id();
        let opinions = self.panel.opinions(patient_id);

        let reconciliation = self
            .panel
            .host
            .reconcile_findings(
                &opinions,
                &self.case.profile,
                self.case.patient.as_ref(),
                self.panel.reporter.as_ref(),
            )
            .await?;

        info!(
            patient_id = %patient_id,
            escalations = reconciliation.escalations.len(),
            "Findings reconciled"
        );
        context
            .set(session_keys::FINDINGS, &reconciliation.findings)
            .await?;
        context
            .set(session_keys::ESCALATIONS, &reconciliation.escalations)
            .await?;

        Ok(TaskResult::new(None, NextAction::Continue))
    }
}
