use async_trait::async_trait;
use consult_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::types::{ConsultationPanel, PatientCase, for_each_doctor};
use crate::models::{Findings, RoundSnapshot};

/// Round zero: each doctor reconsiders against the shared findings.
pub struct ReviseWithFindingsTask {
    panel: Arc<ConsultationPanel>,
    case: Arc<PatientCase>,
}

impl ReviseWithFindingsTask {
    pub fn new(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> Self {
        Self { panel, case }
    }
}

#[async_trait]
impl Task for ReviseWithFindingsTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let patient_id = self.case.id().clone();
        let findings: Arc<Findings> = Arc::new(context.require(session_keys::FINDINGS)?);

        for_each_doctor(&self.panel.doctors, |_, doctor| {
            let findings = findings.clone();
            let patient_id = patient_id.clone();
            async move { doctor.revise_with_findings(&patient_id, &findings).await }
        })
        .await?;

        let snapshot = RoundSnapshot {
            turn: 0,
            diagnosis_in_turn: self.panel.snapshots(&patient_id),
            ..Default::default()
        };
        context.set(session_keys::DISCUSSION, vec![snapshot]).await?;
        context.set(session_keys::ROUND, 0u32).await?;
        info!(patient_id = %patient_id, "Doctors revised with findings");

        Ok(TaskResult::new(None, NextAction::Continue))
    }
}
