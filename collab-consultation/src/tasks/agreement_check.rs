use async_trait::async_trait;
use consult_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::types::{ConsultationPanel, PatientCase};
use crate::agents::Verdict;
use crate::models::{Findings, RoundSnapshot};

/// The host judges whether the panel agrees. Where to go next is decided by
/// the conditional edge leaving this task.
pub struct AgreementCheckTask {
    panel: Arc<ConsultationPanel>,
    case: Arc<PatientCase>,
}

impl AgreementCheckTask {
    pub fn new(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> Self {
        Self { panel, case }
    }
}

#[async_trait]
impl Task for AgreementCheckTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let patient_id = self.case.id();
        let findings: Findings = context.require(session_keys::FINDINGS)?;
        let round: u32 = context.require(session_keys::ROUND)?;

        let judgement = self
            .panel
            .host
            .measure_agreement(
                &self.panel.opinions(patient_id),
                &findings,
                self.panel.mode,
                round < self.panel.max_rounds,
            )
            .await?;

        let label = match judgement.verdict {
            Verdict::Stop => "stop",
            Verdict::Continue => "continue",
        };
        context.update::<Vec<RoundSnapshot>, _>(session_keys::DISCUSSION, |rounds| {
            if let Some(last) = rounds.last_mut() {
                last.host_judgement = label.to_string();
                last.host_critique = judgement.critique.clone();
            }
        })?;
        context.set(session_keys::VERDICT, judgement.verdict).await?;
        context
            .set(session_keys::CRITIQUE, &judgement.critique)
            .await?;

        info!(patient_id = %patient_id, round, verdict = label, "Agreement checked");
        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some(format!("Round {} verdict: {}", round, label)),
        ))
    }
}
