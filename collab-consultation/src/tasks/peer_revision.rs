use async_trait::async_trait;
use consult_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::session_keys;
use super::types::{ConsultationPanel, PatientCase, for_each_doctor};
use crate::agents::PeerOpinion;
use crate::models::RoundSnapshot;

/// One discussion round: every doctor revises against the others' opinions
/// as they stood at the end of the previous round.
pub struct PeerRevisionTask {
    panel: Arc<ConsultationPanel>,
    case: Arc<PatientCase>,
}

impl PeerRevisionTask {
    pub fn new(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> Self {
        Self { panel, case }
    }
}

#[async_trait]
impl Task for PeerRevisionTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let patient_id = self.case.id().clone();
        let round = context.require::<u32>(session_keys::ROUND)? + 1;
        let critique: Option<String> = if self.panel.mode.wants_critique() {
            context
                .get::<Option<String>>(session_keys::CRITIQUE)
                .await
                .flatten()
        } else {
            None
        };

        // taken before anyone revises
        let snapshot: Arc<Vec<PeerOpinion>> = Arc::new(self.panel.opinions(&patient_id));

        for_each_doctor(&self.panel.doctors, |i, doctor| {
            let peers: Vec<PeerOpinion> = snapshot
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, opinion)| opinion.clone())
                .collect();
            let critique = critique.clone();
            let patient_id = patient_id.clone();
            async move {
                doctor
                    .revise_with_peers(&patient_id, &peers, critique.as_deref())
                    .await
            }
        })
        .await?;

        let diagnosis_in_turn = self.panel.snapshots(&patient_id);
        context.update::<Vec<RoundSnapshot>, _>(session_keys::DISCUSSION, |rounds| {
            rounds.push(RoundSnapshot {
                turn: round,
                diagnosis_in_turn,
                ..Default::default()
            });
        })?;
        context.set(session_keys::ROUND, round).await?;
        info!(patient_id = %patient_id, round, "Discussion round finished");

        Ok(TaskResult::new(None, NextAction::Continue))
    }
}
