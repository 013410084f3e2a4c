use consult_flow::{Context, FlowRunner, Graph, GraphBuilder, Session, Task};
use std::sync::Arc;
use uuid::Uuid;

use crate::agents::Verdict;
use crate::tasks::*;

/// Steps a consultation may take: three setup tasks, the first check, two
/// tasks per discussion round and the synthesis, plus one spare.
pub fn step_budget(max_rounds: u32) -> usize {
    2 * max_rounds as usize + 6
}

/// Whether the discussion is over: the host said stop or the rounds ran out.
pub fn discussion_finished(context: &Context, max_rounds: u32) -> bool {
    let stopped = context.get_sync::<Verdict>(session_keys::VERDICT) == Some(Verdict::Stop);
    let round = context.get_sync::<u32>(session_keys::ROUND).unwrap_or(0);
    stopped || round >= max_rounds
}

pub fn build_consultation_graph(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> Graph {
    let independent_task = Arc::new(IndependentDiagnosisTask::new(panel.clone(), case.clone()));
    let independent_id = independent_task.id().to_string();

    let reconcile_task = Arc::new(ReconcileFindingsTask::new(panel.clone(), case.clone()));
    let reconcile_id = reconcile_task.id().to_string();

    let revise_task = Arc::new(ReviseWithFindingsTask::new(panel.clone(), case.clone()));
    let revise_id = revise_task.id().to_string();

    let check_task = Arc::new(AgreementCheckTask::new(panel.clone(), case.clone()));
    let check_id = check_task.id().to_string();

    let peer_task = Arc::new(PeerRevisionTask::new(panel.clone(), case.clone()));
    let peer_id = peer_task.id().to_string();

    let synthesis_task = Arc::new(SynthesisTask::new(panel.clone(), case));
    let synthesis_id = synthesis_task.id().to_string();

    let max_rounds = panel.max_rounds;
    GraphBuilder::new("collaborative_consultation")
        .add_task(independent_task)
        .add_task(reconcile_task)
        .add_task(revise_task)
        .add_task(check_task)
        .add_task(peer_task)
        .add_task(synthesis_task)
        .add_edge(&independent_id, &reconcile_id)
        .add_edge(&reconcile_id, &revise_id)
        .add_edge(&revise_id, &check_id)
        .add_conditional_edge(
            &check_id,
            move |ctx| discussion_finished(ctx, max_rounds),
            &synthesis_id,
            &peer_id,
        )
        .add_edge(&peer_id, &check_id)
        .build()
}

/// Session starting at the graph's first task, with a fresh context.
pub fn create_consultation_session(graph: &Graph) -> Session {
    let start = graph.start_task_id().unwrap_or_default();
    Session::new_from_task(Uuid::new_v4().to_string(), &start).with_graph_id(graph.id.clone())
}

pub fn create_flow_runner(panel: Arc<ConsultationPanel>, case: Arc<PatientCase>) -> FlowRunner {
    let max_rounds = panel.max_rounds;
    let graph = Arc::new(build_consultation_graph(panel, case));
    FlowRunner::new(graph).with_max_steps(step_budget(max_rounds))
}
