// Consultation state machine, one task per state
pub mod independent_diagnosis;
pub mod reconcile_findings;
pub mod revise_with_findings;
pub mod agreement_check;
pub mod peer_revision;
pub mod synthesis;

// Shared types
pub mod types;

pub use independent_diagnosis::IndependentDiagnosisTask;
pub use reconcile_findings::ReconcileFindingsTask;
pub use revise_with_findings::ReviseWithFindingsTask;
pub use agreement_check::AgreementCheckTask;
pub use peer_revision::PeerRevisionTask;
pub use synthesis::SynthesisTask;

pub use types::{ConsultationPanel, PatientCase, session_keys};
