//! The chief physician: merges findings, judges agreement, writes the final
//! diagnosis.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{PatientPort, PeerOpinion, ReporterPort};
use crate::config::DiscussionMode;
use crate::diagnosis::opinion_format;
use crate::error::{ConsultationError, Result};
use crate::generation::GenerationPort;
use crate::memory::Turn;
use crate::models::{Escalation, EscalationTarget, Findings, PatientProfile};
use crate::sections;

const DEFAULT_PERSONA: &str = "You are a senior chief physician.";

/// Escalation questions shorter than this are placeholders such as "none".
pub const MIN_QUESTION_CHARS: usize = 5;

const SYMPTOMS: &str = "Symptoms";
const AUXILIARY_EXAMS: &str = "Auxiliary Examinations";
const ASK_PATIENT: &str = "Ask Patient";
const ASK_REPORTER: &str = "Ask Reporter";
const STOP: &str = "Stop";
const CONTINUE: &str = "Continue";
const CRITIQUE_LIST_MARKER: &str = "(a)";

/// Whether the panel agrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Stop,
    Continue,
}

/// Outcome of one agreement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgement {
    pub verdict: Verdict,
    /// Ranked disagreement points, only on `Continue` in critique mode
    pub critique: Option<String>,
}

/// Parsed reply of the findings merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingsReply {
    pub findings: Findings,
    pub ask_patient: Option<String>,
    pub ask_reporter: Option<String>,
}

/// Canonical findings plus whatever was asked to produce them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub findings: Findings,
    pub escalations: Vec<Escalation>,
}

pub struct HostAgent {
    generator: Arc<dyn GenerationPort>,
    persona: String,
}

impl HostAgent {
    pub fn new(generator: Arc<dyn GenerationPort>, system_message: Option<String>) -> Self {
        Self {
            generator,
            persona: system_message.unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
        }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    fn participants(opinions: &[PeerOpinion]) -> String {
        let headers: Vec<String> = opinions.iter().map(PeerOpinion::header).collect();
        sections::join_names(&headers)
    }

    fn chairing(&self, opinions: &[PeerOpinion], findings: &Findings) -> String {
        format!(
            "{}\nYou are chairing a consultation on a patient with {}.\n\
             The patient's basic situation is:\n{}",
            self.persona,
            Self::participants(opinions),
            findings.render()
        )
    }

    /// Merge every doctor's symptoms and examinations into one summary,
    /// escalating ambiguities to the patient or the reporter.
    pub async fn reconcile_findings(
        &self,
        opinions: &[PeerOpinion],
        profile: &PatientProfile,
        patient: &dyn PatientPort,
        reporter: &dyn ReporterPort,
    ) -> Result<Reconciliation> {
        let system_message = format!(
            "{}\nYou are chairing a consultation with {}. Listen to each doctor's report, \
             summarise the patient's symptoms and collect the examination results.\n\n\
             (1) Each doctor's report starts with ##xx##; for example ##Doctor A## marks the start \
             of Doctor A's report. Each report contains {} and {}.\n\
             (2) Collect all information on symptoms and auxiliary examinations, whether every \
             doctor mentioned it or only one of them.\n\
             (3) If the doctors contradict each other, point it out as follows.\n\
             (3.1) For inconsistent symptoms, ask the patient, starting with {}.\n\
             (3.2) For inconsistent auxiliary examinations, ask the examiner, starting with {}.\n\
             (3.3) If there is no problem, write \"none\".\n\n\
             Answer in the following format.\n{}{}{}{}",
            self.persona,
            Self::participants(opinions),
            sections::marker(SYMPTOMS),
            sections::marker(AUXILIARY_EXAMS),
            sections::marker(ASK_PATIENT),
            sections::marker(ASK_REPORTER),
            sections::render(SYMPTOMS, "(1) xx\n(2) xx"),
            sections::render(ASK_PATIENT, "(1) xx\n(2) xx"),
            sections::render(AUXILIARY_EXAMS, "(1) xx\n(2) xx"),
            sections::render(ASK_REPORTER, "(1) xx\n(2) xx"),
        );
        let reports: String = opinions.iter().map(PeerOpinion::render_findings).collect();

        let reply = self
            .generator
            .respond(&[Turn::system(system_message), Turn::user(reports)])
            .await?;
        let parsed = Self::parse_findings_reply(&reply)?;

        let mut escalations = Vec::new();
        if let Some(question) = &parsed.ask_patient {
            let answer = patient.answer("host", "Doctor", question, false).await?;
            escalations.push(Escalation {
                target: EscalationTarget::Patient,
                question: question.clone(),
                answer,
            });
        }
        if let Some(question) = &parsed.ask_reporter {
            let answer = reporter.answer(&profile.medical_record, question).await?;
            escalations.push(Escalation {
                target: EscalationTarget::Reporter,
                question: question.clone(),
                answer,
            });
        }

        if escalations.is_empty() {
            debug!(patient_id = %profile.id, "Findings merged without escalation");
            return Ok(Reconciliation {
                findings: parsed.findings,
                escalations,
            });
        }

        info!(
            patient_id = %profile.id,
            escalations = escalations.len(),
            "Findings escalated for clarification"
        );
        let findings = self.edit_findings(&parsed.findings, &escalations).await?;
        Ok(Reconciliation {
            findings,
            escalations,
        })
    }

    /// `Symptoms` and `Auxiliary Examinations` are mandatory; escalation
    /// questions shorter than [`MIN_QUESTION_CHARS`] count as absent.
    pub fn parse_findings_reply(reply: &str) -> Result<FindingsReply> {
        let symptoms = sections::extract(reply, SYMPTOMS)
            .ok_or_else(|| ConsultationError::malformed("findings", reply))?;
        let auxiliary_exams = sections::extract(reply, AUXILIARY_EXAMS)
            .ok_or_else(|| ConsultationError::malformed("findings", reply))?;

        let question = |name: &str| {
            sections::extract(reply, name).filter(|q| q.chars().count() >= MIN_QUESTION_CHARS)
        };

        Ok(FindingsReply {
            findings: Findings {
                symptoms,
                auxiliary_exams,
            },
            ask_patient: question(ASK_PATIENT),
            ask_reporter: question(ASK_REPORTER),
        })
    }

    async fn edit_findings(&self, merged: &Findings, escalations: &[Escalation]) -> Result<Findings> {
        let mut instructions = Vec::new();
        let mut content = format!("{}\n\n", merged.render().trim());
        for escalation in escalations {
            let (section, corrects) = match escalation.target {
                EscalationTarget::Patient => (ASK_PATIENT, SYMPTOMS),
                EscalationTarget::Reporter => (ASK_REPORTER, AUXILIARY_EXAMS),
            };
            instructions.push(format!(
                "Use the #Question# and #Answer# under {} to correct ambiguities and errors in the \
                 patient's {}.",
                sections::header(section),
                sections::header(corrects)
            ));
            content.push_str(&format!(
                "{}\n#Question#\n{}\n#Answer#\n{}\n\n",
                sections::header(section),
                escalation.question,
                escalation.answer
            ));
        }

        let system_message = format!(
            "{}\n{}\n\nAnswer in the following format.\n{}{}",
            self.persona,
            instructions.join(" Then "),
            sections::render(SYMPTOMS, "(1) xx\n(2) xx"),
            sections::render(AUXILIARY_EXAMS, "(1) xx\n(2) xx"),
        );
        let reply = self
            .generator
            .respond(&[Turn::system(system_message), Turn::user(content.trim_end())])
            .await?;

        match (
            sections::extract(&reply, SYMPTOMS),
            sections::extract(&reply, AUXILIARY_EXAMS),
        ) {
            (Some(symptoms), Some(auxiliary_exams)) => Ok(Findings {
                symptoms,
                auxiliary_exams,
            }),
            _ => {
                warn!("Corrected findings lack mandatory sections, keeping merged findings");
                Ok(merged.clone())
            }
        }
    }

    /// Ask whether the doctors agree. In critique mode a `Continue` verdict is
    /// followed by a second call listing the disagreement points, unless no
    /// round is left to discuss them in.
    pub async fn measure_agreement(
        &self,
        opinions: &[PeerOpinion],
        findings: &Findings,
        mode: DiscussionMode,
        rounds_remain: bool,
    ) -> Result<Judgement> {
        let reports: String = opinions.iter().map(PeerOpinion::render).collect();
        let system_message = format!(
            "{}\nListen to each doctor's report, which contains the diagnosis result, the \
             diagnosis basis and the treatment plan.\n\n\
             Answer in the following format.\n\
             (1) If the doctors have reached agreement, output:\n{}\n\n\
             (2) If the doctors have not reached agreement, output:\n{}",
            self.chairing(opinions, findings),
            sections::marker(STOP),
            sections::marker(CONTINUE)
        );
        let reply = self
            .generator
            .respond(&[Turn::system(system_message), Turn::user(reports.clone())])
            .await?;
        let verdict = Self::parse_verdict(&reply)?;

        if verdict == Verdict::Stop || !mode.wants_critique() || !rounds_remain {
            return Ok(Judgement {
                verdict,
                critique: None,
            });
        }

        let system_message = format!(
            "{}\n(1) Listen to each doctor's report, which contains the diagnosis result, the \
             diagnosis basis and the treatment plan.\n\
             (2) List at most 3 points of disagreement that need discussion, by importance, \
             in the following format:\n(a) xxx\n(b) xxx\n",
            self.chairing(opinions, findings)
        );
        let reply = self
            .generator
            .respond(&[Turn::system(system_message), Turn::user(reports)])
            .await?;
        Ok(Judgement {
            verdict,
            critique: Some(sections::from_first(&reply, CRITIQUE_LIST_MARKER).trim().to_string()),
        })
    }

    /// The stop token wins when both appear; neither is a protocol violation.
    pub fn parse_verdict(reply: &str) -> Result<Verdict> {
        if reply.contains(&sections::marker(STOP)) {
            Ok(Verdict::Stop)
        } else if reply.contains(&sections::marker(CONTINUE)) {
            Ok(Verdict::Continue)
        } else {
            Err(ConsultationError::malformed("agreement check", reply))
        }
    }

    /// Merge the panel's final opinions into one diagnosis, returned verbatim.
    pub async fn synthesize(&self, opinions: &[PeerOpinion], findings: &Findings) -> Result<String> {
        let system_message = format!(
            "{}\n(1) Listen to each doctor's report, which contains the diagnosis result, the \
             diagnosis basis and the treatment plan.\n\
             (2) Combine the doctors' information into a final diagnosis of the patient.\n\n\
             (3) Answer in the following format.\n{}",
            self.chairing(opinions, findings),
            opinion_format()
        );
        let reports: String = opinions.iter().map(PeerOpinion::render).collect();
        Ok(self
            .generator
            .respond(&[Turn::system(system_message), Turn::user(reports)])
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::StructuredDiagnosis;
    use crate::models::{MedicalRecord, PatientId};
    use crate::testing::{
        CannedPatient, CannedReporter, FINDINGS_REPLY, ScriptedGenerator, diagnosis_text,
    };

    fn opinions(results: &[&str]) -> Vec<PeerOpinion> {
        results
            .iter()
            .enumerate()
            .map(|(i, result)| PeerOpinion {
                label: crate::agents::DoctorAgent::label_for(i),
                diagnosis: StructuredDiagnosis::parse(&diagnosis_text(result)),
            })
            .collect()
    }

    fn profile() -> PatientProfile {
        PatientProfile {
            id: PatientId::from(1),
            profile: "male, 30".to_string(),
            medical_record: MedicalRecord::default(),
        }
    }

    fn findings() -> Findings {
        Findings {
            symptoms: "fever".to_string(),
            auxiliary_exams: "CBC".to_string(),
        }
    }

    #[test]
    fn test_parse_findings_reply() {
        let parsed = HostAgent::parse_findings_reply(FINDINGS_REPLY).unwrap();
        assert_eq!(parsed.findings.symptoms, "(1) fever\n(2) cough");
        assert_eq!(parsed.findings.auxiliary_exams, "(1) CBC: WBC 12.1");
        assert!(parsed.ask_patient.is_none());
        assert!(parsed.ask_reporter.is_none());

        let with_question = FINDINGS_REPLY.replace(
            "#Ask Reporter#\nnone",
            "#Ask Reporter#\nWas the chest X-ray taken?",
        );
        let parsed = HostAgent::parse_findings_reply(&with_question).unwrap();
        assert_eq!(parsed.ask_reporter.as_deref(), Some("Was the chest X-ray taken?"));
    }

    #[test]
    fn test_findings_without_mandatory_section_is_malformed() {
        let reply = "#Symptoms#\nfever\n\n#Ask Patient#\nnone";
        assert!(matches!(
            HostAgent::parse_findings_reply(reply),
            Err(ConsultationError::MalformedOutput { stage: "findings", .. })
        ));
    }

    #[test]
    fn test_parse_verdict() {
        assert_eq!(
            HostAgent::parse_verdict("They agree.\n#Stop#").unwrap(),
            Verdict::Stop
        );
        assert_eq!(HostAgent::parse_verdict("#Continue#").unwrap(), Verdict::Continue);
        assert_eq!(
            HostAgent::parse_verdict("#Continue# ... actually #Stop#").unwrap(),
            Verdict::Stop
        );
        assert!(matches!(
            HostAgent::parse_verdict("I cannot decide."),
            Err(ConsultationError::MalformedOutput { .. })
        ));
    }

    #[tokio::test]
    async fn test_reconcile_without_escalation_is_single_call() {
        let generator = Arc::new(ScriptedGenerator::new("host", [FINDINGS_REPLY]));
        let host = HostAgent::new(generator.clone(), None);
        let patient = CannedPatient::new("unused");
        let reporter = CannedReporter::new("unused");

        let result = host
            .reconcile_findings(&opinions(&["flu", "cold"]), &profile(), &patient, &reporter)
            .await
            .unwrap();

        assert!(result.escalations.is_empty());
        assert_eq!(result.findings.symptoms, "(1) fever\n(2) cough");
        assert_eq!(generator.conversations().len(), 1);
        let user = &generator.conversations()[0][1].content;
        assert!(user.contains("##Doctor A##\n#Symptoms#"));
        assert!(user.contains("##Doctor B##"));
        assert!(generator.conversations()[0][0]
            .content
            .contains("##Doctor A## and ##Doctor B##"));
    }

    #[tokio::test]
    async fn test_reconcile_escalates_to_patient_and_reporter() {
        let first = "#Symptoms#\nfever\n\n#Ask Patient#\nDo you have a cough?\n\n\
                     #Auxiliary Examinations#\nCBC\n\n#Ask Reporter#\nWhat was the WBC?";
        let corrected = "#Symptoms#\nfever, dry cough\n\n#Auxiliary Examinations#\nCBC: WBC 12.1";
        let generator = Arc::new(ScriptedGenerator::new("host", [first, corrected]));
        let host = HostAgent::new(generator.clone(), None);
        let patient = CannedPatient::new("Yes, a dry cough.");
        let reporter = CannedReporter::new("- WBC: 12.1");

        let result = host
            .reconcile_findings(&opinions(&["flu", "cold"]), &profile(), &patient, &reporter)
            .await
            .unwrap();

        assert_eq!(result.findings.symptoms, "fever, dry cough");
        assert_eq!(result.escalations.len(), 2);
        assert_eq!(result.escalations[0].target, EscalationTarget::Patient);
        assert_eq!(result.escalations[1].answer, "- WBC: 12.1");

        let asked = patient.asked.lock().unwrap().clone();
        assert_eq!(asked, vec![("host".to_string(), "Do you have a cough?".to_string(), false)]);

        let edit = &generator.conversations()[1];
        assert!(edit[1].content.contains("##Ask Patient##\n#Question#\nDo you have a cough?"));
        assert!(edit[1].content.contains("##Ask Reporter##\n#Question#\nWhat was the WBC?"));
    }

    #[tokio::test]
    async fn test_malformed_correction_keeps_merged_findings() {
        let first = "#Symptoms#\nfever\n\n#Ask Patient#\nHow high was the fever?\n\n\
                     #Auxiliary Examinations#\nCBC\n\n#Ask Reporter#\nno";
        let generator = Arc::new(ScriptedGenerator::new("host", [first, "Sorry, I cannot."]));
        let host = HostAgent::new(generator, None);
        let patient = CannedPatient::new("39 degrees");
        let reporter = CannedReporter::new("unused");

        let result = host
            .reconcile_findings(&opinions(&["flu", "cold"]), &profile(), &patient, &reporter)
            .await
            .unwrap();
        assert_eq!(result.findings.symptoms, "fever");
        assert_eq!(result.escalations.len(), 1);
        assert!(reporter.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_critique_keeps_list_only() {
        let generator = Arc::new(ScriptedGenerator::new(
            "host",
            [
                "#Continue#",
                "The main issues are:\n(a) cause of fever\n(b) antibiotic choice",
            ],
        ));
        let host = HostAgent::new(generator.clone(), None);

        let judgement = host
            .measure_agreement(
                &opinions(&["flu", "pneumonia"]),
                &findings(),
                DiscussionMode::ParallelWithCritique,
                true,
            )
            .await
            .unwrap();
        assert_eq!(judgement.verdict, Verdict::Continue);
        assert_eq!(
            judgement.critique.as_deref(),
            Some("(a) cause of fever\n(b) antibiotic choice")
        );
    }

    #[tokio::test]
    async fn test_plain_mode_and_stop_skip_critique_call() {
        let generator = Arc::new(ScriptedGenerator::new("host", ["#Continue#", "#Stop#"]));
        let host = HostAgent::new(generator.clone(), None);
        let panel = opinions(&["flu", "flu"]);

        let judgement = host
            .measure_agreement(&panel, &findings(), DiscussionMode::Parallel, true)
            .await
            .unwrap();
        assert_eq!(judgement.critique, None);

        let judgement = host
            .measure_agreement(&panel, &findings(), DiscussionMode::ParallelWithCritique, true)
            .await
            .unwrap();
        assert_eq!(judgement.verdict, Verdict::Stop);
        assert_eq!(generator.conversations().len(), 2);
    }

    #[tokio::test]
    async fn test_no_critique_when_no_round_remains() {
        let generator = Arc::new(ScriptedGenerator::new("host", ["#Continue#"]));
        let host = HostAgent::new(generator.clone(), None);

        let judgement = host
            .measure_agreement(
                &opinions(&["flu", "pneumonia"]),
                &findings(),
                DiscussionMode::ParallelWithCritique,
                false,
            )
            .await
            .unwrap();
        assert_eq!(judgement.verdict, Verdict::Continue);
        assert_eq!(judgement.critique, None);
        assert_eq!(generator.conversations().len(), 1);
    }
}
