//! Free one-on-one interview between a doctor and the patient.
//!
//! The patient opens each reply with a tag naming who they talk to. Replies to
//! the examiner go to the reporter, whose answer is relayed to the doctor. The
//! patient ends the interview with the end tag; the turn cap bounds it
//! otherwise. The doctor is then asked for a five-section summary.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::{DoctorAgent, PatientPort, ReporterPort};
use crate::diagnosis::DiagnosisField;
use crate::error::Result;
use crate::models::PatientProfile;
use crate::sections;

pub const TO_DOCTOR: &str = "<to doctor>";
pub const TO_EXAMINER: &str = "<to examiner>";
pub const END_OF_INTERVIEW: &str = "<end>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    Doctor,
    Patient,
    Reporter,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::Doctor => "Doctor",
            Speaker::Patient => "Patient",
            Speaker::Reporter => "Reporter",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogTurn {
    pub turn: u32,
    pub role: Speaker,
    pub content: String,
}

/// Split a patient reply into its addressee and the message. Untagged replies
/// go to the doctor.
pub fn parse_addressee(reply: &str) -> (Speaker, String) {
    let reply = reply.trim();
    let speaker = if reply.starts_with(TO_EXAMINER) {
        Speaker::Reporter
    } else {
        Speaker::Doctor
    };
    let message = reply
        .replace(TO_DOCTOR, "")
        .replace(TO_EXAMINER, "")
        .trim()
        .to_string();
    (speaker, message)
}

/// Request for the closing five-section summary.
pub fn summary_query() -> String {
    let format: String = DiagnosisField::ALL
        .iter()
        .map(|field| sections::render(field.section_name(), "(1) xx\n(2) xx"))
        .collect();
    format!(
        "Could you summarise the patient's symptoms and the auxiliary examination results, \
         then give your diagnosis result, diagnosis basis and treatment plan? \
         Use the following format.\n\n{}",
        format.trim_end()
    )
}

pub async fn interview(
    doctor: &DoctorAgent,
    profile: &PatientProfile,
    patient: &dyn PatientPort,
    reporter: &dyn ReporterPort,
    max_turns: u32,
) -> Result<Vec<DialogTurn>> {
    let patient_id = &profile.id;
    let mut history = vec![DialogTurn {
        turn: 0,
        role: Speaker::Doctor,
        content: doctor.greet(patient_id),
    }];

    let mut turn = 0;
    while turn < max_turns {
        turn += 1;
        let last = history.last().map(|t| (t.role, t.content.clone()));
        let (role, content) = last.unwrap_or((Speaker::Doctor, String::new()));

        let reply = patient
            .answer(doctor.label(), role.as_str(), &content, true)
            .await?;
        history.push(DialogTurn {
            turn,
            role: Speaker::Patient,
            content: reply.clone(),
        });
        if reply.contains(END_OF_INTERVIEW) {
            break;
        }

        let (addressee, message) = parse_addressee(&reply);
        let for_doctor = match addressee {
            Speaker::Reporter => {
                let results = reporter.answer(&profile.medical_record, &message).await?;
                history.push(DialogTurn {
                    turn,
                    role: Speaker::Reporter,
                    content: results.clone(),
                });
                results
            }
            _ => message,
        };

        let answer = doctor.speak(patient_id, &for_doctor).await?;
        history.push(DialogTurn {
            turn,
            role: Speaker::Doctor,
            content: answer,
        });
    }

    let summary = doctor.speak(patient_id, &summary_query()).await?;
    history.push(DialogTurn {
        turn,
        role: Speaker::Doctor,
        content: summary,
    });
    debug!(
        doctor = %doctor.label(),
        patient_id = %patient_id,
        turns = turn,
        "Interview finished"
    );
    Ok(history)
}
