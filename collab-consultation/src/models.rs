use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diagnosis::{DiagnosisField, StructuredDiagnosis};

/// Patient identifier as it appears in the patient database: numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatientId {
    Number(u64),
    Text(String),
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientId::Number(n) => write!(f, "{}", n),
            PatientId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for PatientId {
    fn from(n: u64) -> Self {
        PatientId::Number(n)
    }
}

impl From<&str> for PatientId {
    fn from(s: &str) -> Self {
        PatientId::Text(s.to_string())
    }
}

/// Ground-truth medical record of one patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicalRecord {
    #[serde(default, alias = "现病史")]
    pub present_illness: Option<String>,
    #[serde(default, alias = "既往史")]
    pub past_history: Option<String>,
    #[serde(default, alias = "个人史")]
    pub personal_history: Option<String>,
    #[serde(default, alias = "查体")]
    pub physical_exam: String,
    #[serde(default, alias = "辅助检查")]
    pub auxiliary_exams: String,
}

/// One entry of the patient database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub id: PatientId,
    pub profile: String,
    pub medical_record: MedicalRecord,
}

/// Who a question was escalated to while reconciling findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTarget {
    Patient,
    Reporter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub target: EscalationTarget,
    pub question: String,
    pub answer: String,
}

/// Canonical symptom and examination summary shared by every doctor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Findings {
    pub symptoms: String,
    pub auxiliary_exams: String,
}

impl Findings {
    /// The findings as a partial diagnosis, ready to merge into a doctor's record.
    pub fn as_diagnosis(&self) -> StructuredDiagnosis {
        StructuredDiagnosis::new()
            .with(DiagnosisField::Symptoms, self.symptoms.clone())
            .with(DiagnosisField::AuxiliaryExams, self.auxiliary_exams.clone())
    }

    pub fn render(&self) -> String {
        self.as_diagnosis().render_fields(&DiagnosisField::FINDINGS)
    }
}

/// One doctor's full record at the end of a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorSnapshot {
    pub doctor_id: usize,
    pub doctor_name: String,
    pub doctor_engine_name: String,
    pub diagnosis: StructuredDiagnosis,
}

/// State of the discussion after one round and the host's check that followed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub turn: u32,
    pub diagnosis_in_turn: Vec<DoctorSnapshot>,
    /// `stop` or `continue`; empty until the host has checked this round
    #[serde(default)]
    pub host_judgement: String,
    #[serde(default)]
    pub host_critique: Option<String>,
}

/// Persisted outcome of one patient's consultation; one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionRecord {
    pub patient_id: PatientId,
    /// Number of peer-revision rounds actually run
    pub final_turn: u32,
    /// Whether the host declared agreement (false when the round budget ran out)
    #[serde(default)]
    pub converged: bool,
    /// Host's merged diagnosis, verbatim
    pub diagnosis: String,
    pub symptom_and_examination: String,
    #[serde(default)]
    pub escalations: Vec<Escalation>,
    #[serde(default)]
    pub discussion: Vec<RoundSnapshot>,
    pub doctor_database: Option<String>,
    pub doctor_ids: Vec<String>,
    pub doctor_engine_names: Vec<String>,
    pub host: String,
    pub host_engine_name: String,
    pub patient: String,
    pub patient_engine_name: String,
    pub reporter: String,
    pub reporter_engine_name: String,
    pub time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_id_keeps_json_type() {
        let numeric: PatientId = serde_json::from_str("17").unwrap();
        let textual: PatientId = serde_json::from_str("\"p-17\"").unwrap();
        assert_eq!(numeric, PatientId::Number(17));
        assert_eq!(textual, PatientId::from("p-17"));
        assert_eq!(serde_json::to_string(&numeric).unwrap(), "17");
        assert_eq!(numeric.to_string(), "17");
    }

    #[test]
    fn test_profile_accepts_original_record_keys() {
        let json = r#"{
            "id": 3,
            "profile": "female, 34",
            "medical_record": {
                "现病史": "fever for two days",
                "查体": "T 38.9",
                "辅助检查": "CBC: WBC 12.1"
            }
        }"#;
        let profile: PatientProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id, PatientId::Number(3));
        assert_eq!(profile.medical_record.physical_exam, "T 38.9");
        assert_eq!(
            profile.medical_record.present_illness.as_deref(),
            Some("fever for two days")
        );
        assert!(profile.medical_record.past_history.is_none());
    }
}
