use async_trait::async_trait;
use std::sync::Arc;

use super::PatientPort;
use crate::dialogue::{END_OF_INTERVIEW, TO_DOCTOR, TO_EXAMINER};
use crate::error::Result;
use crate::generation::GenerationPort;
use crate::memory::{MemoryStore, Turn};
use crate::models::PatientProfile;

/// Patient simulated by a model, playing the profile and history of one
/// database entry.
pub struct LlmPatient {
    profile: PatientProfile,
    generator: Arc<dyn GenerationPort>,
    memory: MemoryStore<String>,
}

impl LlmPatient {
    pub fn new(
        profile: PatientProfile,
        generator: Arc<dyn GenerationPort>,
        system_message: Option<String>,
    ) -> Self {
        let system_message = system_message.unwrap_or_else(|| Self::system_message(&profile));
        Self {
            profile,
            generator,
            memory: MemoryStore::new(system_message),
        }
    }

    pub fn profile(&self) -> &PatientProfile {
        &self.profile
    }

    fn system_message(profile: &PatientProfile) -> String {
        let record = &profile.medical_record;
        let mut message = format!(
            "You are a patient. This is your basic information.\n{}\n",
            profile.profile
        );
        for (tag, section) in [
            ("present illness", &record.present_illness),
            ("past history", &record.past_history),
            ("personal history", &record.personal_history),
        ] {
            if let Some(text) = section {
                message.push_str(&format!("<{}> {}\n", tag, text.trim()));
            }
        }
        message.push('\n');
        message.push_str(&format!(
            "A <doctor> will now diagnose your condition. You need to:\n\
             (1) Talk according to your medical record and basic information.\n\
             (2) In every reply, make clear whether you talk to the <doctor> or the <examiner>. \
             Start the sentence with {TO_DOCTOR} when talking to the doctor and with {TO_EXAMINER} \
             when talking to the examiner.\n\
             (3) Start by describing your chief complaint.\n\
             (4) When the doctor asks about your present illness, past history or personal history, \
             answer from the record.\n\
             (5) When the doctor asks or suggests an examination, immediately ask the examiner for \
             the items and results, for example: {TO_EXAMINER} Hello, I need an XXX examination, \
             could you tell me the results?\n\
             (6) Answer colloquially and briefly, giving only the main information.\n\
             (7) After receiving results from the examiner, repeat them to the doctor.\n\
             (8) Once the doctor has given a diagnosis result, diagnosis basis and treatment plan, \
             end your reply with {END_OF_INTERVIEW}."
        ));
        message
    }
}

#[async_trait]
impl PatientPort for LlmPatient {
    fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    async fn answer(
        &self,
        counterpart: &str,
        addressed_role: &str,
        query: &str,
        persist: bool,
    ) -> Result<String> {
        let key = counterpart.to_string();
        let prompt = format!("<{}> {}", addressed_role, query);
        let mut conversation = self.memory.history(&key);
        conversation.push(Turn::user(prompt.clone()));

        let reply = self.generator.respond(&conversation).await?;
        if persist {
            self.memory.record_exchange(&key, prompt, reply.clone());
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MedicalRecord, PatientId};
    use crate::testing::ScriptedGenerator;

    fn patient(generator: Arc<ScriptedGenerator>) -> LlmPatient {
        let profile = PatientProfile {
            id: PatientId::from(5),
            profile: "female, 61".to_string(),
            medical_record: MedicalRecord {
                present_illness: Some(" chest pain for one hour ".to_string()),
                ..Default::default()
            },
        };
        LlmPatient::new(profile, generator, None)
    }

    #[tokio::test]
    async fn test_persist_controls_memory() {
        let generator = Arc::new(ScriptedGenerator::new("pt", ["<to doctor> It hurts.", "Yes."]));
        let patient = patient(generator.clone());

        patient.answer("A", "Doctor", "Hello", true).await.unwrap();
        patient.answer("host", "Doctor", "Is the pain sharp?", false).await.unwrap();

        let first = &generator.conversations()[0];
        assert!(first[0].content.contains("<present illness> chest pain for one hour\n"));
        assert!(!first[0].content.contains("past history"));
        assert_eq!(first[1], Turn::user("<Doctor> Hello"));
        // the host's question was not remembered, nor mixed into doctor A's history
        assert_eq!(patient.memory.len(&"A".to_string()), 3);
        assert_eq!(patient.memory.len(&"host".to_string()), 1);
        assert_eq!(generator.conversations()[1].len(), 2);
    }
}
