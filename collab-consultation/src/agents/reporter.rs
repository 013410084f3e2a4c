use async_trait::async_trait;
use std::sync::Arc;

use super::ReporterPort;
use crate::error::Result;
use crate::generation::GenerationPort;
use crate::memory::Turn;
use crate::models::MedicalRecord;
use crate::sections;

const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are the hospital's database administrator, responsible for collecting, summarising \
     and organising patients' histories and examination data.";

/// Examination desk: answers only from the recorded physical and auxiliary
/// examination results.
pub struct LlmReporter {
    generator: Arc<dyn GenerationPort>,
    system_message: String,
}

impl LlmReporter {
    pub fn new(generator: Arc<dyn GenerationPort>, system_message: Option<String>) -> Self {
        Self {
            generator,
            system_message: system_message.unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string()),
        }
    }

    fn conversation(&self, record: &MedicalRecord, query: &str) -> Vec<Turn> {
        let items = sections::marker("Examination Items");
        let system = format!(
            "{}\n\nThese are the patient's examination results.\n{}\n{}\n{}\n{}\n\n\
             A patient or a doctor will query them. Faithfully find the matching items in the \
             results and reply in the following format.\n\n\
             {items}\n- xxx: xxx\n- xxx: xxx\n\n\
             If an item cannot be found, reply:\n- xxx: no abnormality",
            self.system_message,
            sections::marker("Physical Examination"),
            record.physical_exam.trim(),
            sections::marker("Auxiliary Examinations"),
            record.auxiliary_exams.trim(),
        );
        vec![
            Turn::system(system),
            Turn::user("Hello, I need genome sequencing, could you tell me the results?"),
            Turn::assistant(format!("{items}\n- genome sequencing: no abnormality")),
            Turn::user(query),
        ]
    }
}

#[async_trait]
impl ReporterPort for LlmReporter {
    fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    async fn answer(&self, record: &MedicalRecord, query: &str) -> Result<String> {
        let conversation = self.conversation(record, query);
        Ok(self.generator.respond(&conversation).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    #[tokio::test]
    async fn test_answers_from_record_with_one_shot_example() {
        let generator = Arc::new(ScriptedGenerator::new(
            "rep",
            ["#Examination Items#\n- CBC: WBC 12.1"],
        ));
        let reporter = LlmReporter::new(generator.clone(), None);
        let record = MedicalRecord {
            physical_exam: "T 38.9".to_string(),
            auxiliary_exams: "CBC: WBC 12.1".to_string(),
            ..Default::default()
        };

        let answer = reporter.answer(&record, "What is my CBC?").await.unwrap();
        assert!(answer.contains("WBC 12.1"));

        let conversation = &generator.conversations()[0];
        assert_eq!(conversation.len(), 4);
        assert!(conversation[0].content.contains("#Physical Examination#\nT 38.9"));
        assert!(conversation[0].content.contains("no abnormality"));
        assert_eq!(conversation[3], Turn::user("What is my CBC?"));
    }
}
