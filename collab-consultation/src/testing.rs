//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::agents::{PatientPort, ReporterPort};
use crate::error::Result;
use crate::generation::{GenerationError, GenerationPort};
use crate::memory::Turn;
use crate::models::MedicalRecord;

/// Replies from a fixed script, in order, and remembers every conversation it
/// was shown.
pub struct ScriptedGenerator {
    name: String,
    replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(name: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn conversations(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().unwrap().clone()
    }

    /// Concatenated text of the n-th conversation.
    pub fn conversation_text(&self, n: usize) -> String {
        self.conversations()[n]
            .iter()
            .map(|turn| turn.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationPort for ScriptedGenerator {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, conversation: &[Turn]) -> std::result::Result<String, GenerationError> {
        self.seen.lock().unwrap().push(conversation.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GenerationError::Transient(format!("{} script exhausted", self.name)))
    }
}

/// Answers by applying a rule to the conversation; safe to share between
/// concurrently running patients.
pub struct RuleGenerator {
    name: String,
    rule: Box<dyn Fn(&[Turn]) -> String + Send + Sync>,
}

impl RuleGenerator {
    pub fn new(name: &str, rule: impl Fn(&[Turn]) -> String + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            rule: Box::new(rule),
        }
    }
}

#[async_trait]
impl GenerationPort for RuleGenerator {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, conversation: &[Turn]) -> std::result::Result<String, GenerationError> {
        Ok((self.rule)(conversation))
    }
}

/// Fails with the queued errors first, then succeeds.
pub struct FlakyGenerator {
    name: String,
    failures: Mutex<VecDeque<GenerationError>>,
    success: String,
    calls: AtomicU32,
}

impl FlakyGenerator {
    pub fn new(name: &str, failures: Vec<GenerationError>, success: &str) -> Self {
        Self {
            name: name.to_string(),
            failures: Mutex::new(failures.into()),
            success: success.to_string(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationPort for FlakyGenerator {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, _conversation: &[Turn]) -> std::result::Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.success.clone()),
        }
    }
}

/// Patient that always gives the same answer and logs what it was asked.
pub struct CannedPatient {
    pub answer: String,
    pub asked: Mutex<Vec<(String, String, bool)>>,
}

impl CannedPatient {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            asked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PatientPort for CannedPatient {
    fn model_name(&self) -> &str {
        "canned-patient"
    }

    async fn answer(
        &self,
        counterpart: &str,
        _addressed_role: &str,
        query: &str,
        persist: bool,
    ) -> Result<String> {
        self.asked
            .lock()
            .unwrap()
            .push((counterpart.to_string(), query.to_string(), persist));
        Ok(self.answer.clone())
    }
}

/// Reporter that always gives the same answer and logs the queries.
pub struct CannedReporter {
    pub answer: String,
    pub asked: Mutex<Vec<String>>,
}

impl CannedReporter {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            asked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ReporterPort for CannedReporter {
    fn model_name(&self) -> &str {
        "canned-reporter"
    }

    async fn answer(&self, _record: &MedicalRecord, query: &str) -> Result<String> {
        self.asked.lock().unwrap().push(query.to_string());
        Ok(self.answer.clone())
    }
}

/// Five-section diagnosis text with `result` as the diagnosis result.
pub fn diagnosis_text(result: &str) -> String {
    format!(
        "#Symptoms#\nfever, cough\n\n#Auxiliary Examinations#\nCBC: WBC 12.1\n\n\
         #Diagnosis Result#\n{result}\n\n#Diagnosis Basis#\n(1) fever\n\n#Treatment Plan#\n(1) rest"
    )
}

/// Revision reply changing only the opinion sections.
pub fn opinion_text(result: &str) -> String {
    format!(
        "#Diagnosis Result#\n{result}\n\n#Diagnosis Basis#\n(1) basis for {result}\n\n\
         #Treatment Plan#\n(1) treat {result}"
    )
}

pub const FINDINGS_REPLY: &str = "#Symptoms#\n(1) fever\n(2) cough\n\n#Ask Patient#\nnone\n\n\
     #Auxiliary Examinations#\n(1) CBC: WBC 12.1\n\n#Ask Reporter#\nnone";
