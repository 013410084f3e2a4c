//! Append-only JSONL log of finished consultations.
//!
//! A record's presence is the completion marker for its patient, so resuming a
//! run means skipping every id already in the log.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{DiscussionRecord, PatientId};

#[derive(Deserialize)]
struct CompletedEntry {
    patient_id: PatientId,
}

pub struct RecordLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line. Concurrent appends never interleave.
    pub async fn append(&self, record: &DiscussionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(patient_id = %record.patient_id, path = %self.path.display(), "Record appended");
        Ok(())
    }

    /// Ids of patients that already have a record. A missing log means none;
    /// unreadable lines are skipped.
    pub async fn completed_ids(&self) -> Result<HashSet<PatientId>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = HashSet::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CompletedEntry>(line) {
                Ok(entry) => {
                    ids.insert(entry.patient_id);
                }
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    error = %e,
                    "Skipping unreadable record"
                ),
            }
        }
        Ok(ids)
    }
}
