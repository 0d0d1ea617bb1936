// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Append-only prediction ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::artifacts::StoredArtifacts;
use crate::knowledge::{PredictionStatus, Severity};
use crate::{LeafscanError, Result};

/// One diagnosis as stored in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub prediction: String,
    pub confidence: f32,
    pub severity: Severity,
    pub status: PredictionStatus,
    pub image_url: String,
    pub report_url: String,
    #[serde(rename = "reportFilename")]
    pub report_filename: String,
    #[serde(default)]
    pub image_hash: String,
}

/// Create a new record for freshly stored artifacts
pub fn create_record(
    prediction: &str,
    confidence: f32,
    severity: Severity,
    status: PredictionStatus,
    artifacts: &StoredArtifacts,
) -> PredictionRecord {
    PredictionRecord {
        id: artifacts.id,
        timestamp: Utc::now(),
        prediction: prediction.to_string(),
        confidence,
        severity,
        status,
        image_url: artifacts.image_url.clone(),
        report_url: artifacts.report_url.clone(),
        report_filename: artifacts.report_filename.clone(),
        image_hash: artifacts.image_hash.clone(),
    }
}

/// JSON Lines ledger with a single-writer discipline
pub struct History {
    path: PathBuf,
    writer: Mutex<()>,
}

impl History {
    /// Create a new history manager
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(()),
        }
    }

    /// Append a record.
    ///
    /// The line is written with one call and synced; on failure the file is
    /// cut back to its previous length so readers only ever see whole records.
    pub fn append(&self, record: &PredictionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self
            .writer
            .lock()
            .map_err(|_| LeafscanError::Persistence("history writer lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| LeafscanError::Persistence(format!("Failed to create {:?}: {}", parent, e)))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LeafscanError::Persistence(format!("Failed to open {:?}: {}", self.path, e)))?;
        let mut previous_len = file
            .metadata()
            .map_err(|e| LeafscanError::Persistence(e.to_string()))?
            .len();

        // A torn line left by an interrupted write would swallow this record
        if let Some(end) = last_complete_line_end(&mut file, previous_len)
            .map_err(|e| LeafscanError::Persistence(format!("Failed to inspect {:?}: {}", self.path, e)))?
        {
            tracing::warn!(
                "Dropping {} bytes of incomplete history in {:?}",
                previous_len - end,
                self.path
            );
            file.set_len(end)
                .map_err(|e| LeafscanError::Persistence(format!("Failed to repair {:?}: {}", self.path, e)))?;
            previous_len = end;
        }

        let written = file
            .write_all(line.as_bytes())
            .and_then(|_| file.sync_data());
        if let Err(e) = written {
            if let Err(trunc) = file.set_len(previous_len) {
                tracing::error!("Failed to roll back history after write error: {}", trunc);
            }
            return Err(LeafscanError::Persistence(format!(
                "Failed to append to {:?}: {}",
                self.path, e
            )));
        }

        Ok(())
    }

    /// Read all history entries in insertion order
    pub fn read_all(&self) -> Result<Vec<PredictionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            // An unterminated last line is a torn write, not a record
            if !line.ends_with('\n') {
                tracing::warn!("Ignoring incomplete trailing history line");
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Failed to parse history entry: {}", e);
                }
            }
        }

        Ok(entries)
    }

    /// Get the most recent N entries (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<PredictionRecord>> {
        let mut entries = self.read_all()?;
        entries.reverse();
        entries.truncate(count);
        Ok(entries)
    }

    /// Get history file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Offset just past the last newline, if the file ends with an unterminated line
fn last_complete_line_end(file: &mut File, len: u64) -> std::io::Result<Option<u64>> {
    if len == 0 {
        return Ok(None);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(None);
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let end = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i as u64 + 1);
    Ok(Some(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(prediction: &str) -> PredictionRecord {
        let id = Uuid::new_v4();
        PredictionRecord {
            id,
            timestamp: Utc::now(),
            prediction: prediction.to_string(),
            confidence: 0.75,
            severity: Severity::Moderate,
            status: PredictionStatus::Treated,
            image_url: format!("/images/{}.png", id),
            report_url: format!("/reports/{}.pdf", id),
            report_filename: format!("{}.pdf", id),
            image_hash: String::new(),
        }
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path().join("history.jsonl"));
        assert!(history.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_creates_and_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path().join("nested").join("history.jsonl"));

        let first = record("Apple Scab");
        let second = record("Healthy");
        history.append(&first).unwrap();
        history.append(&second).unwrap();

        let all = history.read_all().unwrap();
        assert_eq!(all, vec![first.clone(), second.clone()]);

        let recent = history.get_recent(1).unwrap();
        assert_eq!(recent, vec![second]);
    }

    #[test]
    fn test_record_field_names() {
        let value = serde_json::to_value(record("Apple Black Rot")).unwrap();
        for key in [
            "id", "timestamp", "prediction", "confidence", "severity",
            "status", "image_url", "report_url", "reportFilename",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["status"], "treated");
    }

    #[test]
    fn test_torn_trailing_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = History::new(path.clone());
        let kept = record("Healthy");
        history.append(&kept).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"id":"trunc"#).unwrap();

        assert_eq!(history.read_all().unwrap(), vec![kept]);
    }

    #[test]
    fn test_append_after_torn_line_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = History::new(path.clone());
        let first = record("Apple Scab");
        history.append(&first).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"id":"trunc"#).unwrap();
        drop(file);

        let second = record("Healthy");
        history.append(&second).unwrap();
        assert_eq!(history.read_all().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_append_after_lone_fragment_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        fs::write(&path, br#"{"id":"trunc"#).unwrap();

        let history = History::new(path);
        let kept = record("Cedar Apple Rust");
        history.append(&kept).unwrap();

        let all = history.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], kept);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(History::new(dir.path().join("history.jsonl")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let history = Arc::clone(&history);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        history.append(&record("Cedar Apple Rust")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = history.read_all().unwrap();
        assert_eq!(all.len(), 200);
        let ids: std::collections::HashSet<_> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 200);
    }
}
