//! Append-only execution journal
//!
//! One JSON object per line. Only the scheduler thread holds a [`Journal`];
//! workers hand their results back over a channel, so there is exactly one
//! writer. Every append is flushed to disk before the scheduler moves on.
//!
//! Readers never touch the live file: resume and rollback work on a
//! [`JournalSnapshot`] loaded up front.
//!
//! A run directory holds the live `journal.jsonl` plus any archived segments
//! under `archive/`. Segments are replayed in name order, then the live file.

use crate::error::{Error, Result};
use actionplan::{Action, ActionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the live journal inside a run directory
pub const JOURNAL_FILE: &str = "journal.jsonl";

/// Directory (inside a run directory) holding archived segments
pub const ARCHIVE_DIR: &str = "archive";

/// Stored in place of user-supplied parameter values
pub const REDACTED: &str = "<redacted>";

/// Terminal status recorded for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Done,
    Failed,
    RolledBack,
}

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedActionRecord {
    pub run_id: String,
    pub action_id: String,
    pub action_type: ActionType,
    pub idempotency_key: String,
    /// Parameters the action was executed with
    #[serde(default)]
    pub action_config: BTreeMap<String, Value>,
    /// Opaque data the client needs to undo the action
    #[serde(default)]
    pub rollback_data: Value,
    pub reversible: bool,
    pub status: RecordStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

impl ExecutedActionRecord {
    /// Record for an action that finished, successfully or not.
    ///
    /// Values of `user_input_fields` are replaced with [`REDACTED`].
    pub fn for_action(run_id: &str, action: &Action, status: RecordStatus) -> Self {
        let mut action_config = action.parameters.clone();
        for field in &action.user_input_fields {
            if let Some(value) = action_config.get_mut(field)
                && !value.is_null()
            {
                *value = Value::from(REDACTED);
            }
        }

        Self {
            run_id: run_id.to_string(),
            action_id: action.id.clone(),
            action_type: action.action_type,
            idempotency_key: action.idempotency_key.clone(),
            action_config,
            rollback_data: Value::Null,
            reversible: action.reversible,
            status,
            timestamp: Utc::now(),
            attempts: 0,
            error: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Record stating that `self` has been compensated
    pub fn rolled_back(&self) -> Self {
        Self {
            status: RecordStatus::RolledBack,
            timestamp: Utc::now(),
            attempts: 0,
            error: None,
            ..self.clone()
        }
    }
}

/// Writer for the live journal file
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    appended: usize,
}

impl Journal {
    /// Open (or create) a journal for appending
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::debug!("Opened journal {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            appended: 0,
        })
    }

    /// Open the live journal of a run directory
    pub fn open_in(run_dir: &Path) -> Result<Self> {
        Self::open(&run_dir.join(JOURNAL_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append one record and sync it to disk
    pub fn append(&mut self, record: &ExecutedActionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.appended += 1;
        Ok(())
    }

    /// Move the journal into `archive/` next to it and return the new path.
    ///
    /// Segment names carry a UTC timestamp so they replay in order.
    pub fn archive(self) -> Result<PathBuf> {
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from(ARCHIVE_DIR), |p| p.join(ARCHIVE_DIR));
        fs::create_dir_all(&dir)?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = dir.join(format!("journal-{stamp}.jsonl"));
        drop(self.file);
        fs::rename(&self.path, &target)?;
        log::info!("Archived journal to {}", target.display());
        Ok(target)
    }
}

/// Read-only view of a run's records, in recorded order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalSnapshot {
    records: Vec<ExecutedActionRecord>,
}

impl JournalSnapshot {
    pub fn new(records: Vec<ExecutedActionRecord>) -> Self {
        Self { records }
    }

    /// Load a single journal file.
    ///
    /// A malformed final line is treated as a torn write and dropped; a
    /// malformed line anywhere else is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let lines: Vec<(usize, &str)> = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .collect();

        let mut records = Vec::with_capacity(lines.len());
        for (pos, (idx, line)) in lines.iter().enumerate() {
            match serde_json::from_str::<ExecutedActionRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if pos + 1 == lines.len() => {
                    log::warn!(
                        "Ignoring incomplete last line {} of {}: {e}",
                        idx + 1,
                        path.display()
                    );
                }
                Err(e) => {
                    return Err(Error::CorruptJournal {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(Self { records })
    }

    /// Load archived segments and the live journal of a run directory
    pub fn load_run(run_dir: &Path) -> Result<Self> {
        let mut segments = Vec::new();
        let archive = run_dir.join(ARCHIVE_DIR);
        if archive.is_dir() {
            for entry in fs::read_dir(&archive)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "jsonl") {
                    segments.push(path);
                }
            }
        }
        segments.sort();

        let live = run_dir.join(JOURNAL_FILE);
        if live.is_file() {
            segments.push(live);
        }

        let mut records = Vec::new();
        for segment in &segments {
            records.extend(Self::load(segment)?.records);
        }
        log::debug!(
            "Loaded {} records from {} segments in {}",
            records.len(),
            segments.len(),
            run_dir.display()
        );
        Ok(Self { records })
    }

    pub fn records(&self) -> &[ExecutedActionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Idempotency keys whose latest record is `done`
    pub fn resume_cursor(&self) -> HashSet<String> {
        let mut cursor = HashSet::new();
        for record in &self.records {
            match record.status {
                RecordStatus::Done => {
                    cursor.insert(record.idempotency_key.clone());
                }
                RecordStatus::RolledBack => {
                    cursor.remove(&record.idempotency_key);
                }
                RecordStatus::Failed => {}
            }
        }
        cursor
    }

    /// Latest record per action id
    pub fn latest(&self) -> HashMap<&str, &ExecutedActionRecord> {
        let mut latest = HashMap::new();
        for record in &self.records {
            latest.insert(record.action_id.as_str(), record);
        }
        latest
    }

    /// Outputs of every action currently done, by action id
    pub fn outputs(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        self.latest()
            .into_iter()
            .filter(|(_, r)| r.status == RecordStatus::Done)
            .map(|(id, r)| (id.to_string(), r.outputs.clone()))
            .collect()
    }

    /// Count of records by status
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            let key = match record.status {
                RecordStatus::Done => "done",
                RecordStatus::Failed => "failed",
                RecordStatus::RolledBack => "rolled_back",
            };
            *counts.entry(key).or_default() += 1;
        }
        counts
    }
}
