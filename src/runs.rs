//! On-disk layout of runs.
//!
//! ```text
//! <runs dir>/<run_id>/
//!   plan.json             copy of the applied plan
//!   journal.jsonl         live journal segment
//!   archive/              closed journal segments
//!   apply-report.json
//!   rollback-report.json
//! ```

use anyhow::{Context, Result};
use applykit::{ApplyReport, JOURNAL_FILE, JournalSnapshot, RunStatus};
use std::fs;
use std::path::{Path, PathBuf};

pub const PLAN_FILE: &str = "plan.json";
pub const APPLY_REPORT: &str = "apply-report.json";
pub const ROLLBACK_REPORT: &str = "rollback-report.json";

/// Summary line for `ferry status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub records: usize,
    pub status: Option<RunStatus>,
}

pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Resolve a run id, a run directory or a journal file to a run directory
    pub fn resolve(&self, target: &str) -> Result<PathBuf> {
        let candidate = crate::paths::expand(target);
        if candidate.is_file() {
            // journal.jsonl, or an archived segment under archive/
            let parent = candidate
                .parent()
                .with_context(|| format!("{} has no parent directory", candidate.display()))?;
            let run_dir = if parent.file_name().is_some_and(|n| n == applykit::ARCHIVE_DIR) {
                parent.parent().unwrap_or(parent)
            } else {
                parent
            };
            return Ok(run_dir.to_path_buf());
        }
        if candidate.is_dir() {
            return Ok(candidate);
        }

        let dir = self.run_dir(target);
        if dir.is_dir() {
            Ok(dir)
        } else {
            anyhow::bail!(
                "No run '{}' under {} (pass a run id or a journal path)",
                target,
                self.root.display()
            )
        }
    }

    /// All runs, oldest id first
    pub fn list(&self) -> Result<Vec<RunSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Could not read {}", self.root.display()))?;
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let run_id = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let records = JournalSnapshot::load_run(&path).map_or(0, |s| s.len());
            let status = ApplyReport::load(&path.join(APPLY_REPORT))
                .ok()
                .map(|r| r.status);
            runs.push(RunSummary {
                run_id,
                records,
                status,
            });
        }
        runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(runs)
    }
}

/// Whether the run directory already holds journal records
pub fn has_journal(run_dir: &Path) -> bool {
    run_dir.join(JOURNAL_FILE).exists() || run_dir.join(applykit::ARCHIVE_DIR).is_dir()
}
