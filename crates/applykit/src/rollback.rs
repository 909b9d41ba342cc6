//! Compensating rollback
//!
//! Undoes a run by walking its journal backwards. Each record is visited
//! once and compensated at most once; a failed compensation is reported and
//! left for the caller to retry by invoking rollback again.

use crate::client::{PlatformClient, RollbackOutcome};
use crate::error::{ErrorCategory, Result};
use crate::journal::{ExecutedActionRecord, Journal, JournalSnapshot, RecordStatus};
use actionplan::ActionType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Result for one journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackState {
    RolledBack,
    /// Not reversible; left in place
    Skipped,
    Failed,
    /// Dry run: would be compensated
    Planned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackDetail {
    pub action_id: String,
    pub action_type: ActionType,
    pub state: RollbackState,
    /// Set when the target was already gone
    #[serde(default)]
    pub already_absent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate rollback result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub run_id: Option<String>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rolled_back: usize,
    pub skipped: usize,
    pub failed: usize,
    /// In processing order
    pub details: Vec<RollbackDetail>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)? + "\n")?;
        Ok(())
    }
}

/// Progress notifications during rollback
pub trait RollbackObserver {
    fn on_start(&mut self, _total: usize) {}

    fn on_record(&mut self, record: &ExecutedActionRecord);

    fn on_complete(&mut self, detail: &RollbackDetail);
}

/// No-op observer
pub struct Silent;

impl RollbackObserver for Silent {
    fn on_record(&mut self, _record: &ExecutedActionRecord) {}
    fn on_complete(&mut self, _detail: &RollbackDetail) {}
}

/// Records eligible for rollback, in processing order.
///
/// Keeps the latest `done` record of each action whose latest record is
/// still `done`, then reverses recorded order.
pub fn rollback_order(snapshot: &JournalSnapshot) -> Vec<&ExecutedActionRecord> {
    let latest = snapshot.latest();
    let mut order: Vec<&ExecutedActionRecord> = snapshot
        .records()
        .iter()
        .filter(|r| r.status == RecordStatus::Done)
        .filter(|r| latest.get(r.action_id.as_str()).is_some_and(|l| std::ptr::eq(*l, *r)))
        .collect();
    order.reverse();
    order
}

/// Drives compensating calls through a platform client
pub struct RollbackCoordinator<'a> {
    client: &'a dyn PlatformClient,
    dry_run: bool,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(client: &'a dyn PlatformClient) -> Self {
        Self {
            client,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Roll back everything still done in `snapshot`
    pub fn run(
        &self,
        snapshot: &JournalSnapshot,
        observer: &mut dyn RollbackObserver,
    ) -> RollbackReport {
        self.process(snapshot, observer, |_| Ok(()))
            .unwrap_or_else(|(report, _)| report)
    }

    /// Like [`run`](Self::run), appending a `rolled_back` record to `journal`
    /// for every compensated action.
    pub fn rollback_journal(
        &self,
        snapshot: &JournalSnapshot,
        journal: &mut Journal,
        observer: &mut dyn RollbackObserver,
    ) -> Result<RollbackReport> {
        self.process(snapshot, observer, |record| journal.append(&record.rolled_back()))
            .map_err(|(_, e)| e)
    }

    fn process<F>(
        &self,
        snapshot: &JournalSnapshot,
        observer: &mut dyn RollbackObserver,
        mut on_rolled_back: F,
    ) -> std::result::Result<RollbackReport, (RollbackReport, crate::error::Error)>
    where
        F: FnMut(&ExecutedActionRecord) -> Result<()>,
    {
        let order = rollback_order(snapshot);
        let started_at = Utc::now();
        let mut report = RollbackReport {
            run_id: order.first().map(|r| r.run_id.clone()),
            dry_run: self.dry_run,
            started_at,
            finished_at: started_at,
            rolled_back: 0,
            skipped: 0,
            failed: 0,
            details: Vec::with_capacity(order.len()),
        };

        log::info!(
            "Rolling back {} records{}",
            order.len(),
            if self.dry_run { " (dry run)" } else { "" }
        );
        observer.on_start(order.len());

        for record in order {
            observer.on_record(record);
            let mut detail = RollbackDetail {
                action_id: record.action_id.clone(),
                action_type: record.action_type,
                state: RollbackState::Skipped,
                already_absent: false,
                error: None,
            };

            if !record.reversible {
                log::debug!("{} is not reversible; skipping", record.action_id);
                report.skipped += 1;
            } else if self.dry_run {
                detail.state = RollbackState::Planned;
            } else {
                let result = match self.client.rollback(record) {
                    Err(e) if e.category() == ErrorCategory::NotFound => {
                        log::debug!("{} already gone: {e}", record.action_id);
                        Ok(RollbackOutcome::AlreadyAbsent)
                    }
                    other => other,
                };
                match result {
                    Ok(outcome) => {
                        detail.state = RollbackState::RolledBack;
                        detail.already_absent = outcome == RollbackOutcome::AlreadyAbsent;
                        report.rolled_back += 1;
                        if let Err(e) = on_rolled_back(record) {
                            report.details.push(detail);
                            report.finished_at = Utc::now();
                            return Err((report, e));
                        }
                    }
                    Err(e) => {
                        log::warn!("Rollback of {} failed: {e}", record.action_id);
                        detail.state = RollbackState::Failed;
                        detail.error = Some(e.to_string());
                        report.failed += 1;
                    }
                }
            }

            observer.on_complete(&detail);
            report.details.push(detail);
        }

        report.finished_at = Utc::now();
        log::info!(
            "Rollback finished: {} rolled back, {} skipped, {} failed",
            report.rolled_back,
            report.skipped,
            report.failed
        );
        Ok(report)
    }
}

/// Group details by state for display
pub fn details_by_state(report: &RollbackReport) -> HashMap<RollbackState, Vec<&str>> {
    let mut groups: HashMap<RollbackState, Vec<&str>> = HashMap::new();
    for detail in &report.details {
        groups
            .entry(detail.state)
            .or_default()
            .push(detail.action_id.as_str());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::testing::{FakeClient, action};
    use actionplan::ActionType::{CreateLabel, CreateRepository, PushContent};

    fn done(ty: ActionType, entity: &str) -> ExecutedActionRecord {
        let mut record =
            ExecutedActionRecord::for_action("run-1", &action(ty, entity, &[]), RecordStatus::Done);
        record.rollback_data = serde_json::json!({"entity": entity});
        record
    }

    fn scenario() -> JournalSnapshot {
        JournalSnapshot::new(vec![
            done(CreateRepository, "demo"),
            done(PushContent, "demo"),
            done(CreateLabel, "bug"),
        ])
    }

    #[test]
    fn test_reverse_order_with_skip() {
        let client = FakeClient::new();
        let report = RollbackCoordinator::new(&client).run(&scenario(), &mut Silent);

        let order: Vec<(&str, RollbackState)> = report
            .details
            .iter()
            .map(|d| (d.action_id.as_str(), d.state))
            .collect();
        assert_eq!(
            order,
            vec![
                ("create_label:bug", RollbackState::RolledBack),
                ("push_content:demo", RollbackState::Skipped),
                ("create_repository:demo", RollbackState::RolledBack),
            ]
        );
        assert_eq!(
            (report.rolled_back, report.skipped, report.failed),
            (2, 1, 0)
        );
        assert_eq!(
            client.rolled_back(),
            vec!["create_label:bug", "create_repository:demo"]
        );
    }

    #[test]
    fn test_already_absent_counts_as_rolled_back() {
        let client = FakeClient::new();
        client.script_rollback("create_label:bug", Ok(RollbackOutcome::AlreadyAbsent));
        let report = RollbackCoordinator::new(&client).run(&scenario(), &mut Silent);

        let label = &report.details[0];
        assert_eq!(label.state, RollbackState::RolledBack);
        assert!(label.already_absent);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_not_found_counts_as_rolled_back() {
        let client = FakeClient::new();
        client.script_rollback("create_label:bug", Err(ActionError::not_found("label gone")));
        let report = RollbackCoordinator::new(&client).run(&scenario(), &mut Silent);

        let label = &report.details[0];
        assert_eq!(label.action_id, "create_label:bug");
        assert_eq!(label.state, RollbackState::RolledBack);
        assert!(label.already_absent);
        assert_eq!((report.rolled_back, report.failed), (2, 0));
        assert!(report.is_clean());
    }

    #[test]
    fn test_failure_is_reported_not_retried() {
        let client = FakeClient::new();
        client.script_rollback(
            "create_label:bug",
            Err(ActionError::transient("502 bad gateway")),
        );
        let report = RollbackCoordinator::new(&client).run(&scenario(), &mut Silent);

        assert_eq!(report.failed, 1);
        assert_eq!(report.rolled_back, 1);
        assert!(!report.is_clean());
        let calls = client.rolled_back();
        assert_eq!(calls.iter().filter(|c| *c == "create_label:bug").count(), 1);
    }

    #[test]
    fn test_strict_reverse_of_recorded_order() {
        let records: Vec<_> = (0..6)
            .map(|i| done(CreateLabel, &format!("l{i}")))
            .collect();
        let expected: Vec<String> = records.iter().rev().map(|r| r.action_id.clone()).collect();
        let client = FakeClient::new();
        RollbackCoordinator::new(&client).run(&JournalSnapshot::new(records), &mut Silent);
        assert_eq!(client.rolled_back(), expected);
    }

    #[test]
    fn test_failed_and_already_rolled_back_are_excluded() {
        let mut failed = done(CreateLabel, "broken");
        failed.status = RecordStatus::Failed;
        let undone = done(CreateLabel, "old");
        let snapshot = JournalSnapshot::new(vec![
            done(CreateRepository, "demo"),
            undone.clone(),
            failed,
            undone.rolled_back(),
        ]);
        let order: Vec<&str> = rollback_order(&snapshot)
            .iter()
            .map(|r| r.action_id.as_str())
            .collect();
        assert_eq!(order, vec!["create_repository:demo"]);
    }

    #[test]
    fn test_dry_run_does_not_call_client() {
        let client = FakeClient::new();
        let report = RollbackCoordinator::new(&client)
            .dry_run(true)
            .run(&scenario(), &mut Silent);
        assert!(client.rolled_back().is_empty());
        assert!(report.dry_run);
        assert_eq!(report.rolled_back, 0);
        let groups = details_by_state(&report);
        assert_eq!(groups[&RollbackState::Planned].len(), 2);
        assert_eq!(groups[&RollbackState::Skipped], vec!["push_content:demo"]);
    }

    #[test]
    fn test_rollback_journal_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open_in(dir.path()).unwrap();
        for record in scenario().records() {
            journal.append(record).unwrap();
        }

        let client = FakeClient::new();
        let snapshot = JournalSnapshot::load_run(dir.path()).unwrap();
        let report = RollbackCoordinator::new(&client)
            .rollback_journal(&snapshot, &mut journal, &mut Silent)
            .unwrap();
        assert_eq!(report.rolled_back, 2);

        // Only the non-reversible push remains on a second pass
        let snapshot = JournalSnapshot::load_run(dir.path()).unwrap();
        assert_eq!(snapshot.resume_cursor().len(), 1);
        let again = RollbackCoordinator::new(&client)
            .rollback_journal(&snapshot, &mut journal, &mut Silent)
            .unwrap();
        assert_eq!((again.rolled_back, again.skipped), (0, 1));
        assert_eq!(client.rolled_back().len(), 2);
    }
}
