//! Terminal progress for apply and rollback runs.

use crate::ui;
use actionplan::Action;
use applykit::{
    ActionError, ActionOutcome, ActionState, ApplyObserver, CancelToken, ExecutedActionRecord,
    RollbackDetail, RollbackObserver, RollbackState,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn bar(total: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Progress bar for `ferry apply`.
///
/// With `stop_after`, cancels the run once that many actions have finished.
pub struct ApplyProgress {
    pb: ProgressBar,
    quiet: bool,
    finished: usize,
    stop_after: Option<usize>,
    cancel: CancelToken,
}

impl ApplyProgress {
    pub fn new(quiet: bool, stop_after: Option<usize>, cancel: CancelToken) -> Self {
        Self {
            pb: ProgressBar::hidden(),
            quiet,
            finished: 0,
            stop_after,
            cancel,
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ApplyObserver for ApplyProgress {
    fn on_start(&mut self, total: usize, resumed: usize) {
        self.pb = bar(total, self.quiet);
        if resumed > 0 {
            self.pb.inc(resumed as u64);
            self.pb
                .println(format!("{} {resumed} actions already done", "↻".blue()));
        }
    }

    fn on_dispatch(&mut self, action: &Action) {
        self.pb.set_message(action.id.clone());
    }

    fn on_retry(&mut self, action_id: &str, attempt: u32, error: &ActionError, delay: Duration) {
        self.pb.println(format!(
            "{} {action_id}: attempt {attempt} failed ({error}); retrying in {}",
            "⚠".yellow(),
            ui::format_millis(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
        ));
    }

    fn on_complete(&mut self, outcome: &ActionOutcome) {
        self.pb.inc(1);
        if outcome.state != ActionState::Done {
            let reason = outcome.error.as_deref().unwrap_or(outcome.state.as_str());
            self.pb.println(format!(
                "{} {} {}",
                ui::action_glyph(outcome.state),
                outcome.action_id,
                reason.dimmed()
            ));
        }

        self.finished += 1;
        if self.stop_after.is_some_and(|n| self.finished >= n) && !self.cancel.is_cancelled() {
            self.pb
                .println(format!("{} stopping after {} actions", "■".yellow(), self.finished));
            self.cancel.cancel();
        }
    }
}

/// Line-per-record output for `ferry rollback`
pub struct RollbackProgress {
    pb: ProgressBar,
    quiet: bool,
}

impl RollbackProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            pb: ProgressBar::hidden(),
            quiet,
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl RollbackObserver for RollbackProgress {
    fn on_start(&mut self, total: usize) {
        self.pb = bar(total, self.quiet);
    }

    fn on_record(&mut self, record: &ExecutedActionRecord) {
        self.pb.set_message(record.action_id.clone());
    }

    fn on_complete(&mut self, detail: &RollbackDetail) {
        self.pb.inc(1);
        let note = match (detail.state, detail.already_absent) {
            (RollbackState::RolledBack, true) => "already absent".to_string(),
            (RollbackState::Skipped, _) => "not reversible".to_string(),
            _ => detail.error.clone().unwrap_or_default(),
        };
        self.pb.println(format!(
            "{} {} {}",
            ui::rollback_glyph(detail.state),
            detail.action_id,
            note.dimmed()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionplan::{ActionType, Phase};

    fn outcome(state: ActionState) -> ActionOutcome {
        ActionOutcome {
            action_id: "create_label:bug".into(),
            action_type: ActionType::CreateLabel,
            phase: Phase::Metadata,
            state,
            attempts: 1,
            error: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            resumed: false,
        }
    }

    #[test]
    fn test_stop_after_cancels() {
        let cancel = CancelToken::new();
        let mut progress = ApplyProgress::new(true, Some(2), cancel.clone());
        progress.on_start(5, 0);
        progress.on_complete(&outcome(ActionState::Done));
        assert!(!cancel.is_cancelled());
        progress.on_complete(&outcome(ActionState::Failed));
        assert!(cancel.is_cancelled());
        progress.finish();
    }

    #[test]
    fn test_without_stop_after_never_cancels() {
        let cancel = CancelToken::new();
        let mut progress = ApplyProgress::new(true, None, cancel.clone());
        progress.on_start(3, 1);
        for _ in 0..3 {
            progress.on_complete(&outcome(ActionState::Done));
        }
        assert!(!cancel.is_cancelled());
    }
}
