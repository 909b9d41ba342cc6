//! `ferry status`

use crate::Context;
use crate::config::FerryConfig;
use crate::runs::{APPLY_REPORT, ROLLBACK_REPORT, RunStore};
use crate::ui;
use anyhow::{Context as _, Result};
use applykit::{ApplyReport, JournalSnapshot, RecordStatus};
use colored::Colorize;
use std::path::Path;

pub fn run(ctx: &Context, target: Option<&str>) -> Result<()> {
    let config = FerryConfig::load()?;
    let store = RunStore::new(config.runs_dir()?);

    match target {
        Some(run) => show_run(ctx, &store.resolve(run)?),
        None => list_runs(&store),
    }
}

fn list_runs(store: &RunStore) -> Result<()> {
    let runs = store.list()?;
    ui::header("Runs");
    ui::dim(&store.root().display().to_string());

    if runs.is_empty() {
        println!();
        ui::info("No runs yet");
        return Ok(());
    }

    println!();
    for run in &runs {
        let status = run
            .status
            .map_or_else(|| "no report".dimmed(), ui::run_status);
        println!("  {:<36} {:>5} records  {}", run.run_id, run.records, status);
    }
    Ok(())
}

fn show_run(ctx: &Context, run_dir: &Path) -> Result<()> {
    let snapshot = JournalSnapshot::load_run(run_dir)
        .with_context(|| format!("Could not read journal in {}", run_dir.display()))?;

    let run_id = snapshot
        .records()
        .first()
        .map_or_else(|| dir_name(run_dir), |r| r.run_id.clone());
    ui::header(&format!("Run {run_id}"));
    ui::kv("Directory", &run_dir.display().to_string());

    ui::section("Journal");
    ui::kv("Records", &snapshot.len().to_string());
    for (status, count) in snapshot.counts() {
        ui::kv(status, &count.to_string());
    }
    ui::kv("Resumable", &snapshot.resume_cursor().len().to_string());

    let report_path = run_dir.join(APPLY_REPORT);
    if report_path.exists() {
        let report = ApplyReport::load(&report_path)
            .with_context(|| format!("Invalid report {}", report_path.display()))?;
        ui::section("Last apply");
        ui::kv("Status", &ui::run_status(report.status).to_string());
        ui::kv("Source", &report.source_id);
        let elapsed = (report.finished_at - report.started_at).num_milliseconds();
        ui::kv(
            "Duration",
            &ui::format_millis(u64::try_from(elapsed).unwrap_or_default()),
        );
        if !report.manual_follow_up.is_empty() {
            ui::kv("Follow-up", &report.manual_follow_up.len().to_string());
        }
    }

    if run_dir.join(ROLLBACK_REPORT).exists() {
        ui::section("Rollback");
        ui::dim(&run_dir.join(ROLLBACK_REPORT).display().to_string());
    }

    if ctx.verbose > 0 {
        ui::section("Records");
        for record in snapshot.records() {
            let glyph = match record.status {
                RecordStatus::Done => "✓".green(),
                RecordStatus::Failed => "✗".red(),
                RecordStatus::RolledBack => "↺".blue(),
            };
            println!(
                "  {glyph} {} {}",
                record.action_id,
                record.timestamp.to_rfc3339().dimmed()
            );
        }
    }
    Ok(())
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
