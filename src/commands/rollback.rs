//! `ferry rollback`

use super::confirm;
use crate::Context;
use crate::cli::RollbackArgs;
use crate::clients;
use crate::config::FerryConfig;
use crate::progress::RollbackProgress;
use crate::runs::{ROLLBACK_REPORT, RunStore};
use crate::ui;
use anyhow::{Context as _, Result};
use applykit::rollback::{details_by_state, rollback_order};
use applykit::{
    Journal, JournalSnapshot, PlatformClient, RollbackCoordinator, RollbackObserver,
    RollbackReport, RollbackState,
};
use colored::Colorize;
use std::path::Path;

pub fn run(ctx: &Context, args: &RollbackArgs) -> Result<()> {
    let config = FerryConfig::load()?;
    let store = RunStore::new(config.runs_dir()?);
    let run_dir = store.resolve(&args.run)?;
    let snapshot = JournalSnapshot::load_run(&run_dir)
        .with_context(|| format!("Could not read journal in {}", run_dir.display()))?;

    let order = rollback_order(&snapshot);
    if order.is_empty() {
        ui::info("Nothing to roll back");
        return Ok(());
    }

    if !ctx.quiet {
        let reversible = order.iter().filter(|r| r.reversible).count();
        ui::header(&format!("Rollback {}", order[0].run_id));
        ui::kv("Run directory", &run_dir.display().to_string());
        ui::kv("Reversible", &reversible.to_string());
        ui::kv("Left in place", &(order.len() - reversible).to_string());
    }

    let kind = args.client.unwrap_or(config.client.kind);
    let client = clients::build(kind, &config.client)?;
    let mut progress = RollbackProgress::new(ctx.quiet);

    if args.dry_run {
        let report = RollbackCoordinator::new(client.as_ref())
            .dry_run(true)
            .run(&snapshot, &mut progress);
        progress.finish();
        if !ctx.quiet {
            print_report(&report);
        }
        return Ok(());
    }

    if !args.yes && !confirm("Undo these actions?", false)? {
        ui::warn("Aborted");
        return Ok(());
    }

    let result = execute(&run_dir, &snapshot, client.as_ref(), &mut progress);
    progress.finish();
    let report = result?;

    if !ctx.quiet {
        print_report(&report);
    }
    if !report.is_clean() {
        anyhow::bail!(
            "{} compensating actions failed; run `ferry rollback {}` again to retry them",
            report.failed,
            args.run
        );
    }
    Ok(())
}

/// Compensate every done record of the run and persist the report
pub fn execute(
    run_dir: &Path,
    snapshot: &JournalSnapshot,
    client: &dyn PlatformClient,
    observer: &mut dyn RollbackObserver,
) -> Result<RollbackReport> {
    let mut journal = Journal::open_in(run_dir)
        .with_context(|| format!("Could not open journal in {}", run_dir.display()))?;
    let report = RollbackCoordinator::new(client)
        .rollback_journal(snapshot, &mut journal, observer)
        .context("Rollback aborted")?;

    report
        .save(&run_dir.join(ROLLBACK_REPORT))
        .context("Could not write rollback report")?;
    journal.archive().context("Could not archive journal")?;
    Ok(report)
}

fn print_report(report: &RollbackReport) {
    println!();
    if report.dry_run {
        let groups = details_by_state(report);
        let planned = groups.get(&RollbackState::Planned).map_or(&[][..], Vec::as_slice);
        let skipped = groups.get(&RollbackState::Skipped).map_or(&[][..], Vec::as_slice);
        println!(
            "{} {} would be rolled back, {} left in place",
            "Dry run:".bold(),
            planned.len(),
            skipped.len()
        );
        for id in planned {
            println!("  {} {id}", "→".blue());
        }
        for id in skipped {
            ui::dim(&format!("{id} (not reversible)"));
        }
        return;
    }

    let status = if report.is_clean() {
        "clean".green().bold()
    } else {
        "incomplete".red().bold()
    };
    println!(
        "{} {} ({} rolled back, {} skipped, {} failed)",
        "Rollback:".bold(),
        status,
        report.rolled_back,
        report.skipped,
        report.failed
    );
}
