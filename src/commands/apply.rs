//! `ferry apply`

use super::{confirm, load_plan};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::clients;
use crate::config::{ClientKind, FerryConfig};
use crate::progress::ApplyProgress;
use crate::runs::{self, APPLY_REPORT, PLAN_FILE, RunStore};
use crate::ui;
use actionplan::{ActionType, Plan};
use anyhow::{Context as _, Result};
use applykit::{
    ActionState, ApplyEngine, ApplyObserver, ApplyOptions, ApplyReport, CancelToken,
    InputResolver, Journal, JournalSnapshot, PlatformClient, RunStatus, StaticInputs,
};
use colored::Colorize;
use dialoguer::{Input, Password};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = FerryConfig::load()?;
    let plan = load_plan(&args.plan)?;
    let store = RunStore::new(config.runs_dir()?);
    let run_dir = store.run_dir(&plan.run_id);

    let (resume, prior_outputs) = if args.resume {
        let previous = previous_run(&run_dir, &plan)?;
        (previous.resume_cursor(), previous.outputs())
    } else if runs::has_journal(&run_dir) {
        anyhow::bail!(
            "Run {} already has a journal in {}; pass --resume to continue it",
            plan.run_id,
            run_dir.display()
        );
    } else {
        (HashSet::new(), BTreeMap::new())
    };

    let kind = args.client.unwrap_or(config.client.kind);
    let client = clients::build(kind, &config.client)?;
    let jobs = args.jobs.unwrap_or(config.apply.jobs);
    if jobs == 0 {
        anyhow::bail!("--jobs must be at least 1");
    }

    if !ctx.quiet {
        ui::header(&format!("Apply {}", plan.run_id));
        ui::kv("Source", &plan.source_id);
        ui::kv("Actions", &plan.actions.len().to_string());
        ui::kv("Client", kind.as_str());
        ui::kv("Jobs", &jobs.to_string());
        if !resume.is_empty() {
            ui::kv("Resuming", &format!("{} actions already done", resume.len()));
        }
        println!();
    }

    let interactive = !args.yes && std::io::stdin().is_terminal();
    let mut inputs = collect_inputs(&plan, args.inputs.as_deref(), &resume, interactive)?;

    if !args.yes && !confirm("Apply this plan?", kind == ClientKind::DryRun)? {
        ui::warn("Aborted");
        return Ok(());
    }

    let cancel = CancelToken::new();
    let options = ApplyOptions {
        jobs,
        retry: config.retry.clone(),
        resume,
        prior_outputs,
        cancel: cancel.clone(),
    };
    let mut progress = ApplyProgress::new(ctx.quiet, args.stop_after, cancel);
    let result = execute(&plan, &run_dir, client, options, &mut inputs, &mut progress);
    progress.finish();
    let report = result?;

    if !ctx.quiet {
        print_report(&report);
        ui::dim(&format!("Run directory: {}", run_dir.display()));
    }

    match report.status {
        RunStatus::Success => Ok(()),
        status => anyhow::bail!("Run {} finished with status {}", report.run_id, status.as_str()),
    }
}

/// Run the engine in `run_dir`, then persist the report and close the journal
pub fn execute(
    plan: &Plan,
    run_dir: &Path,
    client: Arc<dyn PlatformClient>,
    options: ApplyOptions,
    inputs: &mut dyn InputResolver,
    observer: &mut dyn ApplyObserver,
) -> Result<ApplyReport> {
    plan.save(&run_dir.join(PLAN_FILE))
        .with_context(|| format!("Could not write plan copy to {}", run_dir.display()))?;

    let mut journal = Journal::open_in(run_dir)
        .with_context(|| format!("Could not open journal in {}", run_dir.display()))?;
    let report = ApplyEngine::new(plan, client, options)
        .run(&mut journal, inputs, observer)
        .with_context(|| format!("Apply of {} aborted", plan.run_id))?;

    report
        .save(&run_dir.join(APPLY_REPORT))
        .context("Could not write apply report")?;
    journal.archive().context("Could not archive journal")?;
    Ok(report)
}

/// Journal of an earlier attempt at this run, after checking it applied the same plan
fn previous_run(run_dir: &Path, plan: &Plan) -> Result<JournalSnapshot> {
    let previous = run_dir.join(PLAN_FILE);
    if previous.exists() {
        let applied = load_plan(&previous)?;
        if applied.fingerprint() != plan.fingerprint() {
            anyhow::bail!(
                "Plan differs from the one applied in run {}; compile it with a new --run-id",
                plan.run_id
            );
        }
    }

    JournalSnapshot::load_run(run_dir)
        .with_context(|| format!("Could not read journal in {}", run_dir.display()))
}

/// Inputs from `file`, plus prompts for whatever is still missing
fn collect_inputs(
    plan: &Plan,
    file: Option<&Path>,
    resume: &HashSet<String>,
    interactive: bool,
) -> Result<StaticInputs> {
    let mut inputs = match file {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Invalid inputs file {}", path.display()))?
        }
        None => StaticInputs::default(),
    };

    let pending = plan
        .actions
        .iter()
        .filter(|a| a.requires_user_input && !resume.contains(&a.idempotency_key));

    for action in pending {
        for field in action.unresolved_inputs() {
            let supplied = inputs
                .0
                .get(&action.id)
                .and_then(|fields| fields.get(field))
                .is_some_and(|v| !v.is_null());
            if supplied {
                continue;
            }
            if !interactive {
                log::warn!("No value for {} {field}; the action will be blocked", action.id);
                continue;
            }

            let prompt = format!("{} {}", action.id, field);
            let value = if action.action_type == ActionType::SetSecret {
                Password::new()
                    .with_prompt(prompt)
                    .allow_empty_password(true)
                    .interact()?
            } else {
                Input::<String>::new()
                    .with_prompt(prompt)
                    .allow_empty(true)
                    .interact_text()?
            };
            if !value.is_empty() {
                inputs.set(&action.id, field, value);
            }
        }
    }
    Ok(inputs)
}

pub fn print_report(report: &ApplyReport) {
    ui::section("Phases");
    for (phase, summary) in &report.phases {
        let mut parts = vec![format!("{} done", summary.done)];
        for (count, label) in [
            (summary.failed, "failed"),
            (summary.skipped, "skipped"),
            (summary.blocked, "blocked"),
            (summary.not_started, "not started"),
        ] {
            if count > 0 {
                parts.push(format!("{count} {label}"));
            }
        }
        ui::kv(&format!("{:<14}", phase.as_str()), &parts.join(", "));
    }

    let problems: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.state, ActionState::Failed | ActionState::Blocked))
        .collect();
    if !problems.is_empty() {
        ui::section("Problems");
        for outcome in problems {
            println!(
                "  {} {} {}",
                ui::action_glyph(outcome.state),
                outcome.action_id,
                outcome.error.as_deref().unwrap_or_default().dimmed()
            );
        }
    }

    if !report.manual_follow_up.is_empty() {
        ui::section("Manual follow-up");
        for item in &report.manual_follow_up {
            println!("  {} {}: {}", "→".blue(), item.action_id, item.reason);
        }
    }

    println!();
    let resumed = report.outcomes.iter().filter(|o| o.resumed).count();
    println!(
        "{} {} ({} done, {} resumed, {} failed, {} skipped)",
        "Status:".bold(),
        ui::run_status(report.status),
        report.count(ActionState::Done),
        resumed,
        report.count(ActionState::Failed),
        report.count(ActionState::SkippedDueToDependencyFailure),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionplan::{SourceDocument, compile};
    use applykit::{NoInputs, NoProgress, RecordStatus};

    fn plan() -> Plan {
        let doc = SourceDocument::from_json(
            r#"{
                "source_id": "gitlab:acme/widgets",
                "repository": {"name": "widgets", "clone_url": "https://git.example/widgets.git"},
                "labels": [{"id": "bug", "name": "bug", "color": "d73a4a"}],
                "secrets": [{"name": "DEPLOY_TOKEN"}]
            }"#,
        )
        .unwrap();
        compile(&doc, None).unwrap()
    }

    fn dry_run() -> Arc<dyn PlatformClient> {
        Arc::new(clients::rehearsal_registry())
    }

    #[test]
    fn test_execute_writes_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan();
        let mut inputs = StaticInputs::default();
        inputs.set("set_secret:DEPLOY_TOKEN", "value", "s3cr3t");

        let report = execute(
            &plan,
            dir.path(),
            dry_run(),
            ApplyOptions::default(),
            &mut inputs,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert!(dir.path().join(APPLY_REPORT).is_file());
        assert!(dir.path().join(PLAN_FILE).is_file());
        // Live journal was archived
        assert!(!dir.path().join(applykit::JOURNAL_FILE).exists());
        let snapshot = JournalSnapshot::load_run(dir.path()).unwrap();
        assert_eq!(snapshot.len(), plan.actions.len());
        assert!(
            snapshot
                .records()
                .iter()
                .all(|r| r.status == RecordStatus::Done)
        );
    }

    #[test]
    fn test_missing_secret_blocks_only_that_action() {
        let dir = tempfile::tempdir().unwrap();
        let report = execute(
            &plan(),
            dir.path(),
            dry_run(),
            ApplyOptions::default(),
            &mut NoInputs,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(
            report.outcome("set_secret:DEPLOY_TOKEN").unwrap().state,
            ActionState::Blocked
        );
        assert_eq!(
            report.outcome("create_label:bug").unwrap().state,
            ActionState::Done
        );
    }

    #[test]
    fn test_resume_skips_done_actions() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan();
        execute(
            &plan,
            dir.path(),
            dry_run(),
            ApplyOptions::default(),
            &mut NoInputs,
            &mut NoProgress,
        )
        .unwrap();

        let previous = previous_run(dir.path(), &plan).unwrap();
        let cursor = previous.resume_cursor();
        assert_eq!(cursor.len(), plan.actions.len() - 1);

        let mut inputs = StaticInputs::default();
        inputs.set("set_secret:DEPLOY_TOKEN", "value", "s3cr3t");
        let options = ApplyOptions {
            resume: cursor,
            prior_outputs: previous.outputs(),
            ..ApplyOptions::default()
        };
        let report = execute(
            &plan,
            dir.path(),
            dry_run(),
            options,
            &mut inputs,
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(report.status, RunStatus::Success);
        let resumed = report.outcomes.iter().filter(|o| o.resumed).count();
        assert_eq!(resumed, plan.actions.len() - 1);
        assert!(!report.outcome("set_secret:DEPLOY_TOKEN").unwrap().resumed);

        // Outputs from the first attempt reach the resumed action
        let snapshot = JournalSnapshot::load_run(dir.path()).unwrap();
        let secret = snapshot.latest()["set_secret:DEPLOY_TOKEN"];
        let upstream = secret.action_config[applykit::DEPENDENCY_OUTPUTS]
            .as_object()
            .unwrap();
        assert!(upstream.contains_key("create_repository:widgets"));
        assert!(upstream.values().all(|o| o["dry_run"] == true));
    }

    #[test]
    fn test_resume_rejects_different_plan() {
        let dir = tempfile::tempdir().unwrap();
        let original = plan();
        original.save(&dir.path().join(PLAN_FILE)).unwrap();

        let doc = SourceDocument::from_json(
            r#"{
                "source_id": "gitlab:acme/widgets",
                "repository": {"name": "widgets", "clone_url": "https://git.example/widgets.git"}
            }"#,
        )
        .unwrap();
        let other = compile(&doc, None).unwrap();
        assert!(previous_run(dir.path(), &other).is_err());
        assert!(previous_run(dir.path(), &original).unwrap().is_empty());
    }

    #[test]
    fn test_collect_inputs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        fs::write(
            &path,
            r#"{"set_secret:DEPLOY_TOKEN": {"value": "from-file"}}"#,
        )
        .unwrap();

        let plan = plan();
        let mut inputs = collect_inputs(&plan, Some(&path), &HashSet::new(), false).unwrap();
        let secret = plan.action("set_secret:DEPLOY_TOKEN").unwrap();
        assert_eq!(
            inputs.resolve(secret, "value"),
            Some(serde_json::Value::from("from-file"))
        );
    }

    #[test]
    fn test_collect_inputs_rejects_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(collect_inputs(&plan(), Some(&path), &HashSet::new(), false).is_err());
    }
}
