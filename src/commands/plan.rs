//! `compile`, `validate`, `show` and `diff`

use super::load_plan;
use crate::Context;
use crate::cli::{CompileArgs, ShowArgs};
use crate::ui;
use actionplan::{CompileOptions, ComponentSelection, Plan, PlanCompiler, SourceDocument};
use anyhow::{Context as _, Result};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::path::Path;

pub fn compile(ctx: &Context, args: CompileArgs) -> Result<()> {
    let doc = SourceDocument::load(&args.source)
        .with_context(|| format!("Invalid source document {}", args.source.display()))?;

    let selection = match &args.components {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            Some(
                ComponentSelection::from_json(&json)
                    .with_context(|| format!("Invalid component selection {}", path.display()))?,
            )
        }
        None => None,
    };

    let compiler = PlanCompiler::new(CompileOptions {
        run_id: args.run_id,
        generated_at: None,
    });
    let plan = compiler
        .compile(&doc, selection.as_ref())
        .with_context(|| format!("Could not compile {}", args.source.display()))?;

    match &args.out {
        Some(out) => {
            plan.save(out)
                .with_context(|| format!("Could not write {}", out.display()))?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Compiled {} actions into {}",
                    plan.actions.len(),
                    out.display()
                ));
                ui::kv("Run", &plan.run_id);
                ui::kv("Fingerprint", &plan.fingerprint());
            }
        }
        None => println!("{}", plan.to_json_pretty()?),
    }
    Ok(())
}

pub fn validate(ctx: &Context, path: &Path) -> Result<()> {
    let plan = load_plan(path)?;
    if !ctx.quiet {
        ui::success(&format!(
            "{} is valid: {} actions in {} phases",
            path.display(),
            plan.actions.len(),
            plan.phases.len()
        ));
        ui::kv("Fingerprint", &plan.fingerprint());
    }
    Ok(())
}

pub fn show(ctx: &Context, args: &ShowArgs) -> Result<()> {
    let plan = load_plan(&args.plan)?;

    ui::header(&format!("Plan {}", plan.run_id));
    ui::kv("Source", &plan.source_id);
    ui::kv("Generated", &plan.generated_at.to_rfc3339());
    ui::kv("Version", &plan.version);
    ui::kv("Fingerprint", &plan.fingerprint());

    let graph = plan.dependency_graph()?;
    if args.deps {
        ui::kv(
            "Graph",
            &format!("{} actions, {} edges", graph.len(), graph.edge_count()),
        );
    }

    for (phase, ids) in &plan.phases {
        ui::section(&format!("{phase} ({})", ids.len()));
        for id in ids {
            let Some(action) = plan.action(id) else {
                continue;
            };
            let mut line = format!("  {}", action.id);
            if !action.user_input_fields.is_empty() {
                line.push_str(&format!(
                    " {}",
                    format!("[input: {}]", action.user_input_fields.join(", ")).yellow()
                ));
            }
            if !action.reversible {
                line.push_str(&format!(" {}", "[irreversible]".dimmed()));
            }
            println!("{line}");
            if args.deps {
                if !action.dependencies.is_empty() {
                    ui::dim(&format!("    after {}", action.dependencies.join(", ")));
                }
                let dependents = graph.dependents(&action.id)?;
                if !dependents.is_empty() {
                    ui::dim(&format!("    before {}", dependents.join(", ")));
                }
            }
            if ctx.verbose > 0 {
                ui::dim(&format!("    {}", action.description));
            }
        }
    }

    print_statistics(&plan);
    Ok(())
}

fn print_statistics(plan: &Plan) {
    let stats = &plan.statistics;
    ui::section("Statistics");
    ui::kv("Actions", &stats.total_actions.to_string());
    ui::kv("Dependencies", &stats.total_dependencies.to_string());
    ui::kv(
        "Awaiting input",
        &stats.actions_requiring_user_input.to_string(),
    );
    for (ty, count) in &stats.actions_by_type {
        ui::dim(&format!("{:<28} {count}", ty.as_str()));
    }
}

pub fn diff(ctx: &Context, old: &Path, new: &Path) -> Result<()> {
    let old_plan = load_plan(old)?;
    let new_plan = load_plan(new)?;

    if !ctx.quiet {
        ui::header(&format!("{} → {}", old.display(), new.display()));
        let same = old_plan.fingerprint() == new_plan.fingerprint();
        ui::kv(
            "Fingerprint",
            &if same {
                "unchanged".green().to_string()
            } else {
                format!("{} → {}", old_plan.fingerprint(), new_plan.fingerprint())
                    .yellow()
                    .to_string()
            },
        );
        println!();
    }

    let text_a = old_plan.to_json_pretty()?;
    let text_b = new_plan.to_json_pretty()?;
    let diff = TextDiff::from_lines(&text_a, &text_b);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => {
                has_changes = true;
                print!("{}", format!("- {change}").red());
            }
            ChangeTag::Insert => {
                has_changes = true;
                print!("{}", format!("+ {change}").green());
            }
            ChangeTag::Equal => {}
        }
    }

    if !has_changes {
        println!("{}", "(plans are identical)".dimmed());
    }
    Ok(())
}
