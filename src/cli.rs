use crate::config::ClientKind;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan, apply and roll back repository migrations", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a source document into an action plan
    Compile(CompileArgs),

    /// Parse a plan file and check its invariants
    Validate {
        /// Plan file
        plan: PathBuf,
    },

    /// Show a plan grouped by phase
    Show(ShowArgs),

    /// Compare two plans
    Diff {
        /// Older plan
        old: PathBuf,
        /// Newer plan
        new: PathBuf,
    },

    /// Execute a plan against the target platform
    Apply(ApplyArgs),

    /// Undo the recorded effects of a run
    Rollback(RollbackArgs),

    /// List runs, or summarize one run
    Status {
        /// Run id or journal path (omit to list all runs)
        run: Option<String>,
    },

    /// Print the action catalog
    Catalog,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan Commands
// ============================================================================

#[derive(Args)]
pub struct CompileArgs {
    /// Source document (JSON)
    pub source: PathBuf,

    /// Component selection file (JSON); overrides one embedded in the source
    #[arg(long)]
    pub components: Option<PathBuf>,

    /// Write the plan here instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Use this run id instead of generating one
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Plan file
    pub plan: PathBuf,

    /// Print dependencies under each action
    #[arg(long)]
    pub deps: bool,
}

// ============================================================================
// Run Commands
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Plan file
    pub plan: PathBuf,

    /// Maximum concurrent actions (default from config, else 4)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Continue a run, skipping actions its journal records as done
    #[arg(long)]
    pub resume: bool,

    /// JSON file with user inputs keyed by action id, then field
    #[arg(long)]
    pub inputs: Option<PathBuf>,

    /// Platform client to use (default from config)
    #[arg(long, value_enum)]
    pub client: Option<ClientKind>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Cancel the run after this many actions finish
    #[arg(long, value_name = "N")]
    pub stop_after: Option<usize>,
}

#[derive(Args)]
pub struct RollbackArgs {
    /// Run id, run directory or journal path
    pub run: String,

    /// List what would be undone without calling the client
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Platform client to use (default from config)
    #[arg(long, value_enum)]
    pub client: Option<ClientKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply_flags() {
        let cli = Cli::try_parse_from([
            "ferry",
            "apply",
            "plan.json",
            "--jobs",
            "2",
            "--resume",
            "--client",
            "command",
            "--stop-after",
            "3",
            "-y",
        ])
        .unwrap();
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.jobs, Some(2));
        assert!(args.resume && args.yes);
        assert_eq!(args.client, Some(ClientKind::Command));
        assert_eq!(args.stop_after, Some(3));
    }

    #[test]
    fn test_parse_rollback_dry_run() {
        let cli = Cli::try_parse_from(["ferry", "-vv", "rollback", "run-1", "--dry-run"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Rollback(args) = cli.command else {
            panic!("expected rollback");
        };
        assert_eq!(args.run, "run-1");
        assert!(args.dry_run);
        assert!(!args.yes);
    }

    #[test]
    fn test_client_value_names() {
        let cli = Cli::try_parse_from(["ferry", "apply", "p.json", "--client", "dry-run"]).unwrap();
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.client, Some(ClientKind::DryRun));
    }
}
