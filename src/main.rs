mod cli;
mod clients;
mod commands;
mod config;
mod paths;
mod progress;
mod runs;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Compile(args) => commands::plan::compile(&ctx, args),
        Command::Validate { plan } => commands::plan::validate(&ctx, &plan),
        Command::Show(args) => commands::plan::show(&ctx, &args),
        Command::Diff { old, new } => commands::plan::diff(&ctx, &old, &new),
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Rollback(args) => commands::rollback::run(&ctx, &args),
        Command::Status { run } => commands::status::run(&ctx, run.as_deref()),
        Command::Catalog => {
            commands::catalog::run(&ctx);
            Ok(())
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ferry", &mut io::stdout());
            Ok(())
        }
    }
}
