//! Platform clients shipped with the CLI

mod command;
mod dry_run;

pub use command::CommandClient;
pub use dry_run::rehearsal_registry;

use crate::config::{ClientKind, ClientSettings};
use anyhow::{Context, Result};
use applykit::PlatformClient;
use std::sync::Arc;

/// Build the client selected by `kind`, configured from `settings`
pub fn build(kind: ClientKind, settings: &ClientSettings) -> Result<Arc<dyn PlatformClient>> {
    match kind {
        ClientKind::DryRun => Ok(Arc::new(rehearsal_registry())),
        ClientKind::Command => {
            let program = settings
                .command
                .as_deref()
                .context("The command client needs [client] command in config.toml")?;
            Ok(Arc::new(CommandClient::new(program, settings.args.clone())))
        }
    }
}
