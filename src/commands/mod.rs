pub mod apply;
pub mod catalog;
pub mod plan;
pub mod rollback;
pub mod status;

use actionplan::Plan;
use anyhow::{Context, Result};
use std::path::Path;

/// Load and validate a plan file
pub fn load_plan(path: &Path) -> Result<Plan> {
    Plan::load(path).with_context(|| format!("Invalid plan {}", path.display()))
}

/// Ask for confirmation; `default` is used when the user just hits enter
pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?;

    Ok(confirmed)
}
