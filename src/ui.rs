use applykit::{ActionState, RollbackState, RunStatus};
use colored::{ColoredString, Colorize};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// State glyphs
// ============================================================================

pub fn action_glyph(state: ActionState) -> ColoredString {
    match state {
        ActionState::Done => "✓".green(),
        ActionState::Failed => "✗".red(),
        ActionState::SkippedDueToDependencyFailure => "↷".yellow(),
        ActionState::Blocked => "⏸".yellow(),
        ActionState::Pending
        | ActionState::Ready
        | ActionState::Running
        | ActionState::NotStarted => "·".dimmed(),
    }
}

pub fn rollback_glyph(state: RollbackState) -> ColoredString {
    match state {
        RollbackState::RolledBack => "↺".green(),
        RollbackState::Skipped => "↷".yellow(),
        RollbackState::Failed => "✗".red(),
        RollbackState::Planned => "→".blue(),
    }
}

pub fn run_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Success => status.as_str().green().bold(),
        RunStatus::Partial | RunStatus::Cancelled => status.as_str().yellow().bold(),
        RunStatus::Failed => status.as_str().red().bold(),
    }
}

/// Format a millisecond duration compactly
pub fn format_millis(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

// ============================================================================
// Tests
// ============================================================================
