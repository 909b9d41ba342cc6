//! Client that delegates to an external executable.
//!
//! The executable is invoked as `<program> [args...] execute` with the
//! action JSON on stdin, or `<program> [args...] rollback` with the journal
//! record JSON on stdin. Exit codes:
//!
//! | code | execute | rollback |
//! |------|---------|----------|
//! | 0    | success; stdout may carry an `ActionOutput` | removed |
//! | 3    | not found | already absent |
//! | 75   | transient | transient |
//! | 76   | rate limited; stdout `{"retry_after_secs": n}` | rate limited |
//! | else | rejected | rejected |

use crate::paths;
use actionplan::Action;
use applykit::{ActionError, ActionOutput, ExecutedActionRecord, PlatformClient, RollbackOutcome};
use serde::Deserialize;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

pub const EXIT_NOT_FOUND: i32 = 3;
pub const EXIT_TRANSIENT: i32 = 75;
pub const EXIT_RATE_LIMITED: i32 = 76;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CommandClient {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandClient {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: paths::expand(program),
            args,
        }
    }

    fn invoke(&self, verb: &str, stdin: &[u8]) -> Result<Output, ActionError> {
        log::debug!("Running {} {verb}", self.program.display());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(verb)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ActionError::rejected(format!(
                    "failed to execute {}: {e}",
                    self.program.display()
                ))
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            match pipe.write_all(stdin) {
                Ok(()) => {}
                // The program may exit without reading its input
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ActionError::transient(format!("writing stdin: {e}"))),
            }
        }

        child
            .wait_with_output()
            .map_err(|e| ActionError::transient(format!("waiting for client: {e}")))
    }
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("client exited with {}", output.status)
    } else {
        trimmed.to_string()
    }
}

/// Map a non-zero exit into an [`ActionError`]
fn classify(output: &Output) -> ActionError {
    match output.status.code() {
        Some(EXIT_NOT_FOUND) => ActionError::not_found(stderr_message(output)),
        Some(EXIT_TRANSIENT) => ActionError::transient(stderr_message(output)),
        Some(EXIT_RATE_LIMITED) => {
            let secs = serde_json::from_slice::<RateLimitBody>(&output.stdout)
                .map_or(DEFAULT_RETRY_AFTER_SECS, |b| b.retry_after_secs);
            ActionError::RateLimited {
                retry_after: Duration::from_secs(secs),
            }
        }
        _ => ActionError::rejected(stderr_message(output)),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ActionError> {
    serde_json::to_vec(value).map_err(|e| ActionError::rejected(e.to_string()))
}

impl PlatformClient for CommandClient {
    fn execute(&self, action: &Action) -> Result<ActionOutput, ActionError> {
        let output = self.invoke("execute", &to_json(action)?)?;
        if !output.status.success() {
            return Err(classify(&output));
        }
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(ActionOutput::default());
        }
        serde_json::from_slice(&output.stdout).map_err(|e| {
            ActionError::rejected(format!("{}: unparseable output: {e}", action.id))
        })
    }

    fn rollback(&self, record: &ExecutedActionRecord) -> Result<RollbackOutcome, ActionError> {
        let output = self.invoke("rollback", &to_json(record)?)?;
        match output.status.code() {
            Some(0) => Ok(RollbackOutcome::Removed),
            Some(EXIT_NOT_FOUND) => Ok(RollbackOutcome::AlreadyAbsent),
            _ => Err(classify(&output)),
        }
    }
}
