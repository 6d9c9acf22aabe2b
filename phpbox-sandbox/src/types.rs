//! Core types for sandbox execution

use crate::prepare::PreparedUnit;
use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Variables handed to a snippet: environment variables for child
/// processes, the `$_SANDBOX` array for inline runs
pub type Variables = BTreeMap<String, String>;

/// How a snippet is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Shared long-lived interpreter, state persists across calls
    Inline,
    /// Fresh child process, blocks until it exits
    Synchronous,
    /// Fresh child process, not waited for
    Detached,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Inline => "inline",
            Strategy::Synchronous => "synchronous",
            Strategy::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// Successful execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Token that named this run's artifacts
    pub token: Token,

    pub strategy: Strategy,

    /// The unit that actually ran
    pub prepared: PreparedUnit,

    /// Captured standard output
    pub output: String,

    /// Interpreter exit status; `None` for inline runs
    pub exit_code: Option<i32>,

    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

/// Outcome of a detached launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachedRun {
    /// Launched and left running; the script removes its own file
    Launched { token: Token, pid: Option<u32> },

    /// Debug mode: the engine waited for the child
    Completed { token: Token, exit_code: Option<i32> },
}

impl DetachedRun {
    /// Check if a waited-for child exited successfully
    pub fn success(&self) -> bool {
        match self {
            DetachedRun::Launched { .. } => true,
            DetachedRun::Completed { exit_code, .. } => *exit_code == Some(0),
        }
    }
}
