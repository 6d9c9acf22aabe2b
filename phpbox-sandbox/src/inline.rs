//! Inline execution hosts
//!
//! A compiled caller has no PHP namespace to merge a snippet into, so
//! "inline" means running the snippet inside a long-lived interpreter that
//! belongs to the engine. Classes, functions and globals defined by one
//! inline call stay visible to the next, while local variables stay local,
//! the same as an `include` performed from inside a method.

use crate::capture::CaptureScope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Failure raised by the snippet itself (or by the host running it)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InlineFault {
    /// Uncaught throwable, rendered as `Class: message`
    #[error("{0}")]
    Thrown(String),

    /// The snippet ended the interpreter (exit, fatal error)
    #[error("script terminated the interpreter: {0}")]
    Terminated(String),

    /// The host could not run the snippet at all
    #[error("inline host unavailable: {0}")]
    Host(String),
}

/// Something able to execute a prepared artifact in a shared context
#[async_trait]
pub trait InlineHost: Send {
    /// Run the file at `path` with `vars` visible as `$_SANDBOX`, writing
    /// everything it prints into `sink`
    async fn include(
        &mut self,
        path: &Path,
        vars: &BTreeMap<String, String>,
        sink: &mut CaptureScope<'_>,
    ) -> Result<(), InlineFault>;

    /// Get host name
    fn name(&self) -> &str;
}

/// Prefix of every reply line. Anything else the session prints is script
/// output that escaped the driver's buffer.
const REPLY_MARKER: &str = "\x1ephpbox-reply:";

/// Driver loop run by the session interpreter.
///
/// Reads one JSON request per line, includes the requested file inside a
/// closure (so locals do not leak between calls) and answers with one
/// marked JSON line. The shutdown hook answers for scripts that kill the
/// interpreter.
const SESSION_DRIVER: &str = r#"
$phpbox_inflight = false;
register_shutdown_function(static function () use (&$phpbox_inflight) {
    if (!$phpbox_inflight) {
        return;
    }
    $output = '';
    while (ob_get_level() > 0) {
        $output = ob_get_clean() . $output;
    }
    $error = error_get_last();
    echo "\n\x1Ephpbox-reply:", json_encode([
        'output' => $output,
        'fault' => $error !== null ? $error['message'] : 'script ended the interpreter',
        'terminated' => true,
    ], JSON_INVALID_UTF8_SUBSTITUTE), "\n";
});
$phpbox_include = static function ($phpbox_path, $_SANDBOX) {
    include $phpbox_path;
};
while (($phpbox_line = fgets(STDIN)) !== false) {
    $phpbox_request = json_decode($phpbox_line, true);
    if (!is_array($phpbox_request)) {
        continue;
    }
    $phpbox_level = ob_get_level();
    $phpbox_fault = null;
    error_clear_last();
    $phpbox_inflight = true;
    ob_start();
    try {
        $phpbox_include($phpbox_request['path'], (array) $phpbox_request['vars']);
    } catch (\Throwable $e) {
        $phpbox_fault = get_class($e) . ': ' . $e->getMessage();
    }
    $phpbox_output = '';
    while (ob_get_level() > $phpbox_level) {
        $phpbox_output = ob_get_clean() . $phpbox_output;
    }
    $phpbox_inflight = false;
    echo "\n\x1Ephpbox-reply:", json_encode([
        'output' => $phpbox_output,
        'fault' => $phpbox_fault,
        'terminated' => false,
    ], JSON_INVALID_UTF8_SUBSTITUTE), "\n";
    flush();
}
"#;

#[derive(Serialize)]
struct SessionRequest<'a> {
    path: &'a Path,
    vars: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct SessionReply {
    output: String,
    fault: Option<String>,
    #[serde(default)]
    terminated: bool,
}

struct SessionProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Persistent PHP interpreter serving inline calls.
///
/// Started on first use; restarted lazily after a script terminates it, and
/// before the next call when an earlier call was dropped while its request
/// was still unanswered.
///
/// The driver talks over the interpreter's own stdin and stdout. A snippet
/// that reads `STDIN` consumes the protocol and blocks until the caller
/// gives up; output a snippet pushes past the driver's buffer (for example
/// with an unbalanced `ob_end_flush()`) is recovered and kept in order.
pub struct PhpSession {
    binary: String,
    working_dir: Option<PathBuf>,
    process: Option<SessionProcess>,
    /// A request was sent and its reply not yet read
    pending: bool,
}

impl PhpSession {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: None,
            process: None,
            pending: false,
        }
    }

    /// Run the interpreter from `dir`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Whether an interpreter is currently running
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Stop the interpreter; the next call starts a fresh one
    pub async fn reset(&mut self) {
        self.pending = false;
        if let Some(mut process) = self.process.take() {
            drop(process.stdin);
            if let Err(e) = process.child.kill().await {
                tracing::debug!(error = %e, "Inline session already gone");
            }
        }
    }

    fn start(&self) -> Result<SessionProcess, InlineFault> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-d")
            .arg("display_errors=0")
            .arg("-d")
            .arg("log_errors=0")
            .arg("-r")
            .arg(SESSION_DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            InlineFault::Host(format!("failed to start '{}': {}", self.binary, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| InlineFault::Host("session stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InlineFault::Host("session stdout unavailable".to_string()))?;

        tracing::debug!(binary = %self.binary, pid = ?child.id(), "Inline session started");

        Ok(SessionProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn round_trip(
        process: &mut SessionProcess,
        request: &SessionRequest<'_>,
    ) -> Result<SessionReply, InlineFault> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| InlineFault::Host(format!("failed to encode request: {}", e)))?;
        line.push('\n');

        process
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| InlineFault::Host(format!("failed to send request: {}", e)))?;
        process
            .stdin
            .flush()
            .await
            .map_err(|e| InlineFault::Host(format!("failed to send request: {}", e)))?;

        let mut stray = Vec::new();
        loop {
            let line = match process.stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(InlineFault::Terminated(
                        "interpreter exited without answering".to_string(),
                    ))
                }
                Err(e) => return Err(InlineFault::Host(format!("failed to read reply: {}", e))),
            };

            let Some(json) = line.strip_prefix(REPLY_MARKER) else {
                stray.push(line);
                continue;
            };

            let mut reply: SessionReply = serde_json::from_str(json).map_err(|e| {
                InlineFault::Host(format!("unreadable reply from session: {}", e))
            })?;
            // the driver starts every reply on a fresh line
            let stray = stray.join("\n");
            if !stray.is_empty() {
                tracing::debug!(bytes = stray.len(), "Output escaped the session buffer");
                reply.output.insert_str(0, &stray);
            }
            return Ok(reply);
        }
    }
}

#[async_trait]
impl InlineHost for PhpSession {
    async fn include(
        &mut self,
        path: &Path,
        vars: &BTreeMap<String, String>,
        sink: &mut CaptureScope<'_>,
    ) -> Result<(), InlineFault> {
        if self.pending {
            // the reply to a dropped call is still due
            tracing::debug!("Restarting session with an unanswered request");
            self.reset().await;
        }
        if self.process.is_none() {
            self.process = Some(self.start()?);
        }
        let Some(process) = self.process.as_mut() else {
            return Err(InlineFault::Host("session not running".to_string()));
        };

        let request = SessionRequest { path, vars };
        self.pending = true;
        let reply = match Self::round_trip(process, &request).await {
            Ok(reply) => reply,
            Err(fault) => {
                // protocol state is unknown after a failed exchange
                self.reset().await;
                return Err(fault);
            }
        };
        self.pending = false;

        sink.write(&reply.output);

        if reply.terminated {
            tracing::debug!("Inline script terminated the session");
            self.reset().await;
            return Err(InlineFault::Terminated(
                reply.fault.unwrap_or_else(|| "unknown reason".to_string()),
            ));
        }

        match reply.fault {
            Some(fault) => Err(InlineFault::Thrown(fault)),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "php-session"
    }
}
