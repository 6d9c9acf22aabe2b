//! Execution engine: the three ways of running a snippet

use crate::capture::OutputBuffer;
use crate::classify::{DiagnosticRecord, LogClassifier, PatternClassifier, Severity};
use crate::error::SandboxError;
use crate::inline::{InlineHost, PhpSession};
use crate::prepare::{self, PrepareOptions, PreparedUnit};
use crate::store::{ArtifactStore, CODE_EXTENSION, LOG_EXTENSION};
use crate::token::Token;
use crate::types::{DetachedRun, ExecutionResult, Strategy, Variables};
use crate::Result;
use phpbox_common::{AppConfig, ConfigResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Route the interpreter's error log to stderr whatever php.ini says, so
/// every diagnostic lands in the captured log file
const LOG_TO_STDERR: [&str; 4] = ["-d", "log_errors=1", "-d", "error_log="];

/// Settings the engine needs at construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interpreter binary; only checked when it is spawned
    pub php_binary: String,
    /// Cache root; the sandbox directory is created underneath
    pub cache_root: PathBuf,
    /// Start children from the parent's environment (true) or an empty one
    pub inherit_environment: bool,
}

impl EngineConfig {
    pub fn new(php_binary: impl Into<String>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            php_binary: php_binary.into(),
            cache_root: cache_root.into(),
            inherit_environment: true,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> ConfigResult<Self> {
        Ok(Self {
            php_binary: config.php_binary().to_string(),
            cache_root: config.cache_dir()?,
            inherit_environment: config.php_settings.inherit_environment,
        })
    }
}

struct InlineContext {
    host: Box<dyn InlineHost>,
    buffer: OutputBuffer,
}

/// Runs snippets and turns their diagnostics into [`SandboxError`]s.
///
/// Every artifact a call creates is removed before the call returns, on
/// success and failure alike. The one hand-off is a detached launch without
/// debug, where the spawned script deletes its own file.
pub struct ExecutionEngine {
    config: EngineConfig,
    store: ArtifactStore,
    classifier: Arc<dyn LogClassifier>,
    /// Inline calls share one host and must not interleave
    inline: Mutex<InlineContext>,
    last_prepared: StdMutex<Option<PreparedUnit>>,
}

impl ExecutionEngine {
    /// Create an engine using the PHP log classifier and a persistent PHP
    /// session for inline calls
    pub fn new(config: EngineConfig) -> Self {
        let store = ArtifactStore::new(&config.cache_root);
        let session = PhpSession::new(config.php_binary.clone()).with_working_dir(store.dir());
        Self {
            store,
            classifier: Arc::new(PatternClassifier::php()),
            inline: Mutex::new(InlineContext {
                host: Box::new(session),
                buffer: OutputBuffer::new(),
            }),
            last_prepared: StdMutex::new(None),
            config,
        }
    }

    /// Create an engine from loaded application configuration
    pub fn from_config(config: &AppConfig) -> ConfigResult<Self> {
        Ok(Self::new(EngineConfig::from_app_config(config)?))
    }

    /// Replace the log classifier
    pub fn with_classifier(mut self, classifier: impl LogClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Replace the host used by [`ExecutionEngine::run_inline`]
    pub fn with_inline_host(mut self, host: impl InlineHost + 'static) -> Self {
        self.inline = Mutex::new(InlineContext {
            host: Box::new(host),
            buffer: OutputBuffer::new(),
        });
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Sandbox directory as configured
    pub fn sandbox_dir(&self) -> &Path {
        self.store.dir()
    }

    /// The unit produced by the most recent call
    pub fn last_prepared(&self) -> Option<PreparedUnit> {
        self.last_prepared.lock().ok().and_then(|last| last.clone())
    }

    fn prepare_unit(&self, code: &str, options: PrepareOptions) -> PreparedUnit {
        let unit = prepare::prepare(code, options);
        if let Ok(mut last) = self.last_prepared.lock() {
            *last = Some(unit.clone());
        }
        unit
    }

    fn command(&self, dir: &Path, vars: &Variables) -> Command {
        let mut command = Command::new(&self.config.php_binary);
        command.current_dir(dir);
        if !self.config.inherit_environment {
            command.env_clear();
        }
        command.envs(vars);
        command
    }

    /// Run a snippet in the shared inline context.
    ///
    /// Classes and functions defined by earlier inline calls are visible;
    /// `vars` are exposed as `$_SANDBOX`. A fault raised by the snippet is
    /// returned as [`SandboxError::Inline`] without classification.
    pub async fn run_inline(&self, code: &str, vars: &Variables) -> Result<ExecutionResult> {
        let token = Token::new();
        let start = Instant::now();

        tracing::info!(
            token = %token,
            strategy = %Strategy::Inline,
            code_len = code.len(),
            "Executing code"
        );

        let unit = self.prepare_unit(code, PrepareOptions::plain());
        let path = self
            .store
            .write_artifact(&token, CODE_EXTENSION, unit.as_str())
            .await?;
        let _artifact = self.store.guard(path.clone());

        let mut context = self.inline.lock().await;
        let InlineContext { host, buffer } = &mut *context;

        tracing::debug!(token = %token, host = host.name(), "Dispatching inline");
        let mut scope = buffer.capture();
        if let Err(fault) = host.include(&path, vars, &mut scope).await {
            tracing::debug!(token = %token, error = %fault, "Inline execution failed");
            return Err(fault.into());
        }
        let output = scope.finish();

        Ok(ExecutionResult {
            token,
            strategy: Strategy::Inline,
            prepared: unit,
            output,
            exit_code: None,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run a snippet in a fresh interpreter and wait for it.
    ///
    /// The unit is fed through stdin with diagnostics enabled; stderr goes to
    /// `<token>.log`, which is classified once the child exits. Returns the
    /// captured stdout and exit status when no diagnostic was reported; a
    /// non-zero status on its own is not a failure.
    pub async fn run_synchronous(&self, code: &str, vars: &Variables) -> Result<ExecutionResult> {
        let token = Token::new();
        let start = Instant::now();

        tracing::info!(
            token = %token,
            strategy = %Strategy::Synchronous,
            code_len = code.len(),
            "Executing code"
        );

        let dir = self.store.ensure_directory().await?.to_path_buf();
        let unit = self.prepare_unit(code, PrepareOptions::with_diagnostics());

        let log_path = dir.join(token.file_name(LOG_EXTENSION));
        let log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|source| SandboxError::WriteFailure {
                path: log_path.clone(),
                source,
            })?
            .into_std()
            .await;
        let _log = self.store.guard(log_path.clone());

        let mut child = self
            .command(&dir, vars)
            .args(LOG_TO_STDERR)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log_file))
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                binary: self.config.php_binary.clone(),
                source,
            })?;

        tracing::debug!(token = %token, pid = ?child.id(), "Dispatched");

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(unit.as_str().as_bytes()).await {
                Ok(()) => {}
                // the child quit before reading; its status and log tell why
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(token = %token, "Interpreter closed stdin early");
                }
                Err(e) => return Err(SandboxError::io("Failed to write to interpreter stdin", e)),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SandboxError::io("Failed to collect interpreter output", e))?;

        tracing::debug!(token = %token, status = ?output.status.code(), "Capturing diagnostics");

        let log = match tokio::fs::read(&log_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(SandboxError::io("Failed to read diagnostics log", e)),
        };
        self.store.remove_artifact(&log_path).await;

        if !log.is_empty() {
            if let Some(record) = self.classifier.classify(&log) {
                tracing::debug!(
                    token = %token,
                    severity = %record.severity,
                    "Interpreter reported a diagnostic"
                );
                return Err(record.into());
            }
        }

        // a script may exit(n) on purpose; only a kill leaves no status
        let Some(exit_code) = output.status.code() else {
            return Err(DiagnosticRecord::new(
                Severity::Fatal,
                "interpreter was terminated by a signal",
                log,
            )
            .into());
        };

        Ok(ExecutionResult {
            token,
            strategy: Strategy::Synchronous,
            prepared: unit,
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code: Some(exit_code),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Launch a snippet in a fresh interpreter without waiting for it.
    ///
    /// The script deletes its own artifact as its last statement. With
    /// `wait` (debug mode) the engine waits for the exit status instead and
    /// removes the artifact itself if the script did not. Failures inside
    /// the child are not observable here.
    pub async fn run_detached(
        &self,
        code: &str,
        vars: &Variables,
        wait: bool,
    ) -> Result<DetachedRun> {
        let token = Token::new();

        tracing::info!(
            token = %token,
            strategy = %Strategy::Detached,
            code_len = code.len(),
            wait,
            "Executing code"
        );

        let dir = self.store.ensure_directory().await?.to_path_buf();
        let unit = self.prepare_unit(code, PrepareOptions::with_self_destruct());
        let path = self
            .store
            .write_artifact(&token, CODE_EXTENSION, unit.as_str())
            .await?;
        let artifact = self.store.guard(path.clone());

        let mut child = self
            .command(&dir, vars)
            .arg(&path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| SandboxError::ForkFailure {
                binary: self.config.php_binary.clone(),
                source,
            })?;
        let pid = child.id();

        if !wait {
            artifact.disarm();
            tracing::debug!(token = %token, pid = ?pid, "Detached");
            return Ok(DetachedRun::Launched { token, pid });
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SandboxError::io("Failed to wait for detached interpreter", e))?;
        drop(artifact);

        tracing::debug!(token = %token, status = ?status.code(), "Detached run finished");
        Ok(DetachedRun::Completed {
            token,
            exit_code: status.code(),
        })
    }
}
