//! Common test utilities shared across integration tests

use phpbox_common::ENV_PHP_BINARY;
use phpbox_sandbox::{EngineConfig, ExecutionEngine};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Locate a PHP interpreter, preferring `PHPBOX_PHP_BINARY`
pub fn php_binary() -> Option<PathBuf> {
    match std::env::var(ENV_PHP_BINARY) {
        Ok(binary) if !binary.trim().is_empty() => Some(PathBuf::from(binary.trim())),
        _ => which::which("php").ok(),
    }
}

/// An engine rooted in its own temporary cache directory
pub struct TestSandbox {
    pub engine: ExecutionEngine,
    root: TempDir,
}

impl TestSandbox {
    /// Build a sandbox, or `None` when no PHP interpreter is installed
    pub fn new() -> Option<Self> {
        setup_test_logging();

        let Some(php) = php_binary() else {
            eprintln!("php not found, skipping");
            return None;
        };

        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let engine = ExecutionEngine::new(EngineConfig::new(
            php.to_string_lossy().into_owned(),
            root.path(),
        ));
        Some(Self { engine, root })
    }

    /// Build a sandbox around a shell script standing in for the interpreter.
    /// The script receives the engine's arguments and stdio unchanged.
    #[cfg(unix)]
    pub fn with_fake_interpreter(script: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        setup_test_logging();

        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let binary = root.path().join("fake-php");
        std::fs::write(&binary, script).expect("Failed to write fake interpreter");
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to mark fake interpreter executable");

        let engine = ExecutionEngine::new(EngineConfig::new(
            binary.to_string_lossy().into_owned(),
            root.path(),
        ));
        Self { engine, root }
    }

    /// Scratch directory outside the sandbox, removed with the fixture
    pub fn scratch_dir(&self) -> PathBuf {
        let dir = self.root.path().join("scratch");
        std::fs::create_dir_all(&dir).expect("Failed to create scratch dir");
        dir
    }

    /// Regular files currently in the sandbox directory
    pub fn files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.engine.sandbox_dir()) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }

    pub fn assert_empty(&self) {
        let files = self.files();
        assert!(files.is_empty(), "PHP sandbox dir is not empty: {:?}", files);
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if check() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
