//! CLI command implementations
//!
//! Each command loads the configuration, applies the command-line
//! overrides on top of it and drives one strategy of the execution engine.

use anyhow::{anyhow, Context, Result};
use phpbox_common::AppConfig;
use phpbox_sandbox::{ArtifactStore, DetachedRun, ExecutionEngine, Variables};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Values given on the command line that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub php: Option<String>,
    pub cache_dir: Option<String>,
}

/// Parse a `KEY=VALUE` argument. The value may itself contain `=`.
pub fn parse_var(arg: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", arg))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", arg));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Load configuration from the file, the environment and the command line,
/// in increasing order of precedence.
///
/// # Arguments
/// * `overrides` - Command-line values
/// * `require_binary` - Whether a missing interpreter binary is an error
pub fn load_config(overrides: &Overrides, require_binary: bool) -> Result<AppConfig> {
    let path = match &overrides.config {
        Some(path) => path.clone(),
        None => AppConfig::config_path()?,
    };

    let mut config = AppConfig::read_from(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(php) = &overrides.php {
        config.php_settings.binary = php.clone();
    }
    if let Some(cache_dir) = &overrides.cache_dir {
        config.sandbox.cache_dir = cache_dir.clone();
    }

    if require_binary {
        config.validate()?;
    }

    debug!(
        php = config.php_binary(),
        cache_dir = %config.sandbox.cache_dir,
        "Configuration loaded"
    );
    Ok(config)
}

/// Read a snippet from `--code`, a file, or stdin when the file is `-` or
/// missing
pub async fn read_source(file: Option<&Path>, code: Option<String>) -> Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }

    match file {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut source = String::new();
            tokio::io::stdin()
                .read_to_string(&mut source)
                .await
                .context("Failed to read stdin")?;
            Ok(source)
        }
    }
}

/// Empty the sandbox directory, returning whether it ended up empty
pub fn clear_sandbox(store: &ArtifactStore) -> bool {
    match store.clear_all() {
        Ok(cleared) => cleared,
        Err(e) => {
            warn!(dir = %store.dir().display(), error = %e, "Failed to clear sandbox directory");
            false
        }
    }
}

/// Execute the cache-clear command.
///
/// Reports the outcome on the terminal; a directory that cannot be emptied
/// is reported but not treated as a command failure.
pub fn execute_cache_clear(overrides: &Overrides) -> Result<()> {
    let config = load_config(overrides, false)?;
    let store = ArtifactStore::new(config.cache_dir()?);

    info!(dir = %store.dir().display(), "Clearing sandbox directory");

    if clear_sandbox(&store) {
        println!("✓ Cache cleared");
    } else {
        eprintln!(
            "✗ Unable to clear the cache folder ({})",
            store.dir().display()
        );
    }
    Ok(())
}

/// Execute a snippet in a fresh interpreter and print its output. A
/// non-zero exit status is reported after the output.
///
/// # Arguments
/// * `overrides` - Command-line configuration values
/// * `code` - The snippet
/// * `vars` - Environment variables for the interpreter
pub async fn execute_run(overrides: &Overrides, code: &str, vars: Variables) -> Result<()> {
    let config = load_config(overrides, true)?;
    let engine = ExecutionEngine::from_config(&config)?;

    let result = engine.run_synchronous(code, &vars).await?;
    print_output(&result.output)?;

    info!(
        token = %result.token,
        exit_code = ?result.exit_code,
        duration_ms = result.duration_ms,
        "Run finished"
    );
    match result.exit_code {
        Some(0) | None => Ok(()),
        Some(code) => Err(anyhow!("script exited with status {}", code)),
    }
}

/// Launch a snippet in a detached interpreter
///
/// # Arguments
/// * `overrides` - Command-line configuration values
/// * `code` - The snippet
/// * `vars` - Environment variables for the interpreter
/// * `wait` - Wait for the interpreter and fail on a non-zero exit status
pub async fn execute_spawn(
    overrides: &Overrides,
    code: &str,
    vars: Variables,
    wait: bool,
) -> Result<()> {
    let config = load_config(overrides, true)?;
    let engine = ExecutionEngine::from_config(&config)?;

    match engine.run_detached(code, &vars, wait).await? {
        DetachedRun::Launched { token, pid } => {
            match pid {
                Some(pid) => println!("✓ Launched {} (pid {})", token, pid),
                None => println!("✓ Launched {}", token),
            }
            Ok(())
        }
        DetachedRun::Completed {
            token,
            exit_code: Some(0),
        } => {
            println!("✓ {} finished", token);
            Ok(())
        }
        DetachedRun::Completed {
            token,
            exit_code: Some(code),
        } => Err(anyhow!("{} exited with status {}", token, code)),
        DetachedRun::Completed {
            token,
            exit_code: None,
        } => Err(anyhow!("{} was terminated by a signal", token)),
    }
}

/// Run script files one after another in a single inline session
///
/// # Arguments
/// * `overrides` - Command-line configuration values
/// * `files` - Script files, `-` reads stdin
/// * `vars` - Values exposed to every script as `$_SANDBOX`
pub async fn execute_inline(overrides: &Overrides, files: &[PathBuf], vars: Variables) -> Result<()> {
    let config = load_config(overrides, true)?;
    let engine = ExecutionEngine::from_config(&config)?;

    for file in files {
        let code = read_source(Some(file), None).await?;
        let result = engine
            .run_inline(&code, &vars)
            .await
            .with_context(|| format!("{} failed", file.display()))?;
        print_output(&result.output)?;

        debug!(file = %file.display(), token = %result.token, "Inline script finished");
    }
    Ok(())
}

fn print_output(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
