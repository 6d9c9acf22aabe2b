//! Configuration management for phpbox

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `php_settings.binary`
pub const ENV_PHP_BINARY: &str = "PHPBOX_PHP_BINARY";

/// Environment variable overriding `sandbox.cache_dir`
pub const ENV_CACHE_DIR: &str = "PHPBOX_CACHE_DIR";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Interpreter settings
    #[serde(default)]
    pub php_settings: PhpSettings,
    /// Sandbox directory settings
    #[serde(default)]
    pub sandbox: SandboxSettings,
}

/// Interpreter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhpSettings {
    /// Path to the PHP CLI binary. Required, must not be empty.
    #[serde(default)]
    pub binary: String,
    /// Whether spawned interpreters inherit the parent environment before
    /// the caller's variables are applied
    #[serde(default = "PhpSettings::default_inherit_environment")]
    pub inherit_environment: bool,
}

impl Default for PhpSettings {
    fn default() -> Self {
        Self {
            binary: String::new(),
            inherit_environment: Self::default_inherit_environment(),
        }
    }
}

impl PhpSettings {
    fn default_inherit_environment() -> bool {
        true
    }
}

/// Sandbox directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Cache root; the sandbox directory lives underneath it
    #[serde(default = "SandboxSettings::default_cache_dir")]
    pub cache_dir: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
        }
    }
}

impl SandboxSettings {
    fn default_cache_dir() -> String {
        "~/.cache/phpbox".to_string()
    }
}

impl AppConfig {
    /// Read a config file (or defaults when it is missing) and apply
    /// environment overrides, leaving validation to the caller.
    ///
    /// A missing file is not an error: defaults are used and the binary must
    /// then come from `PHPBOX_PHP_BINARY` or the command line.
    pub fn read_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            Self::read_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn read_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse configuration from TOML text without validating it
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply overrides from a variable lookup (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(binary) = lookup(ENV_PHP_BINARY).filter(|v| !v.trim().is_empty()) {
            self.php_settings.binary = binary;
        }
        if let Some(cache_dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.sandbox.cache_dir = cache_dir;
        }
    }

    /// Check required values. The binary is not checked for existence; that
    /// surfaces when the interpreter is spawned.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.php_settings.binary.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "php_settings.binary is required and cannot be empty (set it in the config file or via {})",
                ENV_PHP_BINARY
            )));
        }
        if self.sandbox.cache_dir.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sandbox.cache_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".config").join("phpbox").join("config.toml"))
    }

    /// Get the expanded cache root
    pub fn cache_dir(&self) -> ConfigResult<PathBuf> {
        expand_path(&self.sandbox.cache_dir)
    }

    /// Get the interpreter binary
    pub fn php_binary(&self) -> &str {
        self.php_settings.binary.trim()
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &str) -> ConfigResult<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(rest))
    } else if path == "~" {
        dirs::home_dir().ok_or(ConfigError::NoHomeDir)
    } else {
        Ok(PathBuf::from(path))
    }
}
