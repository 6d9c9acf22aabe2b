//! Error taxonomy for sandbox executions

use crate::classify::{DiagnosticRecord, Severity};
use crate::inline::InlineFault;
use std::path::PathBuf;
use thiserror::Error;

/// Everything a sandbox call can fail with.
///
/// The four diagnostic variants come from the interpreter's own log and are
/// only produced by out-of-process strategies. Inline faults are re-raised
/// as-is because inline code shares the caller's fault channel.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("PHP notice: {}", .0.message)]
    Notice(DiagnosticRecord),

    #[error("PHP warning: {}", .0.message)]
    Warning(DiagnosticRecord),

    #[error("PHP parse error: {}", .0.message)]
    ParseError(DiagnosticRecord),

    #[error("PHP fatal error: {}", .0.message)]
    FatalError(DiagnosticRecord),

    #[error("Unable to create the sandbox directory {}: {source}", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not fork '{binary}': {source}")]
    ForkFailure {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Inline execution failed: {0}")]
    Inline(#[from] InlineFault),
}

impl SandboxError {
    /// The classified diagnostic behind this error, if any
    pub fn diagnostic(&self) -> Option<&DiagnosticRecord> {
        match self {
            SandboxError::Notice(record)
            | SandboxError::Warning(record)
            | SandboxError::ParseError(record)
            | SandboxError::FatalError(record) => Some(record),
            _ => None,
        }
    }

    /// Severity of the diagnostic behind this error, if any
    pub fn severity(&self) -> Option<Severity> {
        self.diagnostic().map(|record| record.severity)
    }

    /// Whether this error was produced by log classification
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic().is_some()
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SandboxError::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<DiagnosticRecord> for SandboxError {
    fn from(record: DiagnosticRecord) -> Self {
        match record.severity {
            Severity::Notice => SandboxError::Notice(record),
            Severity::Warning => SandboxError::Warning(record),
            Severity::Fatal => SandboxError::FatalError(record),
            Severity::Parse => SandboxError::ParseError(record),
        }
    }
}
