//! PHP sandbox - run snippets and get typed diagnostics back
//!
//! A snippet is prepared into a runnable unit, written to a token-named
//! artifact in the sandbox directory and executed inline, in a child process
//! the caller waits for, or in a detached child. Whatever the interpreter
//! logs is classified into a [`SandboxError`] instead of being left as text.
//! Artifacts never outlive the call that created them.

mod capture;
mod classify;
mod engine;
mod error;
mod inline;
mod prepare;
mod store;
mod token;
mod types;

pub use capture::{CaptureScope, OutputBuffer};
pub use classify::{ClassifierRule, DiagnosticRecord, LogClassifier, PatternClassifier, Severity};
pub use engine::{EngineConfig, ExecutionEngine};
pub use error::SandboxError;
pub use inline::{InlineFault, InlineHost, PhpSession};
pub use prepare::{
    prepare, PrepareOptions, PreparedUnit, DIAGNOSTICS_DIRECTIVE, END_MARKER,
    SELF_DESTRUCT_DIRECTIVE, START_MARKER,
};
pub use store::{ArtifactGuard, ArtifactStore, CODE_EXTENSION, LOG_EXTENSION, SANDBOX_DIR_NAME};
pub use token::Token;
pub use types::{DetachedRun, ExecutionResult, Strategy, Variables};

/// Result type used throughout the sandbox
pub type Result<T> = std::result::Result<T, SandboxError>;
