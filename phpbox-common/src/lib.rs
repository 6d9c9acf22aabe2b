//! Shared building blocks for phpbox crates.
//!
//! Holds the configuration model consumed by the sandbox engine and the CLI.

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
