//! A3S Pack Core - Foundational Types and Abstractions
//!
//! This crate provides the error type, the operator configuration and the
//! builder configuration shared by the A3S Pack runtime and CLI.

pub mod builder_config;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use builder_config::{
    BuilderConfig, BuildpackRef, GroupBuildpack, LifecycleConfig, OrderEntry, StackConfig,
};
pub use config::{LogLevel, PackConfig, RunImageConfig};
pub use error::{ErrorKind, PackError, Result, ResultExt};

/// A3S Pack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
