#![forbid(unsafe_code)]

//! Command-line and environment configuration for the gateway.
//!
//! [`Cli`] is the raw clap surface; [`Settings`] is the validated model the
//! rest of the workspace consumes. Optional capabilities (snapshot, vault,
//! stat gRPC) are represented as `Option`s, never as no-op placeholders.

pub mod cli;
pub mod error;
pub mod model;

pub use cli::Cli;
pub use error::ConfigError;
pub use model::{
    ListenSettings, MetainfoSettings, S3Settings, Settings, SnapshotSettings, StorageSettings,
    VaultSettings, parse_size,
};
