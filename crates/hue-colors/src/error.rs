//! Error types for hue-colors.

use hue_store::StoreError;
use thiserror::Error;

/// Result type for color allocation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the allocator.
#[derive(Debug, Error)]
pub enum Error {
    /// The allocator was configured incorrectly.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A store operation failed. Collisions never surface here.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Invalid configuration, detected when an allocator is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The palette has no colors.
    #[error("palette must contain at least one color")]
    EmptyPalette,

    /// A color token cannot be stored as a lock key.
    #[error("invalid color {color:?}: {reason}")]
    InvalidColor { color: String, reason: &'static str },

    /// Two palette colors map to the same lock key.
    #[error("duplicate color {color:?} in palette")]
    DuplicateColor { color: String },

    /// The default color is also a palette member.
    #[error("default color {color:?} must not be part of the palette")]
    DefaultInPalette { color: String },

    /// The color attribute name is empty.
    #[error("color attribute name must not be empty")]
    EmptyAttribute,

    /// The lock namespace is empty.
    #[error("lock namespace must not be empty")]
    EmptyNamespace,

    /// The re-fetch bound leaves no room to re-check a stale lock table.
    #[error("max_refetches must be at least 1")]
    ZeroRefetches,

    /// No store was supplied.
    #[error("no store was supplied")]
    MissingStore,

    /// No session was supplied.
    #[error("no session was supplied")]
    MissingSession,

    /// An environment variable held an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    /// A configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
