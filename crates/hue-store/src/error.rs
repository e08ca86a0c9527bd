//! Error types for hue-store.

use thiserror::Error;

use crate::KeyPath;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An exclusive write found the key already occupied.
    ///
    /// This is the expected outcome of losing a race and callers usually
    /// recover from it.
    #[error("collision: {key} already holds a value")]
    Collision { key: KeyPath },

    /// A key that must exist holds no value.
    #[error("not found: {key}")]
    NotFound { key: KeyPath },

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The caller is not allowed to perform the operation.
    #[error("permission denied on {key}")]
    PermissionDenied { key: KeyPath },

    /// A stored value did not have the expected shape.
    #[error("invalid value at {key}: {reason}")]
    InvalidValue { key: KeyPath, reason: String },

    /// The operation targeted a key that cannot be written.
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: KeyPath, reason: String },
}

impl StoreError {
    /// True for the recoverable "slot taken" outcome of an exclusive write.
    pub fn is_collision(&self) -> bool {
        matches!(self, StoreError::Collision { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_is_distinct() {
        let key = KeyPath::new("hue/locks/ff0000");
        assert!(StoreError::Collision { key: key.clone() }.is_collision());
        assert!(!StoreError::Unavailable("down".into()).is_collision());
        assert!(!StoreError::PermissionDenied { key }.is_collision());
    }

    #[test]
    fn messages_name_the_key() {
        let err = StoreError::Collision {
            key: KeyPath::new("hue/locks/ff0000"),
        };
        assert_eq!(err.to_string(), "collision: /hue/locks/ff0000 already holds a value");
    }
}
