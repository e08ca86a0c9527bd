//! The key-value store capability consumed by Hue.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::KeyPath;

/// Monotonic ordering token handed out by the store.
///
/// Every mutation bumps the store revision; a fetch reports the revision at
/// which its snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision {
    /// The revision following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Result of a fetch: the value (if any) and the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    /// Value of the key, or the object assembled from its descendants.
    pub value: Option<Value>,
    /// Revision at which the value was read.
    pub revision: Revision,
}

/// Options for a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Fail with [`StoreError::Collision`](crate::StoreError::Collision) if
    /// the key already holds a value.
    pub exclusive: bool,

    /// Remove the written key automatically once this key is removed.
    pub cascade: Option<KeyPath>,
}

impl WriteOptions {
    /// Plain overwrite.
    pub fn overwrite() -> Self {
        Self::default()
    }

    /// Compare-and-set: only write if the key is empty.
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            cascade: None,
        }
    }

    /// Tie the lifetime of the written key to `owner`.
    #[must_use]
    pub fn cascade(mut self, owner: KeyPath) -> Self {
        self.cascade = Some(owner);
        self
    }
}

/// Change notification emitted by stores that support subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A key was written.
    Written {
        key: KeyPath,
        value: Value,
        revision: Revision,
    },
    /// A key was removed, explicitly or by cascade.
    Removed { key: KeyPath, revision: Revision },
}

impl StoreEvent {
    /// The key this event concerns.
    pub fn key(&self) -> &KeyPath {
        match self {
            Self::Written { key, .. } | Self::Removed { key, .. } => key,
        }
    }
}

/// A shared key-value store.
///
/// The only atomicity the color protocol relies on is that an exclusive
/// write to a given key succeeds for exactly one caller.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key. Namespaces read back as an object of their children.
    async fn fetch(&self, key: &KeyPath) -> Result<Fetched>;

    /// Write a value, returning the revision of the write.
    async fn write(&self, key: &KeyPath, value: Value, options: WriteOptions) -> Result<Revision>;

    /// Remove a key and everything below it. Returns the removed value.
    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>>;
}
