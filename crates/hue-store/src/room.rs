//! Participant records and the session they belong to.
//!
//! Each participant owns a record at `.users/<id>` in the shared store. The
//! record is a flat object of attributes; other keys (color locks, for
//! instance) can tie their lifetime to it with a cascade so that removing
//! the record on disconnect releases everything the participant held.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::store::{KeyValueStore, Revision, WriteOptions};
use crate::KeyPath;

/// Namespace holding participant records.
pub const USERS_NAMESPACE: &str = ".users";

/// Record attribute holding the participant id.
pub const ID_ATTRIBUTE: &str = "id";

/// Record attribute holding the display name.
pub const DISPLAY_NAME_ATTRIBUTE: &str = "displayName";

/// Durable participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of this participant's record.
    pub fn record_key(&self) -> KeyPath {
        KeyPath::new(USERS_NAMESPACE).join(&self.0)
    }

    /// Check that the id names a record of its own.
    ///
    /// An empty id would address the whole namespace, and an id containing
    /// the key separator would nest inside another participant's record.
    pub fn check(&self) -> Result<()> {
        let reason = if self.0.trim().is_empty() {
            "participant id must not be empty"
        } else if self.0.contains(KeyPath::SEPARATOR) {
            "participant id must not contain '/'"
        } else {
            return Ok(());
        };
        Err(StoreError::InvalidKey {
            key: self.record_key(),
            reason: reason.to_string(),
        })
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Snapshot of a participant record.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRecord {
    /// The participant.
    pub id: ParticipantId,
    /// Record attributes.
    pub attributes: Map<String, Value>,
}

impl ParticipantRecord {
    /// Build a record from a fetched value.
    pub fn from_value(id: ParticipantId, value: Option<Value>) -> Result<Self> {
        match value {
            Some(Value::Object(attributes)) => Ok(Self { id, attributes }),
            Some(other) => Err(StoreError::InvalidValue {
                key: id.record_key(),
                reason: format!("expected an object, found {other}"),
            }),
            None => Err(StoreError::NotFound {
                key: id.record_key(),
            }),
        }
    }

    /// Get an attribute.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Get a string attribute. Null and non-string values read as absent.
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(Value::as_str)
    }
}

/// Write access to one participant record.
#[derive(Clone)]
pub struct ParticipantHandle {
    key: KeyPath,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ParticipantHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantHandle").field("key", &self.key).finish()
    }
}

impl ParticipantHandle {
    /// Create a handle for the record at `key`.
    pub fn new(key: KeyPath, store: Arc<dyn KeyValueStore>) -> Self {
        Self { key, store }
    }

    /// Key of the record.
    pub fn key(&self) -> &KeyPath {
        &self.key
    }

    /// Overwrite one attribute of the record.
    pub async fn write_attribute(&self, name: &str, value: Value) -> Result<Revision> {
        self.store
            .write(&self.key.join(name), value, WriteOptions::overwrite())
            .await
    }
}

/// Identity of the local participant within a shared session.
#[async_trait]
pub trait Session: Send + Sync {
    /// The local participant.
    fn participant_id(&self) -> &ParticipantId;

    /// Fetch the up-to-date local record and a handle to write it.
    async fn fetch_participant(&self) -> Result<(ParticipantRecord, ParticipantHandle)>;
}

/// A participant's membership in a session backed by a shared store.
#[derive(Clone)]
pub struct Room {
    store: Arc<dyn KeyValueStore>,
    participant: ParticipantId,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("participant", &self.participant)
            .finish()
    }
}

impl Room {
    /// Bind a participant to a store.
    ///
    /// Fails with [`StoreError::InvalidKey`] if the id cannot name a record.
    pub fn new(store: Arc<dyn KeyValueStore>, participant: ParticipantId) -> Result<Self> {
        participant.check()?;
        Ok(Self { store, participant })
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Key of the local participant record.
    pub fn record_key(&self) -> KeyPath {
        self.participant.record_key()
    }

    /// Create the local participant record.
    pub async fn join(&self, display_name: &str) -> Result<ParticipantRecord> {
        let mut attributes = Map::new();
        attributes.insert(ID_ATTRIBUTE.into(), Value::String(self.participant.to_string()));
        attributes.insert(
            DISPLAY_NAME_ATTRIBUTE.into(),
            Value::String(display_name.to_string()),
        );

        self.store
            .write(
                &self.record_key(),
                Value::Object(attributes.clone()),
                WriteOptions::overwrite(),
            )
            .await?;
        info!(participant = %self.participant, display_name, "joined");

        Ok(ParticipantRecord {
            id: self.participant.clone(),
            attributes,
        })
    }

    /// Remove the local participant record, releasing everything tied to it.
    pub async fn leave(&self) -> Result<()> {
        self.store.remove(&self.record_key()).await?;
        info!(participant = %self.participant, "left");
        Ok(())
    }
}

#[async_trait]
impl Session for Room {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant
    }

    async fn fetch_participant(&self) -> Result<(ParticipantRecord, ParticipantHandle)> {
        let key = self.record_key();
        let fetched = self.store.fetch(&key).await?;
        debug!(participant = %self.participant, revision = %fetched.revision, "fetched record");
        let record = ParticipantRecord::from_value(self.participant.clone(), fetched.value)?;
        Ok((record, ParticipantHandle::new(key, self.store.clone())))
    }
}
