//! Color allocator for the local participant.
//!
//! # Protocol
//!
//! 1. Fetch the participant record and the lock table concurrently.
//! 2. If the participant's color attribute matches a palette color locked
//!    to it, there is nothing to do.
//! 3. If a palette color is locked to it but the attribute disagrees, copy
//!    the locked color into the attribute.
//! 4. Otherwise drop any lock on a color that left the palette, run a
//!    [`LockSearch`], and store the result in the attribute.
//!
//! All per-call state lives in an [`Attempt`]; the allocator itself is
//! immutable after construction.

use std::sync::Arc;

use hue_store::{
    KeyPath, KeyValueStore, ParticipantHandle, ParticipantRecord, Room, Session, StoreError,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::color::{Color, Palette};
use crate::config::ColorConfig;
use crate::error::{ConfigError, Result};
use crate::locks::LockTable;
use crate::search::LockSearch;

/// What a `choose` call has to do, given the fetched state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The attribute already names a color locked to the participant.
    Keep(Color),
    /// A color is locked to the participant but the attribute is stale.
    Persist(Color),
    /// No valid lock exists. `stale` is a lock held on a color that is no
    /// longer in the palette and must be released first.
    Acquire { stale: Option<Color> },
}

/// State gathered at the start of one `choose` or `release` call.
#[derive(Debug)]
pub struct Attempt {
    /// The participant record as fetched.
    pub record: ParticipantRecord,
    /// Write access to the record.
    pub handle: ParticipantHandle,
    /// The lock table as fetched.
    pub locks: LockTable,
}

impl Attempt {
    /// The color stored in `attribute`, if it is a string.
    pub fn assigned(&self, attribute: &str) -> Option<Color> {
        self.record.attribute_str(attribute).map(Color::new)
    }

    /// Classify the fetched state.
    pub fn decide(&self, palette: &Palette, attribute: &str) -> Decision {
        let locked = self.locks.color_held_by(&self.record.id, palette);
        let assigned = self.assigned(attribute);

        match locked {
            Some(color) if palette.contains(&color) && assigned.as_ref() == Some(&color) => {
                Decision::Keep(color)
            }
            Some(color) if palette.contains(&color) => Decision::Persist(color),
            stale => Decision::Acquire { stale },
        }
    }
}

/// Builder for [`Allocator`].
#[derive(Default)]
pub struct AllocatorBuilder {
    config: ColorConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    session: Option<Arc<dyn Session>>,
}

impl AllocatorBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: ColorConfig) -> Self {
        self.config = config;
        self
    }

    /// The store holding the lock table.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The session identifying the local participant.
    #[must_use]
    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Use a room as both store and session.
    #[must_use]
    pub fn room(self, room: Room) -> Self {
        let store = room.store().clone();
        self.store(store).session(Arc::new(room))
    }

    /// Validate the configuration and build the allocator.
    pub fn build(self) -> std::result::Result<Allocator, ConfigError> {
        let palette = self.config.validate()?;
        let store = self.store.ok_or(ConfigError::MissingStore)?;
        let session = self.session.ok_or(ConfigError::MissingSession)?;
        Ok(Allocator {
            palette,
            namespace: KeyPath::new(&self.config.namespace),
            attribute: self.config.attribute,
            max_refetches: self.config.max_refetches,
            store,
            session,
        })
    }
}

/// Assigns the local participant an exclusive palette color.
///
/// `choose` is not reentrant: calls on one allocator must not overlap.
/// Allocators for different participants may run concurrently against the
/// same store.
pub struct Allocator {
    palette: Palette,
    namespace: KeyPath,
    attribute: String,
    max_refetches: u32,
    store: Arc<dyn KeyValueStore>,
    session: Arc<dyn Session>,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("participant", self.session.participant_id())
            .field("palette", &self.palette)
            .field("namespace", &self.namespace)
            .field("attribute", &self.attribute)
            .field("max_refetches", &self.max_refetches)
            .finish()
    }
}

impl Allocator {
    /// Start building an allocator.
    pub fn builder() -> AllocatorBuilder {
        AllocatorBuilder::default()
    }

    /// The configured palette.
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Key of the lock slot for `color`.
    pub fn lock_key(&self, color: &Color) -> KeyPath {
        self.namespace.join(color.storage_token())
    }

    /// Fetch the participant record and lock table concurrently.
    pub async fn begin(&self) -> std::result::Result<Attempt, StoreError> {
        let ((record, handle), locks) = tokio::try_join!(
            self.session.fetch_participant(),
            LockTable::fetch(&*self.store, &self.namespace),
        )?;
        Ok(Attempt {
            record,
            handle,
            locks,
        })
    }

    /// Choose a color for the local participant.
    ///
    /// Idempotent while the participant holds a valid lock. When the last
    /// result was the default color a palette color that has since been freed
    /// may be returned instead.
    #[instrument(skip(self), fields(participant = %self.session.participant_id()))]
    pub async fn choose(&self) -> Result<Color> {
        let attempt = self.begin().await?;

        match attempt.decide(&self.palette, &self.attribute) {
            Decision::Keep(color) => {
                debug!(%color, "color already assigned");
                Ok(color)
            }
            Decision::Persist(color) => {
                debug!(%color, "lock held, repairing participant record");
                self.persist(&attempt.handle, color).await
            }
            Decision::Acquire { stale } => {
                if let Some(stale) = stale {
                    warn!(color = %stale, "releasing lock on color outside the palette");
                    self.store.remove(&self.lock_key(&stale)).await?;
                }
                let color = LockSearch::new(
                    &*self.store,
                    &self.palette,
                    &self.namespace,
                    &attempt.record.id,
                    attempt.handle.key(),
                    attempt.locks,
                )
                .max_refetches(self.max_refetches)
                .acquire()
                .await?;
                self.persist(&attempt.handle, color).await
            }
        }
    }

    /// Drop every lock held by the local participant and clear its color.
    ///
    /// Returns the palette color that was released, if any.
    #[instrument(skip(self), fields(participant = %self.session.participant_id()))]
    pub async fn release(&self) -> Result<Option<Color>> {
        let attempt = self.begin().await?;
        let released = attempt.locks.color_held_by(&attempt.record.id, &self.palette);

        for token in attempt.locks.tokens_held_by(&attempt.record.id) {
            self.store.remove(&self.namespace.join(token)).await?;
        }
        attempt
            .handle
            .write_attribute(&self.attribute, Value::Null)
            .await?;

        info!(color = ?released, "released color");
        Ok(released.filter(|color| self.palette.contains(color)))
    }

    async fn persist(&self, handle: &ParticipantHandle, color: Color) -> Result<Color> {
        handle
            .write_attribute(&self.attribute, Value::String(color.to_string()))
            .await?;
        info!(%color, "assigned color");
        Ok(color)
    }
}
