//! Hue Shared Store
//!
//! The coordination medium for Hue: a hierarchical key-value store whose
//! only atomic primitive is the exclusive write (compare-and-set on an empty
//! key).
//!
//! # Design
//!
//! Keys are slash-separated [`KeyPath`]s. Reading a key that has children
//! returns an object assembled from them, so a namespace such as
//! `hue/locks` reads back as a `{token: holder}` map.
//!
//! # Cascade Deletion
//!
//! A write may name another key as its cascade target. Removing the target
//! removes the written key as well. Participant records live at
//! `.users/<id>` and are removed when the participant leaves, which is how
//! locks held by a participant are released without explicit teardown.

mod error;
mod key;
mod memory;
pub mod room;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
mod store;

pub use error::{Result, StoreError};
pub use key::KeyPath;
pub use memory::{Entry, MemoryState, MemoryStore};
pub use room::{ParticipantHandle, ParticipantId, ParticipantRecord, Room, Session};
pub use store::{Fetched, KeyValueStore, Revision, StoreEvent, WriteOptions};
