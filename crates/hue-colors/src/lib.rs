//! Hue Colors - exclusive participant colors over a shared store
//!
//! Every participant in a shared session gets a display color from a finite
//! palette. The only coordination medium is the shared key-value store:
//! a participant owns a color by holding the lock slot `hue/locks/<token>`,
//! taken with an exclusive write and tied to the participant record so that
//! it disappears when the participant leaves.
//!
//! # Overview
//!
//! - [`Allocator`] reconciles the participant's color attribute with the
//!   lock table, repairing whichever side is out of date.
//! - [`LockSearch`] races other participants for a free palette color,
//!   moving on after each collision and re-reading the lock table when the
//!   whole snapshot turned out to be stale.
//! - When every palette color is locked the participant gets the shared
//!   [`DEFAULT_COLOR`], which nobody holds exclusively.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hue_colors::{Allocator, ColorConfig};
//! use hue_store::{MemoryStore, ParticipantId, Room};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let room = Room::new(store, ParticipantId::new("1234"))?;
//! room.join("Guest").await?;
//!
//! let allocator = Allocator::builder()
//!     .config(ColorConfig::default())
//!     .room(room)
//!     .build()?;
//! let color = allocator.choose().await?;
//! println!("assigned {color}");
//! # Ok(())
//! # }
//! ```

mod allocator;
mod color;
mod config;
mod error;
mod locks;
mod search;

pub use allocator::{Allocator, AllocatorBuilder, Attempt, Decision};
pub use color::{Color, Palette, DECORATIVE_PREFIX, DEFAULT_COLOR, DEFAULT_COLORS};
pub use config::{ColorConfig, DEFAULT_MAX_REFETCHES, KEY_NAMESPACE, USER_PROPERTY};
pub use error::{ConfigError, Error, Result};
pub use locks::LockTable;
pub use search::LockSearch;
