//! Shared helpers for Hue end-to-end tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use hue_colors::{Allocator, Color, ColorConfig};
use hue_store::{MemoryStore, ParticipantId, Room};

/// A participant that has joined a shared store.
pub struct Participant {
    pub id: ParticipantId,
    pub room: Room,
    pub allocator: Arc<Allocator>,
}

/// Join `id` to `store` and build its allocator.
pub async fn join(store: &Arc<MemoryStore>, id: &str, config: &ColorConfig) -> Participant {
    let id = ParticipantId::new(id);
    let room = Room::new(store.clone(), id.clone()).expect("valid participant id");
    room.join(id.as_str()).await.expect("join room");
    let allocator = Allocator::builder()
        .config(config.clone())
        .room(room.clone())
        .build()
        .expect("valid config");
    Participant {
        id,
        room,
        allocator: Arc::new(allocator),
    }
}

/// Run `choose` for every participant on its own task.
pub async fn choose_concurrently(participants: &[Participant]) -> BTreeMap<ParticipantId, Color> {
    let mut tasks = Vec::new();
    for p in participants {
        let id = p.id.clone();
        let allocator = p.allocator.clone();
        tasks.push(tokio::spawn(async move {
            (id, allocator.choose().await.expect("choose"))
        }));
    }

    let mut assignments = BTreeMap::new();
    for task in tasks {
        let (id, color) = task.await.expect("task");
        assignments.insert(id, color);
    }
    assignments
}

/// Palette colors in `assignments`, with owners, panicking on duplicates.
pub fn assert_unique(assignments: &BTreeMap<ParticipantId, Color>, default: &Color) -> BTreeMap<Color, ParticipantId> {
    let mut owners = BTreeMap::new();
    for (id, color) in assignments {
        if color == default {
            continue;
        }
        if let Some(previous) = owners.insert(color.clone(), id.clone()) {
            panic!("{color} assigned to both {previous} and {id}");
        }
    }
    owners
}
