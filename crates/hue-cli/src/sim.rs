//! Participant simulation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hue_colors::{Allocator, Color, ColorConfig, ConfigError};
use hue_store::room::USERS_NAMESPACE;
use hue_store::{KeyPath, MemoryStore, ParticipantId, Room, StoreEvent};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Errors that end a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An allocator or store operation failed.
    #[error(transparent)]
    Color(#[from] hue_colors::Error),

    /// A store operation outside the allocator failed.
    #[error(transparent)]
    Store(#[from] hue_store::StoreError),

    /// A participant task panicked.
    #[error("participant task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Two participants ended up with the same palette color.
    #[error("color {color} assigned to both {first} and {second}")]
    Duplicate {
        color: Color,
        first: ParticipantId,
        second: ParticipantId,
    },

    /// An environment variable held an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Simulation settings.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of participants joining.
    pub participants: usize,
    /// Simulated store round trip.
    pub latency: Duration,
    /// Allocator configuration shared by every participant.
    pub colors: ColorConfig,
}

impl SimConfig {
    /// Read `HUE_PARTICIPANTS`, `HUE_LATENCY_MS` and the `HUE_*` color
    /// settings from the environment.
    pub fn from_env() -> Result<Self, SimError> {
        let participants = parse_env("HUE_PARTICIPANTS", 16)?;
        let latency_ms = parse_env("HUE_LATENCY_MS", 2)?;
        Ok(Self {
            participants,
            latency: Duration::from_millis(latency_ms),
            colors: ColorConfig::from_env()?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, SimError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| SimError::InvalidEnv { var, value }),
        Err(_) => Ok(default),
    }
}

/// One simulated participant.
struct Member {
    room: Room,
    allocator: Arc<Allocator>,
}

/// Outcome of a simulation run.
#[derive(Debug, Default)]
pub struct Report {
    /// Colors after everyone joined.
    pub initial: BTreeMap<ParticipantId, Color>,
    /// Participants that left.
    pub departed: Vec<ParticipantId>,
    /// Colors of the remaining participants after re-choosing.
    pub after: BTreeMap<ParticipantId, Color>,
    /// Color attribute changes seen on the store subscription.
    pub changes: Vec<(ParticipantId, Value)>,
}

impl Report {
    /// Participants that moved from the default color to a palette color.
    pub fn upgrades<'a>(&'a self, default: &'a Color) -> impl Iterator<Item = (&'a ParticipantId, &'a Color)> + 'a {
        self.after.iter().filter(move |(id, color)| {
            *color != default && self.initial.get(*id) == Some(default)
        })
    }
}

/// Fail if two participants hold the same non-default color.
pub fn check_unique(
    assignments: &BTreeMap<ParticipantId, Color>,
    default: &Color,
) -> Result<(), SimError> {
    let mut owners: BTreeMap<&Color, &ParticipantId> = BTreeMap::new();
    for (id, color) in assignments {
        if color == default {
            continue;
        }
        if let Some(first) = owners.insert(color, id) {
            return Err(SimError::Duplicate {
                color: color.clone(),
                first: first.clone(),
                second: id.clone(),
            });
        }
    }
    Ok(())
}

/// Run `choose` for every member concurrently.
async fn choose_all(members: &BTreeMap<ParticipantId, Member>) -> Result<BTreeMap<ParticipantId, Color>, SimError> {
    let mut tasks = JoinSet::new();
    for (id, member) in members {
        let id = id.clone();
        let allocator = member.allocator.clone();
        tasks.spawn(async move { (id, allocator.choose().await) });
    }

    let mut assignments = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (id, color) = joined?;
        assignments.insert(id, color?);
    }
    Ok(assignments)
}

/// Drain pending color attribute changes from a subscription.
fn color_changes(events: &mut broadcast::Receiver<StoreEvent>, attribute: &str) -> Vec<(ParticipantId, Value)> {
    let users = KeyPath::new(USERS_NAMESPACE);
    let mut changes = Vec::new();
    loop {
        match events.try_recv() {
            Ok(StoreEvent::Written { key, value, .. }) => {
                if key.last_segment() != Some(attribute) {
                    continue;
                }
                let Some(record) = key.parent() else { continue };
                if record.parent().as_ref() != Some(&users) {
                    continue;
                }
                if let Some(id) = record.last_segment() {
                    changes.push((ParticipantId::new(id), value));
                }
            }
            Ok(StoreEvent::Removed { .. }) => {}
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "missed store events");
            }
            Err(_) => break,
        }
    }
    changes
}

/// Join everyone, let half of the palette holders leave, and have the
/// participants stuck on the default color choose again.
pub async fn run(config: SimConfig) -> Result<Report, SimError> {
    let palette = config.colors.validate()?;
    let default = palette.default_color().clone();
    let store = Arc::new(MemoryStore::new().with_latency(config.latency));
    let mut events = store.subscribe();

    let mut members = BTreeMap::new();
    for n in 0..config.participants {
        let id = ParticipantId::new(format!("p{n:03}"));
        let room = Room::new(store.clone(), id.clone())?;
        room.join(&format!("Guest {n}")).await?;
        let allocator = Allocator::builder()
            .config(config.colors.clone())
            .room(room.clone())
            .build()?;
        members.insert(
            id,
            Member {
                room,
                allocator: Arc::new(allocator),
            },
        );
    }

    let mut report = Report {
        initial: choose_all(&members).await?,
        ..Report::default()
    };
    check_unique(&report.initial, &default)?;
    info!(
        participants = members.len(),
        palette = palette.len(),
        "initial assignment complete"
    );

    let holders: Vec<ParticipantId> = report
        .initial
        .iter()
        .filter(|(_, color)| **color != default)
        .map(|(id, _)| id.clone())
        .collect();
    for id in holders.iter().step_by(2) {
        if let Some(member) = members.remove(id) {
            member.room.leave().await?;
            report.departed.push(id.clone());
        }
    }

    report.after = choose_all(&members).await?;
    check_unique(&report.after, &default)?;
    report.changes = color_changes(&mut events, &config.colors.attribute);

    Ok(report)
}
