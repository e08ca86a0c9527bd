//! hue-sim binary
//!
//! Simulates participants joining a shared session, racing for palette
//! colors, leaving, and the remaining participants picking up the freed
//! colors.
//!
//! Environment:
//!   HUE_PARTICIPANTS   Number of participants (default: 16)
//!   HUE_LATENCY_MS     Simulated store round trip (default: 2)
//!   HUE_PALETTE        Comma separated palette (default: built-in)
//!   HUE_DEFAULT_COLOR  Fallback color (default: #cccccc)
//!   HUE_MAX_REFETCHES  Lock table re-fetch bound (default: 8)

mod sim;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::sim::{run, SimConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hue_sim=info,hue_colors=info,hue_store=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimConfig::from_env()?;
    tracing::info!(
        participants = config.participants,
        latency = ?config.latency,
        "Starting simulation"
    );

    let default = hue_colors::Color::new(config.colors.default_color.as_str());
    let report = run(config).await?;

    println!("Initial assignment:");
    for (id, color) in &report.initial {
        println!("  {id:<8} {color}");
    }

    println!();
    println!("Departed: {}", report.departed.len());
    for id in &report.departed {
        println!("  {id}");
    }

    println!();
    println!("After re-choosing:");
    for (id, color) in &report.after {
        println!("  {id:<8} {color}");
    }

    println!();
    println!("Upgraded from {default}:");
    for (id, color) in report.upgrades(&default) {
        println!("  {id:<8} {color}");
    }

    println!();
    println!("Color changes observed: {}", report.changes.len());

    Ok(())
}
