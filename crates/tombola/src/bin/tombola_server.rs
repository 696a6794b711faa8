//! # TOMBOLA Server
//!
//! Headless game process. Loads configuration and the catalog, opens the
//! ledger, starts the session schedulers, and logs every session broadcast
//! until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! tombola_server [config.toml]
//! RUST_LOG=tombola=debug tombola_server
//! ```
//!
//! The config path falls back to `$TOMBOLA_CONFIG`, then `config/tombola.toml`.

use std::error::Error;
use std::path::PathBuf;

use tombola::session::{Resolution, SessionBroadcast};
use tombola::{GameConfig, GameCore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/tombola.toml";

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TOMBOLA_CONFIG").ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from)
}

fn log_broadcast(update: &SessionBroadcast) {
    match update {
        SessionBroadcast::Announced(a) => info!(
            session = %a.session,
            kind = %a.kind,
            theme = %a.theme,
            trigger = ?a.trigger,
            "session announced"
        ),
        SessionBroadcast::Progress(p) => info!(
            session = %p.session,
            participants = p.participants.len(),
            elapsed = p.elapsed_fraction,
            "session progress"
        ),
        SessionBroadcast::Resolved(outcome) => match &outcome.resolution {
            Resolution::NobodyCame => info!(session = %outcome.session, "session ended empty"),
            Resolution::Completed {
                reward,
                tier_label,
                used_fallback,
                payouts,
                narrative,
            } => info!(
                session = %outcome.session,
                reward,
                tier = tier_label,
                fallback = used_fallback,
                paid = payouts.len(),
                %narrative,
                "session resolved"
            ),
        },
        SessionBroadcast::Cancelled { session } => warn!(%session, "session cancelled"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("TOMBOLA server v{}", env!("CARGO_PKG_VERSION"));

    let path = config_path();
    let config = if path.exists() {
        GameConfig::load(&path)?
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        GameConfig::default()
    };

    let (core, updates) = GameCore::from_config(&config)?;
    core.hub().spawn_schedulers();
    info!(operators = config.operators.len(), "server ready, press Ctrl+C to stop");

    std::thread::Builder::new()
        .name("broadcast-relay".into())
        .spawn(move || {
            for update in &updates {
                log_broadcast(&update);
            }
        })?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    core.shutdown();
    Ok(())
}
