//! # TOMBOLA
//!
//! **Collectible draws, a persistent ledger and cooperative chat events.**
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CHAT GATEWAY (external)                   │
//! │        parses commands, renders reports, relays broadcasts       │
//! └───────────────┬──────────────────────────────────▲───────────────┘
//!                 │ commands                         │ SessionBroadcast
//! ┌───────────────▼──────────────────────────────────┴───────────────┐
//! │                            GameCore                              │
//! ├──────────────────────┬──────────────────────┬────────────────────┤
//! │     DrawEngine       │       Ledger         │     SessionHub     │
//! │  tier roll, guarantee│  per-participant     │  one session slot  │
//! │  jackpot, seeded RNG │  atomic read-modify- │  timers, narrative │
//! │                      │  write               │  verdict, payouts  │
//! ├──────────────────────┴──────────┬───────────┴────────────────────┤
//! │            Catalog              │          RecordStore           │
//! │   pools, tiers, items (TOML)    │  framed + CRC32 record files   │
//! └─────────────────────────────────┴────────────────────────────────┘
//! ```
//!
//! ## Crates
//!
//! - [`economy`]: catalog, draw engine, ledger and storage
//! - [`session`]: raids, expeditions and the narrative service
//! - this crate: configuration, the command facade and the server binary

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod commands;
pub mod config;
pub mod error;

pub use tombola_economy as economy;
pub use tombola_session as session;

pub use commands::{
    DrawReport, DrawnItem, GameCore, InventoryLine, InventoryView, MessageReport, PackLine,
};
pub use config::{GameConfig, LedgerSection, RewardsConfig};
pub use error::{CommandError, CommandResult, ConfigError, StartupError};
