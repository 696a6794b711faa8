//! # TOMBOLA Economy System
//!
//! Catalog, weighted draws and the participant ledger for the TOMBOLA
//! collectible game.
//!
//! ## Design Principles
//!
//! 1. **Integer currency** - Balances are `u64` and can never go negative
//! 2. **Rules in data** - Pools, tiers and items come from a TOML catalog
//! 3. **All-or-nothing writes** - Every ledger operation commits fully or not at all
//! 4. **Rejections are values** - Expected refusals are named error variants
//!
//! ## Thread Safety
//!
//! [`Ledger`] and [`DrawEngine`] are `Send + Sync` and meant to be shared behind
//! an `Arc`. Ledger operations on one participant are serialized; different
//! participants never contend.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tombola_economy::{Catalog, DrawEngine, FileStore, Ledger, LedgerConfig, ParticipantId};
//!
//! let catalog = Arc::new(Catalog::load("config/catalog.toml")?);
//! let engine = DrawEngine::new(catalog);
//! let ledger = Ledger::new(Arc::new(FileStore::open("data/ledger")?), LedgerConfig::default())?;
//!
//! let outcome = engine.draw(1)?;
//! if ledger.claim_daily_draw(ParticipantId(42), &outcome)? {
//!     println!("drew {:?}", outcome.items);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod catalog;
pub mod clock;
pub mod draw;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod record;
pub mod store;

pub use catalog::{Catalog, CatalogItem, ItemId, PoolConfig, PoolId, PoolTable, Rarity, TierConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use draw::{DrawEngine, DrawOutcome, DrawStatistics};
pub use error::{
    CatalogError, DrawError, DrawResult, LedgerError, LedgerResult, StoreError, StoreResult,
};
pub use fingerprint::MessageSample;
pub use ledger::{Ledger, LedgerConfig, MessageReward};
pub use record::{ParticipantId, ParticipantRecord};
pub use store::{FileStore, MemoryStore, RecordStore};
