//! # TOMBOLA Sessions
//!
//! Timed cooperative events ("raids" and "expeditions") for the TOMBOLA game.
//!
//! ## Design Principles
//!
//! 1. **One at a time** - A single [`SessionHub`] owns the only session slot
//! 2. **Owned timers** - Resolution and progress timers are cancellable handles
//! 3. **Parse or fall back** - The narrative service can fail in any way; payouts still happen
//!
//! ## Example
//!
//! ```rust,ignore
//! let (broadcaster, updates) = Broadcaster::channel(config.broadcast_capacity);
//! let hub = SessionHub::new(config, ledger, catalog, narrator, broadcaster)?;
//! hub.spawn_schedulers();
//!
//! hub.start(SessionKind::Raid, Trigger::Operator)?;
//! hub.join(ParticipantId(42)).await?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod broadcast;
pub mod config;
pub mod error;
pub mod hub;
pub mod narrative;

pub use broadcast::{
    reward_tier_label, Broadcaster, Payout, ProgressSnapshot, Resolution, SessionAnnouncement,
    SessionBroadcast, SessionId, SessionOutcome, Trigger,
};
pub use config::{KindConfig, SessionConfig, SessionKind, Theme};
pub use error::{NarrativeError, SessionError, SessionResult};
pub use hub::{JoinOutcome, SessionHub, SessionPhase, SessionStatus};
pub use narrative::{
    build_prompt, fallback_narrative, parse_verdict, HttpNarrator, NarrativeService,
    NarratorConfig, Verdict, VerdictLimits,
};
