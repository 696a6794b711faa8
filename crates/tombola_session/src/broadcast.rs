//! # Session Broadcasts
//!
//! Everything the UI layer renders about sessions goes through a bounded
//! crossbeam channel. Publishing never blocks: when the consumer falls behind,
//! the broadcast is dropped and counted.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tombola_economy::{ItemId, ParticipantId};

use crate::config::SessionKind;

/// Monotonic session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What started a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Random roll on a community message.
    Message,
    /// Privileged force start.
    Operator,
    /// Per-kind scheduler.
    Schedule,
}

/// Published when a session opens.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionAnnouncement {
    /// Session id.
    pub session: SessionId,
    /// Event kind.
    pub kind: SessionKind,
    /// Chosen theme name.
    pub theme: String,
    /// What started it.
    pub trigger: Trigger,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End of the join window.
    pub ends_at: DateTime<Utc>,
}

/// Periodic snapshot while the join window is open.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    /// Session id.
    pub session: SessionId,
    /// Event kind.
    pub kind: SessionKind,
    /// Participants so far.
    pub participants: Vec<ParticipantId>,
    /// Fraction of the join window elapsed, in [0, 1].
    pub elapsed_fraction: f64,
}

/// One participant's payout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    /// Recipient.
    pub participant: ParticipantId,
    /// Whether the currency credit was committed.
    pub credited: bool,
    /// Raid reward item, when granted.
    pub item_granted: Option<ItemId>,
}

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Nobody joined; no rewards.
    NobodyCame,
    /// Rewards were paid out.
    Completed {
        /// Narrative text shown to participants.
        narrative: String,
        /// Currency per participant.
        reward: u64,
        /// Label from [`reward_tier_label`].
        tier_label: &'static str,
        /// True when the narrative service failed and the local fallback was used.
        used_fallback: bool,
        /// Per-participant results.
        payouts: Vec<Payout>,
    },
}

/// Published when a session resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Session id.
    pub session: SessionId,
    /// Event kind.
    pub kind: SessionKind,
    /// Theme name.
    pub theme: String,
    /// Result.
    pub resolution: Resolution,
}

/// Everything the hub publishes.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionBroadcast {
    /// A session opened.
    Announced(SessionAnnouncement),
    /// Join-window progress.
    Progress(ProgressSnapshot),
    /// A session resolved.
    Resolved(SessionOutcome),
    /// A session was torn down without resolving.
    Cancelled {
        /// The cancelled session.
        session: SessionId,
    },
}

/// Qualitative label for a reward magnitude.
///
/// ```text
/// [0, 100)   Rout
/// [100, 300) Skirmish
/// [300, 600) Victory
/// [600, 900) Triumph
/// [900, ..)  Legend
/// ```
#[must_use]
pub const fn reward_tier_label(magnitude: u64) -> &'static str {
    match magnitude {
        0..=99 => "Rout",
        100..=299 => "Skirmish",
        300..=599 => "Victory",
        600..=899 => "Triumph",
        _ => "Legend",
    }
}

/// Non-blocking publisher side of the broadcast channel.
#[derive(Clone, Debug)]
pub struct Broadcaster {
    tx: Sender<SessionBroadcast>,
    dropped: Arc<AtomicU64>,
}

impl Broadcaster {
    /// Creates a bounded channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<SessionBroadcast>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Publishes without blocking. Full or disconnected channels drop the message.
    pub fn publish(&self, broadcast: SessionBroadcast) {
        match self.tx.try_send(broadcast) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("session broadcast channel full, dropping");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Broadcasts dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_label_boundaries() {
        assert_eq!(reward_tier_label(0), "Rout");
        assert_eq!(reward_tier_label(99), "Rout");
        assert_eq!(reward_tier_label(100), "Skirmish");
        assert_eq!(reward_tier_label(299), "Skirmish");
        assert_eq!(reward_tier_label(300), "Victory");
        assert_eq!(reward_tier_label(600), "Triumph");
        assert_eq!(reward_tier_label(899), "Triumph");
        assert_eq!(reward_tier_label(900), "Legend");
        assert_eq!(reward_tier_label(u64::MAX), "Legend");
    }

    #[test]
    fn test_full_channel_drops() {
        let (broadcaster, rx) = Broadcaster::channel(1);
        broadcaster.publish(SessionBroadcast::Cancelled { session: SessionId(1) });
        broadcaster.publish(SessionBroadcast::Cancelled { session: SessionId(2) });

        assert_eq!(broadcaster.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), SessionBroadcast::Cancelled { session: SessionId(1) });
        assert!(rx.try_recv().is_err());
    }
}
