//! # Session Hub
//!
//! **At most one cooperative event at a time, across both kinds.**
//!
//! ## States
//!
//! ```text
//!            start()                 resolution timer
//!   Idle ─────────────▶ Announced ─────────────────────▶ Resolving ──▶ Idle
//!    ▲                   │  ▲  join()                         │
//!    │                   └──┘  progress ticks                 │
//!    └──────────────── shutdown() ◀───────────────────────────┘
//! ```
//!
//! - **Announced**: join window open; progress snapshots go out on a timer.
//! - **Resolving**: joins refused; loadouts re-read, narrative requested, rewards paid.
//!
//! ## Guarantees
//!
//! 1. **Exclusivity**: an `AtomicBool` is compare-and-set at start; a second start
//!    is refused until the running session is cleared.
//! 2. **Single payout**: every participant is credited once per session.
//! 3. **No stale timers**: timers are owned handles, aborted on clear, and every
//!    timer callback checks the session id before touching the slot.
//! 4. **Never stalls**: ledger calls and the narrative call run under timeouts;
//!    narrative failures take the fallback path.
//!
//! The slot mutex is never held across an `.await`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tombola_economy::{Catalog, ItemId, Ledger, LedgerResult, ParticipantId};

use crate::broadcast::{
    reward_tier_label, Broadcaster, Payout, ProgressSnapshot, Resolution, SessionAnnouncement,
    SessionBroadcast, SessionId, SessionOutcome, Trigger,
};
use crate::config::{SessionConfig, SessionKind, Theme};
use crate::error::{NarrativeError, SessionError, SessionResult};
use crate::narrative::{self, NarrativeService, Verdict};

/// Phase of the active session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Join window open.
    Announced,
    /// Rewards being computed and paid.
    Resolving,
}

/// Result of a successful join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First join for this participant.
    Joined {
        /// Session joined.
        session: SessionId,
        /// Participants after the join.
        participant_count: usize,
    },
    /// The participant was already in; their loadout snapshot was refreshed.
    Updated {
        /// Session joined.
        session: SessionId,
        /// Participants after the join.
        participant_count: usize,
    },
}

/// Read-only view of the hub for the UI layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session.
    Idle,
    /// A session is announced or resolving.
    Active {
        /// Session id.
        session: SessionId,
        /// Event kind.
        kind: SessionKind,
        /// Theme name.
        theme: String,
        /// Current phase.
        phase: SessionPhase,
        /// Start time.
        started_at: DateTime<Utc>,
        /// Participants so far.
        participants: usize,
        /// End of the join window.
        ends_at: DateTime<Utc>,
    },
}

/// Cancellable timers owned by one session.
struct TimerHandles {
    resolution: Option<JoinHandle<()>>,
    progress: Option<JoinHandle<()>>,
}

impl TimerHandles {
    fn stop_progress(&mut self) {
        if let Some(handle) = self.progress.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.stop_progress();
        if let Some(handle) = self.resolution.take() {
            handle.abort();
        }
    }
}

struct ActiveSession {
    id: SessionId,
    kind: SessionKind,
    theme: Theme,
    started_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    opened: Instant,
    deadline: Instant,
    phase: SessionPhase,
    participants: BTreeMap<ParticipantId, Vec<ItemId>>,
    timers: TimerHandles,
}

impl ActiveSession {
    fn check_joinable(&self) -> SessionResult<()> {
        if self.phase == SessionPhase::Resolving {
            return Err(SessionError::ResolutionStarted);
        }
        if Instant::now() >= self.deadline {
            return Err(SessionError::JoinWindowClosed);
        }
        Ok(())
    }

    fn progress(&self) -> ProgressSnapshot {
        let window = self.deadline.saturating_duration_since(self.opened).as_secs_f64();
        let elapsed = self.opened.elapsed().as_secs_f64();
        let fraction = if window > 0.0 { (elapsed / window).clamp(0.0, 1.0) } else { 1.0 };
        ProgressSnapshot {
            session: self.id,
            kind: self.kind,
            participants: self.participants.keys().copied().collect(),
            elapsed_fraction: fraction,
        }
    }
}

/// Owner of the single session slot.
pub struct SessionHub {
    config: SessionConfig,
    ledger: Arc<Ledger>,
    catalog: Arc<Catalog>,
    narrator: Arc<dyn NarrativeService>,
    broadcaster: Broadcaster,
    runtime: Handle,
    active: AtomicBool,
    slot: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
    rng: Mutex<StdRng>,
    schedulers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHub")
            .field("active", &self.active.load(Ordering::Acquire))
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SessionHub {
    /// Builds a hub bound to the current tokio runtime.
    pub fn new(
        config: SessionConfig,
        ledger: Arc<Ledger>,
        catalog: Arc<Catalog>,
        narrator: Arc<dyn NarrativeService>,
        broadcaster: Broadcaster,
    ) -> SessionResult<Arc<Self>> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        Ok(Arc::new(Self {
            config,
            ledger,
            catalog,
            narrator,
            broadcaster,
            runtime,
            active: AtomicBool::new(false),
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
            schedulers: Mutex::new(Vec::new()),
        }))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// True while a session is announced or resolving.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Snapshot for the UI.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.slot.lock().as_ref().map_or(SessionStatus::Idle, |s| SessionStatus::Active {
            session: s.id,
            kind: s.kind,
            theme: s.theme.name.clone(),
            phase: s.phase,
            started_at: s.started_at,
            participants: s.participants.len(),
            ends_at: s.ends_at,
        })
    }

    // ------------------------------------------------------------------
    // Idle -> Announced
    // ------------------------------------------------------------------

    /// Opens a session of `kind`, or refuses if any session is running.
    pub fn start(self: &Arc<Self>, kind: SessionKind, trigger: Trigger) -> SessionResult<SessionAnnouncement> {
        let kind_config = self.config.kind(kind);
        let duration = kind_config.duration();
        let period = kind_config.progress_interval();
        let span = chrono::Duration::from_std(duration)
            .map_err(|_| SessionError::InvalidConfig(format!("{kind}: duration out of range")))?;

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let running = self.slot.lock().as_ref().map_or(kind, |s| s.kind);
            tracing::debug!(requested = %kind, running = %running, "session start refused");
            return Err(SessionError::AlreadyActive { active: running });
        }

        let theme = {
            let themes = &kind_config.themes;
            let mut rng = self.rng.lock();
            themes[rng.gen_range(0..themes.len())].clone()
        };
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let started_at = Utc::now();
        let ends_at = started_at + span;
        let opened = Instant::now();
        let deadline = opened + duration;

        let announcement = SessionAnnouncement {
            session: id,
            kind,
            theme: theme.name.clone(),
            trigger,
            started_at,
            ends_at,
        };

        {
            let mut slot = self.slot.lock();
            let resolution = {
                let hub = Arc::clone(self);
                self.runtime.spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    hub.resolve(id).await;
                })
            };
            let progress = {
                let hub = Arc::clone(self);
                self.runtime.spawn(async move { hub.run_progress(id, opened, deadline, period).await })
            };
            *slot = Some(ActiveSession {
                id,
                kind,
                theme,
                started_at,
                ends_at,
                opened,
                deadline,
                phase: SessionPhase::Announced,
                participants: BTreeMap::new(),
                timers: TimerHandles {
                    resolution: Some(resolution),
                    progress: Some(progress),
                },
            });
        }

        tracing::info!(
            session = %id,
            kind = %kind,
            theme = %announcement.theme,
            ?trigger,
            duration_ms = kind_config.duration_ms,
            "session announced"
        );
        self.broadcaster.publish(SessionBroadcast::Announced(announcement.clone()));
        Ok(announcement)
    }

    /// Rolls the per-message trigger chance; starts a random kind on a hit.
    pub fn on_community_message(self: &Arc<Self>) -> Option<SessionAnnouncement> {
        if self.is_active() {
            return None;
        }
        let kind = {
            let mut rng = self.rng.lock();
            if rng.gen::<f64>() >= self.config.message_trigger_chance {
                return None;
            }
            SessionKind::ALL[rng.gen_range(0..SessionKind::ALL.len())]
        };
        self.start(kind, Trigger::Message).ok()
    }

    /// Spawns one independent scheduler per kind. Each rolls its chance every
    /// interval and tries to start a session; a running session makes it skip.
    pub fn spawn_schedulers(self: &Arc<Self>) {
        let mut schedulers = self.schedulers.lock();
        for kind in SessionKind::ALL {
            let weak = Arc::downgrade(self);
            let period = self.config.kind(kind).schedule_interval();
            schedulers.push(self.runtime.spawn(run_scheduler(weak, kind, period)));
        }
        tracing::info!(count = schedulers.len(), "session schedulers running");
    }

    // ------------------------------------------------------------------
    // Announced -> Announced
    // ------------------------------------------------------------------

    /// Adds `participant` to the running session with their current loadout.
    pub async fn join(&self, participant: ParticipantId) -> SessionResult<JoinOutcome> {
        let session = {
            let slot = self.slot.lock();
            let active = slot.as_ref().ok_or(SessionError::NoActiveSession)?;
            active.check_joinable()?;
            active.id
        };

        let loadout = self.ledger_call(move |ledger| ledger.eligible_loadout(participant)).await?;
        if loadout.is_empty() {
            tracing::debug!(participant = %participant, "join refused: no eligible loadout");
            return Err(SessionError::NoEligibleLoadout);
        }

        let mut slot = self.slot.lock();
        let active = slot
            .as_mut()
            .filter(|s| s.id == session)
            .ok_or(SessionError::NoActiveSession)?;
        active.check_joinable()?;

        let first = active.participants.insert(participant, loadout).is_none();
        let participant_count = active.participants.len();
        tracing::debug!(session = %session, participant = %participant, first, "participant joined");
        Ok(if first {
            JoinOutcome::Joined {
                session,
                participant_count,
            }
        } else {
            JoinOutcome::Updated {
                session,
                participant_count,
            }
        })
    }

    // ------------------------------------------------------------------
    // Announced -> Resolving -> Idle
    // ------------------------------------------------------------------

    async fn resolve(&self, id: SessionId) {
        let (kind, theme, participants) = {
            let mut slot = self.slot.lock();
            let Some(session) = slot.as_mut().filter(|s| s.id == id) else {
                tracing::debug!(session = %id, "stale resolution ignored");
                return;
            };
            if session.phase == SessionPhase::Resolving {
                return;
            }
            session.phase = SessionPhase::Resolving;
            session.timers.stop_progress();
            (session.kind, session.theme.clone(), session.participants.clone())
        };

        tracing::info!(session = %id, participants = participants.len(), "session resolving");

        let resolution = if participants.is_empty() {
            Resolution::NobodyCame
        } else {
            self.settle(id, kind, &theme, participants).await
        };

        let finished = {
            let mut slot = self.slot.lock();
            if slot.as_ref().is_some_and(|s| s.id == id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(mut finished) = finished else {
            tracing::debug!(session = %id, "session cleared during resolution");
            return;
        };
        // The resolution handle is this task; dropping it detaches.
        finished.timers.progress.take();
        finished.timers.resolution.take();
        self.active.store(false, Ordering::Release);

        match &resolution {
            Resolution::NobodyCame => {
                tracing::info!(session = %id, "session resolved: nobody came");
            }
            Resolution::Completed {
                reward,
                tier_label,
                used_fallback,
                payouts,
                ..
            } => {
                tracing::info!(
                    session = %id,
                    reward,
                    tier = tier_label,
                    fallback = used_fallback,
                    paid = payouts.iter().filter(|p| p.credited).count(),
                    "session resolved"
                );
            }
        }

        self.broadcaster.publish(SessionBroadcast::Resolved(SessionOutcome {
            session: id,
            kind,
            theme: finished.theme.name,
            resolution,
        }));
    }

    async fn settle(
        &self,
        id: SessionId,
        kind: SessionKind,
        theme: &Theme,
        participants: BTreeMap<ParticipantId, Vec<ItemId>>,
    ) -> Resolution {
        let mut loadouts = Vec::with_capacity(participants.len());
        for (participant, snapshot) in participants {
            let current = match self.ledger_call(move |l| l.eligible_loadout(participant)).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(session = %id, participant = %participant, error = %e, "loadout re-read failed, using join snapshot");
                    snapshot
                }
            };
            loadouts.push((participant, current));
        }

        let limits = self.config.verdict_limits();
        let prompt = narrative::build_prompt(kind, &theme.name, &loadouts, &self.catalog, &limits);
        let (verdict, used_fallback) = match self.request_verdict(&prompt).await {
            Ok(verdict) => (verdict, false),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "narrative unavailable, using fallback");
                (self.fallback_verdict(kind, &theme.name), true)
            }
        };

        let reward = verdict.reward;
        let reward_item = match kind {
            SessionKind::Raid => theme.reward_item,
            SessionKind::Expedition => None,
        };

        let mut payouts = Vec::with_capacity(loadouts.len());
        for (participant, _) in &loadouts {
            let participant = *participant;
            // One attempt each: a timed-out call may still land, so no retry.
            let credited = match self.ledger_call(move |l| l.credit(participant, reward)).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(session = %id, participant = %participant, error = %e, "reward credit failed");
                    false
                }
            };
            let item_granted = match reward_item {
                Some(item) => match self.ledger_call(move |l| l.grant_items(participant, &[item])).await {
                    Ok(()) => Some(item),
                    Err(e) => {
                        tracing::warn!(session = %id, participant = %participant, error = %e, "reward item grant failed");
                        None
                    }
                },
                None => None,
            };
            payouts.push(Payout {
                participant,
                credited,
                item_granted,
            });
        }

        Resolution::Completed {
            narrative: verdict.narrative,
            reward,
            tier_label: reward_tier_label(reward),
            used_fallback,
            payouts,
        }
    }

    async fn request_verdict(&self, prompt: &str) -> Result<Verdict, NarrativeError> {
        let raw = tokio::time::timeout(self.config.narrative_timeout(), self.narrator.judge(prompt))
            .await
            .map_err(|_| NarrativeError::Timeout)??;
        narrative::parse_verdict(&raw, &self.config.verdict_limits())
    }

    fn fallback_verdict(&self, kind: SessionKind, theme: &str) -> Verdict {
        let (lo, hi) = (self.config.fallback_reward_min, self.config.fallback_reward_max);
        Verdict {
            narrative: narrative::fallback_narrative(kind, theme),
            reward: self.rng.lock().gen_range(lo..=hi),
        }
    }

    // ------------------------------------------------------------------
    // Timers and teardown
    // ------------------------------------------------------------------

    async fn run_progress(&self, id: SessionId, opened: Instant, deadline: Instant, period: Duration) {
        let mut ticker = tokio::time::interval_at(opened + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let tick = ticker.tick().await;
            if tick >= deadline {
                break;
            }
            let snapshot = {
                let slot = self.slot.lock();
                match slot.as_ref() {
                    Some(s) if s.id == id && s.phase == SessionPhase::Announced => s.progress(),
                    _ => break,
                }
            };
            self.broadcaster.publish(SessionBroadcast::Progress(snapshot));
        }
    }

    /// Stops the schedulers, cancels the running session's timers and clears
    /// the slot. No resolution fires afterwards.
    pub fn shutdown(&self) {
        for handle in self.schedulers.lock().drain(..) {
            handle.abort();
        }
        let cleared = self.slot.lock().take();
        if let Some(mut session) = cleared {
            session.timers.cancel_all();
            self.active.store(false, Ordering::Release);
            tracing::info!(session = %session.id, kind = %session.kind, "session cancelled by shutdown");
            self.broadcaster.publish(SessionBroadcast::Cancelled { session: session.id });
        }
    }

    /// Runs a ledger operation on the blocking pool under the ledger timeout.
    async fn ledger_call<T, F>(&self, op: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> LedgerResult<T> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        let task = tokio::task::spawn_blocking(move || op(&ledger));
        match tokio::time::timeout(self.config.ledger_timeout(), task).await {
            Ok(Ok(result)) => result.map_err(SessionError::from),
            Ok(Err(join)) => Err(SessionError::LedgerTask(join.to_string())),
            Err(_) => Err(SessionError::LedgerTimeout),
        }
    }
}

async fn run_scheduler(weak: Weak<SessionHub>, kind: SessionKind, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(hub) = weak.upgrade() else {
            break;
        };
        if hub.is_active() {
            continue;
        }
        let chance = hub.config.kind(kind).schedule_chance;
        let hit = hub.rng.lock().gen::<f64>() < chance;
        if hit {
            // Losing the race to another trigger is fine.
            let _ = hub.start(kind, Trigger::Schedule);
        }
    }
}
