//! # Ledger
//!
//! **The authoritative per-participant store of currency, items and packs.**
//!
//! Every operation is one read-modify-write against one participant's record:
//!
//! ```text
//! lock(participant) -> load (or explicit default) -> check + mutate copy
//!                   -> store -> unlock
//! ```
//!
//! ## Concurrency
//!
//! Each participant id gets its own mutex, handed out from a lock table. Two
//! operations on the same participant are linearizable; operations on different
//! participants never wait on each other (the lock table is only held long
//! enough to clone an `Arc`). An entry is removed as soon as its last caller
//! releases it, so the table only holds participants with work in flight.
//!
//! ## Failure
//!
//! - Rejections (insufficient funds, item not owned, ...) write nothing.
//! - A store failure returns [`LedgerError::Persistence`]. The mutated copy is
//!   discarded, so the durable record is exactly what it was before the call
//!   and the operation can be retried.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{ItemId, PoolId};
use crate::clock::{Clock, SystemClock};
use crate::draw::DrawOutcome;
use crate::error::{LedgerError, LedgerResult};
use crate::fingerprint::MessageSample;
use crate::record::{ParticipantId, ParticipantRecord};
use crate::store::RecordStore;

/// Ledger tuning, loaded from the `[ledger]` config section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Offset of the reference timezone for daily claims, in minutes east of UTC.
    pub utc_offset_minutes: i32,
    /// Smallest passive message reward.
    pub message_reward_min: u64,
    /// Largest passive message reward.
    pub message_reward_max: u64,
    /// How many accepted message fingerprints are remembered per participant.
    pub fingerprint_window: usize,
    /// Maximum loadout size.
    pub max_loadout: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            message_reward_min: 1,
            message_reward_max: 5,
            fingerprint_window: 5,
            max_loadout: 3,
        }
    }
}

impl LedgerConfig {
    /// The reference timezone, or an error if the offset is out of range.
    pub fn reference_offset(&self) -> LedgerResult<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                LedgerError::InvalidConfig(format!(
                    "utc_offset_minutes {} is out of range",
                    self.utc_offset_minutes
                ))
            })
    }

    fn validate(&self) -> LedgerResult<FixedOffset> {
        if self.message_reward_min > self.message_reward_max {
            return Err(LedgerError::InvalidConfig(format!(
                "message_reward_min {} exceeds message_reward_max {}",
                self.message_reward_min, self.message_reward_max
            )));
        }
        self.reference_offset()
    }
}

/// Outcome of a passive message reward attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageReward {
    /// Currency was credited.
    Credited {
        /// Amount credited.
        amount: u64,
        /// Balance after the credit.
        balance: u64,
    },
    /// The message is shorter than the minimum length.
    TooShort,
    /// The previous reward was too recent.
    CoolingDown {
        /// Time until the next reward is possible.
        remaining: Duration,
    },
    /// The same text was rewarded recently.
    Duplicate,
}

/// A mutation either commits its change or leaves the record untouched.
enum Step<T> {
    Commit(T),
    Unchanged(T),
}

/// The participant ledger.
pub struct Ledger {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    offset: FixedOffset,
    locks: Mutex<HashMap<ParticipantId, Arc<Mutex<()>>>>,
    reward_rng: Mutex<StdRng>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("tracked_participants", &self.locks.lock().len())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Creates a ledger over `store` using the system clock.
    pub fn new(store: Arc<dyn RecordStore>, config: LedgerConfig) -> LedgerResult<Self> {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Creates a ledger with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> LedgerResult<Self> {
        let offset = config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
            offset,
            locks: Mutex::new(HashMap::new()),
            reward_rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// "Today" in the reference timezone.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.offset).date_naive()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Full record, or the explicit default for an unknown participant.
    pub fn snapshot(&self, id: ParticipantId) -> LedgerResult<ParticipantRecord> {
        self.mutate(id, "snapshot", |record, _| Ok(Step::Unchanged(record.clone())))
    }

    /// Current balance.
    pub fn balance(&self, id: ParticipantId) -> LedgerResult<u64> {
        self.mutate(id, "balance", |record, _| Ok(Step::Unchanged(record.balance())))
    }

    /// Loadout items the participant still owns.
    pub fn eligible_loadout(&self, id: ParticipantId) -> LedgerResult<Vec<ItemId>> {
        self.mutate(id, "eligible_loadout", |record, _| {
            Ok(Step::Unchanged(record.eligible_loadout()))
        })
    }

    // ------------------------------------------------------------------
    // Currency
    // ------------------------------------------------------------------

    /// Adds `amount` to the balance. Returns the new balance.
    pub fn credit(&self, id: ParticipantId, amount: u64) -> LedgerResult<u64> {
        self.mutate(id, "credit", |record, _| record.credit(amount).map(Step::Commit))
    }

    /// Removes `amount` from the balance, failing with
    /// [`LedgerError::InsufficientFunds`] rather than going negative.
    pub fn debit(&self, id: ParticipantId, amount: u64) -> LedgerResult<u64> {
        self.mutate(id, "debit", |record, _| record.debit(amount).map(Step::Commit))
    }

    // ------------------------------------------------------------------
    // Items and packs
    // ------------------------------------------------------------------

    /// Adds one of each listed item (repeats add more).
    pub fn grant_items(&self, id: ParticipantId, items: &[ItemId]) -> LedgerResult<()> {
        self.mutate(id, "grant_items", |record, _| {
            record.add_items(items);
            Ok(Step::Commit(()))
        })
    }

    /// Removes one of `item`. Returns how many remain.
    pub fn consume_item(&self, id: ParticipantId, item: ItemId) -> LedgerResult<u32> {
        self.mutate(id, "consume_item", |record, _| record.remove_item(item).map(Step::Commit))
    }

    /// Adds `n` unopened packs for `pool`. Returns the new pack count.
    pub fn grant_pool_pack(&self, id: ParticipantId, pool: PoolId, n: u32) -> LedgerResult<u32> {
        self.mutate(id, "grant_pool_pack", |record, _| Ok(Step::Commit(record.add_packs(pool, n))))
    }

    /// Removes one unopened pack for `pool`. Returns how many remain.
    pub fn consume_pool_pack(&self, id: ParticipantId, pool: PoolId) -> LedgerResult<u32> {
        self.mutate(id, "consume_pool_pack", |record, _| record.take_pack(pool).map(Step::Commit))
    }

    /// Grants the items of a finished draw and counts them in lifetime stats.
    pub fn record_draw(&self, id: ParticipantId, outcome: &DrawOutcome) -> LedgerResult<()> {
        self.mutate(id, "record_draw", |record, _| {
            apply_draw(record, outcome);
            Ok(Step::Commit(()))
        })
    }

    /// Consumes one pack of the outcome's pool and grants its items in one write.
    pub fn open_pack(&self, id: ParticipantId, outcome: &DrawOutcome) -> LedgerResult<u32> {
        self.mutate(id, "open_pack", |record, _| {
            let left = record.take_pack(outcome.pool)?;
            apply_draw(record, outcome);
            Ok(Step::Commit(left))
        })
    }

    /// Replaces the participant's loadout. Every item must be owned.
    pub fn set_loadout(&self, id: ParticipantId, items: &[ItemId]) -> LedgerResult<()> {
        let max = self.config.max_loadout;
        self.mutate(id, "set_loadout", |record, _| {
            record.set_loadout(items, max).map(Step::Commit)
        })
    }

    // ------------------------------------------------------------------
    // Cooldowns
    // ------------------------------------------------------------------

    /// Claims today's free draw. Returns false if it was already claimed today.
    pub fn try_claim_daily_draw(&self, id: ParticipantId) -> LedgerResult<bool> {
        let offset = self.offset;
        self.mutate(id, "try_claim_daily_draw", |record, now| {
            Ok(claim_step(record.claim_day(local_date(now, offset))))
        })
    }

    /// Claims today's free draw and grants `outcome` in the same write.
    ///
    /// Returns false (granting nothing) if today's draw was already claimed.
    pub fn claim_daily_draw(&self, id: ParticipantId, outcome: &DrawOutcome) -> LedgerResult<bool> {
        let offset = self.offset;
        self.mutate(id, "claim_daily_draw", |record, now| {
            if !record.claim_day(local_date(now, offset)) {
                return Ok(Step::Unchanged(false));
            }
            apply_draw(record, outcome);
            Ok(Step::Commit(true))
        })
    }

    /// Passive currency for chatting.
    ///
    /// Rejects messages shorter than `min_length`, rewards closer together than
    /// `cooldown`, and repeats of the last few rewarded messages. Otherwise
    /// credits a random amount from the configured range and remembers the
    /// fingerprint.
    pub fn try_claim_message_reward(
        &self,
        id: ParticipantId,
        sample: MessageSample,
        min_length: usize,
        cooldown: Duration,
    ) -> LedgerResult<MessageReward> {
        if sample.length < min_length {
            return Ok(MessageReward::TooShort);
        }

        let window = self.config.fingerprint_window;
        let (lo, hi) = (self.config.message_reward_min, self.config.message_reward_max);
        let cooldown_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);

        self.mutate(id, "try_claim_message_reward", |record, now| {
            let now_ms = now.timestamp_millis();
            if let Some(last) = record.last_reward_ms() {
                let elapsed = now_ms.saturating_sub(last);
                if elapsed < cooldown_ms {
                    let remaining = u64::try_from(cooldown_ms - elapsed).unwrap_or(0);
                    return Ok(Step::Unchanged(MessageReward::CoolingDown {
                        remaining: Duration::from_millis(remaining),
                    }));
                }
            }
            if record.has_recent_fingerprint(sample.fingerprint) {
                return Ok(Step::Unchanged(MessageReward::Duplicate));
            }

            let amount = self.reward_rng.lock().gen_range(lo..=hi);
            let balance = record.credit(amount)?;
            record.remember_reward(sample.fingerprint, now_ms, window);
            Ok(Step::Commit(MessageReward::Credited { amount, balance }))
        })
    }

    // ------------------------------------------------------------------
    // Core read-modify-write
    // ------------------------------------------------------------------

    fn lock_for(&self, id: ParticipantId) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock();
        Arc::clone(table.entry(id).or_default())
    }

    fn mutate<T>(
        &self,
        id: ParticipantId,
        op: &'static str,
        apply: impl FnOnce(&mut ParticipantRecord, DateTime<Utc>) -> LedgerResult<Step<T>>,
    ) -> LedgerResult<T> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock();
            self.apply_locked(id, op, apply)
        };
        self.release(id, &lock);
        result
    }

    /// Drops the participant's lock entry once no other caller holds or waits on it.
    fn release(&self, id: ParticipantId, lock: &Arc<Mutex<()>>) {
        let mut table = self.locks.lock();
        // Clones are only handed out under the table lock, so a count of two
        // (the table and this caller) cannot grow while we hold it.
        if Arc::strong_count(lock) == 2 {
            table.remove(&id);
        }
    }

    fn apply_locked<T>(
        &self,
        id: ParticipantId,
        op: &'static str,
        apply: impl FnOnce(&mut ParticipantRecord, DateTime<Utc>) -> LedgerResult<Step<T>>,
    ) -> LedgerResult<T> {
        let mut record = match self.store.load(id) {
            Ok(Some(record)) => record,
            Ok(None) => ParticipantRecord::new_default(),
            Err(e) => {
                tracing::error!(participant = %id, op, error = %e, "ledger load failed");
                return Err(e.into());
            }
        };

        let step = match apply(&mut record, self.clock.now()) {
            Ok(step) => step,
            Err(e) => {
                tracing::debug!(participant = %id, op, reason = %e, "ledger operation rejected");
                return Err(e);
            }
        };

        match step {
            Step::Unchanged(value) => Ok(value),
            Step::Commit(value) => {
                if let Err(e) = self.store.store(id, &record) {
                    tracing::error!(participant = %id, op, error = %e, "ledger write failed");
                    return Err(e.into());
                }
                Ok(value)
            }
        }
    }
}

fn apply_draw(record: &mut ParticipantRecord, outcome: &DrawOutcome) {
    record.add_items(&outcome.items);
    record.record_drawn(outcome.items.len());
}

fn claim_step(claimed: bool) -> Step<bool> {
    if claimed {
        Step::Commit(true)
    } else {
        Step::Unchanged(false)
    }
}

fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}
