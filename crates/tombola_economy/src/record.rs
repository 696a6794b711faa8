//! # Participant Record
//!
//! The per-participant state the ledger persists. Every mutator enforces its
//! invariant before touching anything, so a rejected call leaves the record as
//! it was:
//!
//! - `currency_balance` never goes below zero
//! - item and pack counts never go below zero; zero entries are removed

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::catalog::{ItemId, PoolId};
use crate::error::{LedgerError, LedgerResult};

/// Stable external participant identifier (the chat platform's user id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One participant's durable state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantRecord {
    currency_balance: u64,
    item_counts: BTreeMap<ItemId, u32>,
    pool_inventory: BTreeMap<PoolId, u32>,
    loadout: Vec<ItemId>,
    last_daily_draw: Option<NaiveDate>,
    last_reward_ms: Option<i64>,
    recent_fingerprints: VecDeque<u64>,
    total_items_drawn: u64,
    total_currency_earned: u64,
}

impl ParticipantRecord {
    /// The all-zero record every participant starts with.
    #[must_use]
    pub fn new_default() -> Self {
        Self::default()
    }

    /// Current balance.
    #[must_use]
    pub const fn balance(&self) -> u64 {
        self.currency_balance
    }

    /// Owned count of an item (0 if none).
    #[must_use]
    pub fn item_count(&self, item: ItemId) -> u32 {
        self.item_counts.get(&item).copied().unwrap_or(0)
    }

    /// All owned items with their counts.
    #[must_use]
    pub const fn items(&self) -> &BTreeMap<ItemId, u32> {
        &self.item_counts
    }

    /// Unopened pack count for a pool (0 if none).
    #[must_use]
    pub fn pack_count(&self, pool: PoolId) -> u32 {
        self.pool_inventory.get(&pool).copied().unwrap_or(0)
    }

    /// All unopened packs.
    #[must_use]
    pub const fn packs(&self) -> &BTreeMap<PoolId, u32> {
        &self.pool_inventory
    }

    /// Configured loadout, including items no longer owned.
    #[must_use]
    pub fn loadout(&self) -> &[ItemId] {
        &self.loadout
    }

    /// Loadout entries that are still owned.
    #[must_use]
    pub fn eligible_loadout(&self) -> Vec<ItemId> {
        self.loadout
            .iter()
            .copied()
            .filter(|item| self.item_count(*item) > 0)
            .collect()
    }

    /// Date of the last free daily draw, in the ledger's reference timezone.
    #[must_use]
    pub const fn last_daily_draw(&self) -> Option<NaiveDate> {
        self.last_daily_draw
    }

    /// Unix time (ms) of the last accepted message reward.
    #[must_use]
    pub const fn last_reward_ms(&self) -> Option<i64> {
        self.last_reward_ms
    }

    /// Lifetime count of drawn items.
    #[must_use]
    pub const fn total_items_drawn(&self) -> u64 {
        self.total_items_drawn
    }

    /// Lifetime currency credited.
    #[must_use]
    pub const fn total_currency_earned(&self) -> u64 {
        self.total_currency_earned
    }

    pub(crate) fn credit(&mut self, amount: u64) -> LedgerResult<u64> {
        let balance = self
            .currency_balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;
        self.currency_balance = balance;
        self.total_currency_earned = self.total_currency_earned.saturating_add(amount);
        Ok(balance)
    }

    pub(crate) fn debit(&mut self, amount: u64) -> LedgerResult<u64> {
        let have = self.currency_balance;
        let balance = have
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientFunds { need: amount, have })?;
        self.currency_balance = balance;
        Ok(balance)
    }

    pub(crate) fn add_items(&mut self, items: &[ItemId]) {
        for item in items {
            let count = self.item_counts.entry(*item).or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    pub(crate) fn record_drawn(&mut self, count: usize) {
        self.total_items_drawn = self.total_items_drawn.saturating_add(count as u64);
    }

    pub(crate) fn remove_item(&mut self, item: ItemId) -> LedgerResult<u32> {
        let Some(count) = self.item_counts.get_mut(&item).filter(|c| **c > 0) else {
            return Err(LedgerError::ItemNotOwned(item));
        };
        *count -= 1;
        let left = *count;
        if left == 0 {
            self.item_counts.remove(&item);
        }
        Ok(left)
    }

    pub(crate) fn add_packs(&mut self, pool: PoolId, n: u32) -> u32 {
        if n == 0 {
            return self.pack_count(pool);
        }
        let count = self.pool_inventory.entry(pool).or_insert(0);
        *count = count.saturating_add(n);
        *count
    }

    pub(crate) fn take_pack(&mut self, pool: PoolId) -> LedgerResult<u32> {
        let Some(count) = self.pool_inventory.get_mut(&pool).filter(|c| **c > 0) else {
            return Err(LedgerError::NoPackAvailable(pool));
        };
        *count -= 1;
        let left = *count;
        if left == 0 {
            self.pool_inventory.remove(&pool);
        }
        Ok(left)
    }

    /// Replaces the loadout. Duplicates are dropped, order kept.
    pub(crate) fn set_loadout(&mut self, items: &[ItemId], max: usize) -> LedgerResult<()> {
        let mut unique: Vec<ItemId> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(item) {
                unique.push(*item);
            }
        }
        if unique.len() > max {
            return Err(LedgerError::LoadoutTooLarge {
                max,
                requested: unique.len(),
            });
        }
        if let Some(missing) = unique.iter().find(|item| self.item_count(**item) == 0) {
            return Err(LedgerError::ItemNotOwned(*missing));
        }
        self.loadout = unique;
        Ok(())
    }

    /// Check-and-set of the daily claim date.
    pub(crate) fn claim_day(&mut self, today: NaiveDate) -> bool {
        if self.last_daily_draw == Some(today) {
            return false;
        }
        self.last_daily_draw = Some(today);
        true
    }

    pub(crate) fn has_recent_fingerprint(&self, fingerprint: u64) -> bool {
        self.recent_fingerprints.contains(&fingerprint)
    }

    /// Records an accepted message; the ring keeps the last `window` fingerprints.
    pub(crate) fn remember_reward(&mut self, fingerprint: u64, now_ms: i64, window: usize) {
        self.last_reward_ms = Some(now_ms);
        if window == 0 {
            return;
        }
        self.recent_fingerprints.push_back(fingerprint);
        while self.recent_fingerprints.len() > window {
            self.recent_fingerprints.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debit_never_goes_negative() {
        let mut record = ParticipantRecord::new_default();
        record.credit(10).unwrap();

        let err = record.debit(11).unwrap_err();
        assert_eq!(err, LedgerError::InsufficientFunds { need: 11, have: 10 });
        assert_eq!(record.balance(), 10);

        assert_eq!(record.debit(10).unwrap(), 0);
    }

    #[test]
    fn test_zero_counts_are_removed() {
        let mut record = ParticipantRecord::new_default();
        record.add_items(&[7, 7]);
        assert_eq!(record.remove_item(7).unwrap(), 1);
        assert_eq!(record.remove_item(7).unwrap(), 0);
        assert!(record.items().is_empty());
        assert_eq!(record.remove_item(7), Err(LedgerError::ItemNotOwned(7)));

        record.add_packs(3, 1);
        record.take_pack(3).unwrap();
        assert!(record.packs().is_empty());
        assert_eq!(record.take_pack(3), Err(LedgerError::NoPackAvailable(3)));
    }

    #[test]
    fn test_loadout_requires_ownership() {
        let mut record = ParticipantRecord::new_default();
        record.add_items(&[1, 2]);

        assert_eq!(record.set_loadout(&[1, 3], 3), Err(LedgerError::ItemNotOwned(3)));
        assert!(record.loadout().is_empty());

        record.set_loadout(&[2, 1, 2], 3).unwrap();
        assert_eq!(record.loadout(), &[2, 1]);

        record.remove_item(2).unwrap();
        assert_eq!(record.eligible_loadout(), vec![1]);
    }

    #[test]
    fn test_loadout_cap() {
        let mut record = ParticipantRecord::new_default();
        record.add_items(&[1, 2, 3]);
        assert_eq!(
            record.set_loadout(&[1, 2, 3], 2),
            Err(LedgerError::LoadoutTooLarge { max: 2, requested: 3 })
        );
    }

    #[test]
    fn test_fingerprint_ring_is_bounded() {
        let mut record = ParticipantRecord::new_default();
        for fp in 0..10 {
            record.remember_reward(fp, i64::try_from(fp).unwrap(), 3);
        }
        assert!(!record.has_recent_fingerprint(6));
        assert!(record.has_recent_fingerprint(7));
        assert!(record.has_recent_fingerprint(9));
        assert_eq!(record.last_reward_ms(), Some(9));
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let record: ParticipantRecord = serde_json::from_str(r#"{"currency_balance": 5}"#).unwrap();
        assert_eq!(record.balance(), 5);
        assert!(record.items().is_empty());
        assert_eq!(record.last_daily_draw(), None);
    }
}
