//! # Weighted Draw Engine
//!
//! **Turns randomness into a set of items that honors the pool's rules.**
//!
//! ## Security Model
//!
//! Two generators with different jobs:
//!
//! - **Tier roll (`StdRng`)**: fast, general purpose. Which tier a slot lands in
//!   is public information anyway (it is printed with the result).
//! - **Item pick (`ChaCha20Rng`)**: CSPRNG seeded from OS entropy. Which exact
//!   item inside a tier a participant receives cannot be predicted from earlier
//!   outcomes.
//!
//! Both are seedable through [`DrawEngine::with_seed`] for deterministic tests.
//!
//! ## Algorithm
//!
//! ```text
//! jackpot?  ──yes──▶ every slot: restricted(jackpot_min_tier)
//!    │
//!    no ──▶ every slot: open sampling
//!           no slot >= min_guaranteed_tier?
//!              └──▶ last slot: restricted(min_guaranteed_tier)
//! ```
//!
//! Open sampling walks the tiers rarest first by cumulative probability; any
//! shortfall below 1.0 lands on the least-rare configured tier. Restricted
//! sampling renormalizes over the eligible tiers only.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::{Catalog, ItemId, PoolId, PoolTable, Rarity};
use crate::error::{DrawError, DrawResult};

/// Mixed into the item-pick seed so the two generators never share a stream.
const ITEM_SEED_MIX: u64 = 0x5EED_C4A7_A10C_0DE5;

/// Result of one draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawOutcome {
    /// Pool the items came from.
    pub pool: PoolId,
    /// Drawn items, one per slot.
    pub items: Vec<ItemId>,
    /// Tier of each drawn item, parallel to `items`.
    pub rarities: Vec<Rarity>,
    /// Whether this was a jackpot draw.
    pub is_jackpot: bool,
}

impl DrawOutcome {
    /// Rarest tier in the draw.
    #[must_use]
    pub fn best_rarity(&self) -> Option<Rarity> {
        self.rarities.iter().copied().max()
    }
}

/// Aggregate results of [`DrawEngine::simulate`].
#[derive(Clone, Debug, Default)]
pub struct DrawStatistics {
    /// Draws performed.
    pub draws: u64,
    /// Draws flagged as jackpot.
    pub jackpots: u64,
    /// Drawn items per tier.
    pub rarity_counts: BTreeMap<Rarity, u64>,
}

impl DrawStatistics {
    /// Share of drawn items that landed in `rarity`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rarity_share(&self, rarity: Rarity) -> f64 {
        let total: u64 = self.rarity_counts.values().sum();
        if total == 0 {
            return 0.0;
        }
        self.rarity_counts.get(&rarity).copied().unwrap_or(0) as f64 / total as f64
    }
}

/// The draw engine.
///
/// Cheap to share: holds the catalog behind an `Arc` and locks each generator
/// only for the duration of one draw.
pub struct DrawEngine {
    catalog: Arc<Catalog>,
    tier_rng: Mutex<StdRng>,
    item_rng: Mutex<ChaCha20Rng>,
}

impl std::fmt::Debug for DrawEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawEngine")
            .field("pools", &self.catalog.pool_ids())
            .finish_non_exhaustive()
    }
}

impl DrawEngine {
    /// Creates an engine seeded from OS entropy.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            tier_rng: Mutex::new(StdRng::from_entropy()),
            item_rng: Mutex::new(ChaCha20Rng::from_entropy()),
        }
    }

    /// Creates a deterministic engine.
    #[must_use]
    pub fn with_seed(catalog: Arc<Catalog>, seed: u64) -> Self {
        Self {
            catalog,
            tier_rng: Mutex::new(StdRng::seed_from_u64(seed)),
            item_rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed ^ ITEM_SEED_MIX)),
        }
    }

    /// The catalog this engine draws from.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Performs one draw from `pool`.
    pub fn draw(&self, pool: PoolId) -> DrawResult<DrawOutcome> {
        let table = self.catalog.pool(pool).ok_or(DrawError::UnknownPool(pool))?;
        let config = table.config();
        if config.items_per_draw == 0 {
            return Err(DrawError::PoolConfiguration {
                pool,
                reason: "items_per_draw is zero".to_string(),
            });
        }

        let mut tier_rng = self.tier_rng.lock();
        let mut item_rng = self.item_rng.lock();

        let is_jackpot =
            config.jackpot_probability > 0.0 && tier_rng.gen::<f64>() < config.jackpot_probability;

        let slots = config.items_per_draw as usize;
        let mut items = Vec::with_capacity(slots);
        let mut rarities = Vec::with_capacity(slots);

        for _ in 0..slots {
            let tier = if is_jackpot {
                sample_restricted(table, config.jackpot_min_tier, &mut *tier_rng)?
            } else {
                sample_open(table, &mut *tier_rng)?
            };
            items.push(pick_item(table, tier, &mut *item_rng)?);
            rarities.push(tier);
        }

        if !is_jackpot && !rarities.iter().any(|r| *r >= config.min_guaranteed_tier) {
            let tier = sample_restricted(table, config.min_guaranteed_tier, &mut *tier_rng)?;
            let item = pick_item(table, tier, &mut *item_rng)?;
            // Only the last slot is ever overwritten.
            if let (Some(last_item), Some(last_tier)) = (items.last_mut(), rarities.last_mut()) {
                *last_item = item;
                *last_tier = tier;
            }
        }

        Ok(DrawOutcome {
            pool,
            items,
            rarities,
            is_jackpot,
        })
    }

    /// Runs `draws` draws and aggregates tier counts, for balance checks.
    pub fn simulate(&self, pool: PoolId, draws: u32) -> DrawResult<DrawStatistics> {
        let mut stats = DrawStatistics::default();
        for _ in 0..draws {
            let outcome = self.draw(pool)?;
            stats.draws += 1;
            if outcome.is_jackpot {
                stats.jackpots += 1;
            }
            for rarity in outcome.rarities {
                *stats.rarity_counts.entry(rarity).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }
}

/// Cumulative sampling over every positive tier, rarest first.
fn sample_open(table: &PoolTable, rng: &mut impl Rng) -> DrawResult<Rarity> {
    let tiers = table.tiers_rarest_first();
    let roll: f64 = rng.gen();

    let mut cumulative = 0.0;
    for tier in tiers.iter().filter(|t| t.probability > 0.0) {
        cumulative += tier.probability;
        if roll < cumulative {
            return Ok(tier.rarity);
        }
    }

    // Shortfall: the least-rare configured tier absorbs the remainder.
    tiers.last().map(|t| t.rarity).ok_or_else(|| DrawError::PoolConfiguration {
        pool: table.config().id,
        reason: "no tiers configured".to_string(),
    })
}

/// Sampling over tiers at or above `min`, renormalized.
fn sample_restricted(table: &PoolTable, min: Rarity, rng: &mut impl Rng) -> DrawResult<Rarity> {
    let eligible: Vec<_> = table
        .tiers_rarest_first()
        .iter()
        .filter(|t| t.rarity >= min && t.probability > 0.0)
        .collect();

    let Some(fallback) = eligible.last() else {
        return Err(DrawError::PoolConfiguration {
            pool: table.config().id,
            reason: format!("no tier at or above {min} has positive probability"),
        });
    };

    let total: f64 = eligible.iter().map(|t| t.probability).sum();
    let roll = rng.gen::<f64>() * total;

    let mut cumulative = 0.0;
    for tier in &eligible {
        cumulative += tier.probability;
        if roll < cumulative {
            return Ok(tier.rarity);
        }
    }
    Ok(fallback.rarity)
}

fn pick_item(table: &PoolTable, tier: Rarity, rng: &mut impl Rng) -> DrawResult<ItemId> {
    let members = table.members(tier);
    if members.is_empty() {
        return Err(DrawError::empty_tier(table.config().id, tier));
    }
    Ok(members[rng.gen_range(0..members.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, PoolConfig, TierConfig};

    fn tier(rarity: Rarity, probability: f64) -> TierConfig {
        TierConfig {
            rarity,
            probability,
            display_name: rarity.as_str().to_uppercase(),
        }
    }

    fn item(id: ItemId, rarity: Rarity) -> CatalogItem {
        CatalogItem {
            id,
            name: format!("item-{id}"),
            rarity,
            pool: 1,
        }
    }

    fn pool(items_per_draw: u32, jackpot_probability: f64) -> PoolConfig {
        PoolConfig {
            id: 1,
            name: "Standard".to_string(),
            items_per_draw,
            min_guaranteed_tier: Rarity::Rare,
            jackpot_probability,
            jackpot_min_tier: Rarity::Epic,
            tiers: vec![
                tier(Rarity::Common, 0.70),
                tier(Rarity::Rare, 0.20),
                tier(Rarity::Epic, 0.08),
                tier(Rarity::Legendary, 0.02),
            ],
        }
    }

    fn items() -> Vec<CatalogItem> {
        vec![
            item(1, Rarity::Common),
            item(2, Rarity::Common),
            item(3, Rarity::Common),
            item(10, Rarity::Rare),
            item(11, Rarity::Rare),
            item(20, Rarity::Epic),
            item(30, Rarity::Legendary),
        ]
    }

    fn engine(items_per_draw: u32, jackpot_probability: f64) -> DrawEngine {
        let catalog = Catalog::from_parts(vec![pool(items_per_draw, jackpot_probability)], items()).unwrap();
        DrawEngine::with_seed(Arc::new(catalog), 0xDEC0DE)
    }

    #[test]
    fn test_draw_count_and_membership() {
        let engine = engine(5, 0.05);
        let table = engine.catalog().pool(1).unwrap();
        for _ in 0..2_000 {
            let outcome = engine.draw(1).unwrap();
            assert_eq!(outcome.items.len(), 5);
            assert_eq!(outcome.rarities.len(), 5);
            assert!(outcome.items.iter().all(|id| table.contains(*id)));
        }
    }

    #[test]
    fn test_rarities_match_items() {
        let engine = engine(5, 0.05);
        let catalog = Arc::clone(engine.catalog());
        for _ in 0..500 {
            let outcome = engine.draw(1).unwrap();
            for (id, rarity) in outcome.items.iter().zip(&outcome.rarities) {
                assert_eq!(catalog.item(*id).unwrap().rarity, *rarity);
            }
        }
    }

    #[test]
    fn test_guarantee_holds_for_non_jackpot() {
        let engine = engine(5, 0.0);
        for _ in 0..5_000 {
            let outcome = engine.draw(1).unwrap();
            assert!(!outcome.is_jackpot);
            assert!(outcome.best_rarity().unwrap() >= Rarity::Rare);
        }
    }

    #[test]
    fn test_only_last_slot_is_fixed_up() {
        // With a single slot the fix-up must still land, and only there.
        let engine = engine(1, 0.0);
        for _ in 0..2_000 {
            let outcome = engine.draw(1).unwrap();
            assert!(outcome.rarities[0] >= Rarity::Rare);
        }

        // With many slots, every slot but the last keeps its open-sampled tier,
        // so commons still dominate the leading slots.
        let engine = self::engine(5, 0.0);
        let mut leading_commons = 0u32;
        for _ in 0..2_000 {
            let outcome = engine.draw(1).unwrap();
            leading_commons += outcome.rarities[..4]
                .iter()
                .filter(|r| **r == Rarity::Common)
                .count() as u32;
        }
        assert!(leading_commons > 4_000, "leading commons: {leading_commons}");
    }

    #[test]
    fn test_jackpot_floor() {
        let engine = engine(5, 1.0);
        for _ in 0..2_000 {
            let outcome = engine.draw(1).unwrap();
            assert!(outcome.is_jackpot);
            assert!(outcome.rarities.iter().all(|r| *r >= Rarity::Epic));
        }
    }

    #[test]
    fn test_unknown_pool() {
        let engine = engine(5, 0.0);
        assert_eq!(engine.draw(99), Err(DrawError::UnknownPool(99)));
    }

    #[test]
    fn test_empty_required_tier_is_configuration_error() {
        // Built without validation: legendary has weight but no items, and it is
        // the only tier at or above the jackpot floor.
        let mut config = pool(3, 1.0);
        config.jackpot_min_tier = Rarity::Legendary;
        let items: Vec<_> = items().into_iter().filter(|i| i.rarity != Rarity::Legendary).collect();
        let engine = DrawEngine::with_seed(Arc::new(Catalog::assemble(vec![config], items)), 7);

        let err = engine.draw(1).unwrap_err();
        assert_eq!(err, DrawError::empty_tier(1, Rarity::Legendary));
    }

    #[test]
    fn test_unreachable_floor_is_configuration_error() {
        let mut config = pool(3, 1.0);
        config.jackpot_min_tier = Rarity::Mythic;
        let engine = DrawEngine::with_seed(Arc::new(Catalog::assemble(vec![config], items())), 7);

        assert!(matches!(engine.draw(1), Err(DrawError::PoolConfiguration { pool: 1, .. })));
    }

    #[test]
    fn test_seeded_engines_agree() {
        let a = engine(5, 0.1);
        let b = engine(5, 0.1);
        for _ in 0..100 {
            assert_eq!(a.draw(1).unwrap(), b.draw(1).unwrap());
        }
    }

    #[test]
    fn test_simulate_tracks_distribution() {
        let engine = engine(5, 0.0);
        let stats = engine.simulate(1, 10_000).unwrap();
        assert_eq!(stats.draws, 10_000);
        assert_eq!(stats.jackpots, 0);
        assert_eq!(stats.rarity_counts.values().sum::<u64>(), 50_000);

        // 70% common per slot, minus the all-common draws the guarantee fixes.
        let common = stats.rarity_share(Rarity::Common);
        assert!((0.60..0.72).contains(&common), "common share {common}");
        assert_eq!(stats.rarity_counts.get(&Rarity::Mythic), None);
    }
}
