//! # Catalog
//!
//! Static item and pool data, loaded once at startup and never mutated.
//!
//! ## Format
//!
//! ```toml
//! [[pools]]
//! id = 1
//! name = "Standard"
//! items_per_draw = 5
//! min_guaranteed_tier = "rare"
//! jackpot_probability = 0.01
//! jackpot_min_tier = "epic"
//! tiers = [
//!     { rarity = "epic", probability = 0.05, display_name = "Epic" },
//!     { rarity = "rare", probability = 0.25, display_name = "Rare" },
//!     { rarity = "common", probability = 0.70, display_name = "Common" },
//! ]
//!
//! [[items]]
//! id = 100
//! name = "Copper Cat"
//! rarity = "common"
//! pool = 1
//! ```
//!
//! Everything a draw relies on is checked here. A catalog that loads is a
//! catalog every pool of which can be drawn from.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::CatalogError;

/// Unique identifier for an item type.
pub type ItemId = u32;

/// Unique identifier for a draw pool.
pub type PoolId = u32;

/// Slack allowed when checking that tier probabilities do not exceed 1.
const PROBABILITY_EPSILON: f64 = 1e-9;

/// Rarity tier for items.
///
/// Ordered from most common to rarest, so "at least as rare as X" is `tier >= X`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Rarity {
    /// Common items (gray)
    Common = 0,
    /// Uncommon items (green)
    Uncommon = 1,
    /// Rare items (blue)
    Rare = 2,
    /// Epic items (purple)
    Epic = 3,
    /// Legendary items (orange)
    Legendary = 4,
    /// Mythic items (red)
    Mythic = 5,
}

impl Rarity {
    /// Every tier, rarest first.
    pub const RAREST_FIRST: [Self; 6] = [
        Self::Mythic,
        Self::Legendary,
        Self::Epic,
        Self::Rare,
        Self::Uncommon,
        Self::Common,
    ];

    /// Lowercase name, matching the TOML spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
            Self::Mythic => "mythic",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Unique identifier.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Rarity tier.
    pub rarity: Rarity,
    /// Pool this item is drawn from.
    pub pool: PoolId,
}

/// Per-pool probability and label of one rarity tier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// The tier.
    pub rarity: Rarity,
    /// Chance of this tier per slot, in [0, 1].
    pub probability: f64,
    /// Label shown to participants.
    pub display_name: String,
}

/// Draw rules for one pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Unique identifier.
    pub id: PoolId,
    /// Display name.
    pub name: String,
    /// Items produced by one draw.
    pub items_per_draw: u32,
    /// At least one item of this tier or rarer in every non-jackpot draw.
    pub min_guaranteed_tier: Rarity,
    /// Chance that a draw is a jackpot, in [0, 1].
    #[serde(default)]
    pub jackpot_probability: f64,
    /// Every item of a jackpot draw is this tier or rarer.
    pub jackpot_min_tier: Rarity,
    /// Tier probabilities for this pool.
    pub tiers: Vec<TierConfig>,
}

/// A pool with its members indexed by tier.
#[derive(Clone, Debug)]
pub struct PoolTable {
    config: PoolConfig,
    /// Tiers sorted rarest first.
    tiers: Vec<TierConfig>,
    members: BTreeMap<Rarity, Vec<ItemId>>,
}

impl PoolTable {
    /// The pool's configuration as loaded.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Tier table, rarest first.
    #[must_use]
    pub fn tiers_rarest_first(&self) -> &[TierConfig] {
        &self.tiers
    }

    /// Items of the given tier in this pool.
    #[must_use]
    pub fn members(&self, rarity: Rarity) -> &[ItemId] {
        self.members.get(&rarity).map_or(&[], Vec::as_slice)
    }

    /// True when the pool contains `item`.
    #[must_use]
    pub fn contains(&self, item: ItemId) -> bool {
        self.members.values().any(|ids| ids.contains(&item))
    }

    /// Display name for a tier, falling back to the lowercase rarity name.
    #[must_use]
    pub fn tier_label(&self, rarity: Rarity) -> &str {
        self.tiers
            .iter()
            .find(|t| t.rarity == rarity)
            .map_or(rarity.as_str(), |t| t.display_name.as_str())
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    pools: Vec<PoolConfig>,
    #[serde(default)]
    items: Vec<CatalogItem>,
}

/// The immutable item/pool catalog.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    items: HashMap<ItemId, CatalogItem>,
    pools: HashMap<PoolId, PoolTable>,
}

impl Catalog {
    /// Loads and validates a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a catalog from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::from_parts(file.pools, file.items)
    }

    /// Builds a catalog from already-parsed parts, validating every pool.
    pub fn from_parts(pools: Vec<PoolConfig>, items: Vec<CatalogItem>) -> Result<Self, CatalogError> {
        validate(&pools, &items)?;
        Ok(Self::assemble(pools, items))
    }

    /// Indexes parts without validation.
    pub(crate) fn assemble(pools: Vec<PoolConfig>, items: Vec<CatalogItem>) -> Self {
        let mut tables: HashMap<PoolId, PoolTable> = pools
            .into_iter()
            .map(|config| {
                let mut tiers = config.tiers.clone();
                tiers.sort_by(|a, b| b.rarity.cmp(&a.rarity));
                let table = PoolTable {
                    config,
                    tiers,
                    members: BTreeMap::new(),
                };
                (table.config.id, table)
            })
            .collect();

        let mut by_id = HashMap::with_capacity(items.len());
        for item in items {
            if let Some(table) = tables.get_mut(&item.pool) {
                table.members.entry(item.rarity).or_default().push(item.id);
            }
            by_id.insert(item.id, item);
        }

        Self {
            items: by_id,
            pools: tables,
        }
    }

    /// Looks up an item.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&CatalogItem> {
        self.items.get(&id)
    }

    /// Looks up a pool.
    #[must_use]
    pub fn pool(&self, id: PoolId) -> Option<&PoolTable> {
        self.pools.get(&id)
    }

    /// All pool ids, sorted.
    #[must_use]
    pub fn pool_ids(&self) -> Vec<PoolId> {
        let mut ids: Vec<_> = self.pools.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of items in the catalog.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

fn validate(pools: &[PoolConfig], items: &[CatalogItem]) -> Result<(), CatalogError> {
    let invalid = |msg: String| Err(CatalogError::Invalid(msg));

    let mut pool_ids = HashSet::new();
    for pool in pools {
        if !pool_ids.insert(pool.id) {
            return invalid(format!("duplicate pool id {}", pool.id));
        }
    }

    let mut item_ids = HashSet::new();
    let mut populated: HashSet<(PoolId, Rarity)> = HashSet::new();
    for item in items {
        if !item_ids.insert(item.id) {
            return invalid(format!("duplicate item id {}", item.id));
        }
        if !pool_ids.contains(&item.pool) {
            return invalid(format!("item {} references unknown pool {}", item.id, item.pool));
        }
        populated.insert((item.pool, item.rarity));
    }

    for pool in pools {
        let id = pool.id;
        if pool.items_per_draw == 0 {
            return invalid(format!("pool {id}: items_per_draw must be at least 1"));
        }
        if !(0.0..=1.0).contains(&pool.jackpot_probability) {
            return invalid(format!("pool {id}: jackpot_probability must be in [0, 1]"));
        }

        let mut seen = HashSet::new();
        let mut total = 0.0;
        for tier in &pool.tiers {
            if !seen.insert(tier.rarity) {
                return invalid(format!("pool {id}: tier {} listed twice", tier.rarity));
            }
            if !(0.0..=1.0).contains(&tier.probability) {
                return invalid(format!("pool {id}: tier {} probability out of range", tier.rarity));
            }
            if tier.probability > 0.0 && !populated.contains(&(id, tier.rarity)) {
                return invalid(format!("pool {id}: tier {} has probability but no items", tier.rarity));
            }
            total += tier.probability;
        }
        if total > 1.0 + PROBABILITY_EPSILON {
            return invalid(format!("pool {id}: tier probabilities sum to {total}, above 1"));
        }

        // The implicit fallback tier must be drawable.
        match pool.tiers.iter().map(|t| t.rarity).min() {
            None => return invalid(format!("pool {id}: no tiers configured")),
            Some(least) if !populated.contains(&(id, least)) => {
                return invalid(format!("pool {id}: fallback tier {least} has no items"));
            }
            Some(_) => {}
        }

        for (label, floor) in [
            ("min_guaranteed_tier", pool.min_guaranteed_tier),
            ("jackpot_min_tier", pool.jackpot_min_tier),
        ] {
            let reachable = pool
                .tiers
                .iter()
                .any(|t| t.rarity >= floor && t.probability > 0.0);
            if !reachable {
                return invalid(format!(
                    "pool {id}: {label} {floor} has no tier at or above it with positive probability"
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[pools]]
        id = 1
        name = "Standard"
        items_per_draw = 5
        min_guaranteed_tier = "rare"
        jackpot_probability = 0.01
        jackpot_min_tier = "epic"
        tiers = [
            { rarity = "common", probability = 0.70, display_name = "Common" },
            { rarity = "rare", probability = 0.25, display_name = "Rare" },
            { rarity = "epic", probability = 0.05, display_name = "Epic" },
        ]

        [[items]]
        id = 100
        name = "Copper Cat"
        rarity = "common"
        pool = 1

        [[items]]
        id = 200
        name = "Silver Fox"
        rarity = "rare"
        pool = 1

        [[items]]
        id = 300
        name = "Golden Owl"
        rarity = "epic"
        pool = 1
    "#;

    #[test]
    fn test_parse_sample() {
        let catalog = Catalog::from_toml_str(SAMPLE).unwrap();
        assert_eq!(catalog.item_count(), 3);

        let pool = catalog.pool(1).unwrap();
        let order: Vec<_> = pool.tiers_rarest_first().iter().map(|t| t.rarity).collect();
        assert_eq!(order, vec![Rarity::Epic, Rarity::Rare, Rarity::Common]);
        assert_eq!(pool.members(Rarity::Rare), &[200]);
        assert!(pool.contains(300));
        assert_eq!(pool.tier_label(Rarity::Epic), "Epic");
        assert_eq!(pool.tier_label(Rarity::Mythic), "mythic");
    }

    #[test]
    fn test_rarity_order() {
        assert!(Rarity::Mythic > Rarity::Legendary);
        assert!(Rarity::Uncommon > Rarity::Common);
        assert_eq!(Rarity::RAREST_FIRST[0], Rarity::Mythic);
    }

    #[test]
    fn test_rejects_probability_above_one() {
        let text = SAMPLE.replace("probability = 0.70", "probability = 0.90");
        let err = Catalog::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(msg) if msg.contains("above 1")));
    }

    #[test]
    fn test_rejects_empty_weighted_tier() {
        let text = SAMPLE.replace("rarity = \"epic\"\n        pool = 1", "rarity = \"rare\"\n        pool = 1");
        let err = Catalog::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(msg) if msg.contains("no items")));
    }

    #[test]
    fn test_rejects_unreachable_jackpot_tier() {
        let text = SAMPLE.replace("jackpot_min_tier = \"epic\"", "jackpot_min_tier = \"mythic\"");
        let err = Catalog::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(msg) if msg.contains("jackpot_min_tier")));
    }

    #[test]
    fn test_rejects_unknown_pool_reference() {
        let text = SAMPLE.replacen("pool = 1", "pool = 9", 1);
        let err = Catalog::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(msg) if msg.contains("unknown pool 9")));
    }

    #[test]
    fn test_rejects_zero_items_per_draw() {
        let text = SAMPLE.replace("items_per_draw = 5", "items_per_draw = 0");
        assert!(Catalog::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = Catalog::from_toml_str("[[pools]]\nid = \"one\"").unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }
}
