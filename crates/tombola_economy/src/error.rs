//! # Economy Error Types
//!
//! All errors that can occur in the economy system, one enum per concern:
//!
//! - [`CatalogError`]: malformed static data. Fatal at startup.
//! - [`DrawError`]: a draw against a pool that cannot honor its own rules.
//! - [`StoreError`]: the durable record store failed or returned garbage.
//! - [`LedgerError`]: expected rejections plus wrapped [`StoreError`]s.

use thiserror::Error;

use crate::catalog::{ItemId, PoolId, Rarity};
use crate::record::ParticipantId;

/// Errors raised while loading or validating the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog {path}: {reason}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying IO error text.
        reason: String,
    },

    /// The catalog file is not valid TOML for the expected schema.
    #[error("failed to parse catalog: {0}")]
    Parse(String),

    /// The catalog parsed but violates a structural rule.
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// Errors raised by the draw engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DrawError {
    /// The requested pool does not exist.
    #[error("unknown pool: {0}")]
    UnknownPool(PoolId),

    /// The pool's static data cannot satisfy the draw (a data bug, not a runtime condition).
    #[error("pool {pool} is misconfigured: {reason}")]
    PoolConfiguration {
        /// Pool being drawn from.
        pool: PoolId,
        /// What is missing.
        reason: String,
    },
}

impl DrawError {
    pub(crate) fn empty_tier(pool: PoolId, tier: Rarity) -> Self {
        Self::PoolConfiguration {
            pool,
            reason: format!("no {tier} items in pool"),
        }
    }
}

/// Errors raised by a [`RecordStore`](crate::store::RecordStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The storage medium could not be read or written.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record failed its integrity check.
    #[error("record for participant {participant} is corrupt: {reason}")]
    Corrupt {
        /// Owner of the corrupt record.
        participant: ParticipantId,
        /// What failed (magic, version, checksum, payload).
        reason: String,
    },

    /// A record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(String),
}

/// Errors that can occur in ledger operations.
///
/// Everything except [`LedgerError::Persistence`] and [`LedgerError::InvalidConfig`]
/// is an expected rejection: nothing was written and the record is untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Debit larger than the current balance.
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds {
        /// Amount requested.
        need: u64,
        /// Balance at the time of the request.
        have: u64,
    },

    /// The participant does not own the item.
    #[error("item not owned: {0}")]
    ItemNotOwned(ItemId),

    /// The participant has no unopened pack for the pool.
    #[error("no pack available for pool {0}")]
    NoPackAvailable(PoolId),

    /// Loadout exceeds the configured size.
    #[error("loadout too large: at most {max} items, got {requested}")]
    LoadoutTooLarge {
        /// Configured maximum.
        max: usize,
        /// Items requested.
        requested: usize,
    },

    /// A credit would overflow the balance.
    #[error("balance overflow")]
    BalanceOverflow,

    /// Invalid ledger configuration.
    #[error("invalid ledger configuration: {0}")]
    InvalidConfig(String),

    /// The durable write or read failed. Nothing was committed; safe to retry.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl LedgerError {
    /// Returns true for expected, user-facing rejections.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Persistence(_) | Self::InvalidConfig(_))
    }
}

/// Result type for draw operations.
pub type DrawResult<T> = Result<T, DrawError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
