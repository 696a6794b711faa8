//! # Game Error Types
//!
//! - [`ConfigError`]: bad process configuration. Fatal at startup.
//! - [`StartupError`]: anything that stops the server from coming up.
//! - [`CommandError`]: what a command hands back to the chat layer. Its
//!   `Display` text is shown to the participant as-is.

use thiserror::Error;
use tombola_economy::{CatalogError, DrawError, LedgerError, PoolId, StoreError};
use tombola_session::SessionError;

/// Errors raised while loading the game configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {reason}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying IO error text.
        reason: String,
    },

    /// The config file is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// The config parsed but a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that abort startup.
#[derive(Error, Debug)]
pub enum StartupError {
    /// Process configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Item catalog.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Ledger storage.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ledger settings.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Session hub.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failures returned by [`GameCore`](crate::commands::GameCore) commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Today's free draw was already taken.
    #[error("you already claimed today's free draw; come back tomorrow")]
    DailyAlreadyClaimed,

    /// The caller is not an operator.
    #[error("only operators can do that")]
    NotAuthorized,

    /// No such pool in the catalog.
    #[error("there is no pool {0}")]
    UnknownPool(PoolId),

    /// Ledger rejection or failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A ledger call did not finish within the configured timeout.
    #[error("the ledger did not respond in time; try again shortly")]
    LedgerTimeout,

    /// The blocking ledger task died.
    #[error("ledger task failed: {0}")]
    LedgerTask(String),

    /// Session refusal or failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The draw could not be made.
    #[error("the draw failed: {0}")]
    Draw(#[from] DrawError),
}

impl CommandError {
    /// True when the participant did something the rules refuse, as opposed to
    /// the system failing.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        match self {
            Self::DailyAlreadyClaimed | Self::NotAuthorized | Self::UnknownPool(_) => true,
            Self::Ledger(e) => e.is_rejection(),
            Self::Session(e) => e.is_rejection(),
            Self::LedgerTimeout | Self::LedgerTask(_) | Self::Draw(_) => false,
        }
    }
}

/// Result type for commands.
pub type CommandResult<T> = Result<T, CommandError>;
