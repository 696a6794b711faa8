//! # Session Error Types
//!
//! - [`SessionError`]: refusals of the state machine plus ledger failures seen
//!   while talking to it from async code.
//! - [`NarrativeError`]: everything that can go wrong with the narrative
//!   service. Never escapes resolution; it selects the fallback path.

use thiserror::Error;
use tombola_economy::LedgerError;

use crate::config::SessionKind;

/// Errors returned by the session hub.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A session of some kind is already announced or resolving.
    #[error("a {active} is already running; wait for it to finish")]
    AlreadyActive {
        /// Kind of the running session.
        active: SessionKind,
    },

    /// Nothing to join.
    #[error("no event is running right now")]
    NoActiveSession,

    /// The running session has begun resolving.
    #[error("the event is already being resolved; joins are closed")]
    ResolutionStarted,

    /// The join window has passed.
    #[error("the join window for this event has closed")]
    JoinWindowClosed,

    /// The participant has no owned items in their loadout.
    #[error("set a loadout of items you own before joining")]
    NoEligibleLoadout,

    /// A ledger call failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A ledger call did not finish within the configured timeout.
    #[error("ledger did not respond in time")]
    LedgerTimeout,

    /// The blocking ledger task died.
    #[error("ledger task failed: {0}")]
    LedgerTask(String),

    /// The hub was created outside a tokio runtime.
    #[error("session hub requires a running tokio runtime")]
    NoRuntime,

    /// Invalid session configuration.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Returns true for expected, user-facing refusals.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        match self {
            Self::AlreadyActive { .. }
            | Self::NoActiveSession
            | Self::ResolutionStarted
            | Self::JoinWindowClosed
            | Self::NoEligibleLoadout => true,
            Self::Ledger(e) => e.is_rejection(),
            Self::LedgerTimeout | Self::LedgerTask(_) | Self::NoRuntime | Self::InvalidConfig(_) => {
                false
            }
        }
    }
}

/// Errors from the narrative service boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NarrativeError {
    /// The request never got a response.
    #[error("narrative transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("narrative service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The call exceeded its timeout.
    #[error("narrative service timed out")]
    Timeout,

    /// The response did not match the verdict contract.
    #[error("malformed narrative response: {0}")]
    Malformed(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
