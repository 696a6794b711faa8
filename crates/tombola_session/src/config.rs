//! # Session Configuration
//!
//! Loaded from the `[session]` section of the game config. Every field has a
//! default; [`SessionConfig::validate`] runs before a hub is built.
//!
//! ```toml
//! [session]
//! narrative_timeout_ms = 15000
//! message_trigger_chance = 0.002
//!
//! [session.raid]
//! duration_ms = 180000
//! progress_interval_ms = 30000
//! themes = [{ name = "Sunken Vault", reward_item = 900 }]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tombola_economy::ItemId;

use crate::error::{SessionError, SessionResult};
use crate::narrative::VerdictLimits;

/// The two event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Boss-style event; also grants the theme's reward item.
    Raid,
    /// Exploration event; currency only.
    Expedition,
}

impl SessionKind {
    /// Both kinds.
    pub const ALL: [Self; 2] = [Self::Raid, Self::Expedition];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raid => "raid",
            Self::Expedition => "expedition",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flavor for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Shown in announcements and the prompt.
    pub name: String,
    /// Item granted to every raid participant.
    #[serde(default)]
    pub reward_item: Option<ItemId>,
}

impl Theme {
    /// A theme without a reward item.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reward_item: None,
        }
    }
}

/// Timing and flavor of one event kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindConfig {
    /// Join window length.
    pub duration_ms: u64,
    /// Progress broadcast period. Must be shorter than the duration.
    pub progress_interval_ms: u64,
    /// How often the scheduler rolls for a new session.
    pub schedule_interval_ms: u64,
    /// Chance per scheduler roll.
    pub schedule_chance: f64,
    /// Candidate themes, picked uniformly.
    pub themes: Vec<Theme>,
}

/// Fills fields missing from a partial `[session.<kind>]` table.
impl Default for KindConfig {
    fn default() -> Self {
        Self {
            duration_ms: 180_000,
            progress_interval_ms: 30_000,
            schedule_interval_ms: 3_600_000,
            schedule_chance: 0.25,
            themes: vec![Theme::named("Uncharted Ruins")],
        }
    }
}

impl KindConfig {
    fn defaults(kind: SessionKind) -> Self {
        let themes = match kind {
            SessionKind::Raid => vec![Theme::named("Sunken Vault"), Theme::named("Ember Keep")],
            SessionKind::Expedition => vec![Theme::named("Glass Dunes"), Theme::named("Hollow Reef")],
        };
        Self {
            themes,
            ..Self::default()
        }
    }

    /// Join window length.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Progress broadcast period.
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Scheduler period.
    #[must_use]
    pub const fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    fn validate(&self, kind: SessionKind) -> SessionResult<()> {
        let invalid = |msg: String| Err(SessionError::InvalidConfig(format!("{kind}: {msg}")));
        if self.duration_ms == 0 {
            return invalid("duration_ms must be positive".to_string());
        }
        if self.progress_interval_ms == 0 || self.progress_interval_ms >= self.duration_ms {
            return invalid(format!(
                "progress_interval_ms {} must be positive and shorter than duration_ms {}",
                self.progress_interval_ms, self.duration_ms
            ));
        }
        if self.schedule_interval_ms == 0 {
            return invalid("schedule_interval_ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.schedule_chance) {
            return invalid("schedule_chance must be in [0, 1]".to_string());
        }
        if self.themes.is_empty() {
            return invalid("at least one theme is required".to_string());
        }
        Ok(())
    }
}

/// Session hub tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on one narrative call.
    pub narrative_timeout_ms: u64,
    /// Upper bound on one ledger call made from async code.
    pub ledger_timeout_ms: u64,
    /// Chance that a community message starts a session.
    pub message_trigger_chance: f64,
    /// Smallest fallback reward.
    pub fallback_reward_min: u64,
    /// Largest fallback reward.
    pub fallback_reward_max: u64,
    /// Largest reward the narrative service may award.
    pub reward_cap: u64,
    /// Narrative character cap.
    pub narrative_max_chars: usize,
    /// Narrative word cap.
    pub narrative_max_words: usize,
    /// Capacity of the broadcast channel.
    pub broadcast_capacity: usize,
    /// Raid timing and themes.
    pub raid: KindConfig,
    /// Expedition timing and themes.
    pub expedition: KindConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            narrative_timeout_ms: 15_000,
            ledger_timeout_ms: 5_000,
            message_trigger_chance: 0.002,
            fallback_reward_min: 50,
            fallback_reward_max: 300,
            reward_cap: 1_000,
            narrative_max_chars: 600,
            narrative_max_words: 100,
            broadcast_capacity: 256,
            raid: KindConfig::defaults(SessionKind::Raid),
            expedition: KindConfig::defaults(SessionKind::Expedition),
        }
    }
}

impl SessionConfig {
    /// Settings for one kind.
    #[must_use]
    pub const fn kind(&self, kind: SessionKind) -> &KindConfig {
        match kind {
            SessionKind::Raid => &self.raid,
            SessionKind::Expedition => &self.expedition,
        }
    }

    /// Narrative call timeout.
    #[must_use]
    pub const fn narrative_timeout(&self) -> Duration {
        Duration::from_millis(self.narrative_timeout_ms)
    }

    /// Ledger call timeout.
    #[must_use]
    pub const fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    /// Caps applied when parsing a verdict.
    #[must_use]
    pub const fn verdict_limits(&self) -> VerdictLimits {
        VerdictLimits {
            max_chars: self.narrative_max_chars,
            max_words: self.narrative_max_words,
            reward_cap: self.reward_cap,
        }
    }

    /// Checks every cross-field rule.
    pub fn validate(&self) -> SessionResult<()> {
        let invalid = |msg: &str| Err(SessionError::InvalidConfig(msg.to_string()));
        if self.fallback_reward_min > self.fallback_reward_max {
            return invalid("fallback_reward_min exceeds fallback_reward_max");
        }
        if self.fallback_reward_max > self.reward_cap {
            return invalid("fallback_reward_max exceeds reward_cap");
        }
        if !(0.0..=1.0).contains(&self.message_trigger_chance) {
            return invalid("message_trigger_chance must be in [0, 1]");
        }
        if self.narrative_max_chars == 0 || self.narrative_max_words == 0 {
            return invalid("narrative caps must be positive");
        }
        if self.broadcast_capacity == 0 {
            return invalid("broadcast_capacity must be positive");
        }
        for kind in SessionKind::ALL {
            self.kind(kind).validate(kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_progress_must_be_shorter_than_duration() {
        let mut config = SessionConfig::default();
        config.expedition.progress_interval_ms = config.expedition.duration_ms;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(msg) if msg.starts_with("expedition")));
    }

    #[test]
    fn test_fallback_must_fit_under_cap() {
        let config = SessionConfig {
            fallback_reward_max: 5_000,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_kind_table_keeps_other_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"raid": {"duration_ms": 60000, "progress_interval_ms": 5000}}"#)
                .unwrap();
        assert_eq!(config.raid.duration_ms, 60_000);
        assert_eq!(config.raid.themes, vec![Theme::named("Uncharted Ruins")]);
        assert_eq!(config.expedition, KindConfig::defaults(SessionKind::Expedition));
        config.validate().unwrap();
    }

    #[test]
    fn test_themes_required() {
        let mut config = SessionConfig::default();
        config.raid.themes.clear();
        assert!(config.validate().is_err());
    }
}
