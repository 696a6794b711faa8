//! # Game Configuration
//!
//! One TOML file, loaded once at startup. Every field has a default, so an
//! empty file is a valid (if dull) configuration.
//!
//! ```toml
//! catalog_path = "config/catalog.toml"
//! operators = [1234567890]
//!
//! [ledger]
//! data_dir = "data/ledger"
//! utc_offset_minutes = 540
//!
//! [rewards]
//! min_message_length = 10
//! message_cooldown_ms = 60000
//! daily_pool = 1
//!
//! [session.raid]
//! duration_ms = 180000
//!
//! [narrator]
//! endpoint = "http://localhost:8080/v1/chat/completions"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tombola_economy::{LedgerConfig, PoolId};
use tombola_session::{NarratorConfig, SessionConfig};

use crate::error::ConfigError;

/// `[ledger]` section: where records live plus the ledger tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Directory of per-participant record files.
    pub data_dir: PathBuf,
    /// Ledger tuning.
    #[serde(flatten)]
    pub settings: LedgerConfig,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/ledger"),
            settings: LedgerConfig::default(),
        }
    }
}

/// `[rewards]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Shorter messages earn nothing.
    pub min_message_length: usize,
    /// Minimum gap between two message rewards.
    pub message_cooldown_ms: u64,
    /// Pool used by the free daily draw.
    pub daily_pool: PoolId,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            min_message_length: 10,
            message_cooldown_ms: 60_000,
            daily_pool: 1,
        }
    }
}

impl RewardsConfig {
    /// Message reward cooldown.
    #[must_use]
    pub const fn message_cooldown(&self) -> Duration {
        Duration::from_millis(self.message_cooldown_ms)
    }
}

/// The whole process configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Item catalog file.
    pub catalog_path: PathBuf,
    /// Ledger storage and tuning.
    pub ledger: LedgerSection,
    /// Passive and daily rewards.
    pub rewards: RewardsConfig,
    /// Session hub.
    pub session: SessionConfig,
    /// Narrative service connection.
    pub narrator: NarratorConfig,
    /// Participant ids allowed to run privileged commands.
    pub operators: Vec<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("config/catalog.toml"),
            ledger: LedgerSection::default(),
            rewards: RewardsConfig::default(),
            session: SessionConfig::default(),
            narrator: NarratorConfig::default(),
            operators: Vec::new(),
        }
    }
}

impl GameConfig {
    /// Loads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates config text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ledger = &self.ledger.settings;
        ledger
            .reference_offset()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if ledger.message_reward_min > ledger.message_reward_max {
            return Err(ConfigError::Invalid(
                "ledger.message_reward_min exceeds ledger.message_reward_max".to_string(),
            ));
        }
        if self.rewards.min_message_length == 0 {
            return Err(ConfigError::Invalid(
                "rewards.min_message_length must be at least 1".to_string(),
            ));
        }
        self.session
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
