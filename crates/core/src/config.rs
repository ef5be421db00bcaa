//! Game rule configuration.
//!
//! All tunable constants of the conquest rules live here so that the stake
//! scale and the tie-break policy are configuration rather than hard-coded
//! assumptions. Values load from TOML; missing keys fall back to defaults.

use serde::{Deserialize, Serialize};
#[cfg(feature = "config-file")]
use std::path::Path;
use thiserror::Error;

use crate::grid::Realm;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[cfg(feature = "config-file")]
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Who wins when attack and defense power are equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    Defender,
    Attacker,
}

/// Minimum claim stake per realm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmMinimums {
    #[serde(default = "default_qlx_minimum")]
    pub qlx: u64,
    #[serde(default = "default_qly_minimum")]
    pub qly: u64,
    #[serde(default = "default_qlz_minimum")]
    pub qlz: u64,
}

impl RealmMinimums {
    pub fn for_realm(&self, realm: Realm) -> u64 {
        match realm {
            Realm::Qlx => self.qlx,
            Realm::Qly => self.qly,
            Realm::Qlz => self.qlz,
        }
    }
}

impl Default for RealmMinimums {
    fn default() -> Self {
        Self {
            qlx: default_qlx_minimum(),
            qly: default_qly_minimum(),
            qlz: default_qlz_minimum(),
        }
    }
}

/// Conquest rule constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConquestConfig {
    /// Tokens per defense point before lock bonuses
    #[serde(default = "default_defense_scale")]
    pub defense_scale: u64,
    /// Defense level at which a claimed territory becomes fortified
    #[serde(default = "default_fortify_threshold")]
    pub fortify_threshold: u64,
    /// Seconds the defender has to respond to an attack
    #[serde(default = "default_contest_window_secs")]
    pub contest_window_secs: i64,
    /// Absolute floor of the minimum attack burn
    #[serde(default = "default_min_burn_floor")]
    pub min_burn_floor: u64,
    /// Minimum burn as a share of the territory's total stake, in basis points
    #[serde(default = "default_min_burn_stake_bps")]
    pub min_burn_stake_bps: u64,
    /// Minimum burn per point of defense level
    #[serde(default = "default_min_burn_per_defense_level")]
    pub min_burn_per_defense_level: u64,
    #[serde(default = "default_advantage_multiplier")]
    pub advantage_multiplier: f64,
    #[serde(default = "default_disadvantage_multiplier")]
    pub disadvantage_multiplier: f64,
    #[serde(default = "default_critical_multiplier")]
    pub critical_multiplier: f64,
    #[serde(default = "default_tie_break")]
    pub tie_break: TieBreak,
    #[serde(default)]
    pub realm_minimums: RealmMinimums,
    /// Seconds an unconfirmed burn intent stays in the journal
    #[serde(default = "default_burn_intent_ttl_secs")]
    pub burn_intent_ttl_secs: i64,
    /// Tokens staked or burned per point of nation rating
    #[serde(default = "default_rating_token_unit")]
    pub rating_token_unit: u64,
    /// Defense rating a nation earns for holding a territory against an attack
    #[serde(default = "default_defense_win_rating")]
    pub defense_win_rating: i64,
}

fn default_qlx_minimum() -> u64 {
    100_000
}

fn default_qly_minimum() -> u64 {
    250_000
}

fn default_qlz_minimum() -> u64 {
    500_000
}

fn default_defense_scale() -> u64 {
    10_000
}

fn default_fortify_threshold() -> u64 {
    100
}

fn default_contest_window_secs() -> i64 {
    24 * 60 * 60
}

fn default_min_burn_floor() -> u64 {
    10_000
}

fn default_min_burn_stake_bps() -> u64 {
    1_000
}

fn default_min_burn_per_defense_level() -> u64 {
    1_000
}

fn default_advantage_multiplier() -> f64 {
    1.5
}

fn default_disadvantage_multiplier() -> f64 {
    0.75
}

fn default_critical_multiplier() -> f64 {
    2.0
}

fn default_tie_break() -> TieBreak {
    TieBreak::Defender
}

fn default_burn_intent_ttl_secs() -> i64 {
    10 * 60
}

fn default_rating_token_unit() -> u64 {
    100_000
}

fn default_defense_win_rating() -> i64 {
    10
}

impl Default for ConquestConfig {
    fn default() -> Self {
        Self {
            defense_scale: default_defense_scale(),
            fortify_threshold: default_fortify_threshold(),
            contest_window_secs: default_contest_window_secs(),
            min_burn_floor: default_min_burn_floor(),
            min_burn_stake_bps: default_min_burn_stake_bps(),
            min_burn_per_defense_level: default_min_burn_per_defense_level(),
            advantage_multiplier: default_advantage_multiplier(),
            disadvantage_multiplier: default_disadvantage_multiplier(),
            critical_multiplier: default_critical_multiplier(),
            tie_break: default_tie_break(),
            realm_minimums: RealmMinimums::default(),
            burn_intent_ttl_secs: default_burn_intent_ttl_secs(),
            rating_token_unit: default_rating_token_unit(),
            defense_win_rating: default_defense_win_rating(),
        }
    }
}

impl ConquestConfig {
    #[cfg(feature = "config-file")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the rules degenerate
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.defense_scale == 0 {
            return Err(ConfigError::ValidationError(
                "defense_scale must be positive".to_string(),
            ));
        }
        if self.contest_window_secs <= 0 {
            return Err(ConfigError::ValidationError(
                "contest_window_secs must be positive".to_string(),
            ));
        }
        if self.min_burn_stake_bps > 10_000 {
            return Err(ConfigError::ValidationError(
                "min_burn_stake_bps cannot exceed 10000".to_string(),
            ));
        }
        for (name, value) in [
            ("advantage_multiplier", self.advantage_multiplier),
            ("disadvantage_multiplier", self.disadvantage_multiplier),
            ("critical_multiplier", self.critical_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a positive number",
                    name
                )));
            }
        }
        if self.burn_intent_ttl_secs <= 0 {
            return Err(ConfigError::ValidationError(
                "burn_intent_ttl_secs must be positive".to_string(),
            ));
        }
        if self.rating_token_unit == 0 {
            return Err(ConfigError::ValidationError(
                "rating_token_unit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Contest window as a chrono duration
    pub fn contest_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.contest_window_secs)
    }

    pub fn burn_intent_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.burn_intent_ttl_secs)
    }

    pub fn realm_minimum(&self, realm: Realm) -> u64 {
        self.realm_minimums.for_realm(realm)
    }

    /// Rating points earned by moving `amount` tokens
    pub fn rating_points(&self, amount: u64) -> i64 {
        i64::try_from(amount / self.rating_token_unit.max(1)).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConquestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.defense_scale, 10_000);
        assert_eq!(config.fortify_threshold, 100);
        assert_eq!(config.contest_window_secs, 86_400);
        assert_eq!(config.realm_minimum(Realm::Qlz), 500_000);
        assert_eq!(config.tie_break, TieBreak::Defender);
        assert_eq!(config.rating_points(250_000), 2);
        assert_eq!(config.rating_points(99_999), 0);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ConquestConfig::from_toml_str(
            r#"
            defense_scale = 5000
            tie_break = "attacker"

            [realm_minimums]
            qlx = 50000
            "#,
        )
        .unwrap();
        assert_eq!(config.defense_scale, 5000);
        assert_eq!(config.tie_break, TieBreak::Attacker);
        assert_eq!(config.realm_minimums.qlx, 50_000);
        assert_eq!(config.realm_minimums.qly, 250_000);
        assert_eq!(config.fortify_threshold, 100);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = ConquestConfig::from_toml_str("defense_scale = 0");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
