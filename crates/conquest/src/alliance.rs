//! Alliance effects on combat.
//!
//! Alliance negotiation happens elsewhere; the contest engine only asks an
//! [`AllianceEffectResolver`] what the active alliances mean for one attack.

use roadwar_core::NationId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Kind of alliance between two nations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllianceType {
    /// Trade only; no combat effect
    Trade,
    /// Mutual defense pact
    Defense,
    /// Non-aggression pact
    Border,
    /// Full alliance: non-aggression plus shared attack and defense
    Federation,
}

impl AllianceType {
    /// Whether the pact forbids the two members from attacking each other
    pub fn is_non_aggression(&self) -> bool {
        matches!(self, AllianceType::Border | AllianceType::Federation)
    }

    /// Default defense bonus granted to a member, in percent
    pub fn default_defense_bonus_pct(&self) -> f64 {
        match self {
            AllianceType::Defense | AllianceType::Federation => 25.0,
            AllianceType::Trade | AllianceType::Border => 0.0,
        }
    }

    /// Default attack bonus granted to a member, in percent
    pub fn default_attack_bonus_pct(&self) -> f64 {
        match self {
            AllianceType::Federation => 10.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for AllianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllianceType::Trade => "trade",
            AllianceType::Defense => "defense",
            AllianceType::Border => "border",
            AllianceType::Federation => "federation",
        };
        f.write_str(s)
    }
}

/// Combat modifiers for one attacker/defender pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllianceModifiers {
    /// A pact between the two nations forbids the attack
    pub blocked: bool,
    /// Percent added to attack power
    pub attack_bonus_pct: f64,
    /// Percent of the defense level added to defense power
    pub defense_bonus_pct: f64,
}

/// Source of alliance effects
pub trait AllianceEffectResolver: Send + Sync {
    fn resolve(&self, attacker: NationId, defender: NationId) -> AllianceModifiers;
}

/// An active alliance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alliance {
    pub nation_a: NationId,
    pub nation_b: NationId,
    pub kind: AllianceType,
    pub defense_bonus_pct: f64,
    pub attack_bonus_pct: f64,
}

impl Alliance {
    /// Alliance with the default terms of its type
    pub fn new(nation_a: NationId, nation_b: NationId, kind: AllianceType) -> Self {
        Self {
            nation_a,
            nation_b,
            kind,
            defense_bonus_pct: kind.default_defense_bonus_pct(),
            attack_bonus_pct: kind.default_attack_bonus_pct(),
        }
    }

    pub fn with_defense_bonus(mut self, pct: f64) -> Self {
        self.defense_bonus_pct = pct;
        self
    }

    pub fn involves(&self, nation: NationId) -> bool {
        self.nation_a == nation || self.nation_b == nation
    }

    pub fn links(&self, x: NationId, y: NationId) -> bool {
        (self.nation_a == x && self.nation_b == y) || (self.nation_a == y && self.nation_b == x)
    }
}

/// In-memory list of active alliances
#[derive(Debug, Clone, Default)]
pub struct AllianceTable {
    alliances: Vec<Alliance>,
}

impl AllianceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, alliance: Alliance) -> Self {
        self.add(alliance);
        self
    }

    pub fn add(&mut self, alliance: Alliance) {
        self.alliances.push(alliance);
    }

    pub fn alliances_of(&self, nation: NationId) -> impl Iterator<Item = &Alliance> {
        self.alliances.iter().filter(move |a| a.involves(nation))
    }

    pub fn len(&self) -> usize {
        self.alliances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alliances.is_empty()
    }
}

impl AllianceEffectResolver for AllianceTable {
    fn resolve(&self, attacker: NationId, defender: NationId) -> AllianceModifiers {
        let blocked = self
            .alliances
            .iter()
            .any(|a| a.links(attacker, defender) && a.kind.is_non_aggression());

        // Pacts between the two combatants never strengthen either side
        let defense_bonus_pct = self
            .alliances_of(defender)
            .filter(|a| !a.involves(attacker))
            .filter(|a| matches!(a.kind, AllianceType::Defense | AllianceType::Federation))
            .map(|a| a.defense_bonus_pct)
            .sum();

        let attack_bonus_pct = self
            .alliances_of(attacker)
            .filter(|a| !a.involves(defender))
            .filter(|a| a.kind == AllianceType::Federation)
            .map(|a| a.attack_bonus_pct)
            .sum();

        let modifiers = AllianceModifiers {
            blocked,
            attack_bonus_pct,
            defense_bonus_pct,
        };

        debug!(
            attacker = %attacker,
            defender = %defender,
            blocked = modifiers.blocked,
            attack_bonus_pct = modifiers.attack_bonus_pct,
            defense_bonus_pct = modifiers.defense_bonus_pct,
            "Alliance effects resolved"
        );

        modifiers
    }
}
