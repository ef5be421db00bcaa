//! Combat power arithmetic.
//!
//! Pure functions over the rule constants in [`ConquestConfig`]; dice are
//! rolled by the caller and passed in.

use roadwar_core::{ConquestConfig, Element, StakeTotals, TieBreak};
use serde::{Deserialize, Serialize};

use crate::dice::DiceRoll;
use crate::elements::{matchup, Advantage};

/// Side of a contest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Attacker,
    Defender,
}

/// Minimum burn an attack on a territory must commit.
///
/// `max(floor, floor(total_staked × stake_bps / 10000), defense_level × per_level)`
pub fn min_burn(config: &ConquestConfig, totals: StakeTotals) -> u64 {
    let stake_based =
        u128::from(totals.total_staked) * u128::from(config.min_burn_stake_bps) / 10_000;
    let stake_based = u64::try_from(stake_based).unwrap_or(u64::MAX);
    let defense_based = totals
        .defense_level
        .saturating_mul(config.min_burn_per_defense_level);
    config.min_burn_floor.max(stake_based).max(defense_based)
}

pub fn advantage_multiplier(config: &ConquestConfig, advantage: Advantage) -> f64 {
    match advantage {
        Advantage::Advantaged => config.advantage_multiplier,
        Advantage::Neutral => 1.0,
        Advantage::Disadvantaged => config.disadvantage_multiplier,
    }
}

pub fn critical_multiplier(config: &ConquestConfig, roll: &DiceRoll) -> f64 {
    if roll.critical {
        config.critical_multiplier
    } else {
        1.0
    }
}

/// How an attack power was composed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackBreakdown {
    pub burn_amount: u64,
    pub roll: DiceRoll,
    pub defender_element: Element,
    pub advantage: Advantage,
    pub advantage_multiplier: f64,
    pub critical_multiplier: f64,
    pub alliance_bonus_pct: f64,
    pub power: f64,
}

/// `burn × roll × advantage × critical × (1 + attack_bonus_pct / 100)`
pub fn attack_power(
    config: &ConquestConfig,
    burn_amount: u64,
    roll: DiceRoll,
    defender_element: Element,
    attack_bonus_pct: f64,
) -> AttackBreakdown {
    let advantage = matchup(roll.element, defender_element);
    let adv = advantage_multiplier(config, advantage);
    let crit = critical_multiplier(config, &roll);
    let power = burn_amount as f64
        * f64::from(roll.roll)
        * adv
        * crit
        * (1.0 + attack_bonus_pct / 100.0);

    AttackBreakdown {
        burn_amount,
        roll,
        defender_element,
        advantage,
        advantage_multiplier: adv,
        critical_multiplier: crit,
        alliance_bonus_pct: attack_bonus_pct,
        power,
    }
}

/// How a defense power was composed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefenseBreakdown {
    pub defense_level: u64,
    pub burn_amount: u64,
    pub roll: Option<DiceRoll>,
    pub burn_contribution: f64,
    pub alliance_bonus_pct: f64,
    pub alliance_contribution: f64,
    pub power: f64,
}

/// `defense_level + burn × roll × critical + defense_bonus_pct / 100 × defense_level`
///
/// The burn term is zero when the defender commits no burn, which is also
/// how a timed-out contest is scored.
pub fn defense_power(
    config: &ConquestConfig,
    defense_level: u64,
    burn: Option<(u64, DiceRoll)>,
    defense_bonus_pct: f64,
) -> DefenseBreakdown {
    let level = defense_level as f64;
    let (burn_amount, roll, burn_contribution) = match burn {
        Some((amount, roll)) if amount > 0 => (
            amount,
            Some(roll),
            amount as f64 * f64::from(roll.roll) * critical_multiplier(config, &roll),
        ),
        _ => (0, None, 0.0),
    };
    let alliance_contribution = defense_bonus_pct / 100.0 * level;

    DefenseBreakdown {
        defense_level,
        burn_amount,
        roll,
        burn_contribution,
        alliance_bonus_pct: defense_bonus_pct,
        alliance_contribution,
        power: level + burn_contribution + alliance_contribution,
    }
}

/// Higher power wins; equal power goes to the configured side
pub fn winner(config: &ConquestConfig, attack_power: f64, defense_power: f64) -> Side {
    if attack_power > defense_power {
        Side::Attacker
    } else if attack_power < defense_power {
        Side::Defender
    } else {
        match config.tie_break {
            TieBreak::Defender => Side::Defender,
            TieBreak::Attacker => Side::Attacker,
        }
    }
}
