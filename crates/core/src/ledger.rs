//! Stake Ledger
//!
//! Owns every stake record and derives the per-territory aggregates
//! (`total_staked`, `defense_level`) from the set of active stakes. Stakes are
//! never deleted: withdrawing or forfeiting only changes their state, so the
//! full history stays available for the territory detail view.
//!
//! The ledger does not lock anything itself. Callers serialise stake and
//! unstake on a territory by holding the engine's state mutex around the
//! ledger and the registry together.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::error::{ConquestError, Result};
use crate::grid::RoadId;
use crate::types::{NationId, StakeId};

const BPS: u128 = 10_000;

/// Allowed lock periods of a stake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum LockPeriod {
    None,
    Week,
    Month,
    Quarter,
}

impl LockPeriod {
    pub fn days(&self) -> u32 {
        match self {
            LockPeriod::None => 0,
            LockPeriod::Week => 7,
            LockPeriod::Month => 30,
            LockPeriod::Quarter => 90,
        }
    }

    /// Defense bonus of the lock in basis points (10% = 1000)
    pub fn bonus_bps(&self) -> u32 {
        match self {
            LockPeriod::None => 0,
            LockPeriod::Week => 1_000,
            LockPeriod::Month => 2_500,
            LockPeriod::Quarter => 5_000,
        }
    }

    /// End of the lock for a stake created at `created_at`
    pub fn locked_until(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            LockPeriod::None => None,
            other => Some(created_at + Duration::days(i64::from(other.days()))),
        }
    }
}

impl Default for LockPeriod {
    fn default() -> Self {
        LockPeriod::None
    }
}

impl TryFrom<u32> for LockPeriod {
    type Error = ConquestError;

    fn try_from(days: u32) -> Result<Self> {
        match days {
            0 => Ok(LockPeriod::None),
            7 => Ok(LockPeriod::Week),
            30 => Ok(LockPeriod::Month),
            90 => Ok(LockPeriod::Quarter),
            other => Err(ConquestError::Validation(format!(
                "lockDays must be one of 0, 7, 30, 90 (got {})",
                other
            ))),
        }
    }
}

impl From<LockPeriod> for u32 {
    fn from(lock: LockPeriod) -> u32 {
        lock.days()
    }
}

/// Lifecycle state of a stake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeState {
    Active,
    /// Voluntarily unstaked by its owner
    Withdrawn,
    /// Lost when the territory was captured
    Forfeited,
}

impl fmt::Display for StakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StakeState::Active => "active",
            StakeState::Withdrawn => "withdrawn",
            StakeState::Forfeited => "forfeited",
        };
        f.write_str(s)
    }
}

/// Tokens locked against a territory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stake {
    pub id: StakeId,
    #[serde(rename = "roadId")]
    pub territory: RoadId,
    /// Controller of the territory when the stake was made
    pub nation_id: NationId,
    pub staker_wallet: String,
    pub amount: u64,
    #[serde(rename = "lockDays")]
    pub lock: LockPeriod,
    pub created_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub state: StakeState,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Stake {
    pub fn is_active(&self) -> bool {
        self.state == StakeState::Active
    }

    /// Locked stakes cannot be withdrawn; the lock ends exactly at `locked_until`
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| now < until)
    }
}

/// Derived aggregates of a territory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeTotals {
    pub total_staked: u64,
    pub defense_level: u64,
    pub active_count: usize,
}

/// Defense level of a set of stakes.
///
/// `floor(Σ amount / scale × (1 + lock_bonus))`, evaluated in integer basis
/// points so the result does not depend on iteration order. Inactive stakes
/// are ignored.
///
/// # Arguments
/// * `stakes` - Stakes of one territory
/// * `scale` - Tokens per defense point (must be non-zero)
pub fn defense_level<'a>(stakes: impl IntoIterator<Item = &'a Stake>, scale: u64) -> u64 {
    if scale == 0 {
        return 0;
    }

    let weighted: u128 = stakes
        .into_iter()
        .filter(|s| s.is_active())
        .map(|s| u128::from(s.amount) * (BPS + u128::from(s.lock.bonus_bps())))
        .sum();

    let level = weighted / (u128::from(scale) * BPS);
    u64::try_from(level).unwrap_or(u64::MAX)
}

/// Sum of stake amounts, saturating at `u64::MAX`
pub fn sum_amounts<'a>(stakes: impl IntoIterator<Item = &'a Stake>) -> u64 {
    let total: u128 = stakes.into_iter().map(|s| u128::from(s.amount)).sum();
    u64::try_from(total).unwrap_or(u64::MAX)
}

/// In-memory stake ledger
#[derive(Debug, Clone)]
pub struct StakeLedger {
    stakes: HashMap<StakeId, Stake>,
    next_id: u64,
    scale: u64,
}

impl StakeLedger {
    pub fn new(scale: u64) -> Self {
        Self {
            stakes: HashMap::new(),
            next_id: 1,
            scale,
        }
    }

    /// Ledger holding previously persisted stakes; new ids continue after the highest
    pub fn restore(scale: u64, stakes: impl IntoIterator<Item = Stake>) -> Self {
        let mut ledger = Self::new(scale);
        for stake in stakes {
            ledger.next_id = ledger.next_id.max(stake.id.0 + 1);
            ledger.stakes.insert(stake.id, stake);
        }
        ledger
    }

    pub fn scale(&self) -> u64 {
        self.scale
    }

    /// Record a new active stake.
    ///
    /// Whether the territory may receive stakes is the caller's decision; the
    /// ledger only rejects amounts that are not positive.
    pub fn open_stake(
        &mut self,
        territory: RoadId,
        nation_id: NationId,
        wallet: &str,
        amount: u64,
        lock: LockPeriod,
        now: DateTime<Utc>,
    ) -> Result<Stake> {
        if amount == 0 {
            return Err(ConquestError::Validation(
                "Stake amount must be positive".to_string(),
            ));
        }
        if wallet.trim().is_empty() {
            return Err(ConquestError::Validation(
                "walletAddress is required".to_string(),
            ));
        }

        let staked = self.totals(territory).total_staked;
        if staked.checked_add(amount).is_none() {
            return Err(ConquestError::Validation(format!(
                "Stake of {} would overflow the {} tokens already staked on {}",
                amount, staked, territory
            )));
        }

        let id = StakeId(self.next_id);
        self.next_id += 1;

        let stake = Stake {
            id,
            territory,
            nation_id,
            staker_wallet: wallet.to_string(),
            amount,
            lock,
            created_at: now,
            locked_until: lock.locked_until(now),
            state: StakeState::Active,
            closed_at: None,
        };

        debug!(
            stake_id = %id,
            road_id = %territory,
            nation_id = %nation_id,
            amount = amount,
            lock_days = lock.days(),
            "Stake opened"
        );

        self.stakes.insert(id, stake.clone());
        Ok(stake)
    }

    /// Check that `wallet` may withdraw `amount` from the stake at `now`.
    ///
    /// Returns the amount that would be withdrawn. Performs no mutation, so
    /// the engine can validate before touching any other state.
    pub fn check_withdraw(
        &self,
        stake_id: StakeId,
        wallet: &str,
        amount: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let stake = self.get(stake_id)?;

        if stake.staker_wallet != wallet {
            return Err(ConquestError::Authorization(format!(
                "{} is not owned by this wallet",
                stake_id
            )));
        }
        if !stake.is_active() {
            return Err(ConquestError::Conflict(format!(
                "{} is already {}",
                stake_id, stake.state
            )));
        }
        if stake.is_locked(now) {
            // is_locked implies locked_until is set
            let until = stake.locked_until.unwrap_or(now);
            return Err(ConquestError::Conflict(format!(
                "{} is locked until {}",
                stake_id,
                until.to_rfc3339()
            )));
        }

        match amount {
            None => Ok(stake.amount),
            Some(0) => Err(ConquestError::Validation(
                "Unstake amount must be positive".to_string(),
            )),
            Some(requested) if requested > stake.amount => Err(ConquestError::Validation(
                format!(
                    "Cannot unstake {} from {} holding {}",
                    requested, stake_id, stake.amount
                ),
            )),
            Some(requested) => Ok(requested),
        }
    }

    /// Withdraw all or part of a stake.
    ///
    /// A partial withdrawal reduces the stake and leaves it active; withdrawing
    /// the full amount closes it. Returns the stake after the change together
    /// with the amount withdrawn.
    pub fn withdraw(
        &mut self,
        stake_id: StakeId,
        wallet: &str,
        amount: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<(Stake, u64)> {
        let withdrawn = self.check_withdraw(stake_id, wallet, amount, now)?;

        let stake = self
            .stakes
            .get_mut(&stake_id)
            .ok_or_else(|| ConquestError::NotFound(format!("{} not found", stake_id)))?;

        if withdrawn == stake.amount {
            stake.state = StakeState::Withdrawn;
            stake.closed_at = Some(now);
        } else {
            stake.amount -= withdrawn;
        }

        info!(
            stake_id = %stake_id,
            road_id = %stake.territory,
            amount = withdrawn,
            remaining = if stake.is_active() { stake.amount } else { 0 },
            "Stake withdrawn"
        );

        Ok((stake.clone(), withdrawn))
    }

    /// Forfeit every active stake a nation holds on a territory.
    ///
    /// Used when the territory is captured. Lock periods do not apply: the
    /// stakes are lost, not returned.
    pub fn forfeit_nation(
        &mut self,
        territory: RoadId,
        nation_id: NationId,
        now: DateTime<Utc>,
    ) -> Vec<Stake> {
        let mut forfeited: Vec<Stake> = self
            .stakes
            .values_mut()
            .filter(|s| s.territory == territory && s.nation_id == nation_id && s.is_active())
            .map(|s| {
                s.state = StakeState::Forfeited;
                s.closed_at = Some(now);
                s.clone()
            })
            .collect();
        forfeited.sort_by_key(|s| s.id);

        if !forfeited.is_empty() {
            info!(
                road_id = %territory,
                nation_id = %nation_id,
                stakes = forfeited.len(),
                amount = sum_amounts(&forfeited),
                "Stakes forfeited"
            );
        }

        forfeited
    }

    pub fn get(&self, stake_id: StakeId) -> Result<&Stake> {
        self.stakes
            .get(&stake_id)
            .ok_or_else(|| ConquestError::NotFound(format!("{} not found", stake_id)))
    }

    /// Aggregates of a territory, derived from its active stakes only
    pub fn totals(&self, territory: RoadId) -> StakeTotals {
        let active: Vec<&Stake> = self
            .stakes
            .values()
            .filter(|s| s.territory == territory && s.is_active())
            .collect();

        StakeTotals {
            total_staked: sum_amounts(active.iter().copied()),
            defense_level: defense_level(active.iter().copied(), self.scale),
            active_count: active.len(),
        }
    }

    /// Active stakes of a territory, largest first
    pub fn active_stakes(&self, territory: RoadId) -> Vec<Stake> {
        let mut stakes: Vec<Stake> = self
            .stakes
            .values()
            .filter(|s| s.territory == territory && s.is_active())
            .cloned()
            .collect();
        stakes.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.id.cmp(&b.id)));
        stakes
    }

    /// Every stake a wallet ever made, newest first
    pub fn stakes_for_wallet(&self, wallet: &str) -> Vec<Stake> {
        let mut stakes: Vec<Stake> = self
            .stakes
            .values()
            .filter(|s| s.staker_wallet == wallet)
            .cloned()
            .collect();
        stakes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        stakes
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }
}
