//! Territory Registry
//!
//! Owns the 40 cells of the grid and their ownership/status. Every mutation
//! bumps the cell's `version`; contest creation and resolution go through
//! [`TerritoryRegistry::transition`], a compare-and-swap on `(version,
//! status)`, so a writer acting on a stale read loses with `Conflict`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConquestError, Result};
use crate::grid::{DiceType, Direction, Element, GridPosition, Realm, RoadId, TERRITORY_COUNT};
use crate::ledger::StakeTotals;
use crate::types::{NationId, TerritoryStatus};

/// One cell of the territory grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Territory {
    pub road_id: RoadId,
    pub dice_type: DiceType,
    pub direction: Direction,
    pub realm: Realm,
    pub element: Element,
    pub position: GridPosition,
    pub status: TerritoryStatus,
    pub defense_level: u64,
    pub total_staked: u64,
    pub controller_nation_id: Option<NationId>,
    pub controller_wallet: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_contested_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Territory {
    fn unclaimed(road_id: RoadId) -> Self {
        Self {
            road_id,
            dice_type: road_id.dice,
            direction: road_id.direction,
            realm: road_id.realm(),
            element: road_id.element(),
            position: road_id.position(),
            status: TerritoryStatus::Unclaimed,
            defense_level: 0,
            total_staked: 0,
            controller_nation_id: None,
            controller_wallet: None,
            claimed_at: None,
            last_contested_at: None,
            version: 0,
        }
    }

    pub fn is_controlled_by(&self, nation: NationId) -> bool {
        self.controller_nation_id == Some(nation)
    }

    /// Controller of a controlled territory
    pub fn controller(&self) -> Result<NationId> {
        self.controller_nation_id.ok_or_else(|| {
            ConquestError::Conflict(format!("{} has no controller", self.road_id))
        })
    }
}

/// Status counts across the grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapStats {
    pub total: usize,
    pub claimed: usize,
    pub contested: usize,
    pub fortified: usize,
    pub unclaimed: usize,
}

/// Registry of all grid cells
#[derive(Debug, Clone)]
pub struct TerritoryRegistry {
    cells: Vec<Territory>,
    fortify_threshold: u64,
}

impl TerritoryRegistry {
    /// Fresh grid with every cell unclaimed
    pub fn new(fortify_threshold: u64) -> Self {
        let cells: Vec<Territory> = RoadId::all().map(Territory::unclaimed).collect();
        debug_assert_eq!(cells.len(), TERRITORY_COUNT);
        Self {
            cells,
            fortify_threshold,
        }
    }

    /// Grid with persisted cells laid over a fresh one; cells not given stay unclaimed
    pub fn restore(fortify_threshold: u64, cells: impl IntoIterator<Item = Territory>) -> Self {
        let mut registry = Self::new(fortify_threshold);
        for cell in cells {
            let index = cell.road_id.index();
            registry.cells[index] = cell;
        }
        registry
    }

    pub fn fortify_threshold(&self) -> u64 {
        self.fortify_threshold
    }

    /// Status a controlled, uncontested territory should have at `defense_level`
    pub fn settled_status(&self, defense_level: u64) -> TerritoryStatus {
        if defense_level >= self.fortify_threshold {
            TerritoryStatus::Fortified
        } else {
            TerritoryStatus::Claimed
        }
    }

    pub fn lookup(&self, road: RoadId) -> &Territory {
        &self.cells[road.index()]
    }

    /// Lookup by textual road id; unknown ids are `NotFound`
    pub fn find(&self, road_id: &str) -> Result<&Territory> {
        let road: RoadId = road_id
            .parse()
            .map_err(|_| ConquestError::NotFound(format!("Territory {} not found", road_id)))?;
        Ok(self.lookup(road))
    }

    pub fn adjacent_of(&self, road: RoadId) -> Vec<&Territory> {
        road.adjacent().into_iter().map(|r| self.lookup(r)).collect()
    }

    /// All cells, row-major
    pub fn all(&self) -> &[Territory] {
        &self.cells
    }

    pub fn controlled_by(&self, nation: NationId) -> impl Iterator<Item = &Territory> {
        self.cells.iter().filter(move |t| t.is_controlled_by(nation))
    }

    pub fn stats(&self) -> MapStats {
        let mut stats = MapStats {
            total: self.cells.len(),
            ..MapStats::default()
        };
        for cell in &self.cells {
            match cell.status {
                TerritoryStatus::Unclaimed => stats.unclaimed += 1,
                TerritoryStatus::Claimed => stats.claimed += 1,
                TerritoryStatus::Contested => stats.contested += 1,
                TerritoryStatus::Fortified => stats.fortified += 1,
            }
        }
        stats
    }

    fn cell_mut(&mut self, road: RoadId) -> &mut Territory {
        &mut self.cells[road.index()]
    }

    fn check_version(cell: &Territory, expected_version: u64) -> Result<()> {
        if cell.version != expected_version {
            return Err(ConquestError::Conflict(format!(
                "{} changed concurrently (version {} != {})",
                cell.road_id, cell.version, expected_version
            )));
        }
        Ok(())
    }

    /// Check that a claim at `expected_version` would succeed
    pub fn check_claim(&self, road: RoadId, expected_version: u64) -> Result<()> {
        let cell = self.lookup(road);
        Self::check_version(cell, expected_version)?;
        if cell.status != TerritoryStatus::Unclaimed {
            return Err(ConquestError::Conflict(format!(
                "{} is already {}",
                road, cell.status
            )));
        }
        Ok(())
    }

    /// Take control of an unclaimed territory.
    ///
    /// `totals` are the aggregates after the initial stake, so the cell may
    /// become fortified immediately.
    pub fn claim(
        &mut self,
        road: RoadId,
        expected_version: u64,
        nation: NationId,
        wallet: &str,
        totals: StakeTotals,
        now: DateTime<Utc>,
    ) -> Result<&Territory> {
        self.check_claim(road, expected_version)?;
        let status = self.settled_status(totals.defense_level);

        let cell = self.cell_mut(road);
        cell.status = status;
        cell.controller_nation_id = Some(nation);
        cell.controller_wallet = Some(wallet.to_string());
        cell.claimed_at = Some(now);
        cell.total_staked = totals.total_staked;
        cell.defense_level = totals.defense_level;
        cell.version += 1;

        info!(
            road_id = %road,
            nation_id = %nation,
            status = %status,
            defense_level = totals.defense_level,
            "Territory claimed"
        );

        Ok(cell)
    }

    /// Compare-and-swap the status of a cell
    pub fn transition(
        &mut self,
        road: RoadId,
        expected_version: u64,
        from: TerritoryStatus,
        to: TerritoryStatus,
    ) -> Result<&Territory> {
        let cell = self.cell_mut(road);
        Self::check_version(cell, expected_version)?;
        if cell.status != from {
            return Err(ConquestError::Conflict(format!(
                "{} is {}, expected {}",
                road, cell.status, from
            )));
        }

        cell.status = to;
        cell.version += 1;

        debug!(
            road_id = %road,
            from = %from,
            to = %to,
            version = cell.version,
            "Territory status transition"
        );
        Ok(cell)
    }

    /// Mark an attackable cell as contested
    pub fn begin_contest(
        &mut self,
        road: RoadId,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<&Territory> {
        let from = self.lookup(road).status;
        if !from.is_attackable() {
            return Err(ConquestError::Conflict(format!("{} is {}", road, from)));
        }
        self.transition(road, expected_version, from, TerritoryStatus::Contested)?;
        let cell = self.cell_mut(road);
        cell.last_contested_at = Some(now);
        Ok(cell)
    }

    /// Settle a contested cell back to claimed/fortified from its current defense
    pub fn end_contest(&mut self, road: RoadId, expected_version: u64) -> Result<&Territory> {
        let to = self.settled_status(self.lookup(road).defense_level);
        self.transition(road, expected_version, TerritoryStatus::Contested, to)
    }

    /// Hand a contested territory to a new controller
    pub fn transfer_control(
        &mut self,
        road: RoadId,
        expected_version: u64,
        nation: NationId,
        wallet: &str,
        now: DateTime<Utc>,
    ) -> Result<&Territory> {
        let cell = self.cell_mut(road);
        Self::check_version(cell, expected_version)?;
        if cell.status != TerritoryStatus::Contested {
            return Err(ConquestError::Conflict(format!(
                "{} is not contested",
                road
            )));
        }

        let previous = cell.controller_nation_id;
        cell.controller_nation_id = Some(nation);
        cell.controller_wallet = Some(wallet.to_string());
        cell.claimed_at = Some(now);
        cell.version += 1;

        info!(
            road_id = %road,
            from_nation = ?previous.map(|n| n.0),
            to_nation = %nation,
            "Territory control transferred"
        );

        Ok(cell)
    }

    /// Store fresh aggregates and apply the fortify rule.
    ///
    /// Contested cells keep their status; their settled status is decided
    /// when the contest ends. Returns the status change, if any.
    pub fn apply_totals(
        &mut self,
        road: RoadId,
        totals: StakeTotals,
    ) -> Option<(TerritoryStatus, TerritoryStatus)> {
        let settled = self.settled_status(totals.defense_level);
        let cell = self.cell_mut(road);
        cell.total_staked = totals.total_staked;
        cell.defense_level = totals.defense_level;
        cell.version += 1;

        let from = cell.status;
        let to = match from {
            TerritoryStatus::Claimed | TerritoryStatus::Fortified => settled,
            other => other,
        };

        if from == to {
            return None;
        }

        cell.status = to;
        info!(
            road_id = %road,
            from = %from,
            to = %to,
            defense_level = totals.defense_level,
            "Territory fortification changed"
        );
        Some((from, to))
    }
}
