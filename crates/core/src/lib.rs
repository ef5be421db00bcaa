//! Core types of the Rainbow Roads territory conquest game.
//!
//! This crate provides the territory grid topology, the stake ledger, the
//! territory registry and the append-only territory event log. Combat rules
//! and contest orchestration live in `roadwar-conquest`.

pub mod config;
pub mod error;
pub mod event_log;
pub mod grid;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod types;

pub use config::{ConfigError, ConquestConfig, RealmMinimums, TieBreak};
pub use error::{ConquestError, ErrorKind, Result};
pub use event_log::{
    EventLogError, EventLogHealth, NewTerritoryEvent, TerritoryEvent, TerritoryEventKind,
    TerritoryEventLog,
};
pub use grid::{
    DiceType, Direction, Element, GridPosition, Realm, RoadId, GRID_HEIGHT, GRID_WIDTH,
    TERRITORY_COUNT,
};
pub use ledger::{
    defense_level, sum_amounts, LockPeriod, Stake, StakeLedger, StakeState, StakeTotals,
};
pub use registry::{MapStats, Territory, TerritoryRegistry};
pub use types::{ContestId, NationId, StakeId, TerritoryStatus};
