//! Shared fixtures for conquest integration tests

use chrono::{DateTime, TimeZone, Utc};
use roadwar_conquest::{
    AllianceTable, AttackRequest, ClaimRequest, Collaborators, ConquestEngine, GameStore,
    InMemoryNationDirectory, Nation, ScriptedRoller, SimulatedTokenLedger,
};
use roadwar_core::{ConquestConfig, DiceType, NationId, RoadId, TerritoryEventLog};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Fixed start of every scenario
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
}

pub fn road(id: &str) -> RoadId {
    id.parse().unwrap()
}

/// Wallet of the founder of nation `id`
pub fn wallet(id: u64) -> String {
    format!("wallet-{}", id)
}

/// Route engine logs to the test harness; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("warn")
        .try_init();
}

/// An engine over scripted dice and a simulated token ledger
pub struct World {
    pub engine: Arc<ConquestEngine>,
    pub dice: Arc<ScriptedRoller>,
    pub tokens: Arc<SimulatedTokenLedger>,
}

impl World {
    /// Nations 1..=`nations`, each founded by `wallet(id)`
    pub fn new(nations: u64) -> Self {
        Self::build(nations, AllianceTable::new(), None, None)
    }

    pub fn with_alliances(nations: u64, alliances: AllianceTable) -> Self {
        Self::build(nations, alliances, None, None)
    }

    pub fn with_event_log(nations: u64, path: &Path) -> Self {
        Self::build(nations, AllianceTable::new(), Some(path), None)
    }

    /// A world whose game state lives in the SQLite file at `path`
    pub fn with_state_store(nations: u64, path: &Path) -> Self {
        Self::build(nations, AllianceTable::new(), None, Some(path))
    }

    fn build(
        nations: u64,
        alliances: AllianceTable,
        event_db: Option<&Path>,
        state_db: Option<&Path>,
    ) -> Self {
        init_tracing();

        let directory = (1..=nations).fold(InMemoryNationDirectory::new(), |dir, id| {
            dir.with(Nation {
                id: NationId(id),
                name: format!("Nation {}", id),
                emoji: String::new(),
                founder_wallet: wallet(id),
                defense_rating: 0,
                attack_rating: 0,
            })
        });

        let dice = Arc::new(ScriptedRoller::new([]));
        let tokens = Arc::new(SimulatedTokenLedger::new());
        let collaborators = Collaborators {
            alliances: Arc::new(alliances),
            tokens: tokens.clone(),
            nations: Arc::new(directory),
            dice: dice.clone(),
        };

        let log = match event_db {
            Some(path) => TerritoryEventLog::open(path).unwrap(),
            None => TerritoryEventLog::open_in_memory().unwrap(),
        };
        let mut engine =
            ConquestEngine::new(ConquestConfig::default(), collaborators).with_event_log(log);
        if let Some(path) = state_db {
            engine = engine.with_store(GameStore::open(path).unwrap()).unwrap();
        }
        debug!(nations = nations, "Test world built");

        World {
            engine: Arc::new(engine),
            dice,
            tokens,
        }
    }

    pub fn claim(&self, road_id: &str, nation: u64, amount: u64) {
        self.engine
            .claim(
                ClaimRequest {
                    road_id: road(road_id),
                    nation_id: NationId(nation),
                    stake_amount: Some(amount),
                    wallet: wallet(nation),
                },
                t0(),
            )
            .unwrap();
    }

    pub fn attack_request(road_id: &str, nation: u64, burn: u64, dice: DiceType) -> AttackRequest {
        AttackRequest {
            road_id: road(road_id),
            wallet: wallet(nation),
            burn_amount: burn,
            dice_type: dice,
            tx_signature: None,
        }
    }
}
