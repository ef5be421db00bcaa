use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use roadwar_conquest::{Collaborators, ConquestEngine, DeadlineSweeper, GameStore};
use roadwar_core::TerritoryEventLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

use crate::config::Config;

pub struct AppState {
    pub engine: Arc<ConquestEngine>,
    pub sweeper: Arc<DeadlineSweeper>,
    pub shutdown: Arc<Notify>,
    pub request_timeout: Duration,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self> {
        let rules = config.load_conquest_config()?;
        let seed = config.load_world_seed()?;

        let events = match &config.event_db_path {
            Some(path) => TerritoryEventLog::open(path)
                .with_context(|| format!("opening event log {}", path.display()))?,
            None => TerritoryEventLog::open_in_memory().context("opening in-memory event log")?,
        };

        info!(
            nations = seed.nations.len(),
            alliances = seed.alliances.len(),
            event_db = ?config.event_db_path,
            state_db = ?config.state_db_path,
            "World loaded"
        );

        let collaborators = Collaborators::local(seed.directory(), seed.alliance_table());
        let mut engine = ConquestEngine::new(rules, collaborators).with_event_log(events);
        if let Some(path) = &config.state_db_path {
            let store = GameStore::open(path)
                .with_context(|| format!("opening state store {}", path.display()))?;
            engine = engine
                .with_store(store)
                .with_context(|| format!("restoring game state from {}", path.display()))?;
        }
        Ok(Self::with_engine(
            Arc::new(engine),
            config.sweep_interval_secs,
            config.request_timeout(),
        ))
    }

    pub fn with_engine(
        engine: Arc<ConquestEngine>,
        sweep_interval_secs: u64,
        request_timeout: Duration,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        let sweeper = Arc::new(DeadlineSweeper::new(
            engine.clone(),
            sweep_interval_secs,
            shutdown.clone(),
        ));

        AppState {
            engine,
            sweeper,
            shutdown,
            request_timeout,
            started_at: Utc::now(),
        }
    }
}
