//! Game State Store - durable territories, stakes and contests
//!
//! The engine keeps its working state in memory and writes every committed
//! change through [`GameStore::save`] while it still holds the state lock. On
//! start the in-memory state is rebuilt from [`GameStore::load`], so claims,
//! locked stakes and pending contests survive a restart.
//!
//! Records are stored as JSON documents keyed by their id. Each save is one
//! SQLite transaction: either every row of a change lands or none does.

use roadwar_core::{ConquestError, RoadId, Stake, Territory};
use rusqlite::{params, Connection, OpenFlags};
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::contest::Contest;

/// Errors from the game state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<StoreError> for ConquestError {
    fn from(error: StoreError) -> Self {
        ConquestError::Internal(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Rows touched by one committed operation
#[derive(Debug, Clone, Default)]
pub struct StateChanges {
    pub territories: Vec<Territory>,
    pub stakes: Vec<Stake>,
    pub contests: Vec<Contest>,
}

impl StateChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn territory(mut self, territory: &Territory) -> Self {
        self.territories.push(territory.clone());
        self
    }

    pub fn stake(mut self, stake: &Stake) -> Self {
        self.stakes.push(stake.clone());
        self
    }

    pub fn stakes<'a>(mut self, stakes: impl IntoIterator<Item = &'a Stake>) -> Self {
        self.stakes.extend(stakes.into_iter().cloned());
        self
    }

    pub fn contest(mut self, contest: &Contest) -> Self {
        self.contests.push(contest.clone());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.territories.is_empty() && self.stakes.is_empty() && self.contests.is_empty()
    }
}

/// Everything persisted, as loaded on start
#[derive(Debug, Clone, Default)]
pub struct StoredState {
    pub territories: Vec<Territory>,
    pub stakes: Vec<Stake>,
    pub contests: Vec<Contest>,
}

/// SQLite-backed game state
pub struct GameStore {
    conn: Connection,
}

impl GameStore {
    /// Create or open a store at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening game state store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        Self::from_connection(conn)
    }

    /// Open a volatile store
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS territories (
                road_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stakes (
                stake_id INTEGER PRIMARY KEY,
                road_id TEXT NOT NULL,
                state TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contests (
                contest_id INTEGER PRIMARY KEY,
                road_id TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_stakes_road ON stakes(road_id);
            CREATE INDEX IF NOT EXISTS idx_contests_status ON contests(status);
            "#,
        )?;

        Ok(Self { conn })
    }

    /// Write a committed change in one transaction
    pub fn save(&mut self, changes: &StateChanges) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;

        for territory in &changes.territories {
            tx.execute(
                r#"
                INSERT INTO territories (road_id, version, body) VALUES (?1, ?2, ?3)
                ON CONFLICT(road_id) DO UPDATE SET version = excluded.version, body = excluded.body
                "#,
                params![
                    territory.road_id.to_string(),
                    territory.version as i64,
                    serde_json::to_string(territory)?,
                ],
            )?;
        }

        for stake in &changes.stakes {
            tx.execute(
                r#"
                INSERT INTO stakes (stake_id, road_id, state, body) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(stake_id) DO UPDATE SET state = excluded.state, body = excluded.body
                "#,
                params![
                    stake.id.0 as i64,
                    stake.territory.to_string(),
                    stake.state.to_string(),
                    serde_json::to_string(stake)?,
                ],
            )?;
        }

        for contest in &changes.contests {
            tx.execute(
                r#"
                INSERT INTO contests (contest_id, road_id, status, body) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(contest_id) DO UPDATE SET status = excluded.status, body = excluded.body
                "#,
                params![
                    contest.id.0 as i64,
                    contest.road_id.to_string(),
                    contest.status.as_str(),
                    serde_json::to_string(contest)?,
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            territories = changes.territories.len(),
            stakes = changes.stakes.len(),
            contests = changes.contests.len(),
            "Game state saved"
        );
        Ok(())
    }

    fn load_table<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }

    /// Every persisted record
    pub fn load(&self) -> Result<StoredState> {
        let territories: Vec<Territory> =
            self.load_table("SELECT body FROM territories ORDER BY road_id")?;
        for territory in &territories {
            if territory.road_id != RoadId::new(territory.dice_type, territory.direction) {
                return Err(StoreError::InvalidRecord(format!(
                    "territory {} does not match its grid cell",
                    territory.road_id
                )));
            }
        }

        let state = StoredState {
            territories,
            stakes: self.load_table("SELECT body FROM stakes ORDER BY stake_id")?,
            contests: self.load_table("SELECT body FROM contests ORDER BY contest_id")?,
        };

        info!(
            territories = state.territories.len(),
            stakes = state.stakes.len(),
            contests = state.contests.len(),
            "Game state loaded"
        );
        Ok(state)
    }
}
