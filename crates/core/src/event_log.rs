//! Territory Event Log - append-only audit trail of conquest actions
//!
//! Every claim, stake, attack and resolution is recorded here so the
//! territory detail view can show recent history. The log is:
//! - SQLite-backed (WAL mode when file-based)
//! - Append-only (no updates or deletes)
//! - Hash-chained with BLAKE3: each entry commits to the previous entry's hash
//! - Verified on open; a broken chain marks the log corrupted and blocks appends

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::grid::RoadId;
use crate::types::NationId;

const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Kind of territory event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerritoryEventKind {
    Claimed,
    Staked,
    Unstaked,
    Fortified,
    Unfortified,
    Attacked,
    Defended,
    Captured,
    StakesForfeited,
}

impl TerritoryEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerritoryEventKind::Claimed => "claimed",
            TerritoryEventKind::Staked => "staked",
            TerritoryEventKind::Unstaked => "unstaked",
            TerritoryEventKind::Fortified => "fortified",
            TerritoryEventKind::Unfortified => "unfortified",
            TerritoryEventKind::Attacked => "attacked",
            TerritoryEventKind::Defended => "defended",
            TerritoryEventKind::Captured => "captured",
            TerritoryEventKind::StakesForfeited => "stakes_forfeited",
        }
    }
}

impl fmt::Display for TerritoryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerritoryEventKind {
    type Err = EventLogError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "claimed" => TerritoryEventKind::Claimed,
            "staked" => TerritoryEventKind::Staked,
            "unstaked" => TerritoryEventKind::Unstaked,
            "fortified" => TerritoryEventKind::Fortified,
            "unfortified" => TerritoryEventKind::Unfortified,
            "attacked" => TerritoryEventKind::Attacked,
            "defended" => TerritoryEventKind::Defended,
            "captured" => TerritoryEventKind::Captured,
            "stakes_forfeited" => TerritoryEventKind::StakesForfeited,
            other => {
                return Err(EventLogError::InvalidEvent(format!(
                    "unknown event type {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// Event to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewTerritoryEvent {
    pub road_id: RoadId,
    pub kind: TerritoryEventKind,
    pub actor_nation_id: Option<NationId>,
    pub actor_wallet: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewTerritoryEvent {
    pub fn new(road_id: RoadId, kind: TerritoryEventKind, created_at: DateTime<Utc>) -> Self {
        Self {
            road_id,
            kind,
            actor_nation_id: None,
            actor_wallet: None,
            details: serde_json::Value::Null,
            created_at,
        }
    }

    pub fn actor(mut self, nation: NationId, wallet: impl Into<String>) -> Self {
        self.actor_nation_id = Some(nation);
        self.actor_wallet = Some(wallet.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Persisted event with chain pointers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerritoryEvent {
    pub seq_no: u64,
    pub road_id: RoadId,
    pub event_type: TerritoryEventKind,
    pub actor_nation_id: Option<NationId>,
    pub actor_wallet: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(with = "hex_bytes")]
    pub event_hash: Vec<u8>,
    #[serde(skip)]
    pub prev_event_hash: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

/// Event log health status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventLogHealth {
    Ok,
    Corrupted {
        /// Last good sequence number
        last_good_seq_no: Option<u64>,
        /// First failing sequence number
        first_bad_seq_no: u64,
        error_type: String,
    },
}

impl EventLogHealth {
    pub fn is_ok(&self) -> bool {
        matches!(self, EventLogHealth::Ok)
    }
}

/// Errors that can occur in event log operations
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Event log corrupted: {0}")]
    CorruptionDetected(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

pub type Result<T> = std::result::Result<T, EventLogError>;

/// Append-only territory event log
pub struct TerritoryEventLog {
    conn: Connection,
    health: EventLogHealth,
    appended_total: u64,
}

impl TerritoryEventLog {
    /// Create or open a log at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening territory event log");

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
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn)
    }

    /// Open a volatile log, used by tests and ephemeral play sessions
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;

        let mut log = Self {
            conn,
            health: EventLogHealth::Ok,
            appended_total: 0,
        };

        log.verify_chain()?;

        Ok(log)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS territory_events (
                seq_no INTEGER PRIMARY KEY AUTOINCREMENT,
                road_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                actor_nation_id INTEGER,
                actor_wallet TEXT,
                details TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                event_hash BLOB NOT NULL,
                prev_event_hash BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_territory_events_road ON territory_events(road_id);
            "#,
        )?;

        Ok(())
    }

    pub fn health(&self) -> &EventLogHealth {
        &self.health
    }

    /// Events appended since the log was opened
    pub fn appended_total(&self) -> u64 {
        self.appended_total
    }

    /// Chain hash of an entry.
    ///
    /// Every variable-length field is length-prefixed and the optional ones
    /// carry a presence tag, so no two distinct entries share an encoding.
    fn compute_hash(prev: &[u8], fields: &ChainFields<'_>) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hash_field(&mut hasher, prev);
        hash_field(&mut hasher, fields.road_id.as_bytes());
        hash_field(&mut hasher, fields.kind.as_bytes());
        match fields.actor {
            Some(actor) => {
                hasher.update(&[1]);
                hasher.update(&actor.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        match fields.wallet {
            Some(wallet) => {
                hasher.update(&[1]);
                hash_field(&mut hasher, wallet.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hash_field(&mut hasher, fields.details.as_bytes());
        hasher.update(&fields.created_at_ms.to_le_bytes());
        hasher.finalize().as_bytes().to_vec()
    }

    /// Append an event, returning its sequence number
    pub fn append(&mut self, event: NewTerritoryEvent) -> Result<u64> {
        if !self.health.is_ok() {
            warn!("Attempted to append to corrupted territory event log");
            return Err(EventLogError::CorruptionDetected(
                "Cannot append to corrupted event log".to_string(),
            ));
        }

        let road_id = event.road_id.to_string();
        let details = serde_json::to_string(&event.details)?;
        let created_at_ms = event.created_at.timestamp_millis();
        let actor = event.actor_nation_id.map(|n| n.0 as i64);

        let tx = self.conn.transaction()?;

        let prev_hash: Vec<u8> = tx
            .query_row(
                "SELECT event_hash FROM territory_events ORDER BY seq_no DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_else(|| GENESIS_HASH.to_vec());

        let event_hash = Self::compute_hash(
            &prev_hash,
            &ChainFields {
                road_id: &road_id,
                kind: event.kind.as_str(),
                actor,
                wallet: event.actor_wallet.as_deref(),
                details: &details,
                created_at_ms,
            },
        );

        tx.execute(
            r#"
            INSERT INTO territory_events (
                road_id, event_type, actor_nation_id, actor_wallet,
                details, created_at, event_hash, prev_event_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                road_id,
                event.kind.as_str(),
                actor,
                event.actor_wallet,
                details,
                created_at_ms,
                event_hash,
                prev_hash,
            ],
        )?;

        let seq_no = tx.last_insert_rowid() as u64;
        tx.commit()?;

        self.appended_total += 1;

        debug!(
            seq_no = seq_no,
            road_id = %road_id,
            event_type = %event.kind,
            "Territory event appended"
        );

        Ok(seq_no)
    }

    fn row_to_event(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
        Ok(RawEvent {
            seq_no: row.get::<_, i64>(0)? as u64,
            road_id: row.get(1)?,
            event_type: row.get(2)?,
            actor_nation_id: row.get(3)?,
            actor_wallet: row.get(4)?,
            details: row.get(5)?,
            created_at_ms: row.get(6)?,
            event_hash: row.get(7)?,
            prev_event_hash: row.get(8)?,
        })
    }

    /// Most recent events of a territory, newest first
    pub fn recent(&self, road_id: RoadId, limit: usize) -> Result<Vec<TerritoryEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq_no, road_id, event_type, actor_nation_id, actor_wallet,
                   details, created_at, event_hash, prev_event_hash
            FROM territory_events
            WHERE road_id = ?1
            ORDER BY seq_no DESC
            LIMIT ?2
            "#,
        )?;

        let raw = stmt
            .query_map(params![road_id.to_string(), limit as i64], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter().map(RawEvent::into_event).collect()
    }

    /// Total number of persisted events
    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM territory_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Re-walk the whole chain and recompute every hash
    pub fn verify_chain(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT seq_no, road_id, event_type, actor_nation_id, actor_wallet,
                   details, created_at, event_hash, prev_event_hash
            FROM territory_events
            ORDER BY seq_no ASC
            "#,
        )?;

        let events = stmt
            .query_map([], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut prev_hash = GENESIS_HASH.to_vec();
        let mut last_good = None;

        for event in &events {
            let expected = Self::compute_hash(&prev_hash, &event.chain_fields());

            if event.prev_event_hash != prev_hash || event.event_hash != expected {
                let error_type = format!(
                    "Hash mismatch at seq_no {}: expected {}, got {}",
                    event.seq_no,
                    hex::encode(&expected),
                    hex::encode(&event.event_hash)
                );

                error!(
                    seq_no = event.seq_no,
                    error_type = %error_type,
                    "Territory event log corruption detected"
                );

                self.health = EventLogHealth::Corrupted {
                    last_good_seq_no: last_good,
                    first_bad_seq_no: event.seq_no,
                    error_type: error_type.clone(),
                };

                return Err(EventLogError::CorruptionDetected(error_type));
            }

            prev_hash = event.event_hash.clone();
            last_good = Some(event.seq_no);
        }

        info!(events = events.len(), "Territory event log chain verified");
        self.health = EventLogHealth::Ok;
        Ok(())
    }

    #[cfg(test)]
    fn tamper_details(&self, seq_no: u64, details: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE territory_events SET details = ?1 WHERE seq_no = ?2",
            params![details, seq_no as i64],
        )?;
        Ok(())
    }
}

/// Hashed fields of one entry, in storage encoding
struct ChainFields<'a> {
    road_id: &'a str,
    kind: &'a str,
    actor: Option<i64>,
    wallet: Option<&'a str>,
    details: &'a str,
    created_at_ms: i64,
}

fn hash_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

struct RawEvent {
    seq_no: u64,
    road_id: String,
    event_type: String,
    actor_nation_id: Option<i64>,
    actor_wallet: Option<String>,
    details: String,
    created_at_ms: i64,
    event_hash: Vec<u8>,
    prev_event_hash: Vec<u8>,
}

impl RawEvent {
    fn chain_fields(&self) -> ChainFields<'_> {
        ChainFields {
            road_id: &self.road_id,
            kind: &self.event_type,
            actor: self.actor_nation_id,
            wallet: self.actor_wallet.as_deref(),
            details: &self.details,
            created_at_ms: self.created_at_ms,
        }
    }

    fn into_event(self) -> Result<TerritoryEvent> {
        let road_id = self
            .road_id
            .parse::<RoadId>()
            .map_err(|e| EventLogError::InvalidEvent(e.to_string()))?;
        let created_at = Utc
            .timestamp_millis_opt(self.created_at_ms)
            .single()
            .ok_or_else(|| EventLogError::InvalidEvent("invalid timestamp".to_string()))?;

        Ok(TerritoryEvent {
            seq_no: self.seq_no,
            road_id,
            event_type: self.event_type.parse()?,
            actor_nation_id: self.actor_nation_id.map(|n| NationId(n as u64)),
            actor_wallet: self.actor_wallet,
            details: serde_json::from_str(&self.details)?,
            created_at,
            event_hash: self.event_hash,
            prev_event_hash: self.prev_event_hash,
        })
    }
}
