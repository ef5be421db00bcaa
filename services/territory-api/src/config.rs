use anyhow::{Context, Result};
use roadwar_conquest::{Alliance, AllianceTable, InMemoryNationDirectory, Nation};
use roadwar_core::{logging::LogFormat, ConquestConfig};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// SQLite file for territory events; in-memory when unset
    pub event_db_path: Option<PathBuf>,
    /// SQLite file for territories, stakes and contests; memory-only when unset
    pub state_db_path: Option<PathBuf>,
    pub sweep_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub log_format: LogFormat,
    pub conquest_config: Option<PathBuf>,
    pub world_seed: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8090,
            event_db_path: None,
            state_db_path: None,
            sweep_interval_secs: 60,
            request_timeout_ms: 10_000,
            log_format: LogFormat::Plain,
            conquest_config: None,
            world_seed: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        Ok(Config {
            port: parse_var("PORT", defaults.port)?,
            event_db_path: env::var("EVENT_DB_PATH").ok().map(PathBuf::from),
            state_db_path: env::var("STATE_DB_PATH").ok().map(PathBuf::from),
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            log_format: env::var("LOG_FORMAT")
                .map(|name| LogFormat::from_name(&name))
                .unwrap_or(defaults.log_format),
            conquest_config: env::var("CONQUEST_CONFIG").ok().map(PathBuf::from),
            world_seed: env::var("WORLD_SEED").ok().map(PathBuf::from),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Rule constants from `CONQUEST_CONFIG`, or the defaults
    pub fn load_conquest_config(&self) -> Result<ConquestConfig> {
        let config = match &self.conquest_config {
            Some(path) => ConquestConfig::from_file(path)
                .with_context(|| format!("loading conquest config {}", path.display()))?,
            None => ConquestConfig::default(),
        };
        config.validate().context("invalid conquest config")?;
        Ok(config)
    }

    pub fn load_world_seed(&self) -> Result<WorldSeed> {
        match &self.world_seed {
            Some(path) => WorldSeed::from_file(path),
            None => Ok(WorldSeed::default()),
        }
    }
}

/// Nations and alliances known to the service at startup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorldSeed {
    #[serde(default)]
    pub nations: Vec<Nation>,
    #[serde(default)]
    pub alliances: Vec<Alliance>,
}

impl WorldSeed {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading world seed {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("parsing world seed")
    }

    pub fn directory(&self) -> InMemoryNationDirectory {
        self.nations
            .iter()
            .cloned()
            .fold(InMemoryNationDirectory::new(), |dir, nation| dir.with(nation))
    }

    pub fn alliance_table(&self) -> AllianceTable {
        self.alliances
            .iter()
            .cloned()
            .fold(AllianceTable::new(), |table, alliance| table.with(alliance))
    }
}
