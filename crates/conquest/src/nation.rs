//! Nation lookup and rating progression.

use roadwar_core::{ConquestError, NationId, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Player nation as seen by the conquest engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nation {
    pub id: NationId,
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    pub founder_wallet: String,
    #[serde(default)]
    pub defense_rating: i64,
    #[serde(default)]
    pub attack_rating: i64,
}

/// Change to a nation's ratings after a committed action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatingDelta {
    pub attack: i64,
    pub defense: i64,
}

impl RatingDelta {
    pub fn attack(points: i64) -> Self {
        Self {
            attack: points,
            defense: 0,
        }
    }

    pub fn defense(points: i64) -> Self {
        Self {
            attack: 0,
            defense: points,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.attack == 0 && self.defense == 0
    }
}

/// Source of nation records.
///
/// A wallet acts for the nation it founded.
pub trait NationDirectory: Send + Sync {
    fn get_nation(&self, id: NationId) -> Result<Nation>;

    fn nation_for_wallet(&self, wallet: &str) -> Result<Nation>;

    /// All nations, for map legends
    fn list(&self) -> Vec<Nation>;

    /// Apply a rating change; ratings never drop below zero
    fn adjust_ratings(&self, id: NationId, delta: RatingDelta) -> Result<Nation>;
}

#[derive(Debug, Default)]
pub struct InMemoryNationDirectory {
    nations: RwLock<HashMap<NationId, Nation>>,
}

impl InMemoryNationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, nation: Nation) -> Self {
        self.insert(nation);
        self
    }

    /// Insert or replace a nation
    pub fn insert(&mut self, nation: Nation) {
        let nations = match self.nations.get_mut() {
            Ok(nations) => nations,
            Err(poisoned) => poisoned.into_inner(),
        };
        nations.insert(nation.id, nation);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<NationId, Nation>>> {
        self.nations
            .read()
            .map_err(|e| ConquestError::Internal(format!("Lock error: {}", e)))
    }
}

impl NationDirectory for InMemoryNationDirectory {
    fn get_nation(&self, id: NationId) -> Result<Nation> {
        self.read()?
            .get(&id)
            .cloned()
            .ok_or_else(|| ConquestError::NotFound(format!("Nation {} not found", id)))
    }

    fn nation_for_wallet(&self, wallet: &str) -> Result<Nation> {
        self.read()?
            .values()
            .find(|n| n.founder_wallet == wallet)
            .cloned()
            .ok_or_else(|| {
                ConquestError::NotFound(format!("No nation is founded by wallet {}", wallet))
            })
    }

    fn list(&self) -> Vec<Nation> {
        let mut nations: Vec<Nation> = match self.read() {
            Ok(nations) => nations.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        nations.sort_by_key(|n| n.id);
        nations
    }

    fn adjust_ratings(&self, id: NationId, delta: RatingDelta) -> Result<Nation> {
        let mut nations = self
            .nations
            .write()
            .map_err(|e| ConquestError::Internal(format!("Lock error: {}", e)))?;
        let nation = nations
            .get_mut(&id)
            .ok_or_else(|| ConquestError::NotFound(format!("Nation {} not found", id)))?;
        nation.attack_rating = nation.attack_rating.saturating_add(delta.attack).max(0);
        nation.defense_rating = nation.defense_rating.saturating_add(delta.defense).max(0);
        Ok(nation.clone())
    }
}
