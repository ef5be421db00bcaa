//! Token burns.
//!
//! Burning is two-phase. `prepare_burn` only builds an intent; game state is
//! applied after `confirm_burn` reports the on-chain confirmation. The
//! [`BurnJournal`] tracks every intent so that unconfirmed or orphaned burns
//! can be cleaned up or refunded.

use chrono::{DateTime, Duration, Utc};
use roadwar_core::{ConquestError, NationId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Token collaborator errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Burn rejected: {0}")]
    Rejected(String),

    #[error("Burn not confirmed: {0}")]
    Unconfirmed(String),

    #[error("Unknown burn intent: {0}")]
    UnknownIntent(Uuid),

    #[error("Token ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<TokenError> for ConquestError {
    fn from(error: TokenError) -> Self {
        ConquestError::ExternalFailure(error.to_string())
    }
}

/// What a burn pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnPurpose {
    Attack,
    Defense,
}

impl fmt::Display for BurnPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BurnPurpose::Attack => f.write_str("attack"),
            BurnPurpose::Defense => f.write_str("defense"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRequest {
    pub wallet: String,
    pub nation_id: NationId,
    pub amount: u64,
    pub purpose: BurnPurpose,
    /// What the burn is applied to, e.g. `road:D10OUT` or `contest:contest-3`
    pub target: String,
}

/// Off-chain intent built by the prepare step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnIntent {
    pub id: Uuid,
    pub request: BurnRequest,
    pub created_at: DateTime<Utc>,
}

/// Proof that a burn was confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnReceipt {
    pub intent_id: Uuid,
    pub tx_signature: String,
    pub amount: u64,
    pub confirmed_at: DateTime<Utc>,
}

/// External token ledger
pub trait TokenLedger: Send + Sync {
    /// Build a burn intent. Must not move any tokens.
    fn prepare_burn(
        &self,
        request: BurnRequest,
        now: DateTime<Utc>,
    ) -> Result<BurnIntent, TokenError>;

    /// Confirm the burn on chain, optionally against a client-supplied signature
    fn confirm_burn(
        &self,
        intent: &BurnIntent,
        tx_signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BurnReceipt, TokenError>;
}

/// Token ledger that confirms every burn locally.
///
/// Used for development and tests. A transaction signature can only confirm
/// one burn; failures can be switched on to exercise the error paths.
#[derive(Debug, Default)]
pub struct SimulatedTokenLedger {
    used_signatures: Mutex<HashSet<String>>,
    burned: Mutex<HashMap<String, u64>>,
    reject_prepare: AtomicBool,
    fail_confirm: AtomicBool,
}

impl SimulatedTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject_prepare(&self, reject: bool) {
        self.reject_prepare.store(reject, Ordering::SeqCst);
    }

    pub fn set_fail_confirm(&self, fail: bool) {
        self.fail_confirm.store(fail, Ordering::SeqCst);
    }

    /// Total confirmed burns of a wallet
    pub fn burned_by(&self, wallet: &str) -> u64 {
        self.burned
            .lock()
            .map(|burned| burned.get(wallet).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl TokenLedger for SimulatedTokenLedger {
    fn prepare_burn(
        &self,
        request: BurnRequest,
        now: DateTime<Utc>,
    ) -> Result<BurnIntent, TokenError> {
        if self.reject_prepare.load(Ordering::SeqCst) {
            return Err(TokenError::Rejected(format!(
                "wallet {} cannot burn {}",
                request.wallet, request.amount
            )));
        }
        if request.amount == 0 {
            return Err(TokenError::Rejected("burn amount must be positive".to_string()));
        }

        Ok(BurnIntent {
            id: Uuid::new_v4(),
            request,
            created_at: now,
        })
    }

    fn confirm_burn(
        &self,
        intent: &BurnIntent,
        tx_signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BurnReceipt, TokenError> {
        if self.fail_confirm.load(Ordering::SeqCst) {
            return Err(TokenError::Unconfirmed(format!(
                "intent {} timed out waiting for confirmation",
                intent.id
            )));
        }

        let signature = tx_signature
            .map(str::to_string)
            .unwrap_or_else(|| format!("sim-{}", intent.id.simple()));

        let mut used = self
            .used_signatures
            .lock()
            .map_err(|e| TokenError::Unavailable(format!("Lock error: {}", e)))?;
        if !used.insert(signature.clone()) {
            return Err(TokenError::Rejected(format!(
                "transaction {} already confirmed another burn",
                signature
            )));
        }
        drop(used);

        let mut burned = self
            .burned
            .lock()
            .map_err(|e| TokenError::Unavailable(format!("Lock error: {}", e)))?;
        let total = burned.entry(intent.request.wallet.clone()).or_insert(0);
        *total = total.saturating_add(intent.request.amount);

        Ok(BurnReceipt {
            intent_id: intent.id,
            tx_signature: signature,
            amount: intent.request.amount,
            confirmed_at: now,
        })
    }
}

/// Lifecycle of a burn intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnState {
    /// Intent built, not confirmed
    Prepared,
    /// Confirmed on chain, game state not yet applied
    Confirmed,
    /// Confirmed and applied to game state
    Applied,
    /// Confirmed but the game state it paid for could not be applied
    Orphaned,
    /// Confirmation failed
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub intent: BurnIntent,
    pub state: BurnState,
    pub tx_signature: Option<String>,
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Journal of burn intents
#[derive(Debug, Default)]
pub struct BurnJournal {
    entries: Mutex<HashMap<Uuid, JournalEntry>>,
}

impl BurnJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Uuid, JournalEntry>) -> T,
    ) -> Result<T, ConquestError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ConquestError::Internal(format!("Lock error: {}", e)))?;
        Ok(f(&mut entries))
    }

    pub fn record_prepared(&self, intent: &BurnIntent) -> Result<(), ConquestError> {
        self.with_entries(|entries| {
            entries.insert(
                intent.id,
                JournalEntry {
                    intent: intent.clone(),
                    state: BurnState::Prepared,
                    tx_signature: None,
                    note: None,
                    updated_at: intent.created_at,
                },
            );
        })
    }

    fn set_state(
        &self,
        id: Uuid,
        state: BurnState,
        tx_signature: Option<&str>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ConquestError> {
        self.with_entries(|entries| match entries.get_mut(&id) {
            Some(entry) => {
                entry.state = state;
                if let Some(sig) = tx_signature {
                    entry.tx_signature = Some(sig.to_string());
                }
                if note.is_some() {
                    entry.note = note;
                }
                entry.updated_at = now;
                debug!(intent_id = %id, state = ?state, "Burn journal updated");
                Ok(())
            }
            None => Err(ConquestError::Internal(format!(
                "burn intent {} missing from journal",
                id
            ))),
        })?
    }

    pub fn mark_confirmed(&self, receipt: &BurnReceipt) -> Result<(), ConquestError> {
        self.set_state(
            receipt.intent_id,
            BurnState::Confirmed,
            Some(&receipt.tx_signature),
            None,
            receipt.confirmed_at,
        )
    }

    pub fn mark_applied(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ConquestError> {
        self.set_state(id, BurnState::Applied, None, None, now)
    }

    pub fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ConquestError> {
        self.set_state(id, BurnState::Failed, None, Some(reason.to_string()), now)
    }

    /// A confirmed burn whose effect was lost; it stays in the journal for refund
    pub fn mark_orphaned(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ConquestError> {
        warn!(intent_id = %id, reason = reason, "Confirmed burn orphaned");
        self.set_state(id, BurnState::Orphaned, None, Some(reason.to_string()), now)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<JournalEntry>, ConquestError> {
        self.with_entries(|entries| entries.get(&id).cloned())
    }

    pub fn in_state(&self, state: BurnState) -> Result<Vec<JournalEntry>, ConquestError> {
        self.with_entries(|entries| {
            let mut found: Vec<JournalEntry> = entries
                .values()
                .filter(|e| e.state == state)
                .cloned()
                .collect();
            found.sort_by_key(|e| e.intent.created_at);
            found
        })
    }

    /// Drop prepared and failed intents older than `ttl`.
    ///
    /// Confirmed, applied and orphaned burns moved tokens and are kept.
    pub fn purge_stale(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize, ConquestError> {
        let purged = self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, e| {
                let stale = matches!(e.state, BurnState::Prepared | BurnState::Failed)
                    && now - e.updated_at >= ttl;
                !stale
            });
            before - entries.len()
        })?;

        if purged > 0 {
            info!(purged = purged, "Stale burn intents purged");
        }
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
