//! Integration tests for the territory conquest engine
//!
//! This test suite validates:
//! - Full claim, attack and timeout scenarios across ledger, registry and contests
//! - Defense outcomes, capture and stake forfeiture
//! - Concurrent attacks, stakes and sweeps against one engine
//! - The persisted territory audit trail
//! - Game state restored from the state store after a restart

pub mod test_utils;

#[cfg(test)]
mod conquest_scenarios;

#[cfg(test)]
mod concurrency_tests;

#[cfg(test)]
mod audit_trail_tests;

#[cfg(test)]
mod state_store_tests;
