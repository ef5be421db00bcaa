//! Rainbow Roads conquest
//!
//! Dice combat, alliance effects, two-phase token burns and the contest
//! engine that drives territory ownership on the TEK8 grid, plus the
//! deadline sweeper that auto-resolves unanswered attacks.

pub mod alliance;
pub mod combat;
pub mod contest;
pub mod dice;
pub mod elements;
pub mod engine;
pub mod narrative;
pub mod nation;
pub mod store;
pub mod sweeper;
pub mod token;

pub use alliance::{
    Alliance, AllianceEffectResolver, AllianceModifiers, AllianceTable, AllianceType,
};
pub use combat::{AttackBreakdown, DefenseBreakdown, Side};
pub use contest::{Contest, ContestBook, ContestFilter, ContestStatus};
pub use dice::{DiceRoll, DiceRoller, RandomRoller, ScriptedRoller};
pub use elements::{matchup, recommended_attack_die, Advantage};
pub use engine::{
    AttackOutcome, AttackRequest, ClaimOutcome, ClaimRequest, Collaborators, CombatResult,
    ConquestEngine, DefendRequest, MapSnapshot, ResolvedContest, StakeListing, StakeOutcome,
    StakeRequest, TerritoryDetail, UnstakeOutcome, UnstakeRequest,
};
pub use nation::{InMemoryNationDirectory, Nation, NationDirectory, RatingDelta};
pub use store::{GameStore, StateChanges, StoreError, StoredState};
pub use sweeper::{DeadlineSweeper, ExpiryPreview, SweepReport};
pub use token::{
    BurnJournal, BurnReceipt, BurnRequest, BurnState, SimulatedTokenLedger, TokenError,
    TokenLedger,
};
