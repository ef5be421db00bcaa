//! Contest Engine
//!
//! Orchestrates claims, stakes, attacks, defenses and timeout resolution over
//! the stake ledger, the territory registry and the contest book.
//!
//! All game state sits behind one mutex, so stake/unstake recomputation and
//! contest creation never work from a stale read. Calls to collaborators
//! (alliances, dice, token ledger) happen outside that mutex: an attack
//! validates and snapshots, burns, then re-locks and re-validates before it
//! commits. A burn that was confirmed but loses that final check is journalled
//! as orphaned and the caller gets a `Conflict`.
//!
//! With a [`GameStore`] attached, every commit is written through before the
//! lock is released, and the engine starts from what the store holds.

use chrono::{DateTime, Duration, Utc};
use roadwar_core::{
    sum_amounts, ConquestConfig, ConquestError, ContestId, DiceType, Direction, LockPeriod,
    MapStats, NationId, NewTerritoryEvent, Result, RoadId, Stake, StakeId, StakeLedger,
    StakeTotals, Territory, TerritoryEvent, TerritoryEventKind, TerritoryEventLog,
    TerritoryRegistry, TerritoryStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alliance::{AllianceEffectResolver, AllianceModifiers, AllianceTable};
use crate::combat::{self, Side};
use crate::contest::{Contest, ContestBook, ContestFilter, ContestStatus, NewContest, Resolution};
use crate::dice::{DiceRoller, RandomRoller};
use crate::elements::recommended_attack_die;
use crate::narrative;
use crate::nation::{InMemoryNationDirectory, Nation, NationDirectory, RatingDelta};
use crate::store::{GameStore, StateChanges, StoredState};
use crate::token::{
    BurnIntent, BurnJournal, BurnPurpose, BurnReceipt, BurnRequest, SimulatedTokenLedger,
    TokenLedger,
};

/// Number of events shown on a territory detail
pub const RECENT_EVENT_LIMIT: usize = 10;

/// External services the engine consumes
#[derive(Clone)]
pub struct Collaborators {
    pub alliances: Arc<dyn AllianceEffectResolver>,
    pub tokens: Arc<dyn TokenLedger>,
    pub nations: Arc<dyn NationDirectory>,
    pub dice: Arc<dyn DiceRoller>,
}

impl Collaborators {
    /// Local collaborators: in-memory nations and alliances, simulated burns, random dice
    pub fn local(nations: InMemoryNationDirectory, alliances: AllianceTable) -> Self {
        Self {
            alliances: Arc::new(alliances),
            tokens: Arc::new(SimulatedTokenLedger::new()),
            nations: Arc::new(nations),
            dice: Arc::new(RandomRoller),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimRequest {
    pub road_id: RoadId,
    pub nation_id: NationId,
    /// Defaults to the realm minimum
    pub stake_amount: Option<u64>,
    pub wallet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StakeRequest {
    pub road_id: RoadId,
    pub wallet: String,
    pub amount: u64,
    pub lock_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnstakeRequest {
    pub stake_id: StakeId,
    pub wallet: String,
    /// Partial withdrawal; the whole stake when absent
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttackRequest {
    pub road_id: RoadId,
    pub wallet: String,
    pub burn_amount: u64,
    pub dice_type: DiceType,
    pub tx_signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DefendRequest {
    pub contest_id: ContestId,
    pub wallet: String,
    pub burn_amount: Option<u64>,
    pub tx_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub territory: Territory,
    pub stake: Stake,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeOutcome {
    pub stake: Stake,
    pub territory: Territory,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstakeOutcome {
    pub stake: Stake,
    pub withdrawn: u64,
    pub territory: Territory,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackOutcome {
    pub contest: Contest,
    pub narrative: String,
    pub min_burn: u64,
    pub alliance: AllianceModifiers,
    pub receipt: BurnReceipt,
}

/// Winner and powers of a decided contest
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatResult {
    pub winner: Side,
    pub winner_nation_id: NationId,
    pub attack_power: f64,
    pub defense_power: f64,
    pub margin: f64,
}

/// A contest that just left `pending`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContest {
    pub contest: Contest,
    pub territory: Territory,
    pub result: CombatResult,
    pub narrative: String,
    pub forfeited_stakes: usize,
}

/// Neighbour summary on a territory detail
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjacentCell {
    pub road_id: RoadId,
    pub status: TerritoryStatus,
    pub controller_nation_id: Option<NationId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerritoryDetail {
    pub territory: Territory,
    pub controller: Option<Nation>,
    pub stakes: Vec<Stake>,
    pub recent_events: Vec<TerritoryEvent>,
    pub active_contest: Option<Contest>,
    pub adjacent: Vec<AdjacentCell>,
    pub recommended_attack_die: DiceType,
    pub min_burn: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestSummary {
    pub contest_id: ContestId,
    pub road_id: RoadId,
    pub attacker_nation_id: NationId,
    pub defender_nation_id: NationId,
    pub attack_power: f64,
    pub defense_deadline: DateTime<Utc>,
}

impl From<&Contest> for ContestSummary {
    fn from(contest: &Contest) -> Self {
        Self {
            contest_id: contest.id,
            road_id: contest.road_id,
            attacker_nation_id: contest.attacker_nation_id,
            defender_nation_id: contest.defender_nation_id,
            attack_power: contest.attack_power,
            defense_deadline: contest.defense_deadline,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapCell {
    pub territory: Territory,
    pub active_contest: Option<ContestSummary>,
}

/// Whole-grid view: `grid[row][column]`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSnapshot {
    pub grid: Vec<Vec<MapCell>>,
    pub dice_types: Vec<DiceType>,
    pub directions: Vec<Direction>,
    pub nations: Vec<Nation>,
    pub active_contests: Vec<ContestSummary>,
    pub stats: MapStats,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeSummary {
    pub total_active: u64,
    pub active_count: usize,
    pub locked_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeListing {
    pub stakes: Vec<Stake>,
    pub summary: StakeSummary,
}

struct GameState {
    registry: TerritoryRegistry,
    ledger: StakeLedger,
    contests: ContestBook,
    store: Option<GameStore>,
}

impl GameState {
    fn fresh(config: &ConquestConfig) -> Self {
        Self {
            registry: TerritoryRegistry::new(config.fortify_threshold),
            ledger: StakeLedger::new(config.defense_scale),
            contests: ContestBook::new(),
            store: None,
        }
    }

    /// Rebuild registry, ledger and contest book from persisted records.
    ///
    /// A contested territory must have exactly one pending contest naming its
    /// controller as defender. Territory totals are re-derived from the stakes.
    fn rebuild(
        config: &ConquestConfig,
        stored: StoredState,
    ) -> Result<(TerritoryRegistry, StakeLedger, ContestBook)> {
        let mut registry = TerritoryRegistry::restore(config.fortify_threshold, stored.territories);
        let ledger = StakeLedger::restore(config.defense_scale, stored.stakes);
        let contests = ContestBook::restore(stored.contests)?;

        for road in RoadId::all() {
            let (status, controller, total_staked, defense_level) = {
                let t = registry.lookup(road);
                (t.status, t.controller_nation_id, t.total_staked, t.defense_level)
            };
            let pending = contests.pending_for(road);
            let consistent = match (status, pending) {
                (TerritoryStatus::Contested, Some(contest)) => {
                    controller == Some(contest.defender_nation_id)
                }
                (TerritoryStatus::Contested, None) | (_, Some(_)) => false,
                _ => true,
            };
            if !consistent {
                return Err(ConquestError::Internal(format!(
                    "stored {} is {} but its pending contest does not match",
                    road, status
                )));
            }

            let totals = ledger.totals(road);
            if totals.total_staked != total_staked || totals.defense_level != defense_level {
                warn!(
                    road_id = %road,
                    stored_total = total_staked,
                    derived_total = totals.total_staked,
                    "Stored territory totals differ from its stakes, re-deriving"
                );
                registry.apply_totals(road, totals);
            }
        }

        Ok((registry, ledger, contests))
    }
}

/// What an attack saw before leaving the lock
struct AttackSnapshot {
    attacker: Nation,
    defender: NationId,
    status: TerritoryStatus,
    version: u64,
    min_burn: u64,
    territory_die: DiceType,
}

pub struct ConquestEngine {
    config: ConquestConfig,
    state: Mutex<GameState>,
    events: Option<Mutex<TerritoryEventLog>>,
    journal: BurnJournal,
    collaborators: Collaborators,
}

impl ConquestEngine {
    pub fn new(config: ConquestConfig, collaborators: Collaborators) -> Self {
        Self {
            state: Mutex::new(GameState::fresh(&config)),
            config,
            events: None,
            journal: BurnJournal::new(),
            collaborators,
        }
    }

    /// Record territory history in `log`
    pub fn with_event_log(mut self, log: TerritoryEventLog) -> Self {
        self.events = Some(Mutex::new(log));
        self
    }

    /// Keep game state in `store`, starting from what it already holds
    pub fn with_store(self, store: GameStore) -> Result<Self> {
        let stored = store.load()?;
        let (registry, ledger, contests) = GameState::rebuild(&self.config, stored)?;
        info!(
            stakes = ledger.len(),
            contests = contests.len(),
            pending_contests = contests.pending_count(),
            "Game state restored"
        );

        let state = GameState {
            registry,
            ledger,
            contests,
            store: Some(store),
        };
        Ok(Self {
            state: Mutex::new(state),
            ..self
        })
    }

    pub fn config(&self) -> &ConquestConfig {
        &self.config
    }

    pub fn journal(&self) -> &BurnJournal {
        &self.journal
    }

    pub fn nations(&self) -> &Arc<dyn NationDirectory> {
        &self.collaborators.nations
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, GameState>> {
        self.state
            .lock()
            .map_err(|e| ConquestError::Internal(format!("Lock error: {}", e)))
    }

    /// Write a change through to the store while the state lock is held.
    ///
    /// On a failed write the in-memory state is rebuilt from the store, so it
    /// never runs ahead of what a restart would see.
    fn commit(&self, state: &mut GameState, changes: StateChanges) -> Result<()> {
        let Some(store) = state.store.as_mut() else {
            return Ok(());
        };
        let Err(e) = store.save(&changes) else {
            return Ok(());
        };

        error!(error = %e, "Failed to persist game state, reloading the saved state");
        let reloaded = store
            .load()
            .map_err(ConquestError::from)
            .and_then(|stored| GameState::rebuild(&self.config, stored));
        match reloaded {
            Ok((registry, ledger, contests)) => {
                state.registry = registry;
                state.ledger = ledger;
                state.contests = contests;
            }
            Err(reload) => error!(error = %reload, "Failed to reload game state"),
        }
        Err(e.into())
    }

    /// Ratings live in the nation directory; a failed update is logged, not returned
    fn rate(&self, nation: NationId, delta: RatingDelta) {
        if delta.is_zero() {
            return;
        }
        if let Err(e) = self.collaborators.nations.adjust_ratings(nation, delta) {
            warn!(nation_id = %nation, error = %e, "Failed to update nation ratings");
        }
    }

    /// Append committed events; the log is an audit trail, so failures are logged, not returned
    fn record(&self, events: Vec<NewTerritoryEvent>) {
        let Some(log) = &self.events else {
            return;
        };
        let mut log = match log.lock() {
            Ok(log) => log,
            Err(e) => {
                error!(error = %e, "Territory event log lock poisoned");
                return;
            }
        };
        for event in events {
            let road_id = event.road_id;
            let kind = event.kind;
            if let Err(e) = log.append(event) {
                error!(
                    road_id = %road_id,
                    event_type = %kind,
                    error = %e,
                    "Failed to append territory event"
                );
            }
        }
    }

    fn fortification_event(
        road: RoadId,
        change: Option<(TerritoryStatus, TerritoryStatus)>,
        totals: StakeTotals,
        now: DateTime<Utc>,
    ) -> Option<NewTerritoryEvent> {
        let kind = match change? {
            (_, TerritoryStatus::Fortified) => TerritoryEventKind::Fortified,
            (TerritoryStatus::Fortified, _) => TerritoryEventKind::Unfortified,
            _ => return None,
        };
        Some(
            NewTerritoryEvent::new(road, kind, now)
                .details(json!({ "defense_level": totals.defense_level })),
        )
    }

    // ------------------------------------------------------------------
    // Territory and stakes
    // ------------------------------------------------------------------

    /// Claim an unclaimed territory with an initial stake
    pub fn claim(&self, request: ClaimRequest, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let road = request.road_id;
        let nation = self.collaborators.nations.get_nation(request.nation_id)?;
        if nation.founder_wallet != request.wallet {
            return Err(ConquestError::Authorization(format!(
                "wallet does not act for {}",
                nation.name
            )));
        }

        let minimum = self.config.realm_minimum(road.realm());
        let amount = request.stake_amount.unwrap_or(minimum);
        if amount < minimum {
            return Err(ConquestError::Validation(format!(
                "Minimum stake for {} realm is {}",
                road.realm(),
                minimum
            )));
        }

        let (territory, stake) = {
            let mut state = self.lock_state()?;
            let version = state.registry.lookup(road).version;
            state.registry.check_claim(road, version)?;

            let stake = state.ledger.open_stake(
                road,
                nation.id,
                &request.wallet,
                amount,
                LockPeriod::None,
                now,
            )?;
            let totals = state.ledger.totals(road);
            let territory = state
                .registry
                .claim(road, version, nation.id, &request.wallet, totals, now)?
                .clone();
            self.commit(&mut state, StateChanges::new().territory(&territory).stake(&stake))?;
            (territory, stake)
        };

        let mut events = vec![NewTerritoryEvent::new(road, TerritoryEventKind::Claimed, now)
            .actor(nation.id, &request.wallet)
            .details(json!({
                "stake_amount": amount,
                "realm": road.realm(),
                "stake_id": stake.id,
            }))];
        if territory.status == TerritoryStatus::Fortified {
            events.push(
                NewTerritoryEvent::new(road, TerritoryEventKind::Fortified, now)
                    .details(json!({ "defense_level": territory.defense_level })),
            );
        }
        self.record(events);

        Ok(ClaimOutcome { territory, stake })
    }

    /// Add a stake to a controlled territory
    pub fn stake(&self, request: StakeRequest, now: DateTime<Utc>) -> Result<StakeOutcome> {
        let road = request.road_id;
        if request.amount == 0 {
            return Err(ConquestError::Validation(
                "Stake amount must be positive".to_string(),
            ));
        }
        let lock = LockPeriod::try_from(request.lock_days)?;

        let (stake, territory, totals, change) = {
            let mut state = self.lock_state()?;
            let current = state.registry.lookup(road);
            if current.status == TerritoryStatus::Unclaimed {
                return Err(ConquestError::NotFound(format!(
                    "{} is unclaimed. Claim it first.",
                    road
                )));
            }
            let nation = current.controller()?;

            let stake = state
                .ledger
                .open_stake(road, nation, &request.wallet, request.amount, lock, now)?;
            let totals = state.ledger.totals(road);
            let change = state.registry.apply_totals(road, totals);
            let territory = state.registry.lookup(road).clone();
            self.commit(&mut state, StateChanges::new().territory(&territory).stake(&stake))?;
            (stake, territory, totals, change)
        };

        self.rate(
            stake.nation_id,
            RatingDelta::defense(self.config.rating_points(stake.amount)),
        );

        let mut events = vec![NewTerritoryEvent::new(road, TerritoryEventKind::Staked, now)
            .actor(stake.nation_id, &request.wallet)
            .details(json!({
                "stake_id": stake.id,
                "amount": stake.amount,
                "lock_days": lock.days(),
                "total_staked": totals.total_staked,
            }))];
        events.extend(Self::fortification_event(road, change, totals, now));
        self.record(events);

        Ok(StakeOutcome { stake, territory })
    }

    /// Withdraw all or part of a stake once its lock has ended
    pub fn unstake(&self, request: UnstakeRequest, now: DateTime<Utc>) -> Result<UnstakeOutcome> {
        let (stake, withdrawn, territory, totals, change) = {
            let mut state = self.lock_state()?;
            state
                .ledger
                .check_withdraw(request.stake_id, &request.wallet, request.amount, now)?;

            let road = state.ledger.get(request.stake_id)?.territory;
            if state.registry.lookup(road).status == TerritoryStatus::Contested {
                return Err(ConquestError::Conflict(format!(
                    "Cannot unstake from {} while it is under attack",
                    road
                )));
            }

            let (stake, withdrawn) =
                state
                    .ledger
                    .withdraw(request.stake_id, &request.wallet, request.amount, now)?;
            let totals = state.ledger.totals(road);
            let change = state.registry.apply_totals(road, totals);
            let territory = state.registry.lookup(road).clone();
            self.commit(&mut state, StateChanges::new().territory(&territory).stake(&stake))?;
            (stake, withdrawn, territory, totals, change)
        };

        self.rate(
            stake.nation_id,
            RatingDelta::defense(-self.config.rating_points(withdrawn)),
        );

        let road = territory.road_id;
        let mut events = vec![NewTerritoryEvent::new(road, TerritoryEventKind::Unstaked, now)
            .actor(stake.nation_id, &request.wallet)
            .details(json!({
                "stake_id": stake.id,
                "amount": withdrawn,
                "total_staked": totals.total_staked,
            }))];
        events.extend(Self::fortification_event(road, change, totals, now));
        self.record(events);

        Ok(UnstakeOutcome {
            stake,
            withdrawn,
            territory,
        })
    }

    // ------------------------------------------------------------------
    // Contests
    // ------------------------------------------------------------------

    fn check_attack(
        &self,
        state: &GameState,
        road: RoadId,
        attacker: &Nation,
        burn_amount: u64,
    ) -> Result<AttackSnapshot> {
        let territory = state.registry.lookup(road);
        match territory.status {
            TerritoryStatus::Unclaimed => {
                return Err(ConquestError::Validation(format!(
                    "{} is unclaimed. Claim it instead!",
                    road
                )))
            }
            TerritoryStatus::Contested => {
                return Err(ConquestError::Conflict(format!(
                    "{} is already under attack",
                    road
                )))
            }
            TerritoryStatus::Claimed | TerritoryStatus::Fortified => {}
        }

        let defender = territory.controller()?;
        if defender == attacker.id {
            return Err(ConquestError::Validation(
                "Cannot attack your own territory".to_string(),
            ));
        }
        state.contests.ensure_no_pending(road)?;

        let min_burn = combat::min_burn(&self.config, state.ledger.totals(road));
        if burn_amount < min_burn {
            return Err(ConquestError::Validation(format!(
                "Minimum burn required: {} tokens",
                min_burn
            )));
        }

        Ok(AttackSnapshot {
            attacker: attacker.clone(),
            defender,
            status: territory.status,
            version: territory.version,
            min_burn,
            territory_die: territory.dice_type,
        })
    }

    /// Burn through the token ledger, keeping the journal in step
    fn burn(
        &self,
        request: BurnRequest,
        tx_signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(BurnIntent, BurnReceipt)> {
        let intent = self.collaborators.tokens.prepare_burn(request, now)?;
        self.journal.record_prepared(&intent)?;

        match self
            .collaborators
            .tokens
            .confirm_burn(&intent, tx_signature, now)
        {
            Ok(receipt) => {
                self.journal.mark_confirmed(&receipt)?;
                Ok((intent, receipt))
            }
            Err(e) => {
                warn!(intent_id = %intent.id, error = %e, "Burn confirmation failed");
                self.journal.mark_failed(intent.id, &e.to_string(), now)?;
                Err(e.into())
            }
        }
    }

    fn orphan(&self, intent_id: Uuid, error: ConquestError, now: DateTime<Utc>) -> ConquestError {
        let reason = error.to_string();
        if let Err(journal_error) = self.journal.mark_orphaned(intent_id, &reason, now) {
            error!(
                intent_id = %intent_id,
                error = %journal_error,
                "Failed to journal orphaned burn"
            );
        }
        error
    }

    /// Open a contest on a territory.
    ///
    /// Validation and the alliance check happen before any tokens move. The
    /// contest is only created once the burn is confirmed.
    pub fn attack(&self, request: AttackRequest, now: DateTime<Utc>) -> Result<AttackOutcome> {
        let road = request.road_id;
        if request.burn_amount == 0 {
            return Err(ConquestError::Validation(
                "burnAmount must be positive".to_string(),
            ));
        }
        let attacker = self.collaborators.nations.nation_for_wallet(&request.wallet)?;

        let snapshot = {
            let state = self.lock_state()?;
            self.check_attack(&state, road, &attacker, request.burn_amount)?
        };

        let alliance = self
            .collaborators
            .alliances
            .resolve(snapshot.attacker.id, snapshot.defender);
        if alliance.blocked {
            return Err(ConquestError::Forbidden(format!(
                "An alliance between {} and {} forbids this attack",
                snapshot.attacker.id, snapshot.defender
            )));
        }

        let roll = self.collaborators.dice.roll(request.dice_type);
        let breakdown = combat::attack_power(
            &self.config,
            request.burn_amount,
            roll,
            snapshot.territory_die.element(),
            alliance.attack_bonus_pct,
        );

        let (intent, receipt) = self.burn(
            BurnRequest {
                wallet: request.wallet.clone(),
                nation_id: snapshot.attacker.id,
                amount: request.burn_amount,
                purpose: BurnPurpose::Attack,
                target: format!("road:{}", road),
            },
            request.tx_signature.as_deref(),
            now,
        )?;

        let contest = {
            let mut state = self.lock_state()?;

            // The burn is paid; the territory must still be the one we priced
            let recheck = self
                .check_attack(&state, road, &snapshot.attacker, request.burn_amount)
                .and_then(|current| {
                    if current.defender != snapshot.defender || current.status != snapshot.status {
                        Err(ConquestError::Conflict(format!(
                            "{} changed hands during the attack",
                            road
                        )))
                    } else {
                        Ok(())
                    }
                });
            if let Err(e) = recheck {
                let e = match e {
                    ConquestError::Validation(msg) => ConquestError::Conflict(msg),
                    other => other,
                };
                return Err(self.orphan(intent.id, e, now));
            }

            // compare-and-swap against the version the attack was priced on
            let territory = match state.registry.begin_contest(road, snapshot.version, now) {
                Ok(territory) => territory.clone(),
                Err(e) => return Err(self.orphan(intent.id, e, now)),
            };
            let opened = state.contests.open(NewContest {
                road_id: road,
                attacker_nation_id: snapshot.attacker.id,
                defender_nation_id: snapshot.defender,
                attacker_wallet: request.wallet.clone(),
                attack: breakdown,
                created_at: now,
                defense_deadline: now + self.config.contest_window(),
                burn_intent_id: intent.id,
            });
            let contest = match opened {
                Ok(contest) => contest.clone(),
                Err(e) => return Err(self.orphan(intent.id, e, now)),
            };
            let changes = StateChanges::new().territory(&territory).contest(&contest);
            if let Err(e) = self.commit(&mut state, changes) {
                return Err(self.orphan(intent.id, e, now));
            }
            contest
        };
        self.journal.mark_applied(intent.id, now)?;
        self.rate(
            contest.attacker_nation_id,
            RatingDelta::attack(self.config.rating_points(request.burn_amount)),
        );

        info!(
            contest_id = %contest.id,
            road_id = %road,
            attacker = %contest.attacker_nation_id,
            defender = %contest.defender_nation_id,
            burn = request.burn_amount,
            roll = roll.roll,
            attack_power = contest.attack_power,
            "Contest opened"
        );

        self.record(vec![NewTerritoryEvent::new(road, TerritoryEventKind::Attacked, now)
            .actor(contest.attacker_nation_id, &request.wallet)
            .details(json!({
                "contest_id": contest.id,
                "burn_amount": request.burn_amount,
                "dice": roll.die,
                "roll": roll.roll,
                "critical": roll.critical,
                "attack_power": contest.attack_power,
                "tx_signature": receipt.tx_signature,
            }))]);

        let narrative = narrative::attack_narrative(
            &road.to_string(),
            &breakdown,
            self.config.contest_window().num_hours(),
        );

        Ok(AttackOutcome {
            contest,
            narrative,
            min_burn: snapshot.min_burn,
            alliance,
            receipt,
        })
    }

    fn check_defend(
        state: &GameState,
        contest_id: ContestId,
        defender: NationId,
        now: DateTime<Utc>,
    ) -> Result<Contest> {
        let contest = state.contests.get(contest_id)?;
        if contest.defender_nation_id != defender {
            return Err(ConquestError::Authorization(
                "Only the defending nation can respond to this contest".to_string(),
            ));
        }
        if !contest.is_pending() {
            return Err(ConquestError::Conflict(format!(
                "Contest {} is already {}",
                contest_id, contest.status
            )));
        }
        if contest.is_expired(now) {
            return Err(ConquestError::Conflict(format!(
                "Defense deadline for contest {} has passed",
                contest_id
            )));
        }
        Ok(contest.clone())
    }

    /// Respond to a pending contest as the defending nation
    pub fn defend(&self, request: DefendRequest, now: DateTime<Utc>) -> Result<ResolvedContest> {
        let defender = self
            .collaborators
            .nations
            .nation_for_wallet(&request.wallet)
            .map_err(|_| {
                ConquestError::Authorization(
                    "Only the defending nation can respond to this contest".to_string(),
                )
            })?;

        let contest = {
            let state = self.lock_state()?;
            Self::check_defend(&state, request.contest_id, defender.id, now)?
        };

        let alliance = self
            .collaborators
            .alliances
            .resolve(contest.attacker_nation_id, contest.defender_nation_id);

        let burn_amount = request.burn_amount.filter(|amount| *amount > 0);
        let burn = match burn_amount {
            Some(amount) => {
                let roll = self.collaborators.dice.roll(contest.road_id.dice);
                let (intent, _receipt) = self.burn(
                    BurnRequest {
                        wallet: request.wallet.clone(),
                        nation_id: defender.id,
                        amount,
                        purpose: BurnPurpose::Defense,
                        target: format!("contest:{}", contest.id),
                    },
                    request.tx_signature.as_deref(),
                    now,
                )?;
                Some((amount, roll, intent.id))
            }
            None => None,
        };

        let (resolved, events) = {
            let mut state = self.lock_state()?;
            if let Err(e) = Self::check_defend(&state, request.contest_id, defender.id, now) {
                return Err(match burn {
                    Some((_, _, intent_id)) => self.orphan(intent_id, e, now),
                    None => e,
                });
            }

            let defense_level = state.registry.lookup(contest.road_id).defense_level;
            let defense = combat::defense_power(
                &self.config,
                defense_level,
                burn.map(|(amount, roll, _)| (amount, roll)),
                alliance.defense_bonus_pct,
            );
            let winner = combat::winner(&self.config, contest.attack_power, defense.power);

            let settled = self.settle(
                &mut state,
                contest.id,
                Resolution {
                    status: ContestStatus::Resolved,
                    defense,
                    winner,
                    defense_burn_intent_id: burn.map(|(_, _, id)| id),
                    resolved_at: now,
                },
                Some(&request.wallet),
            );
            match (settled, burn) {
                (Ok(settled), _) => settled,
                (Err(e), Some((_, _, intent_id))) => return Err(self.orphan(intent_id, e, now)),
                (Err(e), None) => return Err(e),
            }
        };

        if let Some((_, _, intent_id)) = burn {
            self.journal.mark_applied(intent_id, now)?;
        }
        if resolved.result.winner == Side::Defender {
            self.rate(
                resolved.contest.defender_nation_id,
                RatingDelta::defense(self.config.defense_win_rating),
            );
        }
        self.record(events);

        Ok(resolved)
    }

    /// Resolve an expired pending contest as an automatic attacker win.
    ///
    /// Returns `Ok(None)` when the contest is no longer pending, so repeated
    /// or concurrent sweeps resolve each contest exactly once.
    pub fn resolve_expired(
        &self,
        contest_id: ContestId,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedContest>> {
        let (resolved, events) = {
            let mut state = self.lock_state()?;
            let contest = state.contests.get(contest_id)?;
            if !contest.is_pending() {
                return Ok(None);
            }
            if !contest.is_expired(now) {
                return Err(ConquestError::Conflict(format!(
                    "Contest {} is still within its defense window",
                    contest_id
                )));
            }

            let defense_level = state.registry.lookup(contest.road_id).defense_level;
            let defense = combat::defense_power(&self.config, defense_level, None, 0.0);

            self.settle(
                &mut state,
                contest_id,
                Resolution {
                    status: ContestStatus::ExpiredAutowin,
                    defense,
                    winner: Side::Attacker,
                    defense_burn_intent_id: None,
                    resolved_at: now,
                },
                None,
            )?
        };

        self.record(events);
        Ok(Some(resolved))
    }

    /// Apply a resolution to the contest, the registry and the ledger.
    ///
    /// Runs under the state lock. The registry is checked before the contest
    /// is touched, so a failure leaves everything unchanged.
    fn settle(
        &self,
        state: &mut GameState,
        contest_id: ContestId,
        resolution: Resolution,
        defender_wallet: Option<&str>,
    ) -> Result<(ResolvedContest, Vec<NewTerritoryEvent>)> {
        let now = resolution.resolved_at;
        let winner = resolution.winner;
        let timed_out = resolution.status == ContestStatus::ExpiredAutowin;

        let road = state.contests.get(contest_id)?.road_id;
        let current = state.registry.lookup(road);
        if current.status != TerritoryStatus::Contested {
            return Err(ConquestError::Internal(format!(
                "{} is {} while contest {} is pending",
                road, current.status, contest_id
            )));
        }

        let mut version = current.version;

        let contest = state.contests.resolve(contest_id, resolution)?.clone();

        let mut forfeited = Vec::new();
        if winner == Side::Attacker {
            state.registry.transfer_control(
                road,
                version,
                contest.attacker_nation_id,
                &contest.attacker_wallet,
                now,
            )?;
            forfeited = state
                .ledger
                .forfeit_nation(road, contest.defender_nation_id, now);
            let totals = state.ledger.totals(road);
            state.registry.apply_totals(road, totals);
            version = state.registry.lookup(road).version;
        }
        let territory = state.registry.end_contest(road, version)?.clone();
        self.commit(
            state,
            StateChanges::new()
                .territory(&territory)
                .contest(&contest)
                .stakes(&forfeited),
        )?;

        let defense = contest
            .defense
            .ok_or_else(|| ConquestError::Internal("resolved contest has no defense".to_string()))?;
        let attack_power = contest.attack_power;
        let defense_power = defense.power;
        let result = CombatResult {
            winner,
            winner_nation_id: contest.nation_of(winner),
            attack_power,
            defense_power,
            margin: (attack_power - defense_power).abs(),
        };

        info!(
            contest_id = %contest.id,
            road_id = %road,
            status = %contest.status,
            winner = %result.winner_nation_id,
            attack_power = attack_power,
            defense_power = defense_power,
            "Contest resolved"
        );

        let mut events = Vec::new();
        if !timed_out {
            let mut event = NewTerritoryEvent::new(road, TerritoryEventKind::Defended, now)
                .details(json!({
                    "contest_id": contest.id,
                    "burn_amount": defense.burn_amount,
                    "defense_power": defense_power,
                    "attack_power": attack_power,
                    "winner": winner,
                }));
            if let Some(wallet) = defender_wallet {
                event = event.actor(contest.defender_nation_id, wallet);
            }
            events.push(event);
        }
        if winner == Side::Attacker {
            events.push(
                NewTerritoryEvent::new(road, TerritoryEventKind::Captured, now)
                    .actor(contest.attacker_nation_id, &contest.attacker_wallet)
                    .details(json!({
                        "contest_id": contest.id,
                        "from_nation_id": contest.defender_nation_id,
                        "expired": timed_out,
                    })),
            );
        }
        if !forfeited.is_empty() {
            events.push(
                NewTerritoryEvent::new(road, TerritoryEventKind::StakesForfeited, now).details(
                    json!({
                        "nation_id": contest.defender_nation_id,
                        "stakes": forfeited.len(),
                        "amount": sum_amounts(&forfeited),
                    }),
                ),
            );
        }

        let narrative =
            narrative::resolution_narrative(&contest.attack, &defense, winner, timed_out);

        Ok((
            ResolvedContest {
                contest,
                territory,
                result,
                narrative,
                forfeited_stakes: forfeited.len(),
            },
            events,
        ))
    }

    /// Pending contests past their deadline
    pub fn expired_contests(&self, now: DateTime<Utc>) -> Result<Vec<ContestId>> {
        Ok(self.lock_state()?.contests.expired_pending(now))
    }

    /// Pending contests expiring within `within`
    pub fn expiring_contests(&self, now: DateTime<Utc>, within: Duration) -> Result<Vec<Contest>> {
        Ok(self
            .lock_state()?
            .contests
            .expiring_within(now, within)
            .into_iter()
            .cloned()
            .collect())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn territory(&self, road: RoadId) -> Result<Territory> {
        Ok(self.lock_state()?.registry.lookup(road).clone())
    }

    pub fn contest(&self, contest_id: ContestId) -> Result<Contest> {
        Ok(self.lock_state()?.contests.get(contest_id)?.clone())
    }

    pub fn min_burn(&self, road: RoadId) -> Result<u64> {
        let state = self.lock_state()?;
        Ok(combat::min_burn(&self.config, state.ledger.totals(road)))
    }

    pub fn detail(&self, road_id: &str) -> Result<TerritoryDetail> {
        let (territory, stakes, active_contest, adjacent, min_burn) = {
            let state = self.lock_state()?;
            let territory = state.registry.find(road_id)?.clone();
            let road = territory.road_id;
            let adjacent = state
                .registry
                .adjacent_of(road)
                .into_iter()
                .map(|t| AdjacentCell {
                    road_id: t.road_id,
                    status: t.status,
                    controller_nation_id: t.controller_nation_id,
                })
                .collect();
            (
                territory,
                state.ledger.active_stakes(road),
                state.contests.pending_for(road).cloned(),
                adjacent,
                combat::min_burn(&self.config, state.ledger.totals(road)),
            )
        };

        let controller = match territory.controller_nation_id {
            Some(id) => self.collaborators.nations.get_nation(id).ok(),
            None => None,
        };
        let recent_events = self.recent_events(territory.road_id, RECENT_EVENT_LIMIT)?;

        Ok(TerritoryDetail {
            recommended_attack_die: recommended_attack_die(territory.dice_type),
            territory,
            controller,
            stakes,
            recent_events,
            active_contest,
            adjacent,
            min_burn,
        })
    }

    pub fn recent_events(&self, road: RoadId, limit: usize) -> Result<Vec<TerritoryEvent>> {
        let Some(log) = &self.events else {
            return Ok(Vec::new());
        };
        let log = log
            .lock()
            .map_err(|e| ConquestError::Internal(format!("Lock error: {}", e)))?;
        Ok(log.recent(road, limit)?)
    }

    pub fn map_snapshot(&self) -> Result<MapSnapshot> {
        let (grid, active_contests, stats) = {
            let state = self.lock_state()?;
            let grid: Vec<Vec<MapCell>> = Direction::ALL
                .iter()
                .map(|direction| {
                    DiceType::ALL
                        .iter()
                        .map(|dice| {
                            let road = RoadId::new(*dice, *direction);
                            MapCell {
                                territory: state.registry.lookup(road).clone(),
                                active_contest: state
                                    .contests
                                    .pending_for(road)
                                    .map(ContestSummary::from),
                            }
                        })
                        .collect()
                })
                .collect();
            let active_contests = state
                .contests
                .list(&ContestFilter {
                    status: Some(ContestStatus::Pending),
                    nation_id: None,
                })
                .into_iter()
                .map(ContestSummary::from)
                .collect();
            (grid, active_contests, state.registry.stats())
        };

        Ok(MapSnapshot {
            grid,
            dice_types: DiceType::ALL.to_vec(),
            directions: Direction::ALL.to_vec(),
            nations: self.collaborators.nations.list(),
            active_contests,
            stats,
        })
    }

    fn listing(stakes: Vec<Stake>, now: DateTime<Utc>) -> StakeListing {
        let active: Vec<&Stake> = stakes.iter().filter(|s| s.is_active()).collect();
        let summary = StakeSummary {
            total_active: sum_amounts(active.iter().copied()),
            active_count: active.len(),
            locked_count: active.iter().filter(|s| s.is_locked(now)).count(),
        };
        StakeListing { stakes, summary }
    }

    /// Active stakes of a territory
    pub fn territory_stakes(&self, road_id: &str, now: DateTime<Utc>) -> Result<StakeListing> {
        let state = self.lock_state()?;
        let road = state.registry.find(road_id)?.road_id;
        Ok(Self::listing(state.ledger.active_stakes(road), now))
    }

    /// Every stake of a wallet
    pub fn wallet_stakes(&self, wallet: &str, now: DateTime<Utc>) -> Result<StakeListing> {
        let state = self.lock_state()?;
        Ok(Self::listing(state.ledger.stakes_for_wallet(wallet), now))
    }

    /// Contests matching `filter`; a wallet narrows to its nation's contests
    pub fn contests(
        &self,
        mut filter: ContestFilter,
        wallet: Option<&str>,
    ) -> Result<Vec<Contest>> {
        if let Some(wallet) = wallet {
            let nation = self.collaborators.nations.nation_for_wallet(wallet)?;
            if filter.nation_id.map_or(false, |n| n != nation.id) {
                return Ok(Vec::new());
            }
            filter.nation_id = Some(nation.id);
        }
        let state = self.lock_state()?;
        Ok(state.contests.list(&filter).into_iter().cloned().collect())
    }

    /// Drop unconfirmed burn intents past their TTL
    pub fn purge_stale_intents(&self, now: DateTime<Utc>) -> Result<usize> {
        self.journal.purge_stale(now, self.config.burn_intent_ttl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alliance::{Alliance, AllianceType};
    use crate::dice::ScriptedRoller;
    use crate::token::{BurnState, TokenError};
    use chrono::TimeZone;

    const A: NationId = NationId(1);
    const B: NationId = NationId(2);
    const C: NationId = NationId(3);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
    }

    fn road(s: &str) -> RoadId {
        s.parse().unwrap()
    }

    fn nation(id: NationId, wallet: &str) -> Nation {
        Nation {
            id,
            name: format!("Nation {}", id.0),
            emoji: String::new(),
            founder_wallet: wallet.to_string(),
            defense_rating: 0,
            attack_rating: 0,
        }
    }

    struct Harness {
        engine: ConquestEngine,
        dice: Arc<ScriptedRoller>,
        tokens: Arc<SimulatedTokenLedger>,
        nations: Arc<InMemoryNationDirectory>,
    }

    fn collaborators(
        alliances: AllianceTable,
        tokens: Arc<dyn TokenLedger>,
    ) -> (Collaborators, Arc<ScriptedRoller>, Arc<InMemoryNationDirectory>) {
        let dice = Arc::new(ScriptedRoller::new([]));
        let nations = Arc::new(
            InMemoryNationDirectory::new()
                .with(nation(A, "wallet-a"))
                .with(nation(B, "wallet-b"))
                .with(nation(C, "wallet-c")),
        );
        let collaborators = Collaborators {
            alliances: Arc::new(alliances),
            tokens,
            nations: nations.clone(),
            dice: dice.clone(),
        };
        (collaborators, dice, nations)
    }

    fn harness_with(alliances: AllianceTable) -> Harness {
        let tokens = Arc::new(SimulatedTokenLedger::new());
        let (collaborators, dice, nations) = collaborators(alliances, tokens.clone());
        let engine = ConquestEngine::new(ConquestConfig::default(), collaborators)
            .with_event_log(TerritoryEventLog::open_in_memory().unwrap());
        Harness {
            engine,
            dice,
            tokens,
            nations,
        }
    }

    fn harness() -> Harness {
        harness_with(AllianceTable::new())
    }

    fn claim(
        engine: &ConquestEngine,
        road_id: &str,
        nation: NationId,
        wallet: &str,
        amount: u64,
    ) -> ClaimOutcome {
        engine
            .claim(
                ClaimRequest {
                    road_id: road(road_id),
                    nation_id: nation,
                    stake_amount: Some(amount),
                    wallet: wallet.to_string(),
                },
                t0(),
            )
            .unwrap()
    }

    fn stake_request(road_id: &str, wallet: &str, amount: u64, lock_days: u32) -> StakeRequest {
        StakeRequest {
            road_id: road(road_id),
            wallet: wallet.to_string(),
            amount,
            lock_days,
        }
    }

    fn attack_request(road_id: &str, wallet: &str, burn: u64, dice: DiceType) -> AttackRequest {
        AttackRequest {
            road_id: road(road_id),
            wallet: wallet.to_string(),
            burn_amount: burn,
            dice_type: dice,
            tx_signature: None,
        }
    }

    #[test]
    fn test_claim_computes_defense() {
        let h = harness();
        let outcome = claim(&h.engine, "D10OUT", A, "wallet-a", 500_000);
        assert_eq!(outcome.territory.status, TerritoryStatus::Claimed);
        assert_eq!(outcome.territory.defense_level, 50);
        assert_eq!(outcome.territory.controller_nation_id, Some(A));

        let detail = h.engine.detail("D10OUT").unwrap();
        assert_eq!(detail.recent_events.len(), 1);
        assert_eq!(detail.recent_events[0].event_type, TerritoryEventKind::Claimed);
        assert_eq!(detail.stakes.len(), 1);
        assert_eq!(detail.min_burn, 50_000);
    }

    #[test]
    fn test_claim_rules() {
        let h = harness();
        let below = h.engine.claim(
            ClaimRequest {
                road_id: road("D10OUT"),
                nation_id: A,
                stake_amount: Some(499_999),
                wallet: "wallet-a".to_string(),
            },
            t0(),
        );
        assert!(matches!(below, Err(ConquestError::Validation(_))));

        let impostor = h.engine.claim(
            ClaimRequest {
                road_id: road("D10OUT"),
                nation_id: A,
                stake_amount: None,
                wallet: "wallet-b".to_string(),
            },
            t0(),
        );
        assert!(matches!(impostor, Err(ConquestError::Authorization(_))));

        // missing amount defaults to the realm minimum
        let outcome = h
            .engine
            .claim(
                ClaimRequest {
                    road_id: road("D2U45"),
                    nation_id: A,
                    stake_amount: None,
                    wallet: "wallet-a".to_string(),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(outcome.stake.amount, 100_000);

        let again = h.engine.claim(
            ClaimRequest {
                road_id: road("D2U45"),
                nation_id: B,
                stake_amount: None,
                wallet: "wallet-b".to_string(),
            },
            t0(),
        );
        assert!(matches!(again, Err(ConquestError::Conflict(_))));
        let untouched = h.engine.territory(road("D10OUT")).unwrap();
        assert_eq!(untouched.status, TerritoryStatus::Unclaimed);
    }

    #[test]
    fn test_staking_fortifies_and_unstaking_downgrades() {
        let h = harness();
        claim(&h.engine, "D10OUT", A, "wallet-a", 500_000);

        assert!(matches!(
            h.engine.stake(stake_request("D4UP", "w", 10, 0), t0()),
            Err(ConquestError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.stake(stake_request("D10OUT", "w", 0, 0), t0()),
            Err(ConquestError::Validation(_))
        ));

        let outcome = h
            .engine
            .stake(stake_request("D10OUT", "ally", 500_000, 0), t0())
            .unwrap();
        assert_eq!(outcome.territory.defense_level, 100);
        assert_eq!(outcome.territory.status, TerritoryStatus::Fortified);

        let down = h
            .engine
            .unstake(
                UnstakeRequest {
                    stake_id: outcome.stake.id,
                    wallet: "ally".into(),
                    amount: Some(1),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(down.territory.status, TerritoryStatus::Claimed);
        assert_eq!(down.territory.total_staked, 999_999);

        let kinds: Vec<TerritoryEventKind> = h
            .engine
            .recent_events(road("D10OUT"), 10)
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TerritoryEventKind::Unfortified,
                TerritoryEventKind::Unstaked,
                TerritoryEventKind::Fortified,
                TerritoryEventKind::Staked,
                TerritoryEventKind::Claimed,
            ]
        );
    }

    #[test]
    fn test_locked_stake_cannot_be_withdrawn() {
        let h = harness();
        claim(&h.engine, "D4UP", A, "wallet-a", 250_000);
        let stake = h
            .engine
            .stake(stake_request("D4UP", "wallet-a", 10_000, 30), t0())
            .unwrap()
            .stake;

        let request = UnstakeRequest {
            stake_id: stake.id,
            wallet: "wallet-a".into(),
            amount: None,
        };
        assert!(matches!(
            h.engine.unstake(request.clone(), t0() + Duration::days(29)),
            Err(ConquestError::Conflict(_))
        ));
        assert!(matches!(
            h.engine.unstake(
                UnstakeRequest { wallet: "wallet-b".into(), ..request.clone() },
                t0() + Duration::days(30)
            ),
            Err(ConquestError::Authorization(_))
        ));
        h.engine.unstake(request, t0() + Duration::days(30)).unwrap();
        assert!(matches!(
            h.engine.stake(stake_request("D4UP", "w", 1, 14), t0()),
            Err(ConquestError::Validation(_))
        ));
    }

    #[test]
    fn test_attack_min_burn_boundary() {
        let h = harness();
        claim(&h.engine, "D10OUT", A, "wallet-a", 500_000);
        let min = h.engine.min_burn(road("D10OUT")).unwrap();
        assert_eq!(min, 50_000);

        let short = h
            .engine
            .attack(attack_request("D10OUT", "wallet-b", min - 1, DiceType::D10), t0());
        assert!(matches!(short, Err(ConquestError::Validation(_))));
        assert_eq!(h.tokens.burned_by("wallet-b"), 0);

        h.engine
            .attack(attack_request("D10OUT", "wallet-b", min, DiceType::D10), t0())
            .unwrap();
        assert_eq!(h.tokens.burned_by("wallet-b"), min);
    }

    #[test]
    fn test_attack_rejections() {
        let alliances = AllianceTable::new().with(Alliance::new(A, C, AllianceType::Border));
        let h = harness_with(alliances);
        claim(&h.engine, "D10OUT", A, "wallet-a", 500_000);

        assert!(matches!(
            h.engine.attack(attack_request("D10OUT", "wallet-a", 60_000, DiceType::D10), t0()),
            Err(ConquestError::Validation(_))
        ));
        assert!(matches!(
            h.engine.attack(attack_request("D10OUT", "wallet-c", 60_000, DiceType::D10), t0()),
            Err(ConquestError::Forbidden(_))
        ));
        assert!(matches!(
            h.engine.attack(attack_request("D4UP", "wallet-b", 60_000, DiceType::D10), t0()),
            Err(ConquestError::Validation(_))
        ));
        assert!(matches!(
            h.engine.attack(attack_request("D10OUT", "nobody", 60_000, DiceType::D10), t0()),
            Err(ConquestError::NotFound(_))
        ));

        h.engine
            .attack(attack_request("D10OUT", "wallet-b", 60_000, DiceType::D10), t0())
            .unwrap();
        assert!(matches!(
            h.engine.attack(attack_request("D10OUT", "wallet-b", 60_000, DiceType::D10), t0()),
            Err(ConquestError::Conflict(_))
        ));
        assert_eq!(h.tokens.burned_by("wallet-c"), 0);
    }

    #[test]
    fn test_failed_burn_leaves_state_untouched() {
        let h = harness();
        claim(&h.engine, "D10OUT", A, "wallet-a", 500_000);
        h.tokens.set_fail_confirm(true);

        let result = h
            .engine
            .attack(attack_request("D10OUT", "wallet-b", 60_000, DiceType::D10), t0());
        assert!(matches!(result, Err(ConquestError::ExternalFailure(_))));
        let territory = h.engine.territory(road("D10OUT")).unwrap();
        assert_eq!(territory.status, TerritoryStatus::Claimed);
        assert_eq!(h.engine.journal().in_state(BurnState::Failed).unwrap().len(), 1);

        assert_eq!(h.engine.purge_stale_intents(t0() + Duration::minutes(10)).unwrap(), 1);
        assert!(h.engine.journal().is_empty());
    }

    #[test]
    fn test_critical_attack_then_timeout_capture() {
        let h = harness();
        claim(&h.engine, "D10OUT", A, "wallet-a", 500_000);
        let min = h.engine.min_burn(road("D10OUT")).unwrap();

        h.dice.push(10);
        let outcome = h
            .engine
            .attack(attack_request("D10OUT", "wallet-b", min, DiceType::D10), t0())
            .unwrap();
        let contest = outcome.contest;
        assert_eq!(contest.status, ContestStatus::Pending);
        assert_eq!(contest.attack_power, min as f64 * 10.0 * 1.0 * 2.0);
        assert_eq!(contest.defense_deadline, t0() + Duration::hours(24));
        let territory = h.engine.territory(road("D10OUT")).unwrap();
        assert_eq!(territory.status, TerritoryStatus::Contested);

        // locked in while contested
        let stake_id = h.engine.territory_stakes("D10OUT", t0()).unwrap().stakes[0].id;
        let unstake = UnstakeRequest {
            stake_id,
            wallet: "wallet-a".into(),
            amount: None,
        };
        assert!(matches!(
            h.engine.unstake(unstake, t0()),
            Err(ConquestError::Conflict(_))
        ));

        let deadline = contest.defense_deadline;
        assert!(matches!(
            h.engine.resolve_expired(contest.id, deadline),
            Err(ConquestError::Conflict(_))
        ));

        let resolved = h
            .engine
            .resolve_expired(contest.id, deadline + Duration::seconds(1))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.contest.status, ContestStatus::ExpiredAutowin);
        assert_eq!(resolved.contest.winner_nation_id, Some(B));
        assert_eq!(resolved.result.defense_power, 50.0);
        assert_eq!(resolved.territory.controller_nation_id, Some(B));
        assert_eq!(resolved.territory.status, TerritoryStatus::Claimed);
        assert_eq!(resolved.territory.defense_level, 0);
        assert_eq!(resolved.forfeited_stakes, 1);

        // second resolution is a no-op
        assert!(h
            .engine
            .resolve_expired(contest.id, deadline + Duration::seconds(2))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_defend_rules_and_defender_win() {
        let alliances = AllianceTable::new().with(Alliance::new(A, C, AllianceType::Defense));
        let h = harness_with(alliances);
        claim(&h.engine, "D6OUT", A, "wallet-a", 500_000);

        // D6 Earth vs a D6 Earth territory: neutral, roll 1
        h.dice.push(1);
        let contest = h
            .engine
            .attack(attack_request("D6OUT", "wallet-b", 50_000, DiceType::D6), t0())
            .unwrap()
            .contest;
        assert_eq!(contest.attack_power, 50_000.0);

        let defend = |wallet: &str, burn: Option<u64>, at: DateTime<Utc>| {
            h.engine.defend(
                DefendRequest {
                    contest_id: contest.id,
                    wallet: wallet.to_string(),
                    burn_amount: burn,
                    tx_signature: None,
                },
                at,
            )
        };

        assert!(matches!(
            defend("wallet-b", None, t0()),
            Err(ConquestError::Authorization(_))
        ));
        assert!(matches!(
            defend("wallet-a", None, t0() + Duration::hours(25)),
            Err(ConquestError::Conflict(_))
        ));

        // defender die is the territory's D6; roll 6 is critical: 10_000 × 6 × 2
        h.dice.push(6);
        let resolved = defend("wallet-a", Some(10_000), t0() + Duration::hours(1)).unwrap();
        assert_eq!(resolved.result.winner, Side::Defender);
        assert_eq!(resolved.result.defense_power, 50.0 + 120_000.0 + 12.5);
        assert_eq!(resolved.contest.status, ContestStatus::Resolved);
        assert_eq!(resolved.territory.status, TerritoryStatus::Claimed);
        assert_eq!(resolved.territory.controller_nation_id, Some(A));
        assert_eq!(h.tokens.burned_by("wallet-a"), 10_000);

        assert!(matches!(
            defend("wallet-a", None, t0() + Duration::hours(2)),
            Err(ConquestError::Conflict(_))
        ));
    }

    #[test]
    fn test_passive_defense_loses_to_strong_attack() {
        let h = harness();
        claim(&h.engine, "D20D45", A, "wallet-a", 100_000);

        h.dice.push(5);
        let contest = h
            .engine
            .attack(attack_request("D20D45", "wallet-b", 10_000, DiceType::D8), t0())
            .unwrap()
            .contest;
        // Air vs Water: disadvantaged
        assert_eq!(contest.attack_power, 10_000.0 * 5.0 * 0.75);

        let resolved = h
            .engine
            .defend(
                DefendRequest {
                    contest_id: contest.id,
                    wallet: "wallet-a".into(),
                    burn_amount: None,
                    tx_signature: None,
                },
                t0() + Duration::minutes(5),
            )
            .unwrap();
        assert_eq!(resolved.result.winner, Side::Attacker);
        assert_eq!(resolved.territory.controller_nation_id, Some(B));
        assert_eq!(resolved.territory.controller_wallet.as_deref(), Some("wallet-b"));

        let kinds: Vec<TerritoryEventKind> = h
            .engine
            .recent_events(road("D20D45"), 3)
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TerritoryEventKind::StakesForfeited,
                TerritoryEventKind::Captured,
                TerritoryEventKind::Defended,
            ]
        );
    }

    #[test]
    fn test_map_and_listings() {
        let h = harness();
        claim(&h.engine, "D10OUT", A, "wallet-a", 500_000);
        claim(&h.engine, "D2UP", B, "wallet-b", 250_000);
        h.engine
            .attack(attack_request("D10OUT", "wallet-b", 50_000, DiceType::D4), t0())
            .unwrap();

        let map = h.engine.map_snapshot().unwrap();
        assert_eq!(map.grid.len(), 5);
        assert!(map.grid.iter().all(|row| row.len() == 8));
        assert_eq!(map.grid[0][4].territory.road_id, road("D10OUT"));
        assert!(map.grid[0][4].active_contest.is_some());
        assert_eq!(map.stats.contested, 1);
        assert_eq!(map.stats.claimed, 1);
        assert_eq!(map.stats.unclaimed, 38);
        assert_eq!(map.active_contests.len(), 1);
        assert_eq!(map.nations.len(), 3);

        let mine = h.engine.contests(ContestFilter::default(), Some("wallet-a")).unwrap();
        assert_eq!(mine.len(), 1);
        let outsider = h.engine.contests(ContestFilter::default(), Some("wallet-c")).unwrap();
        assert!(outsider.is_empty());

        let wallet = h.engine.wallet_stakes("wallet-b", t0()).unwrap();
        assert_eq!(wallet.summary.total_active, 250_000);
        assert_eq!(wallet.summary.locked_count, 0);

        let detail = h.engine.detail("D10OUT").unwrap();
        assert_eq!(detail.recommended_attack_die, DiceType::D100);
        assert!(detail.active_contest.is_some());
        assert_eq!(detail.adjacent.len(), 3);
        assert!(matches!(h.engine.detail("D3OUT"), Err(ConquestError::NotFound(_))));
    }

    /// Token ledger that runs a hook while a burn is being confirmed, to
    /// interleave another operation between an attack's snapshot and commit
    #[derive(Default)]
    struct InterleavingLedger {
        inner: SimulatedTokenLedger,
        hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl InterleavingLedger {
        fn during_next_confirm(&self, hook: impl FnOnce() + Send + 'static) {
            *self.hook.lock().unwrap() = Some(Box::new(hook));
        }
    }

    impl TokenLedger for InterleavingLedger {
        fn prepare_burn(
            &self,
            request: BurnRequest,
            now: DateTime<Utc>,
        ) -> std::result::Result<BurnIntent, TokenError> {
            self.inner.prepare_burn(request, now)
        }

        fn confirm_burn(
            &self,
            intent: &BurnIntent,
            tx_signature: Option<&str>,
            now: DateTime<Utc>,
        ) -> std::result::Result<BurnReceipt, TokenError> {
            let hook = self.hook.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.confirm_burn(intent, tx_signature, now)
        }
    }

    fn interleaving() -> (Arc<ConquestEngine>, Arc<InterleavingLedger>, Arc<ScriptedRoller>) {
        let tokens = Arc::new(InterleavingLedger::default());
        let (collaborators, dice, _) = collaborators(AllianceTable::new(), tokens.clone());
        let engine = Arc::new(ConquestEngine::new(ConquestConfig::default(), collaborators));
        (engine, tokens, dice)
    }

    #[test]
    fn test_stake_between_snapshot_and_commit_orphans_the_attack_burn() {
        let (engine, tokens, dice) = interleaving();
        claim(&engine, "D10OUT", A, "wallet-a", 500_000);
        let priced_at = engine.territory(road("D10OUT")).unwrap().version;

        // the extra stake keeps the controller and status but moves the version
        let staker = engine.clone();
        tokens.during_next_confirm(move || {
            staker
                .stake(stake_request("D10OUT", "ally", 10_000, 0), t0())
                .unwrap();
        });

        dice.push(3);
        let request = attack_request("D10OUT", "wallet-b", 60_000, DiceType::D10);
        let result = engine.attack(request, t0());
        assert!(matches!(result, Err(ConquestError::Conflict(_))));

        let orphaned = engine.journal().in_state(BurnState::Orphaned).unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].intent.request.wallet, "wallet-b");
        assert_eq!(tokens.inner.burned_by("wallet-b"), 60_000);

        let territory = engine.territory(road("D10OUT")).unwrap();
        assert_eq!(territory.status, TerritoryStatus::Claimed);
        assert_eq!(territory.total_staked, 510_000);
        assert_eq!(territory.version, priced_at + 1);
        assert!(engine.contests(ContestFilter::default(), None).unwrap().is_empty());
    }

    #[test]
    fn test_capture_between_burn_and_commit_orphans_the_attack_burn() {
        let (engine, tokens, dice) = interleaving();
        claim(&engine, "D10OUT", A, "wallet-a", 500_000);

        // B's roll, then C's roll for the capture that lands mid-burn
        dice.push(2);
        dice.push(5);
        let rival = engine.clone();
        tokens.during_next_confirm(move || {
            let contest = rival
                .attack(attack_request("D10OUT", "wallet-c", 100_000, DiceType::D10), t0())
                .unwrap()
                .contest;
            let resolved = rival
                .defend(
                    DefendRequest {
                        contest_id: contest.id,
                        wallet: "wallet-a".into(),
                        burn_amount: None,
                        tx_signature: None,
                    },
                    t0(),
                )
                .unwrap();
            assert_eq!(resolved.territory.controller_nation_id, Some(C));
        });

        let request = attack_request("D10OUT", "wallet-b", 60_000, DiceType::D10);
        let result = engine.attack(request, t0());
        assert!(matches!(result, Err(ConquestError::Conflict(_))));

        let orphaned = engine.journal().in_state(BurnState::Orphaned).unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].intent.request.wallet, "wallet-b");

        // only the rival's contest exists, and it is settled
        let contests = engine.contests(ContestFilter::default(), None).unwrap();
        assert_eq!(contests.len(), 1);
        assert_eq!(contests[0].attacker_nation_id, C);
        assert_eq!(contests[0].status, ContestStatus::Resolved);
        let territory = engine.territory(road("D10OUT")).unwrap();
        assert_eq!(territory.controller_nation_id, Some(C));
        assert_ne!(territory.status, TerritoryStatus::Contested);
    }

    #[test]
    fn test_ratings_follow_stakes_burns_and_defenses() {
        let h = harness();
        claim(&h.engine, "D6OUT", A, "wallet-a", 500_000);
        let rating = |id| {
            let nation = h.nations.get_nation(id).unwrap();
            (nation.defense_rating, nation.attack_rating)
        };

        let stake = h
            .engine
            .stake(stake_request("D6OUT", "ally", 250_000, 0), t0())
            .unwrap()
            .stake;
        assert_eq!(rating(A), (2, 0));

        h.dice.push(1);
        let contest = h
            .engine
            .attack(attack_request("D6OUT", "wallet-b", 100_000, DiceType::D6), t0())
            .unwrap()
            .contest;
        assert_eq!(rating(B), (0, 1));

        h.dice.push(6);
        let resolved = h
            .engine
            .defend(
                DefendRequest {
                    contest_id: contest.id,
                    wallet: "wallet-a".into(),
                    burn_amount: Some(10_000),
                    tx_signature: None,
                },
                t0() + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(resolved.result.winner, Side::Defender);
        assert_eq!(rating(A), (12, 0));

        h.engine
            .unstake(
                UnstakeRequest {
                    stake_id: stake.id,
                    wallet: "ally".into(),
                    amount: None,
                },
                t0() + Duration::hours(2),
            )
            .unwrap();
        assert_eq!(rating(A), (10, 0));
    }

    #[test]
    fn test_state_survives_restart_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.db");
        let stored_engine = || {
            let tokens = Arc::new(SimulatedTokenLedger::new());
            let (collaborators, dice, _) = collaborators(AllianceTable::new(), tokens);
            let engine = ConquestEngine::new(ConquestConfig::default(), collaborators)
                .with_store(GameStore::open(&path).unwrap())
                .unwrap();
            (engine, dice)
        };

        let (contest, stake) = {
            let (engine, dice) = stored_engine();
            claim(&engine, "D10OUT", A, "wallet-a", 500_000);
            let stake = engine
                .stake(stake_request("D10OUT", "ally", 100_000, 30), t0())
                .unwrap()
                .stake;
            dice.push(4);
            let contest = engine
                .attack(attack_request("D10OUT", "wallet-b", 60_000, DiceType::D10), t0())
                .unwrap()
                .contest;
            (contest, stake)
        };

        let (engine, _) = stored_engine();
        let territory = engine.territory(road("D10OUT")).unwrap();
        assert_eq!(territory.status, TerritoryStatus::Contested);
        assert_eq!(territory.controller_nation_id, Some(A));
        assert_eq!(territory.total_staked, 600_000);

        let pending = engine.contests(ContestFilter::default(), None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, contest.id);
        assert_eq!(pending[0].status, ContestStatus::Pending);

        // the lock survives too
        let early = UnstakeRequest {
            stake_id: stake.id,
            wallet: "ally".into(),
            amount: None,
        };
        assert!(matches!(
            engine.unstake(early, t0() + Duration::days(1)),
            Err(ConquestError::Conflict(_))
        ));

        // a restored pending contest still resolves, and new ids do not collide
        let resolved = engine
            .resolve_expired(contest.id, contest.defense_deadline + Duration::seconds(1))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.territory.controller_nation_id, Some(B));
        let next = claim(&engine, "D2UP", C, "wallet-c", 250_000);
        assert!(next.stake.id.0 > stake.id.0);

        drop(engine);
        let (engine, _) = stored_engine();
        let territory = engine.territory(road("D10OUT")).unwrap();
        assert_eq!(territory.controller_nation_id, Some(B));
        assert_eq!(territory.total_staked, 0);
        let contests = engine.contests(ContestFilter::default(), None).unwrap();
        assert_eq!(contests[0].status, ContestStatus::ExpiredAutowin);
    }
}
