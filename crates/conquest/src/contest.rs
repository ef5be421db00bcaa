//! Contest records and the per-territory pending index.
//!
//! State machine: `pending -> resolved | expired_autowin`. The book refuses a
//! second pending contest on a territory and refuses to resolve anything that
//! is no longer pending, which is what makes sweeper resolution idempotent.

use chrono::{DateTime, Duration, Utc};
use roadwar_core::{ConquestError, ContestId, DiceType, NationId, Result, RoadId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::combat::{AttackBreakdown, DefenseBreakdown, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    Pending,
    /// Decided by a defender response
    Resolved,
    /// Defender missed the deadline
    ExpiredAutowin,
}

impl ContestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestStatus::Pending => "pending",
            ContestStatus::Resolved => "resolved",
            ContestStatus::ExpiredAutowin => "expired_autowin",
        }
    }
}

impl fmt::Display for ContestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContestStatus {
    type Err = ConquestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ContestStatus::Pending),
            "resolved" => Ok(ContestStatus::Resolved),
            "expired_autowin" => Ok(ContestStatus::ExpiredAutowin),
            other => Err(ConquestError::Validation(format!(
                "Unknown contest status: {}",
                other
            ))),
        }
    }
}

/// An attack and its resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contest {
    pub id: ContestId,
    pub road_id: RoadId,
    pub attacker_nation_id: NationId,
    /// Controller when the attack was made; never re-derived
    pub defender_nation_id: NationId,
    pub attacker_wallet: String,
    pub attack_dice_type: DiceType,
    pub attack: AttackBreakdown,
    pub attack_power: f64,
    pub defense: Option<DefenseBreakdown>,
    pub defense_power: Option<f64>,
    pub status: ContestStatus,
    pub created_at: DateTime<Utc>,
    pub defense_deadline: DateTime<Utc>,
    pub winner_nation_id: Option<NationId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub burn_intent_id: Uuid,
    pub defense_burn_intent_id: Option<Uuid>,
}

impl Contest {
    pub fn is_pending(&self) -> bool {
        self.status == ContestStatus::Pending
    }

    /// Past the defense deadline; the deadline instant itself is still open
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.defense_deadline
    }

    pub fn nation_of(&self, side: Side) -> NationId {
        match side {
            Side::Attacker => self.attacker_nation_id,
            Side::Defender => self.defender_nation_id,
        }
    }

    pub fn involves(&self, nation: NationId) -> bool {
        self.attacker_nation_id == nation || self.defender_nation_id == nation
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.defense_deadline - now).max(Duration::zero())
    }
}

/// Fields of a contest about to be opened
#[derive(Debug, Clone)]
pub struct NewContest {
    pub road_id: RoadId,
    pub attacker_nation_id: NationId,
    pub defender_nation_id: NationId,
    pub attacker_wallet: String,
    pub attack: AttackBreakdown,
    pub created_at: DateTime<Utc>,
    pub defense_deadline: DateTime<Utc>,
    pub burn_intent_id: Uuid,
}

/// How a pending contest ends
#[derive(Debug, Clone)]
pub struct Resolution {
    pub status: ContestStatus,
    pub defense: DefenseBreakdown,
    pub winner: Side,
    pub defense_burn_intent_id: Option<Uuid>,
    pub resolved_at: DateTime<Utc>,
}

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct ContestFilter {
    pub status: Option<ContestStatus>,
    pub nation_id: Option<NationId>,
}

#[derive(Debug, Clone, Default)]
pub struct ContestBook {
    contests: HashMap<ContestId, Contest>,
    pending_by_road: HashMap<RoadId, ContestId>,
    next_id: u64,
}

impl ContestBook {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Book holding previously persisted contests.
    ///
    /// Two pending contests on one territory cannot be restored.
    pub fn restore(contests: impl IntoIterator<Item = Contest>) -> Result<Self> {
        let mut book = Self::new();
        for contest in contests {
            if contest.is_pending() {
                book.ensure_no_pending(contest.road_id)?;
                book.pending_by_road.insert(contest.road_id, contest.id);
            }
            book.next_id = book.next_id.max(contest.id.0 + 1);
            book.contests.insert(contest.id, contest);
        }
        Ok(book)
    }

    pub fn get(&self, id: ContestId) -> Result<&Contest> {
        self.contests
            .get(&id)
            .ok_or_else(|| ConquestError::NotFound(format!("Contest {} not found", id)))
    }

    pub fn pending_for(&self, road: RoadId) -> Option<&Contest> {
        self.pending_by_road
            .get(&road)
            .and_then(|id| self.contests.get(id))
    }

    pub fn ensure_no_pending(&self, road: RoadId) -> Result<()> {
        match self.pending_by_road.get(&road) {
            Some(id) => Err(ConquestError::Conflict(format!(
                "{} is already under attack ({})",
                road, id
            ))),
            None => Ok(()),
        }
    }

    pub fn open(&mut self, new: NewContest) -> Result<&Contest> {
        self.ensure_no_pending(new.road_id)?;

        let id = ContestId(self.next_id.max(1));
        self.next_id = id.0 + 1;

        let contest = Contest {
            id,
            road_id: new.road_id,
            attacker_nation_id: new.attacker_nation_id,
            defender_nation_id: new.defender_nation_id,
            attacker_wallet: new.attacker_wallet,
            attack_dice_type: new.attack.roll.die,
            attack_power: new.attack.power,
            attack: new.attack,
            defense: None,
            defense_power: None,
            status: ContestStatus::Pending,
            created_at: new.created_at,
            defense_deadline: new.defense_deadline,
            winner_nation_id: None,
            resolved_at: None,
            burn_intent_id: new.burn_intent_id,
            defense_burn_intent_id: None,
        };

        self.pending_by_road.insert(contest.road_id, id);
        Ok(self.contests.entry(id).or_insert(contest))
    }

    /// Move a pending contest to a final status; anything else is a `Conflict`
    pub fn resolve(&mut self, id: ContestId, resolution: Resolution) -> Result<&Contest> {
        if resolution.status == ContestStatus::Pending {
            return Err(ConquestError::Internal(
                "a contest cannot be resolved to pending".to_string(),
            ));
        }

        let contest = self
            .contests
            .get_mut(&id)
            .ok_or_else(|| ConquestError::NotFound(format!("Contest {} not found", id)))?;

        if contest.status != ContestStatus::Pending {
            return Err(ConquestError::Conflict(format!(
                "Contest {} is already {}",
                id, contest.status
            )));
        }

        contest.status = resolution.status;
        contest.defense_power = Some(resolution.defense.power);
        contest.defense = Some(resolution.defense);
        contest.winner_nation_id = Some(contest.nation_of(resolution.winner));
        contest.resolved_at = Some(resolution.resolved_at);
        contest.defense_burn_intent_id = resolution.defense_burn_intent_id;

        self.pending_by_road.remove(&contest.road_id);
        Ok(contest)
    }

    /// Pending contests past their deadline, oldest deadline first
    pub fn expired_pending(&self, now: DateTime<Utc>) -> Vec<ContestId> {
        let mut expired: Vec<&Contest> = self
            .pending_by_road
            .values()
            .filter_map(|id| self.contests.get(id))
            .filter(|c| c.is_expired(now))
            .collect();
        expired.sort_by_key(|c| (c.defense_deadline, c.id));
        expired.into_iter().map(|c| c.id).collect()
    }

    /// Pending contests that are still open but expire within `within`
    pub fn expiring_within(&self, now: DateTime<Utc>, within: Duration) -> Vec<&Contest> {
        let horizon = now + within;
        let mut expiring: Vec<&Contest> = self
            .pending_by_road
            .values()
            .filter_map(|id| self.contests.get(id))
            .filter(|c| !c.is_expired(now) && c.defense_deadline <= horizon)
            .collect();
        expiring.sort_by_key(|c| (c.defense_deadline, c.id));
        expiring
    }

    /// Matching contests, newest first
    pub fn list(&self, filter: &ContestFilter) -> Vec<&Contest> {
        let mut found: Vec<&Contest> = self
            .contests
            .values()
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .filter(|c| filter.nation_id.map_or(true, |n| c.involves(n)))
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found
    }

    pub fn pending_count(&self) -> usize {
        self.pending_by_road.len()
    }

    pub fn len(&self) -> usize {
        self.contests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{attack_power, defense_power};
    use crate::dice::DiceRoll;
    use chrono::TimeZone;
    use roadwar_core::{ConquestConfig, Element};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn road(s: &str) -> RoadId {
        s.parse().unwrap()
    }

    fn new_contest(road_id: &str, at: DateTime<Utc>) -> NewContest {
        let config = ConquestConfig::default();
        NewContest {
            road_id: road(road_id),
            attacker_nation_id: NationId(2),
            defender_nation_id: NationId(1),
            attacker_wallet: "wallet-b".to_string(),
            attack: attack_power(
                &config,
                10_000,
                DiceRoll::new(DiceType::D6, 4),
                Element::Chaos,
                0.0,
            ),
            created_at: at,
            defense_deadline: at + Duration::hours(24),
            burn_intent_id: Uuid::new_v4(),
        }
    }

    fn resolution(status: ContestStatus, winner: Side) -> Resolution {
        Resolution {
            status,
            defense: defense_power(&ConquestConfig::default(), 10, None, 0.0),
            winner,
            defense_burn_intent_id: None,
            resolved_at: t0() + Duration::hours(25),
        }
    }

    #[test]
    fn test_one_pending_contest_per_territory() {
        let mut book = ContestBook::new();
        let first = book.open(new_contest("D10OUT", t0())).unwrap().id;
        assert!(matches!(
            book.open(new_contest("D10OUT", t0())),
            Err(ConquestError::Conflict(_))
        ));
        book.open(new_contest("D4UP", t0())).unwrap();
        assert_eq!(book.pending_count(), 2);

        book.resolve(first, resolution(ContestStatus::Resolved, Side::Defender))
            .unwrap();
        assert!(book.pending_for(road("D10OUT")).is_none());
        book.open(new_contest("D10OUT", t0())).unwrap();
    }

    #[test]
    fn test_resolve_happens_once() {
        let mut book = ContestBook::new();
        let id = book.open(new_contest("D10OUT", t0())).unwrap().id;

        let contest = book
            .resolve(id, resolution(ContestStatus::ExpiredAutowin, Side::Attacker))
            .unwrap();
        assert_eq!(contest.winner_nation_id, Some(NationId(2)));
        assert_eq!(contest.defense_power, Some(10.0));

        assert!(matches!(
            book.resolve(id, resolution(ContestStatus::Resolved, Side::Defender)),
            Err(ConquestError::Conflict(_))
        ));
        assert_eq!(book.get(id).unwrap().status, ContestStatus::ExpiredAutowin);
        assert!(matches!(
            book.get(ContestId(99)),
            Err(ConquestError::NotFound(_))
        ));
    }

    #[test]
    fn test_restore_rebuilds_pending_index_and_ids() {
        let mut book = ContestBook::new();
        let settled = book.open(new_contest("D2OUT", t0())).unwrap().id;
        book.resolve(settled, resolution(ContestStatus::Resolved, Side::Defender))
            .unwrap();
        let pending = book.open(new_contest("D2OUT", t0())).unwrap().clone();
        let records: Vec<Contest> = book
            .list(&ContestFilter::default())
            .into_iter()
            .cloned()
            .collect();

        let mut restored = ContestBook::restore(records.clone()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.pending_for(road("D2OUT")), Some(&pending));
        let next = restored.open(new_contest("D4OUT", t0())).unwrap().id;
        assert_eq!(next, ContestId(pending.id.0 + 1));

        // a second pending contest on the same road is refused
        let mut twin = pending.clone();
        twin.id = ContestId(50);
        let mut broken = records;
        broken.push(twin);
        assert!(matches!(
            ContestBook::restore(broken),
            Err(ConquestError::Conflict(_))
        ));
    }

    #[test]
    fn test_deadline_queries() {
        let mut book = ContestBook::new();
        let early = book.open(new_contest("D2OUT", t0())).unwrap().id;
        book.open(new_contest("D4OUT", t0() + Duration::hours(2))).unwrap();

        let deadline = t0() + Duration::hours(24);
        assert!(book.expired_pending(deadline).is_empty());
        assert_eq!(book.expired_pending(deadline + Duration::seconds(1)), vec![early]);

        let expiring = book.expiring_within(deadline + Duration::seconds(1), Duration::hours(1));
        assert!(expiring.is_empty());
        let expiring = book.expiring_within(deadline + Duration::seconds(1), Duration::hours(2));
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].road_id, road("D4OUT"));
    }

    #[test]
    fn test_listing_filters() {
        let mut book = ContestBook::new();
        let id = book.open(new_contest("D2OUT", t0())).unwrap().id;
        book.open(new_contest("D4OUT", t0() + Duration::minutes(1))).unwrap();
        book.resolve(id, resolution(ContestStatus::Resolved, Side::Defender))
            .unwrap();

        let all = book.list(&ContestFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].road_id, road("D4OUT"));

        let pending = book.list(&ContestFilter {
            status: Some(ContestStatus::Pending),
            nation_id: None,
        });
        assert_eq!(pending.len(), 1);

        let outsider = book.list(&ContestFilter {
            status: None,
            nation_id: Some(NationId(7)),
        });
        assert!(outsider.is_empty());
        assert_eq!(
            "expired_autowin".parse::<ContestStatus>().unwrap(),
            ContestStatus::ExpiredAutowin
        );
    }
}
