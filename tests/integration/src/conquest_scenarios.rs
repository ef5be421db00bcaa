//! End-to-end conquest scenarios

use crate::test_utils::*;
use chrono::Duration;
use roadwar_conquest::{
    Alliance, AllianceTable, AllianceType, ContestStatus, DeadlineSweeper, DefendRequest, Side,
    StakeRequest, UnstakeRequest,
};
use roadwar_core::{ConquestError, DiceType, NationId, StakeState, TerritoryStatus};
use std::sync::Arc;
use tokio::sync::Notify;

#[test]
fn test_unanswered_attack_is_captured_by_the_sweeper() {
    let world = World::new(2);

    // QLZ realm: 500 000 is the minimum claim and gives defense 50
    world.claim("D10OUT", 1, 500_000);
    let territory = world.engine.territory(road("D10OUT")).unwrap();
    assert_eq!(territory.status, TerritoryStatus::Claimed);
    assert_eq!(territory.defense_level, 50);

    let min_burn = world.engine.min_burn(road("D10OUT")).unwrap();
    assert_eq!(min_burn, 50_000);

    world.dice.push(10);
    let outcome = world
        .engine
        .attack(World::attack_request("D10OUT", 2, min_burn, DiceType::D10), t0())
        .unwrap();
    assert_eq!(outcome.contest.attack_power, min_burn as f64 * 10.0 * 1.0 * 2.0);
    assert_eq!(
        world.engine.territory(road("D10OUT")).unwrap().status,
        TerritoryStatus::Contested
    );

    let sweeper = DeadlineSweeper::new(world.engine.clone(), 60, Arc::new(Notify::new()));

    // the deadline instant itself is still open
    let at_deadline = sweeper.sweep(outcome.contest.defense_deadline).unwrap();
    assert_eq!(at_deadline.checked, 0);

    let report = sweeper
        .sweep(outcome.contest.defense_deadline + Duration::seconds(1))
        .unwrap();
    assert_eq!(report.resolved.len(), 1);
    let resolved = &report.resolved[0];
    assert_eq!(resolved.contest.status, ContestStatus::ExpiredAutowin);
    assert_eq!(resolved.result.winner, Side::Attacker);
    assert_eq!(resolved.result.defense_power, 50.0);

    let territory = world.engine.territory(road("D10OUT")).unwrap();
    assert_eq!(territory.controller_nation_id, Some(NationId(2)));
    assert_eq!(territory.status, TerritoryStatus::Claimed);
    assert_eq!(territory.total_staked, 0);

    // nation 1 lost its stake
    let stakes = world.engine.wallet_stakes(&wallet(1), t0()).unwrap();
    assert_eq!(stakes.stakes[0].state, StakeState::Forfeited);
    assert_eq!(stakes.summary.active_count, 0);
}

#[test]
fn test_fortified_territory_holds_with_allied_defense() {
    let alliances = AllianceTable::new().with(Alliance::new(
        NationId(1),
        NationId(3),
        AllianceType::Federation,
    ));
    let world = World::with_alliances(3, alliances);

    world.claim("D20UP", 1, 250_000);
    world
        .engine
        .stake(
            StakeRequest {
                road_id: road("D20UP"),
                wallet: wallet(3),
                amount: 700_000,
                lock_days: 90,
            },
            t0(),
        )
        .unwrap();
    // 250 000 / 10 000 + 700 000 × 1.5 / 10 000
    let territory = world.engine.territory(road("D20UP")).unwrap();
    assert_eq!(territory.defense_level, 130);
    assert_eq!(territory.status, TerritoryStatus::Fortified);

    let min_burn = world.engine.min_burn(road("D20UP")).unwrap();
    assert_eq!(min_burn, 130_000);

    // Air against Water: disadvantaged, roll 2
    world.dice.push(2);
    let contest = world
        .engine
        .attack(World::attack_request("D20UP", 2, min_burn, DiceType::D8), t0())
        .unwrap()
        .contest;
    assert_eq!(contest.attack_power, 130_000.0 * 2.0 * 0.75);

    // D20 roll 10: 100 000 × 10, plus 25 % of 130 from the federation
    world.dice.push(10);
    let resolved = world
        .engine
        .defend(
            DefendRequest {
                contest_id: contest.id,
                wallet: wallet(1),
                burn_amount: Some(100_000),
                tx_signature: Some("sig-defense-1".to_string()),
            },
            t0() + Duration::hours(3),
        )
        .unwrap();

    assert_eq!(resolved.result.winner, Side::Defender);
    assert_eq!(resolved.result.defense_power, 130.0 + 1_000_000.0 + 32.5);
    assert_eq!(resolved.territory.status, TerritoryStatus::Fortified);
    assert_eq!(resolved.territory.controller_nation_id, Some(NationId(1)));
    assert_eq!(world.tokens.burned_by(&wallet(1)), 100_000);

    // a reused signature is rejected by the token ledger
    world.dice.push(1);
    let again = world
        .engine
        .attack(
            World::attack_request("D20UP", 2, min_burn, DiceType::D8),
            t0() + Duration::hours(4),
        )
        .unwrap();
    let reuse = world.engine.defend(
        DefendRequest {
            contest_id: again.contest.id,
            wallet: wallet(1),
            burn_amount: Some(10_000),
            tx_signature: Some("sig-defense-1".to_string()),
        },
        t0() + Duration::hours(5),
    );
    assert!(matches!(reuse, Err(ConquestError::ExternalFailure(_))));
    assert!(world.engine.contest(again.contest.id).unwrap().is_pending());
}

#[test]
fn test_captured_territory_forfeits_locked_stakes_and_can_be_retaken() {
    let world = World::new(3);
    world.claim("D6DWN", 1, 250_000);
    let locked = world
        .engine
        .stake(
            StakeRequest {
                road_id: road("D6DWN"),
                wallet: wallet(1),
                amount: 50_000,
                lock_days: 30,
            },
            t0(),
        )
        .unwrap()
        .stake;

    // Air against Earth is neutral; roll 8 is critical
    world.dice.push(8);
    let contest = world
        .engine
        .attack(World::attack_request("D6DWN", 2, 100_000, DiceType::D8), t0())
        .unwrap()
        .contest;
    let captured = world
        .engine
        .defend(
            DefendRequest {
                contest_id: contest.id,
                wallet: wallet(1),
                burn_amount: None,
                tx_signature: None,
            },
            t0() + Duration::hours(1),
        )
        .unwrap();
    assert_eq!(captured.result.winner, Side::Attacker);
    assert_eq!(captured.forfeited_stakes, 2);

    // forfeited stakes can no longer be withdrawn, even once unlocked
    let withdraw = world.engine.unstake(
        UnstakeRequest {
            stake_id: locked.id,
            wallet: wallet(1),
            amount: None,
        },
        t0() + Duration::days(31),
    );
    assert!(matches!(withdraw, Err(ConquestError::Conflict(_))));

    // new owner stakes up, then nation 3 takes it
    world
        .engine
        .stake(
            StakeRequest {
                road_id: road("D6DWN"),
                wallet: wallet(2),
                amount: 100_000,
                lock_days: 0,
            },
            t0() + Duration::hours(2),
        )
        .unwrap();
    assert_eq!(world.engine.min_burn(road("D6DWN")).unwrap(), 10_000);

    world.dice.push(4);
    let second = world
        .engine
        .attack(
            World::attack_request("D6DWN", 3, 10_000, DiceType::D4),
            t0() + Duration::hours(3),
        )
        .unwrap();
    // Fire overwhelms Earth
    assert_eq!(second.contest.attack_power, 10_000.0 * 4.0 * 1.5 * 2.0);
    assert_eq!(second.contest.defender_nation_id, NationId(2));
}
