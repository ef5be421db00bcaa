//! Concurrent access to one engine from many threads

use crate::test_utils::*;
use chrono::Duration;
use roadwar_conquest::{BurnState, DeadlineSweeper, StakeRequest};
use roadwar_core::{ConquestError, DiceType, TerritoryStatus};
use std::sync::{Arc, Barrier};
use std::thread;
use tokio::sync::Notify;

#[test]
fn test_racing_attacks_open_exactly_one_contest() {
    const ATTACKERS: u64 = 8;
    let world = World::new(ATTACKERS + 1);
    world.claim("D12OUT", 1, 500_000);

    let barrier = Arc::new(Barrier::new(ATTACKERS as usize));
    let handles: Vec<_> = (2..=ATTACKERS + 1)
        .map(|nation| {
            let engine = world.engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.attack(
                    World::attack_request("D12OUT", nation, 60_000, DiceType::D6),
                    t0(),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, ConquestError::Conflict(_)), "unexpected error: {}", e);
        }
    }

    assert_eq!(
        world.engine.territory(road("D12OUT")).unwrap().status,
        TerritoryStatus::Contested
    );

    // every confirmed burn is either applied to the contest or journalled for refund
    let journal = world.engine.journal();
    let applied = journal.in_state(BurnState::Applied).unwrap();
    let orphaned = journal.in_state(BurnState::Orphaned).unwrap();
    assert_eq!(applied.len(), 1);
    let burned: u64 = (2..=ATTACKERS + 1)
        .map(|nation| world.tokens.burned_by(&wallet(nation)))
        .sum();
    assert_eq!(burned, 60_000 * (1 + orphaned.len() as u64));
}

#[test]
fn test_concurrent_stakes_keep_totals_consistent() {
    const STAKERS: usize = 8;
    const STAKES_EACH: u64 = 10;
    let world = World::new(1);
    world.claim("D2UP", 1, 250_000);

    let handles: Vec<_> = (0..STAKERS)
        .map(|i| {
            let engine = world.engine.clone();
            thread::spawn(move || {
                for _ in 0..STAKES_EACH {
                    engine
                        .stake(
                            StakeRequest {
                                road_id: road("D2UP"),
                                wallet: format!("backer-{}", i),
                                amount: 10_000,
                                lock_days: 0,
                            },
                            t0(),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let territory = world.engine.territory(road("D2UP")).unwrap();
    assert_eq!(territory.total_staked, 250_000 + 10_000 * STAKERS as u64 * STAKES_EACH);
    assert_eq!(territory.defense_level, 105);
    assert_eq!(territory.status, TerritoryStatus::Fortified);

    let listing = world.engine.territory_stakes("D2UP", t0()).unwrap();
    assert_eq!(listing.summary.active_count, 1 + STAKERS * STAKES_EACH as usize);
    assert_eq!(listing.summary.total_active, territory.total_staked);
}

#[test]
fn test_duplicate_sweeps_resolve_each_contest_once() {
    const SWEEPERS: usize = 4;
    let roads = ["D2OUT", "D4OUT", "D6OUT", "D8OUT", "D20OUT"];
    let world = World::new(2);
    for road_id in roads {
        world.claim(road_id, 1, 500_000);
        world
            .engine
            .attack(World::attack_request(road_id, 2, 50_000, DiceType::D12), t0())
            .unwrap();
    }

    let now = t0() + Duration::hours(25);
    let barrier = Arc::new(Barrier::new(SWEEPERS));
    let handles: Vec<_> = (0..SWEEPERS)
        .map(|_| {
            let sweeper = DeadlineSweeper::new(world.engine.clone(), 60, Arc::new(Notify::new()));
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                sweeper.sweep(now).unwrap()
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let resolved: usize = reports.iter().map(|r| r.resolved.len()).sum();
    assert_eq!(resolved, roads.len());
    assert!(reports.iter().all(|r| r.errors.is_empty()));

    let mut resolved_ids: Vec<_> = reports
        .iter()
        .flat_map(|r| r.resolved.iter().map(|c| c.contest.id))
        .collect();
    resolved_ids.sort();
    resolved_ids.dedup();
    assert_eq!(resolved_ids.len(), roads.len());
}
