//! Game state restored from the SQLite state store

use crate::test_utils::*;
use chrono::Duration;
use roadwar_conquest::{ContestFilter, ContestStatus, DeadlineSweeper, StakeRequest};
use roadwar_core::{DiceType, NationId, TerritoryStatus};
use std::sync::Arc;
use tokio::sync::Notify;

#[test]
fn test_pending_contest_is_swept_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game_state.db");

    let contest = {
        let world = World::with_state_store(3, &path);
        world.claim("D20UP", 1, 100_000);
        world.claim("D4DWN", 3, 250_000);
        world
            .engine
            .stake(
                StakeRequest {
                    road_id: road("D20UP"),
                    wallet: wallet(1),
                    amount: 50_000,
                    lock_days: 7,
                },
                t0(),
            )
            .unwrap();

        world.dice.push(6);
        world
            .engine
            .attack(World::attack_request("D20UP", 2, 20_000, DiceType::D20), t0())
            .unwrap()
            .contest
    };

    let world = World::with_state_store(3, &path);
    let territory = world.engine.territory(road("D20UP")).unwrap();
    assert_eq!(territory.status, TerritoryStatus::Contested);
    assert_eq!(territory.total_staked, 150_000);
    let stats = world.engine.map_snapshot().unwrap().stats;
    assert_eq!(stats.contested, 1);
    assert_eq!(stats.claimed, 1);

    let sweeper = DeadlineSweeper::new(world.engine.clone(), 60, Arc::new(Notify::new()));
    let report = sweeper
        .sweep(contest.defense_deadline + Duration::seconds(1))
        .unwrap();
    assert_eq!(report.resolved.len(), 1);

    let captured = world.engine.territory(road("D20UP")).unwrap();
    assert_eq!(captured.controller_nation_id, Some(NationId(2)));
    drop(world);

    // the capture is what the next start sees
    let world = World::with_state_store(3, &path);
    let territory = world.engine.territory(road("D20UP")).unwrap();
    assert_eq!(territory.controller_nation_id, Some(NationId(2)));
    assert_eq!(territory.total_staked, 0);
    let contests = world
        .engine
        .contests(ContestFilter::default(), None)
        .unwrap();
    assert_eq!(contests.len(), 1);
    assert_eq!(contests[0].status, ContestStatus::ExpiredAutowin);
    let held = world.engine.territory(road("D4DWN")).unwrap();
    assert_eq!(held.controller_nation_id, Some(NationId(3)));
}
