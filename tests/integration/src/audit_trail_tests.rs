//! Territory history persisted to the SQLite event log

use crate::test_utils::*;
use chrono::Duration;
use roadwar_conquest::DefendRequest;
use roadwar_core::{DiceType, NationId, TerritoryEventKind, TerritoryEventLog};
use serde_json::json;

#[test]
fn test_contest_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("territory_events.db");

    {
        let world = World::with_event_log(2, &path);
        world.claim("D100U45", 1, 100_000);

        world.dice.push(2);
        let contest = world
            .engine
            .attack(World::attack_request("D100U45", 2, 10_000, DiceType::D2), t0())
            .unwrap()
            .contest;
        world
            .engine
            .defend(
                DefendRequest {
                    contest_id: contest.id,
                    wallet: wallet(1),
                    burn_amount: None,
                    tx_signature: None,
                },
                t0() + Duration::minutes(30),
            )
            .unwrap();
    }

    let log = TerritoryEventLog::open(&path).unwrap();
    assert!(log.health().is_ok());
    assert_eq!(log.len().unwrap(), 5);

    let history = log.recent(road("D100U45"), 10).unwrap();
    let kinds: Vec<TerritoryEventKind> = history.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            TerritoryEventKind::StakesForfeited,
            TerritoryEventKind::Captured,
            TerritoryEventKind::Defended,
            TerritoryEventKind::Attacked,
            TerritoryEventKind::Claimed,
        ]
    );

    let captured = &history[1];
    assert_eq!(captured.actor_nation_id, Some(NationId(2)));
    assert_eq!(captured.details["from_nation_id"], json!(1));
    assert_eq!(captured.details["expired"], json!(false));

    // each event links to the one before it
    for pair in history.windows(2) {
        assert_eq!(pair[0].prev_event_hash, pair[1].event_hash);
    }
}

#[test]
fn test_events_are_only_written_for_committed_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("territory_events.db");

    let world = World::with_event_log(2, &path);
    world.claim("D4DWN", 1, 250_000);

    // below the minimum burn: rejected before anything moves
    assert!(world
        .engine
        .attack(World::attack_request("D4DWN", 2, 1_000, DiceType::D6), t0())
        .is_err());

    let history = world.engine.recent_events(road("D4DWN"), 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, TerritoryEventKind::Claimed);
    assert_eq!(world.tokens.burned_by(&wallet(2)), 0);
}
