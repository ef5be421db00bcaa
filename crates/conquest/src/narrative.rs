//! Flavor text for contests.

use crate::combat::{AttackBreakdown, DefenseBreakdown, Side};
use crate::elements::Advantage;

fn roll_line(breakdown: &AttackBreakdown) -> String {
    let roll = &breakdown.roll;
    if roll.critical {
        format!("Critical {} strike!", roll.element)
    } else if roll.fumble {
        format!("{} attack falters...", roll.element)
    } else {
        format!(
            "{} energy surges ({}/{}).",
            roll.element, roll.roll, roll.max_value
        )
    }
}

fn matchup_line(breakdown: &AttackBreakdown) -> Option<String> {
    match breakdown.advantage {
        Advantage::Advantaged => Some(format!(
            "{} overwhelms {}!",
            breakdown.roll.element, breakdown.defender_element
        )),
        Advantage::Disadvantaged => Some(format!(
            "{} resists {}.",
            breakdown.defender_element, breakdown.roll.element
        )),
        Advantage::Neutral => None,
    }
}

/// Narrative returned when an attack opens a contest
pub fn attack_narrative(road_id: &str, attack: &AttackBreakdown, window_hours: i64) -> String {
    let mut parts = vec![roll_line(attack)];
    parts.extend(matchup_line(attack));
    parts.push(format!(
        "{} tokens burn against {}. The defenders have {} hours to respond.",
        attack.burn_amount, road_id, window_hours
    ));
    parts.join(" ")
}

/// Narrative returned when a contest resolves
pub fn resolution_narrative(
    attack: &AttackBreakdown,
    defense: &DefenseBreakdown,
    winner: Side,
    timed_out: bool,
) -> String {
    let mut parts = vec![roll_line(attack)];
    parts.extend(matchup_line(attack));

    if timed_out {
        parts.push("The defenders never answered the call.".to_string());
    } else if let Some(roll) = &defense.roll {
        if roll.critical {
            parts.push(format!("Defender counters with critical {}!", roll.element));
        } else if roll.fumble {
            parts.push("Defense crumbles...".to_string());
        }
    }

    let margin = (attack.power - defense.power).abs();
    let closing = match winner {
        Side::Attacker if margin > 100.0 => "DEVASTATING VICTORY! Territory conquered!",
        Side::Attacker if margin > 50.0 => "Decisive victory! The territory falls.",
        Side::Attacker => "Close battle, but attackers prevail.",
        Side::Defender if margin > 100.0 => "CRUSHING DEFENSE! Invaders routed!",
        Side::Defender if margin > 50.0 => "Strong defense holds the line.",
        Side::Defender => "Narrow escape! Territory defended.",
    };
    parts.push(closing.to_string());
    parts.join(" ")
}
