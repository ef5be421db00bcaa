use roadwar_core::{DiceType, Element};
use serde::{Deserialize, Serialize};

/// Outcome of an elemental matchup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advantage {
    Advantaged,
    Neutral,
    Disadvantaged,
}

/// Element a given element overpowers.
///
/// Cycle: Fire -> Earth -> Water -> Air -> Fire, plus Order -> Chaos.
/// Coin, Ether and Chaos beat nothing.
pub fn beats(element: Element) -> Option<Element> {
    match element {
        Element::Fire => Some(Element::Earth),
        Element::Earth => Some(Element::Water),
        Element::Water => Some(Element::Air),
        Element::Air => Some(Element::Fire),
        Element::Order => Some(Element::Chaos),
        Element::Coin | Element::Ether | Element::Chaos => None,
    }
}

pub fn matchup(attacker: Element, defender: Element) -> Advantage {
    if attacker == defender {
        Advantage::Neutral
    } else if beats(attacker) == Some(defender) {
        Advantage::Advantaged
    } else if beats(defender) == Some(attacker) {
        Advantage::Disadvantaged
    } else {
        Advantage::Neutral
    }
}

/// Die whose element beats the territory's element; D10 when nothing does
pub fn recommended_attack_die(territory_die: DiceType) -> DiceType {
    let target = territory_die.element();
    DiceType::ALL
        .into_iter()
        .find(|die| beats(die.element()) == Some(target))
        .unwrap_or(DiceType::D10)
}
