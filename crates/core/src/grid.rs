//! Rainbow Roads grid topology.
//!
//! The map is a fixed 8 × 5 grid: one column per die, one row per direction.
//! A road is addressed as `<DiceType><Direction>`, e.g. `D10OUT`. Every
//! lookup here is a pure function of that fixed topology.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConquestError;

/// Grid width (dice columns)
pub const GRID_WIDTH: usize = 8;
/// Grid height (direction rows)
pub const GRID_HEIGHT: usize = 5;
/// Number of addressable territories
pub const TERRITORY_COUNT: usize = GRID_WIDTH * GRID_HEIGHT;

/// TEK8 die
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiceType {
    D2,
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DiceType {
    /// All dice in column order
    pub const ALL: [DiceType; GRID_WIDTH] = [
        DiceType::D2,
        DiceType::D4,
        DiceType::D6,
        DiceType::D8,
        DiceType::D10,
        DiceType::D12,
        DiceType::D20,
        DiceType::D100,
    ];

    /// Highest face of the die
    pub fn max_face(&self) -> u32 {
        match self {
            DiceType::D2 => 2,
            DiceType::D4 => 4,
            DiceType::D6 => 6,
            DiceType::D8 => 8,
            DiceType::D10 => 10,
            DiceType::D12 => 12,
            DiceType::D20 => 20,
            DiceType::D100 => 100,
        }
    }

    /// Element bound to the die
    pub fn element(&self) -> Element {
        match self {
            DiceType::D2 => Element::Coin,
            DiceType::D4 => Element::Fire,
            DiceType::D6 => Element::Earth,
            DiceType::D8 => Element::Air,
            DiceType::D10 => Element::Chaos,
            DiceType::D12 => Element::Ether,
            DiceType::D20 => Element::Water,
            DiceType::D100 => Element::Order,
        }
    }

    /// Grid column of the die
    pub fn column(&self) -> usize {
        match self {
            DiceType::D2 => 0,
            DiceType::D4 => 1,
            DiceType::D6 => 2,
            DiceType::D8 => 3,
            DiceType::D10 => 4,
            DiceType::D12 => 5,
            DiceType::D20 => 6,
            DiceType::D100 => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiceType::D2 => "D2",
            DiceType::D4 => "D4",
            DiceType::D6 => "D6",
            DiceType::D8 => "D8",
            DiceType::D10 => "D10",
            DiceType::D12 => "D12",
            DiceType::D20 => "D20",
            DiceType::D100 => "D100",
        }
    }
}

impl fmt::Display for DiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiceType {
    type Err = ConquestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceType::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConquestError::Validation(format!("Unknown dice type: {}", s)))
    }
}

/// Element carried by a die
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    Coin,
    Fire,
    Earth,
    Air,
    Chaos,
    Ether,
    Water,
    Order,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Element::Coin => "Coin",
            Element::Fire => "Fire",
            Element::Earth => "Earth",
            Element::Air => "Air",
            Element::Chaos => "Chaos",
            Element::Ether => "Ether",
            Element::Water => "Water",
            Element::Order => "Order",
        };
        f.write_str(name)
    }
}

/// Road direction (grid row)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "OUT")]
    Out,
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DWN")]
    Dwn,
    #[serde(rename = "U45")]
    U45,
    #[serde(rename = "D45")]
    D45,
}

impl Direction {
    /// All directions in row order
    pub const ALL: [Direction; GRID_HEIGHT] = [
        Direction::Out,
        Direction::Up,
        Direction::Dwn,
        Direction::U45,
        Direction::D45,
    ];

    /// Grid row of the direction
    pub fn row(&self) -> usize {
        match self {
            Direction::Out => 0,
            Direction::Up => 1,
            Direction::Dwn => 2,
            Direction::U45 => 3,
            Direction::D45 => 4,
        }
    }

    /// Realm the direction belongs to
    pub fn realm(&self) -> Realm {
        match self {
            Direction::Out => Realm::Qlz,
            Direction::Up | Direction::Dwn => Realm::Qly,
            Direction::U45 | Direction::D45 => Realm::Qlx,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Out => "OUT",
            Direction::Up => "UP",
            Direction::Dwn => "DWN",
            Direction::U45 => "U45",
            Direction::D45 => "D45",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Realm {
    #[serde(rename = "QLX")]
    Qlx,
    #[serde(rename = "QLY")]
    Qly,
    #[serde(rename = "QLZ")]
    Qlz,
}

impl Realm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::Qlx => "QLX",
            Realm::Qly => "QLY",
            Realm::Qlz => "QLZ",
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cell coordinates on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: usize,
    pub y: usize,
}

/// Road address, `<DiceType><Direction>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoadId {
    pub dice: DiceType,
    pub direction: Direction,
}

impl RoadId {
    pub fn new(dice: DiceType, direction: Direction) -> Self {
        Self { dice, direction }
    }

    /// Every road, row-major (y, then x)
    pub fn all() -> impl Iterator<Item = RoadId> {
        Direction::ALL.into_iter().flat_map(|direction| {
            DiceType::ALL
                .into_iter()
                .map(move |dice| RoadId::new(dice, direction))
        })
    }

    pub fn position(&self) -> GridPosition {
        GridPosition {
            x: self.dice.column(),
            y: self.direction.row(),
        }
    }

    /// Row-major index into a grid-sized array
    pub fn index(&self) -> usize {
        let pos = self.position();
        pos.y * GRID_WIDTH + pos.x
    }

    pub fn realm(&self) -> Realm {
        self.direction.realm()
    }

    pub fn element(&self) -> Element {
        self.dice.element()
    }

    /// Road at the given coordinates, if on the grid
    pub fn at(x: usize, y: usize) -> Option<RoadId> {
        let dice = *DiceType::ALL.get(x)?;
        let direction = *Direction::ALL.get(y)?;
        Some(RoadId::new(dice, direction))
    }

    /// Orthogonal neighbours on the grid
    pub fn adjacent(&self) -> Vec<RoadId> {
        let GridPosition { x, y } = self.position();
        let mut neighbours = Vec::with_capacity(4);
        if x > 0 {
            neighbours.extend(RoadId::at(x - 1, y));
        }
        neighbours.extend(RoadId::at(x + 1, y));
        if y > 0 {
            neighbours.extend(RoadId::at(x, y - 1));
        }
        neighbours.extend(RoadId::at(x, y + 1));
        neighbours
    }
}

impl fmt::Display for RoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dice, self.direction)
    }
}

impl FromStr for RoadId {
    type Err = ConquestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        for direction in Direction::ALL {
            if let Some(prefix) = upper.strip_suffix(direction.as_str()) {
                if let Ok(dice) = prefix.parse::<DiceType>() {
                    return Ok(RoadId::new(dice, direction));
                }
            }
        }
        Err(ConquestError::Validation(format!("Invalid road id: {}", s)))
    }
}

impl Serialize for RoadId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoadId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
