//! TEK8 dice rolls.
//!
//! Randomness sits behind [`DiceRoller`] so combat resolution can be replayed
//! deterministically in tests with a [`ScriptedRoller`].

use rand::Rng;
use roadwar_core::{DiceType, Element};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Outcome of one die roll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiceRoll {
    pub die: DiceType,
    pub element: Element,
    pub roll: u32,
    pub max_value: u32,
    /// Rolled the highest face
    pub critical: bool,
    /// Rolled a one
    pub fumble: bool,
}

impl DiceRoll {
    /// Build a roll, clamping the face into `[1, max]`
    pub fn new(die: DiceType, roll: u32) -> Self {
        let max_value = die.max_face();
        let roll = roll.clamp(1, max_value);
        Self {
            die,
            element: die.element(),
            roll,
            max_value,
            critical: roll == max_value,
            // a D2 rolling 1 is just tails
            fumble: roll == 1 && max_value > 2,
        }
    }

    /// Roll scaled to 0..=1
    pub fn normalized(&self) -> f64 {
        f64::from(self.roll) / f64::from(self.max_value)
    }
}

/// Source of die rolls
pub trait DiceRoller: Send + Sync {
    /// Uniform integer face in `[1, die.max_face()]`
    fn roll(&self, die: DiceType) -> DiceRoll;
}

/// Thread-local RNG roller used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomRoller;

impl DiceRoller for RandomRoller {
    fn roll(&self, die: DiceType) -> DiceRoll {
        let face = rand::thread_rng().gen_range(1..=die.max_face());
        DiceRoll::new(die, face)
    }
}

/// Replays a fixed sequence of faces; rolls the maximum once exhausted
#[derive(Debug, Default)]
pub struct ScriptedRoller {
    faces: Mutex<VecDeque<u32>>,
}

impl ScriptedRoller {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: Mutex::new(faces.into_iter().collect()),
        }
    }

    /// Queue more faces
    pub fn push(&self, face: u32) {
        if let Ok(mut faces) = self.faces.lock() {
            faces.push_back(face);
        }
    }
}

impl DiceRoller for ScriptedRoller {
    fn roll(&self, die: DiceType) -> DiceRoll {
        let face = self
            .faces
            .lock()
            .ok()
            .and_then(|mut faces| faces.pop_front())
            .unwrap_or_else(|| die.max_face());
        DiceRoll::new(die, face)
    }
}
