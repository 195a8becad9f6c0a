//! Dice resolution.
//!
//! `roll(count, sides, modifier, mode)` is the single entry point. A lone d20
//! honours advantage/disadvantage by rolling twice and dropping one die; every
//! other configuration ignores the mode and sums `count` dice.

use crate::error::RulesError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on dice per roll.
pub const MAX_DICE: u32 = 100;
/// Upper bound on faces per die.
pub const MAX_SIDES: u32 = 1000;
/// Largest flat modifier, positive or negative.
pub const MAX_MODIFIER: i32 = 1000;

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage)
            | (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (x, _) => x,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Advantage::Normal => "normal",
            Advantage::Advantage => "advantage",
            Advantage::Disadvantage => "disadvantage",
        }
    }
}

impl FromStr for Advantage {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "normal" => Ok(Advantage::Normal),
            "advantage" | "adv" => Ok(Advantage::Advantage),
            "disadvantage" | "dis" => Ok(Advantage::Disadvantage),
            other => Err(RulesError::invalid(format!("unknown roll mode '{other}'"))),
        }
    }
}

/// Standard D&D die types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DieType {
    pub fn sides(&self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
            DieType::D100 => 100,
        }
    }

    /// Average rounded up, as used for fixed hit point gains.
    pub fn average(&self) -> u32 {
        self.sides() / 2 + 1
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// Outcome of one roll. Never re-rolled once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    pub count: u32,
    pub sides: u32,
    pub mode: Advantage,
    /// Every raw die value, in the order rolled.
    pub rolls: Vec<u32>,
    /// Values excluded by advantage/disadvantage.
    pub dropped: Vec<u32>,
    pub kept: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
}

impl DiceRoll {
    /// The kept d20 face, if this was a single-d20 roll.
    pub fn natural(&self) -> Option<u32> {
        (self.sides == 20 && self.kept.len() == 1).then(|| self.kept[0])
    }

    pub fn is_natural_20(&self) -> bool {
        self.natural() == Some(20)
    }

    pub fn is_natural_1(&self) -> bool {
        self.natural() == Some(1)
    }

    /// Format the dice for display, dropped dice in parentheses.
    pub fn dice_display(&self) -> String {
        let mut dropped = self.dropped.clone();
        let shown: Vec<String> = self
            .rolls
            .iter()
            .map(|r| {
                if let Some(pos) = dropped.iter().position(|d| d == r) {
                    dropped.remove(pos);
                    format!("({r})")
                } else {
                    r.to_string()
                }
            })
            .collect();
        let dice = format!("[{}]", shown.join(", "));
        match self.modifier {
            0 => dice,
            m if m > 0 => format!("{dice} + {m}"),
            m => format!("{dice} - {}", m.abs()),
        }
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dice_display(), self.total)
    }
}

/// Roll with the thread-local RNG.
pub fn roll(count: u32, sides: u32, modifier: i32, mode: Advantage) -> Result<DiceRoll, RulesError> {
    roll_with_rng(count, sides, modifier, mode, &mut rand::thread_rng())
}

/// Roll with a specific RNG (useful for testing).
pub fn roll_with_rng<R: Rng + ?Sized>(
    count: u32,
    sides: u32,
    modifier: i32,
    mode: Advantage,
    rng: &mut R,
) -> Result<DiceRoll, RulesError> {
    if sides < 2 {
        return Err(RulesError::invalid(format!("die must have at least 2 sides, got {sides}")));
    }
    if count < 1 {
        return Err(RulesError::invalid("must roll at least one die"));
    }
    if count > MAX_DICE {
        return Err(RulesError::invalid(format!("cannot roll more than {MAX_DICE} dice")));
    }
    if sides > MAX_SIDES {
        return Err(RulesError::invalid(format!("dice have at most {MAX_SIDES} sides, got {sides}")));
    }
    if !(-MAX_MODIFIER..=MAX_MODIFIER).contains(&modifier) {
        return Err(RulesError::invalid(format!(
            "modifier must be within ±{MAX_MODIFIER}, got {modifier}"
        )));
    }

    let contested = sides == 20 && count == 1 && mode != Advantage::Normal;
    if contested {
        let first = rng.gen_range(1..=20u32);
        let second = rng.gen_range(1..=20u32);
        let (kept, dropped) = match mode {
            Advantage::Advantage => (first.max(second), first.min(second)),
            _ => (first.min(second), first.max(second)),
        };
        return Ok(DiceRoll {
            count,
            sides,
            mode,
            rolls: vec![first, second],
            dropped: vec![dropped],
            kept: vec![kept],
            modifier,
            total: kept as i32 + modifier,
        });
    }

    let rolls: Vec<u32> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
    let sum: i32 = rolls.iter().map(|r| *r as i32).sum();
    Ok(DiceRoll {
        count,
        sides,
        mode: Advantage::Normal,
        kept: rolls.clone(),
        rolls,
        dropped: Vec::new(),
        modifier,
        total: sum + modifier,
    })
}

/// Single-term dice notation: `XdY`, `dY`, `XdY+Z`, `XdY-Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceNotation {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
}

impl DiceNotation {
    pub fn parse(notation: &str) -> Result<Self, RulesError> {
        let cleaned: String = notation
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let bad = || RulesError::invalid(format!("invalid dice notation: '{notation}'"));

        let d_pos = cleaned.find('d').ok_or_else(bad)?;
        let count_str = &cleaned[..d_pos];
        let rest = &cleaned[d_pos + 1..];

        let count = if count_str.is_empty() {
            1
        } else {
            count_str.parse().map_err(|_| bad())?
        };

        let (sides_str, modifier) = match rest.find(['+', '-']) {
            Some(pos) => {
                let value: i32 = rest[pos + 1..].parse().map_err(|_| bad())?;
                let sign = if rest.as_bytes()[pos] == b'-' { -1 } else { 1 };
                (&rest[..pos], sign * value)
            }
            None => (rest, 0),
        };
        let sides = sides_str.parse().map_err(|_| bad())?;

        Ok(Self {
            count,
            sides,
            modifier,
        })
    }

    pub fn roll(&self, mode: Advantage) -> Result<DiceRoll, RulesError> {
        roll(self.count, self.sides, self.modifier, mode)
    }

    pub fn roll_with_rng<R: Rng + ?Sized>(&self, mode: Advantage, rng: &mut R) -> Result<DiceRoll, RulesError> {
        roll_with_rng(self.count, self.sides, self.modifier, mode, rng)
    }
}

impl FromStr for DiceNotation {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceNotation::parse(s)
    }
}

impl fmt::Display for DiceNotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_roll_range() {
        for _ in 0..200 {
            let result = roll(1, 20, 0, Advantage::Normal).unwrap();
            assert!(result.total >= 1 && result.total <= 20);
            assert!(result.dropped.is_empty());
        }
    }

    #[test]
    fn test_roll_sums_with_modifier() {
        let mut rng = StdRng::seed_from_u64(7);
        let result = roll_with_rng(3, 6, 2, Advantage::Normal, &mut rng).unwrap();
        assert_eq!(result.rolls.len(), 3);
        assert_eq!(result.kept, result.rolls);
        let sum: i32 = result.rolls.iter().map(|r| *r as i32).sum();
        assert_eq!(result.total, sum + 2);
    }

    #[test]
    fn test_advantage_keeps_higher() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let result = roll_with_rng(1, 20, 3, Advantage::Advantage, &mut rng).unwrap();
            assert_eq!(result.rolls.len(), 2);
            let high = *result.rolls.iter().max().unwrap();
            let low = *result.rolls.iter().min().unwrap();
            assert_eq!(result.kept, vec![high]);
            assert_eq!(result.dropped, vec![low]);
            assert_eq!(result.total, high as i32 + 3);
        }
    }

    #[test]
    fn test_disadvantage_keeps_lower() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let result = roll_with_rng(1, 20, -1, Advantage::Disadvantage, &mut rng).unwrap();
            let low = *result.rolls.iter().min().unwrap();
            assert_eq!(result.kept, vec![low]);
            assert_eq!(result.total, low as i32 - 1);
        }
    }

    #[test]
    fn test_mode_ignored_for_other_dice() {
        let result = roll(2, 6, 0, Advantage::Advantage).unwrap();
        assert_eq!(result.mode, Advantage::Normal);
        assert_eq!(result.rolls.len(), 2);
        assert!(result.dropped.is_empty());

        let result = roll(2, 20, 0, Advantage::Disadvantage).unwrap();
        assert_eq!(result.rolls.len(), 2);
        assert!(result.dropped.is_empty());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            roll(1, 1, 0, Advantage::Normal),
            Err(RulesError::InvalidParameter(_))
        ));
        assert!(matches!(
            roll(0, 6, 0, Advantage::Normal),
            Err(RulesError::InvalidParameter(_))
        ));
        assert!(roll(MAX_DICE + 1, 6, 0, Advantage::Normal).is_err());
    }

    #[test]
    fn test_huge_dice_rejected() {
        assert!(matches!(
            roll(MAX_DICE, u32::MAX, 0, Advantage::Normal),
            Err(RulesError::InvalidParameter(_))
        ));
        assert!(matches!(
            roll(1, MAX_SIDES + 1, 0, Advantage::Normal),
            Err(RulesError::InvalidParameter(_))
        ));
        let largest = roll(MAX_DICE, MAX_SIDES, MAX_MODIFIER, Advantage::Normal).unwrap();
        assert!(largest.total <= (MAX_DICE * MAX_SIDES) as i32 + MAX_MODIFIER);
    }

    #[test]
    fn test_huge_modifier_rejected() {
        for modifier in [i32::MAX, i32::MIN, MAX_MODIFIER + 1, -MAX_MODIFIER - 1] {
            assert!(matches!(
                roll(1, 6, modifier, Advantage::Normal),
                Err(RulesError::InvalidParameter(_))
            ));
        }
        assert!(roll(1, 20, -MAX_MODIFIER, Advantage::Advantage).is_ok());

        let notation = DiceNotation::parse("1d6+2147483647").unwrap();
        assert!(notation.roll(Advantage::Normal).is_err());
        let notation = DiceNotation::parse("100d4294967295").unwrap();
        assert!(notation.roll(Advantage::Normal).is_err());
    }

    #[test]
    fn test_parse_notation() {
        let n = DiceNotation::parse("2d6+3").unwrap();
        assert_eq!((n.count, n.sides, n.modifier), (2, 6, 3));

        let n = DiceNotation::parse("d20").unwrap();
        assert_eq!((n.count, n.sides, n.modifier), (1, 20, 0));

        let n = DiceNotation::parse(" 1D8 - 1 ").unwrap();
        assert_eq!((n.count, n.sides, n.modifier), (1, 8, -1));
        assert_eq!(n.to_string(), "1d8-1");

        assert!(DiceNotation::parse("fireball").is_err());
        assert!(DiceNotation::parse("2d").is_err());
        assert!(DiceNotation::parse("2d6+").is_err());
    }

    #[test]
    fn test_display_marks_dropped() {
        let roll = DiceRoll {
            count: 1,
            sides: 20,
            mode: Advantage::Advantage,
            rolls: vec![7, 15],
            dropped: vec![7],
            kept: vec![15],
            modifier: 2,
            total: 17,
        };
        assert_eq!(roll.to_string(), "[(7), 15] + 2 = 17");
        assert_eq!(roll.natural(), Some(15));
    }

    #[test]
    fn test_advantage_combine() {
        assert_eq!(
            Advantage::Normal.combine(Advantage::Advantage),
            Advantage::Advantage
        );
        assert_eq!(
            Advantage::Advantage.combine(Advantage::Disadvantage),
            Advantage::Normal
        );
        assert_eq!("ADVANTAGE".parse::<Advantage>().unwrap(), Advantage::Advantage);
        assert!("sideways".parse::<Advantage>().is_err());
    }
}
