//! Static rule tables.
//!
//! Spell slot progressions, proficiency bonus, point-buy costs, experience
//! thresholds, racial movement, companion scaling and the feat list. Every
//! lookup here is a pure function of its inputs.

use crate::character::Race;
use crate::error::RulesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Proficiency & Experience
// ============================================================================

pub const MAX_LEVEL: u8 = 20;

/// Proficiency bonus for a character level (1-20).
pub fn proficiency_bonus(level: u8) -> i8 {
    match level {
        0..=4 => 2,
        5..=8 => 3,
        9..=12 => 4,
        13..=16 => 5,
        _ => 6,
    }
}

/// Experience needed to reach each level, indexed by `level - 1`.
pub const XP_THRESHOLDS: [u32; 20] = [
    0, 300, 900, 2_700, 6_500, 14_000, 23_000, 34_000, 48_000, 64_000, 85_000, 100_000, 120_000,
    140_000, 165_000, 195_000, 225_000, 265_000, 305_000, 355_000,
];

/// Highest level the given experience total qualifies for.
pub fn level_for_xp(xp: u32) -> u8 {
    XP_THRESHOLDS
        .iter()
        .rposition(|threshold| xp >= *threshold)
        .map(|idx| idx as u8 + 1)
        .unwrap_or(1)
}

/// Experience required for `level`, or `None` past the cap.
pub fn xp_for_level(level: u8) -> Option<u32> {
    (1..=MAX_LEVEL)
        .contains(&level)
        .then(|| XP_THRESHOLDS[level as usize - 1])
}

// ============================================================================
// Spell Slots
// ============================================================================

/// How a class progresses through spell slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasterType {
    Full,
    Half,
    Third,
    Pact,
}

impl CasterType {
    pub fn name(&self) -> &'static str {
        match self {
            CasterType::Full => "full",
            CasterType::Half => "half",
            CasterType::Third => "third",
            CasterType::Pact => "pact",
        }
    }

    /// Whether the slots come back on a short rest.
    pub fn recovers_on_short_rest(&self) -> bool {
        matches!(self, CasterType::Pact)
    }
}

impl fmt::Display for CasterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Full caster slots per class level, spell levels 1-9.
const FULL_CASTER_SLOTS: [[u8; 9]; 20] = [
    [2, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 2, 0, 0, 0, 0, 0, 0, 0],
    [4, 3, 0, 0, 0, 0, 0, 0, 0],
    [4, 3, 2, 0, 0, 0, 0, 0, 0],
    [4, 3, 3, 0, 0, 0, 0, 0, 0],
    [4, 3, 3, 1, 0, 0, 0, 0, 0],
    [4, 3, 3, 2, 0, 0, 0, 0, 0],
    [4, 3, 3, 3, 1, 0, 0, 0, 0],
    [4, 3, 3, 3, 2, 0, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 0, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 0, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 0],
    [4, 3, 3, 3, 2, 1, 1, 1, 1],
    [4, 3, 3, 3, 3, 1, 1, 1, 1],
    [4, 3, 3, 3, 3, 2, 1, 1, 1],
    [4, 3, 3, 3, 3, 2, 2, 1, 1],
];

/// Warlock pact slots: (slot count, slot level) per class level.
const PACT_SLOTS: [(u8, u8); 20] = [
    (1, 1),
    (2, 1),
    (2, 2),
    (2, 2),
    (2, 3),
    (2, 3),
    (2, 4),
    (2, 4),
    (2, 5),
    (2, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (4, 5),
    (4, 5),
    (4, 5),
    (4, 5),
];

/// Maximum slots per spell level (index 0 = 1st level) for a caster type
/// at a class level. Levels outside 1-20 have no slots.
pub fn spell_slots(caster: CasterType, level: u8) -> [u8; 9] {
    if !(1..=MAX_LEVEL).contains(&level) {
        return [0; 9];
    }
    match caster {
        CasterType::Full => FULL_CASTER_SLOTS[level as usize - 1],
        // Half and third casters follow the full table at a reduced level.
        CasterType::Half if level >= 2 => FULL_CASTER_SLOTS[level.div_ceil(2) as usize - 1],
        CasterType::Third if level >= 3 => FULL_CASTER_SLOTS[level.div_ceil(3) as usize - 1],
        CasterType::Half | CasterType::Third => [0; 9],
        CasterType::Pact => {
            let (count, slot_level) = PACT_SLOTS[level as usize - 1];
            let mut slots = [0; 9];
            slots[slot_level as usize - 1] = count;
            slots
        }
    }
}

/// Highest spell level with at least one slot, 0 when none.
pub fn max_spell_level(caster: CasterType, level: u8) -> u8 {
    spell_slots(caster, level)
        .iter()
        .rposition(|count| *count > 0)
        .map(|idx| idx as u8 + 1)
        .unwrap_or(0)
}

// ============================================================================
// Point Buy
// ============================================================================

pub const POINT_BUY_BUDGET: u32 = 27;

/// Point-buy cost of a single score; `None` outside 8..=15.
pub fn point_buy_cost(score: u8) -> Option<u32> {
    match score {
        8..=13 => Some(score as u32 - 8),
        14 => Some(7),
        15 => Some(9),
        _ => None,
    }
}

// ============================================================================
// Races
// ============================================================================

/// Creature size category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Size {
    Tiny,
    Small,
    Medium,
    Large,
}

impl Size {
    pub fn name(&self) -> &'static str {
        match self {
            Size::Tiny => "Tiny",
            Size::Small => "Small",
            Size::Medium => "Medium",
            Size::Large => "Large",
        }
    }
}

impl Race {
    /// Base walking speed in feet.
    pub fn speed(&self) -> u32 {
        match self {
            Race::Dwarf | Race::Halfling | Race::Gnome => 25,
            _ => 30,
        }
    }

    pub fn size(&self) -> Size {
        match self {
            Race::Halfling | Race::Gnome => Size::Small,
            _ => Size::Medium,
        }
    }
}

// ============================================================================
// Companion Scaling
// ============================================================================

/// Bonuses a companion receives from its owner's ranger level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionTier {
    pub min_level: u8,
    pub hp_bonus: u32,
    pub ac_bonus: u8,
    pub attack_bonus: i8,
    pub damage_bonus: i8,
    pub ability: &'static str,
}

pub const COMPANION_TIERS: [CompanionTier; 4] = [
    CompanionTier {
        min_level: 3,
        hp_bonus: 0,
        ac_bonus: 0,
        attack_bonus: 0,
        damage_bonus: 0,
        ability: "Ranger's Companion",
    },
    CompanionTier {
        min_level: 7,
        hp_bonus: 5,
        ac_bonus: 1,
        attack_bonus: 1,
        damage_bonus: 1,
        ability: "Exceptional Training",
    },
    CompanionTier {
        min_level: 11,
        hp_bonus: 10,
        ac_bonus: 1,
        attack_bonus: 2,
        damage_bonus: 2,
        ability: "Bestial Fury",
    },
    CompanionTier {
        min_level: 15,
        hp_bonus: 15,
        ac_bonus: 2,
        attack_bonus: 3,
        damage_bonus: 3,
        ability: "Share Spells",
    },
];

/// Owner ranger level at which the companion gains an extra attack.
pub const COMPANION_EXTRA_ATTACK_LEVEL: u8 = 7;

/// Resolved scaling for an owner's ranger level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionScaling {
    pub hp_bonus: u32,
    pub ac_bonus: u8,
    pub attack_bonus: i8,
    pub damage_bonus: i8,
    pub extra_attack: bool,
    pub abilities: Vec<String>,
}

pub fn companion_scaling(ranger_level: u8) -> CompanionScaling {
    let mut scaling = CompanionScaling {
        extra_attack: ranger_level >= COMPANION_EXTRA_ATTACK_LEVEL,
        ..Default::default()
    };
    for tier in COMPANION_TIERS.iter().filter(|t| ranger_level >= t.min_level) {
        scaling.hp_bonus = tier.hp_bonus;
        scaling.ac_bonus = tier.ac_bonus;
        scaling.attack_bonus = tier.attack_bonus;
        scaling.damage_bonus = tier.damage_bonus;
        scaling.abilities.push(tier.ability.to_string());
    }
    scaling
}

// ============================================================================
// Feats
// ============================================================================

pub const FEATS: &[&str] = &[
    "Alert",
    "Athlete",
    "Actor",
    "Charger",
    "Crossbow Expert",
    "Defensive Duelist",
    "Dual Wielder",
    "Durable",
    "Elemental Adept",
    "Great Weapon Master",
    "Healer",
    "Inspiring Leader",
    "Lucky",
    "Mage Slayer",
    "Magic Initiate",
    "Mobile",
    "Observant",
    "Polearm Master",
    "Resilient",
    "Ritual Caster",
    "Savage Attacker",
    "Sentinel",
    "Sharpshooter",
    "Shield Master",
    "Skilled",
    "Spell Sniper",
    "Tough",
    "War Caster",
];

/// Canonical feat name for a case-insensitive lookup.
pub fn find_feat(name: &str) -> Option<&'static str> {
    let wanted = name.trim();
    FEATS.iter().copied().find(|f| f.eq_ignore_ascii_case(wanted))
}

// ============================================================================
// Death
// ============================================================================

/// When damage taken at 0 HP kills outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeathRule {
    /// A single hit at 0 HP dealing at least the target's maximum HP.
    #[default]
    MassiveDamage,
    /// A single hit at 0 HP dealing at least this much damage.
    Threshold(u32),
    /// Damage never kills and adds no death save failures.
    Never,
}

impl DeathRule {
    /// Whether a hit taken at 0 HP counts as a failed death save.
    pub fn hits_fail_death_saves(&self) -> bool {
        !matches!(self, DeathRule::Never)
    }

    /// Whether `damage` dealt to a target already at 0 HP kills it.
    pub fn kills(&self, damage: u32, max_hp: u32) -> bool {
        match self {
            DeathRule::MassiveDamage => damage >= max_hp,
            DeathRule::Threshold(threshold) => damage >= *threshold,
            DeathRule::Never => false,
        }
    }
}

impl FromStr for DeathRule {
    type Err = RulesError;

    /// Accepts `massive_damage`, `never` or `threshold:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "massive_damage" | "massive" => Ok(DeathRule::MassiveDamage),
            "never" => Ok(DeathRule::Never),
            other => other
                .strip_prefix("threshold:")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .map(DeathRule::Threshold)
                .ok_or_else(|| RulesError::invalid(format!("unknown death rule '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proficiency_bonus() {
        assert_eq!(proficiency_bonus(1), 2);
        assert_eq!(proficiency_bonus(4), 2);
        assert_eq!(proficiency_bonus(5), 3);
        assert_eq!(proficiency_bonus(9), 4);
        assert_eq!(proficiency_bonus(13), 5);
        assert_eq!(proficiency_bonus(20), 6);
    }

    #[test]
    fn test_level_for_xp() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(299), 1);
        assert_eq!(level_for_xp(300), 2);
        assert_eq!(level_for_xp(6_500), 5);
        assert_eq!(level_for_xp(1_000_000), 20);
        assert_eq!(xp_for_level(3), Some(900));
        assert_eq!(xp_for_level(21), None);
    }

    #[test]
    fn test_full_caster_slots() {
        assert_eq!(spell_slots(CasterType::Full, 1), [2, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Full, 5), [4, 3, 2, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Full, 20), [4, 3, 3, 3, 3, 2, 2, 1, 1]);
        assert_eq!(max_spell_level(CasterType::Full, 17), 9);
    }

    #[test]
    fn test_half_and_third_caster_slots() {
        assert_eq!(spell_slots(CasterType::Half, 1), [0; 9]);
        assert_eq!(spell_slots(CasterType::Half, 2), [2, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Half, 5), [4, 2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Half, 17), [4, 3, 3, 3, 1, 0, 0, 0, 0]);

        assert_eq!(spell_slots(CasterType::Third, 2), [0; 9]);
        assert_eq!(spell_slots(CasterType::Third, 3), [2, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Third, 7), [4, 2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Third, 19), [4, 3, 3, 1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_pact_slots() {
        assert_eq!(spell_slots(CasterType::Pact, 1), [1, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Pact, 5), [0, 0, 2, 0, 0, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Pact, 11), [0, 0, 0, 0, 3, 0, 0, 0, 0]);
        assert_eq!(spell_slots(CasterType::Pact, 20), [0, 0, 0, 0, 4, 0, 0, 0, 0]);
        assert!(CasterType::Pact.recovers_on_short_rest());
        assert!(!CasterType::Full.recovers_on_short_rest());
    }

    #[test]
    fn test_point_buy_cost() {
        assert_eq!(point_buy_cost(8), Some(0));
        assert_eq!(point_buy_cost(13), Some(5));
        assert_eq!(point_buy_cost(14), Some(7));
        assert_eq!(point_buy_cost(15), Some(9));
        assert_eq!(point_buy_cost(7), None);
        assert_eq!(point_buy_cost(16), None);
    }

    #[test]
    fn test_race_speed_and_size() {
        assert_eq!(Race::Dwarf.speed(), 25);
        assert_eq!(Race::Human.speed(), 30);
        assert_eq!(Race::Halfling.size(), Size::Small);
        assert_eq!(Race::HalfOrc.size(), Size::Medium);
    }

    #[test]
    fn test_companion_scaling() {
        let low = companion_scaling(2);
        assert_eq!(low.hp_bonus, 0);
        assert!(low.abilities.is_empty());
        assert!(!low.extra_attack);

        let seven = companion_scaling(7);
        assert_eq!((seven.hp_bonus, seven.ac_bonus), (5, 1));
        assert!(seven.extra_attack);
        assert_eq!(seven.abilities, vec!["Ranger's Companion", "Exceptional Training"]);

        let top = companion_scaling(20);
        assert_eq!(
            (top.hp_bonus, top.ac_bonus, top.attack_bonus, top.damage_bonus),
            (15, 2, 3, 3)
        );
        assert_eq!(top.abilities.len(), 4);
    }

    #[test]
    fn test_death_rule() {
        assert!(DeathRule::MassiveDamage.kills(20, 20));
        assert!(!DeathRule::MassiveDamage.kills(19, 20));
        assert!(DeathRule::Threshold(5).kills(5, 100));
        assert!(!DeathRule::Never.kills(1000, 1));

        assert_eq!("never".parse::<DeathRule>().unwrap(), DeathRule::Never);
        assert_eq!(
            "threshold:12".parse::<DeathRule>().unwrap(),
            DeathRule::Threshold(12)
        );
        assert!("threshold:0".parse::<DeathRule>().is_err());
        assert!("sometimes".parse::<DeathRule>().is_err());
    }

    #[test]
    fn test_find_feat() {
        assert_eq!(find_feat("war caster"), Some("War Caster"));
        assert_eq!(find_feat("Juggler"), None);
    }
}
