//! Character records and the vocabulary they are built from.
//!
//! A [`Character`] is plain data: every rule that changes it lives in the
//! dispatcher, leveling and rest modules, and every change is validated by
//! [`Character::check_invariants`] before the store commits it.

use crate::dice::DieType;
use crate::spells::SpellSchool;
use crate::tables::{self, CasterType, Size};
use crate::error::RulesError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for characters and companions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(EntityId)
            .map_err(|_| RulesError::invalid(format!("'{s}' is not a valid entity id")))
    }
}

/// Lowercase and strip everything but letters and digits, so that
/// "Sleight of Hand", "sleight_of_hand" and "SLEIGHTOFHAND" compare equal.
pub(crate) fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ============================================================================
// Ability Scores
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ability::Strength => "Strength",
            Ability::Dexterity => "Dexterity",
            Ability::Constitution => "Constitution",
            Ability::Intelligence => "Intelligence",
            Ability::Wisdom => "Wisdom",
            Ability::Charisma => "Charisma",
        }
    }

    pub fn all() -> [Ability; 6] {
        [
            Ability::Strength,
            Ability::Dexterity,
            Ability::Constitution,
            Ability::Intelligence,
            Ability::Wisdom,
            Ability::Charisma,
        ]
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

impl FromStr for Ability {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Ability::all()
            .into_iter()
            .find(|a| normalize(a.name()) == wanted || normalize(a.abbreviation()) == wanted)
            .ok_or_else(|| RulesError::invalid(format!("unknown ability '{s}'")))
    }
}

/// Ability scores container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn standard_array() -> Self {
        Self::new(15, 14, 13, 12, 10, 8)
    }

    pub fn get(&self, ability: Ability) -> u8 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn set(&mut self, ability: Ability, value: u8) {
        match ability {
            Ability::Strength => self.strength = value,
            Ability::Dexterity => self.dexterity = value,
            Ability::Constitution => self.constitution = value,
            Ability::Intelligence => self.intelligence = value,
            Ability::Wisdom => self.wisdom = value,
            Ability::Charisma => self.charisma = value,
        }
    }

    /// floor((score - 10) / 2)
    pub fn modifier(&self, ability: Ability) -> i8 {
        (self.get(ability) as i8 - 10).div_euclid(2)
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

// ============================================================================
// Skills
// ============================================================================

/// D&D 5e skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Athletics,
    Acrobatics,
    SleightOfHand,
    Stealth,
    Arcana,
    History,
    Investigation,
    Nature,
    Religion,
    AnimalHandling,
    Insight,
    Medicine,
    Perception,
    Survival,
    Deception,
    Intimidation,
    Performance,
    Persuasion,
}

impl Skill {
    pub fn ability(&self) -> Ability {
        match self {
            Skill::Athletics => Ability::Strength,
            Skill::Acrobatics | Skill::SleightOfHand | Skill::Stealth => Ability::Dexterity,
            Skill::Arcana
            | Skill::History
            | Skill::Investigation
            | Skill::Nature
            | Skill::Religion => Ability::Intelligence,
            Skill::AnimalHandling
            | Skill::Insight
            | Skill::Medicine
            | Skill::Perception
            | Skill::Survival => Ability::Wisdom,
            Skill::Deception | Skill::Intimidation | Skill::Performance | Skill::Persuasion => {
                Ability::Charisma
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Skill::Athletics => "Athletics",
            Skill::Acrobatics => "Acrobatics",
            Skill::SleightOfHand => "Sleight of Hand",
            Skill::Stealth => "Stealth",
            Skill::Arcana => "Arcana",
            Skill::History => "History",
            Skill::Investigation => "Investigation",
            Skill::Nature => "Nature",
            Skill::Religion => "Religion",
            Skill::AnimalHandling => "Animal Handling",
            Skill::Insight => "Insight",
            Skill::Medicine => "Medicine",
            Skill::Perception => "Perception",
            Skill::Survival => "Survival",
            Skill::Deception => "Deception",
            Skill::Intimidation => "Intimidation",
            Skill::Performance => "Performance",
            Skill::Persuasion => "Persuasion",
        }
    }

    pub fn all() -> [Skill; 18] {
        [
            Skill::Athletics,
            Skill::Acrobatics,
            Skill::SleightOfHand,
            Skill::Stealth,
            Skill::Arcana,
            Skill::History,
            Skill::Investigation,
            Skill::Nature,
            Skill::Religion,
            Skill::AnimalHandling,
            Skill::Insight,
            Skill::Medicine,
            Skill::Perception,
            Skill::Survival,
            Skill::Deception,
            Skill::Intimidation,
            Skill::Performance,
            Skill::Persuasion,
        ]
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Skill {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Skill::all()
            .into_iter()
            .find(|skill| normalize(skill.name()) == wanted)
            .ok_or_else(|| RulesError::invalid(format!("unknown skill '{s}'")))
    }
}

/// Proficiency level for skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProficiencyLevel {
    #[default]
    None,
    Proficient,
    Expertise,
}

impl ProficiencyLevel {
    pub fn bonus(&self, proficiency_bonus: i8) -> i8 {
        match self {
            ProficiencyLevel::None => 0,
            ProficiencyLevel::Proficient => proficiency_bonus,
            ProficiencyLevel::Expertise => proficiency_bonus * 2,
        }
    }
}

// ============================================================================
// Conditions
// ============================================================================

pub const MAX_EXHAUSTION: u8 = 6;

/// Named status effects. `Unconscious` and `Dead` are derived from hit
/// points and only the engine sets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
    Exhaustion(u8),
    Dead,
}

impl Condition {
    pub fn name(&self) -> &'static str {
        match self {
            Condition::Blinded => "blinded",
            Condition::Charmed => "charmed",
            Condition::Deafened => "deafened",
            Condition::Frightened => "frightened",
            Condition::Grappled => "grappled",
            Condition::Incapacitated => "incapacitated",
            Condition::Invisible => "invisible",
            Condition::Paralyzed => "paralyzed",
            Condition::Petrified => "petrified",
            Condition::Poisoned => "poisoned",
            Condition::Prone => "prone",
            Condition::Restrained => "restrained",
            Condition::Stunned => "stunned",
            Condition::Unconscious => "unconscious",
            Condition::Exhaustion(_) => "exhaustion",
            Condition::Dead => "dead",
        }
    }

    /// Parse a condition name. Exhaustion parses at level 1.
    pub fn parse(name: &str) -> Result<Condition, RulesError> {
        let wanted = normalize(name);
        let all = [
            Condition::Blinded,
            Condition::Charmed,
            Condition::Deafened,
            Condition::Frightened,
            Condition::Grappled,
            Condition::Incapacitated,
            Condition::Invisible,
            Condition::Paralyzed,
            Condition::Petrified,
            Condition::Poisoned,
            Condition::Prone,
            Condition::Restrained,
            Condition::Stunned,
            Condition::Unconscious,
            Condition::Exhaustion(1),
            Condition::Dead,
        ];
        all.into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| RulesError::UnknownCondition(name.trim().to_string()))
    }

    /// Whether two conditions are the same kind, ignoring exhaustion level.
    pub fn same_kind(&self, other: &Condition) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Conditions the engine derives from hit points.
    pub fn is_hp_derived(&self) -> bool {
        matches!(self, Condition::Unconscious | Condition::Dead)
    }

    /// Whether a long rest removes it. Exhaustion is reduced rather than removed.
    pub fn clears_on_long_rest(&self) -> bool {
        !matches!(
            self,
            Condition::Dead | Condition::Petrified | Condition::Exhaustion(_)
        )
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Exhaustion(level) => write!(f, "exhaustion ({level})"),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// A condition applied to a creature, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCondition {
    pub condition: Condition,
    pub source: String,
}

impl ActiveCondition {
    pub fn new(condition: Condition, source: impl Into<String>) -> Self {
        Self {
            condition,
            source: source.into(),
        }
    }
}

/// Condition bookkeeping shared by characters and companions.
pub(crate) fn find_condition(list: &[ActiveCondition], kind: &Condition) -> Option<usize> {
    list.iter().position(|c| c.condition.same_kind(kind))
}

/// Insert or replace a condition of the same kind. Returns true if it was new.
pub(crate) fn set_condition(list: &mut Vec<ActiveCondition>, active: ActiveCondition) -> bool {
    match find_condition(list, &active.condition) {
        Some(idx) => {
            list[idx] = active;
            false
        }
        None => {
            list.push(active);
            true
        }
    }
}

/// Remove a condition kind. Returns true if it was present.
pub(crate) fn clear_condition(list: &mut Vec<ActiveCondition>, kind: &Condition) -> bool {
    let before = list.len();
    list.retain(|c| !c.condition.same_kind(kind));
    list.len() != before
}

// ============================================================================
// Hit Points
// ============================================================================

/// Failed or successful death saving throws needed to settle a dying character.
pub const DEATH_SAVES_TO_SETTLE: u8 = 3;

/// Death saving throw progress while at 0 hit points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeathSaves {
    pub successes: u8,
    pub failures: u8,
    /// Stable characters stay unconscious but stop rolling.
    pub stable: bool,
}

impl DeathSaves {
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

/// Hit-point state shared by characters and companions, used by the
/// damage/healing rules.
pub trait Vitals {
    fn current_hp(&self) -> u32;
    fn max_hp(&self) -> u32;
    fn set_current_hp(&mut self, hp: u32);
    fn is_dead(&self) -> bool;
    /// Terminal. Sets hp to 0 and drops unconscious.
    fn mark_dead(&mut self, source: &str);
    fn set_unconscious(&mut self, unconscious: bool, source: &str);
    fn is_unconscious(&self) -> bool;

    /// Temporary hit points, spent before current hp.
    fn temp_hp(&self) -> u32 {
        0
    }

    fn set_temp_hp(&mut self, _hp: u32) {}

    /// Record failed death saves from a hit taken at 0 hp. Returns true
    /// when the failures are fatal. Targets without death saves never fail.
    fn fail_death_saves(&mut self, _count: u8) -> bool {
        false
    }
}

// ============================================================================
// Races and Classes
// ============================================================================

/// D&D 5e playable races.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Race {
    Human,
    Elf,
    Dwarf,
    Halfling,
    HalfOrc,
    HalfElf,
    Tiefling,
    Gnome,
    Dragonborn,
}

impl Race {
    pub fn name(&self) -> &'static str {
        match self {
            Race::Human => "Human",
            Race::Elf => "Elf",
            Race::Dwarf => "Dwarf",
            Race::Halfling => "Halfling",
            Race::HalfOrc => "Half-Orc",
            Race::HalfElf => "Half-Elf",
            Race::Tiefling => "Tiefling",
            Race::Gnome => "Gnome",
            Race::Dragonborn => "Dragonborn",
        }
    }

    pub fn all() -> [Race; 9] {
        [
            Race::Human,
            Race::Elf,
            Race::Dwarf,
            Race::Halfling,
            Race::HalfOrc,
            Race::HalfElf,
            Race::Tiefling,
            Race::Gnome,
            Race::Dragonborn,
        ]
    }

    /// Apply racial ability score bonuses to base scores.
    pub fn apply_ability_bonuses(&self, scores: &mut AbilityScores) {
        let bonuses: &[(Ability, u8)] = match self {
            Race::Human => &[
                (Ability::Strength, 1),
                (Ability::Dexterity, 1),
                (Ability::Constitution, 1),
                (Ability::Intelligence, 1),
                (Ability::Wisdom, 1),
                (Ability::Charisma, 1),
            ],
            Race::Elf | Race::Halfling => &[(Ability::Dexterity, 2)],
            Race::Dwarf => &[(Ability::Constitution, 2)],
            Race::HalfOrc => &[(Ability::Strength, 2), (Ability::Constitution, 1)],
            // Half-elves also pick two +1s; the builder handles those.
            Race::HalfElf => &[(Ability::Charisma, 2)],
            Race::Tiefling => &[(Ability::Charisma, 2), (Ability::Intelligence, 1)],
            Race::Gnome => &[(Ability::Intelligence, 2)],
            Race::Dragonborn => &[(Ability::Strength, 2), (Ability::Charisma, 1)],
        };
        for (ability, bonus) in bonuses {
            scores.set(*ability, scores.get(*ability) + bonus);
        }
    }
}

impl fmt::Display for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Race {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Race::all()
            .into_iter()
            .find(|r| normalize(r.name()) == wanted)
            .ok_or_else(|| RulesError::invalid(format!("unknown race '{s}'")))
    }
}

/// D&D character classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterClass {
    Barbarian,
    Bard,
    Cleric,
    Druid,
    Fighter,
    Monk,
    Paladin,
    Ranger,
    Rogue,
    Sorcerer,
    Warlock,
    Wizard,
}

impl CharacterClass {
    pub fn name(&self) -> &'static str {
        match self {
            CharacterClass::Barbarian => "Barbarian",
            CharacterClass::Bard => "Bard",
            CharacterClass::Cleric => "Cleric",
            CharacterClass::Druid => "Druid",
            CharacterClass::Fighter => "Fighter",
            CharacterClass::Monk => "Monk",
            CharacterClass::Paladin => "Paladin",
            CharacterClass::Ranger => "Ranger",
            CharacterClass::Rogue => "Rogue",
            CharacterClass::Sorcerer => "Sorcerer",
            CharacterClass::Warlock => "Warlock",
            CharacterClass::Wizard => "Wizard",
        }
    }
}

impl fmt::Display for CharacterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CharacterClass {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        CharacterClass::all()
            .iter()
            .copied()
            .find(|c| normalize(c.name()) == wanted)
            .ok_or_else(|| RulesError::invalid(format!("unknown class '{s}'")))
    }
}

// ============================================================================
// Spellcasting
// ============================================================================

/// Remaining and maximum slots per spell level (index 0 = 1st level).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellSlots {
    pub remaining: [u8; 9],
    pub maximum: [u8; 9],
}

impl SpellSlots {
    pub fn full(maximum: [u8; 9]) -> Self {
        Self {
            remaining: maximum,
            maximum,
        }
    }

    pub fn available(&self, level: u8) -> u8 {
        match level {
            1..=9 => self.remaining[level as usize - 1],
            _ => 0,
        }
    }

    /// Spend one slot at `level`. Returns false if none remain.
    pub fn expend(&mut self, level: u8) -> bool {
        if self.available(level) == 0 {
            return false;
        }
        self.remaining[level as usize - 1] -= 1;
        true
    }

    pub fn restore_all(&mut self) {
        self.remaining = self.maximum;
    }

    pub fn is_full(&self) -> bool {
        self.remaining == self.maximum
    }

    /// Move to a new maximum while keeping expended slots expended.
    ///
    /// Pact slots all share one level that moves as the warlock grows, so
    /// their usage is carried as a total rather than per level.
    pub fn rescale(&mut self, maximum: [u8; 9], pact: bool) {
        if pact {
            let used: u8 = self
                .maximum
                .iter()
                .zip(self.remaining.iter())
                .map(|(max, rem)| max - rem)
                .sum();
            let mut remaining = [0; 9];
            for (slot, max) in remaining.iter_mut().zip(maximum.iter()) {
                if *max > 0 {
                    *slot = max - used.min(*max);
                }
            }
            self.remaining = remaining;
        } else {
            for i in 0..9 {
                let used = self.maximum[i] - self.remaining[i];
                self.remaining[i] = maximum[i] - used.min(maximum[i]);
            }
        }
        self.maximum = maximum;
    }
}

/// A spell in a caster's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownSpell {
    pub name: String,
    pub level: u8,
    pub school: SpellSchool,
    pub prepared: bool,
    pub times_cast_today: u32,
}

/// A character's spellcasting profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spellcasting {
    pub caster_type: CasterType,
    pub ability: Ability,
    pub slots: SpellSlots,
    pub spells: Vec<KnownSpell>,
    pub cantrips: Vec<String>,
}

impl Spellcasting {
    pub fn find_spell(&self, name: &str) -> Option<&KnownSpell> {
        self.spells.iter().find(|s| s.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn find_spell_mut(&mut self, name: &str) -> Option<&mut KnownSpell> {
        self.spells
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn knows_cantrip(&self, name: &str) -> bool {
        self.cantrips.iter().any(|c| c.eq_ignore_ascii_case(name.trim()))
    }

    pub fn prepared_spells(&self) -> impl Iterator<Item = &KnownSpell> {
        self.spells.iter().filter(|s| s.prepared)
    }
}

/// Read-only projection of a caster's magic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellSummary {
    pub caster_type: CasterType,
    pub ability: Ability,
    pub slots_remaining: [u8; 9],
    pub slots_maximum: [u8; 9],
    pub prepared: Vec<String>,
    pub known: Vec<String>,
    pub cantrips: Vec<String>,
    pub save_dc: i8,
    pub attack_bonus: i8,
    /// Present for classes that prepare spells each day.
    pub prepare_limit: Option<usize>,
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recharge {
    ShortRest,
    LongRest,
}

/// Limited-use feature tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureUses {
    pub name: String,
    pub current: u32,
    pub maximum: u32,
    pub recharge: Recharge,
}

impl FeatureUses {
    pub fn new(name: impl Into<String>, maximum: u32, recharge: Recharge) -> Self {
        Self {
            name: name.into(),
            current: maximum,
            maximum,
            recharge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitDicePool {
    pub die: DieType,
    pub remaining: u8,
    pub total: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub hit_dice: HitDicePool,
    pub features: Vec<FeatureUses>,
}

impl Resources {
    pub fn feature(&self, name: &str) -> Option<&FeatureUses> {
        let wanted = normalize(name);
        self.features.iter().find(|f| normalize(&f.name) == wanted)
    }

    pub fn feature_mut(&mut self, name: &str) -> Option<&mut FeatureUses> {
        let wanted = normalize(name);
        self.features.iter_mut().find(|f| normalize(&f.name) == wanted)
    }

    /// Replace feature maxima, keeping spent uses spent. New features start full.
    pub fn rescale_features(&mut self, updated: Vec<FeatureUses>) {
        let features = updated
            .into_iter()
            .map(|mut next| {
                if let Some(prev) = self.feature(&next.name) {
                    let spent = prev.maximum.saturating_sub(prev.current);
                    next.current = next.maximum.saturating_sub(spent);
                }
                next
            })
            .collect();
        self.features = features;
    }
}

/// A selection made for a class feature that offers options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureChoice {
    pub feature: String,
    pub level: u8,
    pub selections: Vec<String>,
}

// ============================================================================
// Character
// ============================================================================

/// A player character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: EntityId,
    pub campaign_id: String,
    pub session_id: String,
    pub name: String,
    pub class: CharacterClass,
    pub subclass: Option<String>,
    pub race: Race,
    pub level: u8,
    pub experience: u32,
    pub ability_scores: AbilityScores,
    pub current_hp: u32,
    pub max_hp: u32,
    #[serde(default)]
    pub temp_hp: u32,
    #[serde(default)]
    pub death_saves: DeathSaves,
    pub armor_class: u8,
    pub speed: u32,
    pub size: Size,
    pub conditions: Vec<ActiveCondition>,
    pub skill_proficiencies: HashMap<Skill, ProficiencyLevel>,
    pub saving_throw_proficiencies: Vec<Ability>,
    pub spellcasting: Option<Spellcasting>,
    pub resources: Resources,
    pub features: Vec<String>,
    pub feats: Vec<String>,
    pub feature_choices: Vec<FeatureChoice>,
}

impl Character {
    pub fn modifier(&self, ability: Ability) -> i8 {
        self.ability_scores.modifier(ability)
    }

    pub fn proficiency_bonus(&self) -> i8 {
        tables::proficiency_bonus(self.level)
    }

    pub fn has_condition(&self, kind: &Condition) -> bool {
        find_condition(&self.conditions, kind).is_some()
    }

    pub fn exhaustion_level(&self) -> u8 {
        self.conditions
            .iter()
            .find_map(|c| match c.condition {
                Condition::Exhaustion(level) => Some(level),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn skill_proficiency(&self, skill: Skill) -> ProficiencyLevel {
        self.skill_proficiencies
            .get(&skill)
            .copied()
            .unwrap_or_default()
    }

    pub fn skill_modifier(&self, skill: Skill) -> i8 {
        self.modifier(skill.ability()) + self.skill_proficiency(skill).bonus(self.proficiency_bonus())
    }

    pub fn saving_throw_modifier(&self, ability: Ability) -> i8 {
        let proficient = self.saving_throw_proficiencies.contains(&ability);
        self.modifier(ability) + if proficient { self.proficiency_bonus() } else { 0 }
    }

    pub fn spell_save_dc(&self) -> Option<i8> {
        let casting = self.spellcasting.as_ref()?;
        Some(8 + self.proficiency_bonus() + self.modifier(casting.ability))
    }

    pub fn spell_attack_bonus(&self) -> Option<i8> {
        let casting = self.spellcasting.as_ref()?;
        Some(self.proficiency_bonus() + self.modifier(casting.ability))
    }

    /// Maximum number of prepared spells for classes that prepare daily.
    pub fn prepare_limit(&self) -> Option<usize> {
        let casting = self.spellcasting.as_ref()?;
        if !self.class.prepares_spells() {
            return None;
        }
        let class_levels = match casting.caster_type {
            CasterType::Half => self.level / 2,
            _ => self.level,
        } as i32;
        let limit = self.modifier(casting.ability) as i32 + class_levels;
        Some(limit.max(1) as usize)
    }

    pub fn spell_summary(&self) -> Option<SpellSummary> {
        let casting = self.spellcasting.as_ref()?;
        Some(SpellSummary {
            caster_type: casting.caster_type,
            ability: casting.ability,
            slots_remaining: casting.slots.remaining,
            slots_maximum: casting.slots.maximum,
            prepared: casting.prepared_spells().map(|s| s.name.clone()).collect(),
            known: casting.spells.iter().map(|s| s.name.clone()).collect(),
            cantrips: casting.cantrips.clone(),
            save_dc: self.spell_save_dc().unwrap_or_default(),
            attack_bonus: self.spell_attack_bonus().unwrap_or_default(),
            prepare_limit: self.prepare_limit(),
        })
    }

    /// Structural rules every committed character satisfies.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !(1..=tables::MAX_LEVEL).contains(&self.level) {
            return Err(format!("level {} outside 1-20", self.level));
        }
        if self.max_hp < 1 {
            return Err("max_hp must be at least 1".into());
        }
        if self.current_hp > self.max_hp {
            return Err(format!(
                "current_hp {} exceeds max_hp {}",
                self.current_hp, self.max_hp
            ));
        }
        for ability in Ability::all() {
            let score = self.ability_scores.get(ability);
            if !(1..=30).contains(&score) {
                return Err(format!("{} score {score} outside 1-30", ability.name()));
            }
        }

        let dead = self.has_condition(&Condition::Dead);
        let unconscious = self.has_condition(&Condition::Unconscious);
        if dead && self.current_hp != 0 {
            return Err("dead with hit points remaining".into());
        }
        if unconscious != (self.current_hp == 0 && !dead) {
            return Err(format!(
                "unconscious={unconscious} disagrees with current_hp={} dead={dead}",
                self.current_hp
            ));
        }
        let saves = &self.death_saves;
        if saves.successes > DEATH_SAVES_TO_SETTLE || saves.failures > DEATH_SAVES_TO_SETTLE {
            return Err(format!(
                "death saves {}/{} outside 0-{DEATH_SAVES_TO_SETTLE}",
                saves.successes, saves.failures
            ));
        }
        if !dead && saves.failures >= DEATH_SAVES_TO_SETTLE {
            return Err("three failed death saves but alive".into());
        }
        if self.current_hp > 0 && !saves.is_clear() {
            return Err("death saves recorded above 0 hp".into());
        }
        let exhaustion = self.exhaustion_level();
        if self.has_condition(&Condition::Exhaustion(0)) && !(1..=MAX_EXHAUSTION).contains(&exhaustion) {
            return Err(format!("exhaustion level {exhaustion} outside 1-6"));
        }

        if let Some(casting) = &self.spellcasting {
            let expected = tables::spell_slots(casting.caster_type, self.level);
            if casting.slots.maximum != expected {
                return Err(format!(
                    "slot maximum {:?} does not match {} caster level {} table {:?}",
                    casting.slots.maximum, casting.caster_type, self.level, expected
                ));
            }
            for (level, (rem, max)) in casting
                .slots
                .remaining
                .iter()
                .zip(casting.slots.maximum.iter())
                .enumerate()
            {
                if rem > max {
                    return Err(format!(
                        "level {} slots remaining {rem} exceed maximum {max}",
                        level + 1
                    ));
                }
            }
        }

        let pool = &self.resources.hit_dice;
        if pool.total != self.level {
            return Err(format!(
                "hit dice total {} does not match level {}",
                pool.total, self.level
            ));
        }
        if pool.remaining > pool.total {
            return Err("hit dice remaining exceed total".into());
        }
        for feature in &self.resources.features {
            if feature.current > feature.maximum {
                return Err(format!(
                    "{} uses {} exceed maximum {}",
                    feature.name, feature.current, feature.maximum
                ));
            }
        }
        Ok(())
    }

    /// Rules between the committed record and its replacement.
    pub fn check_transition(&self, before: &Character) -> Result<(), String> {
        if self.level < before.level {
            return Err(format!("level dropped from {} to {}", before.level, self.level));
        }
        if self.level > before.level + 1 {
            return Err(format!(
                "level jumped from {} to {}",
                before.level, self.level
            ));
        }
        if self.level == before.level + 1 {
            if self.max_hp < before.max_hp {
                return Err(format!(
                    "max_hp dropped from {} to {} on level up",
                    before.max_hp, self.max_hp
                ));
            }
            if let (Some(old), Some(new)) = (&before.spellcasting, &self.spellcasting) {
                for spell in old.prepared_spells() {
                    if let Some(still_known) = new.find_spell(&spell.name) {
                        if !still_known.prepared {
                            return Err(format!("{} was unprepared on level up", spell.name));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Vitals for Character {
    fn current_hp(&self) -> u32 {
        self.current_hp
    }

    fn max_hp(&self) -> u32 {
        self.max_hp
    }

    fn set_current_hp(&mut self, hp: u32) {
        self.current_hp = hp.min(self.max_hp);
    }

    fn is_dead(&self) -> bool {
        self.has_condition(&Condition::Dead)
    }

    fn mark_dead(&mut self, source: &str) {
        self.current_hp = 0;
        clear_condition(&mut self.conditions, &Condition::Unconscious);
        set_condition(
            &mut self.conditions,
            ActiveCondition::new(Condition::Dead, source),
        );
    }

    fn set_unconscious(&mut self, unconscious: bool, source: &str) {
        if unconscious {
            set_condition(
                &mut self.conditions,
                ActiveCondition::new(Condition::Unconscious, source),
            );
        } else {
            clear_condition(&mut self.conditions, &Condition::Unconscious);
            self.death_saves = DeathSaves::default();
        }
    }

    fn is_unconscious(&self) -> bool {
        self.has_condition(&Condition::Unconscious)
    }

    fn temp_hp(&self) -> u32 {
        self.temp_hp
    }

    fn set_temp_hp(&mut self, hp: u32) {
        self.temp_hp = hp;
    }

    fn fail_death_saves(&mut self, count: u8) -> bool {
        let saves = &mut self.death_saves;
        saves.stable = false;
        saves.failures = (saves.failures + count).min(DEATH_SAVES_TO_SETTLE);
        saves.failures >= DEATH_SAVES_TO_SETTLE
    }
}
