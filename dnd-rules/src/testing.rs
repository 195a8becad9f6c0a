//! Testing utilities.
//!
//! This module provides:
//! - Sample characters at known, valid states
//! - `TestHarness` wrapping a `RulesEngine` with one registered hero
//! - Assertion helpers for verifying entity state

use crate::character::{
    Ability, AbilityScores, Character, CharacterClass, Condition, DeathSaves, EntityId,
    FeatureChoice, HitDicePool, KnownSpell, ProficiencyLevel, Race, Resources, Skill, SpellSlots,
    Spellcasting,
};
use crate::config::EngineConfig;
use crate::error::RulesError;
use crate::rules::{Action, ActionOutcome, ActionRequest, RulesEngine};
use crate::spells;
use crate::tables;
use std::collections::HashMap;
use std::sync::Arc;

/// A character with class-derived fields filled in and full resources.
fn base_character(
    name: &str,
    class: CharacterClass,
    subclass: Option<&str>,
    race: Race,
    level: u8,
    scores: AbilityScores,
    max_hp: u32,
    armor_class: u8,
) -> Character {
    let spellcasting = class.caster_type(subclass).and_then(|caster| {
        let ability = class.spellcasting_ability(subclass)?;
        Some(Spellcasting {
            caster_type: caster,
            ability,
            slots: SpellSlots::full(tables::spell_slots(caster, level)),
            spells: Vec::new(),
            cantrips: Vec::new(),
        })
    });
    Character {
        id: EntityId::new(),
        campaign_id: "test-campaign".into(),
        session_id: "test-session".into(),
        name: name.into(),
        class,
        subclass: subclass.map(str::to_string),
        race,
        level,
        experience: tables::xp_for_level(level).unwrap_or(0),
        resources: Resources {
            hit_dice: HitDicePool {
                die: class.hit_die(),
                remaining: level,
                total: level,
            },
            features: class.limited_features(level, &scores),
        },
        ability_scores: scores,
        current_hp: max_hp,
        temp_hp: 0,
        death_saves: DeathSaves::default(),
        max_hp,
        armor_class,
        speed: race.speed(),
        size: race.size(),
        conditions: Vec::new(),
        skill_proficiencies: HashMap::new(),
        saving_throw_proficiencies: class.data().saving_throws.to_vec(),
        spellcasting,
        features: class
            .features_through(level)
            .map(|f| f.name.to_string())
            .collect(),
        feats: Vec::new(),
        feature_choices: Vec::new(),
    }
}

fn learn(character: &mut Character, names: &[&str], prepared: &[&str]) {
    if let Some(casting) = character.spellcasting.as_mut() {
        for name in names {
            if let Some(spell) = spells::get_spell(name) {
                casting.spells.push(KnownSpell {
                    name: spell.name.clone(),
                    level: spell.level,
                    school: spell.school,
                    prepared: prepared.contains(name),
                    times_cast_today: 0,
                });
            }
        }
    }
}

fn cantrips(character: &mut Character, names: &[&str]) {
    if let Some(casting) = character.spellcasting.as_mut() {
        casting.cantrips = names.iter().map(|s| s.to_string()).collect();
    }
}

fn choose(character: &mut Character, feature: &str, level: u8, selection: &str) {
    character.feature_choices.push(FeatureChoice {
        feature: feature.into(),
        level,
        selections: vec![selection.into()],
    });
}

/// Level 1 evocation-bound wizard: INT 16, two 1st-level slots, Magic
/// Missile and Shield prepared.
pub fn sample_wizard() -> Character {
    let scores = AbilityScores::new(8, 14, 13, 16, 12, 10);
    let mut wizard = base_character("Elara", CharacterClass::Wizard, None, Race::Elf, 1, scores, 7, 12);
    wizard
        .skill_proficiencies
        .insert(Skill::Arcana, ProficiencyLevel::Proficient);
    wizard
        .skill_proficiencies
        .insert(Skill::Investigation, ProficiencyLevel::Proficient);
    learn(
        &mut wizard,
        &["Magic Missile", "Shield", "Mage Armor", "Detect Magic", "Thunderwave"],
        &["Magic Missile", "Shield"],
    );
    cantrips(&mut wizard, &["Fire Bolt", "Light", "Mage Hand"]);
    wizard
}

/// Level 1 fighter: STR 16, 12 hit points, Second Wind.
pub fn sample_fighter() -> Character {
    let scores = AbilityScores::new(16, 12, 14, 10, 12, 8);
    let mut fighter =
        base_character("Brakka", CharacterClass::Fighter, None, Race::Human, 1, scores, 12, 16);
    fighter
        .skill_proficiencies
        .insert(Skill::Athletics, ProficiencyLevel::Proficient);
    fighter
        .skill_proficiencies
        .insert(Skill::Perception, ProficiencyLevel::Proficient);
    choose(&mut fighter, "Fighting Style", 1, "Defense");
    fighter
}

/// Level 1 halfling rogue with Stealth expertise (+7).
pub fn sample_rogue() -> Character {
    let scores = AbilityScores::new(8, 16, 12, 13, 10, 14);
    let mut rogue =
        base_character("Whisper", CharacterClass::Rogue, None, Race::Halfling, 1, scores, 9, 14);
    rogue
        .skill_proficiencies
        .insert(Skill::Stealth, ProficiencyLevel::Expertise);
    rogue
        .skill_proficiencies
        .insert(Skill::SleightOfHand, ProficiencyLevel::Proficient);
    rogue
}

/// Level 3 Beast Master ranger, ready to bond with a companion.
pub fn sample_ranger() -> Character {
    let scores = AbilityScores::new(12, 16, 14, 10, 14, 8);
    let mut ranger = base_character(
        "Talia",
        CharacterClass::Ranger,
        Some("Beast Master"),
        Race::Elf,
        3,
        scores,
        28,
        15,
    );
    ranger
        .skill_proficiencies
        .insert(Skill::Survival, ProficiencyLevel::Proficient);
    ranger
        .skill_proficiencies
        .insert(Skill::Stealth, ProficiencyLevel::Proficient);
    choose(&mut ranger, "Favored Enemy", 1, "Beasts");
    choose(&mut ranger, "Natural Explorer", 1, "Forest");
    choose(&mut ranger, "Fighting Style", 2, "Archery");
    learn(
        &mut ranger,
        &["Hunter's Mark", "Cure Wounds", "Goodberry"],
        &["Hunter's Mark", "Cure Wounds", "Goodberry"],
    );
    ranger
}

/// Level 1 fiend warlock with a single pact slot.
pub fn sample_warlock() -> Character {
    let scores = AbilityScores::new(8, 14, 14, 12, 10, 16);
    let mut warlock = base_character(
        "Mordai",
        CharacterClass::Warlock,
        Some("The Fiend"),
        Race::Tiefling,
        1,
        scores,
        10,
        12,
    );
    learn(&mut warlock, &["Hex", "Hellish Rebuke"], &["Hex", "Hellish Rebuke"]);
    cantrips(&mut warlock, &["Eldritch Blast", "Mage Hand"]);
    warlock
}

/// Level 1 life cleric: WIS 16, Cure Wounds and Bless prepared.
pub fn sample_cleric() -> Character {
    let scores = AbilityScores::new(14, 10, 14, 10, 16, 12);
    let mut cleric = base_character(
        "Bram",
        CharacterClass::Cleric,
        Some("Life Domain"),
        Race::Dwarf,
        1,
        scores,
        10,
        18,
    );
    learn(&mut cleric, &["Cure Wounds", "Bless"], &["Cure Wounds", "Bless"]);
    cantrips(&mut cleric, &["Sacred Flame", "Guidance", "Light"]);
    cleric
}

/// Test harness for running rules scenarios against one hero.
pub struct TestHarness {
    /// The engine under test.
    pub engine: RulesEngine,
    /// Id of the registered hero.
    pub hero: EntityId,
}

impl TestHarness {
    /// Create a harness around the sample fighter.
    pub fn new() -> Self {
        Self::with_character(sample_fighter())
    }

    /// Create a harness around a custom character.
    pub fn with_character(character: Character) -> Self {
        Self::with_config(EngineConfig::default(), character)
    }

    pub fn with_config(config: EngineConfig, character: Character) -> Self {
        let engine = RulesEngine::new(config);
        let hero = character.id;
        if let Err(err) = engine.create_character(character) {
            panic!("fixture character rejected: {err}");
        }
        Self { engine, hero }
    }

    /// Current committed snapshot of the hero.
    pub fn character(&self) -> Arc<Character> {
        match self.engine.get_character(self.hero) {
            Ok(character) => character,
            Err(err) => panic!("hero missing from engine: {err}"),
        }
    }

    /// Dispatch an action to the hero.
    pub async fn act(&self, action: Action) -> Result<ActionOutcome, RulesError> {
        self.engine
            .dispatch(ActionRequest::new(self.hero, action))
            .await
    }

    /// Dispatch an action to the hero under an idempotency key.
    pub async fn act_keyed(&self, key: &str, action: Action) -> Result<ActionOutcome, RulesError> {
        self.engine
            .dispatch(ActionRequest::new(self.hero, action).with_key(key))
            .await
    }

    /// Get current hero HP as (current, max).
    pub fn hp(&self) -> (u32, u32) {
        let character = self.character();
        (character.current_hp, character.max_hp)
    }

    pub fn has_condition(&self, condition: Condition) -> bool {
        self.character().has_condition(&condition)
    }

    /// Remaining slots at a spell level, 0 for non-casters.
    pub fn slots_remaining(&self, level: u8) -> u8 {
        self.character()
            .spellcasting
            .as_ref()
            .map(|c| c.slots.available(level))
            .unwrap_or(0)
    }

    pub fn modifier(&self, ability: Ability) -> i8 {
        self.character().modifier(ability)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert hero HP is at expected values.
#[track_caller]
pub fn assert_hp(harness: &TestHarness, current: u32, max: u32) {
    let (actual_current, actual_max) = harness.hp();
    assert_eq!(
        (actual_current, actual_max),
        (current, max),
        "Expected HP {current}/{max}, got {actual_current}/{actual_max}"
    );
}

/// Assert the hero has a condition.
#[track_caller]
pub fn assert_condition(harness: &TestHarness, condition: Condition) {
    assert!(
        harness.has_condition(condition),
        "Expected hero to be {condition}"
    );
}

/// Assert the hero does NOT have a condition.
#[track_caller]
pub fn assert_no_condition(harness: &TestHarness, condition: Condition) {
    assert!(
        !harness.has_condition(condition),
        "Expected hero to NOT be {condition}"
    );
}

/// Assert remaining slots at a spell level.
#[track_caller]
pub fn assert_slots(harness: &TestHarness, level: u8, remaining: u8) {
    let actual = harness.slots_remaining(level);
    assert_eq!(
        actual, remaining,
        "Expected {remaining} level {level} slots, got {actual}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_valid() {
        for character in [
            sample_wizard(),
            sample_fighter(),
            sample_rogue(),
            sample_ranger(),
            sample_warlock(),
            sample_cleric(),
        ] {
            if let Err(reason) = character.check_invariants() {
                panic!("{} is invalid: {reason}", character.name);
            }
        }
    }

    #[test]
    fn test_rogue_stealth_modifier() {
        assert_eq!(sample_rogue().skill_modifier(Skill::Stealth), 7);
    }

    #[tokio::test]
    async fn test_harness_basics() {
        let harness = TestHarness::new();
        assert_hp(&harness, 12, 12);
        harness
            .act(Action::ModifyHp {
                amount: -4,
                source: "goblin".into(),
            })
            .await
            .unwrap();
        assert_hp(&harness, 8, 12);
        assert_no_condition(&harness, Condition::Unconscious);
        assert_slots(&harness, 1, 0);
    }
}
