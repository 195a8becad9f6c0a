//! Spell catalog.
//!
//! A subset of the SRD spell list with the mechanical data the dispatcher
//! reports when a spell is cast: damage or healing dice, damage type, save,
//! attack type and how the spell scales when cast from a higher slot.

use crate::character::{Ability, CharacterClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Schools of magic in D&D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellSchool {
    Abjuration,
    Conjuration,
    Divination,
    Enchantment,
    Evocation,
    Illusion,
    Necromancy,
    Transmutation,
}

impl SpellSchool {
    pub fn name(&self) -> &'static str {
        match self {
            SpellSchool::Abjuration => "Abjuration",
            SpellSchool::Conjuration => "Conjuration",
            SpellSchool::Divination => "Divination",
            SpellSchool::Enchantment => "Enchantment",
            SpellSchool::Evocation => "Evocation",
            SpellSchool::Illusion => "Illusion",
            SpellSchool::Necromancy => "Necromancy",
            SpellSchool::Transmutation => "Transmutation",
        }
    }
}

impl fmt::Display for SpellSchool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Types of damage in D&D 5e.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Acid,
    Bludgeoning,
    Cold,
    Fire,
    Force,
    Lightning,
    Necrotic,
    Piercing,
    Poison,
    Psychic,
    Radiant,
    Slashing,
    Thunder,
}

impl DamageType {
    pub fn name(&self) -> &'static str {
        match self {
            DamageType::Acid => "acid",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Cold => "cold",
            DamageType::Fire => "fire",
            DamageType::Force => "force",
            DamageType::Lightning => "lightning",
            DamageType::Necrotic => "necrotic",
            DamageType::Piercing => "piercing",
            DamageType::Poison => "poison",
            DamageType::Psychic => "psychic",
            DamageType::Radiant => "radiant",
            DamageType::Slashing => "slashing",
            DamageType::Thunder => "thunder",
        }
    }
}

/// Type of spell attack (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellAttackType {
    Melee,
    Ranged,
}

/// How a spell's dice grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DamageScaling {
    /// Cantrip scaling: more dice at caster levels 5, 11, 17.
    Cantrip,
    /// Extra dice for each slot level above the spell's level.
    PerSlotLevel { extra_dice: u32 },
    None,
}

/// Complete spell definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellData {
    pub name: String,
    /// 0 for cantrips.
    pub level: u8,
    pub school: SpellSchool,
    pub concentration: bool,
    pub damage_dice: Option<(u32, u32)>,
    pub damage_type: Option<DamageType>,
    pub healing_dice: Option<(u32, u32)>,
    pub scaling: DamageScaling,
    pub save: Option<Ability>,
    pub attack: Option<SpellAttackType>,
    /// What casting from a higher slot does, as catalog text.
    pub upcast: Option<String>,
    pub classes: Vec<CharacterClass>,
}

impl SpellData {
    fn new(name: &str, level: u8, school: SpellSchool, classes: &[CharacterClass]) -> Self {
        Self {
            name: name.to_string(),
            level,
            school,
            concentration: false,
            damage_dice: None,
            damage_type: None,
            healing_dice: None,
            scaling: if level == 0 {
                DamageScaling::Cantrip
            } else {
                DamageScaling::None
            },
            save: None,
            attack: None,
            upcast: None,
            classes: classes.to_vec(),
        }
    }

    fn damage(mut self, count: u32, sides: u32, kind: DamageType) -> Self {
        self.damage_dice = Some((count, sides));
        self.damage_type = Some(kind);
        self
    }

    fn healing(mut self, count: u32, sides: u32) -> Self {
        self.healing_dice = Some((count, sides));
        self
    }

    fn save(mut self, ability: Ability) -> Self {
        self.save = Some(ability);
        self
    }

    fn attack(mut self, kind: SpellAttackType) -> Self {
        self.attack = Some(kind);
        self
    }

    fn concentration(mut self) -> Self {
        self.concentration = true;
        self
    }

    fn scales(mut self, extra_dice: u32) -> Self {
        let sides = self
            .damage_dice
            .or(self.healing_dice)
            .map(|(_, sides)| sides)
            .unwrap_or(0);
        self.scaling = DamageScaling::PerSlotLevel { extra_dice };
        self.upcast = Some(format!(
            "+{extra_dice}d{sides} for each slot level above {}",
            ordinal(self.level)
        ));
        self
    }

    fn upcast(mut self, note: &str) -> Self {
        self.upcast = Some(note.to_string());
        self
    }

    pub fn is_cantrip(&self) -> bool {
        self.level == 0
    }

    pub fn available_to(&self, class: CharacterClass) -> bool {
        self.classes.contains(&class)
    }

    /// Number of cantrip dice for a caster level.
    pub fn cantrip_dice_count(caster_level: u8) -> u32 {
        match caster_level {
            0..=4 => 1,
            5..=10 => 2,
            11..=16 => 3,
            _ => 4,
        }
    }

    fn scaled(&self, dice: (u32, u32), caster_level: u8, slot_level: u8) -> String {
        let (count, sides) = dice;
        let count = match self.scaling {
            DamageScaling::Cantrip => count * Self::cantrip_dice_count(caster_level),
            DamageScaling::PerSlotLevel { extra_dice } => {
                count + extra_dice * slot_level.saturating_sub(self.level) as u32
            }
            DamageScaling::None => count,
        };
        format!("{count}d{sides}")
    }

    /// Damage dice for a caster level and slot level, e.g. "10d6".
    pub fn effective_damage_dice(&self, caster_level: u8, slot_level: u8) -> Option<String> {
        self.damage_dice
            .map(|dice| self.scaled(dice, caster_level, slot_level))
    }

    /// Healing dice for a slot level.
    pub fn effective_healing_dice(&self, caster_level: u8, slot_level: u8) -> Option<String> {
        self.healing_dice
            .map(|dice| self.scaled(dice, caster_level, slot_level))
    }
}

fn ordinal(level: u8) -> String {
    let suffix = match level {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    };
    format!("{level}{suffix}")
}

// ============================================================================
// Spell Database
// ============================================================================

static SPELL_DATABASE: LazyLock<HashMap<String, SpellData>> = LazyLock::new(build_spell_database);

/// Look up a spell by name (case-insensitive).
pub fn get_spell(name: &str) -> Option<&'static SpellData> {
    SPELL_DATABASE.get(&name.trim().to_lowercase())
}

pub fn all_spells() -> impl Iterator<Item = &'static SpellData> {
    SPELL_DATABASE.values()
}

pub fn spells_by_level(level: u8) -> impl Iterator<Item = &'static SpellData> {
    SPELL_DATABASE.values().filter(move |s| s.level == level)
}

pub fn spells_for_class(class: CharacterClass) -> impl Iterator<Item = &'static SpellData> {
    SPELL_DATABASE
        .values()
        .filter(move |s| s.classes.contains(&class))
}

fn build_spell_database() -> HashMap<String, SpellData> {
    use Ability::*;
    use CharacterClass::{Bard, Cleric, Druid, Paladin, Ranger, Sorcerer, Warlock, Wizard};
    use DamageType as D;
    use SpellAttackType::{Melee, Ranged};
    use SpellSchool::*;

    let spells = vec![
        // Cantrips
        SpellData::new("Fire Bolt", 0, Evocation, &[Sorcerer, Wizard])
            .damage(1, 10, D::Fire)
            .attack(Ranged),
        SpellData::new("Ray of Frost", 0, Evocation, &[Sorcerer, Wizard])
            .damage(1, 8, D::Cold)
            .attack(Ranged),
        SpellData::new("Eldritch Blast", 0, Evocation, &[Warlock])
            .damage(1, 10, D::Force)
            .attack(Ranged),
        SpellData::new("Sacred Flame", 0, Evocation, &[Cleric])
            .damage(1, 8, D::Radiant)
            .save(Dexterity),
        SpellData::new("Toll the Dead", 0, Necromancy, &[Cleric, Warlock, Wizard])
            .damage(1, 8, D::Necrotic)
            .save(Wisdom),
        SpellData::new("Vicious Mockery", 0, Enchantment, &[Bard])
            .damage(1, 4, D::Psychic)
            .save(Wisdom),
        SpellData::new("Produce Flame", 0, Conjuration, &[Druid])
            .damage(1, 8, D::Fire)
            .attack(Ranged),
        SpellData::new("Shillelagh", 0, Transmutation, &[Druid]),
        SpellData::new("Guidance", 0, Divination, &[Cleric, Druid]).concentration(),
        SpellData::new("Light", 0, Evocation, &[Bard, Cleric, Sorcerer, Wizard]),
        SpellData::new("Mage Hand", 0, Conjuration, &[Bard, Sorcerer, Warlock, Wizard]),
        SpellData::new("Minor Illusion", 0, Illusion, &[Bard, Sorcerer, Warlock, Wizard]),
        SpellData::new("Prestidigitation", 0, Transmutation, &[Bard, Sorcerer, Warlock, Wizard]),
        // 1st level
        SpellData::new("Magic Missile", 1, Evocation, &[Sorcerer, Wizard])
            .damage(3, 4, D::Force)
            .upcast("one additional dart for each slot level above 1st"),
        SpellData::new("Burning Hands", 1, Evocation, &[Sorcerer, Wizard])
            .damage(3, 6, D::Fire)
            .save(Dexterity)
            .scales(1),
        SpellData::new("Chromatic Orb", 1, Evocation, &[Sorcerer, Wizard])
            .damage(3, 8, D::Acid)
            .attack(Ranged)
            .scales(1),
        SpellData::new("Thunderwave", 1, Evocation, &[Bard, Druid, Sorcerer, Wizard])
            .damage(2, 8, D::Thunder)
            .save(Constitution)
            .scales(1),
        SpellData::new("Shield", 1, Abjuration, &[Sorcerer, Wizard]),
        SpellData::new("Mage Armor", 1, Abjuration, &[Sorcerer, Wizard]),
        SpellData::new("Detect Magic", 1, Divination, &[Bard, Cleric, Druid, Paladin, Ranger, Sorcerer, Wizard])
            .concentration(),
        SpellData::new("Sleep", 1, Enchantment, &[Bard, Sorcerer, Wizard])
            .upcast("+2d8 hit points affected for each slot level above 1st"),
        SpellData::new("Cure Wounds", 1, Evocation, &[Bard, Cleric, Druid, Paladin, Ranger])
            .healing(1, 8)
            .scales(1),
        SpellData::new("Healing Word", 1, Evocation, &[Bard, Cleric, Druid])
            .healing(1, 4)
            .scales(1),
        SpellData::new("Guiding Bolt", 1, Evocation, &[Cleric])
            .damage(4, 6, D::Radiant)
            .attack(Ranged)
            .scales(1),
        SpellData::new("Inflict Wounds", 1, Necromancy, &[Cleric])
            .damage(3, 10, D::Necrotic)
            .attack(Melee)
            .scales(1),
        SpellData::new("Bless", 1, Enchantment, &[Cleric, Paladin])
            .concentration()
            .upcast("one additional creature for each slot level above 1st"),
        SpellData::new("Shield of Faith", 1, Abjuration, &[Cleric, Paladin]).concentration(),
        SpellData::new("Divine Favor", 1, Evocation, &[Paladin]).concentration(),
        SpellData::new("Thunderous Smite", 1, Evocation, &[Paladin])
            .damage(2, 6, D::Thunder)
            .save(Strength)
            .concentration(),
        SpellData::new("Entangle", 1, Conjuration, &[Druid])
            .save(Strength)
            .concentration(),
        SpellData::new("Faerie Fire", 1, Evocation, &[Bard, Druid])
            .save(Dexterity)
            .concentration(),
        SpellData::new("Goodberry", 1, Transmutation, &[Druid, Ranger]),
        SpellData::new("Hunter's Mark", 1, Divination, &[Ranger])
            .damage(1, 6, D::Force)
            .concentration()
            .upcast("duration extends to 8 hours at 3rd or 4th level, 24 hours at 5th or higher"),
        SpellData::new("Hail of Thorns", 1, Conjuration, &[Ranger])
            .damage(1, 10, D::Piercing)
            .save(Dexterity)
            .concentration()
            .scales(1),
        SpellData::new("Dissonant Whispers", 1, Enchantment, &[Bard])
            .damage(3, 6, D::Psychic)
            .save(Wisdom)
            .scales(1),
        SpellData::new("Heroism", 1, Enchantment, &[Bard, Paladin]).concentration(),
        SpellData::new("Hex", 1, Enchantment, &[Warlock])
            .damage(1, 6, D::Necrotic)
            .concentration(),
        SpellData::new("Armor of Agathys", 1, Abjuration, &[Warlock])
            .damage(5, 1, D::Cold)
            .upcast("+5 temporary hit points and cold damage for each slot level above 1st"),
        SpellData::new("Hellish Rebuke", 1, Evocation, &[Warlock])
            .damage(2, 10, D::Fire)
            .save(Dexterity)
            .scales(1),
        // 2nd level
        SpellData::new("Scorching Ray", 2, Evocation, &[Sorcerer, Wizard])
            .damage(2, 6, D::Fire)
            .attack(Ranged)
            .upcast("one additional ray for each slot level above 2nd"),
        SpellData::new("Shatter", 2, Evocation, &[Bard, Sorcerer, Warlock, Wizard])
            .damage(3, 8, D::Thunder)
            .save(Constitution)
            .scales(1),
        SpellData::new("Misty Step", 2, Conjuration, &[Sorcerer, Warlock, Wizard]),
        SpellData::new("Invisibility", 2, Illusion, &[Bard, Sorcerer, Warlock, Wizard])
            .concentration()
            .upcast("one additional creature for each slot level above 2nd"),
        SpellData::new("Hold Person", 2, Enchantment, &[Bard, Cleric, Druid, Sorcerer, Warlock, Wizard])
            .save(Wisdom)
            .concentration()
            .upcast("one additional humanoid for each slot level above 2nd"),
        SpellData::new("Spiritual Weapon", 2, Evocation, &[Cleric])
            .damage(1, 8, D::Force)
            .attack(Melee)
            .upcast("+1d8 for every two slot levels above 2nd"),
        SpellData::new("Lesser Restoration", 2, Abjuration, &[Bard, Cleric, Druid, Paladin, Ranger]),
        SpellData::new("Moonbeam", 2, Evocation, &[Druid])
            .damage(2, 10, D::Radiant)
            .save(Constitution)
            .concentration()
            .scales(1),
        SpellData::new("Pass without Trace", 2, Abjuration, &[Druid, Ranger]).concentration(),
        // 3rd level
        SpellData::new("Fireball", 3, Evocation, &[Sorcerer, Wizard])
            .damage(8, 6, D::Fire)
            .save(Dexterity)
            .scales(1),
        SpellData::new("Lightning Bolt", 3, Evocation, &[Sorcerer, Wizard])
            .damage(8, 6, D::Lightning)
            .save(Dexterity)
            .scales(1),
        SpellData::new("Counterspell", 3, Abjuration, &[Sorcerer, Warlock, Wizard])
            .upcast("automatically counters spells of the slot's level or lower"),
        SpellData::new("Dispel Magic", 3, Abjuration, &[Bard, Cleric, Druid, Paladin, Sorcerer, Warlock, Wizard])
            .upcast("automatically ends spells of the slot's level or lower"),
        SpellData::new("Fly", 3, Transmutation, &[Sorcerer, Warlock, Wizard])
            .concentration()
            .upcast("one additional creature for each slot level above 3rd"),
        SpellData::new("Spirit Guardians", 3, Conjuration, &[Cleric])
            .damage(3, 8, D::Radiant)
            .save(Wisdom)
            .concentration()
            .scales(1),
        SpellData::new("Revivify", 3, Necromancy, &[Cleric, Paladin]),
        SpellData::new("Call Lightning", 3, Conjuration, &[Druid])
            .damage(3, 10, D::Lightning)
            .save(Dexterity)
            .concentration()
            .scales(1),
        SpellData::new("Mass Healing Word", 3, Evocation, &[Cleric])
            .healing(1, 4)
            .scales(1),
        // 4th level and up
        SpellData::new("Ice Storm", 4, Evocation, &[Druid, Sorcerer, Wizard])
            .damage(2, 8, D::Bludgeoning)
            .save(Dexterity)
            .scales(1),
        SpellData::new("Wall of Fire", 4, Evocation, &[Druid, Sorcerer, Wizard])
            .damage(5, 8, D::Fire)
            .save(Dexterity)
            .concentration()
            .scales(1),
        SpellData::new("Greater Invisibility", 4, Illusion, &[Bard, Sorcerer, Wizard]).concentration(),
        SpellData::new("Cone of Cold", 5, Evocation, &[Sorcerer, Wizard])
            .damage(8, 8, D::Cold)
            .save(Constitution)
            .scales(1),
        SpellData::new("Mass Cure Wounds", 5, Evocation, &[Bard, Cleric, Druid])
            .healing(3, 8)
            .scales(1),
        SpellData::new("Chain Lightning", 6, Evocation, &[Sorcerer, Wizard])
            .damage(10, 8, D::Lightning)
            .save(Dexterity)
            .upcast("one additional bolt for each slot level above 6th"),
        SpellData::new("Finger of Death", 7, Necromancy, &[Sorcerer, Warlock, Wizard])
            .damage(7, 8, D::Necrotic)
            .save(Constitution),
        SpellData::new("Sunburst", 8, Evocation, &[Druid, Sorcerer, Wizard])
            .damage(12, 6, D::Radiant)
            .save(Constitution),
        SpellData::new("Meteor Swarm", 9, Evocation, &[Sorcerer, Wizard])
            .damage(40, 6, D::Fire)
            .save(Dexterity),
    ];

    spells
        .into_iter()
        .map(|spell| (spell.name.to_lowercase(), spell))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_spell() {
        let fireball = get_spell("fireball").expect("Fireball should exist");
        assert_eq!(fireball.name, "Fireball");
        assert_eq!(fireball.level, 3);
        assert_eq!(fireball.school, SpellSchool::Evocation);
        assert_eq!(fireball.save, Some(Ability::Dexterity));
        assert!(get_spell("FIREBALL").is_some());
        assert!(get_spell("  Magic Missile ").is_some());
        assert!(get_spell("Wish").is_none());
    }

    #[test]
    fn test_cantrip_scaling() {
        let fire_bolt = get_spell("fire bolt").unwrap();
        assert!(fire_bolt.is_cantrip());
        assert_eq!(fire_bolt.effective_damage_dice(1, 0).as_deref(), Some("1d10"));
        assert_eq!(fire_bolt.effective_damage_dice(5, 0).as_deref(), Some("2d10"));
        assert_eq!(fire_bolt.effective_damage_dice(17, 0).as_deref(), Some("4d10"));
    }

    #[test]
    fn test_upcast_scaling() {
        let fireball = get_spell("fireball").unwrap();
        assert_eq!(fireball.effective_damage_dice(5, 3).as_deref(), Some("8d6"));
        assert_eq!(fireball.effective_damage_dice(9, 5).as_deref(), Some("10d6"));
        assert_eq!(
            fireball.upcast.as_deref(),
            Some("+1d6 for each slot level above 3rd")
        );

        let cure = get_spell("cure wounds").unwrap();
        assert_eq!(cure.effective_healing_dice(3, 2).as_deref(), Some("2d8"));
        assert!(cure.effective_damage_dice(3, 2).is_none());
    }

    #[test]
    fn test_spell_classes() {
        let cure_wounds = get_spell("cure wounds").unwrap();
        assert!(cure_wounds.available_to(CharacterClass::Cleric));
        assert!(cure_wounds.available_to(CharacterClass::Ranger));
        assert!(!cure_wounds.available_to(CharacterClass::Wizard));

        let wizard_spells: Vec<_> = spells_for_class(CharacterClass::Wizard).collect();
        assert!(wizard_spells.iter().any(|s| s.name == "Fire Bolt"));
        assert!(!wizard_spells.iter().any(|s| s.name == "Eldritch Blast"));
    }

    #[test]
    fn test_every_level_represented() {
        for level in 0..=9 {
            assert!(spells_by_level(level).count() > 0, "no level {level} spells");
        }
        assert!(all_spells().all(|s| s.level <= 9 && !s.classes.is_empty()));
    }
}
