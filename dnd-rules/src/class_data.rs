//! D&D 5e class tables.
//!
//! Hit dice, saving throws, skill lists, spellcasting progression, ASI
//! levels, subclasses and the features gained at each level for the 12 PHB
//! classes.

use crate::character::{Ability, AbilityScores, CharacterClass, FeatureUses, Recharge, Skill};
use crate::dice::DieType;
use crate::tables::CasterType;

/// Class-specific data for character creation.
pub struct ClassData {
    /// Saving throw proficiencies granted by the class.
    pub saving_throws: [Ability; 2],
    /// Number of skills to choose.
    pub skill_count: usize,
    /// Skills available to choose from.
    pub skill_options: &'static [Skill],
}

/// A feature gained at a class level, with its options when it asks for
/// a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassFeature {
    pub name: &'static str,
    pub level: u8,
    pub choice: Option<FeatureChoiceSpec>,
}

/// The options a choice feature offers and how many must be picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureChoiceSpec {
    pub options: &'static [&'static str],
    pub picks: usize,
}

const ALL_SKILLS: &[Skill] = &[
    Skill::Acrobatics,
    Skill::AnimalHandling,
    Skill::Arcana,
    Skill::Athletics,
    Skill::Deception,
    Skill::History,
    Skill::Insight,
    Skill::Intimidation,
    Skill::Investigation,
    Skill::Medicine,
    Skill::Nature,
    Skill::Perception,
    Skill::Performance,
    Skill::Persuasion,
    Skill::Religion,
    Skill::SleightOfHand,
    Skill::Stealth,
    Skill::Survival,
];

const FIGHTER_STYLES: &[&str] = &[
    "Archery",
    "Defense",
    "Dueling",
    "Great Weapon Fighting",
    "Protection",
    "Two-Weapon Fighting",
];
const PALADIN_STYLES: &[&str] = &["Defense", "Dueling", "Great Weapon Fighting", "Protection"];
const RANGER_STYLES: &[&str] = &["Archery", "Defense", "Dueling", "Two-Weapon Fighting"];

const METAMAGIC: &[&str] = &[
    "Careful Spell",
    "Distant Spell",
    "Empowered Spell",
    "Extended Spell",
    "Heightened Spell",
    "Quickened Spell",
    "Subtle Spell",
    "Twinned Spell",
];

const PACT_BOONS: &[&str] = &["Pact of the Chain", "Pact of the Blade", "Pact of the Tome"];

const FAVORED_ENEMIES: &[&str] = &[
    "Aberrations",
    "Beasts",
    "Celestials",
    "Constructs",
    "Dragons",
    "Elementals",
    "Fey",
    "Fiends",
    "Giants",
    "Monstrosities",
    "Oozes",
    "Plants",
    "Undead",
];

const FAVORED_TERRAINS: &[&str] = &[
    "Arctic",
    "Coast",
    "Desert",
    "Forest",
    "Grassland",
    "Mountain",
    "Swamp",
    "Underdark",
];

const fn plain(level: u8, name: &'static str) -> ClassFeature {
    ClassFeature {
        name,
        level,
        choice: None,
    }
}

const fn pick(level: u8, name: &'static str, options: &'static [&'static str], picks: usize) -> ClassFeature {
    ClassFeature {
        name,
        level,
        choice: Some(FeatureChoiceSpec { options, picks }),
    }
}

const BARBARIAN_FEATURES: &[ClassFeature] = &[
    plain(1, "Rage"),
    plain(1, "Unarmored Defense"),
    plain(2, "Reckless Attack"),
    plain(2, "Danger Sense"),
    plain(3, "Primal Path"),
    plain(5, "Extra Attack"),
    plain(5, "Fast Movement"),
    plain(6, "Path Feature"),
    plain(7, "Feral Instinct"),
    plain(9, "Brutal Critical (1 die)"),
    plain(10, "Path Feature"),
    plain(11, "Relentless Rage"),
    plain(13, "Brutal Critical (2 dice)"),
    plain(14, "Path Feature"),
    plain(15, "Persistent Rage"),
    plain(17, "Brutal Critical (3 dice)"),
    plain(18, "Indomitable Might"),
    plain(20, "Primal Champion"),
];

const BARD_FEATURES: &[ClassFeature] = &[
    plain(1, "Spellcasting"),
    plain(1, "Bardic Inspiration (d6)"),
    plain(2, "Jack of All Trades"),
    plain(2, "Song of Rest (d6)"),
    plain(3, "Bard College"),
    plain(3, "Expertise"),
    plain(5, "Bardic Inspiration (d8)"),
    plain(5, "Font of Inspiration"),
    plain(6, "Countercharm"),
    plain(6, "College Feature"),
    plain(10, "Bardic Inspiration (d10)"),
    plain(10, "Magical Secrets"),
    plain(14, "Magical Secrets"),
    plain(14, "College Feature"),
    plain(15, "Bardic Inspiration (d12)"),
    plain(18, "Magical Secrets"),
    plain(20, "Superior Inspiration"),
];

const CLERIC_FEATURES: &[ClassFeature] = &[
    plain(1, "Spellcasting"),
    plain(1, "Divine Domain"),
    plain(2, "Channel Divinity (1/rest)"),
    plain(5, "Destroy Undead (CR 1/2)"),
    plain(6, "Channel Divinity (2/rest)"),
    plain(8, "Destroy Undead (CR 1)"),
    plain(8, "Domain Feature"),
    plain(10, "Divine Intervention"),
    plain(11, "Destroy Undead (CR 2)"),
    plain(14, "Destroy Undead (CR 3)"),
    plain(17, "Destroy Undead (CR 4)"),
    plain(17, "Domain Feature"),
    plain(18, "Channel Divinity (3/rest)"),
    plain(20, "Divine Intervention Improvement"),
];

const DRUID_FEATURES: &[ClassFeature] = &[
    plain(1, "Druidic"),
    plain(1, "Spellcasting"),
    plain(2, "Wild Shape"),
    plain(2, "Druid Circle"),
    plain(4, "Wild Shape Improvement"),
    plain(6, "Circle Feature"),
    plain(8, "Wild Shape Improvement"),
    plain(10, "Circle Feature"),
    plain(14, "Circle Feature"),
    plain(18, "Timeless Body"),
    plain(18, "Beast Spells"),
    plain(20, "Archdruid"),
];

const FIGHTER_FEATURES: &[ClassFeature] = &[
    pick(1, "Fighting Style", FIGHTER_STYLES, 1),
    plain(1, "Second Wind"),
    plain(2, "Action Surge"),
    plain(3, "Martial Archetype"),
    plain(5, "Extra Attack"),
    plain(7, "Archetype Feature"),
    plain(9, "Indomitable"),
    plain(10, "Archetype Feature"),
    plain(11, "Extra Attack (2)"),
    plain(13, "Indomitable (2 uses)"),
    plain(15, "Archetype Feature"),
    plain(17, "Action Surge (2 uses)"),
    plain(17, "Indomitable (3 uses)"),
    plain(18, "Archetype Feature"),
    plain(20, "Extra Attack (3)"),
];

const MONK_FEATURES: &[ClassFeature] = &[
    plain(1, "Unarmored Defense"),
    plain(1, "Martial Arts"),
    plain(2, "Ki"),
    plain(2, "Unarmored Movement"),
    plain(3, "Monastic Tradition"),
    plain(3, "Deflect Missiles"),
    plain(4, "Slow Fall"),
    plain(5, "Extra Attack"),
    plain(5, "Stunning Strike"),
    plain(6, "Ki-Empowered Strikes"),
    plain(6, "Tradition Feature"),
    plain(7, "Evasion"),
    plain(7, "Stillness of Mind"),
    plain(10, "Purity of Body"),
    plain(11, "Tradition Feature"),
    plain(13, "Tongue of the Sun and Moon"),
    plain(14, "Diamond Soul"),
    plain(15, "Timeless Body"),
    plain(17, "Tradition Feature"),
    plain(18, "Empty Body"),
    plain(20, "Perfect Self"),
];

const PALADIN_FEATURES: &[ClassFeature] = &[
    plain(1, "Divine Sense"),
    plain(1, "Lay on Hands"),
    pick(2, "Fighting Style", PALADIN_STYLES, 1),
    plain(2, "Spellcasting"),
    plain(2, "Divine Smite"),
    plain(3, "Divine Health"),
    plain(3, "Sacred Oath"),
    plain(5, "Extra Attack"),
    plain(6, "Aura of Protection"),
    plain(7, "Oath Feature"),
    plain(10, "Aura of Courage"),
    plain(11, "Improved Divine Smite"),
    plain(14, "Cleansing Touch"),
    plain(15, "Oath Feature"),
    plain(18, "Aura Improvements"),
    plain(20, "Oath Feature"),
];

const RANGER_FEATURES: &[ClassFeature] = &[
    pick(1, "Favored Enemy", FAVORED_ENEMIES, 1),
    pick(1, "Natural Explorer", FAVORED_TERRAINS, 1),
    pick(2, "Fighting Style", RANGER_STYLES, 1),
    plain(2, "Spellcasting"),
    plain(3, "Ranger Archetype"),
    plain(3, "Primeval Awareness"),
    plain(5, "Extra Attack"),
    pick(6, "Favored Enemy Improvement", FAVORED_ENEMIES, 1),
    pick(6, "Natural Explorer Improvement", FAVORED_TERRAINS, 1),
    plain(7, "Archetype Feature"),
    plain(8, "Land's Stride"),
    pick(10, "Natural Explorer Improvement", FAVORED_TERRAINS, 1),
    plain(10, "Hide in Plain Sight"),
    plain(11, "Archetype Feature"),
    pick(14, "Favored Enemy Improvement", FAVORED_ENEMIES, 1),
    plain(14, "Vanish"),
    plain(15, "Archetype Feature"),
    plain(18, "Feral Senses"),
    plain(20, "Foe Slayer"),
];

const ROGUE_FEATURES: &[ClassFeature] = &[
    plain(1, "Expertise"),
    plain(1, "Sneak Attack"),
    plain(1, "Thieves' Cant"),
    plain(2, "Cunning Action"),
    plain(3, "Roguish Archetype"),
    plain(5, "Uncanny Dodge"),
    plain(6, "Expertise"),
    plain(7, "Evasion"),
    plain(9, "Archetype Feature"),
    plain(11, "Reliable Talent"),
    plain(13, "Archetype Feature"),
    plain(14, "Blindsense"),
    plain(15, "Slippery Mind"),
    plain(17, "Archetype Feature"),
    plain(18, "Elusive"),
    plain(20, "Stroke of Luck"),
];

const SORCERER_FEATURES: &[ClassFeature] = &[
    plain(1, "Spellcasting"),
    plain(1, "Sorcerous Origin"),
    plain(2, "Font of Magic"),
    pick(3, "Metamagic", METAMAGIC, 2),
    plain(6, "Origin Feature"),
    pick(10, "Metamagic", METAMAGIC, 1),
    plain(14, "Origin Feature"),
    pick(17, "Metamagic", METAMAGIC, 1),
    plain(18, "Origin Feature"),
    plain(20, "Sorcerous Restoration"),
];

const WARLOCK_FEATURES: &[ClassFeature] = &[
    plain(1, "Otherworldly Patron"),
    plain(1, "Pact Magic"),
    plain(2, "Eldritch Invocations"),
    pick(3, "Pact Boon", PACT_BOONS, 1),
    plain(6, "Patron Feature"),
    plain(10, "Patron Feature"),
    plain(11, "Mystic Arcanum (6th level)"),
    plain(13, "Mystic Arcanum (7th level)"),
    plain(14, "Patron Feature"),
    plain(15, "Mystic Arcanum (8th level)"),
    plain(17, "Mystic Arcanum (9th level)"),
    plain(20, "Eldritch Master"),
];

const WIZARD_FEATURES: &[ClassFeature] = &[
    plain(1, "Spellcasting"),
    plain(1, "Arcane Recovery"),
    plain(2, "Arcane Tradition"),
    plain(6, "Tradition Feature"),
    plain(10, "Tradition Feature"),
    plain(14, "Tradition Feature"),
    plain(18, "Spell Mastery"),
    plain(20, "Signature Spells"),
];

/// Spells known by class level for classes with a fixed repertoire.
const BARD_KNOWN: [u8; 20] = [4, 5, 6, 7, 8, 9, 10, 11, 12, 14, 15, 15, 16, 18, 19, 19, 20, 22, 22, 22];
const SORCERER_KNOWN: [u8; 20] = [2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 12, 13, 13, 14, 14, 15, 15, 15, 15];
const WARLOCK_KNOWN: [u8; 20] = [2, 3, 4, 5, 6, 7, 8, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15];
const RANGER_KNOWN: [u8; 20] = [0, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11];
/// Eldritch Knight and Arcane Trickster.
const THIRD_CASTER_KNOWN: [u8; 20] = [0, 0, 3, 4, 4, 4, 5, 6, 6, 7, 8, 8, 9, 10, 10, 11, 11, 11, 12, 13];

/// Spells a wizard copies into the spellbook at each level after the first.
pub const WIZARD_SPELLS_PER_LEVEL: usize = 2;

/// Subclasses that grant third-caster spellcasting, with their ability.
const THIRD_CASTER_SUBCLASSES: &[(CharacterClass, &str)] = &[
    (CharacterClass::Fighter, "Eldritch Knight"),
    (CharacterClass::Rogue, "Arcane Trickster"),
];

impl CharacterClass {
    /// Get class data for character creation.
    pub fn data(&self) -> ClassData {
        let (saving_throws, skill_count, skill_options): ([Ability; 2], usize, &'static [Skill]) =
            match self {
                CharacterClass::Barbarian => (
                    [Ability::Strength, Ability::Constitution],
                    2,
                    &[
                        Skill::AnimalHandling,
                        Skill::Athletics,
                        Skill::Intimidation,
                        Skill::Nature,
                        Skill::Perception,
                        Skill::Survival,
                    ],
                ),
                CharacterClass::Bard => ([Ability::Dexterity, Ability::Charisma], 3, ALL_SKILLS),
                CharacterClass::Cleric => (
                    [Ability::Wisdom, Ability::Charisma],
                    2,
                    &[
                        Skill::History,
                        Skill::Insight,
                        Skill::Medicine,
                        Skill::Persuasion,
                        Skill::Religion,
                    ],
                ),
                CharacterClass::Druid => (
                    [Ability::Intelligence, Ability::Wisdom],
                    2,
                    &[
                        Skill::Arcana,
                        Skill::AnimalHandling,
                        Skill::Insight,
                        Skill::Medicine,
                        Skill::Nature,
                        Skill::Perception,
                        Skill::Religion,
                        Skill::Survival,
                    ],
                ),
                CharacterClass::Fighter => (
                    [Ability::Strength, Ability::Constitution],
                    2,
                    &[
                        Skill::Acrobatics,
                        Skill::AnimalHandling,
                        Skill::Athletics,
                        Skill::History,
                        Skill::Insight,
                        Skill::Intimidation,
                        Skill::Perception,
                        Skill::Survival,
                    ],
                ),
                CharacterClass::Monk => (
                    [Ability::Strength, Ability::Dexterity],
                    2,
                    &[
                        Skill::Acrobatics,
                        Skill::Athletics,
                        Skill::History,
                        Skill::Insight,
                        Skill::Religion,
                        Skill::Stealth,
                    ],
                ),
                CharacterClass::Paladin => (
                    [Ability::Wisdom, Ability::Charisma],
                    2,
                    &[
                        Skill::Athletics,
                        Skill::Insight,
                        Skill::Intimidation,
                        Skill::Medicine,
                        Skill::Persuasion,
                        Skill::Religion,
                    ],
                ),
                CharacterClass::Ranger => (
                    [Ability::Strength, Ability::Dexterity],
                    3,
                    &[
                        Skill::AnimalHandling,
                        Skill::Athletics,
                        Skill::Insight,
                        Skill::Investigation,
                        Skill::Nature,
                        Skill::Perception,
                        Skill::Stealth,
                        Skill::Survival,
                    ],
                ),
                CharacterClass::Rogue => (
                    [Ability::Dexterity, Ability::Intelligence],
                    4,
                    &[
                        Skill::Acrobatics,
                        Skill::Athletics,
                        Skill::Deception,
                        Skill::Insight,
                        Skill::Intimidation,
                        Skill::Investigation,
                        Skill::Perception,
                        Skill::Performance,
                        Skill::Persuasion,
                        Skill::SleightOfHand,
                        Skill::Stealth,
                    ],
                ),
                CharacterClass::Sorcerer => (
                    [Ability::Constitution, Ability::Charisma],
                    2,
                    &[
                        Skill::Arcana,
                        Skill::Deception,
                        Skill::Insight,
                        Skill::Intimidation,
                        Skill::Persuasion,
                        Skill::Religion,
                    ],
                ),
                CharacterClass::Warlock => (
                    [Ability::Wisdom, Ability::Charisma],
                    2,
                    &[
                        Skill::Arcana,
                        Skill::Deception,
                        Skill::History,
                        Skill::Intimidation,
                        Skill::Investigation,
                        Skill::Nature,
                        Skill::Religion,
                    ],
                ),
                CharacterClass::Wizard => (
                    [Ability::Intelligence, Ability::Wisdom],
                    2,
                    &[
                        Skill::Arcana,
                        Skill::History,
                        Skill::Insight,
                        Skill::Investigation,
                        Skill::Medicine,
                        Skill::Religion,
                    ],
                ),
            };
        ClassData {
            saving_throws,
            skill_count,
            skill_options,
        }
    }

    pub fn hit_die(&self) -> DieType {
        match self {
            CharacterClass::Barbarian => DieType::D12,
            CharacterClass::Fighter | CharacterClass::Paladin | CharacterClass::Ranger => {
                DieType::D10
            }
            CharacterClass::Bard
            | CharacterClass::Cleric
            | CharacterClass::Druid
            | CharacterClass::Monk
            | CharacterClass::Rogue
            | CharacterClass::Warlock => DieType::D8,
            CharacterClass::Sorcerer | CharacterClass::Wizard => DieType::D6,
        }
    }

    /// Slot progression, taking third-caster subclasses into account.
    pub fn caster_type(&self, subclass: Option<&str>) -> Option<CasterType> {
        match self {
            CharacterClass::Bard
            | CharacterClass::Cleric
            | CharacterClass::Druid
            | CharacterClass::Sorcerer
            | CharacterClass::Wizard => Some(CasterType::Full),
            CharacterClass::Paladin | CharacterClass::Ranger => Some(CasterType::Half),
            CharacterClass::Warlock => Some(CasterType::Pact),
            _ => subclass
                .filter(|sub| {
                    THIRD_CASTER_SUBCLASSES
                        .iter()
                        .any(|(class, name)| class == self && name.eq_ignore_ascii_case(sub))
                })
                .map(|_| CasterType::Third),
        }
    }

    /// Returns the spellcasting ability for this class, if any.
    pub fn spellcasting_ability(&self, subclass: Option<&str>) -> Option<Ability> {
        match self {
            CharacterClass::Bard
            | CharacterClass::Sorcerer
            | CharacterClass::Warlock
            | CharacterClass::Paladin => Some(Ability::Charisma),
            CharacterClass::Cleric | CharacterClass::Druid | CharacterClass::Ranger => {
                Some(Ability::Wisdom)
            }
            CharacterClass::Wizard => Some(Ability::Intelligence),
            _ => self
                .caster_type(subclass)
                .map(|_| Ability::Intelligence),
        }
    }

    /// Classes that choose a daily list of prepared spells.
    pub fn prepares_spells(&self) -> bool {
        matches!(
            self,
            CharacterClass::Cleric
                | CharacterClass::Druid
                | CharacterClass::Paladin
                | CharacterClass::Wizard
        )
    }

    /// Prepared casters that prepare from the whole class list rather than
    /// from spells they have learned.
    pub fn prepares_from_class_list(&self) -> bool {
        matches!(
            self,
            CharacterClass::Cleric | CharacterClass::Druid | CharacterClass::Paladin
        )
    }

    /// Returns the number of cantrips known at level 1.
    pub fn cantrips_known_at_level_1(&self) -> usize {
        match self {
            CharacterClass::Bard => 2,
            CharacterClass::Cleric => 3,
            CharacterClass::Druid => 2,
            CharacterClass::Sorcerer => 4,
            CharacterClass::Warlock => 2,
            CharacterClass::Wizard => 3,
            _ => 0,
        }
    }

    /// Spells learned at level 1 (spellbook for wizards).
    pub fn spells_known_at_level_1(&self) -> usize {
        match self {
            CharacterClass::Wizard => 6,
            _ => self.spells_known(1, None).unwrap_or(0),
        }
    }

    /// Size of a fixed repertoire at `level`. `None` for classes that prepare.
    pub fn spells_known(&self, level: u8, subclass: Option<&str>) -> Option<usize> {
        let table = match self {
            CharacterClass::Bard => &BARD_KNOWN,
            CharacterClass::Sorcerer => &SORCERER_KNOWN,
            CharacterClass::Warlock => &WARLOCK_KNOWN,
            CharacterClass::Ranger => &RANGER_KNOWN,
            _ if self.caster_type(subclass) == Some(CasterType::Third) => &THIRD_CASTER_KNOWN,
            _ => return None,
        };
        let idx = level.clamp(1, 20) as usize - 1;
        Some(table[idx] as usize)
    }

    /// How many new spells must be learned when reaching `new_level`.
    pub fn spells_learned_at(&self, new_level: u8, subclass: Option<&str>) -> usize {
        if *self == CharacterClass::Wizard {
            return if new_level > 1 { WIZARD_SPELLS_PER_LEVEL } else { 0 };
        }
        let before = self.spells_known(new_level.saturating_sub(1), subclass);
        let after = self.spells_known(new_level, subclass);
        match (before, after) {
            (Some(before), Some(after)) if new_level > 1 => after.saturating_sub(before),
            _ => 0,
        }
    }

    /// Levels granting an Ability Score Improvement or feat.
    pub fn asi_levels(&self) -> &'static [u8] {
        match self {
            CharacterClass::Fighter => &[4, 6, 8, 12, 14, 16, 19],
            CharacterClass::Rogue => &[4, 8, 10, 12, 16, 19],
            _ => &[4, 8, 12, 16, 19],
        }
    }

    pub fn has_asi_at(&self, level: u8) -> bool {
        self.asi_levels().contains(&level)
    }

    /// Level at which the subclass is chosen.
    pub fn subclass_level(&self) -> u8 {
        match self {
            CharacterClass::Cleric | CharacterClass::Sorcerer | CharacterClass::Warlock => 1,
            CharacterClass::Druid | CharacterClass::Wizard => 2,
            _ => 3,
        }
    }

    pub fn subclass_options(&self) -> &'static [&'static str] {
        match self {
            CharacterClass::Barbarian => &["Path of the Berserker", "Path of the Totem Warrior"],
            CharacterClass::Bard => &["College of Lore", "College of Valor"],
            CharacterClass::Cleric => &[
                "Knowledge Domain",
                "Life Domain",
                "Light Domain",
                "Nature Domain",
                "Tempest Domain",
                "Trickery Domain",
                "War Domain",
            ],
            CharacterClass::Druid => &["Circle of the Land", "Circle of the Moon"],
            CharacterClass::Fighter => &["Champion", "Battle Master", "Eldritch Knight"],
            CharacterClass::Monk => &[
                "Way of the Open Hand",
                "Way of Shadow",
                "Way of the Four Elements",
            ],
            CharacterClass::Paladin => &[
                "Oath of Devotion",
                "Oath of the Ancients",
                "Oath of Vengeance",
            ],
            CharacterClass::Ranger => &["Hunter", "Beast Master"],
            CharacterClass::Rogue => &["Thief", "Assassin", "Arcane Trickster"],
            CharacterClass::Sorcerer => &["Draconic Bloodline", "Wild Magic"],
            CharacterClass::Warlock => &["The Archfey", "The Fiend", "The Great Old One"],
            CharacterClass::Wizard => &[
                "School of Abjuration",
                "School of Conjuration",
                "School of Divination",
                "School of Enchantment",
                "School of Evocation",
                "School of Illusion",
                "School of Necromancy",
                "School of Transmutation",
            ],
        }
    }

    /// Canonical subclass name for a case-insensitive lookup.
    pub fn find_subclass(&self, name: &str) -> Option<&'static str> {
        let wanted = name.trim();
        self.subclass_options()
            .iter()
            .copied()
            .find(|s| s.eq_ignore_ascii_case(wanted))
    }

    fn feature_table(&self) -> &'static [ClassFeature] {
        match self {
            CharacterClass::Barbarian => BARBARIAN_FEATURES,
            CharacterClass::Bard => BARD_FEATURES,
            CharacterClass::Cleric => CLERIC_FEATURES,
            CharacterClass::Druid => DRUID_FEATURES,
            CharacterClass::Fighter => FIGHTER_FEATURES,
            CharacterClass::Monk => MONK_FEATURES,
            CharacterClass::Paladin => PALADIN_FEATURES,
            CharacterClass::Ranger => RANGER_FEATURES,
            CharacterClass::Rogue => ROGUE_FEATURES,
            CharacterClass::Sorcerer => SORCERER_FEATURES,
            CharacterClass::Warlock => WARLOCK_FEATURES,
            CharacterClass::Wizard => WIZARD_FEATURES,
        }
    }

    /// Features gained on reaching `level`.
    pub fn features_at(&self, level: u8) -> impl Iterator<Item = &'static ClassFeature> {
        self.feature_table().iter().filter(move |f| f.level == level)
    }

    /// Every feature up to and including `level`.
    pub fn features_through(&self, level: u8) -> impl Iterator<Item = &'static ClassFeature> {
        self.feature_table().iter().filter(move |f| f.level <= level)
    }

    /// Limited-use features and their maxima at a level.
    pub fn limited_features(&self, level: u8, scores: &AbilityScores) -> Vec<FeatureUses> {
        let cha = scores.modifier(Ability::Charisma).max(1) as u32;
        let level_u = level as u32;
        let mut uses = Vec::new();
        match self {
            CharacterClass::Barbarian => {
                let rages = match level {
                    1..=2 => 2,
                    3..=5 => 3,
                    6..=11 => 4,
                    12..=16 => 5,
                    _ => 6,
                };
                uses.push(FeatureUses::new("Rage", rages, Recharge::LongRest));
            }
            CharacterClass::Bard => {
                let recharge = if level >= 5 {
                    Recharge::ShortRest
                } else {
                    Recharge::LongRest
                };
                uses.push(FeatureUses::new("Bardic Inspiration", cha, recharge));
            }
            CharacterClass::Cleric if level >= 2 => {
                let channels = match level {
                    2..=5 => 1,
                    6..=17 => 2,
                    _ => 3,
                };
                uses.push(FeatureUses::new(
                    "Channel Divinity",
                    channels,
                    Recharge::ShortRest,
                ));
            }
            CharacterClass::Druid if level >= 2 => {
                uses.push(FeatureUses::new("Wild Shape", 2, Recharge::ShortRest));
            }
            CharacterClass::Fighter => {
                uses.push(FeatureUses::new("Second Wind", 1, Recharge::ShortRest));
                if level >= 2 {
                    let surges = if level >= 17 { 2 } else { 1 };
                    uses.push(FeatureUses::new("Action Surge", surges, Recharge::ShortRest));
                }
                if level >= 9 {
                    let indomitable = match level {
                        9..=12 => 1,
                        13..=16 => 2,
                        _ => 3,
                    };
                    uses.push(FeatureUses::new(
                        "Indomitable",
                        indomitable,
                        Recharge::LongRest,
                    ));
                }
            }
            CharacterClass::Monk if level >= 2 => {
                uses.push(FeatureUses::new("Ki", level_u, Recharge::ShortRest));
            }
            CharacterClass::Paladin => {
                uses.push(FeatureUses::new("Divine Sense", 1 + cha, Recharge::LongRest));
                uses.push(FeatureUses::new("Lay on Hands", 5 * level_u, Recharge::LongRest));
            }
            CharacterClass::Sorcerer if level >= 2 => {
                uses.push(FeatureUses::new("Sorcery Points", level_u, Recharge::LongRest));
            }
            CharacterClass::Wizard => {
                uses.push(FeatureUses::new("Arcane Recovery", 1, Recharge::LongRest));
            }
            _ => {}
        }
        uses
    }

    /// Get a short description of the class.
    pub fn description(&self) -> &'static str {
        match self {
            CharacterClass::Barbarian => "A fierce warrior who can enter a battle rage",
            CharacterClass::Bard => "An inspiring magician whose music weaves magic",
            CharacterClass::Cleric => "A priestly champion who wields divine magic",
            CharacterClass::Druid => "A priest of the Old Faith, wielding nature's power",
            CharacterClass::Fighter => "A master of martial combat, skilled with weapons and armor",
            CharacterClass::Monk => "A master of martial arts, harnessing body and soul",
            CharacterClass::Paladin => "A holy warrior bound to a sacred oath",
            CharacterClass::Ranger => "A warrior who combats threats on the edges of civilization",
            CharacterClass::Rogue => "A scoundrel who uses stealth and trickery",
            CharacterClass::Sorcerer => "A spellcaster who draws on inherent magic",
            CharacterClass::Warlock => "A wielder of magic derived from a bargain with an extraplanar entity",
            CharacterClass::Wizard => "A scholarly magic-user who masters arcane secrets",
        }
    }

    /// Get all character classes.
    pub fn all() -> &'static [CharacterClass] {
        &[
            CharacterClass::Barbarian,
            CharacterClass::Bard,
            CharacterClass::Cleric,
            CharacterClass::Druid,
            CharacterClass::Fighter,
            CharacterClass::Monk,
            CharacterClass::Paladin,
            CharacterClass::Ranger,
            CharacterClass::Rogue,
            CharacterClass::Sorcerer,
            CharacterClass::Warlock,
            CharacterClass::Wizard,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_classes_have_data() {
        for class in CharacterClass::all() {
            let data = class.data();
            assert!(data.skill_count > 0);
            assert!(data.skill_options.len() >= data.skill_count);
            assert!(!class.subclass_options().is_empty());
            assert!(class.features_at(1).count() > 0);
            assert!(class.asi_levels().contains(&19));
        }
    }

    #[test]
    fn test_caster_types() {
        assert_eq!(CharacterClass::Wizard.caster_type(None), Some(CasterType::Full));
        assert_eq!(CharacterClass::Ranger.caster_type(None), Some(CasterType::Half));
        assert_eq!(CharacterClass::Warlock.caster_type(None), Some(CasterType::Pact));
        assert_eq!(CharacterClass::Fighter.caster_type(None), None);
        assert_eq!(
            CharacterClass::Fighter.caster_type(Some("Eldritch Knight")),
            Some(CasterType::Third)
        );
        assert_eq!(
            CharacterClass::Rogue.spellcasting_ability(Some("arcane trickster")),
            Some(Ability::Intelligence)
        );
        assert_eq!(CharacterClass::Rogue.caster_type(Some("Thief")), None);
    }

    #[test]
    fn test_asi_levels() {
        assert!(CharacterClass::Fighter.has_asi_at(6));
        assert!(!CharacterClass::Wizard.has_asi_at(6));
        assert!(CharacterClass::Rogue.has_asi_at(10));
    }

    #[test]
    fn test_spells_learned() {
        assert_eq!(CharacterClass::Wizard.spells_learned_at(2, None), 2);
        assert_eq!(CharacterClass::Bard.spells_learned_at(2, None), 1);
        assert_eq!(CharacterClass::Bard.spells_learned_at(10, None), 2);
        assert_eq!(CharacterClass::Ranger.spells_learned_at(2, None), 2);
        assert_eq!(CharacterClass::Ranger.spells_learned_at(4, None), 0);
        assert_eq!(CharacterClass::Cleric.spells_learned_at(5, None), 0);
        assert_eq!(
            CharacterClass::Fighter.spells_learned_at(4, Some("Eldritch Knight")),
            1
        );
    }

    #[test]
    fn test_choice_features() {
        let style = CharacterClass::Fighter
            .features_at(1)
            .find(|f| f.name == "Fighting Style")
            .unwrap();
        assert!(style.choice.unwrap().options.contains(&"Archery"));

        let metamagic = CharacterClass::Sorcerer
            .features_at(3)
            .find(|f| f.name == "Metamagic")
            .unwrap();
        assert_eq!(metamagic.choice.unwrap().picks, 2);
    }

    #[test]
    fn test_limited_features() {
        let scores = AbilityScores::standard_array();
        let fighter = CharacterClass::Fighter.limited_features(2, &scores);
        assert!(fighter.iter().any(|f| f.name == "Action Surge" && f.maximum == 1));
        let monk = CharacterClass::Monk.limited_features(5, &scores);
        assert_eq!(monk[0].maximum, 5);
        assert!(CharacterClass::Rogue.limited_features(5, &scores).is_empty());
    }

    #[test]
    fn test_subclass_lookup() {
        assert_eq!(
            CharacterClass::Ranger.find_subclass("beast master"),
            Some("Beast Master")
        );
        assert_eq!(CharacterClass::Ranger.find_subclass("Champion"), None);
        assert_eq!(CharacterClass::Wizard.subclass_level(), 2);
    }
}
