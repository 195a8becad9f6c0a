//! Animal companions.
//!
//! A companion is bound to an owning character and scales with that owner's
//! ranger level, not with a level of its own. Its lifecycle runs
//! `active` ↔ `unconscious` through hit points, `dead` is terminal and so is
//! dismissal.

use crate::character::{
    clear_condition, find_condition, set_condition, Ability, AbilityScores, ActiveCondition,
    Condition, EntityId, Skill, Vitals,
};
use crate::dice::DiceNotation;
use crate::spells::DamageType;
use crate::tables::{self, CompanionScaling, Size};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionState {
    Active,
    Unconscious,
    Dead,
}

impl CompanionState {
    pub fn name(&self) -> &'static str {
        match self {
            CompanionState::Active => "active",
            CompanionState::Unconscious => "unconscious",
            CompanionState::Dead => "dead",
        }
    }
}

/// An attack from a companion's stat block, before scaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionAttack {
    pub name: String,
    pub attack_bonus: i8,
    pub damage: DiceNotation,
    pub damage_type: DamageType,
}

/// An attack with the owner's scaling bonuses folded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaledAttack {
    pub name: String,
    pub attack_bonus: i8,
    pub damage: String,
    pub damage_type: DamageType,
}

/// Static stat block a companion is created from.
pub struct CompanionTemplate {
    pub name: &'static str,
    pub creature_type: &'static str,
    pub size: Size,
    pub armor_class: u8,
    pub hit_points: u32,
    /// STR, DEX, CON, INT, WIS, CHA.
    pub scores: [u8; 6],
    pub speed: u32,
    /// Proficiency added on top of the ability modifier.
    pub skills: &'static [(Skill, i8)],
    /// Name, attack bonus, damage dice count, sides, modifier, type.
    pub attacks: &'static [(&'static str, i8, u32, u32, i32, DamageType)],
    pub special_abilities: &'static [&'static str],
}

pub const COMPANION_TEMPLATES: &[CompanionTemplate] = &[
    CompanionTemplate {
        name: "Wolf",
        creature_type: "beast",
        size: Size::Medium,
        armor_class: 13,
        hit_points: 11,
        scores: [12, 15, 12, 3, 12, 6],
        speed: 40,
        skills: &[(Skill::Perception, 2), (Skill::Stealth, 2)],
        attacks: &[("Bite", 4, 2, 4, 2, DamageType::Piercing)],
        special_abilities: &["Keen Hearing and Smell", "Pack Tactics"],
    },
    CompanionTemplate {
        name: "Panther",
        creature_type: "beast",
        size: Size::Medium,
        armor_class: 12,
        hit_points: 13,
        scores: [14, 15, 10, 3, 14, 7],
        speed: 50,
        skills: &[(Skill::Perception, 2), (Skill::Stealth, 4)],
        attacks: &[
            ("Bite", 4, 1, 6, 2, DamageType::Piercing),
            ("Claw", 4, 1, 4, 2, DamageType::Slashing),
        ],
        special_abilities: &["Keen Smell", "Pounce"],
    },
    CompanionTemplate {
        name: "Blood Hawk",
        creature_type: "beast",
        size: Size::Small,
        armor_class: 12,
        hit_points: 7,
        scores: [6, 14, 10, 3, 14, 5],
        speed: 10,
        skills: &[(Skill::Perception, 2)],
        attacks: &[("Beak", 4, 1, 4, 2, DamageType::Piercing)],
        special_abilities: &["Keen Sight", "Pack Tactics"],
    },
    CompanionTemplate {
        name: "Mastiff",
        creature_type: "beast",
        size: Size::Medium,
        armor_class: 12,
        hit_points: 5,
        scores: [13, 14, 12, 3, 12, 7],
        speed: 40,
        skills: &[(Skill::Perception, 2)],
        attacks: &[("Bite", 3, 1, 6, 1, DamageType::Piercing)],
        special_abilities: &["Keen Hearing and Smell"],
    },
    CompanionTemplate {
        name: "Eagle",
        creature_type: "beast",
        size: Size::Small,
        armor_class: 12,
        hit_points: 3,
        scores: [6, 15, 10, 2, 14, 7],
        speed: 10,
        skills: &[(Skill::Perception, 2)],
        attacks: &[("Talons", 4, 1, 4, 2, DamageType::Slashing)],
        special_abilities: &["Keen Sight"],
    },
    CompanionTemplate {
        name: "Boar",
        creature_type: "beast",
        size: Size::Medium,
        armor_class: 11,
        hit_points: 11,
        scores: [13, 11, 12, 2, 9, 5],
        speed: 40,
        skills: &[],
        attacks: &[("Tusk", 3, 1, 6, 1, DamageType::Slashing)],
        special_abilities: &["Charge", "Relentless"],
    },
];

/// Case-insensitive template lookup.
pub fn find_template(name: &str) -> Option<&'static CompanionTemplate> {
    let wanted = name.trim();
    COMPANION_TEMPLATES
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(wanted))
}

/// A companion bound to an owning character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Companion {
    pub id: EntityId,
    pub owner: EntityId,
    pub name: String,
    pub template: String,
    pub creature_type: String,
    pub size: Size,
    pub base_max_hp: u32,
    pub current_hp: u32,
    pub base_armor_class: u8,
    pub ability_scores: AbilityScores,
    pub speed: u32,
    pub skill_bonuses: HashMap<Skill, i8>,
    pub attacks: Vec<CompanionAttack>,
    pub special_abilities: Vec<String>,
    pub conditions: Vec<ActiveCondition>,
    pub state: CompanionState,
    pub dismissed: bool,
    /// Owner's ranger level when scaling was last applied.
    pub owner_ranger_level: u8,
}

impl Companion {
    /// Create a companion at full hit points for an owner's ranger level.
    pub fn from_template(
        template: &CompanionTemplate,
        owner: EntityId,
        name: impl Into<String>,
        owner_ranger_level: u8,
    ) -> Self {
        let [str, dex, con, int, wis, cha] = template.scores;
        let mut companion = Self {
            id: EntityId::new(),
            owner,
            name: name.into(),
            template: template.name.to_string(),
            creature_type: template.creature_type.to_string(),
            size: template.size,
            base_max_hp: template.hit_points,
            current_hp: 0,
            base_armor_class: template.armor_class,
            ability_scores: AbilityScores::new(str, dex, con, int, wis, cha),
            speed: template.speed,
            skill_bonuses: template.skills.iter().copied().collect(),
            attacks: template
                .attacks
                .iter()
                .map(|(name, bonus, count, sides, modifier, kind)| CompanionAttack {
                    name: name.to_string(),
                    attack_bonus: *bonus,
                    damage: DiceNotation {
                        count: *count,
                        sides: *sides,
                        modifier: *modifier,
                    },
                    damage_type: *kind,
                })
                .collect(),
            special_abilities: template
                .special_abilities
                .iter()
                .map(|s| s.to_string())
                .collect(),
            conditions: Vec::new(),
            state: CompanionState::Active,
            dismissed: false,
            owner_ranger_level,
        };
        companion.current_hp = companion.max_hp();
        companion
    }

    pub fn scaling(&self) -> CompanionScaling {
        tables::companion_scaling(self.owner_ranger_level)
    }

    pub fn armor_class(&self) -> u8 {
        self.base_armor_class + self.scaling().ac_bonus
    }

    pub fn extra_attack(&self) -> bool {
        self.scaling().extra_attack
    }

    /// Template abilities plus those granted by the owner's tier.
    pub fn abilities(&self) -> Vec<String> {
        let mut all = self.special_abilities.clone();
        all.extend(self.scaling().abilities);
        all
    }

    pub fn scaled_attacks(&self) -> Vec<ScaledAttack> {
        let scaling = self.scaling();
        self.attacks
            .iter()
            .map(|attack| {
                let damage = DiceNotation {
                    modifier: attack.damage.modifier + scaling.damage_bonus as i32,
                    ..attack.damage
                };
                ScaledAttack {
                    name: attack.name.clone(),
                    attack_bonus: attack.attack_bonus + scaling.attack_bonus,
                    damage: damage.to_string(),
                    damage_type: attack.damage_type,
                }
            })
            .collect()
    }

    pub fn skill_modifier(&self, skill: Skill) -> i8 {
        self.ability_scores.modifier(skill.ability())
            + self.skill_bonuses.get(&skill).copied().unwrap_or(0)
    }

    pub fn saving_throw_modifier(&self, ability: Ability) -> i8 {
        self.ability_scores.modifier(ability)
    }

    pub fn has_condition(&self, kind: &Condition) -> bool {
        find_condition(&self.conditions, kind).is_some()
    }

    /// Re-derive scaling for a new owner ranger level. Active companions
    /// gain the hit-point difference; current hp never exceeds the new max.
    pub fn rescale(&mut self, owner_ranger_level: u8) -> i64 {
        let old_max = self.max_hp();
        self.owner_ranger_level = owner_ranger_level;
        let new_max = self.max_hp();
        let delta = new_max as i64 - old_max as i64;
        if delta > 0 && self.state == CompanionState::Active {
            self.current_hp += delta as u32;
        }
        self.current_hp = self.current_hp.min(new_max);
        delta
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        let max = self.max_hp();
        if max < 1 {
            return Err("max_hp must be at least 1".into());
        }
        if self.current_hp > max {
            return Err(format!("current_hp {} exceeds max_hp {max}", self.current_hp));
        }
        for ability in Ability::all() {
            let score = self.ability_scores.get(ability);
            if !(1..=30).contains(&score) {
                return Err(format!("{} score {score} outside 1-30", ability.name()));
            }
        }
        let dead = self.state == CompanionState::Dead;
        if dead != self.has_condition(&Condition::Dead) {
            return Err("dead state disagrees with conditions".into());
        }
        if dead && self.current_hp != 0 {
            return Err("dead with hit points remaining".into());
        }
        let unconscious = self.state == CompanionState::Unconscious;
        if unconscious != (self.current_hp == 0 && !dead) {
            return Err(format!(
                "state {} disagrees with current_hp {}",
                self.state.name(),
                self.current_hp
            ));
        }
        if unconscious != self.has_condition(&Condition::Unconscious) {
            return Err("unconscious state disagrees with conditions".into());
        }
        Ok(())
    }

    pub fn check_transition(&self, before: &Companion) -> Result<(), String> {
        if before.dismissed && !self.dismissed {
            return Err("dismissal cannot be undone".into());
        }
        if before.state == CompanionState::Dead && self.state != CompanionState::Dead {
            return Err("a dead companion cannot return".into());
        }
        if self.owner != before.owner {
            return Err("owner cannot change".into());
        }
        Ok(())
    }
}

impl Vitals for Companion {
    fn current_hp(&self) -> u32 {
        self.current_hp
    }

    fn max_hp(&self) -> u32 {
        self.base_max_hp + self.scaling().hp_bonus
    }

    fn set_current_hp(&mut self, hp: u32) {
        self.current_hp = hp.min(self.max_hp());
    }

    fn is_dead(&self) -> bool {
        self.state == CompanionState::Dead
    }

    fn mark_dead(&mut self, source: &str) {
        self.current_hp = 0;
        self.state = CompanionState::Dead;
        clear_condition(&mut self.conditions, &Condition::Unconscious);
        set_condition(
            &mut self.conditions,
            ActiveCondition::new(Condition::Dead, source),
        );
    }

    fn set_unconscious(&mut self, unconscious: bool, source: &str) {
        if unconscious {
            self.state = CompanionState::Unconscious;
            set_condition(
                &mut self.conditions,
                ActiveCondition::new(Condition::Unconscious, source),
            );
        } else {
            self.state = CompanionState::Active;
            clear_condition(&mut self.conditions, &Condition::Unconscious);
        }
    }

    fn is_unconscious(&self) -> bool {
        self.state == CompanionState::Unconscious
    }
}
