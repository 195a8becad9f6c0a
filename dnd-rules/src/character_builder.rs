//! Character builder for level 1 characters.
//!
//! Walks through the creation choices (ability scores, race, class,
//! subclass where the class picks one at level 1, skills, level 1 feature
//! choices and starting spells) and produces a `Character` that already
//! satisfies `Character::check_invariants`.

use crate::character::{
    Ability, AbilityScores, Character, CharacterClass, DeathSaves, EntityId, FeatureChoice,
    HitDicePool, KnownSpell, ProficiencyLevel, Race, Resources, Skill, SpellSlots, Spellcasting,
};
use crate::spells::{self, SpellData};
use crate::tables::{self, POINT_BUY_BUDGET};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Method for determining ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbilityMethod {
    /// Standard array: 15, 14, 13, 12, 10, 8
    #[default]
    StandardArray,
    /// Point buy: 27 points, scores 8-15
    PointBuy,
    /// Roll 4d6, drop lowest, 6 times
    Rolled,
    /// Scores supplied as-is, 3-18.
    Manual,
}

impl AbilityMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AbilityMethod::StandardArray => "Standard Array",
            AbilityMethod::PointBuy => "Point Buy",
            AbilityMethod::Rolled => "Rolled",
            AbilityMethod::Manual => "Manual",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AbilityMethod::StandardArray => "Assign 15, 14, 13, 12, 10, 8 to your abilities",
            AbilityMethod::PointBuy => "Spend 27 points to customize your scores (8-15 range)",
            AbilityMethod::Rolled => "Roll 4d6, drop the lowest die, six times",
            AbilityMethod::Manual => "Enter each score directly (3-18 range)",
        }
    }

    pub fn all() -> &'static [AbilityMethod] {
        &[
            AbilityMethod::StandardArray,
            AbilityMethod::PointBuy,
            AbilityMethod::Rolled,
            AbilityMethod::Manual,
        ]
    }
}

/// Standard array values.
pub const STANDARD_ARRAY: [u8; 6] = [15, 14, 13, 12, 10, 8];

/// Error from character building.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("character name is required")]
    MissingName,
    #[error("race selection is required")]
    MissingRace,
    #[error("class selection is required")]
    MissingClass,
    #[error("ability scores are required")]
    MissingAbilityScores,
    #[error("invalid ability scores: {0}")]
    InvalidAbilityScores(String),
    #[error("{class} chooses a subclass at level 1")]
    MissingSubclass { class: CharacterClass },
    #[error("invalid subclass: {0}")]
    InvalidSubclass(String),
    #[error("expected {expected} skills, got {got}")]
    InvalidSkillCount { expected: usize, got: usize },
    #[error("skill {0} is not available for this class")]
    SkillNotAvailable(Skill),
    #[error("skill {0} chosen twice")]
    DuplicateSkill(Skill),
    #[error("invalid expertise: {0}")]
    InvalidExpertise(String),
    #[error("half-elf requires two different +1 bonuses outside Charisma")]
    HalfElfNeedsBonusAbilities,
    #[error("{feature} requires a choice")]
    MissingFeatureChoice { feature: String },
    #[error("invalid choice for {feature}: {reason}")]
    InvalidFeatureChoice { feature: String, reason: String },
    #[error("invalid spell selection: {0}")]
    InvalidSpell(String),
    #[error("expected {expected} {kind}, got {got}")]
    WrongSpellCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("built character is inconsistent: {0}")]
    Inconsistent(String),
}

/// Builder for level 1 characters.
#[derive(Debug, Clone, Default)]
pub struct CharacterBuilder {
    name: Option<String>,
    campaign_id: String,
    session_id: String,
    race: Option<Race>,
    class: Option<CharacterClass>,
    subclass: Option<String>,
    ability_scores: Option<AbilityScores>,
    ability_method: AbilityMethod,
    selected_skills: Vec<Skill>,
    expertise: Vec<Skill>,
    /// For Half-Elf: two additional +1 ability bonuses
    half_elf_bonus_abilities: Option<[Ability; 2]>,
    feature_choices: Vec<(String, Vec<String>)>,
    cantrips: Option<Vec<String>>,
    spells: Option<Vec<String>>,
    prepared: Option<Vec<String>>,
    armor_class: Option<u8>,
}

impl CharacterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Campaign and session the character belongs to.
    pub fn campaign(mut self, campaign_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.campaign_id = campaign_id.into();
        self.session_id = session_id.into();
        self
    }

    pub fn race(mut self, race: Race) -> Self {
        self.race = Some(race);
        self
    }

    pub fn class(mut self, class: CharacterClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Required for classes that choose at level 1 (cleric, sorcerer, warlock).
    pub fn subclass(mut self, subclass: impl Into<String>) -> Self {
        self.subclass = Some(subclass.into());
        self
    }

    /// Set the ability scores directly, before racial bonuses.
    pub fn ability_scores(mut self, scores: AbilityScores) -> Self {
        self.ability_scores = Some(scores);
        self.ability_method = AbilityMethod::Manual;
        self
    }

    /// Set ability scores from standard array assignment.
    ///
    /// `assignment` maps each standard array value (15, 14, 13, 12, 10, 8) to an ability.
    pub fn standard_array(mut self, assignment: [(u8, Ability); 6]) -> Self {
        let mut scores = AbilityScores::new(0, 0, 0, 0, 0, 0);
        for (value, ability) in assignment {
            scores.set(ability, value);
        }
        self.ability_scores = Some(scores);
        self.ability_method = AbilityMethod::StandardArray;
        self
    }

    /// Set ability scores from point buy values.
    pub fn point_buy(mut self, scores: AbilityScores) -> Self {
        self.ability_scores = Some(scores);
        self.ability_method = AbilityMethod::PointBuy;
        self
    }

    /// Set ability scores from rolled values.
    pub fn rolled(mut self, scores: AbilityScores) -> Self {
        self.ability_scores = Some(scores);
        self.ability_method = AbilityMethod::Rolled;
        self
    }

    /// Set the skills selected from class options.
    pub fn skills(mut self, skills: Vec<Skill>) -> Self {
        self.selected_skills = skills;
        self
    }

    /// Rogue expertise: two of the chosen skills.
    pub fn expertise(mut self, skills: [Skill; 2]) -> Self {
        self.expertise = skills.to_vec();
        self
    }

    /// For Half-Elf: set the two abilities that get +1 bonus.
    pub fn half_elf_bonuses(mut self, abilities: [Ability; 2]) -> Self {
        self.half_elf_bonus_abilities = Some(abilities);
        self
    }

    /// Pick options for a level 1 feature such as Fighting Style.
    pub fn feature_choice(mut self, feature: impl Into<String>, selections: &[&str]) -> Self {
        self.feature_choices.push((
            feature.into(),
            selections.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Starting cantrips. Defaults to the first ones in the class list.
    pub fn cantrips(mut self, names: &[&str]) -> Self {
        self.cantrips = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Starting spells: the spellbook for wizards, the repertoire for
    /// known casters, today's preparation for clerics and druids.
    pub fn spells(mut self, names: &[&str]) -> Self {
        self.spells = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Wizard spells prepared from the spellbook.
    pub fn prepared(mut self, names: &[&str]) -> Self {
        self.prepared = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Override the unarmored AC of 10 + DEX.
    pub fn armor_class(mut self, armor_class: u8) -> Self {
        self.armor_class = Some(armor_class);
        self
    }

    pub fn build(self) -> Result<Character, BuilderError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or(BuilderError::MissingName)?;
        let race = self.race.ok_or(BuilderError::MissingRace)?;
        let class = self.class.ok_or(BuilderError::MissingClass)?;
        let base_scores = self
            .ability_scores
            .ok_or(BuilderError::MissingAbilityScores)?;
        validate_scores(self.ability_method, &base_scores)?;

        let subclass = resolve_subclass(class, self.subclass.as_deref())?;

        let mut scores = base_scores;
        race.apply_ability_bonuses(&mut scores);
        if race == Race::HalfElf {
            let [a, b] = self
                .half_elf_bonus_abilities
                .ok_or(BuilderError::HalfElfNeedsBonusAbilities)?;
            if a == b || a == Ability::Charisma || b == Ability::Charisma {
                return Err(BuilderError::HalfElfNeedsBonusAbilities);
            }
            scores.set(a, scores.get(a) + 1);
            scores.set(b, scores.get(b) + 1);
        }

        let skill_proficiencies = choose_skills(class, &self.selected_skills, &self.expertise)?;
        let feature_choices = resolve_feature_choices(class, &self.feature_choices)?;

        let spellcasting = match (
            class.caster_type(subclass),
            class.spellcasting_ability(subclass),
        ) {
            (Some(caster_type), Some(ability)) => {
                let mut casting = Spellcasting {
                    caster_type,
                    ability,
                    slots: SpellSlots::full(tables::spell_slots(caster_type, 1)),
                    spells: Vec::new(),
                    cantrips: pick_cantrips(class, self.cantrips)?,
                };
                let prepare_limit = (scores.modifier(ability) as i32 + 1).max(1) as usize;
                casting.spells = pick_spells(
                    class,
                    caster_type,
                    self.spells,
                    self.prepared,
                    prepare_limit,
                )?;
                Some(casting)
            }
            _ => {
                let asked = self.cantrips.iter().chain(self.spells.iter()).any(|s| !s.is_empty());
                if asked {
                    return Err(BuilderError::InvalidSpell(format!(
                        "{class} has no spellcasting at level 1"
                    )));
                }
                None
            }
        };

        let hit_die = class.hit_die();
        let max_hp = (hit_die.sides() as i32 + scores.modifier(Ability::Constitution) as i32).max(1) as u32;
        let armor_class = self
            .armor_class
            .unwrap_or_else(|| (10 + scores.modifier(Ability::Dexterity) as i32).max(1) as u8);

        let character = Character {
            id: EntityId::new(),
            campaign_id: self.campaign_id,
            session_id: self.session_id,
            name,
            class,
            subclass: subclass.map(str::to_string),
            race,
            level: 1,
            experience: 0,
            resources: Resources {
                hit_dice: HitDicePool {
                    die: hit_die,
                    remaining: 1,
                    total: 1,
                },
                features: class.limited_features(1, &scores),
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
            skill_proficiencies,
            saving_throw_proficiencies: class.data().saving_throws.to_vec(),
            spellcasting,
            features: class.features_through(1).map(|f| f.name.to_string()).collect(),
            feats: Vec::new(),
            feature_choices,
        };
        character
            .check_invariants()
            .map_err(BuilderError::Inconsistent)?;

        debug!(
            name = %character.name,
            class = %character.class,
            race = %character.race,
            max_hp = character.max_hp,
            "Built character"
        );
        Ok(character)
    }
}

fn validate_scores(method: AbilityMethod, scores: &AbilityScores) -> Result<(), BuilderError> {
    match method {
        AbilityMethod::StandardArray => {
            let mut values: Vec<u8> = Ability::all().iter().map(|a| scores.get(*a)).collect();
            values.sort_unstable_by(|a, b| b.cmp(a));
            if values != STANDARD_ARRAY {
                return Err(BuilderError::InvalidAbilityScores(
                    "standard array values must each be assigned to exactly one ability".into(),
                ));
            }
            Ok(())
        }
        AbilityMethod::PointBuy => validate_point_buy(scores),
        AbilityMethod::Rolled | AbilityMethod::Manual => {
            for ability in Ability::all() {
                let score = scores.get(ability);
                if !(3..=18).contains(&score) {
                    return Err(BuilderError::InvalidAbilityScores(format!(
                        "{} score {score} is out of range (3-18)",
                        ability.abbreviation()
                    )));
                }
            }
            Ok(())
        }
    }
}

fn resolve_subclass(
    class: CharacterClass,
    requested: Option<&str>,
) -> Result<Option<&'static str>, BuilderError> {
    match requested {
        None if class.subclass_level() == 1 => Err(BuilderError::MissingSubclass { class }),
        None => Ok(None),
        Some(name) if class.subclass_level() > 1 => Err(BuilderError::InvalidSubclass(format!(
            "{class} chooses '{name}' at level {}",
            class.subclass_level()
        ))),
        Some(name) => class
            .find_subclass(name)
            .map(Some)
            .ok_or_else(|| BuilderError::InvalidSubclass(format!("'{name}' is not a {class} subclass"))),
    }
}

fn choose_skills(
    class: CharacterClass,
    selected: &[Skill],
    expertise: &[Skill],
) -> Result<HashMap<Skill, ProficiencyLevel>, BuilderError> {
    let data = class.data();
    if selected.len() != data.skill_count {
        return Err(BuilderError::InvalidSkillCount {
            expected: data.skill_count,
            got: selected.len(),
        });
    }
    let mut proficiencies = HashMap::new();
    for skill in selected {
        if !data.skill_options.contains(skill) {
            return Err(BuilderError::SkillNotAvailable(*skill));
        }
        if proficiencies
            .insert(*skill, ProficiencyLevel::Proficient)
            .is_some()
        {
            return Err(BuilderError::DuplicateSkill(*skill));
        }
    }

    let grants_expertise = class.features_at(1).any(|f| f.name == "Expertise");
    match (grants_expertise, expertise) {
        (false, []) => {}
        (false, _) => {
            return Err(BuilderError::InvalidExpertise(format!(
                "{class} has no expertise at level 1"
            )))
        }
        (true, [a, b]) if a != b => {
            for skill in [a, b] {
                match proficiencies.get_mut(skill) {
                    Some(level) => *level = ProficiencyLevel::Expertise,
                    None => {
                        return Err(BuilderError::InvalidExpertise(format!(
                            "{skill} is not a chosen skill"
                        )))
                    }
                }
            }
        }
        (true, _) => {
            return Err(BuilderError::InvalidExpertise(
                "pick two different proficient skills".into(),
            ))
        }
    }
    Ok(proficiencies)
}

fn resolve_feature_choices(
    class: CharacterClass,
    chosen: &[(String, Vec<String>)],
) -> Result<Vec<FeatureChoice>, BuilderError> {
    let mut resolved = Vec::new();
    for feature in class.features_at(1) {
        let Some(spec) = feature.choice else { continue };
        let selections = chosen
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(feature.name))
            .map(|(_, picks)| picks)
            .ok_or_else(|| BuilderError::MissingFeatureChoice {
                feature: feature.name.to_string(),
            })?;
        let invalid = |reason: String| BuilderError::InvalidFeatureChoice {
            feature: feature.name.to_string(),
            reason,
        };
        if selections.len() != spec.picks {
            return Err(invalid(format!(
                "expected {} picks, got {}",
                spec.picks,
                selections.len()
            )));
        }
        let mut canonical: Vec<String> = Vec::with_capacity(selections.len());
        for pick in selections {
            let option = spec
                .options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(pick.trim()))
                .ok_or_else(|| invalid(format!("'{pick}' is not an option")))?;
            if canonical.iter().any(|c| c.as_str() == *option) {
                return Err(invalid(format!("'{option}' picked twice")));
            }
            canonical.push(option.to_string());
        }
        resolved.push(FeatureChoice {
            feature: feature.name.to_string(),
            level: 1,
            selections: canonical,
        });
    }

    for (name, _) in chosen {
        if !resolved.iter().any(|r| r.feature.eq_ignore_ascii_case(name)) {
            return Err(BuilderError::InvalidFeatureChoice {
                feature: name.clone(),
                reason: format!("{class} has no such choice at level 1"),
            });
        }
    }
    Ok(resolved)
}

fn lookup_spell(class: CharacterClass, name: &str) -> Result<&'static SpellData, BuilderError> {
    let spell = spells::get_spell(name)
        .ok_or_else(|| BuilderError::InvalidSpell(format!("unknown spell '{name}'")))?;
    if !spell.available_to(class) {
        return Err(BuilderError::InvalidSpell(format!(
            "{} is not on the {class} spell list",
            spell.name
        )));
    }
    Ok(spell)
}

fn pick_cantrips(
    class: CharacterClass,
    requested: Option<Vec<String>>,
) -> Result<Vec<String>, BuilderError> {
    let expected = class.cantrips_known_at_level_1();
    let Some(names) = requested else {
        return Ok(spells::spells_for_class(class)
            .filter(|s| s.is_cantrip())
            .take(expected)
            .map(|s| s.name.clone())
            .collect());
    };
    if names.len() != expected {
        return Err(BuilderError::WrongSpellCount {
            kind: "cantrips",
            expected,
            got: names.len(),
        });
    }
    let mut seen = HashSet::new();
    let mut cantrips = Vec::with_capacity(names.len());
    for name in &names {
        let spell = lookup_spell(class, name)?;
        if !spell.is_cantrip() {
            return Err(BuilderError::InvalidSpell(format!("{} is not a cantrip", spell.name)));
        }
        if !seen.insert(spell.name.as_str()) {
            return Err(BuilderError::InvalidSpell(format!("{} chosen twice", spell.name)));
        }
        cantrips.push(spell.name.clone());
    }
    Ok(cantrips)
}

fn pick_spells(
    class: CharacterClass,
    caster_type: tables::CasterType,
    requested: Option<Vec<String>>,
    prepared: Option<Vec<String>>,
    prepare_limit: usize,
) -> Result<Vec<KnownSpell>, BuilderError> {
    let max_level = tables::max_spell_level(caster_type, 1);
    let from_class_list = class.prepares_from_class_list();
    let expected = class.spells_known_at_level_1();

    let names = match requested {
        Some(names) => names,
        None if from_class_list => Vec::new(),
        None => spells::spells_for_class(class)
            .filter(|s| s.level >= 1 && s.level <= max_level)
            .take(expected)
            .map(|s| s.name.clone())
            .collect(),
    };

    if from_class_list {
        if names.len() > prepare_limit {
            return Err(BuilderError::WrongSpellCount {
                kind: "prepared spells",
                expected: prepare_limit,
                got: names.len(),
            });
        }
    } else if names.len() != expected {
        return Err(BuilderError::WrongSpellCount {
            kind: "spells",
            expected,
            got: names.len(),
        });
    }

    let mut known: Vec<KnownSpell> = Vec::with_capacity(names.len());
    for name in &names {
        let spell = lookup_spell(class, name)?;
        if spell.is_cantrip() || spell.level > max_level {
            return Err(BuilderError::InvalidSpell(format!(
                "{} (level {}) cannot be learned at level 1",
                spell.name, spell.level
            )));
        }
        if known.iter().any(|k| k.name == spell.name) {
            return Err(BuilderError::InvalidSpell(format!("{} chosen twice", spell.name)));
        }
        known.push(KnownSpell {
            name: spell.name.clone(),
            level: spell.level,
            school: spell.school,
            prepared: !class.prepares_spells() || from_class_list,
            times_cast_today: 0,
        });
    }

    if class.prepares_spells() && !from_class_list {
        match prepared {
            Some(wanted) => {
                if wanted.len() > prepare_limit {
                    return Err(BuilderError::WrongSpellCount {
                        kind: "prepared spells",
                        expected: prepare_limit,
                        got: wanted.len(),
                    });
                }
                for name in &wanted {
                    let spell = known
                        .iter_mut()
                        .find(|k| k.name.eq_ignore_ascii_case(name.trim()))
                        .ok_or_else(|| {
                            BuilderError::InvalidSpell(format!("{name} is not in the spellbook"))
                        })?;
                    spell.prepared = true;
                }
            }
            None => {
                for spell in known.iter_mut().take(prepare_limit) {
                    spell.prepared = true;
                }
            }
        }
    } else if prepared.is_some_and(|p| !p.is_empty()) {
        return Err(BuilderError::InvalidSpell(format!(
            "{class} does not prepare from a spellbook"
        )));
    }
    Ok(known)
}

/// Roll 4d6, drop lowest, for ability score generation.
pub fn roll_4d6_drop_lowest() -> u8 {
    roll_4d6_drop_lowest_with_rng(&mut rand::thread_rng())
}

pub fn roll_4d6_drop_lowest_with_rng<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    let mut rolls: Vec<u8> = (0..4).map(|_| rng.gen_range(1..=6)).collect();
    rolls.sort_unstable();
    rolls[1..].iter().sum()
}

/// Roll a full set of ability scores (6 values), highest first.
pub fn roll_ability_scores() -> [u8; 6] {
    let mut rng = rand::thread_rng();
    let mut scores = [0u8; 6];
    for score in scores.iter_mut() {
        *score = roll_4d6_drop_lowest_with_rng(&mut rng);
    }
    scores.sort_unstable_by(|a, b| b.cmp(a));
    scores
}

/// Validate point buy scores.
pub fn validate_point_buy(scores: &AbilityScores) -> Result<(), BuilderError> {
    let mut total_cost = 0u32;

    for ability in Ability::all() {
        let score = scores.get(ability);
        let cost = tables::point_buy_cost(score).ok_or_else(|| {
            BuilderError::InvalidAbilityScores(format!(
                "{} score {score} is out of range (8-15)",
                ability.abbreviation()
            ))
        })?;
        total_cost += cost;
    }

    if total_cost > POINT_BUY_BUDGET {
        return Err(BuilderError::InvalidAbilityScores(format!(
            "total point cost {total_cost} exceeds maximum {POINT_BUY_BUDGET}"
        )));
    }

    Ok(())
}
