//! Level-up state machine.
//!
//! [`LevelUpWizard`] is a plain value the caller holds between requests.
//! [`LevelUpWizard::begin`] projects what the next level requires from a
//! character snapshot without touching it; selection methods fill in the
//! choices and move the wizard along
//!
//! `AwaitingHp → AwaitingFeatureChoices → AwaitingAsiOrFeat →
//! AwaitingSubclassChoice → AwaitingSpellsLearned → Ready → Committed`
//!
//! skipping steps the level does not need. Nothing changes on the character
//! until the engine commits a `Ready` wizard in one atomic apply.

use crate::character::{
    normalize, Ability, AbilityScores, Character, CharacterClass, EntityId, FeatureChoice,
    KnownSpell, SpellSlots, Spellcasting, Vitals,
};
use crate::class_data::ClassFeature;
use crate::dice::{self, Advantage, DiceRoll, DieType};
use crate::error::RulesError;
use crate::spells::{self, SpellData};
use crate::tables::{self, CasterType, MAX_LEVEL};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Highest score an Ability Score Improvement can reach.
pub const ASI_SCORE_CAP: u8 = 20;
/// Points an Ability Score Improvement distributes.
pub const ASI_POINTS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelUpStep {
    AwaitingHp,
    AwaitingFeatureChoices,
    AwaitingAsiOrFeat,
    AwaitingSubclassChoice,
    AwaitingSpellsLearned,
    Ready,
    Committed,
}

/// A class feature at the new level that needs a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChoice {
    pub feature: String,
    /// Options still open to this character.
    pub options: Vec<String>,
    pub picks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityIncrease {
    pub ability: Ability,
    pub amount: u8,
}

/// Caller-held progress through one level up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpWizard {
    pub character_id: EntityId,
    pub class: CharacterClass,
    pub from_level: u8,
    pub to_level: u8,
    pub hit_die: DieType,
    pub step: LevelUpStep,

    pub pending_choices: Vec<PendingChoice>,
    pub asi_available: bool,
    pub subclass_required: bool,
    pub spells_to_learn: usize,

    pub hp_gain: Option<u32>,
    pub hp_roll: Option<DiceRoll>,
    pub feature_choices: Vec<FeatureChoice>,
    pub ability_increases: Vec<AbilityIncrease>,
    pub feat: Option<String>,
    pub subclass: Option<String>,
    pub spells_learned: Vec<String>,

    /// Character state at `begin`, used to validate selections.
    ability_scores: AbilityScores,
    current_subclass: Option<String>,
    known_spells: Vec<String>,
    known_feats: Vec<String>,
}

/// What a committed level up changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpOutcome {
    pub character_id: EntityId,
    pub old_level: u8,
    pub new_level: u8,
    pub hp_gain: u32,
    pub max_hp: u32,
    pub current_hp: u32,
    pub proficiency_bonus: i8,
    pub features_gained: Vec<String>,
    pub feature_choices: Vec<FeatureChoice>,
    pub ability_increases: Vec<AbilityIncrease>,
    pub feat: Option<String>,
    pub subclass: Option<String>,
    pub spells_learned: Vec<String>,
    pub slots_maximum: Option<[u8; 9]>,
    /// Companions whose scaling follows this character's level.
    pub companions_rescaled: Vec<EntityId>,
    /// Followers still at the old level because their rescale failed.
    #[serde(default)]
    pub companions_pending: Vec<EntityId>,
}

impl LevelUpWizard {
    /// Project the requirements of the next level. Read-only.
    pub fn begin(character: &Character) -> Result<Self, RulesError> {
        if character.is_dead() {
            return Err(RulesError::EntityUnavailable(format!(
                "{} is dead",
                character.name
            )));
        }
        if character.level >= MAX_LEVEL {
            return Err(RulesError::invalid(format!(
                "{} is already level {MAX_LEVEL}",
                character.name
            )));
        }
        let class = character.class;
        let to_level = character.level + 1;

        let pending_choices = class
            .features_at(to_level)
            .filter_map(|feature| pending_choice(feature, character))
            .collect();

        let subclass_required =
            character.subclass.is_none() && class.subclass_level() <= to_level;
        let subclass = character.subclass.as_deref();

        let mut wizard = Self {
            character_id: character.id,
            class,
            from_level: character.level,
            to_level,
            hit_die: class.hit_die(),
            step: LevelUpStep::AwaitingHp,
            pending_choices,
            asi_available: class.has_asi_at(to_level),
            subclass_required,
            spells_to_learn: class.spells_learned_at(to_level, subclass),
            hp_gain: None,
            hp_roll: None,
            feature_choices: Vec::new(),
            ability_increases: Vec::new(),
            feat: None,
            subclass: None,
            spells_learned: Vec::new(),
            ability_scores: character.ability_scores.clone(),
            current_subclass: character.subclass.clone(),
            known_spells: character
                .spellcasting
                .as_ref()
                .map(|casting| casting.spells.iter().map(|s| s.name.clone()).collect())
                .unwrap_or_default(),
            known_feats: character.feats.clone(),
        };
        wizard.advance();
        Ok(wizard)
    }

    fn ensure_open(&self) -> Result<(), RulesError> {
        if self.step == LevelUpStep::Committed {
            return Err(RulesError::invalid("level up already committed"));
        }
        Ok(())
    }

    fn effective_subclass(&self) -> Option<&str> {
        self.subclass
            .as_deref()
            .or(self.current_subclass.as_deref())
    }

    /// Recompute the current step from what has been chosen so far.
    fn advance(&mut self) {
        if self.step == LevelUpStep::Committed {
            return;
        }
        let choices_done = self.pending_choices.iter().all(|pending| {
            self.feature_choices
                .iter()
                .any(|made| made.feature == pending.feature)
        });
        self.step = if self.hp_gain.is_none() {
            LevelUpStep::AwaitingHp
        } else if !choices_done {
            LevelUpStep::AwaitingFeatureChoices
        } else if self.asi_available && self.ability_increases.is_empty() && self.feat.is_none() {
            LevelUpStep::AwaitingAsiOrFeat
        } else if self.subclass_required && self.subclass.is_none() {
            LevelUpStep::AwaitingSubclassChoice
        } else if self.spells_learned.len() < self.spells_to_learn {
            LevelUpStep::AwaitingSpellsLearned
        } else {
            LevelUpStep::Ready
        };
    }

    pub fn is_ready(&self) -> bool {
        self.step == LevelUpStep::Ready
    }

    /// Take a specific hit point gain, e.g. from a physical die.
    pub fn choose_hp(&mut self, value: u32) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        let sides = self.hit_die.sides();
        if !(1..=sides).contains(&value) {
            return Err(RulesError::invalid(format!(
                "hit point gain must be between 1 and {sides}, got {value}"
            )));
        }
        self.hp_gain = Some(value);
        self.hp_roll = None;
        self.advance();
        Ok(self.step)
    }

    /// Roll the hit die for the gain.
    pub fn roll_hp(&mut self) -> Result<LevelUpStep, RulesError> {
        self.roll_hp_with_rng(&mut rand::thread_rng())
    }

    pub fn roll_hp_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        let roll = dice::roll_with_rng(1, self.hit_die.sides(), 0, Advantage::Normal, rng)?;
        self.hp_gain = Some(roll.total.max(1) as u32);
        self.hp_roll = Some(roll);
        self.advance();
        Ok(self.step)
    }

    /// Take the fixed average (half the die, rounded up).
    pub fn take_average_hp(&mut self) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        self.hp_gain = Some(self.hit_die.average());
        self.hp_roll = None;
        self.advance();
        Ok(self.step)
    }

    /// Make the selection for a choice feature gained at this level.
    pub fn choose_feature(
        &mut self,
        feature: &str,
        selections: &[&str],
    ) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        let pending = self
            .pending_choices
            .iter()
            .find(|p| p.feature.eq_ignore_ascii_case(feature.trim()))
            .ok_or_else(|| {
                RulesError::invalid(format!("{feature} is not a choice at level {}", self.to_level))
            })?;
        if selections.len() != pending.picks {
            return Err(RulesError::invalid(format!(
                "{} needs exactly {} selection(s), got {}",
                pending.feature,
                pending.picks,
                selections.len()
            )));
        }
        let mut chosen: Vec<String> = Vec::with_capacity(selections.len());
        for selection in selections {
            let canonical = pending
                .options
                .iter()
                .find(|o| normalize(o) == normalize(selection))
                .ok_or_else(|| {
                    RulesError::invalid(format!(
                        "'{selection}' is not an option for {}",
                        pending.feature
                    ))
                })?;
            if chosen.contains(canonical) {
                return Err(RulesError::invalid(format!("'{canonical}' selected twice")));
            }
            chosen.push(canonical.clone());
        }
        let feature_name = pending.feature.clone();
        self.feature_choices.retain(|c| c.feature != feature_name);
        self.feature_choices.push(FeatureChoice {
            feature: feature_name,
            level: self.to_level,
            selections: chosen,
        });
        self.advance();
        Ok(self.step)
    }

    /// Spend the Ability Score Improvement. Replaces any feat choice.
    pub fn choose_asi(&mut self, increases: &[(Ability, u8)]) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        if !self.asi_available {
            return Err(RulesError::invalid(format!(
                "no ability score improvement at level {}",
                self.to_level
            )));
        }
        let total: u32 = increases.iter().map(|(_, amount)| *amount as u32).sum();
        if total == 0 || total > ASI_POINTS as u32 || increases.iter().any(|(_, a)| *a == 0) {
            return Err(RulesError::invalid(format!(
                "an ability score improvement distributes 1 to {ASI_POINTS} points"
            )));
        }
        let mut merged: Vec<AbilityIncrease> = Vec::new();
        for (ability, amount) in increases {
            match merged.iter_mut().find(|inc| inc.ability == *ability) {
                Some(existing) => existing.amount += amount,
                None => merged.push(AbilityIncrease {
                    ability: *ability,
                    amount: *amount,
                }),
            }
        }
        for inc in &merged {
            let result = self.ability_scores.get(inc.ability) + inc.amount;
            if result > ASI_SCORE_CAP {
                return Err(RulesError::invalid(format!(
                    "{} would rise to {result}, above {ASI_SCORE_CAP}",
                    inc.ability.name()
                )));
            }
        }
        self.ability_increases = merged;
        self.feat = None;
        self.advance();
        Ok(self.step)
    }

    /// Take a feat instead of the Ability Score Improvement.
    pub fn choose_feat(&mut self, name: &str) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        if !self.asi_available {
            return Err(RulesError::invalid(format!("no feat available at level {}", self.to_level)));
        }
        let feat = tables::find_feat(name)
            .ok_or_else(|| RulesError::invalid(format!("unknown feat '{name}'")))?;
        if self.known_feats.iter().any(|f| f == feat) {
            return Err(RulesError::invalid(format!("{feat} is already known")));
        }
        self.feat = Some(feat.to_string());
        self.ability_increases.clear();
        self.advance();
        Ok(self.step)
    }

    pub fn choose_subclass(&mut self, name: &str) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        if !self.subclass_required {
            return Err(RulesError::invalid(format!(
                "no subclass choice at level {}",
                self.to_level
            )));
        }
        let subclass = self.class.find_subclass(name).ok_or_else(|| {
            RulesError::invalid(format!("'{name}' is not a {} subclass", self.class.name()))
        })?;
        self.subclass = Some(subclass.to_string());
        // Third-caster subclasses start learning spells at the level they are taken.
        self.spells_to_learn = self.class.spells_learned_at(self.to_level, Some(subclass));
        self.spells_learned.truncate(self.spells_to_learn);
        self.advance();
        Ok(self.step)
    }

    /// Spells the character could learn at the new level.
    pub fn learnable_spells(&self) -> Vec<&'static SpellData> {
        let Some(caster) = self.class.caster_type(self.effective_subclass()) else {
            return Vec::new();
        };
        let max_level = tables::max_spell_level(caster, self.to_level);
        let list = spell_list_class(self.class, caster);
        let mut spells: Vec<_> = spells::spells_for_class(list)
            .filter(|s| s.level >= 1 && s.level <= max_level)
            .filter(|s| !self.known_spells.iter().any(|k| k.eq_ignore_ascii_case(&s.name)))
            .collect();
        spells.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));
        spells
    }

    pub fn learn_spells(&mut self, names: &[&str]) -> Result<LevelUpStep, RulesError> {
        self.ensure_open()?;
        if self.spells_to_learn == 0 {
            return Err(RulesError::invalid(format!(
                "no spells to learn at level {}",
                self.to_level
            )));
        }
        if names.len() != self.spells_to_learn {
            return Err(RulesError::invalid(format!(
                "must learn exactly {} spell(s), got {}",
                self.spells_to_learn,
                names.len()
            )));
        }
        let learnable = self.learnable_spells();
        let mut learned: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let spell = learnable
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| {
                    RulesError::invalid(format!(
                        "'{name}' cannot be learned by a level {} {}",
                        self.to_level,
                        self.class.name()
                    ))
                })?;
            if learned.contains(&spell.name) {
                return Err(RulesError::invalid(format!("{} listed twice", spell.name)));
            }
            learned.push(spell.name.clone());
        }
        self.spells_learned = learned;
        self.advance();
        Ok(self.step)
    }

    /// Check every requirement is met. Commit calls this again.
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.step == LevelUpStep::Committed {
            return Err(RulesError::invalid("level up already committed"));
        }
        if self.step != LevelUpStep::Ready {
            return Err(RulesError::invalid(format!(
                "level up is not ready: {:?}",
                self.step
            )));
        }
        let sides = self.hit_die.sides();
        match self.hp_gain {
            Some(gain) if (1..=sides).contains(&gain) => {}
            _ => return Err(RulesError::invalid("hit point gain outside the hit die")),
        }
        if !self.ability_increases.is_empty() && self.feat.is_some() {
            return Err(RulesError::invalid("choose an ability score improvement or a feat, not both"));
        }
        if self.spells_learned.len() != self.spells_to_learn {
            return Err(RulesError::invalid("wrong number of spells learned"));
        }
        Ok(())
    }
}

/// Spell list a caster learns from. Third casters use the wizard list.
fn spell_list_class(class: CharacterClass, caster: CasterType) -> CharacterClass {
    match caster {
        CasterType::Third => CharacterClass::Wizard,
        _ => class,
    }
}

fn pending_choice(feature: &ClassFeature, character: &Character) -> Option<PendingChoice> {
    let spec = feature.choice?;
    let taken: Vec<&String> = character
        .feature_choices
        .iter()
        .filter(|made| made.feature == feature.name)
        .flat_map(|made| made.selections.iter())
        .collect();
    let options: Vec<String> = spec
        .options
        .iter()
        .filter(|option| !taken.iter().any(|t| t.as_str() == **option))
        .map(|option| option.to_string())
        .collect();
    Some(PendingChoice {
        feature: feature.name.to_string(),
        picks: spec.picks.min(options.len()),
        options,
    })
}

/// Rebuild a submitted wizard from the character itself, replaying each
/// selection through the checks the selection methods apply. Only the
/// rebuilt wizard is trusted.
fn replay(character: &Character, submitted: &LevelUpWizard) -> Result<LevelUpWizard, RulesError> {
    let mut wizard = LevelUpWizard::begin(character)?;
    if submitted.class != wizard.class
        || submitted.hit_die != wizard.hit_die
        || submitted.to_level != wizard.to_level
    {
        return Err(RulesError::invalid(format!(
            "level up does not match a level {} {}",
            character.level,
            character.class.name()
        )));
    }
    if submitted.asi_available != wizard.asi_available
        || submitted.subclass_required != wizard.subclass_required
    {
        return Err(RulesError::invalid("level up requirements do not match the character"));
    }

    let hp_gain = submitted
        .hp_gain
        .ok_or_else(|| RulesError::invalid("hit point gain not chosen"))?;
    wizard.choose_hp(hp_gain)?;
    wizard.hp_roll = submitted.hp_roll.clone();

    for choice in &submitted.feature_choices {
        let selections: Vec<&str> = choice.selections.iter().map(String::as_str).collect();
        wizard.choose_feature(&choice.feature, &selections)?;
    }
    if !submitted.ability_increases.is_empty() {
        if submitted.feat.is_some() {
            return Err(RulesError::invalid(
                "choose an ability score improvement or a feat, not both",
            ));
        }
        let increases: Vec<(Ability, u8)> = submitted
            .ability_increases
            .iter()
            .map(|inc| (inc.ability, inc.amount))
            .collect();
        wizard.choose_asi(&increases)?;
    }
    if let Some(feat) = &submitted.feat {
        wizard.choose_feat(feat)?;
    }
    if let Some(subclass) = &submitted.subclass {
        wizard.choose_subclass(subclass)?;
    }
    if wizard.spells_to_learn > 0 || !submitted.spells_learned.is_empty() {
        let names: Vec<&str> = submitted.spells_learned.iter().map(String::as_str).collect();
        wizard.learn_spells(&names)?;
    }
    wizard.validate()?;
    Ok(wizard)
}

/// Apply a ready wizard to the character. Runs inside a store mutation.
///
/// The submitted wizard is only a record of selections: every one is checked
/// again against the character before anything changes.
pub(crate) fn commit(character: &mut Character, wizard: &LevelUpWizard) -> Result<LevelUpOutcome, RulesError> {
    if wizard.character_id != character.id {
        return Err(RulesError::invalid("level up belongs to a different character"));
    }
    if character.is_dead() {
        return Err(RulesError::EntityUnavailable(format!("{} is dead", character.name)));
    }
    if character.level != wizard.from_level {
        return Err(RulesError::invalid(format!(
            "level up was started at level {} but {} is now level {}",
            wizard.from_level, character.name, character.level
        )));
    }
    wizard.validate()?;
    let replayed = replay(character, wizard)?;
    let wizard = &replayed;
    let hp_gain = wizard.hp_gain.unwrap_or(1);
    let old_level = character.level;
    let new_level = wizard.to_level;

    character.level = new_level;
    character.max_hp += hp_gain;
    let was_down = character.current_hp == 0;
    character.current_hp += hp_gain;
    if was_down {
        character.set_unconscious(false, "level up");
    }

    for inc in &wizard.ability_increases {
        let score = character.ability_scores.get(inc.ability) + inc.amount;
        if score > ASI_SCORE_CAP {
            return Err(RulesError::invalid(format!(
                "{} would rise to {score}, above {ASI_SCORE_CAP}",
                inc.ability.name()
            )));
        }
        character.ability_scores.set(inc.ability, score);
    }
    if let Some(feat) = &wizard.feat {
        if character.feats.contains(feat) {
            return Err(RulesError::invalid(format!("{feat} is already known")));
        }
        character.feats.push(feat.clone());
    }
    if let Some(subclass) = &wizard.subclass {
        character.subclass = Some(subclass.clone());
    }

    let features_gained: Vec<String> = character
        .class
        .features_at(new_level)
        .map(|f| f.name.to_string())
        .collect();
    character.features.extend(features_gained.iter().cloned());
    character
        .feature_choices
        .extend(wizard.feature_choices.iter().cloned());

    let caster = character.class.caster_type(character.subclass.as_deref());
    if character.spellcasting.is_none() {
        if let (Some(caster), Some(ability)) = (
            caster,
            character
                .class
                .spellcasting_ability(character.subclass.as_deref()),
        ) {
            character.spellcasting = Some(Spellcasting {
                caster_type: caster,
                ability,
                slots: SpellSlots::full(tables::spell_slots(caster, old_level)),
                spells: Vec::new(),
                cantrips: Vec::new(),
            });
        }
    }

    let prepares = character.class.prepares_spells();
    if let Some(casting) = character.spellcasting.as_mut() {
        let maximum = tables::spell_slots(casting.caster_type, new_level);
        casting
            .slots
            .rescale(maximum, casting.caster_type == CasterType::Pact);
        for name in &wizard.spells_learned {
            let spell = spells::get_spell(name)
                .ok_or_else(|| RulesError::invalid(format!("unknown spell '{name}'")))?;
            if casting.find_spell(&spell.name).is_some() {
                return Err(RulesError::invalid(format!("{} is already known", spell.name)));
            }
            casting.spells.push(KnownSpell {
                name: spell.name.clone(),
                level: spell.level,
                school: spell.school,
                // Known casters always have their repertoire ready.
                prepared: !prepares,
                times_cast_today: 0,
            });
        }
    } else if !wizard.spells_learned.is_empty() {
        return Err(RulesError::invalid("cannot learn spells without spellcasting"));
    }

    character.resources.hit_dice.total += 1;
    character.resources.hit_dice.remaining += 1;
    let features = character
        .class
        .limited_features(new_level, &character.ability_scores);
    character.resources.rescale_features(features);

    Ok(LevelUpOutcome {
        character_id: character.id,
        old_level,
        new_level,
        hp_gain,
        max_hp: character.max_hp,
        current_hp: character.current_hp,
        proficiency_bonus: character.proficiency_bonus(),
        features_gained,
        feature_choices: wizard.feature_choices.clone(),
        ability_increases: wizard.ability_increases.clone(),
        feat: wizard.feat.clone(),
        subclass: wizard.subclass.clone(),
        spells_learned: wizard.spells_learned.clone(),
        slots_maximum: character.spellcasting.as_ref().map(|c| c.slots.maximum),
        companions_rescaled: Vec::new(),
        companions_pending: Vec::new(),
    })
}
