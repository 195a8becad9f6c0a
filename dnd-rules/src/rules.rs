//! D&D 5e action dispatcher.
//!
//! Callers describe what happened as an [`Action`] addressed to one entity.
//! The [`RulesEngine`] resolves it with the 5e rules against a private copy
//! of that entity inside [`EntityStore::apply`], so every action either
//! commits its whole delta or changes nothing. The engine never narrates;
//! the returned [`ActionOutcome`] reports exactly what changed.

use crate::character::{
    clear_condition, find_condition, normalize, set_condition, Ability, ActiveCondition,
    Character, CharacterClass, Condition, DeathSaves, EntityId, KnownSpell, Skill, SpellSummary,
    Vitals, DEATH_SAVES_TO_SETTLE, MAX_EXHAUSTION,
};
use crate::companion::{self, Companion, CompanionState};
use crate::config::EngineConfig;
use crate::dice::{self, Advantage, DiceNotation, DiceRoll};
use crate::error::{ErrorBody, RulesError};
use crate::leveling::{self, LevelUpOutcome, LevelUpWizard};
use crate::rest::{self, RestOutcome};
use crate::spells::{self, DamageType, SpellAttackType, SpellSchool};
use crate::store::EntityStore;
use crate::tables::{self, DeathRule, MAX_LEVEL};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Actions
// ============================================================================

/// Kind of d20 check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Ability,
    Skill,
    #[serde(alias = "saving_throw")]
    Save,
}

impl CheckKind {
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Ability => "ability",
            CheckKind::Skill => "skill",
            CheckKind::Save => "save",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

/// Something that happened to one entity.
///
/// On the wire this is internally tagged:
/// `{"kind": "modify_hp", "amount": -5, "source": "goblin"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Action {
    /// Negative amounts are damage, positive are healing.
    ModifyHp {
        amount: i32,
        #[serde(default)]
        source: String,
    },
    CastSpell {
        spell_name: String,
        /// Defaults to the spell's own level.
        #[serde(default)]
        slot_level: Option<u8>,
    },
    RollCheck {
        check: CheckKind,
        target: String,
        #[serde(default)]
        mode: Advantage,
    },
    Roll {
        notation: String,
        #[serde(default)]
        mode: Advantage,
    },
    ApplyCondition {
        condition: String,
        #[serde(default = "default_true")]
        active: bool,
        #[serde(default)]
        source: String,
    },
    SetCompanionState {
        state: CompanionState,
    },
    DismissCompanion,
    ConsumeResource {
        resource: String,
        #[serde(default = "default_one")]
        amount: u32,
    },
    PrepareSpells {
        spells: Vec<String>,
    },
    GainExperience {
        amount: u32,
    },
    ShortRest {
        #[serde(default)]
        hit_dice: u8,
    },
    LongRest,
    CommitLevelUp {
        wizard: Box<LevelUpWizard>,
    },
    /// Characters at 0 hp only.
    DeathSave {
        #[serde(default)]
        mode: Advantage,
    },
    GrantTempHp {
        amount: u32,
        #[serde(default)]
        source: String,
    },
}

impl Action {
    /// Wire name of the action, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::ModifyHp { .. } => "modify_hp",
            Action::CastSpell { .. } => "cast_spell",
            Action::RollCheck { .. } => "roll_check",
            Action::Roll { .. } => "roll",
            Action::ApplyCondition { .. } => "apply_condition",
            Action::SetCompanionState { .. } => "set_companion_state",
            Action::DismissCompanion => "dismiss_companion",
            Action::ConsumeResource { .. } => "consume_resource",
            Action::PrepareSpells { .. } => "prepare_spells",
            Action::GainExperience { .. } => "gain_experience",
            Action::ShortRest { .. } => "short_rest",
            Action::LongRest => "long_rest",
            Action::CommitLevelUp { .. } => "commit_level_up",
            Action::DeathSave { .. } => "death_save",
            Action::GrantTempHp { .. } => "grant_temp_hp",
        }
    }
}

/// One action addressed to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionRequest {
    pub entity_id: EntityId,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub action: Action,
}

impl ActionRequest {
    pub fn new(entity_id: EntityId, action: Action) -> Self {
        Self {
            entity_id,
            idempotency_key: None,
            action,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a hit point change. Clamping shows up as `applied` differing
/// from `requested`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpChange {
    pub requested: i32,
    pub applied: i32,
    pub old_hp: u32,
    pub new_hp: u32,
    pub max_hp: u32,
    /// Damage soaked by temporary hit points before current hp.
    pub temp_hp_absorbed: u32,
    pub temp_hp: u32,
    pub became_unconscious: bool,
    pub regained_consciousness: bool,
    pub died: bool,
    pub source: String,
}

/// What casting a spell used up and what it does. Damage is never rolled here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellCast {
    pub spell: String,
    pub spell_level: u8,
    /// `None` for cantrips.
    pub slot_level: Option<u8>,
    pub slots_remaining: Option<u8>,
    pub times_cast_today: Option<u32>,
    pub school: Option<SpellSchool>,
    pub concentration: bool,
    pub damage_dice: Option<String>,
    pub damage_type: Option<DamageType>,
    pub healing_dice: Option<String>,
    pub save_ability: Option<Ability>,
    pub save_dc: Option<i8>,
    pub attack: Option<SpellAttackType>,
    pub attack_bonus: Option<i8>,
    pub upcast: Option<String>,
}

/// Roll a death save must meet.
pub const DEATH_SAVE_DC: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathSaveResult {
    Success,
    Failure,
    /// Natural 20: back up with 1 hp.
    Revived,
    Stabilized,
    Died,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathSaveRoll {
    pub roll: DiceRoll,
    pub result: DeathSaveResult,
    /// Progress after this roll.
    pub death_saves: DeathSaves,
    pub current_hp: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempHpGrant {
    pub amount: u32,
    pub old_temp_hp: u32,
    pub temp_hp: u32,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CheckKind,
    /// Canonical ability or skill name.
    pub target: String,
    pub modifier: i8,
    pub roll: DiceRoll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionChange {
    pub condition: String,
    pub active: bool,
    /// False when the condition was already in the requested state.
    pub changed: bool,
    pub exhaustion_level: Option<u8>,
    pub died: bool,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceGain {
    pub amount: u32,
    pub total: u32,
    pub level: u8,
    pub next_level_at: Option<u32>,
    pub level_up_available: bool,
}

/// Followers brought to their ranger's level, and those that could not be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionSync {
    pub owner_ranger_level: u8,
    pub rescaled: Vec<EntityId>,
    pub pending: Vec<EntityId>,
}

/// Result of a dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    HpChanged(HpChange),
    SpellCast(Box<SpellCast>),
    CheckRolled(CheckResult),
    DiceRolled {
        notation: String,
        roll: DiceRoll,
    },
    ConditionChanged(ConditionChange),
    CompanionStateChanged {
        old_state: CompanionState,
        new_state: CompanionState,
        current_hp: u32,
    },
    CompanionDismissed {
        companion_id: EntityId,
    },
    CompanionRescaled {
        companion_id: EntityId,
        owner_ranger_level: u8,
        hp_delta: i64,
        max_hp: u32,
        current_hp: u32,
    },
    ResourceConsumed {
        resource: String,
        amount: u32,
        remaining: u32,
    },
    SpellsPrepared {
        prepared: Vec<String>,
    },
    ExperienceGained(ExperienceGain),
    Rested(RestOutcome),
    LevelledUp(Box<LevelUpOutcome>),
    DeathSaveRolled(DeathSaveRoll),
    TempHpGranted(TempHpGrant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

/// Wire envelope: `{"status": "ok", "result": ...}` or
/// `{"status": "error", "error": {"kind": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(outcome: ActionOutcome) -> Self {
        Self {
            status: Status::Ok,
            result: Some(outcome),
            error: None,
        }
    }

    pub fn error(err: &RulesError) -> Self {
        Self {
            status: Status::Error,
            result: None,
            error: Some(ErrorBody::from(err)),
        }
    }
}

impl From<Result<ActionOutcome, RulesError>> for Response {
    fn from(result: Result<ActionOutcome, RulesError>) -> Self {
        match result {
            Ok(outcome) => Response::ok(outcome),
            Err(err) => Response::error(&err),
        }
    }
}

// ============================================================================
// Shared rules
// ============================================================================

/// Apply damage (negative) or healing (positive) to anything with hit points.
///
/// Temporary hit points soak damage first. Hitting 0 knocks the target
/// unconscious. A hit taken while already at 0 kills when `rule` says so,
/// and otherwise counts as a failed death save. The dead cannot be healed.
pub(crate) fn apply_hp_change<V: Vitals>(
    target: &mut V,
    amount: i32,
    source: &str,
    rule: DeathRule,
) -> Result<HpChange, RulesError> {
    if amount == 0 {
        return Err(RulesError::invalid("hit point change of 0"));
    }
    let old_hp = target.current_hp();
    let max_hp = target.max_hp();
    let mut change = HpChange {
        requested: amount,
        applied: 0,
        old_hp,
        new_hp: old_hp,
        max_hp,
        temp_hp_absorbed: 0,
        temp_hp: target.temp_hp(),
        became_unconscious: false,
        regained_consciousness: false,
        died: false,
        source: source.to_string(),
    };

    if target.is_dead() {
        if amount > 0 {
            return Err(RulesError::EntityUnavailable(format!(
                "the dead cannot be healed ({source})"
            )));
        }
        return Ok(change);
    }

    if amount < 0 {
        let temp_hp = target.temp_hp();
        let absorbed = temp_hp.min(amount.unsigned_abs());
        target.set_temp_hp(temp_hp - absorbed);
        change.temp_hp_absorbed = absorbed;
        let damage = amount.unsigned_abs() - absorbed;
        if damage > 0 && old_hp == 0 {
            let fatal = rule.kills(damage, max_hp)
                || (rule.hits_fail_death_saves() && target.fail_death_saves(1));
            if fatal {
                target.mark_dead(source);
                change.died = true;
            }
        } else if damage > 0 {
            let new_hp = old_hp.saturating_sub(damage);
            target.set_current_hp(new_hp);
            change.applied = -((old_hp - new_hp) as i32);
            if new_hp == 0 {
                target.set_unconscious(true, source);
                change.became_unconscious = true;
            }
        }
    } else {
        let new_hp = old_hp.saturating_add(amount as u32).min(max_hp);
        target.set_current_hp(new_hp);
        change.applied = (new_hp - old_hp) as i32;
        if old_hp == 0 && new_hp > 0 {
            target.set_unconscious(false, source);
            change.regained_consciousness = true;
        }
    }
    change.new_hp = target.current_hp();
    change.temp_hp = target.temp_hp();
    Ok(change)
}

/// Record one death saving throw for a character at 0 hit points.
///
/// A natural 20 brings them back with 1 hp and a natural 1 counts as two
/// failures. Three successes stabilize and three failures kill.
pub(crate) fn record_death_save(
    character: &mut Character,
    roll: DiceRoll,
) -> Result<DeathSaveRoll, RulesError> {
    ensure_alive(character, "roll death saves")?;
    if character.current_hp > 0 {
        return Err(RulesError::invalid(format!("{} is not dying", character.name)));
    }
    if character.death_saves.stable {
        return Err(RulesError::invalid(format!("{} is already stable", character.name)));
    }
    let natural = roll.natural().unwrap_or(0);
    let result = if natural == 20 {
        character.current_hp = 1;
        character.set_unconscious(false, "death save");
        DeathSaveResult::Revived
    } else if natural == 1 || roll.total < DEATH_SAVE_DC {
        let count = if natural == 1 { 2 } else { 1 };
        if character.fail_death_saves(count) {
            character.mark_dead("failed death saves");
            DeathSaveResult::Died
        } else {
            DeathSaveResult::Failure
        }
    } else {
        let saves = &mut character.death_saves;
        saves.successes += 1;
        if saves.successes >= DEATH_SAVES_TO_SETTLE {
            *saves = DeathSaves {
                stable: true,
                ..DeathSaves::default()
            };
            DeathSaveResult::Stabilized
        } else {
            DeathSaveResult::Success
        }
    };
    Ok(DeathSaveRoll {
        roll,
        result,
        death_saves: character.death_saves,
        current_hp: character.current_hp,
    })
}

/// Temporary hit points do not stack: the larger grant wins.
fn grant_temp_hp(
    character: &mut Character,
    amount: u32,
    source: &str,
) -> Result<TempHpGrant, RulesError> {
    ensure_alive(character, "gain temporary hit points")?;
    if amount == 0 {
        return Err(RulesError::invalid("temporary hit point grant of 0"));
    }
    let old_temp_hp = character.temp_hp;
    character.temp_hp = old_temp_hp.max(amount);
    Ok(TempHpGrant {
        amount,
        old_temp_hp,
        temp_hp: character.temp_hp,
        source: source.to_string(),
    })
}

fn exhaustion_in(conditions: &[ActiveCondition]) -> u8 {
    conditions
        .iter()
        .find_map(|c| match c.condition {
            Condition::Exhaustion(level) => Some(level),
            _ => None,
        })
        .unwrap_or(0)
}

/// Disadvantage imposed by conditions on a check.
fn condition_mode(conditions: &[ActiveCondition], check: CheckKind) -> Advantage {
    let exhaustion = exhaustion_in(conditions);
    let disadvantaged = match check {
        CheckKind::Ability | CheckKind::Skill => {
            exhaustion >= 1 || find_condition(conditions, &Condition::Poisoned).is_some()
        }
        CheckKind::Save => exhaustion >= 3,
    };
    if disadvantaged {
        Advantage::Disadvantage
    } else {
        Advantage::Normal
    }
}

/// Add or remove a condition. Exhaustion moves one level per call; the
/// returned flag is true when it reached the fatal level.
fn toggle_condition(
    conditions: &mut Vec<ActiveCondition>,
    condition: Condition,
    active: bool,
    source: &str,
) -> (ConditionChange, bool) {
    let mut change = ConditionChange {
        condition: condition.name().to_string(),
        active,
        changed: false,
        exhaustion_level: None,
        died: false,
        source: source.to_string(),
    };
    let mut fatal = false;
    match condition {
        Condition::Exhaustion(_) => {
            let level = exhaustion_in(conditions);
            let next = if active {
                (level + 1).min(MAX_EXHAUSTION)
            } else {
                level.saturating_sub(1)
            };
            change.changed = next != level;
            if next == 0 {
                clear_condition(conditions, &condition);
            } else {
                set_condition(
                    conditions,
                    ActiveCondition::new(Condition::Exhaustion(next), source),
                );
            }
            change.exhaustion_level = Some(next);
            fatal = change.changed && next == MAX_EXHAUSTION;
        }
        _ if active => {
            change.changed = set_condition(conditions, ActiveCondition::new(condition, source));
        }
        _ => {
            change.changed = clear_condition(conditions, &condition);
        }
    }
    (change, fatal)
}

fn parse_settable_condition(name: &str) -> Result<Condition, RulesError> {
    let condition = Condition::parse(name)?;
    if condition.is_hp_derived() {
        return Err(RulesError::invalid(format!(
            "{} follows hit points and cannot be set directly",
            condition.name()
        )));
    }
    Ok(condition)
}

fn roll_notation(notation: &str, mode: Advantage) -> Result<ActionOutcome, RulesError> {
    let parsed = DiceNotation::parse(notation)?;
    let roll = parsed.roll(mode)?;
    Ok(ActionOutcome::DiceRolled {
        notation: parsed.to_string(),
        roll,
    })
}

fn check_target(check: CheckKind, target: &str) -> Result<(Option<Ability>, Option<Skill>), RulesError> {
    match check {
        CheckKind::Skill => Ok((None, Some(Skill::from_str(target)?))),
        CheckKind::Ability | CheckKind::Save => Ok((Some(Ability::from_str(target)?), None)),
    }
}

// ============================================================================
// Character actions
// ============================================================================

fn ensure_alive(character: &Character, action: &str) -> Result<(), RulesError> {
    if character.is_dead() {
        return Err(RulesError::EntityUnavailable(format!(
            "{} is dead and cannot {action}",
            character.name
        )));
    }
    Ok(())
}

fn resolve_character(
    character: &mut Character,
    action: Action,
    rule: DeathRule,
) -> Result<ActionOutcome, RulesError> {
    match action {
        Action::ModifyHp { amount, source } => {
            apply_hp_change(character, amount, &source, rule).map(ActionOutcome::HpChanged)
        }
        Action::CastSpell {
            spell_name,
            slot_level,
        } => cast_spell(character, &spell_name, slot_level).map(|c| ActionOutcome::SpellCast(Box::new(c))),
        Action::RollCheck {
            check,
            target,
            mode,
        } => {
            ensure_alive(character, "roll checks")?;
            let (ability, skill) = check_target(check, &target)?;
            let (name, modifier) = match (check, ability, skill) {
                (CheckKind::Skill, _, Some(skill)) => (skill.name(), character.skill_modifier(skill)),
                (CheckKind::Save, Some(ability), _) => {
                    (ability.name(), character.saving_throw_modifier(ability))
                }
                (_, Some(ability), _) => (ability.name(), character.modifier(ability)),
                _ => return Err(RulesError::invalid(format!("bad check target '{target}'"))),
            };
            let mode = mode.combine(condition_mode(&character.conditions, check));
            let roll = dice::roll(1, 20, modifier as i32, mode)?;
            Ok(ActionOutcome::CheckRolled(CheckResult {
                check,
                target: name.to_string(),
                modifier,
                roll,
            }))
        }
        Action::Roll { notation, mode } => roll_notation(&notation, mode),
        Action::ApplyCondition {
            condition,
            active,
            source,
        } => {
            let condition = parse_settable_condition(&condition)?;
            ensure_alive(character, "gain conditions")?;
            let (mut change, fatal) =
                toggle_condition(&mut character.conditions, condition, active, &source);
            if fatal {
                character.mark_dead(&source);
                change.died = true;
            }
            Ok(ActionOutcome::ConditionChanged(change))
        }
        Action::ConsumeResource { resource, amount } => {
            ensure_alive(character, "use resources")?;
            consume_resource(character, &resource, amount)
        }
        Action::PrepareSpells { spells } => {
            ensure_alive(character, "prepare spells")?;
            prepare_spells(character, &spells)
        }
        Action::GainExperience { amount } => {
            ensure_alive(character, "gain experience")?;
            if amount == 0 {
                return Err(RulesError::invalid("experience gain of 0"));
            }
            character.experience = character.experience.saturating_add(amount);
            let next_level_at = if character.level < MAX_LEVEL {
                tables::xp_for_level(character.level + 1)
            } else {
                None
            };
            Ok(ActionOutcome::ExperienceGained(ExperienceGain {
                amount,
                total: character.experience,
                level: character.level,
                next_level_at,
                level_up_available: tables::level_for_xp(character.experience) > character.level,
            }))
        }
        Action::ShortRest { hit_dice } => {
            rest::short_rest(character, hit_dice).map(ActionOutcome::Rested)
        }
        Action::LongRest => rest::long_rest(character).map(ActionOutcome::Rested),
        Action::CommitLevelUp { wizard } => leveling::commit(character, &wizard)
            .map(|outcome| ActionOutcome::LevelledUp(Box::new(outcome))),
        Action::DeathSave { mode } => {
            let mode = mode.combine(condition_mode(&character.conditions, CheckKind::Save));
            let roll = dice::roll(1, 20, 0, mode)?;
            record_death_save(character, roll).map(ActionOutcome::DeathSaveRolled)
        }
        Action::GrantTempHp { amount, source } => {
            grant_temp_hp(character, amount, &source).map(ActionOutcome::TempHpGranted)
        }
        Action::SetCompanionState { .. } | Action::DismissCompanion => Err(RulesError::invalid(
            format!("{} only applies to companions", action.name()),
        )),
    }
}

fn cast_spell(
    character: &mut Character,
    spell_name: &str,
    slot_level: Option<u8>,
) -> Result<SpellCast, RulesError> {
    ensure_alive(character, "cast spells")?;
    let not_prepared = || RulesError::SpellNotPrepared {
        spell: spell_name.trim().to_string(),
    };
    let caster_level = character.level;
    let save_dc = character.spell_save_dc();
    let attack_bonus = character.spell_attack_bonus();
    let prepares = character.class.prepares_spells();
    let casting = character.spellcasting.as_mut().ok_or_else(not_prepared)?;
    let catalog = spells::get_spell(spell_name);

    let (name, spell_level, slot_used, slots_remaining, times_cast) =
        if casting.knows_cantrip(spell_name) {
            let name = catalog
                .map(|s| s.name.clone())
                .unwrap_or_else(|| spell_name.trim().to_string());
            (name, 0, None, None, None)
        } else {
            let known = casting.find_spell(spell_name).ok_or_else(not_prepared)?;
            if prepares && !known.prepared {
                return Err(not_prepared());
            }
            let spell_level = known.level;
            let slot = slot_level.unwrap_or(spell_level);
            if slot < spell_level || slot > 9 {
                return Err(RulesError::invalid(format!(
                    "{} cannot be cast with a level {slot} slot",
                    known.name
                )));
            }
            if !casting.slots.expend(slot) {
                return Err(RulesError::InsufficientSlots { level: slot });
            }
            let remaining = casting.slots.available(slot);
            let known = casting.find_spell_mut(spell_name).ok_or_else(not_prepared)?;
            known.times_cast_today += 1;
            (
                known.name.clone(),
                spell_level,
                Some(slot),
                Some(remaining),
                Some(known.times_cast_today),
            )
        };

    let effect_slot = slot_used.unwrap_or(0);
    let has_save = catalog.and_then(|s| s.save);
    let has_attack = catalog.and_then(|s| s.attack);
    Ok(SpellCast {
        spell: name,
        spell_level,
        slot_level: slot_used,
        slots_remaining,
        times_cast_today: times_cast,
        school: catalog.map(|s| s.school),
        concentration: catalog.is_some_and(|s| s.concentration),
        damage_dice: catalog.and_then(|s| s.effective_damage_dice(caster_level, effect_slot)),
        damage_type: catalog.and_then(|s| s.damage_type),
        healing_dice: catalog.and_then(|s| s.effective_healing_dice(caster_level, effect_slot)),
        save_ability: has_save,
        save_dc: has_save.and(save_dc),
        attack: has_attack,
        attack_bonus: has_attack.and(attack_bonus),
        upcast: catalog.and_then(|s| s.upcast.clone()),
    })
}

fn consume_resource(
    character: &mut Character,
    resource: &str,
    amount: u32,
) -> Result<ActionOutcome, RulesError> {
    if amount == 0 {
        return Err(RulesError::invalid("resource amount of 0"));
    }
    let wanted = normalize(resource);
    let (name, available) = if wanted == "hitdice" || wanted == "hitdie" {
        let pool = &mut character.resources.hit_dice;
        let available = pool.remaining as u32;
        if amount <= available {
            pool.remaining -= amount as u8;
        }
        ("hit_dice".to_string(), available)
    } else {
        let feature = character
            .resources
            .feature_mut(resource)
            .ok_or_else(|| RulesError::invalid(format!("unknown resource '{resource}'")))?;
        let available = feature.current;
        if amount <= available {
            feature.current -= amount;
        }
        (feature.name.clone(), available)
    };
    if amount > available {
        return Err(RulesError::InsufficientResource {
            resource: name,
            requested: amount,
            available,
        });
    }
    Ok(ActionOutcome::ResourceConsumed {
        resource: name,
        amount,
        remaining: available - amount,
    })
}

fn prepare_spells(character: &mut Character, names: &[String]) -> Result<ActionOutcome, RulesError> {
    let class = character.class;
    if !class.prepares_spells() {
        return Err(RulesError::invalid(format!(
            "{}s do not prepare spells",
            class.name()
        )));
    }
    let limit = character.prepare_limit().unwrap_or(0);
    if names.len() > limit {
        return Err(RulesError::invalid(format!(
            "{} can prepare at most {limit} spells, got {}",
            character.name,
            names.len()
        )));
    }
    let casting = character
        .spellcasting
        .as_mut()
        .ok_or_else(|| RulesError::invalid(format!("{} has no spellcasting", character.name)))?;
    let max_level = tables::max_spell_level(casting.caster_type, character.level);

    let mut chosen: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let canonical = match casting.find_spell(name) {
            Some(known) => known.name.clone(),
            None if class.prepares_from_class_list() => {
                let spell = spells::get_spell(name)
                    .filter(|s| s.available_to(class) && !s.is_cantrip() && s.level <= max_level)
                    .ok_or_else(|| {
                        RulesError::invalid(format!(
                            "'{name}' is not a {} spell this character can prepare",
                            class.name()
                        ))
                    })?;
                casting.spells.push(KnownSpell {
                    name: spell.name.clone(),
                    level: spell.level,
                    school: spell.school,
                    prepared: false,
                    times_cast_today: 0,
                });
                spell.name.clone()
            }
            None => {
                return Err(RulesError::invalid(format!(
                    "'{name}' is not in {}'s spellbook",
                    character.name
                )))
            }
        };
        if chosen.contains(&canonical) {
            return Err(RulesError::invalid(format!("{canonical} listed twice")));
        }
        chosen.push(canonical);
    }
    for spell in casting.spells.iter_mut() {
        spell.prepared = chosen.contains(&spell.name);
    }
    Ok(ActionOutcome::SpellsPrepared { prepared: chosen })
}

// ============================================================================
// Companion actions
// ============================================================================

fn resolve_companion(
    companion: &mut Companion,
    action: Action,
    rule: DeathRule,
) -> Result<ActionOutcome, RulesError> {
    if companion.dismissed {
        return Err(RulesError::EntityUnavailable(format!(
            "{} has been dismissed",
            companion.name
        )));
    }
    let dead = companion.is_dead();
    let name = companion.name.clone();
    let unavailable =
        |what: &str| RulesError::EntityUnavailable(format!("{name} is dead and cannot {what}"));
    match action {
        Action::ModifyHp { amount, source } => {
            apply_hp_change(companion, amount, &source, rule).map(ActionOutcome::HpChanged)
        }
        Action::RollCheck {
            check,
            target,
            mode,
        } => {
            if dead {
                return Err(unavailable("roll checks"));
            }
            let (ability, skill) = check_target(check, &target)?;
            let (name, modifier) = match (check, ability, skill) {
                (CheckKind::Skill, _, Some(skill)) => (skill.name(), companion.skill_modifier(skill)),
                (CheckKind::Save, Some(ability), _) => {
                    (ability.name(), companion.saving_throw_modifier(ability))
                }
                (_, Some(ability), _) => (ability.name(), companion.ability_scores.modifier(ability)),
                _ => return Err(RulesError::invalid(format!("bad check target '{target}'"))),
            };
            let mode = mode.combine(condition_mode(&companion.conditions, check));
            let roll = dice::roll(1, 20, modifier as i32, mode)?;
            Ok(ActionOutcome::CheckRolled(CheckResult {
                check,
                target: name.to_string(),
                modifier,
                roll,
            }))
        }
        Action::Roll { notation, mode } => roll_notation(&notation, mode),
        Action::ApplyCondition {
            condition,
            active,
            source,
        } => {
            let condition = parse_settable_condition(&condition)?;
            if dead {
                return Err(unavailable("gain conditions"));
            }
            let (mut change, fatal) =
                toggle_condition(&mut companion.conditions, condition, active, &source);
            if fatal {
                companion.mark_dead(&source);
                change.died = true;
            }
            Ok(ActionOutcome::ConditionChanged(change))
        }
        Action::SetCompanionState { state } => {
            if dead {
                return Err(unavailable("change state"));
            }
            let old_state = companion.state;
            match state {
                CompanionState::Dead => companion.mark_dead("set_companion_state"),
                CompanionState::Unconscious => {
                    companion.set_current_hp(0);
                    companion.set_unconscious(true, "set_companion_state");
                }
                CompanionState::Active => {
                    if old_state != CompanionState::Unconscious {
                        return Err(RulesError::invalid(format!(
                            "{} is already active",
                            companion.name
                        )));
                    }
                    companion.set_current_hp(1);
                    companion.set_unconscious(false, "set_companion_state");
                }
            }
            Ok(ActionOutcome::CompanionStateChanged {
                old_state,
                new_state: companion.state,
                current_hp: companion.current_hp,
            })
        }
        Action::DismissCompanion => {
            companion.dismissed = true;
            Ok(ActionOutcome::CompanionDismissed {
                companion_id: companion.id,
            })
        }
        Action::ShortRest { .. } => rest::companion_short_rest(companion).map(ActionOutcome::Rested),
        Action::LongRest => rest::companion_long_rest(companion).map(ActionOutcome::Rested),
        Action::CastSpell { .. }
        | Action::ConsumeResource { .. }
        | Action::PrepareSpells { .. }
        | Action::GainExperience { .. }
        | Action::CommitLevelUp { .. }
        | Action::DeathSave { .. }
        | Action::GrantTempHp { .. } => Err(RulesError::invalid(format!(
            "{} does not apply to companions",
            action.name()
        ))),
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The rules engine: characters, companions and the actions between them.
pub struct RulesEngine {
    pub(crate) config: EngineConfig,
    pub(crate) characters: EntityStore<Character>,
    pub(crate) companions: EntityStore<Companion>,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RulesEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            characters: EntityStore::new(config.lock_timeout, config.idempotency_ttl),
            companions: EntityStore::new(config.lock_timeout, config.idempotency_ttl),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a character. Fails if it breaks an invariant or the id is taken.
    pub fn create_character(&self, character: Character) -> Result<Arc<Character>, RulesError> {
        self.characters.insert(character)
    }

    /// Bind a new companion from a template to an owner.
    pub fn acquire_companion(
        &self,
        owner: EntityId,
        template: &str,
        name: &str,
    ) -> Result<Arc<Companion>, RulesError> {
        let owner_record = self.characters.get(owner)?;
        if owner_record.is_dead() {
            return Err(RulesError::EntityUnavailable(format!(
                "{} is dead",
                owner_record.name
            )));
        }
        let template = companion::find_template(template)
            .ok_or_else(|| RulesError::invalid(format!("unknown companion template '{template}'")))?;
        let level = ranger_level(&owner_record);
        self.companions
            .insert(Companion::from_template(template, owner, name, level))
    }

    pub fn get_character(&self, id: EntityId) -> Result<Arc<Character>, RulesError> {
        self.characters.get(id)
    }

    pub fn get_companion(&self, id: EntityId) -> Result<Arc<Companion>, RulesError> {
        self.companions.get(id)
    }

    /// Companions bound to `owner`, including dismissed and dead ones.
    pub fn companions_of(&self, owner: EntityId) -> Vec<Arc<Companion>> {
        let mut owned: Vec<_> = self
            .companions
            .snapshot_all()
            .into_iter()
            .filter(|c| c.owner == owner)
            .collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name));
        owned
    }

    pub fn spell_summary(&self, id: EntityId) -> Result<SpellSummary, RulesError> {
        let character = self.characters.get(id)?;
        character
            .spell_summary()
            .ok_or_else(|| RulesError::invalid(format!("{} has no spellcasting", character.name)))
    }

    /// Start a level up. Reads the current snapshot and changes nothing.
    pub fn begin_level_up(&self, id: EntityId) -> Result<LevelUpWizard, RulesError> {
        let character = self.characters.get(id)?;
        LevelUpWizard::begin(&character)
    }

    /// Forget expired idempotency keys.
    pub fn prune_expired(&self) {
        self.characters.prune_expired();
        self.companions.prune_expired();
    }

    /// Resolve one action against the entity it names.
    pub async fn dispatch(&self, request: ActionRequest) -> Result<ActionOutcome, RulesError> {
        let ActionRequest {
            entity_id,
            idempotency_key,
            action,
        } = request;
        let key = idempotency_key.as_deref();
        debug!(entity_id = %entity_id, action = action.name(), idempotency_key = ?key, "dispatching action");

        let rule = self.config.death_rule;
        if self.characters.contains(entity_id) {
            if let Action::CommitLevelUp { wizard } = action {
                return self.commit_level_up_inner(entity_id, *wizard, key).await;
            }
            let applied = self
                .characters
                .apply(entity_id, key, |character| {
                    resolve_character(character, action, rule)
                })
                .await?;
            Ok(applied.outcome)
        } else if self.companions.contains(entity_id) {
            let applied = self
                .companions
                .apply(entity_id, key, |companion| {
                    resolve_companion(companion, action, rule)
                })
                .await?;
            Ok(applied.outcome)
        } else {
            Err(RulesError::NotFound(format!("entity {entity_id}")))
        }
    }

    async fn commit_level_up_inner(
        &self,
        id: EntityId,
        wizard: LevelUpWizard,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        if wizard.character_id != id {
            return Err(RulesError::invalid("level up belongs to a different character"));
        }
        let followers: Vec<EntityId> = self
            .companions_of(id)
            .iter()
            .filter(|c| !c.dismissed && !c.is_dead())
            .map(|c| c.id)
            .collect();
        let applied = self
            .characters
            .apply(id, key, |character| {
                let mut outcome = leveling::commit(character, &wizard)?;
                if character.class == CharacterClass::Ranger {
                    outcome.companions_pending = followers;
                }
                Ok(ActionOutcome::LevelledUp(Box::new(outcome)))
            })
            .await?;

        // A replayed commit retries whatever is still pending.
        let mut outcome = match applied.outcome {
            ActionOutcome::LevelledUp(outcome) => outcome,
            other => return Ok(other),
        };
        let followers = std::mem::take(&mut outcome.companions_pending);
        let sync = self
            .rescale_followers(id, &followers, outcome.new_level, key)
            .await;
        outcome.companions_rescaled = sync.rescaled;
        outcome.companions_pending = sync.pending;
        Ok(ActionOutcome::LevelledUp(outcome))
    }

    async fn rescale_followers(
        &self,
        owner: EntityId,
        followers: &[EntityId],
        level: u8,
        key: Option<&str>,
    ) -> CompanionSync {
        let mut sync = CompanionSync {
            owner_ranger_level: level,
            rescaled: Vec::new(),
            pending: Vec::new(),
        };
        for companion_id in followers {
            let companion_key = key.map(|k| format!("{k}:companion:{companion_id}"));
            let rescaled = self
                .companions
                .apply(*companion_id, companion_key.as_deref(), |companion| {
                    if companion.dismissed || companion.is_dead() {
                        return Err(RulesError::EntityUnavailable(format!(
                            "{} no longer follows its owner",
                            companion.name
                        )));
                    }
                    let hp_delta = companion.rescale(level);
                    Ok(ActionOutcome::CompanionRescaled {
                        companion_id: companion.id,
                        owner_ranger_level: level,
                        hp_delta,
                        max_hp: companion.max_hp(),
                        current_hp: companion.current_hp,
                    })
                })
                .await;
            match rescaled {
                Ok(_) => sync.rescaled.push(*companion_id),
                Err(err) => {
                    warn!(entity_id = %companion_id, owner = %owner, error = %err, "companion not rescaled");
                    sync.pending.push(*companion_id);
                }
            }
        }
        sync
    }

    /// Bring every follower of a ranger to the ranger's current level.
    /// Followers already there are left as they are.
    pub async fn rescale_companions(&self, owner: EntityId) -> Result<CompanionSync, RulesError> {
        let owner_record = self.characters.get(owner)?;
        if owner_record.class != CharacterClass::Ranger {
            return Err(RulesError::invalid(format!("{} is not a ranger", owner_record.name)));
        }
        let level = ranger_level(&owner_record);
        let followers: Vec<EntityId> = self
            .companions_of(owner)
            .iter()
            .filter(|c| !c.dismissed && !c.is_dead() && c.owner_ranger_level != level)
            .map(|c| c.id)
            .collect();
        Ok(self.rescale_followers(owner, &followers, level, None).await)
    }

    // ------------------------------------------------------------------------
    // Typed entry points
    // ------------------------------------------------------------------------

    async fn dispatch_keyed(
        &self,
        id: EntityId,
        key: Option<&str>,
        action: Action,
    ) -> Result<ActionOutcome, RulesError> {
        self.dispatch(ActionRequest {
            entity_id: id,
            idempotency_key: key.map(str::to_string),
            action,
        })
        .await
    }

    /// Damage (negative) or heal (positive) a character or companion.
    pub async fn modify_hp(
        &self,
        id: EntityId,
        amount: i32,
        source: &str,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::ModifyHp {
            amount,
            source: source.to_string(),
        };
        self.dispatch_keyed(id, key, action).await
    }

    pub async fn cast_spell(
        &self,
        id: EntityId,
        spell_name: &str,
        slot_level: Option<u8>,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::CastSpell {
            spell_name: spell_name.to_string(),
            slot_level,
        };
        self.dispatch_keyed(id, key, action).await
    }

    pub async fn roll_check(
        &self,
        id: EntityId,
        check: CheckKind,
        target: &str,
        mode: Advantage,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::RollCheck {
            check,
            target: target.to_string(),
            mode,
        };
        self.dispatch_keyed(id, key, action).await
    }

    pub async fn roll(
        &self,
        id: EntityId,
        notation: &str,
        mode: Advantage,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::Roll {
            notation: notation.to_string(),
            mode,
        };
        self.dispatch_keyed(id, key, action).await
    }

    pub async fn apply_condition(
        &self,
        id: EntityId,
        condition: &str,
        active: bool,
        source: &str,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::ApplyCondition {
            condition: condition.to_string(),
            active,
            source: source.to_string(),
        };
        self.dispatch_keyed(id, key, action).await
    }

    pub async fn set_companion_state(
        &self,
        id: EntityId,
        state: CompanionState,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        self.dispatch_keyed(id, key, Action::SetCompanionState { state })
            .await
    }

    pub async fn dismiss_companion(
        &self,
        id: EntityId,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        self.dispatch_keyed(id, key, Action::DismissCompanion).await
    }

    pub async fn consume_resource(
        &self,
        id: EntityId,
        resource: &str,
        amount: u32,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::ConsumeResource {
            resource: resource.to_string(),
            amount,
        };
        self.dispatch_keyed(id, key, action).await
    }

    pub async fn prepare_spells(
        &self,
        id: EntityId,
        spells: &[&str],
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::PrepareSpells {
            spells: spells.iter().map(|s| s.to_string()).collect(),
        };
        self.dispatch_keyed(id, key, action).await
    }

    pub async fn gain_experience(
        &self,
        id: EntityId,
        amount: u32,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        self.dispatch_keyed(id, key, Action::GainExperience { amount })
            .await
    }

    pub async fn short_rest(
        &self,
        id: EntityId,
        hit_dice: u8,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        self.dispatch_keyed(id, key, Action::ShortRest { hit_dice })
            .await
    }

    pub async fn long_rest(&self, id: EntityId, key: Option<&str>) -> Result<ActionOutcome, RulesError> {
        self.dispatch_keyed(id, key, Action::LongRest).await
    }

    pub async fn death_save(
        &self,
        id: EntityId,
        mode: Advantage,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        self.dispatch_keyed(id, key, Action::DeathSave { mode }).await
    }

    pub async fn grant_temp_hp(
        &self,
        id: EntityId,
        amount: u32,
        source: &str,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::GrantTempHp {
            amount,
            source: source.to_string(),
        };
        self.dispatch_keyed(id, key, action).await
    }

    /// Commit a ready wizard. On success the wizard is marked committed.
    pub async fn commit_level_up(
        &self,
        wizard: &mut LevelUpWizard,
        key: Option<&str>,
    ) -> Result<ActionOutcome, RulesError> {
        let action = Action::CommitLevelUp {
            wizard: Box::new(wizard.clone()),
        };
        let outcome = self
            .dispatch_keyed(wizard.character_id, key, action)
            .await?;
        wizard.step = leveling::LevelUpStep::Committed;
        Ok(outcome)
    }
}

/// Ranger level that drives companion scaling.
fn ranger_level(owner: &Character) -> u8 {
    if owner.class == CharacterClass::Ranger {
        owner.level
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_fighter, sample_ranger, sample_wizard};

    fn engine() -> RulesEngine {
        RulesEngine::new(EngineConfig::default())
    }

    fn hp(outcome: ActionOutcome) -> HpChange {
        match outcome {
            ActionOutcome::HpChanged(change) => change,
            other => panic!("expected hp change, got {other:?}"),
        }
    }

    #[test]
    fn test_action_wire_format() {
        let action: Action =
            serde_json::from_str(r#"{"kind": "modify_hp", "amount": -5, "source": "goblin"}"#)
                .unwrap();
        assert_eq!(
            action,
            Action::ModifyHp {
                amount: -5,
                source: "goblin".into()
            }
        );
        let action: Action = serde_json::from_str(
            r#"{"kind": "roll_check", "check": "skill", "target": "stealth", "mode": "advantage"}"#,
        )
        .unwrap();
        assert_eq!(action.name(), "roll_check");
        assert!(serde_json::from_str::<Action>(r#"{"kind": "teleport"}"#).is_err());
        let json = serde_json::to_value(Action::LongRest).unwrap();
        assert_eq!(json["kind"], "long_rest");
    }

    #[test]
    fn test_hp_clamps_and_knocks_out() {
        let mut fighter = sample_fighter();
        let max = fighter.max_hp;
        let change = apply_hp_change(&mut fighter, -(max as i32 + 5), "ogre", DeathRule::MassiveDamage)
            .unwrap();
        assert_eq!(change.applied, -(max as i32));
        assert_eq!(fighter.current_hp, 0);
        assert!(change.became_unconscious);
        assert!(!fighter.is_dead());

        let change = apply_hp_change(&mut fighter, 100, "potion", DeathRule::MassiveDamage).unwrap();
        assert_eq!(change.new_hp, max);
        assert_eq!(change.applied, max as i32);
        assert!(change.regained_consciousness);
        fighter.check_invariants().unwrap();
    }

    #[test]
    fn test_hp_death_rule() {
        let mut fighter = sample_fighter();
        let max = fighter.max_hp as i32;
        apply_hp_change(&mut fighter, -max, "ogre", DeathRule::MassiveDamage).unwrap();
        let change = apply_hp_change(&mut fighter, -(max - 1), "ogre", DeathRule::MassiveDamage).unwrap();
        assert!(!change.died);
        let change = apply_hp_change(&mut fighter, -max, "ogre", DeathRule::MassiveDamage).unwrap();
        assert!(change.died);
        assert!(fighter.is_dead());
        fighter.check_invariants().unwrap();

        let err = apply_hp_change(&mut fighter, 5, "cleric", DeathRule::MassiveDamage).unwrap_err();
        assert_eq!(err.kind(), "entity_unavailable");
        let change = apply_hp_change(&mut fighter, -5, "ogre", DeathRule::MassiveDamage).unwrap();
        assert_eq!(change.applied, 0);

        let mut fighter = sample_fighter();
        apply_hp_change(&mut fighter, -(max * 3), "ogre", DeathRule::Never).unwrap();
        apply_hp_change(&mut fighter, -(max * 3), "ogre", DeathRule::Never).unwrap();
        assert!(!fighter.is_dead());
    }

    fn d20(face: u32) -> DiceRoll {
        DiceRoll {
            count: 1,
            sides: 20,
            mode: Advantage::Normal,
            rolls: vec![face],
            dropped: Vec::new(),
            kept: vec![face],
            modifier: 0,
            total: face as i32,
        }
    }

    fn knocked_out() -> Character {
        let mut fighter = sample_fighter();
        let max = fighter.max_hp as i32;
        apply_hp_change(&mut fighter, -max, "ogre", DeathRule::MassiveDamage).unwrap();
        fighter
    }

    #[test]
    fn test_death_saves_stabilize() {
        let mut fighter = knocked_out();
        let save = record_death_save(&mut fighter, d20(12)).unwrap();
        assert_eq!(save.result, DeathSaveResult::Success);
        assert_eq!(record_death_save(&mut fighter, d20(9)).unwrap().result, DeathSaveResult::Failure);
        assert_eq!(record_death_save(&mut fighter, d20(15)).unwrap().result, DeathSaveResult::Success);
        let save = record_death_save(&mut fighter, d20(10)).unwrap();
        assert_eq!(save.result, DeathSaveResult::Stabilized);
        assert!(save.death_saves.stable);
        assert_eq!(save.current_hp, 0);
        assert!(fighter.is_unconscious());
        fighter.check_invariants().unwrap();

        let err = record_death_save(&mut fighter, d20(11)).unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        // A new hit reopens the saves
        let change = apply_hp_change(&mut fighter, -2, "goblin", DeathRule::MassiveDamage).unwrap();
        assert!(!change.died);
        assert_eq!(fighter.death_saves.failures, 1);
        assert!(!fighter.death_saves.stable);

        apply_hp_change(&mut fighter, 5, "potion", DeathRule::MassiveDamage).unwrap();
        assert!(fighter.death_saves.is_clear());
        fighter.check_invariants().unwrap();
    }

    #[test]
    fn test_death_save_naturals() {
        let mut fighter = knocked_out();
        assert_eq!(record_death_save(&mut fighter, d20(1)).unwrap().result, DeathSaveResult::Failure);
        assert_eq!(fighter.death_saves.failures, 2);

        let save = record_death_save(&mut fighter, d20(20)).unwrap();
        assert_eq!(save.result, DeathSaveResult::Revived);
        assert_eq!(fighter.current_hp, 1);
        assert!(!fighter.is_unconscious());
        assert!(fighter.death_saves.is_clear());
        fighter.check_invariants().unwrap();
        let err = record_death_save(&mut fighter, d20(5)).unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        let mut fighter = knocked_out();
        record_death_save(&mut fighter, d20(1)).unwrap();
        let save = record_death_save(&mut fighter, d20(3)).unwrap();
        assert_eq!(save.result, DeathSaveResult::Died);
        assert_eq!(save.death_saves.failures, DEATH_SAVES_TO_SETTLE);
        assert!(fighter.is_dead());
        fighter.check_invariants().unwrap();
        let err = record_death_save(&mut fighter, d20(20)).unwrap_err();
        assert_eq!(err.kind(), "entity_unavailable");
    }

    #[test]
    fn test_hits_at_zero_fail_death_saves() {
        let mut fighter = knocked_out();
        for _ in 0..2 {
            let change = apply_hp_change(&mut fighter, -1, "rat", DeathRule::MassiveDamage).unwrap();
            assert!(!change.died);
        }
        let change = apply_hp_change(&mut fighter, -1, "rat", DeathRule::MassiveDamage).unwrap();
        assert!(change.died);
        fighter.check_invariants().unwrap();

        let mut fighter = knocked_out();
        for _ in 0..5 {
            apply_hp_change(&mut fighter, -1, "rat", DeathRule::Never).unwrap();
        }
        assert!(!fighter.is_dead());
        assert!(fighter.death_saves.is_clear());
    }

    #[test]
    fn test_temp_hp_soaks_damage() {
        let mut fighter = sample_fighter();
        let max = fighter.max_hp;
        let grant = grant_temp_hp(&mut fighter, 5, "false life").unwrap();
        assert_eq!(grant.temp_hp, 5);
        let grant = grant_temp_hp(&mut fighter, 3, "inspiring leader").unwrap();
        assert_eq!(grant.old_temp_hp, 5);
        assert_eq!(grant.temp_hp, 5);
        assert_eq!(grant_temp_hp(&mut fighter, 0, "nothing").unwrap_err().kind(), "invalid_parameter");

        let change = apply_hp_change(&mut fighter, -3, "goblin", DeathRule::MassiveDamage).unwrap();
        assert_eq!(change.temp_hp_absorbed, 3);
        assert_eq!(change.temp_hp, 2);
        assert_eq!(change.applied, 0);
        assert_eq!(change.new_hp, max);

        let change = apply_hp_change(&mut fighter, -6, "goblin", DeathRule::MassiveDamage).unwrap();
        assert_eq!(change.temp_hp_absorbed, 2);
        assert_eq!(change.temp_hp, 0);
        assert_eq!(change.applied, -4);
        assert_eq!(fighter.current_hp, max - 4);

        // Healing never restores temporary hit points
        let change = apply_hp_change(&mut fighter, 10, "potion", DeathRule::MassiveDamage).unwrap();
        assert_eq!(change.temp_hp, 0);
        assert_eq!(change.temp_hp_absorbed, 0);
    }

    #[test]
    fn test_hp_zero_amount_rejected() {
        let mut fighter = sample_fighter();
        let err = apply_hp_change(&mut fighter, 0, "nothing", DeathRule::default()).unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }

    #[test]
    fn test_exhaustion_steps() {
        let mut conditions = Vec::new();
        for expected in 1..=5 {
            let (change, fatal) = toggle_condition(&mut conditions, Condition::Exhaustion(1), true, "march");
            assert_eq!(change.exhaustion_level, Some(expected));
            assert!(!fatal);
        }
        let (_, fatal) = toggle_condition(&mut conditions, Condition::Exhaustion(1), true, "march");
        assert!(fatal);
        let (change, _) = toggle_condition(&mut conditions, Condition::Exhaustion(1), false, "rest");
        assert_eq!(change.exhaustion_level, Some(5));
    }

    #[test]
    fn test_condition_mode() {
        let poisoned = vec![ActiveCondition::new(Condition::Poisoned, "spider")];
        assert_eq!(condition_mode(&poisoned, CheckKind::Skill), Advantage::Disadvantage);
        assert_eq!(condition_mode(&poisoned, CheckKind::Save), Advantage::Normal);
        let tired = vec![ActiveCondition::new(Condition::Exhaustion(3), "march")];
        assert_eq!(condition_mode(&tired, CheckKind::Save), Advantage::Disadvantage);
    }

    #[tokio::test]
    async fn test_cast_spell_consumes_slot() {
        let engine = engine();
        let wizard = engine.create_character(sample_wizard()).unwrap();
        let outcome = engine
            .cast_spell(wizard.id, "magic missile", None, Some("cast-1"))
            .await
            .unwrap();
        let ActionOutcome::SpellCast(cast) = outcome else {
            panic!("expected spell cast");
        };
        assert_eq!(cast.spell, "Magic Missile");
        assert_eq!(cast.slot_level, Some(1));
        assert_eq!(cast.slots_remaining, Some(1));
        assert_eq!(cast.damage_dice.as_deref(), Some("3d4"));

        let summary = engine.spell_summary(wizard.id).unwrap();
        assert_eq!(summary.slots_remaining[0], 1);
    }

    #[tokio::test]
    async fn test_upcast_scales_catalog_dice() {
        let engine = engine();
        let mut wizard = sample_wizard();
        wizard.level = 3;
        wizard.resources.hit_dice.total = 3;
        wizard.resources.hit_dice.remaining = 3;
        if let Some(casting) = wizard.spellcasting.as_mut() {
            casting.slots = crate::character::SpellSlots::full(tables::spell_slots(casting.caster_type, 3));
            if let Some(spell) = casting.find_spell_mut("Thunderwave") {
                spell.prepared = true;
            }
        }
        let id = engine.create_character(wizard).unwrap().id;

        let outcome = engine.cast_spell(id, "Thunderwave", Some(2), None).await.unwrap();
        let ActionOutcome::SpellCast(cast) = outcome else {
            panic!("expected spell cast");
        };
        assert_eq!(cast.slot_level, Some(2));
        assert_eq!(cast.damage_dice.as_deref(), Some("3d8"));
        assert_eq!(cast.upcast.as_deref(), Some("+1d8 for each slot level above 1st"));

        // Effects that are not extra dice only travel as the note
        let outcome = engine.cast_spell(id, "Magic Missile", Some(2), None).await.unwrap();
        let ActionOutcome::SpellCast(cast) = outcome else {
            panic!("expected spell cast");
        };
        assert_eq!(cast.damage_dice.as_deref(), Some("3d4"));
        assert_eq!(
            cast.upcast.as_deref(),
            Some("one additional dart for each slot level above 1st")
        );
    }

    #[tokio::test]
    async fn test_cast_spell_errors() {
        let engine = engine();
        let wizard = engine.create_character(sample_wizard()).unwrap();
        let err = engine
            .cast_spell(wizard.id, "Fireball", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "spell_not_prepared");
        let err = engine
            .cast_spell(wizard.id, "Magic Missile", Some(0), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
        let err = engine
            .cast_spell(wizard.id, "Magic Missile", Some(2), None)
            .await
            .unwrap_err();
        assert_eq!(err, RulesError::InsufficientSlots { level: 2 });

        for _ in 0..2 {
            engine
                .cast_spell(wizard.id, "Magic Missile", None, None)
                .await
                .unwrap();
        }
        let err = engine
            .cast_spell(wizard.id, "Magic Missile", None, None)
            .await
            .unwrap_err();
        assert_eq!(err, RulesError::InsufficientSlots { level: 1 });

        // Cantrips never need a slot.
        engine
            .cast_spell(wizard.id, "Fire Bolt", None, None)
            .await
            .unwrap();

        let fighter = engine.create_character(sample_fighter()).unwrap();
        let err = engine
            .cast_spell(fighter.id, "Magic Missile", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "spell_not_prepared");
    }

    #[tokio::test]
    async fn test_prepare_spells() {
        let engine = engine();
        let wizard = engine.create_character(sample_wizard()).unwrap();
        let outcome = engine
            .prepare_spells(wizard.id, &["Shield", "magic missile"], None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::SpellsPrepared {
                prepared: vec!["Shield".into(), "Magic Missile".into()]
            }
        );
        let summary = engine.spell_summary(wizard.id).unwrap();
        assert_eq!(summary.prepared.len(), 2);

        let err = engine
            .prepare_spells(wizard.id, &["Cure Wounds"], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
        let too_many = ["Shield", "Magic Missile", "Mage Armor", "Detect Magic", "Sleep"];
        assert!(engine.prepare_spells(wizard.id, &too_many, None).await.is_err());

        let fighter = engine.create_character(sample_fighter()).unwrap();
        assert!(engine.prepare_spells(fighter.id, &["Shield"], None).await.is_err());
    }

    #[tokio::test]
    async fn test_conditions_through_engine() {
        let engine = engine();
        let fighter = engine.create_character(sample_fighter()).unwrap();
        let err = engine
            .apply_condition(fighter.id, "sleepy", true, "bard", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_condition");
        let err = engine
            .apply_condition(fighter.id, "unconscious", true, "bard", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        engine
            .apply_condition(fighter.id, "Poisoned", true, "spider", None)
            .await
            .unwrap();
        assert!(engine
            .get_character(fighter.id)
            .unwrap()
            .has_condition(&Condition::Poisoned));
        let outcome = engine
            .apply_condition(fighter.id, "poisoned", false, "antitoxin", None)
            .await
            .unwrap();
        let ActionOutcome::ConditionChanged(change) = outcome else {
            panic!("expected condition change");
        };
        assert!(change.changed);
    }

    #[tokio::test]
    async fn test_consume_resource() {
        let engine = engine();
        let fighter = engine.create_character(sample_fighter()).unwrap();
        let outcome = engine
            .consume_resource(fighter.id, "Second Wind", 1, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::ResourceConsumed {
                resource: "Second Wind".into(),
                amount: 1,
                remaining: 0
            }
        );
        let err = engine
            .consume_resource(fighter.id, "second wind", 1, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RulesError::InsufficientResource {
                resource: "Second Wind".into(),
                requested: 1,
                available: 0
            }
        );
        let err = engine
            .consume_resource(fighter.id, "ki", 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
        engine
            .consume_resource(fighter.id, "hit_dice", 1, None)
            .await
            .unwrap();
        assert_eq!(
            engine.get_character(fighter.id).unwrap().resources.hit_dice.remaining,
            0
        );
    }

    #[tokio::test]
    async fn test_gain_experience() {
        let engine = engine();
        let fighter = engine.create_character(sample_fighter()).unwrap();
        let outcome = engine.gain_experience(fighter.id, 300, None).await.unwrap();
        let ActionOutcome::ExperienceGained(gain) = outcome else {
            panic!("expected experience");
        };
        assert_eq!(gain.total, 300);
        assert!(gain.level_up_available);
        assert_eq!(gain.next_level_at, Some(300));
        assert!(engine.gain_experience(fighter.id, 0, None).await.is_err());
    }

    #[tokio::test]
    async fn test_companion_lifecycle() {
        let engine = engine();
        let ranger = engine.create_character(sample_ranger()).unwrap();
        let wolf = engine.acquire_companion(ranger.id, "Wolf", "Grey").unwrap();
        assert_eq!(engine.companions_of(ranger.id).len(), 1);
        assert!(engine.acquire_companion(ranger.id, "Dragon", "Smaug").is_err());

        let err = engine
            .set_companion_state(wolf.id, CompanionState::Active, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        engine
            .set_companion_state(wolf.id, CompanionState::Unconscious, None)
            .await
            .unwrap();
        let outcome = engine
            .set_companion_state(wolf.id, CompanionState::Active, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::CompanionStateChanged {
                old_state: CompanionState::Unconscious,
                new_state: CompanionState::Active,
                current_hp: 1
            }
        );

        let err = engine
            .set_companion_state(ranger.id, CompanionState::Dead, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
        let err = engine
            .cast_spell(wolf.id, "Cure Wounds", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        engine.dismiss_companion(wolf.id, None).await.unwrap();
        let err = engine.modify_hp(wolf.id, -1, "trap", None).await.unwrap_err();
        assert_eq!(err.kind(), "entity_unavailable");
    }

    #[tokio::test]
    async fn test_companion_death_is_terminal() {
        let engine = engine();
        let ranger = engine.create_character(sample_ranger()).unwrap();
        let wolf = engine.acquire_companion(ranger.id, "wolf", "Grey").unwrap();
        engine
            .set_companion_state(wolf.id, CompanionState::Dead, None)
            .await
            .unwrap();
        let err = engine
            .set_companion_state(wolf.id, CompanionState::Active, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "entity_unavailable");
        let err = engine.modify_hp(wolf.id, 5, "potion", None).await.unwrap_err();
        assert_eq!(err.kind(), "entity_unavailable");
        let err = engine.long_rest(wolf.id, None).await.unwrap_err();
        assert_eq!(err.kind(), "entity_unavailable");
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let engine = engine();
        let err = engine
            .modify_hp(EntityId::new(), -1, "ghost", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_modify_hp_through_engine() {
        let engine = engine();
        let fighter = engine.create_character(sample_fighter()).unwrap();
        let change = hp(engine.modify_hp(fighter.id, -3, "rat", None).await.unwrap());
        assert_eq!(change.new_hp, fighter.max_hp - 3);
        assert_eq!(engine.get_character(fighter.id).unwrap().current_hp, fighter.max_hp - 3);
    }

    fn ranger_at_six() -> Character {
        let mut ranger = sample_ranger();
        ranger.level = 6;
        ranger.experience = tables::xp_for_level(6).unwrap_or(0);
        ranger.max_hp = 52;
        ranger.current_hp = 52;
        ranger.resources.hit_dice.total = 6;
        ranger.resources.hit_dice.remaining = 6;
        ranger.resources.features = ranger.class.limited_features(6, &ranger.ability_scores);
        if let Some(casting) = ranger.spellcasting.as_mut() {
            casting.slots = crate::character::SpellSlots::full(tables::spell_slots(casting.caster_type, 6));
        }
        ranger
    }

    fn ready_to_level(engine: &RulesEngine, ranger: EntityId) -> LevelUpWizard {
        let mut wizard = engine.begin_level_up(ranger).unwrap();
        wizard.take_average_hp().unwrap();
        wizard.learn_spells(&["Hail of Thorns"]).unwrap();
        wizard
    }

    fn levelled(outcome: ActionOutcome) -> LevelUpOutcome {
        match outcome {
            ActionOutcome::LevelledUp(outcome) => *outcome,
            other => panic!("expected level up, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_held_companion_is_reported_pending() {
        let engine = RulesEngine::new(
            EngineConfig::default().with_lock_timeout(std::time::Duration::from_millis(20)),
        );
        let ranger = engine.create_character(ranger_at_six()).unwrap().id;
        let wolf = engine.acquire_companion(ranger, "Wolf", "Fang").unwrap().id;
        let mut wizard = ready_to_level(&engine, ranger);

        let slot = engine.companions.slot(wolf).unwrap();
        let held = slot.lock().await;
        let outcome = levelled(engine.commit_level_up(&mut wizard, Some("r7")).await.unwrap());
        assert!(outcome.companions_rescaled.is_empty());
        assert_eq!(outcome.companions_pending, vec![wolf]);
        assert_eq!(engine.get_character(ranger).unwrap().level, 7);
        assert_eq!(engine.get_companion(wolf).unwrap().owner_ranger_level, 6);
        drop(held);

        // Retrying the same commit finishes what was left
        let outcome = levelled(engine.commit_level_up(&mut wizard, Some("r7")).await.unwrap());
        assert_eq!(outcome.companions_rescaled, vec![wolf]);
        assert!(outcome.companions_pending.is_empty());
        assert_eq!(engine.get_character(ranger).unwrap().level, 7);
        let fang = engine.get_companion(wolf).unwrap();
        assert_eq!(fang.owner_ranger_level, 7);
        assert_eq!(fang.max_hp(), 16);
    }

    #[tokio::test]
    async fn test_rescale_companions_catches_up() {
        let engine = RulesEngine::new(
            EngineConfig::default().with_lock_timeout(std::time::Duration::from_millis(20)),
        );
        let ranger = engine.create_character(ranger_at_six()).unwrap().id;
        let wolf = engine.acquire_companion(ranger, "Wolf", "Fang").unwrap().id;
        let mut wizard = ready_to_level(&engine, ranger);

        let slot = engine.companions.slot(wolf).unwrap();
        let held = slot.lock().await;
        let outcome = levelled(engine.commit_level_up(&mut wizard, None).await.unwrap());
        assert_eq!(outcome.companions_pending, vec![wolf]);
        drop(held);

        let sync = engine.rescale_companions(ranger).await.unwrap();
        assert_eq!(sync.owner_ranger_level, 7);
        assert_eq!(sync.rescaled, vec![wolf]);
        assert!(sync.pending.is_empty());
        assert_eq!(engine.get_companion(wolf).unwrap().max_hp(), 16);

        // Nothing left to do
        let sync = engine.rescale_companions(ranger).await.unwrap();
        assert!(sync.rescaled.is_empty());

        let fighter = engine.create_character(sample_fighter()).unwrap().id;
        let err = engine.rescale_companions(fighter).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }

    #[tokio::test]
    async fn test_death_saves_through_engine() {
        let engine = engine();
        let fighter = engine.create_character(sample_fighter()).unwrap();
        let err = engine.death_save(fighter.id, Advantage::Normal, None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        engine
            .modify_hp(fighter.id, -(fighter.max_hp as i32), "ogre", None)
            .await
            .unwrap();
        // Each roll moves a counter, so this settles within five rolls.
        let mut last = None;
        for _ in 0..5 {
            let outcome = engine.death_save(fighter.id, Advantage::Normal, None).await.unwrap();
            let ActionOutcome::DeathSaveRolled(save) = outcome else {
                panic!("expected death save, got {outcome:?}");
            };
            let natural = save.roll.natural().unwrap();
            assert!((1..=20).contains(&natural));
            let settled = !matches!(save.result, DeathSaveResult::Success | DeathSaveResult::Failure);
            last = Some(save.result);
            if settled {
                break;
            }
        }
        let current = engine.get_character(fighter.id).unwrap();
        match last.unwrap() {
            DeathSaveResult::Revived => assert_eq!(current.current_hp, 1),
            DeathSaveResult::Stabilized => assert!(current.death_saves.stable),
            DeathSaveResult::Died => assert!(current.is_dead()),
            other => panic!("saves did not settle: {other:?}"),
        }
        current.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_companions_have_no_death_saves() {
        let engine = engine();
        let ranger = engine.create_character(sample_ranger()).unwrap();
        let wolf = engine.acquire_companion(ranger.id, "wolf", "Grey").unwrap();
        let err = engine.death_save(wolf.id, Advantage::Normal, None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
        let err = engine.grant_temp_hp(wolf.id, 5, "heroism", None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");

        let outcome = engine.grant_temp_hp(ranger.id, 5, "heroism", Some("t1")).await.unwrap();
        let ActionOutcome::TempHpGranted(grant) = outcome else {
            panic!("expected temp hp, got {outcome:?}");
        };
        assert_eq!(grant.temp_hp, 5);
        engine.long_rest(ranger.id, None).await.unwrap();
        assert_eq!(engine.get_character(ranger.id).unwrap().temp_hp, 0);
    }
}
