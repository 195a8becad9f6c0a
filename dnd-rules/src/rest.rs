//! Short and long rests.

use crate::character::{Ability, ActiveCondition, Character, Condition, DeathSaves, Recharge, Vitals};
use crate::companion::Companion;
use crate::dice::{self, Advantage, DiceRoll};
use crate::error::RulesError;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestKind {
    Short,
    Long,
}

/// What a rest recovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestOutcome {
    pub rest: RestKind,
    pub hp_before: u32,
    pub hp_after: u32,
    /// One roll per hit die spent, each hit die + CON modifier.
    pub hit_dice_rolls: Vec<DiceRoll>,
    pub hit_dice_recovered: u8,
    pub hit_dice_remaining: u8,
    pub slots_restored: bool,
    pub features_recharged: Vec<String>,
    pub conditions_removed: Vec<String>,
    pub exhaustion_level: u8,
}

impl RestOutcome {
    fn new(rest: RestKind, hp: u32) -> Self {
        Self {
            rest,
            hp_before: hp,
            hp_after: hp,
            hit_dice_rolls: Vec::new(),
            hit_dice_recovered: 0,
            hit_dice_remaining: 0,
            slots_restored: false,
            features_recharged: Vec::new(),
            conditions_removed: Vec::new(),
            exhaustion_level: 0,
        }
    }
}

fn ensure_alive<V: Vitals>(target: &V, name: &str) -> Result<(), RulesError> {
    if target.is_dead() {
        return Err(RulesError::EntityUnavailable(format!("{name} is dead and cannot rest")));
    }
    Ok(())
}

pub(crate) fn short_rest(character: &mut Character, hit_dice: u8) -> Result<RestOutcome, RulesError> {
    short_rest_with_rng(character, hit_dice, &mut rand::thread_rng())
}

pub(crate) fn short_rest_with_rng<R: Rng + ?Sized>(
    character: &mut Character,
    hit_dice: u8,
    rng: &mut R,
) -> Result<RestOutcome, RulesError> {
    ensure_alive(character, &character.name)?;
    let pool = &character.resources.hit_dice;
    if hit_dice > pool.remaining {
        return Err(RulesError::InsufficientResource {
            resource: "hit_dice".into(),
            requested: hit_dice as u32,
            available: pool.remaining as u32,
        });
    }
    let mut outcome = RestOutcome::new(RestKind::Short, character.current_hp);

    let sides = pool.die.sides();
    let con = character.modifier(Ability::Constitution) as i32;
    for _ in 0..hit_dice {
        let roll = dice::roll_with_rng(1, sides, con, Advantage::Normal, rng)?;
        let healed = roll.total.max(0) as u32;
        let hp = character.current_hp.saturating_add(healed).min(character.max_hp);
        character.current_hp = hp;
        outcome.hit_dice_rolls.push(roll);
    }
    character.resources.hit_dice.remaining -= hit_dice;
    if character.current_hp > 0 && character.is_unconscious() {
        character.set_unconscious(false, "short rest");
    }

    if let Some(casting) = character.spellcasting.as_mut() {
        if casting.caster_type.recovers_on_short_rest() && !casting.slots.is_full() {
            casting.slots.restore_all();
            outcome.slots_restored = true;
        }
    }
    for feature in character.resources.features.iter_mut() {
        if feature.recharge == Recharge::ShortRest && feature.current < feature.maximum {
            feature.current = feature.maximum;
            outcome.features_recharged.push(feature.name.clone());
        }
    }

    outcome.hp_after = character.current_hp;
    outcome.hit_dice_remaining = character.resources.hit_dice.remaining;
    outcome.exhaustion_level = character.exhaustion_level();
    Ok(outcome)
}

pub(crate) fn long_rest(character: &mut Character) -> Result<RestOutcome, RulesError> {
    ensure_alive(character, &character.name)?;
    let mut outcome = RestOutcome::new(RestKind::Long, character.current_hp);

    let (removed, exhaustion) = recover_conditions(&mut character.conditions);
    outcome.conditions_removed = removed;
    outcome.exhaustion_level = exhaustion;
    character.current_hp = character.max_hp;
    character.temp_hp = 0;
    character.death_saves = DeathSaves::default();

    if let Some(casting) = character.spellcasting.as_mut() {
        outcome.slots_restored = !casting.slots.is_full();
        casting.slots.restore_all();
        for spell in casting.spells.iter_mut() {
            spell.times_cast_today = 0;
        }
    }
    for feature in character.resources.features.iter_mut() {
        if feature.current < feature.maximum {
            feature.current = feature.maximum;
            outcome.features_recharged.push(feature.name.clone());
        }
    }

    let pool = &mut character.resources.hit_dice;
    let recover = (pool.total / 2).max(1).min(pool.total - pool.remaining);
    pool.remaining += recover;
    outcome.hit_dice_recovered = recover;
    outcome.hit_dice_remaining = pool.remaining;
    outcome.hp_after = character.current_hp;
    Ok(outcome)
}

/// Companions have no hit dice or slots, so a short rest changes nothing.
pub(crate) fn companion_short_rest(companion: &Companion) -> Result<RestOutcome, RulesError> {
    ensure_alive(companion, &companion.name)?;
    Ok(RestOutcome::new(RestKind::Short, companion.current_hp))
}

pub(crate) fn companion_long_rest(companion: &mut Companion) -> Result<RestOutcome, RulesError> {
    ensure_alive(companion, &companion.name)?;
    let mut outcome = RestOutcome::new(RestKind::Long, companion.current_hp);
    let (removed, exhaustion) = recover_conditions(&mut companion.conditions);
    outcome.conditions_removed = removed;
    outcome.exhaustion_level = exhaustion;
    let max = companion.max_hp();
    companion.set_current_hp(max);
    companion.set_unconscious(false, "long rest");
    outcome.hp_after = companion.current_hp;
    Ok(outcome)
}

/// Drop rest-clearable conditions and step exhaustion down once.
/// Returns the removed names and the remaining exhaustion level.
fn recover_conditions(conditions: &mut Vec<ActiveCondition>) -> (Vec<String>, u8) {
    let mut removed = Vec::new();
    let mut exhaustion = 0;
    conditions.retain_mut(|active| match active.condition {
        Condition::Exhaustion(level) if level > 1 => {
            active.condition = Condition::Exhaustion(level - 1);
            exhaustion = level - 1;
            true
        }
        Condition::Exhaustion(_) => {
            removed.push(active.condition.name().to_string());
            false
        }
        condition if condition.clears_on_long_rest() => {
            removed.push(condition.name().to_string());
            false
        }
        _ => true,
    });
    (removed, exhaustion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{set_condition, FeatureUses};
    use crate::companion::find_template;
    use crate::testing::{sample_fighter, sample_warlock, sample_wizard};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_short_rest_spends_hit_dice() {
        let mut fighter = sample_fighter();
        fighter.current_hp = 1;
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = short_rest_with_rng(&mut fighter, 1, &mut rng).unwrap();
        assert_eq!(outcome.hit_dice_rolls.len(), 1);
        let healed = outcome.hit_dice_rolls[0].total.max(0) as u32;
        assert_eq!(fighter.current_hp, (1 + healed).min(fighter.max_hp));
        assert_eq!(fighter.resources.hit_dice.remaining, 0);
        fighter.check_invariants().unwrap();
    }

    #[test]
    fn test_short_rest_rejects_missing_hit_dice() {
        let mut fighter = sample_fighter();
        let err = short_rest(&mut fighter, 2).unwrap_err();
        assert_eq!(
            err,
            RulesError::InsufficientResource {
                resource: "hit_dice".into(),
                requested: 2,
                available: 1,
            }
        );
    }

    #[test]
    fn test_short_rest_recharges_short_features_only() {
        let mut fighter = sample_fighter();
        fighter.resources.features = vec![
            FeatureUses {
                current: 0,
                ..FeatureUses::new("Second Wind", 1, Recharge::ShortRest)
            },
            FeatureUses {
                current: 0,
                ..FeatureUses::new("Indomitable", 1, Recharge::LongRest)
            },
        ];
        let outcome = short_rest(&mut fighter, 0).unwrap();
        assert_eq!(outcome.features_recharged, vec!["Second Wind".to_string()]);
        assert_eq!(fighter.resources.features[1].current, 0);
    }

    #[test]
    fn test_short_rest_slots_by_caster() {
        let mut wizard = sample_wizard();
        wizard.spellcasting.as_mut().unwrap().slots.expend(1);
        let outcome = short_rest(&mut wizard, 0).unwrap();
        assert!(!outcome.slots_restored);
        assert_eq!(wizard.spellcasting.as_ref().unwrap().slots.remaining[0], 1);

        let mut warlock = sample_warlock();
        warlock.spellcasting.as_mut().unwrap().slots.expend(1);
        let outcome = short_rest(&mut warlock, 0).unwrap();
        assert!(outcome.slots_restored);
        assert!(warlock.spellcasting.as_ref().unwrap().slots.is_full());
    }

    #[test]
    fn test_long_rest_restores() {
        let mut wizard = sample_wizard();
        {
            let casting = wizard.spellcasting.as_mut().unwrap();
            casting.slots.expend(1);
            casting.spells[0].times_cast_today = 2;
        }
        wizard.current_hp = 0;
        wizard.set_unconscious(true, "ogre");
        set_condition(&mut wizard.conditions, ActiveCondition::new(Condition::Poisoned, "spider"));
        set_condition(&mut wizard.conditions, ActiveCondition::new(Condition::Petrified, "basilisk"));
        set_condition(&mut wizard.conditions, ActiveCondition::new(Condition::Exhaustion(2), "march"));
        wizard.resources.hit_dice.remaining = 0;

        let outcome = long_rest(&mut wizard).unwrap();
        assert_eq!(wizard.current_hp, wizard.max_hp);
        assert!(!wizard.is_unconscious());
        assert!(!wizard.has_condition(&Condition::Poisoned));
        assert!(wizard.has_condition(&Condition::Petrified));
        assert_eq!(wizard.exhaustion_level(), 1);
        assert_eq!(outcome.exhaustion_level, 1);
        assert!(outcome.slots_restored);
        let casting = wizard.spellcasting.as_ref().unwrap();
        assert!(casting.slots.is_full());
        assert_eq!(casting.spells[0].times_cast_today, 0);
        // Half of one hit die rounds down to zero, so at least one comes back.
        assert_eq!(wizard.resources.hit_dice.remaining, 1);
        wizard.check_invariants().unwrap();
    }

    #[test]
    fn test_dead_cannot_rest() {
        let mut wizard = sample_wizard();
        wizard.mark_dead("disintegrate");
        assert_eq!(long_rest(&mut wizard).unwrap_err().kind(), "entity_unavailable");
        assert_eq!(short_rest(&mut wizard, 0).unwrap_err().kind(), "entity_unavailable");
    }

    #[test]
    fn test_companion_long_rest() {
        let template = find_template("Wolf").unwrap();
        let mut wolf = Companion::from_template(template, crate::character::EntityId::new(), "Grey", 3);
        wolf.current_hp = 0;
        wolf.set_unconscious(true, "trap");
        set_condition(&mut wolf.conditions, ActiveCondition::new(Condition::Frightened, "dragon"));
        let outcome = companion_long_rest(&mut wolf).unwrap();
        assert_eq!(outcome.hp_after, wolf.max_hp());
        assert!(!wolf.has_condition(&Condition::Frightened));
        wolf.check_invariants().unwrap();

        let short = companion_short_rest(&wolf).unwrap();
        assert_eq!(short.hp_before, short.hp_after);
    }
}
