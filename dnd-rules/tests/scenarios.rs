//! End-to-end rules scenarios through the public engine API.
//!
//! Run with: `cargo test -p dnd-rules --test scenarios`

use dnd_rules::character::Condition;
use dnd_rules::dice::Advantage;
use dnd_rules::rules::{Action, ActionOutcome, ActionRequest, CheckKind, RulesEngine};
use dnd_rules::tables::DeathRule;
use dnd_rules::testing::{
    assert_condition, assert_hp, assert_no_condition, assert_slots, sample_fighter, sample_rogue,
    sample_wizard, TestHarness,
};
use dnd_rules::EngineConfig;
use proptest::prelude::*;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Show engine logs with `RUST_LOG=dnd_rules=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn hit(amount: i32, source: &str) -> Action {
    Action::ModifyHp {
        amount,
        source: source.to_string(),
    }
}

// =============================================================================
// Goblin sword
// =============================================================================

#[tokio::test]
async fn test_goblin_sword_knocks_out_without_killing() {
    init_tracing();
    let mut fighter = sample_fighter();
    fighter.max_hp = 20;
    fighter.current_hp = 20;
    let harness = TestHarness::with_character(fighter);

    let outcome = harness.act(hit(-25, "goblin sword")).await.unwrap();
    let ActionOutcome::HpChanged(change) = outcome else {
        panic!("expected hp change, got {outcome:?}");
    };
    assert_eq!(change.requested, -25);
    assert_eq!(change.applied, -20);
    assert_eq!(change.old_hp, 20);
    assert_eq!(change.new_hp, 0);
    assert!(change.became_unconscious);
    assert!(!change.died);

    assert_hp(&harness, 0, 20);
    assert_condition(&harness, Condition::Unconscious);
    assert_no_condition(&harness, Condition::Dead);

    // Healing brings them back
    harness.act(hit(3, "potion")).await.unwrap();
    assert_hp(&harness, 3, 20);
    assert_no_condition(&harness, Condition::Unconscious);
}

#[tokio::test]
async fn test_massive_damage_at_zero_kills() {
    let harness = TestHarness::new();
    harness.act(hit(-12, "ogre")).await.unwrap();
    let outcome = harness.act(hit(-12, "ogre")).await.unwrap();
    let ActionOutcome::HpChanged(change) = outcome else {
        panic!("expected hp change, got {outcome:?}");
    };
    assert!(change.died);
    assert_condition(&harness, Condition::Dead);
    assert_no_condition(&harness, Condition::Unconscious);

    let err = harness.act(hit(5, "cleric")).await.unwrap_err();
    assert_eq!(err.kind(), "entity_unavailable");
}

// =============================================================================
// Wizard slots
// =============================================================================

#[tokio::test]
async fn test_wizard_casts_magic_missile() {
    let harness = TestHarness::with_character(sample_wizard());
    assert_slots(&harness, 1, 2);

    let outcome = harness
        .act(Action::CastSpell {
            spell_name: "Magic Missile".into(),
            slot_level: None,
        })
        .await
        .unwrap();
    let ActionOutcome::SpellCast(cast) = outcome else {
        panic!("expected spell cast, got {outcome:?}");
    };
    assert_eq!(cast.slot_level, Some(1));
    assert_eq!(cast.slots_remaining, Some(1));
    assert_eq!(cast.times_cast_today, Some(1));
    assert!(cast.damage_dice.is_some());
    assert_slots(&harness, 1, 1);

    let spell = harness
        .character()
        .spellcasting
        .as_ref()
        .and_then(|c| c.find_spell("Magic Missile").cloned())
        .unwrap();
    assert_eq!(spell.times_cast_today, 1);

    // Second slot, then nothing left
    harness
        .act(Action::CastSpell {
            spell_name: "Shield".into(),
            slot_level: None,
        })
        .await
        .unwrap();
    let err = harness
        .act(Action::CastSpell {
            spell_name: "Magic Missile".into(),
            slot_level: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "insufficient_slots");
    assert_slots(&harness, 1, 0);
}

#[tokio::test]
async fn test_unprepared_spell_is_refused() {
    let harness = TestHarness::with_character(sample_wizard());
    let err = harness
        .act(Action::CastSpell {
            spell_name: "Thunderwave".into(),
            slot_level: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "spell_not_prepared");
    assert_slots(&harness, 1, 2);
}

// =============================================================================
// Stealth with advantage
// =============================================================================

#[tokio::test]
async fn test_stealth_with_advantage() {
    let harness = TestHarness::with_character(sample_rogue());
    for _ in 0..20 {
        let outcome = harness
            .engine
            .roll_check(harness.hero, CheckKind::Skill, "Stealth", Advantage::Advantage, None)
            .await
            .unwrap();
        let ActionOutcome::CheckRolled(check) = outcome else {
            panic!("expected check, got {outcome:?}");
        };
        assert_eq!(check.target, "Stealth");
        assert_eq!(check.modifier, 7);
        let roll = &check.roll;
        assert_eq!(roll.rolls.len(), 2);
        let high = *roll.rolls.iter().max().unwrap();
        let low = *roll.rolls.iter().min().unwrap();
        assert_eq!(roll.kept, vec![high]);
        assert_eq!(roll.dropped, vec![low]);
        assert_eq!(roll.total, high as i32 + 7);
    }
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn test_duplicate_request_applies_once() {
    init_tracing();
    let harness = TestHarness::new();
    let first = harness.act_keyed("round-1-goblin", hit(-5, "goblin")).await.unwrap();
    let second = harness.act_keyed("round-1-goblin", hit(-5, "goblin")).await.unwrap();
    assert_eq!(first, second);
    assert_hp(&harness, 7, 12);

    harness.act_keyed("round-2-goblin", hit(-5, "goblin")).await.unwrap();
    assert_hp(&harness, 2, 12);
}

#[tokio::test]
async fn test_failed_request_is_not_remembered() {
    let harness = TestHarness::with_character(sample_wizard());
    let cast = || Action::CastSpell {
        spell_name: "Magic Missile".into(),
        slot_level: Some(2),
    };
    // No 2nd level slots at level 1
    assert!(harness.act_keyed("mm", cast()).await.is_err());

    let fixed = Action::CastSpell {
        spell_name: "Magic Missile".into(),
        slot_level: Some(1),
    };
    assert!(harness.act_keyed("mm", fixed).await.is_ok());
    assert_slots(&harness, 1, 1);
}

#[tokio::test]
async fn test_same_key_on_different_entities_is_independent() {
    let engine = RulesEngine::default();
    let a = engine.create_character(sample_fighter()).unwrap().id;
    let b = engine.create_character(sample_fighter()).unwrap().id;
    engine.modify_hp(a, -3, "trap", Some("k")).await.unwrap();
    engine.modify_hp(b, -3, "trap", Some("k")).await.unwrap();
    assert_eq!(engine.get_character(a).unwrap().current_hp, 9);
    assert_eq!(engine.get_character(b).unwrap().current_hp, 9);
}

#[tokio::test]
async fn test_unknown_entity() {
    let engine = RulesEngine::default();
    let err = engine
        .dispatch(ActionRequest::new(dnd_rules::EntityId::new(), Action::LongRest))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_hp_changes_serialize() {
    init_tracing();
    let mut fighter = sample_fighter();
    fighter.max_hp = 200;
    fighter.current_hp = 100;
    let engine = Arc::new(RulesEngine::default());
    let id = engine.create_character(fighter).unwrap().id;

    let mut tasks = Vec::new();
    for i in 0..40 {
        let engine = Arc::clone(&engine);
        let amount = if i % 2 == 0 { -3 } else { 2 };
        tasks.push(tokio::spawn(async move {
            engine.modify_hp(id, amount, "swarm", None).await
        }));
    }

    for result in futures::future::join_all(tasks).await {
        let outcome = result.expect("task panicked").expect("change rejected");
        let ActionOutcome::HpChanged(change) = outcome else {
            panic!("expected hp change, got {outcome:?}");
        };
        assert_eq!(change.applied, change.requested);
        assert_eq!(change.new_hp as i32, change.old_hp as i32 + change.requested);
    }

    // 20 x -3 and 20 x +2 never clamp from 100
    assert_eq!(engine.get_character(id).unwrap().current_hp, 80);
}

// =============================================================================
// HP invariant
// =============================================================================

fn run_hp_sequence(rule: DeathRule, deltas: Vec<i32>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let config = EngineConfig::default().with_death_rule(rule);
        let harness = TestHarness::with_config(config, sample_fighter());
        for delta in deltas {
            let result = harness.act(hit(delta, "fuzz")).await;
            let character = harness.character();
            let dead = character.has_condition(&Condition::Dead);
            assert!(character.current_hp <= character.max_hp);
            assert_eq!(
                character.has_condition(&Condition::Unconscious),
                character.current_hp == 0 && !dead
            );
            if dead {
                assert_eq!(character.current_hp, 0);
            }
            if delta == 0 {
                assert_eq!(result.unwrap_err().kind(), "invalid_parameter");
            }
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn hp_stays_within_bounds(deltas in prop::collection::vec(-30i32..30, 1..25)) {
        run_hp_sequence(DeathRule::MassiveDamage, deltas);
    }

    #[test]
    fn hp_never_kills_without_death_rule(deltas in prop::collection::vec(-30i32..30, 1..25)) {
        run_hp_sequence(DeathRule::Never, deltas);
    }
}
