//! D&D 5e rules engine.
//!
//! This crate provides:
//! - Dice notation and advantage/disadvantage resolution
//! - Rule tables (proficiency, slots, XP thresholds, companion scaling)
//! - A per-entity serialized store with idempotent mutations
//! - A tagged-union action dispatcher over characters and companions
//! - The level-up wizard, short and long rests, and ranger companions
//! - Character creation, roster persistence and a JSON request surface
//!
//! Every mutation is validated against the entity's invariants before it
//! is committed; a rejected action leaves no trace.
//!
//! # Quick Start
//!
//! ```ignore
//! use dnd_rules::{Action, ActionRequest, EngineConfig, RulesEngine};
//! use dnd_rules::testing::sample_fighter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = RulesEngine::new(EngineConfig::from_env()?);
//!     let hero = engine.create_character(sample_fighter())?.id;
//!
//!     let hit = ActionRequest::new(hero, Action::ModifyHp { amount: -5, source: "goblin".into() })
//!         .with_key("round-1-goblin");
//!     let outcome = engine.dispatch(hit).await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome)?);
//!
//!     engine.save_roster("roster.json").await?;
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod character_builder;
pub mod class_data;
pub mod companion;
pub mod config;
pub mod dice;
pub mod error;
pub mod headless;
pub mod leveling;
pub mod persist;
pub mod rest;
pub mod rules;
pub mod spells;
pub mod store;
pub mod tables;
pub mod testing;

// Primary public API
pub use character::{Ability, Character, CharacterClass, Condition, EntityId, Race, Skill};
pub use character_builder::{AbilityMethod, BuilderError, CharacterBuilder};
pub use companion::{Companion, CompanionState};
pub use config::EngineConfig;
pub use dice::{Advantage, DiceNotation, DiceRoll};
pub use error::{ErrorBody, RulesError};
pub use headless::{HeadlessConfig, HeadlessEngine};
pub use leveling::{LevelUpOutcome, LevelUpWizard};
pub use persist::{PersistError, SavedRoster};
pub use rest::{RestKind, RestOutcome};
pub use rules::{
    Action, ActionOutcome, ActionRequest, CompanionSync, Response, RulesEngine, Status,
};
pub use tables::DeathRule;
pub use testing::TestHarness;
