//! Headless interface for programmatic use.
//!
//! This module wraps a `RulesEngine` behind the JSON request/response
//! contract. It's designed for:
//! - Transports (HTTP handlers, message queues, tool-call bridges)
//! - Coding agents driving the rules directly
//! - Script-driven sessions and tests
//!
//! # Example
//!
//! ```ignore
//! use dnd_rules::headless::{HeadlessConfig, HeadlessEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let headless = HeadlessEngine::from_env()?;
//!     let hero = headless.create_character(&HeadlessConfig::quick_start("Thorin"))?;
//!
//!     let request = format!(
//!         r#"{{"entity_id": "{hero}", "action": {{"kind": "modify_hp", "amount": -5, "source": "goblin"}}}}"#
//!     );
//!     println!("{}", headless.handle_json(&request).await);
//!
//!     headless.save("roster.json").await?;
//!     Ok(())
//! }
//! ```

use crate::character::{Ability, AbilityScores, Character, CharacterClass, EntityId, Race};
use crate::character_builder::{
    roll_ability_scores, AbilityMethod, BuilderError, CharacterBuilder, STANDARD_ARRAY,
};
use crate::config::EngineConfig;
use crate::error::RulesError;
use crate::persist::{PersistError, RosterMetadata};
use crate::rules::{ActionRequest, Response, RulesEngine, Status};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// Errors from setting up a headless session.
#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("character creation failed: {0}")]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Rules(#[from] RulesError),
}

/// Configuration for a quickly generated character.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Character name.
    pub name: String,
    /// Character race.
    pub race: Race,
    /// Character class.
    pub class: CharacterClass,
    /// Subclass for classes that choose one at level 1. Defaults to the
    /// first listed option.
    pub subclass: Option<String>,
    /// How ability scores are determined.
    pub ability_method: AbilityMethod,
    pub campaign_id: String,
    pub session_id: String,
}

impl HeadlessConfig {
    /// Create a quick-start configuration with sensible defaults.
    ///
    /// Uses Human Fighter with the standard array.
    pub fn quick_start(name: impl Into<String>) -> Self {
        Self::custom(name, Race::Human, CharacterClass::Fighter)
    }

    /// Create a configuration with full customization.
    pub fn custom(name: impl Into<String>, race: Race, class: CharacterClass) -> Self {
        Self {
            name: name.into(),
            race,
            class,
            subclass: None,
            ability_method: AbilityMethod::StandardArray,
            campaign_id: "headless".to_string(),
            session_id: "headless".to_string(),
        }
    }

    /// Set the ability score method.
    pub fn with_ability_method(mut self, method: AbilityMethod) -> Self {
        self.ability_method = method;
        self
    }

    pub fn with_subclass(mut self, subclass: impl Into<String>) -> Self {
        self.subclass = Some(subclass.into());
        self
    }

    /// Set the campaign and session.
    pub fn with_campaign(mut self, campaign_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.campaign_id = campaign_id.into();
        self.session_id = session_id.into();
        self
    }

    /// Build the character from this configuration, taking the first
    /// listed option wherever a choice is required.
    pub fn build_character(&self) -> Result<Character, BuilderError> {
        let class_data = self.class.data();

        // Auto-select skills based on class
        let skills: Vec<_> = class_data
            .skill_options
            .iter()
            .take(class_data.skill_count)
            .copied()
            .collect();

        let mut builder = CharacterBuilder::new()
            .name(&self.name)
            .campaign(&self.campaign_id, &self.session_id)
            .race(self.race)
            .class(self.class)
            .skills(skills.clone());

        builder = match self.ability_method {
            AbilityMethod::StandardArray => builder.standard_array(self.standard_array_assignment()),
            AbilityMethod::PointBuy => builder.point_buy(self.point_buy_scores()),
            AbilityMethod::Rolled => builder.rolled(self.rolled_scores()),
            AbilityMethod::Manual => builder.ability_scores(self.point_buy_scores()),
        };

        match (&self.subclass, self.class.subclass_options().first()) {
            (Some(subclass), _) => builder = builder.subclass(subclass),
            (None, Some(first)) if self.class.subclass_level() == 1 => {
                builder = builder.subclass(*first)
            }
            _ => {}
        }

        for feature in self.class.features_at(1) {
            if let Some(choice) = feature.choice {
                builder = builder.feature_choice(feature.name, &choice.options[..choice.picks]);
            }
            if feature.name == "Expertise" {
                if let [a, b, ..] = skills.as_slice() {
                    builder = builder.expertise([*a, *b]);
                }
            }
        }

        if self.race == Race::HalfElf {
            let mut picks = self
                .class_ability_priority()
                .into_iter()
                .filter(|a| *a != Ability::Charisma);
            if let (Some(a), Some(b)) = (picks.next(), picks.next()) {
                builder = builder.half_elf_bonuses([a, b]);
            }
        }

        builder.build()
    }

    /// Get standard array assignment based on class.
    fn standard_array_assignment(&self) -> [(u8, Ability); 6] {
        let abilities = self.class_ability_priority();
        [
            (STANDARD_ARRAY[0], abilities[0]),
            (STANDARD_ARRAY[1], abilities[1]),
            (STANDARD_ARRAY[2], abilities[2]),
            (STANDARD_ARRAY[3], abilities[3]),
            (STANDARD_ARRAY[4], abilities[4]),
            (STANDARD_ARRAY[5], abilities[5]),
        ]
    }

    /// Balanced 14/14/14/10/10/10, exactly 27 points.
    fn point_buy_scores(&self) -> AbilityScores {
        let mut scores = AbilityScores::new(10, 10, 10, 10, 10, 10);
        for ability in self.class_ability_priority().iter().take(3) {
            scores.set(*ability, 14);
        }
        scores
    }

    fn rolled_scores(&self) -> AbilityScores {
        let rolled = roll_ability_scores();
        let mut scores = AbilityScores::new(10, 10, 10, 10, 10, 10);
        for (ability, value) in self.class_ability_priority().iter().zip(rolled) {
            scores.set(*ability, value);
        }
        scores
    }

    /// Get ability priority order for the class.
    fn class_ability_priority(&self) -> [Ability; 6] {
        use Ability::*;
        match self.class {
            CharacterClass::Barbarian => [Strength, Constitution, Dexterity, Wisdom, Charisma, Intelligence],
            CharacterClass::Bard => [Charisma, Dexterity, Constitution, Wisdom, Intelligence, Strength],
            CharacterClass::Cleric => [Wisdom, Constitution, Strength, Charisma, Dexterity, Intelligence],
            CharacterClass::Druid => [Wisdom, Constitution, Dexterity, Intelligence, Charisma, Strength],
            CharacterClass::Fighter => [Strength, Constitution, Dexterity, Wisdom, Charisma, Intelligence],
            CharacterClass::Monk => [Dexterity, Wisdom, Constitution, Strength, Charisma, Intelligence],
            CharacterClass::Paladin => [Strength, Charisma, Constitution, Wisdom, Dexterity, Intelligence],
            CharacterClass::Ranger => [Dexterity, Wisdom, Constitution, Strength, Intelligence, Charisma],
            CharacterClass::Rogue => [Dexterity, Constitution, Charisma, Intelligence, Wisdom, Strength],
            CharacterClass::Sorcerer => [Charisma, Constitution, Dexterity, Wisdom, Intelligence, Strength],
            CharacterClass::Warlock => [Charisma, Constitution, Dexterity, Wisdom, Intelligence, Strength],
            CharacterClass::Wizard => [Intelligence, Constitution, Dexterity, Wisdom, Charisma, Strength],
        }
    }
}

/// An entry in the request transcript.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    /// Raw request text.
    pub request: String,
    pub response: Response,
    /// 1-based count of requests handled, including dropped ones.
    pub turn: usize,
}

/// The most recent exchanges, oldest dropped first.
#[derive(Debug)]
struct Transcript {
    entries: VecDeque<TranscriptEntry>,
    limit: usize,
    turns: usize,
}

impl Transcript {
    fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit,
            turns: 0,
        }
    }

    fn record(&mut self, request: &str, response: Response) {
        self.turns += 1;
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(TranscriptEntry {
            request: request.to_string(),
            response,
            turn: self.turns,
        });
    }
}

/// A rules engine driven through JSON text.
pub struct HeadlessEngine {
    engine: RulesEngine,
    transcript: Mutex<Transcript>,
}

impl HeadlessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_engine(RulesEngine::new(config))
    }

    /// Configure from `DND_RULES_*` environment variables.
    pub fn from_env() -> Result<Self, RulesError> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    /// Keeps the last `config().transcript_limit` exchanges of `engine`.
    pub fn with_engine(engine: RulesEngine) -> Self {
        let limit = engine.config().transcript_limit;
        Self {
            engine,
            transcript: Mutex::new(Transcript::with_limit(limit)),
        }
    }

    /// Build and register a character from a quick configuration.
    pub fn create_character(&self, config: &HeadlessConfig) -> Result<EntityId, HeadlessError> {
        let character = config.build_character()?;
        let created = self.engine.create_character(character)?;
        Ok(created.id)
    }

    /// Dispatch a typed request and wrap the result in the wire envelope.
    pub async fn handle(&self, request: ActionRequest) -> Response {
        Response::from(self.engine.dispatch(request).await)
    }

    /// The whole request/response contract over text: a malformed request,
    /// an unknown action kind or an unknown field is an
    /// `invalid_parameter` error response, never a panic.
    pub async fn handle_json(&self, input: &str) -> String {
        let response = match serde_json::from_str::<ActionRequest>(input) {
            Ok(request) => self.handle(request).await,
            Err(err) => {
                warn!(error = %err, "Rejected malformed request");
                Response::error(&RulesError::InvalidParameter(format!(
                    "malformed request: {err}"
                )))
            }
        };
        let text = encode(&response);

        self.transcript.lock().await.record(input, response);
        text
    }

    /// Save every entity to a roster file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<RosterMetadata, PersistError> {
        self.engine.save_roster(path).await
    }

    /// Replace every entity with a saved roster.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<RosterMetadata, PersistError> {
        self.engine.load_roster(path).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Get the underlying engine for typed access.
    pub fn engine(&self) -> &RulesEngine {
        &self.engine
    }

    /// Copy of the retained exchanges, oldest first.
    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().await.entries.iter().cloned().collect()
    }

    /// Requests handled so far, retained or not.
    pub async fn turns(&self) -> usize {
        self.transcript.lock().await.turns
    }

    /// Number of errors in the retained transcript.
    pub async fn error_count(&self) -> usize {
        self.transcript
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.response.status == Status::Error)
            .count()
    }

    /// Committed character state as JSON, or an error envelope.
    pub fn character_json(&self, id: EntityId) -> String {
        match self.engine.get_character(id) {
            Ok(character) => serde_json::to_string(&*character)
                .unwrap_or_else(|err| encode(&Response::error(&RulesError::InvalidParameter(err.to_string())))),
            Err(err) => encode(&Response::error(&err)),
        }
    }
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn encode(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|err| {
        format!(
            r#"{{"status":"error","error":{{"kind":"invariant_violation","message":"unserializable response: {}"}}}}"#,
            err.to_string().replace('"', "'")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).expect("response is JSON")
    }

    #[test]
    fn test_quick_start_config() {
        let config = HeadlessConfig::quick_start("Thorin");
        assert_eq!(config.name, "Thorin");
        assert_eq!(config.race, Race::Human);
        assert_eq!(config.class, CharacterClass::Fighter);
        assert_eq!(config.ability_method, AbilityMethod::StandardArray);
    }

    #[test]
    fn test_every_class_builds() {
        for class in CharacterClass::all() {
            for method in [AbilityMethod::StandardArray, AbilityMethod::PointBuy, AbilityMethod::Rolled] {
                let config = HeadlessConfig::custom("Test Hero", Race::HalfElf, *class)
                    .with_ability_method(method);
                let character = match config.build_character() {
                    Ok(character) => character,
                    Err(err) => panic!("{class} via {}: {err}", method.name()),
                };
                assert_eq!(character.class, *class);
                if class.subclass_level() == 1 {
                    assert!(character.subclass.is_some());
                }
            }
        }
    }

    #[test]
    fn test_custom_config() {
        let config = HeadlessConfig::custom("Elara", Race::Elf, CharacterClass::Warlock)
            .with_subclass("The Archfey")
            .with_campaign("lost-library", "s1");
        let character = config.build_character().unwrap();
        assert_eq!(character.subclass.as_deref(), Some("The Archfey"));
        assert_eq!(character.campaign_id, "lost-library");
        assert_eq!(character.session_id, "s1");
    }

    #[tokio::test]
    async fn test_handle_json_round_trip() {
        let headless = HeadlessEngine::new(EngineConfig::default());
        let hero = headless
            .create_character(&HeadlessConfig::quick_start("Thorin"))
            .unwrap();
        let max_hp = headless.engine().get_character(hero).unwrap().max_hp;

        let request = json!({
            "entity_id": hero,
            "idempotency_key": "hit-1",
            "action": {"kind": "modify_hp", "amount": -5, "source": "goblin"}
        })
        .to_string();
        let first = parse(&headless.handle_json(&request).await);
        assert_eq!(first["status"], "ok");
        assert_eq!(first["result"]["kind"], "hp_changed");
        assert_eq!(first["result"]["new_hp"], max_hp - 5);

        // Same key, same answer, no second hit
        let again = parse(&headless.handle_json(&request).await);
        assert_eq!(again, first);
        assert_eq!(headless.engine().get_character(hero).unwrap().current_hp, max_hp - 5);
        assert_eq!(headless.transcript().await.len(), 2);
    }

    #[tokio::test]
    async fn test_handle_json_errors() {
        let headless = HeadlessEngine::new(EngineConfig::default());
        let hero = headless
            .create_character(&HeadlessConfig::quick_start("Thorin"))
            .unwrap();

        let garbage = parse(&headless.handle_json("not json").await);
        assert_eq!(garbage["status"], "error");
        assert_eq!(garbage["error"]["kind"], "invalid_parameter");

        let unknown_kind = json!({
            "entity_id": hero,
            "action": {"kind": "teleport", "destination": "moon"}
        });
        let response = parse(&headless.handle_json(&unknown_kind.to_string()).await);
        assert_eq!(response["error"]["kind"], "invalid_parameter");

        let missing = json!({
            "entity_id": EntityId::new(),
            "action": {"kind": "long_rest"}
        });
        let response = parse(&headless.handle_json(&missing.to_string()).await);
        assert_eq!(response["error"]["kind"], "not_found");
        assert!(response.get("result").is_none());

        let no_slots = json!({
            "entity_id": hero,
            "action": {"kind": "cast_spell", "spell_name": "Magic Missile"}
        });
        let response = parse(&headless.handle_json(&no_slots.to_string()).await);
        assert_eq!(response["status"], "error");

        assert_eq!(headless.error_count().await, 4);
    }

    #[tokio::test]
    async fn test_transcript_keeps_latest_exchanges() {
        let headless = HeadlessEngine::new(EngineConfig::default().with_transcript_limit(3));
        let hero = headless
            .create_character(&HeadlessConfig::quick_start("Thorin"))
            .unwrap();
        for n in 0..10 {
            let request = json!({
                "entity_id": hero,
                "action": {"kind": "roll", "notation": format!("1d4+{n}")}
            });
            headless.handle_json(&request.to_string()).await;
        }
        headless.handle_json("not json").await;

        let transcript = headless.transcript().await;
        let turns: Vec<usize> = transcript.iter().map(|e| e.turn).collect();
        assert_eq!(turns, vec![9, 10, 11]);
        assert_eq!(transcript[2].request, "not json");
        assert_eq!(headless.turns().await, 11);
        assert_eq!(headless.error_count().await, 1);

        let silent = HeadlessEngine::new(EngineConfig::default().with_transcript_limit(0));
        silent.handle_json("not json").await;
        assert!(silent.transcript().await.is_empty());
        assert_eq!(silent.turns().await, 1);
    }

    #[tokio::test]
    async fn test_character_json() {
        let headless = HeadlessEngine::default();
        let hero = headless
            .create_character(&HeadlessConfig::quick_start("Thorin"))
            .unwrap();
        let character = parse(&headless.character_json(hero));
        assert_eq!(character["name"], "Thorin");

        let missing = parse(&headless.character_json(EntityId::new()));
        assert_eq!(missing["error"]["kind"], "not_found");
    }
}
