//! Roster persistence for save/load functionality.
//!
//! A roster is the committed state of every character and companion held
//! by a `RulesEngine`, written as versioned, human-readable JSON.
//! Idempotency logs are not saved: a restored engine starts with none.

use crate::character::{Character, EntityId};
use crate::companion::Companion;
use crate::error::RulesError;
use crate::rules::RulesEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Invalid roster: {0}")]
    Rules(#[from] RulesError),
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// A saved roster with everything needed to resume play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRoster {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// Seconds since the Unix epoch.
    pub saved_at: u64,

    pub characters: Vec<Character>,

    pub companions: Vec<Companion>,

    pub metadata: RosterMetadata,
}

/// Summary readable without loading the full roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMetadata {
    pub character_names: Vec<String>,
    pub campaign_ids: Vec<String>,
    pub character_count: usize,
    pub companion_count: usize,
    /// Duplicated from the parent for peek access.
    #[serde(default)]
    pub saved_at: u64,
}

impl SavedRoster {
    /// Characters and companions are ordered by name for stable output.
    pub fn new(mut characters: Vec<Character>, mut companions: Vec<Companion>) -> Self {
        characters.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.0.cmp(&b.id.0)));
        companions.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.0.cmp(&b.id.0)));

        let saved_at = unix_now();
        let mut campaign_ids: Vec<String> =
            characters.iter().map(|c| c.campaign_id.clone()).collect();
        campaign_ids.sort();
        campaign_ids.dedup();
        let metadata = RosterMetadata {
            character_names: characters.iter().map(|c| c.name.clone()).collect(),
            campaign_ids,
            character_count: characters.len(),
            companion_count: companions.len(),
            saved_at,
        };

        Self {
            version: SAVE_VERSION,
            saved_at,
            characters,
            companions,
            metadata,
        }
    }

    /// Check every record and cross-reference.
    pub fn validate(&self) -> Result<(), RulesError> {
        let mut ids = HashSet::new();
        for character in &self.characters {
            character.check_invariants().map_err(|reason| {
                RulesError::InvariantViolation(format!("{}: {reason}", character.name))
            })?;
            if !ids.insert(character.id) {
                return Err(RulesError::invalid(format!("duplicate id {}", character.id)));
            }
        }
        let owners: HashSet<EntityId> = self.characters.iter().map(|c| c.id).collect();
        for companion in &self.companions {
            companion.check_invariants().map_err(|reason| {
                RulesError::InvariantViolation(format!("{}: {reason}", companion.name))
            })?;
            if !ids.insert(companion.id) {
                return Err(RulesError::invalid(format!("duplicate id {}", companion.id)));
            }
            if !owners.contains(&companion.owner) {
                return Err(RulesError::invalid(format!(
                    "companion {} belongs to missing character {}",
                    companion.name, companion.owner
                )));
            }
        }
        Ok(())
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }
        saved.validate()?;

        Ok(saved)
    }

    /// Read a save file's metadata without deserializing the records.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<RosterMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: RosterMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;

        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }

        Ok(partial.metadata)
    }
}

/// Information about a save file.
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub path: PathBuf,
    pub metadata: RosterMetadata,
}

/// List readable roster saves in a directory, creating it when missing.
pub async fn list_saves(dir: impl AsRef<Path>) -> Result<Vec<SaveInfo>, PersistError> {
    let dir = dir.as_ref();
    if !fs::try_exists(dir).await? {
        fs::create_dir_all(dir).await?;
        return Ok(Vec::new());
    }

    let mut saves = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Ok(metadata) = SavedRoster::peek_metadata(&path).await {
                saves.push(SaveInfo { path, metadata });
            }
        }
    }

    // Most recent first
    saves.sort_by(|a, b| {
        b.metadata
            .saved_at
            .cmp(&a.metadata.saved_at)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(saves)
}

/// Save path for a named roster, with unsafe characters replaced.
pub fn roster_save_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    let sanitized = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    dir.as_ref().join(format!("{sanitized}.json"))
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl RulesEngine {
    /// Committed state of every entity.
    pub fn snapshot(&self) -> SavedRoster {
        SavedRoster::new(
            self.characters
                .snapshot_all()
                .into_iter()
                .map(|c| (*c).clone())
                .collect(),
            self.companions
                .snapshot_all()
                .into_iter()
                .map(|c| (*c).clone())
                .collect(),
        )
    }

    /// Replace every entity with the roster's records.
    ///
    /// The roster is validated first, so a rejected roster leaves the
    /// engine untouched.
    pub fn restore(&self, roster: SavedRoster) -> Result<(), RulesError> {
        roster.validate()?;
        self.characters.clear();
        self.companions.clear();
        for character in roster.characters {
            self.characters.insert(character)?;
        }
        for companion in roster.companions {
            self.companions.insert(companion)?;
        }
        Ok(())
    }

    pub async fn save_roster(&self, path: impl AsRef<Path>) -> Result<RosterMetadata, PersistError> {
        let path = path.as_ref();
        let roster = self.snapshot();
        roster.save_json(path).await?;
        info!(
            path = %path.display(),
            characters = roster.metadata.character_count,
            companions = roster.metadata.companion_count,
            "Saved roster"
        );
        Ok(roster.metadata)
    }

    pub async fn load_roster(&self, path: impl AsRef<Path>) -> Result<RosterMetadata, PersistError> {
        let path = path.as_ref();
        let roster = SavedRoster::load_json(path).await?;
        let metadata = roster.metadata.clone();
        self.restore(roster)?;
        info!(
            path = %path.display(),
            characters = metadata.character_count,
            companions = metadata.companion_count,
            "Loaded roster"
        );
        Ok(metadata)
    }
}
