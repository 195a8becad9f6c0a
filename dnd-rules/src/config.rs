//! Engine configuration.

use crate::error::RulesError;
use crate::tables::DeathRule;
use std::time::Duration;

pub const LOCK_TIMEOUT_ENV: &str = "DND_RULES_LOCK_TIMEOUT_MS";
pub const IDEMPOTENCY_TTL_ENV: &str = "DND_RULES_IDEMPOTENCY_TTL_SECS";
pub const DEATH_RULE_ENV: &str = "DND_RULES_DEATH_RULE";
pub const TRANSCRIPT_LIMIT_ENV: &str = "DND_RULES_TRANSCRIPT_LIMIT";

/// Configuration for a [`RulesEngine`](crate::rules::RulesEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a mutation waits for its entity before failing with `Busy`.
    pub lock_timeout: Duration,

    /// How long a committed idempotency key is remembered.
    pub idempotency_ttl: Duration,

    /// When damage at 0 HP kills.
    pub death_rule: DeathRule,

    /// Exchanges a headless session keeps, newest last. 0 keeps none.
    pub transcript_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            idempotency_ttl: Duration::from_secs(10 * 60),
            death_rule: DeathRule::default(),
            transcript_limit: 1000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment (and a `.env` file, if present).
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self, RulesError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RulesError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(LOCK_TIMEOUT_ENV) {
            let ms = parse_number(LOCK_TIMEOUT_ENV, &raw)?;
            config = config.with_lock_timeout(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup(IDEMPOTENCY_TTL_ENV) {
            let secs = parse_number(IDEMPOTENCY_TTL_ENV, &raw)?;
            config = config.with_idempotency_ttl(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup(DEATH_RULE_ENV) {
            config = config.with_death_rule(raw.parse()?);
        }
        if let Some(raw) = lookup(TRANSCRIPT_LIMIT_ENV) {
            let limit = parse_number(TRANSCRIPT_LIMIT_ENV, &raw)?;
            config = config.with_transcript_limit(limit as usize);
        }
        Ok(config)
    }

    /// Set the per-entity lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set how long idempotency keys are retained.
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    /// Set the death rule.
    pub fn with_death_rule(mut self, rule: DeathRule) -> Self {
        self.death_rule = rule;
        self
    }

    pub fn with_transcript_limit(mut self, limit: usize) -> Self {
        self.transcript_limit = limit;
        self
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64, RulesError> {
    raw.trim()
        .parse()
        .map_err(|_| RulesError::invalid(format!("{name} must be a whole number, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(600));
        assert_eq!(config.death_rule, DeathRule::MassiveDamage);
        assert_eq!(config.transcript_limit, 1000);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_lock_timeout(Duration::from_millis(50))
            .with_death_rule(DeathRule::Never);
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
        assert_eq!(config.death_rule, DeathRule::Never);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (LOCK_TIMEOUT_ENV, "250"),
            (IDEMPOTENCY_TTL_ENV, "30"),
            (DEATH_RULE_ENV, "threshold:15"),
            (TRANSCRIPT_LIMIT_ENV, "0"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(30));
        assert_eq!(config.death_rule, DeathRule::Threshold(15));
        assert_eq!(config.transcript_limit, 0);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(|name| {
            (name == LOCK_TIMEOUT_ENV).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameter");
    }
}
