//! Per-entity serialized state store.
//!
//! Every record has its own FIFO mutation queue (a `tokio::sync::Mutex`) and
//! a committed snapshot that readers clone an `Arc` of. A mutation runs on a
//! private copy of the record, is validated, and only then swapped in, so
//! readers never observe a half-applied change and a failed mutation leaves
//! nothing behind. Idempotency keys are remembered per entity for a bounded
//! window and replay the original outcome.

use crate::character::{Character, EntityId};
use crate::companion::Companion;
use crate::error::RulesError;
use crate::rules::ActionOutcome;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A record the store can hold.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human-readable kind, used in logs and error messages.
    const KIND: &'static str;

    fn id(&self) -> EntityId;

    /// Rules every committed record satisfies.
    fn check_invariants(&self) -> Result<(), String>;

    /// Rules between the committed record and its proposed replacement.
    fn check_transition(&self, _before: &Self) -> Result<(), String> {
        Ok(())
    }
}

impl Entity for Character {
    const KIND: &'static str = "character";

    fn id(&self) -> EntityId {
        self.id
    }

    fn check_invariants(&self) -> Result<(), String> {
        Character::check_invariants(self)
    }

    fn check_transition(&self, before: &Self) -> Result<(), String> {
        Character::check_transition(self, before)
    }
}

impl Entity for Companion {
    const KIND: &'static str = "companion";

    fn id(&self) -> EntityId {
        self.id
    }

    fn check_invariants(&self) -> Result<(), String> {
        Companion::check_invariants(self)
    }

    fn check_transition(&self, before: &Self) -> Result<(), String> {
        Companion::check_transition(self, before)
    }
}

/// Result of [`EntityStore::apply`].
#[derive(Debug, Clone)]
pub struct Applied<T, O> {
    /// The committed record after this call.
    pub record: Arc<T>,
    pub outcome: O,
    /// True when the outcome came from the idempotency log.
    pub replayed: bool,
}

/// Committed idempotency keys for one entity.
pub(crate) struct IdempotencyLog<O> {
    entries: HashMap<String, (Instant, O)>,
}

impl<O: Clone> IdempotencyLog<O> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn prune(&mut self, ttl: Duration) {
        self.entries.retain(|_, (at, _)| at.elapsed() < ttl);
    }

    fn get(&self, key: &str) -> Option<O> {
        self.entries.get(key).map(|(_, outcome)| outcome.clone())
    }

    fn record(&mut self, key: &str, outcome: O) {
        self.entries
            .insert(key.to_string(), (Instant::now(), outcome));
    }
}

/// Mutation queue for one entity. Holding the lock is holding the entity.
type Slot<O> = Mutex<IdempotencyLog<O>>;

/// Thread-safe store of one kind of entity.
pub struct EntityStore<T: Entity, O = ActionOutcome> {
    snapshots: DashMap<EntityId, Arc<T>>,
    slots: DashMap<EntityId, Arc<Slot<O>>>,
    lock_timeout: Duration,
    idempotency_ttl: Duration,
}

impl<T, O> EntityStore<T, O>
where
    T: Entity,
    O: Clone + Send + Sync + 'static,
{
    pub fn new(lock_timeout: Duration, idempotency_ttl: Duration) -> Self {
        Self {
            snapshots: DashMap::new(),
            slots: DashMap::new(),
            lock_timeout,
            idempotency_ttl,
        }
    }

    /// Last committed snapshot. Never waits on the mutation queue.
    pub fn get(&self, id: EntityId) -> Result<Arc<T>, RulesError> {
        self.snapshots
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RulesError::NotFound(format!("{} {id}", T::KIND)))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.snapshots.contains_key(&id)
    }

    /// Add a new record after validating it.
    pub fn insert(&self, record: T) -> Result<Arc<T>, RulesError> {
        record
            .check_invariants()
            .map_err(RulesError::InvariantViolation)?;
        let id = record.id();
        if self.snapshots.contains_key(&id) {
            return Err(RulesError::invalid(format!("{} {id} already exists", T::KIND)));
        }
        let record = Arc::new(record);
        self.slots
            .insert(id, Arc::new(Mutex::new(IdempotencyLog::new())));
        self.snapshots.insert(id, Arc::clone(&record));
        info!(entity_id = %id, kind = T::KIND, "entity created");
        Ok(record)
    }

    pub fn remove(&self, id: EntityId) -> Option<Arc<T>> {
        self.slots.remove(&id);
        self.snapshots.remove(&id).map(|(_, record)| record)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.snapshots.iter().map(|entry| *entry.key()).collect()
    }

    pub fn snapshot_all(&self) -> Vec<Arc<T>> {
        self.snapshots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.slots.clear();
        self.snapshots.clear();
    }

    /// Forget expired idempotency keys for entities that are not busy.
    pub fn prune_expired(&self) {
        for entry in self.slots.iter() {
            if let Ok(mut log) = entry.value().try_lock() {
                log.prune(self.idempotency_ttl);
            }
        }
    }

    pub(crate) fn slot(&self, id: EntityId) -> Result<Arc<Slot<O>>, RulesError> {
        self.slots
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RulesError::NotFound(format!("{} {id}", T::KIND)))
    }

    /// Apply `mutation` to the entity atomically.
    ///
    /// With a `key` that was committed for this entity inside the retention
    /// window, the earlier outcome is returned and `mutation` does not run.
    /// Rule errors from `mutation` and invariant failures discard the change;
    /// neither is remembered under the key.
    pub async fn apply<F>(
        &self,
        id: EntityId,
        key: Option<&str>,
        mutation: F,
    ) -> Result<Applied<T, O>, RulesError>
    where
        F: FnOnce(&mut T) -> Result<O, RulesError>,
    {
        let slot = self.slot(id)?;
        let mut log = match tokio::time::timeout(self.lock_timeout, slot.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(entity_id = %id, kind = T::KIND, idempotency_key = ?key, "entity busy");
                return Err(RulesError::Busy(id.to_string()));
            }
        };
        log.prune(self.idempotency_ttl);

        let before = self.get(id)?;
        if let Some(outcome) = key.and_then(|k| log.get(k)) {
            debug!(entity_id = %id, kind = T::KIND, idempotency_key = ?key, "replaying committed outcome");
            return Ok(Applied {
                record: before,
                outcome,
                replayed: true,
            });
        }

        let mut next = T::clone(&before);
        let outcome = mutation(&mut next)?;

        if let Err(reason) = next
            .check_invariants()
            .and_then(|()| next.check_transition(&before))
        {
            error!(entity_id = %id, kind = T::KIND, %reason, "mutation rejected by invariant check");
            return Err(RulesError::InvariantViolation(reason));
        }

        let record = Arc::new(next);
        self.snapshots.insert(id, Arc::clone(&record));
        if let Some(k) = key {
            log.record(k, outcome.clone());
        }
        info!(entity_id = %id, kind = T::KIND, idempotency_key = ?key, "committed");

        Ok(Applied {
            record,
            outcome,
            replayed: false,
        })
    }
}
