use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{validate_collection_name, Store, StoreError, StoreOp};
use crate::audit::AuditEntry;
use crate::records::{DependentRecord, EntityRecord};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    entities: BTreeMap<String, EntityRecord>,
    collections: BTreeMap<String, Vec<DependentRecord>>,
    audit: Vec<AuditEntry>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. `begin_transaction` checkpoints the whole state and
/// `rollback` restores it, so a failed merge leaves nothing behind. Deleting
/// an entity that is still referenced fails like a foreign-key violation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    checkpoint: Mutex<Option<MemoryState>>,
    faults: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entity(&self, record: EntityRecord) -> Result<(), StoreError> {
        let mut state = self.lock_state()?;
        if state.entities.contains_key(&record.internal_id) {
            return Err(StoreError::Permanent(format!(
                "UNIQUE constraint failed: entities.internal_id ({})",
                record.internal_id
            )));
        }
        state.entities.insert(record.internal_id.clone(), record);
        Ok(())
    }

    /// Register an (initially empty) dependent collection.
    pub fn create_dependent_collection(&self, collection: &str) -> Result<(), StoreError> {
        validate_collection_name(collection)?;
        let mut state = self.lock_state()?;
        state.collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    /// Insert a dependent record, creating the collection on first use.
    /// The owner must exist.
    pub fn insert_dependent(
        &self,
        collection: &str,
        record: DependentRecord,
    ) -> Result<(), StoreError> {
        validate_collection_name(collection)?;
        let mut state = self.lock_state()?;
        if !state.entities.contains_key(&record.owner_id) {
            return Err(StoreError::Permanent(format!(
                "FOREIGN KEY constraint failed: {}.owner_id = {}",
                collection, record.owner_id
            )));
        }
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    /// Every record in a collection (test inspection).
    pub fn dependents(&self, collection: &str) -> Vec<DependentRecord> {
        self.state
            .lock()
            .map(|s| s.collections.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Dependent records whose owner does not exist.
    pub fn orphans(&self) -> Vec<(String, DependentRecord)> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };

        let entities = &state.entities;
        let orphans = state
            .collections
            .iter()
            .flat_map(move |(name, records)| {
                records
                    .iter()
                    .filter(move |r| !entities.contains_key(&r.owner_id))
                    .map(move |r| (name.clone(), r.clone()))
            })
            .collect();
        orphans
    }

    /// Make the next call of `op` fail with `error`. Queued per operation.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.entry(op).or_default().push_back(error);
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.checkpoint.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Permanent("lock poisoned".to_string()))
    }

    fn injected(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Permanent("lock poisoned".to_string()))?;

        match faults.get_mut(&op).and_then(|queue| queue.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Store for MemoryStore {
    fn query(&self, cohort_key: &str) -> Result<Vec<EntityRecord>, StoreError> {
        self.injected(StoreOp::Query)?;
        let state = self.lock_state()?;
        Ok(state
            .entities
            .values()
            .filter(|e| e.cohort_key == cohort_key)
            .cloned()
            .collect())
    }

    fn get_entity(&self, internal_id: &str) -> Result<Option<EntityRecord>, StoreError> {
        self.injected(StoreOp::GetEntity)?;
        Ok(self.lock_state()?.entities.get(internal_id).cloned())
    }

    fn update_owner(
        &self,
        collection: &str,
        old_owner: &str,
        new_owner: &str,
    ) -> Result<u64, StoreError> {
        validate_collection_name(collection)?;
        self.injected(StoreOp::UpdateOwner)?;
        let mut state = self.lock_state()?;

        if !state.entities.contains_key(new_owner) {
            return Err(StoreError::Permanent(format!(
                "FOREIGN KEY constraint failed: {}.owner_id = {}",
                collection, new_owner
            )));
        }

        let records = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::Permanent(format!("no such table: {}", collection)))?;

        let mut moved = 0;
        for record in records.iter_mut().filter(|r| r.owner_id == old_owner) {
            record.owner_id = new_owner.to_string();
            moved += 1;
        }
        Ok(moved)
    }

    fn count_owned_by(&self, collection: &str, owner_id: &str) -> Result<u64, StoreError> {
        validate_collection_name(collection)?;
        self.injected(StoreOp::CountOwnedBy)?;
        let state = self.lock_state()?;
        let records = state
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::Permanent(format!("no such table: {}", collection)))?;

        Ok(records.iter().filter(|r| r.owner_id == owner_id).count() as u64)
    }

    fn count_references(&self, owner_id: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        self.injected(StoreOp::CountReferences)?;
        let state = self.lock_state()?;

        Ok(state
            .collections
            .iter()
            .map(|(name, records)| {
                let count = records.iter().filter(|r| r.owner_id == owner_id).count() as u64;
                (name.clone(), count)
            })
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    fn delete_entity(&self, internal_id: &str) -> Result<bool, StoreError> {
        self.injected(StoreOp::DeleteEntity)?;
        let mut state = self.lock_state()?;

        let referenced = state
            .collections
            .values()
            .any(|records| records.iter().any(|r| r.owner_id == internal_id));
        if referenced {
            return Err(StoreError::Permanent(format!(
                "FOREIGN KEY constraint failed: {} is still referenced",
                internal_id
            )));
        }

        Ok(state.entities.remove(internal_id).is_some())
    }

    fn begin_transaction(&self) -> Result<(), StoreError> {
        self.injected(StoreOp::Begin)?;
        let mut checkpoint = self
            .checkpoint
            .lock()
            .map_err(|_| StoreError::Permanent("lock poisoned".to_string()))?;

        if checkpoint.is_some() {
            return Err(StoreError::Permanent(
                "cannot start a transaction within a transaction".to_string(),
            ));
        }
        *checkpoint = Some(self.lock_state()?.clone());
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.injected(StoreOp::Commit)?;
        let mut checkpoint = self
            .checkpoint
            .lock()
            .map_err(|_| StoreError::Permanent("lock poisoned".to_string()))?;

        match checkpoint.take() {
            Some(_) => Ok(()),
            None => Err(StoreError::NoTransaction),
        }
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.injected(StoreOp::Rollback)?;
        let mut checkpoint = self
            .checkpoint
            .lock()
            .map_err(|_| StoreError::Permanent("lock poisoned".to_string()))?;

        let saved = checkpoint.take().ok_or(StoreError::NoTransaction)?;
        *self.lock_state()? = saved;
        Ok(())
    }

    fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.injected(StoreOp::InsertAudit)?;
        let mut state = self.lock_state()?;

        if state.audit.iter().any(|e| e.fingerprint == entry.fingerprint) {
            return Err(StoreError::Permanent(format!(
                "UNIQUE constraint failed: merge_audit.fingerprint ({})",
                entry.fingerprint
            )));
        }
        state.audit.push(entry.clone());
        Ok(())
    }

    fn audit_entries(&self, cohort_key: &str) -> Result<Vec<AuditEntry>, StoreError> {
        self.injected(StoreOp::ListAudit)?;
        Ok(self
            .lock_state()?
            .audit
            .iter()
            .filter(|e| e.cohort_key == cohort_key)
            .cloned()
            .collect())
    }
}
