// 🔀 Relationship Migrator - Execute one merge plan atomically
//
// Inside one transaction, in order:
//   1. Re-point dependents in every configured collection (retired -> canonical)
//   2. Verify nothing anywhere still references the retired id
//   3. Delete the retired entity
//   4. Persist the audit entry
//
// Any failure rolls back everything. The retired entity and its dependents are
// then exactly as they were before the attempt.

use std::collections::BTreeMap;

use tracing::{debug, error, info, instrument, warn};

use crate::audit::AuditEntry;
use crate::error::ReconcileError;
use crate::planner::MergePlan;
use crate::store::Store;

pub const DEFAULT_ACTOR: &str = "reconciliation-driver";

pub struct RelationshipMigrator<'a, S: Store + ?Sized> {
    store: &'a S,
    actor: String,
}

impl<'a, S: Store + ?Sized> RelationshipMigrator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_actor(store, DEFAULT_ACTOR)
    }

    pub fn with_actor(store: &'a S, actor: &str) -> Self {
        RelationshipMigrator {
            store,
            actor: actor.to_string(),
        }
    }

    /// Commit one merge. Returns the audit entry written in the same transaction.
    #[instrument(
        skip(self, plan),
        fields(cohort = %plan.cohort_key, canonical_id = %plan.canonical_id, retired_id = %plan.retired_id)
    )]
    pub fn commit(&self, plan: &MergePlan) -> Result<AuditEntry, ReconcileError> {
        if plan.canonical_id == plan.retired_id {
            return Err(ReconcileError::InvalidPlan(format!(
                "{} cannot be merged into itself",
                plan.retired_id
            )));
        }

        self.store.begin_transaction()?;

        let outcome = self.apply(plan).and_then(|entry| {
            self.store.commit()?;
            Ok(entry)
        });

        match outcome {
            Ok(entry) => {
                info!(moved = entry.total_moved(), "merge committed");
                Ok(entry)
            }
            Err(err) => {
                warn!(error = %err, "merge aborted, rolling back");
                if let Err(rollback_err) = self.store.rollback() {
                    error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn apply(&self, plan: &MergePlan) -> Result<AuditEntry, ReconcileError> {
        let retired = self
            .store
            .get_entity(&plan.retired_id)?
            .ok_or_else(|| ReconcileError::RetiredEntityMissing(plan.retired_id.clone()))?;

        let canonical = self
            .store
            .get_entity(&plan.canonical_id)?
            .ok_or_else(|| ReconcileError::CanonicalEntityMissing(plan.canonical_id.clone()))?;

        if retired.cohort_key != plan.cohort_key || canonical.cohort_key != plan.cohort_key {
            return Err(ReconcileError::InvalidPlan(format!(
                "{} and {} are not both in cohort {}",
                plan.retired_id, plan.canonical_id, plan.cohort_key
            )));
        }

        // Step 1: move dependents
        let mut moved_counts = BTreeMap::new();
        for collection in &plan.dependent_collections {
            let moved = self
                .store
                .update_owner(collection, &plan.retired_id, &plan.canonical_id)?;
            debug!(collection = %collection, moved, "re-pointed dependents");
            moved_counts.insert(collection.clone(), moved);
        }

        // Step 2: nothing may still point at the retired id
        let references = self.store.count_references(&plan.retired_id)?;
        if !references.is_empty() {
            return Err(ReconcileError::DanglingReferenceDetected {
                retired_id: plan.retired_id.clone(),
                references,
            });
        }

        // Step 3
        if !self.store.delete_entity(&plan.retired_id)? {
            return Err(ReconcileError::RetiredEntityMissing(plan.retired_id.clone()));
        }

        // Step 4
        let entry = AuditEntry::new(plan, retired.snapshot(), moved_counts, &self.actor);
        self.store.insert_audit_entry(&entry)?;

        Ok(entry)
    }
}

// ============================================================================
// TESTS
// ============================================================================
