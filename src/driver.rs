// 🎯 Reconciliation Driver - Run the whole pipeline for a cohort
//
// snapshot -> overrides -> matcher -> planner -> migrator (sequential) -> report
//
// Matching is read-only and runs outside any transaction. Merges within a
// cohort are committed one at a time; cohorts are independent and may run on
// separate workers, each with its own store handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::audit::AuditEntry;
use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::matcher::{AmbiguousRecord, CandidateMatcher, MatchSet};
use crate::migrator::RelationshipMigrator;
use crate::overrides::{validate_overrides, ManualOverride, SkippedOverride};
use crate::planner::{MergeOrigin, MergePlan, MergePlanner};
use crate::records::EntityRecord;
use crate::store::{Store, StoreError};

// ============================================================================
// REPORT
// ============================================================================

/// A plan that could not be committed. Nothing it touched was changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMerge {
    pub canonical_id: String,
    pub retired_id: String,
    pub origin: MergeOrigin,
    pub error: String,

    /// Commit attempts made, including retries
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub cohort_key: String,
    pub merged: Vec<AuditEntry>,
    pub unmatched: Vec<EntityRecord>,
    pub ambiguous: Vec<AmbiguousRecord>,
    pub failed: Vec<FailedMerge>,
    pub skipped_overrides: Vec<SkippedOverride>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// Nothing needs a human: no failures, no ties, no rejected overrides.
    /// Unmatched records are allowed; they may simply be new learners.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.ambiguous.is_empty()
            && self.skipped_overrides.iter().all(|s| s.already_merged)
    }

    pub fn total_moved(&self) -> u64 {
        self.merged.iter().map(|e| e.total_moved()).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Cohort {}: {} merged ({} records moved), {} unmatched, {} ambiguous, {} failed, {} overrides skipped",
            self.cohort_key,
            self.merged.len(),
            self.total_moved(),
            self.unmatched.len(),
            self.ambiguous.len(),
            self.failed.len(),
            self.skipped_overrides.len()
        )
    }
}

/// What a run would do, without doing it.
#[derive(Debug, Clone)]
pub struct MergePreview {
    pub cohort_key: String,
    pub plans: Vec<MergePlan>,
    pub matches: MatchSet,
    pub skipped_overrides: Vec<SkippedOverride>,
}

// ============================================================================
// DRIVER
// ============================================================================

pub struct ReconciliationDriver<'a, S: Store + ?Sized> {
    store: &'a S,
    config: &'a EngineConfig,
    matcher: CandidateMatcher,
    planner: MergePlanner,
    overrides: &'a [ManualOverride],
}

impl<'a, S: Store + ?Sized> ReconciliationDriver<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        ReconciliationDriver {
            store,
            config,
            matcher: CandidateMatcher::new(config.scorer()),
            planner: MergePlanner::new(config.dependent_collections.clone()),
            overrides: &[],
        }
    }

    pub fn with_overrides(mut self, overrides: &'a [ManualOverride]) -> Self {
        self.overrides = overrides;
        self
    }

    /// Dry run: match and plan against a fresh snapshot, touch nothing.
    pub fn preview(&self, cohort_key: &str) -> Result<MergePreview, ReconcileError> {
        let format = self.config.format_for(cohort_key)?;
        let snapshot = self.store.query(cohort_key)?;

        let overrides = validate_overrides(self.overrides, cohort_key, &snapshot, &format);
        let claimed = overrides.claimed_ids();

        // Records claimed by an override are neither matched nor merged into
        let (authoritative, legacy) = self.matcher.partition(&snapshot, cohort_key, &format);
        let authoritative: Vec<&EntityRecord> = authoritative
            .into_iter()
            .filter(|r| !claimed.contains(r.internal_id.as_str()))
            .collect();
        let legacy: Vec<&EntityRecord> = legacy
            .into_iter()
            .filter(|r| !claimed.contains(r.internal_id.as_str()))
            .collect();

        debug!(
            cohort = %cohort_key,
            authoritative = authoritative.len(),
            legacy = legacy.len(),
            overrides = overrides.accepted.len(),
            pattern = format.as_str(),
            "partitioned cohort"
        );

        let matches = self.matcher.match_legacy(&legacy, &authoritative);
        let plans = self.planner.plan_all(&overrides.accepted, &matches.matched);

        Ok(MergePreview {
            cohort_key: cohort_key.to_string(),
            plans,
            matches,
            skipped_overrides: overrides.skipped,
        })
    }

    /// Reconcile one cohort. A failed merge is reported and the run moves on.
    pub fn run(&self, cohort_key: &str) -> Result<ReconciliationReport, ReconcileError> {
        let started_at = Utc::now();
        let preview = self.preview(cohort_key)?;

        info!(
            cohort = %cohort_key,
            plans = preview.plans.len(),
            ambiguous = preview.matches.ambiguous.len(),
            unmatched = preview.matches.unmatched.len(),
            "matching complete"
        );

        for ambiguous in &preview.matches.ambiguous {
            warn!(
                cohort = %cohort_key,
                candidates = ?ambiguous.candidates,
                "{}",
                ambiguous.to_error()
            );
        }
        for record in &preview.matches.unmatched {
            let err = ReconcileError::NoMatch {
                legacy_id: record.internal_id.clone(),
            };
            debug!(cohort = %cohort_key, "{}", err);
        }

        let migrator = RelationshipMigrator::with_actor(self.store, &self.config.actor);
        let mut merged = Vec::new();
        let mut failed = Vec::new();

        for plan in &preview.plans {
            match self.commit_with_retry(&migrator, plan) {
                Ok(entry) => merged.push(entry),
                Err((err, attempts)) => {
                    error!(
                        cohort = %cohort_key,
                        canonical_id = %plan.canonical_id,
                        retired_id = %plan.retired_id,
                        attempts,
                        error = %err,
                        "merge failed"
                    );
                    failed.push(FailedMerge {
                        canonical_id: plan.canonical_id.clone(),
                        retired_id: plan.retired_id.clone(),
                        origin: plan.origin.clone(),
                        error: err.to_string(),
                        attempts,
                    });
                }
            }
        }

        let report = ReconciliationReport {
            cohort_key: cohort_key.to_string(),
            merged,
            unmatched: preview.matches.unmatched,
            ambiguous: preview.matches.ambiguous,
            failed,
            skipped_overrides: preview.skipped_overrides,
            started_at,
            finished_at: Utc::now(),
        };

        info!(cohort = %cohort_key, "{}", report.summary());
        Ok(report)
    }

    /// Commit, retrying transient store failures with backoff.
    fn commit_with_retry(
        &self,
        migrator: &RelationshipMigrator<'_, S>,
        plan: &MergePlan,
    ) -> Result<AuditEntry, (ReconcileError, u32)> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            match migrator.commit(plan) {
                Ok(entry) => return Ok(entry),
                Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        retired_id = %plan.retired_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err((err, attempt)),
            }
        }
    }
}

// ============================================================================
// PARALLEL COHORTS
// ============================================================================

#[derive(Debug)]
pub struct CohortRun {
    pub cohort_key: String,
    pub outcome: Result<ReconciliationReport, ReconcileError>,
}

/// Reconcile every configured cohort on up to `workers` threads.
///
/// Each worker opens its own store handle with `open_store`. Results come back
/// in configuration order.
pub fn run_cohorts<S, F>(
    config: &EngineConfig,
    overrides: &[ManualOverride],
    workers: usize,
    open_store: F,
) -> Vec<CohortRun>
where
    S: Store,
    F: Fn() -> Result<S, StoreError> + Sync,
{
    let keys = config.cohort_keys();
    let workers = workers.clamp(1, keys.len().max(1));
    let next = AtomicUsize::new(0);

    info!(cohorts = keys.len(), workers, "reconciling cohorts");

    let (keys_ref, next, open_store) = (&keys, &next, &open_store);
    let finished: Vec<(usize, CohortRun)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let store = open_store().map_err(|e| e.to_string());
                    let mut done = Vec::new();

                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(key) = keys_ref.get(index) else {
                            break;
                        };

                        let outcome = match &store {
                            Ok(store) => ReconciliationDriver::new(store, config)
                                .with_overrides(overrides)
                                .run(key),
                            Err(msg) => Err(StoreError::Permanent(msg.clone()).into()),
                        };
                        done.push((
                            index,
                            CohortRun {
                                cohort_key: key.clone(),
                                outcome,
                            },
                        ));
                    }

                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .flatten()
            .collect()
    });

    let mut slots: Vec<Option<CohortRun>> = keys.iter().map(|_| None).collect();
    for (index, run) in finished {
        slots[index] = Some(run);
    }

    // A cohort with no result belonged to a worker that panicked
    slots
        .into_iter()
        .zip(keys)
        .map(|(slot, key)| {
            slot.unwrap_or_else(|| {
                error!(cohort = %key, "worker panicked");
                CohortRun {
                    outcome: Err(StoreError::Permanent("worker panicked".to_string()).into()),
                    cohort_key: key,
                }
            })
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CohortDefinition;
    use crate::records::DependentRecord;
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryStore, SqliteStore, StoreOp};

    const COLLECTIONS: [&str; 2] = ["results", "attendance"];

    fn config() -> EngineConfig {
        let mut config = EngineConfig::new(
            vec![CohortDefinition::new("G1", "G1"), CohortDefinition::new("G2", "G2")],
            COLLECTIONS.iter().map(|c| c.to_string()).collect(),
        );
        config.retry = RetryPolicy::immediate(3);
        config
    }

    fn entity(id: &str, code: &str, given: &str, family: &str) -> EntityRecord {
        EntityRecord::new(id, code, given, family, "G1")
    }

    fn empty_store() -> MemoryStore {
        let store = MemoryStore::new();
        for collection in COLLECTIONS {
            store.create_dependent_collection(collection).unwrap();
        }
        store
    }

    /// A1/L1 "Omar Ibrahim" with 3 results owned by L1.
    fn scenario_store() -> MemoryStore {
        let store = empty_store();
        store.insert_entity(entity("A1", "ADM-G1-001", "Omar", "Ibrahim")).unwrap();
        store.insert_entity(entity("L1", "1044", "Omar", "Ibrahim")).unwrap();
        for i in 1..=3 {
            store
                .insert_dependent("results", DependentRecord::new(&format!("R{}", i), "L1"))
                .unwrap();
        }
        store
    }

    /// Exact, typo, tie and miss in one cohort.
    fn mixed_store() -> MemoryStore {
        let store = empty_store();
        for record in [
            entity("A1", "ADM-G1-001", "Omar", "Ibrahim"),
            entity("A2", "ADM-G1-002", "Faith", "Wanjiru"),
            entity("A3", "ADM-G1-003", "Brian", "Otieno"),
            entity("A4", "ADM-G1-004", "Brian", "Otieno"),
            entity("L1", "1044", "Omar", "Ibrahim"),
            entity("L2", "0931", "Faith", "Wanjru"),
            entity("L3", "2201", "Brian", "Otieno"),
            entity("L4", "3300", "Zakaria", "Odhiambo"),
        ] {
            store.insert_entity(record).unwrap();
        }

        let results = [
            ("R1", "L1"),
            ("R2", "L1"),
            ("R3", "L1"),
            ("R4", "A1"),
            ("R5", "L2"),
            ("R6", "L2"),
            ("R7", "L3"),
            ("R8", "L4"),
        ];
        for (id, owner) in results {
            store.insert_dependent("results", DependentRecord::new(id, owner)).unwrap();
        }
        for (id, owner) in [("T1", "L1"), ("T2", "L2"), ("T3", "A2")] {
            store.insert_dependent("attendance", DependentRecord::new(id, owner)).unwrap();
        }
        store
    }

    fn owned_total(store: &dyn Store, collection: &str) -> u64 {
        store
            .query("G1")
            .unwrap()
            .iter()
            .map(|e| store.count_owned_by(collection, &e.internal_id).unwrap())
            .sum()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let store = scenario_store();
        let config = config();

        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();

        assert_eq!(report.merged.len(), 1);
        let entry = &report.merged[0];
        assert_eq!(entry.canonical_id, "A1");
        assert_eq!(entry.retired_id, "L1");
        assert_eq!(entry.moved_counts.get("results"), Some(&3));
        assert_eq!(entry.moved_counts.get("attendance"), Some(&0));

        assert!(store.get_entity("L1").unwrap().is_none());
        assert!(store.dependents("results").iter().all(|r| r.owner_id == "A1"));
        assert!(report.is_clean());
        assert_eq!(store.audit_entries("G1").unwrap().len(), 1);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let store = mixed_store();
        let config = config();
        let driver = ReconciliationDriver::new(&store, &config);

        let first = driver.run("G1").unwrap();
        let second = driver.run("G1").unwrap();

        assert_eq!(first.merged.len(), 2);
        assert!(second.merged.is_empty());
        assert!(second.failed.is_empty());
        assert_eq!(store.audit_entries("G1").unwrap().len(), 2);
    }

    #[test]
    fn test_no_data_loss_and_no_orphans() {
        let store = mixed_store();
        let config = config();

        let before: Vec<u64> = COLLECTIONS.iter().map(|c| owned_total(&store, c)).collect();
        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();
        let after: Vec<u64> = COLLECTIONS.iter().map(|c| owned_total(&store, c)).collect();

        assert_eq!(before, vec![8, 3]);
        assert_eq!(before, after);
        assert!(store.orphans().is_empty());

        assert_eq!(store.count_owned_by("results", "A1").unwrap(), 4);
        assert_eq!(store.count_owned_by("results", "A2").unwrap(), 2);
        assert_eq!(store.count_owned_by("attendance", "A2").unwrap(), 2);
        assert_eq!(report.unmatched.len(), 1);
        assert_eq!(report.unmatched[0].internal_id, "L4");
    }

    #[test]
    fn test_ambiguous_record_never_merged() {
        let store = mixed_store();
        let config = config();

        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();

        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].record.internal_id, "L3");
        assert!(report.merged.iter().all(|e| e.retired_id != "L3"));
        assert!(store.get_entity("L3").unwrap().is_some());
        assert_eq!(store.count_owned_by("results", "L3").unwrap(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_dangling_reference_fails_one_plan_and_continues() {
        let store = empty_store();
        store.insert_entity(entity("A1", "ADM-G1-001", "Omar", "Ibrahim")).unwrap();
        store.insert_entity(entity("A2", "ADM-G1-002", "Faith", "Wanjiru")).unwrap();
        store.insert_entity(entity("L1", "1044", "Omar", "Ibrahim")).unwrap();
        store.insert_entity(entity("L2", "0931", "Faith", "Wanjiru")).unwrap();
        store.insert_dependent("results", DependentRecord::new("R1", "L1")).unwrap();
        store.insert_dependent("attendance", DependentRecord::new("T1", "L1")).unwrap();
        store.insert_dependent("results", DependentRecord::new("R2", "L2")).unwrap();

        // attendance is not configured
        let mut config = config();
        config.dependent_collections = vec!["results".to_string()];

        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].retired_id, "L1");
        assert_eq!(report.failed[0].attempts, 1);
        assert!(report.failed[0].error.contains("still referenced"));

        assert!(store.get_entity("L1").unwrap().is_some());
        assert_eq!(store.count_owned_by("results", "L1").unwrap(), 1);
        assert_eq!(store.count_owned_by("attendance", "L1").unwrap(), 1);

        assert_eq!(report.merged.len(), 1);
        assert_eq!(report.merged[0].retired_id, "L2");
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let store = scenario_store();
        store.fail_next(StoreOp::Commit, StoreError::Transient("database is locked".to_string()));
        let config = config();

        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();

        assert_eq!(report.merged.len(), 1);
        assert!(report.failed.is_empty());
        assert!(store.get_entity("L1").unwrap().is_none());
    }

    #[test]
    fn test_retries_are_bounded() {
        let store = scenario_store();
        for _ in 0..3 {
            store.fail_next(StoreOp::Begin, StoreError::Transient("busy".to_string()));
        }
        let config = config();

        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();

        assert!(report.merged.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 3);
        assert!(store.get_entity("L1").unwrap().is_some());
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let store = mixed_store();
        store.fail_next(StoreOp::UpdateOwner, StoreError::Permanent("constraint".to_string()));
        let config = config();

        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();

        // First plan (L1) fails once, the next one goes through
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].retired_id, "L1");
        assert_eq!(report.failed[0].attempts, 1);
        assert_eq!(report.merged.len(), 1);
        assert_eq!(store.count_owned_by("results", "L1").unwrap(), 3);
    }

    #[test]
    fn test_unknown_cohort() {
        let store = scenario_store();
        let config = config();

        let err = ReconciliationDriver::new(&store, &config).run("G9").unwrap_err();

        assert!(matches!(err, ReconcileError::UnknownCohort(_)));
    }

    #[test]
    fn test_cohorts_are_isolated() {
        let store = scenario_store();
        store
            .insert_entity(EntityRecord::new("B1", "ADM-G2-001", "Omar", "Ibrahim", "G2"))
            .unwrap();
        store
            .insert_entity(EntityRecord::new("M1", "77", "Omar", "Ibrahim", "G2"))
            .unwrap();
        let config = config();
        let driver = ReconciliationDriver::new(&store, &config);

        let g1 = driver.run("G1").unwrap();
        assert_eq!(g1.merged.len(), 1);
        assert_eq!(g1.merged[0].canonical_id, "A1");
        assert!(store.get_entity("M1").unwrap().is_some());

        let g2 = driver.run("G2").unwrap();
        assert_eq!(g2.merged.len(), 1);
        assert_eq!(g2.merged[0].canonical_id, "B1");
        assert_eq!(g2.merged[0].retired_id, "M1");
    }

    #[test]
    fn test_preview_touches_nothing() {
        let store = mixed_store();
        let config = config();

        let preview = ReconciliationDriver::new(&store, &config).preview("G1").unwrap();

        assert_eq!(preview.plans.len(), 2);
        assert_eq!(preview.matches.ambiguous.len(), 1);
        assert!(store.get_entity("L1").unwrap().is_some());
        assert!(store.audit_entries("G1").unwrap().is_empty());
    }

    #[test]
    fn test_manual_override_merges_and_is_attributed() {
        let store = mixed_store();
        let config = config();
        let overrides = vec![ManualOverride {
            cohort_key: "G1".to_string(),
            retired_id: "L4".to_string(),
            canonical_id: "A2".to_string(),
            reason: "same learner, renamed".to_string(),
        }];
        let driver = ReconciliationDriver::new(&store, &config).with_overrides(&overrides);

        let report = driver.run("G1").unwrap();

        let entry = report.merged.iter().find(|e| e.retired_id == "L4").unwrap();
        assert_eq!(entry.canonical_id, "A2");
        assert_eq!(
            entry.origin,
            MergeOrigin::ManualOverride { reason: "same learner, renamed".to_string() }
        );
        assert!(report.unmatched.is_empty());

        let rerun = driver.run("G1").unwrap();
        assert!(rerun.merged.is_empty());
        assert_eq!(rerun.skipped_overrides.len(), 1);
        assert!(rerun.skipped_overrides[0].already_merged);
    }

    #[test]
    fn test_override_takes_precedence_over_match() {
        let store = mixed_store();
        let config = config();
        let overrides = vec![ManualOverride {
            cohort_key: "G1".to_string(),
            retired_id: "L1".to_string(),
            canonical_id: "A2".to_string(),
            reason: String::new(),
        }];

        let report = ReconciliationDriver::new(&store, &config)
            .with_overrides(&overrides)
            .run("G1")
            .unwrap();

        let entry = report.merged.iter().find(|e| e.retired_id == "L1").unwrap();
        assert_eq!(entry.canonical_id, "A2");
        assert_eq!(store.count_owned_by("results", "A1").unwrap(), 1);
    }

    #[test]
    fn test_invalid_override_reported() {
        let store = mixed_store();
        let config = config();
        let overrides = vec![ManualOverride {
            cohort_key: "G1".to_string(),
            retired_id: "L4".to_string(),
            canonical_id: "L1".to_string(),
            reason: String::new(),
        }];

        let report = ReconciliationDriver::new(&store, &config)
            .with_overrides(&overrides)
            .run("G1")
            .unwrap();

        assert_eq!(report.skipped_overrides.len(), 1);
        assert!(!report.skipped_overrides[0].already_merged);
        assert!(store.get_entity("L4").unwrap().is_some());
    }

    #[test]
    fn test_report_summary() {
        let store = scenario_store();
        let config = config();

        let report = ReconciliationDriver::new(&store, &config).run("G1").unwrap();

        assert_eq!(
            report.summary(),
            "Cohort G1: 1 merged (3 records moved), 0 unmatched, 0 ambiguous, 0 failed, 0 overrides skipped"
        );
        assert!(report.finished_at >= report.started_at);
    }

    fn seed_sqlite(store: &SqliteStore, cohort: &str, segment: &str) {
        let canonical = EntityRecord::new(
            &format!("A-{}", segment),
            &format!("ADM-{}-001", segment),
            "Omar",
            "Ibrahim",
            cohort,
        );
        let legacy = EntityRecord::new(&format!("L-{}", segment), "1044", "Omar", "Ibrahim", cohort);
        store.insert_entity(&canonical).unwrap();
        store.insert_entity(&legacy).unwrap();
        for i in 1..=3 {
            store
                .insert_dependent(
                    "results",
                    &DependentRecord::new(&format!("R-{}-{}", segment, i), &legacy.internal_id),
                )
                .unwrap();
        }
    }

    #[test]
    fn test_sqlite_end_to_end() {
        let store = SqliteStore::open_in_memory().unwrap();
        for collection in COLLECTIONS {
            store.create_dependent_collection(collection).unwrap();
        }
        seed_sqlite(&store, "G1", "G1");
        let config = config();
        let driver = ReconciliationDriver::new(&store, &config);

        let report = driver.run("G1").unwrap();

        assert_eq!(report.merged.len(), 1);
        assert_eq!(report.merged[0].moved_counts.get("results"), Some(&3));
        assert!(store.get_entity("L-G1").unwrap().is_none());
        assert_eq!(store.count_owned_by("results", "A-G1").unwrap(), 3);
        assert_eq!(store.audit_entries("G1").unwrap(), report.merged);

        assert!(driver.run("G1").unwrap().merged.is_empty());
    }

    #[test]
    fn test_run_cohorts_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learners.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            for collection in COLLECTIONS {
                store.create_dependent_collection(collection).unwrap();
            }
            seed_sqlite(&store, "G1", "G1");
            seed_sqlite(&store, "G2", "G2");
        }
        let config = config();

        let runs = run_cohorts(&config, &[], 2, || SqliteStore::open(&path));

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].cohort_key, "G1");
        assert_eq!(runs[1].cohort_key, "G2");
        for run in &runs {
            let report = run.outcome.as_ref().unwrap();
            assert_eq!(report.merged.len(), 1);
            assert_eq!(report.total_moved(), 3);
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count_owned_by("results", "A-G1").unwrap(), 3);
        assert_eq!(store.count_owned_by("results", "A-G2").unwrap(), 3);
    }

    #[test]
    fn test_run_cohorts_reports_open_failure() {
        let config = config();

        let runs = run_cohorts(&config, &[], 4, || -> Result<MemoryStore, StoreError> {
            Err(StoreError::Permanent("unable to open database file".to_string()))
        });

        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.outcome.is_err()));
    }
}
