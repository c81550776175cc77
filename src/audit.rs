// 📜 Audit Entry - Durable, append-only trail of completed merges
//
// Written inside the merge transaction, after the retired row is deleted.
// Never mutated. The snapshot is the only remaining trace of what the retired
// identity looked like.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::planner::{MergeOrigin, MergePlan};
use crate::records::IdentitySnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id (UUID v4)
    pub entry_id: String,

    /// sha256 of (cohort, canonical, retired) - one merge of a pair per cohort, ever
    pub fingerprint: String,

    pub cohort_key: String,
    pub canonical_id: String,
    pub retired_id: String,

    /// Name fields of the retired identity, captured before deletion
    pub retired_identity: IdentitySnapshot,

    /// Dependent records moved, per collection
    pub moved_counts: BTreeMap<String, u64>,

    /// Why this merge happened (automatic score or manual override)
    pub origin: MergeOrigin,

    /// Who ran it
    pub actor: String,

    pub merged_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        plan: &MergePlan,
        retired_identity: IdentitySnapshot,
        moved_counts: BTreeMap<String, u64>,
        actor: &str,
    ) -> Self {
        AuditEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: compute_fingerprint(&plan.cohort_key, &plan.canonical_id, &plan.retired_id),
            cohort_key: plan.cohort_key.clone(),
            canonical_id: plan.canonical_id.clone(),
            retired_id: plan.retired_id.clone(),
            retired_identity,
            moved_counts,
            origin: plan.origin.clone(),
            actor: actor.to_string(),
            merged_at: Utc::now(),
        }
    }

    /// Total dependent records re-pointed by this merge.
    pub fn total_moved(&self) -> u64 {
        self.moved_counts.values().sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} -> {} ({} {}): {} records moved [{}]",
            self.retired_id,
            self.canonical_id,
            self.retired_identity.given_name,
            self.retired_identity.family_name,
            self.total_moved(),
            self.origin.describe()
        )
    }
}

/// Merge fingerprint for duplicate detection.
/// NOTE: this is for IDEMPOTENCE, not identity - entry_id is the identity.
pub fn compute_fingerprint(cohort_key: &str, canonical_id: &str, retired_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cohort_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(retired_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_plan() -> MergePlan {
        MergePlan {
            cohort_key: "G1".to_string(),
            canonical_id: "A1".to_string(),
            retired_id: "L1".to_string(),
            dependent_collections: vec!["results".to_string()],
            origin: MergeOrigin::Automatic { score: 1.0 },
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let f1 = compute_fingerprint("G1", "A1", "L1");
        let f2 = compute_fingerprint("G1", "A1", "L1");

        assert_eq!(f1, f2);
        assert_eq!(f1.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        assert_ne!(
            compute_fingerprint("G1", "A1", "L1"),
            compute_fingerprint("G1A", "1", "L1")
        );
        assert_ne!(
            compute_fingerprint("G1", "A1", "L1"),
            compute_fingerprint("G1", "L1", "A1")
        );
    }

    #[test]
    fn test_entry_from_plan() {
        let snapshot = IdentitySnapshot {
            canonical_code: "1044".to_string(),
            given_name: "Omar".to_string(),
            family_name: "Ibrahim".to_string(),
        };
        let moved = BTreeMap::from([("results".to_string(), 3), ("attendance".to_string(), 2)]);

        let entry = AuditEntry::new(&test_plan(), snapshot, moved, "tester");

        assert_eq!(entry.canonical_id, "A1");
        assert_eq!(entry.retired_id, "L1");
        assert_eq!(entry.total_moved(), 5);
        assert_eq!(entry.fingerprint, compute_fingerprint("G1", "A1", "L1"));
        assert!(entry.summary().starts_with("L1 -> A1 (Omar Ibrahim): 5 records moved"));
    }
}
