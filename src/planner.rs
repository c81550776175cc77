// 🗺️ Merge Planner - Turn accepted matches into merge plans
//
// One policy: keep the record that conforms to the current identifier scheme.
// The canonical target is always the authoritative side of a match; the
// legacy side is retired. Manual overrides are the only other source of plans
// and they say so in their origin.

use serde::{Deserialize, Serialize};

use crate::matcher::MatchCandidate;
use crate::overrides::ManualOverride;

// ============================================================================
// MERGE ORIGIN
// ============================================================================

/// Why a merge was planned. Copied into the audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeOrigin {
    /// Found by the matcher
    Automatic { score: f64 },

    /// Curated pair from the override list
    ManualOverride { reason: String },
}

impl MergeOrigin {
    pub fn describe(&self) -> String {
        match self {
            MergeOrigin::Automatic { score } => format!("automatic, score {:.3}", score),
            MergeOrigin::ManualOverride { reason } if reason.is_empty() => {
                "manual override".to_string()
            }
            MergeOrigin::ManualOverride { reason } => format!("manual override: {}", reason),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, MergeOrigin::ManualOverride { .. })
    }
}

// ============================================================================
// MERGE PLAN
// ============================================================================

/// Consumed once by the migrator, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub cohort_key: String,

    /// Record that survives
    pub canonical_id: String,

    /// Record that is deleted once its dependents have moved
    pub retired_id: String,

    /// Migrated in this order
    pub dependent_collections: Vec<String>,

    pub origin: MergeOrigin,
}

// ============================================================================
// MERGE PLANNER
// ============================================================================

pub struct MergePlanner {
    dependent_collections: Vec<String>,
}

impl MergePlanner {
    /// The collection list is injected by the host; the planner never
    /// inspects the schema.
    pub fn new(dependent_collections: Vec<String>) -> Self {
        MergePlanner { dependent_collections }
    }

    pub fn plan(&self, candidate: &MatchCandidate) -> MergePlan {
        MergePlan {
            cohort_key: candidate.cohort_key.clone(),
            canonical_id: candidate.target_id.clone(),
            retired_id: candidate.source_id.clone(),
            dependent_collections: self.dependent_collections.clone(),
            origin: MergeOrigin::Automatic { score: candidate.score },
        }
    }

    /// Plan a curated pair. The override must already be validated.
    pub fn plan_override(&self, manual: &ManualOverride) -> MergePlan {
        MergePlan {
            cohort_key: manual.cohort_key.clone(),
            canonical_id: manual.canonical_id.clone(),
            retired_id: manual.retired_id.clone(),
            dependent_collections: self.dependent_collections.clone(),
            origin: MergeOrigin::ManualOverride {
                reason: manual.reason.clone(),
            },
        }
    }

    /// Overrides first, then automatic matches, in input order.
    pub fn plan_all(
        &self,
        overrides: &[ManualOverride],
        candidates: &[MatchCandidate],
    ) -> Vec<MergePlan> {
        overrides
            .iter()
            .map(|o| self.plan_override(o))
            .chain(candidates.iter().map(|c| self.plan(c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> MergePlanner {
        MergePlanner::new(vec!["results".to_string(), "attendance".to_string()])
    }

    fn candidate() -> MatchCandidate {
        MatchCandidate {
            source_id: "L1".to_string(),
            target_id: "A1".to_string(),
            score: 0.875,
            shared_tokens: vec!["omar".to_string()],
            cohort_key: "G1".to_string(),
        }
    }

    #[test]
    fn test_plan_keeps_authoritative_side() {
        let plan = planner().plan(&candidate());

        assert_eq!(plan.canonical_id, "A1");
        assert_eq!(plan.retired_id, "L1");
        assert_eq!(plan.cohort_key, "G1");
        assert_eq!(plan.dependent_collections, vec!["results", "attendance"]);
        assert_eq!(plan.origin, MergeOrigin::Automatic { score: 0.875 });
    }

    #[test]
    fn test_plan_override_records_reason() {
        let manual = ManualOverride {
            cohort_key: "G1".to_string(),
            retired_id: "L7".to_string(),
            canonical_id: "A3".to_string(),
            reason: "confirmed by registrar".to_string(),
        };

        let plan = planner().plan_override(&manual);

        assert_eq!(plan.canonical_id, "A3");
        assert_eq!(plan.retired_id, "L7");
        assert!(plan.origin.is_manual());
        assert_eq!(plan.origin.describe(), "manual override: confirmed by registrar");
    }

    #[test]
    fn test_plan_all_puts_overrides_first() {
        let manual = ManualOverride {
            cohort_key: "G1".to_string(),
            retired_id: "L7".to_string(),
            canonical_id: "A3".to_string(),
            reason: String::new(),
        };

        let plans = planner().plan_all(&[manual], &[candidate()]);

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].retired_id, "L7");
        assert_eq!(plans[1].retired_id, "L1");
    }

    #[test]
    fn test_origin_serializes_tagged() {
        let json = serde_json::to_string(&MergeOrigin::Automatic { score: 1.0 }).unwrap();
        assert_eq!(json, r#"{"kind":"automatic","score":1.0}"#);

        let back: MergeOrigin =
            serde_json::from_str(r#"{"kind":"manual_override","reason":"twins"}"#).unwrap();
        assert_eq!(back, MergeOrigin::ManualOverride { reason: "twins".to_string() });
    }
}
