// 🔍 Candidate Matcher - Find the authoritative record each legacy record duplicates
//
// Within one cohort:
//   1. Partition: authoritative (code conforms) vs legacy (does not)
//   2. Score every legacy record against every authoritative full name
//   3. Accept the single best match; report ties as ambiguous and misses as unmatched
//
// A silent wrong merge is worse than a manual-review backlog, so ties are never broken.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ReconcileError;
use crate::format::AuthoritativeFormat;
use crate::records::EntityRecord;
use crate::similarity::SimilarityScorer;

/// Scores closer than this are a tie.
const SCORE_EPSILON: f64 = 1e-9;

// ============================================================================
// MATCH RESULTS
// ============================================================================

/// Ephemeral pairing produced during one run. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Legacy record to retire
    pub source_id: String,

    /// Authoritative record to keep
    pub target_id: String,

    /// Edit similarity of the full names
    pub score: f64,

    /// Tokens both names share
    pub shared_tokens: Vec<String>,

    pub cohort_key: String,
}

/// Legacy record whose best score is shared by several authoritative records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousRecord {
    pub record: EntityRecord,
    pub candidates: Vec<String>,
    pub score: f64,
}

impl AmbiguousRecord {
    /// Why this record was left for review.
    pub fn to_error(&self) -> ReconcileError {
        ReconcileError::AmbiguousMatch {
            legacy_id: self.record.internal_id.clone(),
            candidates: self.candidates.clone(),
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(MatchCandidate),
    Ambiguous(AmbiguousRecord),
    Unmatched(EntityRecord),
}

/// Everything the matcher found for one cohort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSet {
    pub matched: Vec<MatchCandidate>,
    pub ambiguous: Vec<AmbiguousRecord>,
    pub unmatched: Vec<EntityRecord>,
}

impl MatchSet {
    fn push(&mut self, outcome: MatchOutcome) {
        match outcome {
            MatchOutcome::Matched(c) => self.matched.push(c),
            MatchOutcome::Ambiguous(a) => self.ambiguous.push(a),
            MatchOutcome::Unmatched(r) => self.unmatched.push(r),
        }
    }
}

// ============================================================================
// CANDIDATE MATCHER
// ============================================================================

pub struct CandidateMatcher {
    pub scorer: SimilarityScorer,
}

impl CandidateMatcher {
    pub fn new(scorer: SimilarityScorer) -> Self {
        CandidateMatcher { scorer }
    }

    /// Split a cohort into (authoritative, legacy).
    ///
    /// Records from other cohorts are dropped: they are never compared.
    pub fn partition<'r>(
        &self,
        records: &'r [EntityRecord],
        cohort_key: &str,
        format: &dyn AuthoritativeFormat,
    ) -> (Vec<&'r EntityRecord>, Vec<&'r EntityRecord>) {
        records
            .iter()
            .filter(|r| r.cohort_key == cohort_key)
            .partition(|r| format.conforms(&r.canonical_code))
    }

    /// Partition and match a whole cohort.
    pub fn find_matches(
        &self,
        records: &[EntityRecord],
        cohort_key: &str,
        format: &dyn AuthoritativeFormat,
    ) -> MatchSet {
        let (authoritative, legacy) = self.partition(records, cohort_key, format);
        self.match_legacy(&legacy, &authoritative)
    }

    /// Match already-partitioned records.
    pub fn match_legacy(
        &self,
        legacy: &[&EntityRecord],
        authoritative: &[&EntityRecord],
    ) -> MatchSet {
        let mut set = MatchSet::default();
        for record in legacy {
            set.push(self.best_match(record, authoritative));
        }
        set
    }

    /// Best authoritative match for one legacy record.
    pub fn best_match(
        &self,
        legacy: &EntityRecord,
        authoritative: &[&EntityRecord],
    ) -> MatchOutcome {
        let legacy_name = legacy.full_name();

        // Only candidates that pass either heuristic compete
        let mut eligible: Vec<(&EntityRecord, f64, Vec<String>)> = authoritative
            .iter()
            .map(|candidate| {
                let score = self.scorer.score(&legacy_name, &candidate.full_name());
                (*candidate, score)
            })
            .filter(|(_, score)| score.is_match(self.scorer.threshold))
            .map(|(candidate, score)| (candidate, score.similarity, score.shared_tokens))
            .collect();

        if eligible.is_empty() {
            debug!(legacy_id = %legacy.internal_id, "no authoritative candidate clears the threshold");
            return MatchOutcome::Unmatched(legacy.clone());
        }

        eligible.sort_by(|a, b| b.1.total_cmp(&a.1));
        let best_score = eligible[0].1;

        let tied: Vec<String> = eligible
            .iter()
            .take_while(|(_, score, _)| (best_score - score).abs() < SCORE_EPSILON)
            .map(|(candidate, _, _)| candidate.internal_id.clone())
            .collect();

        if tied.len() > 1 {
            debug!(legacy_id = %legacy.internal_id, candidates = ?tied, "ambiguous match");
            return MatchOutcome::Ambiguous(AmbiguousRecord {
                record: legacy.clone(),
                candidates: tied,
                score: best_score,
            });
        }

        let (target, score, shared_tokens) = eligible.swap_remove(0);
        MatchOutcome::Matched(MatchCandidate {
            source_id: legacy.internal_id.clone(),
            target_id: target.internal_id.clone(),
            score,
            shared_tokens,
            cohort_key: legacy.cohort_key.clone(),
        })
    }
}

impl Default for CandidateMatcher {
    fn default() -> Self {
        Self::new(SimilarityScorer::new())
    }
}

// ============================================================================
// TESTS
// ============================================================================
