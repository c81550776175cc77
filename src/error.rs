// ⚠️ Error taxonomy
//
// Nothing here is recovered by guessing. Ambiguous and failed cases are
// reported for human review; only transient store failures are retried.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Several authoritative records tie for the best score.
    #[error("ambiguous match for {legacy_id}: {} candidates tie at {score:.3}", candidates.len())]
    AmbiguousMatch {
        legacy_id: String,
        candidates: Vec<String>,
        score: f64,
    },

    /// No authoritative record clears the threshold.
    #[error("no match for {legacy_id}")]
    NoMatch { legacy_id: String },

    /// The retired identity is still referenced after migration; the
    /// dependent-collection list is incomplete.
    #[error("{retired_id} still referenced after migration: {references:?}")]
    DanglingReferenceDetected {
        retired_id: String,
        references: BTreeMap<String, u64>,
    },

    #[error("store transaction failed: {0}")]
    StoreTransactionFailure(#[from] StoreError),

    /// The record to retire no longer exists (already merged, or deleted upstream).
    #[error("retired entity {0} not found")]
    RetiredEntityMissing(String),

    #[error("canonical entity {0} not found")]
    CanonicalEntityMissing(String),

    #[error("invalid merge plan: {0}")]
    InvalidPlan(String),

    #[error("unknown cohort: {0}")]
    UnknownCohort(String),

    #[error("invalid override {retired_id} -> {canonical_id}: {reason}")]
    InvalidOverride {
        retired_id: String,
        canonical_id: String,
        reason: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ReconcileError {
    /// Worth retrying with backoff (store conflicts, busy database).
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::StoreTransactionFailure(e) if e.is_transient())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("similarity threshold {0} outside [0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("min_token_len must be at least 1")]
    TokenLength,

    #[error("no cohorts configured")]
    NoCohorts,

    #[error("cohort key must not be empty")]
    EmptyCohortKey,

    #[error("duplicate cohort key: {0}")]
    DuplicateCohort(String),

    #[error("no dependent collections configured")]
    NoCollections,

    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("invalid code pattern for cohort {cohort}: {source}")]
    InvalidPattern {
        cohort: String,
        #[source]
        source: regex::Error,
    },
}
