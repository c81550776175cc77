// Identity Reconciliation - Core Library
// Learner deduplication and merge reconciliation, used by the CLI and host applications

pub mod normalizer;  // Name canonicalization
pub mod similarity;  // Edit distance + token overlap
pub mod records;     // Entity and dependent records
pub mod format;      // Authoritative code format
pub mod matcher;     // Candidate matching within a cohort
pub mod planner;     // Merge plans
pub mod overrides;   // Manual override list
pub mod store;       // Store trait + SQLite and in-memory stores
pub mod audit;       // Audit trail
pub mod migrator;    // Atomic merge execution
pub mod retry;       // Backoff for transient failures
pub mod driver;      // Cohort orchestration
pub mod config;      // Engine configuration
pub mod error;       // Error taxonomy
pub mod telemetry;   // tracing setup

// Re-export commonly used types
pub use normalizer::{normalize, name_tokens};
pub use similarity::{
    similarity, edit_distance, MatchScore, SimilarityScorer,
    DEFAULT_THRESHOLD, DEFAULT_MIN_TOKEN_LEN,
};
pub use records::{
    EntityRecord, DependentRecord, IdentitySnapshot,
    load_entities, load_dependents,
};
pub use format::{AuthoritativeFormat, CodePattern, DEFAULT_CODE_PATTERN};
pub use matcher::{
    CandidateMatcher, MatchCandidate, MatchOutcome, MatchSet, AmbiguousRecord,
};
pub use planner::{MergePlanner, MergePlan, MergeOrigin};
pub use overrides::{
    ManualOverride, OverrideSet, SkippedOverride,
    load_overrides, validate_overrides,
};
pub use store::{Store, StoreError, StoreOp, MemoryStore, SqliteStore};
pub use audit::{AuditEntry, compute_fingerprint};
pub use migrator::RelationshipMigrator;
pub use retry::RetryPolicy;
pub use driver::{
    ReconciliationDriver, ReconciliationReport, MergePreview, FailedMerge,
    CohortRun, run_cohorts,
};
pub use config::{EngineConfig, CohortDefinition};
pub use error::{ReconcileError, ConfigError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
