// ⚙️ Engine Configuration - Cohorts, threshold, collections, retry policy
//
// Loaded from JSON. Everything except `cohorts` and `dependent_collections`
// has a default:
//
// {
//   "similarity_threshold": 0.7,
//   "dependent_collections": ["results", "attendance"],
//   "cohorts": [{ "key": "school-1/G1", "code_segment": "G1" }]
// }

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ReconcileError};
use crate::format::{CodePattern, DEFAULT_CODE_PATTERN};
use crate::migrator::DEFAULT_ACTOR;
use crate::retry::RetryPolicy;
use crate::similarity::{SimilarityScorer, DEFAULT_MIN_TOKEN_LEN, DEFAULT_THRESHOLD};
use crate::store::validate_collection_name;

/// One matching scope, e.g. a grade within a school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
    pub key: String,

    /// Substituted for `{segment}` in the code pattern
    pub code_segment: String,

    /// Replaces the global template for this cohort
    #[serde(default)]
    pub code_pattern: Option<String>,
}

impl CohortDefinition {
    pub fn new(key: &str, code_segment: &str) -> Self {
        CohortDefinition {
            key: key.to_string(),
            code_segment: code_segment.to_string(),
            code_pattern: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,

    /// Template for authoritative codes, `{segment}` = cohort segment
    #[serde(default = "default_code_pattern")]
    pub code_pattern: String,

    /// Collections whose records reference entities, migrated in this order
    pub dependent_collections: Vec<String>,

    /// Recorded on every audit entry
    #[serde(default = "default_actor")]
    pub actor: String,

    #[serde(default)]
    pub retry: RetryPolicy,

    pub cohorts: Vec<CohortDefinition>,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_min_token_len() -> usize {
    DEFAULT_MIN_TOKEN_LEN
}

fn default_code_pattern() -> String {
    DEFAULT_CODE_PATTERN.to_string()
}

fn default_actor() -> String {
    DEFAULT_ACTOR.to_string()
}

impl EngineConfig {
    /// Defaults everywhere, with the given cohorts and collections.
    pub fn new(cohorts: Vec<CohortDefinition>, dependent_collections: Vec<String>) -> Self {
        EngineConfig {
            similarity_threshold: DEFAULT_THRESHOLD,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
            code_pattern: default_code_pattern(),
            dependent_collections,
            actor: default_actor(),
            retry: RetryPolicy::default(),
            cohorts,
        }
    }

    /// Load and validate a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(content).context("Failed to parse config JSON")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.similarity_threshold));
        }

        if self.min_token_len == 0 {
            return Err(ConfigError::TokenLength);
        }

        if self.dependent_collections.is_empty() {
            return Err(ConfigError::NoCollections);
        }
        for collection in &self.dependent_collections {
            validate_collection_name(collection)
                .map_err(|_| ConfigError::InvalidCollection(collection.clone()))?;
        }

        if self.cohorts.is_empty() {
            return Err(ConfigError::NoCohorts);
        }

        let mut seen = HashSet::new();
        for cohort in &self.cohorts {
            if cohort.key.trim().is_empty() {
                return Err(ConfigError::EmptyCohortKey);
            }
            if !seen.insert(cohort.key.as_str()) {
                return Err(ConfigError::DuplicateCohort(cohort.key.clone()));
            }
            self.compile_pattern(cohort)?;
        }

        Ok(())
    }

    pub fn cohort(&self, key: &str) -> Result<&CohortDefinition, ReconcileError> {
        self.cohorts
            .iter()
            .find(|c| c.key == key)
            .ok_or_else(|| ReconcileError::UnknownCohort(key.to_string()))
    }

    pub fn cohort_keys(&self) -> Vec<String> {
        self.cohorts.iter().map(|c| c.key.clone()).collect()
    }

    /// Authoritative-format predicate for one cohort.
    pub fn format_for(&self, key: &str) -> Result<CodePattern, ReconcileError> {
        let cohort = self.cohort(key)?;
        Ok(self.compile_pattern(cohort)?)
    }

    pub fn scorer(&self) -> SimilarityScorer {
        SimilarityScorer {
            threshold: self.similarity_threshold,
            min_token_len: self.min_token_len,
        }
    }

    fn compile_pattern(&self, cohort: &CohortDefinition) -> Result<CodePattern, ConfigError> {
        let template = cohort.code_pattern.as_deref().unwrap_or(&self.code_pattern);
        CodePattern::for_segment(template, &cohort.code_segment).map_err(|source| {
            ConfigError::InvalidPattern {
                cohort: cohort.key.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AuthoritativeFormat;

    fn valid() -> EngineConfig {
        EngineConfig::new(
            vec![CohortDefinition::new("school-1/G1", "G1")],
            vec!["results".to_string()],
        )
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "dependent_collections": ["results", "attendance"],
            "cohorts": [{ "key": "school-1/G1", "code_segment": "G1" }]
        }"#;

        let config = EngineConfig::from_json(json).unwrap();

        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.min_token_len, 3);
        assert_eq!(config.actor, "reconciliation-driver");
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.code_pattern, DEFAULT_CODE_PATTERN);
    }

    #[test]
    fn test_full_json() {
        let json = r#"{
            "similarity_threshold": 0.8,
            "min_token_len": 4,
            "code_pattern": "^ADM-{segment}-[0-9]{3,}$",
            "dependent_collections": ["results"],
            "actor": "registrar",
            "retry": { "max_attempts": 5 },
            "cohorts": [
                { "key": "school-1/G1", "code_segment": "G1" },
                { "key": "school-1/G2", "code_segment": "G2", "code_pattern": "^NEW-G2-[0-9]+$" }
            ]
        }"#;

        let config = EngineConfig::from_json(json).unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.scorer().threshold, 0.8);
        assert_eq!(config.scorer().min_token_len, 4);

        let g1 = config.format_for("school-1/G1").unwrap();
        assert!(g1.conforms("ADM-G1-001"));

        let g2 = config.format_for("school-1/G2").unwrap();
        assert!(g2.conforms("NEW-G2-7"));
        assert!(!g2.conforms("ADM-G2-001"));
    }

    #[test]
    fn test_missing_cohorts_is_parse_error() {
        assert!(EngineConfig::from_json(r#"{ "dependent_collections": ["results"] }"#).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid();
        config.similarity_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::ThresholdOutOfRange(_))));

        let mut config = valid();
        config.similarity_threshold = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::ThresholdOutOfRange(_))));

        let mut config = valid();
        config.min_token_len = 0;
        assert!(matches!(config.validate(), Err(ConfigError::TokenLength)));

        let mut config = valid();
        config.cohorts.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoCohorts)));

        let mut config = valid();
        config.cohorts.push(CohortDefinition::new("school-1/G1", "G1"));
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateCohort(_))));

        let mut config = valid();
        config.cohorts.push(CohortDefinition::new("  ", "G9"));
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCohortKey)));

        let mut config = valid();
        config.dependent_collections = vec!["results; DROP TABLE entities".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCollection(_))));

        let mut config = valid();
        config.dependent_collections.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoCollections)));

        let mut config = valid();
        config.code_pattern = "^ADM-{segment}-[0-9".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_unknown_cohort() {
        let err = valid().format_for("school-9/G9").unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownCohort(key) if key == "school-9/G9"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.json");
        std::fs::write(&path, serde_json::to_string(&valid()).unwrap()).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();

        assert_eq!(config, valid());
        assert!(EngineConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
