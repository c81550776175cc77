// ✋ Manual Overrides - Curated merge pairs the matcher cannot find on its own
//
// CSV format:
//   cohort_key,retired_id,canonical_id,reason
//   school-1/G1,L17,A4,confirmed by registrar
//
// Overrides are validated against the cohort snapshot before any merge runs.
// A valid override wins over automatic matching for its retired record.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ReconcileError;
use crate::format::AuthoritativeFormat;
use crate::records::EntityRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub cohort_key: String,
    pub retired_id: String,
    pub canonical_id: String,

    #[serde(default)]
    pub reason: String,
}

/// An override that was not applied, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedOverride {
    pub retired_id: String,
    pub canonical_id: String,
    pub reason: String,

    /// The retired record is already gone: a re-run, not a mistake
    pub already_merged: bool,
}

impl SkippedOverride {
    fn already_merged(manual: &ManualOverride) -> Self {
        SkippedOverride {
            retired_id: manual.retired_id.clone(),
            canonical_id: manual.canonical_id.clone(),
            reason: format!("{} no longer exists", manual.retired_id),
            already_merged: true,
        }
    }

    fn invalid(manual: &ManualOverride, reason: &str) -> Self {
        let err = ReconcileError::InvalidOverride {
            retired_id: manual.retired_id.clone(),
            canonical_id: manual.canonical_id.clone(),
            reason: reason.to_string(),
        };
        warn!(cohort = %manual.cohort_key, "{}", err);

        SkippedOverride {
            retired_id: manual.retired_id.clone(),
            canonical_id: manual.canonical_id.clone(),
            reason: err.to_string(),
            already_merged: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideSet {
    pub accepted: Vec<ManualOverride>,
    pub skipped: Vec<SkippedOverride>,
}

impl OverrideSet {
    /// Ids owned by accepted overrides. The matcher leaves these alone.
    pub fn claimed_ids(&self) -> HashSet<&str> {
        self.accepted
            .iter()
            .map(|o| o.retired_id.as_str())
            .collect()
    }
}

// ============================================================================
// LOADING
// ============================================================================

pub fn load_overrides(csv_path: &Path) -> Result<Vec<ManualOverride>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open overrides file: {:?}", csv_path))?;
    read_overrides(file)
}

pub fn read_overrides<R: Read>(reader: R) -> Result<Vec<ManualOverride>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut overrides = Vec::new();
    for result in rdr.deserialize() {
        let manual: ManualOverride = result.context("Failed to deserialize override row")?;
        overrides.push(manual);
    }

    Ok(overrides)
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Check a cohort's overrides against its snapshot.
///
/// Rows for other cohorts are ignored.
pub fn validate_overrides(
    overrides: &[ManualOverride],
    cohort_key: &str,
    snapshot: &[EntityRecord],
    format: &dyn AuthoritativeFormat,
) -> OverrideSet {
    let rows: Vec<&ManualOverride> = overrides
        .iter()
        .filter(|o| o.cohort_key == cohort_key)
        .collect();

    let by_id: HashMap<&str, &EntityRecord> = snapshot
        .iter()
        .filter(|r| r.cohort_key == cohort_key)
        .map(|r| (r.internal_id.as_str(), r))
        .collect();

    let mut source_counts: HashMap<&str, usize> = HashMap::new();
    for row in rows.iter().copied() {
        *source_counts.entry(row.retired_id.as_str()).or_insert(0) += 1;
    }

    let mut set = OverrideSet::default();

    for row in rows {
        if row.retired_id == row.canonical_id {
            set.skipped.push(SkippedOverride::invalid(row, "retired and canonical ids are the same"));
            continue;
        }

        if source_counts.get(row.retired_id.as_str()).copied().unwrap_or(0) > 1 {
            set.skipped.push(SkippedOverride::invalid(row, "retired id listed more than once"));
            continue;
        }

        if !by_id.contains_key(row.retired_id.as_str()) {
            set.skipped.push(SkippedOverride::already_merged(row));
            continue;
        }

        let canonical = match by_id.get(row.canonical_id.as_str()) {
            Some(record) => record,
            None => {
                set.skipped.push(SkippedOverride::invalid(row, "canonical record not found in cohort"));
                continue;
            }
        };

        if !format.conforms(&canonical.canonical_code) {
            set.skipped.push(SkippedOverride::invalid(
                row,
                "canonical record does not follow the authoritative code format",
            ));
            continue;
        }

        if source_counts.contains_key(row.canonical_id.as_str()) {
            set.skipped.push(SkippedOverride::invalid(
                row,
                "canonical record is retired by another override",
            ));
            continue;
        }

        set.accepted.push(row.clone());
    }

    set
}

// ============================================================================
// TESTS
// ============================================================================
