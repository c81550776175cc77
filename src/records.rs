// 🧑‍🎓 Records - The deduplication subjects and their dependents
//
// Identity vs value:
// - internal_id is IDENTITY: assigned by the store, never changes, never reused
// - canonical_code and names are VALUES: typed by humans, imported from
//   spreadsheets of different eras, and therefore noisy
//
// Dependent records (results, attendance, assessments...) point at an entity
// through owner_id. A merge re-points them; it never deletes them.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTITY RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Store-assigned identity (unique, immutable)
    pub internal_id: String,

    /// Human-facing code; may or may not follow the authoritative format
    pub canonical_code: String,

    pub given_name: String,

    pub family_name: String,

    /// Matching scope (e.g. school + grade). Records in different cohorts are never compared.
    pub cohort_key: String,
}

impl EntityRecord {
    pub fn new(
        internal_id: &str,
        canonical_code: &str,
        given_name: &str,
        family_name: &str,
        cohort_key: &str,
    ) -> Self {
        EntityRecord {
            internal_id: internal_id.to_string(),
            canonical_code: canonical_code.to_string(),
            given_name: given_name.to_string(),
            family_name: family_name.to_string(),
            cohort_key: cohort_key.to_string(),
        }
    }

    /// `given_name + " " + family_name`, trimmed when either half is blank.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name)
            .trim()
            .to_string()
    }

    /// Name fields frozen for the audit trail.
    pub fn snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot {
            canonical_code: self.canonical_code.clone(),
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
        }
    }
}

/// What a retired identity looked like, kept after its row is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub canonical_code: String,
    pub given_name: String,
    pub family_name: String,
}

// ============================================================================
// DEPENDENT RECORD
// ============================================================================

/// Any child row referencing an entity by foreign key.
///
/// The payload is opaque to reconciliation; only `owner_id` is ever rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentRecord {
    pub id: String,

    /// Foreign key to `EntityRecord::internal_id`
    pub owner_id: String,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DependentRecord {
    pub fn new(id: &str, owner_id: &str) -> Self {
        DependentRecord {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            payload: serde_json::json!({}),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ============================================================================
// CSV LOADING
// ============================================================================
//
// entities:   internal_id,canonical_code,given_name,family_name,cohort_key
// dependents: id,owner_id[,payload]   (payload is a JSON string, default {})

pub fn load_entities(csv_path: &Path) -> Result<Vec<EntityRecord>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open entities file: {:?}", csv_path))?;
    read_entities(file)
}

pub fn read_entities<R: Read>(reader: R) -> Result<Vec<EntityRecord>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: EntityRecord = result.context("Failed to deserialize entity")?;
        records.push(record);
    }

    Ok(records)
}

#[derive(Debug, Deserialize)]
struct DependentRow {
    id: String,
    owner_id: String,
    #[serde(default)]
    payload: String,
}

pub fn load_dependents(csv_path: &Path) -> Result<Vec<DependentRecord>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open dependents file: {:?}", csv_path))?;
    read_dependents(file)
}

pub fn read_dependents<R: Read>(reader: R) -> Result<Vec<DependentRecord>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let row: DependentRow = result.context("Failed to deserialize dependent record")?;
        let mut record = DependentRecord::new(&row.id, &row.owner_id);
        if !row.payload.is_empty() {
            let payload = serde_json::from_str(&row.payload)
                .with_context(|| format!("Invalid JSON payload for dependent {}", row.id))?;
            record = record.with_payload(payload);
        }
        records.push(record);
    }

    Ok(records)
}
