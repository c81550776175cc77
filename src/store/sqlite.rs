use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{validate_collection_name, Store, StoreError};
use crate::audit::AuditEntry;
use crate::records::{DependentRecord, EntityRecord};

/// rusqlite-backed store.
///
/// Schema:
/// - `entities`: one row per identity, keyed by `internal_id`
/// - one table per dependent collection: `id`, `owner_id REFERENCES entities`, `payload`
/// - `merge_audit`: append-only audit trail, unique per merge fingerprint
///
/// Foreign keys are enforced, so the database itself refuses to orphan a
/// dependent record even if the engine were wrong.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file. WAL + foreign keys + busy timeout.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // Enable WAL mode for crash recovery and concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection (host-owned schema) and ensure engine tables exist.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = SqliteStore { conn };
        store.setup_schema()?;
        Ok(store)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn setup_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                internal_id TEXT PRIMARY KEY,
                canonical_code TEXT NOT NULL,
                given_name TEXT NOT NULL,
                family_name TEXT NOT NULL,
                cohort_key TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS merge_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT UNIQUE NOT NULL,
                fingerprint TEXT UNIQUE NOT NULL,
                cohort_key TEXT NOT NULL,
                canonical_id TEXT NOT NULL,
                retired_id TEXT NOT NULL,
                retired_identity TEXT NOT NULL,
                moved_counts TEXT NOT NULL,
                origin TEXT NOT NULL,
                actor TEXT NOT NULL,
                merged_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entities_cohort ON entities(cohort_key);
            CREATE INDEX IF NOT EXISTS idx_merge_audit_cohort ON merge_audit(cohort_key);",
        )?;
        Ok(())
    }

    /// Create a dependent collection table (hosts normally own these).
    pub fn create_dependent_collection(&self, collection: &str) -> Result<(), StoreError> {
        validate_collection_name(collection)?;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{c}\" (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES entities(internal_id),
                payload TEXT NOT NULL DEFAULT '{{}}'
            );
            CREATE INDEX IF NOT EXISTS \"idx_{c}_owner\" ON \"{c}\"(owner_id);",
            c = collection
        ))?;
        Ok(())
    }

    pub fn insert_entity(&self, record: &EntityRecord) -> Result<(), StoreError> {
        self.execute_insert_entity(record)?;
        Ok(())
    }

    fn execute_insert_entity(&self, record: &EntityRecord) -> rusqlite::Result<usize> {
        self.conn.execute(
            "INSERT INTO entities (internal_id, canonical_code, given_name, family_name, cohort_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.internal_id,
                record.canonical_code,
                record.given_name,
                record.family_name,
                record.cohort_key,
            ],
        )
    }

    /// Run `f` inside one `BEGIN IMMEDIATE`/`COMMIT`, rolling back if it fails.
    ///
    /// When a transaction is already open, `f` joins it and the caller decides
    /// whether to commit.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Insert entities, skipping ids that already exist. Returns rows inserted.
    ///
    /// All or nothing: any other failure leaves the table as it was.
    pub fn insert_entities(&self, records: &[EntityRecord]) -> Result<usize, StoreError> {
        self.with_transaction(|store| {
            let mut inserted = 0;
            let mut duplicates = 0;

            for record in records {
                match store.execute_insert_entity(record) {
                    Ok(_) => inserted += 1,
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        duplicates += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            debug!(inserted, duplicates, "entities imported");
            Ok(inserted)
        })
    }

    pub fn insert_dependent(
        &self,
        collection: &str,
        record: &DependentRecord,
    ) -> Result<(), StoreError> {
        validate_collection_name(collection)?;
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Permanent(e.to_string()))?;

        self.conn.execute(
            &format!(
                "INSERT INTO \"{}\" (id, owner_id, payload) VALUES (?1, ?2, ?3)",
                collection
            ),
            params![record.id, record.owner_id, payload],
        )?;
        Ok(())
    }

    /// Insert dependent records, skipping ids already present. Returns rows inserted.
    ///
    /// A missing owner still fails the batch, and nothing from it is kept.
    pub fn insert_dependents(
        &self,
        collection: &str,
        records: &[DependentRecord],
    ) -> Result<usize, StoreError> {
        validate_collection_name(collection)?;
        let sql = format!(
            "INSERT INTO \"{}\" (id, owner_id, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING",
            collection
        );

        self.with_transaction(|store| {
            let mut stmt = store.conn.prepare(&sql)?;
            let mut inserted = 0;

            for record in records {
                let payload = serde_json::to_string(&record.payload)
                    .map_err(|e| StoreError::Permanent(e.to_string()))?;
                inserted += stmt.execute(params![record.id, record.owner_id, payload])?;
            }

            debug!(
                collection,
                inserted,
                duplicates = records.len() - inserted,
                "dependents imported"
            );
            Ok(inserted)
        })
    }

    /// Tables holding a foreign key to `entities`, with the referencing column.
    fn referencing_tables(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT m.name, p.\"from\"
             FROM sqlite_master m, pragma_foreign_key_list(m.name) p
             WHERE m.type = 'table' AND p.\"table\" = 'entities'
             ORDER BY m.name",
        )?;

        let tables = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tables)
    }

    fn map_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRecord> {
        Ok(EntityRecord {
            internal_id: row.get(0)?,
            canonical_code: row.get(1)?,
            given_name: row.get(2)?,
            family_name: row.get(3)?,
            cohort_key: row.get(4)?,
        })
    }

    fn map_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
        let retired_identity: String = row.get(5)?;
        let moved_counts: String = row.get(6)?;
        let origin: String = row.get(7)?;
        let merged_at: String = row.get(9)?;

        Ok(AuditEntry {
            entry_id: row.get(0)?,
            fingerprint: row.get(1)?,
            cohort_key: row.get(2)?,
            canonical_id: row.get(3)?,
            retired_id: row.get(4)?,
            retired_identity: serde_json::from_str(&retired_identity)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
            moved_counts: serde_json::from_str(&moved_counts)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
            origin: serde_json::from_str(&origin)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
            actor: row.get(8)?,
            merged_at: DateTime::parse_from_rfc3339(&merged_at)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?
                .with_timezone(&Utc),
        })
    }
}

/// Quote a schema name for SQL text, doubling embedded quotes.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Store for SqliteStore {
    fn query(&self, cohort_key: &str) -> Result<Vec<EntityRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT internal_id, canonical_code, given_name, family_name, cohort_key
             FROM entities
             WHERE cohort_key = ?1
             ORDER BY internal_id",
        )?;

        let records = stmt
            .query_map([cohort_key], Self::map_entity)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn get_entity(&self, internal_id: &str) -> Result<Option<EntityRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT internal_id, canonical_code, given_name, family_name, cohort_key
                 FROM entities
                 WHERE internal_id = ?1",
                [internal_id],
                Self::map_entity,
            )
            .optional()?;

        Ok(record)
    }

    fn update_owner(
        &self,
        collection: &str,
        old_owner: &str,
        new_owner: &str,
    ) -> Result<u64, StoreError> {
        validate_collection_name(collection)?;
        let moved = self.conn.execute(
            &format!("UPDATE \"{}\" SET owner_id = ?1 WHERE owner_id = ?2", collection),
            params![new_owner, old_owner],
        )?;
        Ok(moved as u64)
    }

    fn count_owned_by(&self, collection: &str, owner_id: &str) -> Result<u64, StoreError> {
        validate_collection_name(collection)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\" WHERE owner_id = ?1", collection),
            [owner_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_references(&self, owner_id: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut references = BTreeMap::new();

        for (table, column) in self.referencing_tables()? {
            // Host tables may use any name SQLite accepts
            let count: i64 = self.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                    quote_identifier(&table),
                    quote_identifier(&column)
                ),
                [owner_id],
                |row| row.get(0),
            )?;
            if count > 0 {
                *references.entry(table).or_insert(0) += count as u64;
            }
        }

        Ok(references)
    }

    fn delete_entity(&self, internal_id: &str) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM entities WHERE internal_id = ?1", [internal_id])?;
        Ok(deleted > 0)
    }

    fn begin_transaction(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let to_json = |value: serde_json::Result<String>| {
            value.map_err(|e| StoreError::Permanent(e.to_string()))
        };

        self.conn.execute(
            "INSERT INTO merge_audit (
                entry_id, fingerprint, cohort_key, canonical_id, retired_id,
                retired_identity, moved_counts, origin, actor, merged_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.entry_id,
                entry.fingerprint,
                entry.cohort_key,
                entry.canonical_id,
                entry.retired_id,
                to_json(serde_json::to_string(&entry.retired_identity))?,
                to_json(serde_json::to_string(&entry.moved_counts))?,
                to_json(serde_json::to_string(&entry.origin))?,
                entry.actor,
                entry.merged_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn audit_entries(&self, cohort_key: &str) -> Result<Vec<AuditEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, fingerprint, cohort_key, canonical_id, retired_id,
                    retired_identity, moved_counts, origin, actor, merged_at
             FROM merge_audit
             WHERE cohort_key = ?1
             ORDER BY id",
        )?;

        let entries = stmt
            .query_map([cohort_key], Self::map_audit)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}
