#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fitness_sync_core::format::format_rfc3339_utc;
use fitness_sync_core::{
    DocumentStore, Filter, Predicate, Properties, StoreError, SyncReport, TargetRecord,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const DOCUMENTS_MIGRATION_VERSION: i64 = 1;
const SYNC_RUNS_MIGRATION_VERSION: i64 = 2;

const SCHEMA_DOCUMENTS_V1: &str = r"
CREATE TABLE IF NOT EXISTS documents (
  doc_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  collection TEXT NOT NULL,
  properties_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_collection_seq
  ON documents(collection, doc_seq);
";

const SCHEMA_SYNC_RUNS_V2: &str = r"
CREATE TABLE IF NOT EXISTS sync_runs (
  run_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL UNIQUE,
  kind TEXT NOT NULL,
  collection TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT NOT NULL,
  dry_run INTEGER NOT NULL CHECK (dry_run IN (0, 1)),
  created INTEGER NOT NULL CHECK (created >= 0),
  updated INTEGER NOT NULL CHECK (updated >= 0),
  skipped INTEGER NOT NULL CHECK (skipped >= 0),
  failed INTEGER NOT NULL CHECK (failed >= 0),
  report_json TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_sync_runs_no_update
BEFORE UPDATE ON sync_runs
BEGIN
  SELECT RAISE(FAIL, 'sync_runs is append-only');
END;
";

/// Local document store plus the history of sync runs made against any store.
pub struct SqliteDocumentStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRunRecord {
    pub run_id: String,
    pub kind: String,
    pub collection: String,
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub report: SyncReport,
}

impl SqliteDocumentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        for (version, schema, label) in [
            (DOCUMENTS_MIGRATION_VERSION, SCHEMA_DOCUMENTS_V1, "documents"),
            (SYNC_RUNS_MIGRATION_VERSION, SCHEMA_SYNC_RUNS_V2, "sync_runs"),
        ] {
            self.conn
                .execute_batch(schema)
                .with_context(|| format!("failed to apply {label} schema"))?;
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                    params![version, now_rfc3339()?],
                )
                .with_context(|| format!("failed to register {label} migration"))?;
        }

        Ok(())
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_versions(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        collect_rows(rows)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<TargetRecord>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT properties_json FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to load document {id}"))?;

        match raw {
            Some(json) => Ok(Some(TargetRecord {
                id: id.to_string(),
                properties: decode_properties(&json)?,
            })),
            None => Ok(None),
        }
    }

    pub fn count_documents(&self, collection: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .context("failed to count documents")?;
        usize::try_from(count).with_context(|| format!("invalid document count: {count}"))
    }

    /// Documents of `collection` matching `filter`, in insertion order.
    ///
    /// Label and title conditions narrow the scan in SQL through
    /// `json_extract`; `filter` still decides every returned row.
    pub fn query_documents(&self, collection: &str, filter: &Filter) -> Result<Vec<TargetRecord>> {
        let mut sql =
            String::from("SELECT id, properties_json FROM documents WHERE collection = ?1");
        let mut bindings = vec![collection.to_string()];
        for (path, value) in sql_narrowing(filter) {
            let path_slot = bindings.len() + 1;
            sql.push_str(&format!(
                " AND json_extract(properties_json, ?{path_slot}) = ?{}",
                path_slot + 1
            ));
            bindings.push(path);
            bindings.push(value);
        }
        sql.push_str(" ORDER BY doc_seq ASC");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare document query")?;
        let rows = stmt.query_map(params_from_iter(bindings.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut matches = Vec::new();
        for (id, json) in collect_rows(rows)? {
            let properties = decode_properties(&json)
                .with_context(|| format!("invalid stored properties for document {id}"))?;
            if filter.matches(&properties) {
                matches.push(TargetRecord { id, properties });
            }
        }
        Ok(matches)
    }

    pub fn insert_document(
        &self,
        collection: &str,
        properties: &Properties,
    ) -> Result<TargetRecord> {
        let id = Ulid::new().to_string();
        let payload =
            serde_json::to_string(properties).context("failed to serialize properties")?;
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "INSERT INTO documents(id, collection, properties_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, collection, payload, now],
            )
            .context("failed to insert document")?;

        Ok(TargetRecord {
            id,
            properties: properties.clone(),
        })
    }

    /// Overlays `properties` on the stored document. `None` when `id` is
    /// unknown.
    pub fn patch_document(
        &self,
        id: &str,
        properties: &Properties,
    ) -> Result<Option<TargetRecord>> {
        let Some(mut record) = self.get_document(id)? else {
            return Ok(None);
        };
        record.properties.merge(properties);

        let payload =
            serde_json::to_string(&record.properties).context("failed to serialize properties")?;
        self.conn
            .execute(
                "UPDATE documents SET properties_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![payload, now_rfc3339()?, id],
            )
            .with_context(|| format!("failed to update document {id}"))?;

        Ok(Some(record))
    }

    pub fn record_run(
        &self,
        report: &SyncReport,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
        dry_run: bool,
    ) -> Result<SyncRunRecord> {
        let record = SyncRunRecord {
            run_id: Ulid::new().to_string(),
            kind: report.kind.clone(),
            collection: report.collection.clone(),
            started_at: format_timestamp(started_at)?,
            finished_at: format_timestamp(finished_at)?,
            dry_run,
            created: report.created,
            updated: report.updated,
            skipped: report.skipped,
            failed: report.failed,
            report: report.clone(),
        };
        let payload = serde_json::to_string(report).context("failed to serialize sync report")?;

        self.conn
            .execute(
                "INSERT INTO sync_runs(
                    run_id, kind, collection, started_at, finished_at, dry_run,
                    created, updated, skipped, failed, report_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.run_id,
                    record.kind,
                    record.collection,
                    record.started_at,
                    record.finished_at,
                    bool_to_sql(dry_run),
                    count_to_sql(record.created)?,
                    count_to_sql(record.updated)?,
                    count_to_sql(record.skipped)?,
                    count_to_sql(record.failed)?,
                    payload,
                ],
            )
            .context("failed to record sync run")?;

        tracing::debug!(run_id = %record.run_id, kind = %record.kind, "recorded sync run");
        Ok(record)
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<SyncRunRecord>> {
        let limit = i64::try_from(limit).with_context(|| format!("invalid limit: {limit}"))?;
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, finished_at, dry_run, report_json
             FROM sync_runs
             ORDER BY run_seq DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut runs = Vec::new();
        for (run_id, started_at, finished_at, dry_run, json) in collect_rows(rows)? {
            let report: SyncReport = serde_json::from_str(&json)
                .with_context(|| format!("invalid stored report for run {run_id}"))?;
            runs.push(SyncRunRecord {
                kind: report.kind.clone(),
                collection: report.collection.clone(),
                created: report.created,
                updated: report.updated,
                skipped: report.skipped,
                failed: report.failed,
                run_id,
                started_at,
                finished_at,
                dry_run: dry_run != 0,
                report,
            });
        }
        Ok(runs)
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn query(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        self.query_documents(collection, filter).map_err(backend)
    }

    fn create(
        &mut self,
        collection: &str,
        properties: &Properties,
    ) -> Result<TargetRecord, StoreError> {
        self.insert_document(collection, properties).map_err(backend)
    }

    fn update(&mut self, id: &str, properties: &Properties) -> Result<TargetRecord, StoreError> {
        self.patch_document(id, properties)
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

/// `(json path, expected text)` pairs for the conditions SQL can check.
/// Property names a quoted path label cannot hold are left to `Filter::matches`.
fn sql_narrowing(filter: &Filter) -> Vec<(String, String)> {
    filter
        .conditions()
        .iter()
        .filter(|condition| !condition.property.contains(['"', '\\']))
        .filter_map(|condition| match &condition.predicate {
            Predicate::SelectEquals(value) | Predicate::TitleEquals(value) => Some((
                format!("$.\"{}\".value", condition.property),
                value.clone(),
            )),
            Predicate::DateEquals(_) => None,
        })
        .collect()
}

fn decode_properties(json: &str) -> Result<Properties> {
    serde_json::from_str(json).context("invalid properties JSON")
}

fn format_timestamp(value: OffsetDateTime) -> Result<String> {
    format_rfc3339_utc(value).ok_or_else(|| anyhow!("failed to format timestamp {value}"))
}

fn now_rfc3339() -> Result<String> {
    format_timestamp(OffsetDateTime::now_utc())
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn count_to_sql(value: usize) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("count out of range: {value}"))
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use fitness_sync_core::{
        sync_records, Action, DateRange, KeyField, KeyFields, KeyForm, MapperConfig, NaturalKey,
        PropertyValue, Reconciler, SleepKind, SourceRecord,
    };
    use serde_json::json;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn must_store<T>(result: Result<T, StoreError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("store failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteDocumentStore {
        let store = must(SqliteDocumentStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fitsync-store-{}.sqlite3", Ulid::new()))
    }

    const FIELDS: KeyFields = KeyFields {
        date: "Long Date",
        category: KeyField {
            property: "Category",
            form: KeyForm::Select,
        },
        discriminator: KeyField {
            property: "Sleep Type",
            form: KeyForm::Select,
        },
    };

    fn sleep_properties(day: &str, kind: &str) -> Properties {
        Properties::new()
            .with("Long Date", PropertyValue::Date(DateRange::day(day)))
            .with("Category", PropertyValue::Select("Sleep".to_string()))
            .with("Sleep Type", PropertyValue::Select(kind.to_string()))
            .with("Deep Sleep (h)", PropertyValue::Number(1.4))
    }

    fn key(day: &str, kind: &str) -> NaturalKey {
        NaturalKey {
            date: day.to_string(),
            category: "Sleep".to_string(),
            discriminator: kind.to_string(),
        }
    }

    fn sleep_source(deep: i64) -> SourceRecord {
        SourceRecord::new(json!({
            "dailySleepDTO": {
                "calendarDate": "2024-01-15",
                "sleepStartTimestampGMT": 1_705_276_800_000_i64,
                "sleepEndTimestampGMT": 1_705_303_800_000_i64,
                "deepSleepSeconds": deep,
                "lightSleepSeconds": 10_800,
                "remSleepSeconds": 3_600
            },
            "restingHeartRate": 51
        }))
    }

    #[test]
    fn narrowing_covers_label_conditions_only() {
        let narrowing = sql_narrowing(&Filter::for_key(&FIELDS, &key("2024-01-15", "Nap")));
        assert_eq!(
            narrowing,
            vec![
                ("$.\"Category\".value".to_string(), "Sleep".to_string()),
                ("$.\"Sleep Type\".value".to_string(), "Nap".to_string()),
            ]
        );
    }

    #[test]
    fn quoted_property_names_still_match_without_narrowing() {
        const QUOTED: KeyFields = KeyFields {
            date: "Long Date",
            category: KeyField {
                property: "Category",
                form: KeyForm::Select,
            },
            discriminator: KeyField {
                property: "Sleep \"Type\"",
                form: KeyForm::Select,
            },
        };
        let mut store = fixture_store();
        let properties = Properties::new()
            .with("Long Date", PropertyValue::Date(DateRange::day("2024-01-15")))
            .with("Category", PropertyValue::Select("Sleep".to_string()))
            .with("Sleep \"Type\"", PropertyValue::Select("Nap".to_string()));
        let created = must_store(store.create("sleep", &properties));

        let filter = Filter::for_key(&QUOTED, &key("2024-01-15", "Nap"));
        assert_eq!(sql_narrowing(&filter).len(), 1);
        let found = must_store(store.query("sleep", &filter));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, created.id);

        let other = Filter::for_key(&QUOTED, &key("2024-01-15", "Main Sleep"));
        assert!(must_store(store.query("sleep", &other)).is_empty());
    }

    #[test]
    fn migrate_is_idempotent_and_registers_versions() {
        let store = fixture_store();
        must(store.migrate());
        assert_eq!(must(store.schema_versions()), vec![1, 2]);
    }

    #[test]
    fn query_matches_on_every_key_component() {
        let mut store = fixture_store();
        let main = must_store(store.create(
            "sleep",
            &sleep_properties("2024-01-15", "Main Sleep"),
        ));
        let _ = must_store(store.create("sleep", &sleep_properties("2024-01-15", "Nap")));
        let _ = must_store(store.create(
            "sleep",
            &sleep_properties("2024-01-14", "Main Sleep"),
        ));

        let filter = Filter::for_key(&FIELDS, &key("2024-01-15", "Main Sleep"));
        let found = must_store(store.query("sleep", &filter));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, main.id);
        assert_eq!(found[0].properties.number("Deep Sleep (h)"), Some(1.4));
    }

    #[test]
    fn update_patches_and_unknown_id_is_not_found() {
        let mut store = fixture_store();
        let created = must_store(store.create("sleep", &sleep_properties("2024-01-15", "Nap")));
        let patch = Properties::new().with("Deep Sleep (h)", PropertyValue::Number(0.5));

        let updated = must_store(store.update(&created.id, &patch));
        assert_eq!(updated.properties.number("Deep Sleep (h)"), Some(0.5));
        assert_eq!(updated.properties.label("Sleep Type"), Some("Nap"));
        assert!(matches!(
            store.update("01J0SQQP7M70P6Y3R4T8D8G8M2", &patch),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn documents_persist_across_reopen() {
        let path = temp_db_path();
        let reconciler = Reconciler::new(must_ok(SleepKind::new(&MapperConfig::v1())), "sleep");

        {
            let mut store = must(SqliteDocumentStore::open(&path));
            must(store.migrate());
            let report = sync_records(&reconciler, &[sleep_source(5025)], &mut store);
            assert_eq!(report.created, 1);
        }

        let mut reopened = must(SqliteDocumentStore::open(&path));
        must(reopened.migrate());
        let report = sync_records(&reconciler, &[sleep_source(5025)], &mut reopened);
        assert_eq!(report.outcomes[0].action, Action::Skipped);
        assert_eq!(must(reopened.count_documents("sleep")), 1);

        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn run_ledger_lists_newest_first() {
        let store = fixture_store();
        let mut first = SyncReport::new("sleep", "sleep");
        first.created = 3;
        let mut second = SyncReport::new("activities", "activities");
        second.failed = 1;

        let started = OffsetDateTime::now_utc();
        let recorded = must(store.record_run(&first, started, started, false));
        let _ = must(store.record_run(&second, started, started, true));

        let runs = must(store.list_runs(10));
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].kind, "activities");
        assert!(runs[0].dry_run);
        assert_eq!(runs[0].failed, 1);
        assert_eq!(runs[1].run_id, recorded.run_id);
        assert_eq!(runs[1].report, first);

        assert_eq!(must(store.list_runs(1)).len(), 1);
    }

    #[test]
    fn run_ledger_is_append_only() {
        let store = fixture_store();
        let report = SyncReport::new("sleep", "sleep");
        let now = OffsetDateTime::now_utc();
        let _ = must(store.record_run(&report, now, now, false));

        let result = store
            .connection()
            .execute("UPDATE sync_runs SET failed = 9", []);
        assert!(result.is_err());
    }

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }
}
