use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;

use super::{BuildRunRecord, FindingRecord};
use crate::analysis::Verdict;

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Error type for findings database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored verdict is neither `agreement` nor `divergence`.
    #[error("Invalid verdict '{0}' in findings table")]
    InvalidVerdict(String),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed store of build runs and findings.
#[derive(Debug)]
pub struct FindingsDb {
    conn: Connection,
}

impl FindingsDb {
    /// Open (or create) a findings database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> DbResult<i32> {
        current_schema_version(&self.conn)
    }

    /// Insert a build run and return its row id.
    pub fn insert_build_run(&self, record: &BuildRunRecord) -> DbResult<i64> {
        let gaps = serde_json::to_string(&record.gaps)?;
        self.conn.execute(
            r#"
            INSERT INTO build_runs (created_at, config_hash, blob_path, complete, gaps_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![record.created_at, record.config_hash, record.blob_path, record.complete, gaps],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List all build runs (ordered by id).
    pub fn list_build_runs(&self) -> DbResult<Vec<BuildRunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, config_hash, blob_path, complete, gaps_json
            FROM build_runs
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, created_at, config_hash, blob_path, complete, gaps) = row?;
            out.push(BuildRunRecord {
                id: Some(id),
                created_at,
                config_hash,
                blob_path,
                complete,
                gaps: serde_json::from_str(&gaps)?,
            });
        }
        Ok(out)
    }

    /// Insert a finding and return its row id.
    pub fn insert_finding(&self, record: &FindingRecord) -> DbResult<i64> {
        let clusters = serde_json::to_string(&record.clusters)?;
        let faulted = serde_json::to_string(&record.faulted)?;
        self.conn.execute(
            r#"
            INSERT INTO findings (created_at, function, run_label, predicate, verdict, clusters_json, faulted_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.created_at,
                record.function,
                record.run_label,
                record.predicate,
                record.verdict.as_str(),
                clusters,
                faulted
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List findings (ordered by id), optionally for one function only.
    pub fn list_findings(&self, function: Option<&str>) -> DbResult<Vec<FindingRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, function, run_label, predicate, verdict, clusters_json, faulted_json
            FROM findings
            WHERE ?1 IS NULL OR function = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![function], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, created_at, function, run_label, predicate, verdict, clusters, faulted) = row?;
            out.push(FindingRecord {
                id: Some(id),
                created_at,
                function,
                run_label,
                predicate,
                verdict: verdict_from_str(&verdict)?,
                clusters: serde_json::from_str(&clusters)?,
                faulted: serde_json::from_str(&faulted)?,
            });
        }
        Ok(out)
    }

    /// Number of divergent findings recorded for `function`.
    pub fn count_divergences(&self, function: &str) -> DbResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM findings WHERE function = ?1 AND verdict = ?2",
            params![function, Verdict::Divergence.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn verdict_from_str(value: &str) -> DbResult<Verdict> {
    match value {
        "agreement" => Ok(Verdict::Agreement),
        "divergence" => Ok(Verdict::Divergence),
        other => Err(DbError::InvalidVerdict(other.to_string())),
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: build_runs and findings
/// - 2: add predicate and faulted_json to findings
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let mut current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS build_runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at  TEXT NOT NULL,
                config_hash TEXT NOT NULL,
                blob_path   TEXT NOT NULL,
                complete    INTEGER NOT NULL,
                gaps_json   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS findings (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at    TEXT NOT NULL,
                function      TEXT NOT NULL,
                run_label     TEXT NOT NULL,
                verdict       TEXT NOT NULL,
                clusters_json TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            ALTER TABLE findings ADD COLUMN predicate TEXT NOT NULL DEFAULT 'exact';
            ALTER TABLE findings ADD COLUMN faulted_json TEXT NOT NULL DEFAULT '[]';
            CREATE INDEX IF NOT EXISTS idx_findings_function ON findings (function);
            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{analyze, ExecutionResult, Predicate, ResultVector};
    use crate::model::{GapReason, IncompletenessReport};

    #[test]
    fn fresh_db_is_at_current_version() {
        let db = FindingsDb::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn build_runs_keep_their_gaps() {
        let db = FindingsDb::open_in_memory().unwrap();
        let mut report = IncompletenessReport::new();
        report.record("X", "copy", GapReason::SymbolNotFound, None);
        let id = db.insert_build_run(&BuildRunRecord::new("abc", "blob.bc", &report)).unwrap();
        db.insert_build_run(&BuildRunRecord::new("def", "blob.bc", &IncompletenessReport::new())).unwrap();

        let runs = db.list_build_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, Some(id));
        assert!(!runs[0].complete);
        assert_eq!(runs[0].gaps, report.gaps);
        assert!(runs[1].complete);
    }

    #[test]
    fn findings_filter_by_function() {
        let db = FindingsDb::open_in_memory().unwrap();
        let results = ResultVector::new(vec![ExecutionResult::value("A", 5), ExecutionResult::value("B", 9)]);
        let report = analyze(&results, &Predicate::Exact);
        db.insert_finding(&FindingRecord::new("strlen", "run-1", &Predicate::Exact, &report)).unwrap();
        db.insert_finding(&FindingRecord::new("strcpy", "run-1", &Predicate::Exact, &report)).unwrap();

        let all = db.list_findings(None).unwrap();
        assert_eq!(all.len(), 2);
        let strlen = db.list_findings(Some("strlen")).unwrap();
        assert_eq!(strlen.len(), 1);
        assert_eq!(strlen[0].verdict, Verdict::Divergence);
        assert_eq!(strlen[0].clusters, report.clusters);
        assert_eq!(db.count_divergences("strlen").unwrap(), 1);
    }

    #[test]
    fn rejects_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }
        let err = FindingsDb::open(&path).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedSchemaVersion { found: 99, .. }));
    }

    #[test]
    fn unknown_verdict_is_an_error() {
        let db = FindingsDb::open_in_memory().unwrap();
        let results = ResultVector::new(vec![ExecutionResult::value("A", 5)]);
        let report = analyze(&results, &Predicate::Exact);
        db.insert_finding(&FindingRecord::new("strlen", "run-1", &Predicate::Exact, &report)).unwrap();
        db.conn.execute("UPDATE findings SET verdict = 'maybe'", []).unwrap();

        let err = db.list_findings(None).unwrap_err();
        assert!(matches!(err, DbError::InvalidVerdict(v) if v == "maybe"));
    }
}
