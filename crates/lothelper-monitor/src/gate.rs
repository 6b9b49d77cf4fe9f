//! Decides whether enough new training data exists to justify a run.
//!
//! The metadata cache is opened read-only; this subsystem never writes to
//! it. Progress is tracked in a separate cursor file holding the local
//! timestamp of the last committed run.

use crate::error::{MonitorError, MonitorResult};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CURSOR_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const COUNT_NEW_SQL: &str = "
    SELECT COUNT(*) FROM cached_books
    WHERE in_training = 1
      AND training_quality_score >= ?1
      AND (last_enrichment_at > ?2 OR metadata_fetched_at > ?2)";

const COUNT_ANY_NEW_SQL: &str = "
    SELECT COUNT(*) FROM cached_books
    WHERE in_training = 1
      AND (last_enrichment_at > ?1 OR metadata_fetched_at > ?1)";

const QUALITY_BANDS_SQL: &str = "
    SELECT
        COUNT(*),
        COALESCE(SUM(CASE WHEN training_quality_score >= 0.8 THEN 1 ELSE 0 END), 0),
        COALESCE(SUM(CASE WHEN training_quality_score >= 0.6 AND training_quality_score < 0.8 THEN 1 ELSE 0 END), 0),
        COALESCE(SUM(CASE WHEN training_quality_score >= 0.4 AND training_quality_score < 0.6 THEN 1 ELSE 0 END), 0),
        COALESCE(SUM(CASE WHEN training_quality_score < 0.4 OR training_quality_score IS NULL THEN 1 ELSE 0 END), 0)
    FROM cached_books
    WHERE in_training = 1";

/// Source of the "enough new data" decision.
pub trait TrainingDataGate: Send + Sync {
    /// Qualifying records added since the last consumed cursor.
    fn count_new(&self, min_quality_score: f64) -> MonitorResult<u64>;

    /// Advance the cursor so records seen so far no longer count as new.
    fn mark_consumed(&self, now: DateTime<Local>) -> MonitorResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateStatistics {
    pub total_eligible: u64,
    pub excellent: u64,
    pub good: u64,
    pub fair: u64,
    pub poor: u64,
    /// Eligible records touched since the cursor, regardless of quality.
    pub new_since_cursor: u64,
    pub cursor: NaiveDateTime,
}

/// Gate backed by the book metadata cache and a cursor file.
#[derive(Debug, Clone)]
pub struct SqliteGate {
    database: PathBuf,
    cursor_file: PathBuf,
}

impl SqliteGate {
    #[must_use]
    pub fn new(database: PathBuf, cursor_file: PathBuf) -> Self {
        Self { database, cursor_file }
    }

    #[must_use]
    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Timestamp of the last consumed batch, or the epoch default when
    /// nothing has been consumed yet.
    pub fn cursor(&self) -> MonitorResult<NaiveDateTime> {
        let raw = match std::fs::read_to_string(&self.cursor_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(default_cursor()),
            Err(e) => return Err(e.into()),
        };
        raw.trim().parse::<NaiveDateTime>().map_err(|e| {
            MonitorError::Config(format!("invalid cursor in {}: {e}", self.cursor_file.display()))
        })
    }

    pub fn statistics(&self) -> MonitorResult<GateStatistics> {
        let cursor = self.cursor()?;
        let conn = self.open()?;
        let (total, excellent, good, fair, poor) = conn.query_row(QUALITY_BANDS_SQL, [], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?, row.get::<_, i64>(4)?))
        })?;
        let new_since_cursor: i64 =
            conn.query_row(COUNT_ANY_NEW_SQL, params![format_cursor(&cursor)], |row| row.get(0))?;

        Ok(GateStatistics {
            total_eligible: to_count(total),
            excellent: to_count(excellent),
            good: to_count(good),
            fair: to_count(fair),
            poor: to_count(poor),
            new_since_cursor: to_count(new_since_cursor),
            cursor,
        })
    }

    fn open(&self) -> MonitorResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Connection::open_with_flags(&self.database, flags)?)
    }
}

impl TrainingDataGate for SqliteGate {
    fn count_new(&self, min_quality_score: f64) -> MonitorResult<u64> {
        let cursor = self.cursor()?;
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            COUNT_NEW_SQL,
            params![min_quality_score, format_cursor(&cursor)],
            |row| row.get(0),
        )?;
        debug!(cursor = %cursor, min_quality_score, count, "Checked training data gate");
        Ok(to_count(count))
    }

    fn mark_consumed(&self, now: DateTime<Local>) -> MonitorResult<()> {
        if let Some(parent) = self.cursor_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cursor = format_cursor(&now.naive_local());
        let tmp = self.cursor_file.with_extension("tmp");
        std::fs::write(&tmp, &cursor)?;
        std::fs::rename(&tmp, &self.cursor_file)?;
        info!(cursor = %cursor, "Advanced training data cursor");
        Ok(())
    }
}

fn default_cursor() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)).unwrap_or_default()
}

fn format_cursor(cursor: &NaiveDateTime) -> String {
    cursor.format(CURSOR_FORMAT).to_string()
}

fn to_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        gate: SqliteGate,
        conn: Connection,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("metadata_cache.db");
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE cached_books (
                isbn TEXT PRIMARY KEY,
                in_training INTEGER,
                training_quality_score REAL,
                last_enrichment_at TEXT,
                metadata_fetched_at TEXT
            );",
        )
        .unwrap();
        let gate = SqliteGate::new(db, temp.path().join("state/last_training_state.txt"));
        Fixture { _temp: temp, gate, conn }
    }

    fn insert(conn: &Connection, isbn: &str, in_training: i64, quality: f64, enriched: &str) {
        conn.execute(
            "INSERT INTO cached_books VALUES (?1, ?2, ?3, ?4, NULL)",
            params![isbn, in_training, quality, enriched],
        )
        .unwrap();
    }

    #[test]
    fn test_cursor_defaults_to_2000() {
        let fx = fixture();
        assert_eq!(fx.gate.cursor().unwrap().to_string(), "2000-01-01 00:00:00");
    }

    #[test]
    fn test_count_new_filters_quality_and_training_flag() {
        let fx = fixture();
        insert(&fx.conn, "a", 1, 0.9, "2025-01-10T10:00:00");
        insert(&fx.conn, "b", 1, 0.6, "2025-01-10T10:00:00");
        insert(&fx.conn, "c", 1, 0.3, "2025-01-10T10:00:00");
        insert(&fx.conn, "d", 0, 0.9, "2025-01-10T10:00:00");

        assert_eq!(fx.gate.count_new(0.6).unwrap(), 2);
        assert_eq!(fx.gate.count_new(0.8).unwrap(), 1);
    }

    #[test]
    fn test_mark_consumed_hides_older_records() {
        let fx = fixture();
        insert(&fx.conn, "a", 1, 0.9, "2025-01-10T10:00:00");
        insert(&fx.conn, "b", 1, 0.9, "2025-01-12T09:30:00.250000");

        let now = Local.with_ymd_and_hms(2025, 1, 11, 0, 0, 0).unwrap();
        fx.gate.mark_consumed(now).unwrap();

        assert_eq!(fx.gate.cursor().unwrap(), now.naive_local());
        assert_eq!(fx.gate.count_new(0.6).unwrap(), 1);
    }

    #[test]
    fn test_metadata_fetch_counts_as_new() {
        let fx = fixture();
        fx.conn
            .execute(
                "INSERT INTO cached_books VALUES ('x', 1, 0.7, NULL, '2025-02-01T08:00:00')",
                [],
            )
            .unwrap();
        assert_eq!(fx.gate.count_new(0.6).unwrap(), 1);
    }

    #[test]
    fn test_statistics_bands() {
        let fx = fixture();
        insert(&fx.conn, "a", 1, 0.95, "2025-01-10T10:00:00");
        insert(&fx.conn, "b", 1, 0.65, "2025-01-10T10:00:00");
        insert(&fx.conn, "c", 1, 0.45, "2025-01-10T10:00:00");
        insert(&fx.conn, "d", 1, 0.1, "2025-01-10T10:00:00");
        insert(&fx.conn, "e", 0, 0.9, "2025-01-10T10:00:00");

        let stats = fx.gate.statistics().unwrap();
        assert_eq!(stats.total_eligible, 4);
        assert_eq!((stats.excellent, stats.good, stats.fair, stats.poor), (1, 1, 1, 1));
        assert_eq!(stats.new_since_cursor, 4);
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let temp = TempDir::new().unwrap();
        let gate = SqliteGate::new(temp.path().join("absent.db"), temp.path().join("cursor"));
        assert!(matches!(gate.count_new(0.6), Err(MonitorError::Gate(_))));
    }
}
