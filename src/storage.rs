//! Durable audit log storage.
//!
//! One record per detection event, append-only; the log is the system of
//! record for who was seen when. `SqliteAuditStore` is the production
//! store (WAL, schema created on open); `InMemoryAuditStore` backs tests
//! and supports write-fault injection for exercising the sink's retry
//! path.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::faces::FaceRegion;

/// Audit status of a detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Recognized,
    Stranger,
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStatus::Recognized => "recognized",
            DetectionStatus::Stranger => "stranger",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "recognized" => Ok(DetectionStatus::Recognized),
            "stranger" => Ok(DetectionStatus::Stranger),
            other => anyhow::bail!("unknown detection status {other:?}"),
        }
    }
}

/// A detection ready to be appended. The store assigns the row id.
#[derive(Clone, Debug)]
pub struct NewDetection {
    /// Capture time, epoch seconds.
    pub recorded_at: u64,
    pub identity: String,
    pub confidence: f64,
    pub frame_seq: u64,
    pub region: FaceRegion,
    pub status: DetectionStatus,
    pub snapshot_path: Option<String>,
    /// Set when an alert's snapshot write failed; the record is still kept.
    pub snapshot_missing: bool,
}

/// A stored audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    pub recorded_at: u64,
    pub identity: String,
    pub confidence: f64,
    pub frame_seq: u64,
    pub region: FaceRegion,
    pub status: DetectionStatus,
    pub snapshot_path: Option<String>,
    pub snapshot_missing: bool,
}

/// Filters for reading the log back. Results come in append order.
#[derive(Clone, Debug)]
pub struct DetectionQuery {
    /// Only records with `recorded_at >=` this, epoch seconds.
    pub since: Option<u64>,
    pub status: Option<DetectionStatus>,
    pub limit: usize,
}

impl Default for DetectionQuery {
    fn default() -> Self {
        Self {
            since: None,
            status: None,
            limit: 100,
        }
    }
}

pub trait AuditStore: Send {
    /// Append one record, returning its id. Append-only; nothing updates
    /// or deletes records.
    fn append(&mut self, detection: &NewDetection) -> Result<i64>;

    fn read(&mut self, query: &DetectionQuery) -> Result<Vec<DetectionRecord>>;

    fn count(&mut self) -> Result<u64>;
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteAuditStore {
    conn: Connection,
}

impl SqliteAuditStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open audit database {db_path}"))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              recorded_at INTEGER NOT NULL,
              identity TEXT NOT NULL,
              confidence REAL NOT NULL,
              frame_seq INTEGER NOT NULL,
              region_json TEXT NOT NULL,
              status TEXT NOT NULL CHECK (status IN ('recognized', 'stranger')),
              snapshot_path TEXT,
              snapshot_missing INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_detections_recorded ON detections(recorded_at);
            "#,
        )?;
        Ok(())
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&mut self, detection: &NewDetection) -> Result<i64> {
        let region_json =
            serde_json::to_string(&detection.region).context("serialize detection region")?;
        self.conn.execute(
            r#"
            INSERT INTO detections(
              recorded_at, identity, confidence, frame_seq, region_json,
              status, snapshot_path, snapshot_missing
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                detection.recorded_at as i64,
                detection.identity,
                detection.confidence,
                detection.frame_seq as i64,
                region_json,
                detection.status.as_str(),
                detection.snapshot_path,
                detection.snapshot_missing,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn read(&mut self, query: &DetectionQuery) -> Result<Vec<DetectionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, recorded_at, identity, confidence, frame_seq, region_json,
                   status, snapshot_path, snapshot_missing
            FROM detections
            WHERE (?1 IS NULL OR recorded_at >= ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY id ASC
            LIMIT ?3
            "#,
        )?;
        let mut rows = stmt.query(params![
            query.since.map(|s| s as i64),
            query.status.map(|s| s.as_str()),
            query.limit as i64,
        ])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let region_json: String = row.get(5)?;
            let status: String = row.get(6)?;
            out.push(DetectionRecord {
                id: row.get(0)?,
                recorded_at: row.get::<_, i64>(1)? as u64,
                identity: row.get(2)?,
                confidence: row.get(3)?,
                frame_seq: row.get::<_, i64>(4)? as u64,
                region: serde_json::from_str(&region_json)
                    .context("parse stored detection region")?,
                status: DetectionStatus::parse(&status)?,
                snapshot_path: row.get(7)?,
                snapshot_missing: row.get(8)?,
            });
        }
        Ok(out)
    }

    fn count(&mut self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ----------------------------------------------------------------------------
// In-memory store (tests, fault injection)
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryAuditStore {
    records: Vec<DetectionRecord>,
    fail_next: u32,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail, to drive the sink's retry path.
    pub fn fail_next_appends(&mut self, n: u32) {
        self.fail_next = n;
    }

    pub fn records(&self) -> &[DetectionRecord] {
        &self.records
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&mut self, detection: &NewDetection) -> Result<i64> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            anyhow::bail!("injected storage failure");
        }
        let id = self.records.len() as i64 + 1;
        self.records.push(DetectionRecord {
            id,
            recorded_at: detection.recorded_at,
            identity: detection.identity.clone(),
            confidence: detection.confidence,
            frame_seq: detection.frame_seq,
            region: detection.region,
            status: detection.status,
            snapshot_path: detection.snapshot_path.clone(),
            snapshot_missing: detection.snapshot_missing,
        });
        Ok(id)
    }

    fn read(&mut self, query: &DetectionQuery) -> Result<Vec<DetectionRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| query.since.map_or(true, |since| r.recorded_at >= since))
            .filter(|r| query.status.map_or(true, |status| r.status == status))
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn count(&mut self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}

/// Shared handle so a test can keep inspecting a store it handed to the
/// sink thread.
impl AuditStore for Arc<Mutex<InMemoryAuditStore>> {
    fn append(&mut self, detection: &NewDetection) -> Result<i64> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .append(detection)
    }

    fn read(&mut self, query: &DetectionQuery) -> Result<Vec<DetectionRecord>> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .read(query)
    }

    fn count(&mut self) -> Result<u64> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn detection(identity: &str, status: DetectionStatus, recorded_at: u64) -> NewDetection {
        NewDetection {
            recorded_at,
            identity: identity.to_string(),
            confidence: if status == DetectionStatus::Recognized {
                0.8
            } else {
                0.0
            },
            frame_seq: recorded_at,
            region: FaceRegion {
                x: 4,
                y: 6,
                width: 40,
                height: 44,
            },
            status,
            snapshot_path: None,
            snapshot_missing: false,
        }
    }

    fn exercise_store(store: &mut dyn AuditStore) -> Result<()> {
        store.append(&detection("alice", DetectionStatus::Recognized, 100))?;
        store.append(&detection("unknown", DetectionStatus::Stranger, 200))?;
        store.append(&detection("bob", DetectionStatus::Recognized, 300))?;

        let all = store.read(&DetectionQuery::default())?;
        assert_eq!(all.len(), 3);
        assert_eq!(
            all.iter().map(|r| r.identity.as_str()).collect::<Vec<_>>(),
            vec!["alice", "unknown", "bob"],
            "records must come back in append order"
        );
        assert_eq!(all[0].region.width, 40);

        let strangers = store.read(&DetectionQuery {
            status: Some(DetectionStatus::Stranger),
            ..DetectionQuery::default()
        })?;
        assert_eq!(strangers.len(), 1);
        assert_eq!(strangers[0].identity, "unknown");

        let late = store.read(&DetectionQuery {
            since: Some(200),
            ..DetectionQuery::default()
        })?;
        assert_eq!(late.len(), 2);

        let limited = store.read(&DetectionQuery {
            limit: 1,
            ..DetectionQuery::default()
        })?;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].identity, "alice");

        assert_eq!(store.count()?, 3);
        Ok(())
    }

    #[test]
    fn sqlite_round_trip_and_filters() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("audit.db");
        let mut store = SqliteAuditStore::open(path.to_str().unwrap())?;
        exercise_store(&mut store)
    }

    #[test]
    fn in_memory_matches_sqlite_behavior() -> Result<()> {
        let mut store = InMemoryAuditStore::new();
        exercise_store(&mut store)
    }

    #[test]
    fn sqlite_records_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("audit.db");
        {
            let mut store = SqliteAuditStore::open(path.to_str().unwrap())?;
            let mut flagged = detection("unknown", DetectionStatus::Stranger, 50);
            flagged.snapshot_path = Some("alerts/stranger_50_1.jpg".to_string());
            flagged.snapshot_missing = true;
            store.append(&flagged)?;
        }

        let mut reopened = SqliteAuditStore::open(path.to_str().unwrap())?;
        let records = reopened.read(&DetectionQuery::default())?;
        assert_eq!(records.len(), 1);
        assert!(records[0].snapshot_missing);
        assert_eq!(
            records[0].snapshot_path.as_deref(),
            Some("alerts/stranger_50_1.jpg")
        );
        Ok(())
    }

    #[test]
    fn fault_injection_fails_then_recovers() {
        let mut store = InMemoryAuditStore::new();
        store.fail_next_appends(2);

        let d = detection("alice", DetectionStatus::Recognized, 10);
        assert!(store.append(&d).is_err());
        assert!(store.append(&d).is_err());
        assert!(store.append(&d).is_ok());
        assert_eq!(store.count().unwrap(), 1);
    }
}
