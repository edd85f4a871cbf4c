use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::time::Duration;

use crate::transport::ViolationSink;
use crate::{now_s, ViolationEvent, Zone};

pub trait ViolationStore {
    fn append(&mut self, ev: &ViolationEvent) -> Result<i64>;

    /// Most recent violations first.
    fn recent(&mut self, limit: usize) -> Result<Vec<StoredViolation>>;

    /// Delete violations older than `retention`. Returns the number removed.
    fn enforce_retention(&mut self, retention: Duration) -> Result<usize>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredViolation {
    pub id: i64,
    #[serde(flatten)]
    pub event: ViolationEvent,
}

pub struct SqliteViolationStore {
    conn: Connection,
}

impl SqliteViolationStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS exception_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              time_occurred TEXT NOT NULL,
              username TEXT NOT NULL,
              employee_id TEXT NOT NULL,
              exception_type TEXT NOT NULL,
              incident_image TEXT NOT NULL,
              camera_id TEXT NOT NULL,
              zone TEXT NOT NULL,
              confidence REAL NOT NULL DEFAULT 0,
              created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_exception_logs_created ON exception_logs(created_at);
            "#,
        )?;
        Ok(())
    }
}

impl ViolationStore for SqliteViolationStore {
    fn append(&mut self, ev: &ViolationEvent) -> Result<i64> {
        let created_at = i64::try_from(ev.epoch_s)
            .map_err(|_| anyhow!("violation timestamp exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO exception_logs(
              time_occurred, username, employee_id, exception_type,
              incident_image, camera_id, zone, confidence, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                ev.timestamp,
                ev.identity_name,
                ev.identity_id,
                ev.violation,
                ev.image_path,
                ev.camera_id,
                ev.zone.as_str(),
                f64::from(ev.confidence),
                created_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<StoredViolation>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, time_occurred, username, employee_id, exception_type,
                   incident_image, camera_id, zone, confidence, created_at
            FROM exception_logs ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let zone: String = row.get(7)?;
            let confidence: f64 = row.get(8)?;
            let created_at: i64 = row.get(9)?;
            out.push(StoredViolation {
                id: row.get(0)?,
                event: ViolationEvent {
                    timestamp: row.get(1)?,
                    epoch_s: u64::try_from(created_at)
                        .map_err(|_| anyhow!("corrupt exception log: negative created_at"))?,
                    identity_name: row.get(2)?,
                    identity_id: row.get(3)?,
                    violation: row.get(4)?,
                    image_path: row.get(5)?,
                    camera_id: row.get(6)?,
                    zone: zone.parse::<Zone>()?,
                    confidence: confidence as f32,
                },
            });
        }
        Ok(out)
    }

    fn enforce_retention(&mut self, retention: Duration) -> Result<usize> {
        let now = now_s()? as i64;
        let cutoff = now - retention.as_secs() as i64;
        let removed = self.conn.execute(
            "DELETE FROM exception_logs WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

impl ViolationSink for SqliteViolationStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn publish(&mut self, ev: &ViolationEvent) -> Result<()> {
        self.append(ev).map(|_| ())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryViolationStore {
    entries: Vec<StoredViolation>,
    next_id: i64,
}

impl InMemoryViolationStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All stored events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &ViolationEvent> {
        self.entries.iter().map(|entry| &entry.event)
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn append(&mut self, ev: &ViolationEvent) -> Result<i64> {
        self.next_id += 1;
        self.entries.push(StoredViolation {
            id: self.next_id,
            event: ev.clone(),
        });
        Ok(self.next_id)
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<StoredViolation>> {
        Ok(self.entries.iter().rev().take(limit).cloned().collect())
    }

    fn enforce_retention(&mut self, retention: Duration) -> Result<usize> {
        let cutoff = now_s()?.saturating_sub(retention.as_secs());
        let before = self.entries.len();
        self.entries.retain(|entry| entry.event.epoch_s >= cutoff);
        Ok(before - self.entries.len())
    }
}

impl ViolationSink for InMemoryViolationStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&mut self, ev: &ViolationEvent) -> Result<()> {
        self.append(ev).map(|_| ())
    }
}
