use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;

use super::{
    AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore, DeadLetter, DeadLetterQuery,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        task_id TEXT,
        batch_id TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_task_id ON audit_events(task_id);
    CREATE INDEX IF NOT EXISTS idx_audit_events_batch_id ON audit_events(batch_id);
    CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);

    CREATE TABLE IF NOT EXISTS dead_letters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id INTEGER NOT NULL REFERENCES audit_events(id),
        task_id TEXT NOT NULL,
        batch_id TEXT NOT NULL,
        failed_at TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        error TEXT NOT NULL,
        envelope TEXT NOT NULL,
        replays INTEGER NOT NULL DEFAULT 0,
        replayed_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_dead_letters_batch_id ON dead_letters(batch_id);
"#;

const RECORD_COLUMNS: &str = "id, timestamp, event_type, task_id, batch_id, data";

const DEAD_LETTER_COLUMNS: &str =
    "id, task_id, batch_id, failed_at, attempts, error, envelope, replays, replayed_at";

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        AuditError::Database(e.to_string())
    }
}

/// Fixed-width UTC timestamps, so text order is time order.
fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    Ok(AuditRecord {
        id: row.get(0)?,
        timestamp: time_column(row, 1)?,
        event_type: row.get(2)?,
        task_id: row.get(3)?,
        batch_id: row.get(4)?,
        data: json_column(row, 5)?,
    })
}

fn dead_letter_from_row(row: &Row<'_>) -> rusqlite::Result<DeadLetter> {
    let replayed_at = match row.get::<_, Option<String>>(8)? {
        Some(_) => Some(time_column(row, 8)?),
        None => None,
    };
    Ok(DeadLetter {
        id: row.get(0)?,
        task_id: row.get(1)?,
        batch_id: row.get(2)?,
        failed_at: time_column(row, 3)?,
        attempts: row.get(4)?,
        error: row.get(5)?,
        envelope: json_column(row, 6)?,
        replays: row.get(7)?,
        replayed_at,
    })
}

/// SQLite-backed audit store with a dead-letter table for failed deliveries.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection lock poisoned".to_string()))
    }

    fn where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref task_id) = filter.task_id {
            conditions.push("task_id = ?".into());
            params.push(Box::new(task_id.clone()));
        }
        if let Some(ref batch_id) = filter.batch_id {
            conditions.push("batch_id = ?".into());
            params.push(Box::new(batch_id.clone()));
        }
        if !filter.event_types.is_empty() {
            let slots = vec!["?"; filter.event_types.len()].join(", ");
            conditions.push(format!("event_type IN ({})", slots));
            for event_type in &filter.event_types {
                params.push(Box::new(event_type.clone()));
            }
        }
        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?".into());
            params.push(Box::new(format_time(from)));
        }
        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?".into());
            params.push(Box::new(format_time(to)));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), params)
        }
    }

    /// Insert one event plus whatever dead-letter bookkeeping it implies.
    fn write_record(tx: &Transaction<'_>, record: &AuditRecord) -> Result<i64, AuditError> {
        let data = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        let timestamp = format_time(&record.timestamp);

        tx.execute(
            "INSERT INTO audit_events (timestamp, event_type, task_id, batch_id, data) VALUES (?, ?, ?, ?, ?)",
            params![timestamp, record.event_type, record.task_id, record.batch_id, data],
        )?;
        let event_id = tx.last_insert_rowid();

        match &record.data {
            // An envelope that never serialized has nothing to replay.
            AuditEvent::DeliveryFailed { envelope, .. } if envelope.is_null() => {}
            AuditEvent::DeliveryFailed {
                task_id,
                batch_id,
                attempts,
                error,
                envelope,
            } => {
                let envelope = serde_json::to_string(envelope)
                    .map_err(|e| AuditError::Serialization(e.to_string()))?;
                tx.execute(
                    "INSERT INTO dead_letters (event_id, task_id, batch_id, failed_at, attempts, error, envelope) VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![event_id, task_id, batch_id, timestamp, attempts, error, envelope],
                )?;
            }
            AuditEvent::DeliveryReplayed {
                dead_letter_id,
                error,
                ..
            } => {
                let replayed_at = error.is_none().then(|| timestamp.clone());
                tx.execute(
                    "UPDATE dead_letters SET replays = replays + 1, replayed_at = COALESCE(replayed_at, ?) WHERE id = ?",
                    params![replayed_at, dead_letter_id],
                )?;
            }
            _ => {}
        }

        Ok(event_id)
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert_batch(&self, records: &[AuditRecord]) -> Result<Vec<i64>, AuditError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let ids = records
            .iter()
            .map(|record| Self::write_record(&tx, record))
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit()?;
        Ok(ids)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;
        let (where_clause, mut params) = Self::where_clause(filter);
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT {} FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            RECORD_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let records = stmt
            .query_map(param_refs.as_slice(), record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.lock()?;
        let (where_clause, params) = Self::where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", where_clause);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn task_timeline(&self, task_id: &str) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM audit_events WHERE task_id = ? ORDER BY id ASC",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![task_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn dead_letters(&self, query: &DeadLetterQuery) -> Result<Vec<DeadLetter>, AuditError> {
        let conn = self.lock()?;
        let mut sql = format!("SELECT {} FROM dead_letters WHERE 1 = 1", DEAD_LETTER_COLUMNS);
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(ref batch_id) = query.batch_id {
            sql.push_str(" AND batch_id = ?");
            params.push(Box::new(batch_id.clone()));
        }
        if !query.include_replayed {
            sql.push_str(" AND replayed_at IS NULL");
        }
        sql.push_str(" ORDER BY id ASC LIMIT ?");
        params.push(Box::new(query.limit));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let letters = stmt
            .query_map(param_refs.as_slice(), dead_letter_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(letters)
    }

    fn dead_letter(&self, id: i64) -> Result<Option<DeadLetter>, AuditError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM dead_letters WHERE id = ?", DEAD_LETTER_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], dead_letter_from_row)
            .optional()?)
    }
}
