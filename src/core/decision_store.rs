//! Durable decision records backed by SQLite.
//!
//! One row per routed event. Rows move through
//! `pending → processing → {processed, failed}`; the store refuses any
//! update that would skip `processing` and silently ignores repeats, so
//! two producers racing on the same row cannot corrupt it.
//!
//! rusqlite is synchronous; every call runs on the blocking pool behind a
//! shared connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{AgentKind, DecisionRecord, DecisionStatus, DisruptionEvent, RoutingDecision};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decision {0} not found")]
    NotFound(i64),

    #[error("Invalid transition for decision {id}: {from} -> {to}")]
    InvalidTransition {
        id: i64,
        from: DecisionStatus,
        to: DecisionStatus,
    },

    #[error("Corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Store task failed: {0}")]
    Task(String),
}

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS decisions (
         id              INTEGER PRIMARY KEY AUTOINCREMENT,
         event_id        TEXT NOT NULL,
         event_json      TEXT NOT NULL,
         selected_agents TEXT NOT NULL,
         reason          TEXT NOT NULL DEFAULT '',
         severity        TEXT,
         status          TEXT NOT NULL DEFAULT 'pending'
                         CHECK (status IN ('pending', 'processing', 'processed', 'failed')),
         created_at      TEXT NOT NULL,
         processed_at    TEXT
     );
     CREATE INDEX IF NOT EXISTS idx_decisions_status_created
         ON decisions (status, created_at, id);",
)];

const COLUMNS: &str =
    "id, event_id, event_json, selected_agents, reason, severity, status, created_at, processed_at";

/// Handle to the decision table. Cheap to clone.
#[derive(Clone)]
pub struct DecisionStore {
    conn: Arc<Mutex<Connection>>,
}

impl DecisionStore {
    /// Open (creating if needed) the database at `path` and migrate it
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Persist a new pending decision. The only write path for new rows.
    pub async fn insert(
        &self,
        event: &DisruptionEvent,
        routing: &RoutingDecision,
    ) -> Result<DecisionRecord, StoreError> {
        let mut selected_agents = routing.selected_agents.clone();
        if !selected_agents.contains(&AgentKind::Monitoring) {
            selected_agents.push(AgentKind::Monitoring);
        }

        let event_json = event.to_json();
        let event_text = serde_json::to_string(&event_json)?;
        let agents_text = serde_json::to_string(&selected_agents)?;
        let event_id = event.event_id.clone();
        let reason = routing.reason.clone();
        let severity = event.primary_severity().map(str::to_string);
        // Stored at microsecond precision; keep the returned record identical
        let created_at = Utc::now().trunc_subsecs(6);

        let record_event_id = event_id.clone();
        let record_reason = reason.clone();
        let record_severity = severity.clone();

        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO decisions
                         (event_id, event_json, selected_agents, reason, severity, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
                    params![
                        event_id,
                        event_text,
                        agents_text,
                        reason,
                        severity,
                        format_ts(&created_at)
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        info!(decision_id = id, event_id = %record_event_id, agents = ?selected_agents, "Decision stored");

        Ok(DecisionRecord {
            id,
            event_id: record_event_id,
            event_json,
            selected_agents,
            reason: record_reason,
            severity: record_severity,
            status: DecisionStatus::Pending,
            created_at,
            processed_at: None,
        })
    }

    /// Pending decisions, oldest first
    pub async fn fetch_pending(&self, limit: usize) -> Result<Vec<DecisionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM decisions WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC LIMIT ?1",
                COLUMNS
            );
            query_records(conn, &sql, params![limit as i64])
        })
        .await
    }

    /// `pending → processing`. Returns false (no-op) if the row already
    /// left `pending`.
    pub async fn mark_processing(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let from = current_status(conn, id)?;
            if !from.can_transition_to(DecisionStatus::Processing) {
                debug!(decision_id = id, status = %from, "mark_processing: already claimed");
                return Ok(false);
            }

            let changed = conn.execute(
                "UPDATE decisions SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![DecisionStatus::Processing.as_str(), id, from.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// `processing → processed` (or `failed` when `success` is false),
    /// stamping `processed_at`. Terminal rows are left untouched.
    pub async fn mark_processed(&self, id: i64, success: bool) -> Result<bool, StoreError> {
        let target = if success {
            DecisionStatus::Processed
        } else {
            DecisionStatus::Failed
        };

        self.with_conn(move |conn| {
            let from = current_status(conn, id)?;
            if from.is_terminal() {
                return Ok(false);
            }
            if !from.can_transition_to(target) {
                return Err(StoreError::InvalidTransition { id, from, to: target });
            }

            let changed = conn.execute(
                "UPDATE decisions SET status = ?1, processed_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![target.as_str(), format_ts(&Utc::now()), id, from.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<DecisionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM decisions WHERE id = ?1", COLUMNS);
            Ok(query_records(conn, &sql, params![id])?.into_iter().next())
        })
        .await
    }

    /// Most recent decisions first, optionally filtered by status
    pub async fn list(
        &self,
        status: Option<DecisionStatus>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        self.with_conn(move |conn| match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM decisions WHERE status = ?1 ORDER BY id DESC LIMIT ?2",
                    COLUMNS
                );
                query_records(conn, &sql, params![status.as_str(), limit as i64])
            }
            None => {
                let sql = format!("SELECT {} FROM decisions ORDER BY id DESC LIMIT ?1", COLUMNS);
                query_records(conn, &sql, params![limit as i64])
            }
        })
        .await
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
             version    INTEGER PRIMARY KEY,
             applied_at TEXT NOT NULL
         );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for (version, sql) in MIGRATIONS {
        if *version > current {
            info!("Running decision store migration v{}", version);
            conn.execute_batch(sql).map_err(|e| StoreError::MigrationFailed {
                version: *version,
                reason: e.to_string(),
            })?;
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![version, format_ts(&Utc::now())],
            )?;
        }
    }

    Ok(())
}

fn current_status(conn: &Connection, id: i64) -> Result<DecisionStatus, StoreError> {
    let raw: Option<String> = conn
        .query_row("SELECT status FROM decisions WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;

    let raw = raw.ok_or(StoreError::NotFound(id))?;
    raw.parse().map_err(|_| StoreError::Corrupt {
        column: "status",
        value: raw,
    })
}

/// Row as stored, before decoding JSON and timestamps
struct RawRecord {
    id: i64,
    event_id: String,
    event_json: String,
    selected_agents: String,
    reason: String,
    severity: Option<String>,
    status: String,
    created_at: String,
    processed_at: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            event_json: row.get(2)?,
            selected_agents: row.get(3)?,
            reason: row.get(4)?,
            severity: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            processed_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<DecisionRecord, StoreError> {
        let status = self.status.parse().map_err(|_| StoreError::Corrupt {
            column: "status",
            value: self.status.clone(),
        })?;

        Ok(DecisionRecord {
            id: self.id,
            event_id: self.event_id,
            event_json: serde_json::from_str(&self.event_json)?,
            selected_agents: serde_json::from_str(&self.selected_agents)?,
            reason: self.reason,
            severity: self.severity,
            status,
            created_at: parse_ts("created_at", &self.created_at)?,
            processed_at: self
                .processed_at
                .as_deref()
                .map(|ts| parse_ts("processed_at", ts))
                .transpose()?,
        })
    }
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<DecisionRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, RawRecord::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RawRecord::decode).collect()
}

/// Fixed-width RFC 3339 so text order matches time order
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            column,
            value: raw.to_string(),
        })
}
