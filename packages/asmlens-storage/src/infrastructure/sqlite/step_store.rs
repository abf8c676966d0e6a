use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{
    compute_overall_status, AnalysisRecord, OverallStatus, StepName, StepRecord, StepStateStore,
    StepStatus,
};
use crate::{Result, StorageError};

const STALE_MESSAGE: &str = "timed out (stale processing step reconciled)";

const STEP_COLUMNS: &str =
    "analysis_id, step, status, error_message, started_at, completed_at, retry_count";

/// SQLite-based StepStateStore implementation
#[derive(Clone)]
pub struct SqliteStepStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStepStore {
    /// Create a new SQLite store at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS analyses (
                id TEXT PRIMARY KEY,
                original_file_name TEXT NOT NULL,
                overall_status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        // seq preserves insertion order, which is execution order
        conn.execute(
            "CREATE TABLE IF NOT EXISTS analysis_steps (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id TEXT NOT NULL,
                step TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                started_at INTEGER,
                completed_at INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE (analysis_id, step),
                FOREIGN KEY (analysis_id) REFERENCES analyses(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_steps_status
             ON analysis_steps(status, started_at)",
            [],
        )?;

        Ok(())
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Raw column values; vocabulary parsing happens outside the rusqlite closure.
struct StepRow {
    analysis_id: String,
    step: String,
    status: String,
    error_message: Option<String>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    retry_count: i64,
}

impl StepRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            analysis_id: row.get(0)?,
            step: row.get(1)?,
            status: row.get(2)?,
            error_message: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            retry_count: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<StepRecord> {
        Ok(StepRecord {
            analysis_id: self.analysis_id,
            step: self.step.parse()?,
            status: self.status.parse()?,
            error_message: self.error_message,
            started_at: self.started_at.map(from_millis),
            completed_at: self.completed_at.map(from_millis),
            retry_count: u32::try_from(self.retry_count).unwrap_or_default(),
        })
    }
}

fn analysis_exists(conn: &Connection, analysis_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM analyses WHERE id = ?1",
            params![analysis_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn ensure_analysis(conn: &Connection, analysis_id: &str) -> Result<()> {
    if analysis_exists(conn, analysis_id)? {
        Ok(())
    } else {
        Err(StorageError::analysis_not_found(analysis_id))
    }
}

fn read_steps(conn: &Connection, analysis_id: &str) -> Result<Vec<StepRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM analysis_steps WHERE analysis_id = ?1 ORDER BY seq",
        STEP_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![analysis_id], StepRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(StepRow::into_record).collect()
}

fn find_step(conn: &Connection, analysis_id: &str, step: StepName) -> Result<Option<StepRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM analysis_steps WHERE analysis_id = ?1 AND step = ?2",
            STEP_COLUMNS
        ),
        params![analysis_id, step.as_str()],
        StepRow::from_row,
    )
    .optional()?
    .map(StepRow::into_record)
    .transpose()
}

fn load_step(conn: &Connection, analysis_id: &str, step: StepName) -> Result<StepRecord> {
    match find_step(conn, analysis_id, step)? {
        Some(record) => Ok(record),
        None => {
            ensure_analysis(conn, analysis_id)?;
            Err(StorageError::step_not_found(analysis_id, step))
        }
    }
}

/// Recomputes and persists the aggregate status.
fn refresh_overall(conn: &Connection, analysis_id: &str, now: i64) -> Result<OverallStatus> {
    let overall = compute_overall_status(&read_steps(conn, analysis_id)?);
    conn.execute(
        "UPDATE analyses SET overall_status = ?1, updated_at = ?2 WHERE id = ?3",
        params![overall.as_str(), now, analysis_id],
    )?;
    Ok(overall)
}

/// Applies one state-machine edge inside a transaction.
fn transition(
    conn: &Connection,
    analysis_id: &str,
    step: StepName,
    to: StepStatus,
    error: Option<&str>,
) -> Result<StepRecord> {
    let tx = conn.unchecked_transaction()?;
    let current = load_step(&tx, analysis_id, step)?;
    if !current.status.can_transition_to(to) {
        return Err(if to == StepStatus::Pending {
            StorageError::cannot_retry(step, current.status)
        } else {
            StorageError::invalid_transition(format!(
                "Step {} of analysis {}: {} -> {} is not allowed",
                step, analysis_id, current.status, to
            ))
        });
    }

    let now = to_millis(Utc::now());
    match to {
        StepStatus::Processing => tx.execute(
            "UPDATE analysis_steps
             SET status = ?1, started_at = ?2, completed_at = NULL, error_message = NULL
             WHERE analysis_id = ?3 AND step = ?4",
            params![to.as_str(), now, analysis_id, step.as_str()],
        )?,
        StepStatus::Completed => tx.execute(
            "UPDATE analysis_steps
             SET status = ?1, completed_at = ?2, error_message = NULL
             WHERE analysis_id = ?3 AND step = ?4",
            params![to.as_str(), now, analysis_id, step.as_str()],
        )?,
        StepStatus::Failed => tx.execute(
            "UPDATE analysis_steps
             SET status = ?1, completed_at = ?2, error_message = ?3
             WHERE analysis_id = ?4 AND step = ?5",
            params![to.as_str(), now, error.unwrap_or(""), analysis_id, step.as_str()],
        )?,
        StepStatus::Pending | StepStatus::NotProcessed => tx.execute(
            "UPDATE analysis_steps
             SET status = ?1, started_at = NULL, completed_at = NULL, error_message = NULL,
                 retry_count = retry_count + 1
             WHERE analysis_id = ?2 AND step = ?3",
            params![to.as_str(), analysis_id, step.as_str()],
        )?,
    };

    refresh_overall(&tx, analysis_id, now)?;
    let updated = load_step(&tx, analysis_id, step)?;
    tx.commit()?;
    Ok(updated)
}

#[async_trait]
impl StepStateStore for SqliteStepStore {
    async fn create_analysis(&self, record: &AnalysisRecord, steps: &[StepName]) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO analyses (id, original_file_name, overall_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &record.id,
                &record.original_file_name,
                record.overall_status.as_str(),
                to_millis(record.created_at),
                to_millis(record.updated_at),
            ],
        )?;
        for step in steps {
            tx.execute(
                "INSERT INTO analysis_steps (analysis_id, step, status, retry_count)
                 VALUES (?1, ?2, ?3, 0)",
                params![&record.id, step.as_str(), StepStatus::Pending.as_str()],
            )
            .map_err(|err| match StorageError::from(err) {
                e if e.kind == crate::ErrorKind::DuplicateStep => {
                    StorageError::duplicate_step(&record.id, step)
                }
                e => e,
            })?;
        }
        refresh_overall(&tx, &record.id, to_millis(record.updated_at))?;
        tx.commit()?;

        tracing::debug!(analysis_id = %record.id, steps = steps.len(), "analysis created");
        Ok(())
    }

    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRecord> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, original_file_name, overall_status, created_at, updated_at
                 FROM analyses WHERE id = ?1",
                params![analysis_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let (id, original_file_name, overall, created_at, updated_at) =
            row.ok_or_else(|| StorageError::analysis_not_found(analysis_id))?;
        Ok(AnalysisRecord {
            id,
            original_file_name,
            overall_status: overall.parse()?,
            created_at: from_millis(created_at),
            updated_at: from_millis(updated_at),
        })
    }

    async fn list_steps(&self, analysis_id: &str) -> Result<Vec<StepRecord>> {
        let conn = self.conn.lock();
        ensure_analysis(&conn, analysis_id)?;
        read_steps(&conn, analysis_id)
    }

    async fn get_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        let conn = self.conn.lock();
        load_step(&conn, analysis_id, step)
    }

    async fn claim_next_pending(&self, analysis_id: &str) -> Result<Option<StepRecord>> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        ensure_analysis(&tx, analysis_id)?;

        let next: Option<String> = tx
            .query_row(
                "SELECT step FROM analysis_steps
                 WHERE analysis_id = ?1 AND status = ?2
                 ORDER BY seq LIMIT 1",
                params![analysis_id, StepStatus::Pending.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(step) = next else {
            return Ok(None);
        };
        let step: StepName = step.parse()?;

        let now = to_millis(Utc::now());
        let claimed = tx.execute(
            "UPDATE analysis_steps
             SET status = ?1, started_at = ?2, completed_at = NULL, error_message = NULL
             WHERE analysis_id = ?3 AND step = ?4 AND status = ?5",
            params![
                StepStatus::Processing.as_str(),
                now,
                analysis_id,
                step.as_str(),
                StepStatus::Pending.as_str(),
            ],
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        refresh_overall(&tx, analysis_id, now)?;
        let record = load_step(&tx, analysis_id, step)?;
        tx.commit()?;

        tracing::debug!(analysis_id, step = %step, "step claimed");
        Ok(Some(record))
    }

    async fn complete_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        let conn = self.conn.lock();
        transition(&conn, analysis_id, step, StepStatus::Completed, None)
    }

    async fn fail_step(&self, analysis_id: &str, step: StepName, error: &str) -> Result<StepRecord> {
        let conn = self.conn.lock();
        transition(&conn, analysis_id, step, StepStatus::Failed, Some(error))
    }

    async fn reset_failed_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        let conn = self.conn.lock();
        transition(&conn, analysis_id, step, StepStatus::Pending, None)
    }

    async fn add_optional_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        ensure_analysis(&tx, analysis_id)?;

        if find_step(&tx, analysis_id, step)?.is_some() {
            return Err(StorageError::duplicate_step(analysis_id, step));
        }
        if step.is_required() {
            return Err(StorageError::invalid_transition(format!(
                "{} is a required step and cannot be added later",
                step
            )));
        }
        let steps = read_steps(&tx, analysis_id)?;
        let outstanding: Vec<String> = steps
            .iter()
            .filter(|s| s.step.is_required() && s.status != StepStatus::Completed)
            .map(|s| format!("{} ({})", s.step, s.status))
            .collect();
        if !outstanding.is_empty() {
            return Err(StorageError::invalid_transition(format!(
                "{} requires all required steps to be completed; outstanding: {}",
                step,
                outstanding.join(", ")
            )));
        }

        tx.execute(
            "INSERT INTO analysis_steps (analysis_id, step, status, retry_count)
             VALUES (?1, ?2, ?3, 0)",
            params![analysis_id, step.as_str(), StepStatus::Pending.as_str()],
        )?;
        refresh_overall(&tx, analysis_id, to_millis(Utc::now()))?;
        let record = load_step(&tx, analysis_id, step)?;
        tx.commit()?;
        Ok(record)
    }

    async fn reconcile_stale_steps(&self, max_age: chrono::Duration) -> Result<Vec<StepRecord>> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now();
        let cutoff = to_millis(now - max_age);

        let stale = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM analysis_steps
                 WHERE status = ?1 AND started_at IS NOT NULL AND started_at < ?2
                 ORDER BY seq",
                STEP_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![StepStatus::Processing.as_str(), cutoff],
                    StepRow::from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(StepRow::into_record)
                .collect::<Result<Vec<_>>>()?
        };

        let mut reconciled = Vec::with_capacity(stale.len());
        for record in stale {
            tx.execute(
                "UPDATE analysis_steps
                 SET status = ?1, completed_at = ?2, error_message = ?3
                 WHERE analysis_id = ?4 AND step = ?5",
                params![
                    StepStatus::Failed.as_str(),
                    to_millis(now),
                    STALE_MESSAGE,
                    &record.analysis_id,
                    record.step.as_str(),
                ],
            )?;
            refresh_overall(&tx, &record.analysis_id, to_millis(now))?;
            tracing::warn!(
                analysis_id = %record.analysis_id,
                step = %record.step,
                "stale processing step marked failed"
            );
            reconciled.push(load_step(&tx, &record.analysis_id, record.step)?);
        }
        tx.commit()?;
        Ok(reconciled)
    }

    async fn delete_analysis(&self, analysis_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM analyses WHERE id = ?1", params![analysis_id])?;
        Ok(removed > 0)
    }
}
