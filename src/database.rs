//! SQLite execution backend.
//!
//! One connection is opened at startup and shared by every request. rusqlite
//! connections are not `Sync`, so calls go through a mutex on a blocking
//! thread; each statement holds the lock for exactly one call.
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Number, Value};
use tracing::{debug, info, warn};

use crate::error::ExecutorError;

/// One result row: column name → value, in column order.
pub type Row = Map<String, Value>;

/// Opaque SQL executor the gateway runs statements against.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn run(&self, sql: &str) -> Result<Vec<Row>, ExecutorError>;
}

pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
    max_rows: usize,
}

impl SqliteExecutor {
    /// Open (or create) the database file. Failing here is fatal at startup.
    pub fn open(path: impl AsRef<Path>, max_rows: usize) -> Result<Self, ExecutorError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!("Database opened: {}", path.as_ref().display());
        Ok(Self::from_connection(conn, max_rows))
    }

    pub fn from_connection(conn: Connection, max_rows: usize) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_rows,
        }
    }

    /// One line per table or view: `- name(col1, col2, ...)`.
    pub async fn describe(&self) -> Result<String, ExecutorError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| ExecutorError::Poisoned)?;
            describe_schema(&conn)
        })
        .await
        .map_err(|e| ExecutorError::Task(e.to_string()))?
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn run(&self, sql: &str) -> Result<Vec<Row>, ExecutorError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let max_rows = self.max_rows;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| ExecutorError::Poisoned)?;
            query_rows(&conn, &sql, max_rows)
        })
        .await
        .map_err(|e| ExecutorError::Task(e.to_string()))?
    }
}

fn query_rows(conn: &Connection, sql: &str, max_rows: usize) -> Result<Vec<Row>, ExecutorError> {
    let mut stmt = conn.prepare(sql)?;

    if stmt.column_count() == 0 {
        let changed = stmt.execute([])?;
        debug!("Statement changed {} row(s)", changed);
        return Ok(Vec::new());
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        if out.len() == max_rows {
            warn!("Result truncated at {} rows", max_rows);
            break;
        }
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(B64.encode(bytes)),
    }
}

fn describe_schema(conn: &Connection) -> Result<String, ExecutorError> {
    let mut tables = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names: Vec<String> = tables
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        let mut info = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let columns: Vec<String> = info
            .query_map([&name], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        lines.push(format!("- {}({})", name, columns.join(", ")));
    }
    Ok(lines.join("\n"))
}
