//! Read-only timeseries sources
//!
//! Each configured source is a SQLite file with two tables:
//!
//! ```sql
//! CREATE TABLE resources (ts REAL PRIMARY KEY NOT NULL, modified REAL,
//!                         path TEXT, type TEXT, content TEXT);
//! CREATE TABLE meta      (id INTEGER PRIMARY KEY, version INTEGER,
//!                         properties TEXT);
//! ```
//!
//! The server only reads: range queries over `resources` and the single
//! properties document from `meta`. One connection per source is opened
//! read-only at startup and shared behind a mutex; callers run queries on
//! the blocking thread pool.
//!
//! The range window is half-open on the lower bound, `ts > t0 AND ts <= t1`.
//! Consumers depend on that exact shape for gapless paging (the previous
//! page's `t1` becomes the next page's `t0`).

use cvl_core::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tokio::sync::Mutex;

/// One decoded timeseries row as served by `GET /ts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeseriesEvent {
    pub ts: f64,
    /// Name of the source the row came from.
    pub db: String,
    /// Row path, or `"<db>/<ts>"` when the row has none.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// The row's content, decoded from its stored JSON text.
    pub content: Value,
}

/// A single on-disk timeseries source.
pub struct TimeseriesDb {
    name: String,
    conn: Mutex<Connection>,
}

impl TimeseriesDb {
    /// Open `path` read-only. The source name is the file's basename.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| Error::Timeseries(format!("{}: {}", path.display(), e)))?;
        tracing::info!(db = %name, "timeseries source opened");
        Ok(Self {
            name,
            conn: Mutex::new(conn),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rows with `ts` in the half-open window `(t0, t1]`, ascending.
    pub fn range(&self, t0: f64, t1: f64) -> Result<Vec<TimeseriesEvent>> {
        let conn = self.conn.blocking_lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT ts, modified, path, type, content FROM resources \
                 WHERE ts > ?1 AND ts <= ?2 ORDER BY ts ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([t0, t1], |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(query_err)?;
        let mut events = Vec::new();
        for row in rows {
            let (ts, path, kind, content) = row.map_err(query_err)?;
            let content: Value = serde_json::from_str(&content)?;
            events.push(TimeseriesEvent {
                ts,
                db: self.name.clone(),
                path: path.unwrap_or_else(|| format!("{}/{}", self.name, format_stamp(ts))),
                kind,
                content,
            });
        }
        Ok(events)
    }

    /// The source's properties document.
    pub fn properties(&self) -> Result<Value> {
        let conn = self.conn.blocking_lock();
        let raw: String = conn
            .query_row("SELECT properties FROM meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .map_err(query_err)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn query_err(err: rusqlite::Error) -> Error {
    Error::Timeseries(err.to_string())
}

/// Render a stamp for a default path. Whole-second stamps keep a trailing
/// `.0` (`lake.db/2.0`), the form downstream path indexes are keyed by.
fn format_stamp(ts: f64) -> String {
    if ts.is_finite() && ts.fract() == 0.0 {
        format!("{ts:.1}")
    } else {
        ts.to_string()
    }
}
