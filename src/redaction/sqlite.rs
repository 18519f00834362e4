//! SQLite-backed redaction request map.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::map::{MapResult, Records, ScavengeMap};

use super::RedactionRequestMap;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS RedactionRequests (
    key INTEGER PRIMARY KEY
)";

/// Persistent redaction request map stored in a SQLite table
///
/// The connection sits behind a mutex so the map can be shared with the
/// executor's workers, which only read from it.
pub struct SqliteRedactionRequestMap {
    conn: Mutex<Connection>,
}

impl SqliteRedactionRequestMap {
    /// Open (or create) the map in the database at `path`
    pub fn open(path: impl AsRef<Path>) -> MapResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create the map in a private in-memory database
    pub fn open_in_memory() -> MapResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Use an existing connection, creating the table if needed
    pub fn from_connection(conn: Connection) -> MapResult<Self> {
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_positions(&self, sql: &str, bounds: &[i64]) -> MapResult<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bounds.iter()), |row| {
            row.get::<_, i64>(0)
        })?;

        let mut positions = Vec::new();
        for row in rows {
            positions.push(row?);
        }
        Ok(positions)
    }
}

impl ScavengeMap<i64, ()> for SqliteRedactionRequestMap {
    fn set(&mut self, key: i64, _value: ()) -> MapResult<()> {
        self.conn.get_mut().execute(
            "INSERT INTO RedactionRequests (key) VALUES (?1) ON CONFLICT(key) DO NOTHING",
            params![key],
        )?;
        Ok(())
    }

    fn try_get_value(&self, key: &i64) -> MapResult<Option<()>> {
        let found = self
            .query_positions("SELECT key FROM RedactionRequests WHERE key = ?1", &[*key])?;
        Ok(if found.is_empty() { None } else { Some(()) })
    }

    fn try_remove(&mut self, key: &i64) -> MapResult<Option<()>> {
        let deleted = self
            .conn
            .get_mut()
            .execute("DELETE FROM RedactionRequests WHERE key = ?1", params![key])?;
        Ok(if deleted > 0 { Some(()) } else { None })
    }

    fn all_records(&self) -> MapResult<Records<i64, ()>> {
        let positions =
            self.query_positions("SELECT key FROM RedactionRequests ORDER BY key", &[])?;
        let records: Vec<(i64, ())> = positions.into_iter().map(|p| (p, ())).collect();
        Ok(records.into_iter())
    }
}

impl RedactionRequestMap for SqliteRedactionRequestMap {
    fn register_redaction_request(&mut self, position: i64) -> MapResult<()> {
        self.set(position, ())
    }

    fn redaction_targets(&self, start: i64, end_exclusive: i64) -> MapResult<Vec<i64>> {
        self.query_positions(
            "SELECT key FROM RedactionRequests WHERE key >= ?1 AND key < ?2 ORDER BY key",
            &[start, end_exclusive],
        )
    }

    fn delete_all(&mut self) -> MapResult<()> {
        self.conn
            .get_mut()
            .execute("DELETE FROM RedactionRequests", [])?;
        Ok(())
    }
}
