// 🗄️ Snapshot Store - append-only SQLite table keyed by (cnpj, snapshot_date)
//
// Statements live in free functions over `&Connection` so the ingestion
// pipeline can run them inside a transaction; `SnapshotStore` wraps a single
// connection for the rest of the process.

use crate::error::{Error, Result};
use crate::snapshot::{EntitySnapshot, COLUMNS};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub const TABLE: &str = "companies";

// ============================================================================
// SCHEMA
// ============================================================================

fn create_table_sql() -> String {
    let columns = COLUMNS
        .iter()
        .map(|col| match col.name {
            "cnpj" => "cnpj TEXT NOT NULL".to_string(),
            name => format!("{name} TEXT"),
        })
        .collect::<Vec<_>>()
        .join(",\n            ");

    format!(
        "CREATE TABLE IF NOT EXISTS {TABLE} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {columns},
            snapshot_date TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (cnpj, snapshot_date)
        )"
    )
}

fn insert_sql() -> String {
    let names = COLUMNS.iter().map(|col| col.name).collect::<Vec<_>>();
    let placeholders = (1..=names.len() + 1)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>();

    format!(
        "INSERT INTO {TABLE} ({}, snapshot_date) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Create the snapshot table and its indexes if they are missing.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute(&create_table_sql(), [])?;

    // The UNIQUE constraint already indexes (cnpj, snapshot_date), which
    // serves history lookups; the global-latest query filters on date alone.
    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_{TABLE}_snapshot_date ON {TABLE}(snapshot_date)"),
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITES
// ============================================================================

/// True iff a row for exactly this (identifier, date) pair is stored.
pub fn exists(conn: &Connection, identifier: &str, date: NaiveDate) -> Result<bool> {
    let found = conn
        .prepare_cached(&format!(
            "SELECT 1 FROM {TABLE} WHERE cnpj = ?1 AND snapshot_date = ?2 LIMIT 1"
        ))?
        .query_row(params![identifier, date], |_| Ok(()))
        .optional()?;

    Ok(found.is_some())
}

/// Append one snapshot row.
///
/// A second row for the same (identifier, date) pair is rejected with
/// [`Error::ConstraintViolation`]; the stored row is left untouched.
pub fn insert(conn: &Connection, snapshot: &EntitySnapshot) -> Result<()> {
    let mut values = snapshot.record.sql_values();
    values.push(&snapshot.snapshot_date);

    let mut stmt = conn.prepare_cached(&insert_sql())?;
    match stmt.execute(params_from_iter(values)) {
        Ok(_) => {
            debug!(cnpj = %snapshot.identifier(), date = %snapshot.snapshot_date, "snapshot inserted");
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::ConstraintViolation {
                identifier: snapshot.identifier().to_string(),
                snapshot_date: snapshot.snapshot_date,
            })
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// READS
// ============================================================================

fn query_snapshots<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<EntitySnapshot>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, EntitySnapshot::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Rows stamped with the table-wide maximum snapshot date, by legal name.
///
/// An entity missing from the latest run drops out of this view even if it
/// was never cancelled; see [`latest_rows_per_entity`].
pub fn latest_rows(conn: &Connection) -> Result<Vec<EntitySnapshot>> {
    query_snapshots(
        conn,
        &format!(
            "SELECT * FROM {TABLE}
             WHERE snapshot_date = (SELECT MAX(snapshot_date) FROM {TABLE})
             ORDER BY legal_name ASC, cnpj ASC"
        ),
        [],
    )
}

/// Each entity's own most recent row, by legal name.
pub fn latest_rows_per_entity(conn: &Connection) -> Result<Vec<EntitySnapshot>> {
    query_snapshots(
        conn,
        &format!(
            "SELECT c.* FROM {TABLE} c
             JOIN (SELECT cnpj, MAX(snapshot_date) AS latest FROM {TABLE} GROUP BY cnpj) m
               ON c.cnpj = m.cnpj AND c.snapshot_date = m.latest
             ORDER BY c.legal_name ASC, c.cnpj ASC"
        ),
        [],
    )
}

/// Every stored version of one entity, most recent first.
///
/// `identifier` must already be canonical (see [`crate::identifier::normalize`]).
pub fn history_for(conn: &Connection, identifier: &str) -> Result<Vec<EntitySnapshot>> {
    query_snapshots(
        conn,
        &format!("SELECT * FROM {TABLE} WHERE cnpj = ?1 ORDER BY snapshot_date DESC"),
        [identifier],
    )
}

pub fn latest_snapshot_date(conn: &Connection) -> Result<Option<NaiveDate>> {
    let date = conn.query_row(
        &format!("SELECT MAX(snapshot_date) FROM {TABLE}"),
        [],
        |row| row.get::<_, Option<NaiveDate>>(0),
    )?;

    Ok(date)
}

pub fn count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// SNAPSHOT STORE
// ============================================================================

/// Process-wide handle on the snapshot database.
///
/// Every operation takes the connection guard for its own duration only, and
/// the guard is released on every exit path.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open (or create) a file-backed store in WAL mode and ensure its schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "snapshot store opened");

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::StorePoisoned)
    }

    /// Run `f` with the connection held.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction: committed if `f` succeeds, rolled back otherwise.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // Dropping `tx` on the error path rolls it back.
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.with_connection(ensure_schema)
    }

    pub fn exists(&self, identifier: &str, date: NaiveDate) -> Result<bool> {
        self.with_connection(|conn| exists(conn, identifier, date))
    }

    pub fn insert(&self, snapshot: &EntitySnapshot) -> Result<()> {
        self.with_connection(|conn| insert(conn, snapshot))
    }

    pub fn latest_rows(&self) -> Result<Vec<EntitySnapshot>> {
        self.with_connection(latest_rows)
    }

    pub fn latest_rows_per_entity(&self) -> Result<Vec<EntitySnapshot>> {
        self.with_connection(latest_rows_per_entity)
    }

    pub fn history_for(&self, identifier: &str) -> Result<Vec<EntitySnapshot>> {
        self.with_connection(|conn| history_for(conn, identifier))
    }

    pub fn latest_snapshot_date(&self) -> Result<Option<NaiveDate>> {
        self.with_connection(latest_snapshot_date)
    }

    pub fn count(&self) -> Result<i64> {
        self.with_connection(count)
    }
}
