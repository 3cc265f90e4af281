use std::sync::{Arc, RwLock};

use anyhow::Result;
use rusqlite::{Connection, Params, Transaction};
use rusqlite_migration::{Migrations, M};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for types that can be read back from query rows.
pub trait Entity: Serialize + DeserializeOwned {}

// Blanket implementation for any type that meets the requirements
impl<T> Entity for T where T: Serialize + DeserializeOwned {}

#[derive(Clone)]
pub struct Db {
    conn: Arc<RwLock<Connection>>,
}

impl Db {
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Db {
            conn: Arc::new(RwLock::new(conn)),
        };
        db.migrate(&migrations())?;

        Ok(db)
    }

    pub fn migrate(&self, migrations: &Migrations) -> Result<()> {
        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock for migration"))?;

        migrations.to_latest(&mut *conn)?;

        Ok(())
    }

    /// Calls the supplied closure with a database transaction that can be
    /// used to perform reads and writes. Commits automatically if the
    /// closure returns Ok, otherwise rolls back.
    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DbTransaction) -> Result<R>,
    {
        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;

        let txn = conn.transaction()?;
        let result = f(&DbTransaction { txn: &txn })?;
        txn.commit()?;

        Ok(result)
    }

    /// Shortcut to create a transaction and execute a query.
    /// See DbTransaction.query()
    pub fn query<T: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        self.transaction(|t| t.query(sql, params))
    }

    /// Shortcut to create a transaction and execute a statement.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.transaction(|t| t.execute(sql, params))
    }
}

/// Unit of work handed to Db::transaction closures. All writes performed
/// through one DbTransaction commit or roll back together.
pub struct DbTransaction<'a> {
    txn: &'a Transaction<'a>,
}

impl<'a> DbTransaction<'a> {
    pub fn connection(&self) -> &rusqlite::Connection {
        self.txn
    }

    /// Runs the query and maps each row to an entity via serde_rusqlite.
    pub fn query<T: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        log::debug!("SQL QUERY: {}", sql);
        let mut stmt = self.txn.prepare(sql)?;
        let entities = serde_rusqlite::from_rows::<T>(stmt.query(params)?)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        log::debug!("SQL EXECUTE: {}", sql);
        let affected = self.txn.execute(sql, params)?;
        log::debug!("SQL EXECUTE RESULT: {} rows affected", affected);
        Ok(affected)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.txn.last_insert_rowid()
    }
}

/// Schema for the proposal staging tables and the permanent history log.
/// The live zone and record tables belong to the surrounding application
/// and are not managed here.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "
        CREATE TABLE proposals (
            id         INTEGER PRIMARY KEY,
            initiator  TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE shadow_records (
            id               INTEGER PRIMARY KEY,
            zone_id          INTEGER NOT NULL,
            name             TEXT NOT NULL,
            type             TEXT NOT NULL,
            content          TEXT NOT NULL,
            ttl              INTEGER NOT NULL,
            priority         INTEGER NOT NULL,
            change_timestamp INTEGER
        );

        CREATE TABLE change_units (
            id              INTEGER PRIMARY KEY,
            proposal_id     INTEGER NOT NULL REFERENCES proposals(id),
            zone_id         INTEGER NOT NULL,
            base_serial     TEXT NOT NULL,
            prior_shadow_id INTEGER REFERENCES shadow_records(id),
            after_shadow_id INTEGER REFERENCES shadow_records(id),
            live_record_id  INTEGER
        );

        CREATE TABLE history_records (
            id               INTEGER PRIMARY KEY,
            zone_id          INTEGER NOT NULL,
            name             TEXT NOT NULL,
            type             TEXT NOT NULL,
            content          TEXT NOT NULL,
            ttl              INTEGER NOT NULL,
            priority         INTEGER NOT NULL,
            change_timestamp INTEGER
        );

        CREATE TABLE history_events (
            id          INTEGER PRIMARY KEY,
            occurred_at INTEGER NOT NULL,
            event       TEXT NOT NULL,
            user        TEXT NOT NULL,
            approved_by TEXT,
            zone_name   TEXT,
            prior_id    INTEGER REFERENCES history_records(id),
            after_id    INTEGER REFERENCES history_records(id)
        );
        ",
    )])
}
