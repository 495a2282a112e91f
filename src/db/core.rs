use std::sync::{Arc, RwLock};

use anyhow::Result;
use include_dir::{include_dir, Dir};
use rusqlite::{functions::FunctionFlags, Connection, Params};
use rusqlite_migration::Migrations;
use uuid::Uuid;

use crate::config::RecordsConfig;
use crate::db::{transaction::DbTransaction, Entity};

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

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
        log::info!("Opening records database at {}", path.as_ref().display());
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens the configured database file, or an in-memory database when the
    /// config names none.
    pub fn open_with_config(config: &RecordsConfig) -> Result<Self> {
        match &config.database_path {
            Some(path) => Self::open(path),
            None => Self::open_memory(),
        }
    }

    /// Calls the supplied closure with a database transaction that can be
    /// used to perform writes to the database. Commits automatically
    /// if the closure returns Ok, otherwise rolls back.
    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DbTransaction) -> Result<R>,
    {
        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;

        let txn = conn.transaction()?;
        let result = f(&DbTransaction::new(self, &txn))?;
        txn.commit()?;

        Ok(result)
    }

    /// Shortcut to create a transaction and save a single entity.
    /// See DbTransaction::save()
    pub fn save<E: Entity>(&self, entity: &E) -> Result<E> {
        self.transaction(|txn| txn.save(entity))
    }

    pub fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let table_name = self.table_name_for_type::<E>()?;
        let sql = format!("SELECT * FROM {} WHERE id = ? LIMIT 1", table_name);
        Ok(self.query::<E, _>(&sql, [id])?.into_iter().next())
    }

    /// Runs a read query under the read lock and maps the rows onto `E`
    /// by column name.
    pub fn query<E: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<E>> {
        let conn = self
            .conn
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;

        log::debug!("SQL QUERY: {}", sql);
        let mut stmt = conn.prepare(sql)?;
        let entities = serde_rusqlite::from_rows::<E>(stmt.query(params)?)
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("SQL QUERY RESULT: {} rows", entities.len());
        Ok(entities)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.create_scalar_function("uuid7", 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
            Ok(Uuid::now_v7().to_string())
        })?;

        let migrations = Migrations::from_directory(&MIGRATIONS_DIR)?;
        migrations.to_latest(&mut conn)?;

        Ok(Db {
            conn: Arc::new(RwLock::new(conn)),
        })
    }

    #[cfg(test)]
    pub(crate) fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Connection> {
        self.conn.read().expect("read lock")
    }

    pub(crate) fn table_name_for_type<T>(&self) -> Result<String> {
        let full_name = std::any::type_name::<T>();
        // Extract just the struct name from the full path
        // e.g. "extension_records::db::types::Region" -> "Region"
        Ok(full_name.split("::").last().unwrap_or(full_name).to_string())
    }
}
