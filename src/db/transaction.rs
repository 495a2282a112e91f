use anyhow::Result;
use rusqlite::{Params, Transaction};
use uuid::Uuid;

use crate::db::{Db, Entity};

pub struct DbTransaction<'a> {
    db: &'a Db,
    txn: &'a Transaction<'a>,
}

impl<'a> DbTransaction<'a> {
    pub(crate) fn new(db: &'a Db, txn: &'a Transaction<'a>) -> Self {
        Self { db, txn }
    }

    pub fn connection(&self) -> &rusqlite::Connection {
        self.txn
    }

    /// Saves the entity to the database.
    ///
    /// The entity's type name is used for the table name, and the table
    /// columns are mapped to the entity fields using serde_rusqlite. If an
    /// entity with the same id already exists it is updated, otherwise a new
    /// entity is inserted with a new uuidv7 for its id. The saved entity is
    /// read back and returned.
    ///
    /// Note that only fields present in both the table and entity are mapped.
    pub fn save<E: Entity>(&self, entity: &E) -> Result<E> {
        let table_name = self.db.table_name_for_type::<E>()?;
        let table_columns = self.table_column_names(&table_name)?;

        // Convert the entity to a JSON Value so we can manipulate it
        // generically without needing more than Serialize.
        let mut value = serde_json::to_value(entity)?;
        let id = self.ensure_entity_id(&mut value)?;

        let column_names: Vec<String> = match value.as_object() {
            Some(fields) => table_columns
                .into_iter()
                .filter(|column| fields.contains_key(column))
                .collect(),
            None => anyhow::bail!("{} does not serialize to an object", table_name),
        };

        if self.exists(&table_name, &id)? {
            self.update_entity(&table_name, &column_names, &value)?;
        } else {
            self.insert_entity(&table_name, &column_names, &value)?;
        }

        self.get::<E>(&id)?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve saved {} {}", table_name, id))
    }

    pub fn query<E: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<E>> {
        log::debug!("SQL QUERY: {}", sql);
        let mut stmt = self.txn.prepare(sql)?;
        let entities = serde_rusqlite::from_rows::<E>(stmt.query(params)?)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    pub fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let table_name = self.db.table_name_for_type::<E>()?;
        let sql = format!("SELECT * FROM {} WHERE id = ? LIMIT 1", table_name);
        Ok(self.query::<E, _>(&sql, [id])?.into_iter().next())
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        log::debug!("SQL EXECUTE: {}", sql);
        let affected = self.txn.execute(sql, params)?;
        log::debug!("SQL EXECUTE RESULT: {} rows affected", affected);
        Ok(affected)
    }

    fn exists(&self, table_name: &str, id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ? LIMIT 1", table_name);
        Ok(self.txn.prepare(&sql)?.exists([id])?)
    }

    fn ensure_entity_id(&self, value: &mut serde_json::Value) -> Result<String> {
        match value.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => {
                let new_id = Uuid::now_v7().to_string();
                value["id"] = serde_json::Value::String(new_id.clone());
                Ok(new_id)
            }
        }
    }

    fn update_entity(&self, table_name: &str, column_names: &[String], value: &serde_json::Value) -> Result<()> {
        let set_clause = column_names
            .iter()
            .filter(|col| *col != "id")
            .map(|col| format!("{} = :{}", col, col))
            .collect::<Vec<_>>()
            .join(", ");

        if set_clause.is_empty() {
            return Ok(()); // Nothing to update
        }

        let sql = format!("UPDATE {} SET {} WHERE id = :id", table_name, set_clause);
        self.execute_with_named_params(&sql, value, column_names)
    }

    fn insert_entity(&self, table_name: &str, column_names: &[String], value: &serde_json::Value) -> Result<()> {
        let placeholders = column_names
            .iter()
            .map(|col| format!(":{}", col))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_name,
            column_names.join(", "),
            placeholders
        );
        self.execute_with_named_params(&sql, value, column_names)
    }

    fn execute_with_named_params(&self, sql: &str, value: &serde_json::Value, column_names: &[String]) -> Result<()> {
        log::debug!("SQL EXECUTE: {}", sql);
        let mut stmt = self.txn.prepare(sql)?;
        let str_refs: Vec<&str> = column_names.iter().map(|s| s.as_str()).collect();
        let params = serde_rusqlite::to_params_named_with_fields(value, &str_refs)?;
        let affected = stmt.execute(params.to_slice().as_slice())?;
        log::debug!("SQL EXECUTE RESULT: {} rows affected", affected);
        Ok(())
    }

    fn table_column_names(&self, table_name: &str) -> Result<Vec<String>> {
        let mut stmt = self.txn.prepare(&format!("PRAGMA table_info({})", table_name))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            anyhow::bail!("Table '{}' not found or has no columns", table_name);
        }
        Ok(columns)
    }
}
