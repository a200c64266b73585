//! Warehouse connection and schema management.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use thiserror::Error;

use crate::db::ddl::{self, TableDef};

/// Errors raised by the warehouse executor.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Cannot connect to warehouse {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: diesel::ConnectionError,
    },

    #[error("Statement failed on table {table}: {source}")]
    Ddl {
        table: &'static str,
        #[source]
        source: diesel::result::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// The single warehouse session held for the duration of a run.
///
/// The connection is closed when the value is dropped, on success and on error alike.
pub struct Warehouse {
    conn: SqliteConnection,
}

impl Warehouse {
    /// Open a session against the given database URL (a file path or `:memory:`).
    pub fn connect(database_url: &str) -> Result<Self, WarehouseError> {
        let mut conn =
            SqliteConnection::establish(database_url).map_err(|source| {
                WarehouseError::Connection {
                    url: database_url.to_string(),
                    source,
                }
            })?;

        // Foreign keys are informational, as in the source warehouse. The time
        // dimension is derived from the fact table, so enforcing them at insert
        // time would reject every songplay.
        diesel::sql_query("PRAGMA foreign_keys = OFF").execute(&mut conn)?;

        tracing::debug!("Connected to warehouse at {}", database_url);
        Ok(Self { conn })
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Execute a statement for effect and return the affected row count.
    #[cfg(test)]
    pub(crate) fn execute(&mut self, statement: &str) -> Result<usize, WarehouseError> {
        Ok(diesel::sql_query(statement).execute(&mut self.conn)?)
    }

    /// Drop every catalog table, referencing tables first.
    pub fn drop_tables(&mut self) -> Result<(), WarehouseError> {
        for table in ddl::drop_order() {
            tracing::debug!("Dropping table {}", table.name);
            diesel::sql_query(table.drop_statement())
                .execute(&mut self.conn)
                .map_err(|source| WarehouseError::Ddl {
                    table: table.name,
                    source,
                })?;
        }
        Ok(())
    }

    /// Create every catalog table, referenced tables first.
    pub fn create_tables(&mut self) -> Result<(), WarehouseError> {
        for table in ddl::create_order() {
            tracing::debug!("Creating table {}", table.name);
            for statement in table.create_statements() {
                diesel::sql_query(statement)
                    .execute(&mut self.conn)
                    .map_err(|source| WarehouseError::Ddl {
                        table: table.name,
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Drop and recreate the whole schema, leaving every table empty.
    pub fn reset_schema(&mut self) -> Result<(), WarehouseError> {
        self.drop_tables()?;
        self.create_tables()
    }

    /// Number of rows currently in a catalog table.
    pub fn row_count(&mut self, table: &TableDef) -> Result<i64, WarehouseError> {
        let result = diesel::sql_query(format!("SELECT COUNT(*) AS cnt FROM \"{}\"", table.name))
            .get_result::<CountResult>(&mut self.conn)?;
        Ok(result.cnt)
    }

    /// Names of all user tables and indices, sorted, with their DDL.
    pub fn schema_objects(&mut self) -> Result<Vec<(String, String)>, WarehouseError> {
        let rows = diesel::sql_query(
            "SELECT name, COALESCE(sql, '') AS sql FROM sqlite_master \
             WHERE name NOT LIKE 'sqlite_%' ORDER BY type, name",
        )
        .load::<SchemaObject>(&mut self.conn)?;
        Ok(rows.into_iter().map(|r| (r.name, r.sql)).collect())
    }
}

/// Helper struct for count queries
#[derive(QueryableByName)]
pub(crate) struct CountResult {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub cnt: i64,
}

#[derive(QueryableByName)]
struct SchemaObject {
    #[diesel(sql_type = diesel::sql_types::Text)]
    name: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    sql: String,
}
