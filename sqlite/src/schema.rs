//! Schema DDL execution and introspection.
//!
//! Executes the create and drop statements of a database's
//! [`TableInfo`] descriptors and reads the native schema version stored in
//! `PRAGMA user_version`.
//!
//! Tables are created in declaration order and dropped in reverse
//! declaration order, so a table declared after the table it references is
//! dropped first.

use rusqlite::{Connection, OptionalExtension, params};
use tablekeeper_core::TableInfo;
use tracing::debug;

/// Creates every table, in declaration order.
pub fn create_tables(conn: &Connection, tables: &[TableInfo]) -> rusqlite::Result<()> {
    for table in tables {
        debug!(table = table.name(), "creating table");
        conn.execute_batch(table.create_statement())?;
    }
    Ok(())
}

/// Drops every table, in reverse declaration order.
///
/// Derived drop statements use `DROP TABLE IF EXISTS`, so missing tables
/// are tolerated.
pub fn drop_tables(conn: &Connection, tables: &[TableInfo]) -> rusqlite::Result<()> {
    for table in tables.iter().rev() {
        debug!(table = table.name(), "dropping table");
        conn.execute_batch(&table.drop_statement())?;
    }
    Ok(())
}

/// Drops and recreates every table, discarding all rows.
pub fn recreate_tables(conn: &Connection, tables: &[TableInfo]) -> rusqlite::Result<()> {
    drop_tables(conn, tables)?;
    create_tables(conn, tables)
}

/// Reads the schema version from `PRAGMA user_version`. Fresh files report 0.
pub fn read_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Writes the schema version to `PRAGMA user_version`.
pub fn write_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

/// Checks whether a table with the given name exists.
pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Lists user tables, excluding SQLite's internal `sqlite_*` tables.
pub fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Counts rows in a table.
///
/// The name is quoted as an identifier; callers pass names of existing
/// tables.
pub fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
    conn.query_row(&sql, [], |row| row.get(0))
}

/// Quotes an identifier for SQLite, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
