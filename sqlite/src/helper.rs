//! Physical connection setup.
//!
//! Opens a database file, applies connection settings, and brings the
//! schema to the definition's declared version inside one write
//! transaction:
//!
//! - stored version 0 (fresh file): every table is created;
//! - stored below declared: upgrade tasks run;
//! - stored above declared: downgrade tasks run;
//! - equal: nothing to do.
//!
//! The declared version is written to `PRAGMA user_version` in the same
//! transaction, so a crash mid-migration leaves the old version behind.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tablekeeper_core::StoreConfig;
use tracing::{debug, info};

use crate::definition::{DatabaseDefinition, validate_definition};
use crate::error::Result;
use crate::migration::{self, MigrationOutcome};
use crate::schema;

/// Opens `path`, creating it if needed, and prepares the schema.
///
/// # Errors
///
/// Returns engine errors from opening or configuring the file, and any
/// error from [`prepare`].
pub fn open(
    path: &Path,
    config: &StoreConfig,
    definition: &dyn DatabaseDefinition,
) -> Result<(Connection, MigrationOutcome)> {
    validate_definition(definition)?;
    debug!(database = definition.name(), path = %path.display(), "opening database file");
    let mut conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(&config.pragma_sql())?;
    let outcome = prepare(&mut conn, definition)?;
    Ok((conn, outcome))
}

/// Brings an open connection to the definition's declared version.
///
/// Runs the definition's `configure` hook first and its `on_open` hook
/// after the transaction commits.
///
/// # Errors
///
/// Returns [`StoreError::InvalidDefinition`](crate::StoreError::InvalidDefinition)
/// or [`StoreError::InvalidVersion`](crate::StoreError::InvalidVersion) for
/// a malformed definition, the migration errors of
/// [`migration::upgrade`], and engine errors. On error nothing is committed.
pub fn prepare(
    conn: &mut Connection,
    definition: &dyn DatabaseDefinition,
) -> Result<MigrationOutcome> {
    validate_definition(definition)?;
    definition.configure(conn)?;

    let name = definition.name();
    let declared = definition.version();
    let tx = conn.transaction()?;
    let stored = schema::read_version(&tx)?;

    let outcome = if stored == 0 {
        info!(database = name, version = declared, "creating database");
        schema::create_tables(&tx, &definition.tables())?;
        MigrationOutcome::Created { version: declared }
    } else if stored < declared {
        migration::upgrade(&tx, definition, stored, declared)?
    } else if stored > declared {
        migration::downgrade(&tx, definition, stored, declared)?
    } else {
        MigrationOutcome::Opened { version: stored }
    };

    if stored != declared {
        schema::write_version(&tx, declared)?;
    }
    tx.commit()?;

    definition.on_open(conn)?;
    Ok(outcome)
}

/// Drops and recreates every table. All rows are lost; the stored
/// version is left untouched.
pub fn recreate(conn: &mut Connection, definition: &dyn DatabaseDefinition) -> Result<()> {
    validate_definition(definition)?;
    let tx = conn.transaction()?;
    schema::recreate_tables(&tx, &definition.tables())?;
    tx.commit()?;
    info!(database = definition.name(), "database recreated");
    Ok(())
}
