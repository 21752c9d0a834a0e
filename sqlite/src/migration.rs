//! Migration execution and recovery.
//!
//! Runs the planned upgrade or downgrade tasks of a [`DatabaseDefinition`]
//! against a connection that is already inside the open transaction.
//!
//! Tasks run inside a savepoint. When a task fails:
//!
//! 1. the savepoint is rolled back, undoing the partial work of every task
//!    in the run;
//! 2. the definition's failure hook runs once with the stored and declared
//!    versions;
//! 3. every table is dropped and recreated from its descriptor, whether the
//!    hook succeeded, failed, or panicked.
//!
//! The run then reports [`MigrationOutcome::Recreated`] and the caller stamps
//! the declared version as usual. If the recreation itself fails the error
//! is returned and the caller's transaction is rolled back, leaving the file
//! at its old version with its old content.
//!
//! # Example
//!
//! ```
//! use rusqlite::Connection;
//! use tablekeeper_core::TableInfo;
//! use tablekeeper_sqlite::{DatabaseDefinition, Definition, MigrationOutcome, NoopTask, migration, schema};
//!
//! let conn = Connection::open_in_memory().unwrap();
//! let definition = Definition::new("app", 3)
//!     .with_table(TableInfo::new("t", "CREATE TABLE IF NOT EXISTS t (id INTEGER)").unwrap())
//!     .with_upgrade(2, NoopTask)
//!     .with_upgrade(3, NoopTask);
//! schema::create_tables(&conn, &definition.tables()).unwrap();
//!
//! let outcome = migration::upgrade(&conn, &definition, 1, 3).unwrap();
//! assert!(matches!(outcome, MigrationOutcome::Migrated { ref steps, .. } if steps == &[2, 3]));
//! ```

use std::panic::{self, AssertUnwindSafe};

use rusqlite::Connection;
use serde::Serialize;
use tablekeeper_core::{MigrationDirection, PlanError, TableInfo, plan_migration};
use tracing::{debug, info, warn};

use crate::definition::DatabaseDefinition;
use crate::error::{Result, StoreError};
use crate::schema;

const SAVEPOINT: &str = "tablekeeper_migration";

/// What happened to the schema while a physical connection was acquired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Stored version already matched the declared version.
    Opened {
        /// Schema version.
        version: u32,
    },
    /// Fresh file; every table was created.
    Created {
        /// Version stamped on the new file.
        version: u32,
    },
    /// Every planned task succeeded.
    Migrated {
        /// Direction of the run.
        direction: MigrationDirection,
        /// Stored version before the run.
        from: u32,
        /// Declared version after the run.
        to: u32,
        /// Task versions in execution order.
        steps: Vec<u32>,
    },
    /// A task failed; the tables were dropped and recreated empty.
    Recreated {
        /// Direction of the failed run.
        direction: MigrationDirection,
        /// Stored version before the run.
        from: u32,
        /// Declared version after the run.
        to: u32,
        /// Version key of the task that failed.
        failed_version: u32,
        /// Error reported by the task.
        error: String,
    },
}

impl MigrationOutcome {
    /// Schema version once the outcome is committed.
    pub fn version(&self) -> u32 {
        match self {
            Self::Opened { version } | Self::Created { version } => *version,
            Self::Migrated { to, .. } | Self::Recreated { to, .. } => *to,
        }
    }

    /// Returns `true` if the tables were recreated and their data lost.
    pub fn is_recreated(&self) -> bool {
        matches!(self, Self::Recreated { .. })
    }
}

/// Runs the upgrade tasks in `(from, to]`, ascending.
///
/// # Errors
///
/// Returns [`StoreError::MissingMigrations`] if no upgrade task is
/// registered at all, [`StoreError::VersionMismatch`] if `from >= to`,
/// [`StoreError::Plan`] if a task is keyed by 0, and
/// [`StoreError::Recreation`] if recovery from a failed task could not
/// rebuild the tables. No task runs when planning fails.
pub fn upgrade(
    conn: &Connection,
    definition: &dyn DatabaseDefinition,
    from: u32,
    to: u32,
) -> Result<MigrationOutcome> {
    run(conn, definition, MigrationDirection::Upgrade, from, to)
}

/// Runs the downgrade tasks in `[to, from)`, descending.
///
/// # Errors
///
/// Same as [`upgrade`], for the downgrade direction.
pub fn downgrade(
    conn: &Connection,
    definition: &dyn DatabaseDefinition,
    from: u32,
    to: u32,
) -> Result<MigrationOutcome> {
    run(conn, definition, MigrationDirection::Downgrade, from, to)
}

fn run(
    conn: &Connection,
    definition: &dyn DatabaseDefinition,
    expected: MigrationDirection,
    from: u32,
    to: u32,
) -> Result<MigrationOutcome> {
    let name = definition.name();
    let tasks = match expected {
        MigrationDirection::Upgrade => definition.upgrade_tasks(),
        MigrationDirection::Downgrade => definition.downgrade_tasks(),
    };

    if MigrationDirection::between(from, to) != Some(expected) {
        return Err(StoreError::VersionMismatch {
            name: name.to_string(),
            direction: expected,
            from,
            to,
        });
    }

    let plan = plan_migration(&tasks, from, to).map_err(|err| match err {
        PlanError::NoMigrations {
            direction,
            from,
            to,
        } => StoreError::MissingMigrations {
            name: name.to_string(),
            direction,
            from,
            to,
        },
        other => StoreError::Plan(other),
    })?;

    info!(
        database = name,
        direction = %expected,
        from,
        to,
        steps = ?plan.versions(),
        "migrating database"
    );

    conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))?;
    let mut completed = Vec::with_capacity(plan.len());
    for step in plan.steps() {
        debug!(database = name, version = step.version, "running migration task");
        if let Err(err) = step.task.migrate(conn) {
            warn!(
                database = name,
                direction = %expected,
                version = step.version,
                error = %err,
                "migration task failed, recreating tables"
            );
            conn.execute_batch(&format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT}"))?;
            recover(conn, definition, expected, from, to)?;
            return Ok(MigrationOutcome::Recreated {
                direction: expected,
                from,
                to,
                failed_version: step.version,
                error: err.to_string(),
            });
        }
        completed.push(step.version);
    }
    conn.execute_batch(&format!("RELEASE {SAVEPOINT}"))?;

    Ok(MigrationOutcome::Migrated {
        direction: expected,
        from,
        to,
        steps: completed,
    })
}

/// Calls the failure hook, then drops and recreates every table.
///
/// A hook panic is resumed only after the tables have been recreated.
fn recover(
    conn: &Connection,
    definition: &dyn DatabaseDefinition,
    direction: MigrationDirection,
    from: u32,
    to: u32,
) -> Result<()> {
    let name = definition.name();
    let hook = panic::catch_unwind(AssertUnwindSafe(|| match direction {
        MigrationDirection::Upgrade => definition.on_upgrade_failed(conn, from, to),
        MigrationDirection::Downgrade => definition.on_downgrade_failed(conn, from, to),
    }));
    if let Ok(Err(err)) = &hook {
        warn!(database = name, %direction, error = %err, "migration failure hook returned an error");
    }

    let tables = definition.tables();
    schema::recreate_tables(conn, &tables).map_err(|source| StoreError::Recreation {
        name: name.to_string(),
        direction,
        source,
    })?;
    info!(database = name, tables = tables.len(), "tables recreated");

    if let Err(payload) = hook {
        panic::resume_unwind(payload);
    }
    Ok(())
}

/// Snapshot of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    /// Table name.
    pub name: String,
    /// Whether the table exists in the file.
    pub exists: bool,
    /// Row count; `None` when the table is missing.
    pub rows: Option<u64>,
}

/// Snapshot of a database file's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Stored `user_version`.
    pub version: u32,
    /// Declared tables, in declaration order.
    pub tables: Vec<TableStatus>,
    /// Tables in the file that no descriptor declares.
    pub undeclared: Vec<String>,
}

impl MigrationStatus {
    /// Returns `true` if every declared table exists.
    pub fn tables_exist(&self) -> bool {
        self.tables.iter().all(|table| table.exists)
    }
}

/// Reads the stored version and per-table row counts.
///
/// With no descriptors, every table in the file is reported as declared.
pub fn status(conn: &Connection, tables: &[TableInfo]) -> rusqlite::Result<MigrationStatus> {
    let version = schema::read_version(conn)?;
    let present = schema::list_tables(conn)?;

    let names: Vec<String> = if tables.is_empty() {
        present.clone()
    } else {
        tables.iter().map(|table| table.name().to_string()).collect()
    };

    let mut statuses = Vec::with_capacity(names.len());
    for name in names {
        let exists = present.contains(&name);
        let rows = if exists {
            Some(schema::count_rows(conn, &name)?)
        } else {
            None
        };
        statuses.push(TableStatus { name, exists, rows });
    }

    let undeclared = present
        .into_iter()
        .filter(|name| !statuses.iter().any(|status| &status.name == name))
        .collect();

    Ok(MigrationStatus {
        version,
        tables: statuses,
        undeclared,
    })
}
