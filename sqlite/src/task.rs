//! Migration tasks.
//!
//! A [`MigrationTask`] is one unit of work bound to a version boundary. It
//! receives the live connection, already inside the migration transaction,
//! and signals a data error by returning `Err`. Any such error triggers the
//! recovery path described in [`migration`](crate::migration).
//!
//! Closures implement the trait directly:
//!
//! ```
//! use tablekeeper_sqlite::{MigrationTask, MigrationTasks, task_map};
//!
//! let tasks: MigrationTasks = task_map([
//!     (2, |conn: &rusqlite::Connection| {
//!         conn.execute_batch("ALTER TABLE notes ADD COLUMN pinned INTEGER DEFAULT 0")
//!     }),
//! ]);
//! assert!(tasks.contains_key(&2));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::ffi;

/// A unit of work transforming the database past one version boundary.
pub trait MigrationTask: Send + Sync {
    /// Runs the task against the live connection.
    fn migrate(&self, conn: &Connection) -> rusqlite::Result<()>;
}

impl<F> MigrationTask for F
where
    F: Fn(&Connection) -> rusqlite::Result<()> + Send + Sync,
{
    fn migrate(&self, conn: &Connection) -> rusqlite::Result<()> {
        self(conn)
    }
}

/// Registration map from version boundary to task.
pub type MigrationTasks = HashMap<u32, Arc<dyn MigrationTask>>;

/// Builds a [`MigrationTasks`] map from `(version, task)` pairs.
pub fn task_map<T, I>(entries: I) -> MigrationTasks
where
    T: MigrationTask + 'static,
    I: IntoIterator<Item = (u32, T)>,
{
    entries
        .into_iter()
        .map(|(version, task)| (version, Arc::new(task) as Arc<dyn MigrationTask>))
        .collect()
}

/// Task that does nothing.
///
/// Useful to mark a version bump that needs no data changes while still
/// keeping the registration map non-empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTask;

impl MigrationTask for NoopTask {
    fn migrate(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }
}

/// Task that executes SQL statements in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTask {
    statements: Vec<String>,
}

impl SqlTask {
    /// Creates a task from statements; blank statements are skipped.
    pub fn new<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.trim().is_empty())
                .collect(),
        }
    }

    /// Statements in execution order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

impl MigrationTask for SqlTask {
    fn migrate(&self, conn: &Connection) -> rusqlite::Result<()> {
        for sql in &self.statements {
            conn.execute_batch(sql)?;
        }
        Ok(())
    }
}

/// Task that always fails with a data error.
///
/// Exercises the recovery path in tests and demos.
#[derive(Clone, PartialEq, Eq)]
pub struct FailingTask {
    message: String,
}

impl FailingTask {
    /// Creates a task failing with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Debug for FailingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FailingTask").field(&self.message).finish()
    }
}

impl MigrationTask for FailingTask {
    fn migrate(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Err(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_ABORT),
            Some(self.message.clone()),
        ))
    }
}
