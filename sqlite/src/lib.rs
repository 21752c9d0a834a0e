//! SQLite storage with versioned migrations.
//!
//! This crate manages named SQLite database files whose schema is declared
//! by a [`DatabaseDefinition`]: a list of tables, a version, and the
//! upgrade and downgrade tasks that move existing files between versions.
//! When a migration task fails, the tables are dropped and recreated empty
//! after the definition's failure hook has had a chance to run.
//!
//! # Architecture
//!
//! - **`schema`**: DDL execution and `PRAGMA user_version` tracking
//! - **`task`**: migration tasks (closures, SQL lists, no-op, failing)
//! - **`definition`**: what a database author supplies
//! - **`migration`**: plan execution, failure hooks, recreation
//! - **`helper`**: create/upgrade/downgrade on connection acquisition
//! - **`database`**: reference-counted managed connection and statements
//! - **`registry`**: named directory of managed connections
//! - **`dao`**: generic CRUD over one table
//!
//! # Quick start
//!
//! ```no_run
//! use tablekeeper_core::{StoreConfig, TableInfo};
//! use tablekeeper_sqlite::{DatabaseRegistry, Definition, SqlTask};
//!
//! let registry = DatabaseRegistry::new(StoreConfig::in_directory("data"));
//! registry
//!     .add_database(
//!         Definition::new("notes", 2)
//!             .with_table(
//!                 TableInfo::new(
//!                     "notes",
//!                     "CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT, pinned INTEGER)",
//!                 )
//!                 .unwrap(),
//!             )
//!             .with_upgrade(2, SqlTask::new(["ALTER TABLE notes ADD COLUMN pinned INTEGER"])),
//!     )
//!     .unwrap();
//!
//! let notes = registry.get_database("notes").unwrap();
//! let db = notes.acquire().unwrap();
//! println!("{:?}", db.last_outcome());
//! ```

mod dao;
mod database;
mod definition;
mod error;
pub mod helper;
pub mod migration;
mod registry;
pub mod schema;
mod task;
mod values;

pub use dao::{Dao, EntityMapper};
pub use database::{Database, DatabaseGuard};
pub use definition::{
    ConnectionHook, DatabaseDefinition, Definition, FailureHook, validate_definition,
};
pub use error::{Result, StoreError};
pub use migration::{MigrationOutcome, MigrationStatus, TableStatus};
pub use registry::DatabaseRegistry;
pub use task::{FailingTask, MigrationTask, MigrationTasks, NoopTask, SqlTask, task_map};
pub use values::{Record, SearchCondition, Values};
