//! Engine-independent building blocks for versioned embedded databases.
//!
//! This crate defines the pieces of a database definition that do not
//! depend on a particular SQL engine:
//!
//! - [`TableInfo`]: a table name with its create (and drop) DDL.
//! - [`ConflictPolicy`]: `ON CONFLICT` resolution for inserts and updates.
//! - [`MigrationDirection`]: upgrade or downgrade.
//! - [`plan_migration`]: orders and filters version-keyed migration tasks
//!   into a [`MigrationPlan`].
//! - [`StoreConfig`] and [`DatabaseManifest`]: YAML configuration.
//!
//! Validation ([`validate_tables`], [`validate_manifest`]) catches author
//! mistakes such as blank table names and duplicate tables.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use tablekeeper_core::*;
//!
//! let tables = vec![
//!     TableInfo::new("notes", "CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT)")
//!         .unwrap(),
//! ];
//! assert!(validate_tables(&tables).is_empty());
//!
//! // Downgrades walk versions from the top
//! let downgrades = HashMap::from([(1, "drop tags"), (2, "drop archive flag")]);
//! let plan = plan_migration(&downgrades, 3, 1).unwrap();
//! assert_eq!(plan.versions(), vec![2, 1]);
//! ```

mod config;
mod error;
mod plan;
mod types;
mod validate;

pub use config::{DatabaseManifest, JournalMode, StoreConfig};
pub use error::{ConfigError, Result};
pub use plan::{MigrationPlan, PlanError, PlanStep, plan_migration};
pub use types::*;
pub use validate::{
    MAX_VERSION, ValidationError, validate_database_name, validate_extension, validate_manifest,
    validate_tables, validate_version,
};
