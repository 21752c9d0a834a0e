//! Error types for SQLite store operations.
//!
//! Provides a unified error type covering engine failures, configuration
//! mistakes, lifecycle misuse, and unrecoverable recreation failures.
//!
//! Errors raised by migration tasks never appear here: the executor turns
//! them into a recreation and reports them through
//! [`MigrationOutcome::Recreated`](crate::MigrationOutcome::Recreated).

use tablekeeper_core::{ConfigError, MigrationDirection, PlanError, ValidationError};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failure outside migration recovery.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No migration task is registered for a direction that is needed.
    #[error("can't {direction} database '{name}' from version {from} to {to}: no migrations registered")]
    MissingMigrations {
        /// Database name.
        name: String,
        /// Required direction.
        direction: MigrationDirection,
        /// Stored version.
        from: u32,
        /// Declared version.
        to: u32,
    },

    /// Executor called with versions that do not match its direction.
    #[error("can't {direction} database '{name}' from version {from} to {to}")]
    VersionMismatch {
        /// Database name.
        name: String,
        /// Direction of the executor that was called.
        direction: MigrationDirection,
        /// Stored version.
        from: u32,
        /// Declared version.
        to: u32,
    },

    /// The migration plan could not be built.
    #[error("migration plan error: {0}")]
    Plan(PlanError),

    /// A table descriptor or definition is structurally invalid.
    #[error("invalid database definition: {0}")]
    InvalidDefinition(#[from] ValidationError),

    /// Declared database version is 0 or above
    /// [`MAX_VERSION`](tablekeeper_core::MAX_VERSION).
    #[error("database '{name}' declares invalid version {version}")]
    InvalidVersion {
        /// Database name.
        name: String,
        /// Declared version.
        version: u32,
    },

    /// Database lookup with an empty name.
    #[error("database name is not specified")]
    EmptyDatabaseName,

    /// Database lookup for a name that was never registered.
    #[error("database with name '{0}' was not added")]
    UnknownDatabase(String),

    /// Data operation while no logical holder has the database open.
    #[error("database '{0}' is already closed")]
    Closed(String),

    /// Operation on a managed connection after it was shut down.
    #[error("database '{0}' has been shut down")]
    ShutDown(String),

    /// Transaction primitive used outside a transaction owned by the
    /// calling thread.
    #[error("no transaction in progress on database '{0}'")]
    NoTransaction(String),

    /// Database used from one of its own definition hooks while its
    /// physical connection is being acquired.
    #[error("database '{0}' used recursively while it is being opened")]
    Reentrant(String),

    /// Dropping or recreating tables after a failed migration failed too.
    #[error("failed to recreate database '{name}' after {direction} failure: {source}")]
    Recreation {
        /// Database name.
        name: String,
        /// Direction of the failed migration.
        direction: MigrationDirection,
        /// DDL error.
        #[source]
        source: rusqlite::Error,
    },

    /// Insert or update without any column values.
    #[error("no column values given for table '{0}'")]
    EmptyValues(String),

    /// Filesystem failure preparing the database directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file failure.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Returns `true` for caller or author mistakes that must never be
    /// retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingMigrations { .. }
                | Self::VersionMismatch { .. }
                | Self::Plan(_)
                | Self::InvalidDefinition(_)
                | Self::InvalidVersion { .. }
                | Self::EmptyDatabaseName
                | Self::UnknownDatabase(_)
                | Self::EmptyValues(_)
                | Self::Config(_)
        )
    }

    /// Returns `true` for open/close pairing misuse.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Self::Closed(_) | Self::ShutDown(_) | Self::NoTransaction(_) | Self::Reentrant(_)
        )
    }
}

/// Convenience alias for results with [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
