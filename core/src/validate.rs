//! Descriptor and manifest validation.
//!
//! Catches author mistakes such as blank table names, empty DDL, duplicate
//! tables, and invalid versions before a database is ever opened.
//!
//! # Examples
//!
//! ```
//! use tablekeeper_core::*;
//!
//! let tables = vec![
//!     TableInfo::new("users", "CREATE TABLE users (id INTEGER PRIMARY KEY)").unwrap(),
//!     TableInfo::new("users", "CREATE TABLE users (id INTEGER PRIMARY KEY)").unwrap(),
//! ];
//! let errors = validate_tables(&tables);
//! assert_eq!(errors, vec![ValidationError::DuplicateTable("users".into())]);
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::{DatabaseManifest, TableInfo};

/// Structural problems in table descriptors and database manifests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Table name is empty or whitespace-only.
    #[error("table name cannot be empty")]
    EmptyTableName,
    /// Table name contains characters other than ASCII alphanumerics and
    /// underscores, or starts with a digit.
    #[error("invalid table name '{0}': use letters, digits and underscores")]
    InvalidTableName(String),
    /// Create statement is empty.
    #[error("create statement for table '{0}' cannot be empty")]
    EmptyCreateStatement(String),
    /// Explicit drop statement is empty.
    #[error("drop statement for table '{0}' cannot be empty")]
    EmptyDropStatement(String),
    /// Two descriptors share a table name.
    #[error("duplicate table: {0}")]
    DuplicateTable(String),
    /// Database name is empty or whitespace-only.
    #[error("database name cannot be empty")]
    EmptyDatabaseName,
    /// Database name cannot be used as a file name.
    #[error("invalid database name '{0}'")]
    InvalidDatabaseName(String),
    /// Database file extension cannot be appended to a file name.
    #[error("invalid database file extension '{0}'")]
    InvalidExtension(String),
    /// Database version is 0 or does not fit `PRAGMA user_version`.
    #[error("database version must be between 1 and {max}, got {0}", max = MAX_VERSION)]
    InvalidVersion(u32),
    /// A migration is keyed by version 0.
    #[error("{direction} migration registered for version 0")]
    ZeroMigrationVersion {
        /// `"upgrade"` or `"downgrade"`.
        direction: String,
    },
    /// A manifest migration has no statements.
    #[error("{direction} migration for version {version} has no statements")]
    EmptyMigration {
        /// `"upgrade"` or `"downgrade"`.
        direction: String,
        /// Version the migration is keyed by.
        version: u32,
    },
}

/// Validates a list of table descriptors.
///
/// Each descriptor is checked individually, then names are checked for
/// uniqueness. All problems are reported, in declaration order.
pub fn validate_tables(tables: &[TableInfo]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for table in tables {
        if let Err(err) = table.validate() {
            errors.push(err);
            continue;
        }
        if !seen.insert(table.name()) {
            errors.push(ValidationError::DuplicateTable(table.name().to_string()));
        }
    }

    errors
}

/// Validates a database name used as a registry key and file stem.
pub fn validate_database_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyDatabaseName);
    }
    if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(ValidationError::InvalidDatabaseName(name.to_string()));
    }
    Ok(())
}

/// Validates the extension appended to database file names. Empty means
/// names are used verbatim.
pub fn validate_extension(extension: &str) -> Result<(), ValidationError> {
    if extension.starts_with('.')
        || extension.contains(['/', '\\', '\0'])
        || extension.chars().any(char::is_whitespace)
    {
        return Err(ValidationError::InvalidExtension(extension.to_string()));
    }
    Ok(())
}

/// Highest declarable database version. SQLite stores `user_version` as a
/// signed 32-bit integer.
pub const MAX_VERSION: u32 = i32::MAX as u32;

/// Validates a declared database version.
pub fn validate_version(version: u32) -> Result<(), ValidationError> {
    if version == 0 || version > MAX_VERSION {
        return Err(ValidationError::InvalidVersion(version));
    }
    Ok(())
}

/// Validates a full database manifest.
///
/// Stops at the first problem in the name/version header, then reports all
/// table and migration problems.
pub fn validate_manifest(manifest: &DatabaseManifest) -> Vec<ValidationError> {
    if let Err(err) = validate_database_name(&manifest.name) {
        return vec![err];
    }
    if let Err(err) = validate_version(manifest.version) {
        return vec![err];
    }

    let mut errors = validate_tables(&manifest.tables);

    for (direction, migrations) in [
        ("upgrade", &manifest.upgrades),
        ("downgrade", &manifest.downgrades),
    ] {
        for (version, statements) in migrations {
            if *version == 0 {
                errors.push(ValidationError::ZeroMigrationVersion {
                    direction: direction.to_string(),
                });
            } else if statements.iter().all(|s| s.trim().is_empty()) {
                errors.push(ValidationError::EmptyMigration {
                    direction: direction.to_string(),
                    version: *version,
                });
            }
        }
    }

    errors
}
