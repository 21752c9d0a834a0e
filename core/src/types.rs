//! Type definitions shared by every storage backend.
//!
//! This module defines the data model used to describe a versioned
//! database: the tables it owns ([`TableInfo`]), the conflict resolution
//! applied to writes ([`ConflictPolicy`]), and the direction of a version
//! transition ([`MigrationDirection`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validate::ValidationError;

/// Describes one table owned by a database definition.
///
/// A descriptor pairs a table name with the DDL needed to create it and,
/// optionally, an explicit statement to drop it. When no drop statement is
/// given, [`drop_statement`](Self::drop_statement) derives
/// `DROP TABLE IF EXISTS <name>`.
///
/// Descriptors are immutable once constructed.
///
/// # Examples
///
/// ```
/// use tablekeeper_core::TableInfo;
///
/// let table = TableInfo::new(
///     "contacts",
///     "CREATE TABLE IF NOT EXISTS contacts (id INTEGER PRIMARY KEY, name TEXT)",
/// )
/// .unwrap();
/// assert_eq!(table.name(), "contacts");
/// assert_eq!(table.drop_statement(), "DROP TABLE IF EXISTS contacts");
///
/// // Empty names are rejected
/// assert!(TableInfo::new("", "CREATE TABLE x (id INTEGER)").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    name: String,
    create: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    drop: Option<String>,
}

impl TableInfo {
    /// Creates a descriptor with a derived drop statement.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTableName`] or
    /// [`ValidationError::EmptyCreateStatement`] when either input is blank.
    pub fn new(
        name: impl Into<String>,
        create: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let table = Self {
            name: name.into(),
            create: create.into(),
            drop: None,
        };
        table.validate()?;
        Ok(table)
    }

    /// Creates a descriptor with an explicit drop statement.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), plus
    /// [`ValidationError::EmptyDropStatement`] for a blank drop statement.
    pub fn with_drop(
        name: impl Into<String>,
        create: impl Into<String>,
        drop: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let table = Self {
            name: name.into(),
            create: create.into(),
            drop: Some(drop.into()),
        };
        table.validate()?;
        Ok(table)
    }

    /// Checks the descriptor invariants.
    ///
    /// Deserialized descriptors bypass the constructors, so loaders call this
    /// explicitly.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyTableName);
        }
        if !is_valid_identifier(&self.name) {
            return Err(ValidationError::InvalidTableName(self.name.clone()));
        }
        if self.create.trim().is_empty() {
            return Err(ValidationError::EmptyCreateStatement(self.name.clone()));
        }
        if let Some(drop) = &self.drop {
            if drop.trim().is_empty() {
                return Err(ValidationError::EmptyDropStatement(self.name.clone()));
            }
        }
        Ok(())
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// DDL statement that creates the table.
    pub fn create_statement(&self) -> &str {
        &self.create
    }

    /// DDL statement that drops the table, tolerating a missing table when
    /// derived.
    pub fn drop_statement(&self) -> String {
        match &self.drop {
            Some(sql) => sql.clone(),
            None => format!("DROP TABLE IF EXISTS {}", self.name),
        }
    }
}

/// Returns `true` if `name` is safe to splice into SQL as a bare identifier.
///
/// Accepts ASCII alphanumerics and underscores, not starting with a digit.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Constraint-violation resolution applied to inserts and updates.
///
/// Mirrors SQLite's `ON CONFLICT` algorithms. [`None`](Self::None) emits no
/// clause, leaving the engine default (`ABORT`) in effect.
///
/// # Examples
///
/// ```
/// use tablekeeper_core::ConflictPolicy;
///
/// assert_eq!(ConflictPolicy::None.insert_verb(), "INSERT");
/// assert_eq!(ConflictPolicy::Replace.insert_verb(), "INSERT OR REPLACE");
/// assert_eq!(ConflictPolicy::Ignore.update_verb(), "UPDATE OR IGNORE");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// No conflict clause.
    #[default]
    None,
    /// Abort the statement and roll back the enclosing transaction.
    Rollback,
    /// Abort the statement, keeping prior changes of the transaction.
    Abort,
    /// Stop at the violating row, keeping changes already made by the
    /// statement.
    Fail,
    /// Skip the violating row and continue.
    Ignore,
    /// Delete pre-existing conflicting rows, then write.
    Replace,
}

impl ConflictPolicy {
    /// SQLite keyword for the algorithm, `None` for [`ConflictPolicy::None`].
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Rollback => Some("ROLLBACK"),
            Self::Abort => Some("ABORT"),
            Self::Fail => Some("FAIL"),
            Self::Ignore => Some("IGNORE"),
            Self::Replace => Some("REPLACE"),
        }
    }

    /// Leading verb of an `INSERT` statement under this policy.
    pub fn insert_verb(self) -> String {
        match self.keyword() {
            Some(keyword) => format!("INSERT OR {keyword}"),
            None => "INSERT".to_string(),
        }
    }

    /// Leading verb of an `UPDATE` statement under this policy.
    pub fn update_verb(self) -> String {
        match self.keyword() {
            Some(keyword) => format!("UPDATE OR {keyword}"),
            None => "UPDATE".to_string(),
        }
    }
}

/// Direction of a schema version transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Stored version is lower than the requested one.
    Upgrade,
    /// Stored version is higher than the requested one.
    Downgrade,
}

impl MigrationDirection {
    /// Direction for moving from `from` to `to`, or `None` when equal.
    ///
    /// # Examples
    ///
    /// ```
    /// use tablekeeper_core::MigrationDirection;
    ///
    /// assert_eq!(MigrationDirection::between(1, 3), Some(MigrationDirection::Upgrade));
    /// assert_eq!(MigrationDirection::between(3, 1), Some(MigrationDirection::Downgrade));
    /// assert_eq!(MigrationDirection::between(2, 2), None);
    /// ```
    pub fn between(from: u32, to: u32) -> Option<Self> {
        match from.cmp(&to) {
            std::cmp::Ordering::Less => Some(Self::Upgrade),
            std::cmp::Ordering::Greater => Some(Self::Downgrade),
            std::cmp::Ordering::Equal => None,
        }
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Downgrade => f.write_str("downgrade"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_info_rejects_blank_inputs() {
        assert_eq!(
            TableInfo::new("  ", "CREATE TABLE t (id INTEGER)"),
            Err(ValidationError::EmptyTableName)
        );
        assert_eq!(
            TableInfo::new("t", ""),
            Err(ValidationError::EmptyCreateStatement("t".to_string()))
        );
        assert_eq!(
            TableInfo::with_drop("t", "CREATE TABLE t (id INTEGER)", " "),
            Err(ValidationError::EmptyDropStatement("t".to_string()))
        );
    }

    #[test]
    fn test_table_info_rejects_unsafe_names() {
        assert!(TableInfo::new("users; DROP TABLE x", "CREATE TABLE t (id INTEGER)").is_err());
        assert!(TableInfo::new("1users", "CREATE TABLE t (id INTEGER)").is_err());
        assert!(TableInfo::new("user_data2", "CREATE TABLE t (id INTEGER)").is_ok());
    }

    #[test]
    fn test_explicit_drop_statement_wins() {
        let table = TableInfo::with_drop(
            "t",
            "CREATE TABLE t (id INTEGER)",
            "DROP TABLE IF EXISTS t; DROP INDEX IF EXISTS idx_t",
        )
        .unwrap();
        assert_eq!(
            table.drop_statement(),
            "DROP TABLE IF EXISTS t; DROP INDEX IF EXISTS idx_t"
        );
    }

    #[test]
    fn test_conflict_policy_verbs() {
        assert_eq!(ConflictPolicy::None.update_verb(), "UPDATE");
        assert_eq!(ConflictPolicy::Rollback.insert_verb(), "INSERT OR ROLLBACK");
        assert_eq!(ConflictPolicy::Abort.insert_verb(), "INSERT OR ABORT");
        assert_eq!(ConflictPolicy::Fail.update_verb(), "UPDATE OR FAIL");
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::None);
    }

    #[test]
    fn test_conflict_policy_deserializes_lowercase() {
        let policy: ConflictPolicy = serde_yaml::from_str("replace").unwrap();
        assert_eq!(policy, ConflictPolicy::Replace);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(MigrationDirection::Upgrade.to_string(), "upgrade");
        assert_eq!(MigrationDirection::Downgrade.to_string(), "downgrade");
    }
}
