//! Database definitions.
//!
//! A [`DatabaseDefinition`] is what a database author supplies: the name and
//! declared version, the tables, the upgrade and downgrade tasks, and the
//! hooks called when a migration fails. The store consumes it every time a
//! physical connection is acquired.
//!
//! [`Definition`] is a ready-made implementation assembled with a builder,
//! or from a YAML [`DatabaseManifest`].
//!
//! # Examples
//!
//! ```
//! use tablekeeper_core::TableInfo;
//! use tablekeeper_sqlite::{DatabaseDefinition, Definition, SqlTask};
//!
//! let definition = Definition::new("notes", 2)
//!     .with_table(
//!         TableInfo::new(
//!             "notes",
//!             "CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT, pinned INTEGER)",
//!         )
//!         .unwrap(),
//!     )
//!     .with_upgrade(2, SqlTask::new(["ALTER TABLE notes ADD COLUMN pinned INTEGER"]))
//!     .with_upgrade_failure_hook(|_conn, from, to| {
//!         eprintln!("notes upgrade {from} -> {to} failed; recreating");
//!         Ok(())
//!     });
//!
//! assert_eq!(definition.name(), "notes");
//! assert_eq!(definition.upgrade_tasks().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;
use tablekeeper_core::{
    DatabaseManifest, TableInfo, validate_database_name, validate_tables, validate_version,
};

use crate::error::{Result, StoreError};
use crate::task::{MigrationTask, MigrationTasks, SqlTask};

/// Everything the store needs to know about one logical database.
///
/// Hooks and tasks run while the owning [`Database`](crate::Database) is
/// acquiring its connection and must only use the connection they are
/// given. Opening or querying the same `Database` from inside them fails
/// with [`StoreError::Reentrant`].
pub trait DatabaseDefinition: Send + Sync {
    /// Database name; registry key and file stem.
    fn name(&self) -> &str;

    /// Declared schema version, at least 1.
    fn version(&self) -> u32;

    /// Tables owned by the database, in creation order.
    fn tables(&self) -> Vec<TableInfo>;

    /// Upgrade tasks keyed by the version they bring the schema to.
    ///
    /// An empty map makes every upgrade fail with
    /// [`StoreError::MissingMigrations`].
    fn upgrade_tasks(&self) -> MigrationTasks;

    /// Called once when an upgrade task fails, before the tables are
    /// recreated. Errors are logged and do not stop the recreation.
    fn on_upgrade_failed(&self, conn: &Connection, old_version: u32, new_version: u32)
    -> rusqlite::Result<()>;

    /// Downgrade tasks keyed by the version boundary they leave.
    ///
    /// An empty map makes every downgrade fail with
    /// [`StoreError::MissingMigrations`].
    fn downgrade_tasks(&self) -> MigrationTasks;

    /// Called once when a downgrade task fails, before the tables are
    /// recreated. Errors are logged and do not stop the recreation.
    fn on_downgrade_failed(
        &self,
        conn: &Connection,
        old_version: u32,
        new_version: u32,
    ) -> rusqlite::Result<()>;

    /// Configures a fresh physical connection before any schema work.
    ///
    /// Should only set connection parameters (PRAGMAs), not modify data.
    fn configure(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }

    /// Called after the schema has been created, upgraded, or downgraded.
    fn on_open(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }
}

/// Checks the name, version, and tables of a definition.
///
/// # Errors
///
/// Returns [`StoreError::InvalidVersion`] for version 0 or a version above
/// [`MAX_VERSION`](tablekeeper_core::MAX_VERSION), or
/// [`StoreError::InvalidDefinition`] with the first descriptor problem.
pub fn validate_definition(definition: &dyn DatabaseDefinition) -> Result<()> {
    validate_database_name(definition.name())?;
    if validate_version(definition.version()).is_err() {
        return Err(StoreError::InvalidVersion {
            name: definition.name().to_string(),
            version: definition.version(),
        });
    }
    if let Some(err) = validate_tables(&definition.tables()).into_iter().next() {
        return Err(StoreError::InvalidDefinition(err));
    }
    Ok(())
}

/// Hook invoked with `(connection, old_version, new_version)` after a
/// failed migration.
pub type FailureHook = Arc<dyn Fn(&Connection, u32, u32) -> rusqlite::Result<()> + Send + Sync>;

/// Hook invoked with the connection.
pub type ConnectionHook = Arc<dyn Fn(&Connection) -> rusqlite::Result<()> + Send + Sync>;

/// Builder-style [`DatabaseDefinition`].
///
/// Failure hooks default to doing nothing beyond the recreation itself.
#[derive(Clone)]
pub struct Definition {
    name: String,
    version: u32,
    tables: Vec<TableInfo>,
    upgrades: MigrationTasks,
    downgrades: MigrationTasks,
    upgrade_failure_hook: Option<FailureHook>,
    downgrade_failure_hook: Option<FailureHook>,
    configure_hook: Option<ConnectionHook>,
    open_hook: Option<ConnectionHook>,
}

impl Definition {
    /// Starts a definition with no tables and no migrations.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            tables: Vec::new(),
            upgrades: MigrationTasks::new(),
            downgrades: MigrationTasks::new(),
            upgrade_failure_hook: None,
            downgrade_failure_hook: None,
            configure_hook: None,
            open_hook: None,
        }
    }

    /// Builds a definition from a manifest; each migration becomes a
    /// [`SqlTask`].
    pub fn from_manifest(manifest: &DatabaseManifest) -> Self {
        let mut definition = Self::new(manifest.name.clone(), manifest.version)
            .with_tables(manifest.tables.iter().cloned());
        for (version, statements) in &manifest.upgrades {
            definition = definition.with_upgrade(*version, SqlTask::new(statements.clone()));
        }
        for (version, statements) in &manifest.downgrades {
            definition = definition.with_downgrade(*version, SqlTask::new(statements.clone()));
        }
        definition
    }

    /// Returns the same definition at another declared version.
    pub fn at_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Adds a table.
    pub fn with_table(mut self, table: TableInfo) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds several tables.
    pub fn with_tables(mut self, tables: impl IntoIterator<Item = TableInfo>) -> Self {
        self.tables.extend(tables);
        self
    }

    /// Registers the upgrade task that brings the schema to `version`.
    pub fn with_upgrade(mut self, version: u32, task: impl MigrationTask + 'static) -> Self {
        self.upgrades.insert(version, Arc::new(task));
        self
    }

    /// Registers the downgrade task that leaves version boundary `version`.
    pub fn with_downgrade(mut self, version: u32, task: impl MigrationTask + 'static) -> Self {
        self.downgrades.insert(version, Arc::new(task));
        self
    }

    /// Sets the hook called when an upgrade fails.
    pub fn with_upgrade_failure_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection, u32, u32) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        self.upgrade_failure_hook = Some(Arc::new(hook));
        self
    }

    /// Sets the hook called when a downgrade fails.
    pub fn with_downgrade_failure_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection, u32, u32) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        self.downgrade_failure_hook = Some(Arc::new(hook));
        self
    }

    /// Sets the hook that configures each new physical connection.
    pub fn with_configure_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        self.configure_hook = Some(Arc::new(hook));
        self
    }

    /// Sets the hook called once the schema is current.
    pub fn with_open_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        self.open_hook = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut upgrades: Vec<_> = self.upgrades.keys().copied().collect();
        upgrades.sort_unstable();
        let mut downgrades: Vec<_> = self.downgrades.keys().copied().collect();
        downgrades.sort_unstable();
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tables", &self.tables)
            .field("upgrades", &upgrades)
            .field("downgrades", &downgrades)
            .finish_non_exhaustive()
    }
}

impl DatabaseDefinition for Definition {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn tables(&self) -> Vec<TableInfo> {
        self.tables.clone()
    }

    fn upgrade_tasks(&self) -> MigrationTasks {
        self.upgrades.clone()
    }

    fn on_upgrade_failed(
        &self,
        conn: &Connection,
        old_version: u32,
        new_version: u32,
    ) -> rusqlite::Result<()> {
        match &self.upgrade_failure_hook {
            Some(hook) => hook(conn, old_version, new_version),
            None => Ok(()),
        }
    }

    fn downgrade_tasks(&self) -> MigrationTasks {
        self.downgrades.clone()
    }

    fn on_downgrade_failed(
        &self,
        conn: &Connection,
        old_version: u32,
        new_version: u32,
    ) -> rusqlite::Result<()> {
        match &self.downgrade_failure_hook {
            Some(hook) => hook(conn, old_version, new_version),
            None => Ok(()),
        }
    }

    fn configure(&self, conn: &Connection) -> rusqlite::Result<()> {
        match &self.configure_hook {
            Some(hook) => hook(conn),
            None => Ok(()),
        }
    }

    fn on_open(&self, conn: &Connection) -> rusqlite::Result<()> {
        match &self.open_hook {
            Some(hook) => hook(conn),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NoopTask;
    use tablekeeper_core::ValidationError;

    fn table(name: &str) -> TableInfo {
        TableInfo::new(name, format!("CREATE TABLE IF NOT EXISTS {name} (id INTEGER)")).unwrap()
    }

    #[test]
    fn test_validate_definition_ok() {
        let definition = Definition::new("app", 1).with_table(table("a"));
        assert!(validate_definition(&definition).is_ok());
    }

    #[test]
    fn test_validate_definition_rejects_version_zero() {
        let definition = Definition::new("app", 0);
        assert!(matches!(
            validate_definition(&definition),
            Err(StoreError::InvalidVersion { name, version: 0 }) if name == "app"
        ));
    }

    #[test]
    fn test_validate_definition_rejects_version_beyond_user_version_range() {
        let definition = Definition::new("app", 3_000_000_000).with_table(table("a"));
        assert!(matches!(
            validate_definition(&definition),
            Err(StoreError::InvalidVersion { version: 3_000_000_000, .. })
        ));
        let highest = Definition::new("app", tablekeeper_core::MAX_VERSION).with_table(table("a"));
        assert!(validate_definition(&highest).is_ok());
    }

    #[test]
    fn test_validate_definition_rejects_duplicate_tables() {
        let definition = Definition::new("app", 1).with_tables([table("a"), table("a")]);
        assert!(matches!(
            validate_definition(&definition),
            Err(StoreError::InvalidDefinition(ValidationError::DuplicateTable(_)))
        ));
    }

    #[test]
    fn test_validate_definition_rejects_empty_name() {
        let definition = Definition::new("", 1);
        let err = validate_definition(&definition).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_from_manifest() {
        let manifest = DatabaseManifest::from_yaml(
            r#"
name: app
version: 3
tables:
  - name: a
    create: CREATE TABLE a (id INTEGER)
upgrades:
  2: ["ALTER TABLE a ADD COLUMN b TEXT"]
  3: ["ALTER TABLE a ADD COLUMN c TEXT"]
downgrades:
  2: ["UPDATE a SET c = NULL"]
"#,
        )
        .unwrap();
        let definition = Definition::from_manifest(&manifest);
        assert_eq!(definition.version(), 3);
        assert_eq!(definition.tables().len(), 1);
        assert_eq!(definition.upgrade_tasks().len(), 2);
        assert_eq!(definition.downgrade_tasks().len(), 1);
    }

    #[test]
    fn test_default_hooks_succeed() {
        let conn = Connection::open_in_memory().unwrap();
        let definition = Definition::new("app", 1).with_upgrade(1, NoopTask);
        assert!(definition.on_upgrade_failed(&conn, 1, 2).is_ok());
        assert!(definition.on_downgrade_failed(&conn, 2, 1).is_ok());
        assert!(definition.configure(&conn).is_ok());
        assert!(definition.on_open(&conn).is_ok());
    }

    #[test]
    fn test_debug_lists_sorted_versions() {
        let definition = Definition::new("app", 3)
            .with_upgrade(3, NoopTask)
            .with_upgrade(2, NoopTask);
        let debug = format!("{definition:?}");
        assert!(debug.contains("upgrades: [2, 3]"));
    }
}
