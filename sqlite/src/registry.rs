//! Named directory of managed connections.
//!
//! A [`DatabaseRegistry`] is created once by the application and passed to
//! whatever needs database access. It holds at most one [`Database`] per
//! name; registering a name twice keeps the first manager.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tablekeeper_core::StoreConfig;
use tracing::{debug, info};

use crate::database::Database;
use crate::definition::DatabaseDefinition;
use crate::error::{Result, StoreError};

/// Registry of managed connections keyed by database name.
///
/// # Examples
///
/// ```no_run
/// use tablekeeper_core::{StoreConfig, TableInfo};
/// use tablekeeper_sqlite::{DatabaseRegistry, Definition};
///
/// let registry = DatabaseRegistry::new(StoreConfig::in_directory("data"));
/// registry
///     .add_database(Definition::new("notes", 1).with_table(
///         TableInfo::new("notes", "CREATE TABLE notes (id INTEGER PRIMARY KEY)").unwrap(),
///     ))
///     .unwrap();
///
/// let notes = registry.get_database("notes").unwrap();
/// let db = notes.acquire().unwrap();
/// assert!(db.is_opened());
/// ```
#[derive(Debug)]
pub struct DatabaseRegistry {
    config: StoreConfig,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl DatabaseRegistry {
    /// Creates an empty registry whose databases live per `config`.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            databases: RwLock::new(HashMap::new()),
        }
    }

    /// Store configuration shared by every registered database.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Database>>> {
        self.databases.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Database>>> {
        self.databases.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a database and returns its manager.
    ///
    /// If the name is already registered the existing manager is returned
    /// unchanged and `definition` is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if a new definition is invalid.
    pub fn add_database(
        &self,
        definition: impl DatabaseDefinition + 'static,
    ) -> Result<Arc<Database>> {
        self.add_shared(Arc::new(definition))
    }

    /// Same as [`add_database`](Self::add_database) for a shared definition.
    pub fn add_shared(&self, definition: Arc<dyn DatabaseDefinition>) -> Result<Arc<Database>> {
        let mut databases = self.write();
        match databases.entry(definition.name().to_string()) {
            Entry::Occupied(entry) => {
                debug!(database = entry.key().as_str(), "database already registered");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let database = Arc::new(Database::new(definition, self.config.clone())?);
                info!(
                    database = entry.key().as_str(),
                    version = database.version(),
                    path = %database.path().display(),
                    "database registered"
                );
                Ok(Arc::clone(entry.insert(database)))
            }
        }
    }

    /// Looks up a registered database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyDatabaseName`] for an empty name and
    /// [`StoreError::UnknownDatabase`] for a name never registered.
    pub fn get_database(&self, name: &str) -> Result<Arc<Database>> {
        if name.is_empty() {
            return Err(StoreError::EmptyDatabaseName);
        }
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownDatabase(name.to_string()))
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered databases.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Shuts down every database and empties the registry.
    pub fn shutdown_and_clear(&self) {
        let mut databases = self.write();
        for database in databases.values() {
            database.shutdown();
        }
        let count = databases.len();
        databases.clear();
        info!(count, "registry cleared");
    }
}
