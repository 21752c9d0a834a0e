//! Generic data access objects.
//!
//! A [`Dao`] performs CRUD on one table of one registered database. The
//! table-specific parts (table name, key condition, and the conversion
//! between entities and rows) come from an [`EntityMapper`].
//!
//! Every call acquires the database for its own duration, so a DAO can be
//! used without the caller opening anything. Batch operations optionally
//! run inside one transaction level.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tablekeeper_core::{StoreConfig, TableInfo};
//! use tablekeeper_sqlite::{
//!     Dao, DatabaseRegistry, Definition, EntityMapper, Record, SearchCondition, Values,
//! };
//!
//! struct Tag {
//!     id: i64,
//!     label: String,
//! }
//!
//! struct TagMapper;
//!
//! impl EntityMapper for TagMapper {
//!     type Key = i64;
//!     type Entity = Tag;
//!
//!     fn database_name(&self) -> &str {
//!         "notes"
//!     }
//!     fn table_name(&self) -> &str {
//!         "tags"
//!     }
//!     fn key_condition(&self, key: &i64) -> SearchCondition {
//!         SearchCondition::eq("id", *key)
//!     }
//!     fn to_values(&self, tag: &Tag) -> Values {
//!         Values::new().with("id", tag.id).with("label", tag.label.clone())
//!     }
//!     fn from_record(&self, record: &Record) -> rusqlite::Result<Tag> {
//!         Ok(Tag {
//!             id: record.get("id")?,
//!             label: record.get("label")?,
//!         })
//!     }
//! }
//!
//! let registry = Arc::new(DatabaseRegistry::new(StoreConfig::in_directory("data")));
//! registry
//!     .add_database(Definition::new("notes", 1).with_table(
//!         TableInfo::new("tags", "CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT)").unwrap(),
//!     ))
//!     .unwrap();
//!
//! let tags = Dao::new(Arc::clone(&registry), TagMapper);
//! tags.insert(&Tag { id: 1, label: "rust".into() }).unwrap();
//! assert!(tags.contains(&1).unwrap());
//! ```

use std::sync::Arc;

use tablekeeper_core::ConflictPolicy;

use crate::database::{Database, where_sql};
use crate::error::Result;
use crate::registry::DatabaseRegistry;
use crate::schema::quote_identifier;
use crate::values::{Record, SearchCondition, Values};

/// Table-specific mapping between entities and rows.
pub trait EntityMapper {
    /// Primary key type.
    type Key;
    /// Row type.
    type Entity;

    /// Name of the registered database holding the table.
    fn database_name(&self) -> &str;

    /// Table name.
    fn table_name(&self) -> &str;

    /// Condition selecting the row with `key`.
    fn key_condition(&self, key: &Self::Key) -> SearchCondition;

    /// Column values of an entity.
    fn to_values(&self, entity: &Self::Entity) -> Values;

    /// Builds an entity from a row.
    fn from_record(&self, record: &Record) -> rusqlite::Result<Self::Entity>;

    /// Default ordering for selects, as SQL text.
    fn order_by(&self) -> Option<&str> {
        None
    }
}

/// CRUD on the table described by `M`.
pub struct Dao<M: EntityMapper> {
    registry: Arc<DatabaseRegistry>,
    mapper: M,
}

impl<M: EntityMapper> Dao<M> {
    /// Creates a DAO resolving its database through `registry`.
    pub fn new(registry: Arc<DatabaseRegistry>, mapper: M) -> Self {
        Self { registry, mapper }
    }

    /// The entity mapper.
    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The managed connection this DAO works on.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownDatabase`](crate::StoreError::UnknownDatabase)
    /// if the database was never registered.
    pub fn database(&self) -> Result<Arc<Database>> {
        self.registry.get_database(self.mapper.database_name())
    }

    fn with_database<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let database = self.database()?;
        let guard = database.acquire()?;
        f(&*guard)
    }

    fn batch<T>(
        &self,
        use_transaction: bool,
        f: impl FnOnce(&Database) -> Result<T>,
    ) -> Result<T> {
        self.with_database(|db| {
            if use_transaction {
                db.transaction(f)
            } else {
                f(db)
            }
        })
    }

    fn insert_with(&self, entity: &M::Entity, policy: ConflictPolicy) -> Result<Option<i64>> {
        let values = self.mapper.to_values(entity);
        self.with_database(|db| db.insert(self.mapper.table_name(), &values, policy))
    }

    fn insert_all_with(
        &self,
        entities: &[M::Entity],
        policy: ConflictPolicy,
        use_transaction: bool,
    ) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        self.batch(use_transaction, |db| {
            let mut inserted = 0;
            for entity in entities {
                let values = self.mapper.to_values(entity);
                if db.insert(self.mapper.table_name(), &values, policy)?.is_some() {
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }

    fn update_with(
        &self,
        key: &M::Key,
        entity: &M::Entity,
        policy: ConflictPolicy,
    ) -> Result<usize> {
        let values = self.mapper.to_values(entity);
        let condition = self.mapper.key_condition(key);
        self.with_database(|db| db.update(self.mapper.table_name(), &values, &condition, policy))
    }

    fn update_all_with(
        &self,
        entities: &[(M::Key, M::Entity)],
        policy: ConflictPolicy,
        use_transaction: bool,
    ) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        self.batch(use_transaction, |db| {
            let mut updated = 0;
            for (key, entity) in entities {
                let values = self.mapper.to_values(entity);
                let condition = self.mapper.key_condition(key);
                updated += db.update(self.mapper.table_name(), &values, &condition, policy)?;
            }
            Ok(updated)
        })
    }

    /// Inserts an entity; returns its rowid.
    pub fn insert(&self, entity: &M::Entity) -> Result<Option<i64>> {
        self.insert_with(entity, ConflictPolicy::None)
    }

    /// Inserts an entity, replacing any row it conflicts with.
    pub fn insert_or_replace(&self, entity: &M::Entity) -> Result<Option<i64>> {
        self.insert_with(entity, ConflictPolicy::Replace)
    }

    /// Inserts entities; returns the number inserted.
    ///
    /// With `use_transaction` either all rows are inserted or none.
    pub fn insert_all(&self, entities: &[M::Entity], use_transaction: bool) -> Result<usize> {
        self.insert_all_with(entities, ConflictPolicy::None, use_transaction)
    }

    /// Inserts or replaces entities; returns the number written.
    pub fn insert_or_replace_all(
        &self,
        entities: &[M::Entity],
        use_transaction: bool,
    ) -> Result<usize> {
        self.insert_all_with(entities, ConflictPolicy::Replace, use_transaction)
    }

    /// Updates the row with `key`; returns the number of rows changed.
    pub fn update(&self, key: &M::Key, entity: &M::Entity) -> Result<usize> {
        self.update_with(key, entity, ConflictPolicy::None)
    }

    /// Updates the row with `key`, replacing rows it would conflict with.
    pub fn update_or_replace(&self, key: &M::Key, entity: &M::Entity) -> Result<usize> {
        self.update_with(key, entity, ConflictPolicy::Replace)
    }

    /// Updates several rows by key.
    pub fn update_all(
        &self,
        entities: &[(M::Key, M::Entity)],
        use_transaction: bool,
    ) -> Result<usize> {
        self.update_all_with(entities, ConflictPolicy::None, use_transaction)
    }

    /// Updates or replaces several rows by key.
    pub fn update_or_replace_all(
        &self,
        entities: &[(M::Key, M::Entity)],
        use_transaction: bool,
    ) -> Result<usize> {
        self.update_all_with(entities, ConflictPolicy::Replace, use_transaction)
    }

    /// Deletes the row with `key`.
    pub fn delete(&self, key: &M::Key) -> Result<usize> {
        let condition = self.mapper.key_condition(key);
        self.with_database(|db| db.delete(self.mapper.table_name(), &condition))
    }

    /// Deletes several rows by key.
    pub fn delete_all(&self, keys: &[M::Key], use_transaction: bool) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.batch(use_transaction, |db| {
            let mut deleted = 0;
            for key in keys {
                deleted += db.delete(self.mapper.table_name(), &self.mapper.key_condition(key))?;
            }
            Ok(deleted)
        })
    }

    /// Selects entities matching `condition`.
    pub fn select(
        &self,
        condition: &SearchCondition,
        order_by: Option<&str>,
    ) -> Result<Vec<M::Entity>> {
        let records = self.with_database(|db| {
            db.query(self.mapper.table_name(), &[], condition, order_by, None)
        })?;
        let entities = records
            .iter()
            .map(|record| self.mapper.from_record(record))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    /// Selects the entities with `key`.
    pub fn select_by_key(&self, key: &M::Key) -> Result<Vec<M::Entity>> {
        self.select(&self.mapper.key_condition(key), self.mapper.order_by())
    }

    /// Selects every entity.
    pub fn select_all(&self) -> Result<Vec<M::Entity>> {
        self.select(&SearchCondition::all(), self.mapper.order_by())
    }

    /// Returns `true` if a row with `key` exists.
    pub fn contains(&self, key: &M::Key) -> Result<bool> {
        Ok(self.row_count_where(&self.mapper.key_condition(key))? > 0)
    }

    /// Number of rows in the table.
    pub fn row_count(&self) -> Result<u64> {
        self.row_count_where(&SearchCondition::all())
    }

    /// Number of rows matching `condition`.
    pub fn row_count_where(&self, condition: &SearchCondition) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS count FROM {}{}",
            quote_identifier(self.mapper.table_name()),
            where_sql(condition)
        );
        let records = self.with_database(|db| db.query_raw(&sql, condition.args()))?;
        match records.first() {
            Some(record) => Ok(record.get::<i64>("count")?.max(0) as u64),
            None => Ok(0),
        }
    }

    /// Deletes every row; returns the number deleted.
    pub fn clear(&self) -> Result<usize> {
        self.with_database(|db| db.delete(self.mapper.table_name(), &SearchCondition::all()))
    }
}

#[cfg(test)]
mod tests {
    use tablekeeper_core::{StoreConfig, TableInfo};
    use tempfile::TempDir;

    use super::*;
    use crate::definition::Definition;
    use crate::error::StoreError;

    #[derive(Debug, Clone, PartialEq)]
    struct Contact {
        id: i64,
        name: String,
        email: Option<String>,
    }

    fn contact(id: i64, name: &str) -> Contact {
        Contact {
            id,
            name: name.to_string(),
            email: None,
        }
    }

    struct ContactMapper;

    impl EntityMapper for ContactMapper {
        type Key = i64;
        type Entity = Contact;

        fn database_name(&self) -> &str {
            "crm"
        }

        fn table_name(&self) -> &str {
            "contacts"
        }

        fn key_condition(&self, key: &i64) -> SearchCondition {
            SearchCondition::eq("id", *key)
        }

        fn to_values(&self, contact: &Contact) -> Values {
            Values::new()
                .with("id", contact.id)
                .with("name", contact.name.clone())
                .with("email", contact.email.clone())
        }

        fn from_record(&self, record: &Record) -> rusqlite::Result<Contact> {
            Ok(Contact {
                id: record.get("id")?,
                name: record.get("name")?,
                email: record.get("email")?,
            })
        }

        fn order_by(&self) -> Option<&str> {
            Some("name")
        }
    }

    fn setup() -> (TempDir, Arc<DatabaseRegistry>, Dao<ContactMapper>) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(DatabaseRegistry::new(StoreConfig::in_directory(dir.path())));
        registry
            .add_database(
                Definition::new("crm", 1).with_table(
                    TableInfo::new(
                        "contacts",
                        "CREATE TABLE IF NOT EXISTS contacts (
                            id INTEGER PRIMARY KEY,
                            name TEXT NOT NULL,
                            email TEXT UNIQUE
                        )",
                    )
                    .unwrap(),
                ),
            )
            .unwrap();
        let dao = Dao::new(Arc::clone(&registry), ContactMapper);
        (dir, registry, dao)
    }

    #[test]
    fn test_insert_select_contains() {
        let (_dir, registry, dao) = setup();
        dao.insert(&contact(2, "Zoe")).unwrap();
        dao.insert(&contact(1, "Ann")).unwrap();

        let all = dao.select_all().unwrap();
        assert_eq!(all, vec![contact(1, "Ann"), contact(2, "Zoe")]);
        assert!(dao.contains(&2).unwrap());
        assert!(!dao.contains(&3).unwrap());
        assert_eq!(dao.select_by_key(&2).unwrap(), vec![contact(2, "Zoe")]);
        assert!(!registry.get_database("crm").unwrap().is_opened());
    }

    #[test]
    fn test_insert_duplicate_key_fails_but_replace_succeeds() {
        let (_dir, _registry, dao) = setup();
        dao.insert(&contact(1, "Ann")).unwrap();
        assert!(matches!(
            dao.insert(&contact(1, "Bob")),
            Err(StoreError::Database(_))
        ));
        dao.insert_or_replace(&contact(1, "Bob")).unwrap();
        assert_eq!(dao.select_all().unwrap(), vec![contact(1, "Bob")]);
    }

    #[test]
    fn test_batch_insert_with_transaction_is_atomic() {
        let (_dir, _registry, dao) = setup();
        let batch = vec![contact(1, "Ann"), contact(2, "Bob"), contact(1, "Dup")];
        assert!(dao.insert_all(&batch, true).is_err());
        assert_eq!(dao.row_count().unwrap(), 0);

        assert!(dao.insert_all(&batch, false).is_err());
        assert_eq!(dao.row_count().unwrap(), 2);

        assert_eq!(dao.insert_or_replace_all(&batch, true).unwrap(), 3);
        assert_eq!(dao.row_count().unwrap(), 2);
    }

    #[test]
    fn test_update_and_update_all() {
        let (_dir, _registry, dao) = setup();
        dao.insert_all(&[contact(1, "Ann"), contact(2, "Bob")], true)
            .unwrap();

        let mut ann = contact(1, "Anne");
        ann.email = Some("anne@example.com".to_string());
        assert_eq!(dao.update(&1, &ann).unwrap(), 1);
        assert_eq!(dao.update(&9, &contact(9, "Nobody")).unwrap(), 0);

        let changed = dao
            .update_all(&[(1, contact(1, "A")), (2, contact(2, "B"))], true)
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(
            dao.select_all().unwrap(),
            vec![contact(1, "A"), contact(2, "B")]
        );
    }

    #[test]
    fn test_update_or_replace_resolves_unique_conflict() {
        let (_dir, _registry, dao) = setup();
        let mut ann = contact(1, "Ann");
        ann.email = Some("shared@example.com".to_string());
        let bob = contact(2, "Bob");
        dao.insert_all(&[ann, bob], false).unwrap();

        let mut new_bob = contact(2, "Bob");
        new_bob.email = Some("shared@example.com".to_string());
        assert!(dao.update(&2, &new_bob).is_err());
        assert_eq!(dao.update_or_replace(&2, &new_bob).unwrap(), 1);
        assert_eq!(dao.select_all().unwrap(), vec![new_bob]);
        assert_eq!(
            dao.update_or_replace_all(&[(2, contact(2, "Robert"))], false)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_delete_clear_and_counts() {
        let (_dir, _registry, dao) = setup();
        dao.insert_all(
            &[contact(1, "Ann"), contact(2, "Bob"), contact(3, "Cid")],
            true,
        )
        .unwrap();

        assert_eq!(dao.delete(&1).unwrap(), 1);
        assert_eq!(dao.delete_all(&[2, 7], true).unwrap(), 1);
        assert_eq!(dao.row_count().unwrap(), 1);
        assert_eq!(
            dao.row_count_where(&SearchCondition::new("name LIKE ?", ["C%".to_string()]))
                .unwrap(),
            1
        );

        assert_eq!(dao.clear().unwrap(), 1);
        assert_eq!(dao.row_count().unwrap(), 0);
        assert_eq!(dao.delete_all(&[], true).unwrap(), 0);
    }

    #[test]
    fn test_select_with_condition_and_order() {
        let (_dir, _registry, dao) = setup();
        dao.insert_all(
            &[contact(1, "Ann"), contact(2, "Bob"), contact(3, "Cid")],
            false,
        )
        .unwrap();
        let found = dao
            .select(&SearchCondition::new("id >= ?", [2_i64]), Some("id DESC"))
            .unwrap();
        assert_eq!(found, vec![contact(3, "Cid"), contact(2, "Bob")]);
    }

    #[test]
    fn test_unregistered_database_is_an_error() {
        let registry = Arc::new(DatabaseRegistry::new(StoreConfig::default()));
        let dao = Dao::new(registry, ContactMapper);
        assert!(matches!(
            dao.row_count(),
            Err(StoreError::UnknownDatabase(name)) if name == "crm"
        ));
    }

    #[test]
    fn test_dao_inside_outer_transaction() {
        let (_dir, registry, dao) = setup();
        let database = registry.get_database("crm").unwrap();
        let db = database.acquire().unwrap();

        db.begin_transaction().unwrap();
        dao.insert_all(&[contact(1, "Ann")], true).unwrap();
        db.end_transaction().unwrap();

        assert_eq!(dao.row_count().unwrap(), 0);
    }
}
