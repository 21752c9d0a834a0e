//! Reference-counted managed connection.
//!
//! A [`Database`] owns at most one physical SQLite connection for a named
//! database. Every logical holder calls [`open`](Database::open) and later
//! [`close`](Database::close); the physical connection is acquired when the
//! count goes from 0 to 1 (running create, upgrade, or downgrade at that
//! point) and released when it drops back to 0. All counter transitions and
//! data operations are serialized by one mutex.
//!
//! [`acquire`](Database::acquire) pairs the two calls with a guard that
//! closes on drop.
//!
//! A transaction belongs to the thread that began it. While it is open,
//! statements, `close` and `begin_transaction` from other threads wait
//! until its outermost level ends.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tablekeeper_core::{ConflictPolicy, StoreConfig, TableInfo};
//! use tablekeeper_sqlite::{Database, Definition, SearchCondition, Values};
//!
//! let definition = Definition::new("library", 1).with_table(
//!     TableInfo::new("books", "CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT)").unwrap(),
//! );
//! let database = Database::new(Arc::new(definition), StoreConfig::in_directory("data")).unwrap();
//!
//! let db = database.acquire().unwrap();
//! db.insert("books", &Values::new().with("title", "Dune".to_string()), ConflictPolicy::None)
//!     .unwrap();
//! let rows = db.query("books", &["title"], &SearchCondition::all(), Some("title"), None).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use rusqlite::types::Value;
use rusqlite::{Connection, Params, Statement, params_from_iter};
use tablekeeper_core::{ConflictPolicy, StoreConfig};
use tracing::{debug, info, warn};

use crate::definition::{DatabaseDefinition, validate_definition};
use crate::error::{Result, StoreError};
use crate::helper;
use crate::migration::MigrationOutcome;
use crate::schema::quote_identifier;
use crate::values::{Record, SearchCondition, Values};

#[derive(Default)]
struct State {
    open_count: usize,
    conn: Option<Connection>,
    shut_down: bool,
    /// Success flag per nesting level, outermost first.
    transactions: Vec<bool>,
    /// Set when an inner level ended without being marked successful.
    transaction_failed: bool,
    /// Thread that began the open transaction.
    transaction_owner: Option<ThreadId>,
    last_outcome: Option<MigrationOutcome>,
}

/// Managed connection for one named database.
pub struct Database {
    definition: Arc<dyn DatabaseDefinition>,
    config: StoreConfig,
    path: PathBuf,
    state: Mutex<State>,
    /// Signalled when a transaction ends or the connection is released.
    transaction_ended: Condvar,
    /// Thread running `helper::open` and the definition hooks.
    opening: Mutex<Option<ThreadId>>,
}

impl Database {
    /// Creates a closed managed connection. No file is touched until the
    /// first [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Returns an error if the definition's name, version, or tables are
    /// invalid, or if `config` cannot produce a file name.
    pub fn new(definition: Arc<dyn DatabaseDefinition>, config: StoreConfig) -> Result<Self> {
        validate_definition(definition.as_ref())?;
        config.validate()?;
        let path = config.database_path(definition.name());
        Ok(Self {
            definition,
            config,
            path,
            state: Mutex::new(State::default()),
            transaction_ended: Condvar::new(),
            opening: Mutex::new(None),
        })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Declared schema version.
    pub fn version(&self) -> u32 {
        self.definition.version()
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails if the calling thread is inside this database's own
    /// acquisition, where taking the state lock would deadlock.
    fn check_reentry(&self) -> Result<()> {
        let opening = self.opening.lock().unwrap_or_else(PoisonError::into_inner);
        if *opening == Some(thread::current().id()) {
            return Err(StoreError::Reentrant(self.name().to_string()));
        }
        Ok(())
    }

    /// Locks the state once no other thread owns a transaction.
    fn turn(&self) -> Result<MutexGuard<'_, State>> {
        self.check_reentry()?;
        let me = thread::current().id();
        let mut state = self.state();
        while state.transaction_owner.is_some_and(|owner| owner != me) {
            state = self
                .transaction_ended
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(state)
    }

    fn owns_transaction(state: &State) -> bool {
        state.transaction_owner == Some(thread::current().id())
    }

    /// Registers one logical holder, acquiring the physical connection if
    /// this is the first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutDown`] after [`shutdown`](Self::shutdown),
    /// [`StoreError::Reentrant`] when called from this database's own
    /// definition hooks, and any create or migration error from the first
    /// acquisition. A failed acquisition leaves the count unchanged.
    pub fn open(&self) -> Result<()> {
        self.check_reentry()?;
        let mut state = self.state();
        if state.shut_down {
            return Err(StoreError::ShutDown(self.name().to_string()));
        }
        if state.conn.is_none() {
            if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let opening = OpeningScope::enter(self);
            let opened = helper::open(&self.path, &self.config, self.definition.as_ref());
            drop(opening);
            let (conn, outcome) = opened?;
            info!(database = self.name(), ?outcome, "physical connection acquired");
            state.conn = Some(conn);
            state.last_outcome = Some(outcome);
        }
        state.open_count += 1;
        debug!(database = self.name(), holders = state.open_count, "database opened");
        Ok(())
    }

    /// Opens the database and returns a guard that closes it on drop.
    pub fn acquire(&self) -> Result<DatabaseGuard<'_>> {
        self.open()?;
        Ok(DatabaseGuard { database: self })
    }

    /// Releases one logical holder, closing the physical connection when
    /// it was the last. Extra calls are logged and ignored.
    ///
    /// Waits while another thread owns a transaction.
    pub fn close(&self) {
        let mut state = match self.turn() {
            Ok(state) => state,
            Err(err) => {
                warn!(database = self.name(), error = %err, "close ignored");
                return;
            }
        };
        match state.open_count {
            0 => warn!(database = self.name(), "close called on a database that is not open"),
            1 => {
                state.open_count = 0;
                self.release(&mut state);
            }
            n => {
                state.open_count = n - 1;
                debug!(database = self.name(), holders = state.open_count, "database closed");
            }
        }
    }

    /// Returns `true` while at least one logical holder has the database
    /// open.
    pub fn is_opened(&self) -> bool {
        self.state().open_count > 0
    }

    /// Releases the physical connection regardless of holders. Every later
    /// operation, including [`open`](Self::open), fails with
    /// [`StoreError::ShutDown`].
    pub fn shutdown(&self) {
        let mut state = self.state();
        state.open_count = 0;
        state.shut_down = true;
        self.release(&mut state);
        info!(database = self.name(), "database shut down");
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    /// Outcome of the most recent physical acquisition.
    pub fn last_outcome(&self) -> Option<MigrationOutcome> {
        self.state().last_outcome.clone()
    }

    fn release(&self, state: &mut State) {
        if !state.transactions.is_empty() {
            warn!(
                database = self.name(),
                depth = state.transactions.len(),
                "closing database with an open transaction, rolling back"
            );
            state.transactions.clear();
            state.transaction_failed = false;
            state.transaction_owner = None;
            if let Some(conn) = &state.conn {
                if let Err(err) = conn.execute_batch("ROLLBACK") {
                    warn!(database = self.name(), error = %err, "rollback failed");
                }
            }
            self.transaction_ended.notify_all();
        }
        if let Some(conn) = state.conn.take() {
            if let Err((_conn, err)) = conn.close() {
                warn!(database = self.name(), error = %err, "failed to close connection cleanly");
            }
            info!(database = self.name(), "physical connection released");
        }
    }

    fn check<'s>(&self, state: &'s State) -> Result<&'s Connection> {
        if state.shut_down {
            return Err(StoreError::ShutDown(self.name().to_string()));
        }
        state
            .conn
            .as_ref()
            .ok_or_else(|| StoreError::Closed(self.name().to_string()))
    }

    /// Runs `f` with the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] if no holder has the database open.
    /// Waits while another thread owns a transaction.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let state = self.turn()?;
        let conn = self.check(&state)?;
        Ok(f(conn)?)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Begins a transaction, or a nested level of the current one.
    ///
    /// Nested levels share the outermost SQLite transaction. It commits
    /// only if every level was marked successful. The calling thread owns
    /// the transaction until the outermost level ends; other threads block
    /// here until then.
    pub fn begin_transaction(&self) -> Result<()> {
        let mut state = self.turn()?;
        let conn = self.check(&state)?;
        if state.transactions.is_empty() {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            state.transaction_failed = false;
            state.transaction_owner = Some(thread::current().id());
        }
        state.transactions.push(false);
        debug!(database = self.name(), depth = state.transactions.len(), "transaction begun");
        Ok(())
    }

    /// Marks the innermost level as successful.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoTransaction`] unless the calling thread owns
    /// the open transaction.
    pub fn set_transaction_successful(&self) -> Result<()> {
        self.check_reentry()?;
        let mut state = self.state();
        self.check(&state)?;
        if !Self::owns_transaction(&state) {
            return Err(StoreError::NoTransaction(self.name().to_string()));
        }
        match state.transactions.last_mut() {
            Some(success) => {
                *success = true;
                Ok(())
            }
            None => Err(StoreError::NoTransaction(self.name().to_string())),
        }
    }

    /// Ends the innermost level. Ending the outermost level commits or
    /// rolls back and hands the connection to waiting threads.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoTransaction`] unless the calling thread owns
    /// the open transaction, and the engine error of a failed commit, in
    /// which case the transaction is rolled back.
    pub fn end_transaction(&self) -> Result<()> {
        self.check_reentry()?;
        let mut state = self.state();
        self.check(&state)?;
        if !Self::owns_transaction(&state) {
            return Err(StoreError::NoTransaction(self.name().to_string()));
        }
        let success = state
            .transactions
            .pop()
            .ok_or_else(|| StoreError::NoTransaction(self.name().to_string()))?;
        if !success {
            state.transaction_failed = true;
        }
        if !state.transactions.is_empty() {
            return Ok(());
        }

        let commit = !state.transaction_failed;
        state.transaction_failed = false;
        let conn = self.check(&state)?;
        let ended = if commit {
            let committed = conn.execute_batch("COMMIT");
            if let Err(err) = &committed {
                warn!(database = self.name(), error = %err, "commit failed, rolling back");
                if let Err(err) = conn.execute_batch("ROLLBACK") {
                    warn!(database = self.name(), error = %err, "rollback failed");
                }
            }
            committed
        } else {
            conn.execute_batch("ROLLBACK")
        };
        state.transaction_owner = None;
        self.transaction_ended.notify_all();
        ended?;
        debug!(database = self.name(), committed = commit, "transaction ended");
        Ok(())
    }

    /// Returns `true` if the calling thread is between
    /// [`begin_transaction`](Self::begin_transaction) and the matching
    /// [`end_transaction`](Self::end_transaction).
    pub fn in_transaction(&self) -> Result<bool> {
        self.check_reentry()?;
        let state = self.state();
        self.check(&state)?;
        Ok(Self::owns_transaction(&state))
    }

    /// Runs `f` in a transaction level that is marked successful if `f`
    /// returns `Ok` and ended on every path, including panics.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of committing.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.begin_transaction()?;
        let mut scope = TransactionScope {
            database: self,
            active: true,
        };
        let result = f(self);
        if result.is_ok() {
            self.set_transaction_successful()?;
        }
        scope.active = false;
        let ended = self.end_transaction();
        let value = result?;
        ended?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Executes one statement with bound parameters; returns changed rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_connection(|conn| conn.execute(sql, params))
    }

    /// Executes several `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    /// Inserts a row; returns its rowid, or `None` if the conflict policy
    /// skipped it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyValues`] without any column and engine
    /// errors such as constraint violations.
    pub fn insert(
        &self,
        table: &str,
        values: &Values,
        policy: ConflictPolicy,
    ) -> Result<Option<i64>> {
        if values.is_empty() {
            return Err(StoreError::EmptyValues(table.to_string()));
        }
        let sql = insert_sql(table, values, policy);
        self.with_connection(|conn| {
            let changed = conn.execute(&sql, params_from_iter(values.values()))?;
            Ok((changed > 0).then(|| conn.last_insert_rowid()))
        })
    }

    /// Updates matching rows; returns the number changed.
    pub fn update(
        &self,
        table: &str,
        values: &Values,
        condition: &SearchCondition,
        policy: ConflictPolicy,
    ) -> Result<usize> {
        if values.is_empty() {
            return Err(StoreError::EmptyValues(table.to_string()));
        }
        let sql = format!(
            "{} {} SET {}{}",
            policy.update_verb(),
            quote_identifier(table),
            values
                .columns()
                .iter()
                .map(|column| format!("{} = ?", quote_identifier(column)))
                .collect::<Vec<_>>()
                .join(", "),
            where_sql(condition)
        );
        let args = values.values().chain(condition.args());
        self.with_connection(|conn| conn.execute(&sql, params_from_iter(args)))
    }

    /// Deletes matching rows; returns the number deleted.
    pub fn delete(&self, table: &str, condition: &SearchCondition) -> Result<usize> {
        let sql = format!("DELETE FROM {}{}", quote_identifier(table), where_sql(condition));
        self.with_connection(|conn| conn.execute(&sql, params_from_iter(condition.args())))
    }

    /// Selects rows from one table.
    ///
    /// An empty `columns` slice selects every column. `order_by` is SQL
    /// text such as `"title DESC"` and is not parameterized.
    pub fn query(
        &self,
        table: &str,
        columns: &[&str],
        condition: &SearchCondition,
        order_by: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<Record>> {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            columns
                .iter()
                .map(|column| quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "SELECT {projection} FROM {}{}",
            quote_identifier(table),
            where_sql(condition)
        );
        if let Some(order_by) = order_by {
            sql.push_str(&format!(" ORDER BY {order_by}"));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        self.query_raw(&sql, condition.args())
    }

    /// Runs an arbitrary `SELECT` with positional arguments.
    pub fn query_raw(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            read_records(&mut stmt, args)
        })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("path", &self.path)
            .field("open_count", &state.open_count)
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

fn insert_sql(table: &str, values: &Values, policy: ConflictPolicy) -> String {
    let columns = values.columns();
    format!(
        "{} INTO {} ({}) VALUES ({})",
        policy.insert_verb(),
        quote_identifier(table),
        columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", "),
        vec!["?"; columns.len()].join(", ")
    )
}

pub(crate) fn where_sql(condition: &SearchCondition) -> String {
    match condition.clause() {
        Some(clause) if !clause.trim().is_empty() => format!(" WHERE {clause}"),
        _ => String::new(),
    }
}

fn read_records(stmt: &mut Statement<'_>, args: &[Value]) -> rusqlite::Result<Vec<Record>> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(args))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|idx| row.get::<_, Value>(idx))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        records.push(Record::new(columns.clone(), values));
    }
    Ok(records)
}

/// Marks the calling thread as acquiring the physical connection.
struct OpeningScope<'a> {
    database: &'a Database,
}

impl<'a> OpeningScope<'a> {
    fn enter(database: &'a Database) -> Self {
        *database.opening.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(thread::current().id());
        Self { database }
    }
}

impl Drop for OpeningScope<'_> {
    fn drop(&mut self) {
        *self.database.opening.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Ends a transaction level if its owner unwinds before ending it.
struct TransactionScope<'a> {
    database: &'a Database,
    active: bool,
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.database.end_transaction() {
                warn!(database = self.database.name(), error = %err, "failed to end transaction");
            }
        }
    }
}

/// Open handle on a [`Database`]; closes it when dropped.
#[derive(Debug)]
pub struct DatabaseGuard<'a> {
    database: &'a Database,
}

impl Deref for DatabaseGuard<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        self.database
    }
}

impl Drop for DatabaseGuard<'_> {
    fn drop(&mut self) {
        self.database.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Barrier, OnceLock, Weak};
    use std::time::Duration;

    use tablekeeper_core::TableInfo;
    use tempfile::TempDir;

    use super::*;
    use crate::definition::Definition;

    fn books() -> TableInfo {
        TableInfo::new(
            "books",
            "CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL UNIQUE,
                year INTEGER
            )",
        )
        .unwrap()
    }

    fn database(dir: &TempDir) -> Database {
        let definition = Definition::new("library", 1).with_table(books());
        Database::new(Arc::new(definition), StoreConfig::in_directory(dir.path())).unwrap()
    }

    fn titles(db: &Database) -> Vec<String> {
        db.query("books", &["title"], &SearchCondition::all(), Some("title"), None)
            .unwrap()
            .iter()
            .map(|record| record.get::<String>("title").unwrap())
            .collect()
    }

    fn book(title: &str, year: i64) -> Values {
        Values::new().with("title", title.to_string()).with("year", year)
    }

    #[test]
    fn test_reference_counting() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        assert!(!db.is_opened());

        for _ in 0..3 {
            db.open().unwrap();
        }
        db.close();
        db.close();
        assert!(db.is_opened());
        assert!(db.execute_batch("SELECT 1").is_ok());

        db.close();
        assert!(!db.is_opened());
        assert!(matches!(db.execute_batch("SELECT 1"), Err(StoreError::Closed(_))));
    }

    #[test]
    fn test_extra_close_is_floored() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        db.close();
        db.open().unwrap();
        assert!(db.is_opened());
        db.close();
        assert!(!db.is_opened());
    }

    #[test]
    fn test_first_open_records_outcome() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        assert_eq!(db.last_outcome(), None);
        db.open().unwrap();
        assert_eq!(db.last_outcome(), Some(MigrationOutcome::Created { version: 1 }));
        db.close();

        db.open().unwrap();
        assert_eq!(db.last_outcome(), Some(MigrationOutcome::Opened { version: 1 }));
        db.close();
        assert!(db.path().exists());
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        {
            let guard = db.acquire().unwrap();
            assert!(guard.is_opened());
        }
        assert!(!db.is_opened());
    }

    #[test]
    fn test_shutdown_refuses_reopen() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        db.open().unwrap();
        db.open().unwrap();
        db.shutdown();
        assert!(!db.is_opened());
        assert!(db.is_shut_down());
        assert!(matches!(db.open(), Err(StoreError::ShutDown(_))));
        assert!(matches!(db.execute_batch("SELECT 1"), Err(StoreError::ShutDown(_))));
    }

    #[test]
    fn test_insert_update_delete_query() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();

        let id = db.insert("books", &book("Dune", 1965), ConflictPolicy::None).unwrap();
        assert_eq!(id, Some(1));
        db.insert("books", &book("Solaris", 1961), ConflictPolicy::None).unwrap();

        let changed = db
            .update(
                "books",
                &Values::new().with("year", 1966_i64),
                &SearchCondition::eq("title", "Dune".to_string()),
                ConflictPolicy::None,
            )
            .unwrap();
        assert_eq!(changed, 1);

        let rows = db
            .query("books", &["title", "year"], &SearchCondition::all(), Some("year DESC"), None)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<String>("title").unwrap(), "Dune");
        assert_eq!(rows[0].get::<i64>("year").unwrap(), 1966);

        let deleted = db
            .delete("books", &SearchCondition::new("year < ?", [1965_i64]))
            .unwrap();
        assert_eq!(deleted, 1);

        let limited = db
            .query("books", &[], &SearchCondition::all(), None, Some(1))
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].len(), 3);
    }

    #[test]
    fn test_conflict_policies() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();
        db.insert("books", &book("Dune", 1965), ConflictPolicy::None).unwrap();

        assert!(matches!(
            db.insert("books", &book("Dune", 1970), ConflictPolicy::None),
            Err(StoreError::Database(_))
        ));
        assert_eq!(
            db.insert("books", &book("Dune", 1970), ConflictPolicy::Ignore).unwrap(),
            None
        );
        db.insert("books", &book("Dune", 1984), ConflictPolicy::Replace).unwrap();

        let rows = db.query_raw("SELECT year FROM books", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64>("year").unwrap(), 1984);
    }

    #[test]
    fn test_empty_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();
        assert!(matches!(
            db.insert("books", &Values::new(), ConflictPolicy::None),
            Err(StoreError::EmptyValues(_))
        ));
    }

    #[test]
    fn test_nested_transaction_commits_when_all_levels_succeed() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();

        db.begin_transaction().unwrap();
        db.begin_transaction().unwrap();
        db.insert("books", &book("Dune", 1965), ConflictPolicy::None).unwrap();
        db.set_transaction_successful().unwrap();
        db.end_transaction().unwrap();
        assert!(db.in_transaction().unwrap());
        db.set_transaction_successful().unwrap();
        db.end_transaction().unwrap();
        assert!(!db.in_transaction().unwrap());

        assert_eq!(db.query_raw("SELECT * FROM books", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_unmarked_inner_level_rolls_back_everything() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();

        db.begin_transaction().unwrap();
        db.insert("books", &book("Dune", 1965), ConflictPolicy::None).unwrap();
        db.begin_transaction().unwrap();
        db.end_transaction().unwrap();
        db.set_transaction_successful().unwrap();
        db.end_transaction().unwrap();

        assert!(db.query_raw("SELECT * FROM books", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_end_without_begin_is_an_error() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();
        assert!(matches!(db.end_transaction(), Err(StoreError::NoTransaction(_))));
        assert!(matches!(
            db.set_transaction_successful(),
            Err(StoreError::NoTransaction(_))
        ));
    }

    #[test]
    fn test_scoped_transaction_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();

        let result: Result<()> = db.transaction(|db| {
            db.insert("books", &book("Dune", 1965), ConflictPolicy::None)?;
            db.insert("books", &book("Dune", 1965), ConflictPolicy::None)?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(!db.in_transaction().unwrap());
        assert!(db.query_raw("SELECT * FROM books", &[]).unwrap().is_empty());

        let count = db
            .transaction(|db| {
                db.insert("books", &book("Dune", 1965), ConflictPolicy::None)?;
                Ok(db.query_raw("SELECT * FROM books", &[])?.len())
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_scoped_transaction_ends_on_panic() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        let _guard = db.acquire().unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<()> = db.transaction(|db| {
                db.insert("books", &book("Dune", 1965), ConflictPolicy::None)?;
                panic!("interrupted");
            });
        }));
        assert!(result.is_err());
        assert!(!db.in_transaction().unwrap());
        assert!(db.query_raw("SELECT * FROM books", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_close_with_open_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        db.open().unwrap();
        db.begin_transaction().unwrap();
        db.insert("books", &book("Dune", 1965), ConflictPolicy::None).unwrap();
        db.close();

        db.open().unwrap();
        assert!(!db.in_transaction().unwrap());
        assert!(db.query_raw("SELECT * FROM books", &[]).unwrap().is_empty());
        db.close();
    }

    #[test]
    fn test_database_is_shareable_across_threads() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(database(&dir));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    let guard = db.acquire().unwrap();
                    guard
                        .insert("books", &book(&format!("Book {i}"), i), ConflictPolicy::None)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!db.is_opened());

        let guard = db.acquire().unwrap();
        assert_eq!(guard.query_raw("SELECT * FROM books", &[]).unwrap().len(), 8);
    }

    #[test]
    fn test_transaction_belongs_to_the_thread_that_began_it() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(database(&dir));
        db.open().unwrap();
        let started = Arc::new(Barrier::new(2));

        let owner = {
            let db = Arc::clone(&db);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                db.transaction(|db| {
                    db.insert("books", &book("Dune", 1965), ConflictPolicy::None)?;
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    Ok(())
                })
            })
        };
        let other = {
            let db = Arc::clone(&db);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                started.wait();
                assert!(!db.in_transaction().unwrap());
                assert!(matches!(db.end_transaction(), Err(StoreError::NoTransaction(_))));
                assert!(matches!(
                    db.set_transaction_successful(),
                    Err(StoreError::NoTransaction(_))
                ));
                db.transaction(|db| -> Result<()> {
                    db.insert("books", &book("Solaris", 1961), ConflictPolicy::None)?;
                    Err(StoreError::EmptyValues("books".to_string()))
                })
            })
        };

        assert!(owner.join().unwrap().is_ok());
        assert!(matches!(other.join().unwrap(), Err(StoreError::EmptyValues(_))));
        assert_eq!(titles(&db), vec!["Dune".to_string()]);
        db.close();
    }

    #[test]
    fn test_plain_write_from_another_thread_waits_for_transaction() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(database(&dir));
        db.open().unwrap();
        let started = Arc::new(Barrier::new(2));

        let owner = {
            let db = Arc::clone(&db);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                db.transaction(|db| -> Result<()> {
                    db.insert("books", &book("Dune", 1965), ConflictPolicy::None)?;
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    Err(StoreError::EmptyValues("books".to_string()))
                })
            })
        };
        let writer = {
            let db = Arc::clone(&db);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                started.wait();
                db.insert("books", &book("Solaris", 1961), ConflictPolicy::None)
            })
        };

        assert!(owner.join().unwrap().is_err());
        assert!(writer.join().unwrap().unwrap().is_some());
        assert_eq!(titles(&db), vec!["Solaris".to_string()]);
        db.close();
    }

    #[test]
    fn test_hook_using_its_own_database_fails_instead_of_deadlocking() {
        let dir = TempDir::new().unwrap();
        let own: Arc<OnceLock<Weak<Database>>> = Arc::new(OnceLock::new());
        let errors: Arc<Mutex<Vec<String>>> = Arc::default();

        let definition = {
            let own = Arc::clone(&own);
            let errors = Arc::clone(&errors);
            Definition::new("library", 1).with_table(books()).with_open_hook(move |_conn| {
                if let Some(db) = own.get().and_then(Weak::upgrade) {
                    for result in [db.open(), db.execute_batch("SELECT 1"), db.begin_transaction()]
                    {
                        if let Err(err) = result {
                            errors.lock().unwrap().push(err.to_string());
                        }
                    }
                }
                Ok(())
            })
        };
        let db = Arc::new(
            Database::new(Arc::new(definition), StoreConfig::in_directory(dir.path())).unwrap(),
        );
        own.set(Arc::downgrade(&db)).unwrap();

        db.open().unwrap();
        let errors = errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|err| err.contains("recursively")));
        assert!(db.execute_batch("SELECT 1").is_ok());
        db.close();
        assert!(!db.is_opened());
    }

    #[test]
    fn test_invalid_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            extension: "../db".to_string(),
            ..StoreConfig::in_directory(dir.path())
        };
        let definition = Definition::new("library", 1).with_table(books());
        assert!(matches!(
            Database::new(Arc::new(definition), config),
            Err(StoreError::Config(_))
        ));
    }
}
