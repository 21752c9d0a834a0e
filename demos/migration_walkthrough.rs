//! Versioned database lifecycle walkthrough.
//!
//! Registers a database at version 1, stores a few rows through a DAO, then
//! re-registers the same file at version 2 (successful upgrade), version 3
//! (failing upgrade, tables recreated), and back to version 1 (downgrade).
//!
//! # Usage
//!
//! ```bash
//! cargo run -p tablekeeper-demos --example migration_walkthrough
//! ```

use std::sync::Arc;

use tablekeeper_core::{StoreConfig, TableInfo};
use tablekeeper_sqlite::{
    Dao, DatabaseRegistry, Definition, EntityMapper, FailingTask, Record, SearchCondition, SqlTask,
    Values,
};

#[derive(Debug)]
struct Note {
    id: i64,
    body: String,
}

struct NoteMapper;

impl EntityMapper for NoteMapper {
    type Key = i64;
    type Entity = Note;

    fn database_name(&self) -> &str {
        "journal"
    }

    fn table_name(&self) -> &str {
        "notes"
    }

    fn key_condition(&self, key: &i64) -> SearchCondition {
        SearchCondition::eq("id", *key)
    }

    fn to_values(&self, note: &Note) -> Values {
        Values::new().with("id", note.id).with("body", note.body.clone())
    }

    fn from_record(&self, record: &Record) -> rusqlite::Result<Note> {
        Ok(Note {
            id: record.get("id")?,
            body: record.get("body")?,
        })
    }

    fn order_by(&self) -> Option<&str> {
        Some("id")
    }
}

fn notes_table() -> TableInfo {
    TableInfo::new(
        "notes",
        "CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)",
    )
    .unwrap()
}

fn journal(version: u32) -> Definition {
    Definition::new("journal", version)
        .with_table(notes_table())
        .with_upgrade(2, SqlTask::new(["UPDATE notes SET body = upper(body)"]))
        .with_upgrade(3, FailingTask::new("column backfill not supported"))
        .with_downgrade(1, SqlTask::new(["UPDATE notes SET body = lower(body)"]))
        .with_downgrade(2, SqlTask::new(["DELETE FROM notes WHERE id > 100"]))
        .with_upgrade_failure_hook(|_, old, new| {
            println!("  hook: upgrade {old} -> {new} failed, tables will be recreated");
            Ok(())
        })
}

/// Registers `journal(version)` in a fresh registry and prints what happened.
fn open_at(config: &StoreConfig, version: u32) -> Arc<DatabaseRegistry> {
    let registry = Arc::new(DatabaseRegistry::new(config.clone()));
    let database = registry.add_database(journal(version)).unwrap();
    database.open().unwrap();
    println!("version {version}: {:?}", database.last_outcome().unwrap());
    database.close();
    registry
}

fn print_notes(registry: &Arc<DatabaseRegistry>) {
    let dao = Dao::new(Arc::clone(registry), NoteMapper);
    let notes = dao.select_all().unwrap();
    if notes.is_empty() {
        println!("  (no notes)");
    }
    for note in notes {
        println!("  #{} {}", note.id, note.body);
    }
}

fn main() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::in_directory(dir.path());

    // === Step 1: Create at version 1 and seed ===
    println!("=== Create ===");
    let registry = open_at(&config, 1);
    let dao = Dao::new(Arc::clone(&registry), NoteMapper);
    let inserted = dao
        .insert_all(
            &[
                Note {
                    id: 1,
                    body: "buy milk".to_string(),
                },
                Note {
                    id: 2,
                    body: "call home".to_string(),
                },
            ],
            true,
        )
        .unwrap();
    println!("  inserted {inserted} notes");
    print_notes(&registry);
    registry.shutdown_and_clear();

    // === Step 2: Upgrade to version 2 keeps the rows ===
    println!("\n=== Upgrade ===");
    let registry = open_at(&config, 2);
    print_notes(&registry);
    registry.shutdown_and_clear();

    // === Step 3: Downgrade back to version 1 ===
    println!("\n=== Downgrade ===");
    let registry = open_at(&config, 1);
    print_notes(&registry);
    registry.shutdown_and_clear();

    // === Step 4: Upgrade through a failing step ===
    println!("\n=== Failed upgrade ===");
    let registry = open_at(&config, 3);
    print_notes(&registry);
    registry.shutdown_and_clear();
}
