//! YAML configuration for stores and database manifests.
//!
//! [`StoreConfig`] controls where database files live and how each physical
//! connection is configured. [`DatabaseManifest`] declares one database:
//! its name, version, tables, and SQL migrations.
//!
//! # Example store config
//!
//! ```yaml
//! directory: /var/lib/myapp
//! extension: db
//! foreign_keys: true
//! journal_mode: wal
//! busy_timeout_ms: 5000
//! ```
//!
//! # Example manifest
//!
//! ```yaml
//! name: contacts
//! version: 2
//! tables:
//!   - name: contacts
//!     create: CREATE TABLE IF NOT EXISTS contacts (id INTEGER PRIMARY KEY, name TEXT, email TEXT)
//! upgrades:
//!   2:
//!     - ALTER TABLE contacts ADD COLUMN email TEXT
//! downgrades:
//!   1:
//!     - UPDATE contacts SET email = NULL
//! ```

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::validate::{validate_extension, validate_manifest};
use crate::TableInfo;

/// SQLite journal modes accepted by [`StoreConfig::journal_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Rollback journal deleted at the end of each transaction.
    Delete,
    /// Rollback journal truncated instead of deleted.
    Truncate,
    /// Rollback journal header zeroed instead of deleted.
    Persist,
    /// Rollback journal kept in memory.
    Memory,
    /// Write-ahead log.
    Wal,
    /// No journal; transactions cannot be rolled back reliably.
    Off,
}

impl JournalMode {
    /// Value used in `PRAGMA journal_mode = ...`.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_extension() -> String {
    "db".to_string()
}

fn default_foreign_keys() -> bool {
    true
}

/// Settings shared by every database of a registry.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tablekeeper_core::StoreConfig;
///
/// let config = StoreConfig::in_directory("/tmp/app");
/// assert_eq!(config.database_path("users"), Path::new("/tmp/app/users.db"));
/// assert_eq!(config.database_path("users.db"), Path::new("/tmp/app/users.db"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the database files.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// File extension appended to database names that lack it. Empty means
    /// names are used verbatim.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Enables `PRAGMA foreign_keys`.
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    /// Journal mode applied to each connection; engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_mode: Option<JournalMode>,
    /// Busy timeout in milliseconds; engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            extension: default_extension(),
            foreign_keys: default_foreign_keys(),
            journal_mode: None,
            busy_timeout_ms: None,
        }
    }
}

impl StoreConfig {
    /// Default settings rooted at `directory`.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Loads and validates configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be read,
    /// [`ConfigError::YamlError`] if parsing fails, or
    /// [`ConfigError::Invalid`] if [`validate`](Self::validate) fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that database file names can be built from this
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an extension holding a path
    /// separator, NUL, whitespace, or a leading dot.
    pub fn validate(&self) -> Result<()> {
        validate_extension(&self.extension)?;
        Ok(())
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be written, or
    /// [`ConfigError::YamlError`] if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// File path of the database called `name`.
    pub fn database_path(&self, name: &str) -> PathBuf {
        if self.extension.is_empty() || name.ends_with(&format!(".{}", self.extension)) {
            self.directory.join(name)
        } else {
            self.directory.join(format!("{name}.{}", self.extension))
        }
    }

    /// PRAGMA batch applied to every new physical connection.
    pub fn pragma_sql(&self) -> String {
        let mut sql = format!(
            "PRAGMA foreign_keys = {};",
            if self.foreign_keys { "ON" } else { "OFF" }
        );
        if let Some(mode) = self.journal_mode {
            sql.push_str(&format!("\nPRAGMA journal_mode = {};", mode.as_sql()));
        }
        if let Some(timeout) = self.busy_timeout_ms {
            sql.push_str(&format!("\nPRAGMA busy_timeout = {timeout};"));
        }
        sql
    }
}

/// Declarative description of one database.
///
/// Migrations are lists of SQL statements keyed by version boundary, with
/// the same meaning as programmatic migration tasks: an upgrade keyed `V`
/// brings the schema to `V`, a downgrade keyed `V` takes it below `V + 1`
/// down to `V`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseManifest {
    /// Database name, also the registry key and file stem.
    pub name: String,
    /// Current schema version, at least 1.
    pub version: u32,
    /// Tables owned by the database, in creation order.
    pub tables: Vec<TableInfo>,
    /// Upgrade statements keyed by target version.
    #[serde(default)]
    pub upgrades: BTreeMap<u32, Vec<String>>,
    /// Downgrade statements keyed by version boundary.
    #[serde(default)]
    pub downgrades: BTreeMap<u32, Vec<String>>,
}

impl DatabaseManifest {
    /// Loads and validates a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] or [`ConfigError::YamlError`] when the
    /// file cannot be read or parsed, and [`ConfigError::Invalid`] with the
    /// first problem found by [`validate_manifest`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let manifest: Self = serde_yaml::from_reader(reader)?;
        manifest.check()?;
        Ok(manifest)
    }

    /// Parses and validates a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus I/O.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(yaml)?;
        manifest.check()?;
        Ok(manifest)
    }

    /// Saves the manifest as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] or [`ConfigError::YamlError`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        match validate_manifest(self).into_iter().next() {
            Some(err) => Err(ConfigError::Invalid(err)),
            None => Ok(()),
        }
    }
}
