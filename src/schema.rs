//! # SQLite Schema for RevDB
//!
//! This module owns the connection setup and the DDL. A fixed metadata table
//! records the schema version; every other table is generated from the entity
//! types registered with the store.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Schema for Story, FancyStory extends Story             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  story (root)                 fancy_story              story__tags      │
//! │  ┌─────────────────────┐      ┌─────────────────┐      ┌─────────────┐  │
//! │  │ revision_id (PK, AI)│◄─────│ revision_id (PK)│      │ revision_id │  │
//! │  │ bundle_id           │      │ subtitle        │      │ target_rev  │  │
//! │  │ is_trash            │      └─────────────────┘      └─────────────┘  │
//! │  │ title, slug, body   │◄──────────────────────────────────┘            │
//! │  └─────────────────────┘                                                │
//! │                                                                         │
//! │  revdb_metadata: key → value (schema_version)                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Constraint Mapping
//!
//! | Declared rule | Storage |
//! |---------------|---------|
//! | comparator | `revision_id INTEGER PRIMARY KEY AUTOINCREMENT` on the root |
//! | inheritance | child `revision_id` references parent, `ON DELETE CASCADE` |
//! | unique per revision | `UNIQUE INDEX` over the field group |
//! | unique per bundle | `BEFORE INSERT` / `BEFORE UPDATE` triggers |
//! | foreign key field | plain index, no SQL constraint |
//! | many-to-many | join table, owner side `ON DELETE CASCADE` |
//!
//! Foreign key fields point at a specific revision that may be purged later
//! (revision deletion, trash purge), so they are not SQL-enforced.
//!
//! ## Identifiers
//!
//! Table and column names are interpolated into SQL. The registry only admits
//! names matching `[a-z_][a-z0-9_]*` (see [`is_identifier`]).

use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::model::{join_table, EntityType};
use crate::types::FieldKind;
use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when changing the layout of generated
/// tables.
///
/// # Migration Strategy
///
/// There are no migrations: a mismatch is an error.
const SCHEMA_VERSION: i32 = 1;

/// Column names owned by the store on every root table.
pub const RESERVED_COLUMNS: [&str; 3] = ["revision_id", "bundle_id", "is_trash"];

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS revdb_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Connection Configuration
// =============================================================================

/// Default time a connection waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Connection settings applied when the store opens its database.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a statement waits for another connection's write lock.
    pub busy_timeout: Duration,

    /// Use the write-ahead log (readers do not block the writer).
    pub wal: bool,

    /// `PRAGMA synchronous = NORMAL` instead of `FULL`.
    ///
    /// With WAL this may lose the last transaction on power failure but never
    /// corrupts the file.
    pub synchronous_normal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            wal: true,
            synchronous_normal: true,
        }
    }
}

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the RevDB metadata table initialized.
///
/// Entity tables are added later, one type at a time, by
/// [`Database::create_entity_tables`].
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    pub fn open(path: impl AsRef<std::path::Path>, config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize(config)?;
        Ok(db)
    }

    /// Creates an in-memory database.
    ///
    /// In-memory databases are private to their connection and are lost when
    /// it closes. WAL is not available for them; SQLite silently keeps the
    /// `memory` journal.
    pub fn open_in_memory(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize(config)?;
        Ok(db)
    }

    fn initialize(&mut self, config: &StoreConfig) -> Result<()> {
        // =====================================================================
        // Pragmas
        // =====================================================================
        // Must precede any other statement on the connection.

        self.conn.busy_timeout(config.busy_timeout)?;

        if config.wal {
            self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        }

        if config.synchronous_normal {
            self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        } else {
            self.conn.execute_batch("PRAGMA synchronous = FULL")?;
        }

        // Inheritance rows and join rows cascade from their owner row.
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.verify_or_set_version()?;

        Ok(())
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM revdb_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO revdb_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this RevDB version requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Creates the tables, indexes and triggers of one entity type.
    ///
    /// Only the type's own level is created: under inheritance the parent's
    /// table must already exist. Idempotent.
    pub fn create_entity_tables(&self, ty: &EntityType) -> Result<()> {
        for statement in entity_ddl(ty) {
            self.conn.execute_batch(&statement)?;
        }
        debug!(entity = ty.name(), table = ty.table_name(), "entity tables ready");
        Ok(())
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

// =============================================================================
// DDL Generation
// =============================================================================

/// Is `name` safe to interpolate as a table or column name?
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// All statements for one level of an entity type.
pub(crate) fn entity_ddl(ty: &EntityType) -> Vec<String> {
    let table = ty.table_name();
    let mut statements = vec![create_table(ty)];

    if ty.parent().is_none() {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {table}_bundle ON {table}(bundle_id, revision_id)"
        ));
    }

    for field in ty.own_fields() {
        if let FieldKind::ForeignKey(_) = field.kind() {
            let column = field.name();
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {table}_{column}_fk ON {table}({column})"
            ));
        }
    }

    for group in ty.own_unique_per_revision() {
        let suffix = group.join("_");
        let columns = group.join(", ");
        statements.push(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_{suffix}_unique ON {table}({columns})"
        ));
    }

    for group in ty.own_unique_per_bundle() {
        statements.extend(bundle_unique_triggers(ty, group));
    }

    for relation in ty.own_many_to_many() {
        let join = join_table(ty, relation);
        statements.push(format!(
            r#"
CREATE TABLE IF NOT EXISTS {join} (
    revision_id        INTEGER NOT NULL REFERENCES {table}(revision_id) ON DELETE CASCADE,
    target_revision_id INTEGER NOT NULL,
    PRIMARY KEY (revision_id, target_revision_id)
)
"#
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {join}_target ON {join}(target_revision_id)"
        ));
    }

    statements
}

fn create_table(ty: &EntityType) -> String {
    let table = ty.table_name();
    let mut columns = match ty.parent() {
        None => vec![
            "revision_id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            "bundle_id TEXT NOT NULL".to_string(),
            "is_trash INTEGER NOT NULL DEFAULT 0".to_string(),
        ],
        Some(parent) => vec![format!(
            "revision_id INTEGER PRIMARY KEY REFERENCES {}(revision_id) ON DELETE CASCADE",
            parent.table_name()
        )],
    };

    for field in ty.own_fields() {
        let null = if field.is_nullable() { "" } else { " NOT NULL" };
        columns.push(format!("{} {}{null}", field.name(), field.kind().sql_type()));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n)",
        columns.join(",\n    ")
    )
}

/// Triggers rejecting a write whose field group matches the latest revision
/// of a different bundle.
///
/// NULL never equals anything in SQL, so rows with a NULL in the group never
/// collide. The bundle of the written row comes from `NEW.bundle_id` on the
/// root table; on a child table it is looked up through the root row, which
/// is always inserted first.
fn bundle_unique_triggers(ty: &EntityType, group: &[String]) -> Vec<String> {
    let table = ty.table_name();
    let root = ty.base_table();
    let suffix = group.join("_");
    let is_root = ty.parent().is_none();

    let matches = group
        .iter()
        .map(|f| format!("o.{f} = NEW.{f}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let (from, new_bundle) = if is_root {
        (format!("{table} AS o"), "NEW.bundle_id".to_string())
    } else {
        (
            format!("{table} AS o JOIN {root} AS r ON r.revision_id = o.revision_id"),
            format!("(SELECT bundle_id FROM {root} WHERE revision_id = NEW.revision_id)"),
        )
    };
    let alias = if is_root { "o" } else { "r" };

    let condition = format!(
        "EXISTS (SELECT 1 FROM {from} \
         WHERE {matches} \
         AND {alias}.bundle_id <> {new_bundle} \
         AND {alias}.revision_id = (SELECT MAX(s.revision_id) FROM {root} AS s WHERE s.bundle_id = {alias}.bundle_id))"
    );
    let message = format!(
        "UNIQUE per bundle constraint failed: {table}.{}",
        group.join(", ")
    );
    let columns = group.join(", ");

    vec![
        format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_{suffix}_bundle_unique_insert \
             BEFORE INSERT ON {table} WHEN {condition} \
             BEGIN SELECT RAISE(ABORT, '{message}'); END"
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_{suffix}_bundle_unique_update \
             BEFORE UPDATE OF {columns} ON {table} WHEN {condition} \
             BEGIN SELECT RAISE(ABORT, '{message}'); END"
        ),
    ]
}

// =============================================================================
// Tests
// =============================================================================
