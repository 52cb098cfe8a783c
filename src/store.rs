//! # Store
//!
//! The entry point of RevDB. A `Store` owns one SQLite connection and the
//! registry of entity types stored through it.
//!
//! ## Design: Synchronous, One Transaction per Operation
//!
//! Every write operation on a record (save, revise, revert, trash, delete)
//! runs inside exactly one SQLite transaction opened by [`Store::write`]:
//! either all of its statements commit or none do. Reads borrow the store
//! immutably and see the latest committed state.
//!
//! ```text
//! story.revise(&mut store)
//!         │
//!         ▼
//! ┌────────────────────────────┐
//! │ BEGIN                      │
//! │  INSERT story ...          │  ← new comparator
//! │  INSERT story__tags SELECT │  ← links carried forward
//! │ COMMIT                     │
//! └────────────────────────────┘
//! ```
//!
//! Concurrency across processes or threads is SQLite's: each writer opens its
//! own `Store` on the same file, and lock waits are bounded by
//! [`StoreConfig::busy_timeout`].

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::model::{EntityType, Model, TrashableModel};
use crate::registry::Registry;
use crate::schema::{Database, StoreConfig};

/// A revisioned database: one connection plus its registered entity types.
#[derive(Debug)]
pub struct Store {
    db: Database,
    registry: Registry,
}

impl Store {
    /// Opens (or creates) a database file with default settings.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use revdb::Store;
    ///
    /// let store = Store::open("content.db")?;
    /// # Ok::<(), revdb::Error>(())
    /// ```
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens (or creates) a database file with explicit connection settings.
    pub fn open_with_config(path: impl AsRef<std::path::Path>, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::open(path, &config)?;
        info!(path = %path.display(), "opened store");
        Ok(Self {
            db,
            registry: Registry::new(),
        })
    }

    /// Creates an in-memory store, for tests and scratch work.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory(&StoreConfig::default())?,
            registry: Registry::new(),
        })
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a model type and creates its tables.
    ///
    /// Parents (under inheritance) and foreign-key or many-to-many targets
    /// must be registered first. Registering the same type twice is a no-op.
    /// The type is trashable exactly when [`Model::TRASHABLE`] is set.
    pub fn register<M: Model>(&mut self) -> Result<()> {
        self.register_type(M::TYPE_NAME, M::describe(), M::TRASHABLE)
    }

    /// Registers a trashable model type: deleting one of its records moves
    /// the bundle to the trash instead of removing it.
    ///
    /// Same as [`Store::register`], plus a compile-time check that the
    /// model's `TRASHABLE` constant agrees with its marker.
    pub fn register_trashable<M: TrashableModel>(&mut self) -> Result<()> {
        let () = M::MARKED;
        self.register::<M>()
    }

    fn register_type(&mut self, type_name: &str, mut ty: EntityType, trashable: bool) -> Result<()> {
        if ty.name() != type_name {
            warn!(entity = type_name, declared = ty.name(), "type name mismatch");
            return Err(Error::configuration(
                type_name,
                format!(
                    "describe() declares type '{}'; EntityType::new must be given TYPE_NAME",
                    ty.name()
                ),
            ));
        }
        ty.set_trashable(trashable);

        if self.registry.contains(ty.name()) {
            return self.registry.register(ty).map(|_| ());
        }

        if let Err(err) = self.registry.validate(&ty) {
            warn!(entity = ty.name(), error = %err, "rejected entity type");
            return Err(err);
        }
        self.db.create_entity_tables(&ty)?;
        info!(entity = ty.name(), trashable, "registered entity type");
        self.registry.register(ty).map(|_| ())
    }

    /// The registered entity types.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The registered configuration of a model type.
    pub fn entity_type<M: Model>(&self) -> Result<&EntityType> {
        self.registry.require(M::TYPE_NAME)
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// The read accessor of a model type.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if the type was never registered.
    pub fn manager<M: Model>(&self) -> Result<Manager<'_, M>> {
        let ty = self.entity_type::<M>()?;
        Ok(Manager::new(self, ty))
    }

    pub(crate) fn connection(&self) -> &Connection {
        self.db.connection()
    }

    /// Runs `f` inside one transaction, committing only if it succeeds.
    ///
    /// The write lock is taken at `BEGIN`, so a writer on another connection
    /// waits out the busy timeout instead of failing on a stale snapshot. On
    /// error the transaction is dropped, which rolls it back.
    pub(crate) fn write<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>, &Registry) -> Result<T>,
    ) -> Result<T> {
        let tx = self
            .db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx, &self.registry)?;
        tx.commit()?;
        Ok(value)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDef;
    use crate::types::Fields;

    struct Note;

    impl Model for Note {
        const TYPE_NAME: &'static str = "note";

        fn describe() -> EntityType {
            EntityType::new("note").field(FieldDef::text("text"))
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
        }

        fn from_fields(_: &Fields) -> Result<Self> {
            Ok(Note)
        }
    }

    struct Misnamed;

    impl Model for Misnamed {
        const TYPE_NAME: &'static str = "misnamed";

        fn describe() -> EntityType {
            EntityType::new("something_else")
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
        }

        fn from_fields(_: &Fields) -> Result<Self> {
            Ok(Misnamed)
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        store.register::<Note>().unwrap();
        store.register::<Note>().unwrap();

        assert!(store.manager::<Note>().is_ok());
        assert!(!store.entity_type::<Note>().unwrap().is_trashable());
    }

    #[test]
    fn test_unregistered_manager_is_configuration_error() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.manager::<Note>(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_type_name_must_match() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store.register::<Misnamed>().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(store.registry().get("something_else").is_none());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let mut store = Store::open_in_memory().unwrap();
        store.register::<Note>().unwrap();

        let result: Result<()> = store.write(|tx, _| {
            tx.execute("INSERT INTO note (bundle_id, text) VALUES ('a', 'x')", [])?;
            Err(Error::Schema("abort".to_string()))
        });
        assert!(result.is_err());

        let rows: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM note", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }
}
