//! # Trash Overlay
//!
//! Soft deletion for trashable entity types. Trash is a property of a whole
//! bundle: every revision row of the bundle carries the same `is_trash` flag.
//!
//! ## Bundle-Wide Flag
//!
//! No bundle is ever partially trashed:
//!
//! 1. **Trash and restore** flip the flag on every row of the bundle in one
//!    `UPDATE` statement, inside the caller's transaction
//! 2. **New revisions** of a trashed bundle inherit the bundle's flag
//! 3. **Purge** removes every row of the bundle for good
//!
//! ## Read Views
//!
//! | View | Filter |
//! |------|--------|
//! | [`TrashView::Any`] | none |
//! | [`TrashView::Live`] | `t0.is_trash = 0` |
//! | [`TrashView::Trash`] | `t0.is_trash = 1` |
//!
//! Views compound with the latest projection: "live latest" is the common case.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::Result;
use crate::model::EntityType;
use crate::types::{BundleId, TrashView};

/// SQL condition selecting the rows of a view, if it filters at all.
pub(crate) fn trash_condition(view: TrashView) -> Option<&'static str> {
    match view {
        TrashView::Any => None,
        TrashView::Live => Some("t0.is_trash = 0"),
        TrashView::Trash => Some("t0.is_trash = 1"),
    }
}

/// Sets the trash flag on every revision of a bundle.
///
/// Returns the number of revision rows updated.
pub(crate) fn set_bundle_trash(
    conn: &Connection,
    ty: &EntityType,
    bundle: &BundleId,
    trashed: bool,
) -> Result<usize> {
    let sql = format!(
        "UPDATE {} SET is_trash = ? WHERE bundle_id = ?",
        ty.base_table()
    );
    let updated = conn.execute(&sql, params![trashed, bundle])?;

    if trashed {
        info!(entity = ty.name(), bundle = %bundle, revisions = updated, "bundle moved to trash");
    } else {
        info!(entity = ty.name(), bundle = %bundle, revisions = updated, "bundle restored from trash");
    }
    Ok(updated)
}

/// Current trash state of a bundle, or `None` if it has no rows yet.
pub(crate) fn bundle_trash_state(
    conn: &Connection,
    ty: &EntityType,
    bundle: &BundleId,
) -> Result<Option<bool>> {
    let sql = format!(
        "SELECT is_trash FROM {} WHERE bundle_id = ? ORDER BY revision_id DESC LIMIT 1",
        ty.base_table()
    );
    Ok(conn.query_row(&sql, [bundle], |row| row.get(0)).optional()?)
}

/// Deletes every revision row of a bundle.
///
/// Child-table rows and many-to-many links go with them through
/// `ON DELETE CASCADE`.
pub(crate) fn purge_bundle(conn: &Connection, ty: &EntityType, bundle: &BundleId) -> Result<usize> {
    let sql = format!("DELETE FROM {} WHERE bundle_id = ?", ty.base_table());
    let deleted = conn.execute(&sql, [bundle])?;
    info!(entity = ty.name(), bundle = %bundle, revisions = deleted, "bundle deleted permanently");
    Ok(deleted)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDef;
    use crate::schema::{Database, StoreConfig};

    fn seeded() -> (Database, EntityType) {
        let ty = EntityType::new("note").field(FieldDef::text("text"));
        let db = Database::open_in_memory(&StoreConfig::default()).unwrap();
        db.create_entity_tables(&ty).unwrap();
        db.connection()
            .execute_batch(
                "INSERT INTO note (bundle_id, text) VALUES ('a', '1');
                 INSERT INTO note (bundle_id, text) VALUES ('a', '2');
                 INSERT INTO note (bundle_id, text) VALUES ('b', '1');",
            )
            .unwrap();
        (db, ty)
    }

    fn flags(db: &Database, bundle: &str) -> Vec<bool> {
        let mut stmt = db
            .connection()
            .prepare("SELECT is_trash FROM note WHERE bundle_id = ? ORDER BY revision_id")
            .unwrap();
        stmt.query_map([bundle], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<bool>, _>>()
            .unwrap()
    }

    #[test]
    fn test_trash_is_bundle_wide() {
        let (db, ty) = seeded();
        let a = BundleId::from_raw("a");

        assert_eq!(set_bundle_trash(db.connection(), &ty, &a, true).unwrap(), 2);
        assert_eq!(flags(&db, "a"), vec![true, true]);
        assert_eq!(flags(&db, "b"), vec![false]);
        assert_eq!(bundle_trash_state(db.connection(), &ty, &a).unwrap(), Some(true));

        set_bundle_trash(db.connection(), &ty, &a, false).unwrap();
        assert_eq!(flags(&db, "a"), vec![false, false]);
    }

    #[test]
    fn test_purge_removes_all_rows() {
        let (db, ty) = seeded();
        let a = BundleId::from_raw("a");

        assert_eq!(purge_bundle(db.connection(), &ty, &a).unwrap(), 2);
        assert!(flags(&db, "a").is_empty());
        assert_eq!(bundle_trash_state(db.connection(), &ty, &a).unwrap(), None);
    }

    #[test]
    fn test_trash_conditions() {
        assert_eq!(trash_condition(TrashView::Any), None);
        assert_eq!(trash_condition(TrashView::Live), Some("t0.is_trash = 0"));
        assert_eq!(trash_condition(TrashView::Trash), Some("t0.is_trash = 1"));
    }
}
