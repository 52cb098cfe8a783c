//! # Revision Writer
//!
//! The write path of RevDB. Every function here addresses rows by
//! `revision_id` or `bundle_id` directly and never goes through the latest
//! projection, so a non-latest revision is always reachable for an in-place
//! update or a delete.
//!
//! ## Row Layout Under Inheritance
//!
//! ```text
//! insert FancyStory { title, subtitle }
//!
//!   1. INSERT INTO story (bundle_id, is_trash, title) ...   → revision_id = 7
//!   2. INSERT INTO fancy_story (revision_id, subtitle) VALUES (7, ...)
//! ```
//!
//! The root insert mints the comparator through `AUTOINCREMENT`; each child
//! level reuses it. All statements run inside the caller's transaction.
//!
//! ## Error Mapping
//!
//! SQLite constraint failures (UNIQUE indexes, per-bundle uniqueness
//! triggers) surface as [`Error::ConstraintViolation`] through
//! [`Error::from_write`]. Nothing is retried.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{join_table, EntityType};
use crate::types::{BundleId, FieldKind, Fields, RevisionId, Value};

/// Returns the current time in milliseconds since Unix epoch.
pub(crate) fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Sets every `auto_now_add` field to `now_ms`.
///
/// Each inserted revision records its own creation time.
pub(crate) fn stamp_auto_now_add(ty: &EntityType, fields: &mut Fields, now_ms: i64) {
    for (_, field) in ty.all_fields() {
        if field.is_auto_now_add() {
            let value = match field.kind() {
                FieldKind::TimestampMs | FieldKind::Integer => Value::Integer(now_ms),
                _ => continue,
            };
            fields.set(field.name(), value);
        }
    }
}

fn value_of(fields: &Fields, name: &str) -> Value {
    fields.get(name).cloned().unwrap_or(Value::Null)
}

/// Inserts a new revision row (one row per table of the chain).
///
/// `fields` is updated with the values actually written (creation stamps).
/// Returns the freshly minted comparator.
pub(crate) fn insert_revision(
    conn: &Connection,
    ty: &EntityType,
    bundle: &BundleId,
    is_trash: bool,
    fields: &mut Fields,
) -> Result<RevisionId> {
    stamp_auto_now_add(ty, fields, current_time_ms());

    let mut revision = None;
    for level in ty.chain() {
        let own = level.own_fields();
        let columns: Vec<&str> = own.iter().map(|f| f.name()).collect();
        let values: Vec<Value> = own.iter().map(|f| value_of(fields, f.name())).collect();

        match revision {
            None => {
                let mut names = vec!["bundle_id", "is_trash"];
                names.extend(&columns);
                let placeholders = vec!["?"; names.len()].join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders})",
                    level.table_name(),
                    names.join(", ")
                );

                let mut bound = vec![Value::from(bundle.as_str()), Value::Boolean(is_trash)];
                bound.extend(values);
                conn.execute(&sql, params_from_iter(bound.iter()))
                    .map_err(|e| Error::from_write(ty.name(), e))?;
                revision = Some(RevisionId::from_raw(conn.last_insert_rowid()));
            }
            Some(id) => {
                let mut names = vec!["revision_id"];
                names.extend(&columns);
                let placeholders = vec!["?"; names.len()].join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders})",
                    level.table_name(),
                    names.join(", ")
                );

                let mut bound = vec![Value::from(id)];
                bound.extend(values);
                conn.execute(&sql, params_from_iter(bound.iter()))
                    .map_err(|e| Error::from_write(ty.name(), e))?;
            }
        }
    }

    let revision = revision.ok_or_else(|| {
        Error::Schema(format!("entity type '{}' has no tables", ty.name()))
    })?;
    debug!(entity = ty.name(), bundle = %bundle, revision = %revision, "inserted revision");
    Ok(revision)
}

/// Updates an existing revision row in place. The comparator is unchanged.
///
/// # Errors
///
/// `Error::NotFound` if no row has this `revision_id`.
pub(crate) fn update_revision(
    conn: &Connection,
    ty: &EntityType,
    revision: RevisionId,
    fields: &Fields,
) -> Result<()> {
    let exists: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE revision_id = ?",
            ty.base_table()
        ),
        [revision],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(Error::not_found(ty.name(), format!("revision {revision}")));
    }

    for level in ty.chain() {
        let own = level.own_fields();
        if own.is_empty() {
            continue;
        }
        let assignments = own
            .iter()
            .map(|f| format!("{} = ?", f.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE revision_id = ?",
            level.table_name()
        );

        let mut bound: Vec<Value> = own.iter().map(|f| value_of(fields, f.name())).collect();
        bound.push(Value::from(revision));
        conn.execute(&sql, params_from_iter(bound.iter()))
            .map_err(|e| Error::from_write(ty.name(), e))?;
    }

    debug!(entity = ty.name(), revision = %revision, "updated revision in place");
    Ok(())
}

/// Deletes a single revision row (and its child rows and links).
///
/// Deleting a bundle's latest revision promotes the one before it, which
/// must then satisfy the per-bundle uniqueness rules like any write.
///
/// # Errors
///
/// - `Error::NotFound` if no row has this `revision_id`
/// - `Error::ConstraintViolation` if the promoted revision collides with the
///   latest revision of another bundle
pub(crate) fn delete_revision(conn: &Connection, ty: &EntityType, revision: RevisionId) -> Result<()> {
    let bundle: Option<String> = conn
        .query_row(
            &format!("SELECT bundle_id FROM {} WHERE revision_id = ?", ty.base_table()),
            [revision],
            |row| row.get(0),
        )
        .optional()?;
    let bundle = bundle.ok_or_else(|| Error::not_found(ty.name(), format!("revision {revision}")))?;

    let sql = format!("DELETE FROM {} WHERE revision_id = ?", ty.base_table());
    conn.execute(&sql, [revision])?;
    check_bundle_unique(conn, ty, &bundle)?;

    debug!(entity = ty.name(), revision = %revision, "deleted revision");
    Ok(())
}

/// Checks the latest revision of `bundle` against the latest revision of
/// every other bundle, for each per-bundle unique group of the chain.
fn check_bundle_unique(conn: &Connection, ty: &EntityType, bundle: &str) -> Result<()> {
    let root = ty.base_table();
    for level in ty.chain() {
        let table = level.table_name();
        for group in level.own_unique_per_bundle() {
            let matches = group
                .iter()
                .map(|f| format!("o.{f} = n.{f}"))
                .collect::<Vec<_>>()
                .join(" AND ");
            let sql = format!(
                "SELECT COUNT(*) FROM {table} AS n \
                 WHERE n.revision_id = (SELECT MAX(revision_id) FROM {root} WHERE bundle_id = ?1) \
                 AND EXISTS (SELECT 1 FROM {table} AS o JOIN {root} AS r ON r.revision_id = o.revision_id \
                 WHERE {matches} AND r.bundle_id <> ?1 \
                 AND r.revision_id = (SELECT MAX(s.revision_id) FROM {root} AS s WHERE s.bundle_id = r.bundle_id))"
            );
            let collisions: i64 = conn.query_row(&sql, [bundle], |row| row.get(0))?;
            if collisions > 0 {
                return Err(Error::ConstraintViolation {
                    entity: ty.name().to_string(),
                    message: format!(
                        "UNIQUE per bundle constraint failed: {table}.{}",
                        group.join(", ")
                    ),
                });
            }
        }
    }
    Ok(())
}

// =============================================================================
// Many-to-Many Links
// =============================================================================

/// Copies every many-to-many link of `from` to `to`.
///
/// Runs after `to` is inserted: the join rows need its key.
pub(crate) fn copy_links(
    conn: &Connection,
    ty: &EntityType,
    from: RevisionId,
    to: RevisionId,
) -> Result<usize> {
    let mut copied = 0;
    for (owner, relation) in ty.all_many_to_many() {
        let join = join_table(owner, relation);
        let sql = format!(
            "INSERT OR IGNORE INTO {join} (revision_id, target_revision_id)
             SELECT ?, target_revision_id FROM {join} WHERE revision_id = ?"
        );
        copied += conn.execute(&sql, params![to, from])?;
    }
    if copied > 0 {
        debug!(entity = ty.name(), from = %from, to = %to, links = copied, "copied links");
    }
    Ok(copied)
}

/// Replaces the links of one relation on one revision.
pub(crate) fn replace_links(
    conn: &Connection,
    owner: &EntityType,
    relation: &crate::model::ManyToMany,
    revision: RevisionId,
    targets: &[RevisionId],
) -> Result<()> {
    let join = join_table(owner, relation);
    conn.execute(&format!("DELETE FROM {join} WHERE revision_id = ?"), [revision])?;

    let mut stmt = conn.prepare(&format!(
        "INSERT OR IGNORE INTO {join} (revision_id, target_revision_id) VALUES (?, ?)"
    ))?;
    for target in targets {
        stmt.execute(params![revision, target])?;
    }
    debug!(
        relation = relation.name(),
        revision = %revision,
        links = targets.len(),
        "replaced links"
    );
    Ok(())
}

/// Raw target revision ids linked from one revision, ascending.
pub(crate) fn linked_revision_ids(
    conn: &Connection,
    owner: &EntityType,
    relation: &crate::model::ManyToMany,
    revision: RevisionId,
) -> Result<Vec<RevisionId>> {
    let join = join_table(owner, relation);
    let mut stmt = conn.prepare(&format!(
        "SELECT target_revision_id FROM {join} WHERE revision_id = ? ORDER BY target_revision_id"
    ))?;
    let ids = stmt
        .query_map([revision], |row| row.get(0))?
        .collect::<std::result::Result<Vec<RevisionId>, _>>()?;
    Ok(ids)
}

// =============================================================================
// Tests
// =============================================================================
