//! # Revision Query Engine
//!
//! Read-side SQL for RevDB. Every query runs directly against SQLite through a
//! borrowed connection; there is no cache to go stale.
//!
//! ## Joined Selects
//!
//! Under inheritance a type is spread over its chain of tables. Selects alias
//! the root table `t0` and each descendant `t1..tN`, joined on `revision_id`:
//!
//! ```text
//! SELECT t0.revision_id, t0.bundle_id, t0.is_trash, t0.title, t1.subtitle
//! FROM story AS t0
//! JOIN fancy_story AS t1 ON t1.revision_id = t0.revision_id
//! ```
//!
//! The comparator is always `t0.revision_id`, the root table's key.
//!
//! ## Latest Projection
//!
//! "Latest per bundle" is a correlated max over the root table:
//!
//! ```text
//! t0.revision_id = (SELECT MAX(sub.revision_id) FROM story AS sub
//!                   WHERE sub.bundle_id = t0.bundle_id)
//! ```
//!
//! The `(bundle_id, revision_id)` index on the root table serves the subquery.
//! Write paths never use this filter; they address rows by `revision_id`.

use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::entity::Versioned;
use crate::error::{Error, Result};
use crate::model::{EntityType, Model};
use crate::trash::trash_condition;
use crate::types::{BundleId, Fields, RevisionId, TrashView, Value};

/// Pseudo-fields every versioned type can be filtered and ordered on.
const PSEUDO_FIELDS: [&str; 3] = ["revision_id", "bundle_id", "is_trash"];

// =============================================================================
// Raw Rows
// =============================================================================

/// One decoded revision row, before conversion into a model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRevision {
    pub revision_id: RevisionId,
    pub bundle_id: BundleId,
    pub is_trash: bool,
    pub fields: Fields,
}

impl RawRevision {
    /// Converts the row into a typed record.
    pub fn into_versioned<M: Model>(self) -> Result<Versioned<M>> {
        let model = M::from_fields(&self.fields)?;
        Ok(Versioned::from_storage(
            self.revision_id,
            self.bundle_id,
            self.is_trash,
            model,
        ))
    }
}

fn decode_row(ty: &EntityType, row: &Row<'_>) -> rusqlite::Result<RawRevision> {
    let mut fields = Fields::new();
    for (i, (_, field)) in ty.all_fields().into_iter().enumerate() {
        let idx = i + PSEUDO_FIELDS.len();
        let raw = row.get_ref(idx)?;
        let value = Value::from_column(field.kind(), raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, raw.data_type(), Box::new(e))
        })?;
        fields.set(field.name(), value);
    }

    Ok(RawRevision {
        revision_id: row.get(0)?,
        bundle_id: row.get(1)?,
        is_trash: row.get(2)?,
        fields,
    })
}

// =============================================================================
// SQL Fragments
// =============================================================================

/// Resolves a field or pseudo-field name to its aliased column.
pub(crate) fn column_ref(ty: &EntityType, name: &str) -> Option<String> {
    if PSEUDO_FIELDS.contains(&name) {
        return Some(format!("t0.{name}"));
    }
    ty.all_fields()
        .into_iter()
        .find(|(_, f)| f.name() == name)
        .map(|(depth, f)| format!("t{depth}.{}", f.name()))
}

fn from_clause(ty: &EntityType) -> String {
    let mut sql = String::new();
    for (depth, level) in ty.chain().into_iter().enumerate() {
        if depth == 0 {
            sql.push_str(&format!("{} AS t0", level.table_name()));
        } else {
            sql.push_str(&format!(
                " JOIN {} AS t{depth} ON t{depth}.revision_id = t0.revision_id",
                level.table_name()
            ));
        }
    }
    sql
}

fn column_list(ty: &EntityType) -> String {
    PSEUDO_FIELDS
        .iter()
        .map(|c| format!("t0.{c}"))
        .chain(
            ty.all_fields()
                .into_iter()
                .map(|(depth, f)| format!("t{depth}.{}", f.name())),
        )
        .collect::<Vec<_>>()
        .join(", ")
}

/// The correlated-max filter keeping the latest revision of each bundle.
pub(crate) fn latest_condition(ty: &EntityType) -> String {
    format!(
        "t0.revision_id = (SELECT MAX(sub.revision_id) FROM {} AS sub WHERE sub.bundle_id = t0.bundle_id)",
        ty.base_table()
    )
}

// =============================================================================
// Select Builder
// =============================================================================

/// A parameterized SELECT over one entity type.
#[derive(Debug, Clone, Default)]
pub(crate) struct Select {
    conditions: Vec<String>,
    params: Vec<Value>,
    latest_only: bool,
    trash: TrashView,
    order_by: Vec<String>,
    limit: Option<usize>,
}

impl Select {
    /// Every revision row.
    pub fn all() -> Self {
        Self::default()
    }

    /// One row per bundle, the latest.
    pub fn latest() -> Self {
        Self {
            latest_only: true,
            ..Self::default()
        }
    }

    /// Adds a SQL condition with `?` placeholders bound to `params` in order.
    pub fn condition(mut self, sql: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        self.conditions.push(sql.into());
        self.params.extend(params);
        self
    }

    pub fn trash(mut self, view: TrashView) -> Self {
        self.trash = view;
        self
    }

    pub fn order(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn where_clause(&self, ty: &EntityType) -> String {
        let mut conditions = Vec::new();
        if self.latest_only {
            conditions.push(latest_condition(ty));
        }
        if let Some(trash) = trash_condition(self.trash) {
            conditions.push(trash.to_string());
        }
        conditions.extend(self.conditions.iter().cloned());

        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }

    pub fn sql(&self, ty: &EntityType) -> String {
        let order = if self.order_by.is_empty() {
            "t0.revision_id ASC".to_string()
        } else {
            self.order_by.join(", ")
        };
        let mut sql = format!(
            "SELECT {} FROM {}{} ORDER BY {order}",
            column_list(ty),
            from_clause(ty),
            self.where_clause(ty)
        );
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    pub fn count_sql(&self, ty: &EntityType) -> String {
        let inner = match self.limit {
            Some(limit) => format!(
                "SELECT t0.revision_id FROM {}{} LIMIT {limit}",
                from_clause(ty),
                self.where_clause(ty)
            ),
            None => format!(
                "SELECT t0.revision_id FROM {}{}",
                from_clause(ty),
                self.where_clause(ty)
            ),
        };
        format!("SELECT COUNT(*) FROM ({inner})")
    }
}

// =============================================================================
// Direct Read Functions
// =============================================================================

/// Runs a select and decodes every row.
pub(crate) fn fetch(conn: &Connection, ty: &EntityType, select: &Select) -> Result<Vec<RawRevision>> {
    let sql = select.sql(ty);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(select.params.iter()), |row| decode_row(ty, row))?;
    let rows = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(entity = ty.name(), rows = rows.len(), "fetched revisions");
    Ok(rows)
}

/// Counts the rows a select would return.
pub(crate) fn count(conn: &Connection, ty: &EntityType, select: &Select) -> Result<usize> {
    let n: i64 = conn.query_row(
        &select.count_sql(ty),
        params_from_iter(select.params.iter()),
        |row| row.get(0),
    )?;
    Ok(usize::try_from(n).unwrap_or(0))
}

/// Reads one revision row by key, ignoring the latest projection.
pub fn get_revision(conn: &Connection, ty: &EntityType, revision: RevisionId) -> Result<Option<RawRevision>> {
    let select = Select::all().condition("t0.revision_id = ?", [Value::from(revision)]);
    Ok(fetch(conn, ty, &select)?.into_iter().next())
}

/// All revisions of a bundle, ascending by comparator.
pub fn revisions_of(conn: &Connection, ty: &EntityType, bundle: &BundleId) -> Result<Vec<RawRevision>> {
    let select = Select::all().condition("t0.bundle_id = ?", [Value::from(bundle.as_str())]);
    fetch(conn, ty, &select)
}

/// The latest revision of a bundle.
pub fn latest_of(conn: &Connection, ty: &EntityType, bundle: &BundleId) -> Result<Option<RawRevision>> {
    let select = Select::latest().condition("t0.bundle_id = ?", [Value::from(bundle.as_str())]);
    Ok(fetch(conn, ty, &select)?.into_iter().next())
}

/// The maximum comparator of a bundle, or `None` if the bundle has no rows.
pub fn latest_revision_id(conn: &Connection, ty: &EntityType, bundle: &BundleId) -> Result<Option<RevisionId>> {
    let sql = format!(
        "SELECT MAX(revision_id) FROM {} WHERE bundle_id = ?",
        ty.base_table()
    );
    Ok(conn.query_row(&sql, [bundle], |row| row.get(0))?)
}

/// Is `revision` the latest of its bundle?
///
/// Compares against the bundle maximum (`>=`), never against a row count or
/// ordinal position.
pub fn is_latest(conn: &Connection, ty: &EntityType, bundle: &BundleId, revision: RevisionId) -> Result<bool> {
    Ok(match latest_revision_id(conn, ty, bundle)? {
        Some(max) => revision >= max,
        None => false,
    })
}

/// The bundle a revision belongs to.
pub fn bundle_of(conn: &Connection, ty: &EntityType, revision: RevisionId) -> Result<Option<BundleId>> {
    let sql = format!(
        "SELECT bundle_id FROM {} WHERE revision_id = ?",
        ty.base_table()
    );
    Ok(conn.query_row(&sql, [revision], |row| row.get(0)).optional()?)
}

/// The revision of a bundle that was current at `timestamp_ms`.
///
/// Picks the greatest publication value not after `timestamp_ms`; ties go to
/// the larger comparator. Rows with a NULL publication value never match.
///
/// # Errors
///
/// `Error::Configuration` if the type declares no publication field.
pub fn revision_at(
    conn: &Connection,
    ty: &EntityType,
    bundle: &BundleId,
    timestamp_ms: i64,
) -> Result<Option<RawRevision>> {
    let field = ty.publication().ok_or_else(|| {
        Error::configuration(
            ty.name(),
            "fetching a revision by date needs a publication field; declare one with EntityType::publication_field",
        )
    })?;
    let column = column_ref(ty, field).ok_or_else(|| {
        Error::configuration(ty.name(), format!("publication field '{field}' is not declared"))
    })?;

    let select = Select::all()
        .condition("t0.bundle_id = ?", [Value::from(bundle.as_str())])
        .condition(format!("{column} <= ?"), [Value::Integer(timestamp_ms)])
        .order(format!("{column} DESC"))
        .order("t0.revision_id DESC")
        .limit(1);
    Ok(fetch(conn, ty, &select)?.into_iter().next())
}

// =============================================================================
// Revision Sets
// =============================================================================

/// The ordered revisions of one bundle, seen from one of them.
///
/// Ascending by comparator. `prev` and `next` are relative to the revision
/// the set was loaded for.
#[derive(Debug, Clone)]
pub struct RevisionSet<M> {
    revisions: Vec<Versioned<M>>,
    current: Option<RevisionId>,
}

impl<M> RevisionSet<M> {
    pub(crate) fn new(revisions: Vec<Versioned<M>>, current: Option<RevisionId>) -> Self {
        Self { revisions, current }
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Versioned<M>> {
        self.revisions.iter()
    }

    /// The oldest revision.
    pub fn first(&self) -> Option<&Versioned<M>> {
        self.revisions.first()
    }

    /// The latest revision.
    pub fn last(&self) -> Option<&Versioned<M>> {
        self.revisions.last()
    }

    pub fn revision_ids(&self) -> Vec<RevisionId> {
        self.revisions
            .iter()
            .filter_map(Versioned::revision_id)
            .collect()
    }

    /// The revision the set was loaded for.
    pub fn current(&self) -> Option<&Versioned<M>> {
        let current = self.current?;
        self.revisions
            .iter()
            .find(|r| r.revision_id() == Some(current))
    }

    /// The revision with the largest comparator strictly below the current one.
    pub fn prev(&self) -> Option<&Versioned<M>> {
        let current = self.current?;
        self.revisions
            .iter()
            .rev()
            .find(|r| r.revision_id().is_some_and(|id| id < current))
    }

    /// The revision with the smallest comparator strictly above the current one.
    pub fn next(&self) -> Option<&Versioned<M>> {
        let current = self.current?;
        self.revisions
            .iter()
            .find(|r| r.revision_id().is_some_and(|id| id > current))
    }

    pub fn into_vec(self) -> Vec<Versioned<M>> {
        self.revisions
    }
}

impl<M> IntoIterator for RevisionSet<M> {
    type Item = Versioned<M>;
    type IntoIter = std::vec::IntoIter<Versioned<M>>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.into_iter()
    }
}

impl<'a, M> IntoIterator for &'a RevisionSet<M> {
    type Item = &'a Versioned<M>;
    type IntoIter = std::slice::Iter<'a, Versioned<M>>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldDef;
    use crate::schema::{Database, StoreConfig};

    struct Story;

    impl Model for Story {
        const TYPE_NAME: &'static str = "story";

        fn describe() -> EntityType {
            EntityType::new("story")
                .field(FieldDef::text("title"))
                .field(FieldDef::timestamp("published").nullable())
                .publication_field("published")
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
        }

        fn from_fields(_: &Fields) -> Result<Self> {
            Ok(Story)
        }
    }

    fn fancy() -> EntityType {
        EntityType::new("fancy_story")
            .extends::<Story>()
            .field(FieldDef::text("subtitle"))
    }

    /// Bundle `a` has revisions 1, 2, 4; bundle `b` has revision 3.
    fn seeded() -> Database {
        let db = Database::open_in_memory(&StoreConfig::default()).unwrap();
        db.create_entity_tables(&Story::describe()).unwrap();
        db.connection()
            .execute_batch(
                "INSERT INTO story (bundle_id, title, published) VALUES ('a', 'a1', 100);
                 INSERT INTO story (bundle_id, title, published) VALUES ('a', 'a2', 200);
                 INSERT INTO story (bundle_id, title, published) VALUES ('b', 'b1', NULL);
                 INSERT INTO story (bundle_id, title, published) VALUES ('a', 'a3', 200);",
            )
            .unwrap();
        db
    }

    fn titles(rows: &[RawRevision]) -> Vec<String> {
        rows.iter().map(|r| r.fields.text("title").unwrap()).collect()
    }

    #[test]
    fn test_revisions_of_is_ascending() {
        let db = seeded();
        let ty = Story::describe();
        let rows = revisions_of(db.connection(), &ty, &BundleId::from_raw("a")).unwrap();

        assert_eq!(titles(&rows), vec!["a1", "a2", "a3"]);
        let ids: Vec<_> = rows.iter().map(|r| r.revision_id.as_raw()).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn test_latest_projection() {
        let db = seeded();
        let ty = Story::describe();
        let rows = fetch(db.connection(), &ty, &Select::latest()).unwrap();

        assert_eq!(titles(&rows), vec!["b1", "a3"]);

        let latest = latest_of(db.connection(), &ty, &BundleId::from_raw("a")).unwrap().unwrap();
        assert_eq!(latest.revision_id, RevisionId::from_raw(4));
        assert!(is_latest(db.connection(), &ty, &latest.bundle_id, latest.revision_id).unwrap());
        assert!(!is_latest(db.connection(), &ty, &latest.bundle_id, RevisionId::from_raw(2)).unwrap());
    }

    #[test]
    fn test_revision_at_breaks_ties_by_comparator() {
        let db = seeded();
        let ty = Story::describe();
        let a = BundleId::from_raw("a");

        let at = |ts| revision_at(db.connection(), &ty, &a, ts).unwrap().map(|r| r.revision_id.as_raw());
        assert_eq!(at(50), None);
        assert_eq!(at(100), Some(1));
        assert_eq!(at(199), Some(1));
        assert_eq!(at(500), Some(4));
    }

    #[test]
    fn test_revision_at_needs_publication_field() {
        let db = Database::open_in_memory(&StoreConfig::default()).unwrap();
        let ty = EntityType::new("plain").field(FieldDef::text("title"));
        db.create_entity_tables(&ty).unwrap();

        let err = revision_at(db.connection(), &ty, &BundleId::from_raw("a"), 0).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_joined_select_uses_root_comparator() {
        let ty = fancy();
        let sql = Select::latest().sql(&ty);

        assert!(sql.contains("FROM story AS t0 JOIN fancy_story AS t1 ON t1.revision_id = t0.revision_id"));
        assert!(sql.contains("FROM story AS sub"));
        assert_eq!(column_ref(&ty, "subtitle").as_deref(), Some("t1.subtitle"));
        assert_eq!(column_ref(&ty, "title").as_deref(), Some("t0.title"));
        assert_eq!(column_ref(&ty, "bundle_id").as_deref(), Some("t0.bundle_id"));
        assert_eq!(column_ref(&ty, "nope"), None);
    }

    #[test]
    fn test_count_respects_filters() {
        let db = seeded();
        let ty = Story::describe();

        assert_eq!(count(db.connection(), &ty, &Select::all()).unwrap(), 4);
        assert_eq!(count(db.connection(), &ty, &Select::latest()).unwrap(), 2);
        assert_eq!(count(db.connection(), &ty, &Select::all().limit(3)).unwrap(), 3);
    }

    #[test]
    fn test_bundle_of() {
        let db = seeded();
        let ty = Story::describe();

        let bundle = bundle_of(db.connection(), &ty, RevisionId::from_raw(3)).unwrap();
        assert_eq!(bundle, Some(BundleId::from_raw("b")));
        assert_eq!(bundle_of(db.connection(), &ty, RevisionId::from_raw(99)).unwrap(), None);
    }
}
