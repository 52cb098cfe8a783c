//! # Latest-Projection Manager
//!
//! The read accessor of one model type. A manager hands out query sets that
//! start from one of two explicit bases:
//!
//! | Accessor | Rows | Use |
//! |----------|------|-----|
//! | [`Manager::latest_only`] | latest revision of each bundle | normal reads |
//! | [`Manager::all_revisions`] | every revision row | history, admin, writes |
//! | [`Manager::live`] | latest, not trashed | trashable types |
//! | [`Manager::trash`] | latest, trashed | trashable types |
//!
//! There is no call-site detection: a caller asking for latest rows says so,
//! and the write path (see [`crate::writer`]) never goes through a manager.
//!
//! ## Example
//!
//! ```rust,ignore
//! let stories = store.manager::<Story>()?;
//!
//! let current = stories.latest_only().filter("title", "Hello").fetch()?;
//! let every_row = stories.all_revisions().count()?;
//! let one = stories.latest_only().filter("slug", "hello").get()?;
//! ```

use std::marker::PhantomData;

use crate::entity::Versioned;
use crate::error::{Error, Result};
use crate::model::{EntityType, Model, TrashableModel};
use crate::query::{self, column_ref, RawRevision, RevisionSet, Select};
use crate::store::Store;
use crate::types::{BundleId, RevisionId, TrashView, Value};

// =============================================================================
// Manager
// =============================================================================

/// Read access to one registered model type.
pub struct Manager<'s, M> {
    store: &'s Store,
    ty: &'s EntityType,
    _model: PhantomData<M>,
}

impl<'s, M: Model> Manager<'s, M> {
    pub(crate) fn new(store: &'s Store, ty: &'s EntityType) -> Self {
        Self {
            store,
            ty,
            _model: PhantomData,
        }
    }

    /// The registered configuration of this type.
    pub fn entity_type(&self) -> &'s EntityType {
        self.ty
    }

    /// Every revision row, unfiltered.
    pub fn all_revisions(&self) -> QuerySet<'s, M> {
        QuerySet::new(self.store, self.ty, Select::all())
    }

    /// The latest revision of each bundle. Trashed bundles are included;
    /// see [`Manager::live`].
    pub fn latest_only(&self) -> QuerySet<'s, M> {
        QuerySet::new(self.store, self.ty, Select::latest())
    }

    /// One revision by comparator, whether or not it is the latest.
    pub fn get(&self, revision: RevisionId) -> Result<Versioned<M>> {
        query::get_revision(self.store.connection(), self.ty, revision)?
            .ok_or_else(|| Error::not_found(self.ty.name(), format!("revision {revision}")))?
            .into_versioned()
    }

    /// All revisions of a bundle, ascending, positioned at the latest.
    pub fn revisions_of(&self, bundle: &BundleId) -> Result<RevisionSet<M>> {
        let revisions = query::revisions_of(self.store.connection(), self.ty, bundle)?
            .into_iter()
            .map(RawRevision::into_versioned)
            .collect::<Result<Vec<_>>>()?;
        let current = revisions.last().and_then(Versioned::revision_id);
        Ok(RevisionSet::new(revisions, current))
    }

    /// The latest revision of a bundle.
    pub fn latest_of(&self, bundle: &BundleId) -> Result<Versioned<M>> {
        query::latest_of(self.store.connection(), self.ty, bundle)?
            .ok_or_else(|| Error::not_found(self.ty.name(), format!("bundle {bundle}")))?
            .into_versioned()
    }

    /// The revision of a bundle current at `timestamp_ms`.
    pub fn revision_at(&self, bundle: &BundleId, timestamp_ms: i64) -> Result<Versioned<M>> {
        query::revision_at(self.store.connection(), self.ty, bundle, timestamp_ms)?
            .ok_or_else(|| {
                Error::not_found(
                    self.ty.name(),
                    format!("no revision of bundle {bundle} published at or before {timestamp_ms}"),
                )
            })?
            .into_versioned()
    }

    /// Resolves any revision id, stale or not, to the latest revision of its
    /// bundle.
    ///
    /// This is the lookup a routing layer needs to redirect an old link: it
    /// compares the returned revision id with the requested one and redirects
    /// when they differ.
    pub fn resolve_latest(&self, revision: RevisionId) -> Result<Versioned<M>> {
        let bundle = query::bundle_of(self.store.connection(), self.ty, revision)?
            .ok_or_else(|| Error::not_found(self.ty.name(), format!("revision {revision}")))?;
        self.latest_of(&bundle)
    }
}

impl<'s, M: TrashableModel> Manager<'s, M> {
    /// Latest revisions of bundles not in the trash.
    pub fn live(&self) -> QuerySet<'s, M> {
        let () = M::MARKED;
        self.latest_only().trash_view(TrashView::Live)
    }

    /// Latest revisions of bundles in the trash.
    pub fn trash(&self) -> QuerySet<'s, M> {
        let () = M::MARKED;
        self.latest_only().trash_view(TrashView::Trash)
    }
}

// =============================================================================
// Query Sets
// =============================================================================

/// A lazily built query over one model type.
///
/// Builder methods never fail: the first invalid field name is remembered
/// and reported by whichever terminal method runs (`fetch`, `get`, ...).
pub struct QuerySet<'s, M> {
    store: &'s Store,
    ty: &'s EntityType,
    select: Select,
    error: Option<Error>,
    _model: PhantomData<M>,
}

impl<'s, M: Model> QuerySet<'s, M> {
    fn new(store: &'s Store, ty: &'s EntityType, select: Select) -> Self {
        Self {
            store,
            ty,
            select,
            error: None,
            _model: PhantomData,
        }
    }

    fn column(&mut self, field: &str) -> Option<String> {
        let column = column_ref(self.ty, field);
        if column.is_none() && self.error.is_none() {
            self.error = Some(Error::unresolved(self.ty.name(), field, "no such field"));
        }
        column
    }

    /// Keeps rows where `field` equals `value` (`IS NULL` for `Value::Null`).
    ///
    /// Accepts declared fields and `revision_id`, `bundle_id`, `is_trash`.
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if let Some(column) = self.column(field) {
            self.select = if value.is_null() {
                self.select.condition(format!("{column} IS NULL"), [])
            } else {
                self.select.condition(format!("{column} = ?"), [value])
            };
        }
        self
    }

    /// Keeps rows where `field` is one of `values`. An empty list matches
    /// nothing.
    pub fn filter_in<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if let Some(column) = self.column(field) {
            self.select = if values.is_empty() {
                self.select.condition("0", [])
            } else {
                let placeholders = vec!["?"; values.len()].join(", ");
                self.select
                    .condition(format!("{column} IN ({placeholders})"), values)
            };
        }
        self
    }

    /// Restricts to live or trashed bundles.
    pub fn trash_view(mut self, view: TrashView) -> Self {
        self.select = self.select.trash(view);
        self
    }

    /// Orders by a field, descending when prefixed with `-`. Without any
    /// ordering, rows come ascending by comparator.
    pub fn order_by(mut self, field: &str) -> Self {
        let (name, direction) = match field.strip_prefix('-') {
            Some(name) => (name, "DESC"),
            None => (field, "ASC"),
        };
        if let Some(column) = self.column(name) {
            self.select = self.select.order(format!("{column} {direction}"));
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.select = self.select.limit(limit);
        self
    }

    /// Runs the query.
    pub fn fetch(self) -> Result<Vec<Versioned<M>>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        query::fetch(self.store.connection(), self.ty, &self.select)?
            .into_iter()
            .map(RawRevision::into_versioned)
            .collect()
    }

    /// The first row, if any.
    pub fn first(self) -> Result<Option<Versioned<M>>> {
        Ok(self.limit(1).fetch()?.into_iter().next())
    }

    /// Exactly one row.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for no row, `Error::MultipleRows` for more than one.
    pub fn get(self) -> Result<Versioned<M>> {
        let entity = self.ty.name().to_string();
        let mut rows = self.fetch()?;
        match rows.len() {
            0 => Err(Error::not_found(&entity, "query matched no rows")),
            1 => Ok(rows.remove(0)),
            count => Err(Error::MultipleRows { entity, count }),
        }
    }

    pub fn count(self) -> Result<usize> {
        if let Some(err) = self.error {
            return Err(err);
        }
        query::count(self.store.connection(), self.ty, &self.select)
    }

    pub fn exists(self) -> Result<bool> {
        Ok(self.limit(1).count()? > 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
