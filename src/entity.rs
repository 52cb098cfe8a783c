//! # Versioned Entities
//!
//! [`Versioned<M>`] wraps a model with its revision identity, and the
//! capability traits in this module give it behavior:
//!
//! | Trait | Available for | Operations |
//! |-------|---------------|------------|
//! | [`Revisable`] | every model | save, revise, revert, clone, delete |
//! | [`HistoryQueryable`] | every model | revisions, latest, attribute history, related objects |
//! | [`Trashable`] | `M: TrashableModel` | trash, restore, delete permanently |
//!
//! ## Lifecycle of One Bundle
//!
//! ```text
//!  {unsaved} ──save──► {1 revision} ──revise──► {N revisions}
//!                                                   │
//!                         ┌──────── restore ────────┤ trash
//!                         ▼                         ▼
//!                    {persisted}                {trashed}
//!                         │                         │
//!                         └──── delete permanently ─┴──► {gone}
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut story = Versioned::new(Story::new("A"));
//! story.save(&mut store, SaveMode::NewRevision)?;   // bundle minted
//!
//! story.title = "B".into();
//! story.revise(&mut store)?;                        // second revision
//!
//! let first = story.revisions(&store)?.first().cloned().unwrap();
//! story.revert_to(&mut store, RevisionRef::Revision(&first))?;
//! ```

use std::ops::{Deref, DerefMut};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::assign_identity;
use crate::model::{EntityType, Model, TrashableModel};
use crate::query::{self, RawRevision, RevisionSet, Select};
use crate::store::Store;
use crate::trash;
use crate::types::{BundleId, RevisionId, SaveMode, TrashView, Value};
use crate::writer;

// =============================================================================
// Versioned Record
// =============================================================================

/// A model together with its place in a bundle's history.
///
/// Dereferences to the model, so domain fields read and write directly:
/// `story.title = "B".into()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<M> {
    revision_id: Option<RevisionId>,
    bundle_id: Option<BundleId>,
    is_trash: bool,
    small_change: bool,
    /// The domain fields of this revision.
    pub model: M,
}

impl<M> Versioned<M> {
    /// A new, unsaved record. Its first save mints the bundle id.
    pub fn new(model: M) -> Self {
        Self {
            revision_id: None,
            bundle_id: None,
            is_trash: false,
            small_change: false,
            model,
        }
    }

    pub(crate) fn from_storage(
        revision_id: RevisionId,
        bundle_id: BundleId,
        is_trash: bool,
        model: M,
    ) -> Self {
        Self {
            revision_id: Some(revision_id),
            bundle_id: Some(bundle_id),
            is_trash,
            small_change: false,
            model,
        }
    }

    /// The comparator of this revision, once persisted.
    pub fn revision_id(&self) -> Option<RevisionId> {
        self.revision_id
    }

    /// The bundle this revision belongs to, once persisted.
    pub fn bundle_id(&self) -> Option<&BundleId> {
        self.bundle_id.as_ref()
    }

    pub fn is_persisted(&self) -> bool {
        self.revision_id.is_some()
    }

    /// Flags the next save as a small change: a `SaveMode::NewRevision` save
    /// updates this revision in place instead of branching.
    ///
    /// The flag is transient. It is never stored and is cleared by the next
    /// write.
    pub fn mark_small_change(&mut self) {
        self.small_change = true;
    }

    pub fn is_small_change(&self) -> bool {
        self.small_change
    }

    pub fn into_model(self) -> M {
        self.model
    }

    fn require_bundle(&self, entity: &str) -> Result<&BundleId> {
        self.bundle_id
            .as_ref()
            .ok_or_else(|| Error::not_found(entity, "unsaved record has no bundle"))
    }

    fn require_revision(&self, entity: &str) -> Result<RevisionId> {
        self.revision_id
            .ok_or_else(|| Error::not_found(entity, "unsaved record has no revision"))
    }
}

impl<M> Deref for Versioned<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.model
    }
}

impl<M> DerefMut for Versioned<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.model
    }
}

// =============================================================================
// Write Primitives
// =============================================================================

impl<M: Model> Versioned<M> {
    /// Inserts the current state as a new revision of this bundle.
    ///
    /// Links of `links_from` are carried to the new row. The trash flag is
    /// taken from the bundle as stored, so a branch never splits a bundle
    /// between trash and live.
    fn insert_branch(
        &mut self,
        conn: &Connection,
        ty: &EntityType,
        links_from: Option<RevisionId>,
    ) -> Result<RevisionId> {
        self.model.before_save();

        // Minted into a copy: a failed insert leaves the record unsaved.
        let mut bundle_id = self.bundle_id.clone();
        let created = bundle_id.is_none();
        let bundle = assign_identity(&mut bundle_id).clone();
        let is_trash = trash::bundle_trash_state(conn, ty, &bundle)?.unwrap_or(false);

        let mut fields = self.model.to_fields();
        let revision = writer::insert_revision(conn, ty, &bundle, is_trash, &mut fields)?;
        if let Some(source) = links_from {
            writer::copy_links(conn, ty, source, revision)?;
        }

        self.model = M::from_fields(&fields)?;
        self.bundle_id = bundle_id;
        self.revision_id = Some(revision);
        self.is_trash = is_trash;
        self.small_change = false;

        if created {
            info!(entity = ty.name(), bundle = %bundle, revision = %revision, "created bundle");
        }
        Ok(revision)
    }

    fn update_in_place(
        &mut self,
        conn: &Connection,
        ty: &EntityType,
        revision: RevisionId,
    ) -> Result<RevisionId> {
        self.model.before_save();
        writer::update_revision(conn, ty, revision, &self.model.to_fields())?;
        self.small_change = false;
        Ok(revision)
    }
}

// =============================================================================
// Revision References
// =============================================================================

/// Names a revision to revert to.
#[derive(Debug)]
pub enum RevisionRef<'a, M> {
    /// By comparator.
    Id(RevisionId),
    /// The revision of this bundle current at a point in time (Unix ms),
    /// judged by the type's publication field.
    At(i64),
    /// A revision already loaded; its stored state is used.
    Revision(&'a Versioned<M>),
}

impl<M> Clone for RevisionRef<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for RevisionRef<'_, M> {}

impl<M: Model> RevisionRef<'_, M> {
    fn resolve(&self, conn: &Connection, ty: &EntityType, bundle: &BundleId) -> Result<RawRevision> {
        let revision = match self {
            RevisionRef::Id(id) => *id,
            RevisionRef::Revision(record) => record.require_revision(ty.name())?,
            RevisionRef::At(timestamp_ms) => {
                return query::revision_at(conn, ty, bundle, *timestamp_ms)?.ok_or_else(|| {
                    Error::not_found(
                        ty.name(),
                        format!("no revision of bundle {bundle} published at or before {timestamp_ms}"),
                    )
                });
            }
        };
        query::get_revision(conn, ty, revision)?
            .ok_or_else(|| Error::not_found(ty.name(), format!("revision {revision}")))
    }
}

// =============================================================================
// Revisable
// =============================================================================

/// Writing revisions: branch, update in place, revert, clone, delete.
///
/// Every method runs in one transaction on the store.
pub trait Revisable {
    type Model: Model;

    /// Persists the record.
    ///
    /// An unsaved record is inserted and gets a bundle id regardless of
    /// `mode`. A persisted record branches under [`SaveMode::NewRevision`]
    /// (unless flagged small-change) or is updated in place under
    /// [`SaveMode::InPlace`]. Returns the revision now holding the state.
    fn save(&mut self, store: &mut Store, mode: SaveMode) -> Result<RevisionId>;

    /// Always branches, ignoring the small-change flag.
    fn revise(&mut self, store: &mut Store) -> Result<RevisionId>;

    /// Saves the target revision's values (and links) forward as a new
    /// revision of this bundle.
    ///
    /// # Errors
    ///
    /// - `Error::Identity` if the target belongs to another bundle
    /// - `Error::NotFound` if the target does not resolve
    /// - `Error::Configuration` for [`RevisionRef::At`] without a publication field
    fn revert_to(&mut self, store: &mut Store, target: RevisionRef<'_, Self::Model>) -> Result<RevisionId>;

    /// Re-saves this revision as the newest one. Returns `false` (and writes
    /// nothing) when it already is the latest.
    fn make_current_revision(&mut self, store: &mut Store) -> Result<bool>;

    /// Clears the type's revision-scoped fields in memory, before the record
    /// is presented for editing.
    fn prepare_for_writing(&mut self, store: &Store) -> Result<()>;

    /// Persists a copy of this record as a new revision of the same bundle,
    /// with fresh creation stamps and the same many-to-many links.
    ///
    /// `self` is left untouched.
    fn clone_revision(&self, store: &mut Store) -> Result<Versioned<Self::Model>>;

    /// Deletes the bundle: to the trash when [`Model::TRASHABLE`] is set,
    /// permanently otherwise.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the bundle has no rows left.
    fn delete(&mut self, store: &mut Store) -> Result<()>;

    /// Permanently deletes this one revision. The rest of the bundle stays.
    ///
    /// # Errors
    ///
    /// `Error::ConstraintViolation` if the revision that becomes the latest
    /// shares a per-bundle unique value with another bundle's latest.
    fn delete_revision(&mut self, store: &mut Store) -> Result<()>;
}

impl<M: Model> Revisable for Versioned<M> {
    type Model = M;

    fn save(&mut self, store: &mut Store, mode: SaveMode) -> Result<RevisionId> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            match self.revision_id {
                None => self.insert_branch(tx, ty, None),
                Some(current) if mode == SaveMode::NewRevision && !self.small_change => {
                    self.insert_branch(tx, ty, Some(current))
                }
                Some(current) => self.update_in_place(tx, ty, current),
            }
        })
    }

    fn revise(&mut self, store: &mut Store) -> Result<RevisionId> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let source = self.revision_id;
            self.insert_branch(tx, ty, source)
        })
    }

    fn revert_to(&mut self, store: &mut Store, target: RevisionRef<'_, M>) -> Result<RevisionId> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let bundle = self.require_bundle(ty.name())?.clone();
            let raw = target.resolve(tx, ty, &bundle)?;

            if raw.bundle_id != bundle {
                return Err(Error::Identity {
                    revision: raw.revision_id.as_raw(),
                    expected: bundle.to_string(),
                    found: raw.bundle_id.to_string(),
                });
            }

            debug!(entity = ty.name(), bundle = %bundle, target = %raw.revision_id, "reverting");
            // The record keeps its own values unless the branch is written.
            let current = std::mem::replace(&mut self.model, M::from_fields(&raw.fields)?);
            self.insert_branch(tx, ty, Some(raw.revision_id)).map_err(|err| {
                self.model = current;
                err
            })
        })
    }

    fn make_current_revision(&mut self, store: &mut Store) -> Result<bool> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let bundle = self.require_bundle(ty.name())?.clone();
            let current = self.require_revision(ty.name())?;

            if query::is_latest(tx, ty, &bundle, current)? {
                return Ok(false);
            }
            self.insert_branch(tx, ty, Some(current))?;
            Ok(true)
        })
    }

    fn prepare_for_writing(&mut self, store: &Store) -> Result<()> {
        let ty = store.entity_type::<M>()?;
        let mut fields = self.model.to_fields();
        for name in ty.revision_scoped_fields() {
            if let Some(def) = ty.field_def(name) {
                fields.set(name, def.cleared_value());
            }
        }
        self.model = M::from_fields(&fields)?;
        Ok(())
    }

    fn clone_revision(&self, store: &mut Store) -> Result<Versioned<M>> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;

            let mut fields = self.model.to_fields();
            for (_, def) in ty.all_fields() {
                if def.is_auto_now_add() {
                    fields.set(def.name(), Value::Null);
                }
            }

            let mut clone = Versioned {
                revision_id: None,
                bundle_id: self.bundle_id.clone(),
                is_trash: self.is_trash,
                small_change: false,
                model: M::from_fields(&fields)?,
            };
            clone.insert_branch(tx, ty, self.revision_id)?;
            Ok(clone)
        })
    }

    fn delete(&mut self, store: &mut Store) -> Result<()> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let bundle = self.require_bundle(ty.name())?.clone();

            if M::TRASHABLE {
                trash_bundle(tx, ty, &bundle, true)?;
                self.is_trash = true;
                return Ok(());
            }

            if trash::purge_bundle(tx, ty, &bundle)? == 0 {
                return Err(Error::not_found(ty.name(), format!("bundle {bundle}")));
            }
            self.revision_id = None;
            self.bundle_id = None;
            Ok(())
        })
    }

    fn delete_revision(&mut self, store: &mut Store) -> Result<()> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let current = self.require_revision(ty.name())?;
            writer::delete_revision(tx, ty, current)?;
            self.revision_id = None;
            Ok(())
        })
    }
}

// =============================================================================
// HistoryQueryable
// =============================================================================

/// Reading a bundle's history and the records related to it.
pub trait HistoryQueryable {
    type Model: Model;

    /// All revisions of this bundle, ascending, positioned at this one.
    fn revisions(&self, store: &Store) -> Result<RevisionSet<Self::Model>>;

    /// The latest revision of this bundle.
    fn latest_revision(&self, store: &Store) -> Result<Versioned<Self::Model>>;

    /// Is this the latest revision of its bundle? `false` for unsaved records.
    fn check_if_latest(&self, store: &Store) -> Result<bool>;

    fn is_latest_revision(&self, store: &Store) -> Result<bool> {
        self.check_if_latest(store)
    }

    /// The revision of this bundle current at `timestamp_ms`, judged by the
    /// publication field.
    fn revision_at(&self, store: &Store, timestamp_ms: i64) -> Result<Versioned<Self::Model>>;

    /// `(value, revision)` pairs of one field across the bundle, ascending.
    ///
    /// # Errors
    ///
    /// `Error::AttributeResolution` if the type has no such field.
    fn attribute_history(
        &self,
        store: &Store,
        field: &str,
    ) -> Result<Vec<(Value, Versioned<Self::Model>)>>;

    /// Latest revisions of `R` whose foreign key points at any revision of
    /// this bundle.
    ///
    /// # Errors
    ///
    /// `Error::AttributeResolution` if `R` has no foreign key to this type,
    /// or several (use [`HistoryQueryable::related_via`]).
    fn related<R: Model>(&self, store: &Store) -> Result<Vec<Versioned<R>>>;

    /// Like [`HistoryQueryable::related`], through the named foreign key.
    fn related_via<R: Model>(&self, store: &Store, field: &str) -> Result<Vec<Versioned<R>>>;
}

impl<M: Model> HistoryQueryable for Versioned<M> {
    type Model = M;

    fn revisions(&self, store: &Store) -> Result<RevisionSet<M>> {
        let ty = store.entity_type::<M>()?;
        let bundle = self.require_bundle(ty.name())?;
        let revisions = query::revisions_of(store.connection(), ty, bundle)?
            .into_iter()
            .map(RawRevision::into_versioned)
            .collect::<Result<Vec<_>>>()?;
        Ok(RevisionSet::new(revisions, self.revision_id))
    }

    fn latest_revision(&self, store: &Store) -> Result<Versioned<M>> {
        let ty = store.entity_type::<M>()?;
        let bundle = self.require_bundle(ty.name())?;
        query::latest_of(store.connection(), ty, bundle)?
            .ok_or_else(|| Error::not_found(ty.name(), format!("bundle {bundle}")))?
            .into_versioned()
    }

    fn check_if_latest(&self, store: &Store) -> Result<bool> {
        let ty = store.entity_type::<M>()?;
        match (&self.bundle_id, self.revision_id) {
            (Some(bundle), Some(revision)) => query::is_latest(store.connection(), ty, bundle, revision),
            _ => Ok(false),
        }
    }

    fn revision_at(&self, store: &Store, timestamp_ms: i64) -> Result<Versioned<M>> {
        let ty = store.entity_type::<M>()?;
        let bundle = self.require_bundle(ty.name())?;
        RevisionRef::<M>::At(timestamp_ms)
            .resolve(store.connection(), ty, bundle)?
            .into_versioned()
    }

    fn attribute_history(&self, store: &Store, field: &str) -> Result<Vec<(Value, Versioned<M>)>> {
        let ty = store.entity_type::<M>()?;
        if ty.field_def(field).is_none() {
            return Err(Error::unresolved(ty.name(), field, "no such field"));
        }
        let bundle = self.require_bundle(ty.name())?;

        query::revisions_of(store.connection(), ty, bundle)?
            .into_iter()
            .map(|raw| {
                let value = raw.fields.get(field).cloned().unwrap_or(Value::Null);
                Ok((value, raw.into_versioned()?))
            })
            .collect()
    }

    fn related<R: Model>(&self, store: &Store) -> Result<Vec<Versioned<R>>> {
        related_records(store, store.entity_type::<M>()?, self, None)
    }

    fn related_via<R: Model>(&self, store: &Store, field: &str) -> Result<Vec<Versioned<R>>> {
        related_records(store, store.entity_type::<M>()?, self, Some(field))
    }
}

/// Resolves the back-reference from `R` to the source type through the
/// registry, then selects across every revision of the source bundle.
fn related_records<M, R: Model>(
    store: &Store,
    source: &EntityType,
    record: &Versioned<M>,
    field: Option<&str>,
) -> Result<Vec<Versioned<R>>> {
    let target = store.entity_type::<R>()?;
    let name = field.unwrap_or(R::TYPE_NAME);

    let candidates: Vec<_> = source
        .chain()
        .into_iter()
        .flat_map(|level| store.registry().reverse_relations(level.name()))
        .filter(|rel| target.is_or_extends(&rel.source))
        .filter(|rel| field.map_or(true, |f| f == rel.field))
        .collect();

    let relation = match candidates.as_slice() {
        [one] => *one,
        [] => {
            return Err(Error::unresolved(
                source.name(),
                name,
                format!("no foreign key on '{}' points at '{}'", R::TYPE_NAME, source.name()),
            ))
        }
        many => {
            return Err(Error::unresolved(
                source.name(),
                name,
                format!(
                    "{} foreign keys on '{}' point at '{}'; name one with related_via",
                    many.len(),
                    R::TYPE_NAME,
                    source.name()
                ),
            ))
        }
    };

    let bundle = record.require_bundle(source.name())?;
    let column = query::column_ref(target, &relation.field).ok_or_else(|| {
        Error::unresolved(target.name(), &relation.field, "foreign key column not found")
    })?;
    let view = if target.is_trashable() {
        TrashView::Live
    } else {
        TrashView::Any
    };

    let select = Select::latest().trash(view).condition(
        format!(
            "{column} IN (SELECT revision_id FROM {} WHERE bundle_id = ?)",
            source.base_table()
        ),
        [Value::from(bundle.as_str())],
    );
    query::fetch(store.connection(), target, &select)?
        .into_iter()
        .map(RawRevision::into_versioned)
        .collect()
}

// =============================================================================
// Many-to-Many Relations
// =============================================================================

impl<M: Model> Versioned<M> {
    /// Replaces the links of a many-to-many relation on this revision.
    ///
    /// Links are per revision: setting them does not touch older revisions.
    pub fn set_links(&self, store: &mut Store, relation: &str, targets: &[RevisionId]) -> Result<()> {
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let (owner, m2m) = ty
                .many_to_many_def(relation)
                .ok_or_else(|| Error::unresolved(ty.name(), relation, "no such relation"))?;
            let revision = self.require_revision(ty.name())?;
            writer::replace_links(tx, owner, m2m, revision, targets)
        })
    }

    /// Raw target revision ids linked from this revision.
    pub fn linked_revision_ids(&self, store: &Store, relation: &str) -> Result<Vec<RevisionId>> {
        let ty = store.entity_type::<M>()?;
        let (owner, m2m) = ty
            .many_to_many_def(relation)
            .ok_or_else(|| Error::unresolved(ty.name(), relation, "no such relation"))?;
        let revision = self.require_revision(ty.name())?;
        writer::linked_revision_ids(store.connection(), owner, m2m, revision)
    }

    /// The latest revision of every bundle linked from this revision.
    pub fn links<T: Model>(&self, store: &Store, relation: &str) -> Result<Vec<Versioned<T>>> {
        let ty = store.entity_type::<M>()?;
        let (owner, m2m) = ty
            .many_to_many_def(relation)
            .ok_or_else(|| Error::unresolved(ty.name(), relation, "no such relation"))?;
        let target = store.entity_type::<T>()?;
        if !target.is_or_extends(m2m.target()) {
            return Err(Error::unresolved(
                ty.name(),
                relation,
                format!("relation targets '{}', not '{}'", m2m.target(), T::TYPE_NAME),
            ));
        }
        let revision = self.require_revision(ty.name())?;

        let join = crate::model::join_table(owner, m2m);
        let view = if target.is_trashable() {
            TrashView::Live
        } else {
            TrashView::Any
        };
        let select = Select::latest().trash(view).condition(
            format!(
                "t0.bundle_id IN (SELECT b.bundle_id FROM {base} AS b \
                 JOIN {join} AS j ON j.target_revision_id = b.revision_id \
                 WHERE j.revision_id = ?)",
                base = target.base_table()
            ),
            [Value::from(revision)],
        );
        query::fetch(store.connection(), target, &select)?
            .into_iter()
            .map(RawRevision::into_versioned)
            .collect()
    }
}

// =============================================================================
// Trashable
// =============================================================================

/// Bundle-wide soft deletion.
///
/// Only implemented for models marked [`TrashableModel`]; trashing a plain
/// model does not compile.
pub trait Trashable {
    /// Flags every revision of the bundle as trash. Returns the row count.
    fn trash(&mut self, store: &mut Store) -> Result<usize>;

    /// Clears the trash flag on every revision of the bundle.
    fn restore(&mut self, store: &mut Store) -> Result<usize>;

    /// Removes every revision of the bundle for good.
    fn delete_permanently(&mut self, store: &mut Store) -> Result<usize>;

    fn is_trash(&self) -> bool;
}

/// Flags a whole bundle; a bundle with no rows left is `NotFound`.
fn trash_bundle(conn: &Connection, ty: &EntityType, bundle: &BundleId, trashed: bool) -> Result<usize> {
    let updated = trash::set_bundle_trash(conn, ty, bundle, trashed)?;
    if updated == 0 {
        return Err(Error::not_found(ty.name(), format!("bundle {bundle}")));
    }
    Ok(updated)
}

impl<M: TrashableModel> Versioned<M> {
    fn set_trash(&mut self, store: &mut Store, trashed: bool) -> Result<usize> {
        let () = M::MARKED;
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let bundle = self.require_bundle(ty.name())?.clone();
            let updated = trash_bundle(tx, ty, &bundle, trashed)?;
            self.is_trash = trashed;
            Ok(updated)
        })
    }
}

impl<M: TrashableModel> Trashable for Versioned<M> {
    fn trash(&mut self, store: &mut Store) -> Result<usize> {
        self.set_trash(store, true)
    }

    fn restore(&mut self, store: &mut Store) -> Result<usize> {
        self.set_trash(store, false)
    }

    fn delete_permanently(&mut self, store: &mut Store) -> Result<usize> {
        let () = M::MARKED;
        store.write(|tx, registry| {
            let ty = registry.require(M::TYPE_NAME)?;
            let bundle = self.require_bundle(ty.name())?.clone();
            let deleted = trash::purge_bundle(tx, ty, &bundle)?;
            if deleted == 0 {
                return Err(Error::not_found(ty.name(), format!("bundle {bundle}")));
            }
            self.revision_id = None;
            self.bundle_id = None;
            Ok(deleted)
        })
    }

    fn is_trash(&self) -> bool {
        self.is_trash
    }
}
