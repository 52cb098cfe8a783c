//! # RevDB - Content Revisioning on SQLite
//!
//! RevDB keeps every saved state of a record as its own row while presenting
//! callers with one logical "latest" view of each content item. It provides:
//!
//! - **Revisions and bundles**: every save can branch a new revision; all
//!   revisions of one item share a bundle id
//! - **Latest projection**: normal reads see exactly one row per bundle
//! - **History**: ordered revisions, prev/next, per-field history, revert
//! - **Trash**: bundle-wide soft delete with restore and purge
//! - **Inheritance and relations**: joined child tables, foreign keys resolved
//!   across a whole bundle, many-to-many links carried across revisions
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Versioned<M>  (Revisable, HistoryQueryable,        │
//! │                             Trashable)                          │
//! └──────────────┬──────────────────────────────────┬───────────────┘
//!                │ writes                           │ reads
//!                ▼                                  ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │ Store::write (1 transaction) │   │ Manager / QuerySet           │
//! │  identity → writer → trash   │   │  latest_only / all_revisions │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                │                                  │
//!                ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          SQLite  (tables generated from the Registry)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Identity**: every revision row has a bundle id after save
//! 2. **Ordering**: revisions of a bundle have pairwise-distinct comparators
//!    (`revision_id`, AUTOINCREMENT)
//! 3. **Latest**: the latest revision of a bundle is the one with the maximum
//!    comparator, and only that one
//! 4. **Trash**: a bundle is trashed all-or-nothing
//!
//! Concurrent revisions of one bundle from different writers are not merged:
//! the last comparator wins.
//!
//! ## Quick Start
//!
//! ```rust
//! use revdb::{EntityType, FieldDef, Fields, Model, Result, Revisable, SaveMode, Store, Versioned};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Story {
//!     title: String,
//! }
//!
//! impl Model for Story {
//!     const TYPE_NAME: &'static str = "story";
//!
//!     fn describe() -> EntityType {
//!         EntityType::new(Self::TYPE_NAME).field(FieldDef::text("title"))
//!     }
//!
//!     fn to_fields(&self) -> Fields {
//!         Fields::new().with("title", self.title.as_str())
//!     }
//!
//!     fn from_fields(fields: &Fields) -> Result<Self> {
//!         Ok(Self { title: fields.text("title")? })
//!     }
//! }
//!
//! let mut store = Store::open_in_memory()?;
//! store.register::<Story>()?;
//!
//! let mut story = Versioned::new(Story { title: "A".into() });
//! story.save(&mut store, SaveMode::NewRevision)?;
//!
//! story.title = "B".into();
//! story.revise(&mut store)?;
//!
//! let latest = store.manager::<Story>()?.latest_only().get()?;
//! assert_eq!(latest.title, "B");
//! assert_eq!(store.manager::<Story>()?.all_revisions().count()?, 2);
//! # Ok::<(), revdb::Error>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`error`]: Error taxonomy
//! - [`types`]: Identifiers, field values, save and read parameters
//! - [`identity`]: Bundle id minting
//! - [`model`]: The `Model` trait and entity type declarations
//! - [`registry`]: Validated catalog of entity types
//! - [`schema`]: Connection setup and generated DDL
//! - [`query`]: Revision query engine and latest projection
//! - [`writer`]: Unfiltered write path
//! - [`trash`]: Trash overlay
//! - [`entity`]: `Versioned<M>` and its capability traits
//! - [`manager`]: Read accessors and query sets
//! - [`store`]: The entry point

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for RevDB operations.
pub mod error;

/// Domain types: bundle and revision ids, field values, save modes.
pub mod types;

/// Bundle id minting.
///
/// Ids come from the operating system's CSPRNG, so uncoordinated writers never
/// collide.
pub mod identity;

/// The `Model` trait and per-type configuration (`EntityType`).
pub mod model;

/// Registered entity types, validated at registration.
pub mod registry;

/// SQLite connection setup, schema versioning and DDL generated per entity
/// type.
pub mod schema;

/// Read-side SQL: joined selects, the latest projection, revision lookups by
/// key and by date, and ordered revision sets.
pub mod query;

/// The write path: inserts, in-place updates, deletes and link copying.
///
/// Never filtered by the latest projection.
pub mod writer;

/// Bundle-wide soft delete.
pub mod trash;

/// Versioned records and their capabilities.
///
/// Capabilities are traits: [`Revisable`] and [`HistoryQueryable`] for every
/// model, [`Trashable`] only for models marked
/// [`TrashableModel`](model::TrashableModel).
pub mod entity;

/// Read accessors: `latest_only`, `all_revisions`, `live`, `trash`, and the
/// query sets they produce.
pub mod manager;

/// The store: one connection, one registry, one transaction per write.
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use entity::{HistoryQueryable, Revisable, RevisionRef, Trashable, Versioned};
pub use error::{Error, Result};
pub use manager::{Manager, QuerySet};
pub use model::{EntityType, FieldDef, Model, TrashableModel};
pub use query::RevisionSet;
pub use schema::StoreConfig;
pub use store::Store;

pub use types::{BundleId, FieldKind, Fields, RevisionId, SaveMode, TrashView, Value};
