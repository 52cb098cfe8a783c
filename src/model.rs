//! # Entity Types and the Model Trait
//!
//! A *model* is a plain Rust struct holding the domain fields of one revision.
//! An *entity type* is the per-type configuration RevDB needs to store it:
//! columns, inheritance, revision-scoped fields, uniqueness rules, the
//! publication field used for fetch-by-date, and many-to-many relations.
//!
//! ```text
//! ┌──────────────────────┐   describe()   ┌──────────────────────────────┐
//! │  struct Story {..}   │ ─────────────► │ EntityType "story"           │
//! │  impl Model          │                │  fields: title, slug, body   │
//! └──────────┬───────────┘                │  clear_each_revision: slug   │
//!            │ to_fields / from_fields    │  unique_per_bundle: [body]   │
//!            ▼                            └──────────────────────────────┘
//! ┌──────────────────────┐
//! │ Fields { name → Value}│  ← what the store reads and writes
//! └──────────────────────┘
//! ```
//!
//! ## Capabilities
//!
//! Every model is revisable and history-queryable. Soft deletion is opt-in:
//! a model sets [`Model::TRASHABLE`] and implements the [`TrashableModel`]
//! marker, which unlocks [`crate::entity::Trashable`] for its records. The
//! two cannot disagree: using the marker on a model that leaves
//! `TRASHABLE` unset fails to compile.

use crate::error::Result;
use crate::types::{FieldKind, Fields};

// =============================================================================
// Model Trait
// =============================================================================

/// A record type whose every save is kept as a revision.
///
/// # Example
///
/// ```rust
/// use revdb::model::{EntityType, FieldDef, Model};
/// use revdb::types::Fields;
/// use revdb::Result;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Note {
///     text: String,
/// }
///
/// impl Model for Note {
///     const TYPE_NAME: &'static str = "note";
///
///     fn describe() -> EntityType {
///         EntityType::new(Self::TYPE_NAME).field(FieldDef::text("text"))
///     }
///
///     fn to_fields(&self) -> Fields {
///         Fields::new().with("text", self.text.as_str())
///     }
///
///     fn from_fields(fields: &Fields) -> Result<Self> {
///         Ok(Self { text: fields.text("text")? })
///     }
/// }
/// ```
pub trait Model: Sized {
    /// Registry key of this type. Must match the name given to
    /// [`EntityType::new`] in [`Model::describe`].
    const TYPE_NAME: &'static str;

    /// `delete` moves bundles of this type to the trash instead of removing
    /// them. Set together with [`TrashableModel`].
    const TRASHABLE: bool = false;

    /// Declares the storage configuration of this type.
    fn describe() -> EntityType;

    /// Converts the domain fields to column values.
    ///
    /// Under inheritance, this includes the parent type's fields.
    fn to_fields(&self) -> Fields;

    /// Rebuilds the model from column values.
    fn from_fields(fields: &Fields) -> Result<Self>;

    /// Hook run before every physical write (insert or in-place update).
    fn before_save(&mut self) {}
}

/// Marker for models whose bundles go to a trash bin instead of being deleted.
///
/// Requires `const TRASHABLE: bool = true` on the [`Model`] impl; every trash
/// operation evaluates [`TrashableModel::MARKED`], which fails to compile
/// otherwise.
pub trait TrashableModel: Model {
    #[doc(hidden)]
    const MARKED: () = assert!(
        Self::TRASHABLE,
        "TrashableModel requires `const TRASHABLE: bool = true` on the Model impl"
    );
}

// =============================================================================
// Field Declarations
// =============================================================================

/// One declared column of an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    nullable: bool,
    auto_now_add: bool,
}

impl FieldDef {
    /// Declares a field of the given kind (NOT NULL unless marked nullable).
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: false,
            auto_now_add: false,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn real(name: &str) -> Self {
        Self::new(name, FieldKind::Real)
    }

    pub fn blob(name: &str) -> Self {
        Self::new(name, FieldKind::Blob)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, FieldKind::TimestampMs)
    }

    /// A reference to one specific revision of `target`.
    pub fn foreign_key(name: &str, target: &'static str) -> Self {
        Self::new(name, FieldKind::ForeignKey(target))
    }

    /// Allows NULL in this column.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Stamps the field with the current time (Unix ms) on every inserted
    /// revision, so each revision records its own creation time.
    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self.nullable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_auto_now_add(&self) -> bool {
        self.auto_now_add
    }

    /// The value this field is cleared to by `prepare_for_writing`.
    pub(crate) fn cleared_value(&self) -> crate::types::Value {
        if self.nullable {
            crate::types::Value::Null
        } else {
            self.kind.empty_value()
        }
    }
}

/// A many-to-many relation stored in a join table.
///
/// Links point at specific revisions of the target type. Branching a revision
/// copies its links to the new row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToMany {
    name: String,
    target: &'static str,
}

impl ManyToMany {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &'static str {
        self.target
    }
}

// =============================================================================
// Entity Type
// =============================================================================

/// Storage configuration of one model type.
///
/// Built with chained calls in [`Model::describe`] and validated when the
/// type is registered (see [`crate::registry::Registry`]).
///
/// # Inheritance
///
/// [`EntityType::extends`] stores this type in its own table joined to the
/// parent's table by `revision_id`. The root table owns `revision_id`,
/// `bundle_id` and `is_trash`, so the comparator always comes from the root.
///
/// ```text
/// story (root)                     fancy_story
/// ┌─────────────┬───────────┐      ┌─────────────┬──────────┐
/// │ revision_id │ bundle_id │◄─────│ revision_id │ subtitle │
/// │ is_trash    │ title ... │      └─────────────┴──────────┘
/// └─────────────┴───────────┘
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    parent: Option<Box<EntityType>>,
    clear_each_revision: Vec<String>,
    unique_per_revision: Vec<Vec<String>>,
    unique_per_bundle: Vec<Vec<String>>,
    publication_field: Option<String>,
    many_to_many: Vec<ManyToMany>,
    trashable: bool,
}

impl EntityType {
    /// Starts a type declaration. The table name defaults to the type name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: name.to_string(),
            fields: Vec::new(),
            parent: None,
            clear_each_revision: Vec::new(),
            unique_per_revision: Vec::new(),
            unique_per_bundle: Vec::new(),
            publication_field: None,
            many_to_many: Vec::new(),
            trashable: false,
        }
    }

    /// Overrides the table name.
    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Declares a field stored in this type's own table.
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Joined-table inheritance from another model type.
    pub fn extends<P: Model>(mut self) -> Self {
        self.parent = Some(Box::new(P::describe()));
        self
    }

    /// Fields cleared by `prepare_for_writing` (revision-scoped fields such
    /// as a log message).
    pub fn clear_each_revision(mut self, fields: &[&str]) -> Self {
        self.clear_each_revision
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// A field group that must be unique across all rows.
    pub fn unique_per_revision(mut self, fields: &[&str]) -> Self {
        self.unique_per_revision
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// A field group that must not be shared with the latest revision of any
    /// other bundle. Revisions of the same bundle may repeat it.
    pub fn unique_per_bundle(mut self, fields: &[&str]) -> Self {
        self.unique_per_bundle
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// The timestamp field used to resolve a revision by date.
    pub fn publication_field(mut self, field: &str) -> Self {
        self.publication_field = Some(field.to_string());
        self
    }

    /// Declares a many-to-many relation to another model type.
    pub fn many_to_many(mut self, name: &str, target: &'static str) -> Self {
        self.many_to_many.push(ManyToMany {
            name: name.to_string(),
            target,
        });
        self
    }

    pub(crate) fn set_trashable(&mut self, trashable: bool) {
        self.trashable = trashable;
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn parent(&self) -> Option<&EntityType> {
        self.parent.as_deref()
    }

    pub fn own_fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn is_trashable(&self) -> bool {
        self.trashable
    }

    pub fn own_many_to_many(&self) -> &[ManyToMany] {
        &self.many_to_many
    }

    pub(crate) fn own_unique_per_revision(&self) -> &[Vec<String>] {
        &self.unique_per_revision
    }

    pub(crate) fn own_unique_per_bundle(&self) -> &[Vec<String>] {
        &self.unique_per_bundle
    }

    /// The inheritance chain, root first, this type last.
    pub fn chain(&self) -> Vec<&EntityType> {
        let mut chain = match &self.parent {
            Some(parent) => parent.chain(),
            None => Vec::new(),
        };
        chain.push(self);
        chain
    }

    /// The root type of the inheritance chain (owner of the comparator).
    pub fn root(&self) -> &EntityType {
        match &self.parent {
            Some(parent) => parent.root(),
            None => self,
        }
    }

    /// Table holding `revision_id`, `bundle_id` and `is_trash`.
    pub fn base_table(&self) -> &str {
        &self.root().table
    }

    /// All fields including inherited ones, each with the index of its table
    /// in [`EntityType::chain`].
    pub fn all_fields(&self) -> Vec<(usize, &FieldDef)> {
        self.chain()
            .into_iter()
            .enumerate()
            .flat_map(|(depth, ty)| ty.fields.iter().map(move |f| (depth, f)))
            .collect()
    }

    /// Looks up a field by name, including inherited fields.
    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.all_fields()
            .into_iter()
            .map(|(_, f)| f)
            .find(|f| f.name == name)
    }

    /// Revision-scoped fields, including those declared by ancestors.
    pub fn revision_scoped_fields(&self) -> Vec<&str> {
        self.chain()
            .into_iter()
            .flat_map(|ty| ty.clear_each_revision.iter().map(String::as_str))
            .collect()
    }

    /// The publication field, declared here or inherited.
    pub fn publication(&self) -> Option<&str> {
        self.publication_field
            .as_deref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.publication()))
    }

    /// All many-to-many relations, with the table that declares each.
    pub fn all_many_to_many(&self) -> Vec<(&EntityType, &ManyToMany)> {
        self.chain()
            .into_iter()
            .flat_map(|ty| ty.many_to_many.iter().map(move |m| (ty, m)))
            .collect()
    }

    /// Finds a many-to-many relation by name, with its declaring type.
    pub fn many_to_many_def(&self, name: &str) -> Option<(&EntityType, &ManyToMany)> {
        self.all_many_to_many()
            .into_iter()
            .find(|(_, m)| m.name == name)
    }

    /// Is `other` this type or one of its ancestors?
    pub fn is_or_extends(&self, other: &str) -> bool {
        self.chain().iter().any(|ty| ty.name == other)
    }
}

/// Join table for a many-to-many relation declared on `owner`.
pub(crate) fn join_table(owner: &EntityType, relation: &ManyToMany) -> String {
    format!("{}__{}", owner.table, relation.name)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Base;

    impl Model for Base {
        const TYPE_NAME: &'static str = "base";

        fn describe() -> EntityType {
            EntityType::new("base")
                .field(FieldDef::text("title"))
                .field(FieldDef::timestamp("published").nullable())
                .clear_each_revision(&["title"])
                .publication_field("published")
                .many_to_many("tags", "tag")
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
        }

        fn from_fields(_: &Fields) -> Result<Self> {
            Ok(Base)
        }
    }

    fn child() -> EntityType {
        EntityType::new("child")
            .extends::<Base>()
            .field(FieldDef::text("subtitle"))
            .clear_each_revision(&["subtitle"])
    }

    #[test]
    fn test_chain_and_root() {
        let ty = child();
        let names: Vec<_> = ty.chain().iter().map(|t| t.name()).collect();

        assert_eq!(names, vec!["base", "child"]);
        assert_eq!(ty.root().name(), "base");
        assert_eq!(ty.base_table(), "base");
        assert!(ty.is_or_extends("base"));
        assert!(!Base::describe().is_or_extends("child"));
    }

    #[test]
    fn test_inherited_configuration() {
        let ty = child();

        let fields: Vec<_> = ty.all_fields().iter().map(|(d, f)| (*d, f.name())).collect();
        assert_eq!(fields, vec![(0, "title"), (0, "published"), (1, "subtitle")]);

        assert_eq!(ty.revision_scoped_fields(), vec!["title", "subtitle"]);
        assert_eq!(ty.publication(), Some("published"));
        assert!(ty.field_def("title").is_some());
        assert!(ty.field_def("nope").is_none());

        let (owner, m2m) = ty.many_to_many_def("tags").unwrap();
        assert_eq!(owner.name(), "base");
        assert_eq!(join_table(owner, m2m), "base__tags");
    }

    #[test]
    fn test_field_modifiers() {
        let f = FieldDef::timestamp("created").auto_now_add();
        assert!(f.is_auto_now_add());
        assert!(f.is_nullable());
        assert!(f.cleared_value().is_null());

        let f = FieldDef::text("log");
        assert_eq!(f.cleared_value(), crate::types::Value::Text(String::new()));
    }
}
