//! # Entity Type Registry
//!
//! The registry is the store's catalog of entity types. Registration is where
//! a type's configuration gets validated, so every later read and write can
//! trust it:
//!
//! - names are safe SQL identifiers and do not shadow store-owned columns
//! - revision-scoped fields, uniqueness groups and the publication field name
//!   declared fields
//! - parents and foreign-key or many-to-many targets are already registered
//!
//! It also keeps the reverse side of every foreign key, so a related-object
//! lookup from a target type can find the fields that point at it.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::model::EntityType;
use crate::schema::{is_identifier, RESERVED_COLUMNS};
use crate::types::FieldKind;

/// A foreign key seen from the type it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRelation {
    /// Type declaring the foreign key.
    pub source: String,
    /// The foreign key field on `source`.
    pub field: String,
}

/// Registered entity types, keyed by type name.
#[derive(Debug, Default)]
pub struct Registry {
    types: HashMap<String, EntityType>,
    reverse: HashMap<String, Vec<ReverseRelation>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and records an entity type.
    ///
    /// Registering an identical configuration twice is a no-op. Returns
    /// `true` when the type was newly added.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` naming the type and the offending declaration.
    pub fn register(&mut self, ty: EntityType) -> Result<bool> {
        if let Some(existing) = self.types.get(ty.name()) {
            if *existing == ty {
                return Ok(false);
            }
            return Err(Error::configuration(
                ty.name(),
                "type is already registered with a different configuration",
            ));
        }

        self.validate(&ty)?;

        for field in ty.own_fields() {
            if let FieldKind::ForeignKey(target) = field.kind() {
                self.reverse
                    .entry(target.to_string())
                    .or_default()
                    .push(ReverseRelation {
                        source: ty.name().to_string(),
                        field: field.name().to_string(),
                    });
            }
        }

        self.types.insert(ty.name().to_string(), ty);
        Ok(true)
    }

    /// Looks up a registered type.
    pub fn get(&self, name: &str) -> Option<&EntityType> {
        self.types.get(name)
    }

    /// Looks up a registered type, failing with a configuration error.
    pub fn require(&self, name: &str) -> Result<&EntityType> {
        self.get(name).ok_or_else(|| {
            Error::configuration(name, "type is not registered with this store")
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Foreign keys declared on other types that point at `target`.
    pub fn reverse_relations(&self, target: &str) -> &[ReverseRelation] {
        self.reverse.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn validate(&self, ty: &EntityType) -> Result<()> {
        let name = ty.name();
        let fail = |message: String| Err(Error::configuration(name, message));

        if !is_identifier(name) {
            return fail(format!("type name '{name}' must match [a-z_][a-z0-9_]*"));
        }
        if !is_identifier(ty.table_name()) {
            return fail(format!(
                "table name '{}' must match [a-z_][a-z0-9_]*",
                ty.table_name()
            ));
        }
        if self
            .types
            .values()
            .any(|other| other.table_name() == ty.table_name())
        {
            return fail(format!(
                "table '{}' is already used by another type",
                ty.table_name()
            ));
        }

        if let Some(parent) = ty.parent() {
            match self.types.get(parent.name()) {
                Some(registered) if same_declaration(registered, parent) => {}
                Some(_) => {
                    return fail(format!(
                        "parent '{}' is registered with a different configuration",
                        parent.name()
                    ))
                }
                None => {
                    return fail(format!(
                        "parent '{}' must be registered first",
                        parent.name()
                    ))
                }
            }
        }

        // Fields: identifiers, not reserved, unique across the chain.
        let mut seen = HashSet::new();
        for (_, field) in ty.all_fields() {
            let field_name = field.name();
            if !is_identifier(field_name) {
                return fail(format!("field name '{field_name}' must match [a-z_][a-z0-9_]*"));
            }
            if RESERVED_COLUMNS.contains(&field_name) {
                return fail(format!("field name '{field_name}' is reserved"));
            }
            if !seen.insert(field_name) {
                return fail(format!("field '{field_name}' is declared twice"));
            }
            if let FieldKind::ForeignKey(target) = field.kind() {
                if target != name && !self.contains(target) {
                    return fail(format!(
                        "foreign key '{field_name}' targets unregistered type '{target}'"
                    ));
                }
            }
        }

        for field_name in ty.revision_scoped_fields() {
            if ty.field_def(field_name).is_none() {
                return fail(format!("revision-scoped field '{field_name}' is not declared"));
            }
        }

        let own: HashSet<&str> = ty.own_fields().iter().map(|f| f.name()).collect();
        for group in ty
            .own_unique_per_revision()
            .iter()
            .chain(ty.own_unique_per_bundle())
        {
            if group.is_empty() {
                return fail("uniqueness group must name at least one field".to_string());
            }
            if let Some(missing) = group.iter().find(|f| !own.contains(f.as_str())) {
                return fail(format!(
                    "unique field '{missing}' must be declared on '{name}' itself"
                ));
            }
        }

        if let Some(field_name) = ty.publication() {
            match ty.field_def(field_name).map(|f| f.kind()) {
                Some(FieldKind::TimestampMs) | Some(FieldKind::Integer) => {}
                Some(_) => {
                    return fail(format!(
                        "publication field '{field_name}' must be a timestamp"
                    ))
                }
                None => {
                    return fail(format!("publication field '{field_name}' is not declared"))
                }
            }
        }

        let mut relations = HashSet::new();
        for (_, relation) in ty.all_many_to_many() {
            if !is_identifier(relation.name()) {
                return fail(format!(
                    "relation name '{}' must match [a-z_][a-z0-9_]*",
                    relation.name()
                ));
            }
            if !relations.insert(relation.name()) {
                return fail(format!("relation '{}' is declared twice", relation.name()));
            }
            if relation.target() != name && !self.contains(relation.target()) {
                return fail(format!(
                    "relation '{}' targets unregistered type '{}'",
                    relation.name(),
                    relation.target()
                ));
            }
        }

        Ok(())
    }
}

/// Compares declarations, ignoring the trashable flag set at registration.
fn same_declaration(registered: &EntityType, declared: &EntityType) -> bool {
    let mut registered = registered.clone();
    registered.set_trashable(declared.is_trashable());
    registered == *declared
}

// =============================================================================
// Tests
// =============================================================================
