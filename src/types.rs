//! # Domain Types for RevDB
//!
//! This module defines the core value types used throughout RevDB: bundle and
//! revision identifiers, field values, and the small enums that parameterize
//! writes and reads.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! A [`RevisionId`] and a foreign-key integer are both `i64` in SQLite, and a
//! [`BundleId`] is just text. Wrapping them keeps signatures honest:
//!
//! ```rust
//! use revdb::types::{BundleId, RevisionId};
//!
//! fn example(bundle: &BundleId, rev: RevisionId) {
//!     // bundle == rev  // Won't compile
//! }
//! ```
//!
//! ## Invariants
//!
//! - [`RevisionId`]: strictly increasing, never reused, totally orders the
//!   revisions of a bundle (it is the comparator)
//! - [`BundleId`]: assigned once at first save, never changes afterwards

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::{Error, Result};

// =============================================================================
// Bundle Identification
// =============================================================================

/// Identifies one logical content item across all of its revisions.
///
/// A bundle is not a row of its own: it is the equivalence class of every
/// revision row carrying the same `bundle_id`. The value is a random 128-bit
/// number rendered as 32 lowercase hex characters (see [`crate::identity`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(String);

impl BundleId {
    /// Wraps a stored bundle id.
    ///
    /// # When to Use
    ///
    /// Reading from the database or from an external reference. New ids are
    /// minted by [`crate::identity::mint_bundle_id`].
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for BundleId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for BundleId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(BundleId)
    }
}

// =============================================================================
// Revision Identification
// =============================================================================

/// The per-row key of a revision, and the comparator that orders a bundle.
///
/// # Invariants
///
/// - Assigned by SQLite `AUTOINCREMENT`, so it strictly increases and is never
///   reused, even after deletes
/// - Within a bundle, the revision with the largest id is the latest one
///
/// # Rust Pattern: Copy + Ord
///
/// `RevisionId` is 8 bytes and compared constantly (latest checks, prev/next
/// navigation), so it is `Copy` and totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionId(i64);

impl RevisionId {
    /// Creates a RevisionId from a raw value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value for database storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for RevisionId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for RevisionId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(RevisionId)
    }
}

// =============================================================================
// Field Values
// =============================================================================

/// The storage class of a declared field.
///
/// # Mapping to SQLite
///
/// | Kind | Column type | Notes |
/// |------|-------------|-------|
/// | `Integer` | INTEGER | |
/// | `Real` | REAL | |
/// | `Text` | TEXT | |
/// | `Blob` | BLOB | |
/// | `Boolean` | INTEGER | 0 / 1 |
/// | `TimestampMs` | INTEGER | Unix milliseconds |
/// | `ForeignKey(t)` | INTEGER | `revision_id` of a row of type `t` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    TimestampMs,
    /// Reference to one specific revision of another registered type.
    ForeignKey(&'static str),
}

impl FieldKind {
    /// SQLite column type used in generated DDL.
    pub(crate) fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Integer
            | FieldKind::Boolean
            | FieldKind::TimestampMs
            | FieldKind::ForeignKey(_) => "INTEGER",
            FieldKind::Real => "REAL",
            FieldKind::Text => "TEXT",
            FieldKind::Blob => "BLOB",
        }
    }

    /// The "empty" value a non-nullable field is cleared to.
    pub(crate) fn empty_value(&self) -> Value {
        match self {
            FieldKind::Text => Value::Text(String::new()),
            FieldKind::Blob => Value::Blob(Vec::new()),
            FieldKind::Boolean => Value::Boolean(false),
            FieldKind::Real => Value::Real(0.0),
            FieldKind::Integer | FieldKind::TimestampMs => Value::Integer(0),
            FieldKind::ForeignKey(_) => Value::Null,
        }
    }
}

/// A single field value, as stored in one column of one revision row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl Value {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reads a column according to the declared kind of its field.
    ///
    /// SQLite has no boolean storage class, so booleans come back as integers
    /// and are converted here.
    pub(crate) fn from_column(kind: FieldKind, value: ValueRef<'_>) -> FromSqlResult<Value> {
        Ok(match (kind, value) {
            (_, ValueRef::Null) => Value::Null,
            (FieldKind::Boolean, ValueRef::Integer(i)) => Value::Boolean(i != 0),
            (_, ValueRef::Integer(i)) => Value::Integer(i),
            (_, ValueRef::Real(r)) => Value::Real(r),
            (_, ValueRef::Text(t)) => Value::Text(
                std::str::from_utf8(t)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))?
                    .to_string(),
            ),
            (_, ValueRef::Blob(b)) => Value::Blob(b.to_vec()),
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
            Value::Boolean(b) => ToSqlOutput::from(*b),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl From<RevisionId> for Value {
    fn from(id: RevisionId) -> Self {
        Value::Integer(id.as_raw())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// =============================================================================
// Field Maps
// =============================================================================

/// The domain field values of one revision, keyed by field name.
///
/// This is the bridge between a typed model struct and its columns: models
/// convert themselves to `Fields` for writing and back from `Fields` for
/// reading (see [`crate::model::Model`]).
///
/// # Example
///
/// ```rust
/// use revdb::types::Fields;
///
/// let fields = Fields::new().with("title", "Hello").with("views", 3_i64);
/// assert_eq!(fields.text("title").unwrap(), "Hello");
/// assert_eq!(fields.integer("views").unwrap(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    /// Creates an empty field map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Inserts or replaces a value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Returns the raw value of a field, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, name: &str, expected: &'static str) -> Result<&Value> {
        self.0.get(name).ok_or_else(|| Error::FieldType {
            field: name.to_string(),
            expected,
        })
    }

    fn mismatch<T>(name: &str, expected: &'static str) -> Result<T> {
        Err(Error::FieldType {
            field: name.to_string(),
            expected,
        })
    }

    /// Reads a non-null text field.
    pub fn text(&self, name: &str) -> Result<String> {
        match self.require(name, "text")? {
            Value::Text(s) => Ok(s.clone()),
            _ => Self::mismatch(name, "text"),
        }
    }

    /// Reads a nullable text field.
    pub fn opt_text(&self, name: &str) -> Result<Option<String>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(_) => Self::mismatch(name, "text or null"),
        }
    }

    /// Reads a non-null integer field (also accepts stored booleans).
    pub fn integer(&self, name: &str) -> Result<i64> {
        match self.require(name, "integer")? {
            Value::Integer(i) => Ok(*i),
            Value::Boolean(b) => Ok(i64::from(*b)),
            _ => Self::mismatch(name, "integer"),
        }
    }

    /// Reads a nullable integer field.
    pub fn opt_integer(&self, name: &str) -> Result<Option<i64>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(i)) => Ok(Some(*i)),
            Some(_) => Self::mismatch(name, "integer or null"),
        }
    }

    /// Reads a non-null real field (integers are widened).
    pub fn real(&self, name: &str) -> Result<f64> {
        match self.require(name, "real")? {
            Value::Real(r) => Ok(*r),
            Value::Integer(i) => Ok(*i as f64),
            _ => Self::mismatch(name, "real"),
        }
    }

    /// Reads a non-null boolean field.
    pub fn boolean(&self, name: &str) -> Result<bool> {
        match self.require(name, "boolean")? {
            Value::Boolean(b) => Ok(*b),
            Value::Integer(i) => Ok(*i != 0),
            _ => Self::mismatch(name, "boolean"),
        }
    }

    /// Reads a non-null blob field.
    pub fn blob(&self, name: &str) -> Result<Vec<u8>> {
        match self.require(name, "blob")? {
            Value::Blob(b) => Ok(b.clone()),
            _ => Self::mismatch(name, "blob"),
        }
    }

    /// Reads a non-null foreign key field.
    pub fn revision_id(&self, name: &str) -> Result<RevisionId> {
        self.integer(name).map(RevisionId::from_raw)
    }

    /// Reads a nullable foreign key field.
    pub fn opt_revision_id(&self, name: &str) -> Result<Option<RevisionId>> {
        Ok(self.opt_integer(name)?.map(RevisionId::from_raw))
    }
}

// =============================================================================
// Write and Read Parameters
// =============================================================================

/// How [`crate::entity::Revisable::save`] treats an already-persisted record.
///
/// The choice is an explicit parameter rather than ambient state. The one
/// exception is the presentation layer's small-change checkbox, which demotes
/// `NewRevision` to `InPlace` via [`crate::entity::Versioned::mark_small_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Branch: insert a new revision row with a fresh comparator.
    NewRevision,
    /// Update the existing revision row; the comparator does not change.
    InPlace,
}

/// Which rows of a trashable type a query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashView {
    /// Trash flag is ignored.
    #[default]
    Any,
    /// Only bundles that are not in the trash.
    Live,
    /// Only bundles that are in the trash.
    Trash,
}

// =============================================================================
// Tests
// =============================================================================
