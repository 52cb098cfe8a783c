//! # Error Handling for RevDB
//!
//! This module defines the error types used throughout RevDB. A single error
//! enum ([`Error`]) represents every failure mode, so callers match on one type
//! whether the failure came from the revision model or from SQLite.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations:
//! - `Display` comes from the `#[error(...)]` attributes
//! - `From<rusqlite::Error>` comes from the `#[from]` attribute
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Identity | Revert across bundles | Fix the caller |
//! | Lookup | No revision at that key or date | Return 404 / empty state |
//! | Configuration | Fetch by date without a publication field | Fix the entity type |
//! | Constraint | Per-bundle uniqueness violated | Show a validation error |
//! | Resolution | Unknown history field or relation | Fix the caller |
//! | Internal | SQLite error, schema mismatch | Log and investigate |
//!
//! There are no retries anywhere in the crate. Every failure reaches the
//! caller; the only "soft" path is the trash overlay, which is not an error.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in RevDB operations.
///
/// # Example
///
/// ```rust,ignore
/// use revdb::{Error, Result};
///
/// fn example(store: &mut Store, story: &mut Versioned<Story>) -> Result<()> {
///     match story.revert_to(store, RevisionRef::Id(other_bundle_rev)) {
///         Err(Error::Identity { .. }) => { /* wrong bundle */ }
///         other => other?,
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Revision Model Errors
    // =========================================================================

    /// A revision from a different bundle was used where a revision of the
    /// current bundle was required.
    ///
    /// # When This Happens
    ///
    /// `revert_to` resolved its target to a revision whose bundle id differs
    /// from the entity being reverted. Reverting only ever copies state
    /// forward within one bundle, so this is never auto-corrected.
    #[error("revision {revision} belongs to bundle {found}, not to bundle {expected}")]
    Identity {
        /// The revision that was resolved.
        revision: i64,
        /// The bundle of the entity being operated on.
        expected: String,
        /// The bundle the resolved revision actually belongs to.
        found: String,
    },

    /// A lookup by key, date or reference found no revision.
    #[error("{entity} not found: {lookup}")]
    NotFound {
        /// Entity type name.
        entity: String,
        /// Human-readable description of the lookup.
        lookup: String,
    },

    /// An operation needs per-type configuration that is missing or invalid.
    ///
    /// # When This Happens
    ///
    /// - Fetching a revision by date on a type without a publication field
    /// - Using a model type that was never registered with the store
    /// - Registering a type whose configuration names unknown fields
    ///
    /// The message is meant to be actionable: it names the type and what to
    /// declare.
    #[error("configuration error for '{entity}': {message}")]
    Configuration {
        /// Entity type name.
        entity: String,
        /// What is missing and how to fix it.
        message: String,
    },

    /// A per-revision or per-bundle uniqueness rule was violated at write time.
    ///
    /// # When This Happens
    ///
    /// SQLite rejected the write with `SQLITE_CONSTRAINT`: either a UNIQUE
    /// index (per-revision uniqueness) or the per-bundle uniqueness trigger
    /// fired. The write is rolled back; nothing is skipped or overwritten.
    #[error("constraint violation on '{entity}': {message}")]
    ConstraintViolation {
        /// Entity type name.
        entity: String,
        /// The storage engine's description of the violated constraint.
        message: String,
    },

    /// A history or related-object accessor could not resolve its target.
    ///
    /// # When This Happens
    ///
    /// - `attribute_history("nope")` on a type without a `nope` field
    /// - `related::<R>()` where `R` has no foreign key back to this type,
    ///   or has several and the caller did not say which one
    #[error("cannot resolve '{name}' on '{entity}': {reason}")]
    AttributeResolution {
        /// Entity type name.
        entity: String,
        /// The field or relation name that failed to resolve.
        name: String,
        /// Why resolution failed.
        reason: String,
    },

    // =========================================================================
    // Decoding Errors
    // =========================================================================

    /// A stored value could not be converted into a model field.
    #[error("field '{field}': expected {expected}")]
    FieldType {
        /// The field name.
        field: String,
        /// Description of the expected type.
        expected: &'static str,
    },

    /// A single-row lookup matched more than one row.
    #[error("{entity}: expected one row, query matched {count}")]
    MultipleRows {
        /// Entity type name.
        entity: String,
        /// Number of rows the query matched.
        count: usize,
    },

    // =========================================================================
    // Internal Errors (Investigate and fix)
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// Constraint failures are classified into [`Error::ConstraintViolation`]
    /// by the write path before they reach this variant; everything else
    /// (locked database, disk full, corrupted file) lands here.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema version mismatch or corruption detected.
    #[error("schema error: {0}")]
    Schema(String),
}

impl Error {
    /// Builds a [`Error::NotFound`] for an entity type.
    pub(crate) fn not_found(entity: &str, lookup: impl Into<String>) -> Self {
        Error::NotFound {
            entity: entity.to_string(),
            lookup: lookup.into(),
        }
    }

    /// Builds a [`Error::Configuration`] for an entity type.
    pub(crate) fn configuration(entity: &str, message: impl Into<String>) -> Self {
        Error::Configuration {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    /// Builds a [`Error::AttributeResolution`] for an entity type.
    pub(crate) fn unresolved(entity: &str, name: &str, reason: impl Into<String>) -> Self {
        Error::AttributeResolution {
            entity: entity.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Reclassifies a SQLite constraint failure as [`Error::ConstraintViolation`].
    ///
    /// Any other SQLite error passes through unchanged as [`Error::Sqlite`].
    pub(crate) fn from_write(entity: &str, err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation {
                    entity: entity.to_string(),
                    message: message.unwrap_or_else(|| code.to_string()),
                }
            }
            other => Error::Sqlite(other),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
