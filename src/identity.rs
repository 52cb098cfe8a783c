//! # Bundle Identity
//!
//! Every revision row carries a `bundle_id` shared by all revisions of one
//! logical entity. This module mints those ids.
//!
//! ## Constraints
//!
//! - Bundle ids are minted by whichever writer performs the first save, with
//!   no coordination between writers, so they come from the operating
//!   system's CSPRNG rather than a shared sequence
//! - The id must be known before the first row is inserted, so it cannot be
//!   derived from that row's `revision_id`
//!
//! ## Format
//!
//! 32 lowercase hex characters with the UUIDv4 version and variant bits set,
//! so ids read like any other random UUID in hex form.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::types::BundleId;

/// Number of random bytes in a bundle id.
const BUNDLE_ID_BYTES: usize = 16;

/// Mints a fresh, globally unique bundle id.
pub fn mint_bundle_id() -> BundleId {
    let mut bytes = [0u8; BUNDLE_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);

    // Version 4, RFC 4122 variant.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    BundleId::from_raw(hex)
}

/// Ensures a record has a bundle id, minting one if it has none.
///
/// Called exactly once per physical write, before persistence. An existing id
/// is never replaced. Returns the id the record now carries.
pub fn assign_identity(bundle_id: &mut Option<BundleId>) -> &BundleId {
    bundle_id.get_or_insert_with(|| {
        let minted = mint_bundle_id();
        debug!(bundle = %minted, "minted bundle id");
        minted
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_minted_id_format() {
        let id = mint_bundle_id();
        let s = id.as_str();

        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Version nibble.
        assert_eq!(&s[12..13], "4");
        // Variant nibble is one of 8, 9, a, b.
        assert!(matches!(&s[16..17], "8" | "9" | "a" | "b"));
    }

    #[test]
    fn test_minted_ids_are_distinct() {
        let ids: HashSet<_> = (0..1000).map(|_| mint_bundle_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_assign_identity_keeps_existing_id() {
        let existing = BundleId::from_raw("0123456789abcdef0123456789abcdef");
        let mut slot = Some(existing.clone());

        assert_eq!(assign_identity(&mut slot), &existing);
        assert_eq!(slot, Some(existing));
    }

    #[test]
    fn test_assign_identity_mints_once() {
        let mut slot = None;

        let first = assign_identity(&mut slot).clone();
        assert_eq!(slot.as_ref(), Some(&first));

        let second = assign_identity(&mut slot).clone();
        assert_eq!(first, second);
    }
}
