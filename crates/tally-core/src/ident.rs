//! Record identifier service
//!
//! Mints record ids and validates candidates arriving from outside the
//! engine (imports, other devices, older clients). A malformed candidate is
//! replaced with a fresh id exactly once, at entry; an id that has been
//! written anywhere is immutable after that.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::RecordId;
use crate::util::compact_text;

/// Canonical textual form: 8-4-4-4-12 hex groups, version 4, RFC 4122 variant
static CANONICAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("Invalid regex")
});

/// Mint a fresh random record id
#[must_use]
pub fn new_id() -> RecordId {
    RecordId::new()
}

/// Strict structural validation of a candidate id.
///
/// Hex case is accepted either way; braces, URN prefixes, and missing
/// hyphens are not.
#[must_use]
pub fn is_valid(candidate: &str) -> bool {
    CANONICAL_ID.is_match(candidate)
}

/// Return the candidate as a typed id when valid, otherwise mint a
/// replacement. Replacements are logged; a missing candidate is a normal
/// creation and is not.
#[must_use]
pub fn ensure_valid(candidate: Option<&str>) -> RecordId {
    match candidate {
        Some(raw) if is_valid(raw) => raw.parse().unwrap_or_else(|_| RecordId::new()),
        Some(raw) => {
            let id = RecordId::new();
            tracing::warn!(
                "Replaced malformed record id '{}' with {id}",
                compact_text(raw)
            );
            id
        }
        None => RecordId::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_valid() {
        for _ in 0..32 {
            assert!(is_valid(&new_id().as_str()));
        }
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        assert!(is_valid("9F768D9C-3A66-4242-9D39-D4F838CBA0B3"));
    }

    #[test]
    fn wrong_version_is_rejected() {
        // version nibble must be 4
        assert!(!is_valid("9f768d9c-3a66-7242-9d39-d4f838cba0b3"));
        assert!(!is_valid("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn wrong_variant_is_rejected() {
        // third group says v4 but the variant nibble is invalid
        assert!(!is_valid("9f768d9c-3a66-4242-cd39-d4f838cba0b3"));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        assert!(!is_valid(""));
        assert!(!is_valid("9f768d9c3a6642429d39d4f838cba0b3"));
        assert!(!is_valid("{9f768d9c-3a66-4242-9d39-d4f838cba0b3}"));
        assert!(!is_valid("urn:uuid:9f768d9c-3a66-4242-9d39-d4f838cba0b3"));
        assert!(!is_valid("9f768d9c-3a66-4242-9d39-d4f838cba0b"));
    }

    #[test]
    fn ensure_valid_passes_good_candidates_through() {
        let id = new_id();
        let text = id.as_str();
        assert_eq!(ensure_valid(Some(&text)), id);
    }

    #[test]
    fn ensure_valid_replaces_garbage() {
        let repaired = ensure_valid(Some("not-an-id"));
        assert!(is_valid(&repaired.as_str()));
    }

    #[test]
    fn ensure_valid_mints_for_missing_candidates() {
        let minted = ensure_valid(None);
        assert!(is_valid(&minted.as_str()));
    }

    #[test]
    fn repairs_produce_distinct_ids() {
        let first = ensure_valid(Some("bogus"));
        let second = ensure_valid(Some("bogus"));
        assert_ne!(first, second);
    }
}
