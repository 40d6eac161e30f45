//! Unique host id generation.
//!
//! Manifest ids identify existing hosts at the provider (EC2 tag, Linode
//! label), so they have to be unique per fleet. Two formats are supported:
//! `random` is 10 hex chars from the OS RNG, `ulid` is lexicographically
//! sortable for fleets that want creation-ordered ids.

use std::fmt::Write as _;
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// Format used when generating manifest ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniqueIdFormat {
    /// 5 random bytes rendered as 10 lowercase hex characters
    #[default]
    Random,
    /// ULID: 26 Crockford base-32 characters, monotone within a process
    Ulid,
}

impl UniqueIdFormat {
    /// Parse a format name. Unknown names degrade to [`UniqueIdFormat::Random`].
    pub fn parse(s: &str) -> Self {
        match s {
            "ulid" => UniqueIdFormat::Ulid,
            _ => UniqueIdFormat::Random,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueIdFormat::Random => "random",
            UniqueIdFormat::Ulid => "ulid",
        }
    }
}

// Shared generator so sequential ulids stay monotonically non-decreasing
// even when two ids land in the same millisecond.
static ULID_GENERATOR: Mutex<Option<ulid::Generator>> = Mutex::new(None);

/// Generate a new unique id in the requested format.
pub fn new_id(format: UniqueIdFormat) -> Result<String> {
    match format {
        UniqueIdFormat::Ulid => {
            let mut slot = ULID_GENERATOR
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let generator = slot.get_or_insert_with(ulid::Generator::new);
            let id = generator
                .generate()
                .map_err(|e| Error::Entropy(e.to_string()))?;
            Ok(id.to_string())
        }
        UniqueIdFormat::Random => {
            let mut bytes = [0u8; 5];
            OsRng
                .try_fill_bytes(&mut bytes)
                .map_err(|e| Error::Entropy(e.to_string()))?;
            let mut id = String::with_capacity(bytes.len() * 2);
            for b in bytes {
                let _ = write!(id, "{b:02x}");
            }
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_is_ten_hex_chars() {
        let id = new_id(UniqueIdFormat::Random).unwrap();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_random_ids_differ() {
        let a = new_id(UniqueIdFormat::Random).unwrap();
        let b = new_id(UniqueIdFormat::Random).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ulid_is_26_crockford_chars() {
        let id = new_id(UniqueIdFormat::Ulid).unwrap();
        assert_eq!(id.len(), 26);
        // Crockford base 32 excludes I, L, O and U
        assert!(id
            .chars()
            .all(|c| "0123456789ABCDEFGHJKMNPQRSTVWXYZ".contains(c)));
    }

    #[test]
    fn test_ulids_are_monotonically_non_decreasing() {
        let mut previous = new_id(UniqueIdFormat::Ulid).unwrap();
        for _ in 0..100 {
            let next = new_id(UniqueIdFormat::Ulid).unwrap();
            assert!(next >= previous, "{next} < {previous}");
            previous = next;
        }
    }

    #[test]
    fn test_unknown_format_degrades_to_random() {
        assert_eq!(UniqueIdFormat::parse("random"), UniqueIdFormat::Random);
        assert_eq!(UniqueIdFormat::parse("ulid"), UniqueIdFormat::Ulid);
        assert_eq!(UniqueIdFormat::parse("snowflake"), UniqueIdFormat::Random);
    }
}
