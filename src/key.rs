//! Cache key handling.

use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;

/// Reject keys no medium can store.
pub fn validate(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }
    if key.contains('\0') {
        return Err(Error::InvalidKey(format!(
            "key must not contain NUL bytes: {:?}",
            key
        )));
    }
    Ok(())
}

/// Deterministic file name for a cache key.
///
/// Format: `"{prefix}{md5(key)}"`. The digest keeps arbitrary keys safe as
/// file names and spreads them uniformly.
///
/// ```
/// use next_cache::key::file_id;
///
/// assert_eq!(file_id("cache_", "abc"), "cache_900150983cd24fb0d6963f7d28e17f72");
/// ```
pub fn file_id(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, HashAlgorithm::Md5.digest(key.as_bytes()))
}

/// Whether `name` is a [`file_id`] produced with `prefix`.
///
/// Ids from different prefixes never match each other: the digest part is
/// exactly 32 hex digits, so a longer or shorter prefix cannot line up.
pub fn is_file_id(prefix: &str, name: &str) -> bool {
    name.strip_prefix(prefix).is_some_and(|digest| {
        digest.len() == 32
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    })
}
