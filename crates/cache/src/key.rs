//! Cache file naming
//!
//! Maps resource identifiers (URIs) to names that are safe to use as disk
//! cache keys. Names only ever contain `[0-9a-z-]`.

use sha2::{Digest, Sha256};

/// Maps a resource identifier to a stable cache-file name.
pub trait KeyNamer: Send + Sync {
    /// Generate the cache name for `uri`.
    fn name(&self, uri: &str) -> String;
}

/// Names entries by the 32-bit string hash of the identifier.
///
/// The hash is `h = 31 * h + c` over the UTF-16 code units of the identifier,
/// wrapping on overflow, rendered as a signed decimal number.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashCodeKeyNamer;

impl HashCodeKeyNamer {
    /// Compute the 32-bit string hash of `value`.
    pub fn hash_code(value: &str) -> i32 {
        value
            .encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
    }
}

impl KeyNamer for HashCodeKeyNamer {
    fn name(&self, uri: &str) -> String {
        Self::hash_code(uri).to_string()
    }
}

/// Names entries by the lowercase hex SHA-256 digest of the identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyNamer;

impl KeyNamer for Sha256KeyNamer {
    fn name(&self, uri: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(uri.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_code_matches_known_values() {
        assert_eq!(HashCodeKeyNamer::hash_code(""), 0);
        assert_eq!(HashCodeKeyNamer::hash_code("a"), 97);
        assert_eq!(HashCodeKeyNamer::hash_code("hello"), 99_162_322);
    }

    #[test]
    fn test_hash_code_wraps_to_negative() {
        let namer = HashCodeKeyNamer;
        let name = namer.name("http://example.com/images/very/long/path/picture.png");
        assert!(name.parse::<i32>().is_ok());
    }

    #[test]
    fn test_hash_code_namer_is_stable() {
        let namer = HashCodeKeyNamer;
        let uri = "http://example.com/a.png";
        assert_eq!(namer.name(uri), namer.name(uri));
        assert_ne!(namer.name(uri), namer.name("http://example.com/b.png"));
    }

    #[test]
    fn test_sha256_namer() {
        let namer = Sha256KeyNamer;
        let name = namer.name("abc");
        assert_eq!(
            name,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
