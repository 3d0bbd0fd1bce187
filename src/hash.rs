//! Config Hasher (§4.1).
//!
//! The plan's identity is the exact bytes of the configuration file the user
//! wrote — no normalization, no re-serialization.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
const HASH_LEN: usize = 16;

/// Hash raw configuration bytes to the first 16 hex characters of SHA-256.
///
/// Identical bytes always produce identical output; this is the only
/// contract the rest of the system relies on.
pub fn hash_config_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])[..HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        let bytes = b"songs = []\n";
        assert_eq!(hash_config_bytes(bytes), hash_config_bytes(bytes));
    }

    #[test]
    fn is_sixteen_hex_chars() {
        let h = hash_config_bytes(b"anything");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn differs_for_different_bytes() {
        assert_ne!(hash_config_bytes(b"a"), hash_config_bytes(b"b"));
    }

    #[test]
    fn is_sensitive_to_whitespace() {
        // No normalization: a trailing newline changes the hash.
        assert_ne!(hash_config_bytes(b"x"), hash_config_bytes(b"x\n"));
    }
}
