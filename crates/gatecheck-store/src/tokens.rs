//! Gate token digests.
//!
//! Raw bearer tokens are never stored. The daemon's token registry and the
//! operator CLI both work with the hex SHA-256 digest computed here.

use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of a raw token.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_digest_known_value() {
        assert_eq!(
            token_digest("test"),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_token_digest_is_lowercase_hex() {
        let digest = token_digest("gate-secret");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
