//! Helpers for single-use verification and reset tokens.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Create a single-use token for email links.
/// The raw value is only handed to the mail seam; the database stores a hash.
pub(super) fn generate_one_time_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate one-time token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a one-time token so raw values never touch the database.
pub(super) fn hash_one_time_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn one_time_token_has_full_entropy() {
        let decoded_len = generate_one_time_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_is_stable() {
        let first = hash_one_time_token("token");
        let second = hash_one_time_token("token");
        let different = hash_one_time_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }
}
