//! Credential store: password policy and Argon2id hashing.
//!
//! Hashing is deliberately slow and CPU-bound; callers on the request path
//! run it under `tokio::task::spawn_blocking` so the async workers stay
//! responsive.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use regex::Regex;

pub const DEFAULT_TIME_COST: u32 = 3;
pub const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
const MIN_PASSWORD_LENGTH: usize = 8;

/// Why a candidate password was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort,
    MissingLowercase,
    MissingUppercase,
    MissingDigit,
}

impl PolicyViolation {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::TooShort => "password must be at least 8 characters",
            Self::MissingLowercase => "password must contain a lowercase letter",
            Self::MissingUppercase => "password must contain an uppercase letter",
            Self::MissingDigit => "password must contain a digit",
        }
    }
}

/// Check a candidate password against the strength policy.
///
/// # Errors
/// Returns the first violated rule.
pub fn check_policy(password: &str) -> Result<(), PolicyViolation> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PolicyViolation::TooShort);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(PolicyViolation::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PolicyViolation::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PolicyViolation::MissingDigit);
    }
    Ok(())
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Argon2id hasher with tunable time/memory cost.
#[derive(Clone, Debug)]
pub struct PasswordHasherConfig {
    time_cost: u32,
    memory_kib: u32,
}

impl Default for PasswordHasherConfig {
    fn default() -> Self {
        Self {
            time_cost: DEFAULT_TIME_COST,
            memory_kib: DEFAULT_MEMORY_KIB,
        }
    }
}

impl PasswordHasherConfig {
    #[must_use]
    pub const fn new(time_cost: u32, memory_kib: u32) -> Self {
        Self {
            time_cost,
            memory_kib,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.time_cost, 1, None)
            .map_err(|err| anyhow!("invalid argon2 params: {err}"))?;
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }

    /// Hash a raw password with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if the hasher parameters are invalid or hashing fails.
    pub fn hash(&self, raw_password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(raw_password.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }
}

/// Verify a raw password against a stored PHC-format hash.
///
/// Parameters are read from the stored hash, so verification keeps working
/// after the configured cost changes.
#[must_use]
pub fn verify_password(raw_password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(raw_password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keep test hashing cheap; verification reads params from the hash.
    fn fast_hasher() -> PasswordHasherConfig {
        PasswordHasherConfig::new(1, 1024)
    }

    #[test]
    fn policy_accepts_mixed_password() {
        assert!(check_policy("P@ssw0rd1").is_ok());
    }

    #[test]
    fn policy_rejects_short() {
        assert_eq!(check_policy("Ab1"), Err(PolicyViolation::TooShort));
    }

    #[test]
    fn policy_rejects_missing_classes() {
        assert_eq!(
            check_policy("alllowercase1"),
            Err(PolicyViolation::MissingUppercase)
        );
        assert_eq!(
            check_policy("ALLUPPERCASE1"),
            Err(PolicyViolation::MissingLowercase)
        );
        assert_eq!(
            check_policy("NoDigitsHere"),
            Err(PolicyViolation::MissingDigit)
        );
    }

    #[test]
    fn hash_verify_round_trip() {
        let hasher = fast_hasher();
        let hash = hasher.hash("P@ssw0rd1").expect("hashing should succeed");
        assert!(verify_password("P@ssw0rd1", &hash));
        assert!(!verify_password("P@ssw0rd2", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let hasher = fast_hasher();
        let first = hasher.hash("P@ssw0rd1").expect("hashing should succeed");
        let second = hasher.hash("P@ssw0rd1").expect("hashing should succeed");
        assert_ne!(first, second);
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("P@ssw0rd1", "not-a-phc-hash"));
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }
}
