//! Identifier generation and input normalization.

use rand::Rng;

use crate::error::StoreError;

/// Prefix of generated identifiers.
pub const IDENTIFIER_PREFIX: &str = "matdev-";

/// Length of the random part of a generated identifier.
const SUFFIX_LEN: usize = 8;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Longest identifier accepted from callers.
const MAX_IDENTIFIER_LEN: usize = 128;

/// Generate a fresh identifier: `matdev-` followed by 8 random `[a-z0-9]`.
///
/// No collision check is made against existing slots.
pub fn generate_identifier() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", IDENTIFIER_PREFIX, suffix)
}

/// Check that a caller-supplied identifier can name a credential slot.
///
/// Identifiers become directory names, so only `[A-Za-z0-9._-]` is allowed
/// and the dot-only names are rejected.
pub fn validate_identifier(unique_id: &str) -> Result<(), StoreError> {
    let valid = !unique_id.is_empty()
        && unique_id.len() <= MAX_IDENTIFIER_LEN
        && unique_id != "."
        && unique_id != ".."
        && unique_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(unique_id.to_string()))
    }
}

/// Normalize a phone number for pairing.
///
/// Strips a leading `+` and then every non-digit character. Returns `None`
/// when nothing is left.
///
/// ```
/// use matdev_linker::domain::normalize_phone;
///
/// assert_eq!(normalize_phone("+1 (555) 123-4567").as_deref(), Some("15551234567"));
/// assert_eq!(normalize_phone("  "), None);
/// ```
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identifier_shape() {
        for _ in 0..50 {
            let id = generate_identifier();
            assert!(id.starts_with(IDENTIFIER_PREFIX));
            let suffix = &id[IDENTIFIER_PREFIX.len()..];
            assert_eq!(suffix.len(), 8);
            assert!(suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generated_identifiers_validate() {
        assert!(validate_identifier(&generate_identifier()).is_ok());
    }

    #[test]
    fn test_validate_rejects_paths() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(".").is_err());
        assert!(validate_identifier("..").is_err());
        assert!(validate_identifier("../other").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("with space").is_err());
        assert!(validate_identifier(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_accepts_custom_ids() {
        assert!(validate_identifier("my-bot_01").is_ok());
        assert!(validate_identifier("Team.Alpha").is_ok());
    }

    #[test]
    fn test_normalize_phone_formatting() {
        assert_eq!(normalize_phone("+1 (555) 123-4567").as_deref(), Some("15551234567"));
        assert_eq!(normalize_phone("447123456789").as_deref(), Some("447123456789"));
        assert_eq!(normalize_phone(" +44 7123 456789 ").as_deref(), Some("447123456789"));
        assert_eq!(normalize_phone("tel:+1-555").as_deref(), Some("1555"));
    }

    #[test]
    fn test_normalize_phone_empty() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("+"), None);
        assert_eq!(normalize_phone("abc"), None);
    }
}
