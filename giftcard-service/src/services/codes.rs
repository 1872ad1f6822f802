//! Gift card code formats.
//!
//! Business codes: `PREFIX-SEGMENT-YYYY-SUFFIX`, e.g. `ACME-SPRING24-2026-K7Q2M`.
//! - PREFIX: 2-10 uppercase letters/digits, starting with a letter
//! - SEGMENT: 1-16 uppercase letters/digits
//! - YYYY: four-digit year
//! - SUFFIX: exactly 5 uppercase letters/digits
//!
//! Personal codes: `PGC-XXXX-XXXX-XXXX`.

use rand::Rng;

use crate::services::error::ServiceError;

/// No 0/O or 1/I, so codes survive being read aloud or retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const DEFAULT_BUSINESS_PREFIX: &str = "GC";
pub const PERSONAL_PREFIX: &str = "PGC";

/// Codes are matched case-insensitively and stored uppercase.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn is_upper_alnum(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Validate an already-normalized business code.
pub fn validate_business_code(code: &str) -> Result<(), ServiceError> {
    let invalid = |why: &str| {
        Err(ServiceError::InvalidInput(format!(
            "Gift card code '{}' is invalid: {}",
            code, why
        )))
    };

    let parts: Vec<&str> = code.split('-').collect();
    let [prefix, segment, year, suffix] = parts.as_slice() else {
        return invalid("expected PREFIX-SEGMENT-YYYY-SUFFIX");
    };

    if validate_prefix(prefix).is_err() {
        return invalid("prefix must be 2-10 letters/digits starting with a letter");
    }

    if segment.is_empty() || segment.len() > 16 || !is_upper_alnum(segment) {
        return invalid("segment must be 1-16 letters/digits");
    }

    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return invalid("year must be four digits");
    }

    if suffix.len() != 5 || !is_upper_alnum(suffix) {
        return invalid("suffix must be exactly 5 letters/digits");
    }

    Ok(())
}

pub fn validate_prefix(prefix: &str) -> Result<(), ServiceError> {
    let starts_with_letter = prefix
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase());

    if (2..=10).contains(&prefix.len()) && starts_with_letter && is_upper_alnum(prefix) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "Code prefix '{}' must be 2-10 letters/digits starting with a letter",
            prefix
        )))
    }
}

fn random_chars(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Generate a business code for `prefix` (already validated) and `year`.
pub fn generate_business_code(prefix: &str, year: i32) -> String {
    format!("{}-{}-{:04}-{}", prefix, random_chars(6), year, random_chars(5))
}

pub fn generate_personal_code() -> String {
    format!(
        "{}-{}-{}-{}",
        PERSONAL_PREFIX,
        random_chars(4),
        random_chars(4),
        random_chars(4)
    )
}

/// First and last characters only, for logs.
pub fn redact(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}…{}", head, tail)
}
