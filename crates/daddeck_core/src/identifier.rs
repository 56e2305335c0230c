//! Identifier normalization.
//!
//! Fingerprints arrive as opaque strings. Rate-limit buckets, bans and audit
//! entries all key on the normalized form so `" Device-A "` and `"device-a"`
//! share one bucket.

/// Identifier used when the caller supplies nothing usable.
pub const ANONYMOUS: &str = "anonymous";

/// Longest identifier kept, in characters.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Normalizes an opaque identifier.
///
/// Trims, lowercases, replaces whitespace and control characters with `_`
/// and truncates to [`MAX_IDENTIFIER_LEN`] characters. Blank input maps to
/// [`ANONYMOUS`].
#[must_use]
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ANONYMOUS.to_string();
    }

    trimmed
        .chars()
        .take(MAX_IDENTIFIER_LEN)
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_whitespace() || c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_identifier("  Device-A "), "device-a");
        assert_eq!(normalize_identifier("fp one\ttwo"), "fp_one_two");
        assert_eq!(normalize_identifier("   "), ANONYMOUS);
        assert_eq!(normalize_identifier(""), ANONYMOUS);
    }

    #[test]
    fn test_truncation() {
        let long = "x".repeat(500);
        assert_eq!(normalize_identifier(&long).chars().count(), MAX_IDENTIFIER_LEN);
    }
}
