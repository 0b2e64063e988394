//! Chat message content rules.

use crate::StoreError;

/// Maximum content length in bytes.
pub const MAX_CONTENT_LENGTH: usize = 1000;

/// Check that `content` is non-empty, at most [`MAX_CONTENT_LENGTH`] bytes and
/// not made only of spaces, tabs and line breaks.
pub fn validate_content(content: &str) -> Result<(), StoreError> {
    if content.is_empty() || content.len() > MAX_CONTENT_LENGTH {
        return Err(StoreError::InvalidContent);
    }

    if content.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r')) {
        return Err(StoreError::InvalidContent);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_regular_content() {
        assert!(validate_content("hi").is_ok());
        assert!(validate_content("  padded  ").is_ok());
        assert!(validate_content(&"a".repeat(MAX_CONTENT_LENGTH)).is_ok());
    }

    #[test]
    fn test_rejects_empty_and_blank() {
        assert_eq!(validate_content(""), Err(StoreError::InvalidContent));
        assert_eq!(validate_content(" \t\r\n "), Err(StoreError::InvalidContent));
    }

    #[test]
    fn test_rejects_oversized_content() {
        let long = "a".repeat(MAX_CONTENT_LENGTH + 1);
        assert_eq!(validate_content(&long), Err(StoreError::InvalidContent));
    }

    #[test]
    fn test_length_is_measured_in_bytes() {
        // 'é' is two bytes in UTF-8
        let content = "é".repeat(501);
        assert_eq!(validate_content(&content), Err(StoreError::InvalidContent));
    }

    #[test]
    fn test_other_unicode_whitespace_counts_as_content() {
        assert!(validate_content("\u{00a0}").is_ok());
    }
}
