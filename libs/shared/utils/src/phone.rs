//! Caller phone numbers arrive as `+1 (555) 123-4567`, `555.123.4567`,
//! `15551234567` and so on. Everything is reduced to a bare 10-digit NANP
//! form before comparison; anything that does not reduce cleanly is
//! unmatchable.

/// Returns the canonical 10-digit form, or `None` when the input does not
/// reduce to exactly ten digits.
pub fn normalize(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    let national = match digits.len() {
        11 if digits.starts_with('1') => &digits[1..],
        _ => digits.as_str(),
    };

    if national.len() == 10 {
        Some(national.to_string())
    } else {
        None
    }
}

/// True iff both numbers normalize and the normalized forms are equal.
pub fn matches(a: &str, b: &str) -> bool {
    match (normalize(a), normalize(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_country_code_and_punctuation() {
        assert_eq!(normalize("+1 (555) 123-4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize("555.123.4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize("15551234567").as_deref(), Some("5551234567"));
        assert_eq!(normalize("5551234567").as_deref(), Some("5551234567"));
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert_eq!(normalize("12345"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("not a phone"), None);
        // 11 digits without the NANP prefix is not coerced
        assert_eq!(normalize("25551234567"), None);
        assert_eq!(normalize("+44 20 7946 0958 12"), None);
    }

    #[test]
    fn matching_is_format_insensitive() {
        assert!(matches("+1 (555) 123-4567", "555-123-4567"));
        assert!(!matches("555-123-4567", "555-123-4568"));
        assert!(!matches("12345", "12345"));
    }
}
