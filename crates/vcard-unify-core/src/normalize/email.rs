use super::NormalizeError;

/// Trim, drop a `mailto:` prefix and lowercase.
pub fn normalize_email(raw: &str) -> Result<String, NormalizeError> {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => &trimmed[7..],
        _ => trimmed,
    };
    let email = without_scheme.to_lowercase();

    match email.rsplit_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !email.chars().any(char::is_whitespace) =>
        {
            Ok(email)
        }
        _ => Err(NormalizeError::MalformedEmail(raw.to_string())),
    }
}

/// Domain part of an already normalized email.
pub fn email_domain(email: &str) -> Option<&str> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email_lowercases_and_trims() {
        assert_eq!(
            normalize_email("  John.Smith@Email.COM ").unwrap(),
            "john.smith@email.com"
        );
        assert_eq!(normalize_email("MAILTO:a@b.org").unwrap(), "a@b.org");
    }

    #[test]
    fn test_normalize_email_rejects_malformed() {
        for bad in ["", "john", "@email.com", "john@", "john smith@x.com"] {
            assert_eq!(
                normalize_email(bad),
                Err(NormalizeError::MalformedEmail(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_email_domain() {
        assert_eq!(email_domain("jane@example.org"), Some("example.org"));
        assert_eq!(email_domain("nobody"), None);
    }
}
