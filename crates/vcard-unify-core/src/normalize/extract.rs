use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"(?i)\b[a-z0-9._%+\-]+@[a-z0-9\-]+(?:\.[a-z0-9\-]+)*\.[a-z]{2,}\b")
            .expect("valid email regex");
    static ref PHONE_PATTERN: Regex =
        Regex::new(r"\+?\(?\d[\d \t().\-/]{5,}\d").expect("valid phone regex");
    static ref DATE_PATTERN: Regex =
        Regex::new(r"^\d{4}[\-/.]\d{1,2}[\-/.]\d{1,2}$|^\d{1,2}[\-/.]\d{1,2}[\-/.]\d{2,4}$")
            .expect("valid date regex");
}

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// Email-like tokens in free text, in order of appearance, without repeats.
pub fn extract_emails(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in EMAIL_PATTERN.find_iter(text) {
        let token = m.as_str().to_string();
        if !found.iter().any(|f| f.eq_ignore_ascii_case(&token)) {
            found.push(token);
        }
    }
    found
}

/// Phone-like tokens in free text: 7 to 15 digits with common separators.
/// Date-shaped tokens are skipped.
pub fn extract_phones(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in PHONE_PATTERN.find_iter(text) {
        let token = m.as_str().trim();
        let digits = token.chars().filter(char::is_ascii_digit).count();
        if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) {
            continue;
        }
        if DATE_PATTERN.is_match(token) {
            continue;
        }
        if !found.iter().any(|f| f == token) {
            found.push(token.to_string());
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_emails_from_note() {
        let note = "Met at conf. Work: John.Smith@Acme.com, personal john@email.com; john@EMAIL.com";
        assert_eq!(
            extract_emails(note),
            vec!["John.Smith@Acme.com".to_string(), "john@email.com".to_string()]
        );
    }

    #[test]
    fn test_extract_phones_skips_dates_and_short_numbers() {
        let note = "Call +1 (555) 123-4567 after 2021-03-04, room 1234, alt 555-9876";
        assert_eq!(
            extract_phones(note),
            vec!["+1 (555) 123-4567".to_string(), "555-9876".to_string()]
        );
    }

    #[test]
    fn test_extract_phones_does_not_join_lines() {
        let note = "555-123-4567\n555-987-6543";
        assert_eq!(extract_phones(note).len(), 2);
    }
}
