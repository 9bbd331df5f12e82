/// Trim, collapse whitespace and title-case words written entirely in upper or
/// lower case. Mixed-case words such as "McDonald" are left as written.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(normalize_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_word(word: &str) -> String {
    let has_upper = word.chars().any(char::is_uppercase);
    let has_lower = word.chars().any(char::is_lowercase);
    // mixed case, or no letters at all
    if has_upper == has_lower {
        return word.to_string();
    }
    title_case(word)
}

/// Uppercase the first letter of each segment; segments are split by `-`, `'`,
/// `’` and `.` so "o'brien" becomes "O'Brien" and "jean-luc" "Jean-Luc".
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut segment_start = true;
    for c in word.chars() {
        if c.is_alphabetic() {
            if segment_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            segment_start = false;
        } else {
            out.push(c);
            segment_start = matches!(c, '-' | '\'' | '’' | '.');
        }
    }
    out
}

/// Comparison key: lowercase, punctuation dropped, whitespace collapsed.
pub fn name_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '-' || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sorted_tokens(key: &str) -> String {
    let mut tokens: Vec<&str> = key.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Edit-distance ratio between two names in `0.0..=1.0`.
///
/// The better of the direct and the token-sorted comparison is used, so
/// "John Smith" and "Smith, John" compare as identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let key_a = name_key(a);
    let key_b = name_key(b);
    if key_a == key_b {
        return 1.0;
    }
    let direct = strsim::normalized_levenshtein(&key_a, &key_b);
    let reordered = strsim::normalized_levenshtein(&sorted_tokens(&key_a), &sorted_tokens(&key_b));
    direct.max(reordered).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name_fixes_uniform_case() {
        assert_eq!(normalize_name("  JOHN   SMITH "), "John Smith");
        assert_eq!(normalize_name("jane doe"), "Jane Doe");
        assert_eq!(normalize_name("o'brien-smythe"), "O'Brien-Smythe");
    }

    #[test]
    fn test_normalize_name_leaves_mixed_case() {
        assert_eq!(normalize_name("Ronald McDonald"), "Ronald McDonald");
        assert_eq!(normalize_name("DeShawn van Dyke"), "DeShawn Van Dyke");
        assert_eq!(normalize_name("J.R. R. Tolkien"), "J.R. R. Tolkien");
    }

    #[test]
    fn test_normalize_name_is_idempotent() {
        for raw in ["MCDONALD", "ángel GARCÍA", "x Æ a-12", "j.r.r. tolkien"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once, "{raw}");
        }
    }

    #[test]
    fn test_name_key() {
        assert_eq!(name_key("Smith,  John."), "smith john");
        assert_eq!(name_key("  JOHN SMITH"), "john smith");
    }

    #[test]
    fn test_similarity_properties() {
        assert_eq!(similarity("John Smith", "John Smith"), 1.0);
        assert!(similarity("John Smith", "Smith, John") >= 0.8);
        assert_eq!(
            similarity("Jon Smith", "John Smyth"),
            similarity("John Smyth", "Jon Smith")
        );
        let unrelated = similarity("John Smith", "Maria Garcia");
        assert!((0.0..0.5).contains(&unrelated));
    }

    #[test]
    fn test_similarity_close_spelling() {
        assert!(similarity("Jon Smith", "John Smith") > 0.8);
        assert!(similarity("Christian Pichler", "Christian Pichler") == 1.0);
    }
}
