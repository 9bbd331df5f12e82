use super::NormalizeError;

pub const DEFAULT_COUNTRY_CODE: &str = "1";

/// Digits kept as the comparison key. Tolerates missing or extra country codes.
const KEY_DIGITS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber {
    /// The value as it was written, for display.
    pub original: String,
    pub canonical: String,
    pub key: String,
    pub extension: Option<String>,
}

impl PhoneNumber {
    /// First three digits of a full ten digit key.
    pub fn area_code(&self) -> Option<&str> {
        (self.key.len() == KEY_DIGITS).then(|| &self.key[..3])
    }
}

pub fn normalize_phone(raw: &str) -> Result<PhoneNumber, NormalizeError> {
    normalize_phone_with(raw, DEFAULT_COUNTRY_CODE)
}

/// Canonical form:
/// - `+<digits>` when written with `+` or an international `00` prefix
/// - `+<cc><digits>` for exactly ten digits
/// - `+<digits>` when the digits are the default country code plus ten digits
/// - the bare digits otherwise
///
/// followed by `;ext=<n>` when an extension was given. Canonical output maps to itself.
pub fn normalize_phone_with(
    raw: &str,
    default_country_code: &str,
) -> Result<PhoneNumber, NormalizeError> {
    let malformed = || NormalizeError::MalformedPhone(raw.to_string());

    let original = raw.trim();
    let lower = original.to_ascii_lowercase();
    let lower = lower.strip_prefix("tel:").unwrap_or(&lower);
    let (main, extension) = split_extension(lower);

    if main.chars().any(char::is_alphabetic) {
        return Err(malformed());
    }

    let main = main.trim();
    let mut digits: String = main.chars().filter(char::is_ascii_digit).collect();
    let mut international = main.starts_with('+');
    if !international && main.starts_with("00") {
        digits.drain(..2);
        international = true;
    }
    if digits.is_empty() {
        return Err(malformed());
    }

    let extension = match extension {
        Some(ext) => {
            let ext = ext.trim_matches(|c: char| c.is_whitespace() || c == '.' || c == ':' || c == '=');
            if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_digit()) {
                return Err(malformed());
            }
            Some(ext.to_string())
        }
        None => None,
    };

    let full_digits = if international {
        digits
    } else if digits.len() == KEY_DIGITS {
        format!("{}{}", default_country_code, digits)
    } else {
        digits
    };
    let has_country = international
        || full_digits.len() == default_country_code.len() + KEY_DIGITS
            && full_digits.starts_with(default_country_code);

    let mut canonical = if has_country {
        format!("+{}", full_digits)
    } else {
        full_digits.clone()
    };
    if let Some(ext) = &extension {
        canonical.push_str(";ext=");
        canonical.push_str(ext);
    }

    let key = if full_digits.len() >= KEY_DIGITS {
        full_digits[full_digits.len() - KEY_DIGITS..].to_string()
    } else {
        full_digits.clone()
    };

    Ok(PhoneNumber {
        original: original.to_string(),
        canonical,
        key,
        extension,
    })
}

fn split_extension(value: &str) -> (&str, Option<&str>) {
    if let Some(i) = value.find(";ext=") {
        return (&value[..i], Some(&value[i + 5..]));
    }
    if let Some(i) = value.find("ext") {
        return (&value[..i], Some(&value[i + 3..]));
    }
    if let Some(i) = value.find('x') {
        return (&value[..i], Some(&value[i + 1..]));
    }
    (value, None)
}
