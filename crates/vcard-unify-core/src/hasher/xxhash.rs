use std::hash::Hasher as _;
use twox_hash::XxHash64;

const FIELD_SEPARATOR: u8 = 0x1f;

/// XxHash64 (seed 0) over raw bytes.
pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Hash an ordered sequence of strings. Each part is terminated by a unit separator
/// so that `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn fingerprint_strs<'a>(parts: impl IntoIterator<Item = &'a str>) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    for part in parts {
        hasher.write(part.as_bytes());
        hasher.write_u8(FIELD_SEPARATOR);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_data_is_stable() {
        assert_eq!(hash_data(b"BEGIN:VCARD"), hash_data(b"BEGIN:VCARD"));
        assert_ne!(hash_data(b"BEGIN:VCARD"), hash_data(b"END:VCARD"));
    }

    #[test]
    fn test_fingerprint_separates_parts() {
        assert_ne!(fingerprint_strs(["ab", "c"]), fingerprint_strs(["a", "bc"]));
        assert_eq!(fingerprint_strs(["a", "b"]), fingerprint_strs(vec!["a", "b"]));
    }
}
