pub mod xxhash;

pub use xxhash::{fingerprint_strs, hash_data};
