//! Pure canonicalization of atomic contact values.

pub mod email;
pub mod extract;
pub mod name;
pub mod org;
pub mod phone;

use thiserror::Error;

pub use email::{email_domain, normalize_email};
pub use name::{name_key, normalize_name, similarity};
pub use org::normalize_org;
pub use phone::{normalize_phone, normalize_phone_with, PhoneNumber, DEFAULT_COUNTRY_CODE};

/// Recoverable normalization failures. Callers fall back to the raw value and
/// raise a soft violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("malformed email '{0}'")]
    MalformedEmail(String),

    #[error("malformed phone number '{0}'")]
    MalformedPhone(String),
}
