//! Cross-source identity resolution: pair scoring, overrides and grouping.

pub mod grouper;
pub mod overrides;
pub mod profile;
pub mod scorer;

pub use grouper::{group, Grouper, GroupingOutcome};
pub use overrides::{DistinctIdentityRule, DomainOrganizationRule, NonMatchRule};
pub use profile::MatchProfile;
pub use scorer::{build_candidates, build_candidates_with, build_profiles, Scorer};
