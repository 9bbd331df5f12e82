use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::overrides::{rules_from_config, NonMatchRule};
use super::profile::MatchProfile;
use crate::config::MatchingConfig;
use crate::error::Error;
use crate::model::{MatchCandidate, Record, SourceId};
use crate::normalize::{self, DEFAULT_COUNTRY_CODE};

pub const EXACT_EMAIL: u8 = 95;
pub const EXACT_PHONE: u8 = 90;
pub const COMBINED_STRONG: u8 = 98;
pub const COMBINED_MODERATE: u8 = 90;
pub const NAME_ORG: u8 = 85;
pub const NAME_LOCATION: u8 = 75;
pub const NAME_ONLY: u8 = 50;

const STRONG_SIMILARITY: f64 = 0.8;
const MODERATE_SIMILARITY: f64 = 0.7;
const NAME_ONLY_SIMILARITY: f64 = 0.9;

/// Scores cross-source record pairs. Overrides run first; otherwise the highest
/// scoring rule wins and every rule that fired is listed as a factor.
pub struct Scorer {
    config: MatchingConfig,
    rules: Vec<Box<dyn NonMatchRule>>,
}

impl Scorer {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            rules: rules_from_config(config),
            config: config.clone(),
        }
    }

    pub fn score(&self, a: &MatchProfile, b: &MatchProfile) -> Result<MatchCandidate, Error> {
        if a.source_id == b.source_id {
            return Err(Error::SameSourcePair(
                a.record_id.to_string(),
                b.record_id.to_string(),
                a.source_id.to_string(),
            ));
        }
        let ends = ((&a.record_id, &a.source_id), (&b.record_id, &b.source_id));

        for rule in &self.rules {
            if let Some(reason) = rule.check(a, b) {
                let factors = BTreeSet::from([rule.name().to_string()]);
                return Ok(MatchCandidate::new(ends.0, ends.1, 0, factors, Some(reason)));
            }
        }

        let mut fired: Vec<(&str, u8)> = Vec::new();
        if !a.emails.is_disjoint(&b.emails) {
            fired.push(("exact_email", EXACT_EMAIL));
        }
        if !a.phone_keys.is_disjoint(&b.phone_keys) {
            fired.push(("exact_phone", EXACT_PHONE));
        }

        let named = !a.name_key.is_empty() && !b.name_key.is_empty();
        let similarity = if named {
            normalize::similarity(&a.display_name, &b.display_name)
        } else {
            0.0
        };
        let same_name = named && a.name_key == b.name_key;
        let shared_org = matches!((&a.org_key, &b.org_key), (Some(x), Some(y)) if x == y);
        let shared_domain = a
            .email_domains
            .intersection(&b.email_domains)
            .any(|d| !self.config.is_generic_domain(d));
        let shared_area = !a.area_codes.is_disjoint(&b.area_codes);

        if similarity > STRONG_SIMILARITY && (shared_domain || shared_org) {
            fired.push(("combined_strong", COMBINED_STRONG));
        }
        if similarity > MODERATE_SIMILARITY && (shared_area || a.same_city(b)) {
            fired.push(("combined_moderate", COMBINED_MODERATE));
        }
        if same_name && shared_org {
            fired.push(("name_org", NAME_ORG));
        }
        if same_name && a.same_location(b) {
            fired.push(("name_location", NAME_LOCATION));
        }
        if fired.is_empty() && similarity >= NAME_ONLY_SIMILARITY {
            fired.push(("name_only", NAME_ONLY));
        }

        let score = fired.iter().map(|(_, s)| *s).max().unwrap_or(0);
        let factors = fired.iter().map(|(name, _)| name.to_string()).collect();
        Ok(MatchCandidate::new(ends.0, ends.1, score, factors, None))
    }

    /// Score every cross-source pair in parallel. Pairs are generated per row
    /// inside the workers, never collected up front. Pairs with a zero score are
    /// dropped unless an override fired. Output is sorted by id pair.
    pub fn build_candidates(&self, profiles: &[MatchProfile]) -> Vec<MatchCandidate> {
        let n = profiles.len();
        let mut per_source: BTreeMap<&SourceId, usize> = BTreeMap::new();
        for profile in profiles {
            *per_source.entry(&profile.source_id).or_default() += 1;
        }
        let same_source: usize = per_source.values().map(|k| k * k.saturating_sub(1) / 2).sum();
        info!("Scoring {} cross-source pairs...", n * n.saturating_sub(1) / 2 - same_source);

        let mut candidates: Vec<MatchCandidate> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                ((i + 1)..n)
                    .filter(move |&j| profiles[i].source_id != profiles[j].source_id)
                    .filter_map(move |j| self.score(&profiles[i], &profiles[j]).ok())
            })
            .filter(|c| c.score > 0 || c.override_reason.is_some())
            .collect();
        candidates.sort_by(|a, b| a.pair_key().cmp(&b.pair_key()));

        debug!(
            "{} candidates kept ({} overridden)",
            candidates.len(),
            candidates.iter().filter(|c| c.override_reason.is_some()).count()
        );
        candidates
    }
}

/// Profiles for `records`, computed in parallel.
pub fn build_profiles(records: &[Record], default_country_code: &str) -> Vec<MatchProfile> {
    records
        .par_iter()
        .map(|r| MatchProfile::from_record(r, default_country_code))
        .collect()
}

/// Candidates for `records` under the default matching configuration.
pub fn build_candidates(records: &[Record]) -> Vec<MatchCandidate> {
    build_candidates_with(records, &MatchingConfig::default(), DEFAULT_COUNTRY_CODE)
}

pub fn build_candidates_with(
    records: &[Record],
    config: &MatchingConfig,
    default_country_code: &str,
) -> Vec<MatchCandidate> {
    let profiles = build_profiles(records, default_country_code);
    Scorer::new(config).build_candidates(&profiles)
}
