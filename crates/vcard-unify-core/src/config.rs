use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Error;
use crate::normalize::DEFAULT_COUNTRY_CODE;

/// How much a source is trusted when picking single-valued fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Curated,
    Maintained,
    AutoCaptured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    pub paths: Vec<String>,
}

impl SourceConfig {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Attribute that tells two same-named people apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distinguisher {
    Organization,
    EmailDomain,
    City,
}

/// An email domain owned by an organization, e.g. `microsoft.com` for Microsoft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainOrganization {
    pub domain: String,
    pub organization: String,
}

/// Known distinct people sharing a name, told apart by `distinguish_by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctIdentity {
    pub name: String,
    pub distinguish_by: Distinguisher,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub auto_merge_threshold: u8,
    pub review_threshold: u8,
    pub max_group_size: usize,
    pub generic_email_domains: BTreeSet<String>,
    pub domain_organizations: Vec<DomainOrganization>,
    pub distinct_identities: Vec<DistinctIdentity>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            auto_merge_threshold: 95,
            review_threshold: 70,
            max_group_size: 8,
            generic_email_domains: [
                "gmail.com",
                "googlemail.com",
                "outlook.com",
                "hotmail.com",
                "live.com",
                "yahoo.com",
                "icloud.com",
                "me.com",
                "aol.com",
                "gmx.net",
                "gmx.at",
                "proton.me",
                "protonmail.com",
                "email.com",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            domain_organizations: Vec::new(),
            distinct_identities: Vec::new(),
        }
    }
}

impl MatchingConfig {
    pub fn is_generic_domain(&self, domain: &str) -> bool {
        self.generic_email_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }

    pub fn organization_for_domain(&self, domain: &str) -> Option<&str> {
        self.domain_organizations
            .iter()
            .find(|d| d.domain.eq_ignore_ascii_case(domain))
            .map(|d| d.organization.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub default_country_code: String,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }
}

/// How single-valued fields are picked when merging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicyKind {
    /// Longest normalized value, ties broken by source priority.
    #[default]
    MostComplete,
    /// Highest priority source.
    Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub critical_fields: Vec<String>,
    pub birthday_tolerance_days: i64,
    pub selection_policy: SelectionPolicyKind,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            critical_fields: vec!["ORG".to_string(), "BDAY".to_string()],
            birthday_tolerance_days: 0,
            selection_policy: SelectionPolicyKind::MostComplete,
        }
    }
}

impl MergeConfig {
    pub fn is_critical(&self, field: &str) -> bool {
        self.critical_fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(field))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: Vec<SourceConfig>,
    pub ignore_patterns: Vec<String>,
    pub output_path: String,
    pub db_path: String,
    pub audit_jsonl_path: Option<String>,
    pub matching: MatchingConfig,
    pub normalization: NormalizationConfig,
    pub merge: MergeConfig,
    pub verify_determinism: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            ignore_patterns: Vec::new(),
            output_path: "merged.vcf".to_string(),
            db_path: "vcard_unify.db".to_string(),
            audit_jsonl_path: None,
            matching: MatchingConfig::default(),
            normalization: NormalizationConfig::default(),
            merge: MergeConfig::default(),
            verify_determinism: true,
        }
    }
}

fn default_source_kind() -> SourceKind {
    SourceKind::Maintained
}

impl AppConfig {
    /// Source ids ordered by trust: kind first, then declaration order.
    pub fn source_priority(&self) -> Vec<String> {
        let mut ranked: Vec<(SourceKind, usize, &str)> = self
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| (s.kind, i, s.id.as_str()))
            .collect();
        ranked.sort();
        ranked.into_iter().map(|(_, _, id)| id.to_string()).collect()
    }

    pub fn validate(&self) -> Result<(), Error> {
        let m = &self.matching;
        if m.review_threshold > m.auto_merge_threshold {
            return Err(Error::InvalidConfig(format!(
                "review_threshold {} is above auto_merge_threshold {}",
                m.review_threshold, m.auto_merge_threshold
            )));
        }
        if m.auto_merge_threshold > 100 {
            return Err(Error::InvalidConfig(format!(
                "auto_merge_threshold {} is above 100",
                m.auto_merge_threshold
            )));
        }
        if m.max_group_size < 2 {
            return Err(Error::InvalidConfig(
                "max_group_size must be at least 2".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if source.id.is_empty() || source.id.contains('/') {
                return Err(Error::InvalidConfig(format!(
                    "source id '{}' must be non-empty and contain no '/'",
                    source.id
                )));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
        }

        let all_paths: Vec<String> = self
            .sources
            .iter()
            .flat_map(|s| s.paths.iter().cloned())
            .collect();
        let kept = non_overlapping_paths(all_paths.clone());
        if kept.len() != all_paths.len() {
            let dropped: Vec<&String> = all_paths.iter().filter(|p| !kept.contains(p)).collect();
            return Err(Error::InvalidConfig(format!(
                "overlapping source paths: {:?}",
                dropped
            )));
        }
        Ok(())
    }
}

/// Load `Config.toml` (optional) overlaid with `VCU__*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    load_configuration_from("Config")
}

pub fn load_configuration_from(name: &str) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name(name).required(false))
        .add_source(Environment::with_prefix("VCU").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Keep only paths that are not inside (or equal to) an earlier kept path.
pub fn non_overlapping_paths(paths: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for path in paths {
        let candidate = Path::new(&path);
        if result
            .iter()
            .any(|kept| candidate.starts_with(Path::new(kept)))
        {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(candidate));
        result.push(path);
    }

    result
}
