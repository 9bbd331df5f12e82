use std::collections::BTreeSet;

use super::profile::MatchProfile;
use crate::config::{DistinctIdentity, Distinguisher, MatchingConfig};
use crate::normalize;

/// A rule that can declare two profiles different people regardless of how
/// similar they look. Returns the reason when it fires.
pub trait NonMatchRule: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, a: &MatchProfile, b: &MatchProfile) -> Option<String>;
}

/// Fires when both sides' email domains belong to known organizations and the
/// two sets of organizations do not overlap.
pub struct DomainOrganizationRule {
    domains: Vec<(String, String)>,
}

impl DomainOrganizationRule {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            domains: config
                .domain_organizations
                .iter()
                .map(|d| (d.domain.to_lowercase(), normalize::normalize_org(&d.organization)))
                .collect(),
        }
    }

    fn organizations(&self, profile: &MatchProfile) -> BTreeSet<String> {
        profile
            .email_domains
            .iter()
            .filter_map(|domain| {
                self.domains
                    .iter()
                    .find(|(d, _)| d == domain)
                    .map(|(_, org)| org.clone())
            })
            .collect()
    }
}

impl NonMatchRule for DomainOrganizationRule {
    fn name(&self) -> &str {
        "domain_organization"
    }

    fn check(&self, a: &MatchProfile, b: &MatchProfile) -> Option<String> {
        if self.domains.is_empty() {
            return None;
        }
        let orgs_a = self.organizations(a);
        let orgs_b = self.organizations(b);
        if orgs_a.is_empty() || orgs_b.is_empty() || !orgs_a.is_disjoint(&orgs_b) {
            return None;
        }
        Some(format!(
            "email domains belong to different organizations ({} vs {})",
            join(&orgs_a),
            join(&orgs_b)
        ))
    }
}

/// Configured pairs of same-named people, told apart by an attribute.
pub struct DistinctIdentityRule {
    identity: DistinctIdentity,
    name_key: String,
    values: BTreeSet<String>,
}

impl DistinctIdentityRule {
    pub fn new(identity: DistinctIdentity) -> Self {
        let values = identity
            .values
            .iter()
            .map(|v| distinguisher_key(identity.distinguish_by, v))
            .collect();
        Self {
            name_key: normalize::name_key(&identity.name),
            values,
            identity,
        }
    }

    fn attribute(&self, profile: &MatchProfile) -> Option<String> {
        let mut values: Vec<String> = match self.identity.distinguish_by {
            Distinguisher::Organization => profile.org_key.iter().cloned().collect(),
            Distinguisher::EmailDomain => profile.email_domains.iter().cloned().collect(),
            Distinguisher::City => profile.city.iter().cloned().collect(),
        };
        values.retain(|v| self.values.contains(v));
        values.into_iter().next()
    }
}

impl NonMatchRule for DistinctIdentityRule {
    fn name(&self) -> &str {
        "distinct_identity"
    }

    fn check(&self, a: &MatchProfile, b: &MatchProfile) -> Option<String> {
        if a.name_key != self.name_key || b.name_key != self.name_key {
            return None;
        }
        let value_a = self.attribute(a)?;
        let value_b = self.attribute(b)?;
        (value_a != value_b).then(|| {
            format!(
                "'{}' is a known distinct identity ({} vs {})",
                self.identity.name, value_a, value_b
            )
        })
    }
}

fn distinguisher_key(kind: Distinguisher, value: &str) -> String {
    match kind {
        Distinguisher::Organization => normalize::normalize_org(value),
        Distinguisher::EmailDomain => value.trim().to_lowercase(),
        Distinguisher::City => normalize::name_key(value),
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// The override rules configured for a run.
pub fn rules_from_config(config: &MatchingConfig) -> Vec<Box<dyn NonMatchRule>> {
    let mut rules: Vec<Box<dyn NonMatchRule>> = vec![Box::new(DomainOrganizationRule::new(config))];
    rules.extend(
        config
            .distinct_identities
            .iter()
            .cloned()
            .map(|identity| Box::new(DistinctIdentityRule::new(identity)) as Box<dyn NonMatchRule>),
    );
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainOrganization;
    use crate::model::{RecordId, SourceId};

    fn profile(name: &str, emails: &[&str], org: Option<&str>) -> MatchProfile {
        let emails: BTreeSet<String> = emails.iter().map(|e| e.to_string()).collect();
        MatchProfile {
            record_id: RecordId::new(format!("s/{}", name)),
            source_id: SourceId::new("s"),
            display_name: name.to_string(),
            name_key: normalize::name_key(name),
            email_domains: emails
                .iter()
                .filter_map(|e| normalize::email_domain(e).map(str::to_string))
                .collect(),
            emails,
            phone_keys: BTreeSet::new(),
            area_codes: BTreeSet::new(),
            org_key: org.map(normalize::normalize_org),
            city: None,
            region: None,
        }
    }

    #[test]
    fn test_domain_organization_rule() {
        let mut config = MatchingConfig::default();
        config.domain_organizations = vec![
            DomainOrganization {
                domain: "microsoft.com".to_string(),
                organization: "Microsoft".to_string(),
            },
            DomainOrganization {
                domain: "google.com".to_string(),
                organization: "Google".to_string(),
            },
        ];
        let rule = DomainOrganizationRule::new(&config);
        let ms = profile("Jane Doe", &["jane@microsoft.com"], None);
        let google = profile("Jane Doe", &["jane@google.com"], None);
        let personal = profile("Jane Doe", &["jane@email.com"], None);
        assert!(rule.check(&ms, &google).is_some());
        assert!(rule.check(&ms, &ms).is_none());
        assert!(rule.check(&ms, &personal).is_none());
    }

    #[test]
    fn test_distinct_identity_rule() {
        let rule = DistinctIdentityRule::new(DistinctIdentity {
            name: "Christian Pichler".to_string(),
            distinguish_by: Distinguisher::Organization,
            values: vec!["Acme GmbH".to_string(), "Globex".to_string()],
        });
        let acme = profile("Christian Pichler", &[], Some("ACME"));
        let globex = profile("Christian Pichler", &[], Some("Globex AG"));
        let other = profile("Christian Pichler", &[], Some("Initech"));
        assert!(rule.check(&acme, &globex).unwrap().contains("Christian Pichler"));
        assert!(rule.check(&acme, &acme).is_none());
        assert!(rule.check(&acme, &other).is_none());
    }
}
