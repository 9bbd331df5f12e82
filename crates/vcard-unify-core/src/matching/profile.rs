use std::collections::BTreeSet;

use crate::model::{FieldKind, Record, RecordId, SourceId};
use crate::normalize;

/// Matching features of one record, computed once before pair scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchProfile {
    pub record_id: RecordId,
    pub source_id: SourceId,
    pub display_name: String,
    pub name_key: String,
    pub emails: BTreeSet<String>,
    pub email_domains: BTreeSet<String>,
    pub phone_keys: BTreeSet<String>,
    pub area_codes: BTreeSet<String>,
    pub org_key: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
}

impl MatchProfile {
    pub fn from_record(record: &Record, default_country_code: &str) -> Self {
        let display_name = record
            .formatted_name()
            .or_else(|| {
                record
                    .first(FieldKind::StructuredName)
                    .map(|n| n.components().iter().rev().cloned().collect::<Vec<_>>().join(" "))
            })
            .unwrap_or_default();

        let emails: BTreeSet<String> = record
            .emails()
            .iter()
            .filter_map(|e| normalize::normalize_email(e).ok())
            .collect();
        let email_domains = emails
            .iter()
            .filter_map(|e| normalize::email_domain(e))
            .map(str::to_string)
            .collect();

        let phones: Vec<normalize::PhoneNumber> = record
            .phones()
            .iter()
            .filter_map(|p| normalize::normalize_phone_with(p, default_country_code).ok())
            .collect();
        let phone_keys = phones.iter().map(|p| p.key.clone()).collect();
        let area_codes = phones
            .iter()
            .filter_map(|p| p.area_code().map(str::to_string))
            .collect();

        let org_key = record
            .organization()
            .map(|o| normalize::normalize_org(&o))
            .filter(|o| !o.is_empty());

        // ADR: pobox;ext;street;locality;region;code;country
        let address = record.first(FieldKind::Address).map(|a| a.components());
        let component = |i: usize| {
            address
                .as_ref()
                .and_then(|parts| parts.get(i))
                .map(|c| normalize::name_key(c))
                .filter(|c| !c.is_empty())
        };

        Self {
            record_id: record.id().clone(),
            source_id: record.source_id().clone(),
            name_key: normalize::name_key(&display_name),
            display_name,
            emails,
            email_domains,
            phone_keys,
            area_codes,
            org_key,
            city: component(3),
            region: component(4),
        }
    }

    /// Same city, or same region when neither side names a city.
    pub fn same_location(&self, other: &MatchProfile) -> bool {
        match (&self.city, &other.city) {
            (Some(a), Some(b)) => a == b,
            (None, None) => matches!((&self.region, &other.region), (Some(a), Some(b)) if a == b),
            _ => false,
        }
    }

    pub fn same_city(&self, other: &MatchProfile) -> bool {
        matches!((&self.city, &other.city), (Some(a), Some(b)) if a == b)
    }
}
