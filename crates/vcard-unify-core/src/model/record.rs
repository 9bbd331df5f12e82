use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the export a record was imported from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Source id carried by records produced by the merge resolver.
    pub fn merged() -> Self {
        Self("merged".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable record identity: `<source_id>/<uid or content fingerprint>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn for_source(source_id: &SourceId, local: &str) -> Self {
        Self(format!("{}/{}", source_id, local))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The property kinds the pipeline treats specially. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Version,
    FormattedName,
    StructuredName,
    Email,
    Phone,
    Organization,
    Title,
    Note,
    Photo,
    Address,
    Url,
    Birthday,
    Uid,
    Other,
}

impl FieldKind {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "VERSION" => FieldKind::Version,
            "FN" => FieldKind::FormattedName,
            "N" => FieldKind::StructuredName,
            "EMAIL" => FieldKind::Email,
            "TEL" => FieldKind::Phone,
            "ORG" => FieldKind::Organization,
            "TITLE" => FieldKind::Title,
            "NOTE" => FieldKind::Note,
            "PHOTO" => FieldKind::Photo,
            "ADR" => FieldKind::Address,
            "URL" => FieldKind::Url,
            "BDAY" => FieldKind::Birthday,
            "UID" => FieldKind::Uid,
            _ => FieldKind::Other,
        }
    }
}

/// One parameter of a content line, e.g. `TYPE=work,pref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub values: Vec<String>,
}

/// One content line of a record. `value` holds the raw, still escaped text so that
/// untouched properties are exported byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub group: Option<String>,
    pub name: String,
    pub params: Vec<Param>,
    pub value: String,
}

impl Property {
    pub fn new(name: &str, raw_value: impl Into<String>) -> Self {
        Self {
            group: None,
            name: name.to_ascii_uppercase(),
            params: Vec::new(),
            value: raw_value.into(),
        }
    }

    /// Build a property from unescaped text.
    pub fn text(name: &str, text: &str) -> Self {
        Self::new(name, escape_text(text))
    }

    /// Build a structured property (N, ADR) from unescaped components.
    pub fn structured<S: AsRef<str>>(name: &str, components: &[S]) -> Self {
        let raw = components
            .iter()
            .map(|c| escape_text(c.as_ref()))
            .collect::<Vec<_>>()
            .join(";");
        Self::new(name, raw)
    }

    pub fn kind(&self) -> FieldKind {
        FieldKind::from_name(&self.name)
    }

    pub fn text_value(&self) -> String {
        unescape_text(&self.value)
    }

    pub fn components(&self) -> Vec<String> {
        split_unescaped(&self.value, ';')
            .into_iter()
            .map(|c| unescape_text(&c))
            .collect()
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Uppercased TYPE values, sorted and de-duplicated.
    pub fn type_values(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .params
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case("TYPE"))
            .flat_map(|p| p.values.iter().map(|v| v.to_ascii_uppercase()))
            .collect();
        types.sort();
        types.dedup();
        types
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.add_param_value(name, value);
        self
    }

    /// Add `value` to parameter `name` unless it is already present (case-insensitive).
    pub fn add_param_value(&mut self, name: &str, value: &str) {
        match self
            .params
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
        {
            Some(param) => {
                if !param.values.iter().any(|v| v.eq_ignore_ascii_case(value)) {
                    param.values.push(value.to_string());
                }
            }
            None => self.params.push(Param {
                name: name.to_ascii_uppercase(),
                values: vec![value.to_string()],
            }),
        }
    }

    pub fn with_value(&self, raw_value: impl Into<String>) -> Self {
        Self {
            value: raw_value.into(),
            ..self.clone()
        }
    }
}

/// One contact as imported, or one derived version of it.
///
/// Records are never edited in place: the fixer calls [`Record::derive`] which
/// returns a new version pointing back at its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: RecordId,
    source_id: SourceId,
    import_timestamp: DateTime<Utc>,
    version: u32,
    parent_version: Option<u32>,
    properties: Vec<Property>,
}

impl Record {
    pub fn new(
        id: RecordId,
        source_id: SourceId,
        import_timestamp: DateTime<Utc>,
        properties: Vec<Property>,
    ) -> Self {
        Self {
            id,
            source_id,
            import_timestamp,
            version: 1,
            parent_version: None,
            properties,
        }
    }

    /// New immutable version with `properties`; identity and provenance carry over.
    pub fn derive(&self, properties: Vec<Property>) -> Self {
        Self {
            id: self.id.clone(),
            source_id: self.source_id.clone(),
            import_timestamp: self.import_timestamp,
            version: self.version + 1,
            parent_version: Some(self.version),
            properties,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn import_timestamp(&self) -> DateTime<Utc> {
        self.import_timestamp
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn parent_version(&self) -> Option<u32> {
        self.parent_version
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn of_kind(&self, kind: FieldKind) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(move |p| p.kind() == kind)
    }

    pub fn named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Property> + 'a {
        let name = name.to_ascii_uppercase();
        self.properties.iter().filter(move |p| p.name == name)
    }

    pub fn first(&self, kind: FieldKind) -> Option<&Property> {
        self.of_kind(kind).next()
    }

    pub fn has(&self, kind: FieldKind) -> bool {
        self.first(kind).is_some()
    }

    pub fn formatted_name(&self) -> Option<String> {
        self.first(FieldKind::FormattedName)
            .map(|p| p.text_value().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn emails(&self) -> Vec<String> {
        self.of_kind(FieldKind::Email).map(|p| p.text_value()).collect()
    }

    pub fn phones(&self) -> Vec<String> {
        self.of_kind(FieldKind::Phone).map(|p| p.text_value()).collect()
    }

    /// Organization units joined with `;` as a single display string.
    pub fn organization(&self) -> Option<String> {
        self.first(FieldKind::Organization)
            .map(|p| {
                p.components()
                    .into_iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .filter(|s| !s.is_empty())
    }

    pub fn notes(&self) -> Vec<String> {
        self.of_kind(FieldKind::Note)
            .map(|p| p.text_value())
            .filter(|n| !n.trim().is_empty())
            .collect()
    }
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split on `sep` where it is not preceded by a backslash escape. Escapes are kept.
pub fn split_unescaped(raw: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in raw.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new(
            RecordId::new("phone/1"),
            SourceId::new("phone"),
            Utc::now(),
            vec![
                Property::new("VERSION", "3.0"),
                Property::text("FN", "Smith, John"),
                Property::structured("N", &["Smith", "John", "", "", ""]),
            ],
        )
    }

    #[test]
    fn test_escape_round_trip() {
        let text = "Line one\nsemi; comma, slash\\";
        assert_eq!(unescape_text(&escape_text(text)), text);
    }

    #[test]
    fn test_components_respect_escapes() {
        let prop = Property::new("ADR", "Suite 1\\; rear;;Main St;Springfield");
        let parts = prop.components();
        assert_eq!(parts[0], "Suite 1; rear");
        assert_eq!(parts[2], "Main St");
        assert_eq!(parts[3], "Springfield");
    }

    #[test]
    fn test_derive_links_parent_and_keeps_identity() {
        let record = sample();
        let next = record.derive(record.properties().to_vec());
        assert_eq!(next.version(), 2);
        assert_eq!(next.parent_version(), Some(1));
        assert_eq!(next.source_id(), record.source_id());
        assert_eq!(next.import_timestamp(), record.import_timestamp());
        assert_eq!(next.id(), record.id());
    }

    #[test]
    fn test_formatted_name_unescapes() {
        assert_eq!(sample().formatted_name().as_deref(), Some("Smith, John"));
    }

    #[test]
    fn test_add_param_value_deduplicates() {
        let mut prop = Property::new("EMAIL", "a@b.com").with_param("TYPE", "work");
        prop.add_param_value("type", "WORK");
        prop.add_param_value("TYPE", "pref");
        assert_eq!(prop.type_values(), vec!["PREF".to_string(), "WORK".to_string()]);
    }
}
