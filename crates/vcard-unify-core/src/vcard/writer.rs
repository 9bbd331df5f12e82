use crate::model::{FieldKind, MergedContact, Property, Record};

const MAX_LINE_OCTETS: usize = 75;

/// Serialize merged contacts back into one vCard export.
pub fn export(merged_contacts: &[MergedContact]) -> String {
    merged_contacts
        .iter()
        .map(|contact| write_record(&contact.record))
        .collect()
}

pub fn export_records(records: &[Record]) -> String {
    records.iter().map(write_record).collect()
}

/// Serialize one record. VERSION is emitted first as the grammar requires;
/// every other property keeps its order.
pub fn write_record(record: &Record) -> String {
    let mut out = String::from("BEGIN:VCARD\r\n");
    let (version, rest): (Vec<&Property>, Vec<&Property>) = record
        .properties()
        .iter()
        .partition(|p| p.kind() == FieldKind::Version);
    for property in version.into_iter().chain(rest) {
        for line in fold_line(&format_property(property)) {
            out.push_str(&line);
            out.push_str("\r\n");
        }
    }
    out.push_str("END:VCARD\r\n");
    out
}

pub fn format_property(property: &Property) -> String {
    let mut line = String::new();
    if let Some(group) = &property.group {
        line.push_str(group);
        line.push('.');
    }
    line.push_str(&property.name);
    for param in &property.params {
        line.push(';');
        line.push_str(&param.name);
        line.push('=');
        let values: Vec<String> = param.values.iter().map(|v| quote_param(v)).collect();
        line.push_str(&values.join(","));
    }
    line.push(':');
    line.push_str(&property.value);
    line
}

fn quote_param(value: &str) -> String {
    if value.contains([':', ';', ',']) {
        format!("\"{}\"", value.replace('"', "'"))
    } else {
        value.to_string()
    }
}

/// Fold a logical line into physical lines of at most 75 octets, never splitting
/// a UTF-8 sequence. Continuation lines start with a single space.
pub fn fold_line(line: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut limit = MAX_LINE_OCTETS;

    for c in line.chars() {
        if current.len() + c.len_utf8() > limit {
            lines.push(std::mem::take(&mut current));
            current.push(' ');
            limit = MAX_LINE_OCTETS;
        }
        current.push(c);
    }
    lines.push(current);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordId, SourceId};
    use crate::vcard::parser::{ingest, unfold_lines};
    use chrono::Utc;

    #[test]
    fn test_fold_line_limits_octets() {
        let long = format!("NOTE:{}", "é".repeat(100));
        let folded = fold_line(&long);
        assert!(folded.len() > 1);
        for physical in &folded {
            assert!(physical.len() <= MAX_LINE_OCTETS);
        }
        for continuation in &folded[1..] {
            assert!(continuation.starts_with(' '));
        }
        assert_eq!(unfold_lines(&folded.join("\r\n")), vec![long]);
    }

    #[test]
    fn test_write_record_puts_version_first() {
        let record = Record::new(
            RecordId::new("s/1"),
            SourceId::new("s"),
            Utc::now(),
            vec![
                Property::text("FN", "Jane Doe"),
                Property::new("VERSION", "3.0"),
            ],
        );
        let text = write_record(&record);
        assert!(text.starts_with("BEGIN:VCARD\r\nVERSION:3.0\r\nFN:Jane Doe\r\n"));
        assert!(text.ends_with("END:VCARD\r\n"));
    }

    #[test]
    fn test_written_record_parses_back() {
        let source = SourceId::new("s");
        let original = ingest(
            "BEGIN:VCARD\nVERSION:3.0\nFN:Jane Doe\nitem2.EMAIL;TYPE=work,pref:jane@x.org\nEND:VCARD",
            &source,
        )
        .unwrap();
        let reparsed = ingest(&write_record(&original), &source).unwrap();
        assert_eq!(reparsed.properties(), original.properties());
    }

    #[test]
    fn test_param_values_with_separators_are_quoted() {
        let prop = Property::new("X-TEST", "v").with_param("X-LABEL", "a:b");
        assert_eq!(format_property(&prop), "X-TEST;X-LABEL=\"a:b\":v");
    }
}
