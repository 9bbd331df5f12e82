use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::trace;

use crate::hasher;
use crate::model::{FieldKind, Param, Property, Record, RecordId, SourceId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("record is empty")]
    Empty,

    #[error("record does not start with BEGIN:VCARD")]
    MissingBegin,

    #[error("record does not end with END:VCARD")]
    MissingEnd,

    #[error("line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },
}

/// Split a bulk export into the raw text of each record.
///
/// Text outside any `BEGIN:VCARD`/`END:VCARD` pair is dropped, except when an
/// orphaned `END:VCARD` or an unterminated record shows up: those chunks are kept
/// so that `ingest` can reject them explicitly instead of losing them silently.
/// A `BEGIN:VCARD` inside an open record closes it, so one truncated card never
/// swallows the cards after it.
pub fn split_export(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut orphan: Vec<&str> = Vec::new();

    for line in text.lines() {
        let marker = line.trim().to_ascii_uppercase();
        if marker == "BEGIN:VCARD" {
            if !current.is_empty() {
                trace!("Record of {} lines has no END:VCARD", current.len());
                chunks.push(current.join("\n"));
                current.clear();
            } else if !orphan.is_empty() {
                trace!("Dropping {} lines outside any record", orphan.len());
                orphan.clear();
            }
            current.push(line);
        } else if marker == "END:VCARD" {
            if current.is_empty() {
                orphan.push(line);
                chunks.push(orphan.join("\n"));
                orphan.clear();
                continue;
            }
            current.push(line);
            chunks.push(current.join("\n"));
            current.clear();
        } else if !current.is_empty() {
            current.push(line);
        } else if !line.trim().is_empty() {
            orphan.push(line);
        }
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }

    chunks
}

/// Join folded continuation lines (leading space or tab) onto their logical line.
pub fn unfold_lines(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for physical in raw.split('\n') {
        let physical = physical.strip_suffix('\r').unwrap_or(physical);
        if let Some(rest) = physical
            .strip_prefix(' ')
            .or_else(|| physical.strip_prefix('\t'))
        {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(physical.to_string());
    }
    lines
}

/// Parse one record, stamping it with the current time.
pub fn ingest(raw_text: &str, source_id: &SourceId) -> Result<Record, ParseError> {
    ingest_at(raw_text, source_id, Utc::now())
}

/// Parse one record with an explicit import timestamp.
pub fn ingest_at(
    raw_text: &str,
    source_id: &SourceId,
    import_timestamp: DateTime<Utc>,
) -> Result<Record, ParseError> {
    let lines: Vec<(usize, String)> = unfold_lines(raw_text)
        .into_iter()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| (i + 1, l))
        .collect();

    let (first, last) = match (lines.first(), lines.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ParseError::Empty),
    };
    if !first.1.trim().eq_ignore_ascii_case("BEGIN:VCARD") {
        return Err(ParseError::MissingBegin);
    }
    if lines.len() < 2 || !last.1.trim().eq_ignore_ascii_case("END:VCARD") {
        return Err(ParseError::MissingEnd);
    }

    let body = &lines[1..lines.len() - 1];
    let mut properties = Vec::with_capacity(body.len());
    for (line_no, line) in body {
        let property = parse_line(line, *line_no)?;
        if property.name == "BEGIN" || property.name == "END" {
            return Err(ParseError::MalformedLine {
                line: *line_no,
                reason: "nested records are not supported".to_string(),
            });
        }
        properties.push(property);
    }

    // A UID names the record within its source; otherwise the content does.
    let local = properties
        .iter()
        .find(|p| p.kind() == FieldKind::Uid)
        .map(|p| p.text_value().trim().to_string())
        .filter(|uid| !uid.is_empty())
        .unwrap_or_else(|| {
            let fingerprint = hasher::fingerprint_strs(body.iter().map(|(_, l)| l.as_str()));
            format!("{:016x}", fingerprint)
        });
    let id = RecordId::for_source(source_id, &local);
    trace!("Parsed record {} with {} properties", id, properties.len());

    Ok(Record::new(
        id,
        source_id.clone(),
        import_timestamp,
        properties,
    ))
}

/// Parse a single unfolded content line: `[group.]NAME[;param...]:value`.
pub fn parse_line(line: &str, line_no: usize) -> Result<Property, ParseError> {
    let malformed = |reason: &str| ParseError::MalformedLine {
        line: line_no,
        reason: reason.to_string(),
    };

    let colon = find_unquoted(line, ':').ok_or_else(|| malformed("missing ':' separator"))?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut segments = split_unquoted(head, ';').into_iter();
    let qualified = segments.next().unwrap_or_default();
    let (group, name) = match qualified.rsplit_once('.') {
        Some((group, name)) => (Some(group.to_string()), name.to_string()),
        None => (None, qualified),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(malformed("invalid property name"));
    }

    let mut property = Property::new(&name, value);
    property.group = group.filter(|g| !g.is_empty());

    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        let param = match segment.split_once('=') {
            Some((key, values)) => Param {
                name: key.trim().to_ascii_uppercase(),
                values: split_unquoted(values, ',')
                    .into_iter()
                    .map(|v| v.trim().trim_matches('"').to_string())
                    .collect(),
            },
            // vCard 2.1 bare parameters such as `TEL;CELL;HOME:`
            None => Param {
                name: "TYPE".to_string(),
                values: vec![segment.trim().to_string()],
            },
        };
        match property
            .params
            .iter_mut()
            .find(|p| p.name == param.name)
        {
            Some(existing) => existing.values.extend(param.values),
            None => property.params.push(param),
        }
    }

    Ok(property)
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_unquoted(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c == sep && !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOHN: &str = "BEGIN:VCARD\r\nVERSION:3.0\r\nFN:John Smith\r\nN:Smith;John;;;\r\n\
        item1.EMAIL;TYPE=INTERNET,WORK:john@email.com\r\nTEL;CELL:555-123-4567\r\n\
        NOTE:first line\\nsecond\r\n  continued\r\nEND:VCARD\r\n";

    #[test]
    fn test_ingest_parses_properties() {
        let record = ingest(JOHN, &SourceId::new("phone")).unwrap();
        assert_eq!(record.formatted_name().as_deref(), Some("John Smith"));
        assert_eq!(record.emails(), vec!["john@email.com".to_string()]);

        let email = record.first(FieldKind::Email).unwrap();
        assert_eq!(email.group.as_deref(), Some("item1"));
        assert_eq!(email.type_values(), vec!["INTERNET".to_string(), "WORK".to_string()]);

        let tel = record.first(FieldKind::Phone).unwrap();
        assert_eq!(tel.type_values(), vec!["CELL".to_string()]);
    }

    #[test]
    fn test_ingest_unfolds_continuation_lines() {
        let record = ingest(JOHN, &SourceId::new("phone")).unwrap();
        assert_eq!(record.notes(), vec!["first line\nsecond continued".to_string()]);
    }

    #[test]
    fn test_ingest_rejects_missing_markers() {
        let source = SourceId::new("s");
        assert_eq!(
            ingest("VERSION:3.0\nFN:A\nEND:VCARD", &source),
            Err(ParseError::MissingBegin)
        );
        assert_eq!(
            ingest("BEGIN:VCARD\nVERSION:3.0\nFN:A", &source),
            Err(ParseError::MissingEnd)
        );
        assert_eq!(ingest("  \n", &source), Err(ParseError::Empty));
    }

    #[test]
    fn test_ingest_rejects_line_without_colon() {
        let err = ingest("BEGIN:VCARD\nFN John\nEND:VCARD", &SourceId::new("s")).unwrap_err();
        assert!(matches!(err, ParseError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn test_record_id_is_content_derived() {
        let source = SourceId::new("phone");
        let a = ingest(JOHN, &source).unwrap();
        let b = ingest(&JOHN.replace("\r\n", "\n"), &source).unwrap();
        assert_eq!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("phone/"));
    }

    #[test]
    fn test_record_id_prefers_uid() {
        let source = SourceId::new("gmail");
        let card = "BEGIN:VCARD\nVERSION:3.0\nUID: 4f2a-99 \nFN:A B\nEND:VCARD";
        let a = ingest(card, &source).unwrap();
        let b = ingest(&card.replace("FN:A B", "FN:A C"), &source).unwrap();
        assert_eq!(a.id().as_str(), "gmail/4f2a-99");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_quoted_param_value_keeps_colon() {
        let prop = parse_line("PHOTO;VALUE=uri;X-LABEL=\"a:b\":http://x/y.png", 1).unwrap();
        assert_eq!(prop.value, "http://x/y.png");
        assert_eq!(prop.param("X-LABEL").unwrap().values, vec!["a:b".to_string()]);
    }

    #[test]
    fn test_split_export_keeps_broken_chunks() {
        let text = "junk\nBEGIN:VCARD\nFN:A\nEND:VCARD\n\nFN:B\nEND:VCARD\nBEGIN:VCARD\nFN:C\n";
        let chunks = split_export(text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("BEGIN:VCARD"));
        assert!(chunks[1].starts_with("FN:B"));
        assert!(chunks[2].ends_with("FN:C"));
    }

    #[test]
    fn test_truncated_record_does_not_swallow_following_records() {
        let text = "BEGIN:VCARD\nVERSION:3.0\nFN:Cut Off\n\
            BEGIN:VCARD\nVERSION:3.0\nFN:Ann Lee\nEND:VCARD\n\
            BEGIN:VCARD\nVERSION:3.0\nFN:Bo Chan\nEND:VCARD\n";
        let source = SourceId::new("phone");
        let chunks = split_export(text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(ingest(&chunks[0], &source), Err(ParseError::MissingEnd));

        let names: Vec<String> = chunks[1..]
            .iter()
            .map(|c| ingest(c, &source).unwrap().formatted_name().unwrap())
            .collect();
        assert_eq!(names, vec!["Ann Lee".to_string(), "Bo Chan".to_string()]);
    }
}
