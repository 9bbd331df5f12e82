use std::collections::BTreeSet;

use vcard_unify_core::audit::AuditLedger;
use vcard_unify_core::config::{DistinctIdentity, Distinguisher, SourceConfig, SourceKind};
use vcard_unify_core::model::Bucket;
use vcard_unify_core::normalize::normalize_email;
use vcard_unify_core::{
    build_candidates, fix_record, group, ingest, merge, AppConfig, Record, SourceId, UnifyEngine,
};

fn card(source: &str, body: &str) -> Record {
    let record = ingest(
        &format!("BEGIN:VCARD\nVERSION:3.0\n{}\nEND:VCARD", body),
        &SourceId::new(source),
    )
    .unwrap();
    fix_record(&record).unwrap().record
}

fn engine() -> UnifyEngine {
    let sources = ["phone", "gmail", "linkedin"]
        .iter()
        .enumerate()
        .map(|(i, id)| SourceConfig {
            id: id.to_string(),
            label: None,
            kind: [SourceKind::Curated, SourceKind::Maintained, SourceKind::AutoCaptured][i],
            paths: vec![format!("/exports/{}", id)],
        })
        .collect();
    UnifyEngine::new(AppConfig {
        sources,
        ..AppConfig::default()
    })
}

fn fixture() -> Vec<Record> {
    vec![
        card("phone", "FN:John Smith\nN:Smith;John;;;\nEMAIL:john@email.com\nORG:Apple Inc."),
        card("gmail", "FN:John Smith\nEMAIL:john@email.com\nTEL:+1 555 123 4567"),
        card("linkedin", "FN:Johnny Smith\nTEL:(555) 123-4567\nTITLE:Engineer"),
        card("phone", "FN:Jane Doe\nN:Doe;Jane;;;\nEMAIL:jane@email.com\nORG:Microsoft"),
        card("gmail", "FN:Jane Doe\nN:Doe;Jane;;;\nEMAIL:jane@email.com\nORG:Google\nBDAY:1990-01-01"),
        card("phone", "FN:Christian Pichler\nORG:Acme GmbH\nEMAIL:cp@acme.at"),
        card("linkedin", "FN:Christian Pichler\nORG:Globex\nEMAIL:christian@globex.com"),
        card("gmail", "FN:Maria Garcia\nADR:;;1 Main St;Vienna;;1010;AT"),
        card("linkedin", "FN:Maria Garcia\nADR;TYPE=WORK:;;Ring 2;Vienna;;1010;AT\nURL:https://example.at"),
    ]
}

#[test]
fn test_grouping_and_merge_are_invariant_under_permutation() {
    let engine = engine();
    let records = fixture();
    let forward = engine.resolve_records(&records, None).unwrap();

    let mut reversed = records.clone();
    reversed.reverse();
    let mut rotated = records.clone();
    rotated.rotate_left(4);

    for permuted in [reversed, rotated] {
        let other = engine.resolve_records(&permuted, None).unwrap();
        assert_eq!(other.fingerprint(), forward.fingerprint());
        assert_eq!(other.outcome.auto_merge, forward.outcome.auto_merge);
        assert_eq!(other.review_queue, forward.review_queue);
    }
}

#[test]
fn test_additive_values_are_conserved() {
    let engine = engine();
    let records = fixture();
    let resolution = engine.resolve_records(&records, None).unwrap();

    let input_emails: BTreeSet<String> = records
        .iter()
        .flat_map(|r| r.emails())
        .map(|e| normalize_email(&e).unwrap())
        .collect();
    let output_emails: BTreeSet<String> = resolution
        .contacts
        .iter()
        .flat_map(|c| c.retained_values("EMAIL").into_iter().map(str::to_string))
        .collect();
    assert_eq!(input_emails, output_emails);

    let input_records: usize = records.len();
    let output_records: usize = resolution
        .contacts
        .iter()
        .map(|c| c.contributing_record_ids.len())
        .sum();
    assert_eq!(input_records, output_records);
}

#[test]
fn test_fixture_decisions() {
    let engine = engine();
    let resolution = engine.resolve_records(&fixture(), None).unwrap();

    // John (email) and Jane (email) auto-merge; Johnny's phone match only needs review.
    assert_eq!(resolution.outcome.auto_merge.len(), 2);
    assert!(resolution
        .outcome
        .auto_merge
        .iter()
        .all(|g| g.bucket == Bucket::AutoMerge && g.len() == 2));
    assert!(resolution
        .outcome
        .needs_review
        .iter()
        .any(|item| item.candidate.factors.contains("exact_phone")));

    let jane = resolution
        .contacts
        .iter()
        .find(|c| c.display_name() == "Jane Doe")
        .unwrap();
    let fields: Vec<&str> = jane.review_flags.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(fields, vec!["ORG"]);
    assert!(resolution
        .outcome
        .auto_merge
        .iter()
        .any(|g| g.id.as_str() == jane.id && g.contains(&jane.contributing_record_ids[1])));
    assert_eq!(jane.record.named("BDAY").count(), 1);

    let pichlers = resolution
        .contacts
        .iter()
        .filter(|c| c.display_name() == "Christian Pichler")
        .count();
    assert_eq!(pichlers, 2);
}

#[test]
fn test_merge_decisions_are_logged_with_inputs() {
    let engine = engine();
    let ledger = AuditLedger::new();
    let resolution = engine.resolve_records(&fixture(), Some(&ledger)).unwrap();

    assert_eq!(
        ledger.count(vcard_unify_core::AuditAction::Merge),
        resolution.outcome.auto_merge.len()
    );
    for group in &resolution.outcome.auto_merge {
        let inputs = ledger.merge_inputs(group.id.as_str()).unwrap();
        let ids: Vec<&str> = inputs.iter().map(|s| s.record_id.as_str()).collect();
        let members: Vec<&str> = group.members.iter().map(|m| m.as_str()).collect();
        assert_eq!(ids, members);
    }
}

#[test]
fn test_distinct_identity_override_keeps_namesakes_apart() {
    let a = card("phone", "FN:Alex Berger\nEMAIL:alex@shared.org\nORG:Acme");
    let b = card("gmail", "FN:Alex Berger\nEMAIL:alex@shared.org\nORG:Globex");

    let plain = build_candidates(&[a.clone(), b.clone()]);
    assert!(plain[0].score >= 95, "{}", plain[0].describe());

    let mut config = AppConfig::default();
    config.matching.distinct_identities = vec![DistinctIdentity {
        name: "Alex Berger".to_string(),
        distinguish_by: Distinguisher::Organization,
        values: vec!["Acme".to_string(), "Globex".to_string()],
    }];
    let overridden = vcard_unify_core::matching::build_candidates_with(
        &[a, b],
        &config.matching,
        &config.normalization.default_country_code,
    );
    assert_eq!(overridden.len(), 1);
    assert_eq!(overridden[0].score, 0);
    assert!(overridden[0].override_reason.is_some());

    let outcome = group(&overridden);
    assert!(outcome.auto_merge.is_empty());
    assert_eq!(outcome.kept_separate.len(), 1);
}

#[test]
fn test_merge_of_single_record_keeps_properties() {
    let record = card("phone", "FN:Ann Lee\nN:Lee;Ann;;;\nEMAIL:ann@acme.com\nNOTE:met at conf");
    let merged = merge(&[record.clone()]).unwrap();
    assert_eq!(merged.record.properties(), record.properties());
    assert_eq!(merged.contributing_record_ids, vec![record.id().clone()]);
}
