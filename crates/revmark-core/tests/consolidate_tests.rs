//! Consolidation integration tests

use pretty_assertions::assert_eq;
use revmark_core::{
    accept_revisions, compare, consolidate, document_text, get_revisions, parse, reject_revisions,
    serialize, ComparerSettings, RevisedDocument, RevisionKind, RevisionRecord, RevmarkError, Rgb,
    XmlDocument,
};

const W_DECL: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

const RED: Rgb = Rgb(0xFF, 0, 0);
const BLUE: Rgb = Rgb(0, 0, 0xFF);
const GREEN: Rgb = Rgb(0, 0x80, 0);

fn doc(paragraphs: &[&str]) -> XmlDocument {
    let body: String = paragraphs
        .iter()
        .map(|p| format!(r#"<w:p><w:r><w:t xml:space="preserve">{p}</w:t></w:r></w:p>"#))
        .collect();
    parse(&format!(r#"<w:document {W_DECL}><w:body>{body}</w:body></w:document>"#))
        .unwrap_or_else(|e| panic!("fixture does not parse: {e}"))
}

fn text(doc: &XmlDocument) -> String {
    document_text(doc).unwrap()
}

fn digest(records: &[RevisionRecord]) -> Vec<(RevisionKind, String, String)> {
    records
        .iter()
        .map(|r| (r.kind, r.author.clone(), r.text.clone()))
        .collect()
}

#[test]
fn two_reviewers_editing_one_sentence_are_both_visible() {
    let original = doc(&["The quick fox jumps."]);
    let reviewers = vec![
        RevisedDocument::new(doc(&["The quick brown fox jumps."]), "Ann", RED),
        RevisedDocument::new(doc(&["The quick fox jumps high."]), "Bob", BLUE),
    ];
    let settings = ComparerSettings::default();
    let out = consolidate(&original, &reviewers, &settings).unwrap();
    let records = get_revisions(&out, &settings).unwrap();

    assert_eq!(records.len(), 2, "{records:#?}");
    let ann = records.iter().find(|r| r.author == "Ann").expect("Ann's edit is kept");
    let bob = records.iter().find(|r| r.author == "Bob").expect("Bob's edit is kept");
    assert_eq!((ann.kind, ann.color), (RevisionKind::Insertion, Some(RED)));
    assert_eq!((bob.kind, bob.color), (RevisionKind::Insertion, Some(BLUE)));
    assert_eq!(ann.text, "brown ");
    assert!(bob.text.contains("high"), "{}", bob.text);

    assert_eq!(text(&accept_revisions(&out).unwrap()), "The quick brown fox jumps high.");
    assert_eq!(text(&reject_revisions(&out).unwrap()), "The quick fox jumps.");
}

#[test]
fn one_reviewer_consolidation_matches_compare() {
    let original = doc(&["alpha beta gamma", "second paragraph"]);
    let revised = doc(&["alpha delta gamma", "new one", "second paragraph"]);
    let settings = ComparerSettings::default().with_author("Ann");

    let consolidated = consolidate(
        &original,
        &[RevisedDocument::new(revised.clone(), "Ann", GREEN)],
        &settings,
    )
    .unwrap();
    let compared = compare(&original, &revised, &settings).unwrap();

    let from_consolidation = get_revisions(&consolidated, &settings).unwrap();
    let from_compare = get_revisions(&compared, &settings).unwrap();
    assert_eq!(digest(&from_consolidation), digest(&from_compare));
    assert!(from_consolidation.iter().all(|r| r.color == Some(GREEN)));
    assert!(from_compare.iter().all(|r| r.color.is_none()));
}

#[test]
fn reviewers_deleting_different_paragraphs() {
    let original = doc(&["one", "two", "three", "four"]);
    let reviewers = vec![
        RevisedDocument::new(doc(&["one", "three", "four"]), "Ann", RED),
        RevisedDocument::new(doc(&["one", "two", "three"]), "Bob", BLUE),
    ];
    let settings = ComparerSettings::default();
    let out = consolidate(&original, &reviewers, &settings).unwrap();

    let records = get_revisions(&out, &settings).unwrap();
    assert_eq!(
        digest(&records),
        vec![
            (RevisionKind::Deletion, "Ann".to_string(), "two\n".to_string()),
            (RevisionKind::Deletion, "Bob".to_string(), "four\n".to_string()),
        ]
    );
    assert_eq!(text(&accept_revisions(&out).unwrap()), "one\nthree");
    assert_eq!(text(&reject_revisions(&out).unwrap()), "one\ntwo\nthree\nfour");
}

#[test]
fn moves_by_two_reviewers_get_distinct_names() {
    let original = doc(&["alpha beta gamma delta", "x", "epsilon zeta eta theta", "y"]);
    let reviewers = vec![
        RevisedDocument::new(doc(&["x", "epsilon zeta eta theta", "y", "alpha beta gamma delta"]), "Ann", RED),
        RevisedDocument::new(doc(&["epsilon zeta eta theta", "alpha beta gamma delta", "x", "y"]), "Bob", BLUE),
    ];
    let settings = ComparerSettings::default().with_detect_moves(true);
    let out = consolidate(&original, &reviewers, &settings).unwrap();
    let xml = serialize(&out).unwrap();

    let range = regex::Regex::new(r#"<w:(moveFrom|moveTo)RangeStart [^>]*w:name="(move[0-9]+)""#).unwrap();
    let mut sources = std::collections::BTreeSet::new();
    let mut targets = std::collections::BTreeSet::new();
    for found in range.captures_iter(&xml) {
        let name = found[2].to_string();
        if &found[1] == "moveFrom" {
            sources.insert(name);
        } else {
            targets.insert(name);
        }
    }
    assert_eq!(sources.len(), 2, "{xml}");
    assert_eq!(sources, targets, "every move source has its target");

    let records = get_revisions(&out, &settings).unwrap();
    let movers: Vec<&str> = records
        .iter()
        .filter(|r| r.kind == RevisionKind::Move)
        .map(|r| r.author.as_str())
        .collect();
    assert!(movers.contains(&"Ann") && movers.contains(&"Bob"), "{records:#?}");

    assert_eq!(text(&reject_revisions(&out).unwrap()), text(&original));
    assert_eq!(
        text(&accept_revisions(&out).unwrap()),
        "epsilon zeta eta theta\nx\ny\nalpha beta gamma delta"
    );
}

#[test]
fn shared_deletion_is_reported_for_each_reviewer() {
    let original = doc(&["keep", "drop this", "end"]);
    let reviewers = vec![
        RevisedDocument::new(doc(&["keep", "end"]), "Ann", RED),
        RevisedDocument::new(doc(&["keep", "end"]), "Bob", BLUE),
    ];
    let settings = ComparerSettings::default();
    let out = consolidate(&original, &reviewers, &settings).unwrap();
    let records = get_revisions(&out, &settings).unwrap();

    let deletions: Vec<(&str, Option<Rgb>)> = records
        .iter()
        .filter(|r| r.kind == RevisionKind::Deletion)
        .map(|r| (r.author.as_str(), r.color))
        .collect();
    assert_eq!(deletions, vec![("Ann", Some(RED)), ("Bob", Some(BLUE))], "{records:#?}");
    assert_eq!(text(&accept_revisions(&out).unwrap()), "keep\nend");
    assert_eq!(text(&reject_revisions(&out).unwrap()), "keep\ndrop this\nend");
}

#[test]
fn unchanged_reviewers_produce_no_revisions() {
    let original = doc(&["same", "text"]);
    let reviewers = vec![
        RevisedDocument::new(original.clone(), "Ann", RED),
        RevisedDocument::new(original.clone(), "Bob", BLUE),
    ];
    let settings = ComparerSettings::default();
    let out = consolidate(&original, &reviewers, &settings).unwrap();
    assert!(get_revisions(&out, &settings).unwrap().is_empty());
    assert_eq!(text(&out), "same\ntext");
}

#[test]
fn consolidation_is_deterministic() {
    let original = doc(&["a b c d", "e f g"]);
    let reviewers: Vec<RevisedDocument> = (0..4)
        .map(|i| {
            RevisedDocument::new(
                doc(&[&format!("a b{i} c d"), "e f g"]),
                format!("R{i}"),
                Rgb(i * 40, 0, 0),
            )
        })
        .collect();
    let settings = ComparerSettings::default();
    let first = serialize(&consolidate(&original, &reviewers, &settings).unwrap()).unwrap();
    let second = serialize(&consolidate(&original, &reviewers, &settings).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn malformed_reviewer_copy_fails_the_call() {
    let original = doc(&["x"]);
    let broken = parse(&format!(
        r#"<w:document {W_DECL}><w:body><w:tbl><w:tr/></w:tbl></w:body></w:document>"#
    ))
    .unwrap();
    let reviewers = vec![
        RevisedDocument::new(doc(&["x y"]), "Ann", RED),
        RevisedDocument::new(broken, "Bob", BLUE),
    ];
    assert!(matches!(
        consolidate(&original, &reviewers, &ComparerSettings::default()),
        Err(RevmarkError::MalformedInput { .. })
    ));
}
