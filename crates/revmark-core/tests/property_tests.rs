//! Property tests: accept/reject round trips and self-comparison on
//! generated paragraphs.

use proptest::prelude::*;
use revmark_core::{
    accept_revisions, compare, document_text, get_revisions, parse, reject_revisions,
    ComparerSettings, XmlDocument,
};

const W_DECL: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;
const WORDS: &[&str] = &["alpha", "beta", "gamma", "delta", "fox", "the"];

fn paragraph() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS), 1..6).prop_map(|words| words.join(" "))
}

fn paragraphs() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(paragraph(), 1..4)
}

fn doc(paragraphs: &[String]) -> XmlDocument {
    let body: String = paragraphs
        .iter()
        .map(|p| format!(r#"<w:p><w:r><w:t xml:space="preserve">{p}</w:t></w:r></w:p>"#))
        .collect();
    parse(&format!(r#"<w:document {W_DECL}><w:body>{body}</w:body></w:document>"#)).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn accept_and_reject_recover_the_inputs(a in paragraphs(), b in paragraphs()) {
        let (a, b) = (doc(&a), doc(&b));
        let out = compare(&a, &b, &ComparerSettings::default()).unwrap();
        prop_assert_eq!(
            document_text(&accept_revisions(&out).unwrap()).unwrap(),
            document_text(&b).unwrap()
        );
        prop_assert_eq!(
            document_text(&reject_revisions(&out).unwrap()).unwrap(),
            document_text(&a).unwrap()
        );
    }

    #[test]
    fn self_comparison_is_clean(a in paragraphs()) {
        let settings = ComparerSettings::default();
        let a = doc(&a);
        let out = compare(&a, &a, &settings).unwrap();
        prop_assert!(get_revisions(&out, &settings).unwrap().is_empty());
    }
}
