//! Two-document comparison.

use super::atom_list::atomize_document;
use super::coalesce::{synthesize, MergedAtom, MergedPart, MergedStatus, Synthesis};
use super::comparison_unit::{AtomizedPart, ComparisonAtom, ElementSnapshot};
use super::document::prepare;
use super::edit_script::{EditOp, EditScript};
use super::lcs_algorithm::correlate;
use super::revision::Attribution;
use super::settings::ComparerSettings;
use crate::error::{Result, RevmarkError};
use crate::xml::arena::XmlDocument;
use std::sync::Arc;
use tracing::{debug, info_span};

/// Document index of the original in atom identities.
pub(crate) const ORIGINAL: u32 = 0;
/// Document index of the revised document in a two-way comparison.
pub(crate) const REVISED: u32 = 1;

/// Compares `original` with `revised` and returns the revised document
/// carrying tracked changes that take it back to `original` on reject.
///
/// Revision markers already present in either input are accepted first.
pub fn compare(
    original: &XmlDocument,
    revised: &XmlDocument,
    settings: &ComparerSettings,
) -> Result<XmlDocument> {
    let _span = info_span!("compare").entered();
    settings.validate()?;

    let original = prepare(original)?;
    let revised = prepare(revised)?;
    let a = atomize_document(&original, ORIGINAL, settings)?;
    let b = atomize_document(&revised, REVISED, settings)?;

    let script = correlate(&a, &b, settings)?;
    let (equal, inserted, deleted, moved) = script.summary();
    debug!(equal, inserted, deleted, moved, "correlated documents");

    let body = merge_script(&a, &b, &script, 0, settings.track_formatting_changes)?;
    synthesize(&Synthesis {
        base: &revised,
        base_doc: REVISED,
        body,
        translate: script.container_map.clone(),
        attributions: vec![Attribution::from_settings(settings)],
        consolidation: false,
    })
}

/// Lays an edit script out as one merged sequence over the revised side.
///
/// Equal atoms come from `b`; when formatting tracking is on and the
/// formatting of the pair differs, the `a` side is kept as the previous
/// formatting.
pub(crate) fn merge_script<'a>(
    a: &'a AtomizedPart,
    b: &'a AtomizedPart,
    script: &EditScript,
    author: usize,
    track_formatting: bool,
) -> Result<MergedPart<'a>> {
    let mut atoms = Vec::with_capacity(script.ops.len());
    for op in &script.ops {
        let merged = match *op {
            EditOp::Equal { a: ia, b: ib } => {
                let (old, new) = (atom_at(a, ia)?, atom_at(b, ib)?);
                let nested = match script.nested.get(&ia) {
                    Some(scripts) => a
                        .nested_parts(ia)
                        .iter()
                        .zip(b.nested_parts(ib))
                        .zip(scripts)
                        .map(|((x, y), s)| merge_script(x, y, s, author, track_formatting))
                        .collect::<Result<Vec<_>>>()?,
                    None => whole_nested(b, ib, MergedStatus::Equal, author),
                };
                MergedAtom {
                    previous: track_formatting
                        .then(|| previous_formatting(old, new))
                        .flatten(),
                    nested,
                    ..MergedAtom::new(new, MergedStatus::Equal, author)
                }
            }
            EditOp::Insert { b: ib } => MergedAtom {
                nested: whole_nested(b, ib, MergedStatus::Inserted, author),
                ..MergedAtom::new(atom_at(b, ib)?, MergedStatus::Inserted, author)
            },
            EditOp::Delete { a: ia } => MergedAtom {
                nested: whole_nested(a, ia, MergedStatus::Deleted, author),
                ..MergedAtom::new(atom_at(a, ia)?, MergedStatus::Deleted, author)
            },
            EditOp::MoveFrom { a: ia, id } => MergedAtom {
                move_id: Some(id),
                nested: whole_nested(a, ia, MergedStatus::Deleted, author),
                ..MergedAtom::new(atom_at(a, ia)?, MergedStatus::MovedFrom, author)
            },
            EditOp::MoveTo { b: ib, id } => MergedAtom {
                move_id: Some(id),
                nested: whole_nested(b, ib, MergedStatus::Inserted, author),
                ..MergedAtom::new(atom_at(b, ib)?, MergedStatus::MovedTo, author)
            },
        };
        atoms.push(merged);
    }
    Ok(MergedPart {
        key: b.key.clone(),
        root: b.root.clone(),
        atoms,
    })
}

fn atom_at(part: &AtomizedPart, index: usize) -> Result<&ComparisonAtom> {
    part.atoms.get(index).ok_or_else(|| {
        RevmarkError::InternalInconsistency(format!(
            "edit script refers to atom {index} of {}",
            part.atoms.len()
        ))
    })
}

pub(crate) fn whole_nested(
    part: &AtomizedPart,
    owner: usize,
    status: MergedStatus,
    author: usize,
) -> Vec<MergedPart<'_>> {
    part.nested_parts(owner)
        .iter()
        .map(|p| MergedPart::whole(p, status, author))
        .collect()
}

/// The element holding the old formatting of an equal pair, when it
/// differs: the paragraph for marks, the run otherwise.
pub(crate) fn previous_formatting(
    old: &ComparisonAtom,
    new: &ComparisonAtom,
) -> Option<Arc<ElementSnapshot>> {
    if old.format_key() == new.format_key() {
        return None;
    }
    if old.is_paragraph_mark() {
        old.paragraph().cloned()
    } else {
        old.run().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wml::document::document_text;
    use crate::wml::revision_accepter::{accept_revisions, reject_revisions};
    use crate::xml::builder::serialize;
    use crate::xml::parser::parse;

    const W_DECL: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn doc(body: &str) -> XmlDocument {
        parse(&format!(r#"<w:document {W_DECL}><w:body>{body}</w:body></w:document>"#)).unwrap()
    }

    fn para(text: &str) -> String {
        format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    #[test]
    fn inserted_word_is_wrapped_in_ins() {
        let a = doc(&para("The quick fox"));
        let b = doc(&para("The quick brown fox"));
        let out = serialize(&compare(&a, &b, &ComparerSettings::default()).unwrap()).unwrap();
        assert!(
            out.contains(r#"<w:ins w:id="1" w:author="revmark"><w:r><w:t xml:space="preserve">brown </w:t></w:r></w:ins>"#),
            "{out}"
        );
        assert!(!out.contains("<w:del "));
    }

    #[test]
    fn accept_and_reject_restore_each_side() {
        let a = doc(&(para("alpha beta gamma") + &para("second paragraph")));
        let b = doc(&(para("alpha delta gamma") + &para("new one") + &para("second paragraph")));
        let out = compare(&a, &b, &ComparerSettings::default()).unwrap();
        assert_eq!(
            document_text(&accept_revisions(&out).unwrap()).unwrap(),
            document_text(&b).unwrap()
        );
        assert_eq!(
            document_text(&reject_revisions(&out).unwrap()).unwrap(),
            document_text(&a).unwrap()
        );
    }

    #[test]
    fn formatting_change_becomes_rpr_change() {
        let a = doc(r#"<w:p><w:r><w:t>bold</w:t></w:r></w:p>"#);
        let b = doc(r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>bold</w:t></w:r></w:p>"#);
        let out = serialize(&compare(&a, &b, &ComparerSettings::default()).unwrap()).unwrap();
        assert!(
            out.contains(r#"<w:rPr><w:b/><w:rPrChange w:id="1" w:author="revmark"><w:rPr/></w:rPrChange></w:rPr>"#),
            "{out}"
        );

        let quiet = ComparerSettings::default().with_track_formatting(false);
        let out = serialize(&compare(&a, &b, &quiet).unwrap()).unwrap();
        assert!(!out.contains("rPrChange"));
    }

    #[test]
    fn paragraph_property_change_becomes_ppr_change() {
        let a = doc(r#"<w:p><w:r><w:t>x</w:t></w:r></w:p>"#);
        let b = doc(r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:t>x</w:t></w:r></w:p>"#);
        let out = serialize(&compare(&a, &b, &ComparerSettings::default()).unwrap()).unwrap();
        assert!(
            out.contains(r#"<w:pPr><w:jc w:val="center"/><w:pPrChange w:id="1" w:author="revmark"><w:pPr/></w:pPrChange></w:pPr>"#),
            "{out}"
        );
    }

    #[test]
    fn configured_date_is_written() {
        let a = doc(&para("one"));
        let b = doc(&para("one two"));
        let settings = ComparerSettings::default()
            .with_author("Reviewer")
            .with_date_time("2024-01-02T03:04:05Z");
        let out = serialize(&compare(&a, &b, &settings).unwrap()).unwrap();
        assert!(out.contains(r#"w:author="Reviewer" w:date="2024-01-02T03:04:05Z""#));
    }

    #[test]
    fn invalid_settings_are_rejected_before_work() {
        let a = doc(&para("one"));
        let settings = ComparerSettings::default().with_similarity_threshold(1.5);
        assert!(matches!(
            compare(&a, &a, &settings),
            Err(RevmarkError::InvalidSettings { .. })
        ));
    }
}
