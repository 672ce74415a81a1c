//! Formatting normalization for format-change detection and canonical
//! markup hashing.
//!
//! Run and paragraph properties are compared in a normalized form: tracking
//! markers and revision-save ids are dropped and property children are
//! ordered by name, so two properties blocks that only differ in element
//! order or rsid bookkeeping compare equal.

use crate::hash::sha1::sha1_hash_string;
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::{W, W14, XMLNS};
use crate::xml::node::XmlNodeData;
use crate::xml::xname::XName;
use indextree::NodeId;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Children of `w:rPr` that record tracking state rather than formatting.
static RPR_TRACKING_CHILDREN: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["ins", "del", "moveFrom", "moveTo", "rPrChange"]
        .into_iter()
        .collect()
});

/// Children of `w:pPr` excluded from paragraph-property comparison.
static PPR_EXCLUDED_CHILDREN: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["rPr", "sectPr", "pPrChange"].into_iter().collect());

/// Schema sequence of `w:rPr` children.
static ORDER_R_PR: Lazy<HashMap<XName, usize>> = Lazy::new(|| {
    let w = [
        "rStyle", "rFonts", "b", "bCs", "i", "iCs", "caps", "smallCaps", "strike", "dstrike",
        "outline", "shadow", "emboss", "imprint", "noProof", "snapToGrid", "vanish", "webHidden",
        "color", "spacing", "w", "kern", "position", "sz",
    ];
    let w14 = ["shadow", "textOutline", "textFill", "scene3d", "props3d"];
    let tail = [
        "szCs", "highlight", "u", "effect", "bdr", "shd", "fitText", "vertAlign", "rtl", "cs",
        "em", "lang", "eastAsianLayout", "specVanish", "oMath",
    ];
    w.iter()
        .map(|l| XName::new(W::NS, l))
        .chain(w14.iter().map(|l| XName::new(W14::NS, l)))
        .chain(tail.iter().map(|l| XName::new(W::NS, l)))
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect()
});

/// Schema sequence of `w:pPr` children.
static ORDER_P_PR: Lazy<HashMap<XName, usize>> = Lazy::new(|| {
    [
        "pStyle", "keepNext", "keepLines", "pageBreakBefore", "framePr", "widowControl", "numPr",
        "suppressLineNumbers", "pBdr", "shd", "tabs", "suppressAutoHyphens", "kinsoku",
        "wordWrap", "overflowPunct", "topLinePunct", "autoSpaceDE", "autoSpaceDN", "bidi",
        "adjustRightInd", "snapToGrid", "spacing", "ind", "contextualSpacing", "mirrorIndents",
        "suppressOverlap", "jc", "textDirection", "textAlignment", "textboxTightWrap",
        "outlineLvl", "divId", "cnfStyle", "rPr", "sectPr", "pPrChange",
    ]
    .iter()
    .enumerate()
    .map(|(i, l)| (XName::new(W::NS, l), i))
    .collect()
});

fn is_bookkeeping_attribute(name: &XName) -> bool {
    name.namespace.as_deref() == Some(XMLNS)
        || (name.namespace.is_none() && name.local_name == "xmlns")
        || name.local_name.to_ascii_lowercase().starts_with("rsid")
}

/// Canonical text form of a subtree: expanded names, attributes sorted by
/// name without namespace declarations or rsids, text verbatim.
pub fn canonical_string(doc: &XmlDocument, node: NodeId) -> String {
    let mut out = String::new();
    write_canonical(doc, node, &|_| false, &mut out);
    out
}

/// Like [`canonical_string`] but drops the children of any element for which
/// `skip_content` returns true (the element itself is kept).
pub fn canonical_string_skipping(
    doc: &XmlDocument,
    node: NodeId,
    skip_content: &dyn Fn(&XName) -> bool,
) -> String {
    let mut out = String::new();
    write_canonical(doc, node, skip_content, &mut out);
    out
}

fn write_canonical(
    doc: &XmlDocument,
    node: NodeId,
    skip_content: &dyn Fn(&XName) -> bool,
    out: &mut String,
) {
    match doc.get(node) {
        Some(XmlNodeData::Element { name, attributes }) => {
            out.push('<');
            out.push_str(&name.to_string());
            let mut attrs: Vec<_> = attributes
                .iter()
                .filter(|a| !is_bookkeeping_attribute(&a.name))
                .collect();
            attrs.sort_by(|a, b| a.name.cmp(&b.name));
            for attr in attrs {
                out.push(' ');
                out.push_str(&attr.name.to_string());
                out.push('=');
                out.push_str(&attr.value);
            }
            out.push('>');
            if !skip_content(name) {
                for child in doc.children(node) {
                    write_canonical(doc, child, skip_content, out);
                }
            }
            out.push_str("</>");
        }
        Some(XmlNodeData::Text(text)) | Some(XmlNodeData::CData(text)) => out.push_str(text),
        _ => {}
    }
}

fn normalized_children(
    fragment: &XmlDocument,
    excluded: &HashSet<&'static str>,
) -> Vec<String> {
    let Some(root) = fragment.root() else {
        return Vec::new();
    };
    let mut children: Vec<String> = fragment
        .element_children(root)
        .filter(|&c| {
            fragment
                .name(c)
                .map(|n| !(n.in_namespace(W::NS) && excluded.contains(n.local_name.as_str())))
                .unwrap_or(false)
        })
        .map(|c| canonical_string(fragment, c))
        .collect();
    children.sort();
    children
}

fn hash_children(children: Vec<String>) -> String {
    if children.is_empty() {
        return String::new();
    }
    sha1_hash_string(&children.join("|"))
}

/// Formatting identity of a `w:rPr` fragment. Empty when there is nothing
/// but tracking markup, so a missing `w:rPr` and an empty one compare equal.
pub fn run_properties_hash(rpr: Option<&XmlDocument>) -> String {
    rpr.map(|f| hash_children(normalized_children(f, &RPR_TRACKING_CHILDREN)))
        .unwrap_or_default()
}

/// Paragraph-property identity of a `w:pPr` fragment, ignoring the mark's
/// run properties, section properties and any recorded previous state.
pub fn paragraph_properties_hash(ppr: Option<&XmlDocument>) -> String {
    ppr.map(|f| hash_children(normalized_children(f, &PPR_EXCLUDED_CHILDREN)))
        .unwrap_or_default()
}

/// Canonical form of the `w:numPr` child of a `w:pPr` fragment.
pub fn numbering_signature(ppr: Option<&XmlDocument>) -> String {
    let Some(fragment) = ppr else {
        return String::new();
    };
    let Some(root) = fragment.root() else {
        return String::new();
    };
    fragment
        .first_child_named(root, W::NS, "numPr")
        .map(|n| canonical_string(fragment, n))
        .unwrap_or_default()
}

/// True when two paragraph-property fragments differ only in numbering.
pub fn only_numbering_differs(current: Option<&XmlDocument>, previous: Option<&XmlDocument>) -> bool {
    if numbering_signature(current) == numbering_signature(previous) {
        return false;
    }
    let mut excluded: HashSet<&'static str> = PPR_EXCLUDED_CHILDREN.clone();
    excluded.insert("numPr");
    let strip = |f: Option<&XmlDocument>| {
        f.map(|f| normalized_children(f, &excluded)).unwrap_or_default()
    };
    strip(current) == strip(previous)
}

/// Copies the element children of a properties fragment except those in
/// `excluded`, appending them below `parent`.
pub fn copy_property_children(
    target: &mut XmlDocument,
    parent: NodeId,
    fragment: &XmlDocument,
    excluded: &[&str],
) {
    let Some(root) = fragment.root() else { return };
    for child in fragment.element_children(root) {
        let skip = fragment
            .name(child)
            .is_some_and(|n| n.in_namespace(W::NS) && excluded.contains(&n.local_name.as_str()));
        if !skip {
            target.import_node(fragment, child, Some(parent));
        }
    }
}

/// Applies several independent edits of one properties element to its
/// original state.
///
/// Each entry of `changed` is compared with `original` child by child: added
/// or altered children are taken over, children it dropped are removed.
/// Later entries win where edits touch the same child. The result is ordered
/// per schema, so `w:b` from one reviewer and `w:i` from another land in a
/// valid sequence. Tracking children are not carried.
pub fn merge_property_edits(original: Option<&XmlDocument>, changed: &[Option<&XmlDocument>]) -> XmlDocument {
    let template = changed
        .iter()
        .rev()
        .chain(std::iter::once(&original))
        .find_map(|f| fragment_root(*f));
    let is_paragraph = template.is_some_and(|(f, r)| f.is_named(r, W::NS, "pPr"));
    let (excluded, order) = if is_paragraph {
        (&*PPR_CHANGE_ONLY, &*ORDER_P_PR)
    } else {
        (&*RPR_TRACKING_CHILDREN, &*ORDER_R_PR)
    };
    let base = property_children(original, excluded);
    let mut merged = base.clone();
    for edit in changed {
        let edited = property_children(*edit, excluded);
        merged.retain(|(name, _, _)| {
            !base.iter().any(|(n, _, _)| n == name) || edited.iter().any(|(n, _, _)| n == name)
        });
        for (name, fragment, node) in edited {
            let before = base
                .iter()
                .find(|(n, _, _)| *n == name)
                .map(|(_, f, c)| canonical_string(f, *c));
            if before.as_deref() == Some(canonical_string(fragment, node).as_str()) {
                continue;
            }
            match merged.iter_mut().find(|(n, _, _)| *n == name) {
                Some(slot) => *slot = (name, fragment, node),
                None => merged.push((name, fragment, node)),
            }
        }
    }
    merged.sort_by_key(|(name, _, _)| order.get(name).copied().unwrap_or(usize::MAX));

    let mut out = XmlDocument::new();
    let root_data = template
        .and_then(|(f, r)| f.get(r).cloned())
        .unwrap_or_else(|| XmlNodeData::element(W::rPr()));
    let root = out.add_root(root_data);
    for (_, fragment, node) in merged {
        out.import_node(fragment, node, Some(root));
    }
    out
}

fn fragment_root(fragment: Option<&XmlDocument>) -> Option<(&XmlDocument, NodeId)> {
    fragment.and_then(|f| f.root().map(|r| (f, r)))
}

fn property_children<'f>(
    fragment: Option<&'f XmlDocument>,
    excluded: &HashSet<&'static str>,
) -> Vec<(XName, &'f XmlDocument, NodeId)> {
    let Some((fragment, root)) = fragment_root(fragment) else {
        return Vec::new();
    };
    fragment
        .element_children(root)
        .filter_map(|c| {
            let name = fragment.name(c)?;
            let tracking = name.in_namespace(W::NS) && excluded.contains(name.local_name.as_str());
            (!tracking).then(|| (name.clone(), fragment, c))
        })
        .collect()
}

static PPR_CHANGE_ONLY: Lazy<HashSet<&'static str>> = Lazy::new(|| ["pPrChange"].into_iter().collect());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parser::parse;

    const W_DECL: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn fragment(xml: &str) -> XmlDocument {
        parse(&xml.replace("W_DECL", W_DECL)).unwrap()
    }

    #[test]
    fn property_order_and_rsids_do_not_matter() {
        let a = fragment(r#"<w:rPr W_DECL w:rsidR="00A1"><w:b/><w:i/></w:rPr>"#);
        let b = fragment(r#"<w:rPr W_DECL><w:i/><w:b/></w:rPr>"#);
        assert_eq!(run_properties_hash(Some(&a)), run_properties_hash(Some(&b)));
    }

    #[test]
    fn different_values_differ() {
        let a = fragment(r#"<w:rPr W_DECL><w:sz w:val="20"/></w:rPr>"#);
        let b = fragment(r#"<w:rPr W_DECL><w:sz w:val="24"/></w:rPr>"#);
        assert_ne!(run_properties_hash(Some(&a)), run_properties_hash(Some(&b)));
    }

    #[test]
    fn tracking_only_rpr_equals_missing_rpr() {
        let a = fragment(r#"<w:rPr W_DECL><w:ins w:id="1" w:author="x"/></w:rPr>"#);
        assert_eq!(run_properties_hash(Some(&a)), "");
        assert_eq!(run_properties_hash(None), "");
    }

    #[test]
    fn paragraph_hash_ignores_mark_run_properties() {
        let a = fragment(r#"<w:pPr W_DECL><w:jc w:val="center"/><w:rPr><w:b/></w:rPr></w:pPr>"#);
        let b = fragment(r#"<w:pPr W_DECL><w:jc w:val="center"/></w:pPr>"#);
        assert_eq!(paragraph_properties_hash(Some(&a)), paragraph_properties_hash(Some(&b)));
    }

    #[test]
    fn numbering_only_change_is_detected() {
        let a = fragment(r#"<w:pPr W_DECL><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr>"#);
        let b = fragment(r#"<w:pPr W_DECL><w:numPr><w:ilvl w:val="1"/><w:numId w:val="1"/></w:numPr></w:pPr>"#);
        let c = fragment(r#"<w:pPr W_DECL><w:jc w:val="right"/></w:pPr>"#);
        assert!(only_numbering_differs(Some(&a), Some(&b)));
        assert!(!only_numbering_differs(Some(&a), Some(&c)));
    }

    #[test]
    fn independent_run_edits_are_combined_in_schema_order() {
        let original = fragment(r#"<w:rPr W_DECL><w:sz w:val="20"/><w:u w:val="single"/></w:rPr>"#);
        let ann = fragment(r#"<w:rPr W_DECL><w:i/><w:sz w:val="20"/><w:u w:val="single"/></w:rPr>"#);
        let bob = fragment(r#"<w:rPr W_DECL><w:b/><w:sz w:val="28"/></w:rPr>"#);
        let merged = merge_property_edits(Some(&original), &[Some(&ann), Some(&bob)]);
        let root = merged.root().unwrap();
        let names: Vec<String> = merged
            .element_children(root)
            .map(|c| merged.name(c).unwrap().local_name.clone())
            .collect();
        assert_eq!(names, ["b", "i", "sz"]);
        let sz = merged.first_child_named(root, W::NS, "sz").unwrap();
        assert_eq!(merged.attribute(sz, &XName::new(W::NS, "val")), Some("28"));
    }

    #[test]
    fn paragraph_edits_keep_the_mark_properties() {
        let original = fragment(r#"<w:pPr W_DECL><w:rPr><w:b/></w:rPr></w:pPr>"#);
        let ann = fragment(r#"<w:pPr W_DECL><w:jc w:val="center"/><w:rPr><w:b/></w:rPr></w:pPr>"#);
        let bob = fragment(r#"<w:pPr W_DECL><w:keepNext/><w:rPr><w:b/></w:rPr><w:pPrChange/></w:pPr>"#);
        let merged = merge_property_edits(Some(&original), &[Some(&ann), Some(&bob)]);
        let root = merged.root().unwrap();
        let names: Vec<String> = merged
            .element_children(root)
            .map(|c| merged.name(c).unwrap().local_name.clone())
            .collect();
        assert_eq!(names, ["keepNext", "jc", "rPr"]);
    }

    #[test]
    fn canonical_string_skips_requested_content() {
        let doc = fragment(r#"<w:outer W_DECL><w:txbxContent><w:p/></w:txbxContent></w:outer>"#);
        let root = doc.root().unwrap();
        let full = canonical_string(&doc, root);
        let skipped = canonical_string_skipping(&doc, root, &|n| n.is(W::NS, "txbxContent"));
        assert!(full.contains("}p>"));
        assert!(!skipped.contains("}p>"));
    }
}
