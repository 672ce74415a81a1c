//! Tracked-change markers: construction, attribution and id fix-up.

use crate::types::Rgb;
use crate::wml::settings::ComparerSettings;
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::{MC, RVM, W, XMLNS};
use crate::xml::node::XmlNodeData;
use crate::xml::xname::{XAttribute, XName};
use indextree::NodeId;
use std::collections::HashMap;

/// Who a marker is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribution {
    pub author: String,
    pub date: Option<String>,
    /// Presentation color; only written by consolidation.
    pub color: Option<Rgb>,
}

impl Attribution {
    pub fn from_settings(settings: &ComparerSettings) -> Self {
        Self {
            author: settings.author_for_new_revisions.clone(),
            date: settings.date_time_for_revisions.clone(),
            color: None,
        }
    }

    pub fn reviewer(author: &str, color: Rgb, settings: &ComparerSettings) -> Self {
        Self {
            author: author.to_string(),
            date: settings.date_time_for_revisions.clone(),
            color: Some(color),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Insertion,
    Deletion,
    MoveFrom,
    MoveTo,
}

impl MarkerKind {
    pub fn element_name(self) -> XName {
        match self {
            MarkerKind::Insertion => W::ins(),
            MarkerKind::Deletion => W::del(),
            MarkerKind::MoveFrom => W::moveFrom(),
            MarkerKind::MoveTo => W::moveTo(),
        }
    }

    /// True for content that disappears when the revision is accepted.
    pub fn is_removal(self) -> bool {
        matches!(self, MarkerKind::Deletion | MarkerKind::MoveFrom)
    }
}

/// Hands out marker ids during synthesis. Ids are only required to be
/// unique here; [`fix_up_revision_ids`] renumbers them in document order.
#[derive(Debug, Default)]
pub struct RevisionIds {
    next: u32,
}

impl RevisionIds {
    pub fn next_id(&mut self) -> String {
        self.next += 1;
        self.next.to_string()
    }
}

fn marker_attributes(id: String, attribution: &Attribution) -> Vec<XAttribute> {
    // w:id first
    let mut attrs = vec![
        XAttribute::new(W::id(), &id),
        XAttribute::new(W::author(), &attribution.author),
    ];
    if let Some(date) = &attribution.date {
        attrs.push(XAttribute::new(W::date(), date));
    }
    if let Some(color) = attribution.color {
        attrs.push(XAttribute::new(RVM::color(), &color.to_hex()));
    }
    attrs
}

/// Creates an attributed `w:ins` / `w:del` / `w:moveFrom` / `w:moveTo`
/// below `parent`.
pub fn create_marker(
    doc: &mut XmlDocument,
    parent: NodeId,
    kind: MarkerKind,
    attribution: &Attribution,
    ids: &mut RevisionIds,
) -> NodeId {
    let attrs = marker_attributes(ids.next_id(), attribution);
    doc.add_child(parent, XmlNodeData::element_with_attrs(kind.element_name(), attrs))
}

/// Creates an attributed `w:rPrChange` or `w:pPrChange` below `parent`.
pub fn create_property_change(
    doc: &mut XmlDocument,
    parent: NodeId,
    name: XName,
    attribution: &Attribution,
    ids: &mut RevisionIds,
) -> NodeId {
    let attrs = marker_attributes(ids.next_id(), attribution);
    doc.add_child(parent, XmlNodeData::element_with_attrs(name, attrs))
}

/// Records further reviewers who made the same change as the marker's own
/// author: `rvm:author2` / `rvm:color2`, `rvm:author3` / `rvm:color3`, ...
pub fn add_co_authors(doc: &mut XmlDocument, marker: NodeId, co_authors: &[Attribution]) {
    for (n, who) in (2..).zip(co_authors) {
        doc.set_attribute(marker, &RVM::author_n(n), &who.author);
        if let Some(color) = who.color {
            doc.set_attribute(marker, &RVM::color_n(n), &color.to_hex());
        }
    }
}

/// The co-authors [`add_co_authors`] wrote on a marker, in order.
pub fn co_authors(doc: &XmlDocument, marker: NodeId) -> Vec<(String, Option<Rgb>)> {
    (2..)
        .map_while(|n| {
            let author = doc.attribute(marker, &RVM::author_n(n))?;
            let color = doc
                .attribute(marker, &RVM::color_n(n))
                .and_then(|hex| hex.parse().ok());
            Some((author.to_string(), color))
        })
        .collect()
}

/// Adds a `w:moveFromRangeStart`/`End` (or `moveTo...`) pair around the
/// consecutive siblings `first..=last`.
pub fn wrap_move_range(
    doc: &mut XmlDocument,
    first: NodeId,
    last: NodeId,
    kind: MarkerKind,
    move_name: &str,
    attribution: &Attribution,
    ids: &mut RevisionIds,
) {
    let (start_name, end_name) = match kind {
        MarkerKind::MoveFrom => (W::moveFromRangeStart(), W::moveFromRangeEnd()),
        _ => (W::moveToRangeStart(), W::moveToRangeEnd()),
    };
    let id = ids.next_id();
    let mut start_attrs = marker_attributes(id.clone(), attribution);
    start_attrs.push(XAttribute::new(W::name(), move_name));
    doc.add_before(first, XmlNodeData::element_with_attrs(start_name, start_attrs));
    doc.add_after(
        last,
        XmlNodeData::element_with_attrs(end_name, vec![XAttribute::new(W::id(), &id)]),
    );
}

static REVISION_ELEMENT_TAGS: &[&str] = &[
    "ins",
    "del",
    "moveFrom",
    "moveTo",
    "rPrChange",
    "pPrChange",
    "sectPrChange",
    "tblPrChange",
    "tblGridChange",
    "trPrChange",
    "tcPrChange",
    "cellIns",
    "cellDel",
    "cellMerge",
    "numberingChange",
    "moveFromRangeStart",
    "moveToRangeStart",
];

pub fn is_revision_element_tag(local_name: &str) -> bool {
    REVISION_ELEMENT_TAGS.contains(&local_name)
}

/// Renumbers every revision `w:id` below `start` sequentially from 1 in
/// document order. Range ends take the new id of their range start.
pub fn fix_up_revision_ids(doc: &mut XmlDocument, start: NodeId) {
    let nodes: Vec<NodeId> = doc
        .descendants(start)
        .filter(|&n| doc.name(n).is_some_and(|name| name.in_namespace(W::NS)))
        .collect();

    let mut next_id = 0u32;
    let mut ranges: HashMap<(bool, String), String> = HashMap::new();
    for node in nodes {
        let Some(local) = doc.name(node).map(|n| n.local_name.clone()) else {
            continue;
        };
        let Some(old) = doc.attribute(node, &W::id()).map(str::to_string) else {
            continue;
        };
        let new_id = match local.as_str() {
            "moveFromRangeEnd" | "moveToRangeEnd" => {
                let from = local == "moveFromRangeEnd";
                match ranges.get(&(from, old)) {
                    Some(id) => id.clone(),
                    None => {
                        next_id += 1;
                        next_id.to_string()
                    }
                }
            }
            l if is_revision_element_tag(l) => {
                next_id += 1;
                let id = next_id.to_string();
                if l == "moveFromRangeStart" || l == "moveToRangeStart" {
                    ranges.insert((l == "moveFromRangeStart", old), id.clone());
                }
                id
            }
            _ => continue,
        };
        doc.set_attribute(node, &W::id(), &new_id);
    }
}

/// Declares the consolidation namespace on the root and marks it ignorable
/// for consumers that do not know it.
pub fn declare_consolidation_namespace(doc: &mut XmlDocument, root: NodeId) {
    let declared = |doc: &XmlDocument, uri: &str| {
        doc.get(root)
            .and_then(|d| d.attributes())
            .is_some_and(|attrs| {
                attrs
                    .iter()
                    .any(|a| a.name.namespace.as_deref() == Some(XMLNS) && a.value == uri)
            })
    };
    if !declared(doc, RVM::NS) {
        doc.set_attribute(root, &XName::new(XMLNS, RVM::PREFIX), RVM::NS);
    }
    if !declared(doc, MC::NS) {
        doc.set_attribute(root, &XName::new(XMLNS, "mc"), MC::NS);
    }
    let ignorable = doc.attribute(root, &MC::Ignorable()).unwrap_or_default();
    if !ignorable.split_whitespace().any(|p| p == RVM::PREFIX) {
        let value = if ignorable.trim().is_empty() {
            RVM::PREFIX.to_string()
        } else {
            format!("{} {}", ignorable.trim(), RVM::PREFIX)
        };
        doc.set_attribute(root, &MC::Ignorable(), &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::builder::serialize;
    use crate::xml::parser::parse;

    fn attribution() -> Attribution {
        Attribution {
            author: "Ann".into(),
            date: None,
            color: None,
        }
    }

    #[test]
    fn marker_has_id_author_and_no_date_by_default() {
        let mut doc = XmlDocument::new();
        let root = doc.add_root(XmlNodeData::element(W::p()));
        let mut ids = RevisionIds::default();
        let ins = create_marker(&mut doc, root, MarkerKind::Insertion, &attribution(), &mut ids);
        assert_eq!(doc.attribute(ins, &W::id()), Some("1"));
        assert_eq!(doc.attribute(ins, &W::author()), Some("Ann"));
        assert!(doc.attribute(ins, &W::date()).is_none());
    }

    #[test]
    fn consolidation_marker_carries_color() {
        let mut doc = XmlDocument::new();
        let root = doc.add_root(XmlNodeData::element(W::p()));
        let mut ids = RevisionIds::default();
        let who = Attribution {
            color: Some(Rgb(0x12, 0xAB, 0xEF)),
            ..attribution()
        };
        let del = create_marker(&mut doc, root, MarkerKind::Deletion, &who, &mut ids);
        assert_eq!(doc.attribute(del, &RVM::color()), Some("12ABEF"));
    }

    #[test]
    fn co_authors_are_written_and_read_back_in_order() {
        let mut doc = XmlDocument::new();
        let root = doc.add_root(XmlNodeData::element(W::p()));
        let mut ids = RevisionIds::default();
        let del = create_marker(&mut doc, root, MarkerKind::Deletion, &attribution(), &mut ids);
        let bob = Attribution {
            author: "Bob".into(),
            color: Some(Rgb(0, 0, 0xFF)),
            ..attribution()
        };
        let cy = Attribution {
            author: "Cy".into(),
            ..attribution()
        };
        add_co_authors(&mut doc, del, &[bob, cy]);
        assert_eq!(doc.attribute(del, &RVM::color_n(2)), Some("0000FF"));
        assert_eq!(
            co_authors(&doc, del),
            vec![("Bob".to_string(), Some(Rgb(0, 0, 0xFF))), ("Cy".to_string(), None)]
        );
        assert!(co_authors(&doc, root).is_empty());
    }

    #[test]
    fn ids_are_renumbered_in_document_order_and_ranges_follow_starts() {
        let xml = r#"<w:body xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:p><w:moveFromRangeStart w:id="9" w:name="move1"/><w:moveFrom w:id="7"/><w:moveFromRangeEnd w:id="9"/><w:ins w:id="3"/><w:bookmarkStart w:id="5"/></w:p></w:body>"#;
        let mut doc = parse(xml).unwrap();
        let root = doc.root().unwrap();
        fix_up_revision_ids(&mut doc, root);
        let out = serialize(&doc).unwrap();
        assert!(out.contains(r#"<w:moveFromRangeStart w:id="1""#));
        assert!(out.contains(r#"<w:moveFrom w:id="2"/>"#));
        assert!(out.contains(r#"<w:moveFromRangeEnd w:id="1"/>"#));
        assert!(out.contains(r#"<w:ins w:id="3"/>"#));
        assert!(out.contains(r#"<w:bookmarkStart w:id="5"/>"#));
    }

    #[test]
    fn consolidation_namespace_is_declared_and_ignorable() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006" mc:Ignorable="w14"><w:body/></w:document>"#;
        let mut doc = parse(xml).unwrap();
        let root = doc.root().unwrap();
        declare_consolidation_namespace(&mut doc, root);
        declare_consolidation_namespace(&mut doc, root);
        assert_eq!(doc.attribute(root, &MC::Ignorable()), Some("w14 rvm"));
        let out = serialize(&doc).unwrap();
        assert!(out.contains(r#"xmlns:rvm="http://schemas.revmark.dev/2024/consolidation""#));
        assert!(parse(&out).is_ok());
    }
}
