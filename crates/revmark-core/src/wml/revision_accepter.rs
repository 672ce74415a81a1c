//! Accepting and rejecting tracked changes.
//!
//! Both directions copy the tree once, dropping or unwrapping tracked
//! content on the way, then merge paragraphs whose marks disappear and
//! clean up property containers left empty.

use crate::error::{Result, RevmarkError};
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::{M, W, W14};
use crate::xml::node::XmlNodeData;
use crate::xml::xname::{XAttribute, XName};
use indextree::NodeId;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Revision bookkeeping that is dropped in both directions.
static ELEMENTS_TO_REMOVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "moveFromRangeStart",
        "moveFromRangeEnd",
        "moveToRangeStart",
        "moveToRangeEnd",
        "tblPrChange",
        "tblGridChange",
        "tcPrChange",
        "trPrChange",
        "tblPrExChange",
        "sectPrChange",
        "numberingChange",
        "cellIns",
        "cellDel",
        "cellMerge",
        "customXmlInsRangeStart",
        "customXmlInsRangeEnd",
        "customXmlDelRangeStart",
        "customXmlDelRangeEnd",
        "customXmlMoveFromRangeStart",
        "customXmlMoveFromRangeEnd",
        "customXmlMoveToRangeStart",
        "customXmlMoveToRangeEnd",
    ]
    .into_iter()
    .collect()
});

/// Tracked-change elements, either content wrappers or, inside a property
/// container, markers on the element that owns the container.
static ELEMENTS_TO_UNWRAP: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["ins", "moveTo"].into_iter().collect());
static ELEMENTS_TO_DISCARD: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["del", "moveFrom"].into_iter().collect());

/// Containers whose `w:ins` / `w:del` children mark their owner instead of
/// wrapping content.
const MARKER_HOLDERS: &[(&str, &str)] = &[(W::NS, "rPr"), (W::NS, "trPr"), (M::NS, "ctrlPr")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Inserted,
    Deleted,
}

impl Resolution {
    /// Whether content carrying `marker` disappears in this direction.
    fn discards(self, marker: Marker) -> bool {
        matches!(
            (self, marker),
            (Resolution::Accept, Marker::Deleted) | (Resolution::Reject, Marker::Inserted)
        )
    }
}

fn marker_of(name: &XName) -> Option<Marker> {
    if !name.in_namespace(W::NS) {
        return None;
    }
    let local = name.local_name.as_str();
    if ELEMENTS_TO_UNWRAP.contains(local) {
        Some(Marker::Inserted)
    } else if ELEMENTS_TO_DISCARD.contains(local) {
        Some(Marker::Deleted)
    } else {
        None
    }
}

/// Accepts every tracked change: inserted content stays, deleted content
/// goes, recorded previous formatting is dropped.
pub fn accept_revisions(doc: &XmlDocument) -> Result<XmlDocument> {
    resolve(doc, Resolution::Accept)
}

/// Rejects every tracked change: inserted content goes, deleted content
/// comes back, recorded previous formatting is restored.
pub fn reject_revisions(doc: &XmlDocument) -> Result<XmlDocument> {
    resolve(doc, Resolution::Reject)
}

fn resolve(source: &XmlDocument, resolution: Resolution) -> Result<XmlDocument> {
    let root = source
        .root()
        .ok_or_else(|| RevmarkError::malformed("document has no root element"))?;
    let mut transform = Transform {
        source,
        resolution,
        result: XmlDocument::new(),
        merge_forward: Vec::new(),
    };
    let new_root = match transform.node(root, None).as_slice() {
        [single] => *single,
        _ => return Err(RevmarkError::malformed("document root is itself a tracked change")),
    };
    let Transform {
        mut result,
        merge_forward,
        ..
    } = transform;
    result.set_root(Some(new_root));
    merge_paragraphs(&mut result, &merge_forward);
    remove_empty_containers(&mut result, new_root);
    tracing::trace!(
        ?resolution,
        merged = merge_forward.len(),
        "resolved tracked changes"
    );
    Ok(result)
}

struct Transform<'a> {
    source: &'a XmlDocument,
    resolution: Resolution,
    result: XmlDocument,
    /// Paragraphs whose mark disappears, in document order.
    merge_forward: Vec<NodeId>,
}

impl Transform<'_> {
    fn add(&mut self, parent: Option<NodeId>, data: XmlNodeData) -> NodeId {
        match parent {
            Some(p) => self.result.add_child(p, data),
            None => self.result.new_node(data),
        }
    }

    fn children(&mut self, node: NodeId, parent: Option<NodeId>) -> Vec<NodeId> {
        let children: Vec<NodeId> = self.source.children(node).collect();
        children
            .into_iter()
            .flat_map(|c| self.node(c, parent))
            .collect()
    }

    fn node(&mut self, node: NodeId, parent: Option<NodeId>) -> Vec<NodeId> {
        let source = self.source;
        let Some(data) = source.get(node) else {
            return Vec::new();
        };
        let XmlNodeData::Element { name, attributes } = data else {
            return vec![self.add(parent, data.clone())];
        };

        if name.in_namespace(W::NS) {
            let local = name.local_name.as_str();
            if ELEMENTS_TO_REMOVE.contains(local) {
                return Vec::new();
            }
            if let Some(marker) = marker_of(name) {
                if is_marker_holder(source, source.parent(node)) || self.resolution.discards(marker) {
                    return Vec::new();
                }
                return self.children(node, parent);
            }
            match local {
                "delText" | "delInstrText" => {
                    if self.resolution == Resolution::Accept {
                        return Vec::new();
                    }
                    let restored = if local == "delText" { W::t() } else { W::instrText() };
                    return vec![self.element(node, restored, attributes, parent)];
                }
                "rPrChange" | "pPrChange" => return Vec::new(),
                "tr" if self.owner_discarded(property_marker(source, node, &[(W::NS, "trPr")])) => {
                    return Vec::new();
                }
                "rPr" if self.resolution == Resolution::Reject => {
                    if let Some(change) = source.first_child_named(node, W::NS, "rPrChange") {
                        return vec![self.restored_run_properties(node, change, parent)];
                    }
                }
                "pPr" if self.resolution == Resolution::Reject => {
                    if let Some(change) = source.first_child_named(node, W::NS, "pPrChange") {
                        return vec![self.restored_paragraph_properties(node, change, parent)];
                    }
                }
                "p" => {
                    let marker = property_marker(source, node, &[(W::NS, "pPr"), (W::NS, "rPr")]);
                    let id = self.element(node, name.clone(), attributes, parent);
                    if self.owner_discarded(marker) {
                        self.merge_forward.push(id);
                    }
                    return vec![id];
                }
                _ => {}
            }
        } else if name.in_namespace(M::NS) {
            if name.local_name == "r"
                && self.owner_discarded(property_marker(source, node, &[(W::NS, "rPr")]))
            {
                return Vec::new();
            }
            if self.owner_discarded(math_control_marker(source, node)) {
                return Vec::new();
            }
        }

        vec![self.element(node, name.clone(), attributes, parent)]
    }

    fn owner_discarded(&self, marker: Option<Marker>) -> bool {
        marker.is_some_and(|m| self.resolution.discards(m))
    }

    fn element(
        &mut self,
        node: NodeId,
        name: XName,
        attributes: &[XAttribute],
        parent: Option<NodeId>,
    ) -> NodeId {
        let id = self.add(
            parent,
            XmlNodeData::element_with_attrs(name, filter_rsid_attributes(attributes)),
        );
        self.children(node, Some(id));
        id
    }

    fn shell(&mut self, node: NodeId, parent: Option<NodeId>) -> Option<NodeId> {
        let data = self.source.get(node)?;
        let name = data.name()?.clone();
        let attributes = filter_rsid_attributes(data.attributes().unwrap_or(&[]));
        Some(self.add(parent, XmlNodeData::element_with_attrs(name, attributes)))
    }

    /// `w:rPr` rebuilt from the properties recorded in its `w:rPrChange`.
    fn restored_run_properties(
        &mut self,
        rpr: NodeId,
        change: NodeId,
        parent: Option<NodeId>,
    ) -> NodeId {
        let source = self.source;
        let id = self
            .shell(rpr, parent)
            .unwrap_or_else(|| self.add(parent, XmlNodeData::element(W::rPr())));
        if let Some(previous) = source.first_child_named(change, W::NS, "rPr") {
            self.children(previous, Some(id));
        }
        id
    }

    /// `w:pPr` rebuilt from its `w:pPrChange`; the mark's run properties and
    /// section properties are not part of the recorded state and are kept.
    fn restored_paragraph_properties(
        &mut self,
        ppr: NodeId,
        change: NodeId,
        parent: Option<NodeId>,
    ) -> NodeId {
        let source = self.source;
        let id = self
            .shell(ppr, parent)
            .unwrap_or_else(|| self.add(parent, XmlNodeData::element(W::pPr())));
        if let Some(previous) = source.first_child_named(change, W::NS, "pPr") {
            let recorded: Vec<NodeId> = source
                .element_children(previous)
                .filter(|&c| {
                    !source.is_named(c, W::NS, "rPr") && !source.is_named(c, W::NS, "sectPr")
                })
                .collect();
            for child in recorded {
                self.node(child, Some(id));
            }
        }
        for local in ["rPr", "sectPr"] {
            if let Some(kept) = source.first_child_named(ppr, W::NS, local) {
                self.node(kept, Some(id));
            }
        }
        id
    }
}

fn is_marker_holder(doc: &XmlDocument, parent: Option<NodeId>) -> bool {
    parent.is_some_and(|p| {
        MARKER_HOLDERS
            .iter()
            .any(|(ns, local)| doc.is_named(p, ns, local))
    })
}

/// The tracked-change marker found by following `path` through property
/// containers below `node`.
fn property_marker(doc: &XmlDocument, node: NodeId, path: &[(&str, &str)]) -> Option<Marker> {
    let mut current = node;
    for (ns, local) in path {
        current = doc.first_child_named(current, ns, local)?;
    }
    doc.element_children(current)
        .find_map(|c| doc.name(c).and_then(marker_of))
}

/// Math structures record insertion and deletion on `m:ctrlPr` inside their
/// property child (`m:fPr`, `m:radPr`, ...).
fn math_control_marker(doc: &XmlDocument, node: NodeId) -> Option<Marker> {
    doc.element_children(node)
        .filter(|&c| {
            doc.name(c)
                .is_some_and(|n| n.in_namespace(M::NS) && n.local_name.ends_with("Pr"))
        })
        .find_map(|props| {
            let ctrl = doc.first_child_named(props, M::NS, "ctrlPr")?;
            doc.element_children(ctrl)
                .find_map(|c| doc.name(c).and_then(marker_of))
        })
}

fn filter_rsid_attributes(attributes: &[XAttribute]) -> Vec<XAttribute> {
    attributes
        .iter()
        .filter(|attr| {
            let local = &attr.name.local_name;
            let ns = attr.name.namespace.as_deref();
            if ns == Some(W::NS) && local.starts_with("rsid") {
                return false;
            }
            !(ns == Some(W14::NS) && (local == "paraId" || local == "textId"))
        })
        .cloned()
        .collect()
}

/// Moves the content of each paragraph whose mark was removed to the start
/// of the following paragraph. A paragraph with no following sibling
/// paragraph is dropped when empty and kept otherwise.
fn merge_paragraphs(doc: &mut XmlDocument, paragraphs: &[NodeId]) {
    for &paragraph in paragraphs {
        if doc.get(paragraph).is_none() {
            continue;
        }
        let content: Vec<NodeId> = doc
            .children(paragraph)
            .filter(|&c| !doc.is_named(c, W::NS, "pPr"))
            .collect();
        let next = doc
            .next_element_sibling(paragraph)
            .filter(|&n| doc.is_named(n, W::NS, "p"));
        match next {
            Some(next) => {
                let mut previous = doc.first_child_named(next, W::NS, "pPr");
                for child in content {
                    match previous {
                        Some(anchor) => doc.move_after(anchor, child),
                        None => doc.prepend(next, child),
                    }
                    previous = Some(child);
                }
                doc.remove(paragraph);
            }
            None => {
                let has_sibling_block = doc.parent(paragraph).is_some_and(|parent| {
                    doc.element_children(parent).any(|c| {
                        c != paragraph
                            && (doc.is_named(c, W::NS, "p") || doc.is_named(c, W::NS, "tbl"))
                    })
                });
                let is_empty = content
                    .iter()
                    .all(|&c| doc.get(c).is_some_and(|d| !d.is_element()));
                if is_empty && has_sibling_block {
                    doc.remove(paragraph);
                }
            }
        }
    }
}

/// Drops tables that lost all rows and property containers that lost all
/// children.
fn remove_empty_containers(doc: &mut XmlDocument, root: NodeId) {
    let doomed: Vec<NodeId> = doc
        .descendants(root)
        .filter(|&n| {
            let empty = doc.element_children(n).next().is_none();
            if doc.is_named(n, W::NS, "rPr") || doc.is_named(n, W::NS, "trPr") {
                empty
            } else if doc.is_named(n, W::NS, "tbl") {
                doc.elements_by_name(n, &W::tr()).next().is_none()
            } else {
                false
            }
        })
        .collect();
    for node in doomed {
        doc.remove(node);
    }
}
