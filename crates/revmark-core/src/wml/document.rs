//! Structural checks, input preparation and text projection for the
//! document tree.
//!
//! The tree handed to the core is rooted at `w:document` with one `w:body`.
//! Notes resolved from their own parts are grafted under the root as
//! `w:footnotes` / `w:endnotes`.

use crate::error::{Result, RevmarkError};
use crate::wml::comparison_unit::NoteKind;
use crate::wml::revision_accepter;
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::{M, W};
use crate::xml::node::XmlNodeData;
use indextree::NodeId;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Position-only markup with no comparison semantics. Removed before
/// atomization and never reproduced in the output.
pub(crate) static ANNOTATION_MARKERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "bookmarkStart",
        "bookmarkEnd",
        "commentRangeStart",
        "commentRangeEnd",
        "commentReference",
        "permStart",
        "permEnd",
        "proofErr",
        "lastRenderedPageBreak",
        "customXmlInsRangeStart",
        "customXmlInsRangeEnd",
        "customXmlDelRangeStart",
        "customXmlDelRangeEnd",
        "customXmlMoveFromRangeStart",
        "customXmlMoveFromRangeEnd",
        "customXmlMoveToRangeStart",
        "customXmlMoveToRangeEnd",
        "moveFromRangeStart",
        "moveFromRangeEnd",
        "moveToRangeStart",
        "moveToRangeEnd",
    ]
    .into_iter()
    .collect()
});

/// Externally linked content that cannot be compared.
static LINKED_CONTENT: &[&str] = &["altChunk", "subDoc"];

pub fn document_body(doc: &XmlDocument) -> Result<NodeId> {
    let root = doc
        .root()
        .ok_or_else(|| RevmarkError::malformed("document has no root element"))?;
    if !doc.is_named(root, W::NS, "document") {
        let found = doc
            .name(root)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "non-element".to_string());
        return Err(RevmarkError::malformed(format!(
            "root element must be w:document, found {found}"
        )));
    }
    doc.first_child_named(root, W::NS, "body")
        .ok_or_else(|| RevmarkError::malformed("w:document has no w:body"))
}

/// The `w:footnotes` / `w:endnotes` element grafted under the root, if any.
pub fn notes_container(doc: &XmlDocument, kind: NoteKind) -> Option<NodeId> {
    let root = doc.root()?;
    let name = kind.container_name();
    let container = doc.elements_by_name(root, &name).next();
    container
}

/// Notes of one kind keyed by `w:id`.
pub fn notes_by_id(doc: &XmlDocument, kind: NoteKind) -> HashMap<String, NodeId> {
    let Some(container) = notes_container(doc, kind) else {
        return HashMap::new();
    };
    let note_name = kind.note_name();
    doc.elements_by_name(container, &note_name)
        .filter_map(|n| doc.attribute(n, &W::id()).map(|id| (id.to_string(), n)))
        .collect()
}

/// Separator and continuation notes carry a `w:type` and are never compared.
pub fn is_special_note(doc: &XmlDocument, note: NodeId) -> bool {
    doc.attribute(note, &W::type_())
        .is_some_and(|t| t != "normal")
}

/// Checks the structural invariants the comparison relies on and rejects
/// content that has no comparison semantics.
pub fn validate(doc: &XmlDocument) -> Result<()> {
    let body = document_body(doc)?;
    validate_blocks(doc, body, &["sectPr"])?;
    for kind in [NoteKind::Footnote, NoteKind::Endnote] {
        for note in notes_by_id(doc, kind).into_values() {
            validate_blocks(doc, note, &[])?;
        }
    }
    for node in doc.descendants(body) {
        if doc.is_named(node, W::NS, "txbxContent") {
            validate_blocks(doc, node, &[])?;
        }
    }
    Ok(())
}

/// `properties` names the leading property children the container may hold.
fn validate_blocks(doc: &XmlDocument, container: NodeId, properties: &[&str]) -> Result<()> {
    for child in doc.element_children(container) {
        let Some(name) = doc.name(child) else { continue };
        let local = name.local_name.as_str();
        if !name.in_namespace(W::NS) {
            return Err(RevmarkError::unsupported(format!(
                "block-level element {name}"
            )));
        }
        match local {
            "p" => {}
            "tbl" => validate_table(doc, child)?,
            "sdt" => {
                if let Some(content) = doc.first_child_named(child, W::NS, "sdtContent") {
                    validate_blocks(doc, content, &[])?;
                }
            }
            "customXml" => validate_blocks(doc, child, &["customXmlPr"])?,
            l if properties.contains(&l) => {}
            l if LINKED_CONTENT.contains(&l) => {
                return Err(RevmarkError::unsupported(format!("w:{l}")));
            }
            l if ANNOTATION_MARKERS.contains(l) => {}
            l => return Err(RevmarkError::unsupported(format!("block-level element w:{l}"))),
        }
    }
    Ok(())
}

fn validate_table(doc: &XmlDocument, table: NodeId) -> Result<()> {
    let rows: Vec<NodeId> = doc.elements_by_name(table, &W::tr()).collect();
    if rows.is_empty() {
        return Err(RevmarkError::malformed("table without rows"));
    }
    for row in rows {
        let cells: Vec<NodeId> = doc.elements_by_name(row, &W::tc()).collect();
        if cells.is_empty() {
            return Err(RevmarkError::malformed("table row without cells"));
        }
        for cell in cells {
            let has_block = doc
                .element_children(cell)
                .any(|c| doc.is_named(c, W::NS, "p") || doc.is_named(c, W::NS, "tbl"));
            if !has_block {
                return Err(RevmarkError::malformed("table cell without content"));
            }
            validate_blocks(doc, cell, &["tcPr"])?;
        }
    }
    Ok(())
}

/// Produces the tree the atomizer works on: validated, with pre-existing
/// tracked changes accepted and annotation markers removed.
pub fn prepare(doc: &XmlDocument) -> Result<XmlDocument> {
    validate(doc)?;
    let mut prepared = revision_accepter::accept_revisions(doc)?;
    strip_annotations(&mut prepared);
    Ok(prepared)
}

fn strip_annotations(doc: &mut XmlDocument) {
    let Some(root) = doc.root() else { return };
    let doomed: Vec<NodeId> = doc
        .descendants(root)
        .filter(|&n| {
            doc.name(n).is_some_and(|name| {
                name.in_namespace(W::NS) && ANNOTATION_MARKERS.contains(name.local_name.as_str())
            })
        })
        .collect();
    for node in doomed {
        doc.remove(node);
    }
}

/// Text projection used to decide text equivalence: body paragraphs in
/// document order joined by `\n`, then the content of each referenced note
/// in reference order. Text-box content is not part of the projection.
pub fn document_text(doc: &XmlDocument) -> Result<String> {
    let body = document_body(doc)?;
    let mut paragraphs = Vec::new();
    let mut references = Vec::new();
    collect_paragraph_text(doc, body, &mut paragraphs, &mut references);

    let footnotes = notes_by_id(doc, NoteKind::Footnote);
    let endnotes = notes_by_id(doc, NoteKind::Endnote);
    let mut visited = HashSet::new();
    let mut index = 0;
    while index < references.len() {
        let (kind, id) = references[index].clone();
        index += 1;
        if !visited.insert((kind, id.clone())) {
            continue;
        }
        let notes = match kind {
            NoteKind::Footnote => &footnotes,
            NoteKind::Endnote => &endnotes,
        };
        if let Some(&note) = notes.get(&id) {
            collect_paragraph_text(doc, note, &mut paragraphs, &mut references);
        }
    }
    Ok(paragraphs.join("\n"))
}

fn collect_paragraph_text(
    doc: &XmlDocument,
    node: NodeId,
    paragraphs: &mut Vec<String>,
    references: &mut Vec<(NoteKind, String)>,
) {
    for child in doc.element_children(node) {
        if doc.is_named(child, W::NS, "p") {
            let mut text = String::new();
            paragraph_text(doc, child, &mut text, references);
            paragraphs.push(text);
        } else if !doc.is_named(child, W::NS, "txbxContent") {
            collect_paragraph_text(doc, child, paragraphs, references);
        }
    }
}

fn paragraph_text(
    doc: &XmlDocument,
    node: NodeId,
    out: &mut String,
    references: &mut Vec<(NoteKind, String)>,
) {
    for child in doc.children(node) {
        let Some(data) = doc.get(child) else { continue };
        let XmlNodeData::Element { name, .. } = data else { continue };
        if name.in_namespace(W::NS) {
            match name.local_name.as_str() {
                "pPr" | "rPr" | "txbxContent" => {}
                "t" | "delText" => out.push_str(&doc.text_of(child)),
                "tab" => out.push('\t'),
                "br" | "cr" => out.push('\n'),
                "noBreakHyphen" => out.push('\u{2011}'),
                "footnoteReference" | "endnoteReference" => {
                    let kind = if name.local_name == "footnoteReference" {
                        NoteKind::Footnote
                    } else {
                        NoteKind::Endnote
                    };
                    if let Some(id) = doc.attribute(child, &W::id()) {
                        references.push((kind, id.to_string()));
                    }
                }
                _ => paragraph_text(doc, child, out, references),
            }
        } else if name.is(M::NS, "t") {
            out.push_str(&doc.text_of(child));
        } else {
            paragraph_text(doc, child, out, references);
        }
    }
}
