//! Atomizer: flattens a prepared document tree into comparison atoms.
//!
//! Blocks are walked in document order. Containers (tables, rows, cells,
//! content controls, hyperlinks, runs, ...) are recorded as shared ancestor
//! snapshots; run content becomes one atom per character or per atomic
//! element; every paragraph ends with a mark atom. Notes are atomized as
//! parts nested under their reference atom, text boxes as parts nested under
//! their drawing atom.

use crate::error::{Result, RevmarkError};
use crate::hash::sha1::sha1_hash_string;
use crate::util::culture::CaseFolder;
use crate::wml::comparison_unit::{
    AtomContent, AtomizedPart, ComparisonAtom, ElementSnapshot, InlineKind, NoteKind,
    PartKey, Unid,
};
use crate::wml::document::{document_body, notes_by_id};
use crate::wml::formatting::{
    canonical_string, canonical_string_skipping, paragraph_properties_hash, run_properties_hash,
};
use crate::wml::settings::ComparerSettings;
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::{M, W};
use indextree::NodeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct ContainerInfo {
    element_name: &'static str,
    child_props: &'static [&'static str],
}

/// Elements kept as ancestors of atoms, with the property children that are
/// copied along with them instead of being atomized.
const CONTAINERS: &[ContainerInfo] = &[
    ContainerInfo { element_name: "tbl", child_props: &["tblPr", "tblGrid"] },
    ContainerInfo { element_name: "tr", child_props: &["tblPrEx", "trPr"] },
    ContainerInfo { element_name: "tc", child_props: &["tcPr"] },
    ContainerInfo { element_name: "sdt", child_props: &["sdtPr", "sdtEndPr"] },
    ContainerInfo { element_name: "sdtContent", child_props: &[] },
    ContainerInfo { element_name: "customXml", child_props: &["customXmlPr"] },
    ContainerInfo { element_name: "p", child_props: &["pPr"] },
    ContainerInfo { element_name: "r", child_props: &["rPr"] },
    ContainerInfo { element_name: "hyperlink", child_props: &[] },
    ContainerInfo { element_name: "smartTag", child_props: &["smartTagPr"] },
    ContainerInfo { element_name: "fldSimple", child_props: &[] },
    ContainerInfo { element_name: "dir", child_props: &[] },
    ContainerInfo { element_name: "bdo", child_props: &[] },
];

/// Paragraph-level wrappers whose children are more paragraph content.
const INLINE_WRAPPERS: &[&str] = &["hyperlink", "smartTag", "fldSimple", "customXml", "dir", "bdo", "sdt"];

fn container_props(local: &str) -> &'static [&'static str] {
    CONTAINERS
        .iter()
        .find(|c| c.element_name == local)
        .map(|c| c.child_props)
        .unwrap_or(&[])
}

/// Atomizes the body of a prepared document. `doc_index` distinguishes the
/// element identities of the documents taking part in one call.
pub fn atomize_document(
    doc: &XmlDocument,
    doc_index: u32,
    settings: &ComparerSettings,
) -> Result<AtomizedPart> {
    let body = document_body(doc)?;
    let mut atomizer = Atomizer::new(doc, doc_index, settings)?;
    let mut part = AtomizedPart::new(PartKey::Body, None);
    let mut path = Vec::new();
    atomizer.atomize_blocks(body, &mut path, &mut part)?;
    tracing::debug!(
        doc = doc_index,
        atoms = part.total_atoms(),
        "atomized document"
    );
    Ok(part)
}

struct Atomizer<'a> {
    doc: &'a XmlDocument,
    doc_index: u32,
    order: HashMap<NodeId, u32>,
    folder: Option<CaseFolder>,
    conflate_spaces: bool,
    notes: HashMap<NoteKind, HashMap<String, NodeId>>,
    visiting_notes: HashSet<(NoteKind, String)>,
}

impl<'a> Atomizer<'a> {
    fn new(doc: &'a XmlDocument, doc_index: u32, settings: &ComparerSettings) -> Result<Self> {
        let order = doc
            .root()
            .map(|root| {
                doc.descendants(root)
                    .enumerate()
                    .map(|(i, n)| (n, i as u32))
                    .collect()
            })
            .unwrap_or_default();
        let folder = if settings.case_insensitive {
            Some(CaseFolder::new(settings.locale.as_deref())?)
        } else {
            None
        };
        let notes = [NoteKind::Footnote, NoteKind::Endnote]
            .into_iter()
            .map(|kind| (kind, notes_by_id(doc, kind)))
            .collect();
        Ok(Self {
            doc,
            doc_index,
            order,
            folder,
            conflate_spaces: settings.conflate_breaking_and_nonbreaking_spaces,
            notes,
            visiting_notes: HashSet::new(),
        })
    }

    fn unid(&self, node: NodeId) -> Unid {
        Unid {
            doc: self.doc_index,
            seq: self.order.get(&node).copied().unwrap_or(u32::MAX),
        }
    }

    fn snapshot(&self, node: NodeId) -> Result<Arc<ElementSnapshot>> {
        let doc = self.doc;
        let name = doc
            .name(node)
            .cloned()
            .ok_or_else(|| RevmarkError::malformed("expected an element"))?;
        let attributes = doc
            .get(node)
            .and_then(|d| d.attributes())
            .map(|a| a.to_vec())
            .unwrap_or_default();
        let props = if name.in_namespace(W::NS) {
            container_props(&name.local_name)
        } else {
            &[]
        };
        let properties: Vec<XmlDocument> = doc
            .element_children(node)
            .filter(|&c| {
                doc.name(c)
                    .is_some_and(|n| n.in_namespace(W::NS) && props.contains(&n.local_name.as_str()))
            })
            .map(|c| doc.extract_subtree(c))
            .collect();
        let props_hash = match name.local_name.as_str() {
            "r" if name.in_namespace(W::NS) => {
                run_properties_hash(properties.iter().find(|f| is_root(f, "rPr")))
            }
            "p" if name.in_namespace(W::NS) => {
                paragraph_properties_hash(properties.iter().find(|f| is_root(f, "pPr")))
            }
            _ => String::new(),
        };
        Ok(Arc::new(ElementSnapshot {
            name,
            attributes,
            properties,
            props_hash,
            unid: self.unid(node),
        }))
    }

    fn is_property_child(&self, parent_local: &str, child: NodeId) -> bool {
        let props = container_props(parent_local);
        self.doc
            .name(child)
            .is_some_and(|n| n.in_namespace(W::NS) && props.contains(&n.local_name.as_str()))
    }

    fn atomize_blocks(
        &mut self,
        container: NodeId,
        path: &mut Vec<Arc<ElementSnapshot>>,
        part: &mut AtomizedPart,
    ) -> Result<()> {
        let children: Vec<NodeId> = self.doc.element_children(container).collect();
        for child in children {
            let Some(name) = self.doc.name(child) else { continue };
            if !name.in_namespace(W::NS) {
                return Err(RevmarkError::unsupported(format!("block-level element {name}")));
            }
            match name.local_name.as_str() {
                "p" => self.atomize_paragraph(child, path, part)?,
                "tbl" => self.atomize_table(child, path, part)?,
                "sdt" => {
                    path.push(self.snapshot(child)?);
                    if let Some(content) = self.doc.first_child_named(child, W::NS, "sdtContent") {
                        path.push(self.snapshot(content)?);
                        self.atomize_blocks(content, path, part)?;
                        path.pop();
                    }
                    path.pop();
                }
                "customXml" => {
                    path.push(self.snapshot(child)?);
                    self.atomize_blocks(child, path, part)?;
                    path.pop();
                }
                // container properties and body section properties are
                // carried by snapshots or copied from the base document
                _ => {}
            }
        }
        Ok(())
    }

    fn atomize_table(
        &mut self,
        table: NodeId,
        path: &mut Vec<Arc<ElementSnapshot>>,
        part: &mut AtomizedPart,
    ) -> Result<()> {
        path.push(self.snapshot(table)?);
        let rows: Vec<NodeId> = self.doc.elements_by_name(table, &W::tr()).collect();
        for row in rows {
            path.push(self.snapshot(row)?);
            let cells: Vec<NodeId> = self.doc.elements_by_name(row, &W::tc()).collect();
            for cell in cells {
                path.push(self.snapshot(cell)?);
                self.atomize_blocks(cell, path, part)?;
                path.pop();
            }
            path.pop();
        }
        path.pop();
        Ok(())
    }

    fn atomize_paragraph(
        &mut self,
        paragraph: NodeId,
        path: &mut Vec<Arc<ElementSnapshot>>,
        part: &mut AtomizedPart,
    ) -> Result<()> {
        path.push(self.snapshot(paragraph)?);
        self.atomize_inline(paragraph, "p", path, part)?;
        self.push_atom(part, AtomContent::ParagraphMark, "¶".to_string(), path);
        path.pop();
        Ok(())
    }

    fn atomize_inline(
        &mut self,
        parent: NodeId,
        parent_local: &str,
        path: &mut Vec<Arc<ElementSnapshot>>,
        part: &mut AtomizedPart,
    ) -> Result<()> {
        let children: Vec<NodeId> = self.doc.element_children(parent).collect();
        for child in children {
            if self.is_property_child(parent_local, child) {
                continue;
            }
            let Some(name) = self.doc.name(child).cloned() else { continue };
            if name.in_namespace(M::NS) {
                if name.local_name == "oMath" || name.local_name == "oMathPara" {
                    let markup = Arc::new(self.doc.extract_subtree(child));
                    let hash = format!("math:{}", sha1_hash_string(&canonical_string(self.doc, child)));
                    self.push_atom(part, AtomContent::Math(markup), hash, path);
                    continue;
                }
                return Err(RevmarkError::unsupported(format!("paragraph content {name}")));
            }
            if !name.in_namespace(W::NS) {
                return Err(RevmarkError::unsupported(format!("paragraph content {name}")));
            }
            match name.local_name.as_str() {
                "r" => {
                    path.push(self.snapshot(child)?);
                    self.atomize_run(child, path, part)?;
                    path.pop();
                }
                "sdt" => {
                    path.push(self.snapshot(child)?);
                    if let Some(content) = self.doc.first_child_named(child, W::NS, "sdtContent") {
                        path.push(self.snapshot(content)?);
                        self.atomize_inline(content, "sdtContent", path, part)?;
                        path.pop();
                    }
                    path.pop();
                }
                local if INLINE_WRAPPERS.contains(&local) => {
                    path.push(self.snapshot(child)?);
                    self.atomize_inline(child, local, path, part)?;
                    path.pop();
                }
                local => {
                    return Err(RevmarkError::unsupported(format!("paragraph content w:{local}")));
                }
            }
        }
        Ok(())
    }

    fn atomize_run(
        &mut self,
        run: NodeId,
        path: &mut Vec<Arc<ElementSnapshot>>,
        part: &mut AtomizedPart,
    ) -> Result<()> {
        let children: Vec<NodeId> = self.doc.element_children(run).collect();
        for child in children {
            if self.is_property_child("r", child) {
                continue;
            }
            let Some(name) = self.doc.name(child).cloned() else { continue };
            let local = if name.in_namespace(W::NS) {
                name.local_name.as_str()
            } else {
                ""
            };
            match local {
                "t" | "delText" => {
                    for c in self.doc.text_of(child).chars() {
                        let hash = format!("t:{}", self.normalize(c));
                        self.push_atom(part, AtomContent::Text(c), hash, path);
                    }
                }
                "instrText" | "delInstrText" => {
                    for c in self.doc.text_of(child).chars() {
                        let hash = format!("i:{}", self.normalize(c));
                        self.push_atom(part, AtomContent::InstrText(c), hash, path);
                    }
                }
                "footnoteReference" | "endnoteReference" => {
                    let kind = if local == "footnoteReference" {
                        InlineKind::FootnoteReference
                    } else {
                        InlineKind::EndnoteReference
                    };
                    let markup = Arc::new(self.doc.extract_subtree(child));
                    let owner = part.atoms.len();
                    self.push_atom(part, AtomContent::Inline(kind, markup), format!("{kind:?}"), path);
                    let note = self.atomize_note(kind, child)?;
                    part.nested.insert(owner, vec![note]);
                }
                "drawing" | "pict" => {
                    let markup = Arc::new(self.doc.extract_subtree(child));
                    let canonical = canonical_string_skipping(self.doc, child, &|n| {
                        n.is(W::NS, "txbxContent")
                    });
                    let hash = format!("Drawing:{}", sha1_hash_string(&canonical));
                    let owner = part.atoms.len();
                    self.push_atom(
                        part,
                        AtomContent::Inline(InlineKind::Drawing, markup),
                        hash,
                        path,
                    );
                    let boxes = self.atomize_text_boxes(child)?;
                    if !boxes.is_empty() {
                        part.nested.insert(owner, boxes);
                    }
                }
                _ => {
                    let kind = match local {
                        "tab" => InlineKind::Tab,
                        "br" => InlineKind::Break,
                        "cr" => InlineKind::CarriageReturn,
                        "noBreakHyphen" => InlineKind::NoBreakHyphen,
                        "softHyphen" => InlineKind::SoftHyphen,
                        "sym" => InlineKind::Symbol,
                        "fldChar" => InlineKind::FieldChar,
                        _ => InlineKind::Opaque,
                    };
                    let hash = format!(
                        "{kind:?}:{}",
                        sha1_hash_string(&canonical_string(self.doc, child))
                    );
                    let markup = Arc::new(self.doc.extract_subtree(child));
                    self.push_atom(part, AtomContent::Inline(kind, markup), hash, path);
                }
            }
        }
        Ok(())
    }

    fn atomize_note(&mut self, kind: InlineKind, reference: NodeId) -> Result<AtomizedPart> {
        let note_kind = kind
            .note_kind()
            .ok_or_else(|| RevmarkError::InternalInconsistency("not a note reference".into()))?;
        let id = self
            .doc
            .attribute(reference, &W::id())
            .unwrap_or_default()
            .to_string();
        let note = self
            .notes
            .get(&note_kind)
            .and_then(|notes| notes.get(&id))
            .copied()
            .ok_or_else(|| {
                RevmarkError::malformed(format!("reference to missing {note_kind:?} {id}"))
            })?;
        if !self.visiting_notes.insert((note_kind, id.clone())) {
            return Err(RevmarkError::malformed(format!(
                "{note_kind:?} {id} references itself"
            )));
        }
        let mut part = AtomizedPart::new(
            PartKey::Note {
                kind: note_kind,
                id: id.clone(),
            },
            Some(self.snapshot(note)?),
        );
        let mut path = Vec::new();
        self.atomize_blocks(note, &mut path, &mut part)?;
        self.visiting_notes.remove(&(note_kind, id));
        Ok(part)
    }

    fn atomize_text_boxes(&mut self, drawing: NodeId) -> Result<Vec<AtomizedPart>> {
        let owner = self.unid(drawing);
        let boxes = outermost_text_boxes(self.doc, drawing);
        let mut parts = Vec::with_capacity(boxes.len());
        for (index, text_box) in boxes.into_iter().enumerate() {
            let mut part = AtomizedPart::new(PartKey::TextBox { owner, index }, None);
            let mut path = Vec::new();
            self.atomize_blocks(text_box, &mut path, &mut part)?;
            parts.push(part);
        }
        Ok(parts)
    }

    fn normalize(&self, c: char) -> String {
        let c = if self.conflate_spaces && c == '\u{a0}' { ' ' } else { c };
        match &self.folder {
            Some(folder) => folder.fold(c.encode_utf8(&mut [0; 4])),
            None => c.to_string(),
        }
    }

    fn push_atom(
        &self,
        part: &mut AtomizedPart,
        content: AtomContent,
        hash: String,
        path: &[Arc<ElementSnapshot>],
    ) {
        part.atoms.push(ComparisonAtom {
            content,
            ancestors: path.to_vec(),
            hash,
        });
    }
}

fn is_root(fragment: &XmlDocument, local: &str) -> bool {
    fragment
        .root()
        .is_some_and(|r| fragment.is_named(r, W::NS, local))
}

/// `w:txbxContent` elements below `node` that are not themselves inside
/// another text box, in document order.
pub(crate) fn outermost_text_boxes(doc: &XmlDocument, node: NodeId) -> Vec<NodeId> {
    doc.descendants(node)
        .filter(|&n| doc.is_named(n, W::NS, "txbxContent"))
        .filter(|&n| {
            !doc.ancestors(n)
                .skip(1)
                .take_while(|&a| a != node)
                .any(|a| doc.is_named(a, W::NS, "txbxContent"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wml::document::prepare;
    use crate::xml::parser::parse;

    const W_DECL: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn atomize(body: &str, settings: &ComparerSettings) -> AtomizedPart {
        let doc = parse(&format!(r#"<w:document {W_DECL}><w:body>{body}</w:body></w:document>"#)).unwrap();
        let prepared = prepare(&doc).unwrap();
        atomize_document(&prepared, 0, settings).unwrap()
    }

    #[test]
    fn paragraph_yields_characters_then_mark() {
        let part = atomize("<w:p><w:r><w:t>ab</w:t></w:r></w:p>", &ComparerSettings::default());
        let hashes: Vec<&str> = part.atoms.iter().map(|a| a.hash.as_str()).collect();
        assert_eq!(hashes, vec!["t:a", "t:b", "¶"]);
        assert_eq!(part.atoms[0].ancestors.len(), 2);
        assert!(part.atoms[2].is_paragraph_mark());
    }

    #[test]
    fn table_atoms_carry_row_and_cell_ancestors() {
        let part = atomize(
            "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>x</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
            &ComparerSettings::default(),
        );
        let names: Vec<&str> = part.atoms[0].ancestors.iter().map(|a| a.local_name()).collect();
        assert_eq!(names, vec!["tbl", "tr", "tc", "p", "r"]);
    }

    #[test]
    fn atomization_is_deterministic() {
        let body = "<w:p><w:r><w:t>hello</w:t><w:tab/></w:r></w:p>";
        let a = atomize(body, &ComparerSettings::default());
        let b = atomize(body, &ComparerSettings::default());
        let key = |p: &AtomizedPart| -> Vec<(String, String)> {
            p.atoms
                .iter()
                .map(|a| (a.hash.clone(), a.ancestors.iter().map(|s| s.unid.to_string()).collect()))
                .collect()
        };
        assert_eq!(key(&a), key(&b));
    }

    #[test]
    fn case_insensitive_hash_ignores_case() {
        let settings = ComparerSettings::default().with_case_insensitive(true);
        let upper = atomize("<w:p><w:r><w:t>A</w:t></w:r></w:p>", &settings);
        let lower = atomize("<w:p><w:r><w:t>a</w:t></w:r></w:p>", &settings);
        assert_eq!(upper.atoms[0].hash, lower.atoms[0].hash);
    }

    #[test]
    fn formatting_does_not_change_hash() {
        let plain = atomize("<w:p><w:r><w:t>a</w:t></w:r></w:p>", &ComparerSettings::default());
        let bold = atomize(
            "<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>a</w:t></w:r></w:p>",
            &ComparerSettings::default(),
        );
        assert_eq!(plain.atoms[0].hash, bold.atoms[0].hash);
        assert_ne!(plain.atoms[0].format_key(), bold.atoms[0].format_key());
    }

    #[test]
    fn footnote_is_nested_under_reference() {
        let doc = parse(&format!(
            r#"<w:document {W_DECL}><w:body><w:p><w:r><w:footnoteReference w:id="1"/></w:r></w:p></w:body><w:footnotes><w:footnote w:id="1"><w:p><w:r><w:t>n</w:t></w:r></w:p></w:footnote></w:footnotes></w:document>"#
        ))
        .unwrap();
        let part = atomize_document(&prepare(&doc).unwrap(), 0, &ComparerSettings::default()).unwrap();
        let nested = part.nested_parts(0);
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].text(), "n\n");
    }

    #[test]
    fn missing_note_is_malformed() {
        let doc = parse(&format!(
            r#"<w:document {W_DECL}><w:body><w:p><w:r><w:footnoteReference w:id="7"/></w:r></w:p></w:body></w:document>"#
        ))
        .unwrap();
        let err = atomize_document(&doc, 0, &ComparerSettings::default()).unwrap_err();
        assert!(matches!(err, RevmarkError::MalformedInput { .. }));
    }
}
