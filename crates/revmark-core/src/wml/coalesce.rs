//! Coalesce - rebuild a document tree from a merged atom sequence.
//!
//! The correlator (or the consolidation merge) produces, per part, one
//! sequence of atoms tagged with a status. This module turns that sequence
//! back into WordprocessingML: paragraphs are split at their marks,
//! containers are regrouped by identity, adjacent atoms with the same
//! status, author and formatting are coalesced into runs, and every
//! non-equal group is wrapped in an attributed revision marker.
//!
//! Containers that were aligned between documents are translated to a
//! single identity first, so an equal table that gained a row is still
//! rebuilt as one table.

use super::atom_list::outermost_text_boxes;
use super::comparison_unit::{
    AtomContent, AtomizedPart, ComparisonAtom, ElementSnapshot, InlineKind, NoteKind, PartKey,
    Unid,
};
use super::document::{document_body, is_special_note};
use super::formatting::copy_property_children;
use super::revision::{
    add_co_authors, create_marker, create_property_change, declare_consolidation_namespace,
    fix_up_revision_ids, wrap_move_range, Attribution, MarkerKind, RevisionIds,
};
use crate::error::{Result, RevmarkError};
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::{M, W, XML};
use crate::xml::node::XmlNodeData;
use crate::xml::xname::{XAttribute, XName};
use indextree::NodeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Tracking children never carried over from a source property element.
static RPR_TRACKING: &[&str] = &["ins", "del", "moveFrom", "moveTo", "rPrChange"];
static PPR_SPECIAL: &[&str] = &["rPr", "sectPr", "pPrChange"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergedStatus {
    Equal,
    Inserted,
    Deleted,
    MovedFrom,
    MovedTo,
}

impl MergedStatus {
    fn marker(self) -> Option<MarkerKind> {
        match self {
            MergedStatus::Equal => None,
            MergedStatus::Inserted => Some(MarkerKind::Insertion),
            MergedStatus::Deleted => Some(MarkerKind::Deletion),
            MergedStatus::MovedFrom => Some(MarkerKind::MoveFrom),
            MergedStatus::MovedTo => Some(MarkerKind::MoveTo),
        }
    }
}

/// One atom of the merged sequence.
#[derive(Debug, Clone)]
pub struct MergedAtom<'a> {
    pub atom: &'a ComparisonAtom,
    pub status: MergedStatus,
    /// Index into the attribution table of the synthesis.
    pub author: usize,
    /// Further authors that made the same change (consolidation only).
    pub co_authors: Vec<usize>,
    pub move_id: Option<u32>,
    /// For an equal atom whose formatting changed: the run (or, for a
    /// paragraph mark, the paragraph) as it was before the change.
    pub previous: Option<Arc<ElementSnapshot>>,
    /// Run (or paragraph) carrying formatting combined from several
    /// reviewers; takes the place of the atom's own.
    pub formatting: Option<Arc<ElementSnapshot>>,
    /// Merged parts owned by this atom (note content, text boxes).
    pub nested: Vec<MergedPart<'a>>,
}

impl<'a> MergedAtom<'a> {
    pub fn new(atom: &'a ComparisonAtom, status: MergedStatus, author: usize) -> Self {
        Self {
            atom,
            status,
            author,
            co_authors: Vec::new(),
            move_id: None,
            previous: None,
            formatting: None,
            nested: Vec::new(),
        }
    }

    fn marker_key(&self) -> (MergedStatus, usize, &[usize], Option<u32>) {
        (self.status, self.author, self.co_authors.as_slice(), self.move_id)
    }

    fn run_key(&self) -> (&str, Option<&str>) {
        let current = match &self.formatting {
            Some(combined) => combined.props_hash.as_str(),
            None => self.atom.format_key(),
        };
        (current, self.previous.as_ref().map(|p| p.props_hash.as_str()))
    }

    fn run_element(&self) -> Option<&Arc<ElementSnapshot>> {
        match &self.formatting {
            Some(combined) if !self.atom.is_paragraph_mark() => Some(combined),
            _ => self.atom.run(),
        }
    }

    fn paragraph_element(&self) -> Option<&Arc<ElementSnapshot>> {
        match &self.formatting {
            Some(combined) if self.atom.is_paragraph_mark() => Some(combined),
            _ => self.atom.paragraph(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergedPart<'a> {
    /// Which part this is; checked against the owner when it is rebuilt.
    pub key: PartKey,
    pub root: Option<Arc<ElementSnapshot>>,
    pub atoms: Vec<MergedAtom<'a>>,
}

impl<'a> MergedPart<'a> {
    /// A part whose every atom (nested parts included) carries one status.
    pub fn whole(part: &'a AtomizedPart, status: MergedStatus, author: usize) -> Self {
        let atoms = part
            .atoms
            .iter()
            .enumerate()
            .map(|(i, atom)| MergedAtom {
                nested: part
                    .nested_parts(i)
                    .iter()
                    .map(|p| MergedPart::whole(p, status, author))
                    .collect(),
                ..MergedAtom::new(atom, status, author)
            })
            .collect();
        Self {
            key: part.key.clone(),
            root: part.root.clone(),
            atoms,
        }
    }

    /// Marks every atom (nested parts included) as shared with `co_authors`.
    pub fn shared_with(mut self, co_authors: &[usize]) -> Self {
        for merged in &mut self.atoms {
            merged.co_authors = co_authors.to_vec();
            merged.nested = std::mem::take(&mut merged.nested)
                .into_iter()
                .map(|p| p.shared_with(co_authors))
                .collect();
        }
        self
    }
}

/// Everything the synthesizer needs to produce the output document.
pub struct Synthesis<'a> {
    /// Document whose root, section properties, special notes and
    /// non-body parts are carried into the output.
    pub base: &'a XmlDocument,
    /// Document index of `base` in atom identities.
    pub base_doc: u32,
    pub body: MergedPart<'a>,
    /// Container identities of the other documents mapped to the base.
    pub translate: HashMap<Unid, Unid>,
    pub attributions: Vec<Attribution>,
    /// Write reviewer colors and declare the consolidation namespace.
    pub consolidation: bool,
}

pub fn synthesize(input: &Synthesis<'_>) -> Result<XmlDocument> {
    let mut base_snapshots = HashMap::new();
    collect_base_snapshots(&input.body, input.base_doc, &mut base_snapshots);

    let mut synthesizer = Synthesizer {
        input,
        out: XmlDocument::new(),
        base_snapshots,
        ids: RevisionIds::default(),
        notes: HashMap::new(),
        next_note_id: HashMap::new(),
    };
    synthesizer.document()?;
    Ok(synthesizer.out)
}

fn collect_base_snapshots(
    part: &MergedPart<'_>,
    base_doc: u32,
    into: &mut HashMap<Unid, Arc<ElementSnapshot>>,
) {
    for merged in &part.atoms {
        for ancestor in &merged.atom.ancestors {
            if ancestor.unid.doc == base_doc {
                into.entry(ancestor.unid).or_insert_with(|| ancestor.clone());
            }
        }
        for nested in &merged.nested {
            collect_base_snapshots(nested, base_doc, into);
        }
    }
}

struct Synthesizer<'a, 'i> {
    input: &'i Synthesis<'a>,
    out: XmlDocument,
    base_snapshots: HashMap<Unid, Arc<ElementSnapshot>>,
    ids: RevisionIds,
    /// Rebuilt notes, detached until the containers are assembled.
    notes: HashMap<NoteKind, Vec<NodeId>>,
    next_note_id: HashMap<NoteKind, i64>,
}

impl<'a, 'i> Synthesizer<'a, 'i> {
    fn document(&mut self) -> Result<()> {
        let base = self.input.base;
        let base_root = base
            .root()
            .ok_or_else(|| RevmarkError::malformed("document has no root element"))?;
        let base_body = document_body(base)?;
        let root_data = base
            .get(base_root)
            .cloned()
            .ok_or_else(|| RevmarkError::InternalInconsistency("dangling root".into()))?;
        let root = self.out.add_root(root_data);

        for kind in [NoteKind::Footnote, NoteKind::Endnote] {
            self.next_note_id.insert(kind, first_free_note_id(base, kind));
        }

        let mut containers: HashMap<NoteKind, NodeId> = HashMap::new();
        let children: Vec<NodeId> = base.children(base_root).collect();
        for child in children {
            if child == base_body {
                let body = self.shallow_copy(base, child, root)?;
                let input = self.input;
                self.blocks(body, &input.body.atoms, 0)?;
                let sect_pr = base
                    .element_children(base_body)
                    .filter(|&c| base.is_named(c, W::NS, "sectPr"))
                    .last();
                if let Some(sect_pr) = sect_pr {
                    self.out.import_node(base, sect_pr, Some(body));
                }
                continue;
            }
            let kind = [NoteKind::Footnote, NoteKind::Endnote]
                .into_iter()
                .find(|k| base.name(child) == Some(&k.container_name()));
            match kind {
                Some(kind) => {
                    let container = self.shallow_copy(base, child, root)?;
                    for note in base.element_children(child) {
                        if is_special_note(base, note) {
                            self.out.import_node(base, note, Some(container));
                        }
                    }
                    containers.insert(kind, container);
                }
                None => {
                    self.out.import_node(base, child, Some(root));
                }
            }
        }

        for kind in [NoteKind::Footnote, NoteKind::Endnote] {
            let notes = self.notes.remove(&kind).unwrap_or_default();
            if notes.is_empty() {
                continue;
            }
            let container = match containers.get(&kind) {
                Some(&c) => c,
                None => self
                    .out
                    .add_child(root, XmlNodeData::element(kind.container_name())),
            };
            for note in notes {
                self.out.append(container, note);
            }
        }

        fix_up_revision_ids(&mut self.out, root);
        if self.input.consolidation {
            declare_consolidation_namespace(&mut self.out, root);
        }
        Ok(())
    }

    fn shallow_copy(&mut self, src: &XmlDocument, node: NodeId, parent: NodeId) -> Result<NodeId> {
        let data = src
            .get(node)
            .cloned()
            .ok_or_else(|| RevmarkError::InternalInconsistency("dangling node".into()))?;
        Ok(self.out.add_child(parent, data))
    }

    fn attribution(&self, author: usize) -> Result<Attribution> {
        self.input.attributions.get(author).cloned().ok_or_else(|| {
            RevmarkError::InternalInconsistency(format!("no attribution for author {author}"))
        })
    }

    /// Creates a marker attributed to the atom's author and co-authors.
    fn mark(&mut self, parent: NodeId, kind: MarkerKind, merged: &MergedAtom<'a>) -> Result<NodeId> {
        let attribution = self.attribution(merged.author)?;
        let marker = create_marker(&mut self.out, parent, kind, &attribution, &mut self.ids);
        self.share(marker, merged)?;
        Ok(marker)
    }

    fn property_change(&mut self, parent: NodeId, name: XName, merged: &MergedAtom<'a>) -> Result<NodeId> {
        let attribution = self.attribution(merged.author)?;
        let change = create_property_change(&mut self.out, parent, name, &attribution, &mut self.ids);
        self.share(change, merged)?;
        Ok(change)
    }

    fn share(&mut self, marker: NodeId, merged: &MergedAtom<'a>) -> Result<()> {
        if merged.co_authors.is_empty() {
            return Ok(());
        }
        let others = merged
            .co_authors
            .iter()
            .map(|&a| self.attribution(a))
            .collect::<Result<Vec<_>>>()?;
        add_co_authors(&mut self.out, marker, &others);
        Ok(())
    }

    /// Identity and snapshot of a container as the output sees it.
    fn resolve(&self, snapshot: &Arc<ElementSnapshot>) -> (Unid, Arc<ElementSnapshot>) {
        let unid = if snapshot.unid.doc == self.input.base_doc {
            snapshot.unid
        } else {
            self.input
                .translate
                .get(&snapshot.unid)
                .copied()
                .unwrap_or(snapshot.unid)
        };
        let resolved = self
            .base_snapshots
            .get(&unid)
            .cloned()
            .unwrap_or_else(|| snapshot.clone());
        (unid, resolved)
    }

    fn element_from_snapshot(&mut self, parent: NodeId, snapshot: &ElementSnapshot) -> NodeId {
        let element = self.out.add_child(
            parent,
            XmlNodeData::element_with_attrs(snapshot.name.clone(), snapshot.attributes.clone()),
        );
        for property in &snapshot.properties {
            self.out.import_fragment(property, element);
        }
        element
    }

    // ---- block level ----

    fn blocks(&mut self, parent: NodeId, atoms: &[MergedAtom<'a>], depth: usize) -> Result<()> {
        let mut paragraphs: Vec<&[MergedAtom<'a>]> = Vec::new();
        let mut start = 0;
        for (i, merged) in atoms.iter().enumerate() {
            if merged.atom.is_paragraph_mark() {
                paragraphs.push(&atoms[start..=i]);
                start = i + 1;
            }
        }
        if start != atoms.len() {
            return Err(RevmarkError::InternalInconsistency(format!(
                "{} atoms after the last paragraph mark",
                atoms.len() - start
            )));
        }
        self.containers(parent, &paragraphs, depth)
    }

    fn containers(
        &mut self,
        parent: NodeId,
        paragraphs: &[&[MergedAtom<'a>]],
        depth: usize,
    ) -> Result<()> {
        let mut i = 0;
        while i < paragraphs.len() {
            let mark = paragraph_mark(paragraphs[i])?;
            let level = mark
                .atom
                .paragraph_depth()
                .ok_or_else(|| RevmarkError::InternalInconsistency("mark outside paragraph".into()))?;
            if level <= depth {
                self.paragraph(parent, paragraphs[i])?;
                i += 1;
                continue;
            }

            let (unid, snapshot) = self.resolve(&mark.atom.ancestors[depth]);
            let mut j = i + 1;
            while j < paragraphs.len() {
                let next = paragraph_mark(paragraphs[j])?;
                let same = next.atom.paragraph_depth().is_some_and(|l| l > depth)
                    && self.resolve(&next.atom.ancestors[depth]).0 == unid;
                if !same {
                    break;
                }
                j += 1;
            }

            let group = &paragraphs[i..j];
            let element = self.element_from_snapshot(parent, &snapshot);
            if snapshot.is(W::NS, "tr") {
                self.row_marker(element, group)?;
            }
            self.containers(element, group, depth + 1)?;
            i = j;
        }
        Ok(())
    }

    /// Marks a row inserted or deleted as a whole when every atom inside
    /// carries that status from one author.
    fn row_marker(&mut self, row: NodeId, paragraphs: &[&[MergedAtom<'a>]]) -> Result<()> {
        let mut atoms = paragraphs.iter().flat_map(|p| p.iter());
        let Some(first) = atoms.next() else {
            return Ok(());
        };
        let kind = match first.status {
            MergedStatus::Inserted => MarkerKind::Insertion,
            MergedStatus::Deleted => MarkerKind::Deletion,
            _ => return Ok(()),
        };
        if !atoms.all(|a| a.marker_key() == first.marker_key()) {
            return Ok(());
        }
        let tr_pr = match self.out.first_child_named(row, W::NS, "trPr") {
            Some(existing) => existing,
            None => {
                let new = self.out.new_node(XmlNodeData::element(W::trPr()));
                let exceptions = self.out.first_child_named(row, W::NS, "tblPrEx");
                match exceptions {
                    Some(ex) => self.out.move_after(ex, new),
                    None => self.out.prepend(row, new),
                }
                new
            }
        };
        self.mark(tr_pr, kind, first)?;
        Ok(())
    }

    fn paragraph(&mut self, parent: NodeId, atoms: &[MergedAtom<'a>]) -> Result<()> {
        let Some((mark, content)) = atoms.split_last() else {
            return Ok(());
        };
        let (name, attributes) = match mark.paragraph_element() {
            Some(p) => (p.name.clone(), p.attributes.clone()),
            None => (W::p(), Vec::new()),
        };
        let p = self
            .out
            .add_child(parent, XmlNodeData::element_with_attrs(name, attributes));
        self.paragraph_properties(p, mark)?;
        self.inline(p, content, 0)
    }

    /// Builds `w:pPr`: plain properties, then the mark's `w:rPr` (revision
    /// marker first), then `w:sectPr`, then `w:pPrChange`.
    fn paragraph_properties(&mut self, p: NodeId, mark: &MergedAtom<'a>) -> Result<()> {
        let current = mark.paragraph_element().and_then(|s| s.property("pPr"));
        let marker = mark.status.marker();
        let previous = mark.previous.as_ref();
        if current.is_none() && marker.is_none() && previous.is_none() {
            return Ok(());
        }

        let p_pr = match current.and_then(|c| c.root().and_then(|r| c.get(r).cloned())) {
            Some(data) => self.out.add_child(p, data),
            None => self.out.add_child(p, XmlNodeData::element(W::pPr())),
        };
        if let Some(current) = current {
            copy_property_children(&mut self.out, p_pr, current, PPR_SPECIAL);
        }

        let mark_r_pr = current.and_then(|c| {
            c.root()
                .and_then(|r| c.first_child_named(r, W::NS, "rPr"))
                .map(|n| (c, n))
        });
        if marker.is_some() || mark_r_pr.is_some() {
            let r_pr = self.out.add_child(p_pr, XmlNodeData::element(W::rPr()));
            if let Some(kind) = marker {
                self.mark(r_pr, kind, mark)?;
            }
            if let Some((fragment, node)) = mark_r_pr {
                import_children(&mut self.out, r_pr, fragment, node, RPR_TRACKING);
            }
        }

        if let Some(current) = current {
            if let Some(sect_pr) = current
                .root()
                .and_then(|r| current.first_child_named(r, W::NS, "sectPr"))
            {
                self.out.import_node(current, sect_pr, Some(p_pr));
            }
        }

        if let Some(previous) = previous {
            let change = self.property_change(p_pr, W::pPrChange(), mark)?;
            let inner = self.out.add_child(change, XmlNodeData::element(W::pPr()));
            if let Some(old) = previous.property("pPr") {
                copy_property_children(&mut self.out, inner, old, PPR_SPECIAL);
            }
        }
        Ok(())
    }

    // ---- inline level ----

    fn inline(&mut self, parent: NodeId, atoms: &[MergedAtom<'a>], level: usize) -> Result<()> {
        let mut i = 0;
        while i < atoms.len() {
            let merged = &atoms[i];
            let wrappers = merged.atom.wrappers();
            if wrappers.len() > level {
                let (unid, snapshot) = self.resolve(&wrappers[level]);
                let mut j = i + 1;
                while j < atoms.len() {
                    let w = atoms[j].atom.wrappers();
                    if w.len() <= level || self.resolve(&w[level]).0 != unid {
                        break;
                    }
                    j += 1;
                }
                let wrapper = self.element_from_snapshot(parent, &snapshot);
                self.inline(wrapper, &atoms[i..j], level + 1)?;
                i = j;
                continue;
            }

            if let AtomContent::Math(markup) = &merged.atom.content {
                self.math(parent, merged, markup)?;
                i += 1;
                continue;
            }

            let key = merged.marker_key();
            let mut j = i + 1;
            while j < atoms.len()
                && atoms[j].atom.wrappers().len() == level
                && !matches!(atoms[j].atom.content, AtomContent::Math(_))
                && atoms[j].marker_key() == key
            {
                j += 1;
            }
            self.marked_runs(parent, &atoms[i..j])?;
            i = j;
        }
        Ok(())
    }

    /// Runs sharing one status and author, wrapped in their marker.
    fn marked_runs(&mut self, parent: NodeId, atoms: &[MergedAtom<'a>]) -> Result<()> {
        let Some(first) = atoms.first() else {
            return Ok(());
        };
        let container = match first.status.marker() {
            None => parent,
            Some(kind) => {
                let marker = self.mark(parent, kind, first)?;
                if let Some(id) = first.move_id {
                    let attribution = self.attribution(first.author)?;
                    wrap_move_range(
                        &mut self.out,
                        marker,
                        marker,
                        kind,
                        &format!("move{id}"),
                        &attribution,
                        &mut self.ids,
                    );
                }
                marker
            }
        };

        let mut i = 0;
        while i < atoms.len() {
            let key = atoms[i].run_key();
            let mut j = i + 1;
            while j < atoms.len() && atoms[j].run_key() == key {
                j += 1;
            }
            self.run(container, &atoms[i..j])?;
            i = j;
        }
        Ok(())
    }

    fn run(&mut self, parent: NodeId, atoms: &[MergedAtom<'a>]) -> Result<()> {
        let Some(first) = atoms.first() else {
            return Ok(());
        };
        let run = match first.run_element() {
            Some(r) => self.out.add_child(
                parent,
                XmlNodeData::element_with_attrs(r.name.clone(), r.attributes.clone()),
            ),
            None => self.out.add_child(parent, XmlNodeData::element(W::r())),
        };
        self.run_properties(run, first)?;

        let deleted = first.status == MergedStatus::Deleted;
        let mut pending = PendingText::default();
        for merged in atoms {
            match &merged.atom.content {
                AtomContent::Text(c) => pending.push(&mut self.out, run, false, deleted, *c),
                AtomContent::InstrText(c) => pending.push(&mut self.out, run, true, deleted, *c),
                AtomContent::Inline(kind, markup) => {
                    pending.flush(&mut self.out, run, deleted);
                    self.inline_element(run, merged, *kind, markup)?;
                }
                AtomContent::Math(_) | AtomContent::ParagraphMark => {
                    return Err(RevmarkError::InternalInconsistency(
                        "paragraph-level atom inside a run".into(),
                    ))
                }
            }
        }
        pending.flush(&mut self.out, run, deleted);
        Ok(())
    }

    fn run_properties(&mut self, run: NodeId, first: &MergedAtom<'a>) -> Result<()> {
        let current = first.run_element().and_then(|r| r.property("rPr"));
        if current.is_none() && first.previous.is_none() {
            return Ok(());
        }
        let r_pr = match current.and_then(|c| c.root().and_then(|r| c.get(r).cloned())) {
            Some(data) => self.out.add_child(run, data),
            None => self.out.add_child(run, XmlNodeData::element(W::rPr())),
        };
        if let Some(current) = current {
            copy_property_children(&mut self.out, r_pr, current, RPR_TRACKING);
        }
        if let Some(previous) = &first.previous {
            let change = self.property_change(r_pr, W::rPrChange(), first)?;
            let inner = self.out.add_child(change, XmlNodeData::element(W::rPr()));
            if let Some(old) = previous.property("rPr") {
                copy_property_children(&mut self.out, inner, old, RPR_TRACKING);
            }
        }
        Ok(())
    }

    fn inline_element(
        &mut self,
        run: NodeId,
        merged: &MergedAtom<'a>,
        kind: InlineKind,
        markup: &XmlDocument,
    ) -> Result<()> {
        let node = self
            .out
            .import_fragment(markup, run)
            .ok_or_else(|| RevmarkError::InternalInconsistency("empty inline markup".into()))?;

        if let Some(note_kind) = kind.note_kind() {
            let id = self.note(note_kind, &merged.nested)?;
            self.out.set_attribute(node, &W::id(), &id);
        } else if kind == InlineKind::Drawing && !merged.nested.is_empty() {
            let boxes = outermost_text_boxes(&self.out, node);
            if boxes.len() != merged.nested.len() {
                return Err(RevmarkError::InternalInconsistency(format!(
                    "drawing has {} text boxes but {} merged parts",
                    boxes.len(),
                    merged.nested.len()
                )));
            }
            for (text_box, part) in boxes.into_iter().zip(&merged.nested) {
                let PartKey::TextBox { owner, index } = &part.key else {
                    return Err(RevmarkError::InternalInconsistency(format!(
                        "drawing owns a {:?} part",
                        part.key
                    )));
                };
                trace!(%owner, index, atoms = part.atoms.len(), "rebuilding text box");
                let old: Vec<NodeId> = self.out.children(text_box).collect();
                for child in old {
                    self.out.remove(child);
                }
                self.blocks(text_box, &part.atoms, 0)?;
            }
        }
        Ok(())
    }

    /// Rebuilds the note owned by a reference and returns its new id.
    fn note(&mut self, kind: NoteKind, nested: &[MergedPart<'a>]) -> Result<String> {
        let part = nested.first().ok_or_else(|| {
            RevmarkError::InternalInconsistency("note reference without note content".into())
        })?;
        let source = match &part.key {
            PartKey::Note { kind: k, id } if *k == kind => id.clone(),
            other => {
                return Err(RevmarkError::InternalInconsistency(format!(
                    "{kind:?} reference owns a {other:?} part"
                )))
            }
        };
        let next = self.next_note_id.entry(kind).or_insert(1);
        let id = next.to_string();
        *next += 1;

        let mut attributes: Vec<XAttribute> = part
            .root
            .as_ref()
            .map(|r| r.attributes.clone())
            .unwrap_or_default();
        attributes.retain(|a| a.name != W::id());
        attributes.insert(0, XAttribute::new(W::id(), &id));
        let name = part
            .root
            .as_ref()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| kind.note_name());

        let note = self
            .out
            .new_node(XmlNodeData::element_with_attrs(name, attributes));
        self.blocks(note, &part.atoms, 0)?;
        trace!(?kind, %source, id = %id, atoms = part.atoms.len(), "rebuilt note");
        self.notes.entry(kind).or_default().push(note);
        Ok(id)
    }

    /// Math carries its revision state on each `m:r` through a `w:rPr`
    /// marker rather than an enclosing `w:ins` / `w:del`.
    fn math(&mut self, parent: NodeId, merged: &MergedAtom<'a>, markup: &XmlDocument) -> Result<()> {
        let node = self
            .out
            .import_fragment(markup, parent)
            .ok_or_else(|| RevmarkError::InternalInconsistency("empty math markup".into()))?;
        let Some(kind) = merged.status.marker() else {
            return Ok(());
        };
        let kind = if kind.is_removal() {
            MarkerKind::Deletion
        } else {
            MarkerKind::Insertion
        };
        let math_runs: Vec<NodeId> = self
            .out
            .descendants(node)
            .filter(|&n| self.out.is_named(n, M::NS, "r"))
            .collect();
        for m_r in math_runs {
            let r_pr = match self.out.first_child_named(m_r, W::NS, "rPr") {
                Some(existing) => existing,
                None => {
                    let new = self.out.new_node(XmlNodeData::element(W::rPr()));
                    match self.out.first_child_named(m_r, M::NS, "rPr") {
                        Some(math_props) => self.out.move_after(math_props, new),
                        None => self.out.prepend(m_r, new),
                    }
                    new
                }
            };
            let marker = self.mark(r_pr, kind, merged)?;
            self.out.prepend(r_pr, marker);
        }
        Ok(())
    }
}

fn paragraph_mark<'m, 'a>(atoms: &'m [MergedAtom<'a>]) -> Result<&'m MergedAtom<'a>> {
    atoms
        .last()
        .filter(|m| m.atom.is_paragraph_mark())
        .ok_or_else(|| RevmarkError::InternalInconsistency("paragraph without mark".into()))
}

/// Note ids below this are taken by separator notes of the base document.
fn first_free_note_id(base: &XmlDocument, kind: NoteKind) -> i64 {
    let Some(root) = base.root() else { return 1 };
    let name = kind.container_name();
    let Some(container) = base.elements_by_name(root, &name).next() else {
        return 1;
    };
    base.element_children(container)
        .filter(|&n| is_special_note(base, n))
        .filter_map(|n| base.attribute(n, &W::id()).and_then(|id| id.parse::<i64>().ok()))
        .max()
        .map_or(1, |max| (max + 1).max(1))
}

fn import_children(
    out: &mut XmlDocument,
    parent: NodeId,
    fragment: &XmlDocument,
    node: NodeId,
    excluded: &[&str],
) {
    for child in fragment.element_children(node) {
        let skip = fragment
            .name(child)
            .is_some_and(|n| n.in_namespace(W::NS) && excluded.contains(&n.local_name.as_str()));
        if !skip {
            out.import_node(fragment, child, Some(parent));
        }
    }
}

/// Characters collected for the next `w:t` / `w:instrText` element.
#[derive(Default)]
struct PendingText {
    text: String,
    instruction: bool,
}

impl PendingText {
    fn push(&mut self, out: &mut XmlDocument, run: NodeId, instruction: bool, deleted: bool, c: char) {
        if !self.text.is_empty() && self.instruction != instruction {
            self.flush(out, run, deleted);
        }
        self.instruction = instruction;
        self.text.push(c);
    }

    fn flush(&mut self, out: &mut XmlDocument, run: NodeId, deleted: bool) {
        if self.text.is_empty() {
            return;
        }
        let name: XName = match (self.instruction, deleted) {
            (false, false) => W::t(),
            (false, true) => W::delText(),
            (true, false) => W::instrText(),
            (true, true) => W::delInstrText(),
        };
        let attributes = if needs_space_preserve(&self.text) {
            vec![XAttribute::new(XML::space(), "preserve")]
        } else {
            Vec::new()
        };
        let element = out.add_child(run, XmlNodeData::element_with_attrs(name, attributes));
        out.add_child(element, XmlNodeData::text(&self.text));
        self.text.clear();
    }
}

fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace)
        || text.ends_with(char::is_whitespace)
        || text.contains("  ")
}
