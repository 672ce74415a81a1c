//! Comparison atoms and the parts they are grouped into.
//!
//! An atom is the smallest unit the correlator aligns: one character of run
//! text, one atomic inline element (tab, break, drawing, field character,
//! note reference, ...), one inline math object, or the implicit paragraph
//! mark that ends every paragraph.
//!
//! Atoms never point back into the tree they were read from. Each one holds
//! shared snapshots of its ancestors (from the first block-level element of
//! its part down to its run) so that the synthesizer can rebuild containers
//! from atoms alone. Snapshots are shared through `Arc`, so the atoms of one
//! run cost a pointer per ancestor.

use crate::util::lcs::Hashable;
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::W;
use crate::xml::xname::{XAttribute, XName};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identity of one source element: which input document and its preorder
/// position there. Assigned deterministically so repeated atomization of the
/// same tree yields the same identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Unid {
    pub doc: u32,
    pub seq: u32,
}

impl fmt::Display for Unid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.doc, self.seq)
    }
}

/// Value copy of an ancestor element: name, attributes and its leading
/// property children (`w:pPr`, `w:rPr`, `w:tblPr` + `w:tblGrid`, ...).
#[derive(Debug, Clone)]
pub struct ElementSnapshot {
    pub name: XName,
    pub attributes: Vec<XAttribute>,
    pub properties: Vec<XmlDocument>,
    /// Hash of the normalized formatting properties; empty when the element
    /// carries none that take part in format-change detection.
    pub props_hash: String,
    pub unid: Unid,
}

impl ElementSnapshot {
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.name.is(namespace, local_name)
    }

    pub fn local_name(&self) -> &str {
        &self.name.local_name
    }

    /// The property child with the given local name in the `w` namespace.
    pub fn property(&self, local_name: &str) -> Option<&XmlDocument> {
        self.properties.iter().find(|fragment| {
            fragment
                .root()
                .is_some_and(|root| fragment.is_named(root, W::NS, local_name))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NoteKind {
    Footnote,
    Endnote,
}

impl NoteKind {
    pub fn container_name(self) -> XName {
        match self {
            NoteKind::Footnote => W::footnotes(),
            NoteKind::Endnote => W::endnotes(),
        }
    }

    pub fn note_name(self) -> XName {
        match self {
            NoteKind::Footnote => W::footnote(),
            NoteKind::Endnote => W::endnote(),
        }
    }
}

/// Which logical part of the document an atom belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartKey {
    Body,
    Note { kind: NoteKind, id: String },
    TextBox { owner: Unid, index: usize },
}

/// Atomic inline elements that are compared as a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineKind {
    Tab,
    Break,
    CarriageReturn,
    NoBreakHyphen,
    SoftHyphen,
    Symbol,
    FieldChar,
    FootnoteReference,
    EndnoteReference,
    /// `w:drawing` / `w:pict`; text boxes inside are nested parts.
    Drawing,
    /// Any other run child, identified by the hash of its markup.
    Opaque,
}

impl InlineKind {
    pub fn note_kind(self) -> Option<NoteKind> {
        match self {
            InlineKind::FootnoteReference => Some(NoteKind::Footnote),
            InlineKind::EndnoteReference => Some(NoteKind::Endnote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AtomContent {
    /// One character of `w:t` (or `w:delText` in pre-resolved input).
    Text(char),
    /// One character of a field instruction.
    InstrText(char),
    /// An atomic run child, kept as a copy of its markup.
    Inline(InlineKind, Arc<XmlDocument>),
    /// Paragraph-level `m:oMath` / `m:oMathPara`.
    Math(Arc<XmlDocument>),
    ParagraphMark,
}

#[derive(Debug, Clone)]
pub struct ComparisonAtom {
    pub content: AtomContent,
    /// Ancestors from the outermost block-level element of the part down to
    /// the run (or the paragraph, for marks and math).
    pub ancestors: Vec<Arc<ElementSnapshot>>,
    /// Content identity; formatting never takes part in it.
    pub hash: String,
}

impl ComparisonAtom {
    pub fn is_paragraph_mark(&self) -> bool {
        matches!(self.content, AtomContent::ParagraphMark)
    }

    pub fn as_char(&self) -> Option<char> {
        match self.content {
            AtomContent::Text(c) | AtomContent::InstrText(c) => Some(c),
            _ => None,
        }
    }

    /// Index of the enclosing `w:p` in `ancestors`.
    pub fn paragraph_depth(&self) -> Option<usize> {
        self.ancestors.iter().rposition(|a| a.is(W::NS, "p"))
    }

    pub fn paragraph(&self) -> Option<&Arc<ElementSnapshot>> {
        self.paragraph_depth().map(|d| &self.ancestors[d])
    }

    /// The enclosing run, for atoms that live inside one.
    pub fn run(&self) -> Option<&Arc<ElementSnapshot>> {
        self.ancestors.last().filter(|a| a.is(W::NS, "r"))
    }

    /// Elements between the paragraph and the run (hyperlinks, smart tags,
    /// run-level content controls, simple fields).
    pub fn wrappers(&self) -> &[Arc<ElementSnapshot>] {
        let Some(p) = self.paragraph_depth() else {
            return &[];
        };
        if self.is_paragraph_mark() {
            return &[];
        }
        let end = if self.run().is_some() {
            self.ancestors.len() - 1
        } else {
            self.ancestors.len()
        };
        &self.ancestors[(p + 1).min(end)..end]
    }

    /// Formatting identity: paragraph properties for marks, run properties
    /// for everything inside a run.
    pub fn format_key(&self) -> &str {
        if self.is_paragraph_mark() {
            return self.paragraph().map(|p| p.props_hash.as_str()).unwrap_or("");
        }
        self.run().map(|r| r.props_hash.as_str()).unwrap_or("")
    }
}

impl Hashable for ComparisonAtom {
    fn hash(&self) -> &str {
        &self.hash
    }
}

/// The atoms of one part plus the parts nested under its owner atoms
/// (notes under their references, text boxes under their drawings).
#[derive(Debug, Clone)]
pub struct AtomizedPart {
    pub key: PartKey,
    /// The element that holds the part's blocks (`w:footnote`, `w:endnote`);
    /// `None` for the body and text boxes.
    pub root: Option<Arc<ElementSnapshot>>,
    pub atoms: Vec<ComparisonAtom>,
    pub nested: BTreeMap<usize, Vec<AtomizedPart>>,
}

impl AtomizedPart {
    pub fn new(key: PartKey, root: Option<Arc<ElementSnapshot>>) -> Self {
        Self {
            key,
            root,
            atoms: Vec::new(),
            nested: BTreeMap::new(),
        }
    }

    pub fn nested_parts(&self, owner: usize) -> &[AtomizedPart] {
        self.nested.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total atom count including nested parts.
    pub fn total_atoms(&self) -> usize {
        self.atoms.len()
            + self
                .nested
                .values()
                .flatten()
                .map(AtomizedPart::total_atoms)
                .sum::<usize>()
    }

    /// Plain text of the part's atoms, marks rendered as `\n`.
    #[cfg(test)]
    pub fn text(&self) -> String {
        self.atoms
            .iter()
            .filter_map(|a| match a.content {
                AtomContent::Text(c) => Some(c),
                AtomContent::ParagraphMark => Some('\n'),
                AtomContent::Inline(InlineKind::Tab, _) => Some('\t'),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(local: &str, seq: u32) -> Arc<ElementSnapshot> {
        Arc::new(ElementSnapshot {
            name: XName::new(W::NS, local),
            attributes: Vec::new(),
            properties: Vec::new(),
            props_hash: format!("{local}-props"),
            unid: Unid { doc: 0, seq },
        })
    }

    #[test]
    fn run_atom_exposes_paragraph_run_and_wrappers() {
        let atom = ComparisonAtom {
            content: AtomContent::Text('x'),
            ancestors: vec![snapshot("p", 1), snapshot("hyperlink", 2), snapshot("r", 3)],
            hash: "t:x".into(),
        };
        assert_eq!(atom.paragraph_depth(), Some(0));
        assert_eq!(atom.run().map(|r| r.unid.seq), Some(3));
        assert_eq!(atom.wrappers().len(), 1);
        assert_eq!(atom.format_key(), "r-props");
        assert_eq!(atom.as_char(), Some('x'));
    }

    #[test]
    fn paragraph_mark_uses_paragraph_formatting() {
        let atom = ComparisonAtom {
            content: AtomContent::ParagraphMark,
            ancestors: vec![snapshot("tbl", 1), snapshot("tr", 2), snapshot("tc", 3), snapshot("p", 4)],
            hash: "¶".into(),
        };
        assert!(atom.is_paragraph_mark());
        assert_eq!(atom.paragraph_depth(), Some(3));
        assert!(atom.run().is_none());
        assert!(atom.wrappers().is_empty());
        assert_eq!(atom.format_key(), "p-props");
    }

    #[test]
    fn unid_display() {
        assert_eq!(Unid { doc: 2, seq: 17 }.to_string(), "2.17");
    }
}
