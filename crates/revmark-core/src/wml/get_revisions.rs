//! Revision extraction.
//!
//! Walks a document carrying tracked-change markup (body, then footnotes,
//! then endnotes) and yields one record per logical revision:
//!
//! - adjacent insertion / deletion / move fragments with the same
//!   attribution form one record, paragraph marks contributing `\n`;
//! - a row marked on `w:trPr` is one record and absorbs the same-kind
//!   markers of its content;
//! - each `w:rPrChange` / `w:pPrChange` is its own record;
//! - a marker shared by several consolidated reviewers yields one record
//!   per reviewer.

use super::comparison_unit::NoteKind;
use super::document::{document_body, is_special_note, notes_container};
use super::formatting::only_numbering_differs;
use super::revision::co_authors;
use super::settings::ComparerSettings;
use super::types::{RevisionKind, RevisionRecord};
use crate::error::Result;
use crate::types::Rgb;
use crate::xml::arena::XmlDocument;
use crate::xml::namespaces::{M, RVM, W};
use crate::xml::xname::XName;
use indextree::NodeId;
use std::collections::HashMap;
use tracing::debug;

pub fn get_revisions(doc: &XmlDocument, settings: &ComparerSettings) -> Result<Vec<RevisionRecord>> {
    settings.validate()?;
    let body = document_body(doc)?;

    let mut extractor = Extractor {
        doc,
        track_formatting: settings.track_formatting_changes,
        records: Vec::new(),
        open: None,
        row: None,
        move_sources: move_sources(doc),
        current_move: None,
    };
    extractor.walk(body);
    for kind in [NoteKind::Footnote, NoteKind::Endnote] {
        let Some(container) = notes_container(doc, kind) else {
            continue;
        };
        for note in doc.element_children(container) {
            if is_special_note(doc, note) {
                continue;
            }
            extractor.open = None;
            extractor.walk(note);
        }
    }

    debug!(records = extractor.records.len(), "extracted revisions");
    Ok(extractor.records)
}

/// What must match for two adjacent fragments to form one record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribution {
    kind: RevisionKind,
    author: String,
    date: Option<String>,
    color: Option<Rgb>,
    co_authors: Vec<(String, Option<Rgb>)>,
    move_name: Option<String>,
}

struct Extractor<'d> {
    doc: &'d XmlDocument,
    track_formatting: bool,
    records: Vec<RevisionRecord>,
    /// The records (one per author) later fragments may still extend.
    open: Option<(Attribution, Vec<usize>)>,
    /// Kind and author of the enclosing whole-row revision.
    row: Option<(RevisionKind, String)>,
    /// `w:moveFromRangeStart` paths by move name.
    move_sources: HashMap<String, String>,
    current_move: Option<String>,
}

impl Extractor<'_> {
    fn walk(&mut self, node: NodeId) {
        let children: Vec<NodeId> = self.doc.element_children(node).collect();
        for child in children {
            self.element(child);
        }
    }

    fn element(&mut self, node: NodeId) {
        let doc = self.doc;
        let Some(name) = doc.name(node) else { return };
        if name.is(M::NS, "r") {
            return self.math_run(node);
        }
        if !name.in_namespace(W::NS) {
            return self.walk(node);
        }
        match name.local_name.as_str() {
            "p" => self.paragraph(node),
            "tr" => self.row(node),
            "r" => self.run(node),
            "ins" | "del" | "moveFrom" | "moveTo" => self.marker(node),
            "moveToRangeStart" => {
                self.current_move = doc.attribute(node, &W::name()).map(str::to_string);
            }
            "txbxContent" => self.text_box(node),
            "tblGrid" => {}
            local if local.ends_with("Pr") || local.ends_with("PrEx") => {}
            _ => self.walk(node),
        }
    }

    fn paragraph(&mut self, p: NodeId) {
        let doc = self.doc;
        let p_pr = doc.first_child_named(p, W::NS, "pPr");
        if let Some(p_pr) = p_pr {
            self.paragraph_property_change(p, p_pr);
        }
        self.walk(p);

        let mark = p_pr
            .and_then(|p_pr| doc.first_child_named(p_pr, W::NS, "rPr"))
            .and_then(|r_pr| doc.element_children(r_pr).find(|&c| marker_kind(doc, c).is_some()));
        match mark {
            Some(marker) => self.fragment(marker, "\n".to_string()),
            None => self.open = None,
        }
    }

    fn row(&mut self, tr: NodeId) {
        let doc = self.doc;
        let marker = doc
            .first_child_named(tr, W::NS, "trPr")
            .and_then(|tr_pr| doc.element_children(tr_pr).find(|&c| marker_kind(doc, c).is_some()));
        let Some(marker) = marker else {
            return self.walk(tr);
        };
        let Some(kind) = marker_kind(doc, marker).filter(|k| {
            matches!(k, RevisionKind::Insertion | RevisionKind::Deletion)
        }) else {
            return self.walk(tr);
        };

        let author = doc.attribute(marker, &W::author()).unwrap_or_default();
        // content revised by anyone else is reported on its own
        let absorbed = |n: NodeId| {
            !is_content_marker(doc, n)
                || (marker_kind(doc, n) == Some(kind)
                    && doc.attribute(n, &W::author()).unwrap_or_default() == author)
        };
        let mut text = String::new();
        for p in doc.descendants(tr).filter(|&n| doc.is_named(n, W::NS, "p")) {
            if inside_text_box(doc, p, tr) {
                continue;
            }
            collect_text_where(doc, p, &absorbed, &mut text);
            text.push('\n');
        }
        let record = self.record(marker, kind, text, None);
        self.push(marker, record);
        self.open = None;
        let author = author.to_string();

        let outer = self.row.replace((kind, author));
        self.walk(tr);
        self.row = outer;
        self.open = None;
    }

    fn run(&mut self, r: NodeId) {
        let doc = self.doc;
        if let Some(change) = doc
            .first_child_named(r, W::NS, "rPr")
            .and_then(|r_pr| doc.first_child_named(r_pr, W::NS, "rPrChange"))
        {
            if self.track_formatting {
                let mut text = String::new();
                collect_text(doc, r, &mut text);
                let record = self.record(change, RevisionKind::FormatChange, text, None);
                self.push(change, record);
            }
        }
        self.open = None;
        self.text_boxes_below(r);
    }

    /// A run-level `w:ins` / `w:del` / `w:moveFrom` / `w:moveTo`.
    fn marker(&mut self, node: NodeId) {
        let mut text = String::new();
        collect_text(self.doc, node, &mut text);
        self.fragment(node, text);
        self.text_boxes_below(node);
    }

    fn math_run(&mut self, m_r: NodeId) {
        let doc = self.doc;
        let marker = doc
            .first_child_named(m_r, W::NS, "rPr")
            .and_then(|r_pr| doc.element_children(r_pr).find(|&c| marker_kind(doc, c).is_some()));
        match marker {
            Some(marker) => {
                let mut text = String::new();
                collect_text(doc, m_r, &mut text);
                self.fragment(marker, text);
            }
            None => self.open = None,
        }
    }

    fn text_box(&mut self, node: NodeId) {
        let outer = self.open.take();
        self.walk(node);
        self.open = outer;
    }

    fn text_boxes_below(&mut self, node: NodeId) {
        let doc = self.doc;
        let boxes: Vec<NodeId> = doc
            .descendants(node)
            .filter(|&n| doc.is_named(n, W::NS, "txbxContent"))
            .filter(|&n| !inside_text_box(doc, n, node))
            .collect();
        for text_box in boxes {
            self.text_box(text_box);
        }
    }

    /// Adds `text` to the open record when the marker's attribution matches,
    /// otherwise starts a new record.
    fn fragment(&mut self, marker: NodeId, text: String) {
        let doc = self.doc;
        let Some(kind) = marker_kind(doc, marker) else {
            // moveFrom content is reported through its moveTo record
            self.open = None;
            return;
        };
        let author = doc.attribute(marker, &W::author()).unwrap_or_default();
        if let Some((row_kind, row_author)) = &self.row {
            if *row_kind == kind && row_author == author {
                return;
            }
        }

        let move_name = (kind == RevisionKind::Move)
            .then(|| self.current_move.clone())
            .flatten();
        let key = Attribution {
            kind,
            author: author.to_string(),
            date: doc.attribute(marker, &W::date()).map(str::to_string),
            color: color_of(doc, marker),
            co_authors: co_authors(doc, marker),
            move_name: move_name.clone(),
        };
        if let Some((open_key, indices)) = &self.open {
            if *open_key == key {
                for &i in indices {
                    self.records[i].text.push_str(&text);
                }
                return;
            }
        }

        let moved_from = move_name.and_then(|name| self.move_sources.get(&name).cloned());
        let record = self.record(marker, kind, text, moved_from);
        let indices = self.push(marker, record);
        self.open = Some((key, indices));
    }

    /// Adds `record`, then a copy for each co-author named on `marker`.
    /// Returns the indices of the new records.
    fn push(&mut self, marker: NodeId, record: RevisionRecord) -> Vec<usize> {
        let first = self.records.len();
        let shared: Vec<RevisionRecord> = co_authors(self.doc, marker)
            .into_iter()
            .map(|(author, color)| RevisionRecord {
                author,
                color,
                ..record.clone()
            })
            .collect();
        self.records.push(record);
        self.records.extend(shared);
        (first..self.records.len()).collect()
    }

    fn paragraph_property_change(&mut self, p: NodeId, p_pr: NodeId) {
        let doc = self.doc;
        let Some(change) = doc.first_child_named(p_pr, W::NS, "pPrChange") else {
            return;
        };
        if !self.track_formatting {
            return;
        }
        let current = doc.extract_subtree(p_pr);
        let previous = doc
            .first_child_named(change, W::NS, "pPr")
            .map(|n| doc.extract_subtree(n));
        let kind = if only_numbering_differs(Some(&current), previous.as_ref()) {
            RevisionKind::NumberingChange
        } else {
            RevisionKind::ParagraphPropertyChange
        };
        let mut text = String::new();
        collect_text(doc, p, &mut text);
        let record = self.record(change, kind, text, None);
        self.push(change, record);
    }

    fn record(
        &self,
        marker: NodeId,
        kind: RevisionKind,
        text: String,
        moved_from: Option<String>,
    ) -> RevisionRecord {
        let doc = self.doc;
        RevisionRecord {
            kind,
            author: doc
                .attribute(marker, &W::author())
                .unwrap_or_default()
                .to_string(),
            date: doc.attribute(marker, &W::date()).map(str::to_string),
            text,
            path: node_path(doc, marker),
            id: doc.attribute(marker, &W::id()).map(str::to_string),
            color: color_of(doc, marker),
            moved_from,
        }
    }
}

/// Kind of a content / mark / row marker; `None` for `w:moveFrom` and for
/// anything that is not a marker.
fn marker_kind(doc: &XmlDocument, node: NodeId) -> Option<RevisionKind> {
    let name = doc.name(node)?;
    if !name.in_namespace(W::NS) {
        return None;
    }
    match name.local_name.as_str() {
        "ins" => Some(RevisionKind::Insertion),
        "del" => Some(RevisionKind::Deletion),
        "moveTo" => Some(RevisionKind::Move),
        _ => None,
    }
}

fn color_of(doc: &XmlDocument, marker: NodeId) -> Option<Rgb> {
    doc.attribute(marker, &RVM::color())
        .and_then(|hex| hex.parse().ok())
}

fn inside_text_box(doc: &XmlDocument, node: NodeId, limit: NodeId) -> bool {
    doc.ancestors(node)
        .skip(1)
        .take_while(|&a| a != limit)
        .any(|a| doc.is_named(a, W::NS, "txbxContent"))
}

fn is_content_marker(doc: &XmlDocument, node: NodeId) -> bool {
    doc.name(node).is_some_and(|n| {
        n.in_namespace(W::NS) && matches!(n.local_name.as_str(), "ins" | "del" | "moveFrom" | "moveTo")
    })
}

/// Visible text below `node`, text boxes and field instructions excluded.
fn collect_text(doc: &XmlDocument, node: NodeId, out: &mut String) {
    collect_text_where(doc, node, &|_| true, out);
}

/// Like [`collect_text`], skipping every element `keep` rejects.
fn collect_text_where(doc: &XmlDocument, node: NodeId, keep: &dyn Fn(NodeId) -> bool, out: &mut String) {
    for child in doc.element_children(node) {
        if !keep(child) {
            continue;
        }
        let Some(name) = doc.name(child) else { continue };
        if name.is(M::NS, "t") {
            out.push_str(&doc.text_of(child));
            continue;
        }
        if !name.in_namespace(W::NS) {
            collect_text_where(doc, child, keep, out);
            continue;
        }
        match name.local_name.as_str() {
            "t" | "delText" => out.push_str(&doc.text_of(child)),
            "tab" => out.push('\t'),
            "br" | "cr" => out.push('\n'),
            "noBreakHyphen" => out.push('\u{2011}'),
            "pPr" | "rPr" | "txbxContent" | "instrText" | "delInstrText" => {}
            _ => collect_text_where(doc, child, keep, out),
        }
    }
}

fn move_sources(doc: &XmlDocument) -> HashMap<String, String> {
    let mut sources = HashMap::new();
    let Some(root) = doc.root() else {
        return sources;
    };
    for node in doc.descendants(root) {
        if !doc.is_named(node, W::NS, "moveFromRangeStart") {
            continue;
        }
        if let Some(name) = doc.attribute(node, &W::name()) {
            sources
                .entry(name.to_string())
                .or_insert_with(|| node_path(doc, node));
        }
    }
    sources
}

fn qualified(name: &XName) -> String {
    let prefix = match name.namespace.as_deref() {
        Some(W::NS) => Some("w"),
        Some(M::NS) => Some("m"),
        Some(RVM::NS) => Some(RVM::PREFIX),
        _ => None,
    };
    match prefix {
        Some(prefix) => format!("{prefix}:{}", name.local_name),
        None => name.local_name.clone(),
    }
}

/// XPath-like location with 1-based positions among same-named siblings.
fn node_path(doc: &XmlDocument, node: NodeId) -> String {
    let mut segments = Vec::new();
    for current in doc.ancestors(node) {
        let Some(name) = doc.name(current) else { continue };
        let mut position = 1;
        let mut sibling = doc.previous_sibling(current);
        while let Some(s) = sibling {
            if doc.name(s) == Some(name) {
                position += 1;
            }
            sibling = doc.previous_sibling(s);
        }
        segments.push(format!("{}[{position}]", qualified(name)));
    }
    segments.reverse();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wml::comparer::compare;
    use crate::xml::parser::parse;
    use pretty_assertions::assert_eq;

    const W_DECL: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn doc(body: &str) -> XmlDocument {
        parse(&format!(r#"<w:document {W_DECL}><w:body>{body}</w:body></w:document>"#)).unwrap()
    }

    fn para(text: &str) -> String {
        format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    fn summary(records: &[RevisionRecord]) -> Vec<(RevisionKind, &str)> {
        records.iter().map(|r| (r.kind, r.text.as_str())).collect()
    }

    #[test]
    fn adjacent_fragments_merge_across_paragraph_marks() {
        let d = doc(
            r#"<w:p><w:pPr><w:rPr><w:ins w:id="1" w:author="Ann"/></w:rPr></w:pPr><w:ins w:id="2" w:author="Ann"><w:r><w:t>new</w:t></w:r></w:ins></w:p><w:p><w:ins w:id="3" w:author="Ann"><w:r><w:t>er</w:t></w:r></w:ins><w:r><w:t> old</w:t></w:r></w:p>"#,
        );
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(summary(&records), vec![(RevisionKind::Insertion, "new\ner")]);
        assert_eq!(records[0].id.as_deref(), Some("2"));
        assert_eq!(records[0].path, "/w:document[1]/w:body[1]/w:p[1]/w:ins[1]");
    }

    #[test]
    fn different_authors_do_not_merge() {
        let d = doc(
            r#"<w:p><w:ins w:id="1" w:author="Ann"><w:r><w:t>a</w:t></w:r></w:ins><w:ins w:id="2" w:author="Bob"><w:r><w:t>b</w:t></w:r></w:ins></w:p>"#,
        );
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].author, "Bob");
    }

    #[test]
    fn deleted_row_is_one_record() {
        let d = doc(
            r#"<w:tbl><w:tr><w:trPr><w:del w:id="1" w:author="Ann"/></w:trPr><w:tc><w:p><w:pPr><w:rPr><w:del w:id="2" w:author="Ann"/></w:rPr></w:pPr><w:del w:id="3" w:author="Ann"><w:r><w:delText>a</w:delText></w:r></w:del></w:p></w:tc><w:tc><w:p><w:pPr><w:rPr><w:del w:id="4" w:author="Ann"/></w:rPr></w:pPr><w:del w:id="5" w:author="Ann"><w:r><w:delText>b</w:delText></w:r></w:del></w:p></w:tc></w:tr></w:tbl><w:p/>"#,
        );
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(summary(&records), vec![(RevisionKind::Deletion, "a\nb\n")]);
        assert_eq!(records[0].path, "/w:document[1]/w:body[1]/w:tbl[1]/w:tr[1]/w:trPr[1]/w:del[1]");
    }

    #[test]
    fn insertion_nested_in_deleted_row_is_kept_out_of_the_row_text() {
        let d = doc(
            r#"<w:tbl><w:tr><w:trPr><w:del w:id="1" w:author="Ann"/></w:trPr><w:tc><w:p><w:del w:id="2" w:author="Ann"><w:r><w:delText>a</w:delText></w:r></w:del><w:ins w:id="3" w:author="Bob"><w:r><w:t>b</w:t></w:r></w:ins></w:p></w:tc></w:tr></w:tbl><w:p/>"#,
        );
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(
            summary(&records),
            vec![(RevisionKind::Deletion, "a\n"), (RevisionKind::Insertion, "b")]
        );
        assert_eq!(records[1].author, "Bob");
    }

    #[test]
    fn format_and_numbering_changes() {
        let d = doc(
            r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="2"/></w:numPr><w:pPrChange w:id="1" w:author="Ann"><w:pPr/></w:pPrChange></w:pPr><w:r><w:rPr><w:b/><w:rPrChange w:id="2" w:author="Ann"><w:rPr/></w:rPrChange></w:rPr><w:t>bold</w:t></w:r></w:p><w:p><w:pPr><w:jc w:val="right"/><w:pPrChange w:id="3" w:author="Ann"><w:pPr/></w:pPrChange></w:pPr></w:p>"#,
        );
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(
            summary(&records),
            vec![
                (RevisionKind::NumberingChange, "bold"),
                (RevisionKind::FormatChange, "bold"),
                (RevisionKind::ParagraphPropertyChange, ""),
            ]
        );

        let quiet = ComparerSettings::default().with_track_formatting(false);
        assert!(get_revisions(&d, &quiet).unwrap().is_empty());
    }

    #[test]
    fn move_points_at_its_source() {
        let d = doc(
            r#"<w:p><w:moveFromRangeStart w:id="1" w:author="Ann" w:name="move1"/><w:moveFrom w:id="2" w:author="Ann"><w:r><w:t>moved</w:t></w:r></w:moveFrom><w:moveFromRangeEnd w:id="1"/></w:p><w:p><w:r><w:t>stay</w:t></w:r></w:p><w:p><w:moveToRangeStart w:id="3" w:author="Ann" w:name="move1"/><w:moveTo w:id="4" w:author="Ann"><w:r><w:t>moved</w:t></w:r></w:moveTo><w:moveToRangeEnd w:id="3"/></w:p>"#,
        );
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(summary(&records), vec![(RevisionKind::Move, "moved")]);
        assert_eq!(
            records[0].moved_from.as_deref(),
            Some("/w:document[1]/w:body[1]/w:p[1]/w:moveFromRangeStart[1]")
        );
    }

    #[test]
    fn consolidation_color_is_reported() {
        let d = parse(&format!(
            r#"<w:document {W_DECL} xmlns:rvm="http://schemas.revmark.dev/2024/consolidation"><w:body><w:p><w:ins w:id="1" w:author="Ann" rvm:color="00FF00"><w:r><w:t>x</w:t></w:r></w:ins></w:p></w:body></w:document>"#
        ))
        .unwrap();
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(records[0].color, Some(Rgb(0, 0xFF, 0)));
    }

    #[test]
    fn shared_markers_yield_a_record_per_reviewer() {
        let d = parse(&format!(
            r#"<w:document {W_DECL} xmlns:rvm="http://schemas.revmark.dev/2024/consolidation"><w:body><w:p><w:del w:id="1" w:author="Ann" rvm:color="FF0000" rvm:author2="Bob" rvm:color2="0000FF"><w:r><w:delText>gone </w:delText></w:r></w:del><w:del w:id="2" w:author="Ann" rvm:color="FF0000" rvm:author2="Bob" rvm:color2="0000FF"><w:r><w:delText>too</w:delText></w:r></w:del><w:r><w:rPr><w:b/><w:rPrChange w:id="3" w:author="Ann" rvm:author2="Bob"><w:rPr/></w:rPrChange></w:rPr><w:t>kept</w:t></w:r></w:p></w:body></w:document>"#
        ))
        .unwrap();
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        let who: Vec<(RevisionKind, &str, &str)> = records
            .iter()
            .map(|r| (r.kind, r.author.as_str(), r.text.as_str()))
            .collect();
        assert_eq!(
            who,
            vec![
                (RevisionKind::Deletion, "Ann", "gone too"),
                (RevisionKind::Deletion, "Bob", "gone too"),
                (RevisionKind::FormatChange, "Ann", "kept"),
                (RevisionKind::FormatChange, "Bob", "kept"),
            ]
        );
        assert_eq!(records[1].color, Some(Rgb(0, 0, 0xFF)));
        assert_eq!(records[1].path, records[0].path);
    }

    #[test]
    fn footnote_revisions_follow_the_body() {
        let d = parse(&format!(
            r#"<w:document {W_DECL}><w:body><w:p><w:del w:id="1" w:author="Ann"><w:r><w:delText>body</w:delText></w:r></w:del><w:r><w:footnoteReference w:id="1"/></w:r></w:p></w:body><w:footnotes><w:footnote w:type="separator" w:id="0"><w:p><w:ins w:id="9" w:author="Ann"><w:r><w:t>sep</w:t></w:r></w:ins></w:p></w:footnote><w:footnote w:id="1"><w:p><w:ins w:id="2" w:author="Ann"><w:r><w:t>note</w:t></w:r></w:ins></w:p></w:footnote></w:footnotes></w:document>"#
        ))
        .unwrap();
        let records = get_revisions(&d, &ComparerSettings::default()).unwrap();
        assert_eq!(
            summary(&records),
            vec![(RevisionKind::Deletion, "body"), (RevisionKind::Insertion, "note")]
        );
    }

    #[test]
    fn compare_output_round_trips_through_extraction() {
        let a = doc(&para("The quick fox"));
        let b = doc(&para("The quick brown fox"));
        let settings = ComparerSettings::default();
        let records = get_revisions(&compare(&a, &b, &settings).unwrap(), &settings).unwrap();
        assert_eq!(summary(&records), vec![(RevisionKind::Insertion, "brown ")]);
        assert_eq!(records[0].author, "revmark");
        assert!(records[0].date.is_none());
    }
}
