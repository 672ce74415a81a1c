//! Revision records
//!
//! Read-only projections of the tracked-change markup in a document, as
//! produced by [`get_revisions`](super::get_revisions::get_revisions).

use crate::types::Rgb;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of tracked change reported by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RevisionKind {
    /// Content inserted (`w:ins`)
    Insertion,
    /// Content deleted (`w:del`)
    Deletion,
    /// Run properties changed (`w:rPrChange`)
    FormatChange,
    /// Content moved (`w:moveTo`, paired with its `w:moveFrom` range)
    Move,
    /// Paragraph properties changed only in their numbering
    NumberingChange,
    /// Any other paragraph property change (`w:pPrChange`)
    ParagraphPropertyChange,
}

impl RevisionKind {
    pub fn is_format(self) -> bool {
        matches!(
            self,
            RevisionKind::FormatChange
                | RevisionKind::NumberingChange
                | RevisionKind::ParagraphPropertyChange
        )
    }
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RevisionKind::Insertion => "insertion",
            RevisionKind::Deletion => "deletion",
            RevisionKind::FormatChange => "format-change",
            RevisionKind::Move => "move",
            RevisionKind::NumberingChange => "numbering-change",
            RevisionKind::ParagraphPropertyChange => "paragraph-property-change",
        };
        f.write_str(label)
    }
}

/// One tracked change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub kind: RevisionKind,
    pub author: String,
    /// `w:date` of the marker, when present
    pub date: Option<String>,
    /// Best-effort text of the affected content; paragraph marks as `\n`
    pub text: String,
    /// Location of the (first) marker, e.g. `/w:document/w:body/w:p[2]/w:ins[1]`
    pub path: String,
    /// `w:id` of the (first) marker
    pub id: Option<String>,
    /// Reviewer color of consolidated markup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    /// For moves, location of the source range start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<String>,
}

/// Record counts per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub insertions: usize,
    pub deletions: usize,
    pub format_changes: usize,
    pub moves: usize,
    pub numbering_changes: usize,
    pub paragraph_property_changes: usize,
}

impl RevisionSummary {
    pub fn from_records(records: &[RevisionRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            let slot = match record.kind {
                RevisionKind::Insertion => &mut summary.insertions,
                RevisionKind::Deletion => &mut summary.deletions,
                RevisionKind::FormatChange => &mut summary.format_changes,
                RevisionKind::Move => &mut summary.moves,
                RevisionKind::NumberingChange => &mut summary.numbering_changes,
                RevisionKind::ParagraphPropertyChange => &mut summary.paragraph_property_changes,
            };
            *slot += 1;
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.insertions
            + self.deletions
            + self.format_changes
            + self.moves
            + self.numbering_changes
            + self.paragraph_property_changes
    }
}
