//! Structural comparison of word-processing documents.
//!
//! Documents are WordprocessingML main parts (`w:document`), optionally
//! with their `w:footnotes` / `w:endnotes` parts grafted under the root.
//! The crate compares two documents into tracked-change markup, merges
//! several reviewers' copies into one, lists the revisions a document
//! carries, and accepts or rejects them.

pub mod error;
pub mod types;
pub mod xml;
pub mod hash;
pub mod util;
pub mod wml;

pub use error::{Result, RevmarkError};
pub use types::Rgb;
pub use xml::builder::serialize;
pub use xml::parser::parse;
pub use xml::XmlDocument;

pub use wml::{
    accept_revisions, compare, consolidate, document_text, get_revisions, reject_revisions,
    ComparerSettings, RevisedDocument, RevisionKind, RevisionRecord, RevisionSummary,
};
