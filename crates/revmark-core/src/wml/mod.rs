mod atom_list;
mod coalesce;
mod comparer;
mod comparison_unit;
mod consolidate;
mod document;
mod edit_script;
mod formatting;
mod get_revisions;
mod lcs_algorithm;
mod revision;
mod revision_accepter;
mod settings;
mod types;

pub use comparer::compare;
pub use comparison_unit::NoteKind;
pub use consolidate::consolidate;
pub use document::{document_body, document_text, validate};
pub use formatting::only_numbering_differs;
pub use get_revisions::get_revisions;
pub use revision::is_revision_element_tag;
pub use revision_accepter::{accept_revisions, reject_revisions};
pub use settings::{ComparerSettings, RevisedDocument};
pub use types::{RevisionKind, RevisionRecord, RevisionSummary};
