//! N-reviewer consolidation.
//!
//! Every reviewer's copy is correlated against the original independently
//! (in parallel), then the scripts are merged position by position over
//! the original's atoms:
//!
//! - insertions anchored before the same original atom are all kept, in
//!   reviewer order;
//! - an original atom removed by several reviewers is deleted once, on a
//!   marker attributed to the first of them that names the others as
//!   co-authors; moves out of such atoms become deletion plus insertion;
//! - formatting edits of one atom by several reviewers are combined into
//!   one property change shared the same way.
//!
//! The merged sequence is then synthesized over the original document.

use super::atom_list::atomize_document;
use super::coalesce::{synthesize, MergedAtom, MergedPart, MergedStatus, Synthesis};
use super::comparer::{previous_formatting, whole_nested, ORIGINAL};
use super::comparison_unit::{AtomizedPart, ComparisonAtom, ElementSnapshot, Unid};
use super::document::prepare;
use super::edit_script::{EditOp, EditScript};
use super::formatting::{merge_property_edits, paragraph_properties_hash, run_properties_hash};
use super::lcs_algorithm::correlate;
use super::revision::Attribution;
use super::settings::{ComparerSettings, RevisedDocument};
use crate::error::{Result, RevmarkError};
use crate::xml::arena::XmlDocument;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info_span};

/// One reviewer's atoms and their alignment with the original.
struct Reviewed {
    part: AtomizedPart,
    script: EditScript,
}

/// Merges every reviewer's changes to `original` into one document.
/// Markers carry the reviewer's author and color.
pub fn consolidate(
    original: &XmlDocument,
    revisions: &[RevisedDocument],
    settings: &ComparerSettings,
) -> Result<XmlDocument> {
    let _span = info_span!("consolidate", reviewers = revisions.len()).entered();
    settings.validate()?;
    if let Some(unnamed) = revisions.iter().position(|r| r.author.trim().is_empty()) {
        return Err(RevmarkError::InvalidSettings {
            message: format!("reviewer {} has an empty author", unnamed + 1),
        });
    }

    let original = prepare(original)?;
    let a = atomize_document(&original, ORIGINAL, settings)?;

    let reviewed = revisions
        .par_iter()
        .enumerate()
        .map(|(i, revision)| -> Result<Reviewed> {
            let doc_index = u32::try_from(i + 1).map_err(|_| {
                RevmarkError::InvalidSettings {
                    message: "too many reviewers".to_string(),
                }
            })?;
            let revised = prepare(&revision.document)?;
            let part = atomize_document(&revised, doc_index, settings)?;
            let script = correlate(&a, &part, settings)?;
            let (equal, inserted, deleted, moved) = script.summary();
            debug!(
                author = %revision.author,
                equal,
                inserted,
                deleted,
                moved,
                "correlated reviewer"
            );
            Ok(Reviewed { part, script })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut alignments = Vec::with_capacity(reviewed.len());
    let mut move_offset = 0;
    for (author, r) in reviewed.iter().enumerate() {
        alignments.push(Alignment {
            author,
            part: &r.part,
            script: &r.script,
            move_offset,
        });
        move_offset += max_move_id(&r.script);
    }

    let body = merge_reviewers(&a, &alignments, settings.track_formatting_changes)?;
    let translate = reviewed.iter().fold(HashMap::new(), |mut map, r| {
        invert_into(&r.script.container_map, &mut map);
        map
    });
    let attributions = revisions
        .iter()
        .map(|r| Attribution::reviewer(&r.author, r.color, settings))
        .collect();

    synthesize(&Synthesis {
        base: &original,
        base_doc: ORIGINAL,
        body,
        translate,
        attributions,
        consolidation: true,
    })
}

/// Revised container identities back to the original ones. When several
/// original containers map to one revised container the earliest wins.
fn invert_into(container_map: &HashMap<Unid, Unid>, into: &mut HashMap<Unid, Unid>) {
    let ordered: BTreeMap<&Unid, &Unid> = container_map.iter().collect();
    for (original, revised) in ordered {
        into.entry(*revised).or_insert(*original);
    }
}

fn max_move_id(script: &EditScript) -> u32 {
    script
        .ops
        .iter()
        .filter_map(|op| match op {
            EditOp::MoveFrom { id, .. } | EditOp::MoveTo { id, .. } => Some(*id),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

#[derive(Clone, Copy)]
struct Alignment<'a> {
    author: usize,
    part: &'a AtomizedPart,
    script: &'a EditScript,
    /// Added to move ids so that reviewers never share a move name.
    move_offset: u32,
}

/// A script re-indexed by original position.
struct Positions {
    /// Insertions anchored before original atom `k`; the last slot holds
    /// trailing insertions.
    before: Vec<Vec<EditOp>>,
    /// What became of original atom `k`.
    fate: Vec<Option<EditOp>>,
}

fn positions(script: &EditScript, len_a: usize) -> Result<Positions> {
    let mut before = vec![Vec::new(); len_a + 1];
    let mut fate = vec![None; len_a];
    let mut next = 0;
    for op in &script.ops {
        match op.a() {
            Some(k) => {
                let slot = fate.get_mut(k).ok_or_else(|| {
                    RevmarkError::InternalInconsistency(format!("original atom {k} out of range"))
                })?;
                *slot = Some(*op);
                next = k + 1;
            }
            None => before[next.min(len_a)].push(*op),
        }
    }
    Ok(Positions { before, fate })
}

fn is_removal(fate: Option<EditOp>) -> bool {
    matches!(fate, Some(EditOp::Delete { .. } | EditOp::MoveFrom { .. }))
}

/// Per reviewer, the move ids whose source overlaps another reviewer's
/// removal. Those moves are rendered as deletion plus insertion.
fn shared_moves(len_a: usize, positions: &[Positions]) -> Vec<HashSet<u32>> {
    let mut shared = vec![HashSet::new(); positions.len()];
    for k in 0..len_a {
        let removers: Vec<usize> = (0..positions.len())
            .filter(|&r| is_removal(positions[r].fate[k]))
            .collect();
        if removers.len() < 2 {
            continue;
        }
        for r in removers {
            if let Some(EditOp::MoveFrom { id, .. }) = positions[r].fate[k] {
                shared[r].insert(id);
            }
        }
    }
    shared
}

fn merge_reviewers<'a>(
    a: &'a AtomizedPart,
    reviewers: &[Alignment<'a>],
    track_formatting: bool,
) -> Result<MergedPart<'a>> {
    let positions = reviewers
        .iter()
        .map(|r| positions(r.script, a.atoms.len()))
        .collect::<Result<Vec<_>>>()?;
    let shared = shared_moves(a.atoms.len(), &positions);

    let mut atoms = Vec::with_capacity(a.atoms.len());
    for k in 0..=a.atoms.len() {
        for ((reviewer, pos), shared) in reviewers.iter().zip(&positions).zip(&shared) {
            for op in &pos.before[k] {
                atoms.push(inserted(reviewer, *op, shared)?);
            }
        }
        if k < a.atoms.len() {
            atoms.push(original_atom(a, k, reviewers, &positions, &shared, track_formatting)?);
        }
    }
    Ok(MergedPart {
        key: a.key.clone(),
        root: a.root.clone(),
        atoms,
    })
}

fn inserted<'a>(reviewer: &Alignment<'a>, op: EditOp, shared: &HashSet<u32>) -> Result<MergedAtom<'a>> {
    let (b, status, move_id) = match op {
        EditOp::Insert { b } => (b, MergedStatus::Inserted, None),
        EditOp::MoveTo { b, id } if shared.contains(&id) => (b, MergedStatus::Inserted, None),
        EditOp::MoveTo { b, id } => (b, MergedStatus::MovedTo, Some(id + reviewer.move_offset)),
        other => {
            return Err(RevmarkError::InternalInconsistency(format!(
                "{other:?} has no place between original atoms"
            )))
        }
    };
    Ok(MergedAtom {
        move_id,
        nested: whole_nested(reviewer.part, b, MergedStatus::Inserted, reviewer.author),
        ..MergedAtom::new(revised_atom(reviewer, b)?, status, reviewer.author)
    })
}

fn original_atom<'a>(
    a: &'a AtomizedPart,
    k: usize,
    reviewers: &[Alignment<'a>],
    positions: &[Positions],
    shared: &[HashSet<u32>],
    track_formatting: bool,
) -> Result<MergedAtom<'a>> {
    let original = &a.atoms[k];

    let removers: Vec<(usize, Option<u32>)> = reviewers
        .iter()
        .zip(positions)
        .zip(shared)
        .filter_map(|((r, p), shared)| match p.fate[k] {
            Some(EditOp::Delete { .. }) => Some((r.author, None)),
            Some(EditOp::MoveFrom { id, .. }) => {
                Some((r.author, (!shared.contains(&id)).then_some(id + r.move_offset)))
            }
            _ => None,
        })
        .collect();
    if let Some((&(author, move_id), others)) = removers.split_first() {
        let co_authors: Vec<usize> = others.iter().map(|&(r, _)| r).collect();
        let status = if move_id.is_some() {
            MergedStatus::MovedFrom
        } else {
            MergedStatus::Deleted
        };
        let nested = whole_nested(a, k, MergedStatus::Deleted, author)
            .into_iter()
            .map(|part| part.shared_with(&co_authors))
            .collect();
        return Ok(MergedAtom {
            move_id,
            co_authors,
            nested,
            ..MergedAtom::new(original, status, author)
        });
    }

    let mut merged = MergedAtom::new(original, MergedStatus::Equal, 0);
    let mut formatted: Vec<(usize, &'a ComparisonAtom)> = Vec::new();
    let mut nested_reviewers: Vec<Vec<Alignment<'a>>> = vec![Vec::new(); a.nested_parts(k).len()];
    for (reviewer, pos) in reviewers.iter().zip(positions) {
        let Some(EditOp::Equal { b, .. }) = pos.fate[k] else {
            return Err(RevmarkError::InternalInconsistency(format!(
                "original atom {k} not covered by reviewer {}",
                reviewer.author
            )));
        };
        let revised = revised_atom(reviewer, b)?;
        if track_formatting && previous_formatting(original, revised).is_some() {
            formatted.push((reviewer.author, revised));
        }
        if let Some(scripts) = reviewer.script.nested.get(&k) {
            let parts = reviewer.part.nested_parts(b);
            for (slot, (part, script)) in nested_reviewers.iter_mut().zip(parts.iter().zip(scripts)) {
                slot.push(Alignment {
                    author: reviewer.author,
                    part,
                    script,
                    move_offset: 0,
                });
            }
        }
    }

    if let Some((&(author, first), others)) = formatted.split_first() {
        merged.author = author;
        merged.previous = previous_formatting(original, first);
        merged.atom = formatted.last().map_or(first, |&(_, last)| last);
        if !others.is_empty() {
            merged.co_authors = others.iter().map(|&(r, _)| r).collect();
            let edits: Vec<&ComparisonAtom> = formatted.iter().map(|&(_, atom)| atom).collect();
            merged.formatting = combined_formatting(original, &edits);
        }
    }

    merged.nested = a
        .nested_parts(k)
        .iter()
        .zip(&nested_reviewers)
        .map(|(part, aligned)| merge_reviewers(part, aligned, track_formatting))
        .collect::<Result<Vec<_>>>()?;
    Ok(merged)
}

/// The run (or paragraph) of the last edit, carrying the formatting of
/// every edit applied to the original's.
fn combined_formatting(
    original: &ComparisonAtom,
    edits: &[&ComparisonAtom],
) -> Option<Arc<ElementSnapshot>> {
    let mark = original.is_paragraph_mark();
    let element = |atom: &ComparisonAtom| {
        if mark {
            atom.paragraph().cloned()
        } else {
            atom.run().cloned()
        }
    };
    let property = if mark { "pPr" } else { "rPr" };

    let template = element(*edits.last()?)?;
    let before = element(original);
    let after: Vec<Option<Arc<ElementSnapshot>>> = edits.iter().map(|&atom| element(atom)).collect();
    let changed: Vec<_> = after.iter().map(|e| e.as_ref().and_then(|e| e.property(property))).collect();
    let combined = merge_property_edits(before.as_ref().and_then(|e| e.property(property)), &changed);

    let props_hash = if mark {
        paragraph_properties_hash(Some(&combined))
    } else {
        run_properties_hash(Some(&combined))
    };
    let mut properties: Vec<_> = template
        .properties
        .iter()
        .filter(|f| f.root().is_some_and(|r| f.name(r).map(|n| n.local_name.as_str()) != Some(property)))
        .cloned()
        .collect();
    properties.push(combined);
    Some(Arc::new(ElementSnapshot {
        properties,
        props_hash,
        ..(*template).clone()
    }))
}

fn revised_atom<'a>(reviewer: &Alignment<'a>, index: usize) -> Result<&'a ComparisonAtom> {
    reviewer.part.atoms.get(index).ok_or_else(|| {
        RevmarkError::InternalInconsistency(format!(
            "reviewer {} has no atom {index}",
            reviewer.author
        ))
    })
}
