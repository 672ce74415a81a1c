//! Hierarchical correlator.
//!
//! Alignment runs coarse to fine so that character-level work is confined
//! to regions that actually changed:
//!
//! 1. Blocks (paragraphs and tables at the current nesting depth) are
//!    aligned by a hash of their structure and content.
//! 2. Blocks left over between two anchors are grouped into segments (one
//!    table, or a run of paragraphs sharing a container path) and segments
//!    are paired by kind.
//! 3. Paired tables are aligned row by row; rows with the same cell count
//!    recurse into their cells. Paired paragraph runs are aligned word by
//!    word, and changed word regions character by character.
//! 4. Optionally, whole deleted and inserted paragraphs in different gaps
//!    are paired up as moves.
//!
//! Every time two atoms are aligned as equal, the identities of their
//! ancestors are recorded so the synthesizer can rebuild shared containers
//! once.

use crate::error::{Result, RevmarkError};
use crate::hash::sha1::Sha1Builder;
use crate::util::group::adjacent_ranges;
use crate::util::lcs::{
    compute_correlation, similarity_ratio, CorrelationStatus, Hashable, LcsSettings,
};
use crate::wml::comparison_unit::{AtomizedPart, ComparisonAtom, Unid};
use crate::wml::edit_script::{EditOp, EditScript};
use crate::wml::settings::ComparerSettings;
use crate::xml::namespaces::W;
use std::collections::HashMap;
use std::ops::Range;

/// Aligns the atoms of two parts (and, recursively, the parts nested under
/// equal owner atoms) into an edit script.
pub fn correlate(
    a: &AtomizedPart,
    b: &AtomizedPart,
    settings: &ComparerSettings,
) -> Result<EditScript> {
    let mut correlator = Correlator {
        settings,
        container_map: HashMap::new(),
    };
    let mut script = correlator.part(a, b)?;
    if settings.detect_moved_content {
        let moves = detect_moved_content(&mut script, &a.atoms, &b.atoms, settings);
        tracing::debug!(moves, "detected moved paragraphs");
    }
    script.container_map = correlator.container_map;
    Ok(script)
}

/// The same-kind ancestor identities of the equal atom pairs, original to
/// revised. Kept from the first pair that mentions an original container.
struct Correlator<'s> {
    settings: &'s ComparerSettings,
    container_map: HashMap<Unid, Unid>,
}

struct Block {
    range: Range<usize>,
    /// Index in `ancestors` of the block element (`w:p` or `w:tbl`).
    level: usize,
    is_table: bool,
    hash: String,
}

impl Hashable for Block {
    fn hash(&self) -> &str {
        &self.hash
    }
}

struct Segment {
    blocks: Range<usize>,
    key: String,
}

impl Hashable for Segment {
    fn hash(&self) -> &str {
        &self.key
    }
}

/// A word, a separator, or any non-text atom.
struct Token {
    range: Range<usize>,
    hash: String,
    is_word: bool,
}

impl Hashable for Token {
    fn hash(&self) -> &str {
        &self.hash
    }
}

fn is_space_hash(hash: &str) -> bool {
    hash == "t: "
}

impl Correlator<'_> {
    fn part(&mut self, a: &AtomizedPart, b: &AtomizedPart) -> Result<EditScript> {
        let mut ops = Vec::with_capacity(a.atoms.len().max(b.atoms.len()));
        self.blocks(&a.atoms, 0..a.atoms.len(), &b.atoms, 0..b.atoms.len(), 0, &mut ops);
        let mut script = EditScript {
            ops,
            ..EditScript::default()
        };

        let owners: Vec<(usize, usize)> = script
            .ops
            .iter()
            .filter_map(|op| match *op {
                EditOp::Equal { a: ia, b: ib }
                    if a.nested.contains_key(&ia) || b.nested.contains_key(&ib) =>
                {
                    Some((ia, ib))
                }
                _ => None,
            })
            .collect();
        for (ia, ib) in owners {
            let (nested_a, nested_b) = (a.nested_parts(ia), b.nested_parts(ib));
            if nested_a.len() != nested_b.len() {
                return Err(RevmarkError::InternalInconsistency(format!(
                    "equal atoms own {} and {} nested parts",
                    nested_a.len(),
                    nested_b.len()
                )));
            }
            let scripts = nested_a
                .iter()
                .zip(nested_b)
                .map(|(x, y)| self.part(x, y))
                .collect::<Result<Vec<_>>>()?;
            script.nested.insert(ia, scripts);
        }

        script.verify(a.atoms.len(), b.atoms.len())?;
        Ok(script)
    }

    fn map_ancestors(&mut self, a: &ComparisonAtom, b: &ComparisonAtom) {
        for (sa, sb) in a.ancestors.iter().zip(&b.ancestors) {
            if sa.name != sb.name {
                break;
            }
            self.container_map.entry(sa.unid).or_insert(sb.unid);
        }
    }

    fn map_unid(&mut self, a: Unid, b: Unid) {
        self.container_map.entry(a).or_insert(b);
    }

    fn equal(
        &mut self,
        a: &[ComparisonAtom],
        ra: Range<usize>,
        b: &[ComparisonAtom],
        rb: Range<usize>,
        ops: &mut Vec<EditOp>,
    ) {
        for (ia, ib) in ra.zip(rb) {
            self.map_ancestors(&a[ia], &b[ib]);
            ops.push(EditOp::Equal { a: ia, b: ib });
        }
    }

    fn delete(ra: Range<usize>, ops: &mut Vec<EditOp>) {
        ops.extend(ra.map(|a| EditOp::Delete { a }));
    }

    fn insert(rb: Range<usize>, ops: &mut Vec<EditOp>) {
        ops.extend(rb.map(|b| EditOp::Insert { b }));
    }

    /// Aligns the blocks found at `depth` in the two ranges.
    fn blocks(
        &mut self,
        a: &[ComparisonAtom],
        ra: Range<usize>,
        b: &[ComparisonAtom],
        rb: Range<usize>,
        depth: usize,
        ops: &mut Vec<EditOp>,
    ) {
        let blocks_a = split_blocks(a, ra, depth);
        let blocks_b = split_blocks(b, rb, depth);
        let ranges = compute_correlation(&blocks_a, &blocks_b, &LcsSettings::new());

        let mut i = 0;
        while i < ranges.len() {
            let range = &ranges[i];
            match range.status {
                CorrelationStatus::Equal => {
                    for (x, y) in blocks_a[range.a.clone()].iter().zip(&blocks_b[range.b.clone()]) {
                        self.equal(a, x.range.clone(), b, y.range.clone(), ops);
                    }
                }
                CorrelationStatus::Deleted => {
                    let inserted = match ranges.get(i + 1) {
                        Some(next) if next.status == CorrelationStatus::Inserted => {
                            i += 1;
                            next.b.clone()
                        }
                        _ => range.b.start..range.b.start,
                    };
                    self.gap(
                        a,
                        &blocks_a[range.a.clone()],
                        b,
                        &blocks_b[inserted],
                        depth,
                        ops,
                    );
                }
                CorrelationStatus::Inserted => {
                    self.gap(a, &[], b, &blocks_b[range.b.clone()], depth, ops);
                }
            }
            i += 1;
        }
    }

    /// Pairs the unmatched blocks between two anchors by segment kind.
    fn gap(
        &mut self,
        a: &[ComparisonAtom],
        blocks_a: &[Block],
        b: &[ComparisonAtom],
        blocks_b: &[Block],
        depth: usize,
        ops: &mut Vec<EditOp>,
    ) {
        let segments_a = segments(a, blocks_a, depth);
        let segments_b = segments(b, blocks_b, depth);
        let atoms_of = |blocks: &[Block], segment: &Segment| {
            let first = &blocks[segment.blocks.start];
            let last = &blocks[segment.blocks.end - 1];
            first.range.start..last.range.end
        };

        for range in compute_correlation(&segments_a, &segments_b, &LcsSettings::new()) {
            match range.status {
                CorrelationStatus::Equal => {
                    for (x, y) in segments_a[range.a].iter().zip(&segments_b[range.b]) {
                        let xa = &blocks_a[x.blocks.clone()];
                        let yb = &blocks_b[y.blocks.clone()];
                        if xa[0].is_table {
                            self.tables(a, &xa[0], b, &yb[0], ops);
                        } else {
                            self.paragraph_runs(a, xa, b, yb, depth, ops);
                        }
                    }
                }
                CorrelationStatus::Deleted => {
                    for segment in &segments_a[range.a] {
                        Self::delete(atoms_of(blocks_a, segment), ops);
                    }
                }
                CorrelationStatus::Inserted => {
                    for segment in &segments_b[range.b] {
                        Self::insert(atoms_of(blocks_b, segment), ops);
                    }
                }
            }
        }
    }

    fn paragraph_runs(
        &mut self,
        a: &[ComparisonAtom],
        blocks_a: &[Block],
        b: &[ComparisonAtom],
        blocks_b: &[Block],
        depth: usize,
        ops: &mut Vec<EditOp>,
    ) {
        let (first_a, first_b) = (&a[blocks_a[0].range.start], &b[blocks_b[0].range.start]);
        let level = blocks_a[0].level.min(blocks_b[0].level);
        for i in depth..level {
            self.map_unid(first_a.ancestors[i].unid, first_b.ancestors[i].unid);
        }

        if blocks_a.len() == blocks_b.len() {
            for (x, y) in blocks_a.iter().zip(blocks_b) {
                self.words(a, x.range.clone(), b, y.range.clone(), ops);
            }
        } else {
            let ra = blocks_a[0].range.start..blocks_a[blocks_a.len() - 1].range.end;
            let rb = blocks_b[0].range.start..blocks_b[blocks_b.len() - 1].range.end;
            self.words(a, ra, b, rb, ops);
        }
    }

    fn tables(
        &mut self,
        a: &[ComparisonAtom],
        table_a: &Block,
        b: &[ComparisonAtom],
        table_b: &Block,
        ops: &mut Vec<EditOp>,
    ) {
        let level = table_a.level;
        self.map_unid(
            a[table_a.range.start].ancestors[level].unid,
            b[table_b.range.start].ancestors[level].unid,
        );
        let rows_a = child_ranges(a, table_a.range.clone(), level + 1);
        let rows_b = child_ranges(b, table_b.range.clone(), level + 1);
        let hashes_a: Vec<String> = rows_a.iter().map(|r| structure_hash(&a[r.clone()], level + 1)).collect();
        let hashes_b: Vec<String> = rows_b.iter().map(|r| structure_hash(&b[r.clone()], level + 1)).collect();

        let ranges = compute_correlation(&hashes_a, &hashes_b, &LcsSettings::new());
        let mut i = 0;
        while i < ranges.len() {
            let range = &ranges[i];
            match range.status {
                CorrelationStatus::Equal => {
                    for (x, y) in rows_a[range.a.clone()].iter().zip(&rows_b[range.b.clone()]) {
                        self.equal(a, x.clone(), b, y.clone(), ops);
                    }
                }
                CorrelationStatus::Deleted => {
                    let inserted = match ranges.get(i + 1) {
                        Some(next) if next.status == CorrelationStatus::Inserted => {
                            i += 1;
                            next.b.clone()
                        }
                        _ => range.b.start..range.b.start,
                    };
                    self.changed_rows(a, &rows_a[range.a.clone()], b, &rows_b[inserted], level, ops);
                }
                CorrelationStatus::Inserted => {
                    for row in &rows_b[range.b.clone()] {
                        Self::insert(row.clone(), ops);
                    }
                }
            }
            i += 1;
        }
    }

    /// Rows are paired in order. A pair with the same number of cells is
    /// aligned cell by cell; otherwise the original row is deleted and the
    /// revised row inserted whole.
    fn changed_rows(
        &mut self,
        a: &[ComparisonAtom],
        rows_a: &[Range<usize>],
        b: &[ComparisonAtom],
        rows_b: &[Range<usize>],
        level: usize,
        ops: &mut Vec<EditOp>,
    ) {
        let paired = rows_a.len().min(rows_b.len());
        for (row_a, row_b) in rows_a.iter().zip(rows_b) {
            let cells_a = child_ranges(a, row_a.clone(), level + 2);
            let cells_b = child_ranges(b, row_b.clone(), level + 2);
            if cells_a.len() != cells_b.len() {
                Self::delete(row_a.clone(), ops);
                Self::insert(row_b.clone(), ops);
                continue;
            }
            self.map_unid(
                a[row_a.start].ancestors[level + 1].unid,
                b[row_b.start].ancestors[level + 1].unid,
            );
            for (cell_a, cell_b) in cells_a.into_iter().zip(cells_b) {
                self.map_unid(
                    a[cell_a.start].ancestors[level + 2].unid,
                    b[cell_b.start].ancestors[level + 2].unid,
                );
                self.blocks(a, cell_a, b, cell_b, level + 3, ops);
            }
        }
        for row in &rows_a[paired..] {
            Self::delete(row.clone(), ops);
        }
        for row in &rows_b[paired..] {
            Self::insert(row.clone(), ops);
        }
    }

    fn words(
        &mut self,
        a: &[ComparisonAtom],
        ra: Range<usize>,
        b: &[ComparisonAtom],
        rb: Range<usize>,
        ops: &mut Vec<EditOp>,
    ) {
        let tokens_a = tokenize(a, ra.clone(), self.settings);
        let tokens_b = tokenize(b, rb.clone(), self.settings);
        let lcs = LcsSettings::with_skip_predicate(is_space_hash);
        let ranges = compute_correlation(&tokens_a, &tokens_b, &lcs);

        let span = |tokens: &[Token], r: Range<usize>, at: usize| -> Range<usize> {
            if r.is_empty() {
                let position = tokens.get(r.start).map(|t| t.range.start).unwrap_or(at);
                return position..position;
            }
            tokens[r.start].range.start..tokens[r.end - 1].range.end
        };

        let mut i = 0;
        while i < ranges.len() {
            let range = &ranges[i];
            match range.status {
                CorrelationStatus::Equal => {
                    let xa = span(&tokens_a, range.a.clone(), ra.end);
                    let xb = span(&tokens_b, range.b.clone(), rb.end);
                    self.equal(a, xa, b, xb, ops);
                }
                CorrelationStatus::Deleted => {
                    let xa = span(&tokens_a, range.a.clone(), ra.end);
                    match ranges.get(i + 1) {
                        Some(next) if next.status == CorrelationStatus::Inserted => {
                            i += 1;
                            let xb = span(&tokens_b, next.b.clone(), rb.end);
                            self.characters(a, xa, b, xb, ops);
                        }
                        _ => Self::delete(xa, ops),
                    }
                }
                CorrelationStatus::Inserted => {
                    Self::insert(span(&tokens_b, range.b.clone(), rb.end), ops);
                }
            }
            i += 1;
        }
    }

    fn characters(
        &mut self,
        a: &[ComparisonAtom],
        ra: Range<usize>,
        b: &[ComparisonAtom],
        rb: Range<usize>,
        ops: &mut Vec<EditOp>,
    ) {
        let lcs = LcsSettings::with_skip_predicate(is_space_hash)
            .detail_threshold(self.settings.detail_threshold);
        let ranges = compute_correlation(&a[ra.clone()], &b[rb.clone()], &lcs);
        for range in ranges {
            let xa = ra.start + range.a.start..ra.start + range.a.end;
            let xb = rb.start + range.b.start..rb.start + range.b.end;
            match range.status {
                CorrelationStatus::Equal => self.equal(a, xa, b, xb, ops),
                CorrelationStatus::Deleted => Self::delete(xa, ops),
                CorrelationStatus::Inserted => Self::insert(xb, ops),
            }
        }
    }
}

/// Index in `ancestors` of the first paragraph or table at or below `depth`.
fn block_level(atom: &ComparisonAtom, depth: usize) -> usize {
    atom.ancestors
        .iter()
        .enumerate()
        .skip(depth)
        .find(|(_, s)| s.is(W::NS, "p") || s.is(W::NS, "tbl"))
        .map(|(i, _)| i)
        .unwrap_or_else(|| atom.ancestors.len().saturating_sub(1))
}

fn split_blocks(atoms: &[ComparisonAtom], range: Range<usize>, depth: usize) -> Vec<Block> {
    let offset = range.start;
    let slice = &atoms[range];
    adjacent_ranges(slice, |atom| {
        let level = block_level(atom, depth);
        (level, atom.ancestors.get(level).map(|s| s.unid))
    })
    .into_iter()
    .map(|r| {
        let first = &slice[r.start];
        let level = block_level(first, depth);
        let mut builder = Sha1Builder::new();
        for container in first.ancestors.iter().take(level).skip(depth) {
            builder.part(container.local_name());
        }
        builder.part("#");
        structure_hash_into(&mut builder, &slice[r.clone()], level);
        Block {
            range: offset + r.start..offset + r.end,
            level,
            is_table: first.ancestors.get(level).is_some_and(|s| s.is(W::NS, "tbl")),
            hash: builder.finish(),
        }
    })
    .collect()
}

/// Hash of a run of atoms that also sees where rows, cells and paragraphs
/// begin below `from`.
fn structure_hash(atoms: &[ComparisonAtom], from: usize) -> String {
    let mut builder = Sha1Builder::new();
    structure_hash_into(&mut builder, atoms, from);
    builder.finish()
}

fn structure_hash_into(builder: &mut Sha1Builder, atoms: &[ComparisonAtom], from: usize) {
    let mut previous: Option<Vec<Unid>> = None;
    for atom in atoms {
        let end = atom
            .paragraph_depth()
            .map(|p| p + 1)
            .unwrap_or(atom.ancestors.len());
        let frame = &atom.ancestors[from.min(end)..end];
        let unids: Vec<Unid> = frame.iter().map(|s| s.unid).collect();
        if previous.as_ref() != Some(&unids) {
            let kinds: Vec<&str> = frame.iter().map(|s| s.local_name()).collect();
            builder.part(&kinds.join("/"));
            previous = Some(unids);
        }
        builder.part(&atom.hash);
    }
}

/// Ranges of atoms sharing the ancestor at `level` (rows of a table, cells
/// of a row).
fn child_ranges(atoms: &[ComparisonAtom], range: Range<usize>, level: usize) -> Vec<Range<usize>> {
    let offset = range.start;
    adjacent_ranges(&atoms[range], |atom| atom.ancestors.get(level).map(|s| s.unid))
        .into_iter()
        .map(|r| offset + r.start..offset + r.end)
        .collect()
}

/// Tables stand alone; consecutive paragraphs sharing a container path form
/// one segment.
fn segments(atoms: &[ComparisonAtom], blocks: &[Block], depth: usize) -> Vec<Segment> {
    let path = |block: &Block| -> (bool, Vec<Unid>) {
        let first = &atoms[block.range.start];
        let unids = first
            .ancestors
            .iter()
            .take(block.level)
            .skip(depth)
            .map(|s| s.unid)
            .collect();
        (block.is_table, unids)
    };

    let mut result: Vec<Segment> = Vec::new();
    let mut previous: Option<(bool, Vec<Unid>)> = None;
    for (i, block) in blocks.iter().enumerate() {
        let current = path(block);
        let extends = !block.is_table && previous.as_ref() == Some(&current);
        match result.last_mut() {
            Some(segment) if extends => segment.blocks.end = i + 1,
            _ => {
                let first = &atoms[block.range.start];
                let kinds: Vec<&str> = first
                    .ancestors
                    .iter()
                    .take(block.level)
                    .skip(depth)
                    .map(|s| s.local_name())
                    .collect();
                let prefix = if block.is_table { "T" } else { "P" };
                result.push(Segment {
                    blocks: i..i + 1,
                    key: format!("{prefix}:{}", kinds.join("/")),
                });
            }
        }
        previous = Some(current);
    }
    result
}

fn tokenize(atoms: &[ComparisonAtom], range: Range<usize>, settings: &ComparerSettings) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word: Option<usize> = None;
    let flush = |tokens: &mut Vec<Token>, start: usize, end: usize| {
        let hash: String = atoms[start..end].iter().map(|a| a.hash.as_str()).collect();
        tokens.push(Token {
            range: start..end,
            hash,
            is_word: true,
        });
    };

    for i in range.clone() {
        match atoms[i].as_char() {
            Some(c) if !settings.is_word_separator(c) => {
                word.get_or_insert(i);
            }
            _ => {
                if let Some(start) = word.take() {
                    flush(&mut tokens, start, i);
                }
                tokens.push(Token {
                    range: i..i + 1,
                    hash: atoms[i].hash.clone(),
                    is_word: false,
                });
            }
        }
    }
    if let Some(start) = word {
        flush(&mut tokens, start, range.end);
    }
    tokens
}

struct MoveCandidate {
    ops: Vec<usize>,
    words: Vec<String>,
    gap: usize,
}

/// Collects body-level paragraphs whose atoms are all deleted (`original`)
/// or all inserted, with enough words to be worth pairing.
fn move_candidates(
    ops: &[EditOp],
    atoms: &[ComparisonAtom],
    original: bool,
    settings: &ComparerSettings,
) -> Vec<MoveCandidate> {
    let mut candidates = Vec::new();
    let mut equal_seen = 0;
    let mut current: Vec<usize> = Vec::new();
    let mut current_gap = 0;
    let mut all_changed = true;

    for (index, op) in ops.iter().enumerate() {
        if op.is_equal() {
            equal_seen += 1;
        }
        let (atom_index, changed) = match (original, *op) {
            (true, EditOp::Delete { a }) => (a, true),
            (true, EditOp::Equal { a, .. }) => (a, false),
            (false, EditOp::Insert { b }) => (b, true),
            (false, EditOp::Equal { b, .. }) => (b, false),
            _ => continue,
        };
        if current.is_empty() {
            current_gap = equal_seen - usize::from(op.is_equal());
            all_changed = true;
        }
        current.push(index);
        all_changed &= changed;

        let atom = &atoms[atom_index];
        if !atom.is_paragraph_mark() {
            continue;
        }
        let op_indices = std::mem::take(&mut current);
        if !all_changed || atom.paragraph_depth() != Some(0) {
            continue;
        }
        let first = atom_index + 1 - op_indices.len();
        let words: Vec<String> = tokenize(atoms, first..atom_index + 1, settings)
            .into_iter()
            .filter(|t| t.is_word)
            .map(|t| t.hash)
            .collect();
        if words.len() >= settings.min_move_word_count {
            candidates.push(MoveCandidate {
                ops: op_indices,
                words,
                gap: current_gap,
            });
        }
    }
    candidates
}

/// Relabels pairs of whole deleted / inserted paragraphs from different
/// gaps whose word similarity reaches the threshold. Each deleted paragraph
/// takes its best match; ties go to the earliest. Returns the number of
/// moves.
fn detect_moved_content(
    script: &mut EditScript,
    a: &[ComparisonAtom],
    b: &[ComparisonAtom],
    settings: &ComparerSettings,
) -> usize {
    let deleted = move_candidates(&script.ops, a, true, settings);
    let inserted = move_candidates(&script.ops, b, false, settings);
    let mut used = vec![false; inserted.len()];
    let mut next_id = 1u32;

    for source in &deleted {
        let mut best: Option<(usize, f64)> = None;
        for (j, target) in inserted.iter().enumerate() {
            if used[j] || target.gap == source.gap {
                continue;
            }
            let ratio = similarity_ratio(&source.words, &target.words);
            if ratio >= settings.similarity_threshold && best.map_or(true, |(_, r)| ratio > r) {
                best = Some((j, ratio));
            }
        }
        let Some((j, _)) = best else { continue };
        used[j] = true;
        for &index in &source.ops {
            if let EditOp::Delete { a } = script.ops[index] {
                script.ops[index] = EditOp::MoveFrom { a, id: next_id };
            }
        }
        for &index in &inserted[j].ops {
            if let EditOp::Insert { b } = script.ops[index] {
                script.ops[index] = EditOp::MoveTo { b, id: next_id };
            }
        }
        next_id += 1;
    }
    (next_id - 1) as usize
}
