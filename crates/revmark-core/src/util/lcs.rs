//! Longest-contiguous-match alignment.
//!
//! The aligner finds the longest run of consecutive items with equal hashes,
//! emits it as an equal range, then processes the portions before and after
//! the match the same way. This is not the classic non-contiguous LCS; it is
//! simpler and produces the large stable anchors that document comparison
//! wants, at the cost of being applied repeatedly.
//!
//! All results are expressed as index ranges into the input slices so that
//! callers keep ownership of their items.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

/// How a range of items relates between the two sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationStatus {
    Equal,
    Deleted,
    Inserted,
}

impl fmt::Display for CorrelationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationStatus::Equal => write!(f, "Equal"),
            CorrelationStatus::Deleted => write!(f, "Deleted"),
            CorrelationStatus::Inserted => write!(f, "Inserted"),
        }
    }
}

/// Items compared by the aligner expose a hash used for equality.
pub trait Hashable {
    fn hash(&self) -> &str;
}

impl Hashable for String {
    fn hash(&self) -> &str {
        self
    }
}

impl Hashable for &str {
    fn hash(&self) -> &str {
        self
    }
}

/// One aligned range. `a` is empty for insertions, `b` for deletions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedRange {
    pub status: CorrelationStatus,
    pub a: Range<usize>,
    pub b: Range<usize>,
}

impl CorrelatedRange {
    pub fn equal(a: Range<usize>, b: Range<usize>) -> Self {
        Self {
            status: CorrelationStatus::Equal,
            a,
            b,
        }
    }

    pub fn deleted(a: Range<usize>, at_b: usize) -> Self {
        Self {
            status: CorrelationStatus::Deleted,
            a,
            b: at_b..at_b,
        }
    }

    pub fn inserted(at_a: usize, b: Range<usize>) -> Self {
        Self {
            status: CorrelationStatus::Inserted,
            a: at_a..at_a,
            b,
        }
    }
}

pub type SkipPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Settings for the aligner
#[derive(Default)]
pub struct LcsSettings {
    /// Minimum length for a match to be used as an anchor. Default: 1
    pub min_match_length: usize,

    /// Minimum ratio (0-1) of the match length to the longer of the two
    /// regions. Shorter matches are treated as no match at all, so the
    /// whole region becomes a delete plus an insert. Default: 0.0
    pub detail_threshold: f64,

    /// Items whose hash satisfies this predicate are trimmed off both ends
    /// of a match before it is used as an anchor.
    pub should_skip_as_anchor: Option<SkipPredicate>,
}

impl LcsSettings {
    pub fn new() -> Self {
        Self {
            min_match_length: 1,
            ..Self::default()
        }
    }

    pub fn with_skip_predicate<F>(skip: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            min_match_length: 1,
            detail_threshold: 0.0,
            should_skip_as_anchor: Some(Box::new(skip)),
        }
    }

    pub fn min_match_length(mut self, len: usize) -> Self {
        self.min_match_length = len;
        self
    }

    pub fn detail_threshold(mut self, threshold: f64) -> Self {
        self.detail_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub i1: usize,
    pub i2: usize,
    pub length: usize,
}

/// Interned view of both inputs: equal hashes map to equal ids.
struct Interned {
    a: Vec<u32>,
    b: Vec<u32>,
    skip: Vec<bool>,
}

impl Interned {
    fn new<T: Hashable>(items1: &[T], items2: &[T], settings: &LcsSettings) -> Self {
        let mut ids: HashMap<&str, u32> = HashMap::new();
        let mut skip_by_id: Vec<bool> = Vec::new();

        let mut a = Vec::with_capacity(items1.len());
        for item in items1 {
            let next = ids.len() as u32;
            let id = *ids.entry(item.hash()).or_insert(next);
            if id as usize == skip_by_id.len() {
                skip_by_id.push(
                    settings
                        .should_skip_as_anchor
                        .as_ref()
                        .is_some_and(|skip| skip(item.hash())),
                );
            }
            a.push(id);
        }
        let mut b = Vec::with_capacity(items2.len());
        for item in items2 {
            let next = ids.len() as u32;
            let id = *ids.entry(item.hash()).or_insert(next);
            if id as usize == skip_by_id.len() {
                skip_by_id.push(false);
            }
            b.push(id);
        }

        Self {
            a,
            b,
            skip: skip_by_id,
        }
    }

    fn is_skip(&self, id: u32) -> bool {
        self.skip.get(id as usize).copied().unwrap_or(false)
    }
}

/// Finds the longest common contiguous run between two arrays.
///
/// Ties are broken towards the earliest start in `items1`, then the
/// earliest start in `items2`.
pub fn find_longest_match<T: Hashable>(
    items1: &[T],
    items2: &[T],
    settings: &LcsSettings,
) -> Option<MatchResult> {
    let interned = Interned::new(items1, items2, settings);
    longest_match(
        &interned,
        0..interned.a.len(),
        0..interned.b.len(),
        settings,
    )
}

fn longest_match(
    interned: &Interned,
    ra: Range<usize>,
    rb: Range<usize>,
    settings: &LcsSettings,
) -> Option<MatchResult> {
    let a = &interned.a[ra.clone()];
    let b = &interned.b[rb.clone()];
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut best = MatchResult {
        i1: 0,
        i2: 0,
        length: 0,
    };
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            cur[j + 1] = if x == y { prev[j] + 1 } else { 0 };
            let run = cur[j + 1];
            // strictly greater keeps the earliest end, and with equal lengths
            // the earliest start
            if run > best.length {
                best = MatchResult {
                    i1: i + 1 - run,
                    i2: j + 1 - run,
                    length: run,
                };
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    // trim anchors that should never carry an alignment
    while best.length > 0 && interned.is_skip(a[best.i1]) {
        best.i1 += 1;
        best.i2 += 1;
        best.length -= 1;
    }
    while best.length > 0 && interned.is_skip(a[best.i1 + best.length - 1]) {
        best.length -= 1;
    }

    if best.length == 0 || best.length < settings.min_match_length {
        return None;
    }

    if settings.detail_threshold > 0.0 {
        let max_len = a.len().max(b.len());
        if (best.length as f64 / max_len as f64) < settings.detail_threshold {
            return None;
        }
    }

    #[cfg(feature = "trace")]
    tracing::trace!(
        a_len = a.len(),
        b_len = b.len(),
        length = best.length,
        "longest match"
    );

    Some(MatchResult {
        i1: best.i1 + ra.start,
        i2: best.i2 + rb.start,
        length: best.length,
    })
}

enum Task {
    Region(Range<usize>, Range<usize>),
    Emit(CorrelatedRange),
}

/// Aligns two arrays into ordered equal / deleted / inserted ranges.
///
/// Common prefix and suffix are peeled off first. Within each gap between
/// anchors the deleted range precedes the inserted range. Adjacent ranges
/// with the same status are merged.
pub fn compute_correlation<T: Hashable>(
    items1: &[T],
    items2: &[T],
    settings: &LcsSettings,
) -> Vec<CorrelatedRange> {
    let interned = Interned::new(items1, items2, settings);
    let (n, m) = (interned.a.len(), interned.b.len());

    let mut prefix = 0;
    while prefix < n && prefix < m && interned.a[prefix] == interned.b[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < n - prefix
        && suffix < m - prefix
        && interned.a[n - 1 - suffix] == interned.b[m - 1 - suffix]
    {
        suffix += 1;
    }

    let mut result = Vec::new();
    if prefix > 0 {
        result.push(CorrelatedRange::equal(0..prefix, 0..prefix));
    }

    let mut stack = vec![Task::Region(prefix..n - suffix, prefix..m - suffix)];
    while let Some(task) = stack.pop() {
        let (ra, rb) = match task {
            Task::Emit(range) => {
                result.push(range);
                continue;
            }
            Task::Region(ra, rb) => (ra, rb),
        };

        if ra.is_empty() && rb.is_empty() {
            continue;
        }
        if ra.is_empty() {
            result.push(CorrelatedRange::inserted(ra.start, rb));
            continue;
        }
        if rb.is_empty() {
            result.push(CorrelatedRange::deleted(ra, rb.start));
            continue;
        }

        match longest_match(&interned, ra.clone(), rb.clone(), settings) {
            None => {
                result.push(CorrelatedRange::deleted(ra.clone(), rb.start));
                result.push(CorrelatedRange::inserted(ra.end, rb));
            }
            Some(found) => {
                let a_end = found.i1 + found.length;
                let b_end = found.i2 + found.length;
                stack.push(Task::Region(a_end..ra.end, b_end..rb.end));
                stack.push(Task::Emit(CorrelatedRange::equal(
                    found.i1..a_end,
                    found.i2..b_end,
                )));
                stack.push(Task::Region(ra.start..found.i1, rb.start..found.i2));
            }
        }
    }

    if suffix > 0 {
        result.push(CorrelatedRange::equal(n - suffix..n, m - suffix..m));
    }

    flatten_correlation(result)
}

/// Merges adjacent ranges of the same status.
pub fn flatten_correlation(ranges: Vec<CorrelatedRange>) -> Vec<CorrelatedRange> {
    let mut result: Vec<CorrelatedRange> = Vec::with_capacity(ranges.len());
    for next in ranges {
        match result.last_mut() {
            Some(current)
                if current.status == next.status
                    && current.a.end == next.a.start
                    && current.b.end == next.b.start =>
            {
                current.a.end = next.a.end;
                current.b.end = next.b.end;
            }
            _ => result.push(next),
        }
    }
    result
}

/// Ratcliff/Obershelp similarity: twice the number of aligned items over
/// the total number of items. Two empty inputs are fully similar.
pub fn similarity_ratio<T: Hashable>(items1: &[T], items2: &[T]) -> f64 {
    let total = items1.len() + items2.len();
    if total == 0 {
        return 1.0;
    }
    let matched: usize = compute_correlation(items1, items2, &LcsSettings::new())
        .iter()
        .filter(|r| r.status == CorrelationStatus::Equal)
        .map(|r| r.a.len())
        .sum();
    2.0 * matched as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<String> {
        s.chars().map(|c| c.to_string()).collect()
    }

    #[test]
    fn find_longest_match_basic() {
        let a = chars("abcdef");
        let b = chars("xbcdy");
        let m = find_longest_match(&a, &b, &LcsSettings::new()).unwrap();
        assert_eq!(m, MatchResult { i1: 1, i2: 1, length: 3 });
    }

    #[test]
    fn ties_prefer_earliest_start_in_first_sequence() {
        let a = chars("abXab");
        let b = chars("ab");
        let m = find_longest_match(&a, &b, &LcsSettings::new()).unwrap();
        assert_eq!(m.i1, 0);

        let a = chars("ab");
        let b = chars("abXab");
        let m = find_longest_match(&a, &b, &LcsSettings::new()).unwrap();
        assert_eq!((m.i1, m.i2), (0, 0));
    }

    #[test]
    fn no_match_yields_delete_then_insert() {
        let a = chars("abc");
        let b = chars("xyz");
        let result = compute_correlation(&a, &b, &LcsSettings::new());
        assert_eq!(
            result,
            vec![
                CorrelatedRange::deleted(0..3, 0),
                CorrelatedRange::inserted(3, 0..3),
            ]
        );
    }

    #[test]
    fn insertion_in_the_middle() {
        let a = chars("The quick fox");
        let b = chars("The quick brown fox");
        let result = compute_correlation(&a, &b, &LcsSettings::new());
        assert_eq!(
            result,
            vec![
                CorrelatedRange::equal(0..10, 0..10),
                CorrelatedRange::inserted(10, 10..16),
                CorrelatedRange::equal(10..13, 16..19),
            ]
        );
    }

    #[test]
    fn ranges_cover_both_inputs_exactly() {
        let a = chars("kitten sitting on the mat");
        let b = chars("sitting kitten at the mall");
        let result = compute_correlation(&a, &b, &LcsSettings::new());
        let a_total: usize = result.iter().map(|r| r.a.len()).sum();
        let b_total: usize = result.iter().map(|r| r.b.len()).sum();
        assert_eq!(a_total, a.len());
        assert_eq!(b_total, b.len());
        let mut a_pos = 0;
        let mut b_pos = 0;
        for r in &result {
            assert_eq!(r.a.start, a_pos);
            assert_eq!(r.b.start, b_pos);
            a_pos = r.a.end;
            b_pos = r.b.end;
        }
    }

    #[test]
    fn skip_predicate_rejects_whitespace_only_anchor() {
        let a = chars("ab cd");
        let b = chars("xy zw");
        let settings = LcsSettings::with_skip_predicate(|h| h.trim().is_empty());
        let result = compute_correlation(&a, &b, &settings);
        assert!(result.iter().all(|r| r.status != CorrelationStatus::Equal));
    }

    #[test]
    fn detail_threshold_rejects_weak_match() {
        let a = chars("abcdefghij");
        let b = chars("xxxxxaxxxx");
        let settings = LcsSettings::new().detail_threshold(0.5);
        let result = compute_correlation(&a, &b, &settings);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn similarity_of_identical_and_disjoint() {
        let a = vec!["one".to_string(), "two".to_string()];
        assert_eq!(similarity_ratio(&a, &a), 1.0);
        let b = vec!["three".to_string()];
        assert_eq!(similarity_ratio(&a, &b), 0.0);
    }

    #[test]
    fn similarity_counts_aligned_words() {
        let a: Vec<&str> = vec!["a", "b", "c", "d"];
        let b: Vec<&str> = vec!["a", "b", "c", "e"];
        assert!((similarity_ratio(&a, &b) - 0.75).abs() < 1e-9);
    }
}
