pub mod culture;
pub mod group;
pub mod lcs;

pub use culture::{parse_locale, to_upper_culture, to_upper_invariant, CaseFolder};
pub use group::{adjacent_ranges, group_adjacent};
pub use lcs::{
    compute_correlation, find_longest_match, flatten_correlation, similarity_ratio,
    CorrelatedRange, CorrelationStatus, Hashable, LcsSettings, MatchResult,
};
