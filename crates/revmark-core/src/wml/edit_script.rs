//! Edit scripts: the aligned operations over two atom sequences.

use crate::error::{Result, RevmarkError};
use crate::wml::comparison_unit::Unid;
use std::collections::{BTreeMap, HashMap};

/// One aligned atom. Indices point into the original (`a`) or revised (`b`)
/// atom sequence of the part the script belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Equal { a: usize, b: usize },
    Insert { b: usize },
    Delete { a: usize },
    /// Source side of a move; pairs with the `MoveTo` carrying the same id.
    MoveFrom { a: usize, id: u32 },
    MoveTo { b: usize, id: u32 },
}

impl EditOp {
    pub fn a(&self) -> Option<usize> {
        match *self {
            EditOp::Equal { a, .. } | EditOp::Delete { a } | EditOp::MoveFrom { a, .. } => Some(a),
            _ => None,
        }
    }

    pub fn b(&self) -> Option<usize> {
        match *self {
            EditOp::Equal { b, .. } | EditOp::Insert { b } | EditOp::MoveTo { b, .. } => Some(b),
            _ => None,
        }
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, EditOp::Equal { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EditScript {
    pub ops: Vec<EditOp>,
    /// Scripts of the parts nested under an equal owner atom (note under its
    /// reference, text boxes under their drawing), keyed by the owner's
    /// index in the original sequence.
    pub nested: BTreeMap<usize, Vec<EditScript>>,
    /// Original container identity to revised container identity, for every
    /// container whose content was aligned. Only filled on the outermost
    /// script; nested parts share it.
    pub container_map: HashMap<Unid, Unid>,
}

impl EditScript {
    /// Checks that the left-hand side of the ops enumerates `0..len_a` in
    /// order and the right-hand side `0..len_b`, recursively.
    pub fn verify(&self, len_a: usize, len_b: usize) -> Result<()> {
        let mut next_a = 0;
        let mut next_b = 0;
        for op in &self.ops {
            if let Some(a) = op.a() {
                if a != next_a {
                    return Err(RevmarkError::InternalInconsistency(format!(
                        "original atom {a} out of order, expected {next_a}"
                    )));
                }
                next_a += 1;
            }
            if let Some(b) = op.b() {
                if b != next_b {
                    return Err(RevmarkError::InternalInconsistency(format!(
                        "revised atom {b} out of order, expected {next_b}"
                    )));
                }
                next_b += 1;
            }
        }
        if next_a != len_a || next_b != len_b {
            return Err(RevmarkError::InternalInconsistency(format!(
                "script covers {next_a}/{len_a} original and {next_b}/{len_b} revised atoms"
            )));
        }
        Ok(())
    }

    /// Counts of (equal, inserted, deleted, moved) atoms, nested parts
    /// included.
    pub fn summary(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for op in &self.ops {
            match op {
                EditOp::Equal { .. } => counts.0 += 1,
                EditOp::Insert { .. } => counts.1 += 1,
                EditOp::Delete { .. } => counts.2 += 1,
                EditOp::MoveFrom { .. } => counts.3 += 1,
                EditOp::MoveTo { .. } => {}
            }
        }
        for nested in self.nested.values().flatten() {
            let (e, i, d, m) = nested.summary();
            counts.0 += e;
            counts.1 += i;
            counts.2 += d;
            counts.3 += m;
        }
        counts
    }

    #[cfg(test)]
    pub fn is_identity(&self) -> bool {
        self.ops.iter().all(EditOp::is_equal)
            && self.nested.values().flatten().all(EditScript::is_identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(ops: Vec<EditOp>) -> EditScript {
        EditScript {
            ops,
            ..EditScript::default()
        }
    }

    #[test]
    fn verify_accepts_complete_script() {
        let s = script(vec![
            EditOp::Equal { a: 0, b: 0 },
            EditOp::Delete { a: 1 },
            EditOp::Insert { b: 1 },
            EditOp::MoveFrom { a: 2, id: 1 },
            EditOp::Equal { a: 3, b: 2 },
            EditOp::MoveTo { b: 3, id: 1 },
        ]);
        assert!(s.verify(4, 4).is_ok());
        assert_eq!(s.summary(), (2, 1, 1, 1));
        assert!(!s.is_identity());
    }

    #[test]
    fn verify_rejects_gaps_and_reordering() {
        let gap = script(vec![EditOp::Equal { a: 0, b: 0 }, EditOp::Delete { a: 2 }]);
        assert!(matches!(
            gap.verify(3, 1),
            Err(RevmarkError::InternalInconsistency(_))
        ));

        let short = script(vec![EditOp::Equal { a: 0, b: 0 }]);
        assert!(short.verify(1, 2).is_err());
    }
}
