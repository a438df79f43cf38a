//! Constant branch folding, used only to sharpen PHI resolution.

use std::collections::HashSet;

use crate::ir::{BlockId, InstId, InstKind, Module, Predicate, ValueId};

/// Whether `lhs <predicate> rhs` holds for two integer constants.
pub fn statically_always_taken(predicate: Predicate, lhs: i64, rhs: i64) -> bool {
    let (ul, ur) = (lhs as u64, rhs as u64);
    match predicate {
        Predicate::Eq => lhs == rhs,
        Predicate::Ne => lhs != rhs,
        Predicate::Sgt => lhs > rhs,
        Predicate::Sge => lhs >= rhs,
        Predicate::Slt => lhs < rhs,
        Predicate::Sle => lhs <= rhs,
        Predicate::Ugt => ul > ur,
        Predicate::Uge => ul >= ur,
        Predicate::Ult => ul < ur,
        Predicate::Ule => ul <= ur,
    }
}

/// Successor blocks decided by constant comparisons seen so far.
#[derive(Debug, Default)]
pub struct FoldedBranches {
    always: HashSet<BlockId>,
    never: HashSet<BlockId>,
}

impl FoldedBranches {
    pub fn new() -> Self {
        Self {
            always: HashSet::new(),
            never: HashSet::new(),
        }
    }

    /// Folds `branch` if its condition compares two integer constants.
    pub fn observe(&mut self, module: &Module, branch: InstId) {
        let (condition, successors) = match &module.instruction(branch).kind {
            InstKind::Branch {
                condition: Some(condition),
                successors,
            } if successors.len() == 2 => (*condition, successors),
            _ => return,
        };
        let (predicate, lhs, rhs) = match module.kind_of(condition) {
            Some(InstKind::Compare {
                predicate,
                lhs,
                rhs,
            }) => (*predicate, *lhs, *rhs),
            _ => return,
        };
        let (lhs, rhs) = match (
            module.value(lhs).as_constant_int(),
            module.value(rhs).as_constant_int(),
        ) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            _ => return,
        };
        let (taken, skipped) = if statically_always_taken(predicate, lhs, rhs) {
            (successors[0], successors[1])
        } else {
            (successors[1], successors[0])
        };
        if taken == skipped {
            return;
        }
        self.always.insert(taken);
        self.never.insert(skipped);
    }

    pub fn is_always_taken(&self, block: BlockId) -> bool {
        self.always.contains(&block)
    }

    pub fn is_never_taken(&self, block: BlockId) -> bool {
        self.never.contains(&block)
    }

    /// Incoming PHI edges that may still carry a value. Edges from never-taken blocks are
    /// dropped, and edges from always-taken blocks win over the rest. Falls back to all edges
    /// when folding would leave none.
    pub fn live_incoming<'a>(
        &self,
        incoming: &'a [(ValueId, BlockId)],
    ) -> Vec<&'a (ValueId, BlockId)> {
        let reachable: Vec<_> = incoming
            .iter()
            .filter(|(_, block)| !self.is_never_taken(*block))
            .collect();
        if reachable.is_empty() {
            return incoming.iter().collect();
        }
        let always: Vec<_> = reachable
            .iter()
            .copied()
            .filter(|(_, block)| self.is_always_taken(*block))
            .collect();
        if always.is_empty() {
            reachable
        } else {
            always
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ModuleBuilder;

    #[test]
    fn test_statically_always_taken() {
        assert!(statically_always_taken(Predicate::Eq, 1, 1));
        assert!(!statically_always_taken(Predicate::Ne, 1, 1));
        assert!(statically_always_taken(Predicate::Sgt, 2, 1));
        assert!(statically_always_taken(Predicate::Sge, 1, 1));
        assert!(statically_always_taken(Predicate::Slt, -1, 0));
        assert!(statically_always_taken(Predicate::Sle, 0, 0));
        // -1 is the largest unsigned value
        assert!(statically_always_taken(Predicate::Ugt, -1, 0));
        assert!(!statically_always_taken(Predicate::Ult, -1, 0));
        assert!(statically_always_taken(Predicate::Uge, 3, 3));
        assert!(statically_always_taken(Predicate::Ule, 0, 3));
    }

    #[test]
    fn test_observe_and_filter_incoming() {
        let mut mb = ModuleBuilder::new();
        let f = mb.function("f", false);
        let entry = mb.block(f, "entry");
        let then_block = mb.block(f, "then");
        let else_block = mb.block(f, "else");
        let one = mb.const_int(1);
        let two = mb.const_int(2);
        let cond = mb.icmp(entry, Predicate::Slt, two, one, "cond");
        let br = mb.cond_br(entry, cond, then_block, else_block);
        let a = mb.global("a");
        let b = mb.global("b");
        let module = mb.finish();
        let br = module.value(br).as_instruction().unwrap();

        let mut folded = FoldedBranches::new();
        folded.observe(&module, br);
        assert!(folded.is_always_taken(else_block));
        assert!(folded.is_never_taken(then_block));

        let incoming = [(a, then_block), (b, else_block)];
        assert_eq!(folded.live_incoming(&incoming), vec![&(b, else_block)]);
        let only_dead = [(a, then_block)];
        assert_eq!(folded.live_incoming(&only_dead), vec![&(a, then_block)]);
    }

    #[test]
    fn test_non_constant_condition_is_ignored() {
        let mut mb = ModuleBuilder::new();
        let f = mb.function("f", false);
        let x = mb.param(f, "x", false);
        let entry = mb.block(f, "entry");
        let left = mb.block(f, "left");
        let right = mb.block(f, "right");
        let one = mb.const_int(1);
        let cond = mb.icmp(entry, Predicate::Eq, x, one, "cond");
        let br = mb.cond_br(entry, cond, left, right);
        let module = mb.finish();
        let br = module.value(br).as_instruction().unwrap();

        let mut folded = FoldedBranches::new();
        folded.observe(&module, br);
        assert!(!folded.is_always_taken(left));
        assert!(!folded.is_never_taken(right));
    }
}
