//! # pointer_analysis
//!
//! Points-to state of one analysis run.
//!
//! Every IR value that takes part in pointer flow gets exactly one `Pointer` node, owned by the
//! `PointerRegistry` and addressed by `PointerId`. An edge `a -> b` means "a may point to b" and
//! remembers the instruction that created it, which drives the kill rule:
//! a store drops the edges created in its own basic block (straight-line overwrite)
//! and the edges created in another function (stale call context).
//!
//! Struct fields and array slots are modeled separately by `PropertyStore`.

pub mod property;

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::ir::{InstId, Module, ValueId};

pub use property::{Cell, PropertyStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerId(usize);

impl PointerId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Pointer {
    value: ValueId,
    /// target -> instruction that created the edge
    points_to: HashMap<PointerId, InstId>,
}

impl Pointer {
    fn new(value: ValueId) -> Self {
        Self {
            value,
            points_to: HashMap::new(),
        }
    }

    pub fn value(&self) -> ValueId {
        self.value
    }

    pub fn is_empty(&self) -> bool {
        self.points_to.is_empty()
    }

    pub fn points_to(&self, target: PointerId) -> bool {
        self.points_to.contains_key(&target)
    }

    pub fn targets(&self) -> Vec<PointerId> {
        let mut targets: Vec<PointerId> = self.points_to.keys().copied().collect();
        targets.sort();
        targets
    }
}

/// Whether an edge created by `old` is superseded by the write `new`.
/// Only stores kill: edges from the same block, or from a different function.
pub fn kills(module: &Module, new: InstId, old: InstId) -> bool {
    if !module.instruction(new).kind.is_store() {
        return false;
    }
    module.block_of(new) == module.block_of(old)
        || module.function_of(new) != module.function_of(old)
}

#[derive(Debug, Default)]
pub struct PointerRegistry {
    pointers: Vec<Pointer>,
    by_value: HashMap<ValueId, PointerId>,
}

impl PointerRegistry {
    pub fn new() -> Self {
        Self {
            pointers: Vec::new(),
            by_value: HashMap::new(),
        }
    }

    /// The unique node of `value`, created on first use.
    pub fn get_or_create(&mut self, value: ValueId) -> PointerId {
        if let Some(id) = self.by_value.get(&value) {
            return *id;
        }
        let id = PointerId(self.pointers.len());
        self.pointers.push(Pointer::new(value));
        self.by_value.insert(value, id);
        id
    }

    pub fn get(&self, value: ValueId) -> Option<PointerId> {
        self.by_value.get(&value).copied()
    }

    pub fn pointer(&self, id: PointerId) -> &Pointer {
        &self.pointers[id.0]
    }

    pub fn value_of(&self, id: PointerId) -> ValueId {
        self.pointers[id.0].value
    }

    pub(crate) fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn point_to(&mut self, src: PointerId, target: PointerId, inst: InstId, module: &Module) {
        self.point_to_set(src, &[target], inst, module);
    }

    /// Adds the edges of one write. The kill rule runs once, before insertion,
    /// so all targets of the same write survive together.
    pub fn point_to_set(
        &mut self,
        src: PointerId,
        targets: &[PointerId],
        inst: InstId,
        module: &Module,
    ) {
        let pointer = &mut self.pointers[src.0];
        if module.instruction(inst).kind.is_store() {
            pointer.points_to.retain(|_, old| !kills(module, inst, *old));
        }
        for target in targets {
            pointer.points_to.insert(*target, inst);
        }
    }

    /// `dst` points to whatever `other` points to, or to `other` itself when its set is empty.
    pub fn copy_point_to_set(
        &mut self,
        dst: PointerId,
        other: PointerId,
        inst: InstId,
        module: &Module,
    ) {
        let source = &self.pointers[other.0];
        let targets = if source.is_empty() {
            if dst == other {
                return;
            }
            vec![other]
        } else {
            source.targets()
        };
        self.point_to_set(dst, &targets, inst, module);
    }

    /// Concrete functions reachable from `id` through points-to edges.
    /// Leaves are nodes with an empty set; only function values count.
    pub fn base_pointer_set(&self, id: PointerId, module: &Module) -> BTreeSet<ValueId> {
        let mut bases = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let pointer = &self.pointers[id.0];
            if pointer.is_empty() {
                if module.value(pointer.value).as_function().is_some() {
                    bases.insert(pointer.value);
                }
            } else {
                stack.extend(pointer.points_to.keys().copied());
            }
        }
        bases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ModuleBuilder;

    #[test]
    fn test_registry_identity() {
        let mut mb = ModuleBuilder::new();
        let f = mb.function("f", false);
        let g = mb.function("g", false);
        let f_v = mb.function_value(f);
        let g_v = mb.function_value(g);
        let mut registry = PointerRegistry::new();
        let a = registry.get_or_create(f_v);
        assert_eq!(registry.get_or_create(f_v), a);
        assert_ne!(registry.get_or_create(g_v), a);
        assert_eq!(registry.get(f_v), Some(a));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.value_of(a), f_v);
    }

    #[test]
    fn test_store_kills_same_block_edges() {
        let mut mb = ModuleBuilder::new();
        let plus = mb.function("plus", false);
        let minus = mb.function("minus", false);
        let main = mb.function("main", false);
        let entry = mb.block(main, "entry");
        let plus_v = mb.function_value(plus);
        let minus_v = mb.function_value(minus);
        let slot = mb.alloca(entry, "slot");
        let first = mb.store(entry, plus_v, slot);
        let second = mb.store(entry, minus_v, slot);
        let module = mb.finish();
        let first = module.value(first).as_instruction().unwrap();
        let second = module.value(second).as_instruction().unwrap();

        let mut registry = PointerRegistry::new();
        let p = registry.get_or_create(slot);
        let plus_p = registry.get_or_create(plus_v);
        let minus_p = registry.get_or_create(minus_v);
        registry.point_to(p, plus_p, first, &module);
        registry.point_to(p, minus_p, second, &module);
        assert_eq!(registry.pointer(p).targets(), vec![minus_p]);
        assert_eq!(registry.pointer(p).points_to.get(&minus_p), Some(&second));
        assert_eq!(
            registry.base_pointer_set(p, &module),
            vec![minus_v].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_store_keeps_edges_from_other_blocks_of_same_function() {
        let mut mb = ModuleBuilder::new();
        let plus = mb.function("plus", false);
        let minus = mb.function("minus", false);
        let main = mb.function("main", false);
        let entry = mb.block(main, "entry");
        let next = mb.block(main, "next");
        let plus_v = mb.function_value(plus);
        let minus_v = mb.function_value(minus);
        let slot = mb.alloca(entry, "slot");
        let first = mb.store(entry, plus_v, slot);
        let second = mb.store(next, minus_v, slot);
        let module = mb.finish();
        let first = module.value(first).as_instruction().unwrap();
        let second = module.value(second).as_instruction().unwrap();

        let mut registry = PointerRegistry::new();
        let p = registry.get_or_create(slot);
        let plus_p = registry.get_or_create(plus_v);
        let minus_p = registry.get_or_create(minus_v);
        registry.point_to(p, plus_p, first, &module);
        registry.point_to(p, minus_p, second, &module);
        assert_eq!(registry.pointer(p).targets(), vec![plus_p, minus_p]);
    }

    #[test]
    fn test_copy_of_empty_set_points_to_source_and_cycles_terminate() {
        let mut mb = ModuleBuilder::new();
        let plus = mb.function("plus", false);
        let main = mb.function("main", false);
        let entry = mb.block(main, "entry");
        let plus_v = mb.function_value(plus);
        let a = mb.bitcast(entry, plus_v, "a");
        let b = mb.bitcast(entry, a, "b");
        let module = mb.finish();
        let a_inst = module.value(a).as_instruction().unwrap();
        let b_inst = module.value(b).as_instruction().unwrap();

        let mut registry = PointerRegistry::new();
        let plus_p = registry.get_or_create(plus_v);
        let a_p = registry.get_or_create(a);
        let b_p = registry.get_or_create(b);
        registry.copy_point_to_set(a_p, plus_p, a_inst, &module);
        assert_eq!(registry.pointer(a_p).targets(), vec![plus_p]);
        registry.copy_point_to_set(b_p, a_p, b_inst, &module);
        assert_eq!(registry.pointer(b_p).targets(), vec![plus_p]);

        // close a cycle a -> b -> a
        registry.point_to(a_p, b_p, b_inst, &module);
        registry.point_to(b_p, a_p, b_inst, &module);
        let bases = registry.base_pointer_set(a_p, &module);
        assert_eq!(bases, vec![plus_v].into_iter().collect::<BTreeSet<_>>());

        // copying an empty node onto itself adds no self edge
        registry.copy_point_to_set(plus_p, plus_p, a_inst, &module);
        assert!(registry.pointer(plus_p).is_empty());
    }

    #[test]
    fn test_base_set_ignores_non_function_leaves() {
        let mut mb = ModuleBuilder::new();
        let main = mb.function("main", false);
        let entry = mb.block(main, "entry");
        let slot = mb.alloca(entry, "slot");
        let null = mb.null();
        let cast = mb.bitcast(entry, null, "cast");
        let module = mb.finish();
        let inst = module.value(cast).as_instruction().unwrap();

        let mut registry = PointerRegistry::new();
        let slot_p = registry.get_or_create(slot);
        let cast_p = registry.get_or_create(cast);
        registry.copy_point_to_set(cast_p, slot_p, inst, &module);
        assert!(registry.base_pointer_set(cast_p, &module).is_empty());
    }
}
