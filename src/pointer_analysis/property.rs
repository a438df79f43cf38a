//! Field-sensitive memory model.
//!
//! A cell is keyed by (owner, offset): the owner is the base value of a field/index access and
//! the offset is the final constant index of that access (0 when it is not a constant).
//! Each cell holds the pointers stored into it and the store that last wrote each of them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{kills, PointerId};
use crate::ir::{InstId, InstKind, Module, ValueId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    entries: HashMap<PointerId, InstId>,
}

impl Cell {
    pub fn candidates(&self) -> BTreeSet<PointerId> {
        self.entries.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Final constant index of a field/index access, or 0.
///
/// # panic: if `access` is not a field/index access
pub fn offset_of(module: &Module, access: InstId) -> i64 {
    match &module.instruction(access).kind {
        InstKind::GetElementPtr { indices, .. } => indices
            .last()
            .and_then(|index| module.value(*index).as_constant_int())
            .unwrap_or(0),
        kind => panic!("offset_of on a non field access: {:?}", kind),
    }
}

/// Base operand of a field/index access.
///
/// # panic: if `access` is not a field/index access
pub fn owner_of(module: &Module, access: InstId) -> ValueId {
    match &module.instruction(access).kind {
        InstKind::GetElementPtr { base, .. } => *base,
        kind => panic!("owner_of on a non field access: {:?}", kind),
    }
}

#[derive(Debug, Default)]
pub struct PropertyStore {
    owners: HashMap<ValueId, BTreeMap<i64, Cell>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self {
            owners: HashMap::new(),
        }
    }

    pub fn contains_owner(&self, owner: ValueId) -> bool {
        self.owners.contains_key(&owner)
    }

    pub fn init_if_absent(&mut self, owner: ValueId, offset: i64) {
        self.owners
            .entry(owner)
            .or_default()
            .entry(offset)
            .or_default();
    }

    /// Writes `source` into (owner, offset). Entries superseded by `store` are dropped first,
    /// except an entry for `source` itself.
    pub fn record_store(
        &mut self,
        owner: ValueId,
        offset: i64,
        source: PointerId,
        store: InstId,
        module: &Module,
    ) {
        let cell = self
            .owners
            .entry(owner)
            .or_default()
            .entry(offset)
            .or_default();
        cell.entries
            .retain(|candidate, writer| *candidate == source || !kills(module, store, *writer));
        cell.entries.insert(source, store);
    }

    /// Candidates stored at (owner, offset); empty if never written.
    pub fn lookup(&self, owner: ValueId, offset: i64) -> BTreeSet<PointerId> {
        self.cell(owner, offset)
            .map(Cell::candidates)
            .unwrap_or_default()
    }

    pub fn cell(&self, owner: ValueId, offset: i64) -> Option<&Cell> {
        self.owners.get(&owner).and_then(|cells| cells.get(&offset))
    }

    pub fn offsets(&self, owner: ValueId) -> Vec<i64> {
        self.owners
            .get(&owner)
            .map(|cells| cells.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Drops every cell of `owner`.
    pub fn forget(&mut self, owner: ValueId) {
        self.owners.remove(&owner);
    }

    /// Merges every cell of `source` into `dest`. Existing entries of `dest` are kept.
    pub fn copy_offset_map(&mut self, dest: ValueId, source: ValueId) {
        if dest == source {
            return;
        }
        let cells = match self.owners.get(&source) {
            Some(cells) => cells.clone(),
            None => return,
        };
        let dest_cells = self.owners.entry(dest).or_default();
        for (offset, cell) in cells {
            let dest_cell = dest_cells.entry(offset).or_default();
            for (candidate, writer) in cell.entries {
                dest_cell.entries.entry(candidate).or_insert(writer);
            }
        }
    }
}
