//! # callgraph
//!
//! Call graph built from resolved call sites, including the targets of indirect calls.
//! Node is a FuncId.
//! Edge (A, B, [(T, I)]) means function A calls function B through call type T at call
//! instruction I. A pair of functions has one edge; every call site between them is appended
//! to its weight.

use std::collections::HashSet;

use petgraph::dot::Dot;
use petgraph::visit::Bfs;
use petgraph::{graph::NodeIndex, visit::IntoNodeReferences};
use petgraph::{Directed, Direction, Graph};

use crate::ir::{FuncId, InstId, Module};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    DirectCall,
    IndirectCall,
}

#[derive(Debug, Default)]
pub struct Callgraph {
    pub graph: Graph<FuncId, Vec<(CallType, InstId)>, Directed>,
}

impl Callgraph {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    pub fn function_index(&self, func: FuncId) -> Option<NodeIndex> {
        for (idx, &weight) in self.graph.node_references() {
            if weight == func {
                return Some(idx);
            }
        }
        None
    }

    fn function_index_or_add(&mut self, func: FuncId) -> NodeIndex {
        match self.function_index(func) {
            Some(idx) => idx,
            None => self.graph.add_node(func),
        }
    }

    /// Records that `call` in `caller` may invoke `callee`. Repeated sites are kept once.
    pub fn add_call(&mut self, caller: FuncId, callee: FuncId, call_type: CallType, call: InstId) {
        let caller_idx = self.function_index_or_add(caller);
        let callee_idx = self.function_index_or_add(callee);
        if let Some(edge_idx) = self.graph.find_edge(caller_idx, callee_idx) {
            // update edge weight
            if let Some(weight) = self.graph.edge_weight_mut(edge_idx) {
                if !weight.contains(&(call_type, call)) {
                    weight.push((call_type, call));
                }
            }
        } else {
            // add edge if not exists
            self.graph
                .add_edge(caller_idx, callee_idx, vec![(call_type, call)]);
        }
    }

    /// Functions `func` may call, in FuncId order.
    pub fn callees(&self, func: FuncId) -> Vec<FuncId> {
        let mut callees: Vec<FuncId> = match self.function_index(func) {
            Some(idx) => self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .filter_map(|n| self.index_to_function(n))
                .collect(),
            None => Vec::new(),
        };
        callees.sort();
        callees.dedup();
        callees
    }

    pub fn index_to_function(&self, idx: NodeIndex) -> Option<FuncId> {
        self.graph.node_weight(idx).copied()
    }

    /// Functions reachable from `func` through call edges, in BFS order starting at `func`.
    /// Empty if `func` takes part in no call.
    pub fn reachable_from(&self, func: FuncId) -> Vec<FuncId> {
        let mut reachable = Vec::new();
        if let Some(start) = self.function_index(func) {
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node_id) = bfs.next(&self.graph) {
                if let Some(func) = self.index_to_function(node_id) {
                    reachable.push(func);
                }
            }
        }
        reachable
    }

    /// The callgraph in dot format, nodes labelled by function name.
    /// With a `root`, only the part reachable from it is printed.
    pub fn dot(&self, module: &Module, root: Option<FuncId>) -> String {
        let keep: Option<HashSet<FuncId>> =
            root.map(|root| self.reachable_from(root).into_iter().collect());
        let named = self.graph.filter_map(
            |_, func| {
                if let Some(keep) = &keep {
                    if !keep.contains(func) {
                        return None;
                    }
                }
                let name = &module.function(*func).name;
                if name.is_empty() {
                    Some(format!("<anon#{}>", func.index()))
                } else {
                    Some(name.clone())
                }
            },
            |_, sites| {
                let direct = sites
                    .iter()
                    .filter(|(ty, _)| *ty == CallType::DirectCall)
                    .count();
                let indirect = sites.len() - direct;
                let label = match (direct, indirect) {
                    (_, 0) => "direct",
                    (0, _) => "indirect",
                    _ => "direct+indirect",
                };
                Some(label.to_owned())
            },
        );
        format!("{}", Dot::new(&named))
    }
}
