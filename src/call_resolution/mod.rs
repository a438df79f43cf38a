//! # call_resolution
//!
//! The walker. One forward pass over every defined function, in module order, dispatching on
//! the instruction kind. Calls recurse into their callees' bodies (bounded by the active call
//! chain and `max_call_depth`), binding arguments on the way in and propagating returned
//! pointers on the way out. Within one top-level traversal a callee body is walked once per
//! call context: the points-to sets of its pointer parameters and the cells they reach.
//! All state belongs to one `Analysis`, so independent runs do not share anything.
//!
//! Handlers:
//! - gep: the access points to the current contents of its (owner, offset) cell;
//!   a base reached through a load, call, cast, phi or parameter is followed to the
//!   allocas and globals it points to.
//! - store: into a field goes to the property store, otherwise a direct points-to edge.
//! - load: exposes what the operand points to (fresh cell contents for a field).
//! - phi: union of the incoming values, minus edges from constant-folded dead blocks.
//! - call: direct, through a call result, or through a pointer; intrinsics are filtered.

mod branch;
mod intrinsic;

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info, trace};

pub use branch::{statically_always_taken, FoldedBranches};
pub use intrinsic::Intrinsic;

use crate::callgraph::{CallType, Callgraph};
use crate::config::AnalysisConfig;
use crate::ir::{BlockId, FuncId, InstId, InstKind, Module, ValueId, ValueKind};
use crate::pointer_analysis::property::{offset_of, owner_of};
use crate::pointer_analysis::{PointerId, PointerRegistry, PropertyStore};
use crate::report::Report;

/// How the called operand of a call names its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Callee {
    Direct(FuncId),
    /// result of another call
    CallResult(InstId),
    Indirect,
    Unresolved,
}

impl Callee {
    fn classify(module: &Module, callee: ValueId) -> Self {
        match module.value(callee).kind {
            ValueKind::Function(func) => Callee::Direct(func),
            ValueKind::Instruction(inst) => match module.instruction(inst).kind {
                InstKind::Call { .. } => Callee::CallResult(inst),
                _ => Callee::Indirect,
            },
            ValueKind::Argument { .. } | ValueKind::Global => Callee::Indirect,
            ValueKind::Null | ValueKind::ConstantInt(_) => Callee::Unresolved,
        }
    }
}

/// Values that can stand for a struct or array in memory.
fn can_own(module: &Module, value: ValueId) -> bool {
    !matches!(
        module.value(value).kind,
        ValueKind::Function(_) | ValueKind::Null | ValueKind::ConstantInt(_)
    )
}

/// Storage that exists on its own: a stack slot or a global.
fn is_concrete(module: &Module, value: ValueId) -> bool {
    match module.value(value).kind {
        ValueKind::Global => true,
        ValueKind::Instruction(inst) => matches!(module.instruction(inst).kind, InstKind::Alloca),
        _ => false,
    }
}

/// Whether a field access on `base` goes through a pointer that has to be resolved first.
fn reached_indirectly(module: &Module, base: ValueId) -> bool {
    match module.value(base).kind {
        ValueKind::Argument { .. } => true,
        ValueKind::Instruction(inst) => matches!(
            module.instruction(inst).kind,
            InstKind::Load { .. }
                | InstKind::Call { .. }
                | InstKind::BitCast { .. }
                | InstKind::Phi { .. }
        ),
        _ => false,
    }
}

/// What a callee body can observe through its pointer parameters at one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallContext {
    func: FuncId,
    /// per pointer parameter: its targets, and the cells of the owners it reaches
    params: Vec<(Vec<PointerId>, Vec<(ValueId, i64, BTreeSet<PointerId>)>)>,
}

pub struct Analysis<'m> {
    module: &'m Module,
    config: AnalysisConfig,
    pointers: PointerRegistry,
    properties: PropertyStore,
    report: Report,
    callgraph: Callgraph,
    folded: FoldedBranches,
    call_stack: Vec<FuncId>,
    walked: HashSet<CallContext>,
    body_walks: usize,
}

impl<'m> Analysis<'m> {
    pub fn new(module: &'m Module, config: AnalysisConfig) -> Self {
        Self {
            module,
            config,
            pointers: PointerRegistry::new(),
            properties: PropertyStore::new(),
            report: Report::new(),
            callgraph: Callgraph::new(),
            folded: FoldedBranches::new(),
            call_stack: Vec::new(),
            walked: HashSet::new(),
            body_walks: 0,
        }
    }

    pub fn run(&mut self) {
        let module = self.module;
        for round in 0..self.config.rounds {
            debug!("analysis round {} of {}", round + 1, self.config.rounds);
            for func in module.functions() {
                if module.function(func).is_declaration() {
                    continue;
                }
                self.walked.clear();
                self.visit_function(func);
            }
        }
        info!(
            "{} body walk(s), {} pointer node(s), {} line(s) with calls, {} call graph edge(s)",
            self.body_walks,
            self.pointers.len(),
            self.report.line_callees().lines().count(),
            self.callgraph.graph.edge_count()
        );
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn callgraph(&self) -> &Callgraph {
        &self.callgraph
    }

    pub fn pointers(&self) -> &PointerRegistry {
        &self.pointers
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub fn into_parts(self) -> (Report, Callgraph) {
        (self.report, self.callgraph)
    }

    /// Concrete functions `value` may refer to.
    pub fn resolve(&self, value: ValueId) -> BTreeSet<ValueId> {
        if self.module.value(value).as_function().is_some() {
            return std::iter::once(value).collect();
        }
        match self.pointers.get(value) {
            Some(id) => self.pointers.base_pointer_set(id, self.module),
            None => BTreeSet::new(),
        }
    }

    fn pointer_of(&mut self, inst: InstId) -> PointerId {
        let value = self.module.instruction(inst).value;
        self.pointers.get_or_create(value)
    }

    fn visit_function(&mut self, func: FuncId) {
        let module = self.module;
        trace!(
            "visit {} at depth {}",
            module.function(func).name,
            self.call_stack.len()
        );
        self.body_walks += 1;
        self.call_stack.push(func);
        for inst in module.instructions_of(func) {
            self.visit_instruction(inst);
        }
        self.call_stack.pop();
    }

    fn visit_instruction(&mut self, inst: InstId) {
        let module = self.module;
        match &module.instruction(inst).kind {
            InstKind::Call { callee, args } => self.visit_call(inst, *callee, args),
            InstKind::Phi { incoming } => self.visit_phi(inst, incoming),
            InstKind::Branch { .. } => self.folded.observe(module, inst),
            InstKind::Load { pointer } => self.visit_load(inst, *pointer),
            InstKind::Store { value, pointer } => self.visit_store(inst, *value, *pointer),
            InstKind::GetElementPtr { base, .. } => self.visit_field_access(inst, *base),
            InstKind::BitCast { operand } => {
                let me = self.pointer_of(inst);
                let src = self.pointers.get_or_create(*operand);
                self.pointers.copy_point_to_set(me, src, inst, module);
            }
            InstKind::Compare { .. }
            | InstKind::Return { .. }
            | InstKind::Alloca
            | InstKind::Other { .. } => {}
        }
    }

    /// Struct/array instances a field access on `base` may touch.
    /// A direct base is its own owner. A base obtained through a load, call, cast, phi or
    /// parameter is followed through its points-to edges down to allocas and globals.
    /// Other nodes stop the walk only when they point nowhere; a base that points nowhere
    /// yet stands for itself.
    fn resolve_owners(&self, base: ValueId) -> Vec<ValueId> {
        let module = self.module;
        if !reached_indirectly(module, base) {
            return vec![base];
        }
        let root = match self.pointers.get(base) {
            Some(root) if !self.pointers.pointer(root).is_empty() => root,
            _ => return vec![base],
        };
        let mut owners = BTreeSet::new();
        let mut visited = HashSet::new();
        visited.insert(root);
        let mut stack = self.pointers.pointer(root).targets();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let value = self.pointers.value_of(id);
            let pointer = self.pointers.pointer(id);
            if is_concrete(module, value) {
                owners.insert(value);
            } else if pointer.is_empty() {
                if can_own(module, value) {
                    owners.insert(value);
                }
            } else {
                stack.extend(pointer.targets());
            }
        }
        if owners.is_empty() {
            owners.insert(base);
        }
        owners.into_iter().collect()
    }

    /// Current contents of the cell(s) addressed by `access`.
    fn field_contents(&mut self, access: InstId, base: ValueId) -> Vec<PointerId> {
        let offset = offset_of(self.module, access);
        let mut contents = BTreeSet::new();
        for owner in self.resolve_owners(base) {
            self.properties.init_if_absent(owner, offset);
            contents.extend(self.properties.lookup(owner, offset));
        }
        contents.into_iter().collect()
    }

    fn visit_field_access(&mut self, access: InstId, base: ValueId) {
        let contents = self.field_contents(access, base);
        if contents.is_empty() {
            return;
        }
        let me = self.pointer_of(access);
        self.pointers
            .point_to_set(me, &contents, access, self.module);
    }

    fn visit_store(&mut self, store: InstId, value: ValueId, dest: ValueId) {
        let module = self.module;
        let source = self.pointers.get_or_create(value);
        if let Some((access, instruction)) = module.instruction_of(dest) {
            if let InstKind::GetElementPtr { .. } = instruction.kind {
                let offset = offset_of(module, access);
                for owner in self.resolve_owners(owner_of(module, access)) {
                    trace!("store into field {} of {:?}", offset, owner);
                    self.properties
                        .record_store(owner, offset, source, store, module);
                }
                return;
            }
        }
        let dest = self.pointers.get_or_create(dest);
        self.pointers.point_to(dest, source, store, module);
    }

    fn visit_load(&mut self, load: InstId, operand: ValueId) {
        let module = self.module;
        let me = self.pointer_of(load);
        if let Some((access, instruction)) = module.instruction_of(operand) {
            if let InstKind::GetElementPtr { base, .. } = &instruction.kind {
                let contents = self.field_contents(access, *base);
                if !contents.is_empty() {
                    self.pointers.point_to_set(me, &contents, load, module);
                }
                return;
            }
        }
        let src = self.pointers.get_or_create(operand);
        self.pointers.copy_point_to_set(me, src, load, module);
    }

    fn visit_phi(&mut self, phi: InstId, incoming: &'m [(ValueId, BlockId)]) {
        let module = self.module;
        let me = self.pointer_of(phi);
        let mut targets = BTreeSet::new();
        for (value, _) in self.folded.live_incoming(incoming) {
            let src = self.pointers.get_or_create(*value);
            if src == me {
                continue;
            }
            let pointer = self.pointers.pointer(src);
            if pointer.is_empty() {
                targets.insert(src);
            } else {
                targets.extend(pointer.targets());
            }
        }
        let targets: Vec<PointerId> = targets.into_iter().collect();
        self.pointers.point_to_set(me, &targets, phi, module);
    }

    fn visit_call(&mut self, call: InstId, callee: ValueId, args: &'m [ValueId]) {
        let module = self.module;
        let (candidates, call_type) = match Callee::classify(module, callee) {
            Callee::Direct(func) => {
                let name = &module.function(func).name;
                if let Some(intrinsic) = Intrinsic::new(name) {
                    trace!("intrinsic {:?} ({})", intrinsic, name);
                    if intrinsic.is_aggregate_copy() {
                        self.copy_aggregate(args);
                    }
                    return;
                }
                (self.resolve(callee), CallType::DirectCall)
            }
            Callee::CallResult(nested) => {
                let mut candidates = self.resolve(callee);
                if candidates.is_empty() {
                    // the nested call has not produced anything yet
                    self.visit_instruction(nested);
                    candidates = self.resolve(callee);
                }
                (candidates, CallType::IndirectCall)
            }
            Callee::Indirect => (self.resolve(callee), CallType::IndirectCall),
            Callee::Unresolved => (BTreeSet::new(), CallType::IndirectCall),
        };
        debug!(
            "call at {:?} resolved to {:?}",
            module.instruction(call).line,
            candidates
                .iter()
                .map(|c| module.value(*c).name.as_str())
                .collect::<Vec<_>>()
        );
        self.report.record_call(module, call, &candidates);
        for candidate in candidates.iter() {
            if let Some(func) = module.value(*candidate).as_function() {
                self.invoke(call, func, args, call_type);
            }
        }
    }

    /// memcpy/memmove: the source aggregate's cells are copied into the destination.
    /// A single known destination is overwritten; several destinations only gain cells.
    fn copy_aggregate(&mut self, args: &[ValueId]) {
        if args.len() < 2 {
            return;
        }
        let dests = self.resolve_owners(args[0]);
        let sources = self.resolve_owners(args[1]);
        let overwrite = dests.len() == 1
            && !sources.contains(&dests[0])
            && sources.iter().any(|s| self.properties.contains_owner(*s));
        for dest in dests.iter() {
            if overwrite {
                trace!("overwriting the cells of {:?}", dest);
                self.properties.forget(*dest);
            }
            for source in sources.iter() {
                self.properties.copy_offset_map(*dest, *source);
            }
        }
    }

    fn invoke(&mut self, call: InstId, func: FuncId, args: &'m [ValueId], call_type: CallType) {
        let module = self.module;
        let function = module.function(func);
        self.callgraph
            .add_call(module.function_of(call), func, call_type, call);
        if function.is_declaration() || self.config.is_opaque(&function.name) {
            trace!("{} is opaque", function.name);
            return;
        }
        self.bind_arguments(call, func, args);
        if self.call_stack.contains(&func) {
            debug!("{} is already on the call chain, not re-entering", function.name);
        } else if self.call_stack.len() > self.config.max_call_depth {
            debug!(
                "call depth {} exceeds {}, not entering {}",
                self.call_stack.len(),
                self.config.max_call_depth,
                function.name
            );
        } else {
            let context = self.call_context(func);
            if self.walked.insert(context) {
                self.visit_function(func);
            } else {
                trace!("{} already walked in this context", function.name);
            }
        }
        if function.returns_pointer {
            let me = self.pointer_of(call);
            for ret in module.return_values(func) {
                let src = self.pointers.get_or_create(ret);
                self.pointers.copy_point_to_set(me, src, call, module);
            }
        }
    }

    /// Pairs actuals with pointer-typed formals positionally. A formal points where its
    /// actual points, so writes through it land in the caller's objects. An array element
    /// also binds the formal to the array, for indexing from the callee.
    fn bind_arguments(&mut self, call: InstId, func: FuncId, args: &[ValueId]) {
        let module = self.module;
        for (formal, actual) in module.function(func).params.iter().zip(args.iter()) {
            if !module.value(*formal).is_pointer {
                continue;
            }
            let formal_ptr = self.pointers.get_or_create(*formal);
            if let Some((access, instruction)) = module.instruction_of(*actual) {
                if let InstKind::GetElementPtr { base, .. } = &instruction.kind {
                    let mut targets: BTreeSet<PointerId> = self
                        .resolve_owners(*base)
                        .into_iter()
                        .map(|owner| self.pointers.get_or_create(owner))
                        .collect();
                    targets.extend(self.field_contents(access, *base));
                    let targets: Vec<PointerId> = targets.into_iter().collect();
                    self.pointers
                        .point_to_set(formal_ptr, &targets, call, module);
                    continue;
                }
            }
            let actual_ptr = self.pointers.get_or_create(*actual);
            self.pointers
                .copy_point_to_set(formal_ptr, actual_ptr, call, module);
        }
    }

    fn call_context(&self, func: FuncId) -> CallContext {
        let module = self.module;
        let params = module
            .function(func)
            .params
            .iter()
            .filter(|formal| module.value(**formal).is_pointer)
            .map(|formal| {
                let targets = self
                    .pointers
                    .get(*formal)
                    .map(|id| self.pointers.pointer(id).targets())
                    .unwrap_or_default();
                let mut cells = Vec::new();
                for owner in self.resolve_owners(*formal) {
                    for offset in self.properties.offsets(owner) {
                        cells.push((owner, offset, self.properties.lookup(owner, offset)));
                    }
                }
                (targets, cells)
            })
            .collect();
        CallContext { func, params }
    }
}
