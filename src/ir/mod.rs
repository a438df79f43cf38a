//! # ir
//!
//! A minimal SSA-form IR: a module owns functions, functions own ordered basic blocks,
//! blocks own ordered instructions. Everything lives in flat arenas inside `Module` and is
//! addressed by typed ids, so analyses can hold ids instead of references.
//! Every instruction defines exactly one `Value` (void instructions define an unused one).

mod builder;
pub mod loader;

use std::fmt;

pub use builder::ModuleBuilder;

macro_rules! ir_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

ir_id!(ValueId);
ir_id!(FuncId);
ir_id!(BlockId);
ir_id!(InstId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Function(FuncId),
    Argument { function: FuncId, index: usize },
    Instruction(InstId),
    ConstantInt(i64),
    Null,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub kind: ValueKind,
    /// Empty for anonymous values.
    pub name: String,
    pub is_pointer: bool,
}

impl Value {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn as_function(&self) -> Option<FuncId> {
        match self.kind {
            ValueKind::Function(func) => Some(func),
            _ => None,
        }
    }

    pub fn as_instruction(&self) -> Option<InstId> {
        match self.kind {
            ValueKind::Instruction(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn as_constant_int(&self) -> Option<i64> {
        match self.kind {
            ValueKind::ConstantInt(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub value: ValueId,
    pub params: Vec<ValueId>,
    pub returns_pointer: bool,
    pub blocks: Vec<BlockId>,
}

impl Function {
    /// A function without a body is an external declaration.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub name: String,
    pub function: FuncId,
    pub instructions: Vec<InstId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    Eq,
    Ne,
    Sgt,
    Sge,
    Slt,
    Sle,
    Ugt,
    Uge,
    Ult,
    Ule,
}

impl Predicate {
    pub fn from_name(name: &str) -> Option<Self> {
        let predicate = match name {
            "eq" => Predicate::Eq,
            "ne" => Predicate::Ne,
            "sgt" => Predicate::Sgt,
            "sge" => Predicate::Sge,
            "slt" => Predicate::Slt,
            "sle" => Predicate::Sle,
            "ugt" => Predicate::Ugt,
            "uge" => Predicate::Uge,
            "ult" => Predicate::Ult,
            "ule" => Predicate::Ule,
            _ => return None,
        };
        Some(predicate)
    }

    pub fn name(self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Sgt => "sgt",
            Predicate::Sge => "sge",
            Predicate::Slt => "slt",
            Predicate::Sle => "sle",
            Predicate::Ugt => "ugt",
            Predicate::Uge => "uge",
            Predicate::Ult => "ult",
            Predicate::Ule => "ule",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Call {
        callee: ValueId,
        args: Vec<ValueId>,
    },
    Phi {
        incoming: Vec<(ValueId, BlockId)>,
    },
    Branch {
        condition: Option<ValueId>,
        successors: Vec<BlockId>,
    },
    Compare {
        predicate: Predicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    Load {
        pointer: ValueId,
    },
    Store {
        value: ValueId,
        pointer: ValueId,
    },
    GetElementPtr {
        base: ValueId,
        indices: Vec<ValueId>,
    },
    BitCast {
        operand: ValueId,
    },
    Return {
        value: Option<ValueId>,
    },
    Alloca,
    Other {
        opcode: String,
        operands: Vec<ValueId>,
    },
}

impl InstKind {
    pub fn is_store(&self) -> bool {
        matches!(self, InstKind::Store { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstKind,
    pub block: BlockId,
    pub value: ValueId,
    /// Source line from debug metadata, if any.
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub(crate) values: Vec<Value>,
    pub(crate) functions: Vec<Function>,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) instructions: Vec<Instruction>,
}

impl Module {
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn instruction(&self, id: InstId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Functions in module order.
    pub fn functions(&self) -> impl Iterator<Item = FuncId> + '_ {
        (0..self.functions.len()).map(|i| FuncId(i as u32))
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions()
            .find(|func| !name.is_empty() && self.function(*func).name == name)
    }

    /// All instructions of a function, block by block in program order.
    pub fn instructions_of(&self, func: FuncId) -> impl Iterator<Item = InstId> + '_ {
        self.function(func)
            .blocks
            .iter()
            .flat_map(move |block| self.block(*block).instructions.iter().copied())
    }

    pub fn block_of(&self, inst: InstId) -> BlockId {
        self.instruction(inst).block
    }

    pub fn function_of(&self, inst: InstId) -> FuncId {
        self.block(self.block_of(inst)).function
    }

    /// The instruction defining `value`, if `value` is an instruction result.
    pub fn instruction_of(&self, value: ValueId) -> Option<(InstId, &Instruction)> {
        self.value(value)
            .as_instruction()
            .map(|inst| (inst, self.instruction(inst)))
    }

    pub fn kind_of(&self, value: ValueId) -> Option<&InstKind> {
        self.instruction_of(value).map(|(_, inst)| &inst.kind)
    }

    /// Every value returned by `func`, in traversal order.
    pub fn return_values(&self, func: FuncId) -> Vec<ValueId> {
        self.instructions_of(func)
            .filter_map(|inst| match self.instruction(inst).kind {
                InstKind::Return { value } => value,
                _ => None,
            })
            .collect()
    }

    /// Rewrites the called operand of a call instruction.
    ///
    /// # panic: if `call` is not a call instruction
    pub fn set_callee(&mut self, call: InstId, new_callee: ValueId) {
        match &mut self.instructions[call.index()].kind {
            InstKind::Call { callee, .. } => *callee = new_callee,
            kind => panic!("set_callee on a non-call instruction: {:?}", kind),
        }
    }

    fn operand(&self, id: ValueId) -> String {
        let value = self.value(id);
        match value.kind {
            ValueKind::ConstantInt(c) => c.to_string(),
            ValueKind::Null => "null".to_owned(),
            ValueKind::Function(_) | ValueKind::Global => format!("@{}", value.name),
            _ if value.is_anonymous() => format!("%{}", id.0),
            _ => format!("%{}", value.name),
        }
    }

    fn operands(&self, ids: &[ValueId]) -> String {
        ids.iter()
            .map(|id| self.operand(*id))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in self.functions() {
            let function = self.function(func);
            let ret = if function.returns_pointer { "ptr" } else { "val" };
            let keyword = if function.is_declaration() {
                "declare"
            } else {
                "define"
            };
            writeln!(
                f,
                "{} {} @{}({}){}",
                keyword,
                ret,
                function.name,
                self.operands(&function.params),
                if function.is_declaration() { "" } else { " {" }
            )?;
            if function.is_declaration() {
                continue;
            }
            for block in function.blocks.iter() {
                writeln!(f, "{}:", self.block(*block).name)?;
                for inst in self.block(*block).instructions.iter() {
                    let instruction = self.instruction(*inst);
                    let def = self.operand(instruction.value);
                    let text = match &instruction.kind {
                        InstKind::Call { callee, args } => format!(
                            "{} = call {}({})",
                            def,
                            self.operand(*callee),
                            self.operands(args)
                        ),
                        InstKind::Phi { incoming } => format!(
                            "{} = phi {}",
                            def,
                            incoming
                                .iter()
                                .map(|(v, b)| format!(
                                    "[{}, %{}]",
                                    self.operand(*v),
                                    self.block(*b).name
                                ))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        InstKind::Branch {
                            condition,
                            successors,
                        } => {
                            let targets = successors
                                .iter()
                                .map(|b| format!("%{}", self.block(*b).name))
                                .collect::<Vec<_>>()
                                .join(", ");
                            match condition {
                                Some(cond) => format!("br {}, {}", self.operand(*cond), targets),
                                None => format!("br {}", targets),
                            }
                        }
                        InstKind::Compare {
                            predicate,
                            lhs,
                            rhs,
                        } => format!(
                            "{} = icmp {} {}, {}",
                            def,
                            predicate.name(),
                            self.operand(*lhs),
                            self.operand(*rhs)
                        ),
                        InstKind::Load { pointer } => {
                            format!("{} = load {}", def, self.operand(*pointer))
                        }
                        InstKind::Store { value, pointer } => format!(
                            "store {}, {}",
                            self.operand(*value),
                            self.operand(*pointer)
                        ),
                        InstKind::GetElementPtr { base, indices } => format!(
                            "{} = getelementptr {}, {}",
                            def,
                            self.operand(*base),
                            self.operands(indices)
                        ),
                        InstKind::BitCast { operand } => {
                            format!("{} = bitcast {}", def, self.operand(*operand))
                        }
                        InstKind::Return { value: Some(v) } => format!("ret {}", self.operand(*v)),
                        InstKind::Return { value: None } => "ret void".to_owned(),
                        InstKind::Alloca => format!("{} = alloca", def),
                        InstKind::Other { opcode, operands } => {
                            format!("{} = {} {}", def, opcode, self.operands(operands))
                        }
                    };
                    match instruction.line {
                        Some(line) => writeln!(f, "  {} ; line {}", text, line)?,
                        None => writeln!(f, "  {}", text)?,
                    }
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}
