//! # loader
//!
//! Reads a module from its JSON form.
//!
//! ```json
//! { "functions": [ { "name": "main", "params": [], "blocks": [ { "name": "entry",
//!   "instructions": [
//!     { "op": "alloca", "def": "s" },
//!     { "op": "gep", "def": "f", "base": "%s", "indices": [0, 0] },
//!     { "op": "store", "value": "@plus", "ptr": "%f" },
//!     { "op": "load", "def": "0", "ptr": "%f", "pointer": true },
//!     { "op": "call", "callee": "%0", "args": [1, 2], "line": 7 },
//!     { "op": "ret" } ] } ] } ] }
//! ```
//!
//! Operands are `@name` (function or global), `%name` (parameter or instruction result
//! of the enclosing function), `null`, or an integer literal. A purely numeric `def`
//! yields an anonymous value, as unnamed LLVM temporaries do.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{BlockId, InstId, InstKind, Module, ModuleBuilder, Predicate, ValueId};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown global '@{name}' referenced in function '{function}'")]
    UnknownGlobal { name: String, function: String },

    #[error("unknown local '%{name}' referenced in function '{function}'")]
    UnknownLocal { name: String, function: String },

    #[error("unknown block '{block}' referenced in function '{function}'")]
    UnknownBlock { block: String, function: String },

    #[error("'{name}' is defined more than once in {scope}")]
    Duplicate { name: String, scope: String },

    #[error("unknown comparison predicate '{0}'")]
    UnknownPredicate(String),

    #[error("malformed operand '{0}', expected @global, %local, null or an integer")]
    BadOperand(String),
}

#[derive(Debug, Deserialize)]
pub struct ModuleDef {
    #[serde(default)]
    pub globals: Vec<String>,
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub returns_pointer: bool,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub blocks: Vec<BlockDef>,
}

#[derive(Debug, Deserialize)]
pub struct ParamDef {
    pub name: String,
    #[serde(default)]
    pub pointer: bool,
}

#[derive(Debug, Deserialize)]
pub struct BlockDef {
    pub name: String,
    #[serde(default)]
    pub instructions: Vec<InstructionDef>,
}

#[derive(Debug, Deserialize)]
pub struct InstructionDef {
    #[serde(default)]
    pub def: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pointer: bool,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(flatten)]
    pub op: OpDef,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OpDef {
    Call {
        callee: OperandDef,
        #[serde(default)]
        args: Vec<OperandDef>,
    },
    Phi {
        incoming: Vec<(OperandDef, String)>,
    },
    Br {
        #[serde(default)]
        cond: Option<OperandDef>,
        targets: Vec<String>,
    },
    Icmp {
        predicate: String,
        lhs: OperandDef,
        rhs: OperandDef,
    },
    Load {
        ptr: OperandDef,
    },
    Store {
        value: OperandDef,
        ptr: OperandDef,
    },
    Gep {
        base: OperandDef,
        #[serde(default)]
        indices: Vec<OperandDef>,
    },
    Bitcast {
        value: OperandDef,
    },
    Ret {
        #[serde(default)]
        value: Option<OperandDef>,
    },
    Alloca,
    Other {
        opcode: String,
        #[serde(default)]
        operands: Vec<OperandDef>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OperandDef {
    Int(i64),
    Name(String),
}

pub fn load_file(path: &Path) -> Result<Module, LoadError> {
    let text = fs::read_to_string(path)?;
    load_str(&text)
}

pub fn load_str(text: &str) -> Result<Module, LoadError> {
    let def: ModuleDef = serde_json::from_str(text)?;
    from_def(&def)
}

/// Symbols visible while resolving the operands of one function.
struct Scope<'a> {
    function: &'a str,
    globals: &'a HashMap<String, ValueId>,
    locals: HashMap<String, ValueId>,
    blocks: HashMap<String, BlockId>,
}

impl<'a> Scope<'a> {
    fn operand(&self, mb: &mut ModuleBuilder, op: &OperandDef) -> Result<ValueId, LoadError> {
        match op {
            OperandDef::Int(c) => Ok(mb.const_int(*c)),
            OperandDef::Name(name) if name == "null" => Ok(mb.null()),
            OperandDef::Name(name) if name.starts_with('@') => {
                let name = &name[1..];
                self.globals
                    .get(name)
                    .copied()
                    .ok_or_else(|| LoadError::UnknownGlobal {
                        name: name.to_owned(),
                        function: self.function.to_owned(),
                    })
            }
            OperandDef::Name(name) if name.starts_with('%') => {
                let name = &name[1..];
                self.locals
                    .get(name)
                    .copied()
                    .ok_or_else(|| LoadError::UnknownLocal {
                        name: name.to_owned(),
                        function: self.function.to_owned(),
                    })
            }
            OperandDef::Name(name) => Err(LoadError::BadOperand(name.clone())),
        }
    }

    fn operands(
        &self,
        mb: &mut ModuleBuilder,
        ops: &[OperandDef],
    ) -> Result<Vec<ValueId>, LoadError> {
        ops.iter().map(|op| self.operand(mb, op)).collect()
    }

    fn block(&self, name: &str) -> Result<BlockId, LoadError> {
        self.blocks
            .get(name)
            .copied()
            .ok_or_else(|| LoadError::UnknownBlock {
                block: name.to_owned(),
                function: self.function.to_owned(),
            })
    }

    fn kind(&self, mb: &mut ModuleBuilder, op: &OpDef) -> Result<InstKind, LoadError> {
        let kind = match op {
            OpDef::Call { callee, args } => InstKind::Call {
                callee: self.operand(mb, callee)?,
                args: self.operands(mb, args)?,
            },
            OpDef::Phi { incoming } => {
                let mut resolved = Vec::with_capacity(incoming.len());
                for (value, block) in incoming {
                    resolved.push((self.operand(mb, value)?, self.block(block)?));
                }
                InstKind::Phi { incoming: resolved }
            }
            OpDef::Br { cond, targets } => {
                let condition = match cond {
                    Some(cond) => Some(self.operand(mb, cond)?),
                    None => None,
                };
                let successors = targets
                    .iter()
                    .map(|target| self.block(target))
                    .collect::<Result<Vec<_>, _>>()?;
                InstKind::Branch {
                    condition,
                    successors,
                }
            }
            OpDef::Icmp {
                predicate,
                lhs,
                rhs,
            } => InstKind::Compare {
                predicate: Predicate::from_name(predicate)
                    .ok_or_else(|| LoadError::UnknownPredicate(predicate.clone()))?,
                lhs: self.operand(mb, lhs)?,
                rhs: self.operand(mb, rhs)?,
            },
            OpDef::Load { ptr } => InstKind::Load {
                pointer: self.operand(mb, ptr)?,
            },
            OpDef::Store { value, ptr } => InstKind::Store {
                value: self.operand(mb, value)?,
                pointer: self.operand(mb, ptr)?,
            },
            OpDef::Gep { base, indices } => InstKind::GetElementPtr {
                base: self.operand(mb, base)?,
                indices: self.operands(mb, indices)?,
            },
            OpDef::Bitcast { value } => InstKind::BitCast {
                operand: self.operand(mb, value)?,
            },
            OpDef::Ret { value } => InstKind::Return {
                value: match value {
                    Some(value) => Some(self.operand(mb, value)?),
                    None => None,
                },
            },
            OpDef::Alloca => InstKind::Alloca,
            OpDef::Other { opcode, operands } => InstKind::Other {
                opcode: opcode.clone(),
                operands: self.operands(mb, operands)?,
            },
        };
        Ok(kind)
    }
}

fn display_name(inst: &InstructionDef) -> String {
    match (&inst.name, &inst.def) {
        (Some(name), _) => name.clone(),
        (None, Some(def)) if !def.chars().all(|c| c.is_ascii_digit()) => def.clone(),
        _ => String::new(),
    }
}

pub fn from_def(def: &ModuleDef) -> Result<Module, LoadError> {
    let mut mb = ModuleBuilder::new();
    let mut globals = HashMap::new();
    let mut functions = Vec::with_capacity(def.functions.len());
    for func in def.functions.iter() {
        let id = mb.function(&func.name, func.returns_pointer);
        if !func.name.is_empty() && globals.insert(func.name.clone(), mb.function_value(id)).is_some()
        {
            return Err(LoadError::Duplicate {
                name: func.name.clone(),
                scope: "module".to_owned(),
            });
        }
        functions.push(id);
    }
    for name in def.globals.iter() {
        let value = mb.global(name);
        if globals.insert(name.clone(), value).is_some() {
            return Err(LoadError::Duplicate {
                name: name.clone(),
                scope: "module".to_owned(),
            });
        }
    }

    for (func_def, func) in def.functions.iter().zip(functions.into_iter()) {
        let mut scope = Scope {
            function: &func_def.name,
            globals: &globals,
            locals: HashMap::new(),
            blocks: HashMap::new(),
        };
        let duplicate = |name: &str| LoadError::Duplicate {
            name: name.to_owned(),
            scope: format!("function '{}'", func_def.name),
        };
        for param in func_def.params.iter() {
            let value = mb.param(func, &param.name, param.pointer);
            if scope.locals.insert(param.name.clone(), value).is_some() {
                return Err(duplicate(&param.name));
            }
        }
        for block in func_def.blocks.iter() {
            let id = mb.block(func, &block.name);
            if scope.blocks.insert(block.name.clone(), id).is_some() {
                return Err(duplicate(&block.name));
            }
        }
        // reserve every slot first so operands may refer forward
        let mut pending: Vec<(InstId, &OpDef)> = Vec::new();
        for block in func_def.blocks.iter() {
            let block_id = scope.block(&block.name)?;
            for inst in block.instructions.iter() {
                mb.set_line(inst.line);
                let is_pointer = inst.pointer
                    || matches!(
                        inst.op,
                        OpDef::Alloca | OpDef::Gep { .. } | OpDef::Bitcast { .. }
                    );
                let id = mb.reserve(block_id, &display_name(inst), is_pointer);
                if let Some(def) = &inst.def {
                    if scope.locals.insert(def.clone(), mb.value_of(id)).is_some() {
                        return Err(duplicate(def));
                    }
                }
                pending.push((id, &inst.op));
            }
        }
        for (id, op) in pending {
            let kind = scope.kind(&mut mb, op)?;
            mb.define(id, kind);
        }
        debug!(
            "loaded function {} ({} blocks)",
            func_def.name,
            func_def.blocks.len()
        );
    }
    Ok(mb.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueKind;

    const SIMPLE: &str = r#"{
        "functions": [
            { "name": "plus", "params": [ { "name": "a" }, { "name": "b" } ] },
            { "name": "main", "blocks": [ { "name": "entry", "instructions": [
                { "op": "alloca", "def": "s" },
                { "op": "gep", "def": "f", "base": "%s", "indices": [0, 0] },
                { "op": "store", "value": "@plus", "ptr": "%f" },
                { "op": "load", "def": "0", "ptr": "%f", "pointer": true },
                { "op": "call", "callee": "%0", "args": [1, 2], "line": 7 },
                { "op": "ret" }
            ] } ] }
        ]
    }"#;

    #[test]
    fn test_load_simple_module() {
        let module = load_str(SIMPLE).unwrap();
        let main = module.function_by_name("main").unwrap();
        let insts: Vec<_> = module.instructions_of(main).collect();
        assert_eq!(insts.len(), 6);
        let call = module.instruction(insts[4]);
        assert_eq!(call.line, Some(7));
        match &call.kind {
            InstKind::Call { callee, args } => {
                assert!(module.value(*callee).is_anonymous());
                assert_eq!(module.value(args[1]).kind, ValueKind::ConstantInt(2));
            }
            kind => panic!("unexpected {:?}", kind),
        }
        assert_eq!(module.value(module.instruction(insts[1]).value).name, "f");
        assert!(module.function(module.function_by_name("plus").unwrap()).is_declaration());
    }

    #[test]
    fn test_phi_may_refer_forward() {
        let text = r#"{ "functions": [ { "name": "f", "returns_pointer": true, "blocks": [
            { "name": "entry", "instructions": [ { "op": "br", "targets": ["loop"] } ] },
            { "name": "loop", "instructions": [
                { "op": "phi", "def": "p", "pointer": true,
                  "incoming": [ ["null", "entry"], ["%q", "loop"] ] },
                { "op": "bitcast", "def": "q", "value": "%p" },
                { "op": "br", "targets": ["loop"] } ] } ] } ] }"#;
        let module = load_str(text).unwrap();
        let f = module.function_by_name("f").unwrap();
        let phi = module.instructions_of(f).nth(1).unwrap();
        match &module.instruction(phi).kind {
            InstKind::Phi { incoming } => {
                assert_eq!(module.value(incoming[1].0).name, "q");
            }
            kind => panic!("unexpected {:?}", kind),
        }
    }

    #[test]
    fn test_unknown_references_are_errors() {
        let text = r#"{ "functions": [ { "name": "f", "blocks": [ { "name": "entry",
            "instructions": [ { "op": "load", "def": "x", "ptr": "%missing" } ] } ] } ] }"#;
        match load_str(text) {
            Err(LoadError::UnknownLocal { name, function }) => {
                assert_eq!(name, "missing");
                assert_eq!(function, "f");
            }
            other => panic!("unexpected {:?}", other),
        }

        let text = r#"{ "functions": [ { "name": "f", "blocks": [ { "name": "entry",
            "instructions": [ { "op": "call", "callee": "@nowhere" } ] } ] } ] }"#;
        assert!(matches!(load_str(text), Err(LoadError::UnknownGlobal { .. })));

        let text = r#"{ "functions": [ { "name": "f", "blocks": [ { "name": "entry",
            "instructions": [ { "op": "br", "targets": ["exit"] } ] } ] } ] }"#;
        assert!(matches!(load_str(text), Err(LoadError::UnknownBlock { .. })));
    }

    #[test]
    fn test_duplicates_and_bad_input() {
        let text = r#"{ "functions": [ { "name": "f" }, { "name": "f" } ] }"#;
        assert!(matches!(load_str(text), Err(LoadError::Duplicate { .. })));

        let text = r#"{ "functions": [ { "name": "f", "blocks": [ { "name": "entry",
            "instructions": [ { "op": "icmp", "def": "c", "predicate": "lt",
                                "lhs": 1, "rhs": 2 } ] } ] } ] }"#;
        assert!(matches!(load_str(text), Err(LoadError::UnknownPredicate(_))));

        let text = r#"{ "functions": [ { "name": "f", "blocks": [ { "name": "entry",
            "instructions": [ { "op": "ret", "value": "plus" } ] } ] } ] }"#;
        assert!(matches!(load_str(text), Err(LoadError::BadOperand(_))));

        assert!(matches!(load_str("{ not json"), Err(LoadError::Json(_))));
    }
}
