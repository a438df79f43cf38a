use std::collections::HashMap;

use super::{
    BasicBlock, BlockId, FuncId, InstId, InstKind, Instruction, Module, Predicate, Value, ValueId,
    ValueKind,
};

/// Builds a `Module` in place.
///
/// Instructions are appended to the end of a block. The builder keeps a current source line
/// that is attached to every appended instruction, like a debug-location cursor.
/// An instruction slot can be reserved before its operands exist (`reserve` / `define`),
/// which is how forward references such as loop PHIs are expressed.
pub struct ModuleBuilder {
    module: Module,
    ints: HashMap<i64, ValueId>,
    null: Option<ValueId>,
    line: Option<u32>,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::default(),
            ints: HashMap::new(),
            null: None,
            line: None,
        }
    }

    pub fn finish(self) -> Module {
        self.module
    }

    pub fn set_line(&mut self, line: Option<u32>) {
        self.line = line;
    }

    fn add_value(&mut self, kind: ValueKind, name: &str, is_pointer: bool) -> ValueId {
        let id = ValueId(self.module.values.len() as u32);
        self.module.values.push(Value {
            kind,
            name: name.to_owned(),
            is_pointer,
        });
        id
    }

    pub fn function(&mut self, name: &str, returns_pointer: bool) -> FuncId {
        let func = FuncId(self.module.functions.len() as u32);
        let value = self.add_value(ValueKind::Function(func), name, true);
        self.module.functions.push(super::Function {
            name: name.to_owned(),
            value,
            params: Vec::new(),
            returns_pointer,
            blocks: Vec::new(),
        });
        func
    }

    pub fn function_value(&self, func: FuncId) -> ValueId {
        self.module.function(func).value
    }

    pub fn param(&mut self, func: FuncId, name: &str, is_pointer: bool) -> ValueId {
        let index = self.module.function(func).params.len();
        let value = self.add_value(
            ValueKind::Argument {
                function: func,
                index,
            },
            name,
            is_pointer,
        );
        self.module.functions[func.index()].params.push(value);
        value
    }

    pub fn block(&mut self, func: FuncId, name: &str) -> BlockId {
        let block = BlockId(self.module.blocks.len() as u32);
        self.module.blocks.push(BasicBlock {
            name: name.to_owned(),
            function: func,
            instructions: Vec::new(),
        });
        self.module.functions[func.index()].blocks.push(block);
        block
    }

    pub fn const_int(&mut self, c: i64) -> ValueId {
        if let Some(value) = self.ints.get(&c) {
            return *value;
        }
        let value = self.add_value(ValueKind::ConstantInt(c), "", false);
        self.ints.insert(c, value);
        value
    }

    pub fn null(&mut self) -> ValueId {
        match self.null {
            Some(value) => value,
            None => {
                let value = self.add_value(ValueKind::Null, "", true);
                self.null = Some(value);
                value
            }
        }
    }

    pub fn global(&mut self, name: &str) -> ValueId {
        self.add_value(ValueKind::Global, name, true)
    }

    /// Appends a placeholder instruction whose kind is filled in later by `define`.
    pub fn reserve(&mut self, block: BlockId, name: &str, is_pointer: bool) -> InstId {
        let inst = InstId(self.module.instructions.len() as u32);
        let value = self.add_value(ValueKind::Instruction(inst), name, is_pointer);
        self.module.instructions.push(Instruction {
            kind: InstKind::Other {
                opcode: "<reserved>".to_owned(),
                operands: Vec::new(),
            },
            block,
            value,
            line: self.line,
        });
        self.module.blocks[block.index()].instructions.push(inst);
        inst
    }

    pub fn define(&mut self, inst: InstId, kind: InstKind) {
        self.module.instructions[inst.index()].kind = kind;
    }

    pub fn value_of(&self, inst: InstId) -> ValueId {
        self.module.instruction(inst).value
    }

    pub fn push(&mut self, block: BlockId, kind: InstKind, name: &str, is_pointer: bool) -> ValueId {
        let inst = self.reserve(block, name, is_pointer);
        self.define(inst, kind);
        self.value_of(inst)
    }

    pub fn call(
        &mut self,
        block: BlockId,
        callee: ValueId,
        args: &[ValueId],
        name: &str,
        returns_pointer: bool,
    ) -> ValueId {
        let kind = InstKind::Call {
            callee,
            args: args.to_vec(),
        };
        self.push(block, kind, name, returns_pointer)
    }

    pub fn phi(
        &mut self,
        block: BlockId,
        incoming: &[(ValueId, BlockId)],
        name: &str,
        is_pointer: bool,
    ) -> ValueId {
        let kind = InstKind::Phi {
            incoming: incoming.to_vec(),
        };
        self.push(block, kind, name, is_pointer)
    }

    pub fn br(&mut self, block: BlockId, target: BlockId) -> ValueId {
        let kind = InstKind::Branch {
            condition: None,
            successors: vec![target],
        };
        self.push(block, kind, "", false)
    }

    pub fn cond_br(
        &mut self,
        block: BlockId,
        condition: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    ) -> ValueId {
        let kind = InstKind::Branch {
            condition: Some(condition),
            successors: vec![then_block, else_block],
        };
        self.push(block, kind, "", false)
    }

    pub fn icmp(
        &mut self,
        block: BlockId,
        predicate: Predicate,
        lhs: ValueId,
        rhs: ValueId,
        name: &str,
    ) -> ValueId {
        let kind = InstKind::Compare {
            predicate,
            lhs,
            rhs,
        };
        self.push(block, kind, name, false)
    }

    pub fn load(&mut self, block: BlockId, pointer: ValueId, name: &str, is_pointer: bool) -> ValueId {
        self.push(block, InstKind::Load { pointer }, name, is_pointer)
    }

    pub fn store(&mut self, block: BlockId, value: ValueId, pointer: ValueId) -> ValueId {
        self.push(block, InstKind::Store { value, pointer }, "", false)
    }

    /// Field or element access with constant indices.
    pub fn gep(&mut self, block: BlockId, base: ValueId, indices: &[i64], name: &str) -> ValueId {
        let indices = indices.iter().map(|c| self.const_int(*c)).collect();
        self.push(block, InstKind::GetElementPtr { base, indices }, name, true)
    }

    pub fn gep_values(
        &mut self,
        block: BlockId,
        base: ValueId,
        indices: &[ValueId],
        name: &str,
    ) -> ValueId {
        let kind = InstKind::GetElementPtr {
            base,
            indices: indices.to_vec(),
        };
        self.push(block, kind, name, true)
    }

    pub fn bitcast(&mut self, block: BlockId, operand: ValueId, name: &str) -> ValueId {
        self.push(block, InstKind::BitCast { operand }, name, true)
    }

    pub fn alloca(&mut self, block: BlockId, name: &str) -> ValueId {
        self.push(block, InstKind::Alloca, name, true)
    }

    pub fn ret(&mut self, block: BlockId, value: Option<ValueId>) -> ValueId {
        self.push(block, InstKind::Return { value }, "", false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_then_define_keeps_program_order() {
        let mut mb = ModuleBuilder::new();
        let f = mb.function("f", true);
        let entry = mb.block(f, "entry");
        let phi = mb.reserve(entry, "p", true);
        let null = mb.null();
        let g = mb.global("g");
        mb.define(
            phi,
            InstKind::Phi {
                incoming: vec![(null, entry), (g, entry)],
            },
        );
        let module = mb.finish();
        assert_eq!(module.block(entry).instructions, vec![phi]);
        match &module.instruction(phi).kind {
            InstKind::Phi { incoming } => assert_eq!(incoming.len(), 2),
            kind => panic!("unexpected {:?}", kind),
        }
    }

    #[test]
    fn test_constants_are_interned() {
        let mut mb = ModuleBuilder::new();
        assert_eq!(mb.const_int(7), mb.const_int(7));
        assert_ne!(mb.const_int(7), mb.const_int(8));
        assert_eq!(mb.null(), mb.null());
    }

    #[test]
    fn test_line_cursor_applies_to_appended_instructions() {
        let mut mb = ModuleBuilder::new();
        let f = mb.function("f", false);
        let entry = mb.block(f, "entry");
        let first = mb.alloca(entry, "a");
        mb.set_line(Some(12));
        let second = mb.alloca(entry, "b");
        let module = mb.finish();
        assert_eq!(module.instruction_of(first).unwrap().1.line, None);
        assert_eq!(module.instruction_of(second).unwrap().1.line, Some(12));
    }
}
