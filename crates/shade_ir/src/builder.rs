use shade_core::Name;

use crate::{CodeObject, CodeUnit, Constant, Opcode, instr_size, write_op_arg};

/// Assembles a [`CodeObject`], deduplicating names and constants.
pub struct CodeBuilder {
    name: String,
    units: Vec<CodeUnit>,
    names: Vec<Name>,
    consts: Vec<Constant>,
    nlocals: usize,
    nargs: usize,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
            names: Vec::new(),
            consts: Vec::new(),
            nlocals: 0,
            nargs: 0,
        }
    }

    pub fn args(mut self, nargs: usize) -> Self {
        self.nargs = nargs;
        self.nlocals = self.nlocals.max(nargs);
        self
    }

    pub fn name_index(&mut self, name: &str) -> u32 {
        if let Some(i) = self.names.iter().position(|n| n.as_str() == name) {
            return i as u32;
        }
        self.names.push(Name::new(name));
        (self.names.len() - 1) as u32
    }

    pub fn const_index(&mut self, c: Constant) -> u32 {
        if let Some(i) = self.consts.iter().position(|x| *x == c) {
            return i as u32;
        }
        self.consts.push(c);
        (self.consts.len() - 1) as u32
    }

    /// Appends an instruction and returns the offset of its opcode unit.
    pub fn emit(&mut self, op: Opcode, arg: u32) -> usize {
        let size = instr_size(arg);
        let start = self.units.len();
        self.units.resize(start + size, CodeUnit::new(Opcode::Nop, 0));
        write_op_arg(&mut self.units, start, op, arg, size);
        if matches!(op, Opcode::LoadFast | Opcode::StoreFast) {
            self.nlocals = self.nlocals.max(arg as usize + 1);
        }
        start + size - 1
    }

    pub fn load_const(&mut self, c: Constant) -> usize {
        let i = self.const_index(c);
        self.emit(Opcode::LoadConst, i)
    }

    pub fn load_fast(&mut self, local: u32) -> usize {
        self.emit(Opcode::LoadFast, local)
    }

    pub fn store_fast(&mut self, local: u32) -> usize {
        self.emit(Opcode::StoreFast, local)
    }

    pub fn load_global(&mut self, name: &str) -> usize {
        let i = self.name_index(name);
        self.emit(Opcode::LoadGlobal, i)
    }

    pub fn store_global(&mut self, name: &str) -> usize {
        let i = self.name_index(name);
        self.emit(Opcode::StoreGlobal, i)
    }

    pub fn load_attr(&mut self, name: &str) -> usize {
        let i = self.name_index(name);
        self.emit(Opcode::LoadAttr, i)
    }

    pub fn store_attr(&mut self, name: &str) -> usize {
        let i = self.name_index(name);
        self.emit(Opcode::StoreAttr, i)
    }

    pub fn load_method(&mut self, name: &str) -> usize {
        let i = self.name_index(name);
        self.emit(Opcode::LoadMethod, i)
    }

    pub fn call_method(&mut self, argc: u32) -> usize {
        self.emit(Opcode::CallMethod, argc)
    }

    pub fn call_function(&mut self, argc: u32) -> usize {
        self.emit(Opcode::CallFunction, argc)
    }

    pub fn pop_top(&mut self) -> usize {
        self.emit(Opcode::PopTop, 0)
    }

    pub fn return_value(&mut self) -> usize {
        self.emit(Opcode::ReturnValue, 0)
    }

    pub fn finish(self) -> CodeObject {
        CodeObject {
            name: self.name,
            units: self.units,
            names: self.names,
            consts: self.consts,
            nlocals: self.nlocals,
            nargs: self.nargs,
        }
    }
}
