use shade_core::Name;

use crate::Opcode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeUnit {
    pub op: Opcode,
    pub arg: u8,
}

impl CodeUnit {
    #[inline]
    pub const fn new(op: Opcode, arg: u8) -> Self {
        Self { op, arg }
    }
}

/// Number of units needed to encode `oparg`, prefixes included.
#[inline]
pub fn instr_size(oparg: u32) -> usize {
    if oparg <= 0xff {
        1
    } else if oparg <= 0xffff {
        2
    } else if oparg <= 0xff_ffff {
        3
    } else {
        4
    }
}

/// Writes `op` with `size` units starting at `start`; the opcode lands on the last unit.
pub fn write_op_arg(units: &mut [CodeUnit], start: usize, op: Opcode, oparg: u32, size: usize) {
    debug_assert!(size >= instr_size(oparg) && size <= 4);
    for i in 0..size {
        let shift = 8 * (size - 1 - i);
        let byte = ((oparg >> shift) & 0xff) as u8;
        let op = if i + 1 == size { op } else { Opcode::ExtendedArg };
        units[start + i] = CodeUnit::new(op, byte);
    }
}

/// Units owned by the instruction whose opcode sits at `offset`, counting
/// the `ExtendedArg` prefixes and `ShadowNop` padding in front of it.
pub fn opsize(units: &[CodeUnit], offset: usize) -> usize {
    let mut size = 1;
    let mut i = offset;
    while i > 0 {
        match units[i - 1].op {
            Opcode::ExtendedArg | Opcode::ShadowNop => {
                size += 1;
                i -= 1;
            }
            _ => break,
        }
    }
    size
}

/// A decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// First unit, prefixes included.
    pub start: usize,
    /// Unit holding the opcode; stable across rewrites.
    pub offset: usize,
    pub op: Opcode,
    pub arg: u32,
}

impl Instruction {
    #[inline]
    pub fn next(&self) -> usize {
        self.offset + 1
    }
}

/// Decodes the instruction starting at `ip`. `None` when the stream ends
/// before an opcode follows the prefixes.
pub fn decode(units: &[CodeUnit], ip: usize) -> Option<Instruction> {
    let mut arg: u32 = 0;
    let mut i = ip;
    loop {
        let unit = *units.get(i)?;
        arg = (arg << 8) | unit.arg as u32;
        if unit.op != Opcode::ExtendedArg {
            return Some(Instruction {
                start: ip,
                offset: i,
                op: unit.op,
                arg,
            });
        }
        i += 1;
    }
}

/// Argument of the instruction whose opcode sits at `offset`.
pub fn oparg_at(units: &[CodeUnit], offset: usize) -> u32 {
    let mut arg = units[offset].arg as u32;
    let mut shift = 8;
    let mut i = offset;
    while i > 0 && units[i - 1].op == Opcode::ExtendedArg && shift < 32 {
        i -= 1;
        arg |= (units[i].arg as u32) << shift;
        shift += 8;
    }
    arg
}

pub struct Instructions<'a> {
    units: &'a [CodeUnit],
    ip: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        if self.ip >= self.units.len() {
            return None;
        }
        let instr = decode(self.units, self.ip)?;
        self.ip = instr.next();
        Some(instr)
    }
}

pub fn instructions(units: &[CodeUnit]) -> Instructions<'_> {
    Instructions { units, ip: 0 }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Clone, Debug)]
pub struct CodeObject {
    pub name: String,
    pub units: Vec<CodeUnit>,
    pub names: Vec<Name>,
    pub consts: Vec<Constant>,
    pub nlocals: usize,
    pub nargs: usize,
}

impl CodeObject {
    pub fn instructions(&self) -> Instructions<'_> {
        instructions(&self.units)
    }

    /// Name operand of the original instruction at `offset`.
    pub fn name_at(&self, offset: usize) -> Option<&Name> {
        let op = self.units.get(offset)?.op;
        if !op.has_name_arg() {
            return None;
        }
        self.names.get(oparg_at(&self.units, offset) as usize)
    }

    /// Number of distinct names loaded through `LoadGlobal`.
    pub fn global_name_count(&self) -> usize {
        let mut seen: Vec<u32> = self
            .instructions()
            .filter(|i| i.op == Opcode::LoadGlobal)
            .map(|i| i.arg)
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}
