use shade_core::Name;
use shade_ir::{CodeObject, Constant, Instruction, OpFamily, Opcode, decode};
use smallvec::SmallVec;

use super::stack::{pop, pop_n, stack_underflow};
use crate::core::Value;
use crate::errors::{AttrError, AttrResult, messages};
use crate::runtime::{CacheSite, Runtime, UnitId};

/// Next instruction, read from the shadow stream while the unit has one.
#[inline]
fn fetch(rt: &Runtime, unit: UnitId, code: &CodeObject, ip: usize) -> AttrResult<Instruction> {
    let units = match rt.units.get(unit).and_then(|u| u.shadow.as_ref()) {
        Some(shadow) => &shadow.units,
        None => &code.units,
    };
    decode(units, ip).ok_or(AttrError::InvalidCode(messages::TRUNCATED))
}

fn constant(code: &CodeObject, arg: u32) -> AttrResult<Value> {
    Ok(match code.consts.get(arg as usize) {
        Some(Constant::None) => Value::None,
        Some(Constant::Bool(b)) => Value::Bool(*b),
        Some(Constant::Int(i)) => Value::Int(*i),
        Some(Constant::Str(s)) => Value::str(s),
        None => return Err(AttrError::InvalidCode(messages::BAD_OPERAND)),
    })
}

fn name_at(code: &CodeObject, offset: usize) -> AttrResult<Name> {
    code.name_at(offset)
        .cloned()
        .ok_or(AttrError::InvalidCode(messages::BAD_OPERAND))
}

pub(crate) fn run_unit(rt: &mut Runtime, unit: UnitId, args: &[Value]) -> AttrResult<Value> {
    let code = rt.enter_unit(unit)?;
    if args.len() != code.nargs {
        return Err(AttrError::WrongArgCount {
            name: code.name.clone(),
            expected: code.nargs,
            got: args.len(),
        });
    }
    let (globals, builtins) = match rt.units.get(unit) {
        Some(u) => (u.globals, u.builtins),
        None => return Err(AttrError::StaleHandle(messages::STALE_UNIT)),
    };

    let mut locals: SmallVec<[Value; 8]> = SmallVec::from_elem(Value::None, code.nlocals.max(args.len()));
    for (slot, arg) in locals.iter_mut().zip(args) {
        *slot = arg.clone();
    }
    let mut stack: Vec<Value> = Vec::with_capacity(16);
    // Receivers pushed by LoadMethod, consumed by the matching CallMethod.
    let mut method_self: SmallVec<[Option<Value>; 4]> = SmallVec::new();

    let mut ip = 0;
    while ip < code.units.len() {
        let instr = fetch(rt, unit, &code, ip)?;
        ip = instr.next();
        let site = CacheSite::new(unit, instr.offset);

        match instr.op {
            Opcode::Nop | Opcode::ShadowNop => {}
            Opcode::PopTop => {
                pop(&mut stack)?;
            }
            Opcode::DupTop => {
                let top = stack.last().cloned().ok_or_else(stack_underflow)?;
                stack.push(top);
            }
            Opcode::RotTwo => {
                let len = stack.len();
                if len < 2 {
                    return Err(stack_underflow());
                }
                stack.swap(len - 1, len - 2);
            }
            Opcode::LoadConst => stack.push(constant(&code, instr.arg)?),
            Opcode::LoadFast => {
                let v = locals
                    .get(instr.arg as usize)
                    .cloned()
                    .ok_or(AttrError::InvalidCode(messages::BAD_OPERAND))?;
                stack.push(v);
            }
            Opcode::StoreFast => {
                let v = pop(&mut stack)?;
                let slot = locals
                    .get_mut(instr.arg as usize)
                    .ok_or(AttrError::InvalidCode(messages::BAD_OPERAND))?;
                *slot = v;
            }
            Opcode::StoreGlobal => {
                let name = name_at(&code, instr.offset)?;
                let v = pop(&mut stack)?;
                rt.dict_set(globals, name, v)?;
            }
            Opcode::CallFunction => {
                let args = pop_n(&mut stack, instr.arg as usize)?;
                let callable = pop(&mut stack)?;
                stack.push(rt.call(&callable, &args)?);
            }
            Opcode::CallMethod => {
                let mut args = pop_n(&mut stack, instr.arg as usize)?;
                let callable = pop(&mut stack)?;
                if let Some(receiver) = method_self.pop().ok_or_else(stack_underflow)? {
                    args.insert(0, receiver);
                }
                stack.push(rt.call(&callable, &args)?);
            }
            Opcode::ReturnValue => return pop(&mut stack),
            op => match op.family() {
                Some(OpFamily::LoadGlobal) => {
                    let name = name_at(&code, instr.offset)?;
                    stack.push(rt.load_global_at(site, globals, builtins, &name)?);
                }
                Some(OpFamily::LoadAttr) => {
                    let name = name_at(&code, instr.offset)?;
                    let obj = pop(&mut stack)?;
                    stack.push(rt.resolve_attribute(site, &obj, &name)?);
                }
                Some(OpFamily::StoreAttr) => {
                    let name = name_at(&code, instr.offset)?;
                    let obj = pop(&mut stack)?;
                    let value = pop(&mut stack)?;
                    rt.store_attribute(site, &obj, &name, value)?;
                }
                Some(OpFamily::LoadMethod) => {
                    let name = name_at(&code, instr.offset)?;
                    let obj = pop(&mut stack)?;
                    let (callable, receiver) = rt.load_method(site, &obj, &name)?;
                    stack.push(callable);
                    method_self.push(receiver);
                }
                None => return Err(AttrError::InvalidCode(messages::BAD_OPERAND)),
            },
        }
    }
    Ok(Value::None)
}
