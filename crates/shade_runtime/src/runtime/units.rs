//! Code units and their shadow streams.

use std::rc::Rc;

use log::debug;
use shade_core::Name;
use shade_ir::{CodeObject, Opcode, instructions};
use slotmap::new_key_type;

use super::Runtime;
use crate::core::{DictId, Function, FunctionBody, Value};
use crate::errors::{AttrError, AttrResult, messages};
use crate::shadow::ShadowCode;
use crate::vm;

new_key_type! {
    pub struct UnitId;
}

/// An instruction site: a unit plus the offset of the site's opcode unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheSite {
    pub unit: UnitId,
    pub offset: usize,
}

impl CacheSite {
    pub fn new(unit: UnitId, offset: usize) -> Self {
        Self { unit, offset }
    }
}

pub struct CompiledUnit {
    pub(crate) code: Rc<CodeObject>,
    pub(crate) globals: DictId,
    pub(crate) builtins: DictId,
    pub(crate) shadow: Option<ShadowCode>,
    pub(crate) calls: usize,
}

impl CompiledUnit {
    pub fn code(&self) -> &CodeObject {
        &self.code
    }

    pub fn shadow(&self) -> Option<&ShadowCode> {
        self.shadow.as_ref()
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Runtime {
    pub fn register_unit(&mut self, code: CodeObject, globals: DictId, builtins: DictId) -> UnitId {
        let shadow = (self.config.enabled && self.config.warmup_calls == 0)
            .then(|| ShadowCode::new(&code, self.config.max_cache_slots));
        self.units.insert(CompiledUnit {
            code: Rc::new(code),
            globals,
            builtins,
            shadow,
            calls: 0,
        })
    }

    pub fn unit(&self, unit: UnitId) -> Option<&CompiledUnit> {
        self.units.get(unit)
    }

    /// Wraps a unit as a callable function value.
    pub fn function(&self, unit: UnitId) -> AttrResult<Value> {
        let u = self
            .units
            .get(unit)
            .ok_or(AttrError::StaleHandle(messages::STALE_UNIT))?;
        Ok(Value::Function(Rc::new(Function {
            name: Name::new(&u.code.name),
            body: FunctionBody::Code(unit),
        })))
    }

    pub fn run(&mut self, unit: UnitId, args: &[Value]) -> AttrResult<Value> {
        vm::run_unit(self, unit, args)
    }

    /// Counts a call and creates the shadow stream once the unit is warm.
    pub(crate) fn enter_unit(&mut self, unit: UnitId) -> AttrResult<Rc<CodeObject>> {
        let enabled = self.config.enabled;
        let warmup = self.config.warmup_calls;
        let max_slots = self.config.max_cache_slots;
        let u = self
            .units
            .get_mut(unit)
            .ok_or(AttrError::StaleHandle(messages::STALE_UNIT))?;
        u.calls += 1;
        if enabled && u.shadow.is_none() && u.calls > warmup {
            debug!("creating shadow stream for {} after {} calls", u.code.name, u.calls);
            u.shadow = Some(ShadowCode::new(&u.code, max_slots));
        }
        Ok(u.code.clone())
    }

    /// Frees a unit and every cache reference its shadow stream holds.
    pub fn teardown_unit(&mut self, unit: UnitId) {
        let Some(u) = self.units.remove(unit) else {
            return;
        };
        if let Some(shadow) = u.shadow {
            self.release_shadow(shadow);
        }
    }

    /// Drops the shadow stream of every unit. Units get a fresh one once
    /// they are warm again.
    pub(crate) fn reset_shadows(&mut self) {
        let units: Vec<UnitId> = self.units.keys().collect();
        for unit in units {
            let shadow = self.units.get_mut(unit).and_then(|u| {
                u.calls = 0;
                u.shadow.take()
            });
            if let Some(shadow) = shadow {
                self.release_shadow(shadow);
            }
        }
    }

    /// Scans a detached shadow stream once, releasing every reference held
    /// by a specialized instruction, then its global cache slots.
    fn release_shadow(&mut self, mut shadow: ShadowCode) {
        for instr in instructions(&shadow.units) {
            if instr.op.is_cache_opcode() {
                let slot = instr.arg as usize;
                if let Some(s) = shadow.l1.get_mut(slot) {
                    let entry = s.entry;
                    s.uses -= 1;
                    if s.uses == 0 {
                        shadow.l1.take(slot);
                    }
                    self.entries.decref(entry);
                }
            } else if instr.op == Opcode::LoadAttrPolymorphic {
                if let Some(cache) = shadow.polymorphic.take(instr.arg as usize) {
                    for id in cache.into_iter().flatten() {
                        self.entries.decref(id);
                    }
                }
            }
        }
        debug_assert_eq!(shadow.l1.occupied(), 0);
        for id in shadow.globals.into_iter().flatten() {
            self.release_global_cache(id);
        }
    }
}
