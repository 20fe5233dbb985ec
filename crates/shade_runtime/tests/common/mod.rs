#![allow(dead_code)]

use shade_runtime::{CacheSite, CodeBuilder, Constant, DictId, Name, Runtime, UnitId, Value};

pub struct Env {
    pub globals: DictId,
    pub builtins: DictId,
}

pub fn env(rt: &mut Runtime) -> Env {
    Env {
        globals: rt.new_dict(),
        builtins: rt.new_dict(),
    }
}

/// `def get(o): return o.<attr>`
pub fn reader(rt: &mut Runtime, env: &Env, attr: &str) -> (UnitId, CacheSite) {
    let mut b = CodeBuilder::new(format!("get_{attr}")).args(1);
    b.load_fast(0);
    let at = b.load_attr(attr);
    b.return_value();
    let unit = rt.register_unit(b.finish(), env.globals, env.builtins);
    (unit, CacheSite::new(unit, at))
}

/// `def set(o, v): o.<attr> = v`
pub fn writer(rt: &mut Runtime, env: &Env, attr: &str) -> (UnitId, CacheSite) {
    let mut b = CodeBuilder::new(format!("set_{attr}")).args(2);
    b.load_fast(1);
    b.load_fast(0);
    let at = b.store_attr(attr);
    b.load_const(Constant::None);
    b.return_value();
    let unit = rt.register_unit(b.finish(), env.globals, env.builtins);
    (unit, CacheSite::new(unit, at))
}

/// `def call(o): return o.<method>()`
pub fn method_caller(rt: &mut Runtime, env: &Env, method: &str) -> (UnitId, CacheSite) {
    let mut b = CodeBuilder::new(format!("call_{method}")).args(1);
    b.load_fast(0);
    let at = b.load_method(method);
    b.call_method(0);
    b.return_value();
    let unit = rt.register_unit(b.finish(), env.globals, env.builtins);
    (unit, CacheSite::new(unit, at))
}

/// `def load(): return <name>`
pub fn global_reader(rt: &mut Runtime, env: &Env, name: &str) -> (UnitId, CacheSite) {
    let mut b = CodeBuilder::new(format!("load_{name}"));
    let at = b.load_global(name);
    b.return_value();
    let unit = rt.register_unit(b.finish(), env.globals, env.builtins);
    (unit, CacheSite::new(unit, at))
}

pub fn name(s: &str) -> Name {
    Name::new(s)
}

pub fn int(i: i64) -> Value {
    Value::Int(i)
}

pub fn set(rt: &mut Runtime, obj: &Value, attr: &str, v: Value) {
    rt.set_attr(obj, &name(attr), v).unwrap();
}
