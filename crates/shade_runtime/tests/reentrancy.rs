mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::*;
use shade_runtime::{Descriptor, Opcode, Runtime, TypeSpec, Value};

#[test]
fn fill_is_discarded_when_lookup_mutates_the_type() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let ty = rt.new_type(TypeSpec::new("Lazy")).unwrap();
    let thunk = move |rt: &mut Runtime| {
        rt.set_type_attr(ty, "other", Value::Int(0))?;
        Ok(Value::Int(5))
    };
    rt.set_type_attr(ty, "val", Value::lazy(thunk)).unwrap();
    let o = Value::Object(rt.new_object(ty).unwrap());

    let (get_val, site) = reader(&mut rt, &env, "val");
    assert_eq!(rt.run(get_val, &[o.clone()]), Ok(int(5)));
    assert_eq!(rt.stats().discarded_fills, 1);
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttr));
    assert!(!rt.type_watch().is_watched(ty));

    assert_eq!(rt.run(get_val, &[o.clone()]), Ok(int(5)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrDict));
    assert_eq!(rt.run(get_val, &[o]), Ok(int(5)));
    assert_eq!(rt.stats().load_attr.hits, 1);
}

#[test]
fn class_fill_is_discarded_when_metaclass_changes() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let meta = rt.new_type(TypeSpec::new("Meta")).unwrap();
    let c = rt.new_type(TypeSpec::new("C").metaclass(meta)).unwrap();
    let thunk = move |rt: &mut Runtime| {
        rt.set_type_attr(meta, "touched", Value::Bool(true))?;
        Ok(Value::Int(3))
    };
    rt.set_type_attr(c, "k", Value::lazy(thunk)).unwrap();

    let (get_k, site) = reader(&mut rt, &env, "k");
    assert_eq!(rt.run(get_k, &[Value::Type(c)]), Ok(int(3)));
    assert_eq!(rt.stats().discarded_fills, 1);
    assert_eq!(rt.run(get_k, &[Value::Type(c)]), Ok(int(3)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrType));
}

#[test]
fn getter_that_mutates_its_type_stays_consistent() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let calls = Rc::new(Cell::new(0i64));
    let holder: Rc<Cell<Option<shade_runtime::TypeId>>> = Rc::new(Cell::new(None));

    let (counter, target) = (calls.clone(), holder.clone());
    let prop = Descriptor::property(
        move |rt, _| {
            counter.set(counter.get() + 1);
            if let Some(ty) = target.get() {
                rt.set_type_attr(ty, "seen", Value::Int(counter.get()))?;
            }
            Ok(Value::Int(counter.get()))
        },
        None,
    );
    let ty = rt.new_type(TypeSpec::new("Noisy").attr("p", Value::descr(prop))).unwrap();
    holder.set(Some(ty));
    let o = Value::Object(rt.new_object(ty).unwrap());

    let (get_p, site) = reader(&mut rt, &env, "p");
    for i in 1..=5 {
        assert_eq!(rt.run(get_p, &[o.clone()]), Ok(int(i)));
        assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrDataDescr));
    }
    assert_eq!(calls.get(), 5);
    assert_eq!(rt.stats().type_invalidations, 5);
}

#[test]
fn lazy_global_resolves_once() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    rt.dict_set(
        env.globals,
        "config",
        Value::lazy(move |_| {
            counter.set(counter.get() + 1);
            Ok(Value::Int(42))
        }),
    )
    .unwrap();

    let (load_config, site) = global_reader(&mut rt, &env, "config");
    for _ in 0..3 {
        assert_eq!(rt.run(load_config, &[]), Ok(int(42)));
    }
    assert_eq!(calls.get(), 1);
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadGlobalCached));
    assert_eq!(rt.stats().global_caches_disabled, 0);
}

#[test]
fn thunk_rebinding_its_own_global_wins() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let globals = env.globals;
    rt.dict_set(
        globals,
        "x",
        Value::lazy(move |rt| {
            rt.dict_set(globals, "x", Value::Int(2))?;
            Ok(Value::Int(1))
        }),
    )
    .unwrap();

    let (load_x, _) = global_reader(&mut rt, &env, "x");
    // The thunk's own result is returned; the rebinding it made is kept.
    assert_eq!(rt.run(load_x, &[]), Ok(int(1)));
    assert_eq!(rt.run(load_x, &[]), Ok(int(2)));
}

#[test]
fn global_fill_keeps_binding_made_during_the_read() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let globals = env.globals;
    // The first thunk rebinds `x` to a second thunk, which rebinds `x` to 3
    // while the cache is being filled.
    let inner = Value::lazy(move |rt| {
        rt.dict_set(globals, "x", Value::Int(3))?;
        Ok(Value::Int(2))
    });
    rt.dict_set(
        globals,
        "x",
        Value::lazy(move |rt| {
            rt.dict_set(globals, "x", inner.clone())?;
            Ok(Value::Int(1))
        }),
    )
    .unwrap();

    let (load_x, site) = global_reader(&mut rt, &env, "x");
    assert_eq!(rt.run(load_x, &[]), Ok(int(1)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadGlobalCached));
    assert_eq!(rt.stats().discarded_fills, 1);
    assert_eq!(rt.dict_get_raw(globals, &"x".into()), Some(int(3)));

    assert_eq!(rt.run(load_x, &[]), Ok(int(3)));
    assert_eq!(rt.stats().load_global.hits, 1);
}

#[test]
fn builtins_fill_is_discarded_when_the_read_rebinds_it() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let builtins = env.builtins;
    rt.dict_set(
        builtins,
        "b",
        Value::lazy(move |rt| {
            rt.dict_set(builtins, "b", Value::Int(5))?;
            Ok(Value::Int(4))
        }),
    )
    .unwrap();

    // Fill the cache directly, without a generic load resolving the thunk first.
    let id = rt
        .find_global_cache(env.builtins, env.globals, &name("b"))
        .unwrap()
        .unwrap();
    assert_eq!(rt.stats().discarded_fills, 1);
    assert_eq!(rt.global_caches().value(id), Some(int(5)));
    assert!(rt.global_caches().get(id).unwrap().watching_builtins());
}
