mod common;

use std::rc::Rc;

use common::*;
use shade_runtime::{
    AttrError, CacheConfig, Descriptor, Opcode, Receiver, Runtime, TypeSpec, Value,
};

#[test]
fn base_class_change_reaches_subclass_sites() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let base = rt.new_type(TypeSpec::new("Base").attr("greet", int(1))).unwrap();
    let derived = rt.new_type(TypeSpec::new("Derived").base(base)).unwrap();
    let o = Value::Object(rt.new_object(derived).unwrap());

    let (get_greet, _) = reader(&mut rt, &env, "greet");
    assert_eq!(rt.run(get_greet, &[o.clone()]), Ok(int(1)));
    assert!(rt.type_watch().is_watched(derived));

    rt.set_type_attr(base, "greet", int(2)).unwrap();
    assert!(!rt.type_watch().is_watched(derived));
    assert_eq!(rt.run(get_greet, &[o.clone()]), Ok(int(2)));

    rt.set_type_attr(derived, "greet", int(3)).unwrap();
    assert_eq!(rt.run(get_greet, &[o.clone()]), Ok(int(3)));

    rt.del_type_attr(derived, "greet").unwrap();
    rt.del_type_attr(base, "greet").unwrap();
    assert!(matches!(
        rt.run(get_greet, &[o]),
        Err(AttrError::AttributeNotFound { .. })
    ));
}

#[test]
fn rebasing_changes_cached_resolution() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let a = rt.new_type(TypeSpec::new("A").attr("x", int(1))).unwrap();
    let b = rt.new_type(TypeSpec::new("B").attr("x", int(2))).unwrap();
    let c = rt.new_type(TypeSpec::new("C").base(a)).unwrap();
    let o = Value::Object(rt.new_object(c).unwrap());

    let (get_x, site) = reader(&mut rt, &env, "x");
    assert_eq!(rt.run(get_x, &[o.clone()]), Ok(int(1)));
    rt.set_bases(c, vec![b]).unwrap();
    assert_eq!(rt.run(get_x, &[o.clone()]), Ok(int(2)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrDict));

    // The old base no longer reaches `c`.
    rt.set_type_attr(a, "x", int(10)).unwrap();
    assert_eq!(rt.run(get_x, &[o]), Ok(int(2)));
}

#[test]
fn metaclass_data_descriptor_invalidates_class_entries() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let meta = rt.new_type(TypeSpec::new("Meta").attr("y", int(10))).unwrap();
    let c = rt
        .new_type(TypeSpec::new("C").metaclass(meta).attr("y", int(1)))
        .unwrap();

    let (get_y, site) = reader(&mut rt, &env, "y");
    assert_eq!(rt.run(get_y, &[Value::Type(c)]), Ok(int(1)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrType));
    assert!(rt.type_watch().lookup(c, &name("y"), Receiver::Class).is_some());

    let prop = Value::descr(Descriptor::property(|_, _| Ok(Value::Int(77)), None));
    rt.set_type_attr(meta, "y", prop).unwrap();
    assert!(rt.type_watch().lookup(c, &name("y"), Receiver::Class).is_none());

    assert_eq!(rt.run(get_y, &[Value::Type(c)]), Ok(int(77)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrUncachable));
    assert_eq!(rt.stats().uncacheable.meta_data_descr, 1);
}

#[test]
fn metaclass_attribute_is_used_when_class_lacks_it() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let meta = rt.new_type(TypeSpec::new("Meta").attr("tag", int(5))).unwrap();
    let c = rt.new_type(TypeSpec::new("C").metaclass(meta)).unwrap();

    let (get_tag, site) = reader(&mut rt, &env, "tag");
    assert_eq!(rt.run(get_tag, &[Value::Type(c)]), Ok(int(5)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrUncachable));
    assert_eq!(rt.stats().uncacheable.not_found, 1);
}

#[test]
fn destroyed_type_leaves_the_registry() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let ty = rt.new_type(TypeSpec::new("Gone").attr("x", int(1))).unwrap();
    let o = rt.new_object(ty).unwrap();
    let (get_x, _) = reader(&mut rt, &env, "x");
    assert_eq!(rt.run(get_x, &[Value::Object(o)]), Ok(int(1)));
    assert_eq!(rt.type_watch().entry_count(ty), 1);

    rt.free_object(o);
    rt.destroy_type(ty).unwrap();
    assert!(rt.type_watch().is_empty());

    let replacement = rt.new_type(TypeSpec::new("Gone").attr("x", int(2))).unwrap();
    assert_ne!(replacement, ty);
    let o2 = Value::Object(rt.new_object(replacement).unwrap());
    assert_eq!(rt.run(get_x, &[o2]), Ok(int(2)));
}

#[test]
fn teardown_releases_every_entry() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let ty = rt.new_type(TypeSpec::new("T").attr("x", int(1))).unwrap();
    let o = Value::Object(rt.new_object(ty).unwrap());
    let (get_x, _) = reader(&mut rt, &env, "x");
    let (set_y, _) = writer(&mut rt, &env, "y");
    assert_eq!(rt.run(get_x, &[o.clone()]), Ok(int(1)));
    assert_eq!(rt.run(set_y, &[o, int(2)]), Ok(Value::None));
    assert_eq!(rt.cache_entries().len(), 2);

    // Invalidated entries survive while a site still points at them.
    rt.set_type_attr(ty, "z", int(0)).unwrap();
    assert_eq!(rt.cache_entries().len(), 2);
    assert!(rt.type_watch().is_empty());

    rt.teardown_unit(get_x);
    rt.teardown_unit(set_y);
    assert!(rt.cache_entries().is_empty());
}

#[test]
fn clear_caches_respecializes_attribute_sites() {
    let mut rt = Runtime::new();
    let env = env(&mut rt);
    let ty = rt.new_type(TypeSpec::new("T").attr("x", int(1))).unwrap();
    let o = Value::Object(rt.new_object(ty).unwrap());
    let (get_x, site) = reader(&mut rt, &env, "x");
    assert_eq!(rt.run(get_x, &[o.clone()]), Ok(int(1)));

    rt.clear_caches();
    assert!(rt.type_watch().is_empty());
    assert!(rt.cache_entries().is_empty());
    assert_eq!(rt.site_opcode(site), None);
    assert_eq!(rt.run(get_x, &[o]), Ok(int(1)));
    assert_eq!(rt.site_opcode(site), Some(Opcode::LoadAttrDict));
    assert_eq!(rt.stats().fills, 2);
}

#[test]
fn create_cache_destroy_cycles_do_not_leak() {
    let config = CacheConfig {
        churn_threshold: usize::MAX,
        ..CacheConfig::default()
    };
    let mut rt = Runtime::with_config(config);
    let env = env(&mut rt);
    let descr = Rc::new(Descriptor::property(|_, _| Ok(Value::Int(1)), None));
    let (get_p, _) = reader(&mut rt, &env, "p");
    assert_eq!(Rc::strong_count(&descr), 1);

    for _ in 0..10_000 {
        let ty = rt
            .new_type(TypeSpec::new("Cycle").attr("p", Value::Descr(descr.clone())))
            .unwrap();
        let o = rt.new_object(ty).unwrap();
        assert_eq!(rt.run(get_p, &[Value::Object(o)]), Ok(int(1)));
        rt.set_type_attr(ty, "q", int(0)).unwrap();
        assert_eq!(rt.run(get_p, &[Value::Object(o)]), Ok(int(1)));
        rt.free_object(o);
        rt.destroy_type(ty).unwrap();
        assert!(rt.type_watch().is_empty());
        assert!(rt.cache_entries().len() <= 1);
    }

    assert_eq!(Rc::strong_count(&descr), 1);
    rt.teardown_unit(get_p);
    assert!(rt.cache_entries().is_empty());
    assert_eq!(rt.stats().fills, 20_000);
}
