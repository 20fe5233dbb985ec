//! Cached and generic execution must be observably identical, for
//! attribute access and for global loads.

mod common;

use common::*;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use shade_runtime::{CacheConfig, Descriptor, DictId, Runtime, TypeId, TypeSpec, UnitId, Value};

const NAMES: [&str; 3] = ["x", "y", "m"];

struct World {
    rt: Runtime,
    types: Vec<TypeId>,
    receivers: Vec<Value>,
    readers: Vec<UnitId>,
    writers: Vec<UnitId>,
    caller: UnitId,
    b_derives_a: bool,
}

fn world(config: CacheConfig) -> World {
    let mut rt = Runtime::with_config(config);
    let env = env(&mut rt);

    let method = Value::native("m", |_, args| Ok(Value::Int(10 + args.len() as i64)));
    let a = rt
        .new_type(TypeSpec::new("A").attr("x", int(1)).attr("m", method))
        .unwrap();
    let b = rt
        .new_type(TypeSpec::new("B").base(a).split_dict().attr("y", int(2)))
        .unwrap();
    let c = rt
        .new_type(
            TypeSpec::new("C")
                .no_dict()
                .slots(1)
                .attr("x", Value::descr(Descriptor::member("x", 0)))
                .attr("y", int(3)),
        )
        .unwrap();
    let p = rt
        .new_type(TypeSpec::new("P").attr(
            "x",
            Value::descr(Descriptor::property(|_, _| Ok(Value::Int(42)), None)),
        ))
        .unwrap();

    let mut receivers = Vec::new();
    for ty in [a, a, b, b, c, p] {
        receivers.push(Value::Object(rt.new_object(ty).unwrap()));
    }
    receivers.push(Value::Type(a));
    receivers.push(Value::Type(b));
    receivers.push(int(5));

    let readers = NAMES.iter().map(|n| reader(&mut rt, &env, n).0).collect();
    let writers = NAMES.iter().map(|n| writer(&mut rt, &env, n).0).collect();
    let caller = method_caller(&mut rt, &env, "m").0;

    World {
        rt,
        types: vec![a, b, c, p],
        receivers,
        readers,
        writers,
        caller,
        b_derives_a: true,
    }
}

#[derive(Clone, Debug)]
enum Op {
    Read { name: usize, recv: usize },
    Write { name: usize, recv: usize, value: i64 },
    Call { recv: usize },
    SetClassAttr { ty: usize, name: usize, value: i64 },
    DelClassAttr { ty: usize, name: usize },
    SetInstanceDict { recv: usize, name: usize, value: i64 },
    ToggleBase,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..3usize, 0..9usize).prop_map(|(name, recv)| Op::Read { name, recv }),
        2 => (0..3usize, 0..9usize, 0..5i64)
            .prop_map(|(name, recv, value)| Op::Write { name, recv, value }),
        2 => (0..9usize).prop_map(|recv| Op::Call { recv }),
        1 => (0..4usize, 0..3usize, 0..5i64)
            .prop_map(|(ty, name, value)| Op::SetClassAttr { ty, name, value }),
        1 => (0..4usize, 0..3usize).prop_map(|(ty, name)| Op::DelClassAttr { ty, name }),
        1 => (0..6usize, 0..3usize, 0..5i64)
            .prop_map(|(recv, name, value)| Op::SetInstanceDict { recv, name, value }),
        1 => Just(Op::ToggleBase),
    ]
}

fn apply(w: &mut World, op: &Op) -> String {
    let result = match *op {
        Op::Read { name, recv } => {
            let r = w.receivers[recv].clone();
            w.rt.run(w.readers[name], &[r])
        }
        Op::Write { name, recv, value } => {
            let r = w.receivers[recv].clone();
            w.rt.run(w.writers[name], &[r, int(value)])
        }
        Op::Call { recv } => {
            let r = w.receivers[recv].clone();
            w.rt.run(w.caller, &[r])
        }
        Op::SetClassAttr { ty, name, value } => w
            .rt
            .set_type_attr(w.types[ty], NAMES[name], int(value))
            .map(|_| Value::None),
        Op::DelClassAttr { ty, name } => w
            .rt
            .del_type_attr(w.types[ty], NAMES[name])
            .map(Value::Bool),
        Op::SetInstanceDict { recv, name, value } => {
            match w.receivers[recv] {
                Value::Object(o) => match w.rt.object_dict(o) {
                    Some(dict) => w.rt.dict_set(dict, NAMES[name], int(value)).map(|_| Value::None),
                    None => Ok(Value::None),
                },
                _ => Ok(Value::None),
            }
        }
        Op::ToggleBase => {
            let (a, b) = (w.types[0], w.types[1]);
            w.b_derives_a = !w.b_derives_a;
            let bases = if w.b_derives_a { vec![a] } else { Vec::new() };
            w.rt.set_bases(b, bases).map(|_| Value::None)
        }
    };
    format!("{result:?}")
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn cached_execution_matches_generic(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let cached_config = CacheConfig {
            polymorphic_cap: 2,
            churn_threshold: 25,
            type_invalidate_limit: 8,
            ..CacheConfig::default()
        };
        let mut cached = world(cached_config);
        let mut generic = world(CacheConfig::disabled());
        for (i, op) in ops.iter().enumerate() {
            let got = apply(&mut cached, op);
            let want = apply(&mut generic, op);
            prop_assert_eq!(got, want, "step {} ({:?}) diverged", i, op);
        }
    }
}

const GLOBAL_NAMES: [&str; 3] = ["a", "b", "c"];

struct Globals {
    rt: Runtime,
    env: Env,
    loaders: Vec<UnitId>,
}

fn globals_world(config: CacheConfig) -> Globals {
    let mut rt = Runtime::with_config(config);
    let env = env(&mut rt);
    let loaders = GLOBAL_NAMES
        .iter()
        .map(|n| global_reader(&mut rt, &env, n).0)
        .collect();
    Globals { rt, env, loaders }
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Globals,
    Builtins,
}

#[derive(Clone, Debug)]
enum GlobalOp {
    Set { side: Side, name: usize, value: i64 },
    Del { side: Side, name: usize },
    Clear { side: Side },
    Lazy { side: Side, name: usize, value: i64 },
    /// A thunk that rebinds its own key to `value + 1` and returns `value`.
    SelfRebinding { side: Side, name: usize, value: i64 },
    IntKey { side: Side },
    /// Runs a newly registered loader once, then tears it down.
    FreshLoad { name: usize },
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![3 => Just(Side::Globals), 2 => Just(Side::Builtins)]
}

fn global_op_strategy() -> impl Strategy<Value = GlobalOp> {
    prop_oneof![
        6 => (side_strategy(), 0..3usize, 0..5i64)
            .prop_map(|(side, name, value)| GlobalOp::Set { side, name, value }),
        3 => (side_strategy(), 0..3usize).prop_map(|(side, name)| GlobalOp::Del { side, name }),
        1 => side_strategy().prop_map(|side| GlobalOp::Clear { side }),
        2 => (side_strategy(), 0..3usize, 0..5i64)
            .prop_map(|(side, name, value)| GlobalOp::Lazy { side, name, value }),
        2 => (side_strategy(), 0..3usize, 0..5i64)
            .prop_map(|(side, name, value)| GlobalOp::SelfRebinding { side, name, value }),
        1 => side_strategy().prop_map(|side| GlobalOp::IntKey { side }),
        3 => (0..3usize).prop_map(|name| GlobalOp::FreshLoad { name }),
    ]
}

fn dict_of(w: &Globals, side: Side) -> DictId {
    match side {
        Side::Globals => w.env.globals,
        Side::Builtins => w.env.builtins,
    }
}

/// Applies `op`, then reads every name through the long-lived loaders.
fn apply_global(w: &mut Globals, op: &GlobalOp) -> Vec<String> {
    let mut seen = Vec::new();
    let result = match *op {
        GlobalOp::Set { side, name, value } => w
            .rt
            .dict_set(dict_of(w, side), GLOBAL_NAMES[name], int(value))
            .map(|_| Value::None),
        GlobalOp::Del { side, name } => w
            .rt
            .dict_del(dict_of(w, side), GLOBAL_NAMES[name])
            .map(Value::Bool),
        GlobalOp::Clear { side } => w.rt.dict_clear(dict_of(w, side)).map(|_| Value::None),
        GlobalOp::Lazy { side, name, value } => w
            .rt
            .dict_set(
                dict_of(w, side),
                GLOBAL_NAMES[name],
                Value::lazy(move |_| Ok(Value::Int(value))),
            )
            .map(|_| Value::None),
        GlobalOp::SelfRebinding { side, name, value } => {
            let dict = dict_of(w, side);
            let thunk = move |rt: &mut Runtime| {
                rt.dict_set(dict, GLOBAL_NAMES[name], Value::Int(value + 1))?;
                Ok(Value::Int(value))
            };
            w.rt
                .dict_set(dict, GLOBAL_NAMES[name], Value::lazy(thunk))
                .map(|_| Value::None)
        }
        GlobalOp::IntKey { side } => w
            .rt
            .dict_set(dict_of(w, side), 7i64, Value::None)
            .map(|_| Value::None),
        GlobalOp::FreshLoad { name } => {
            let (unit, _) = global_reader(&mut w.rt, &w.env, GLOBAL_NAMES[name]);
            let r = w.rt.run(unit, &[]);
            w.rt.teardown_unit(unit);
            r
        }
    };
    seen.push(format!("{result:?}"));
    for i in 0..w.loaders.len() {
        let unit = w.loaders[i];
        seen.push(format!("{:?}", w.rt.run(unit, &[])));
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn cached_global_loads_match_generic(ops in prop::collection::vec(global_op_strategy(), 1..60)) {
        let mut cached = globals_world(CacheConfig::default());
        let mut generic = globals_world(CacheConfig::disabled());
        for (i, op) in ops.iter().enumerate() {
            let got = apply_global(&mut cached, op);
            let want = apply_global(&mut generic, op);
            prop_assert_eq!(got, want, "step {} ({:?}) diverged", i, op);
        }
        // One active cache per (builtins, globals, name) at most.
        prop_assert!(cached.rt.global_caches().active_len() <= GLOBAL_NAMES.len());
    }
}
