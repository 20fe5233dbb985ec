use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use shade_ir::{
    CodeBuilder, CodeUnit, Constant, Opcode, decode, instr_size, instructions, oparg_at, opsize,
    write_op_arg,
};

#[test]
fn wide_name_index_gets_extended_arg_prefix() {
    let mut b = CodeBuilder::new("wide");
    for i in 0..300 {
        b.name_index(&format!("n{i}"));
    }
    let narrow = b.load_attr("n7");
    let wide = b.load_attr("n299");
    b.return_value();
    let code = b.finish();

    assert_eq!(opsize(&code.units, narrow), 1);
    assert_eq!(opsize(&code.units, wide), 2);
    assert_eq!(code.units[wide - 1].op, Opcode::ExtendedArg);
    assert_eq!(oparg_at(&code.units, wide), 299);
    assert_eq!(code.name_at(wide).map(|n| n.as_str()), Some("n299"));
    assert_eq!(code.name_at(narrow).map(|n| n.as_str()), Some("n7"));
}

#[test]
fn opsize_at_stream_start_does_not_underflow() {
    let mut b = CodeBuilder::new("start");
    let first = b.load_const(Constant::Int(1));
    b.return_value();
    let code = b.finish();
    assert_eq!(first, 0);
    assert_eq!(opsize(&code.units, 0), 1);
}

#[test]
fn shadow_nop_padding_is_counted_and_skipped() {
    let mut units = vec![CodeUnit::new(Opcode::Nop, 0); 3];
    write_op_arg(&mut units, 0, Opcode::LoadAttr, 0x1234, 2);
    units.push(CodeUnit::new(Opcode::ReturnValue, 0));
    assert_eq!(opsize(&units, 1), 2);

    // Narrow in place: pad first, opcode last.
    units[0] = CodeUnit::new(Opcode::ShadowNop, 0);
    write_op_arg(&mut units, 1, Opcode::LoadAttrDict, 3, 1);
    assert_eq!(opsize(&units, 1), 2);

    let ops: Vec<(Opcode, u32, usize)> = instructions(&units)
        .map(|i| (i.op, i.arg, i.offset))
        .collect();
    assert_eq!(
        ops,
        vec![
            (Opcode::ShadowNop, 0, 0),
            (Opcode::LoadAttrDict, 3, 1),
            (Opcode::Nop, 0, 2),
            (Opcode::ReturnValue, 0, 3),
        ]
    );
}

#[test]
fn dangling_extended_arg_does_not_decode() {
    let units = vec![
        CodeUnit::new(Opcode::Nop, 0),
        CodeUnit::new(Opcode::ExtendedArg, 1),
    ];
    assert_eq!(decode(&units, 1), None);
    assert_eq!(decode(&units, 2), None);
    let ops: Vec<Opcode> = instructions(&units).map(|i| i.op).collect();
    assert_eq!(ops, vec![Opcode::Nop]);
}

#[test]
fn global_name_count_dedupes() {
    let mut b = CodeBuilder::new("globals");
    b.load_global("len");
    b.load_global("print");
    b.load_global("len");
    b.store_global("x");
    b.return_value();
    assert_eq!(b.finish().global_name_count(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64, max_shrink_iters: 200, .. ProptestConfig::default()
    })]
    #[test]
    fn emitted_instruction_decodes_at_its_offset(arg in any::<u32>()) {
        let mut b = CodeBuilder::new("p");
        b.load_const(Constant::None);
        let at = b.emit(Opcode::LoadGlobal, arg);
        let code = b.finish();
        let size = instr_size(arg);
        prop_assert_eq!(opsize(&code.units, at), size);
        let instr = decode(&code.units, at + 1 - size).unwrap();
        prop_assert_eq!(instr.offset, at);
        prop_assert_eq!(instr.arg, arg);
        prop_assert_eq!(instr.op, Opcode::LoadGlobal);
    }
}
