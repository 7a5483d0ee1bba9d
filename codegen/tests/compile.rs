//! End-to-end compilation tests: build IR through the public builder API,
//! run the whole pipeline, and check properties of the emitted machine code.

use ingot_codegen::cursor::{Cursor, FuncCursor};
use ingot_codegen::frontend::FunctionBuilder;
use ingot_codegen::ir::condcodes::IntCC;
use ingot_codegen::ir::{
    types, AbiParam, ExtFuncData, ExternalName, Function, InstBuilder, JumpTableData, MemFlags,
    Signature,
};
use ingot_codegen::isa::{self, CallConv, OwnedTargetIsa};
use ingot_codegen::settings::{self, Flags};
use ingot_codegen::Context;

fn isa_with(f: impl FnOnce(&mut settings::Builder)) -> OwnedTargetIsa {
    // Surface pass traces when RUST_LOG is set.
    let _ = env_logger::builder().is_test(true).try_init();
    let mut builder = settings::builder();
    f(&mut builder);
    isa::lookup_by_name("aarch64-unknown-linux-gnu")
        .unwrap()
        .finish(Flags::new(builder))
}

fn isa_default() -> OwnedTargetIsa {
    isa_with(|_| ())
}

fn words(code: &[u8]) -> Vec<u32> {
    code.chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn is_udiv(w: u32) -> bool {
    (w & 0x7FE0_FC00) == 0x1AC0_0800
}

fn is_str_imm(w: u32) -> bool {
    (w >> 22) == 0b11_111_0_01_00
}

fn is_ldr_imm(w: u32) -> bool {
    (w >> 22) == 0b11_111_0_01_01
}

#[test]
fn conditional_branch_over_icmp() {
    // fn(x: i32) -> i32 { if x < 10 { 1 } else { 0 } }
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::I32));
    let mut func = Function::with_name_signature(ExternalName::testcase("brif"), sig);

    let mut builder = FunctionBuilder::new(&mut func);
    let entry = builder.create_block();
    let then_block = builder.create_block();
    let else_block = builder.create_block();
    let x = builder.append_block_param(entry, types::I32);

    builder.switch_to_block(entry);
    builder.seal_block(entry);
    let ten = builder.ins().iconst(types::I32, 10i64);
    let cond = builder.ins().icmp(IntCC::SignedLessThan, x, ten);
    builder.ins().brif(cond, then_block, &[], else_block, &[]);

    builder.switch_to_block(then_block);
    builder.seal_block(then_block);
    let one = builder.ins().iconst(types::I32, 1i64);
    builder.ins().return_(&[one]);

    builder.switch_to_block(else_block);
    builder.seal_block(else_block);
    let zero = builder.ins().iconst(types::I32, 0i64);
    builder.ins().return_(&[zero]);
    builder.finalize();

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");

    let words = words(code.code_buffer());
    // There is a conditional branch (b.cond) in the stream.
    assert!(
        words.iter().any(|w| w >> 24 == 0x54),
        "expected a conditional branch in {words:08x?}"
    );
    // Both sides return, so there are two rets.
    assert_eq!(words.iter().filter(|&&w| w == 0xD65F03C0).count(), 2);
}

#[test]
fn udiv_by_constant_uses_no_division() {
    // fn(x: u32) -> u32 { x / 7 }
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::I32));
    let mut func = Function::with_name_signature(ExternalName::testcase("udiv7"), sig);
    let block0 = func.dfg.make_block();
    let x = func.dfg.append_block_param(block0, types::I32);
    {
        let mut cur = FuncCursor::new(&mut func);
        cur.insert_block(block0);
        let seven = cur.ins().iconst(types::I32, 7i64);
        let q = cur.ins().udiv(x, seven);
        cur.ins().return_(&[q]);
    }

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");

    let words = words(code.code_buffer());
    assert!(
        !words.iter().any(|&w| is_udiv(w)),
        "division by 7 must use the magic-number sequence, got {words:08x?}"
    );
}

#[test]
fn register_pressure_spills_and_reloads() {
    // 40 simultaneously-live values force spills.
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.push(AbiParam::new(types::I64));
    sig.returns.push(AbiParam::new(types::I64));
    let mut func = Function::with_name_signature(ExternalName::testcase("pressure"), sig);
    let block0 = func.dfg.make_block();
    let x = func.dfg.append_block_param(block0, types::I64);
    {
        let mut cur = FuncCursor::new(&mut func);
        cur.insert_block(block0);
        // Define 40 values that all stay live until the summation below.
        let mut values = Vec::new();
        for i in 0..40i64 {
            let c = cur.ins().iconst(types::I64, 1i64 << (i % 48));
            let v = cur.ins().imul(x, c);
            values.push(v);
        }
        let mut acc = values[0];
        for &v in &values[1..] {
            acc = cur.ins().iadd(acc, v);
        }
        cur.ins().return_(&[acc]);
    }

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");

    let words = words(code.code_buffer());
    assert!(
        words.iter().any(|&w| is_str_imm(w)),
        "expected at least one spill store"
    );
    assert!(
        words.iter().any(|&w| is_ldr_imm(w)),
        "expected at least one spill reload"
    );
    assert!(code.stack_frame_size() > 0);
}

#[test]
fn call_emits_frame_and_relocation() {
    // fn() -> i64 { callee() + callee() }
    let mut sig = Signature::new(CallConv::SystemV);
    sig.returns.push(AbiParam::new(types::I64));
    let mut func = Function::with_name_signature(ExternalName::testcase("caller"), sig);

    let mut callee_sig = Signature::new(CallConv::SystemV);
    callee_sig.returns.push(AbiParam::new(types::I64));
    let sig_ref = func.dfg.signatures.push(callee_sig);
    let callee = func.dfg.ext_funcs.push(ExtFuncData {
        name: ExternalName::testcase("callee"),
        signature: sig_ref,
        colocated: true,
    });

    let block0 = func.dfg.make_block();
    {
        let mut cur = FuncCursor::new(&mut func);
        cur.insert_block(block0);
        let c1 = cur.ins().call(callee, &[]);
        let r1 = cur.func.dfg.first_result(c1);
        let c2 = cur.ins().call(callee, &[]);
        let r2 = cur.func.dfg.first_result(c2);
        let sum = cur.ins().iadd(r1, r2);
        cur.ins().return_(&[sum]);
    }

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");

    // A non-leaf function sets up its frame: stp fp, lr, [sp, #-16]!.
    let words = words(code.code_buffer());
    assert_eq!(words[0] >> 24, 0xA9, "expected the fp/lr save, got {words:08x?}");
    // Two bl relocations against the callee.
    let call_relocs: Vec<_> = code
        .relocs()
        .iter()
        .filter(|r| r.kind == ingot_codegen::machinst::Reloc::Call26)
        .collect();
    assert_eq!(call_relocs.len(), 2);
    assert_eq!(code.call_sites().len(), 2);
}

#[test]
fn br_table_dispatches_indirectly() {
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::I32));
    let mut func = Function::with_name_signature(ExternalName::testcase("jt"), sig);

    let block0 = func.dfg.make_block();
    let idx = func.dfg.append_block_param(block0, types::I32);
    let targets: Vec<_> = (0..3).map(|_| func.dfg.make_block()).collect();
    let default = func.dfg.make_block();

    let jt_data = {
        let def = func.dfg.block_call(default, &[]);
        let entries: Vec<_> = targets
            .iter()
            .map(|&b| func.dfg.block_call(b, &[]))
            .collect();
        JumpTableData::new(def, &entries)
    };
    let jt = func.create_jump_table(jt_data);

    {
        let mut cur = FuncCursor::new(&mut func);
        cur.insert_block(block0);
        cur.ins().br_table(idx, jt);
        for (i, &b) in targets.iter().enumerate() {
            cur.insert_block(b);
            let v = cur.ins().iconst(types::I32, 10 + i as i64);
            cur.ins().return_(&[v]);
        }
        cur.insert_block(default);
        let v = cur.ins().iconst(types::I32, 0i64);
        cur.ins().return_(&[v]);
    }

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");
    let words = words(code.code_buffer());
    // The dispatch ends in an indirect branch.
    assert!(
        words.iter().any(|&w| (w & 0xFFFF_FC1F) == 0xD61F_0000),
        "expected a br in {words:08x?}"
    );
}

#[test]
fn try_call_produces_lsda_and_handler() {
    let mut sig = Signature::new(CallConv::SystemV);
    sig.returns.push(AbiParam::new(types::I64));
    let mut func = Function::with_name_signature(ExternalName::testcase("thrower"), sig);

    let mut callee_sig = Signature::new(CallConv::SystemV);
    callee_sig.returns.push(AbiParam::new(types::I64));
    let sig_ref = func.dfg.signatures.push(callee_sig);
    let callee = func.dfg.ext_funcs.push(ExtFuncData {
        name: ExternalName::testcase("may_throw"),
        signature: sig_ref,
        colocated: true,
    });

    let block0 = func.dfg.make_block();
    let normal = func.dfg.make_block();
    let normal_param = func.dfg.append_block_param(normal, types::I64);
    let landing = func.dfg.make_block();

    {
        let mut cur = FuncCursor::new(&mut func);
        cur.insert_block(block0);
        let normal_call = cur.func.dfg.block_call(normal, &[]);
        let landing_call = cur.func.dfg.block_call(landing, &[]);
        cur.ins().try_call(callee, &[], normal_call, landing_call);

        cur.insert_block(normal);
        cur.ins().return_(&[normal_param]);

        cur.insert_block(landing);
        let zero = cur.ins().iconst(types::I64, 0i64);
        cur.ins().return_(&[zero]);
    }

    // The normal continuation consumes the call's result: pass it along
    // the edge as the block argument.
    {
        let term = func.layout.last_inst(block0).unwrap();
        let result = func.dfg.first_result(term);
        let pool = &mut func.dfg.value_lists;
        if let ingot_codegen::ir::InstructionData::TryCall { blocks, .. } =
            &mut func.dfg.insts[term]
        {
            blocks[0].append_argument(result, pool);
        }
    }

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");

    assert!(code.lsda.is_some(), "try_call must produce an LSDA");
    let handlers: Vec<_> = code
        .call_sites()
        .iter()
        .filter(|cs| cs.exception_handler.is_some())
        .collect();
    assert_eq!(handlers.len(), 1);
}

#[test]
fn loads_and_stores_round_trip_through_memory_ops() {
    // fn(p: i64, v: i32) { store v -> [p]; return load [p] }
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.push(AbiParam::new(types::I64));
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::I32));
    let mut func = Function::with_name_signature(ExternalName::testcase("mem"), sig);
    let block0 = func.dfg.make_block();
    let p = func.dfg.append_block_param(block0, types::I64);
    let v = func.dfg.append_block_param(block0, types::I32);
    {
        let mut cur = FuncCursor::new(&mut func);
        cur.insert_block(block0);
        let flags = MemFlags::new();
        cur.ins().store(flags, v, p, 0);
        let loaded = cur.ins().load(types::I32, flags, p, 0);
        cur.ins().return_(&[loaded]);
    }

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");
    // The redundant-load pass forwards the store, so only the store and a
    // move remain; at minimum the function compiles and returns.
    let words = words(code.code_buffer());
    assert!(words.last() == Some(&0xD65F03C0));
}

#[test]
fn spectre_mitigation_emits_csdb() {
    let mut sig = Signature::new(CallConv::SystemV);
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::I32));
    let mut func = Function::with_name_signature(ExternalName::testcase("jt_spectre"), sig);

    let block0 = func.dfg.make_block();
    let idx = func.dfg.append_block_param(block0, types::I32);
    let t0 = func.dfg.make_block();
    let default = func.dfg.make_block();
    let jt_data = {
        let def = func.dfg.block_call(default, &[]);
        let e0 = func.dfg.block_call(t0, &[]);
        JumpTableData::new(def, &[e0])
    };
    let jt = func.create_jump_table(jt_data);
    {
        let mut cur = FuncCursor::new(&mut func);
        cur.insert_block(block0);
        cur.ins().br_table(idx, jt);
        cur.insert_block(t0);
        let v = cur.ins().iconst(types::I32, 1i64);
        cur.ins().return_(&[v]);
        cur.insert_block(default);
        let v = cur.ins().iconst(types::I32, 0i64);
        cur.ins().return_(&[v]);
    }

    let isa = isa_with(|b| {
        b.enable("enable_spectre_mitigation").unwrap();
    });
    let mut ctx = Context::for_function(func);
    let code = ctx.compile(&*isa).expect("compilation succeeds");
    let words = words(code.code_buffer());
    assert!(
        words.contains(&0xD503229F),
        "expected a csdb barrier in {words:08x?}"
    );
}

#[test]
fn invalid_ir_is_rejected_before_lowering() {
    // A block without a terminator must be caught by the verifier.
    let mut func = Function::new();
    let block0 = func.dfg.make_block();
    func.layout.append_block(block0);
    {
        let mut cur = FuncCursor::new(&mut func).at_bottom(block0);
        cur.ins().iconst(types::I32, 1i64);
    }

    let isa = isa_default();
    let mut ctx = Context::for_function(func);
    match ctx.compile(&*isa) {
        Err(ingot_codegen::CodegenError::Verifier(errors)) => {
            assert!(!errors.is_empty());
        }
        other => panic!("expected a verifier error, got {other:?}"),
    }
}

#[test]
fn deterministic_output() {
    // Two identical compilations produce identical bytes.
    let build = || {
        let mut sig = Signature::new(CallConv::SystemV);
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));
        let mut func = Function::with_name_signature(ExternalName::testcase("det"), sig);
        let block0 = func.dfg.make_block();
        let x = func.dfg.append_block_param(block0, types::I64);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let three = cur.ins().iconst(types::I64, 3i64);
            let y = cur.ins().imul(x, three);
            let z = cur.ins().iadd(y, x);
            cur.ins().return_(&[z]);
        }
        func
    };

    let isa = isa_default();
    let mut ctx1 = Context::for_function(build());
    let mut ctx2 = Context::for_function(build());
    let code1 = ctx1.compile(&*isa).unwrap().code_buffer().to_vec();
    let code2 = ctx2.compile(&*isa).unwrap().code_buffer().to_vec();
    assert_eq!(code1, code2);
}
