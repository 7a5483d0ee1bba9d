//! Golden encoding tests: emit single instructions and compare against the
//! architecturally-defined 32-bit words.

use crate::ir::types;
use crate::isa::aarch64::inst::*;
use crate::machinst::vcode::MachInstEmit;
use crate::machinst::MachBuffer;

fn emit_one(inst: Inst) -> Vec<u32> {
    let mut buffer: MachBuffer<LabelUse> = MachBuffer::new();
    let mut state = EmitState::default();
    inst.emit(&mut buffer, &mut state);
    let done = buffer.finish().unwrap();
    done.data()
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn assert_emit(inst: Inst, expect: u32, asm: &str) {
    let words = emit_one(inst);
    assert_eq!(
        words,
        vec![expect],
        "wrong encoding for `{asm}`: got {words:08X?}, want {expect:08X}"
    );
}

#[test]
fn alu_rrr() {
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::Add,
            size: OperandSize::Size64,
            rd: writable_xreg(1),
            rn: xreg(2),
            rm: xreg(3),
        },
        0x8B030041,
        "add x1, x2, x3",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::Sub,
            size: OperandSize::Size32,
            rd: writable_xreg(1),
            rn: xreg(2),
            rm: xreg(3),
        },
        0x4B030041,
        "sub w1, w2, w3",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::AddS,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0xAB020020,
        "adds x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::SubS,
            size: OperandSize::Size64,
            rd: writable_zero_reg(),
            rn: xreg(1),
            rm: xreg(2),
        },
        0xEB02003F,
        "cmp x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::And,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x8A020020,
        "and x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::AndNot,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x8A220020,
        "bic x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::Orr,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0xAA020020,
        "orr x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::Eor,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0xCA020020,
        "eor x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::UDiv,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x9AC20820,
        "udiv x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::SDiv,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x9AC20C20,
        "sdiv x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::Lsl,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x9AC22020,
        "lsl x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::Asr,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x9AC22820,
        "asr x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::SMulH,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x9B427C20,
        "smulh x0, x1, x2",
    );
    assert_emit(
        Inst::AluRRR {
            alu_op: ALUOp::UMulH,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        },
        0x9BC27C20,
        "umulh x0, x1, x2",
    );
}

#[test]
fn alu_rrrr() {
    assert_emit(
        Inst::AluRRRR {
            alu_op: ALUOp3::MAdd,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
            ra: xreg(3),
        },
        0x9B020C20,
        "madd x0, x1, x2, x3",
    );
    assert_emit(
        Inst::AluRRRR {
            alu_op: ALUOp3::MSub,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
            ra: xreg(3),
        },
        0x9B028C20,
        "msub x0, x1, x2, x3",
    );
    assert_emit(
        Inst::AluRRRR {
            alu_op: ALUOp3::MAdd,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(0),
            rm: xreg(1),
            ra: zero_reg(),
        },
        0x9B017C00,
        "mul x0, x0, x1",
    );
}

#[test]
fn alu_imm12() {
    assert_emit(
        Inst::AluRRImm12 {
            alu_op: ALUOp::Add,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            imm12: Imm12::maybe_from_u64(42).unwrap(),
        },
        0x9100A820,
        "add x0, x1, #42",
    );
    assert_emit(
        Inst::AluRRImm12 {
            alu_op: ALUOp::Sub,
            size: OperandSize::Size64,
            rd: writable_stack_reg(),
            rn: stack_reg(),
            imm12: Imm12::maybe_from_u64(16).unwrap(),
        },
        0xD10043FF,
        "sub sp, sp, #16",
    );
    assert_emit(
        Inst::AluRRImm12 {
            alu_op: ALUOp::Add,
            size: OperandSize::Size64,
            rd: writable_xreg(3),
            rn: xreg(4),
            imm12: Imm12::maybe_from_u64(0x12000).unwrap(),
        },
        0x91404883,
        "add x3, x4, #0x12, lsl #12",
    );
}

#[test]
fn alu_logical_imm() {
    assert_emit(
        Inst::AluRRImmLogic {
            alu_op: ALUOp::And,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            imml: ImmLogic::maybe_from_u64(0xff, types::I64).unwrap(),
        },
        0x92401C20,
        "and x0, x1, #0xff",
    );
    assert_emit(
        Inst::AluRRImmLogic {
            alu_op: ALUOp::Orr,
            size: OperandSize::Size32,
            rd: writable_xreg(0),
            rn: xreg(1),
            imml: ImmLogic::maybe_from_u64(1, types::I32).unwrap(),
        },
        0x32000020,
        "orr w0, w1, #1",
    );
}

#[test]
fn shifts_by_immediate() {
    assert_emit(
        Inst::AluRRImmShift {
            alu_op: ALUOp::Lsl,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            immshift: ImmShift::maybe_from_u64(4).unwrap(),
        },
        0xD37CEC20,
        "lsl x0, x1, #4",
    );
    assert_emit(
        Inst::AluRRImmShift {
            alu_op: ALUOp::Lsr,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            immshift: ImmShift::maybe_from_u64(32).unwrap(),
        },
        0xD360FC20,
        "lsr x0, x1, #32",
    );
}

#[test]
fn extends() {
    assert_emit(
        Inst::Extend {
            rd: writable_xreg(0),
            rn: xreg(1),
            signed: true,
            from_bits: 32,
            to_bits: 64,
        },
        0x93407C20,
        "sxtw x0, w1",
    );
    assert_emit(
        Inst::Extend {
            rd: writable_xreg(0),
            rn: xreg(1),
            signed: false,
            from_bits: 8,
            to_bits: 32,
        },
        0x53001C20,
        "uxtb w0, w1",
    );
}

#[test]
fn move_wide() {
    assert_emit(
        Inst::MovWide {
            op: MoveWideOp::MovZ,
            rd: writable_xreg(0),
            imm: MoveWideConst::maybe_from_u64(42).unwrap(),
            size: OperandSize::Size64,
        },
        0xD2800540,
        "movz x0, #42",
    );
    assert_emit(
        Inst::MovWide {
            op: MoveWideOp::MovN,
            rd: writable_xreg(0),
            imm: MoveWideConst::zero(),
            size: OperandSize::Size64,
        },
        0x92800000,
        "movn x0, #0",
    );
    assert_emit(
        Inst::MovK {
            rd: writable_xreg(0),
            imm: MoveWideConst::maybe_with_shift(1, 1).unwrap(),
            size: OperandSize::Size64,
        },
        0xF2A00020,
        "movk x0, #1, lsl #16",
    );
}

#[test]
fn moves() {
    assert_emit(
        Inst::Mov {
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rm: xreg(1),
        },
        0xAA0103E0,
        "mov x0, x1",
    );
    // Moves involving SP take the add-immediate form.
    assert_emit(
        Inst::Mov {
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rm: stack_reg(),
        },
        0x910003E0,
        "mov x0, sp",
    );
}

#[test]
fn loads_and_stores() {
    assert_emit(
        Inst::ULoad64 {
            rd: writable_xreg(0),
            mem: AMode::reg(xreg(1)),
        },
        0xF9400020,
        "ldr x0, [x1]",
    );
    assert_emit(
        Inst::Store32 {
            rd: xreg(2),
            mem: AMode::UnsignedOffset(
                xreg(3),
                UImm12Scaled::maybe_from_i64(8, types::I32).unwrap(),
            ),
        },
        0xB9000862,
        "str w2, [x3, #8]",
    );
    assert_emit(
        Inst::ULoad8 {
            rd: writable_xreg(0),
            mem: AMode::reg(xreg(1)),
        },
        0x39400020,
        "ldrb w0, [x1]",
    );
    assert_emit(
        Inst::SLoad8 {
            rd: writable_xreg(0),
            mem: AMode::reg(xreg(1)),
        },
        0x39800020,
        "ldrsb x0, [x1]",
    );
    assert_emit(
        Inst::ULoad64 {
            rd: writable_xreg(0),
            mem: AMode::Unscaled(xreg(1), SImm9::maybe_from_i64(-8).unwrap()),
        },
        0xF85F8020,
        "ldur x0, [x1, #-8]",
    );
    assert_emit(
        Inst::ULoad64 {
            rd: writable_xreg(0),
            mem: AMode::RegReg(xreg(1), xreg(2)),
        },
        0xF8626820,
        "ldr x0, [x1, x2]",
    );
}

#[test]
fn load_store_pairs() {
    assert_emit(
        Inst::StoreP64 {
            rt: fp_reg(),
            rt2: link_reg(),
            mem: PairAMode::SPPreIndexed(SImm7Scaled::maybe_from_i64(-16, types::I64).unwrap()),
        },
        0xA9BF7BFD,
        "stp x29, x30, [sp, #-16]!",
    );
    assert_emit(
        Inst::LoadP64 {
            rt: writable_fp_reg(),
            rt2: writable_link_reg(),
            mem: PairAMode::SPPostIndexed(SImm7Scaled::maybe_from_i64(16, types::I64).unwrap()),
        },
        0xA8C17BFD,
        "ldp x29, x30, [sp], #16",
    );
}

#[test]
fn branches() {
    assert_emit(Inst::Ret { rets: vec![] }, 0xD65F03C0, "ret");
    assert_emit(Inst::IndirectBr { rn: xreg(1) }, 0xD61F0020, "br x1");
    assert_emit(Inst::Brk, 0xD4200000, "brk #0");
    assert_emit(
        Inst::Udf {
            trap_code: crate::ir::TrapCode::UnreachableCodeReached,
        },
        0x00000000,
        "udf #0",
    );
    assert_emit(Inst::Fence, 0xD5033BBF, "dmb ish");
    assert_emit(Inst::Csdb, 0xD503229F, "csdb");
}

#[test]
fn conditional_ops() {
    assert_emit(
        Inst::CSel {
            rd: writable_xreg(0),
            cond: Cond::Eq,
            rn: xreg(1),
            rm: xreg(2),
        },
        0x9A820020,
        "csel x0, x1, x2, eq",
    );
    assert_emit(
        Inst::CSet {
            rd: writable_xreg(0),
            cond: Cond::Eq,
        },
        0x9A9F17E0,
        "cset x0, eq",
    );
    assert_emit(
        Inst::CCmp {
            size: OperandSize::Size64,
            rn: xreg(1),
            rm: xreg(2),
            nzcv: NZCV::new(false, false, false, false),
            cond: Cond::Eq,
        },
        0xFA420020,
        "ccmp x1, x2, #0, eq",
    );
}

#[test]
fn fpu_ops() {
    assert_emit(
        Inst::FpuRRR {
            fpu_op: FPUOp2::Add,
            size: ScalarSize::Size64,
            rd: writable_vreg(0),
            rn: vreg(1),
            rm: vreg(2),
        },
        0x1E622820,
        "fadd d0, d1, d2",
    );
    assert_emit(
        Inst::FpuRRR {
            fpu_op: FPUOp2::Mul,
            size: ScalarSize::Size32,
            rd: writable_vreg(0),
            rn: vreg(1),
            rm: vreg(2),
        },
        0x1E220820,
        "fmul s0, s1, s2",
    );
    assert_emit(
        Inst::FpuCmp {
            size: ScalarSize::Size64,
            rn: vreg(1),
            rm: vreg(2),
        },
        0x1E622020,
        "fcmp d1, d2",
    );
    assert_emit(
        Inst::FpuMove {
            size: ScalarSize::Size64,
            rd: writable_vreg(0),
            rn: vreg(1),
        },
        0x1E604020,
        "fmov d0, d1",
    );
    assert_emit(
        Inst::FpuRR {
            fpu_op: FPUOp1::Sqrt,
            size: ScalarSize::Size64,
            rd: writable_vreg(0),
            rn: vreg(1),
        },
        0x1E61C020,
        "fsqrt d0, d1",
    );
    assert_emit(
        Inst::FpuRR {
            fpu_op: FPUOp1::Cvt32To64,
            size: ScalarSize::Size32,
            rd: writable_vreg(0),
            rn: vreg(1),
        },
        0x1E22C020,
        "fcvt d0, s1",
    );
    assert_emit(
        Inst::FpuRRRR {
            size: ScalarSize::Size64,
            rd: writable_vreg(0),
            rn: vreg(1),
            rm: vreg(2),
            ra: vreg(3),
        },
        0x1F420C20,
        "fmadd d0, d1, d2, d3",
    );
}

#[test]
fn fpu_int_moves_and_conversions() {
    assert_emit(
        Inst::MovToFpu {
            size: ScalarSize::Size64,
            rd: writable_vreg(0),
            rn: xreg(1),
        },
        0x9E670020,
        "fmov d0, x1",
    );
    assert_emit(
        Inst::MovFromFpu {
            size: ScalarSize::Size64,
            rd: writable_xreg(0),
            rn: vreg(1),
        },
        0x9E660020,
        "fmov x0, d1",
    );
    assert_emit(
        Inst::FpuToInt {
            op: FpuToIntOp::F64ToI64,
            rd: writable_xreg(0),
            rn: vreg(1),
        },
        0x9E780020,
        "fcvtzs x0, d1",
    );
    assert_emit(
        Inst::IntToFpu {
            op: IntToFpuOp::I64ToF64,
            rd: writable_vreg(0),
            rn: xreg(1),
        },
        0x9E620020,
        "scvtf d0, x1",
    );
}

#[test]
fn atomics() {
    assert_emit(
        Inst::LoadAcquire {
            ty: types::I64,
            rt: writable_xreg(0),
            rn: xreg(1),
        },
        0xC8DFFC20,
        "ldar x0, [x1]",
    );
    assert_emit(
        Inst::StoreRelease {
            ty: types::I64,
            rt: xreg(0),
            rn: xreg(1),
        },
        0xC89FFC20,
        "stlr x0, [x1]",
    );
    assert_emit(
        Inst::AtomicRmwAl {
            op: crate::ir::AtomicRmwOp::Add,
            ty: types::I64,
            rs: xreg(1),
            rt: writable_xreg(0),
            rn: xreg(2),
        },
        0xF8E10040,
        "ldaddal x1, x0, [x2]",
    );
    assert_emit(
        Inst::AtomicCasAl {
            ty: types::I64,
            rd: writable_xreg(0),
            rt: xreg(1),
            rn: xreg(2),
        },
        0xC8E0FC41,
        "casal x0, x1, [x2]",
    );
}

#[test]
fn vector_popcount_helpers() {
    assert_emit(
        Inst::VecCnt {
            rd: writable_vreg(0),
            rn: vreg(1),
        },
        0x0E205820,
        "cnt v0.8b, v1.8b",
    );
    assert_emit(
        Inst::VecAddv {
            rd: writable_vreg(0),
            rn: vreg(1),
        },
        0x0E31B820,
        "addv b0, v1.8b",
    );
}

#[test]
fn bit_ops() {
    assert_emit(
        Inst::BitRR {
            op: BitOp::Clz,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
        },
        0xDAC01020,
        "clz x0, x1",
    );
    assert_emit(
        Inst::BitRR {
            op: BitOp::RBit,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
        },
        0xDAC00020,
        "rbit x0, x1",
    );
}

#[test]
fn branch_to_label_resolves() {
    // A forward branch over one instruction.
    let mut buffer: MachBuffer<LabelUse> = MachBuffer::new();
    let mut state = EmitState::default();
    let label = buffer.get_label();
    Inst::Jump { dest: label }.emit(&mut buffer, &mut state);
    Inst::Nop0.emit(&mut buffer, &mut state);
    Inst::MovWide {
        op: MoveWideOp::MovZ,
        rd: writable_xreg(0),
        imm: MoveWideConst::zero(),
        size: OperandSize::Size64,
    }
    .emit(&mut buffer, &mut state);
    buffer.bind_label(label);
    Inst::Ret { rets: vec![] }.emit(&mut buffer, &mut state);
    let done = buffer.finish().unwrap();
    let words: Vec<u32> = done
        .data()
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    // b +8 (two instructions ahead; the nop is zero-size).
    assert_eq!(words[0], 0x14000002);
    assert_eq!(words[2], 0xD65F03C0);
}

#[test]
fn load_constant_sequences() {
    // Small constant: single movz.
    let insts = Inst::load_constant(writable_xreg(0), 42);
    assert_eq!(insts.len(), 1);
    // A constant with two non-zero halves: movz + movk.
    let insts = Inst::load_constant(writable_xreg(0), 0x1_0000_0001);
    assert_eq!(insts.len(), 2);
    // Mostly-ones constant: movn form, single instruction.
    let insts = Inst::load_constant(writable_xreg(0), !0x1234u64);
    assert_eq!(insts.len(), 1);
    // Worst case: four chunks.
    let insts = Inst::load_constant(writable_xreg(0), 0x1234_5678_9ABC_DEF0);
    assert_eq!(insts.len(), 4);
}
