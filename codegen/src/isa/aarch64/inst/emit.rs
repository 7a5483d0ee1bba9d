//! AArch64 ISA: binary code emission.

use crate::ir::{types, ExternalName, Type};
use crate::isa::aarch64::inst::*;
use crate::machinst::abi::FrameLayout;
use crate::machinst::{MachBuffer, MachInstLabelUse, MachLabel, Reloc};
use crate::machinst::vcode::MachInstEmit;

/// State carried across the emission of one function.
#[derive(Clone, Default)]
pub struct EmitState {
    /// The finalized frame layout, for resolving frame-relative addressing
    /// modes.
    pub frame_layout: FrameLayout,
    /// Position-independent addressing for symbols.
    pub is_pic: bool,
}

/// A label reference kind for AArch64 instructions.
#[derive(Clone, Copy, Debug)]
pub enum LabelUse {
    /// 19-bit branch offset (conditional branches and cbz/cbnz), scaled by
    /// 4: ±1 MiB.
    Branch19,
    /// 26-bit branch offset (b, bl), scaled by 4: ±128 MiB.
    Branch26,
    /// 19-bit offset of a load-literal, scaled by 4: ±1 MiB.
    Ldr19,
    /// 21-bit byte offset of an `adr`: ±1 MiB.
    Adr21,
    /// 32-bit PC-relative data word; the patch adds the delta onto the
    /// existing contents, so jump-table entries can pre-store their offset
    /// within the table.
    PCRel32,
}

impl MachInstLabelUse for LabelUse {
    fn max_pos_range(self) -> u32 {
        match self {
            LabelUse::Branch19 | LabelUse::Ldr19 => (1 << 20) - 1,
            LabelUse::Branch26 => (1 << 27) - 1,
            LabelUse::Adr21 => (1 << 20) - 1,
            LabelUse::PCRel32 => 0x7fff_ffff,
        }
    }

    fn max_neg_range(self) -> u32 {
        match self {
            LabelUse::Branch19 | LabelUse::Ldr19 => 1 << 20,
            LabelUse::Branch26 => 1 << 27,
            LabelUse::Adr21 => 1 << 20,
            LabelUse::PCRel32 => 0x8000_0000,
        }
    }

    fn patch_size(self) -> u32 {
        4
    }

    fn patch(self, buffer: &mut [u8], use_offset: u32, label_offset: u32) {
        let delta = label_offset.wrapping_sub(use_offset) as i32;
        let mut insn = u32::from_le_bytes(buffer[0..4].try_into().unwrap());
        match self {
            LabelUse::Branch19 | LabelUse::Ldr19 => {
                debug_assert_eq!(delta & 3, 0);
                let imm19 = ((delta >> 2) as u32) & 0x7ffff;
                insn = (insn & !(0x7ffff << 5)) | (imm19 << 5);
            }
            LabelUse::Branch26 => {
                debug_assert_eq!(delta & 3, 0);
                let imm26 = ((delta >> 2) as u32) & 0x03ff_ffff;
                insn = (insn & !0x03ff_ffff) | imm26;
            }
            LabelUse::Adr21 => {
                let immlo = (delta as u32) & 3;
                let immhi = (((delta >> 2) as u32) & 0x7ffff) << 5;
                insn = (insn & !((3 << 29) | (0x7ffff << 5))) | (immlo << 29) | immhi;
            }
            LabelUse::PCRel32 => {
                insn = insn.wrapping_add(delta as u32);
            }
        }
        buffer[0..4].copy_from_slice(&insn.to_le_bytes());
    }

    fn supports_veneer(self) -> bool {
        matches!(self, LabelUse::Branch19)
    }

    fn veneer_size(self) -> u32 {
        4
    }

    fn generate_veneer(self, buffer: &mut [u8], _veneer_offset: u32) -> (u32, Self) {
        debug_assert!(self.supports_veneer());
        // An unconditional branch reaches ±128 MiB; the conditional use is
        // redirected through it.
        let b = enc_jump26(0b000101, 0);
        buffer[0..4].copy_from_slice(&b.to_le_bytes());
        (0, LabelUse::Branch26)
    }
}

//=============================================================================
// Instructions and subcomponents: emission

pub(crate) fn machreg_to_gpr(m: Reg) -> u32 {
    u32::from(m.to_real_reg().expect("real register expected").hw_enc() & 31)
}

pub(crate) fn machreg_to_vec(m: Reg) -> u32 {
    u32::from(m.to_real_reg().expect("real register expected").hw_enc())
}

fn enc_arith_rrr(bits_31_21: u32, bits_15_10: u32, rd: Writable<Reg>, rn: Reg, rm: Reg) -> u32 {
    (bits_31_21 << 21)
        | (bits_15_10 << 10)
        | machreg_to_gpr(rd.to_reg())
        | (machreg_to_gpr(rn) << 5)
        | (machreg_to_gpr(rm) << 16)
}

fn enc_arith_rr_imm12(
    top8: u32,
    shift12: u32,
    imm12: u32,
    rn: Reg,
    rd: Writable<Reg>,
) -> u32 {
    (top8 << 24)
        | (shift12 << 22)
        | (imm12 << 10)
        | (machreg_to_gpr(rn) << 5)
        | machreg_to_gpr(rd.to_reg())
}

fn enc_arith_rr_imml(top9: u32, imm_bits: u32, rn: Reg, rd: Writable<Reg>) -> u32 {
    (top9 << 23) | (imm_bits << 10) | (machreg_to_gpr(rn) << 5) | machreg_to_gpr(rd.to_reg())
}

fn enc_jump26(op_31_26: u32, off_26_0: u32) -> u32 {
    debug_assert!(off_26_0 < (1 << 26));
    (op_31_26 << 26) | off_26_0
}

fn enc_cmpbr(op_31_24: u32, off_18_0: u32, reg: Reg) -> u32 {
    debug_assert!(off_18_0 < (1 << 19));
    (op_31_24 << 24) | (off_18_0 << 5) | machreg_to_gpr(reg)
}

fn enc_cbr(op_31_24: u32, off_18_0: u32, op_4: u32, cond: u32) -> u32 {
    debug_assert!(off_18_0 < (1 << 19));
    debug_assert!(cond < (1 << 4));
    (op_31_24 << 24) | (off_18_0 << 5) | (op_4 << 4) | cond
}

fn enc_conditional_br(kind: CondBrKind, off_18_0: u32) -> u32 {
    match kind {
        CondBrKind::Zero(reg, size) => {
            enc_cmpbr(0b0011010_0 | (size.sf_bit() << 7), off_18_0, reg)
        }
        CondBrKind::NotZero(reg, size) => {
            enc_cmpbr(0b0011010_1 | (size.sf_bit() << 7), off_18_0, reg)
        }
        CondBrKind::Cond(c) => enc_cbr(0b01010100, off_18_0, 0b0, c.bits()),
    }
}

fn enc_move_wide(op: MoveWideOp, rd: Writable<Reg>, imm: MoveWideConst, size: OperandSize) -> u32 {
    debug_assert!(imm.shift <= 0b11);
    let op = match op {
        MoveWideOp::MovN => 0b00,
        MoveWideOp::MovZ => 0b10,
    };
    0x12800000
        | (size.sf_bit() << 31)
        | (op << 29)
        | (u32::from(imm.shift) << 21)
        | (u32::from(imm.bits) << 5)
        | machreg_to_gpr(rd.to_reg())
}

fn enc_movk(rd: Writable<Reg>, imm: MoveWideConst, size: OperandSize) -> u32 {
    debug_assert!(imm.shift <= 0b11);
    0x72800000
        | (size.sf_bit() << 31)
        | (u32::from(imm.shift) << 21)
        | (u32::from(imm.bits) << 5)
        | machreg_to_gpr(rd.to_reg())
}

/// Loads and stores: `size:V:opc` selects the access; the remaining fields
/// hold the addressing mode.
fn enc_ldst_uimm12(size: u32, v: u32, opc: u32, uimm12: &UImm12Scaled, rn: Reg, rt: u32) -> u32 {
    (size << 30)
        | (0b111 << 27)
        | (v << 26)
        | (0b01 << 24)
        | (opc << 22)
        | (uimm12.bits() << 10)
        | (machreg_to_gpr(rn) << 5)
        | rt
}

fn enc_ldst_simm9(size: u32, v: u32, opc: u32, simm9: &SImm9, rn: Reg, rt: u32) -> u32 {
    (size << 30)
        | (0b111 << 27)
        | (v << 26)
        | (opc << 22)
        | (simm9.bits() << 12)
        | (machreg_to_gpr(rn) << 5)
        | rt
}

fn enc_ldst_reg(
    size: u32,
    v: u32,
    opc: u32,
    rn: Reg,
    rm: Reg,
    scaled: bool,
    extendop: Option<ExtendOp>,
    rt: u32,
) -> u32 {
    let option = match extendop {
        Some(ExtendOp::UXTW) => 0b010,
        Some(ExtendOp::SXTW) => 0b110,
        Some(ExtendOp::SXTX) => 0b111,
        None | Some(ExtendOp::UXTX) => 0b011, // LSL
        _ => panic!("bad extend mode for ld/st address"),
    };
    (size << 30)
        | (0b111 << 27)
        | (v << 26)
        | (opc << 22)
        | (1 << 21)
        | (machreg_to_gpr(rm) << 16)
        | (option << 13)
        | ((scaled as u32) << 12)
        | (0b10 << 10)
        | (machreg_to_gpr(rn) << 5)
        | rt
}

fn enc_ldst_pair(load: bool, mode: u32, simm7: SImm7Scaled, rn: Reg, rt: u32, rt2: u32) -> u32 {
    (0b10 << 30)
        | (0b101 << 27)
        | (mode << 23)
        | ((load as u32) << 22)
        | (simm7.bits() << 15)
        | (rt2 << 10)
        | (machreg_to_gpr(rn) << 5)
        | rt
}

fn enc_ldst_imm19(opc_v: u32, imm19: u32, rt: u32) -> u32 {
    (opc_v << 24) | (imm19 << 5) | rt
}

fn enc_extend(signed: bool, size: OperandSize, immr: u32, imms: u32, rn: Reg, rd: Writable<Reg>) -> u32 {
    // SBFM (signed) / UBFM (unsigned).
    let opc = if signed { 0b00 } else { 0b10 };
    let n = size.sf_bit();
    (size.sf_bit() << 31)
        | (opc << 29)
        | (0b100110 << 23)
        | (n << 22)
        | (immr << 16)
        | (imms << 10)
        | (machreg_to_gpr(rn) << 5)
        | machreg_to_gpr(rd.to_reg())
}

fn enc_csel(rd: Writable<Reg>, rn: Reg, rm: Reg, cond: Cond, op_bit: u32) -> u32 {
    0x1A800000
        | (1 << 31)
        | (machreg_to_gpr(rm) << 16)
        | (cond.bits() << 12)
        | (op_bit << 10)
        | (machreg_to_gpr(rn) << 5)
        | machreg_to_gpr(rd.to_reg())
}

fn enc_ccmp(size: OperandSize, rn: Reg, rm: Reg, nzcv: NZCV, cond: Cond) -> u32 {
    0x7A400000
        | (size.sf_bit() << 31)
        | (machreg_to_gpr(rm) << 16)
        | (cond.bits() << 12)
        | (machreg_to_gpr(rn) << 5)
        | nzcv.bits()
}

fn enc_fpurr(top22: u32, rd: Writable<Reg>, rn: Reg) -> u32 {
    (top22 << 10) | (machreg_to_vec(rn) << 5) | machreg_to_vec(rd.to_reg())
}

fn enc_fpurrr(top11: u32, opcode_15_10: u32, rd: Writable<Reg>, rn: Reg, rm: Reg) -> u32 {
    (top11 << 21)
        | (machreg_to_vec(rm) << 16)
        | (opcode_15_10 << 10)
        | (machreg_to_vec(rn) << 5)
        | machreg_to_vec(rd.to_reg())
}

fn enc_fcmp(size: ScalarSize, rn: Reg, rm: Reg) -> u32 {
    0x1E202000 | (size.ftype() << 22) | (machreg_to_vec(rm) << 16) | (machreg_to_vec(rn) << 5)
}

fn enc_fcsel(rd: Writable<Reg>, rn: Reg, rm: Reg, cond: Cond, size: ScalarSize) -> u32 {
    0x1E200C00
        | (size.ftype() << 22)
        | (machreg_to_vec(rm) << 16)
        | (cond.bits() << 12)
        | (machreg_to_vec(rn) << 5)
        | machreg_to_vec(rd.to_reg())
}

fn enc_br(rn: Reg) -> u32 {
    0xD61F0000 | (machreg_to_gpr(rn) << 5)
}

fn enc_adr(rd: Writable<Reg>, off: i32) -> u32 {
    let immlo = (off as u32) & 3;
    let immhi = (((off >> 2) as u32) & 0x7ffff) << 5;
    0x10000000 | (immlo << 29) | immhi | machreg_to_gpr(rd.to_reg())
}

fn enc_adrp(rd: Writable<Reg>) -> u32 {
    0x90000000 | machreg_to_gpr(rd.to_reg())
}

fn ldst_size_bits(ty: Type) -> u32 {
    match ty.bits() {
        8 => 0b00,
        16 => 0b01,
        32 => 0b10,
        64 => 0b11,
        bits => panic!("unexpected access width {bits}"),
    }
}

/// Memory addressing mode finalization: convert frame-relative pseudo modes
/// into real addressing modes, possibly with a helper instruction sequence
/// that must be emitted immediately before the access. The helpers may use
/// the reserved scratch register x16.
pub fn mem_finalize(
    mem: &AMode,
    access_ty: Type,
    state: &EmitState,
) -> (smallvec::SmallVec<[Inst; 4]>, AMode) {
    match mem {
        &AMode::SPOffset(off)
        | &AMode::FPOffset(off)
        | &AMode::SlotOffset(off)
        | &AMode::StackSlotOffset(off)
        | &AMode::IncomingArg(off) => {
            let basereg = match mem {
                AMode::FPOffset(..) => fp_reg(),
                _ => stack_reg(),
            };
            let adj = match mem {
                AMode::SlotOffset(..) => i64::from(state.frame_layout.spill_base_offset()),
                AMode::StackSlotOffset(..) => i64::from(
                    state.frame_layout.spill_base_offset()
                        + state.frame_layout.spill_slots_size,
                ),
                AMode::IncomingArg(..) => i64::from(
                    state.frame_layout.frame_size_below_setup()
                        + state.frame_layout.setup_area_size,
                ),
                _ => 0,
            };
            let off = off + adj;

            if let Some(mode) = AMode::reg_maybe_offset(basereg, off, access_ty) {
                (smallvec::smallvec![], mode)
            } else {
                let tmp = writable_spilltmp_reg();
                let const_insts = Inst::load_constant(tmp, off as u64);
                (
                    const_insts,
                    AMode::RegReg(basereg, tmp.to_reg()),
                )
            }
        }
        _ => (smallvec::smallvec![], *mem),
    }
}

fn emit_ldst(
    sink: &mut MachBuffer<LabelUse>,
    state: &mut EmitState,
    mem: &AMode,
    access_ty: Type,
    size: u32,
    v: u32,
    opc: u32,
    rt: u32,
) {
    let (helper_insts, mem) = mem_finalize(mem, access_ty, state);
    for inst in helper_insts {
        inst.emit(sink, state);
    }
    match mem {
        AMode::Unscaled(rn, simm9) => {
            sink.put4(enc_ldst_simm9(size, v, opc, &simm9, rn, rt));
        }
        AMode::UnsignedOffset(rn, uimm12) => {
            sink.put4(enc_ldst_uimm12(size, v, opc, &uimm12, rn, rt));
        }
        AMode::RegReg(rn, rm) => {
            sink.put4(enc_ldst_reg(size, v, opc, rn, rm, false, None, rt));
        }
        AMode::RegScaled(rn, rm, _ty) => {
            sink.put4(enc_ldst_reg(size, v, opc, rn, rm, true, None, rt));
        }
        AMode::RegScaledExtended(rn, rm, _ty, extendop) => {
            sink.put4(enc_ldst_reg(size, v, opc, rn, rm, true, Some(extendop), rt));
        }
        AMode::Label(MemLabel::Mach(label)) => {
            // Load-literal; only the forms the constant pool uses.
            let opc_v = match (size, v) {
                (0b10, 0) => 0b000_11000, // ldr w, pc-rel
                (0b11, 0) => 0b010_11000, // ldr x, pc-rel
                (0b10, 1) => 0b000_11100, // ldr s, pc-rel
                (0b11, 1) => 0b010_11100, // ldr d, pc-rel
                (0b00, 1) => 0b100_11100, // ldr q, pc-rel
                _ => panic!("unsupported literal load"),
            };
            let offset = sink.cur_offset();
            sink.put4(enc_ldst_imm19(opc_v, 0, rt));
            sink.use_label_at_offset(offset, label, LabelUse::Ldr19);
        }
        AMode::SPOffset(..)
        | AMode::FPOffset(..)
        | AMode::SlotOffset(..)
        | AMode::StackSlotOffset(..)
        | AMode::IncomingArg(..) => unreachable!("finalized above"),
    }
}

impl MachInstEmit for Inst {
    type State = EmitState;

    fn emit(&self, sink: &mut MachBuffer<LabelUse>, state: &mut EmitState) {
        match self {
            Inst::Nop0 => {}

            Inst::AluRRR {
                alu_op,
                size,
                rd,
                rn,
                rm,
            } => {
                let sf = size.sf_bit();
                let word = match alu_op {
                    ALUOp::Add => enc_arith_rrr((sf << 10) | 0b0001011_000, 0, *rd, *rn, *rm),
                    ALUOp::Sub => enc_arith_rrr((sf << 10) | 0b1001011_000, 0, *rd, *rn, *rm),
                    ALUOp::AddS => enc_arith_rrr((sf << 10) | 0b0101011_000, 0, *rd, *rn, *rm),
                    ALUOp::SubS => enc_arith_rrr((sf << 10) | 0b1101011_000, 0, *rd, *rn, *rm),
                    ALUOp::Orr => enc_arith_rrr((sf << 10) | 0b0101010_000, 0, *rd, *rn, *rm),
                    ALUOp::OrrNot => {
                        enc_arith_rrr((sf << 10) | 0b0101010_001, 0, *rd, *rn, *rm)
                    }
                    ALUOp::And => enc_arith_rrr((sf << 10) | 0b0001010_000, 0, *rd, *rn, *rm),
                    ALUOp::AndNot => {
                        enc_arith_rrr((sf << 10) | 0b0001010_001, 0, *rd, *rn, *rm)
                    }
                    ALUOp::Eor => enc_arith_rrr((sf << 10) | 0b1001010_000, 0, *rd, *rn, *rm),
                    ALUOp::EorNot => {
                        enc_arith_rrr((sf << 10) | 0b1001010_001, 0, *rd, *rn, *rm)
                    }
                    ALUOp::SMulH => {
                        debug_assert!(!size.is32());
                        0x9B407C00
                            | (machreg_to_gpr(*rm) << 16)
                            | (machreg_to_gpr(*rn) << 5)
                            | machreg_to_gpr(rd.to_reg())
                    }
                    ALUOp::UMulH => {
                        debug_assert!(!size.is32());
                        0x9BC07C00
                            | (machreg_to_gpr(*rm) << 16)
                            | (machreg_to_gpr(*rn) << 5)
                            | machreg_to_gpr(rd.to_reg())
                    }
                    ALUOp::SDiv => {
                        0x1AC00C00
                            | (sf << 31)
                            | (machreg_to_gpr(*rm) << 16)
                            | (machreg_to_gpr(*rn) << 5)
                            | machreg_to_gpr(rd.to_reg())
                    }
                    ALUOp::UDiv => {
                        0x1AC00800
                            | (sf << 31)
                            | (machreg_to_gpr(*rm) << 16)
                            | (machreg_to_gpr(*rn) << 5)
                            | machreg_to_gpr(rd.to_reg())
                    }
                    ALUOp::Lsl | ALUOp::Lsr | ALUOp::Asr | ALUOp::RotR => {
                        let op2 = match alu_op {
                            ALUOp::Lsl => 0b00,
                            ALUOp::Lsr => 0b01,
                            ALUOp::Asr => 0b10,
                            ALUOp::RotR => 0b11,
                            _ => unreachable!(),
                        };
                        0x1AC02000
                            | (sf << 31)
                            | (machreg_to_gpr(*rm) << 16)
                            | (op2 << 10)
                            | (machreg_to_gpr(*rn) << 5)
                            | machreg_to_gpr(rd.to_reg())
                    }
                };
                sink.put4(word);
            }

            Inst::AluRRRR {
                alu_op,
                size,
                rd,
                rn,
                rm,
                ra,
            } => {
                let bit15 = match alu_op {
                    ALUOp3::MAdd => 0,
                    ALUOp3::MSub => 1,
                };
                sink.put4(
                    0x1B000000
                        | (size.sf_bit() << 31)
                        | (machreg_to_gpr(*rm) << 16)
                        | (bit15 << 15)
                        | (machreg_to_gpr(*ra) << 10)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(rd.to_reg()),
                );
            }

            Inst::AluRRImm12 {
                alu_op,
                size,
                rd,
                rn,
                imm12,
            } => {
                let top8 = match alu_op {
                    ALUOp::Add => 0b000_10001,
                    ALUOp::Sub => 0b010_10001,
                    ALUOp::AddS => 0b001_10001,
                    ALUOp::SubS => 0b011_10001,
                    _ => panic!("unsupported imm12 ALU op {alu_op:?}"),
                } | (size.sf_bit() << 7);
                sink.put4(enc_arith_rr_imm12(
                    top8,
                    imm12.shift_bits(),
                    imm12.imm_bits(),
                    *rn,
                    *rd,
                ));
            }

            Inst::AluRRImmLogic {
                alu_op,
                size,
                rd,
                rn,
                imml,
            } => {
                let top9 = match alu_op {
                    ALUOp::And => 0b000_100100,
                    ALUOp::Orr => 0b001_100100,
                    ALUOp::Eor => 0b010_100100,
                    _ => panic!("unsupported logical-imm ALU op {alu_op:?}"),
                } | (size.sf_bit() << 8);
                sink.put4(enc_arith_rr_imml(top9, imml.enc_bits(), *rn, *rd));
            }

            Inst::AluRRImmShift {
                alu_op,
                size,
                rd,
                rn,
                immshift,
            } => {
                let amt = u32::from(immshift.value());
                let bits = size.bits();
                debug_assert!(amt < bits);
                let word = match alu_op {
                    // Immediate shifts are bitfield-move aliases.
                    ALUOp::Lsl => enc_extend(
                        false,
                        *size,
                        (bits - amt) % bits,
                        bits - 1 - amt,
                        *rn,
                        *rd,
                    ),
                    ALUOp::Lsr => enc_extend(false, *size, amt, bits - 1, *rn, *rd),
                    ALUOp::Asr => enc_extend(true, *size, amt, bits - 1, *rn, *rd),
                    _ => panic!("unsupported imm-shift ALU op {alu_op:?}"),
                };
                sink.put4(word);
            }

            Inst::AluRRRShift {
                alu_op,
                size,
                rd,
                rn,
                rm,
                shiftop,
            } => {
                let sf = size.sf_bit();
                let top11: u32 = match alu_op {
                    ALUOp::Add => 0b0001011_000,
                    ALUOp::Sub => 0b1001011_000,
                    ALUOp::AddS => 0b0101011_000,
                    ALUOp::SubS => 0b1101011_000,
                    ALUOp::Orr => 0b0101010_000,
                    ALUOp::And => 0b0001010_000,
                    ALUOp::Eor => 0b1001010_000,
                    ALUOp::AndNot => 0b0001010_001,
                    _ => panic!("unsupported shifted-reg ALU op {alu_op:?}"),
                } | (sf << 10);
                let shift_field = (u32::from(shiftop.op().bits()) << 22)
                    | (u32::from(shiftop.amt()) << 10);
                sink.put4(
                    (top11 << 21)
                        | shift_field
                        | (machreg_to_gpr(*rm) << 16)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(rd.to_reg()),
                );
            }

            Inst::AluRRRExtend {
                alu_op,
                size,
                rd,
                rn,
                rm,
                extendop,
            } => {
                let top11: u32 = match alu_op {
                    ALUOp::Add => 0b0001011_001,
                    ALUOp::Sub => 0b1001011_001,
                    ALUOp::AddS => 0b0101011_001,
                    ALUOp::SubS => 0b1101011_001,
                    _ => panic!("unsupported extended-reg ALU op {alu_op:?}"),
                } | (size.sf_bit() << 10);
                sink.put4(
                    (top11 << 21)
                        | (machreg_to_gpr(*rm) << 16)
                        | (u32::from(extendop.bits()) << 13)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(rd.to_reg()),
                );
            }

            Inst::BitRR { op, size, rd, rn } => {
                let opcode = match op {
                    BitOp::RBit => 0b000000,
                    BitOp::Clz => 0b000100,
                    BitOp::Cls => 0b000101,
                };
                sink.put4(
                    0x5AC00000
                        | (size.sf_bit() << 31)
                        | (opcode << 10)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(rd.to_reg()),
                );
            }

            Inst::ULoad8 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I8, 0b00, 0, 0b01, machreg_to_gpr(rd.to_reg()))
            }
            Inst::SLoad8 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I8, 0b00, 0, 0b10, machreg_to_gpr(rd.to_reg()))
            }
            Inst::ULoad16 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I16, 0b01, 0, 0b01, machreg_to_gpr(rd.to_reg()))
            }
            Inst::SLoad16 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I16, 0b01, 0, 0b10, machreg_to_gpr(rd.to_reg()))
            }
            Inst::ULoad32 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I32, 0b10, 0, 0b01, machreg_to_gpr(rd.to_reg()))
            }
            Inst::SLoad32 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I32, 0b10, 0, 0b10, machreg_to_gpr(rd.to_reg()))
            }
            Inst::ULoad64 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I64, 0b11, 0, 0b01, machreg_to_gpr(rd.to_reg()))
            }
            Inst::Store8 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I8, 0b00, 0, 0b00, machreg_to_gpr(*rd))
            }
            Inst::Store16 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I16, 0b01, 0, 0b00, machreg_to_gpr(*rd))
            }
            Inst::Store32 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I32, 0b10, 0, 0b00, machreg_to_gpr(*rd))
            }
            Inst::Store64 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I64, 0b11, 0, 0b00, machreg_to_gpr(*rd))
            }
            Inst::FpuLoad32 { rd, mem } => {
                emit_ldst(sink, state, mem, types::F32, 0b10, 1, 0b01, machreg_to_vec(rd.to_reg()))
            }
            Inst::FpuLoad64 { rd, mem } => {
                emit_ldst(sink, state, mem, types::F64, 0b11, 1, 0b01, machreg_to_vec(rd.to_reg()))
            }
            Inst::FpuLoad128 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I8X16, 0b00, 1, 0b11, machreg_to_vec(rd.to_reg()))
            }
            Inst::FpuStore32 { rd, mem } => {
                emit_ldst(sink, state, mem, types::F32, 0b10, 1, 0b00, machreg_to_vec(*rd))
            }
            Inst::FpuStore64 { rd, mem } => {
                emit_ldst(sink, state, mem, types::F64, 0b11, 1, 0b00, machreg_to_vec(*rd))
            }
            Inst::FpuStore128 { rd, mem } => {
                emit_ldst(sink, state, mem, types::I8X16, 0b00, 1, 0b10, machreg_to_vec(*rd))
            }

            Inst::StoreP64 { rt, rt2, mem } => {
                let (mode, rn, simm7) = match mem {
                    PairAMode::SignedOffset(rn, simm7) => (0b010, *rn, *simm7),
                    PairAMode::SPPreIndexed(simm7) => (0b011, stack_reg(), *simm7),
                    PairAMode::SPPostIndexed(simm7) => (0b001, stack_reg(), *simm7),
                };
                sink.put4(enc_ldst_pair(
                    false,
                    mode,
                    simm7,
                    rn,
                    machreg_to_gpr(*rt),
                    machreg_to_gpr(*rt2),
                ));
            }
            Inst::LoadP64 { rt, rt2, mem } => {
                let (mode, rn, simm7) = match mem {
                    PairAMode::SignedOffset(rn, simm7) => (0b010, *rn, *simm7),
                    PairAMode::SPPreIndexed(simm7) => (0b011, stack_reg(), *simm7),
                    PairAMode::SPPostIndexed(simm7) => (0b001, stack_reg(), *simm7),
                };
                sink.put4(enc_ldst_pair(
                    true,
                    mode,
                    simm7,
                    rn,
                    machreg_to_gpr(rt.to_reg()),
                    machreg_to_gpr(rt2.to_reg()),
                ));
            }

            Inst::Mov { size, rd, rm } => {
                // MOV to or from SP is an ADD-immediate alias; otherwise ORR
                // with the zero register.
                let rd_is_sp = machreg_to_gpr(rd.to_reg()) == 31;
                let rm_is_sp = machreg_to_gpr(*rm) == 31;
                if rd_is_sp || rm_is_sp {
                    sink.put4(enc_arith_rr_imm12(
                        0b000_10001 | (size.sf_bit() << 7),
                        0,
                        0,
                        *rm,
                        *rd,
                    ));
                } else {
                    let sf = size.sf_bit();
                    sink.put4(
                        ((0b0101010_000 | (sf << 10)) << 21)
                            | (machreg_to_gpr(*rm) << 16)
                            | (31 << 5)
                            | machreg_to_gpr(rd.to_reg()),
                    );
                }
            }

            Inst::MovWide { op, rd, imm, size } => {
                sink.put4(enc_move_wide(*op, *rd, *imm, *size))
            }
            Inst::MovK { rd, imm, size } => sink.put4(enc_movk(*rd, *imm, *size)),

            Inst::Extend {
                rd,
                rn,
                signed,
                from_bits,
                to_bits,
            } => {
                let size = if *to_bits <= 32 {
                    OperandSize::Size32
                } else {
                    OperandSize::Size64
                };
                sink.put4(enc_extend(
                    *signed,
                    size,
                    0,
                    u32::from(*from_bits) - 1,
                    *rn,
                    *rd,
                ));
            }

            Inst::CSel { rd, cond, rn, rm } => {
                sink.put4(enc_csel(*rd, *rn, *rm, *cond, 0b00));
            }
            Inst::CSet { rd, cond } => {
                // CSINC rd, xzr, xzr, inv(cond).
                sink.put4(enc_csel(
                    *rd,
                    zero_reg(),
                    zero_reg(),
                    cond.invert(),
                    0b01,
                ));
            }
            Inst::CCmp {
                size,
                rn,
                rm,
                nzcv,
                cond,
            } => {
                sink.put4(enc_ccmp(*size, *rn, *rm, *nzcv, *cond));
            }

            Inst::FpuMove { size, rd, rn } => {
                // FMOV.
                sink.put4(enc_fpurr(
                    0b000_11110_00_1_000000_10000 | (size.ftype() << 12),
                    *rd,
                    *rn,
                ));
            }
            Inst::FpuMove128 { rd, rn } => {
                // MOV vd.16b, vn.16b (ORR).
                sink.put4(
                    0x4EA01C00
                        | (machreg_to_vec(*rn) << 16)
                        | (machreg_to_vec(*rn) << 5)
                        | machreg_to_vec(rd.to_reg()),
                );
            }
            Inst::FpuRR {
                fpu_op,
                size,
                rd,
                rn,
            } => {
                let top22_base: u32 = match fpu_op {
                    FPUOp1::Abs => 0b000_11110_00_1_000001_10000,
                    FPUOp1::Neg => 0b000_11110_00_1_000010_10000,
                    FPUOp1::Sqrt => 0b000_11110_00_1_000011_10000,
                    FPUOp1::Cvt32To64 => {
                        debug_assert_eq!(*size, ScalarSize::Size32);
                        0b000_11110_00_1_000101_10000
                    }
                    FPUOp1::Cvt64To32 => {
                        debug_assert_eq!(*size, ScalarSize::Size64);
                        0b000_11110_00_1_000100_10000
                    }
                };
                sink.put4(enc_fpurr(top22_base | (size.ftype() << 12), *rd, *rn));
            }
            Inst::FpuRRR {
                fpu_op,
                size,
                rd,
                rn,
                rm,
            } => {
                let opcode_15_10 = match fpu_op {
                    FPUOp2::Mul => 0b000010,
                    FPUOp2::Div => 0b000110,
                    FPUOp2::Add => 0b001010,
                    FPUOp2::Sub => 0b001110,
                    FPUOp2::Max => 0b010010,
                    FPUOp2::Min => 0b010110,
                };
                sink.put4(enc_fpurrr(
                    0b000_11110_00_1 | (size.ftype() << 1),
                    opcode_15_10,
                    *rd,
                    *rn,
                    *rm,
                ));
            }
            Inst::FpuRRRR {
                size,
                rd,
                rn,
                rm,
                ra,
            } => {
                // FMADD.
                sink.put4(
                    0x1F000000
                        | (size.ftype() << 22)
                        | (machreg_to_vec(*rm) << 16)
                        | (machreg_to_vec(*ra) << 10)
                        | (machreg_to_vec(*rn) << 5)
                        | machreg_to_vec(rd.to_reg()),
                );
            }
            Inst::FpuCmp { size, rn, rm } => sink.put4(enc_fcmp(*size, *rn, *rm)),
            Inst::FpuCSel {
                size,
                rd,
                cond,
                rn,
                rm,
            } => sink.put4(enc_fcsel(*rd, *rn, *rm, *cond, *size)),

            Inst::FpuToInt { op, rd, rn } => {
                let (sf, ftype, opcode) = match op {
                    FpuToIntOp::F32ToI32 => (0, 0b00, 0b000),
                    FpuToIntOp::F32ToU32 => (0, 0b00, 0b001),
                    FpuToIntOp::F32ToI64 => (1, 0b00, 0b000),
                    FpuToIntOp::F32ToU64 => (1, 0b00, 0b001),
                    FpuToIntOp::F64ToI32 => (0, 0b01, 0b000),
                    FpuToIntOp::F64ToU32 => (0, 0b01, 0b001),
                    FpuToIntOp::F64ToI64 => (1, 0b01, 0b000),
                    FpuToIntOp::F64ToU64 => (1, 0b01, 0b001),
                };
                // FCVTZ{S,U}: rmode = 0b11.
                sink.put4(
                    (sf << 31)
                        | (0b0011110 << 24)
                        | (ftype << 22)
                        | (1 << 21)
                        | (0b11 << 19)
                        | (opcode << 16)
                        | (machreg_to_vec(*rn) << 5)
                        | machreg_to_gpr(rd.to_reg()),
                );
            }
            Inst::IntToFpu { op, rd, rn } => {
                let (sf, ftype, opcode) = match op {
                    IntToFpuOp::I32ToF32 => (0, 0b00, 0b010),
                    IntToFpuOp::U32ToF32 => (0, 0b00, 0b011),
                    IntToFpuOp::I32ToF64 => (0, 0b01, 0b010),
                    IntToFpuOp::U32ToF64 => (0, 0b01, 0b011),
                    IntToFpuOp::I64ToF32 => (1, 0b00, 0b010),
                    IntToFpuOp::U64ToF32 => (1, 0b00, 0b011),
                    IntToFpuOp::I64ToF64 => (1, 0b01, 0b010),
                    IntToFpuOp::U64ToF64 => (1, 0b01, 0b011),
                };
                // SCVTF/UCVTF: rmode = 0b00.
                sink.put4(
                    (sf << 31)
                        | (0b0011110 << 24)
                        | (ftype << 22)
                        | (1 << 21)
                        | (opcode << 16)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_vec(rd.to_reg()),
                );
            }
            Inst::MovToFpu { size, rd, rn } => {
                let (sf, ftype) = match size {
                    ScalarSize::Size32 => (0, 0b00),
                    ScalarSize::Size64 => (1, 0b01),
                };
                // FMOV (general to scalar): rmode=00, opcode=111.
                sink.put4(
                    (sf << 31)
                        | (0b0011110 << 24)
                        | (ftype << 22)
                        | (1 << 21)
                        | (0b111 << 16)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_vec(rd.to_reg()),
                );
            }
            Inst::MovFromFpu { size, rd, rn } => {
                let (sf, ftype) = match size {
                    ScalarSize::Size32 => (0, 0b00),
                    ScalarSize::Size64 => (1, 0b01),
                };
                // FMOV (scalar to general): rmode=00, opcode=110.
                sink.put4(
                    (sf << 31)
                        | (0b0011110 << 24)
                        | (ftype << 22)
                        | (1 << 21)
                        | (0b110 << 16)
                        | (machreg_to_vec(*rn) << 5)
                        | machreg_to_gpr(rd.to_reg()),
                );
            }

            Inst::LoadFpuConst32 { rd, const_data } => {
                let label = sink.defer_constant(&const_data.to_le_bytes(), 4);
                let inst = Inst::FpuLoad32 {
                    rd: *rd,
                    mem: AMode::Label(MemLabel::Mach(label)),
                };
                inst.emit(sink, state);
            }
            Inst::LoadFpuConst64 { rd, const_data } => {
                let label = sink.defer_constant(&const_data.to_le_bytes(), 8);
                let inst = Inst::FpuLoad64 {
                    rd: *rd,
                    mem: AMode::Label(MemLabel::Mach(label)),
                };
                inst.emit(sink, state);
            }

            Inst::VecCnt { rd, rn } => {
                sink.put4(0x0E205800 | (machreg_to_vec(*rn) << 5) | machreg_to_vec(rd.to_reg()));
            }
            Inst::VecAddv { rd, rn } => {
                sink.put4(0x0E31B800 | (machreg_to_vec(*rn) << 5) | machreg_to_vec(rd.to_reg()));
            }

            Inst::AtomicRmwAl { op, ty, rs, rt, rn } => {
                use crate::ir::AtomicRmwOp;
                let size = ldst_size_bits(*ty);
                let (op_bits, bit15) = match op {
                    AtomicRmwOp::Add => (0b000, 0),
                    AtomicRmwOp::And => (0b001, 0), // LDCLR; operand pre-inverted
                    AtomicRmwOp::Xor => (0b010, 0),
                    AtomicRmwOp::Or => (0b011, 0),
                    AtomicRmwOp::Smax => (0b100, 0),
                    AtomicRmwOp::Smin => (0b101, 0),
                    AtomicRmwOp::Umax => (0b110, 0),
                    AtomicRmwOp::Umin => (0b111, 0),
                    AtomicRmwOp::Xchg => (0b000, 1), // SWPAL
                    op => panic!("{op} has no single-instruction LSE form"),
                };
                sink.put4(
                    0x38E00000
                        | (size << 30)
                        | (machreg_to_gpr(*rs) << 16)
                        | (bit15 << 15)
                        | (op_bits << 12)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(rt.to_reg()),
                );
            }

            Inst::AtomicRmwLoop {
                ty,
                op,
                addr,
                operand,
                oldval,
                scratch,
            } => {
                use crate::ir::AtomicRmwOp;
                let size = ldst_size_bits(*ty);
                let osize = if ty.bits() == 64 {
                    OperandSize::Size64
                } else {
                    OperandSize::Size32
                };
                // loop:
                //   ldaxr oldval, [addr]
                //   <op> scratch, oldval, operand
                //   stlxr w_scratch2?, scratch, [addr]   (status into scratch)
                //   cbnz status, loop
                //
                // The status register reuses `scratch` after its value has
                // been captured by the store.
                let loop_start = sink.cur_offset();
                sink.put4(
                    0x085FFC00
                        | (size << 30)
                        | (machreg_to_gpr(*addr) << 5)
                        | machreg_to_gpr(oldval.to_reg()),
                );
                // Combine.
                let combine = match op {
                    AtomicRmwOp::Add => Some(Inst::AluRRR {
                        alu_op: ALUOp::Add,
                        size: osize,
                        rd: *scratch,
                        rn: oldval.to_reg(),
                        rm: *operand,
                    }),
                    AtomicRmwOp::Sub => Some(Inst::AluRRR {
                        alu_op: ALUOp::Sub,
                        size: osize,
                        rd: *scratch,
                        rn: oldval.to_reg(),
                        rm: *operand,
                    }),
                    AtomicRmwOp::And => Some(Inst::AluRRR {
                        alu_op: ALUOp::And,
                        size: osize,
                        rd: *scratch,
                        rn: oldval.to_reg(),
                        rm: *operand,
                    }),
                    AtomicRmwOp::Or => Some(Inst::AluRRR {
                        alu_op: ALUOp::Orr,
                        size: osize,
                        rd: *scratch,
                        rn: oldval.to_reg(),
                        rm: *operand,
                    }),
                    AtomicRmwOp::Xor => Some(Inst::AluRRR {
                        alu_op: ALUOp::Eor,
                        size: osize,
                        rd: *scratch,
                        rn: oldval.to_reg(),
                        rm: *operand,
                    }),
                    AtomicRmwOp::Nand => None,
                    AtomicRmwOp::Xchg => None,
                    AtomicRmwOp::Smin
                    | AtomicRmwOp::Smax
                    | AtomicRmwOp::Umin
                    | AtomicRmwOp::Umax => None,
                };
                match (op, combine) {
                    (_, Some(inst)) => inst.emit(sink, state),
                    (AtomicRmwOp::Nand, None) => {
                        Inst::AluRRR {
                            alu_op: ALUOp::And,
                            size: osize,
                            rd: *scratch,
                            rn: oldval.to_reg(),
                            rm: *operand,
                        }
                        .emit(sink, state);
                        // ORN with zero: NOT.
                        Inst::AluRRR {
                            alu_op: ALUOp::OrrNot,
                            size: osize,
                            rd: *scratch,
                            rn: zero_reg(),
                            rm: scratch.to_reg(),
                        }
                        .emit(sink, state);
                    }
                    (AtomicRmwOp::Xchg, None) => {
                        Inst::Mov {
                            size: OperandSize::Size64,
                            rd: *scratch,
                            rm: *operand,
                        }
                        .emit(sink, state);
                    }
                    (min_max, None) => {
                        // cmp oldval, operand; csel scratch, oldval, operand, cond
                        let cond = match min_max {
                            AtomicRmwOp::Smin => Cond::Lt,
                            AtomicRmwOp::Smax => Cond::Gt,
                            AtomicRmwOp::Umin => Cond::Lo,
                            AtomicRmwOp::Umax => Cond::Hi,
                            _ => unreachable!(),
                        };
                        Inst::AluRRR {
                            alu_op: ALUOp::SubS,
                            size: osize,
                            rd: writable_zero_reg(),
                            rn: oldval.to_reg(),
                            rm: *operand,
                        }
                        .emit(sink, state);
                        Inst::CSel {
                            rd: *scratch,
                            cond,
                            rn: oldval.to_reg(),
                            rm: *operand,
                        }
                        .emit(sink, state);
                    }
                }
                // stlxr: status into the spill temporary (x16); it is
                // reserved and dead here.
                let status = spilltmp_reg();
                sink.put4(
                    0x0800FC00
                        | (size << 30)
                        | (machreg_to_gpr(status) << 16)
                        | (machreg_to_gpr(*addr) << 5)
                        | machreg_to_gpr(scratch.to_reg()),
                );
                // cbnz status, loop
                let off = loop_start.wrapping_sub(sink.cur_offset());
                sink.put4(enc_cmpbr(
                    0b1011010_1,
                    ((off as i32) >> 2) as u32 & 0x7ffff,
                    status,
                ));
            }

            Inst::AtomicCasAl { ty, rd, rt, rn } => {
                let size = ldst_size_bits(*ty);
                sink.put4(
                    0x08E0FC00
                        | (size << 30)
                        | (machreg_to_gpr(rd.to_reg()) << 16)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(*rt),
                );
            }

            Inst::AtomicCasLoop {
                ty,
                addr,
                expected,
                replacement,
                oldval,
                scratch,
            } => {
                let size = ldst_size_bits(*ty);
                let osize = if ty.bits() == 64 {
                    OperandSize::Size64
                } else {
                    OperandSize::Size32
                };
                // loop:
                //   ldaxr oldval, [addr]
                //   cmp oldval, expected
                //   b.ne done
                //   stlxr status, replacement, [addr]
                //   cbnz status, loop
                // done:
                let loop_start = sink.cur_offset();
                sink.put4(
                    0x085FFC00
                        | (size << 30)
                        | (machreg_to_gpr(*addr) << 5)
                        | machreg_to_gpr(oldval.to_reg()),
                );
                Inst::AluRRR {
                    alu_op: ALUOp::SubS,
                    size: osize,
                    rd: writable_zero_reg(),
                    rn: oldval.to_reg(),
                    rm: *expected,
                }
                .emit(sink, state);
                // b.ne +12 (past stlxr and cbnz).
                sink.put4(enc_cbr(0b01010100, 3, 0b0, Cond::Ne.bits()));
                let status = scratch;
                sink.put4(
                    0x0800FC00
                        | (size << 30)
                        | (machreg_to_gpr(status.to_reg()) << 16)
                        | (machreg_to_gpr(*addr) << 5)
                        | machreg_to_gpr(*replacement),
                );
                let off = loop_start.wrapping_sub(sink.cur_offset());
                sink.put4(enc_cmpbr(
                    0b1011010_1,
                    ((off as i32) >> 2) as u32 & 0x7ffff,
                    status.to_reg(),
                ));
            }

            Inst::LoadAcquire { ty, rt, rn } => {
                let size = ldst_size_bits(*ty);
                sink.put4(
                    0x08DFFC00
                        | (size << 30)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(rt.to_reg()),
                );
            }
            Inst::StoreRelease { ty, rt, rn } => {
                let size = ldst_size_bits(*ty);
                sink.put4(
                    0x089FFC00
                        | (size << 30)
                        | (machreg_to_gpr(*rn) << 5)
                        | machreg_to_gpr(*rt),
                );
            }
            Inst::Fence => {
                sink.put4(0xD5033BBF);
            }
            Inst::Csdb => {
                sink.put4(0xD503229F);
            }

            Inst::Ret { .. } => {
                sink.put4(0xD65F03C0);
            }

            Inst::Call { info } => {
                sink.add_reloc(Reloc::Call26, &info.dest, 0);
                sink.put4(enc_jump26(0b100101, 0));
                match info.try_call_handler {
                    Some(handler) => sink.add_try_call_site(handler),
                    None => sink.add_call_site(),
                }
            }
            Inst::CallInd { info } => {
                sink.put4(0xD63F0000 | (machreg_to_gpr(info.rn) << 5));
                sink.add_call_site();
            }
            Inst::ReturnCall { info } => {
                // The epilogue has run; transfer with a plain branch.
                sink.add_reloc(Reloc::Call26, &info.dest, 0);
                sink.put4(enc_jump26(0b000101, 0));
            }
            Inst::ReturnCallInd { info } => {
                sink.put4(enc_br(info.rn));
            }

            Inst::Jump { dest } => {
                let off = sink.cur_offset();
                sink.put4(enc_jump26(0b000101, 0));
                sink.use_label_at_offset(off, *dest, LabelUse::Branch26);
            }
            Inst::CondBr { target, kind } => {
                let off = sink.cur_offset();
                sink.put4(enc_conditional_br(*kind, 0));
                sink.use_label_at_offset(off, *target, LabelUse::Branch19);
            }
            Inst::IndirectBr { rn } => {
                sink.put4(enc_br(*rn));
            }
            Inst::JTSequence {
                ridx,
                rtmp1,
                rtmp2,
                targets,
            } => {
                // adr rtmp1, <table>    (four instructions ahead)
                sink.put4(enc_adr(*rtmp1, 16));
                // ldrsw rtmp2, [rtmp1, ridx, uxtw #2]
                sink.put4(
                    0xB8A05800
                        | (machreg_to_gpr(*ridx) << 16)
                        | (machreg_to_gpr(rtmp1.to_reg()) << 5)
                        | machreg_to_gpr(rtmp2.to_reg()),
                );
                // add rtmp1, rtmp1, rtmp2
                sink.put4(enc_arith_rrr(
                    (1 << 10) | 0b0001011_000,
                    0,
                    *rtmp1,
                    rtmp1.to_reg(),
                    rtmp2.to_reg(),
                ));
                // br rtmp1
                sink.put4(enc_br(rtmp1.to_reg()));
                // The table itself: 32-bit offsets relative to its base.
                let table_base = sink.cur_offset();
                for (i, target) in targets.iter().enumerate() {
                    let entry_off = sink.cur_offset();
                    let off_into_table = entry_off - table_base;
                    sink.put4(off_into_table);
                    // The patch adds (label - entry), producing
                    // (label - table_base) in the entry.
                    sink.use_label_at_offset(entry_off, *target, LabelUse::PCRel32);
                    let _ = i;
                }
            }

            Inst::Brk => {
                sink.put4(0xD4200000);
            }
            Inst::Udf { trap_code } => {
                sink.add_trap(*trap_code);
                sink.put4(0x00000000);
            }
            Inst::TrapIf { kind, trap_code } => {
                // Inverted branch over the trap word.
                sink.put4(enc_conditional_br(kind.invert(), 2));
                sink.add_trap(*trap_code);
                sink.put4(0x00000000);
            }

            Inst::LoadExtName {
                rd,
                name,
                offset,
                kind,
            } => match kind {
                SymbolLoadKind::Near => {
                    // adrp rd, sym ; add rd, rd, :lo12:sym
                    sink.add_reloc(Reloc::AdrpPage21, name, *offset);
                    sink.put4(enc_adrp(*rd));
                    sink.add_reloc(Reloc::AddLo12, name, *offset);
                    sink.put4(enc_arith_rr_imm12(
                        0b100_10001,
                        0,
                        0,
                        rd.to_reg(),
                        *rd,
                    ));
                }
                SymbolLoadKind::Got => {
                    // adrp rd, :got:sym ; ldr rd, [rd, :got_lo12:sym]
                    sink.add_reloc(Reloc::GotPage21, name, 0);
                    sink.put4(enc_adrp(*rd));
                    sink.add_reloc(Reloc::GotLo12, name, 0);
                    sink.put4(
                        0xF9400000
                            | (machreg_to_gpr(rd.to_reg()) << 5)
                            | machreg_to_gpr(rd.to_reg()),
                    );
                }
            },

            Inst::TlsDesc { rd, name } => {
                // The general-dynamic TLSDESC quartet, then the thread
                // pointer add. The sequence hardwires x0, which the
                // register allocator guaranteed through the fixed-def
                // constraint.
                debug_assert_eq!(machreg_to_gpr(rd.to_reg()), 0);
                sink.add_reloc(Reloc::TlsDescAdrPage21, name, 0);
                sink.put4(0x90000000); // adrp x0, ...
                sink.add_reloc(Reloc::TlsDescLdLo12, name, 0);
                sink.put4(0xF9400001); // ldr x1, [x0, ...]
                sink.add_reloc(Reloc::TlsDescAddLo12, name, 0);
                sink.put4(0x91000000); // add x0, x0, ...
                sink.add_reloc(Reloc::TlsDescCall, name, 0);
                sink.put4(0xD63F0020); // blr x1
                sink.put4(0xD53BD050); // mrs x16, tpidr_el0
                sink.put4(0x8B100000); // add x0, x0, x16
            }
            Inst::TlsLocalExec { rd, name } => {
                let rdg = machreg_to_gpr(rd.to_reg());
                // mrs rd, tpidr_el0 ; add rd, rd, :tprel_hi12: ;
                // add rd, rd, :tprel_lo12:
                sink.put4(0xD53BD040 | rdg);
                sink.add_reloc(Reloc::TlsLeAddHi12, name, 0);
                sink.put4(0x91400000 | (rdg << 5) | rdg);
                sink.add_reloc(Reloc::TlsLeAddLo12, name, 0);
                sink.put4(0x91000000 | (rdg << 5) | rdg);
            }

            Inst::LoadAddr { rd, mem } => {
                let (helper_insts, mem) = mem_finalize(mem, types::I64, state);
                for inst in helper_insts {
                    inst.emit(sink, state);
                }
                match mem {
                    AMode::UnsignedOffset(rn, uimm12) => {
                        sink.put4(enc_arith_rr_imm12(
                            0b100_10001,
                            0,
                            uimm12.bits(),
                            rn,
                            *rd,
                        ));
                    }
                    AMode::Unscaled(rn, simm9) => {
                        let v = i64::from(simm9.value);
                        if v >= 0 {
                            sink.put4(enc_arith_rr_imm12(
                                0b100_10001,
                                0,
                                v as u32,
                                rn,
                                *rd,
                            ));
                        } else {
                            sink.put4(enc_arith_rr_imm12(
                                0b110_10001,
                                0,
                                (-v) as u32,
                                rn,
                                *rd,
                            ));
                        }
                    }
                    AMode::RegReg(rn, rm) => {
                        sink.put4(enc_arith_rrr(
                            (1 << 10) | 0b0001011_000,
                            0,
                            *rd,
                            rn,
                            rm,
                        ));
                    }
                    other => panic!("unsupported address computation mode {other:?}"),
                }
            }

            Inst::StackProbeLoop { pages } => {
                // movz x16, #pages ; mov x17, sp ;
                // loop: sub x17, x17, #4096 ; str xzr, [x17] ;
                //       subs x16, x16, #1 ; b.ne loop
                Inst::MovWide {
                    op: MoveWideOp::MovZ,
                    rd: writable_spilltmp_reg(),
                    imm: MoveWideConst {
                        bits: *pages as u16,
                        shift: 0,
                    },
                    size: OperandSize::Size64,
                }
                .emit(sink, state);
                Inst::Mov {
                    size: OperandSize::Size64,
                    rd: writable_tmp2_reg(),
                    rm: stack_reg(),
                }
                .emit(sink, state);
                // sub x17, x17, #4096
                sink.put4(enc_arith_rr_imm12(
                    0b110_10001,
                    1,
                    1,
                    tmp2_reg(),
                    writable_tmp2_reg(),
                ));
                // str xzr, [x17]
                sink.put4(enc_ldst_uimm12(
                    0b11,
                    0,
                    0b00,
                    &UImm12Scaled::zero(types::I64),
                    tmp2_reg(),
                    31,
                ));
                // subs x16, x16, #1
                sink.put4(enc_arith_rr_imm12(
                    0b111_10001,
                    0,
                    1,
                    spilltmp_reg(),
                    writable_spilltmp_reg(),
                ));
                // b.ne loop (back 12 bytes)
                sink.put4(enc_cbr(
                    0b01010100,
                    ((-12i32 >> 2) as u32) & 0x7ffff,
                    0b0,
                    Cond::Ne.bits(),
                ));
            }
        }
    }
}
