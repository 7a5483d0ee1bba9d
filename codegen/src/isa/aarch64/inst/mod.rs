//! This module defines aarch64-specific machine instruction types.

use crate::ir::{ExternalName, TrapCode, Type, types};
use crate::machinst::{
    MachInst, MachLabel, MachTerminator, OperandCollector, RealReg, RealRegSet, Reg, RegClass,
    Writable,
};
use crate::result::{CodegenError, CodegenResult};
use smallvec::{smallvec, SmallVec};

pub mod args;
pub mod emit;
pub mod imms;
pub mod regs;

#[cfg(test)]
mod emit_tests;

pub use args::*;
pub use emit::{EmitState, LabelUse};
pub use imms::*;
pub use regs::*;

//=============================================================================
// Instructions (top level): definition

/// An ALU operation. This can be paired with several instruction formats
/// below (see `Inst`) in any combination.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ALUOp {
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Bitwise or.
    Orr,
    /// Bitwise or-not.
    OrrNot,
    /// Bitwise and.
    And,
    /// Bitwise and-not (BIC).
    AndNot,
    /// Bitwise xor.
    Eor,
    /// Bitwise xor-not (EON).
    EorNot,
    /// Add, setting flags.
    AddS,
    /// Subtract, setting flags (CMP when the destination is the zero
    /// register).
    SubS,
    /// Signed multiply, high-word result.
    SMulH,
    /// Unsigned multiply, high-word result.
    UMulH,
    /// Signed divide.
    SDiv,
    /// Unsigned divide.
    UDiv,
    /// Logical shift left (variable).
    Lsl,
    /// Logical shift right (variable).
    Lsr,
    /// Arithmetic shift right (variable).
    Asr,
    /// Rotate right (variable).
    RotR,
}

/// A three-source ALU operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ALUOp3 {
    /// Multiply-add: rd = ra + rn * rm.
    MAdd,
    /// Multiply-subtract: rd = ra - rn * rm.
    MSub,
}

/// An operation on the bits of a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitOp {
    /// Bit reverse.
    RBit,
    /// Count leading zeroes.
    Clz,
    /// Count leading sign bits.
    Cls,
}

/// A move-wide operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MoveWideOp {
    /// MOVZ: zero the register, insert the shifted 16-bit chunk.
    MovZ,
    /// MOVN: set the register to ones, insert the complemented chunk.
    MovN,
}

/// A 1-argument floating point unit operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FPUOp1 {
    /// Absolute value.
    Abs,
    /// Negate.
    Neg,
    /// Square root.
    Sqrt,
    /// Convert f32 to f64.
    Cvt32To64,
    /// Convert f64 to f32.
    Cvt64To32,
}

/// A 2-argument floating point unit operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FPUOp2 {
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Multiply.
    Mul,
    /// Divide.
    Div,
    /// IEEE maximum.
    Max,
    /// IEEE minimum.
    Min,
}

/// A conversion from a float to an integer value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FpuToIntOp {
    /// f32 to signed 32-bit.
    F32ToI32,
    /// f32 to unsigned 32-bit.
    F32ToU32,
    /// f32 to signed 64-bit.
    F32ToI64,
    /// f32 to unsigned 64-bit.
    F32ToU64,
    /// f64 to signed 32-bit.
    F64ToI32,
    /// f64 to unsigned 32-bit.
    F64ToU32,
    /// f64 to signed 64-bit.
    F64ToI64,
    /// f64 to unsigned 64-bit.
    F64ToU64,
}

/// A conversion from an integer to a float value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntToFpuOp {
    /// Signed 32-bit to f32.
    I32ToF32,
    /// Unsigned 32-bit to f32.
    U32ToF32,
    /// Signed 32-bit to f64.
    I32ToF64,
    /// Unsigned 32-bit to f64.
    U32ToF64,
    /// Signed 64-bit to f32.
    I64ToF32,
    /// Unsigned 64-bit to f32.
    U64ToF32,
    /// Signed 64-bit to f64.
    I64ToF64,
    /// Unsigned 64-bit to f64.
    U64ToF64,
}

/// How a symbol's address is materialized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolLoadKind {
    /// `adrp` + `add`: the symbol links within ±4 GiB (non-PIC or
    /// colocated).
    Near,
    /// `adrp` + `ldr` through the global offset table (PIC).
    Got,
}

/// Additional information for (direct) `Call` instructions, left out of
/// line to keep the size of the `Inst` enum down.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// The call destination.
    pub dest: ExternalName,
    /// Argument registers read by the call (fixed, real).
    pub uses: Vec<Reg>,
    /// Return-value registers written by the call (fixed, real).
    pub defs: Vec<Writable<Reg>>,
    /// Caller-saved registers the callee may overwrite.
    pub clobbers: RealRegSet,
    /// The exception landing pad, for exception-bearing calls.
    pub try_call_handler: Option<MachLabel>,
}

/// A return value binding carried by the `Ret` pseudo-instruction: the
/// virtual register holding the value and the real register the calling
/// convention assigns it. The register allocator honors the pair as a
/// fixed-use constraint.
#[derive(Clone, Copy, Debug)]
pub struct RetPair {
    /// The value's register.
    pub vreg: Reg,
    /// The ABI-required location.
    pub preg: RealReg,
}

/// Additional information for `CallInd` instructions.
#[derive(Clone, Debug)]
pub struct CallIndInfo {
    /// Register holding the callee address.
    pub rn: Reg,
    /// Argument registers read by the call.
    pub uses: Vec<Reg>,
    /// Return-value registers written by the call.
    pub defs: Vec<Writable<Reg>>,
    /// Caller-saved registers the callee may overwrite.
    pub clobbers: RealRegSet,
}

/// Instruction formats.
#[derive(Clone, Debug)]
pub enum Inst {
    /// A no-op of zero size.
    Nop0,

    /// An ALU operation with two register sources and a register
    /// destination.
    AluRRR {
        alu_op: ALUOp,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
        rm: Reg,
    },
    /// An ALU operation with three register sources and a register
    /// destination.
    AluRRRR {
        alu_op: ALUOp3,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
        rm: Reg,
        ra: Reg,
    },
    /// An ALU operation with a register source and an immediate-12 source,
    /// and a register destination.
    AluRRImm12 {
        alu_op: ALUOp,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
        imm12: Imm12,
    },
    /// An ALU operation with a register source and a logical immediate.
    AluRRImmLogic {
        alu_op: ALUOp,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
        imml: ImmLogic,
    },
    /// A shift by a constant amount.
    AluRRImmShift {
        alu_op: ALUOp,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
        immshift: ImmShift,
    },
    /// An ALU operation with two register sources, one shifted.
    AluRRRShift {
        alu_op: ALUOp,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
        rm: Reg,
        shiftop: ShiftOpAndAmt,
    },
    /// An ALU operation with two register sources, one extended.
    AluRRRExtend {
        alu_op: ALUOp,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
        rm: Reg,
        extendop: ExtendOp,
    },

    /// A bit operation with a single register source.
    BitRR {
        op: BitOp,
        size: OperandSize,
        rd: Writable<Reg>,
        rn: Reg,
    },

    /// An unsigned (zero-extending) 8-bit load.
    ULoad8 { rd: Writable<Reg>, mem: AMode },
    /// A signed (sign-extending) 8-bit load.
    SLoad8 { rd: Writable<Reg>, mem: AMode },
    /// An unsigned (zero-extending) 16-bit load.
    ULoad16 { rd: Writable<Reg>, mem: AMode },
    /// A signed (sign-extending) 16-bit load.
    SLoad16 { rd: Writable<Reg>, mem: AMode },
    /// An unsigned (zero-extending) 32-bit load.
    ULoad32 { rd: Writable<Reg>, mem: AMode },
    /// A signed (sign-extending) 32-bit load.
    SLoad32 { rd: Writable<Reg>, mem: AMode },
    /// A 64-bit load.
    ULoad64 { rd: Writable<Reg>, mem: AMode },

    /// An 8-bit store.
    Store8 { rd: Reg, mem: AMode },
    /// A 16-bit store.
    Store16 { rd: Reg, mem: AMode },
    /// A 32-bit store.
    Store32 { rd: Reg, mem: AMode },
    /// A 64-bit store.
    Store64 { rd: Reg, mem: AMode },

    /// A store of a pair of registers (prologue/epilogue only).
    StoreP64 {
        rt: Reg,
        rt2: Reg,
        mem: PairAMode,
    },
    /// A load of a pair of registers (prologue/epilogue only).
    LoadP64 {
        rt: Writable<Reg>,
        rt2: Writable<Reg>,
        mem: PairAMode,
    },

    /// A MOV instruction. These are encoded as ORR (or ADD with SP
    /// involved), but are kept separate at this level for better
    /// `is_move` detection.
    Mov {
        size: OperandSize,
        rd: Writable<Reg>,
        rm: Reg,
    },

    /// A MOVZ or MOVN with a 16-bit immediate.
    MovWide {
        op: MoveWideOp,
        rd: Writable<Reg>,
        imm: MoveWideConst,
        size: OperandSize,
    },

    /// A MOVK: keep the rest of the register, insert a 16-bit chunk.
    MovK {
        rd: Writable<Reg>,
        imm: MoveWideConst,
        size: OperandSize,
    },

    /// A sign- or zero-extend operation.
    Extend {
        rd: Writable<Reg>,
        rn: Reg,
        signed: bool,
        from_bits: u8,
        to_bits: u8,
    },

    /// A conditional-select operation.
    CSel {
        rd: Writable<Reg>,
        cond: Cond,
        rn: Reg,
        rm: Reg,
    },

    /// A conditional-set operation (materialize a flag as 0/1).
    CSet { rd: Writable<Reg>, cond: Cond },

    /// A conditional comparison, for fusing chained conditions.
    CCmp {
        size: OperandSize,
        rn: Reg,
        rm: Reg,
        nzcv: NZCV,
        cond: Cond,
    },

    /// FPU move, 32 or 64 bits.
    FpuMove {
        size: ScalarSize,
        rd: Writable<Reg>,
        rn: Reg,
    },
    /// Full vector-register move.
    FpuMove128 { rd: Writable<Reg>, rn: Reg },

    /// A 1-op FPU instruction.
    FpuRR {
        fpu_op: FPUOp1,
        size: ScalarSize,
        rd: Writable<Reg>,
        rn: Reg,
    },

    /// A 2-op FPU instruction.
    FpuRRR {
        fpu_op: FPUOp2,
        size: ScalarSize,
        rd: Writable<Reg>,
        rn: Reg,
        rm: Reg,
    },

    /// A fused multiply-add.
    FpuRRRR {
        size: ScalarSize,
        rd: Writable<Reg>,
        rn: Reg,
        rm: Reg,
        ra: Reg,
    },

    /// A float comparison, setting NZCV.
    FpuCmp {
        size: ScalarSize,
        rn: Reg,
        rm: Reg,
    },

    /// A conditional select on float registers.
    FpuCSel {
        size: ScalarSize,
        rd: Writable<Reg>,
        cond: Cond,
        rn: Reg,
        rm: Reg,
    },

    /// A float-to-integer conversion, trapping semantics handled by
    /// preceding compare/trap instructions.
    FpuToInt {
        op: FpuToIntOp,
        rd: Writable<Reg>,
        rn: Reg,
    },

    /// An integer-to-float conversion.
    IntToFpu {
        op: IntToFpuOp,
        rd: Writable<Reg>,
        rn: Reg,
    },

    /// Move from an integer register into a float register.
    MovToFpu {
        size: ScalarSize,
        rd: Writable<Reg>,
        rn: Reg,
    },

    /// Move from a float register into an integer register.
    MovFromFpu {
        size: ScalarSize,
        rd: Writable<Reg>,
        rn: Reg,
    },

    /// A 32-bit float load.
    FpuLoad32 { rd: Writable<Reg>, mem: AMode },
    /// A 64-bit float load.
    FpuLoad64 { rd: Writable<Reg>, mem: AMode },
    /// A 128-bit vector load.
    FpuLoad128 { rd: Writable<Reg>, mem: AMode },
    /// A 32-bit float store.
    FpuStore32 { rd: Reg, mem: AMode },
    /// A 64-bit float store.
    FpuStore64 { rd: Reg, mem: AMode },
    /// A 128-bit vector store.
    FpuStore128 { rd: Reg, mem: AMode },

    /// A load of a 32-bit float constant from the literal pool.
    LoadFpuConst32 {
        rd: Writable<Reg>,
        const_data: u32,
    },
    /// A load of a 64-bit float constant from the literal pool.
    LoadFpuConst64 {
        rd: Writable<Reg>,
        const_data: u64,
    },

    /// Population count per byte lane: `cnt v.8b`.
    VecCnt { rd: Writable<Reg>, rn: Reg },
    /// Sum across byte lanes: `addv b, v.8b`.
    VecAddv { rd: Writable<Reg>, rn: Reg },

    /// A large-system-extension atomic read-modify-write.
    AtomicRmwAl {
        op: crate::ir::AtomicRmwOp,
        ty: Type,
        rs: Reg,
        rt: Writable<Reg>,
        rn: Reg,
    },
    /// A load-linked/store-conditional atomic read-modify-write loop.
    AtomicRmwLoop {
        ty: Type,
        op: crate::ir::AtomicRmwOp,
        addr: Reg,
        operand: Reg,
        oldval: Writable<Reg>,
        scratch: Writable<Reg>,
    },
    /// A large-system-extension compare-and-swap. `rd` carries the
    /// expected value in and the observed value out.
    AtomicCasAl {
        ty: Type,
        rd: Writable<Reg>,
        rt: Reg,
        rn: Reg,
    },
    /// A load-linked/store-conditional compare-and-swap loop.
    AtomicCasLoop {
        ty: Type,
        addr: Reg,
        expected: Reg,
        replacement: Reg,
        oldval: Writable<Reg>,
        scratch: Writable<Reg>,
    },
    /// An atomic load with acquire semantics.
    LoadAcquire {
        ty: Type,
        rt: Writable<Reg>,
        rn: Reg,
    },
    /// An atomic store with release semantics.
    StoreRelease { ty: Type, rt: Reg, rn: Reg },
    /// A full memory barrier: `dmb ish`.
    Fence,
    /// A speculation barrier: `csdb`.
    Csdb,

    /// A machine return; expands with the epilogue at emission. Carries
    /// the return-value bindings so the values stay live up to the return
    /// and land in their convention-assigned registers.
    Ret { rets: Vec<RetPair> },
    /// A machine call instruction.
    Call { info: Box<CallInfo> },
    /// A machine indirect-call instruction.
    CallInd { info: Box<CallIndInfo> },
    /// A tail call to a directly-named target: epilogue then `b`.
    ReturnCall { info: Box<CallInfo> },
    /// A tail call through a register: epilogue then `br`.
    ReturnCallInd { info: Box<CallIndInfo> },

    /// An unconditional branch.
    Jump { dest: MachLabel },
    /// A one-way conditional branch: falls through when not taken.
    CondBr {
        target: MachLabel,
        kind: CondBrKind,
    },
    /// An indirect branch through a register.
    IndirectBr { rn: Reg },
    /// A dispatch through an inline jump table: address computation,
    /// entry load, add, branch, then the table itself. The index must
    /// already be bounds-checked (and clamped, under the Spectre
    /// mitigation).
    JTSequence {
        ridx: Reg,
        rtmp1: Writable<Reg>,
        rtmp2: Writable<Reg>,
        targets: Box<Vec<MachLabel>>,
    },

    /// A breakpoint trap: `brk #0`.
    Brk,
    /// An unconditional trap: `udf`.
    Udf { trap_code: TrapCode },
    /// A conditional trap: a branch around a `udf`.
    TrapIf {
        kind: CondBrKind,
        trap_code: TrapCode,
    },

    /// Materialize the address of a symbol.
    LoadExtName {
        rd: Writable<Reg>,
        name: Box<ExternalName>,
        offset: i64,
        kind: SymbolLoadKind,
    },
    /// Materialize a general-dynamic TLS address through the TLSDESC
    /// protocol. The destination is constrained to x0 (where the resolver
    /// leaves its result); x1 and the link register are clobbered.
    TlsDesc {
        rd: Writable<Reg>,
        name: Box<ExternalName>,
    },
    /// Materialize a local-exec TLS address: thread pointer plus offset.
    TlsLocalExec {
        rd: Writable<Reg>,
        name: Box<ExternalName>,
    },

    /// Compute the address of an `AMode` into a register.
    LoadAddr { rd: Writable<Reg>, mem: AMode },

    /// Touch every guard page of a large frame (prologue only).
    StackProbeLoop { pages: u32 },
}

fn memarg_operands(mem: &AMode, collector: &mut OperandCollector) {
    match mem {
        AMode::Label(..) => {}
        AMode::Unscaled(rn, ..) | AMode::UnsignedOffset(rn, ..) => collector.reg_use(*rn),
        AMode::RegReg(rn, rm)
        | AMode::RegScaled(rn, rm, ..)
        | AMode::RegScaledExtended(rn, rm, ..) => {
            collector.reg_use(*rn);
            collector.reg_use(*rm);
        }
        AMode::SPOffset(..)
        | AMode::FPOffset(..)
        | AMode::SlotOffset(..)
        | AMode::StackSlotOffset(..)
        | AMode::IncomingArg(..) => {}
    }
}

fn memarg_map_regs(mem: &mut AMode, map: &mut dyn FnMut(Reg) -> Reg) {
    match mem {
        AMode::Label(..) => {}
        AMode::Unscaled(rn, ..) | AMode::UnsignedOffset(rn, ..) => *rn = map(*rn),
        AMode::RegReg(rn, rm)
        | AMode::RegScaled(rn, rm, ..)
        | AMode::RegScaledExtended(rn, rm, ..) => {
            *rn = map(*rn);
            *rm = map(*rm);
        }
        AMode::SPOffset(..)
        | AMode::FPOffset(..)
        | AMode::SlotOffset(..)
        | AMode::StackSlotOffset(..)
        | AMode::IncomingArg(..) => {}
    }
}

impl Inst {
    /// Generic constructor for a load of `ty` from `mem`.
    pub fn gen_load(into_reg: Writable<Reg>, mem: AMode, ty: Type) -> Inst {
        match ty {
            types::I8 => Inst::ULoad8 { rd: into_reg, mem },
            types::I16 => Inst::ULoad16 { rd: into_reg, mem },
            types::I32 => Inst::ULoad32 { rd: into_reg, mem },
            types::I64 => Inst::ULoad64 { rd: into_reg, mem },
            types::F32 => Inst::FpuLoad32 { rd: into_reg, mem },
            types::F64 => Inst::FpuLoad64 { rd: into_reg, mem },
            _ if ty.is_vector() => Inst::FpuLoad128 { rd: into_reg, mem },
            _ => panic!("unsupported load type: {ty}"),
        }
    }

    /// Generic constructor for a store of `ty` to `mem`.
    pub fn gen_store(mem: AMode, from_reg: Reg, ty: Type) -> Inst {
        match ty {
            types::I8 => Inst::Store8 { rd: from_reg, mem },
            types::I16 => Inst::Store16 { rd: from_reg, mem },
            types::I32 => Inst::Store32 { rd: from_reg, mem },
            types::I64 => Inst::Store64 { rd: from_reg, mem },
            types::F32 => Inst::FpuStore32 { rd: from_reg, mem },
            types::F64 => Inst::FpuStore64 { rd: from_reg, mem },
            _ if ty.is_vector() => Inst::FpuStore128 { rd: from_reg, mem },
            _ => panic!("unsupported store type: {ty}"),
        }
    }

    /// Create instructions that load a 64-bit constant, using one `movz` or
    /// `movn` and up to three `movk`s.
    pub fn load_constant(rd: Writable<Reg>, value: u64) -> SmallVec<[Inst; 4]> {
        // Prefer the encoding with the fewest instructions: count how many
        // half-words are zeroes vs ones.
        let zero_halves = (0..4).filter(|i| (value >> (16 * i)) & 0xffff == 0).count();
        let ones_halves = (0..4)
            .filter(|i| (value >> (16 * i)) & 0xffff == 0xffff)
            .count();

        let mut insts = SmallVec::new();
        if ones_halves > zero_halves {
            // Build from all-ones with MOVN.
            let mut first = true;
            for shift in 0..4u8 {
                let chunk = ((value >> (16 * shift)) & 0xffff) as u16;
                if chunk == 0xffff {
                    continue;
                }
                if first {
                    insts.push(Inst::MovWide {
                        op: MoveWideOp::MovN,
                        rd,
                        imm: MoveWideConst {
                            bits: !chunk,
                            shift,
                        },
                        size: OperandSize::Size64,
                    });
                    first = false;
                } else {
                    insts.push(Inst::MovK {
                        rd,
                        imm: MoveWideConst { bits: chunk, shift },
                        size: OperandSize::Size64,
                    });
                }
            }
            if first {
                // All halves are ones: value == u64::MAX.
                insts.push(Inst::MovWide {
                    op: MoveWideOp::MovN,
                    rd,
                    imm: MoveWideConst::zero(),
                    size: OperandSize::Size64,
                });
            }
        } else {
            let mut first = true;
            for shift in 0..4u8 {
                let chunk = ((value >> (16 * shift)) & 0xffff) as u16;
                if chunk == 0 {
                    continue;
                }
                if first {
                    insts.push(Inst::MovWide {
                        op: MoveWideOp::MovZ,
                        rd,
                        imm: MoveWideConst { bits: chunk, shift },
                        size: OperandSize::Size64,
                    });
                    first = false;
                } else {
                    insts.push(Inst::MovK {
                        rd,
                        imm: MoveWideConst { bits: chunk, shift },
                        size: OperandSize::Size64,
                    });
                }
            }
            if first {
                // Zero.
                insts.push(Inst::MovWide {
                    op: MoveWideOp::MovZ,
                    rd,
                    imm: MoveWideConst::zero(),
                    size: OperandSize::Size64,
                });
            }
        }
        insts
    }
}

impl MachInst for Inst {
    type LabelUse = LabelUse;

    fn get_operands(&self, collector: &mut OperandCollector) {
        match self {
            Inst::Nop0
            | Inst::Fence
            | Inst::Csdb
            | Inst::Brk
            | Inst::Udf { .. }
            | Inst::Jump { .. } => {}
            Inst::AluRRR { rd, rn, rm, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
                collector.reg_use(*rm);
            }
            Inst::AluRRRR { rd, rn, rm, ra, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
                collector.reg_use(*rm);
                collector.reg_use(*ra);
            }
            Inst::AluRRImm12 { rd, rn, .. }
            | Inst::AluRRImmLogic { rd, rn, .. }
            | Inst::AluRRImmShift { rd, rn, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
            }
            Inst::AluRRRShift { rd, rn, rm, .. } | Inst::AluRRRExtend { rd, rn, rm, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
                collector.reg_use(*rm);
            }
            Inst::BitRR { rd, rn, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
            }
            Inst::ULoad8 { rd, mem }
            | Inst::SLoad8 { rd, mem }
            | Inst::ULoad16 { rd, mem }
            | Inst::SLoad16 { rd, mem }
            | Inst::ULoad32 { rd, mem }
            | Inst::SLoad32 { rd, mem }
            | Inst::ULoad64 { rd, mem }
            | Inst::FpuLoad32 { rd, mem }
            | Inst::FpuLoad64 { rd, mem }
            | Inst::FpuLoad128 { rd, mem } => {
                collector.reg_def(*rd);
                memarg_operands(mem, collector);
            }
            Inst::Store8 { rd, mem }
            | Inst::Store16 { rd, mem }
            | Inst::Store32 { rd, mem }
            | Inst::Store64 { rd, mem }
            | Inst::FpuStore32 { rd, mem }
            | Inst::FpuStore64 { rd, mem }
            | Inst::FpuStore128 { rd, mem } => {
                collector.reg_use(*rd);
                memarg_operands(mem, collector);
            }
            Inst::StoreP64 { rt, rt2, .. } => {
                collector.reg_use(*rt);
                collector.reg_use(*rt2);
            }
            Inst::LoadP64 { rt, rt2, .. } => {
                collector.reg_def(*rt);
                collector.reg_def(*rt2);
            }
            Inst::Mov { rd, rm, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rm);
            }
            Inst::MovWide { rd, .. } => collector.reg_def(*rd),
            Inst::MovK { rd, .. } => {
                // movk reads and writes its destination: a two-address
                // constraint.
                collector.reg_use(rd.to_reg());
                collector.reg_reuse_def(*rd, 0);
            }
            Inst::Extend { rd, rn, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
            }
            Inst::CSel { rd, rn, rm, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
                collector.reg_use(*rm);
            }
            Inst::CSet { rd, .. } => collector.reg_def(*rd),
            Inst::CCmp { rn, rm, .. } => {
                collector.reg_use(*rn);
                collector.reg_use(*rm);
            }
            Inst::FpuMove { rd, rn, .. }
            | Inst::FpuMove128 { rd, rn }
            | Inst::FpuRR { rd, rn, .. }
            | Inst::MovToFpu { rd, rn, .. }
            | Inst::MovFromFpu { rd, rn, .. }
            | Inst::FpuToInt { rd, rn, .. }
            | Inst::IntToFpu { rd, rn, .. }
            | Inst::VecCnt { rd, rn }
            | Inst::VecAddv { rd, rn } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
            }
            Inst::FpuRRR { rd, rn, rm, .. } | Inst::FpuCSel { rd, rn, rm, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
                collector.reg_use(*rm);
            }
            Inst::FpuRRRR { rd, rn, rm, ra, .. } => {
                collector.reg_def(*rd);
                collector.reg_use(*rn);
                collector.reg_use(*rm);
                collector.reg_use(*ra);
            }
            Inst::FpuCmp { rn, rm, .. } => {
                collector.reg_use(*rn);
                collector.reg_use(*rm);
            }
            Inst::LoadFpuConst32 { rd, .. } | Inst::LoadFpuConst64 { rd, .. } => {
                collector.reg_def(*rd)
            }
            Inst::AtomicRmwAl { rs, rt, rn, .. } => {
                collector.reg_use(*rs);
                collector.reg_def(*rt);
                collector.reg_use(*rn);
            }
            Inst::AtomicRmwLoop {
                addr,
                operand,
                oldval,
                scratch,
                ..
            } => {
                collector.reg_use(*addr);
                collector.reg_use(*operand);
                collector.reg_def(*oldval);
                collector.reg_def(*scratch);
            }
            Inst::AtomicCasAl { rd, rt, rn, .. } => {
                // rd carries the expected value in and the result out: a
                // two-address constraint.
                collector.reg_use(rd.to_reg());
                collector.reg_reuse_def(*rd, 0);
                collector.reg_use(*rt);
                collector.reg_use(*rn);
            }
            Inst::AtomicCasLoop {
                addr,
                expected,
                replacement,
                oldval,
                scratch,
                ..
            } => {
                collector.reg_use(*addr);
                collector.reg_use(*expected);
                collector.reg_use(*replacement);
                collector.reg_def(*oldval);
                collector.reg_def(*scratch);
            }
            Inst::LoadAcquire { rt, rn, .. } => {
                collector.reg_def(*rt);
                collector.reg_use(*rn);
            }
            Inst::StoreRelease { rt, rn, .. } => {
                collector.reg_use(*rt);
                collector.reg_use(*rn);
            }
            Inst::Ret { rets } => {
                for pair in rets {
                    collector.reg_fixed_use(pair.vreg, pair.preg);
                }
            }
            Inst::Call { info } | Inst::ReturnCall { info } => {
                for &u in &info.uses {
                    collector.reg_use(u);
                }
                for &d in &info.defs {
                    collector.reg_def(d);
                }
                collector.reg_clobbers(info.clobbers);
            }
            Inst::CallInd { info } | Inst::ReturnCallInd { info } => {
                collector.reg_use(info.rn);
                for &u in &info.uses {
                    collector.reg_use(u);
                }
                for &d in &info.defs {
                    collector.reg_def(d);
                }
                collector.reg_clobbers(info.clobbers);
            }
            Inst::CondBr { kind, .. } | Inst::TrapIf { kind, .. } => match kind {
                CondBrKind::Zero(reg, _) | CondBrKind::NotZero(reg, _) => {
                    collector.reg_use(*reg)
                }
                CondBrKind::Cond(..) => {}
            },
            Inst::IndirectBr { rn } => collector.reg_use(*rn),
            Inst::JTSequence {
                ridx, rtmp1, rtmp2, ..
            } => {
                collector.reg_use(*ridx);
                collector.reg_def(*rtmp1);
                collector.reg_def(*rtmp2);
            }
            Inst::LoadExtName { rd, .. } => collector.reg_def(*rd),
            Inst::TlsDesc { rd, .. } => {
                // The resolver leaves its result in x0 and may clobber x1
                // and LR.
                collector.reg_fixed_def(*rd, xreg(0).to_real_reg().unwrap());
                let mut clobbers = RealRegSet::empty();
                clobbers.insert(xreg(1).to_real_reg().unwrap());
                clobbers.insert(xreg(30).to_real_reg().unwrap());
                collector.reg_clobbers(clobbers);
            }
            Inst::TlsLocalExec { rd, .. } => collector.reg_def(*rd),
            Inst::LoadAddr { rd, mem } => {
                collector.reg_def(*rd);
                memarg_operands(mem, collector);
            }
            Inst::StackProbeLoop { .. } => {}
        }
    }

    fn map_regs(&mut self, map: &mut dyn FnMut(Reg) -> Reg) {
        let map_wr = |map: &mut dyn FnMut(Reg) -> Reg, w: &mut Writable<Reg>| {
            *w = Writable::from_reg(map(w.to_reg()));
        };
        match self {
            Inst::Nop0
            | Inst::Fence
            | Inst::Csdb
            | Inst::Brk
            | Inst::Udf { .. }
            | Inst::Jump { .. }
            | Inst::StackProbeLoop { .. } => {}
            Inst::Ret { rets } => {
                for pair in rets {
                    pair.vreg = map(pair.vreg);
                }
            }
            Inst::AluRRR { rd, rn, rm, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
                *rm = map(*rm);
            }
            Inst::AluRRRR { rd, rn, rm, ra, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
                *rm = map(*rm);
                *ra = map(*ra);
            }
            Inst::AluRRImm12 { rd, rn, .. }
            | Inst::AluRRImmLogic { rd, rn, .. }
            | Inst::AluRRImmShift { rd, rn, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
            }
            Inst::AluRRRShift { rd, rn, rm, .. } | Inst::AluRRRExtend { rd, rn, rm, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
                *rm = map(*rm);
            }
            Inst::BitRR { rd, rn, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
            }
            Inst::ULoad8 { rd, mem }
            | Inst::SLoad8 { rd, mem }
            | Inst::ULoad16 { rd, mem }
            | Inst::SLoad16 { rd, mem }
            | Inst::ULoad32 { rd, mem }
            | Inst::SLoad32 { rd, mem }
            | Inst::ULoad64 { rd, mem }
            | Inst::FpuLoad32 { rd, mem }
            | Inst::FpuLoad64 { rd, mem }
            | Inst::FpuLoad128 { rd, mem }
            | Inst::LoadAddr { rd, mem } => {
                map_wr(map, rd);
                memarg_map_regs(mem, map);
            }
            Inst::Store8 { rd, mem }
            | Inst::Store16 { rd, mem }
            | Inst::Store32 { rd, mem }
            | Inst::Store64 { rd, mem }
            | Inst::FpuStore32 { rd, mem }
            | Inst::FpuStore64 { rd, mem }
            | Inst::FpuStore128 { rd, mem } => {
                *rd = map(*rd);
                memarg_map_regs(mem, map);
            }
            Inst::StoreP64 { rt, rt2, .. } => {
                *rt = map(*rt);
                *rt2 = map(*rt2);
            }
            Inst::LoadP64 { rt, rt2, .. } => {
                map_wr(map, rt);
                map_wr(map, rt2);
            }
            Inst::Mov { rd, rm, .. } => {
                map_wr(map, rd);
                *rm = map(*rm);
            }
            Inst::MovWide { rd, .. } | Inst::MovK { rd, .. } => map_wr(map, rd),
            Inst::Extend { rd, rn, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
            }
            Inst::CSel { rd, rn, rm, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
                *rm = map(*rm);
            }
            Inst::CSet { rd, .. } => map_wr(map, rd),
            Inst::CCmp { rn, rm, .. } => {
                *rn = map(*rn);
                *rm = map(*rm);
            }
            Inst::FpuMove { rd, rn, .. }
            | Inst::FpuMove128 { rd, rn }
            | Inst::FpuRR { rd, rn, .. }
            | Inst::MovToFpu { rd, rn, .. }
            | Inst::MovFromFpu { rd, rn, .. }
            | Inst::FpuToInt { rd, rn, .. }
            | Inst::IntToFpu { rd, rn, .. }
            | Inst::VecCnt { rd, rn }
            | Inst::VecAddv { rd, rn } => {
                map_wr(map, rd);
                *rn = map(*rn);
            }
            Inst::FpuRRR { rd, rn, rm, .. } | Inst::FpuCSel { rd, rn, rm, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
                *rm = map(*rm);
            }
            Inst::FpuRRRR { rd, rn, rm, ra, .. } => {
                map_wr(map, rd);
                *rn = map(*rn);
                *rm = map(*rm);
                *ra = map(*ra);
            }
            Inst::FpuCmp { rn, rm, .. } => {
                *rn = map(*rn);
                *rm = map(*rm);
            }
            Inst::LoadFpuConst32 { rd, .. } | Inst::LoadFpuConst64 { rd, .. } => {
                map_wr(map, rd)
            }
            Inst::AtomicRmwAl { rs, rt, rn, .. } => {
                *rs = map(*rs);
                map_wr(map, rt);
                *rn = map(*rn);
            }
            Inst::AtomicRmwLoop {
                addr,
                operand,
                oldval,
                scratch,
                ..
            } => {
                *addr = map(*addr);
                *operand = map(*operand);
                map_wr(map, oldval);
                map_wr(map, scratch);
            }
            Inst::AtomicCasAl { rd, rt, rn, .. } => {
                map_wr(map, rd);
                *rt = map(*rt);
                *rn = map(*rn);
            }
            Inst::AtomicCasLoop {
                addr,
                expected,
                replacement,
                oldval,
                scratch,
                ..
            } => {
                *addr = map(*addr);
                *expected = map(*expected);
                *replacement = map(*replacement);
                map_wr(map, oldval);
                map_wr(map, scratch);
            }
            Inst::LoadAcquire { rt, rn, .. } => {
                map_wr(map, rt);
                *rn = map(*rn);
            }
            Inst::StoreRelease { rt, rn, .. } => {
                *rt = map(*rt);
                *rn = map(*rn);
            }
            Inst::Call { info } | Inst::ReturnCall { info } => {
                for u in &mut info.uses {
                    *u = map(*u);
                }
                for d in &mut info.defs {
                    map_wr(map, d);
                }
            }
            Inst::CallInd { info } | Inst::ReturnCallInd { info } => {
                info.rn = map(info.rn);
                for u in &mut info.uses {
                    *u = map(*u);
                }
                for d in &mut info.defs {
                    map_wr(map, d);
                }
            }
            Inst::CondBr { kind, .. } | Inst::TrapIf { kind, .. } => match kind {
                CondBrKind::Zero(reg, _) | CondBrKind::NotZero(reg, _) => *reg = map(*reg),
                CondBrKind::Cond(..) => {}
            },
            Inst::IndirectBr { rn } => *rn = map(*rn),
            Inst::JTSequence {
                ridx, rtmp1, rtmp2, ..
            } => {
                *ridx = map(*ridx);
                map_wr(map, rtmp1);
                map_wr(map, rtmp2);
            }
            Inst::LoadExtName { rd, .. }
            | Inst::TlsLocalExec { rd, .. }
            | Inst::TlsDesc { rd, .. } => map_wr(map, rd),
        }
    }

    fn is_move(&self) -> Option<(Writable<Reg>, Reg)> {
        match self {
            &Inst::Mov {
                size: OperandSize::Size64,
                rd,
                rm,
            } => Some((rd, rm)),
            &Inst::FpuMove {
                size: ScalarSize::Size64,
                rd,
                rn,
            } => Some((rd, rn)),
            &Inst::FpuMove128 { rd, rn } => Some((rd, rn)),
            _ => None,
        }
    }

    fn is_term(&self) -> MachTerminator {
        match self {
            Inst::Ret { .. } => MachTerminator::Ret,
            Inst::ReturnCall { .. } | Inst::ReturnCallInd { .. } => MachTerminator::Ret,
            Inst::Jump { dest } => MachTerminator::Uncond(*dest),
            Inst::CondBr { target, .. } => MachTerminator::Cond(*target, *target),
            Inst::JTSequence { targets, .. } => {
                MachTerminator::Indirect(targets.as_ref().clone())
            }
            _ => MachTerminator::None,
        }
    }

    fn gen_move(dst: Writable<Reg>, src: Reg, ty: Type) -> Inst {
        if ty.is_vector() {
            Inst::FpuMove128 { rd: dst, rn: src }
        } else if ty.is_float() {
            Inst::FpuMove {
                size: ScalarSize::Size64,
                rd: dst,
                rn: src,
            }
        } else {
            Inst::Mov {
                size: OperandSize::Size64,
                rd: dst,
                rm: src,
            }
        }
    }

    fn gen_jump(target: MachLabel) -> Inst {
        Inst::Jump { dest: target }
    }

    fn gen_nop() -> Inst {
        Inst::Nop0
    }

    fn rc_for_type(ty: Type) -> CodegenResult<RegClass> {
        if ty.is_vector() {
            Ok(RegClass::Vector)
        } else if ty.is_float() {
            Ok(RegClass::Float)
        } else if ty.is_int() {
            Ok(RegClass::Int)
        } else {
            Err(CodegenError::Unsupported(format!(
                "no register class for type {ty}"
            )))
        }
    }

    fn worst_case_size() -> u32 {
        // The LL/SC CAS loop is the longest fixed expansion: 7 words.
        28
    }
}

impl crate::machinst::regalloc::SpillOps for Inst {
    fn gen_spill_store(slot: u32, src: Reg, class: RegClass) -> Inst {
        let mem = AMode::SlotOffset(i64::from(slot) * 16);
        match class {
            RegClass::Int => Inst::Store64 { rd: src, mem },
            RegClass::Float => Inst::FpuStore64 { rd: src, mem },
            RegClass::Vector => Inst::FpuStore128 { rd: src, mem },
        }
    }

    fn gen_spill_reload(slot: u32, dst: Writable<Reg>, class: RegClass) -> Inst {
        let mem = AMode::SlotOffset(i64::from(slot) * 16);
        match class {
            RegClass::Int => Inst::ULoad64 { rd: dst, mem },
            RegClass::Float => Inst::FpuLoad64 { rd: dst, mem },
            RegClass::Vector => Inst::FpuLoad128 { rd: dst, mem },
        }
    }

    fn gen_const(dst: Writable<Reg>, value: u64) -> SmallVec<[Inst; 4]> {
        match dst.to_reg().class() {
            RegClass::Int => Inst::load_constant(dst, value),
            RegClass::Float | RegClass::Vector => smallvec![Inst::LoadFpuConst64 {
                rd: dst,
                const_data: value,
            }],
        }
    }
}
