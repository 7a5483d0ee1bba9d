//! Lower a single IR instruction into machine instructions.
//!
//! This is the dispatch the pattern-rule compiler would generate: a nested
//! match over opcode, operand shapes, and immediate predicates. Rules that
//! fuse a producer into a consumer (immediates into ALU forms, comparisons
//! into branches and selects, address arithmetic into addressing modes,
//! multiplies into `madd`) first check that the producer has no other use.

use crate::ir::{self, condcodes::FloatCC, condcodes::IntCC, types, Opcode, Type, Value};
use crate::isa::aarch64::inst::*;
use crate::isa::aarch64::lower::*;
use crate::machinst::{Lower, MachInst, Reg, RegClass, Writable};
use crate::result::{CodegenError, CodegenResult};

/// Number of bits in a shift mask for `ty`.
fn shift_mask(ty: Type) -> u64 {
    u64::from(ty.bits()) - 1
}

fn int_op_size(ty: Type) -> OperandSize {
    OperandSize::from_ty(ty)
}

/// The simple two-register ALU opcodes.
fn alu_op_for(opcode: Opcode) -> Option<ALUOp> {
    Some(match opcode {
        Opcode::Iadd => ALUOp::Add,
        Opcode::Isub => ALUOp::Sub,
        Opcode::Band => ALUOp::And,
        Opcode::Bor => ALUOp::Orr,
        Opcode::Bxor => ALUOp::Eor,
        Opcode::BandNot => ALUOp::AndNot,
        Opcode::BorNot => ALUOp::OrrNot,
        Opcode::BxorNot => ALUOp::EorNot,
        _ => return None,
    })
}

/// Emit a constant into a fresh or given register, registering it for
/// rematerialization.
fn emit_constant(
    backend: &AArch64Lowering,
    ctx: &mut Lower<Inst>,
    rd: Writable<Reg>,
    value: u64,
) {
    if let Some(v) = rd.to_reg().to_virtual_reg() {
        backend.remat.borrow_mut().insert(v.index() as u32, value);
    }
    for inst in Inst::load_constant(rd, value) {
        ctx.emit(inst);
    }
}

pub(crate) fn lower_insn_to_regs(
    backend: &AArch64Lowering,
    ctx: &mut Lower<Inst>,
    inst: ir::Inst,
) -> CodegenResult<()> {
    let data = ctx.f.dfg.insts[inst];
    let opcode = data.opcode();

    match opcode {
        Opcode::Nop => {}
        Opcode::Debugtrap => {
            ctx.emit(Inst::Brk);
        }
        Opcode::Fence => {
            ctx.emit(Inst::Fence);
        }

        Opcode::Iconst => {
            let value = match data {
                ir::InstructionData::UnaryImm { imm, .. } => imm.bits() as u64,
                _ => unreachable!(),
            };
            let ty = ctx.output_ty(inst, 0);
            let masked = if ty.bits() >= 64 {
                value
            } else {
                value & ((1u64 << ty.bits()) - 1)
            };
            let rd = ctx.output_reg(inst, 0);
            emit_constant(backend, ctx, rd, masked);
        }
        Opcode::F32const => {
            let bits = match data {
                ir::InstructionData::UnaryIeee32 { imm, .. } => imm.bits(),
                _ => unreachable!(),
            };
            let rd = ctx.output_reg(inst, 0);
            ctx.emit(Inst::LoadFpuConst32 {
                rd,
                const_data: bits,
            });
        }
        Opcode::F64const => {
            let bits = match data {
                ir::InstructionData::UnaryIeee64 { imm, .. } => imm.bits(),
                _ => unreachable!(),
            };
            let rd = ctx.output_reg(inst, 0);
            ctx.emit(Inst::LoadFpuConst64 {
                rd,
                const_data: bits,
            });
        }

        Opcode::Iadd | Opcode::Isub => {
            let ty = ctx.output_ty(inst, 0);
            if ty == types::I128 {
                return Err(CodegenError::Unsupported(
                    "128-bit arithmetic must go through iconcat/isplit pairs".into(),
                ));
            }
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let a = ctx.input_value(inst, 0);
            let b = ctx.input_value(inst, 1);
            let alu_op = alu_op_for(opcode).unwrap();

            // Immediate form.
            if let Some(c) = ctx.value_as_const(b) {
                if let Some(imm12) = Imm12::maybe_from_u64(c) {
                    ctx.use_constant(b);
                    let rn = ctx.put_value_in_reg(a);
                    ctx.emit(Inst::AluRRImm12 {
                        alu_op,
                        size,
                        rd,
                        rn,
                        imm12,
                    });
                    return Ok(());
                }
            }

            // Fuse a single-use multiply: iadd(c, imul(a, b)) -> madd.
            if opcode == Opcode::Iadd {
                for (mul_side, add_side) in [(b, a), (a, b)] {
                    if let Some(def) = ctx.get_single_use_def(mul_side) {
                        if let ir::InstructionData::Binary {
                            opcode: Opcode::Imul,
                            args,
                        } = ctx.f.dfg.insts[def]
                        {
                            ctx.sink_inst(def);
                            let rn = ctx.put_value_in_reg(args[0]);
                            let rm = ctx.put_value_in_reg(args[1]);
                            let ra = ctx.put_value_in_reg(add_side);
                            ctx.emit(Inst::AluRRRR {
                                alu_op: ALUOp3::MAdd,
                                size,
                                rd,
                                rn,
                                rm,
                                ra,
                            });
                            return Ok(());
                        }
                    }
                }
            } else {
                // isub(c, imul(a, b)) -> msub.
                if let Some(def) = ctx.get_single_use_def(b) {
                    if let ir::InstructionData::Binary {
                        opcode: Opcode::Imul,
                        args,
                    } = ctx.f.dfg.insts[def]
                    {
                        ctx.sink_inst(def);
                        let rn = ctx.put_value_in_reg(args[0]);
                        let rm = ctx.put_value_in_reg(args[1]);
                        let ra = ctx.put_value_in_reg(a);
                        ctx.emit(Inst::AluRRRR {
                            alu_op: ALUOp3::MSub,
                            size,
                            rd,
                            rn,
                            rm,
                            ra,
                        });
                        return Ok(());
                    }
                }
            }

            // Fuse a single-use constant left shift: iadd(a, ishl(b, k)).
            if opcode == Opcode::Iadd {
                if let Some(def) = ctx.get_single_use_def(b) {
                    if let ir::InstructionData::Binary {
                        opcode: Opcode::Ishl,
                        args,
                    } = ctx.f.dfg.insts[def]
                    {
                        if let Some(amt) = ctx.value_as_const(args[1]) {
                            if let Some(shiftop) =
                                ShiftOpAndAmt::maybe_new(ShiftOp::LSL, amt & shift_mask(ty))
                            {
                                ctx.sink_inst(def);
                                ctx.use_constant(args[1]);
                                let rn = ctx.put_value_in_reg(a);
                                let rm = ctx.put_value_in_reg(args[0]);
                                ctx.emit(Inst::AluRRRShift {
                                    alu_op: ALUOp::Add,
                                    size,
                                    rd,
                                    rn,
                                    rm,
                                    shiftop,
                                });
                                return Ok(());
                            }
                        }
                    }
                }
            }

            let rn = ctx.put_value_in_reg(a);
            let rm = ctx.put_value_in_reg(b);
            ctx.emit(Inst::AluRRR {
                alu_op,
                size,
                rd,
                rn,
                rm,
            });
        }

        Opcode::Band | Opcode::Bor | Opcode::Bxor => {
            let ty = ctx.output_ty(inst, 0);
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let a = ctx.input_value(inst, 0);
            let b = ctx.input_value(inst, 1);
            let alu_op = alu_op_for(opcode).unwrap();

            // Logical immediate form.
            let imm_ty = if ty.bits() <= 32 { types::I32 } else { types::I64 };
            if let Some(c) = ctx.value_as_const(b) {
                if let Some(imml) = ImmLogic::maybe_from_u64(c, imm_ty) {
                    ctx.use_constant(b);
                    let rn = ctx.put_value_in_reg(a);
                    ctx.emit(Inst::AluRRImmLogic {
                        alu_op,
                        size,
                        rd,
                        rn,
                        imml,
                    });
                    return Ok(());
                }
            }

            // band(x, bnot(y)) -> bic; same shape for orn/eon.
            if let Some(def) = ctx.get_single_use_def(b) {
                if let ir::InstructionData::Unary {
                    opcode: Opcode::Bnot,
                    arg,
                } = ctx.f.dfg.insts[def]
                {
                    ctx.sink_inst(def);
                    let rn = ctx.put_value_in_reg(a);
                    let rm = ctx.put_value_in_reg(arg);
                    let alu_op = match opcode {
                        Opcode::Band => ALUOp::AndNot,
                        Opcode::Bor => ALUOp::OrrNot,
                        Opcode::Bxor => ALUOp::EorNot,
                        _ => unreachable!(),
                    };
                    ctx.emit(Inst::AluRRR {
                        alu_op,
                        size,
                        rd,
                        rn,
                        rm,
                    });
                    return Ok(());
                }
            }

            let rn = ctx.put_value_in_reg(a);
            let rm = ctx.put_value_in_reg(b);
            ctx.emit(Inst::AluRRR {
                alu_op,
                size,
                rd,
                rn,
                rm,
            });
        }

        Opcode::BandNot | Opcode::BorNot | Opcode::BxorNot => {
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            ctx.emit(Inst::AluRRR {
                alu_op: alu_op_for(opcode).unwrap(),
                size: int_op_size(ty),
                rd,
                rn,
                rm,
            });
        }

        Opcode::Imul => {
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            ctx.emit(Inst::AluRRRR {
                alu_op: ALUOp3::MAdd,
                size: int_op_size(ty),
                rd,
                rn,
                rm,
                ra: zero_reg(),
            });
        }

        Opcode::Smulhi | Opcode::Umulhi => {
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let signed = opcode == Opcode::Smulhi;
            match ty.bits() {
                64 => {
                    let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
                    let rm = ctx.put_value_in_reg(ctx.input_value(inst, 1));
                    ctx.emit(Inst::AluRRR {
                        alu_op: if signed { ALUOp::SMulH } else { ALUOp::UMulH },
                        size: OperandSize::Size64,
                        rd,
                        rn,
                        rm,
                    });
                }
                32 => {
                    // Widen, multiply in 64 bits, shift the high word down.
                    let a = ctx.put_value_in_reg(ctx.input_value(inst, 0));
                    let b = ctx.put_value_in_reg(ctx.input_value(inst, 1));
                    let wa = ctx.alloc_tmp(RegClass::Int);
                    let wb = ctx.alloc_tmp(RegClass::Int);
                    ctx.emit(Inst::Extend {
                        rd: wa,
                        rn: a,
                        signed,
                        from_bits: 32,
                        to_bits: 64,
                    });
                    ctx.emit(Inst::Extend {
                        rd: wb,
                        rn: b,
                        signed,
                        from_bits: 32,
                        to_bits: 64,
                    });
                    let prod = ctx.alloc_tmp(RegClass::Int);
                    ctx.emit(Inst::AluRRRR {
                        alu_op: ALUOp3::MAdd,
                        size: OperandSize::Size64,
                        rd: prod,
                        rn: wa.to_reg(),
                        rm: wb.to_reg(),
                        ra: zero_reg(),
                    });
                    ctx.emit(Inst::AluRRImmShift {
                        alu_op: ALUOp::Lsr,
                        size: OperandSize::Size64,
                        rd,
                        rn: prod.to_reg(),
                        immshift: ImmShift::maybe_from_u64(32).unwrap(),
                    });
                }
                bits => {
                    return Err(CodegenError::Unsupported(format!(
                        "{opcode} at {bits} bits"
                    )))
                }
            }
        }

        Opcode::Udiv | Opcode::Sdiv => {
            let ty = ctx.output_ty(inst, 0);
            let signed = opcode == Opcode::Sdiv;
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let a = ctx.input_value(inst, 0);
            let b = ctx.input_value(inst, 1);
            let (rn, rm) = if ty.bits() < 32 {
                (put_extended(ctx, a, signed), put_extended(ctx, b, signed))
            } else {
                (ctx.put_value_in_reg(a), ctx.put_value_in_reg(b))
            };
            // The hardware quietly yields zero on division by zero; the IR
            // semantics trap.
            ctx.emit(Inst::TrapIf {
                kind: CondBrKind::Zero(rm, size),
                trap_code: ir::TrapCode::IntegerDivisionByZero,
            });
            if signed {
                // Overflow iff divisor == -1 and dividend == MIN: both
                // tests combine through an or of their zero-indicators.
                let min_xor = ctx.alloc_tmp(RegClass::Int);
                let sign_bit = 1u64 << (ty.bits().min(64) - 1);
                let imm_ty = if ty.bits() <= 32 { types::I32 } else { types::I64 };
                let imml = ImmLogic::maybe_from_u64(sign_bit, imm_ty)
                    .expect("sign bit is a logical immediate");
                ctx.emit(Inst::AluRRImmLogic {
                    alu_op: ALUOp::Eor,
                    size,
                    rd: min_xor,
                    rn,
                    imml,
                });
                let plus1 = ctx.alloc_tmp(RegClass::Int);
                ctx.emit(Inst::AluRRImm12 {
                    alu_op: ALUOp::Add,
                    size,
                    rd: plus1,
                    rn: rm,
                    imm12: Imm12::maybe_from_u64(1).unwrap(),
                });
                let both = ctx.alloc_tmp(RegClass::Int);
                ctx.emit(Inst::AluRRR {
                    alu_op: ALUOp::Orr,
                    size,
                    rd: both,
                    rn: min_xor.to_reg(),
                    rm: plus1.to_reg(),
                });
                ctx.emit(Inst::TrapIf {
                    kind: CondBrKind::Zero(both.to_reg(), size),
                    trap_code: ir::TrapCode::IntegerOverflow,
                });
            }
            ctx.emit(Inst::AluRRR {
                alu_op: if signed { ALUOp::SDiv } else { ALUOp::UDiv },
                size,
                rd,
                rn,
                rm,
            });
        }

        Opcode::Urem | Opcode::Srem => {
            let ty = ctx.output_ty(inst, 0);
            let signed = opcode == Opcode::Srem;
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let a = ctx.input_value(inst, 0);
            let b = ctx.input_value(inst, 1);
            let (rn, rm) = if ty.bits() < 32 {
                (put_extended(ctx, a, signed), put_extended(ctx, b, signed))
            } else {
                (ctx.put_value_in_reg(a), ctx.put_value_in_reg(b))
            };
            ctx.emit(Inst::TrapIf {
                kind: CondBrKind::Zero(rm, size),
                trap_code: ir::TrapCode::IntegerDivisionByZero,
            });
            let quot = ctx.alloc_tmp(RegClass::Int);
            ctx.emit(Inst::AluRRR {
                alu_op: if signed { ALUOp::SDiv } else { ALUOp::UDiv },
                size,
                rd: quot,
                rn,
                rm,
            });
            // r = rn - quot * rm.
            ctx.emit(Inst::AluRRRR {
                alu_op: ALUOp3::MSub,
                size,
                rd,
                rn: quot.to_reg(),
                rm,
                ra: rn,
            });
        }

        Opcode::Ishl | Opcode::Ushr | Opcode::Sshr => {
            let ty = ctx.output_ty(inst, 0);
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let a = ctx.input_value(inst, 0);
            let b = ctx.input_value(inst, 1);
            let alu_op = match opcode {
                Opcode::Ishl => ALUOp::Lsl,
                Opcode::Ushr => ALUOp::Lsr,
                Opcode::Sshr => ALUOp::Asr,
                _ => unreachable!(),
            };

            // Narrow values need defined upper bits for right shifts.
            let rn = match (opcode, ty.bits()) {
                (Opcode::Ushr, bits) if bits < 32 => put_extended(ctx, a, false),
                (Opcode::Sshr, bits) if bits < 32 => put_extended(ctx, a, true),
                _ => ctx.put_value_in_reg(a),
            };

            if let Some(c) = ctx.value_as_const(b) {
                let amt = c & shift_mask(ty);
                ctx.use_constant(b);
                if amt == 0 {
                    ctx.emit(Inst::gen_move(rd, rn, ty));
                } else {
                    // The bitfield forms encode the type width directly, so
                    // narrow shifts use the 32-bit form with the narrow
                    // amount.
                    ctx.emit(Inst::AluRRImmShift {
                        alu_op,
                        size,
                        rd,
                        rn,
                        immshift: ImmShift::maybe_from_u64(amt).unwrap(),
                    });
                }
                return Ok(());
            }

            let rm_raw = ctx.put_value_in_reg(b);
            // Variable shifts take the amount modulo the register size;
            // narrow types mask explicitly.
            let rm = if ty.bits() < 32 {
                let masked = ctx.alloc_tmp(RegClass::Int);
                let imml = ImmLogic::maybe_from_u64(shift_mask(ty), types::I32)
                    .expect("small mask encodes");
                ctx.emit(Inst::AluRRImmLogic {
                    alu_op: ALUOp::And,
                    size: OperandSize::Size32,
                    rd: masked,
                    rn: rm_raw,
                    imml,
                });
                masked.to_reg()
            } else {
                rm_raw
            };
            ctx.emit(Inst::AluRRR {
                alu_op,
                size,
                rd,
                rn,
                rm,
            });
        }

        Opcode::Rotr | Opcode::Rotl => {
            let ty = ctx.output_ty(inst, 0);
            if ty.bits() < 32 {
                return Err(CodegenError::Unsupported(format!(
                    "{opcode} at {} bits",
                    ty.bits()
                )));
            }
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let b = ctx.input_value(inst, 1);
            if let Some(c) = ctx.value_as_const(b) {
                let amt = if opcode == Opcode::Rotr {
                    c & shift_mask(ty)
                } else {
                    (u64::from(ty.bits()) - (c & shift_mask(ty))) & shift_mask(ty)
                };
                ctx.use_constant(b);
                if amt == 0 {
                    ctx.emit(Inst::gen_move(rd, rn, ty));
                } else {
                    // ROR with an immediate is EXTR rd, rn, rn, #amt; the
                    // variable form suffices here via a materialized amount.
                    let tmp = ctx.alloc_tmp(RegClass::Int);
                    emit_constant(backend, ctx, tmp, amt);
                    ctx.emit(Inst::AluRRR {
                        alu_op: ALUOp::RotR,
                        size,
                        rd,
                        rn,
                        rm: tmp.to_reg(),
                    });
                }
                return Ok(());
            }
            let rm = ctx.put_value_in_reg(b);
            if opcode == Opcode::Rotr {
                ctx.emit(Inst::AluRRR {
                    alu_op: ALUOp::RotR,
                    size,
                    rd,
                    rn,
                    rm,
                });
            } else {
                // rotl x, y == rotr x, -y.
                let neg = ctx.alloc_tmp(RegClass::Int);
                ctx.emit(Inst::AluRRR {
                    alu_op: ALUOp::Sub,
                    size,
                    rd: neg,
                    rn: zero_reg(),
                    rm,
                });
                ctx.emit(Inst::AluRRR {
                    alu_op: ALUOp::RotR,
                    size,
                    rd,
                    rn,
                    rm: neg.to_reg(),
                });
            }
        }

        Opcode::Ineg => {
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            ctx.emit(Inst::AluRRR {
                alu_op: ALUOp::Sub,
                size: int_op_size(ty),
                rd,
                rn: zero_reg(),
                rm,
            });
        }
        Opcode::Bnot => {
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            ctx.emit(Inst::AluRRR {
                alu_op: ALUOp::OrrNot,
                size: int_op_size(ty),
                rd,
                rn: zero_reg(),
                rm,
            });
        }

        Opcode::Clz | Opcode::Cls | Opcode::Ctz | Opcode::Bitrev => {
            let ty = ctx.output_ty(inst, 0);
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let input = ctx.input_value(inst, 0);
            let rn = if ty.bits() < 32 && opcode != Opcode::Bitrev {
                put_extended(ctx, input, opcode == Opcode::Cls)
            } else {
                ctx.put_value_in_reg(input)
            };
            match opcode {
                Opcode::Clz => {
                    ctx.emit(Inst::BitRR {
                        op: BitOp::Clz,
                        size,
                        rd,
                        rn,
                    });
                    if ty.bits() < 32 {
                        // The 32-bit count includes the padding bits.
                        let excess = 32 - ty.bits() as u64;
                        ctx.emit(Inst::AluRRImm12 {
                            alu_op: ALUOp::Sub,
                            size: OperandSize::Size32,
                            rd,
                            rn: rd.to_reg(),
                            imm12: Imm12::maybe_from_u64(excess).unwrap(),
                        });
                    }
                }
                Opcode::Cls => {
                    ctx.emit(Inst::BitRR {
                        op: BitOp::Cls,
                        size,
                        rd,
                        rn,
                    });
                    if ty.bits() < 32 {
                        let excess = 32 - ty.bits() as u64;
                        ctx.emit(Inst::AluRRImm12 {
                            alu_op: ALUOp::Sub,
                            size: OperandSize::Size32,
                            rd,
                            rn: rd.to_reg(),
                            imm12: Imm12::maybe_from_u64(excess).unwrap(),
                        });
                    }
                }
                Opcode::Ctz => {
                    // rbit + clz. For narrow types, set a guard bit just
                    // past the value so the count saturates at the width.
                    let rbit_in = if ty.bits() < 32 {
                        let guarded = ctx.alloc_tmp(RegClass::Int);
                        let guard_bit = 1u64 << ty.bits();
                        let imml = ImmLogic::maybe_from_u64(guard_bit, types::I32)
                            .expect("guard bit encodes");
                        ctx.emit(Inst::AluRRImmLogic {
                            alu_op: ALUOp::Orr,
                            size: OperandSize::Size32,
                            rd: guarded,
                            rn,
                            imml,
                        });
                        guarded.to_reg()
                    } else {
                        rn
                    };
                    let reversed = ctx.alloc_tmp(RegClass::Int);
                    ctx.emit(Inst::BitRR {
                        op: BitOp::RBit,
                        size,
                        rd: reversed,
                        rn: rbit_in,
                    });
                    ctx.emit(Inst::BitRR {
                        op: BitOp::Clz,
                        size,
                        rd,
                        rn: reversed.to_reg(),
                    });
                }
                Opcode::Bitrev => {
                    ctx.emit(Inst::BitRR {
                        op: BitOp::RBit,
                        size,
                        rd,
                        rn,
                    });
                    if ty.bits() < 32 {
                        // The interesting bits land at the top of the
                        // 32-bit register.
                        ctx.emit(Inst::AluRRImmShift {
                            alu_op: ALUOp::Lsr,
                            size: OperandSize::Size32,
                            rd,
                            rn: rd.to_reg(),
                            immshift: ImmShift::maybe_from_u64(
                                32 - u64::from(ty.bits()),
                            )
                            .unwrap(),
                        });
                    }
                }
                _ => unreachable!(),
            }
        }

        Opcode::Popcnt => {
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let input = ctx.input_value(inst, 0);
            let rn = if ty.bits() < 64 {
                put_extended(ctx, input, false)
            } else {
                ctx.put_value_in_reg(input)
            };
            // Move to a vector register, count per byte, sum the lanes.
            let vtmp = ctx.alloc_tmp(RegClass::Float);
            ctx.emit(Inst::MovToFpu {
                size: ScalarSize::Size64,
                rd: vtmp,
                rn,
            });
            ctx.emit(Inst::VecCnt {
                rd: vtmp,
                rn: vtmp.to_reg(),
            });
            ctx.emit(Inst::VecAddv {
                rd: vtmp,
                rn: vtmp.to_reg(),
            });
            ctx.emit(Inst::MovFromFpu {
                size: ScalarSize::Size64,
                rd,
                rn: vtmp.to_reg(),
            });
        }

        Opcode::Uextend | Opcode::Sextend => {
            let from_ty = ctx.value_ty(ctx.input_value(inst, 0));
            let to_ty = ctx.output_ty(inst, 0);
            if to_ty == types::I128 {
                return Err(CodegenError::Unsupported(
                    "extension to 128 bits".into(),
                ));
            }
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            ctx.emit(Inst::Extend {
                rd,
                rn,
                signed: opcode == Opcode::Sextend,
                from_bits: from_ty.bits() as u8,
                to_bits: to_ty.bits() as u8,
            });
        }
        Opcode::Ireduce => {
            // A plain move; consumers interpret only the low bits.
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            ctx.emit(Inst::gen_move(rd, rn, types::I64));
        }
        Opcode::Bitcast => {
            let from_ty = ctx.value_ty(ctx.input_value(inst, 0));
            let to_ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            match (from_ty.is_float(), to_ty.is_float()) {
                (true, true) | (false, false) => {
                    ctx.emit(Inst::gen_move(rd, rn, to_ty));
                }
                (false, true) => ctx.emit(Inst::MovToFpu {
                    size: ScalarSize::from_ty(to_ty),
                    rd,
                    rn,
                }),
                (true, false) => ctx.emit(Inst::MovFromFpu {
                    size: ScalarSize::from_ty(from_ty),
                    rd,
                    rn,
                }),
            }
        }

        Opcode::Icmp => {
            let (args, cond) = match data {
                ir::InstructionData::IntCompare { args, cond, .. } => (args, cond),
                _ => unreachable!(),
            };
            let rd = ctx.output_reg(inst, 0);
            let c = lower_icmp_to_flags(ctx, args[0], args[1], cond);
            ctx.emit(Inst::CSet { rd, cond: c });
        }
        Opcode::IcmpImm => {
            let (arg, cond, imm) = match data {
                ir::InstructionData::IntCompareImm {
                    arg, cond, imm, ..
                } => (arg, cond, imm),
                _ => unreachable!(),
            };
            let ty = ctx.value_ty(arg);
            let size = int_op_size(ty);
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(arg);
            if let Some(imm12) = Imm12::maybe_from_u64(imm.bits() as u64) {
                ctx.emit(Inst::AluRRImm12 {
                    alu_op: ALUOp::SubS,
                    size,
                    rd: writable_zero_reg(),
                    rn,
                    imm12,
                });
            } else {
                let tmp = ctx.alloc_tmp(RegClass::Int);
                emit_constant(backend, ctx, tmp, imm.bits() as u64);
                ctx.emit(Inst::AluRRR {
                    alu_op: ALUOp::SubS,
                    size,
                    rd: writable_zero_reg(),
                    rn,
                    rm: tmp.to_reg(),
                });
            }
            ctx.emit(Inst::CSet {
                rd,
                cond: cond_from_intcc(cond),
            });
        }
        Opcode::Fcmp => {
            let (args, cond) = match data {
                ir::InstructionData::FloatCompare { args, cond, .. } => (args, cond),
                _ => unreachable!(),
            };
            let size = ScalarSize::from_ty(ctx.value_ty(args[0]));
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(args[0]);
            let rm = ctx.put_value_in_reg(args[1]);
            ctx.emit(Inst::FpuCmp { size, rn, rm });
            if cond == FloatCC::UnorderedOrEqual {
                // EQ|UN has no single condition: set both and or them.
                let eq = ctx.alloc_tmp(RegClass::Int);
                let uno = ctx.alloc_tmp(RegClass::Int);
                ctx.emit(Inst::CSet {
                    rd: eq,
                    cond: Cond::Eq,
                });
                ctx.emit(Inst::CSet {
                    rd: uno,
                    cond: Cond::Vs,
                });
                ctx.emit(Inst::AluRRR {
                    alu_op: ALUOp::Orr,
                    size: OperandSize::Size64,
                    rd,
                    rn: eq.to_reg(),
                    rm: uno.to_reg(),
                });
            } else {
                ctx.emit(Inst::CSet {
                    rd,
                    cond: cond_from_floatcc(cond),
                });
            }
        }

        Opcode::Select => {
            let ty = ctx.output_ty(inst, 0);
            let cond_val = ctx.input_value(inst, 0);
            let kind = lower_condition(ctx, cond_val);
            let cond = match kind {
                CondBrKind::Cond(c) => c,
                CondBrKind::Zero(reg, size) => {
                    emit_cmp_zero(ctx, reg, size);
                    Cond::Eq
                }
                CondBrKind::NotZero(reg, size) => {
                    emit_cmp_zero(ctx, reg, size);
                    Cond::Ne
                }
            };
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 2));
            if ty.is_float() {
                ctx.emit(Inst::FpuCSel {
                    size: ScalarSize::from_ty(ty),
                    rd,
                    cond,
                    rn,
                    rm,
                });
            } else {
                ctx.emit(Inst::CSel { rd, cond, rn, rm });
            }
        }

        Opcode::UaddOverflow => {
            let ty = ctx.output_ty(inst, 0);
            let size = int_op_size(ty);
            let sum = ctx.output_reg(inst, 0);
            let carry = Writable::from_reg(
                ctx.output_regs(inst, 1).only_reg().unwrap(),
            );
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            ctx.emit(Inst::AluRRR {
                alu_op: ALUOp::AddS,
                size,
                rd: sum,
                rn,
                rm,
            });
            ctx.emit(Inst::CSet {
                rd: carry,
                cond: Cond::Hs,
            });
        }

        Opcode::Iconcat => {
            let lo_in = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let hi_in = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            let out = ctx.output_regs(inst, 0);
            ctx.emit(Inst::gen_move(
                Writable::from_reg(out.regs()[0]),
                lo_in,
                types::I64,
            ));
            ctx.emit(Inst::gen_move(
                Writable::from_reg(out.regs()[1]),
                hi_in,
                types::I64,
            ));
        }
        Opcode::Isplit => {
            let input = ctx.put_value_in_regs(ctx.input_value(inst, 0));
            let lo_out = ctx.output_regs(inst, 0).only_reg().unwrap();
            let hi_out = ctx.output_regs(inst, 1).only_reg().unwrap();
            ctx.emit(Inst::gen_move(
                Writable::from_reg(lo_out),
                input.regs()[0],
                types::I64,
            ));
            ctx.emit(Inst::gen_move(
                Writable::from_reg(hi_out),
                input.regs()[1],
                types::I64,
            ));
        }

        // Memory.
        Opcode::Load
        | Opcode::Uload8
        | Opcode::Sload8
        | Opcode::Uload16
        | Opcode::Sload16
        | Opcode::Uload32
        | Opcode::Sload32 => {
            let (addr, offset) = match data {
                ir::InstructionData::Load { arg, offset, .. } => (arg, offset),
                _ => unreachable!(),
            };
            let out_ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let access_ty = match opcode {
                Opcode::Load => out_ty,
                Opcode::Uload8 | Opcode::Sload8 => types::I8,
                Opcode::Uload16 | Opcode::Sload16 => types::I16,
                Opcode::Uload32 | Opcode::Sload32 => types::I32,
                _ => unreachable!(),
            };
            let mem = lower_amode(ctx, addr, offset.into(), access_ty);
            let inst = match (opcode, out_ty) {
                (Opcode::Load, ty) => Inst::gen_load(rd, mem, ty),
                (Opcode::Uload8, _) => Inst::ULoad8 { rd, mem },
                (Opcode::Sload8, _) => Inst::SLoad8 { rd, mem },
                (Opcode::Uload16, _) => Inst::ULoad16 { rd, mem },
                (Opcode::Sload16, _) => Inst::SLoad16 { rd, mem },
                (Opcode::Uload32, _) => Inst::ULoad32 { rd, mem },
                (Opcode::Sload32, _) => Inst::SLoad32 { rd, mem },
                _ => unreachable!(),
            };
            ctx.emit(inst);
        }

        Opcode::Store | Opcode::Istore8 | Opcode::Istore16 | Opcode::Istore32 => {
            let (args, offset) = match data {
                ir::InstructionData::Store { args, offset, .. } => (args, offset),
                _ => unreachable!(),
            };
            let data_ty = ctx.value_ty(args[0]);
            let access_ty = match opcode {
                Opcode::Store => data_ty,
                Opcode::Istore8 => types::I8,
                Opcode::Istore16 => types::I16,
                Opcode::Istore32 => types::I32,
                _ => unreachable!(),
            };
            let rd = ctx.put_value_in_reg(args[0]);
            let mem = lower_amode(ctx, args[1], offset.into(), access_ty);
            ctx.emit(Inst::gen_store(mem, rd, access_ty));
        }

        Opcode::StackLoad => {
            let (ss, offset) = match data {
                ir::InstructionData::StackLoad {
                    stack_slot, offset, ..
                } => (stack_slot, offset),
                _ => unreachable!(),
            };
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let base = backend.stackslot_offsets[&ss];
            ctx.emit(Inst::gen_load(
                rd,
                AMode::StackSlotOffset(base + i64::from(i32::from(offset))),
                ty,
            ));
        }
        Opcode::StackStore => {
            let (arg, ss, offset) = match data {
                ir::InstructionData::StackStore {
                    arg,
                    stack_slot,
                    offset,
                    ..
                } => (arg, stack_slot, offset),
                _ => unreachable!(),
            };
            let ty = ctx.value_ty(arg);
            let rd = ctx.put_value_in_reg(arg);
            let base = backend.stackslot_offsets[&ss];
            ctx.emit(Inst::gen_store(
                AMode::StackSlotOffset(base + i64::from(i32::from(offset))),
                rd,
                ty,
            ));
        }
        Opcode::StackAddr => {
            let (ss, offset) = match data {
                ir::InstructionData::StackLoad {
                    stack_slot, offset, ..
                } => (stack_slot, offset),
                _ => unreachable!(),
            };
            let rd = ctx.output_reg(inst, 0);
            let base = backend.stackslot_offsets[&ss];
            ctx.emit(Inst::LoadAddr {
                rd,
                mem: AMode::StackSlotOffset(base + i64::from(i32::from(offset))),
            });
        }

        Opcode::GlobalValue => {
            let gv = match data {
                ir::InstructionData::UnaryGlobalValue { global_value, .. } => global_value,
                _ => unreachable!(),
            };
            let ir::GlobalValueData::Symbol {
                ref name,
                offset,
                colocated,
                tls,
            } = ctx.f.global_values[gv];
            let rd = ctx.output_reg(inst, 0);
            let name = name.clone();
            if tls {
                if backend.flags.is_pic() {
                    // General-dynamic TLSDESC; the sequence's destination
                    // is pinned to x0, and the short-lived temporary keeps
                    // the pin satisfiable regardless of what follows.
                    let tmp = ctx.alloc_tmp(RegClass::Int);
                    ctx.emit(Inst::TlsDesc {
                        rd: tmp,
                        name: Box::new(name),
                    });
                    ctx.emit(Inst::gen_move(rd, tmp.to_reg(), types::I64));
                } else {
                    ctx.emit(Inst::TlsLocalExec {
                        rd,
                        name: Box::new(name),
                    });
                }
            } else if backend.flags.is_pic() && !colocated {
                ctx.emit(Inst::LoadExtName {
                    rd,
                    name: Box::new(name),
                    offset: 0,
                    kind: SymbolLoadKind::Got,
                });
                if offset != 0 {
                    if let Some(imm12) = Imm12::maybe_from_u64(offset.unsigned_abs()) {
                        ctx.emit(Inst::AluRRImm12 {
                            alu_op: if offset > 0 { ALUOp::Add } else { ALUOp::Sub },
                            size: OperandSize::Size64,
                            rd,
                            rn: rd.to_reg(),
                            imm12,
                        });
                    } else {
                        let tmp = ctx.alloc_tmp(RegClass::Int);
                        emit_constant(backend, ctx, tmp, offset as u64);
                        ctx.emit(Inst::AluRRR {
                            alu_op: ALUOp::Add,
                            size: OperandSize::Size64,
                            rd,
                            rn: rd.to_reg(),
                            rm: tmp.to_reg(),
                        });
                    }
                }
            } else {
                ctx.emit(Inst::LoadExtName {
                    rd,
                    name: Box::new(name),
                    offset,
                    kind: SymbolLoadKind::Near,
                });
            }
        }
        Opcode::FuncAddr => {
            let func_ref = match data {
                ir::InstructionData::FuncAddr { func_ref, .. } => func_ref,
                _ => unreachable!(),
            };
            let ext = &ctx.f.dfg.ext_funcs[func_ref];
            let rd = ctx.output_reg(inst, 0);
            let kind = if backend.flags.is_pic() && !ext.colocated {
                SymbolLoadKind::Got
            } else {
                SymbolLoadKind::Near
            };
            let name = ext.name.clone();
            ctx.emit(Inst::LoadExtName {
                rd,
                name: Box::new(name),
                offset: 0,
                kind,
            });
        }

        // Atomics.
        Opcode::AtomicLoad => {
            let addr = match data {
                ir::InstructionData::LoadNoOffset { arg, .. } => arg,
                _ => unreachable!(),
            };
            let ty = ctx.output_ty(inst, 0);
            let rt = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(addr);
            ctx.emit(Inst::LoadAcquire { ty, rt, rn });
        }
        Opcode::AtomicStore => {
            let args = match data {
                ir::InstructionData::StoreNoOffset { args, .. } => args,
                _ => unreachable!(),
            };
            let ty = ctx.value_ty(args[0]);
            let rt = ctx.put_value_in_reg(args[0]);
            let rn = ctx.put_value_in_reg(args[1]);
            ctx.emit(Inst::StoreRelease { ty, rt, rn });
        }
        Opcode::AtomicRmw => {
            let (args, op) = match data {
                ir::InstructionData::AtomicRmw { args, op, .. } => (args, op),
                _ => unreachable!(),
            };
            let ty = ctx.output_ty(inst, 0);
            let rt = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(args[0]);
            let operand = ctx.put_value_in_reg(args[1]);
            use ir::AtomicRmwOp::*;
            let lse_ok = backend.flags.use_lse_atomics()
                && !matches!(op, Nand);
            if lse_ok {
                // Sub and And reach their LSE forms through an inverted
                // operand (LDADD of the negation; LDCLR clears set bits).
                let (op, rs) = match op {
                    Sub => {
                        let neg = ctx.alloc_tmp(RegClass::Int);
                        ctx.emit(Inst::AluRRR {
                            alu_op: ALUOp::Sub,
                            size: OperandSize::from_ty(ty),
                            rd: neg,
                            rn: zero_reg(),
                            rm: operand,
                        });
                        (Add, neg.to_reg())
                    }
                    And => {
                        let inv = ctx.alloc_tmp(RegClass::Int);
                        ctx.emit(Inst::AluRRR {
                            alu_op: ALUOp::OrrNot,
                            size: OperandSize::from_ty(ty),
                            rd: inv,
                            rn: zero_reg(),
                            rm: operand,
                        });
                        (And, inv.to_reg())
                    }
                    other => (other, operand),
                };
                ctx.emit(Inst::AtomicRmwAl { op, ty, rs, rt, rn });
            } else {
                let scratch = ctx.alloc_tmp(RegClass::Int);
                ctx.emit(Inst::AtomicRmwLoop {
                    ty,
                    op,
                    addr: rn,
                    operand,
                    oldval: rt,
                    scratch,
                });
            }
        }
        Opcode::AtomicCas => {
            let args = match data {
                ir::InstructionData::AtomicCas { args, .. } => args,
                _ => unreachable!(),
            };
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let addr = ctx.put_value_in_reg(args[0]);
            let expected = ctx.put_value_in_reg(args[1]);
            let replacement = ctx.put_value_in_reg(args[2]);
            if backend.flags.use_lse_atomics() {
                // casal reads the expected value from its rd and leaves the
                // observed value there.
                ctx.emit(Inst::gen_move(rd, expected, types::I64));
                ctx.emit(Inst::AtomicCasAl {
                    ty,
                    rd,
                    rt: replacement,
                    rn: addr,
                });
            } else {
                let scratch = ctx.alloc_tmp(RegClass::Int);
                ctx.emit(Inst::AtomicCasLoop {
                    ty,
                    addr,
                    expected,
                    replacement,
                    oldval: rd,
                    scratch,
                });
            }
        }

        Opcode::Trapz | Opcode::Trapnz => {
            let (arg, code) = match data {
                ir::InstructionData::CondTrap { arg, code, .. } => (arg, code),
                _ => unreachable!(),
            };
            let kind = lower_condition(ctx, arg);
            let kind = if opcode == Opcode::Trapz {
                kind.invert()
            } else {
                kind
            };
            ctx.emit(Inst::TrapIf {
                kind,
                trap_code: code,
            });
        }

        // Floating point.
        Opcode::Fadd | Opcode::Fsub | Opcode::Fmul | Opcode::Fdiv | Opcode::Fmin
        | Opcode::Fmax => {
            let ty = ctx.output_ty(inst, 0);
            let size = ScalarSize::from_ty(ty);
            let fpu_op = match opcode {
                Opcode::Fadd => FPUOp2::Add,
                Opcode::Fsub => FPUOp2::Sub,
                Opcode::Fmul => FPUOp2::Mul,
                Opcode::Fdiv => FPUOp2::Div,
                Opcode::Fmin => FPUOp2::Min,
                Opcode::Fmax => FPUOp2::Max,
                _ => unreachable!(),
            };
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            ctx.emit(Inst::FpuRRR {
                fpu_op,
                size,
                rd,
                rn,
                rm,
            });
        }
        Opcode::Sqrt | Opcode::Fabs | Opcode::Fneg => {
            let ty = ctx.output_ty(inst, 0);
            let fpu_op = match opcode {
                Opcode::Sqrt => FPUOp1::Sqrt,
                Opcode::Fabs => FPUOp1::Abs,
                Opcode::Fneg => FPUOp1::Neg,
                _ => unreachable!(),
            };
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            ctx.emit(Inst::FpuRR {
                fpu_op,
                size: ScalarSize::from_ty(ty),
                rd,
                rn,
            });
        }
        Opcode::Fma => {
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            let ra = ctx.put_value_in_reg(ctx.input_value(inst, 2));
            ctx.emit(Inst::FpuRRRR {
                size: ScalarSize::from_ty(ty),
                rd,
                rn,
                rm,
                ra,
            });
        }
        Opcode::Fcopysign => {
            // Combine through the integer registers: magnitude bits of the
            // first operand, sign bit of the second.
            let ty = ctx.output_ty(inst, 0);
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            let rm = ctx.put_value_in_reg(ctx.input_value(inst, 1));
            let size = ScalarSize::from_ty(ty);
            let gsize = if ty == types::F32 {
                OperandSize::Size32
            } else {
                OperandSize::Size64
            };
            let imm_ty = if ty == types::F32 { types::I32 } else { types::I64 };
            let sign_bit = 1u64 << (ty.bits() - 1);
            let mag = ctx.alloc_tmp(RegClass::Int);
            let sign = ctx.alloc_tmp(RegClass::Int);
            ctx.emit(Inst::MovFromFpu {
                size,
                rd: mag,
                rn,
            });
            ctx.emit(Inst::MovFromFpu {
                size,
                rd: sign,
                rn: rm,
            });
            let mask = ImmLogic::maybe_from_u64(sign_bit, imm_ty)
                .expect("sign bit is a logical immediate");
            ctx.emit(Inst::AluRRImmLogic {
                alu_op: ALUOp::And,
                size: gsize,
                rd: sign,
                rn: sign.to_reg(),
                imml: mask,
            });
            let inv_mask = ImmLogic::maybe_from_u64(!sign_bit & mask_bits(ty), imm_ty)
                .expect("magnitude mask is a logical immediate");
            ctx.emit(Inst::AluRRImmLogic {
                alu_op: ALUOp::And,
                size: gsize,
                rd: mag,
                rn: mag.to_reg(),
                imml: inv_mask,
            });
            ctx.emit(Inst::AluRRR {
                alu_op: ALUOp::Orr,
                size: gsize,
                rd: mag,
                rn: mag.to_reg(),
                rm: sign.to_reg(),
            });
            ctx.emit(Inst::MovToFpu {
                size,
                rd,
                rn: mag.to_reg(),
            });
        }
        Opcode::Fpromote => {
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            ctx.emit(Inst::FpuRR {
                fpu_op: FPUOp1::Cvt32To64,
                size: ScalarSize::Size32,
                rd,
                rn,
            });
        }
        Opcode::Fdemote => {
            let rd = ctx.output_reg(inst, 0);
            let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
            ctx.emit(Inst::FpuRR {
                fpu_op: FPUOp1::Cvt64To32,
                size: ScalarSize::Size64,
                rd,
                rn,
            });
        }

        Opcode::FcvtToSint | Opcode::FcvtToUint => {
            lower_fcvt_to_int(ctx, inst, opcode)?;
        }
        Opcode::FcvtFromSint | Opcode::FcvtFromUint => {
            let from_ty = ctx.value_ty(ctx.input_value(inst, 0));
            let to_ty = ctx.output_ty(inst, 0);
            let signed = opcode == Opcode::FcvtFromSint;
            let rd = ctx.output_reg(inst, 0);
            let input = ctx.input_value(inst, 0);
            let rn = if from_ty.bits() < 32 {
                put_extended(ctx, input, signed)
            } else {
                ctx.put_value_in_reg(input)
            };
            let op = match (signed, from_ty.bits() <= 32, to_ty) {
                (true, true, types::F32) => IntToFpuOp::I32ToF32,
                (false, true, types::F32) => IntToFpuOp::U32ToF32,
                (true, true, types::F64) => IntToFpuOp::I32ToF64,
                (false, true, types::F64) => IntToFpuOp::U32ToF64,
                (true, false, types::F32) => IntToFpuOp::I64ToF32,
                (false, false, types::F32) => IntToFpuOp::U64ToF32,
                (true, false, types::F64) => IntToFpuOp::I64ToF64,
                (false, false, types::F64) => IntToFpuOp::U64ToF64,
                _ => {
                    return Err(CodegenError::Unsupported(format!(
                        "{opcode} to {to_ty}"
                    )))
                }
            };
            ctx.emit(Inst::IntToFpu { op, rd, rn });
        }

        // Calls.
        Opcode::Call | Opcode::CallIndirect => {
            backend.lower_call(ctx, inst, None)?;
        }

        _ => {
            return Err(CodegenError::Unsupported(format!(
                "no lowering rule for {opcode}"
            )))
        }
    }
    Ok(())
}

fn mask_bits(ty: Type) -> u64 {
    if ty.bits() >= 64 {
        u64::MAX
    } else {
        (1u64 << ty.bits()) - 1
    }
}

/// Float-to-integer conversion with the full trap semantics: trap on NaN,
/// trap when the (truncated) value cannot be represented.
fn lower_fcvt_to_int(
    ctx: &mut Lower<Inst>,
    inst: ir::Inst,
    opcode: Opcode,
) -> CodegenResult<()> {
    let from_ty = ctx.value_ty(ctx.input_value(inst, 0));
    let to_ty = ctx.output_ty(inst, 0);
    let signed = opcode == Opcode::FcvtToSint;
    let rd = ctx.output_reg(inst, 0);
    let rn = ctx.put_value_in_reg(ctx.input_value(inst, 0));
    let size = ScalarSize::from_ty(from_ty);

    if to_ty.bits() > 64 || !to_ty.is_int() {
        return Err(CodegenError::Unsupported(format!("{opcode} to {to_ty}")));
    }
    let out_bits = to_ty.bits().min(64);

    // NaN input: trap with a conversion error.
    ctx.emit(Inst::FpuCmp {
        size,
        rn,
        rm: rn,
    });
    ctx.emit(Inst::TrapIf {
        kind: CondBrKind::Cond(Cond::Vs),
        trap_code: ir::TrapCode::BadConversionToInteger,
    });

    // Bounds: the valid inputs are (lo, hi) with lo inclusive for the
    // signed minimum (exactly representable) and both bounds exclusive
    // otherwise.
    let (lo_bits64, hi_bits64, lo_bits32, hi_bits32) = bounds_for(out_bits, signed);
    let lo = ctx.alloc_tmp(RegClass::Float);
    let hi = ctx.alloc_tmp(RegClass::Float);
    match size {
        ScalarSize::Size64 => {
            ctx.emit(Inst::LoadFpuConst64 {
                rd: lo,
                const_data: lo_bits64,
            });
            ctx.emit(Inst::LoadFpuConst64 {
                rd: hi,
                const_data: hi_bits64,
            });
        }
        ScalarSize::Size32 => {
            ctx.emit(Inst::LoadFpuConst32 {
                rd: lo,
                const_data: lo_bits32,
            });
            ctx.emit(Inst::LoadFpuConst32 {
                rd: hi,
                const_data: hi_bits32,
            });
        }
    }
    // Trap when rn >= hi.
    ctx.emit(Inst::FpuCmp {
        size,
        rn,
        rm: hi.to_reg(),
    });
    ctx.emit(Inst::TrapIf {
        kind: CondBrKind::Cond(Cond::Ge),
        trap_code: ir::TrapCode::IntegerOverflow,
    });
    // Trap when rn < lo (signed; unsigned uses <= -1).
    ctx.emit(Inst::FpuCmp {
        size,
        rn,
        rm: lo.to_reg(),
    });
    ctx.emit(Inst::TrapIf {
        kind: CondBrKind::Cond(if signed { Cond::Mi } else { Cond::Ls }),
        trap_code: ir::TrapCode::IntegerOverflow,
    });

    let op = match (size, signed, out_bits <= 32) {
        (ScalarSize::Size32, true, true) => FpuToIntOp::F32ToI32,
        (ScalarSize::Size32, false, true) => FpuToIntOp::F32ToU32,
        (ScalarSize::Size32, true, false) => FpuToIntOp::F32ToI64,
        (ScalarSize::Size32, false, false) => FpuToIntOp::F32ToU64,
        (ScalarSize::Size64, true, true) => FpuToIntOp::F64ToI32,
        (ScalarSize::Size64, false, true) => FpuToIntOp::F64ToU32,
        (ScalarSize::Size64, true, false) => FpuToIntOp::F64ToI64,
        (ScalarSize::Size64, false, false) => FpuToIntOp::F64ToU64,
    };
    ctx.emit(Inst::FpuToInt { op, rd, rn });
    Ok(())
}

/// The comparison bounds for float-to-int conversions: `(f64 lo, f64 hi,
/// f32 lo, f32 hi)` bit patterns.
///
/// For signed targets, `lo` is the exact minimum (valid, compared with
/// `<`); `hi` is 2^(bits-1) (invalid, compared with `>=`). For unsigned
/// targets, `lo` is -1.0 (compared with `<=`, since anything above -1
/// truncates to a valid 0) and `hi` is 2^bits.
fn bounds_for(out_bits: u32, signed: bool) -> (u64, u64, u32, u32) {
    match (out_bits, signed) {
        // i32: [-2^31, 2^31)
        (32, true) => (
            0xC1E0_0000_0000_0000, // -2^31
            0x41E0_0000_0000_0000, // 2^31
            0xCF00_0000,
            0x4F00_0000,
        ),
        // i64: [-2^63, 2^63)
        (64, true) => (
            0xC3E0_0000_0000_0000,
            0x43E0_0000_0000_0000,
            0xDF00_0000,
            0x5F00_0000,
        ),
        // i16/i8 piggyback on the 32-bit conversion with tighter bounds.
        (16, true) => (
            0xC0E0_0000_0000_0000, // -32768
            0x40E0_0000_0000_0000, // 32768
            0xC700_0000,
            0x4700_0000,
        ),
        (8, true) => (
            0xC060_0000_0000_0000, // -128
            0x4060_0000_0000_0000, // 128
            0xC300_0000,
            0x4300_0000,
        ),
        // Unsigned: (-1, 2^bits)
        (32, false) => (
            0xBFF0_0000_0000_0000, // -1.0
            0x41F0_0000_0000_0000, // 2^32
            0xBF80_0000,
            0x4F80_0000,
        ),
        (64, false) => (
            0xBFF0_0000_0000_0000,
            0x43F0_0000_0000_0000,
            0xBF80_0000,
            0x5F80_0000,
        ),
        (16, false) => (
            0xBFF0_0000_0000_0000,
            0x40F0_0000_0000_0000, // 65536
            0xBF80_0000,
            0x4780_0000,
        ),
        (8, false) => (
            0xBFF0_0000_0000_0000,
            0x4070_0000_0000_0000, // 256
            0xBF80_0000,
            0x4380_0000,
        ),
        (bits, _) => panic!("unexpected conversion width {bits}"),
    }
}
