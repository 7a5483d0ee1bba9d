//! Implementation of a standard AArch64 ABI.

use crate::ir::{types, AbiParam, ArgumentExtension, ArgumentPurpose, Signature, Type};
use crate::isa::aarch64::inst::*;
use crate::machinst::abi::{ABIArg, ABIArgSlot, ArgsOrRets, FrameLayout, SigData};
use crate::machinst::{RealReg, RegClass};
use crate::result::{CodegenError, CodegenResult};
use smallvec::smallvec;

/// Limit on the size of argument and return-value areas on the stack, to
/// avoid integer overflow issues with 32-bit arithmetic: 128 MiB.
const STACK_ARG_RET_SIZE_LIMIT: u32 = 128 * 1024 * 1024;

/// The kind of a homogeneous aggregate, per AAPCS64: a composite of one to
/// four identical floating point or vector members passes in consecutive
/// V registers when a complete set is free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HomogeneousAggregate {
    /// A homogeneous floating-point aggregate of the given element type and
    /// count.
    Hfa(Type, u8),
    /// A homogeneous short-vector aggregate.
    Hva(Type, u8),
}

/// Classify a field list as an HFA/HVA, if it is one.
///
/// Field order follows the in-memory (little-endian, first field lowest)
/// layout; the first field lands in the lowest-numbered V register.
pub fn classify_homogeneous_aggregate(fields: &[Type]) -> Option<HomogeneousAggregate> {
    let first = *fields.first()?;
    if fields.len() > 4 || !fields.iter().all(|&ty| ty == first) {
        return None;
    }
    let n = fields.len() as u8;
    if first.is_float() {
        Some(HomogeneousAggregate::Hfa(first, n))
    } else if first.is_vector() {
        Some(HomogeneousAggregate::Hva(first, n))
    } else {
        None
    }
}

/// Compute the register/stack locations for a parameter or return list
/// under the AAPCS64 rules (with the Fast-convention register extension).
///
/// Returns the classified locations, the stack space consumed, and the
/// index of the synthesized return-area pointer when one was added.
pub fn compute_arg_locs(
    call_conv: crate::isa::CallConv,
    params: &[AbiParam],
    args_or_rets: ArgsOrRets,
    add_ret_area_ptr: bool,
) -> CodegenResult<(Vec<ABIArg>, u32, Option<usize>)> {
    // AAPCS64 integer arguments use x0..x7 and float arguments v0..v7;
    // the Fast convention extends these through x17 / v15.
    let (max_int, max_float) = if call_conv.extends_arg_regs() {
        (18u8, 16u8)
    } else {
        (8u8, 8u8)
    };

    let mut next_int = 0u8;
    let mut next_float = 0u8;
    let mut next_stack: u32 = 0;
    let mut ret = Vec::with_capacity(params.len());

    for param in params {
        let ty = param.value_type;

        // The indirect-return pointer is pinned to x8.
        if param.purpose == ArgumentPurpose::StructReturn {
            debug_assert_eq!(args_or_rets, ArgsOrRets::Args);
            ret.push(ABIArg::reg(
                RealReg::new(RegClass::Int, 8),
                types::I64,
                param.extension,
                param.purpose,
            ));
            continue;
        }

        if let ArgumentPurpose::StructArgument(size) = param.purpose {
            // The struct body lives in the argument area; the value is the
            // pointer, passed like an ordinary integer argument.
            let size = (size + 7) & !7;
            let offset = i64::from(next_stack);
            next_stack += size;
            let pointer = if next_int < max_int {
                let reg = RealReg::new(RegClass::Int, next_int);
                next_int += 1;
                Some(ABIArgSlot::Reg {
                    reg,
                    ty: types::I64,
                    extension: ArgumentExtension::None,
                })
            } else {
                None
            };
            ret.push(ABIArg::StructArg {
                offset,
                size: u64::from(size),
                pointer,
            });
            continue;
        }

        if ty == types::I128 {
            // A 128-bit integer takes an even-aligned register pair, or
            // 16 bytes of 16-aligned stack.
            next_int = (next_int + 1) & !1;
            if next_int + 1 < max_int || (next_int + 1 == max_int && max_int % 2 == 0) {
                let lo = RealReg::new(RegClass::Int, next_int);
                let hi = RealReg::new(RegClass::Int, next_int + 1);
                next_int += 2;
                ret.push(ABIArg::Slots {
                    slots: smallvec![
                        ABIArgSlot::Reg {
                            reg: lo,
                            ty: types::I64,
                            extension: ArgumentExtension::None,
                        },
                        ABIArgSlot::Reg {
                            reg: hi,
                            ty: types::I64,
                            extension: ArgumentExtension::None,
                        },
                    ],
                    purpose: param.purpose,
                });
            } else {
                next_int = max_int;
                next_stack = (next_stack + 15) & !15;
                ret.push(ABIArg::Slots {
                    slots: smallvec![
                        ABIArgSlot::Stack {
                            offset: i64::from(next_stack),
                            ty: types::I64,
                            extension: ArgumentExtension::None,
                        },
                        ABIArgSlot::Stack {
                            offset: i64::from(next_stack) + 8,
                            ty: types::I64,
                            extension: ArgumentExtension::None,
                        },
                    ],
                    purpose: param.purpose,
                });
                next_stack += 16;
            }
            continue;
        }

        let is_float = ty.is_float() || ty.is_vector();
        let (next_reg, max_reg, class) = if is_float {
            (&mut next_float, max_float, RegClass::Float)
        } else {
            (&mut next_int, max_int, RegClass::Int)
        };

        if *next_reg < max_reg {
            let reg = RealReg::new(class, *next_reg);
            *next_reg += 1;
            ret.push(ABIArg::reg(reg, ty, param.extension, param.purpose));
        } else {
            // Stack slots are at least 8 bytes, 16 for vectors.
            let size = ty.bytes().max(8);
            let align = size.min(16);
            next_stack = (next_stack + align - 1) & !(align - 1);
            ret.push(ABIArg::stack(
                i64::from(next_stack),
                ty,
                param.extension,
                param.purpose,
            ));
            next_stack += size;
        }
    }

    let extra_arg = if add_ret_area_ptr {
        debug_assert_eq!(args_or_rets, ArgsOrRets::Args);
        let idx = ret.len();
        ret.push(ABIArg::reg(
            RealReg::new(RegClass::Int, 8),
            types::I64,
            ArgumentExtension::None,
            ArgumentPurpose::Normal,
        ));
        Some(idx)
    } else {
        None
    };

    next_stack = (next_stack + 15) & !15;
    if next_stack > STACK_ARG_RET_SIZE_LIMIT {
        return Err(CodegenError::Lowering(
            "stack argument area exceeds the implementation limit".into(),
        ));
    }
    Ok((ret, next_stack, extra_arg))
}

/// Classify a full signature into argument and return locations.
pub fn compute_sig_data(sig: &Signature) -> CodegenResult<SigData> {
    let (rets, sized_stack_ret_space, _) =
        compute_arg_locs(sig.call_conv, &sig.returns, ArgsOrRets::Rets, false)?;
    let need_ret_area = sized_stack_ret_space > 0;
    let (args, sized_stack_arg_space, stack_ret_arg) = compute_arg_locs(
        sig.call_conv,
        &sig.params,
        ArgsOrRets::Args,
        need_ret_area,
    )?;
    Ok(SigData {
        args,
        rets,
        sized_stack_arg_space,
        sized_stack_ret_space,
        stack_ret_arg,
        call_conv: sig.call_conv,
    })
}

/// Compute the frame layout once the register allocator has reported the
/// clobbered callee-saves and spill count.
pub fn compute_frame_layout(
    stack_slots_size: u32,
    spill_slots: u32,
    outgoing_args_size: u32,
    incoming_args_size: u32,
    clobbered_callee_saves: Vec<RealReg>,
    is_leaf: bool,
) -> FrameLayout {
    let spill_slots_size = spill_slots * 16;
    let fixed_frame_storage_size = ((stack_slots_size + 15) & !15) + spill_slots_size;

    // Each saved register takes 8 bytes (callee-saved V registers only
    // preserve their low 64 bits under AAPCS64); the area keeps 16-byte
    // alignment.
    let clobber_size = {
        let n = clobbered_callee_saves.len() as u32;
        (n * 8 + 15) & !15
    };

    // A function needs the FP/LR setup when it calls, clobbers, or uses
    // any frame storage. Frames over 512 bytes keep the frame pointer as
    // well (larger offsets still resolve against SP, but FP anchors the
    // unwinder).
    let needs_frame = !is_leaf
        || clobber_size > 0
        || fixed_frame_storage_size > 0
        || outgoing_args_size > 0
        || incoming_args_size > 0;
    let setup_area_size = if needs_frame { 16 } else { 0 };

    FrameLayout {
        setup_area_size,
        clobber_size,
        fixed_frame_storage_size,
        spill_slots_size,
        outgoing_args_size: (outgoing_args_size + 15) & !15,
        incoming_args_size,
        clobbered_callee_saves,
    }
}

/// One guard page.
const GUARD_PAGE: u32 = 4096;

/// Generate the prologue instruction sequence for the given frame.
pub fn gen_prologue(frame: &FrameLayout, enable_probestack: bool) -> Vec<Inst> {
    let mut insts = Vec::new();
    if frame.setup_area_size == 0 {
        return insts;
    }

    // stp fp, lr, [sp, #-16]!
    insts.push(Inst::StoreP64 {
        rt: fp_reg(),
        rt2: link_reg(),
        mem: PairAMode::SPPreIndexed(
            SImm7Scaled::maybe_from_i64(-16, types::I64).unwrap(),
        ),
    });
    // mov fp, sp
    insts.push(Inst::Mov {
        size: OperandSize::Size64,
        rd: writable_fp_reg(),
        rm: stack_reg(),
    });

    let below = frame.frame_size_below_setup();
    if below > GUARD_PAGE && enable_probestack {
        insts.push(Inst::StackProbeLoop {
            pages: below / GUARD_PAGE,
        });
    }
    if below > 0 {
        insts.extend(gen_sp_adjust(-(below as i64)));
    }

    // Save the clobbered callee-saves above the fixed storage: float
    // registers first (lower addresses), then integer registers. Offsets
    // past the stp immediate range fall back to single stores, which the
    // emitter legalizes with a scratch register when needed.
    let base = frame.outgoing_args_size + frame.fixed_frame_storage_size;
    for (i, pair) in save_order(&frame.clobbered_callee_saves).iter().enumerate() {
        let offset = i64::from(base) + (i as i64) * 16;
        match pair {
            SavePair::Two(a, b) => match SImm7Scaled::maybe_from_i64(offset, types::I64) {
                Some(simm7) => insts.push(Inst::StoreP64 {
                    rt: reg_of(*a),
                    rt2: reg_of(*b),
                    mem: PairAMode::SignedOffset(stack_reg(), simm7),
                }),
                None => {
                    insts.push(store_one(*a, offset));
                    insts.push(store_one(*b, offset + 8));
                }
            },
            SavePair::One(a) => insts.push(store_one(*a, offset)),
        }
    }

    insts
}

/// Generate the epilogue sequence (everything up to, but excluding, the
/// final `ret`/`br`).
pub fn gen_epilogue(frame: &FrameLayout) -> Vec<Inst> {
    let mut insts = Vec::new();
    if frame.setup_area_size == 0 {
        return insts;
    }

    let base = frame.outgoing_args_size + frame.fixed_frame_storage_size;
    for (i, pair) in save_order(&frame.clobbered_callee_saves).iter().enumerate() {
        let offset = i64::from(base) + (i as i64) * 16;
        match pair {
            SavePair::Two(a, b) => match SImm7Scaled::maybe_from_i64(offset, types::I64) {
                Some(simm7) => insts.push(Inst::LoadP64 {
                    rt: crate::machinst::Writable::from_reg(reg_of(*a)),
                    rt2: crate::machinst::Writable::from_reg(reg_of(*b)),
                    mem: PairAMode::SignedOffset(stack_reg(), simm7),
                }),
                None => {
                    insts.push(load_one(*a, offset));
                    insts.push(load_one(*b, offset + 8));
                }
            },
            SavePair::One(a) => insts.push(load_one(*a, offset)),
        }
    }

    let below = frame.frame_size_below_setup();
    if below > 0 {
        insts.extend(gen_sp_adjust(below as i64));
    }
    // ldp fp, lr, [sp], #16
    insts.push(Inst::LoadP64 {
        rt: writable_fp_reg(),
        rt2: writable_link_reg(),
        mem: PairAMode::SPPostIndexed(SImm7Scaled::maybe_from_i64(16, types::I64).unwrap()),
    });
    insts
}

/// Adjust SP by a constant, splitting into shifted 12-bit immediates; large
/// displacements go through the scratch register.
pub fn gen_sp_adjust(amount: i64) -> Vec<Inst> {
    let mut insts = Vec::new();
    let (alu_op, magnitude) = if amount >= 0 {
        (ALUOp::Add, amount as u64)
    } else {
        (ALUOp::Sub, (-amount) as u64)
    };
    if let Some(imm12) = Imm12::maybe_from_u64(magnitude) {
        insts.push(Inst::AluRRImm12 {
            alu_op,
            size: OperandSize::Size64,
            rd: writable_stack_reg(),
            rn: stack_reg(),
            imm12,
        });
    } else if magnitude < (1 << 24) {
        // Low and high halves as two shifted immediates.
        let lo = magnitude & 0xfff;
        let hi = magnitude & 0xfff_000;
        insts.push(Inst::AluRRImm12 {
            alu_op,
            size: OperandSize::Size64,
            rd: writable_stack_reg(),
            rn: stack_reg(),
            imm12: Imm12::maybe_from_u64(hi).unwrap(),
        });
        if lo != 0 {
            insts.push(Inst::AluRRImm12 {
                alu_op,
                size: OperandSize::Size64,
                rd: writable_stack_reg(),
                rn: stack_reg(),
                imm12: Imm12::maybe_from_u64(lo).unwrap(),
            });
        }
    } else {
        // Materialize into the scratch register; add/sub extended so SP is
        // legal as an operand.
        insts.extend(Inst::load_constant(writable_spilltmp_reg(), magnitude));
        insts.push(Inst::AluRRRExtend {
            alu_op,
            size: OperandSize::Size64,
            rd: writable_stack_reg(),
            rn: stack_reg(),
            rm: spilltmp_reg(),
            extendop: ExtendOp::UXTX,
        });
    }
    insts
}

enum SavePair {
    Two(RealReg, RealReg),
    One(RealReg),
}

/// Pair the callee-saves for stp/ldp, floats first so integer saves sit at
/// higher addresses (next to the FP/LR pair).
fn save_order(clobbered: &[RealReg]) -> Vec<SavePair> {
    let floats: Vec<RealReg> = clobbered
        .iter()
        .copied()
        .filter(|r| r.class().bank() == 1)
        .collect();
    let ints: Vec<RealReg> = clobbered
        .iter()
        .copied()
        .filter(|r| r.class().bank() == 0)
        .collect();
    let mut out = Vec::new();
    for group in [floats, ints] {
        let mut it = group.chunks_exact(2);
        for pair in it.by_ref() {
            out.push(SavePair::Two(pair[0], pair[1]));
        }
        if let [last] = it.remainder() {
            out.push(SavePair::One(*last));
        }
    }
    out
}

fn reg_of(r: RealReg) -> crate::machinst::Reg {
    r.into()
}

fn store_one(r: RealReg, offset: i64) -> Inst {
    // SPOffset legalizes through the scratch register for offsets beyond
    // any immediate form.
    let mem = AMode::SPOffset(offset);
    if r.class().bank() == 0 {
        Inst::Store64 {
            rd: reg_of(r),
            mem,
        }
    } else {
        Inst::FpuStore64 {
            rd: reg_of(r),
            mem,
        }
    }
}

fn load_one(r: RealReg, offset: i64) -> Inst {
    let mem = AMode::SPOffset(offset);
    if r.class().bank() == 0 {
        Inst::ULoad64 {
            rd: crate::machinst::Writable::from_reg(reg_of(r)),
            mem,
        }
    } else {
        Inst::FpuLoad64 {
            rd: crate::machinst::Writable::from_reg(reg_of(r)),
            mem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{F32, F64, I128, I32, I64, I8};
    use crate::isa::CallConv;

    fn params(tys: &[Type]) -> Vec<AbiParam> {
        tys.iter().map(|&ty| AbiParam::new(ty)).collect()
    }

    fn reg_slot(arg: &ABIArg) -> Option<(RegClass, u8)> {
        match arg {
            ABIArg::Slots { slots, .. } => match slots.first()? {
                ABIArgSlot::Reg { reg, .. } => Some((reg.class(), reg.hw_enc())),
                _ => None,
            },
            _ => None,
        }
    }

    fn stack_slot(arg: &ABIArg) -> Option<i64> {
        match arg {
            ABIArg::Slots { slots, .. } => match slots.first()? {
                ABIArgSlot::Stack { offset, .. } => Some(*offset),
                _ => None,
            },
            _ => None,
        }
    }

    #[test]
    fn mixed_int_float_args() {
        let (locs, stack, _) = compute_arg_locs(
            CallConv::SystemV,
            &params(&[I64, F64, I32, F32, I8]),
            ArgsOrRets::Args,
            false,
        )
        .unwrap();
        // Integers and floats draw from separate register files.
        assert_eq!(reg_slot(&locs[0]), Some((RegClass::Int, 0)));
        assert_eq!(reg_slot(&locs[1]), Some((RegClass::Float, 0)));
        assert_eq!(reg_slot(&locs[2]), Some((RegClass::Int, 1)));
        assert_eq!(reg_slot(&locs[3]), Some((RegClass::Float, 1)));
        assert_eq!(reg_slot(&locs[4]), Some((RegClass::Int, 2)));
        assert_eq!(stack, 0);
    }

    #[test]
    fn overflow_to_stack_past_x7() {
        let tys = [I64; 10];
        let (locs, stack, _) =
            compute_arg_locs(CallConv::SystemV, &params(&tys), ArgsOrRets::Args, false)
                .unwrap();
        for i in 0..8 {
            assert_eq!(reg_slot(&locs[i]), Some((RegClass::Int, i as u8)));
        }
        assert_eq!(stack_slot(&locs[8]), Some(0));
        assert_eq!(stack_slot(&locs[9]), Some(8));
        assert_eq!(stack, 16);
    }

    #[test]
    fn fast_convention_extends_registers() {
        let tys = [I64; 12];
        let (locs, stack, _) =
            compute_arg_locs(CallConv::Fast, &params(&tys), ArgsOrRets::Args, false).unwrap();
        // All twelve fit in registers under the extended set.
        for i in 0..12 {
            assert_eq!(reg_slot(&locs[i]), Some((RegClass::Int, i as u8)));
        }
        assert_eq!(stack, 0);
    }

    #[test]
    fn i128_takes_even_aligned_pair() {
        let (locs, _, _) = compute_arg_locs(
            CallConv::SystemV,
            &params(&[I64, I128]),
            ArgsOrRets::Args,
            false,
        )
        .unwrap();
        // x0 for the i64; the pair skips x1 and takes x2/x3.
        assert_eq!(reg_slot(&locs[0]), Some((RegClass::Int, 0)));
        match &locs[1] {
            ABIArg::Slots { slots, .. } => {
                assert_eq!(slots.len(), 2);
                match (&slots[0], &slots[1]) {
                    (
                        ABIArgSlot::Reg { reg: lo, .. },
                        ABIArgSlot::Reg { reg: hi, .. },
                    ) => {
                        assert_eq!(lo.hw_enc(), 2);
                        assert_eq!(hi.hw_enc(), 3);
                    }
                    other => panic!("unexpected slots {other:?}"),
                }
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn sret_pinned_to_x8() {
        let mut ps = params(&[I64]);
        ps.push(AbiParam::special(I64, ArgumentPurpose::StructReturn));
        let (locs, _, _) =
            compute_arg_locs(CallConv::SystemV, &ps, ArgsOrRets::Args, false).unwrap();
        assert_eq!(reg_slot(&locs[1]), Some((RegClass::Int, 8)));
    }

    #[test]
    fn hfa_classification() {
        assert_eq!(
            classify_homogeneous_aggregate(&[F64, F64, F64]),
            Some(HomogeneousAggregate::Hfa(F64, 3))
        );
        assert_eq!(
            classify_homogeneous_aggregate(&[F32; 4]),
            Some(HomogeneousAggregate::Hfa(F32, 4))
        );
        assert_eq!(classify_homogeneous_aggregate(&[F32; 5]), None);
        assert_eq!(classify_homogeneous_aggregate(&[F32, F64]), None);
        assert_eq!(classify_homogeneous_aggregate(&[I32, I32]), None);
        assert_eq!(
            classify_homogeneous_aggregate(&[types::F32X4, types::F32X4]),
            Some(HomogeneousAggregate::Hva(types::F32X4, 2))
        );
    }

    #[test]
    fn frame_layout_sizes() {
        let frame = compute_frame_layout(
            24,
            2,
            0,
            0,
            vec![
                RealReg::new(RegClass::Int, 19),
                RealReg::new(RegClass::Int, 20),
                RealReg::new(RegClass::Float, 8),
            ],
            false,
        );
        // 24 bytes of slots round to 32, plus two 16-byte spill slots.
        assert_eq!(frame.fixed_frame_storage_size, 64);
        // Three saves round to 32 bytes.
        assert_eq!(frame.clobber_size, 32);
        assert_eq!(frame.setup_area_size, 16);
        assert_eq!(frame.total_frame_size(), 112);
    }

    #[test]
    fn leaf_without_frame() {
        let frame = compute_frame_layout(0, 0, 0, 0, vec![], true);
        assert_eq!(frame.setup_area_size, 0);
        assert_eq!(frame.total_frame_size(), 0);
        assert!(gen_prologue(&frame, true).is_empty());
        assert!(gen_epilogue(&frame).is_empty());
    }
}
