//! Lowering rules for AArch64: driver and shared helpers.
//!
//! The per-opcode dispatch lives in `lower_inst.rs`; this module holds the
//! backend state, entry-block argument setup, branch lowering, and the call
//! marshaling shared between the call-shaped opcodes.

use crate::ir::{self, types, ArgumentExtension, Opcode, Value};
use crate::isa::aarch64::abi::compute_sig_data;
use crate::isa::aarch64::inst::*;
use crate::machinst::abi::{ABIArg, ABIArgSlot, SigData};
use crate::machinst::{
    Lower, LowerBackend, MachInst, MachLabel, Reg, RegClass, RealRegSet, Writable,
};
use crate::result::{CodegenError, CodegenResult};
use crate::settings::Flags;
use crate::fx::FxHashMap;
use std::cell::{Cell, RefCell};

/// The state threaded through one function's lowering.
pub(crate) struct AArch64Lowering<'a> {
    pub flags: &'a Flags,
    /// The classified signature of the function being compiled.
    pub sig_data: SigData,
    /// Offsets of the IR stack slots within the stack-slot storage area.
    pub stackslot_offsets: FxHashMap<ir::StackSlot, i64>,
    /// vreg index -> constant value, for rematerialization.
    pub remat: RefCell<FxHashMap<u32, u64>>,
    /// Largest outgoing argument area any call site needs.
    pub outgoing_args_size: Cell<u32>,
    /// The register holding the return-area pointer, when the signature
    /// returns through memory.
    pub ret_area_ptr: Cell<Option<Reg>>,
}

impl<'a> AArch64Lowering<'a> {
    pub fn new(
        flags: &'a Flags,
        func: &ir::Function,
    ) -> CodegenResult<Self> {
        let sig_data = compute_sig_data(&func.signature)?;
        // Lay out the IR stack slots within their storage area, honoring
        // each slot's alignment.
        let mut stackslot_offsets = FxHashMap::default();
        let mut offset: i64 = 0;
        for (ss, data) in func.stack_slots.iter() {
            let align = i64::from(data.align()).min(16);
            offset = (offset + align - 1) & !(align - 1);
            stackslot_offsets.insert(ss, offset);
            offset += i64::from(data.size);
        }
        Ok(Self {
            flags,
            sig_data,
            stackslot_offsets,
            remat: RefCell::new(FxHashMap::default()),
            outgoing_args_size: Cell::new(0),
            ret_area_ptr: Cell::new(None),
        })
    }

    /// Total size of the IR stack-slot storage.
    pub fn stackslots_size(&self, func: &ir::Function) -> u32 {
        let mut size: i64 = 0;
        for (ss, data) in func.stack_slots.iter() {
            let end = self.stackslot_offsets[&ss] + i64::from(data.size);
            size = size.max(end);
        }
        size as u32
    }
}

/// Emit `cmp` of a value against zero (subs with the zero register).
pub(crate) fn emit_cmp_zero(ctx: &mut Lower<Inst>, rn: Reg, size: OperandSize) {
    ctx.emit(Inst::AluRRImm12 {
        alu_op: ALUOp::SubS,
        size,
        rd: writable_zero_reg(),
        rn,
        imm12: Imm12::zero(),
    });
}

/// Put a narrow integer value in a register with its upper bits defined:
/// zero- or sign-extended to at least 32 bits.
pub(crate) fn put_extended(
    ctx: &mut Lower<Inst>,
    value: Value,
    signed: bool,
) -> Reg {
    let ty = ctx.value_ty(value);
    let reg = ctx.put_value_in_reg(value);
    let bits = ty.bits();
    if bits >= 32 {
        return reg;
    }
    let tmp = ctx.alloc_tmp(RegClass::Int);
    ctx.emit(Inst::Extend {
        rd: tmp,
        rn: reg,
        signed,
        from_bits: bits as u8,
        to_bits: 32,
    });
    tmp.to_reg()
}

/// Emit a compare of the two operands of an `icmp`-shaped instruction,
/// extending narrow operands per the condition's signedness.
pub(crate) fn lower_icmp_to_flags(
    ctx: &mut Lower<Inst>,
    a: Value,
    b: Value,
    cond: ir::condcodes::IntCC,
) -> Cond {
    let ty = ctx.value_ty(a);
    let signed = matches!(
        cond,
        ir::condcodes::IntCC::SignedLessThan
            | ir::condcodes::IntCC::SignedGreaterThanOrEqual
            | ir::condcodes::IntCC::SignedGreaterThan
            | ir::condcodes::IntCC::SignedLessThanOrEqual
    );
    let size = OperandSize::from_ty(ty);
    let (rn, rm) = if ty.bits() < 32 {
        (
            put_extended(ctx, a, signed),
            put_extended(ctx, b, signed),
        )
    } else {
        (ctx.put_value_in_reg(a), ctx.put_value_in_reg(b))
    };
    ctx.emit(Inst::AluRRR {
        alu_op: ALUOp::SubS,
        size,
        rd: writable_zero_reg(),
        rn,
        rm,
    });
    cond_from_intcc(cond)
}

/// Lower a boolean-producing condition into a `CondBrKind`, fusing a
/// single-use `icmp`/`fcmp` producer into the flags directly.
pub(crate) fn lower_condition(ctx: &mut Lower<Inst>, cond_val: Value) -> CondBrKind {
    if let Some(def) = ctx.get_single_use_def(cond_val) {
        match ctx.f.dfg.insts[def] {
            ir::InstructionData::IntCompare {
                opcode: Opcode::Icmp,
                args,
                cond,
            } => {
                ctx.sink_inst(def);
                // icmp eq/ne x, 0 tests the register directly.
                let a = ctx.f.dfg.resolve_aliases(args[0]);
                let b = ctx.f.dfg.resolve_aliases(args[1]);
                if ctx.value_as_const(b) == Some(0) && ctx.value_ty(a).bits() >= 32 {
                    let size = OperandSize::from_ty(ctx.value_ty(a));
                    let rn = ctx.put_value_in_reg(a);
                    ctx.use_constant(b);
                    return match cond {
                        ir::condcodes::IntCC::Equal => CondBrKind::Zero(rn, size),
                        ir::condcodes::IntCC::NotEqual => CondBrKind::NotZero(rn, size),
                        _ => {
                            let c = lower_icmp_to_flags(ctx, a, b, cond);
                            CondBrKind::Cond(c)
                        }
                    };
                }
                let c = lower_icmp_to_flags(ctx, a, b, cond);
                CondBrKind::Cond(c)
            }
            ir::InstructionData::IntCompareImm {
                opcode: Opcode::IcmpImm,
                arg,
                cond,
                imm,
            } => {
                ctx.sink_inst(def);
                let a = ctx.f.dfg.resolve_aliases(arg);
                let size = OperandSize::from_ty(ctx.value_ty(a));
                if imm.bits() == 0 && ctx.value_ty(a).bits() >= 32 {
                    let rn = ctx.put_value_in_reg(a);
                    match cond {
                        ir::condcodes::IntCC::Equal => {
                            return CondBrKind::Zero(rn, size)
                        }
                        ir::condcodes::IntCC::NotEqual => {
                            return CondBrKind::NotZero(rn, size)
                        }
                        _ => {}
                    }
                }
                let rn = ctx.put_value_in_reg(a);
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
                    for inst in Inst::load_constant(tmp, imm.bits() as u64) {
                        ctx.emit(inst);
                    }
                    ctx.emit(Inst::AluRRR {
                        alu_op: ALUOp::SubS,
                        size,
                        rd: writable_zero_reg(),
                        rn,
                        rm: tmp.to_reg(),
                    });
                }
                CondBrKind::Cond(cond_from_intcc(cond))
            }
            ir::InstructionData::FloatCompare {
                opcode: Opcode::Fcmp,
                args,
                cond,
            } if cond != ir::condcodes::FloatCC::UnorderedOrEqual => {
                ctx.sink_inst(def);
                let rn = ctx.put_value_in_reg(args[0]);
                let rm = ctx.put_value_in_reg(args[1]);
                let size = ScalarSize::from_ty(ctx.value_ty(args[0]));
                ctx.emit(Inst::FpuCmp { size, rn, rm });
                CondBrKind::Cond(cond_from_floatcc(cond))
            }
            _ => {
                let rn = ctx.put_value_in_reg(cond_val);
                CondBrKind::NotZero(rn, OperandSize::from_ty(ctx.value_ty(cond_val)))
            }
        }
    } else {
        let rn = ctx.put_value_in_reg(cond_val);
        CondBrKind::NotZero(rn, OperandSize::from_ty(ctx.value_ty(cond_val)))
    }
}

/// Compute the addressing mode for a load/store with the given address
/// value and static offset, folding single-use address arithmetic.
pub(crate) fn lower_amode(
    ctx: &mut Lower<Inst>,
    addr: Value,
    offset: i64,
    access_ty: ir::Type,
) -> AMode {
    // Fold a single-use `iadd` feeding the address.
    if offset == 0 {
        if let Some(def) = ctx.get_single_use_def(addr) {
            if let ir::InstructionData::Binary {
                opcode: Opcode::Iadd,
                args,
            } = ctx.f.dfg.insts[def]
            {
                if ctx.value_ty(args[0]).bits() == 64 {
                    // base + (index << log2(size)) uses the scaled mode.
                    let index = ctx.f.dfg.resolve_aliases(args[1]);
                    if let Some(index_def) = ctx.get_single_use_def(index) {
                        if let ir::InstructionData::Binary {
                            opcode: Opcode::Ishl,
                            args: shift_args,
                        } = ctx.f.dfg.insts[index_def]
                        {
                            let amt = ctx.value_as_const(shift_args[1]);
                            if amt == Some(u64::from(access_ty.bytes().trailing_zeros()))
                                && access_ty.bytes() > 1
                            {
                                ctx.sink_inst(def);
                                ctx.sink_inst(index_def);
                                ctx.use_constant(shift_args[1]);
                                let base = ctx.put_value_in_reg(args[0]);
                                let idx = ctx.put_value_in_reg(shift_args[0]);
                                return AMode::RegScaled(base, idx, access_ty);
                            }
                        }
                    }
                    // base + constant folds into the offset form.
                    if let Some(c) = ctx.value_as_const(args[1]) {
                        let c = c as i64;
                        ctx.sink_inst(def);
                        ctx.use_constant(args[1]);
                        let base = ctx.put_value_in_reg(args[0]);
                        if let Some(mode) = AMode::reg_maybe_offset(base, c, access_ty) {
                            return mode;
                        }
                        let tmp = ctx.alloc_tmp(RegClass::Int);
                        for inst in Inst::load_constant(tmp, c as u64) {
                            ctx.emit(inst);
                        }
                        return AMode::RegReg(base, tmp.to_reg());
                    }
                    // Plain base + index.
                    ctx.sink_inst(def);
                    let base = ctx.put_value_in_reg(args[0]);
                    let idx = ctx.put_value_in_reg(args[1]);
                    return AMode::RegReg(base, idx);
                }
            }
        }
    }

    let base = ctx.put_value_in_reg(addr);
    if let Some(mode) = AMode::reg_maybe_offset(base, offset, access_ty) {
        return mode;
    }
    let tmp = ctx.alloc_tmp(RegClass::Int);
    for inst in Inst::load_constant(tmp, offset as u64) {
        ctx.emit(inst);
    }
    AMode::RegReg(base, tmp.to_reg())
}

impl<'a> AArch64Lowering<'a> {
    /// Marshal arguments, emit the call, and bind the results.
    pub(crate) fn lower_call(
        &self,
        ctx: &mut Lower<Inst>,
        inst: ir::Inst,
        try_call_handler: Option<MachLabel>,
    ) -> CodegenResult<()> {
        let (callee_value, dest, sig_ref, is_tail) = match &ctx.f.dfg.insts[inst] {
            ir::InstructionData::Call {
                opcode,
                func_ref,
                ..
            } => {
                let ext = &ctx.f.dfg.ext_funcs[*func_ref];
                (
                    None,
                    Some(ext.name.clone()),
                    ext.signature,
                    *opcode == Opcode::ReturnCall,
                )
            }
            ir::InstructionData::TryCall { func_ref, .. } => {
                let ext = &ctx.f.dfg.ext_funcs[*func_ref];
                (None, Some(ext.name.clone()), ext.signature, false)
            }
            ir::InstructionData::CallIndirect {
                opcode,
                sig_ref,
                ..
            } => (
                Some(ctx.f.dfg.inst_args(inst)[0]),
                None,
                *sig_ref,
                *opcode == Opcode::ReturnCallIndirect,
            ),
            other => panic!("not a call: {other:?}"),
        };

        let mut sig = ctx.f.dfg.signatures[sig_ref].clone();
        if try_call_handler.is_some() {
            // The exception status occupies x0; results shift past it.
            let mut returns = vec![ir::AbiParam::new(types::I64)];
            returns.extend(sig.returns.iter().copied());
            sig.returns = returns;
        }
        let call_sig = compute_sig_data(&sig)?;

        if call_sig.sized_stack_arg_space > self.outgoing_args_size.get() {
            self.outgoing_args_size.set(call_sig.sized_stack_arg_space);
        }
        if is_tail && call_sig.sized_stack_arg_space > 0 {
            return Err(CodegenError::Unsupported(
                "tail call with stack arguments".into(),
            ));
        }

        // The fixed argument list (callee address excluded for indirect
        // calls).
        let args: Vec<Value> = if callee_value.is_some() {
            ctx.f.dfg.inst_args(inst)[1..].to_vec()
        } else {
            ctx.f.dfg.inst_args(inst).to_vec()
        };
        debug_assert_eq!(args.len(), call_sig.args.len().saturating_sub(
            call_sig.stack_ret_arg.map(|_| 1).unwrap_or(0)
        ));

        let mut uses: Vec<Reg> = Vec::new();
        for (arg, loc) in args.iter().zip(&call_sig.args) {
            let regs = ctx.put_value_in_regs(*arg);
            match loc {
                ABIArg::Slots { slots, .. } => {
                    for (part, slot) in regs.regs().iter().zip(slots.iter()) {
                        match slot {
                            ABIArgSlot::Reg { reg, ty, extension } => {
                                let dst: Reg = (*reg).into();
                                let src =
                                    extend_for_abi(ctx, *part, *ty, *extension);
                                ctx.emit(Inst::gen_move(
                                    Writable::from_reg(dst),
                                    src,
                                    *ty,
                                ));
                                uses.push(dst);
                            }
                            ABIArgSlot::Stack { offset, ty, .. } => {
                                ctx.emit(Inst::gen_store(
                                    AMode::SPOffset(*offset),
                                    *part,
                                    *ty,
                                ));
                            }
                        }
                    }
                }
                ABIArg::StructArg { .. } => {
                    return Err(CodegenError::Unsupported(
                        "struct arguments at call sites".into(),
                    ));
                }
            }
        }

        // Return-area pointer for large returns.
        if let Some(idx) = call_sig.stack_ret_arg {
            let _ = idx;
            return Err(CodegenError::Unsupported(
                "call returns exceeding the register set".into(),
            ));
        }

        // Result registers.
        let mut defs: Vec<Writable<Reg>> = Vec::new();
        let ret_locs: &[ABIArg] = if try_call_handler.is_some() {
            &call_sig.rets[1..]
        } else {
            &call_sig.rets[..]
        };
        let results: Vec<Value> = ctx.f.dfg.inst_results(inst).to_vec();
        let mut after_moves: Vec<(Writable<Reg>, Reg, ir::Type)> = Vec::new();
        for (result, loc) in results.iter().zip(ret_locs) {
            let regs = ctx.value_regs(*result);
            match loc {
                ABIArg::Slots { slots, .. } => {
                    for (part, slot) in regs.regs().iter().zip(slots.iter()) {
                        match slot {
                            ABIArgSlot::Reg { reg, ty, .. } => {
                                let src: Reg = (*reg).into();
                                defs.push(Writable::from_reg(src));
                                after_moves.push((
                                    Writable::from_reg(*part),
                                    src,
                                    *ty,
                                ));
                            }
                            ABIArgSlot::Stack { .. } => {
                                return Err(CodegenError::Unsupported(
                                    "call returns exceeding the register set".into(),
                                ));
                            }
                        }
                    }
                }
                ABIArg::StructArg { .. } => unreachable!("struct returns use x8"),
            }
        }
        if try_call_handler.is_some() {
            // The status register is a def even though the IR never reads
            // it directly.
            defs.push(Writable::from_reg(xreg(0)));
        }

        let clobbers = prune_clobbers(call_clobbers(call_sig.call_conv), &defs);

        match (dest, callee_value, is_tail) {
            (Some(name), None, false) => ctx.emit(Inst::Call {
                info: Box::new(CallInfo {
                    dest: name,
                    uses,
                    defs,
                    clobbers,
                    try_call_handler,
                }),
            }),
            (Some(name), None, true) => ctx.emit(Inst::ReturnCall {
                info: Box::new(CallInfo {
                    dest: name,
                    uses,
                    defs,
                    clobbers,
                    try_call_handler: None,
                }),
            }),
            (None, Some(callee), false) => {
                let rn = ctx.put_value_in_reg(callee);
                ctx.emit(Inst::CallInd {
                    info: Box::new(CallIndInfo {
                        rn,
                        uses,
                        defs,
                        clobbers,
                    }),
                });
            }
            (None, Some(callee), true) => {
                let rn = ctx.put_value_in_reg(callee);
                ctx.emit(Inst::ReturnCallInd {
                    info: Box::new(CallIndInfo {
                        rn,
                        uses,
                        defs,
                        clobbers,
                    }),
                });
            }
            _ => unreachable!(),
        }

        // Copy results out of their fixed registers.
        for (dst, src, ty) in after_moves {
            ctx.emit(Inst::gen_move(dst, src, ty));
        }
        Ok(())
    }
}

/// Apply an ABI-mandated extension to an argument value.
fn extend_for_abi(
    ctx: &mut Lower<Inst>,
    reg: Reg,
    ty: ir::Type,
    extension: ArgumentExtension,
) -> Reg {
    let bits = ty.bits();
    if extension == ArgumentExtension::None || bits >= 64 || !ty.is_int() {
        return reg;
    }
    let tmp = ctx.alloc_tmp(RegClass::Int);
    ctx.emit(Inst::Extend {
        rd: tmp,
        rn: reg,
        signed: extension == ArgumentExtension::Sext,
        from_bits: bits as u8,
        to_bits: 64,
    });
    tmp.to_reg()
}

/// A call's clobber set must not include its own result registers; the defs
/// carry those.
fn prune_clobbers(clobbers: RealRegSet, defs: &[Writable<Reg>]) -> RealRegSet {
    let mut pruned = RealRegSet::empty();
    for reg in clobbers.iter() {
        let is_def = defs
            .iter()
            .any(|d| d.to_reg().to_real_reg().map(|r| r.index()) == Some(reg.index()));
        if !is_def {
            pruned.insert(reg);
        }
    }
    pruned
}

impl<'a> LowerBackend for AArch64Lowering<'a> {
    type MInst = Inst;

    fn lower(&self, ctx: &mut Lower<Inst>, inst: ir::Inst) -> CodegenResult<()> {
        super::lower_inst::lower_insn_to_regs(self, ctx, inst)
    }

    fn lower_branch(&self, ctx: &mut Lower<Inst>, inst: ir::Inst) -> CodegenResult<()> {
        let fallthrough = ctx.fallthrough_label();
        match ctx.f.dfg.insts[inst] {
            ir::InstructionData::Jump { destination, .. } => {
                let dest = ctx.block_label(destination.block(&ctx.f.dfg.value_lists));
                if Some(dest) != fallthrough {
                    ctx.emit(Inst::Jump { dest });
                }
                Ok(())
            }
            ir::InstructionData::Brif { arg, blocks, .. } => {
                let taken =
                    ctx.block_label(blocks[0].block(&ctx.f.dfg.value_lists));
                let not_taken =
                    ctx.block_label(blocks[1].block(&ctx.f.dfg.value_lists));
                let kind = lower_condition(ctx, arg);
                if Some(not_taken) == fallthrough {
                    ctx.emit(Inst::CondBr { target: taken, kind });
                } else if Some(taken) == fallthrough {
                    ctx.emit(Inst::CondBr {
                        target: not_taken,
                        kind: kind.invert(),
                    });
                } else {
                    ctx.emit(Inst::CondBr { target: taken, kind });
                    ctx.emit(Inst::Jump { dest: not_taken });
                }
                Ok(())
            }
            ir::InstructionData::BranchTable { arg, table, .. } => {
                self.lower_br_table(ctx, arg, table)
            }
            ir::InstructionData::MultiAry {
                opcode: Opcode::Return,
                args,
            } => {
                let values: Vec<Value> =
                    args.as_slice(&ctx.f.dfg.value_lists).to_vec();
                self.lower_return(ctx, &values)
            }
            ir::InstructionData::Trap { code, .. } => {
                ctx.emit(Inst::Udf { trap_code: code });
                Ok(())
            }
            ir::InstructionData::Call {
                opcode: Opcode::ReturnCall,
                ..
            }
            | ir::InstructionData::CallIndirect {
                opcode: Opcode::ReturnCallIndirect,
                ..
            } => self.lower_call(ctx, inst, None),
            ir::InstructionData::TryCall { blocks, .. } => {
                let normal = ctx.block_label(blocks[0].block(&ctx.f.dfg.value_lists));
                let exception =
                    ctx.block_label(blocks[1].block(&ctx.f.dfg.value_lists));
                self.lower_call(ctx, inst, Some(exception))?;
                // The successor parameters may consume the call's results,
                // so their moves follow the call itself.
                ctx.emit_branch_arg_moves(inst)?;
                // The callee reports an exception by returning a non-null
                // pointer in x0.
                ctx.emit(Inst::CondBr {
                    target: exception,
                    kind: CondBrKind::NotZero(xreg(0), OperandSize::Size64),
                });
                if Some(normal) != fallthrough {
                    ctx.emit(Inst::Jump { dest: normal });
                }
                Ok(())
            }
            ref other => Err(CodegenError::Unsupported(format!(
                "terminator {:?}",
                other.opcode()
            ))),
        }
    }

    fn gen_arg_setup(&self, ctx: &mut Lower<Inst>) -> CodegenResult<()> {
        let params = ctx.entry_block_params();
        debug_assert_eq!(
            params.len(),
            self.sig_data.args.len()
                - self.sig_data.stack_ret_arg.map(|_| 1).unwrap_or(0)
        );
        for ((_, regs), loc) in params.iter().zip(&self.sig_data.args) {
            match loc {
                ABIArg::Slots { slots, .. } => {
                    for (part, slot) in regs.regs().iter().zip(slots.iter()) {
                        match slot {
                            ABIArgSlot::Reg { reg, ty, .. } => {
                                ctx.emit(Inst::gen_move(
                                    Writable::from_reg(*part),
                                    (*reg).into(),
                                    *ty,
                                ));
                            }
                            ABIArgSlot::Stack { offset, ty, .. } => {
                                ctx.emit(Inst::gen_load(
                                    Writable::from_reg(*part),
                                    AMode::IncomingArg(*offset),
                                    *ty,
                                ));
                            }
                        }
                    }
                }
                ABIArg::StructArg { offset, pointer, .. } => {
                    let dst = Writable::from_reg(regs.regs()[0]);
                    match pointer {
                        Some(ABIArgSlot::Reg { reg, .. }) => {
                            ctx.emit(Inst::gen_move(dst, (*reg).into(), types::I64));
                        }
                        _ => {
                            ctx.emit(Inst::LoadAddr {
                                rd: dst,
                                mem: AMode::IncomingArg(*offset),
                            });
                        }
                    }
                }
            }
        }
        if let Some(idx) = self.sig_data.stack_ret_arg {
            let tmp = ctx.alloc_tmp(RegClass::Int);
            if let ABIArg::Slots { slots, .. } = &self.sig_data.args[idx] {
                if let ABIArgSlot::Reg { reg, .. } = &slots[0] {
                    ctx.emit(Inst::gen_move(tmp, (*reg).into(), types::I64));
                }
            }
            self.ret_area_ptr.set(Some(tmp.to_reg()));
        }
        Ok(())
    }
}

impl<'a> AArch64Lowering<'a> {
    fn lower_return(&self, ctx: &mut Lower<Inst>, values: &[Value]) -> CodegenResult<()> {
        let mut rets: Vec<RetPair> = Vec::new();
        for (value, loc) in values.iter().zip(&self.sig_data.rets) {
            let regs = ctx.put_value_in_regs(*value);
            match loc {
                ABIArg::Slots { slots, .. } => {
                    for (part, slot) in regs.regs().iter().zip(slots.iter()) {
                        match slot {
                            ABIArgSlot::Reg { reg, ty, extension } => {
                                // Move into a fresh register that the
                                // allocator pins to the convention's home;
                                // the move coalesces away when the value
                                // lands there directly.
                                let src = extend_for_abi(ctx, *part, *ty, *extension);
                                let class = if reg.class().bank() == 0 {
                                    RegClass::Int
                                } else {
                                    RegClass::Float
                                };
                                let tmp = ctx.alloc_tmp(class);
                                ctx.emit(Inst::gen_move(tmp, src, *ty));
                                rets.push(RetPair {
                                    vreg: tmp.to_reg(),
                                    preg: *reg,
                                });
                            }
                            ABIArgSlot::Stack { offset, ty, .. } => {
                                let base = self.ret_area_ptr.get().ok_or_else(|| {
                                    CodegenError::InternalError {
                                        stage: "lower",
                                        message: "stack return without a return area".into(),
                                    }
                                })?;
                                let mode = AMode::reg_maybe_offset(base, *offset, *ty)
                                    .unwrap_or(AMode::reg(base));
                                ctx.emit(Inst::gen_store(mode, *part, *ty));
                            }
                        }
                    }
                }
                ABIArg::StructArg { .. } => unreachable!("struct returns use x8"),
            }
        }
        ctx.emit(Inst::Ret { rets });
        Ok(())
    }

    fn lower_br_table(
        &self,
        ctx: &mut Lower<Inst>,
        index: Value,
        table: ir::JumpTable,
    ) -> CodegenResult<()> {
        let jt = ctx.f.dfg.jump_tables.get(table).unwrap();
        let default_label =
            ctx.block_label(jt.default_block().block(&ctx.f.dfg.value_lists));
        let targets: Vec<MachLabel> = jt
            .as_slice()
            .iter()
            .map(|dest| ctx.block_label(dest.block(&ctx.f.dfg.value_lists)))
            .collect();
        let count = targets.len() as u64;

        // Zero-extend the index to 64 bits.
        let raw = ctx.put_value_in_reg(index);
        let ty = ctx.value_ty(index);
        let idx = if ty.bits() < 64 {
            let tmp = ctx.alloc_tmp(RegClass::Int);
            ctx.emit(Inst::Extend {
                rd: tmp,
                rn: raw,
                signed: false,
                from_bits: ty.bits() as u8,
                to_bits: 64,
            });
            tmp.to_reg()
        } else {
            raw
        };

        if targets.is_empty() {
            ctx.emit(Inst::Jump {
                dest: default_label,
            });
            return Ok(());
        }

        // Bounds check against the table length.
        if let Some(imm12) = Imm12::maybe_from_u64(count) {
            ctx.emit(Inst::AluRRImm12 {
                alu_op: ALUOp::SubS,
                size: OperandSize::Size64,
                rd: writable_zero_reg(),
                rn: idx,
                imm12,
            });
        } else {
            let tmp = ctx.alloc_tmp(RegClass::Int);
            for inst in Inst::load_constant(tmp, count) {
                ctx.emit(inst);
            }
            ctx.emit(Inst::AluRRR {
                alu_op: ALUOp::SubS,
                size: OperandSize::Size64,
                rd: writable_zero_reg(),
                rn: idx,
                rm: tmp.to_reg(),
            });
        }
        ctx.emit(Inst::CondBr {
            target: default_label,
            kind: CondBrKind::Cond(Cond::Hs),
        });

        // Under the Spectre mitigation, clamp the speculated index into
        // range and fence the speculation before the indirect branch.
        let dispatch_idx = if self.flags.enable_spectre_mitigation() {
            let clamped = ctx.alloc_tmp(RegClass::Int);
            ctx.emit(Inst::CSel {
                rd: clamped,
                cond: Cond::Lo,
                rn: idx,
                rm: zero_reg(),
            });
            ctx.emit(Inst::Csdb);
            clamped.to_reg()
        } else {
            idx
        };

        let rtmp1 = ctx.alloc_tmp(RegClass::Int);
        let rtmp2 = ctx.alloc_tmp(RegClass::Int);
        ctx.emit(Inst::JTSequence {
            ridx: dispatch_idx,
            rtmp1,
            rtmp2,
            targets: Box::new(targets),
        });
        Ok(())
    }
}
