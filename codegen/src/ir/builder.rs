//! Instruction builders.
//!
//! A builder provides a convenient interface for inserting instructions into
//! an IR function. There is one method per opcode; each constructs the
//! instruction's data, inserts it through [`InstBuilderBase::build`], and
//! returns the result values. Where the builder ends up inserting the
//! instruction is decided by the implementation: a cursor inserts at its
//! position, a [`ReplaceBuilder`] overwrites an existing instruction in
//! place.

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::immediates::{Ieee32, Ieee64, Imm64, Offset32};
use crate::ir::instructions::{BlockCall, InstructionData};
use crate::ir::{
    types, AtomicRmwOp, Block, DataFlowGraph, FuncRef, GlobalValue, Inst, JumpTable, MemFlags,
    Opcode, SigRef, StackSlot, TrapCode, Type, Value,
};

/// Base trait for instruction builders.
///
/// The `build` method is the only required method; it inserts (or replaces)
/// the instruction and creates its result values with `ctrl_typevar` as the
/// controlling type.
pub trait InstBuilderBase<'f>: Sized {
    /// Get an immutable reference to the data flow graph that will hold the
    /// constructed instructions.
    fn data_flow_graph(&self) -> &DataFlowGraph;

    /// Get a mutable reference to the data flow graph.
    fn data_flow_graph_mut(&mut self) -> &mut DataFlowGraph;

    /// Insert an instruction and return a reference to it, consuming the
    /// builder.
    fn build(self, data: InstructionData, ctrl_typevar: Type) -> (Inst, &'f mut DataFlowGraph);
}

/// Convenience macro for the common single-result tail of builder methods.
macro_rules! single_result {
    ($self:ident, $data:expr, $ctrl:expr) => {{
        let (inst, dfg) = $self.build($data, $ctrl);
        dfg.first_result(inst)
    }};
}

/// Builder methods, one per opcode. Any type implementing
/// `InstBuilderBase` gets these for free.
pub trait InstBuilder<'f>: InstBuilderBase<'f> {
    /// `nop`.
    fn nop(self) -> Inst {
        self.build(
            InstructionData::Nullary {
                opcode: Opcode::Nop,
            },
            types::INVALID,
        )
        .0
    }

    /// `debugtrap`: breakpoint for debuggers.
    fn debugtrap(self) -> Inst {
        self.build(
            InstructionData::Nullary {
                opcode: Opcode::Debugtrap,
            },
            types::INVALID,
        )
        .0
    }

    /// `fence`: full barrier over all memory.
    fn fence(self) -> Inst {
        self.build(
            InstructionData::Nullary {
                opcode: Opcode::Fence,
            },
            types::INVALID,
        )
        .0
    }

    /// Integer constant of type `ty`.
    fn iconst(self, ty: Type, imm: impl Into<Imm64>) -> Value {
        let imm = imm.into().sign_extend_from_width(ty.bits());
        single_result!(
            self,
            InstructionData::UnaryImm {
                opcode: Opcode::Iconst,
                imm,
            },
            ty
        )
    }

    /// 32-bit float constant.
    fn f32const(self, imm: impl Into<Ieee32>) -> Value {
        single_result!(
            self,
            InstructionData::UnaryIeee32 {
                opcode: Opcode::F32const,
                imm: imm.into(),
            },
            types::F32
        )
    }

    /// 64-bit float constant.
    fn f64const(self, imm: impl Into<Ieee64>) -> Value {
        single_result!(
            self,
            InstructionData::UnaryIeee64 {
                opcode: Opcode::F64const,
                imm: imm.into(),
            },
            types::F64
        )
    }

    /// A unary instruction whose result has the same type as its operand.
    fn unary_same_ty(self, opcode: Opcode, arg: Value) -> Value {
        let ty = self.data_flow_graph().value_type(arg);
        single_result!(self, InstructionData::Unary { opcode, arg }, ty)
    }

    /// A unary instruction with an explicit result type.
    fn unary_with_ty(self, opcode: Opcode, ty: Type, arg: Value) -> Value {
        single_result!(self, InstructionData::Unary { opcode, arg }, ty)
    }

    /// Integer negation.
    fn ineg(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Ineg, x)
    }

    /// Bitwise complement.
    fn bnot(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Bnot, x)
    }

    /// Count leading zeroes.
    fn clz(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Clz, x)
    }

    /// Count trailing zeroes.
    fn ctz(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Ctz, x)
    }

    /// Count leading sign bits.
    fn cls(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Cls, x)
    }

    /// Reverse the bits of x.
    fn bitrev(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Bitrev, x)
    }

    /// Population count.
    fn popcnt(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Popcnt, x)
    }

    /// Zero-extend to `ty`.
    fn uextend(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::Uextend, ty, x)
    }

    /// Sign-extend to `ty`.
    fn sextend(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::Sextend, ty, x)
    }

    /// Truncate to the narrower integer type `ty`.
    fn ireduce(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::Ireduce, ty, x)
    }

    /// Reinterpret the bits of `x` as `ty`.
    fn bitcast(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::Bitcast, ty, x)
    }

    /// Convert f32 to f64.
    fn fpromote(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::Fpromote, ty, x)
    }

    /// Convert f64 to f32.
    fn fdemote(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::Fdemote, ty, x)
    }

    /// Float to signed integer; traps on NaN or overflow.
    fn fcvt_to_sint(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::FcvtToSint, ty, x)
    }

    /// Float to unsigned integer; traps on NaN or overflow.
    fn fcvt_to_uint(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::FcvtToUint, ty, x)
    }

    /// Signed integer to float.
    fn fcvt_from_sint(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::FcvtFromSint, ty, x)
    }

    /// Unsigned integer to float.
    fn fcvt_from_uint(self, ty: Type, x: Value) -> Value {
        self.unary_with_ty(Opcode::FcvtFromUint, ty, x)
    }

    /// Square root.
    fn sqrt(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Sqrt, x)
    }

    /// Float absolute value.
    fn fabs(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Fabs, x)
    }

    /// Float negation.
    fn fneg(self, x: Value) -> Value {
        self.unary_same_ty(Opcode::Fneg, x)
    }

    /// Split a 128-bit value into its (low, high) 64-bit halves.
    fn isplit(self, x: Value) -> (Value, Value) {
        let ty = self.data_flow_graph().value_type(x);
        let (inst, dfg) = self.build(
            InstructionData::Unary {
                opcode: Opcode::Isplit,
                arg: x,
            },
            ty,
        );
        let res = dfg.inst_results(inst);
        (res[0], res[1])
    }

    /// Concatenate two values into one of double the width; `lo` supplies
    /// the low half.
    fn iconcat(self, lo: Value, hi: Value) -> Value {
        let ty = self.data_flow_graph().value_type(lo);
        single_result!(
            self,
            InstructionData::Binary {
                opcode: Opcode::Iconcat,
                args: [lo, hi],
            },
            ty
        )
    }

    /// A binary instruction whose result has the type of its first operand.
    fn binary(self, opcode: Opcode, x: Value, y: Value) -> Value {
        let ty = self.data_flow_graph().value_type(x);
        single_result!(self, InstructionData::Binary { opcode, args: [x, y] }, ty)
    }

    /// Wrapping integer addition.
    fn iadd(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Iadd, x, y)
    }

    /// Wrapping integer subtraction.
    fn isub(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Isub, x, y)
    }

    /// Wrapping integer multiplication.
    fn imul(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Imul, x, y)
    }

    /// High half of the signed product.
    fn smulhi(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Smulhi, x, y)
    }

    /// High half of the unsigned product.
    fn umulhi(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Umulhi, x, y)
    }

    /// Unsigned division.
    fn udiv(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Udiv, x, y)
    }

    /// Signed division.
    fn sdiv(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Sdiv, x, y)
    }

    /// Unsigned remainder.
    fn urem(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Urem, x, y)
    }

    /// Signed remainder.
    fn srem(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Srem, x, y)
    }

    /// Bitwise and.
    fn band(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Band, x, y)
    }

    /// Bitwise or.
    fn bor(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Bor, x, y)
    }

    /// Bitwise xor.
    fn bxor(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Bxor, x, y)
    }

    /// `x & !y`.
    fn band_not(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::BandNot, x, y)
    }

    /// `x | !y`.
    fn bor_not(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::BorNot, x, y)
    }

    /// `x ^ !y`.
    fn bxor_not(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::BxorNot, x, y)
    }

    /// Shift left.
    fn ishl(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Ishl, x, y)
    }

    /// Logical shift right.
    fn ushr(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Ushr, x, y)
    }

    /// Arithmetic shift right.
    fn sshr(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Sshr, x, y)
    }

    /// Rotate left.
    fn rotl(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Rotl, x, y)
    }

    /// Rotate right.
    fn rotr(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Rotr, x, y)
    }

    /// Integer addition producing (sum, carry-out).
    fn uadd_overflow(self, x: Value, y: Value) -> (Value, Value) {
        let ty = self.data_flow_graph().value_type(x);
        let (inst, dfg) = self.build(
            InstructionData::Binary {
                opcode: Opcode::UaddOverflow,
                args: [x, y],
            },
            ty,
        );
        let res = dfg.inst_results(inst);
        (res[0], res[1])
    }

    /// Float addition.
    fn fadd(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Fadd, x, y)
    }

    /// Float subtraction.
    fn fsub(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Fsub, x, y)
    }

    /// Float multiplication.
    fn fmul(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Fmul, x, y)
    }

    /// Float division.
    fn fdiv(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Fdiv, x, y)
    }

    /// IEEE minimum.
    fn fmin(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Fmin, x, y)
    }

    /// IEEE maximum.
    fn fmax(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Fmax, x, y)
    }

    /// Copy the sign of `y` onto `x`.
    fn fcopysign(self, x: Value, y: Value) -> Value {
        self.binary(Opcode::Fcopysign, x, y)
    }

    /// Conditional select.
    fn select(self, c: Value, x: Value, y: Value) -> Value {
        let ty = self.data_flow_graph().value_type(x);
        single_result!(
            self,
            InstructionData::Ternary {
                opcode: Opcode::Select,
                args: [c, x, y],
            },
            ty
        )
    }

    /// Fused multiply-add: `x * y + z`.
    fn fma(self, x: Value, y: Value, z: Value) -> Value {
        let ty = self.data_flow_graph().value_type(x);
        single_result!(
            self,
            InstructionData::Ternary {
                opcode: Opcode::Fma,
                args: [x, y, z],
            },
            ty
        )
    }

    /// Integer comparison, producing 0 or 1 as an i8.
    fn icmp(self, cond: IntCC, x: Value, y: Value) -> Value {
        single_result!(
            self,
            InstructionData::IntCompare {
                opcode: Opcode::Icmp,
                args: [x, y],
                cond,
            },
            types::INVALID
        )
    }

    /// Integer comparison against an immediate.
    fn icmp_imm(self, cond: IntCC, x: Value, imm: impl Into<Imm64>) -> Value {
        single_result!(
            self,
            InstructionData::IntCompareImm {
                opcode: Opcode::IcmpImm,
                arg: x,
                cond,
                imm: imm.into(),
            },
            types::INVALID
        )
    }

    /// Float comparison, producing 0 or 1 as an i8.
    fn fcmp(self, cond: FloatCC, x: Value, y: Value) -> Value {
        single_result!(
            self,
            InstructionData::FloatCompare {
                opcode: Opcode::Fcmp,
                args: [x, y],
                cond,
            },
            types::INVALID
        )
    }

    /// Unconditional branch to `block` passing `args`.
    fn jump(mut self, block: Block, args: &[Value]) -> Inst {
        let destination = self.data_flow_graph_mut().block_call(block, args);
        self.build(
            InstructionData::Jump {
                opcode: Opcode::Jump,
                destination,
            },
            types::INVALID,
        )
        .0
    }

    /// Conditional branch: to `block_then` when `c` is non-zero, else to
    /// `block_else`.
    fn brif(
        mut self,
        c: Value,
        block_then: Block,
        args_then: &[Value],
        block_else: Block,
        args_else: &[Value],
    ) -> Inst {
        let then_call = self.data_flow_graph_mut().block_call(block_then, args_then);
        let else_call = self.data_flow_graph_mut().block_call(block_else, args_else);
        self.build(
            InstructionData::Brif {
                opcode: Opcode::Brif,
                arg: c,
                blocks: [then_call, else_call],
            },
            types::INVALID,
        )
        .0
    }

    /// Indirect branch through `table`, indexed by `x`.
    fn br_table(self, x: Value, table: JumpTable) -> Inst {
        self.build(
            InstructionData::BranchTable {
                opcode: Opcode::BrTable,
                arg: x,
                table,
            },
            types::INVALID,
        )
        .0
    }

    /// Return from the function with the given values.
    fn return_(mut self, rvals: &[Value]) -> Inst {
        let pool = &mut self.data_flow_graph_mut().value_lists;
        let args = crate::ir::instructions::ValueList::from_slice(rvals, pool);
        self.build(
            InstructionData::MultiAry {
                opcode: Opcode::Return,
                args,
            },
            types::INVALID,
        )
        .0
    }

    /// Direct call.
    fn call(mut self, func_ref: FuncRef, call_args: &[Value]) -> Inst {
        let pool = &mut self.data_flow_graph_mut().value_lists;
        let args = crate::ir::instructions::ValueList::from_slice(call_args, pool);
        self.build(
            InstructionData::Call {
                opcode: Opcode::Call,
                args,
                func_ref,
            },
            types::INVALID,
        )
        .0
    }

    /// Indirect call through the code pointer `callee`.
    fn call_indirect(mut self, sig_ref: SigRef, callee: Value, call_args: &[Value]) -> Inst {
        let pool = &mut self.data_flow_graph_mut().value_lists;
        let mut args = crate::ir::instructions::ValueList::default();
        args.push(callee, pool);
        args.extend(call_args.iter().copied(), pool);
        self.build(
            InstructionData::CallIndirect {
                opcode: Opcode::CallIndirect,
                args,
                sig_ref,
            },
            types::INVALID,
        )
        .0
    }

    /// Direct tail call; transfers to the callee without returning.
    fn return_call(mut self, func_ref: FuncRef, call_args: &[Value]) -> Inst {
        let pool = &mut self.data_flow_graph_mut().value_lists;
        let args = crate::ir::instructions::ValueList::from_slice(call_args, pool);
        self.build(
            InstructionData::Call {
                opcode: Opcode::ReturnCall,
                args,
                func_ref,
            },
            types::INVALID,
        )
        .0
    }

    /// Indirect tail call.
    fn return_call_indirect(
        mut self,
        sig_ref: SigRef,
        callee: Value,
        call_args: &[Value],
    ) -> Inst {
        let pool = &mut self.data_flow_graph_mut().value_lists;
        let mut args = crate::ir::instructions::ValueList::default();
        args.push(callee, pool);
        args.extend(call_args.iter().copied(), pool);
        self.build(
            InstructionData::CallIndirect {
                opcode: Opcode::ReturnCallIndirect,
                args,
                sig_ref,
            },
            types::INVALID,
        )
        .0
    }

    /// Direct call with an exception edge: continues at `normal` on
    /// ordinary return or transfers to `exception` when the callee raises.
    fn try_call(
        mut self,
        func_ref: FuncRef,
        call_args: &[Value],
        normal: BlockCall,
        exception: BlockCall,
    ) -> Inst {
        let pool = &mut self.data_flow_graph_mut().value_lists;
        let args = crate::ir::instructions::ValueList::from_slice(call_args, pool);
        self.build(
            InstructionData::TryCall {
                opcode: Opcode::TryCall,
                args,
                func_ref,
                blocks: [normal, exception],
            },
            types::INVALID,
        )
        .0
    }

    /// Materialize the address of a function.
    fn func_addr(self, func_ref: FuncRef) -> Value {
        single_result!(
            self,
            InstructionData::FuncAddr {
                opcode: Opcode::FuncAddr,
                func_ref,
            },
            types::INVALID
        )
    }

    /// Materialize the address of a global value.
    fn global_value(self, global_value: GlobalValue) -> Value {
        single_result!(
            self,
            InstructionData::UnaryGlobalValue {
                opcode: Opcode::GlobalValue,
                global_value,
            },
            types::INVALID
        )
    }

    /// Load of type `ty` from `addr + offset`.
    fn load(
        self,
        ty: Type,
        flags: MemFlags,
        addr: Value,
        offset: impl Into<Offset32>,
    ) -> Value {
        single_result!(
            self,
            InstructionData::Load {
                opcode: Opcode::Load,
                arg: addr,
                flags,
                offset: offset.into(),
            },
            ty
        )
    }

    /// An extending load of the given kind.
    fn extending_load(
        self,
        opcode: Opcode,
        ty: Type,
        flags: MemFlags,
        addr: Value,
        offset: impl Into<Offset32>,
    ) -> Value {
        single_result!(
            self,
            InstructionData::Load {
                opcode,
                arg: addr,
                flags,
                offset: offset.into(),
            },
            ty
        )
    }

    /// Load 8 bits, zero-extend to `ty`.
    fn uload8(self, ty: Type, flags: MemFlags, addr: Value, offset: impl Into<Offset32>) -> Value {
        self.extending_load(Opcode::Uload8, ty, flags, addr, offset)
    }

    /// Load 8 bits, sign-extend to `ty`.
    fn sload8(self, ty: Type, flags: MemFlags, addr: Value, offset: impl Into<Offset32>) -> Value {
        self.extending_load(Opcode::Sload8, ty, flags, addr, offset)
    }

    /// Load 16 bits, zero-extend to `ty`.
    fn uload16(self, ty: Type, flags: MemFlags, addr: Value, offset: impl Into<Offset32>) -> Value {
        self.extending_load(Opcode::Uload16, ty, flags, addr, offset)
    }

    /// Load 16 bits, sign-extend to `ty`.
    fn sload16(self, ty: Type, flags: MemFlags, addr: Value, offset: impl Into<Offset32>) -> Value {
        self.extending_load(Opcode::Sload16, ty, flags, addr, offset)
    }

    /// Load 32 bits, zero-extend to `ty`.
    fn uload32(self, ty: Type, flags: MemFlags, addr: Value, offset: impl Into<Offset32>) -> Value {
        self.extending_load(Opcode::Uload32, ty, flags, addr, offset)
    }

    /// Load 32 bits, sign-extend to `ty`.
    fn sload32(self, ty: Type, flags: MemFlags, addr: Value, offset: impl Into<Offset32>) -> Value {
        self.extending_load(Opcode::Sload32, ty, flags, addr, offset)
    }

    /// Store `x` to `addr + offset`.
    fn store(self, flags: MemFlags, x: Value, addr: Value, offset: impl Into<Offset32>) -> Inst {
        self.build(
            InstructionData::Store {
                opcode: Opcode::Store,
                args: [x, addr],
                flags,
                offset: offset.into(),
            },
            types::INVALID,
        )
        .0
    }

    /// A narrowing store of the given kind.
    fn narrowing_store(
        self,
        opcode: Opcode,
        flags: MemFlags,
        x: Value,
        addr: Value,
        offset: impl Into<Offset32>,
    ) -> Inst {
        self.build(
            InstructionData::Store {
                opcode,
                args: [x, addr],
                flags,
                offset: offset.into(),
            },
            types::INVALID,
        )
        .0
    }

    /// Store the low 8 bits of `x`.
    fn istore8(self, flags: MemFlags, x: Value, addr: Value, offset: impl Into<Offset32>) -> Inst {
        self.narrowing_store(Opcode::Istore8, flags, x, addr, offset)
    }

    /// Store the low 16 bits of `x`.
    fn istore16(self, flags: MemFlags, x: Value, addr: Value, offset: impl Into<Offset32>) -> Inst {
        self.narrowing_store(Opcode::Istore16, flags, x, addr, offset)
    }

    /// Store the low 32 bits of `x`.
    fn istore32(self, flags: MemFlags, x: Value, addr: Value, offset: impl Into<Offset32>) -> Inst {
        self.narrowing_store(Opcode::Istore32, flags, x, addr, offset)
    }

    /// Load of type `ty` from a stack slot.
    fn stack_load(self, ty: Type, stack_slot: StackSlot, offset: impl Into<Offset32>) -> Value {
        single_result!(
            self,
            InstructionData::StackLoad {
                opcode: Opcode::StackLoad,
                stack_slot,
                offset: offset.into(),
            },
            ty
        )
    }

    /// Store `x` to a stack slot.
    fn stack_store(self, x: Value, stack_slot: StackSlot, offset: impl Into<Offset32>) -> Inst {
        self.build(
            InstructionData::StackStore {
                opcode: Opcode::StackStore,
                arg: x,
                stack_slot,
                offset: offset.into(),
            },
            types::INVALID,
        )
        .0
    }

    /// Materialize the address of a stack slot.
    fn stack_addr(self, stack_slot: StackSlot, offset: impl Into<Offset32>) -> Value {
        single_result!(
            self,
            InstructionData::StackLoad {
                opcode: Opcode::StackAddr,
                stack_slot,
                offset: offset.into(),
            },
            types::INVALID
        )
    }

    /// Atomic load of type `ty` with acquire ordering.
    fn atomic_load(self, ty: Type, flags: MemFlags, addr: Value) -> Value {
        single_result!(
            self,
            InstructionData::LoadNoOffset {
                opcode: Opcode::AtomicLoad,
                arg: addr,
                flags,
            },
            ty
        )
    }

    /// Atomic store of `x` with release ordering.
    fn atomic_store(self, flags: MemFlags, x: Value, addr: Value) -> Inst {
        self.build(
            InstructionData::StoreNoOffset {
                opcode: Opcode::AtomicStore,
                args: [x, addr],
                flags,
            },
            types::INVALID,
        )
        .0
    }

    /// Atomic read-modify-write; returns the value previously in memory.
    fn atomic_rmw(self, flags: MemFlags, op: AtomicRmwOp, addr: Value, x: Value) -> Value {
        let ty = self.data_flow_graph().value_type(x);
        single_result!(
            self,
            InstructionData::AtomicRmw {
                opcode: Opcode::AtomicRmw,
                args: [addr, x],
                flags,
                op,
            },
            ty
        )
    }

    /// Atomic compare-and-swap; returns the value previously in memory.
    fn atomic_cas(self, flags: MemFlags, addr: Value, expected: Value, x: Value) -> Value {
        let ty = self.data_flow_graph().value_type(x);
        single_result!(
            self,
            InstructionData::AtomicCas {
                opcode: Opcode::AtomicCas,
                args: [addr, expected, x],
                flags,
            },
            ty
        )
    }

    /// Unconditional trap.
    fn trap(self, code: TrapCode) -> Inst {
        self.build(
            InstructionData::Trap {
                opcode: Opcode::Trap,
                code,
            },
            types::INVALID,
        )
        .0
    }

    /// Trap when `c` is zero.
    fn trapz(self, c: Value, code: TrapCode) -> Inst {
        self.build(
            InstructionData::CondTrap {
                opcode: Opcode::Trapz,
                arg: c,
                code,
            },
            types::INVALID,
        )
        .0
    }

    /// Trap when `c` is non-zero.
    fn trapnz(self, c: Value, code: TrapCode) -> Inst {
        self.build(
            InstructionData::CondTrap {
                opcode: Opcode::Trapnz,
                arg: c,
                code,
            },
            types::INVALID,
        )
        .0
    }
}

// Blanket implementation.
impl<'f, T: InstBuilderBase<'f>> InstBuilder<'f> for T {}

/// An instruction builder that replaces an existing instruction.
///
/// The inserted instruction will have the same `Inst` number as the old one.
/// The old instruction's result values survive when the replacement produces
/// results of the same types; otherwise new result values are made.
pub struct ReplaceBuilder<'f> {
    dfg: &'f mut DataFlowGraph,
    inst: Inst,
}

impl<'f> ReplaceBuilder<'f> {
    /// Create a `ReplaceBuilder` that will overwrite `inst`.
    pub fn new(dfg: &'f mut DataFlowGraph, inst: Inst) -> Self {
        Self { dfg, inst }
    }
}

impl<'f> InstBuilderBase<'f> for ReplaceBuilder<'f> {
    fn data_flow_graph(&self) -> &DataFlowGraph {
        self.dfg
    }

    fn data_flow_graph_mut(&mut self) -> &mut DataFlowGraph {
        self.dfg
    }

    fn build(self, data: InstructionData, ctrl_typevar: Type) -> (Inst, &'f mut DataFlowGraph) {
        // Splat the new instruction on top of the old one.
        self.dfg.insts[self.inst] = data;
        // The old result values are reused when the types still line up;
        // this keeps uses of the old results valid across the replacement.
        let old_types: smallvec::SmallVec<[Type; 2]> = self
            .dfg
            .inst_results(self.inst)
            .iter()
            .map(|&v| self.dfg.value_type(v))
            .collect();
        let new_types = self.dfg.inst_result_types(self.inst, ctrl_typevar);
        if old_types[..] != new_types[..] {
            self.dfg.clear_results(self.inst);
            self.dfg.make_inst_results(self.inst, ctrl_typevar);
        }
        (self.inst, self.dfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::Function;

    #[test]
    fn replace_preserves_result_values() {
        let mut func = Function::new();
        let block = func.dfg.make_block();
        func.layout.append_block(block);
        let (v0, iadd);
        {
            let mut pos = FuncCursor::new(&mut func).at_bottom(block);
            let a = pos.ins().iconst(types::I32, 1);
            let b = pos.ins().iconst(types::I32, 2);
            v0 = pos.ins().iadd(a, b);
            iadd = pos.func.dfg.value_def(v0).unwrap_inst();
            pos.ins().return_(&[v0]);
        }

        // Replace the iadd with a constant; v0 must survive.
        func.dfg.replace(iadd).iconst(types::I32, 3);
        assert_eq!(func.dfg.first_result(iadd), v0);
        assert_eq!(
            func.dfg.display_inst(iadd).to_string(),
            format!("{v0} = iconst 3")
        );
    }
}
