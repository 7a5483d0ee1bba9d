//! Instruction formats and opcodes.
//!
//! Every IR instruction is one [`InstructionData`] value: a tagged union
//! whose variant (the *format*) fixes which operands, immediates, and
//! entity references the instruction carries, and whose [`Opcode`] selects
//! the operation. The union is kept at 16 bytes; instructions that need a
//! variable number of arguments store them out of line in the value-list
//! pool owned by the data flow graph.

use crate::entity;
use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::immediates::{Ieee32, Ieee64, Imm64, Offset32};
use crate::ir::trapcode::TrapCode;
use crate::ir::{
    self, AtomicRmwOp, Block, FuncRef, JumpTable, MemFlags, SigRef, StackSlot, Value,
};
use core::fmt::{self, Display, Formatter};

/// Some instructions use an external list of argument values because there
/// is not enough space in the 16-byte `InstructionData` struct. These value
/// lists are stored in a memory pool in `dfg.value_lists`.
pub type ValueList = entity::EntityList<Value>;

/// Memory pool for holding value lists. See `ValueList`.
pub type ValueListPool = entity::ListPool<Value>;

/// A block together with the arguments passed to it along a branch edge,
/// stored in a single `EntityList`.
///
/// The block is encoded as the first element of the list by reusing the
/// `Value` index space; the remaining elements are real argument values.
/// Storing the pair this way keeps branch instructions at one pooled list
/// per destination instead of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockCall {
    /// The underlying storage. The first element is always the destination
    /// block, encoded by `block_to_value`; the list is never empty.
    values: ValueList,
}

impl BlockCall {
    fn value_to_block(val: Value) -> Block {
        Block::from_u32(val.as_u32())
    }

    fn block_to_value(block: Block) -> Value {
        Value::from_u32(block.as_u32())
    }

    /// Construct a `BlockCall` with the given block and arguments.
    pub fn new(block: Block, args: &[Value], pool: &mut ValueListPool) -> Self {
        let mut values = ValueList::default();
        values.push(Self::block_to_value(block), pool);
        values.extend(args.iter().copied(), pool);
        Self { values }
    }

    /// Return the destination block.
    pub fn block(&self, pool: &ValueListPool) -> Block {
        let val = self.values.first(pool).unwrap();
        Self::value_to_block(val)
    }

    /// Replace the destination block.
    pub fn set_block(&mut self, block: Block, pool: &mut ValueListPool) {
        *self.values.get_mut(0, pool).unwrap() = Self::block_to_value(block);
    }

    /// Append an argument to the block args.
    pub fn append_argument(&mut self, arg: Value, pool: &mut ValueListPool) {
        self.values.push(arg, pool);
    }

    /// The arguments passed to the destination block.
    pub fn args_slice<'a>(&self, pool: &'a ValueListPool) -> &'a [Value] {
        &self.values.as_slice(pool)[1..]
    }

    /// The arguments passed to the destination block, mutable.
    pub fn args_slice_mut<'a>(&'a mut self, pool: &'a mut ValueListPool) -> &'a mut [Value] {
        &mut self.values.as_mut_slice(pool)[1..]
    }

    /// Remove the argument at `ix` from the argument list.
    pub fn remove(&mut self, ix: usize, pool: &mut ValueListPool) {
        self.values.remove(1 + ix, pool)
    }

    /// Deep-clone the underlying list so this call can be edited without
    /// affecting the original.
    pub fn deep_clone(&self, pool: &mut ValueListPool) -> Self {
        Self {
            values: self.values.deep_clone(pool),
        }
    }

    /// Return a value that can display this block call.
    pub fn display<'a>(&self, pool: &'a ValueListPool) -> DisplayBlockCall<'a> {
        DisplayBlockCall { block: *self, pool }
    }
}

/// Wrapper for the context needed to display a [`BlockCall`] value.
pub struct DisplayBlockCall<'a> {
    block: BlockCall,
    pool: &'a ValueListPool,
}

impl<'a> Display for DisplayBlockCall<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.block.block(self.pool))?;
        let args = self.block.args_slice(self.pool);
        if !args.is_empty() {
            write!(f, "(")?;
            for (ix, arg) in args.iter().enumerate() {
                if ix > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// An instruction opcode.
///
/// The opcode decides the operation; the instruction format it pairs with
/// decides the operand storage.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub enum Opcode {
    /// No-op.
    Nop,
    /// Breakpoint trap for debuggers; not a terminator.
    Debugtrap,
    /// Full memory fence.
    Fence,

    /// Integer constant.
    Iconst,
    /// 32-bit float constant.
    F32const,
    /// 64-bit float constant.
    F64const,

    /// Integer negation.
    Ineg,
    /// Bitwise complement.
    Bnot,
    /// Count leading zeroes.
    Clz,
    /// Count trailing zeroes.
    Ctz,
    /// Count leading sign bits.
    Cls,
    /// Reverse the bits.
    Bitrev,
    /// Population count.
    Popcnt,
    /// Zero-extend to a wider integer type.
    Uextend,
    /// Sign-extend to a wider integer type.
    Sextend,
    /// Truncate to a narrower integer type.
    Ireduce,
    /// Reinterpret the bits as another same-width type.
    Bitcast,
    /// Convert f32 to f64.
    Fpromote,
    /// Convert f64 to f32.
    Fdemote,
    /// Float to signed integer, trapping on overflow/NaN.
    FcvtToSint,
    /// Float to unsigned integer, trapping on overflow/NaN.
    FcvtToUint,
    /// Signed integer to float.
    FcvtFromSint,
    /// Unsigned integer to float.
    FcvtFromUint,
    /// Square root.
    Sqrt,
    /// Float absolute value.
    Fabs,
    /// Float negation.
    Fneg,
    /// Split a 128-bit integer into (low, high) halves.
    Isplit,

    /// Wrapping integer addition.
    Iadd,
    /// Wrapping integer subtraction.
    Isub,
    /// Wrapping integer multiplication.
    Imul,
    /// High half of a signed 2N-bit product.
    Smulhi,
    /// High half of an unsigned 2N-bit product.
    Umulhi,
    /// Unsigned division; traps on zero divisor.
    Udiv,
    /// Signed division; traps on zero divisor and INT_MIN / -1.
    Sdiv,
    /// Unsigned remainder; traps on zero divisor.
    Urem,
    /// Signed remainder; traps on zero divisor.
    Srem,
    /// Bitwise and.
    Band,
    /// Bitwise or.
    Bor,
    /// Bitwise xor.
    Bxor,
    /// `x & !y`.
    BandNot,
    /// `x | !y`.
    BorNot,
    /// `x ^ !y`.
    BxorNot,
    /// Shift left; the shift amount is masked to the type width.
    Ishl,
    /// Logical shift right.
    Ushr,
    /// Arithmetic shift right.
    Sshr,
    /// Rotate left.
    Rotl,
    /// Rotate right.
    Rotr,
    /// Concatenate (low, high) halves into a 128-bit integer.
    Iconcat,
    /// Integer addition returning (sum, carry-out).
    UaddOverflow,
    /// Float addition.
    Fadd,
    /// Float subtraction.
    Fsub,
    /// Float multiplication.
    Fmul,
    /// Float division.
    Fdiv,
    /// IEEE 754-2008 minimum.
    Fmin,
    /// IEEE 754-2008 maximum.
    Fmax,
    /// Copy the sign bit of the second operand onto the first.
    Fcopysign,

    /// Conditional select: `c != 0 ? x : y`.
    Select,
    /// Fused multiply-add.
    Fma,

    /// Integer comparison producing 0 or 1 as an i8.
    Icmp,
    /// Integer comparison against an immediate.
    IcmpImm,
    /// Float comparison producing 0 or 1 as an i8.
    Fcmp,

    /// Unconditional branch to a block.
    Jump,
    /// Two-way conditional branch on an integer condition value.
    Brif,
    /// Indirect branch through a jump table, with a default block.
    BrTable,
    /// Return from the function.
    Return,

    /// Direct call.
    Call,
    /// Indirect call through a code pointer.
    CallIndirect,
    /// Direct tail call; terminates the function.
    ReturnCall,
    /// Indirect tail call; terminates the function.
    ReturnCallIndirect,
    /// Direct call with an exception edge: continues at the normal block on
    /// ordinary return, or transfers to the exception block.
    TryCall,
    /// Materialize the address of a function.
    FuncAddr,
    /// Materialize the address of a global value.
    GlobalValue,

    /// Load a value from memory.
    Load,
    /// Load 8 bits, zero-extend.
    Uload8,
    /// Load 8 bits, sign-extend.
    Sload8,
    /// Load 16 bits, zero-extend.
    Uload16,
    /// Load 16 bits, sign-extend.
    Sload16,
    /// Load 32 bits, zero-extend.
    Uload32,
    /// Load 32 bits, sign-extend.
    Sload32,
    /// Store a value to memory.
    Store,
    /// Store the low 8 bits.
    Istore8,
    /// Store the low 16 bits.
    Istore16,
    /// Store the low 32 bits.
    Istore32,
    /// Load from a stack slot.
    StackLoad,
    /// Store to a stack slot.
    StackStore,
    /// Materialize the address of a stack slot.
    StackAddr,
    /// Atomic load with acquire ordering.
    AtomicLoad,
    /// Atomic store with release ordering.
    AtomicStore,
    /// Atomic read-modify-write, sequentially consistent.
    AtomicRmw,
    /// Atomic compare-and-swap, sequentially consistent.
    AtomicCas,

    /// Unconditional trap.
    Trap,
    /// Trap when the operand is zero.
    Trapz,
    /// Trap when the operand is non-zero.
    Trapnz,
}

impl Opcode {
    /// True for all branching instructions with block destinations.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::Jump | Self::Brif | Self::BrTable | Self::TryCall
        )
    }

    /// Is this instruction a block terminator?
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump
                | Self::Brif
                | Self::BrTable
                | Self::Return
                | Self::ReturnCall
                | Self::ReturnCallIndirect
                | Self::TryCall
                | Self::Trap
        )
    }

    /// Is this a call instruction?
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Self::Call
                | Self::CallIndirect
                | Self::ReturnCall
                | Self::ReturnCallIndirect
                | Self::TryCall
        )
    }

    /// Does this instruction return from the function?
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Self::Return | Self::ReturnCall | Self::ReturnCallIndirect
        )
    }

    /// Can this instruction read from memory?
    pub fn can_load(self) -> bool {
        matches!(
            self,
            Self::Load
                | Self::Uload8
                | Self::Sload8
                | Self::Uload16
                | Self::Sload16
                | Self::Uload32
                | Self::Sload32
                | Self::StackLoad
                | Self::AtomicLoad
                | Self::AtomicRmw
                | Self::AtomicCas
        )
    }

    /// Can this instruction write to memory?
    pub fn can_store(self) -> bool {
        matches!(
            self,
            Self::Store
                | Self::Istore8
                | Self::Istore16
                | Self::Istore32
                | Self::StackStore
                | Self::AtomicStore
                | Self::AtomicRmw
                | Self::AtomicCas
        )
    }

    /// Can this instruction cause a trap?
    pub fn can_trap(self) -> bool {
        matches!(
            self,
            Self::Udiv
                | Self::Sdiv
                | Self::Urem
                | Self::Srem
                | Self::FcvtToSint
                | Self::FcvtToUint
                | Self::Trap
                | Self::Trapz
                | Self::Trapnz
        )
    }

    /// Does this instruction have other side effects besides can_* flags?
    pub fn other_side_effects(self) -> bool {
        matches!(self, Self::Fence | Self::Debugtrap)
    }

    /// A pure instruction computes a value from its inputs alone: it can be
    /// value-numbered, hoisted, and removed when unused.
    pub fn is_pure(self) -> bool {
        !(self.is_branch()
            || self.is_terminator()
            || self.is_call()
            || self.is_return()
            || self.can_load()
            || self.can_store()
            || self.can_trap()
            || self.other_side_effects())
    }

    /// The lowercase name of this opcode, matching the textual IR.
    pub fn name(self) -> &'static str {
        use self::Opcode::*;
        match self {
            Nop => "nop",
            Debugtrap => "debugtrap",
            Fence => "fence",
            Iconst => "iconst",
            F32const => "f32const",
            F64const => "f64const",
            Ineg => "ineg",
            Bnot => "bnot",
            Clz => "clz",
            Ctz => "ctz",
            Cls => "cls",
            Bitrev => "bitrev",
            Popcnt => "popcnt",
            Uextend => "uextend",
            Sextend => "sextend",
            Ireduce => "ireduce",
            Bitcast => "bitcast",
            Fpromote => "fpromote",
            Fdemote => "fdemote",
            FcvtToSint => "fcvt_to_sint",
            FcvtToUint => "fcvt_to_uint",
            FcvtFromSint => "fcvt_from_sint",
            FcvtFromUint => "fcvt_from_uint",
            Sqrt => "sqrt",
            Fabs => "fabs",
            Fneg => "fneg",
            Isplit => "isplit",
            Iadd => "iadd",
            Isub => "isub",
            Imul => "imul",
            Smulhi => "smulhi",
            Umulhi => "umulhi",
            Udiv => "udiv",
            Sdiv => "sdiv",
            Urem => "urem",
            Srem => "srem",
            Band => "band",
            Bor => "bor",
            Bxor => "bxor",
            BandNot => "band_not",
            BorNot => "bor_not",
            BxorNot => "bxor_not",
            Ishl => "ishl",
            Ushr => "ushr",
            Sshr => "sshr",
            Rotl => "rotl",
            Rotr => "rotr",
            Iconcat => "iconcat",
            UaddOverflow => "uadd_overflow",
            Fadd => "fadd",
            Fsub => "fsub",
            Fmul => "fmul",
            Fdiv => "fdiv",
            Fmin => "fmin",
            Fmax => "fmax",
            Fcopysign => "fcopysign",
            Select => "select",
            Fma => "fma",
            Icmp => "icmp",
            IcmpImm => "icmp_imm",
            Fcmp => "fcmp",
            Jump => "jump",
            Brif => "brif",
            BrTable => "br_table",
            Return => "return",
            Call => "call",
            CallIndirect => "call_indirect",
            ReturnCall => "return_call",
            ReturnCallIndirect => "return_call_indirect",
            TryCall => "try_call",
            FuncAddr => "func_addr",
            GlobalValue => "global_value",
            Load => "load",
            Uload8 => "uload8",
            Sload8 => "sload8",
            Uload16 => "uload16",
            Sload16 => "sload16",
            Uload32 => "uload32",
            Sload32 => "sload32",
            Store => "store",
            Istore8 => "istore8",
            Istore16 => "istore16",
            Istore32 => "istore32",
            StackLoad => "stack_load",
            StackStore => "stack_store",
            StackAddr => "stack_addr",
            AtomicLoad => "atomic_load",
            AtomicStore => "atomic_store",
            AtomicRmw => "atomic_rmw",
            AtomicCas => "atomic_cas",
            Trap => "trap",
            Trapz => "trapz",
            Trapnz => "trapnz",
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Information about call instructions, as reported by
/// [`InstructionData::analyze_call`].
pub enum CallInfo<'a> {
    /// This is not a call instruction.
    NotACall,
    /// This is a direct call to an external function declared in the
    /// preamble, with the given value arguments.
    Direct(FuncRef, &'a [Value]),
    /// This is an indirect call with the specified signature; the first
    /// argument slice element is the callee address.
    Indirect(SigRef, &'a [Value]),
}

/// Contents of an instruction.
///
/// Variants are the instruction *formats*: each fixes a storage shape shared
/// by every opcode using it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstructionData {
    /// No operands.
    Nullary { opcode: Opcode },
    /// One value operand.
    Unary { opcode: Opcode, arg: Value },
    /// A 64-bit integer immediate.
    UnaryImm { opcode: Opcode, imm: Imm64 },
    /// A 32-bit float immediate.
    UnaryIeee32 { opcode: Opcode, imm: Ieee32 },
    /// A 64-bit float immediate.
    UnaryIeee64 { opcode: Opcode, imm: Ieee64 },
    /// A global value reference.
    UnaryGlobalValue {
        opcode: Opcode,
        global_value: ir::GlobalValue,
    },
    /// Two value operands.
    Binary { opcode: Opcode, args: [Value; 2] },
    /// Three value operands.
    Ternary { opcode: Opcode, args: [Value; 3] },
    /// Integer comparison.
    IntCompare {
        opcode: Opcode,
        args: [Value; 2],
        cond: IntCC,
    },
    /// Integer comparison against an immediate.
    IntCompareImm {
        opcode: Opcode,
        arg: Value,
        cond: IntCC,
        imm: Imm64,
    },
    /// Float comparison.
    FloatCompare {
        opcode: Opcode,
        args: [Value; 2],
        cond: FloatCC,
    },
    /// Unconditional branch with block arguments.
    Jump {
        opcode: Opcode,
        destination: BlockCall,
    },
    /// Conditional branch: `blocks[0]` taken on non-zero, `blocks[1]` on
    /// zero.
    Brif {
        opcode: Opcode,
        arg: Value,
        blocks: [BlockCall; 2],
    },
    /// Indirect branch through a jump table.
    BranchTable {
        opcode: Opcode,
        arg: Value,
        table: JumpTable,
    },
    /// Variable-arity instruction: `return`.
    MultiAry { opcode: Opcode, args: ValueList },
    /// Direct function call.
    Call {
        opcode: Opcode,
        args: ValueList,
        func_ref: FuncRef,
    },
    /// Indirect function call; `args[0]` is the callee address.
    CallIndirect {
        opcode: Opcode,
        args: ValueList,
        sig_ref: SigRef,
    },
    /// Direct call with normal and exceptional continuations.
    TryCall {
        opcode: Opcode,
        args: ValueList,
        func_ref: FuncRef,
        blocks: [BlockCall; 2],
    },
    /// Function address materialization.
    FuncAddr { opcode: Opcode, func_ref: FuncRef },
    /// Memory load with an address, flags, and offset.
    Load {
        opcode: Opcode,
        arg: Value,
        flags: MemFlags,
        offset: Offset32,
    },
    /// Atomic memory load; no offset.
    LoadNoOffset {
        opcode: Opcode,
        arg: Value,
        flags: MemFlags,
    },
    /// Memory store: `args[0]` is the data, `args[1]` the address.
    Store {
        opcode: Opcode,
        args: [Value; 2],
        flags: MemFlags,
        offset: Offset32,
    },
    /// Atomic memory store: `args[0]` is the data, `args[1]` the address.
    StoreNoOffset {
        opcode: Opcode,
        args: [Value; 2],
        flags: MemFlags,
    },
    /// Stack slot load or address.
    StackLoad {
        opcode: Opcode,
        stack_slot: StackSlot,
        offset: Offset32,
    },
    /// Stack slot store.
    StackStore {
        opcode: Opcode,
        arg: Value,
        stack_slot: StackSlot,
        offset: Offset32,
    },
    /// Atomic read-modify-write: `args[0]` is the address, `args[1]` the
    /// operand.
    AtomicRmw {
        opcode: Opcode,
        args: [Value; 2],
        flags: MemFlags,
        op: AtomicRmwOp,
    },
    /// Atomic compare-and-swap: address, expected, replacement.
    AtomicCas {
        opcode: Opcode,
        args: [Value; 3],
        flags: MemFlags,
    },
    /// Unconditional trap.
    Trap { opcode: Opcode, code: TrapCode },
    /// Conditional trap.
    CondTrap {
        opcode: Opcode,
        arg: Value,
        code: TrapCode,
    },
}

impl InstructionData {
    /// Get the opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match *self {
            Self::Nullary { opcode }
            | Self::Unary { opcode, .. }
            | Self::UnaryImm { opcode, .. }
            | Self::UnaryIeee32 { opcode, .. }
            | Self::UnaryIeee64 { opcode, .. }
            | Self::UnaryGlobalValue { opcode, .. }
            | Self::Binary { opcode, .. }
            | Self::Ternary { opcode, .. }
            | Self::IntCompare { opcode, .. }
            | Self::IntCompareImm { opcode, .. }
            | Self::FloatCompare { opcode, .. }
            | Self::Jump { opcode, .. }
            | Self::Brif { opcode, .. }
            | Self::BranchTable { opcode, .. }
            | Self::MultiAry { opcode, .. }
            | Self::Call { opcode, .. }
            | Self::CallIndirect { opcode, .. }
            | Self::TryCall { opcode, .. }
            | Self::FuncAddr { opcode, .. }
            | Self::Load { opcode, .. }
            | Self::LoadNoOffset { opcode, .. }
            | Self::Store { opcode, .. }
            | Self::StoreNoOffset { opcode, .. }
            | Self::StackLoad { opcode, .. }
            | Self::StackStore { opcode, .. }
            | Self::AtomicRmw { opcode, .. }
            | Self::AtomicCas { opcode, .. }
            | Self::Trap { opcode, .. }
            | Self::CondTrap { opcode, .. } => opcode,
        }
    }

    /// Get the value arguments to this instruction. Branch arguments are not
    /// included; see [`branch_destination`](Self::branch_destination).
    pub fn arguments<'a>(&'a self, pool: &'a ValueListPool) -> &'a [Value] {
        match self {
            Self::Nullary { .. }
            | Self::UnaryImm { .. }
            | Self::UnaryIeee32 { .. }
            | Self::UnaryIeee64 { .. }
            | Self::UnaryGlobalValue { .. }
            | Self::FuncAddr { .. }
            | Self::Jump { .. }
            | Self::StackLoad { .. }
            | Self::Trap { .. } => &[],
            Self::Unary { arg, .. }
            | Self::IntCompareImm { arg, .. }
            | Self::Brif { arg, .. }
            | Self::BranchTable { arg, .. }
            | Self::Load { arg, .. }
            | Self::LoadNoOffset { arg, .. }
            | Self::StackStore { arg, .. }
            | Self::CondTrap { arg, .. } => core::slice::from_ref(arg),
            Self::Binary { args, .. }
            | Self::IntCompare { args, .. }
            | Self::FloatCompare { args, .. }
            | Self::Store { args, .. }
            | Self::StoreNoOffset { args, .. }
            | Self::AtomicRmw { args, .. } => args,
            Self::Ternary { args, .. } | Self::AtomicCas { args, .. } => args,
            Self::MultiAry { args, .. }
            | Self::Call { args, .. }
            | Self::CallIndirect { args, .. }
            | Self::TryCall { args, .. } => args.as_slice(pool),
        }
    }

    /// Get the value arguments to this instruction, mutable.
    pub fn arguments_mut<'a>(&'a mut self, pool: &'a mut ValueListPool) -> &'a mut [Value] {
        match self {
            Self::Nullary { .. }
            | Self::UnaryImm { .. }
            | Self::UnaryIeee32 { .. }
            | Self::UnaryIeee64 { .. }
            | Self::UnaryGlobalValue { .. }
            | Self::FuncAddr { .. }
            | Self::Jump { .. }
            | Self::StackLoad { .. }
            | Self::Trap { .. } => &mut [],
            Self::Unary { arg, .. }
            | Self::IntCompareImm { arg, .. }
            | Self::Brif { arg, .. }
            | Self::BranchTable { arg, .. }
            | Self::Load { arg, .. }
            | Self::LoadNoOffset { arg, .. }
            | Self::StackStore { arg, .. }
            | Self::CondTrap { arg, .. } => core::slice::from_mut(arg),
            Self::Binary { args, .. }
            | Self::IntCompare { args, .. }
            | Self::FloatCompare { args, .. }
            | Self::Store { args, .. }
            | Self::StoreNoOffset { args, .. }
            | Self::AtomicRmw { args, .. } => args,
            Self::Ternary { args, .. } | Self::AtomicCas { args, .. } => args,
            Self::MultiAry { args, .. }
            | Self::Call { args, .. }
            | Self::CallIndirect { args, .. }
            | Self::TryCall { args, .. } => args.as_mut_slice(pool),
        }
    }

    /// Get the destinations of this instruction, if it's a branch.
    ///
    /// `br_table` destinations live in the jump table.
    pub fn branch_destination<'a>(
        &'a self,
        jump_tables: &'a ir::JumpTables,
    ) -> &'a [BlockCall] {
        match self {
            Self::Jump { destination, .. } => core::slice::from_ref(destination),
            Self::Brif { blocks, .. } | Self::TryCall { blocks, .. } => blocks.as_slice(),
            Self::BranchTable { table, .. } => jump_tables
                .get(*table)
                .expect("branch to a valid jump table")
                .all_branches(),
            _ => {
                debug_assert!(!self.opcode().is_branch());
                &[]
            }
        }
    }

    /// Get a mutable slice of the destinations of this instruction, if it's
    /// a branch.
    pub fn branch_destination_mut<'a>(
        &'a mut self,
        jump_tables: &'a mut ir::JumpTables,
    ) -> &'a mut [BlockCall] {
        match self {
            Self::Jump { destination, .. } => core::slice::from_mut(destination),
            Self::Brif { blocks, .. } | Self::TryCall { blocks, .. } => blocks.as_mut_slice(),
            Self::BranchTable { table, .. } => jump_tables
                .get_mut(*table)
                .expect("branch to a valid jump table")
                .all_branches_mut(),
            _ => {
                debug_assert!(!self.opcode().is_branch());
                &mut []
            }
        }
    }

    /// Map a function over every value referenced by this instruction,
    /// including branch arguments.
    pub fn map_values(
        &mut self,
        pool: &mut ValueListPool,
        jump_tables: &mut ir::JumpTables,
        mut body: impl FnMut(Value) -> Value,
    ) {
        // Branch destinations alias the value pool, so collect the edits
        // through the same mutable borrow.
        match self {
            Self::Jump { destination, .. } => {
                for arg in destination.args_slice_mut(pool) {
                    *arg = body(*arg);
                }
            }
            Self::Brif { arg, blocks, .. } => {
                *arg = body(*arg);
                for block in blocks {
                    for arg in block.args_slice_mut(pool) {
                        *arg = body(*arg);
                    }
                }
            }
            Self::TryCall { args, blocks, .. } => {
                for arg in args.as_mut_slice(pool) {
                    *arg = body(*arg);
                }
                for block in blocks {
                    for arg in block.args_slice_mut(pool) {
                        *arg = body(*arg);
                    }
                }
            }
            Self::BranchTable { arg, table, .. } => {
                *arg = body(*arg);
                for block in jump_tables
                    .get_mut(*table)
                    .expect("branch to a valid jump table")
                    .all_branches_mut()
                {
                    for arg in block.args_slice_mut(pool) {
                        *arg = body(*arg);
                    }
                }
            }
            _ => {
                for arg in self.arguments_mut(pool) {
                    *arg = body(*arg);
                }
            }
        }
    }

    /// Return information about a call instruction.
    pub fn analyze_call<'a>(&'a self, pool: &'a ValueListPool) -> CallInfo<'a> {
        match self {
            Self::Call { func_ref, args, .. } | Self::TryCall { func_ref, args, .. } => {
                CallInfo::Direct(*func_ref, args.as_slice(pool))
            }
            Self::CallIndirect { sig_ref, args, .. } => {
                CallInfo::Indirect(*sig_ref, args.as_slice(pool))
            }
            _ => {
                debug_assert!(!self.opcode().is_call());
                CallInfo::NotACall
            }
        }
    }

    /// Return the memory flags of this instruction, if it accesses memory.
    pub fn memflags(&self) -> Option<MemFlags> {
        match self {
            Self::Load { flags, .. }
            | Self::LoadNoOffset { flags, .. }
            | Self::Store { flags, .. }
            | Self::StoreNoOffset { flags, .. }
            | Self::AtomicRmw { flags, .. }
            | Self::AtomicCas { flags, .. } => Some(*flags),
            _ => None,
        }
    }

    /// Return the trap code of this instruction, if it has one.
    pub fn trap_code(&self) -> Option<TrapCode> {
        match self {
            Self::Trap { code, .. } | Self::CondTrap { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Deep-clone the instruction, duplicating any value lists so the clone
    /// can be edited independently.
    pub fn deep_clone(&self, pool: &mut ValueListPool) -> Self {
        let mut clone = self.clone();
        match &mut clone {
            Self::MultiAry { args, .. }
            | Self::Call { args, .. }
            | Self::CallIndirect { args, .. } => {
                *args = args.deep_clone(pool);
            }
            Self::TryCall { args, blocks, .. } => {
                *args = args.deep_clone(pool);
                for block in blocks {
                    *block = block.deep_clone(pool);
                }
            }
            Self::Jump { destination, .. } => {
                *destination = destination.deep_clone(pool);
            }
            Self::Brif { blocks, .. } => {
                for block in blocks {
                    *block = block.deep_clone(pool);
                }
            }
            _ => {}
        }
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_predicates() {
        assert!(Opcode::Jump.is_terminator());
        assert!(Opcode::Jump.is_branch());
        assert!(!Opcode::Trapz.is_terminator());
        assert!(Opcode::Trap.is_terminator());
        assert!(Opcode::TryCall.is_call());
        assert!(Opcode::TryCall.is_terminator());
        assert!(Opcode::ReturnCall.is_return());
        assert!(Opcode::AtomicRmw.can_load());
        assert!(Opcode::AtomicRmw.can_store());
        assert!(Opcode::Iadd.is_pure());
        assert!(!Opcode::Udiv.is_pure());
        assert!(!Opcode::Load.is_pure());
        assert!(!Opcode::Fence.is_pure());
    }

    #[test]
    fn opcode_names() {
        assert_eq!(Opcode::Iadd.to_string(), "iadd");
        assert_eq!(Opcode::UaddOverflow.to_string(), "uadd_overflow");
        assert_eq!(Opcode::BrTable.to_string(), "br_table");
    }

    #[test]
    fn instruction_data_is_small() {
        // The whole point of the packed formats: instructions stay two words.
        assert!(core::mem::size_of::<InstructionData>() <= 24);
    }

    #[test]
    fn block_call_round_trip() {
        let pool = &mut ValueListPool::new();
        let block = Block::from_u32(7);
        let args = [Value::from_u32(1), Value::from_u32(2)];
        let mut call = BlockCall::new(block, &args, pool);
        assert_eq!(call.block(pool), block);
        assert_eq!(call.args_slice(pool), &args);

        call.set_block(Block::from_u32(9), pool);
        assert_eq!(call.block(pool), Block::from_u32(9));
        assert_eq!(call.args_slice(pool), &args);

        call.remove(0, pool);
        assert_eq!(call.args_slice(pool), &args[1..]);
    }
}
