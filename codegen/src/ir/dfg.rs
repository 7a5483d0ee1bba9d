//! Data flow graph tracking instructions, values, and blocks.

use crate::entity::{self, PrimaryMap, SecondaryMap};
use crate::ir::builder::ReplaceBuilder;
use crate::ir::instructions::{BlockCall, CallInfo, InstructionData, ValueList, ValueListPool};
use crate::ir::{
    types, Block, ExtFuncData, FuncRef, Inst, JumpTable, JumpTableData, Opcode, SigRef, Signature,
    Type, Value,
};
use core::fmt;
use core::ops::{Index, IndexMut};
use smallvec::SmallVec;

/// Jump tables used in the function.
pub type JumpTables = PrimaryMap<JumpTable, JumpTableData>;

/// Storage for instructions within the DFG.
#[derive(Clone, PartialEq, Hash)]
pub struct Insts(PrimaryMap<Inst, InstructionData>);

impl Index<Inst> for Insts {
    type Output = InstructionData;

    fn index(&self, inst: Inst) -> &InstructionData {
        self.0.index(inst)
    }
}

impl IndexMut<Inst> for Insts {
    fn index_mut(&mut self, inst: Inst) -> &mut InstructionData {
        self.0.index_mut(inst)
    }
}

/// Basic block parameters.
#[derive(Clone, PartialEq, Hash, Default)]
pub struct BlockData {
    /// List of parameters to this block.
    params: ValueList,
}

/// Storage for basic blocks within the DFG.
#[derive(Clone, PartialEq, Hash)]
pub struct Blocks(PrimaryMap<Block, BlockData>);

impl Blocks {
    /// Create a new basic block.
    pub fn add(&mut self) -> Block {
        self.0.push(BlockData::default())
    }

    /// Get the total number of basic blocks created in this function,
    /// whether they are currently inserted in the layout or not.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the given block reference is valid.
    pub fn is_valid(&self, block: Block) -> bool {
        self.0.is_valid(block)
    }

    /// Iterate over all block keys.
    pub fn keys(&self) -> entity::Keys<Block> {
        self.0.keys()
    }
}

/// A data flow graph defines all instructions and basic blocks in a function
/// as well as the data flow dependencies between them. The DFG also tracks
/// values, which are either instruction results or block parameters.
///
/// The layout of blocks in the function and of instructions in each block is
/// recorded by the [`Layout`](super::Layout) structure which forms the other
/// half of the function representation.
#[derive(Clone, PartialEq, Hash)]
pub struct DataFlowGraph {
    /// Data about all of the instructions in the function. The instructions
    /// in this map are not in program order; that is tracked by `Layout`,
    /// along with the block containing each instruction.
    pub insts: Insts,

    /// List of result values for each instruction.
    ///
    /// This map gets resized automatically by `make_inst()` so it is always
    /// in sync with the primary `insts` map.
    results: SecondaryMap<Inst, ValueList>,

    /// Basic blocks in the function and their parameters.
    pub blocks: Blocks,

    /// Memory pool of value lists, referenced by instructions with variable
    /// argument counts, by instruction results, and by block parameters.
    pub value_lists: ValueListPool,

    /// Primary value table with entries for all values.
    values: PrimaryMap<Value, ValueDataPacked>,

    /// Function signature table. These signatures are referenced by indirect
    /// call instructions as well as the external function references.
    pub signatures: PrimaryMap<SigRef, Signature>,

    /// External function references: functions that can be called directly.
    pub ext_funcs: PrimaryMap<FuncRef, ExtFuncData>,

    /// Constants used within the function.
    pub constants: super::ConstantPool,

    /// Jump tables used in this function.
    pub jump_tables: JumpTables,
}

impl DataFlowGraph {
    /// Create a new empty `DataFlowGraph`.
    pub fn new() -> Self {
        Self {
            insts: Insts(PrimaryMap::new()),
            results: SecondaryMap::new(),
            blocks: Blocks(PrimaryMap::new()),
            value_lists: ValueListPool::new(),
            values: PrimaryMap::new(),
            signatures: PrimaryMap::new(),
            ext_funcs: PrimaryMap::new(),
            constants: super::ConstantPool::new(),
            jump_tables: JumpTables::new(),
        }
    }

    /// Clear everything.
    pub fn clear(&mut self) {
        self.insts.0.clear();
        self.results.clear();
        self.blocks.0.clear();
        self.value_lists.clear();
        self.values.clear();
        self.signatures.clear();
        self.ext_funcs.clear();
        self.constants.clear();
        self.jump_tables.clear();
    }

    /// Get the total number of instructions created in this function,
    /// whether they are currently inserted in the layout or not.
    pub fn num_insts(&self) -> usize {
        self.insts.0.len()
    }

    /// Returns `true` if the given instruction reference is valid.
    pub fn inst_is_valid(&self, inst: Inst) -> bool {
        self.insts.0.is_valid(inst)
    }

    /// Get the total number of basic blocks created in this function.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if the given block reference is valid.
    pub fn block_is_valid(&self, block: Block) -> bool {
        self.blocks.is_valid(block)
    }

    /// Create a new basic block.
    pub fn make_block(&mut self) -> Block {
        self.blocks.add()
    }

    /// Make a `BlockCall`, bundling together the block and its arguments.
    pub fn block_call(&mut self, block: Block, args: &[Value]) -> BlockCall {
        BlockCall::new(block, args, &mut self.value_lists)
    }

    /// Get the total number of values.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }
}

/// Where did a value come from?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueDef {
    /// Value is the n'th result of an instruction.
    Result(Inst, usize),
    /// Value is the n'th parameter to a block.
    Param(Block, usize),
}

impl ValueDef {
    /// Unwrap the instruction where the value was defined, or panic.
    pub fn unwrap_inst(&self) -> Inst {
        self.inst().expect("Value is not an instruction result")
    }

    /// Get the instruction where the value was defined, if any.
    pub fn inst(&self) -> Option<Inst> {
        match *self {
            Self::Result(inst, _) => Some(inst),
            _ => None,
        }
    }

    /// Unwrap the block where the parameter is defined, or panic.
    pub fn unwrap_block(&self) -> Block {
        match *self {
            Self::Param(block, _) => block,
            _ => panic!("Value is not a block parameter"),
        }
    }
}

/// Internal table storage for extended values.
#[derive(Clone, Debug, PartialEq, Hash)]
enum ValueData {
    /// Value is defined by an instruction.
    Inst { ty: Type, num: u16, inst: Inst },

    /// Value is a block parameter.
    Param { ty: Type, num: u16, block: Block },

    /// Value is an alias of another value.
    /// An alias value can't be linked as an instruction result or block
    /// parameter. It is used as a placeholder when the original instruction
    /// or block has been rewritten or modified.
    Alias { ty: Type, original: Value },
}

/// Bit-packed version of `ValueData`, for efficiency.
///
/// Layout:
///
/// ```plain
///        | tag:2 |  type:14        |    x:24       | y:24          |
///
/// Inst       00     ty               result index    inst index
/// Param      01     ty               param index     block index
/// Alias      10     ty               0               value index
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Hash)]
struct ValueDataPacked(u64);

/// Encode a 32-bit field into `bits` bits, translating the `u32::MAX`
/// sentinel into the narrow all-ones value.
fn encode_narrow_field(x: u32, bits: u8) -> u64 {
    let max = (1u32 << bits) - 1;
    if x == u32::MAX {
        max as u64
    } else {
        debug_assert!(
            x < max,
            "{x} does not fit into {bits} bits with room for a sentinel"
        );
        x as u64
    }
}

/// The inverse of `encode_narrow_field`.
fn decode_narrow_field(x: u64, bits: u8) -> u32 {
    if x == (1u64 << bits) - 1 {
        u32::MAX
    } else {
        x as u32
    }
}

impl ValueDataPacked {
    const Y_SHIFT: u8 = 0;
    const Y_BITS: u8 = 24;
    const X_SHIFT: u8 = Self::Y_SHIFT + Self::Y_BITS;
    const X_BITS: u8 = 24;
    const TYPE_SHIFT: u8 = Self::X_SHIFT + Self::X_BITS;
    const TYPE_BITS: u8 = 14;
    const TAG_SHIFT: u8 = Self::TYPE_SHIFT + Self::TYPE_BITS;

    const TAG_INST: u64 = 0;
    const TAG_PARAM: u64 = 1;
    const TAG_ALIAS: u64 = 2;

    fn make(tag: u64, ty: Type, x: u32, y: u32) -> Self {
        debug_assert!((ty.repr() as u64) < (1 << Self::TYPE_BITS));
        Self(
            (tag << Self::TAG_SHIFT)
                | ((ty.repr() as u64) << Self::TYPE_SHIFT)
                | (encode_narrow_field(x, Self::X_BITS) << Self::X_SHIFT)
                | (encode_narrow_field(y, Self::Y_BITS) << Self::Y_SHIFT),
        )
    }

    #[inline]
    fn field(self, shift: u8, bits: u8) -> u64 {
        (self.0 >> shift) & ((1 << bits) - 1)
    }

    #[inline]
    fn ty(self) -> Type {
        Type::from_repr(self.field(Self::TYPE_SHIFT, Self::TYPE_BITS) as u16)
    }
}

impl From<ValueData> for ValueDataPacked {
    fn from(data: ValueData) -> Self {
        match data {
            ValueData::Inst { ty, num, inst } => {
                Self::make(Self::TAG_INST, ty, num.into(), inst.as_bits())
            }
            ValueData::Param { ty, num, block } => {
                Self::make(Self::TAG_PARAM, ty, num.into(), block.as_bits())
            }
            ValueData::Alias { ty, original } => {
                Self::make(Self::TAG_ALIAS, ty, 0, original.as_bits())
            }
        }
    }
}

impl From<ValueDataPacked> for ValueData {
    fn from(data: ValueDataPacked) -> Self {
        let tag = data.0 >> ValueDataPacked::TAG_SHIFT;
        let ty = data.ty();
        let x = data.field(ValueDataPacked::X_SHIFT, ValueDataPacked::X_BITS);
        let y = data.field(ValueDataPacked::Y_SHIFT, ValueDataPacked::Y_BITS);
        let y = decode_narrow_field(y, ValueDataPacked::Y_BITS);

        match tag {
            ValueDataPacked::TAG_INST => ValueData::Inst {
                ty,
                num: x as u16,
                inst: Inst::from_bits(y),
            },
            ValueDataPacked::TAG_PARAM => ValueData::Param {
                ty,
                num: x as u16,
                block: Block::from_bits(y),
            },
            ValueDataPacked::TAG_ALIAS => ValueData::Alias {
                ty,
                original: Value::from_bits(y),
            },
            _ => panic!("invalid tag in ValueDataPacked {:#x}", data.0),
        }
    }
}

/// Resolve value aliases without mutating, panicking on a cycle.
fn resolve_aliases(values: &PrimaryMap<Value, ValueDataPacked>, value: Value) -> Value {
    let mut v = value;
    // An alias chain can be at most as long as the value table.
    for _ in 0..=values.len() {
        if let ValueData::Alias { original, .. } = ValueData::from(values[v]) {
            v = original;
        } else {
            return v;
        }
    }
    panic!("value alias loop detected for {value}");
}

/// Handling values.
impl DataFlowGraph {
    fn make_value(&mut self, data: ValueData) -> Value {
        self.values.push(data.into())
    }

    /// Check if a value reference is valid.
    pub fn value_is_valid(&self, v: Value) -> bool {
        self.values.is_valid(v)
    }

    /// Check whether a value is valid and not an alias.
    pub fn value_is_real(&self, v: Value) -> bool {
        self.value_is_valid(v)
            && !matches!(ValueData::from(self.values[v]), ValueData::Alias { .. })
    }

    /// Get the type of a value.
    pub fn value_type(&self, v: Value) -> Type {
        self.values[v].ty()
    }

    /// Get the definition of a value.
    ///
    /// This is either the instruction that defined it or the block that has
    /// the value as a parameter. Aliases resolve to their target's
    /// definition.
    pub fn value_def(&self, v: Value) -> ValueDef {
        match ValueData::from(self.values[v]) {
            ValueData::Inst { inst, num, .. } => ValueDef::Result(inst, num as usize),
            ValueData::Param { block, num, .. } => ValueDef::Param(block, num as usize),
            ValueData::Alias { original, .. } => self.value_def(self.resolve_aliases(original)),
        }
    }

    /// Determine if `v` is an attached instruction result / block parameter.
    ///
    /// An attached value can't be attached to something else without first
    /// being detached. Aliases are never attached.
    pub fn value_is_attached(&self, v: Value) -> bool {
        match ValueData::from(self.values[v]) {
            ValueData::Inst { inst, num, .. } => {
                Some(&v) == self.inst_results(inst).get(num as usize)
            }
            ValueData::Param { block, num, .. } => {
                Some(&v) == self.block_params(block).get(num as usize)
            }
            ValueData::Alias { .. } => false,
        }
    }

    /// Resolve value aliases: find the original SSA value that `value`
    /// aliases.
    pub fn resolve_aliases(&self, value: Value) -> Value {
        resolve_aliases(&self.values, value)
    }

    /// If `value` is an alias, return the value it points at (which may be
    /// another alias). Returns `None` for real values.
    pub fn alias_target(&self, value: Value) -> Option<Value> {
        match ValueData::from(self.values[value]) {
            ValueData::Alias { original, .. } => Some(original),
            _ => None,
        }
    }

    /// Resolve all aliases among `inst`'s arguments, including branch
    /// arguments, rewriting them in place.
    pub fn resolve_aliases_in_arguments(&mut self, inst: Inst) {
        let values = &self.values;
        self.insts[inst].map_values(&mut self.value_lists, &mut self.jump_tables, |arg| {
            resolve_aliases(values, arg)
        });
    }

    /// Replace every use of a value alias in instruction operands with the
    /// resolved value, and delete the aliases.
    ///
    /// After this runs, no alias points at another alias, and no instruction
    /// references an alias.
    pub fn resolve_all_aliases(&mut self) {
        // First flatten every chain so each alias points at its final value.
        for v in self.values.keys() {
            if let ValueData::Alias { ty, original } = ValueData::from(self.values[v]) {
                let resolved = resolve_aliases(&self.values, original);
                if resolved != original {
                    self.values[v] = ValueData::Alias {
                        ty,
                        original: resolved,
                    }
                    .into();
                }
            }
        }

        // Then rewrite instruction operands in one constant-time step each.
        let values = &self.values;
        for inst in self.insts.0.values_mut() {
            inst.map_values(&mut self.value_lists, &mut self.jump_tables, |arg| {
                if let ValueData::Alias { original, .. } = ValueData::from(values[arg]) {
                    original
                } else {
                    arg
                }
            });
        }
    }

    /// Turn a value into an alias of another.
    ///
    /// All uses of `dest` will behave as if they used `src`. The `dest`
    /// value can't be attached to an instruction or block.
    pub fn change_to_alias(&mut self, dest: Value, src: Value) {
        debug_assert!(!self.value_is_attached(dest));
        // Resolve `src` first so chains stay short and loops are impossible.
        let original = self.resolve_aliases(src);
        debug_assert_ne!(
            dest, original,
            "aliasing {dest} to {src} would create a loop"
        );
        let ty = self.value_type(original);
        debug_assert_eq!(
            self.value_type(dest),
            ty,
            "aliasing {dest} to {src} would change its type {} to {ty}",
            self.value_type(dest)
        );
        self.values[dest] = ValueData::Alias { ty, original }.into();
    }

    /// Replace the results of one instruction with aliases to the results of
    /// another.
    ///
    /// `dest_inst` has its results cleared, so it should be removed from the
    /// graph afterwards.
    pub fn replace_with_aliases(&mut self, dest_inst: Inst, original_inst: Inst) {
        debug_assert_ne!(
            dest_inst, original_inst,
            "replacing {dest_inst} with itself would create a loop"
        );
        let dest_results = self.results[dest_inst].as_slice(&self.value_lists);
        let original_results = self.results[original_inst].as_slice(&self.value_lists);
        debug_assert_eq!(
            dest_results.len(),
            original_results.len(),
            "replacing {dest_inst} with {original_inst} would change the result count"
        );

        let pairs: SmallVec<[(Value, Value); 2]> = dest_results
            .iter()
            .copied()
            .zip(original_results.iter().copied())
            .collect();
        for (dest, original) in pairs {
            let ty = self.value_type(original);
            debug_assert_eq!(self.value_type(dest), ty);
            self.values[dest] = ValueData::Alias { ty, original }.into();
        }
        self.clear_results(dest_inst);
    }
}

/// Instructions.
impl DataFlowGraph {
    /// Create a new instruction.
    ///
    /// The instruction has no result values until `make_inst_results` is
    /// called.
    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        let n = self.num_insts() + 1;
        self.results.resize(n);
        self.insts.0.push(data)
    }

    /// Get all value arguments to `inst` as a slice.
    pub fn inst_args(&self, inst: Inst) -> &[Value] {
        self.insts[inst].arguments(&self.value_lists)
    }

    /// Get all value arguments to `inst` as a mutable slice.
    pub fn inst_args_mut(&mut self, inst: Inst) -> &mut [Value] {
        self.insts[inst].arguments_mut(&mut self.value_lists)
    }

    /// Map a function over all values referenced by `inst`, including branch
    /// arguments.
    pub fn map_inst_values<F>(&mut self, inst: Inst, body: F)
    where
        F: FnMut(Value) -> Value,
    {
        self.insts[inst].map_values(&mut self.value_lists, &mut self.jump_tables, body);
    }

    /// Compute the result types produced by `inst`.
    ///
    /// For polymorphic instructions the controlling type `ctrl_typevar`
    /// decides the concrete types; for calls the signature does; other
    /// instructions have fixed result types.
    pub fn inst_result_types(&self, inst: Inst, ctrl_typevar: Type) -> SmallVec<[Type; 2]> {
        let data = &self.insts[inst];
        let opcode = data.opcode();
        match opcode {
            // Terminators and stores produce nothing.
            Opcode::Jump
            | Opcode::Brif
            | Opcode::BrTable
            | Opcode::Return
            | Opcode::ReturnCall
            | Opcode::ReturnCallIndirect
            | Opcode::Trap
            | Opcode::Trapz
            | Opcode::Trapnz
            | Opcode::Debugtrap
            | Opcode::Nop
            | Opcode::Fence
            | Opcode::Store
            | Opcode::Istore8
            | Opcode::Istore16
            | Opcode::Istore32
            | Opcode::StackStore
            | Opcode::AtomicStore => SmallVec::new(),

            // Calls take their results from the signature.
            Opcode::Call | Opcode::CallIndirect | Opcode::TryCall => {
                let sig = self
                    .call_signature(inst)
                    .expect("call instruction with a signature");
                self.signatures[sig]
                    .returns
                    .iter()
                    .map(|p| p.value_type)
                    .collect()
            }

            // Comparisons produce a boolean as i8.
            Opcode::Icmp | Opcode::IcmpImm | Opcode::Fcmp => smallvec::smallvec![types::I8],

            // Address materializations produce a pointer.
            Opcode::StackAddr | Opcode::FuncAddr | Opcode::GlobalValue => {
                smallvec::smallvec![types::I64]
            }

            // A 128-bit split produces two halves of the operand type.
            Opcode::Isplit => {
                let half = ctrl_typevar
                    .half_width()
                    .expect("isplit controlling type must be splittable");
                smallvec::smallvec![half, half]
            }

            // Concatenation doubles the operand type.
            Opcode::Iconcat => {
                let double = ctrl_typevar
                    .double_width()
                    .expect("iconcat controlling type must be widenable");
                smallvec::smallvec![double]
            }

            // Sum and carry-out.
            Opcode::UaddOverflow => smallvec::smallvec![ctrl_typevar, types::I8],

            // Everything else produces a single value of the controlling
            // type.
            _ => smallvec::smallvec![ctrl_typevar],
        }
    }

    /// Create result values for an instruction, returning how many were
    /// made.
    pub fn make_inst_results(&mut self, inst: Inst, ctrl_typevar: Type) -> usize {
        self.clear_results(inst);
        let types = self.inst_result_types(inst, ctrl_typevar);
        for (num, ty) in types.iter().enumerate() {
            let res = self.make_value(ValueData::Inst {
                ty: *ty,
                num: num as u16,
                inst,
            });
            self.results[inst].push(res, &mut self.value_lists);
        }
        types.len()
    }

    /// Create a `ReplaceBuilder` that will replace `inst` with a new
    /// instruction in place.
    pub fn replace(&mut self, inst: Inst) -> ReplaceBuilder {
        ReplaceBuilder::new(self, inst)
    }

    /// Clear the list of result values from `inst`.
    pub fn clear_results(&mut self, inst: Inst) {
        self.results[inst].clear(&mut self.value_lists)
    }

    /// Replace an instruction result with a new value of type `new_type`.
    ///
    /// The `old_value` must be an attached instruction result. It is left
    /// detached, so it should be turned into something else (usually an
    /// alias). Returns the new value.
    pub fn replace_result(&mut self, old_value: Value, new_type: Type) -> Value {
        let (num, inst) = match ValueData::from(self.values[old_value]) {
            ValueData::Inst { num, inst, .. } => (num, inst),
            _ => panic!("{old_value} is not an instruction result value"),
        };
        let new_value = self.make_value(ValueData::Inst {
            ty: new_type,
            num,
            inst,
        });
        let num = num as usize;
        let attached = core::mem::replace(
            self.results[inst]
                .get_mut(num, &mut self.value_lists)
                .expect("replacing detached result"),
            new_value,
        );
        debug_assert_eq!(attached, old_value, "{old_value} wasn't attached");
        new_value
    }

    /// Detach the list of result values from `inst`, leaving the values
    /// themselves intact but unattached.
    pub fn detach_results(&mut self, inst: Inst) {
        self.results[inst] = ValueList::default();
    }

    /// Get the first result of an instruction.
    ///
    /// Panics if the instruction doesn't have any result.
    pub fn first_result(&self, inst: Inst) -> Value {
        self.results[inst]
            .first(&self.value_lists)
            .expect("instruction has no results")
    }

    /// Test if `inst` has any result values currently.
    pub fn has_results(&self, inst: Inst) -> bool {
        !self.results[inst].is_empty()
    }

    /// Return all the results of an instruction.
    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        self.results[inst].as_slice(&self.value_lists)
    }

    /// Get the call signature of a direct or indirect call instruction.
    /// Returns `None` if `inst` is not a call instruction.
    pub fn call_signature(&self, inst: Inst) -> Option<SigRef> {
        match self.insts[inst].analyze_call(&self.value_lists) {
            CallInfo::NotACall => None,
            CallInfo::Direct(f, _) => Some(self.ext_funcs[f].signature),
            CallInfo::Indirect(s, _) => Some(s),
        }
    }

    /// Returns an object that displays `inst` in the textual format.
    pub fn display_inst(&self, inst: Inst) -> DisplayInst<'_> {
        DisplayInst(self, inst)
    }
}

/// Basic block parameters.
impl DataFlowGraph {
    /// Get the parameters on `block`.
    pub fn block_params(&self, block: Block) -> &[Value] {
        self.blocks.0[block].params.as_slice(&self.value_lists)
    }

    /// Get the types of the parameters on `block`.
    pub fn block_param_types(&self, block: Block) -> SmallVec<[Type; 8]> {
        self.block_params(block)
            .iter()
            .map(|&v| self.value_type(v))
            .collect()
    }

    /// Append a parameter with type `ty` to `block`.
    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        let num = self.blocks.0[block].params.len(&self.value_lists);
        debug_assert!(num <= u16::MAX as usize, "too many parameters on block");
        let param = self.make_value(ValueData::Param {
            ty,
            num: num as u16,
            block,
        });
        self.blocks.0[block].params.push(param, &mut self.value_lists);
        param
    }

    /// Get the number of parameters on `block`.
    pub fn num_block_params(&self, block: Block) -> usize {
        self.blocks.0[block].params.len(&self.value_lists)
    }

    /// Remove the parameter at `param_idx` from `block`, renumbering the
    /// parameters after it. The removed value is left detached; branch
    /// arguments must be fixed up by the caller.
    pub fn remove_block_param(&mut self, block: Block, param_idx: usize) {
        self.blocks.0[block].params.remove(param_idx, &mut self.value_lists);
        let remaining: SmallVec<[Value; 8]> = self.block_params(block)[param_idx..]
            .iter()
            .copied()
            .collect();
        for (offset, v) in remaining.into_iter().enumerate() {
            let num = (param_idx + offset) as u16;
            let ty = self.value_type(v);
            self.values[v] = ValueData::Param { ty, num, block }.into();
        }
    }
}

/// Object that can display an instruction.
pub struct DisplayInst<'a>(&'a DataFlowGraph, Inst);

impl<'a> fmt::Display for DisplayInst<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dfg = self.0;
        let inst = self.1;

        // Result values first: "v3, v4 = ".
        let mut results = dfg.inst_results(inst).iter();
        if let Some(first) = results.next() {
            write!(f, "{first}")?;
            for v in results {
                write!(f, ", {v}")?;
            }
            write!(f, " = ")?;
        }

        let data = &dfg.insts[inst];
        write!(f, "{}", data.opcode())?;

        match data {
            InstructionData::UnaryImm { imm, .. } => write!(f, " {imm}")?,
            InstructionData::UnaryIeee32 { imm, .. } => write!(f, " {imm}")?,
            InstructionData::UnaryIeee64 { imm, .. } => write!(f, " {imm}")?,
            InstructionData::UnaryGlobalValue { global_value, .. } => {
                write!(f, " {global_value}")?
            }
            InstructionData::IntCompare { cond, .. } => write!(f, " {cond}")?,
            InstructionData::IntCompareImm { cond, .. } => write!(f, " {cond}")?,
            InstructionData::FloatCompare { cond, .. } => write!(f, " {cond}")?,
            InstructionData::Trap { code, .. } | InstructionData::CondTrap { code, .. } => {
                write!(f, " {code}")?
            }
            _ => {}
        }

        let mut first = true;
        for arg in dfg.inst_args(inst) {
            if first {
                write!(f, " {arg}")?;
                first = false;
            } else {
                write!(f, ", {arg}")?;
            }
        }

        for dest in data.branch_destination(&dfg.jump_tables) {
            if first {
                write!(f, " {}", dest.display(&dfg.value_lists))?;
                first = false;
            } else {
                write!(f, ", {}", dest.display(&dfg.value_lists))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::immediates::Imm64;
    use crate::ir::types::*;

    #[test]
    fn make_inst_and_results() {
        let mut dfg = DataFlowGraph::new();
        let inst = dfg.make_inst(InstructionData::UnaryImm {
            opcode: Opcode::Iconst,
            imm: Imm64::new(7),
        });
        assert!(!dfg.has_results(inst));
        let n = dfg.make_inst_results(inst, I32);
        assert_eq!(n, 1);

        let v = dfg.first_result(inst);
        assert_eq!(dfg.value_type(v), I32);
        assert_eq!(dfg.value_def(v), ValueDef::Result(inst, 0));
        assert!(dfg.value_is_attached(v));
        assert_eq!(dfg.display_inst(inst).to_string(), "v0 = iconst 7");
    }

    #[test]
    fn block_params() {
        let mut dfg = DataFlowGraph::new();
        let block = dfg.make_block();
        assert_eq!(dfg.num_block_params(block), 0);
        let a = dfg.append_block_param(block, I64);
        let b = dfg.append_block_param(block, F64);
        assert_eq!(dfg.block_params(block), &[a, b]);
        assert_eq!(dfg.value_def(b), ValueDef::Param(block, 1));
        assert_eq!(dfg.value_type(a), I64);
    }

    #[test]
    fn aliases_resolve_and_collapse() {
        let mut dfg = DataFlowGraph::new();
        let i0 = dfg.make_inst(InstructionData::UnaryImm {
            opcode: Opcode::Iconst,
            imm: Imm64::new(1),
        });
        dfg.make_inst_results(i0, I32);
        let v0 = dfg.first_result(i0);

        let i1 = dfg.make_inst(InstructionData::UnaryImm {
            opcode: Opcode::Iconst,
            imm: Imm64::new(2),
        });
        dfg.make_inst_results(i1, I32);
        let v1 = dfg.first_result(i1);

        // Make an instruction using v1, then alias v1 to v0.
        let add = dfg.make_inst(InstructionData::Binary {
            opcode: Opcode::Iadd,
            args: [v1, v1],
        });
        dfg.make_inst_results(add, I32);

        dfg.detach_results(i1);
        dfg.change_to_alias(v1, v0);
        assert_eq!(dfg.resolve_aliases(v1), v0);
        assert!(!dfg.value_is_real(v1));

        dfg.resolve_all_aliases();
        assert_eq!(dfg.inst_args(add), &[v0, v0]);
    }

    #[test]
    fn packed_value_data_round_trip() {
        for data in [
            ValueData::Inst {
                ty: I64,
                num: 3,
                inst: Inst::from_u32(77),
            },
            ValueData::Param {
                ty: F32,
                num: 0,
                block: Block::from_u32(12),
            },
            ValueData::Alias {
                ty: I8,
                original: Value::from_u32(42),
            },
        ] {
            let packed = ValueDataPacked::from(data.clone());
            assert_eq!(ValueData::from(packed), data);
        }
    }
}
