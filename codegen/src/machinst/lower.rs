//! This module implements lowering (instruction selection) from IR to
//! machine instructions with virtual registers.
//!
//! Blocks are visited in reverse post-order; within each block,
//! instructions are processed *backward*, so every consumer runs before its
//! producers. That order lets a consumer fold a producer into itself (an
//! immediate into an instruction, a comparison into a branch, an address
//! computation into an addressing mode) and lets the driver skip pure
//! producers whose results ended up with no remaining register demand.
//!
//! Block parameters become fresh virtual registers; every branch emits
//! parallel moves of its arguments into the destination's parameter
//! registers before the branch itself. The entry block's parameters are
//! bound to ABI argument locations instead.

use crate::dominator_tree::DominatorTree;
use crate::entity::SecondaryMap;
use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::{
    Block, Function, Inst, InstructionData, Opcode, Type, Value, types,
};
use crate::machinst::{
    BlockIndex, MachInstEmit, MachLabel, Reg, RegClass, ValueRegs, VCode, VirtualReg, Writable,
};
use crate::result::{CodegenError, CodegenResult};
use smallvec::SmallVec;

/// A backend's lowering logic, implemented per target.
pub trait LowerBackend {
    /// The machine instruction type.
    type MInst: MachInstEmit;

    /// Lower a single non-branch instruction.
    fn lower(&self, ctx: &mut Lower<Self::MInst>, inst: Inst) -> CodegenResult<()>;

    /// Lower the branch group terminating a block.
    fn lower_branch(&self, ctx: &mut Lower<Self::MInst>, inst: Inst) -> CodegenResult<()>;

    /// Emit the entry-block argument setup: moves from ABI locations into
    /// the entry block's parameter registers.
    fn gen_arg_setup(&self, ctx: &mut Lower<Self::MInst>) -> CodegenResult<()>;
}

/// Lowering context passed to the backend.
pub struct Lower<'a, I: MachInstEmit> {
    /// The function being lowered.
    pub f: &'a Function,

    /// Lowered-order index of every reachable IR block.
    block_index: SecondaryMap<Block, u32>,
    /// The IR blocks in lowered (reverse post-) order.
    lowered_order: Vec<Block>,

    /// Register class of every allocated vreg.
    vreg_classes: Vec<RegClass>,
    /// Value-to-registers binding.
    value_regs: FxHashMap<Value, ValueRegs>,

    /// Remaining (not yet lowered) uses of each value.
    uses_left: FxHashMap<Value, u32>,
    /// Values that some lowered consumer demanded in a register.
    reg_demand: FxHashSet<Value>,
    /// Instructions folded into a consumer; skipped when reached.
    sunk: FxHashSet<Inst>,

    /// Per-IR-instruction emission buffer, in forward order.
    cur_inst_insts: Vec<I>,
    /// Reversed instruction buffer for the current block.
    cur_block_insts: Vec<I>,
    /// Completed blocks, in lowered order, each in forward order.
    finished_blocks: Vec<Vec<I>>,
    /// Successors of each lowered block.
    block_succs: Vec<SmallVec<[BlockIndex; 2]>>,

    /// The instruction currently being lowered, for operand queries.
    cur_inst: Option<Inst>,
    /// Index of the block currently being lowered.
    cur_bindex: u32,
}

const UNREACHABLE_BLOCK: u32 = u32::MAX;

impl<'a, I: MachInstEmit> Lower<'a, I> {
    /// Prepare to lower `f`, fixing the lowered block order.
    pub fn new(f: &'a Function, domtree: &DominatorTree) -> Self {
        let mut block_index = SecondaryMap::with_default(UNREACHABLE_BLOCK);
        let mut lowered_order = Vec::new();
        for &block in domtree.cfg_postorder().iter().rev() {
            block_index[block] = lowered_order.len() as u32;
            lowered_order.push(block);
        }

        // Count the uses of every value in reachable code.
        let mut uses_left: FxHashMap<Value, u32> = FxHashMap::default();
        for &block in &lowered_order {
            for inst in f.layout.block_insts(block) {
                for &arg in f.dfg.inst_args(inst) {
                    *uses_left.entry(f.dfg.resolve_aliases(arg)).or_insert(0) += 1;
                }
                for dest in f.dfg.insts[inst].branch_destination(&f.dfg.jump_tables) {
                    for &arg in dest.args_slice(&f.dfg.value_lists) {
                        *uses_left.entry(f.dfg.resolve_aliases(arg)).or_insert(0) += 1;
                    }
                }
            }
        }

        Self {
            f,
            block_index,
            lowered_order,
            vreg_classes: Vec::new(),
            value_regs: FxHashMap::default(),
            uses_left,
            reg_demand: FxHashSet::default(),
            sunk: FxHashSet::default(),
            cur_inst_insts: Vec::new(),
            cur_block_insts: Vec::new(),
            finished_blocks: Vec::new(),
            block_succs: Vec::new(),
            cur_inst: None,
            cur_bindex: 0,
        }
    }

    /// The label of an IR block in the lowered order.
    pub fn block_label(&self, block: Block) -> MachLabel {
        let index = self.block_index[block];
        debug_assert_ne!(index, UNREACHABLE_BLOCK, "branch to unreachable block");
        MachLabel::from_block(index)
    }

    /// Allocate a fresh virtual register of the given class.
    pub fn alloc_tmp(&mut self, class: RegClass) -> Writable<Reg> {
        let index = self.vreg_classes.len() as u32;
        self.vreg_classes.push(class);
        Writable::from_reg(VirtualReg::new(index, class).into())
    }

    /// The registers bound to `value`, allocating them on first touch.
    pub fn value_regs(&mut self, value: Value) -> ValueRegs {
        let value = self.f.dfg.resolve_aliases(value);
        if let Some(&regs) = self.value_regs.get(&value) {
            return regs;
        }
        let ty = self.f.dfg.value_type(value);
        let regs = self.alloc_regs_for_type(ty);
        self.value_regs.insert(value, regs);
        regs
    }

    fn alloc_regs_for_type(&mut self, ty: Type) -> ValueRegs {
        if ty == types::I128 {
            let lo = self.alloc_tmp(RegClass::Int).to_reg();
            let hi = self.alloc_tmp(RegClass::Int).to_reg();
            ValueRegs::two(lo, hi)
        } else {
            let class = if ty.is_float() || ty.is_vector() {
                if ty.is_vector() {
                    RegClass::Vector
                } else {
                    RegClass::Float
                }
            } else {
                RegClass::Int
            };
            ValueRegs::one(self.alloc_tmp(class).to_reg())
        }
    }

    /// Demand `value` in registers: the producing instruction will be
    /// emitted.
    pub fn put_value_in_regs(&mut self, value: Value) -> ValueRegs {
        let value = self.f.dfg.resolve_aliases(value);
        self.reg_demand.insert(value);
        if let Some(count) = self.uses_left.get_mut(&value) {
            *count = count.saturating_sub(1);
        }
        self.value_regs(value)
    }

    /// Demand a single-register value.
    pub fn put_value_in_reg(&mut self, value: Value) -> Reg {
        self.put_value_in_regs(value)
            .only_reg()
            .expect("single-register value expected")
    }

    /// The registers holding the `idx`'th result of `inst`.
    pub fn output_regs(&mut self, inst: Inst, idx: usize) -> ValueRegs {
        let result = self.f.dfg.inst_results(inst)[idx];
        self.value_regs(result)
    }

    /// The single output register of `inst`'s only result, writable.
    pub fn output_reg(&mut self, inst: Inst, idx: usize) -> Writable<Reg> {
        Writable::from_reg(
            self.output_regs(inst, idx)
                .only_reg()
                .expect("single-register result expected"),
        )
    }

    /// The type of `value`.
    pub fn value_ty(&self, value: Value) -> Type {
        self.f.dfg.value_type(value)
    }

    /// The type of the `idx`'th result of `inst`.
    pub fn output_ty(&self, inst: Inst, idx: usize) -> Type {
        self.f.dfg.value_type(self.f.dfg.inst_results(inst)[idx])
    }

    /// The `idx`'th input value of `inst`.
    pub fn input_value(&self, inst: Inst, idx: usize) -> Value {
        self.f.dfg.resolve_aliases(self.f.dfg.inst_args(inst)[idx])
    }

    /// If `value` is an integer constant (directly or through an alias),
    /// return its bits without consuming anything.
    pub fn value_as_const(&self, value: Value) -> Option<u64> {
        let value = self.f.dfg.resolve_aliases(value);
        let inst = self.f.dfg.value_def(value).inst()?;
        match self.f.dfg.insts[inst] {
            InstructionData::UnaryImm {
                opcode: Opcode::Iconst,
                imm,
            } => {
                let ty = self.f.dfg.value_type(value);
                let bits = ty.bits().min(64);
                let mask = if bits >= 64 {
                    u64::MAX
                } else {
                    (1u64 << bits) - 1
                };
                Some(imm.bits() as u64 & mask)
            }
            _ => None,
        }
    }

    /// Consume `value` as an inline constant: the use no longer demands a
    /// register, so an otherwise-unused `iconst` will not be materialized.
    pub fn use_constant(&mut self, value: Value) -> Option<u64> {
        let value = self.f.dfg.resolve_aliases(value);
        let c = self.value_as_const(value)?;
        if let Some(count) = self.uses_left.get_mut(&value) {
            *count = count.saturating_sub(1);
        }
        Some(c)
    }

    /// If `value` is produced by a pure instruction in the current block
    /// whose only remaining use is the current one, return that
    /// instruction so the caller can fold it. The caller must then either
    /// call [`sink_inst`](Self::sink_inst) or leave it to lower normally.
    pub fn get_single_use_def(&self, value: Value) -> Option<Inst> {
        let value = self.f.dfg.resolve_aliases(value);
        if self.uses_left.get(&value).copied().unwrap_or(0) != 1 {
            return None;
        }
        if self.reg_demand.contains(&value) {
            return None;
        }
        let def = self.f.dfg.value_def(value).inst()?;
        if !self.f.dfg.insts[def].opcode().is_pure() {
            return None;
        }
        // Folding across blocks would move the computation past arbitrary
        // control flow; only fold within the block being lowered.
        let cur_block = self.cur_inst.and_then(|i| self.f.layout.inst_block(i))?;
        if self.f.layout.inst_block(def) != Some(cur_block) {
            return None;
        }
        Some(def)
    }

    /// Mark `def` as folded into the current instruction; it will not be
    /// separately lowered. Its result's single use is consumed.
    pub fn sink_inst(&mut self, def: Inst) {
        for &result in self.f.dfg.inst_results(def) {
            if let Some(count) = self.uses_left.get_mut(&result) {
                *count = count.saturating_sub(1);
            }
        }
        self.sunk.insert(def);
    }

    /// Emit a machine instruction at the current position.
    ///
    /// Within one IR instruction's lowering, emitted instructions appear in
    /// the order of the `emit` calls.
    pub fn emit(&mut self, inst: I) {
        self.cur_inst_insts.push(inst);
    }

    /// Flush the per-instruction buffer into the (reversed) block stream.
    /// Pushing in reverse here makes the block-level reversal restore the
    /// emission order.
    fn flush_inst_buffer(&mut self) {
        while let Some(inst) = self.cur_inst_insts.pop() {
            self.cur_block_insts.push(inst);
        }
    }

    /// The label of the block that follows the current one in the lowered
    /// order, when there is one: its branch can be elided as a fallthrough.
    pub fn fallthrough_label(&self) -> Option<MachLabel> {
        let next = self.cur_bindex + 1;
        if (next as usize) < self.lowered_order.len() {
            Some(MachLabel::from_block(next))
        } else {
            None
        }
    }

    /// Must the given IR instruction be lowered? Pure instructions whose
    /// results have no remaining demand are skipped.
    fn inst_needed(&self, inst: Inst) -> bool {
        if self.sunk.contains(&inst) {
            return false;
        }
        let opcode = self.f.dfg.insts[inst].opcode();
        if !opcode.is_pure() {
            return true;
        }
        self.f.dfg.inst_results(inst).iter().any(|&result| {
            self.reg_demand.contains(&result)
                || self.uses_left.get(&result).copied().unwrap_or(0) > 0
        })
    }

    /// Emit the parallel moves carrying branch arguments into successor
    /// block parameters. The driver emits these before the branch lowering
    /// for ordinary branches; a `try_call` lowering calls this itself after
    /// the call instruction, since the moves may read the call's results.
    pub fn emit_branch_arg_moves(&mut self, terminator: Inst) -> CodegenResult<()> {
        // Gather (dst, src, ty) over all successors in one set: the
        // destinations are distinct block parameters, so one parallel
        // resolution covers every edge.
        let mut moves: Vec<(Reg, Reg, Type)> = Vec::new();
        let dests: Vec<_> = self.f.dfg.insts[terminator]
            .branch_destination(&self.f.dfg.jump_tables)
            .to_vec();
        for dest in dests {
            let block = dest.block(&self.f.dfg.value_lists);
            let args: Vec<Value> = dest.args_slice(&self.f.dfg.value_lists).to_vec();
            let params: Vec<Value> = self.f.dfg.block_params(block).to_vec();
            debug_assert_eq!(args.len(), params.len());
            for (param, arg) in params.into_iter().zip(args) {
                let ty = self.f.dfg.value_type(param);
                let srcs = self.put_value_in_regs(arg);
                let dsts = self.value_regs(param);
                for (&dst, &src) in dsts.regs().iter().zip(srcs.regs()) {
                    if dst != src {
                        let part_ty = if dsts.len() == 2 { types::I64 } else { ty };
                        moves.push((dst, src, part_ty));
                    }
                }
            }
        }
        self.emit_parallel_moves(moves);
        Ok(())
    }

    /// Resolve a parallel move set into a sequence, breaking cycles with a
    /// temporary.
    fn emit_parallel_moves(&mut self, mut moves: Vec<(Reg, Reg, Type)>) {
        let mut seq: Vec<I> = Vec::new();
        while !moves.is_empty() {
            // A move whose destination is no other move's source is safe.
            let safe = moves.iter().position(|&(dst, _, _)| {
                !moves.iter().any(|&(_, src, _)| src == dst)
            });
            match safe {
                Some(ix) => {
                    let (dst, src, ty) = moves.swap_remove(ix);
                    seq.push(I::gen_move(Writable::from_reg(dst), src, ty));
                }
                None => {
                    // Every remaining move is part of a cycle. Rotate one
                    // cycle through a temporary.
                    let (dst, src, ty) = moves[0];
                    let class = dst.class();
                    let tmp = self.alloc_tmp(class);
                    seq.push(I::gen_move(tmp, dst, ty));
                    // Redirect uses of `dst` as a source to the temp.
                    for m in moves.iter_mut() {
                        if m.1 == dst {
                            m.1 = tmp.to_reg();
                        }
                    }
                    seq.push(I::gen_move(Writable::from_reg(dst), src, ty));
                    moves.remove(0);
                }
            }
        }
        for inst in seq {
            self.emit(inst);
        }
    }

    /// Run lowering over the whole function.
    pub fn lower<B: LowerBackend<MInst = I>>(
        mut self,
        backend: &B,
    ) -> CodegenResult<VCode<I>> {
        let lowered_order = self.lowered_order.clone();
        for (bindex, &block) in lowered_order.iter().enumerate() {
            self.cur_bindex = bindex as u32;
            self.cur_block_insts.clear();

            // Record successors for liveness.
            let mut succs = SmallVec::new();
            if let Some(term) = self.f.layout.last_inst(block) {
                for dest in self.f.dfg.insts[term].branch_destination(&self.f.dfg.jump_tables) {
                    let succ = dest.block(&self.f.dfg.value_lists);
                    succs.push(self.block_index[succ]);
                }
            }
            self.block_succs.push(succs);

            // Lower instructions backward.
            let insts: Vec<Inst> = self.f.layout.block_insts(block).collect();
            for &inst in insts.iter().rev() {
                self.cur_inst = Some(inst);
                let opcode = self.f.dfg.insts[inst].opcode();
                if opcode.is_branch() || opcode.is_terminator() {
                    if opcode.is_branch() && opcode != Opcode::TryCall {
                        self.emit_branch_arg_moves(inst)?;
                    }
                    backend.lower_branch(&mut self, inst)?;
                } else if self.inst_needed(inst) {
                    backend.lower(&mut self, inst)?;
                }
                self.cur_inst = None;
                self.flush_inst_buffer();
            }

            // The entry block receives its parameters from the ABI.
            if bindex == 0 {
                backend.gen_arg_setup(&mut self)?;
                self.flush_inst_buffer();
            }

            // Un-reverse into final order.
            let mut block_insts = core::mem::take(&mut self.cur_block_insts);
            block_insts.reverse();
            self.finished_blocks.push(block_insts);
        }

        // Flatten into the VCode container.
        let mut insts = Vec::new();
        let mut block_ranges = Vec::with_capacity(self.finished_blocks.len());
        for block_insts in self.finished_blocks.drain(..) {
            let start = insts.len() as u32;
            insts.extend(block_insts);
            block_ranges.push((start, insts.len() as u32));
        }

        if block_ranges.is_empty() {
            return Err(CodegenError::InternalError {
                stage: "lower",
                message: "cannot lower a function with no blocks".into(),
            });
        }

        Ok(VCode {
            insts,
            block_ranges,
            block_succs: self.block_succs,
            vreg_classes: self.vreg_classes,
        })
    }

    /// The entry block's IR parameters, for argument setup.
    pub fn entry_block_params(&mut self) -> Vec<(Value, ValueRegs)> {
        let entry = self
            .f
            .layout
            .entry_block()
            .expect("function must have an entry block");
        let params: Vec<Value> = self.f.dfg.block_params(entry).to_vec();
        params
            .into_iter()
            .map(|param| {
                let regs = self.value_regs(param);
                (param, regs)
            })
            .collect()
    }
}
