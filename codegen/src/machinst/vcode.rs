//! This implements the VCode container: a CFG of machine instructions that
//! have not yet been allocated registers.
//!
//! The container is a flat instruction array with per-block ranges, in the
//! final emission order (reverse post-order as produced by lowering). Branch
//! instructions reference successor blocks through `MachLabel`s whose
//! indexes are the block indexes, so emission is one linear sweep that binds
//! each block's label as it is reached.

use crate::machinst::{
    MachBuffer, MachBufferFinalized, MachInst, MachLabel, OperandCollector, Reg, RegClass,
};
use crate::result::CodegenResult;
use smallvec::SmallVec;

/// Index referring to a basic block in VCode.
pub type BlockIndex = u32;

/// A machine instruction that knows how to emit itself into a `MachBuffer`.
pub trait MachInstEmit: MachInst {
    /// Persistent state carried across the emission of one function; the
    /// frame layout lives here.
    type State: Clone;

    /// Emit the instruction.
    fn emit(&self, sink: &mut MachBuffer<Self::LabelUse>, state: &mut Self::State);
}

/// One or two registers holding an IR value. 128-bit integers occupy a pair
/// (low half first); everything else occupies one register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueRegs {
    parts: [Reg; 2],
    len: u8,
}

impl ValueRegs {
    /// A single-register value.
    pub fn one(reg: Reg) -> Self {
        Self {
            parts: [reg, reg],
            len: 1,
        }
    }

    /// A two-register value: (low, high).
    pub fn two(lo: Reg, hi: Reg) -> Self {
        Self {
            parts: [lo, hi],
            len: 2,
        }
    }

    /// The registers as a slice.
    pub fn regs(&self) -> &[Reg] {
        &self.parts[..self.len as usize]
    }

    /// The single register, when the value occupies one.
    pub fn only_reg(&self) -> Option<Reg> {
        if self.len == 1 {
            Some(self.parts[0])
        } else {
            None
        }
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Is this an empty (invalid) value? Never true for constructed values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A container for a sequence of machine instructions with block markers.
pub struct VCode<I: MachInstEmit> {
    /// Lowered machine instructions in block order.
    pub insts: Vec<I>,
    /// Instruction index ranges, per block, in emission order.
    pub block_ranges: Vec<(u32, u32)>,
    /// Successor block indexes, per block.
    pub block_succs: Vec<SmallVec<[BlockIndex; 2]>>,
    /// Register class of every virtual register, by vreg index.
    pub vreg_classes: Vec<RegClass>,
}

impl<I: MachInstEmit> VCode<I> {
    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.block_ranges.len()
    }

    /// The instructions of one block.
    pub fn block_insns(&self, block: BlockIndex) -> &[I] {
        let (start, end) = self.block_ranges[block as usize];
        &self.insts[start as usize..end as usize]
    }

    /// Collect the operands of instruction `ix` into `collector`.
    pub fn collect_operands(&self, ix: usize, collector: &mut OperandCollector) {
        collector.clear();
        self.insts[ix].get_operands(collector);
    }

    /// Emit the instructions, binding one label per block, placing constant
    /// islands when pending fixups require them.
    ///
    /// Returns the finalized buffer and the offset of every block start.
    pub fn emit(
        &self,
        state: &mut I::State,
        prologue: &[I],
        epilogue: &[I],
    ) -> CodegenResult<(MachBufferFinalized, Vec<u32>)> {
        let mut buffer = MachBuffer::<I::LabelUse>::new();
        buffer.reserve_labels_for_blocks(self.num_blocks() as u32);
        let mut bb_starts = Vec::with_capacity(self.num_blocks());

        for block in 0..self.num_blocks() as BlockIndex {
            // If pending fixups could expire inside this block, place an
            // island first and branch over it.
            let block_len = self.block_insns(block).len() as u32;
            let worst = (block_len + 2) * I::worst_case_size();
            if buffer.island_needed(worst) {
                let jump = I::gen_jump(MachLabel::from_block(block));
                jump.emit(&mut buffer, state);
                buffer.emit_island(worst);
            }

            buffer.bind_label(MachLabel::from_block(block));
            bb_starts.push(buffer.cur_offset());

            if block == 0 {
                for inst in prologue {
                    inst.emit(&mut buffer, state);
                }
            }

            for inst in self.block_insns(block) {
                match inst.is_term() {
                    crate::machinst::MachTerminator::Ret => {
                        // The return pseudo-instruction expands into the
                        // epilogue followed by the actual return.
                        for epi in epilogue {
                            epi.emit(&mut buffer, state);
                        }
                        inst.emit(&mut buffer, state);
                    }
                    _ => inst.emit(&mut buffer, state),
                }
            }
        }

        let finalized = buffer.finish()?;
        Ok((finalized, bb_starts))
    }
}
