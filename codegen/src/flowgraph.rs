//! A control flow graph represented as mappings of basic blocks to their
//! predecessors and successors.
//!
//! Successors are basic blocks; predecessors are pairs of a basic block and
//! the branch instruction at its end that transfers control here. The CFG is
//! an analysis result computed on demand from the function layout and branch
//! targets; passes that edit branches call `recompute_block` to keep it
//! consistent.

use crate::entity::SecondaryMap;
use crate::inst_predicates::visit_block_succs;
use crate::ir::{Block, Function, Inst};
use crate::timing;
use smallvec::SmallVec;

/// A basic block denoted by its enclosing block and last instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct BlockPredecessor {
    /// Enclosing block.
    pub block: Block,
    /// Last instruction in the basic block: the branch reaching us.
    pub inst: Inst,
}

impl BlockPredecessor {
    /// Convenient method to construct a new BlockPredecessor.
    pub fn new(block: Block, inst: Inst) -> Self {
        Self { block, inst }
    }
}

/// A container for the successors and predecessors of some block.
#[derive(Clone, Default)]
struct CFGNode {
    /// Branches and jumps that can reach this block; ordered by insertion.
    predecessors: SmallVec<[BlockPredecessor; 4]>,
    /// Distinct blocks that are targets of branches in this block, ordered
    /// by block number.
    successors: SmallVec<[Block; 2]>,
}

/// The Control Flow Graph maintains a mapping of blocks to their predecessors
/// and successors.
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CFGNode>,
    valid: bool,
}

impl ControlFlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self {
            data: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Clear all data structures in this control flow graph.
    pub fn clear(&mut self) {
        self.data.clear();
        self.valid = false;
    }

    /// Allocate and compute the control flow graph for `func`.
    pub fn with_function(func: &Function) -> Self {
        let mut cfg = Self::new();
        cfg.compute(func);
        cfg
    }

    /// Compute the control flow graph of `func`.
    ///
    /// This will clear and overwrite any information already stored in this
    /// data structure.
    pub fn compute(&mut self, func: &Function) {
        let _tt = timing::flowgraph();
        self.clear();
        self.data.resize(func.dfg.num_blocks());
        for block in &func.layout {
            self.compute_block(func, block);
        }
        self.valid = true;
    }

    fn compute_block(&mut self, func: &Function, block: Block) {
        visit_block_succs(func, block, |inst, dest| {
            self.add_edge(block, inst, dest);
        });
    }

    fn invalidate_block_successors(&mut self, block: Block) {
        // Take the successor list so we can edit other nodes while walking
        // it.
        let successors = core::mem::take(&mut self.data[block].successors);
        for succ in successors {
            self.data[succ]
                .predecessors
                .retain(|pred| pred.block != block);
        }
    }

    /// Recompute the control flow graph of `block`.
    ///
    /// This is for use after modifying instructions within a specific block.
    /// It recomputes all edges from `block` while leaving edges to `block`
    /// intact.
    pub fn recompute_block(&mut self, func: &Function, block: Block) {
        debug_assert!(self.is_valid());
        self.invalidate_block_successors(block);
        self.compute_block(func, block);
    }

    fn add_edge(&mut self, from: Block, from_inst: Inst, to: Block) {
        if !self.data[from].successors.contains(&to) {
            let idx = self.data[from]
                .successors
                .iter()
                .position(|&b| b > to)
                .unwrap_or(self.data[from].successors.len());
            self.data[from].successors.insert(idx, to);
        }
        let pred = BlockPredecessor::new(from, from_inst);
        if !self.data[to].predecessors.contains(&pred) {
            self.data[to].predecessors.push(pred);
        }
    }

    /// Get an iterator over the CFG predecessors to `block`.
    pub fn pred_iter(&self, block: Block) -> impl ExactSizeIterator<Item = BlockPredecessor> + '_ {
        self.data[block].predecessors.iter().copied()
    }

    /// Get an iterator over the CFG successors to `block`.
    pub fn succ_iter(&self, block: Block) -> impl ExactSizeIterator<Item = Block> + '_ {
        debug_assert!(self.is_valid());
        self.data[block].successors.iter().copied()
    }

    /// Check if the CFG is in a valid state.
    ///
    /// This doesn't perform any kind of validity checks; it simply checks if
    /// the `compute()` method has been called since the last `clear()`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::{types, Function, InstBuilder};

    #[test]
    fn empty() {
        let func = Function::new();
        ControlFlowGraph::with_function(&func);
    }

    #[test]
    fn branches_and_jumps() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let cond = func.dfg.append_block_param(block0, types::I32);
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();

        let br_block0;
        let br_block1;

        {
            let mut cur = FuncCursor::new(&mut func);

            cur.insert_block(block0);
            br_block0 = cur.ins().brif(cond, block2, &[], block1, &[]);

            cur.insert_block(block1);
            br_block1 = cur.ins().brif(cond, block1, &[], block2, &[]);

            cur.insert_block(block2);
            cur.ins().return_(&[]);
        }

        let mut cfg = ControlFlowGraph::with_function(&func);

        {
            let block0_predecessors: Vec<_> = cfg.pred_iter(block0).collect();
            let block1_predecessors: Vec<_> = cfg.pred_iter(block1).collect();
            let block2_predecessors: Vec<_> = cfg.pred_iter(block2).collect();

            assert_eq!(block0_predecessors.len(), 0);
            assert_eq!(block1_predecessors.len(), 2);
            assert_eq!(block2_predecessors.len(), 2);

            assert!(block1_predecessors.contains(&BlockPredecessor::new(block0, br_block0)));
            assert!(block1_predecessors.contains(&BlockPredecessor::new(block1, br_block1)));
            assert!(block2_predecessors.contains(&BlockPredecessor::new(block0, br_block0)));
            assert!(block2_predecessors.contains(&BlockPredecessor::new(block1, br_block1)));

            assert_eq!(cfg.succ_iter(block0).collect::<Vec<_>>(), [block1, block2]);
            assert_eq!(cfg.succ_iter(block1).collect::<Vec<_>>(), [block1, block2]);
            assert_eq!(cfg.succ_iter(block2).count(), 0);
        }

        // Rewrite block0's terminator and recompute; stale edges must go.
        func.dfg.replace(br_block0).jump(block1, &[]);
        cfg.recompute_block(&func, block0);

        let block2_predecessors: Vec<_> = cfg.pred_iter(block2).collect();
        assert_eq!(cfg.succ_iter(block0).collect::<Vec<_>>(), [block1]);
        assert_eq!(block2_predecessors.len(), 1);
        assert!(block2_predecessors.contains(&BlockPredecessor::new(block1, br_block1)));
    }
}
