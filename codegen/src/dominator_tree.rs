//! A Dominator Tree represented as mappings of Blocks to their immediate
//! dominator.

use crate::entity::packed_option::PackedOption;
use crate::entity::SecondaryMap;
use crate::flowgraph::{BlockPredecessor, ControlFlowGraph};
use crate::ir::{Block, Function, Inst, Layout, ProgramPoint};
use crate::timing;
use core::cmp::Ordering;

/// RPO numbers are not first assigned in a contiguous way but as multiples
/// of STRIDE, to leave room for modifications of the dominator tree.
const STRIDE: u32 = 4;

/// Special RPO numbers used during `compute_postorder`.
const SEEN: u32 = 1;

/// Dominator tree node. We keep one of these per block.
#[derive(Clone, Default)]
struct DomNode {
    /// Number of this node in a reverse post-order traversal of the CFG,
    /// starting from 1. This number is monotonic in the reverse postorder
    /// but not contiguous, since we leave holes for later localized
    /// modifications of the dominator tree.
    /// Unreachable nodes get number 0, all others are positive.
    rpo_number: u32,

    /// The immediate dominator of this block, represented as the branch or
    /// jump instruction at the end of the dominating basic block.
    ///
    /// This is `None` for unreachable blocks and the entry block which
    /// doesn't have an immediate dominator.
    idom: PackedOption<Inst>,
}

/// The dominator tree for a single function.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,

    /// CFG post-order of all reachable blocks.
    postorder: Vec<Block>,

    /// True when `compute` has been called after the last `clear`.
    valid: bool,
}

/// Methods for querying the dominator tree.
impl DominatorTree {
    /// Is `block` reachable from the entry block?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    /// Get the CFG post-order of blocks that was used to compute the
    /// dominator tree.
    ///
    /// This order is not updated automatically when the CFG is modified. It
    /// is computed from scratch and cached by `compute()`.
    pub fn cfg_postorder(&self) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.postorder
    }

    /// Returns the immediate dominator of `block`.
    ///
    /// The immediate dominator of a basic block is the branch or jump
    /// instruction at the end of the dominating block. The entry block and
    /// unreachable blocks have no immediate dominator.
    pub fn idom(&self, block: Block) -> Option<Inst> {
        self.nodes[block].idom.into()
    }

    /// Compare two blocks relative to the reverse post-order.
    fn rpo_cmp_block(&self, a: Block, b: Block) -> Ordering {
        self.nodes[a].rpo_number.cmp(&self.nodes[b].rpo_number)
    }

    /// Compare two program points relative to a reverse post-order traversal
    /// of the control-flow graph.
    ///
    /// Return `Ordering::Less` if `a` comes before `b` in the RPO. If `a` and
    /// `b` belong to the same block, compare their relative position in the
    /// block.
    pub fn rpo_cmp<A, B>(&self, a: A, b: B, layout: &Layout) -> Ordering
    where
        A: Into<ProgramPoint>,
        B: Into<ProgramPoint>,
    {
        let a = a.into();
        let b = b.into();
        self.rpo_cmp_block(self.pp_block(a, layout), self.pp_block(b, layout))
            .then_with(|| layout.pp_cmp(a, b))
    }

    fn pp_block(&self, pp: ProgramPoint, layout: &Layout) -> Block {
        match pp {
            ProgramPoint::Block(block) => block,
            ProgramPoint::Inst(inst) => layout.inst_block(inst).expect("unused instruction"),
        }
    }

    /// Returns `true` if `a` dominates `b`.
    ///
    /// This means that every control-flow path from the function entry to
    /// `b` must go through `a`. Dominance is ill-defined for unreachable
    /// blocks; this function returns false if either block is unreachable.
    pub fn dominates<A, B>(&self, a: A, b: B, layout: &Layout) -> bool
    where
        A: Into<ProgramPoint>,
        B: Into<ProgramPoint>,
    {
        let a = a.into();
        let b = b.into();
        match a {
            ProgramPoint::Block(block_a) => match b {
                ProgramPoint::Block(block_b) => self.block_dominates(block_a, block_b, layout),
                ProgramPoint::Inst(inst_b) => {
                    let block_b = layout.inst_block(inst_b).expect("instruction not in layout");
                    self.block_dominates(block_a, block_b, layout)
                }
            },
            ProgramPoint::Inst(inst_a) => {
                let block_a = layout.inst_block(inst_a).expect("instruction not in layout");
                match b {
                    ProgramPoint::Block(block_b) => {
                        // inst_a dominates the block header only when its
                        // block strictly dominates the block.
                        block_a != block_b && self.block_dominates(block_a, block_b, layout)
                    }
                    ProgramPoint::Inst(inst_b) => {
                        let block_b =
                            layout.inst_block(inst_b).expect("instruction not in layout");
                        if block_a == block_b {
                            layout.pp_cmp(inst_a, inst_b) != Ordering::Greater
                        } else {
                            self.block_dominates(block_a, block_b, layout)
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` if `block_a` dominates `block_b`, reflexively.
    pub fn block_dominates(&self, block_a: Block, mut block_b: Block, layout: &Layout) -> bool {
        if !self.is_reachable(block_a) || !self.is_reachable(block_b) {
            return false;
        }
        let rpo_a = self.nodes[block_a].rpo_number;

        // Run a finger up the dominator tree from b until we see a.
        // Doing this in RPO order instead of tree order avoids the need to
        // keep depth numbers on the nodes.
        while rpo_a < self.nodes[block_b].rpo_number {
            let idom = match self.idom(block_b) {
                Some(idom) => idom,
                None => return false,
            };
            block_b = layout
                .inst_block(idom)
                .expect("the idom instruction is always in the layout");
        }
        block_a == block_b
    }
}

impl DominatorTree {
    /// Allocate a new blank dominator tree. Use `compute` to compute the
    /// dominator tree for a function.
    pub fn new() -> Self {
        Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a dominator tree.
    pub fn with_function(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let mut domtree = Self::new();
        domtree.compute(func, cfg);
        domtree
    }

    /// Reset and compute a CFG post-order and dominator tree.
    pub fn compute(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        let _tt = timing::domtree();
        debug_assert!(cfg.is_valid());
        self.clear();
        self.compute_postorder(func);
        self.compute_domtree(func, cfg);
        self.valid = true;
    }

    /// Clear the data structures used to represent the dominator tree. This
    /// will leave the tree in a state where `is_valid()` returns false.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.postorder.clear();
        self.valid = false;
    }

    /// Check if the dominator tree is in a valid state.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Reset all internal data structures and compute a post-order of the
    /// control flow graph.
    ///
    /// This leaves `rpo_number == SEEN` for all reachable blocks, 0 for
    /// unreachable ones.
    fn compute_postorder(&mut self, func: &Function) {
        self.nodes.resize(func.dfg.num_blocks());

        let entry = match func.layout.entry_block() {
            Some(block) => block,
            None => return,
        };
        self.nodes[entry].rpo_number = SEEN;

        // Depth-first search, emitting a block once every successor has been
        // visited. The stack holds a block once per remaining visit: the
        // first pop schedules the successors, the second emits it.
        let mut scheduled: Vec<(Block, bool)> = vec![(entry, false)];
        while let Some((block, children_done)) = scheduled.pop() {
            if children_done {
                self.postorder.push(block);
                continue;
            }
            scheduled.push((block, true));
            if let Some(inst) = func.layout.last_inst(block) {
                // Successors are visited in reverse branch order so the
                // first target ends up first in the RPO.
                for dest in func.dfg.insts[inst]
                    .branch_destination(&func.dfg.jump_tables)
                    .iter()
                    .rev()
                {
                    let succ = dest.block(&func.dfg.value_lists);
                    if self.nodes[succ].rpo_number == 0 {
                        self.nodes[succ].rpo_number = SEEN;
                        scheduled.push((succ, false));
                    }
                }
            }
        }
    }

    /// Build a dominator tree from a control flow graph using Keith Cooper's
    /// "Simple, Fast Dominator Algorithm".
    fn compute_domtree(&mut self, func: &Function, cfg: &ControlFlowGraph) {
        // Visit the blocks in reverse post-order, assigning final RPO
        // numbers with a stride that leaves room for local updates.
        for (rpo_idx, &block) in self.postorder.iter().rev().enumerate() {
            self.nodes[block].rpo_number = (rpo_idx as u32 + 1) * STRIDE;
        }

        let (entry, rest) = match self.postorder.split_last() {
            Some(split) => split,
            None => return,
        };

        // Iterate until convergence. The first pass can leave `idom` unset
        // for blocks whose predecessors all appear later in the RPO.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in rest.iter().rev() {
                debug_assert_ne!(block, *entry);
                let new_idom = self.compute_idom(block, cfg, &func.layout);
                if self.nodes[block].idom != new_idom.into() {
                    self.nodes[block].idom = new_idom.into();
                    changed = true;
                }
            }
        }
    }

    /// Compute the immediate dominator for `block` using the current `idom`
    /// states for the reachable nodes.
    fn compute_idom(&self, block: Block, cfg: &ControlFlowGraph, layout: &Layout) -> Inst {
        // Get an iterator with just the reachable, already processed
        // predecessors.
        let mut iter = cfg.pred_iter(block).filter(|pred| {
            self.is_reachable(pred.block)
                && (self.nodes[pred.block].idom.is_some()
                    || layout.entry_block() == Some(pred.block))
        });

        // The RPO must visit at least one predecessor before this node.
        let mut idom = iter
            .next()
            .expect("block node must have one reachable predecessor")
            .inst;

        for pred in iter {
            idom = self.common_dominator(
                BlockPredecessor::new(
                    layout.inst_block(idom).expect("idom inst in layout"),
                    idom,
                ),
                pred,
                layout,
            );
        }
        idom
    }

    /// Compute the common dominator of two basic blocks.
    ///
    /// Both basic blocks are assumed to be reachable.
    pub fn common_dominator(
        &self,
        mut a: BlockPredecessor,
        mut b: BlockPredecessor,
        layout: &Layout,
    ) -> Inst {
        loop {
            match self.rpo_cmp_block(a.block, b.block) {
                Ordering::Less => {
                    // `a` comes before `b` in the RPO. Move `b` up.
                    let idom = self.nodes[b.block].idom.expect("reachable block without idom");
                    b = BlockPredecessor::new(
                        layout.inst_block(idom).expect("idom inst in layout"),
                        idom,
                    );
                }
                Ordering::Greater => {
                    // `b` comes before `a` in the RPO. Move `a` up.
                    let idom = self.nodes[a.block].idom.expect("reachable block without idom");
                    a = BlockPredecessor::new(
                        layout.inst_block(idom).expect("idom inst in layout"),
                        idom,
                    );
                }
                Ordering::Equal => break,
            }
        }
        debug_assert_eq!(a.block, b.block, "unreachable block passed to common_dominator?");

        // We're in the same block. The common dominator is the earlier
        // instruction.
        if layout.pp_cmp(a.inst, b.inst) == Ordering::Less {
            a.inst
        } else {
            b.inst
        }
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
        let cfg = ControlFlowGraph::with_function(&func);
        debug_assert!(cfg.is_valid());
        let dtree = DominatorTree::with_function(&func, &cfg);
        assert_eq!(0, dtree.nodes.keys().count());
        assert_eq!(dtree.cfg_postorder(), &[]);
    }

    #[test]
    fn unreachable_node() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let v0 = func.dfg.append_block_param(block0, types::I32);
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();
        let trap_block = func.dfg.make_block();

        let mut cur = FuncCursor::new(&mut func);

        cur.insert_block(block0);
        cur.ins().brif(v0, block2, &[], trap_block, &[]);

        cur.insert_block(trap_block);
        cur.ins().trap(crate::ir::TrapCode::User(0));

        cur.insert_block(block1);
        let v1 = cur.ins().iconst(types::I32, 1);
        let v2 = cur.ins().iadd(v0, v1);
        cur.ins().jump(block0, &[v2]);

        cur.insert_block(block2);
        cur.ins().return_(&[v0]);

        let cfg = ControlFlowGraph::with_function(&func);
        let dt = DominatorTree::with_function(&func, &cfg);

        // Fall-through-first, prune-at-source DFT:
        //
        // block0 {
        //   brif block2 {
        //     trap
        //     block2 {
        //       return
        //     } block2
        // } block0
        assert_eq!(func.layout.entry_block().unwrap(), block0);
        assert_eq!(dt.cfg_postorder(), &[block2, trap_block, block0]);

        assert!(!dt.dominates(block0, block1, &func.layout));
        assert!(!dt.dominates(block1, block0, &func.layout));

        assert!(dt.dominates(block0, block0, &func.layout));
        assert!(dt.dominates(block0, block2, &func.layout));
        assert!(!dt.dominates(block2, block0, &func.layout));
    }

    #[test]
    fn non_zero_entry_block() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();
        let block3 = func.dfg.make_block();
        let cond = func.dfg.append_block_param(block3, types::I32);

        {
            let mut cur = FuncCursor::new(&mut func);

            cur.insert_block(block3);
            cur.ins().jump(block1, &[]);

            cur.insert_block(block1);
            cur.ins().brif(cond, block0, &[], block2, &[]);

            cur.insert_block(block2);
            cur.ins().jump(block0, &[]);

            cur.insert_block(block0);
            cur.ins().return_(&[]);
        }

        let cfg = ControlFlowGraph::with_function(&func);
        let dt = DominatorTree::with_function(&func, &cfg);

        assert_eq!(func.layout.entry_block().unwrap(), block3);
        assert!(dt.dominates(block3, block0, &func.layout));
        assert!(dt.dominates(block1, block0, &func.layout));
        assert!(!dt.dominates(block2, block0, &func.layout));

        // block0 joins the branch and the jump, so its immediate dominator
        // is the branch at the end of block1.
        let idom0 = dt.idom(block0).unwrap();
        assert_eq!(func.layout.inst_block(idom0), Some(block1));
    }
}
