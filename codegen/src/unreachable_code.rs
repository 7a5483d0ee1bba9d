//! Unreachable code elimination.
//!
//! Blocks not reachable from the entry by a breadth-first search over branch
//! targets are removed from the layout, along with every instruction they
//! contain. Within reachable blocks, anything after the first terminator is
//! removed too.

use crate::cursor::{Cursor, FuncCursor};
use crate::entity::EntitySet;
use crate::flowgraph::ControlFlowGraph;
use crate::inst_predicates::visit_block_succs;
use crate::ir::{Block, Function};
use crate::timing;
use std::collections::VecDeque;

/// Eliminate unreachable code.
pub fn eliminate_unreachable_code(func: &mut Function, cfg: &mut ControlFlowGraph) {
    let _tt = timing::unreachable_code();

    let mut reachable = EntitySet::with_capacity(func.dfg.num_blocks());
    let mut queue = VecDeque::new();
    if let Some(entry) = func.layout.entry_block() {
        reachable.insert(entry);
        queue.push_back(entry);
    }
    while let Some(block) = queue.pop_front() {
        visit_block_succs(func, block, |_inst, succ| {
            if reachable.insert(succ) {
                queue.push_back(succ);
            }
        });
    }

    // Collect first to keep the iteration safe while removing.
    let doomed: Vec<Block> = func
        .layout
        .blocks()
        .filter(|&b| !reachable.contains(b))
        .collect();

    for block in doomed {
        trace!("removing unreachable {block}");
        let mut pos = FuncCursor::new(func).at_top(block);
        while pos.next_inst().is_some() {
            pos.remove_inst_and_step_back();
        }
        func.layout.remove_block(block);
    }

    // Drop anything following the first terminator of a reachable block.
    let blocks: Vec<Block> = func.layout.blocks().collect();
    for block in blocks {
        let mut pos = FuncCursor::new(func).at_top(block);
        let mut seen_terminator = false;
        while let Some(inst) = pos.next_inst() {
            if seen_terminator {
                pos.remove_inst_and_step_back();
                continue;
            }
            if pos.func.dfg.insts[inst].opcode().is_terminator() {
                seen_terminator = true;
            }
        }
    }

    cfg.compute(func);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{types, InstBuilder};

    #[test]
    fn removes_disconnected_block() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let dead = func.dfg.make_block();
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            cur.ins().return_(&[]);
            cur.insert_block(dead);
            let v = cur.ins().iconst(types::I32, 5);
            cur.ins().return_(&[v]);
        }
        let mut cfg = ControlFlowGraph::with_function(&func);
        eliminate_unreachable_code(&mut func, &mut cfg);

        assert_eq!(func.layout.blocks().collect::<Vec<_>>(), [block0]);
        assert!(!func.layout.is_block_inserted(dead));
    }
}
