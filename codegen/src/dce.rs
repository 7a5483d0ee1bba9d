//! A Dead-Code Elimination (DCE) pass.
//!
//! Dead code here means instructions that have no side effects and no result
//! values used by other instructions.

use crate::cursor::{Cursor, FuncCursor};
use crate::dominator_tree::DominatorTree;
use crate::entity::EntityRef;
use crate::inst_predicates::{any_inst_results_used, has_side_effect};
use crate::ir::Function;
use crate::timing;

/// Perform DCE on `func`.
pub fn do_dce(func: &mut Function, domtree: &mut DominatorTree) {
    let _tt = timing::dce();
    debug_assert!(domtree.is_valid());

    let mut live = vec![false; func.dfg.num_values()];
    for &block in domtree.cfg_postorder() {
        let mut pos = FuncCursor::new(func).at_bottom(block);
        while let Some(inst) = pos.prev_inst() {
            if has_side_effect(pos.func, inst) || any_inst_results_used(inst, &live, pos.func) {
                for arg in pos.func.dfg.inst_args(inst) {
                    let v = pos.func.dfg.resolve_aliases(*arg);
                    live[v.index()] = true;
                }
                // Branch arguments stay live too.
                let dests: Vec<_> = pos.func.dfg.insts[inst]
                    .branch_destination(&pos.func.dfg.jump_tables)
                    .to_vec();
                for dest in dests {
                    for arg in dest.args_slice(&pos.func.dfg.value_lists).to_vec() {
                        let v = pos.func.dfg.resolve_aliases(arg);
                        live[v.index()] = true;
                    }
                }
                continue;
            }
            pos.remove_inst_and_step_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::{types, Function, InstBuilder};

    #[test]
    fn removes_unused_pure_insts() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let a = cur.ins().iconst(types::I32, 1);
            let b = cur.ins().iconst(types::I32, 2);
            let _unused = cur.ins().iadd(a, b);
            let used = cur.ins().imul(a, b);
            cur.ins().return_(&[used]);
        }

        let cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::with_function(&func, &cfg);
        do_dce(&mut func, &mut domtree);

        // The unused iadd disappears; its operands stay because the imul
        // keeps them alive.
        let names: Vec<String> = func
            .layout
            .block_insts(block0)
            .map(|i| func.dfg.insts[i].opcode().to_string())
            .collect();
        assert_eq!(names, ["iconst", "iconst", "imul", "return"]);
    }
}
