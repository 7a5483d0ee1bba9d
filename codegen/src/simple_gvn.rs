//! A simple GVN pass.
//!
//! Values the function computes twice are collapsed onto one computation:
//! pure instructions are hashed by their opcode, controlling type, and
//! resolved operands; a later instruction that matches an earlier,
//! dominating one is rewritten into value aliases of the earlier results.

use crate::cursor::{Cursor, FuncCursor};
use crate::dominator_tree::DominatorTree;
use crate::fx::FxHashMap;
use crate::ir::{Function, Inst, InstructionData, Opcode, Type};
use crate::timing;

/// Test whether the given opcode is unsafe to even consider for GVN.
fn trivially_unsafe_for_gvn(opcode: Opcode) -> bool {
    !opcode.is_pure()
}

/// The identity of an instruction for value numbering: opcode, controlling
/// type, immediates, and alias-resolved operands.
#[derive(Clone, PartialEq, Eq, Hash)]
struct HashKey {
    data: InstructionData,
    ty: Type,
}

/// Perform simple GVN on `func`.
pub fn do_simple_gvn(func: &mut Function, domtree: &mut DominatorTree) {
    let _tt = timing::gvn();
    debug_assert!(domtree.is_valid());

    // Visit blocks in a reverse post-order, so that when an instruction is
    // seen for the second time, the first occurrence is already in the
    // table, and every dominating block has been scanned.
    let mut visible: FxHashMap<HashKey, Inst> = FxHashMap::default();

    let postorder: Vec<_> = domtree.cfg_postorder().to_vec();
    for &block in postorder.iter().rev() {
        let mut pos = FuncCursor::new(func).at_top(block);
        while let Some(inst) = pos.next_inst() {
            let opcode = pos.func.dfg.insts[inst].opcode();
            if trivially_unsafe_for_gvn(opcode) {
                continue;
            }
            // Resolve aliases, particularly aliases we created earlier.
            pos.func.dfg.resolve_aliases_in_arguments(inst);

            let ty = pos
                .func
                .dfg
                .inst_results(inst)
                .first()
                .map(|&v| pos.func.dfg.value_type(v))
                .unwrap_or(crate::ir::types::INVALID);
            let key = HashKey {
                data: pos.func.dfg.insts[inst].clone(),
                ty,
            };

            match visible.get(&key) {
                Some(&original)
                    if pos
                        .func
                        .layout
                        .inst_block(original)
                        .is_some_and(|b| domtree.dominates(b, inst, &pos.func.layout)) =>
                {
                    trace!(
                        "gvn: replacing {} with {}",
                        pos.func.dfg.display_inst(inst),
                        original
                    );
                    pos.func.dfg.replace_with_aliases(inst, original);
                    pos.remove_inst_and_step_back();
                }
                _ => {
                    visible.insert(key, inst);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::{types, InstBuilder};

    #[test]
    fn coalesces_identical_adds() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let ret_vals;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let a = cur.ins().iconst(types::I32, 3);
            let b = cur.ins().iconst(types::I32, 4);
            let x = cur.ins().iadd(a, b);
            let y = cur.ins().iadd(a, b);
            ret_vals = (x, y);
            cur.ins().return_(&[x, y]);
        }
        let cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::with_function(&func, &cfg);
        do_simple_gvn(&mut func, &mut domtree);

        // The second iadd is gone and y aliases x.
        let count = func
            .layout
            .block_insts(block0)
            .filter(|&i| func.dfg.insts[i].opcode() == Opcode::Iadd)
            .count();
        assert_eq!(count, 1);
        assert_eq!(func.dfg.resolve_aliases(ret_vals.1), ret_vals.0);
    }

    #[test]
    fn does_not_merge_loads(){
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let p = func.dfg.append_block_param(block0, types::I64);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let flags = crate::ir::MemFlags::new();
            let x = cur.ins().load(types::I32, flags, p, 0);
            let y = cur.ins().load(types::I32, flags, p, 0);
            cur.ins().return_(&[x, y]);
        }
        let cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::with_function(&func, &cfg);
        do_simple_gvn(&mut func, &mut domtree);

        let count = func
            .layout
            .block_insts(block0)
            .filter(|&i| func.dfg.insts[i].opcode() == Opcode::Load)
            .count();
        assert_eq!(count, 2);
    }
}
