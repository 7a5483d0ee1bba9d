//! Copy propagation.
//!
//! Instructions that merely rename a value are rewritten into value aliases
//! so downstream passes and lowering see the original directly. Two shapes
//! qualify: a `bitcast` between identical types, and a block parameter whose
//! every predecessor passes the same dominating value.

use crate::cursor::{Cursor, FuncCursor};
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, Opcode, Value};
use crate::timing;

/// Perform copy propagation on `func`.
pub fn do_copy_propagation(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    domtree: &DominatorTree,
) {
    let _tt = timing::copy_propagation();

    // Same-type bitcasts are pure renames.
    let mut pos = FuncCursor::new(func);
    while let Some(_block) = pos.next_block() {
        while let Some(inst) = pos.next_inst() {
            if pos.func.dfg.insts[inst].opcode() != Opcode::Bitcast {
                continue;
            }
            let arg = pos.func.dfg.resolve_aliases(pos.func.dfg.inst_args(inst)[0]);
            let result = pos.func.dfg.first_result(inst);
            if pos.func.dfg.value_type(arg) == pos.func.dfg.value_type(result) {
                pos.func.dfg.detach_results(inst);
                pos.func.dfg.change_to_alias(result, arg);
                pos.remove_inst_and_step_back();
            }
        }
    }

    // Block parameters that are passed the same value along every incoming
    // edge collapse to that value, as long as it dominates the block.
    let blocks: Vec<Block> = func.layout.blocks().collect();
    for block in blocks {
        if Some(block) == func.layout.entry_block() {
            continue;
        }
        let num_params = func.dfg.num_block_params(block);
        // Walk backwards so removals don't disturb smaller indexes.
        for param_idx in (0..num_params).rev() {
            if let Some(unique) = unique_incoming_value(func, cfg, block, param_idx) {
                let param = func.dfg.block_params(block)[param_idx];
                if unique != param && domtree.dominates(block_of_def(func, unique), block, &func.layout)
                {
                    trace!("copyprop: collapsing {param} to {unique}");
                    remove_block_param(func, cfg, block, param_idx);
                    func.dfg.change_to_alias(param, unique);
                }
            }
        }
    }

    func.dfg.resolve_all_aliases();
}

fn block_of_def(func: &Function, value: Value) -> Block {
    match func.dfg.value_def(value) {
        crate::ir::ValueDef::Result(inst, _) => func
            .layout
            .inst_block(inst)
            .expect("defining instruction not in layout"),
        crate::ir::ValueDef::Param(block, _) => block,
    }
}

/// If every predecessor passes the same value for `param_idx`, return it.
/// The block parameter itself passed along a back edge does not disqualify.
fn unique_incoming_value(
    func: &Function,
    cfg: &ControlFlowGraph,
    block: Block,
    param_idx: usize,
) -> Option<Value> {
    let param = func.dfg.block_params(block)[param_idx];
    let mut unique: Option<Value> = None;
    for pred in cfg.pred_iter(block) {
        for dest in func.dfg.insts[pred.inst].branch_destination(&func.dfg.jump_tables) {
            if dest.block(&func.dfg.value_lists) != block {
                continue;
            }
            let arg = func
                .dfg
                .resolve_aliases(dest.args_slice(&func.dfg.value_lists)[param_idx]);
            if arg == param {
                continue;
            }
            match unique {
                None => unique = Some(arg),
                Some(u) if u == arg => {}
                Some(_) => return None,
            }
        }
    }
    unique
}

/// Remove parameter `param_idx` of `block` and the corresponding argument of
/// every branch targeting it.
fn remove_block_param(func: &mut Function, cfg: &ControlFlowGraph, block: Block, param_idx: usize) {
    for pred in cfg.pred_iter(block) {
        let pool = &mut func.dfg.value_lists;
        // Split borrows: the jump tables and value pool live in the dfg.
        let jump_tables = &mut func.dfg.jump_tables;
        for dest in func.dfg.insts[pred.inst].branch_destination_mut(jump_tables) {
            if dest.block(pool) == block {
                dest.remove(param_idx, pool);
            }
        }
    }
    func.dfg.remove_block_param(block, param_idx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{types, InstBuilder};

    #[test]
    fn same_type_bitcast_collapses() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let a = cur.ins().iconst(types::I64, 7);
            let b = cur.ins().bitcast(types::I64, a);
            cur.ins().return_(&[b]);
        }
        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);
        do_copy_propagation(&mut func, &cfg, &domtree);

        let names: Vec<String> = func
            .layout
            .block_insts(block0)
            .map(|i| func.dfg.insts[i].opcode().to_string())
            .collect();
        assert_eq!(names, ["iconst", "return"]);
    }

    #[test]
    fn constant_block_param_collapses() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let param = func.dfg.append_block_param(block1, types::I32);
        let c;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            c = cur.ins().iconst(types::I32, 9);
            cur.ins().jump(block1, &[c]);
            cur.insert_block(block1);
            cur.ins().return_(&[param]);
        }
        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);
        do_copy_propagation(&mut func, &cfg, &domtree);

        assert_eq!(func.dfg.num_block_params(block1), 0);
        // The return now uses the constant directly.
        let ret = func.layout.last_inst(block1).unwrap();
        assert_eq!(func.dfg.inst_args(ret), &[c]);
    }
}
