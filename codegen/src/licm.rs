//! A Loop Invariant Code Motion optimization pass.
//!
//! Instructions computing the same value on every iteration of a loop move
//! to the loop's preheader, a block that runs exactly once before the loop
//! is entered. Side-effect-free instructions whose operands are all defined
//! outside the loop (or already hoisted) qualify; loads additionally need a
//! non-trapping access whose memory region no instruction in the loop can
//! write.

use crate::cursor::{Cursor, FuncCursor};
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::fx::FxHashSet;
use crate::inst_predicates::trivially_has_side_effects;
use crate::ir::{AliasRegion, Block, Function, Inst, InstBuilder, Opcode, Value};
use crate::loop_analysis::{Loop, LoopAnalysis};
use crate::timing;

/// Performs the LICM transformation on `func`.
pub fn do_licm(
    func: &mut Function,
    cfg: &mut ControlFlowGraph,
    domtree: &mut DominatorTree,
    loop_analysis: &mut LoopAnalysis,
) {
    let _tt = timing::licm();
    debug_assert!(cfg.is_valid());
    debug_assert!(domtree.is_valid());
    debug_assert!(loop_analysis.is_valid());

    let mut cfg_changed = false;
    for lp in loop_analysis.loops() {
        // Find or create the preheader; created preheaders change the CFG,
        // which is recomputed before it is consulted again.
        let preheader = match find_pre_header(func, cfg, domtree, loop_analysis, lp) {
            Some(block) => block,
            None => {
                cfg_changed = true;
                let block = create_pre_header(func, cfg, loop_analysis, lp);
                cfg.compute(func);
                block
            }
        };

        let summary = LoopMemorySummary::compute(func, loop_analysis, lp);

        // Hoist to a fixedpoint: moving one instruction out can make the
        // ones consuming it invariant too.
        let mut changed = true;
        while changed {
            changed = false;
            let loop_blocks: Vec<Block> = func
                .layout
                .blocks()
                .filter(|&b| loop_analysis.is_in_loop(b, lp))
                .collect();
            for block in loop_blocks {
                let mut pos = FuncCursor::new(func).at_top(block);
                while let Some(inst) = pos.next_inst() {
                    if is_loop_invariant(pos.func, loop_analysis, lp, inst)
                        && is_hoistable(pos.func, inst, &summary)
                    {
                        trace!(
                            "licm: hoisting {} to {preheader}",
                            pos.func.dfg.display_inst(inst)
                        );
                        pos.remove_inst_and_step_back();
                        let terminator = pos
                            .func
                            .layout
                            .last_inst(preheader)
                            .expect("preheader must have its jump");
                        pos.func.layout.insert_inst(inst, terminator);
                        changed = true;
                    }
                }
            }
        }
    }

    if cfg_changed {
        domtree.compute(func, cfg);
        loop_analysis.compute(func, cfg, domtree);
    }
}

/// Which memory regions can instructions inside the loop write?
struct LoopMemorySummary {
    clobbered: FxHashSet<AliasRegion>,
    clobbers_all: bool,
}

impl LoopMemorySummary {
    fn compute(func: &Function, loop_analysis: &LoopAnalysis, lp: Loop) -> Self {
        let mut summary = Self {
            clobbered: FxHashSet::default(),
            clobbers_all: false,
        };
        for block in func
            .layout
            .blocks()
            .filter(|&b| loop_analysis.is_in_loop(b, lp))
        {
            for inst in func.layout.block_insts(block) {
                let opcode = func.dfg.insts[inst].opcode();
                if opcode.is_call()
                    || opcode == Opcode::Fence
                    || opcode == Opcode::AtomicRmw
                    || opcode == Opcode::AtomicCas
                    || opcode == Opcode::AtomicStore
                {
                    summary.clobbers_all = true;
                    return summary;
                }
                if opcode.can_store() {
                    match func.dfg.insts[inst].memflags() {
                        Some(flags) => {
                            summary.clobbered.insert(flags.alias_region());
                        }
                        // Stack stores have no flags; they write the stack.
                        None => {
                            summary.clobbered.insert(AliasRegion::Stack);
                        }
                    }
                }
            }
        }
        summary
    }

    fn may_clobber(&self, region: AliasRegion) -> bool {
        self.clobbers_all
            || self.clobbered.contains(&region)
            || (region == AliasRegion::Unknown && !self.clobbered.is_empty())
    }
}

/// An instruction is movable when executing it once before the loop is
/// observationally the same as executing it on every iteration.
fn is_hoistable(func: &Function, inst: Inst, summary: &LoopMemorySummary) -> bool {
    let opcode = func.dfg.insts[inst].opcode();
    if trivially_has_side_effects(opcode) {
        return false;
    }
    if opcode.can_load() {
        // Only provably non-trapping plain loads move, and only when the
        // loop leaves their region alone.
        if opcode == Opcode::StackLoad || opcode == Opcode::AtomicLoad {
            return false;
        }
        let flags = match func.dfg.insts[inst].memflags() {
            Some(flags) => flags,
            None => return false,
        };
        return flags.notrap() && !summary.may_clobber(flags.alias_region());
    }
    true
}

/// Is every operand of `inst` defined outside the loop?
fn is_loop_invariant(func: &Function, loop_analysis: &LoopAnalysis, lp: Loop, inst: Inst) -> bool {
    let defined_in_loop = |value: Value| -> bool {
        let value = func.dfg.resolve_aliases(value);
        match func.dfg.value_def(value) {
            crate::ir::ValueDef::Result(def_inst, _) => func
                .layout
                .inst_block(def_inst)
                .is_some_and(|b| loop_analysis.is_in_loop(b, lp)),
            crate::ir::ValueDef::Param(block, _) => loop_analysis.is_in_loop(block, lp),
        }
    };
    !func.dfg.inst_args(inst).iter().any(|&arg| defined_in_loop(arg))
}

/// Test whether the given loop's header already has a usable preheader: a
/// dominating predecessor outside the loop whose terminator is a plain jump
/// and whose only successor is the header.
fn find_pre_header(
    func: &Function,
    cfg: &ControlFlowGraph,
    domtree: &DominatorTree,
    loop_analysis: &LoopAnalysis,
    lp: Loop,
) -> Option<Block> {
    let header = loop_analysis.loop_header(lp);
    let mut outside_preds = cfg
        .pred_iter(header)
        .filter(|pred| !loop_analysis.is_in_loop(pred.block, lp));
    let candidate = outside_preds.next()?;
    if outside_preds.next().is_some() {
        return None;
    }
    let data = &func.dfg.insts[candidate.inst];
    let is_plain_jump = data.opcode() == Opcode::Jump;
    if is_plain_jump
        && domtree.dominates(candidate.block, header, &func.layout)
        && cfg.succ_iter(candidate.block).len() == 1
    {
        Some(candidate.block)
    } else {
        None
    }
}

/// Insert a preheader before the loop header and rewrite every out-of-loop
/// predecessor to enter through it. The preheader receives parameters
/// mirroring the header's and forwards them.
fn create_pre_header(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    loop_analysis: &LoopAnalysis,
    lp: Loop,
) -> Block {
    let header = loop_analysis.loop_header(lp);
    let pre_header = func.dfg.make_block();

    let mut pre_header_params = Vec::new();
    for ty in func.dfg.block_param_types(header) {
        pre_header_params.push(func.dfg.append_block_param(pre_header, ty));
    }

    // Retarget out-of-loop predecessors.
    let preds: Vec<_> = cfg
        .pred_iter(header)
        .filter(|pred| !loop_analysis.is_in_loop(pred.block, lp))
        .collect();
    for pred in preds {
        let pool = &mut func.dfg.value_lists;
        let jump_tables = &mut func.dfg.jump_tables;
        for dest in func.dfg.insts[pred.inst].branch_destination_mut(jump_tables) {
            if dest.block(pool) == header {
                dest.set_block(pre_header, pool);
            }
        }
    }

    // Lay the preheader out right before the header and fill it with the
    // forwarding jump.
    func.layout.insert_block(pre_header, header);
    let mut pos = FuncCursor::new(func).at_bottom(pre_header);
    pos.ins().jump(header, &pre_header_params);

    trace!("licm: created {pre_header} for loop at {header}");
    pre_header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{types, MemFlags};

    #[test]
    fn hoists_invariant_computation() {
        let mut sig = crate::ir::Signature::new(crate::isa::CallConv::SystemV);
        sig.params.push(crate::ir::AbiParam::new(types::I32));
        sig.returns.push(crate::ir::AbiParam::new(types::I32));
        let mut func = Function::with_name_signature(Default::default(), sig);
        let entry = func.dfg.make_block();
        let header = func.dfg.make_block();
        let exit = func.dfg.make_block();
        let n = func.dfg.append_block_param(entry, types::I32);
        let i = func.dfg.append_block_param(header, types::I32);
        let res = func.dfg.append_block_param(exit, types::I32);

        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(entry);
            cur.ins().jump(header, &[n]);

            cur.insert_block(header);
            // Invariant: n * n. Variant: i - 1.
            let sq = cur.ins().imul(n, n);
            let one = cur.ins().iconst(types::I32, 1);
            let next = cur.ins().isub(i, one);
            let done = cur.ins().icmp_imm(crate::ir::condcodes::IntCC::Equal, next, 0);
            cur.ins().brif(done, exit, &[sq], header, &[next]);

            cur.insert_block(exit);
            cur.ins().return_(&[res]);
        }

        let mut cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::with_function(&func, &cfg);
        let mut loops = LoopAnalysis::new();
        loops.compute(&func, &cfg, &domtree);
        do_licm(&mut func, &mut cfg, &mut domtree, &mut loops);

        // The multiply and the constant moved out of the loop body.
        let header_ops: Vec<Opcode> = func
            .layout
            .block_insts(header)
            .map(|i| func.dfg.insts[i].opcode())
            .collect();
        assert!(!header_ops.contains(&Opcode::Imul));
        assert!(!header_ops.contains(&Opcode::Iconst));

        // They landed in a block that jumps straight to the header.
        let pre = func.layout.prev_block(header).unwrap();
        let pre_ops: Vec<Opcode> = func
            .layout
            .block_insts(pre)
            .map(|i| func.dfg.insts[i].opcode())
            .collect();
        assert!(pre_ops.contains(&Opcode::Imul));
        assert!(pre_ops.ends_with(&[Opcode::Jump]));

        assert!(crate::verifier::verify_function(
            &func,
            &crate::settings::Flags::new(crate::settings::builder())
        )
        .is_ok());
    }

    #[test]
    fn loads_stay_when_loop_stores_to_same_region() {
        let mut func = Function::new();
        let entry = func.dfg.make_block();
        let header = func.dfg.make_block();
        let exit = func.dfg.make_block();
        let p = func.dfg.append_block_param(entry, types::I64);
        let i = func.dfg.append_block_param(header, types::I32);

        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(entry);
            let zero = cur.ins().iconst(types::I32, 0);
            cur.ins().jump(header, &[zero]);

            cur.insert_block(header);
            let flags = MemFlags::new()
                .with_notrap()
                .with_alias_region(AliasRegion::Heap);
            let x = cur.ins().load(types::I32, flags, p, 0);
            let sum = cur.ins().iadd(x, i);
            cur.ins().store(flags, sum, p, 0);
            let done = cur
                .ins()
                .icmp_imm(crate::ir::condcodes::IntCC::Equal, sum, 100);
            cur.ins().brif(done, exit, &[], header, &[sum]);

            cur.insert_block(exit);
            cur.ins().return_(&[]);
        }

        let mut cfg = ControlFlowGraph::with_function(&func);
        let mut domtree = DominatorTree::with_function(&func, &cfg);
        let mut loops = LoopAnalysis::new();
        loops.compute(&func, &cfg, &domtree);
        do_licm(&mut func, &mut cfg, &mut domtree, &mut loops);

        let header_ops: Vec<Opcode> = func
            .layout
            .block_insts(header)
            .map(|i| func.dfg.insts[i].opcode())
            .collect();
        assert!(header_ops.contains(&Opcode::Load));
    }
}
