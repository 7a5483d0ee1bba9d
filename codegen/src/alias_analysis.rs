//! Alias analysis: a "last store" pass and a "memory values" pass, fused.
//!
//! Memory is partitioned into disjoint regions (`stack`, `heap`, `global`,
//! `unknown`); every load and store is labeled with its region in the
//! `MemFlags`, and accessing one location under two different regions is
//! forbidden by construction.
//!
//! The last-store pass tracks, per program point and region, the most recent
//! instruction that might have written the region. Memory fences (calls,
//! atomics, explicit fences) clobber every region. At control-flow joins the
//! per-region slots meet: equal values survive, unequal ones are replaced by
//! the join point itself as a conservative new "version".
//!
//! Given the last store, a table keyed by `(last store, address, offset,
//! type, extending opcode)` maps memory locations to SSA values: stores
//! insert the stored data, loads insert their result. A load that hits the
//! table with a dominating definition is redundant; its result becomes an
//! alias of the known value. This covers both redundant load elimination and
//! store-to-load forwarding.

use crate::cursor::{Cursor, FuncCursor};
use crate::dominator_tree::DominatorTree;
use crate::fx::{FxHashMap, FxHashSet};
use crate::inst_predicates::{
    has_memory_fence_semantics, inst_addr_offset_type, inst_store_data, visit_block_succs,
};
use crate::entity::packed_option::PackedOption;
use crate::ir::immediates::Offset32;
use crate::ir::{AliasRegion, Block, Function, Inst, Opcode, Type, Value};
use crate::timing;

/// For a given program point, the vector of last-store instruction indices
/// for each disjoint region of abstract state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct LastStores {
    stack: PackedOption<Inst>,
    heap: PackedOption<Inst>,
    global: PackedOption<Inst>,
    unknown: PackedOption<Inst>,
}

impl LastStores {
    fn slot(&mut self, region: AliasRegion) -> &mut PackedOption<Inst> {
        match region {
            AliasRegion::Stack => &mut self.stack,
            AliasRegion::Heap => &mut self.heap,
            AliasRegion::Global => &mut self.global,
            AliasRegion::Unknown => &mut self.unknown,
        }
    }

    fn update(&mut self, func: &Function, inst: Inst) {
        let opcode = func.dfg.insts[inst].opcode();
        if has_memory_fence_semantics(opcode) {
            self.stack = inst.into();
            self.heap = inst.into();
            self.global = inst.into();
            self.unknown = inst.into();
        } else if opcode.can_store() {
            match func.dfg.insts[inst].memflags() {
                Some(flags) => *self.slot(flags.alias_region()) = inst.into(),
                // A store without flags (stack_store) writes the stack.
                None => self.stack = inst.into(),
            }
        }
    }

    fn get_last_store(&self, func: &Function, inst: Inst) -> PackedOption<Inst> {
        match func.dfg.insts[inst].memflags() {
            Some(flags) => match flags.alias_region() {
                AliasRegion::Stack => self.stack,
                AliasRegion::Heap => self.heap,
                AliasRegion::Global => self.global,
                AliasRegion::Unknown => self.unknown,
            },
            None => PackedOption::default(),
        }
    }

    fn meet_from(&mut self, other: &LastStores, loc: Inst) {
        let meet = |a: PackedOption<Inst>, b: PackedOption<Inst>| -> PackedOption<Inst> {
            match (a.expand(), b.expand()) {
                (None, None) => None.into(),
                (Some(a), None) => a.into(),
                (None, Some(b)) => b.into(),
                (Some(a), Some(b)) if a == b => a.into(),
                _ => loc.into(),
            }
        };
        self.stack = meet(self.stack, other.stack);
        self.heap = meet(self.heap, other.heap);
        self.global = meet(self.global, other.global);
        self.unknown = meet(self.unknown, other.unknown);
    }
}

/// A key identifying a unique memory location.
///
/// For a load result to equal a previously observed value we need: the same
/// memory version (same last store to the region), the same address SSA
/// value and offset, the same accessed type, and the same extension
/// behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct MemoryLoc {
    last_store: PackedOption<Inst>,
    address: Value,
    offset: Offset32,
    ty: Type,
    /// The opcode when it is an extending load; plain loads and stores
    /// record `None` so they interchange freely.
    extending_opcode: Option<Opcode>,
}

fn get_ext_opcode(op: Opcode) -> Option<Opcode> {
    debug_assert!(op.can_load() || op.can_store());
    match op {
        Opcode::Load | Opcode::Store => None,
        _ => Some(op),
    }
}

/// An alias-analysis pass.
pub struct AliasAnalysis<'a> {
    domtree: &'a DominatorTree,

    /// Input state to a basic block.
    block_input: FxHashMap<Block, LastStores>,

    /// Known memory-value equivalences: from `(last store, address,
    /// offset, type)` to a defining instruction and its value.
    mem_values: FxHashMap<MemoryLoc, (Inst, Value)>,
}

impl<'a> AliasAnalysis<'a> {
    /// Perform an alias analysis pass.
    pub fn new(func: &Function, domtree: &'a DominatorTree) -> Self {
        let _tt = timing::alias_analysis();
        let mut analysis = Self {
            domtree,
            block_input: FxHashMap::default(),
            mem_values: FxHashMap::default(),
        };
        analysis.compute_block_input_states(func);
        analysis
    }

    fn compute_block_input_states(&mut self, func: &Function) {
        let entry = match func.layout.entry_block() {
            Some(entry) => entry,
            None => return,
        };
        let mut queue = vec![entry];
        let mut queue_set = FxHashSet::default();
        queue_set.insert(entry);

        while let Some(block) = queue.pop() {
            queue_set.remove(&block);
            let mut state = self
                .block_input
                .entry(block)
                .or_insert_with(LastStores::default)
                .clone();

            for inst in func.layout.block_insts(block) {
                state.update(func, inst);
            }

            visit_block_succs(func, block, |_inst, succ| {
                let succ_first_inst = match func.layout.first_inst(succ) {
                    Some(inst) => inst,
                    None => return,
                };
                let updated = match self.block_input.get_mut(&succ) {
                    Some(succ_state) => {
                        let old = *succ_state;
                        succ_state.meet_from(&state, succ_first_inst);
                        *succ_state != old
                    }
                    None => {
                        self.block_input.insert(succ, state);
                        true
                    }
                };
                if updated && queue_set.insert(succ) {
                    queue.push(succ);
                }
            });
        }
    }

    /// Make a pass and update known-redundant loads to aliased values. The
    /// updates interleave with the location tracking because resolving one
    /// alias may expose another.
    pub fn compute_and_update_aliases(&mut self, func: &mut Function) {
        let mut pos = FuncCursor::new(func);

        while let Some(block) = pos.next_block() {
            let mut state = self
                .block_input
                .get(&block)
                .copied()
                .unwrap_or_default();

            while let Some(inst) = pos.next_inst() {
                if let Some((address, offset, ty)) = inst_addr_offset_type(pos.func, inst) {
                    let address = pos.func.dfg.resolve_aliases(address);
                    let opcode = pos.func.dfg.insts[inst].opcode();

                    if opcode.can_store() {
                        let store_data = inst_store_data(pos.func, inst).unwrap();
                        let store_data = pos.func.dfg.resolve_aliases(store_data);
                        let mem_loc = MemoryLoc {
                            last_store: inst.into(),
                            address,
                            offset,
                            ty,
                            extending_opcode: get_ext_opcode(opcode),
                        };
                        self.mem_values.insert(mem_loc, (inst, store_data));
                    } else if opcode.can_load() {
                        let last_store = state.get_last_store(pos.func, inst);
                        let load_result = pos.func.dfg.first_result(inst);
                        let mem_loc = MemoryLoc {
                            last_store,
                            address,
                            offset,
                            ty,
                            extending_opcode: get_ext_opcode(opcode),
                        };

                        // A known value for this location replaces the load,
                        // as long as its definition dominates us: a value
                        // recorded from a load on a sibling path does not.
                        let aliased = if let Some((def_inst, value)) =
                            self.mem_values.get(&mem_loc).copied()
                        {
                            if self.domtree.dominates(def_inst, inst, &pos.func.layout) {
                                trace!(
                                    "alias analysis: forwarding {value} to the result of {inst}"
                                );
                                pos.func.dfg.detach_results(inst);
                                pos.func.dfg.change_to_alias(load_result, value);
                                pos.remove_inst_and_step_back();
                                true
                            } else {
                                false
                            }
                        } else {
                            false
                        };

                        // Otherwise this load defines the location.
                        if !aliased {
                            self.mem_values.insert(mem_loc, (inst, load_result));
                        }
                    }
                }

                state.update(pos.func, inst);
            }
        }

        func.dfg.resolve_all_aliases();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::{types, InstBuilder, MemFlags};

    #[test]
    fn forwards_store_to_load() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let p = func.dfg.append_block_param(block0, types::I64);
        let v = func.dfg.append_block_param(block0, types::I32);
        let ret;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let flags = MemFlags::new().with_alias_region(AliasRegion::Heap);
            cur.ins().store(flags, v, p, 0);
            let x = cur.ins().load(types::I32, flags, p, 0);
            ret = cur.ins().return_(&[x]);
        }
        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);
        let mut aa = AliasAnalysis::new(&func, &domtree);
        aa.compute_and_update_aliases(&mut func);

        // The load is gone; the return uses the stored value directly.
        assert_eq!(func.dfg.inst_args(ret), &[v]);
        let loads = func
            .layout
            .block_insts(block0)
            .filter(|&i| func.dfg.insts[i].opcode() == Opcode::Load)
            .count();
        assert_eq!(loads, 0);
    }

    #[test]
    fn store_to_other_region_does_not_block() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let p = func.dfg.append_block_param(block0, types::I64);
        let q = func.dfg.append_block_param(block0, types::I64);
        let v = func.dfg.append_block_param(block0, types::I32);
        let ret;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let heap = MemFlags::new().with_alias_region(AliasRegion::Heap);
            let global = MemFlags::new().with_alias_region(AliasRegion::Global);
            let x = cur.ins().load(types::I32, heap, p, 0);
            // A store to a different region cannot invalidate the heap.
            cur.ins().store(global, v, q, 0);
            let y = cur.ins().load(types::I32, heap, p, 0);
            ret = cur.ins().return_(&[x, y]);
        }
        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);
        let mut aa = AliasAnalysis::new(&func, &domtree);
        aa.compute_and_update_aliases(&mut func);

        let args = func.dfg.inst_args(ret);
        assert_eq!(args[0], args[1]);
    }

    #[test]
    fn call_clobbers_everything() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let p = func.dfg.append_block_param(block0, types::I64);

        let sig = func
            .dfg
            .signatures
            .push(crate::ir::Signature::new(crate::isa::CallConv::SystemV));
        let callee = func.dfg.ext_funcs.push(crate::ir::ExtFuncData {
            name: crate::ir::ExternalName::testcase("clobber"),
            signature: sig,
            colocated: true,
        });

        let ret;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let flags = MemFlags::new().with_alias_region(AliasRegion::Heap);
            let x = cur.ins().load(types::I32, flags, p, 0);
            cur.ins().call(callee, &[]);
            let y = cur.ins().load(types::I32, flags, p, 0);
            ret = cur.ins().return_(&[x, y]);
        }
        let cfg = ControlFlowGraph::with_function(&func);
        let domtree = DominatorTree::with_function(&func, &cfg);
        let mut aa = AliasAnalysis::new(&func, &domtree);
        aa.compute_and_update_aliases(&mut func);

        // The second load stays: the call may have changed memory.
        let args = func.dfg.inst_args(ret);
        assert_ne!(args[0], args[1]);
    }
}
