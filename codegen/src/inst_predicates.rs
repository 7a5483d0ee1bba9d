//! Instruction predicates/properties used by analyses and passes.

use crate::entity::EntityRef;
use crate::ir::immediates::Offset32;
use crate::ir::{Block, Function, Inst, InstructionData, Opcode, Type, Value};

/// Preserve instructions with used result values.
pub fn any_inst_results_used(inst: Inst, live: &[bool], func: &Function) -> bool {
    func.dfg
        .inst_results(inst)
        .iter()
        .any(|v| live[v.index()])
}

/// Test whether the given opcode is unsafe to even consider as side-effect-
/// free.
pub fn trivially_has_side_effects(opcode: Opcode) -> bool {
    opcode.is_call()
        || opcode.is_branch()
        || opcode.is_terminator()
        || opcode.is_return()
        || opcode.can_trap()
        || opcode.other_side_effects()
        || opcode.can_store()
}

/// Does the given instruction have any side-effect that would preclude it
/// from being removed when its value is unused?
pub fn has_side_effect(func: &Function, inst: Inst) -> bool {
    let opcode = func.dfg.insts[inst].opcode();
    if trivially_has_side_effects(opcode) {
        return true;
    }
    // A load may trap unless its flags promise otherwise.
    if opcode.can_load() {
        return !func.dfg.insts[inst]
            .memflags()
            .map_or(false, |flags| flags.notrap())
            && opcode != Opcode::StackLoad
            && opcode != Opcode::StackAddr;
    }
    false
}

/// Does the given instruction behave as a memory fence for the purposes of
/// alias analysis? Calls and atomics clobber every tracked region.
pub fn has_memory_fence_semantics(opcode: Opcode) -> bool {
    match opcode {
        Opcode::AtomicRmw | Opcode::AtomicCas | Opcode::AtomicLoad | Opcode::AtomicStore => true,
        Opcode::Fence | Opcode::Debugtrap => true,
        op if op.is_call() => true,
        _ => false,
    }
}

/// If `inst` is a load or store to a plain address, return its
/// `(address, offset, access type)` triple. Stack and atomic accesses
/// return `None`; they are handled by their own paths.
pub fn inst_addr_offset_type(func: &Function, inst: Inst) -> Option<(Value, Offset32, Type)> {
    match &func.dfg.insts[inst] {
        InstructionData::Load { arg, offset, .. } => {
            let ty = loaded_memory_type(func, inst)?;
            Some((*arg, *offset, ty))
        }
        InstructionData::Store { args, offset, .. } => {
            let ty = func.dfg.value_type(args[0]);
            let ty = narrowed_store_type(func.dfg.insts[inst].opcode(), ty);
            Some((args[1], *offset, ty))
        }
        _ => None,
    }
}

/// The type actually read from memory by a load, accounting for extending
/// loads.
fn loaded_memory_type(func: &Function, inst: Inst) -> Option<Type> {
    use crate::ir::types::*;
    let result_ty = func.dfg.value_type(func.dfg.first_result(inst));
    Some(match func.dfg.insts[inst].opcode() {
        Opcode::Load => result_ty,
        Opcode::Uload8 | Opcode::Sload8 => I8,
        Opcode::Uload16 | Opcode::Sload16 => I16,
        Opcode::Uload32 | Opcode::Sload32 => I32,
        _ => return None,
    })
}

/// The type actually written by a (possibly narrowing) store.
fn narrowed_store_type(opcode: Opcode, data_ty: Type) -> Type {
    use crate::ir::types::*;
    match opcode {
        Opcode::Istore8 => I8,
        Opcode::Istore16 => I16,
        Opcode::Istore32 => I32,
        _ => data_ty,
    }
}

/// If `inst` is a store, return the stored value.
pub fn inst_store_data(func: &Function, inst: Inst) -> Option<Value> {
    match &func.dfg.insts[inst] {
        InstructionData::Store { args, .. } => Some(args[0]),
        _ => None,
    }
}

/// Visit all successors of a block with a given visitor closure.
pub fn visit_block_succs<F: FnMut(Inst, Block)>(f: &Function, block: Block, mut visit: F) {
    if let Some(inst) = f.layout.last_inst(block) {
        for dest in f.dfg.insts[inst].branch_destination(&f.dfg.jump_tables) {
            visit(inst, dest.block(&f.dfg.value_lists));
        }
    }
}
