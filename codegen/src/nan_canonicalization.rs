//! A NaN-canonicalizing rewriting pass.
//!
//! Floating point arithmetic can produce NaNs whose payload bits depend on
//! the hardware. For embedders that need bit-for-bit deterministic results,
//! this pass inserts a compare-and-select after every arithmetic instruction
//! that can generate a NaN, replacing any NaN result with one canonical
//! quiet pattern.

use crate::cursor::{Cursor, FuncCursor};
use crate::ir::condcodes::FloatCC;
use crate::ir::immediates::{Ieee32, Ieee64};
use crate::ir::{types, Function, Inst, InstBuilder, Opcode, Value};
use crate::timing;

// Canonical 32-bit and 64-bit quiet NaN patterns.
const CANON_32BIT_NAN: u32 = 0x7fc0_0000;
const CANON_64BIT_NAN: u64 = 0x7ff8_0000_0000_0000;

/// Performs the NaN-canonicalization pass by identifying floating-point
/// arithmetic operations, and adding instructions to replace their NaN
/// results with a single canonical NaN value.
pub fn do_nan_canonicalization(func: &mut Function) {
    let _tt = timing::nan_canonicalization();
    let mut pos = FuncCursor::new(func);
    while let Some(_block) = pos.next_block() {
        while let Some(inst) = pos.next_inst() {
            if is_fp_arith(&mut pos, inst) {
                add_nan_canon_seq(&mut pos, inst);
            }
        }
    }
}

/// Returns true/false based on whether the instruction is a floating-point
/// arithmetic operation. This ignores operations like `fneg`, `fabs`, or
/// `fcopysign` that only operate on the sign bit of a floating point value.
fn is_fp_arith(pos: &mut FuncCursor, inst: Inst) -> bool {
    matches!(
        pos.func.dfg.insts[inst].opcode(),
        Opcode::Fadd
            | Opcode::Fsub
            | Opcode::Fmul
            | Opcode::Fdiv
            | Opcode::Fmin
            | Opcode::Fmax
            | Opcode::Sqrt
            | Opcode::Fma
            | Opcode::Fpromote
            | Opcode::Fdemote
    )
}

/// Append a sequence of canonicalizing instructions after the given
/// instruction.
fn add_nan_canon_seq(pos: &mut FuncCursor, inst: Inst) {
    // Select the instruction result, result type.
    let val = pos.func.dfg.first_result(inst);
    let val_type = pos.func.dfg.value_type(val);

    // The sequence is inserted after the instruction, and the instruction's
    // old result is rerouted into it, so the sequence's final value takes
    // over the original result's identity.
    let new_res = pos.func.dfg.replace_result(val, val_type);
    pos.goto_after_inst(inst);

    let canon_nan: Value = if val_type == types::F64 {
        pos.ins().f64const(Ieee64::with_bits(CANON_64BIT_NAN))
    } else {
        debug_assert_eq!(val_type, types::F32, "unexpected type for NaN canonicalization");
        pos.ins().f32const(Ieee32::with_bits(CANON_32BIT_NAN))
    };
    let is_nan = pos.ins().fcmp(FloatCC::NotEqual, new_res, new_res);
    let select = pos.ins().select(is_nan, canon_nan, new_res);

    // Reroute the original result's uses to the canonicalized value.
    pos.func.dfg.change_to_alias(val, select);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstructionData;

    #[test]
    fn inserts_canon_sequence_after_fadd() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let a = func.dfg.append_block_param(block0, types::F64);
        let b = func.dfg.append_block_param(block0, types::F64);
        let ret;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let sum = cur.ins().fadd(a, b);
            ret = cur.ins().return_(&[sum]);
        }
        do_nan_canonicalization(&mut func);

        let ops: Vec<Opcode> = func
            .layout
            .block_insts(block0)
            .map(|i| func.dfg.insts[i].opcode())
            .collect();
        assert_eq!(
            ops,
            [
                Opcode::Fadd,
                Opcode::F64const,
                Opcode::Fcmp,
                Opcode::Select,
                Opcode::Return
            ]
        );

        // The returned value resolves to the select.
        let returned = func.dfg.resolve_aliases(func.dfg.inst_args(ret)[0]);
        let def = func.dfg.value_def(returned).unwrap_inst();
        assert!(matches!(
            func.dfg.insts[def],
            InstructionData::Ternary {
                opcode: Opcode::Select,
                ..
            }
        ));
    }
}
