//! Peephole rewrites that run before lowering: algebraic identities,
//! strength reduction, division-by-constant magic, and local branch
//! simplification.
//!
//! Each rewrite is local to one instruction and its constant operands. The
//! pass makes one forward sweep; the pipeline driver re-runs it together
//! with the other cheap cleanup passes until nothing changes when the
//! optimization level asks for it.

use crate::cursor::{Cursor, FuncCursor};
use crate::divconst_magic_numbers::{magic_s32, magic_s64, magic_u32, magic_u64};
use crate::ir::condcodes::IntCC;
use crate::ir::immediates::Imm64;
use crate::ir::{
    Function, Inst, InstBuilder, InstructionData, Opcode, Type, Value, types,
};
use crate::timing;

/// Apply basic simplifications, returning whether anything changed.
pub fn do_preopt(func: &mut Function) -> bool {
    let _tt = timing::preopt();
    let mut changed = false;
    let mut pos = FuncCursor::new(func);
    while let Some(_block) = pos.next_block() {
        while let Some(inst) = pos.next_inst() {
            pos.func.dfg.resolve_aliases_in_arguments(inst);
            changed |= simplify(&mut pos, inst);
        }
    }
    changed
}

/// If `value` is defined by an integer constant, return it (sign-extended).
fn iconst_value(func: &Function, value: Value) -> Option<i64> {
    let value = func.dfg.resolve_aliases(value);
    let inst = func.dfg.value_def(value).inst()?;
    match func.dfg.insts[inst] {
        InstructionData::UnaryImm {
            opcode: Opcode::Iconst,
            imm,
        } => Some(imm.bits()),
        _ => None,
    }
}

/// Replace `inst` (single result) with an alias to `value` and remove it.
fn replace_with_value(pos: &mut FuncCursor, inst: Inst, value: Value) {
    debug_assert_eq!(pos.func.dfg.inst_results(inst).len(), 1);
    let result = pos.func.dfg.first_result(inst);
    pos.func.dfg.detach_results(inst);
    pos.func.dfg.change_to_alias(result, value);
    pos.remove_inst_and_step_back();
}

fn simplify(pos: &mut FuncCursor, inst: Inst) -> bool {
    match pos.func.dfg.insts[inst] {
        InstructionData::Binary { opcode, args } => simplify_binary(pos, inst, opcode, args),
        InstructionData::Unary {
            opcode: Opcode::Bnot,
            arg,
        } => simplify_double_bnot(pos, inst, arg),
        InstructionData::Brif { arg, blocks, opcode: _ } => simplify_brif(pos, inst, arg, blocks),
        _ => false,
    }
}

/// `bnot(bnot(x))` is `x`.
fn simplify_double_bnot(pos: &mut FuncCursor, inst: Inst, arg: Value) -> bool {
    let arg = pos.func.dfg.resolve_aliases(arg);
    if let Some(def) = pos.func.dfg.value_def(arg).inst() {
        if let InstructionData::Unary {
            opcode: Opcode::Bnot,
            arg: inner,
        } = pos.func.dfg.insts[def]
        {
            let inner = pos.func.dfg.resolve_aliases(inner);
            replace_with_value(pos, inst, inner);
            return true;
        }
    }
    false
}

fn simplify_binary(pos: &mut FuncCursor, inst: Inst, opcode: Opcode, args: [Value; 2]) -> bool {
    let dfg = &pos.func.dfg;
    let ty = dfg.value_type(dfg.first_result(inst));
    if !ty.is_int() || ty.bits() > 64 {
        return false;
    }
    let x = dfg.resolve_aliases(args[0]);
    let y = dfg.resolve_aliases(args[1]);
    let yc = iconst_value(pos.func, y);

    match opcode {
        Opcode::Iadd | Opcode::Isub | Opcode::Bor | Opcode::Bxor | Opcode::Ishl
        | Opcode::Ushr | Opcode::Sshr | Opcode::Rotl | Opcode::Rotr => {
            // x op 0 == x for all of these.
            if yc == Some(0) {
                replace_with_value(pos, inst, x);
                return true;
            }
        }
        _ => {}
    }

    match opcode {
        Opcode::Isub | Opcode::Bxor if x == y => {
            // x - x == 0, x ^ x == 0.
            let zero = pos.ins().iconst(ty, 0i64);
            replace_with_value(pos, inst, zero);
            true
        }
        Opcode::Band | Opcode::Bor if x == y => {
            replace_with_value(pos, inst, x);
            true
        }
        Opcode::Band if yc == Some(0) => {
            let zero = pos.ins().iconst(ty, 0i64);
            replace_with_value(pos, inst, zero);
            true
        }
        Opcode::Band if yc.map(|c| mask(c, ty)) == Some(mask(-1, ty)) => {
            replace_with_value(pos, inst, x);
            true
        }
        Opcode::Imul => match yc.map(|c| mask(c, ty)) {
            Some(0) => {
                let zero = pos.ins().iconst(ty, 0i64);
                replace_with_value(pos, inst, zero);
                true
            }
            Some(1) => {
                replace_with_value(pos, inst, x);
                true
            }
            Some(c) if c.is_power_of_two() => {
                // x * 2^k == x << k.
                let k = pos.ins().iconst(ty, c.trailing_zeros() as i64);
                pos.func.dfg.replace(inst).ishl(x, k);
                true
            }
            _ => false,
        },
        Opcode::Udiv => match yc.map(|c| mask(c, ty)) {
            Some(1) => {
                replace_with_value(pos, inst, x);
                true
            }
            Some(c) if c.is_power_of_two() => {
                let k = pos.ins().iconst(ty, c.trailing_zeros() as i64);
                pos.func.dfg.replace(inst).ushr(x, k);
                true
            }
            Some(c) if c != 0 && (ty == types::I32 || ty == types::I64) => {
                expand_udiv_magic(pos, inst, ty, x, c);
                true
            }
            _ => false,
        },
        Opcode::Urem => match yc.map(|c| mask(c, ty)) {
            Some(1) => {
                let zero = pos.ins().iconst(ty, 0i64);
                replace_with_value(pos, inst, zero);
                true
            }
            Some(c) if c.is_power_of_two() => {
                // x % 2^k == x & (2^k - 1).
                let m = pos.ins().iconst(ty, (c - 1) as i64);
                pos.func.dfg.replace(inst).band(x, m);
                true
            }
            Some(c) if c != 0 && (ty == types::I32 || ty == types::I64) => {
                // r = x - (x / c) * c, with the division expanded by magic.
                let div = pos.ins().udiv(x, y);
                let prod = pos.ins().imul(div, y);
                pos.func.dfg.replace(inst).isub(x, prod);
                // Now expand the fresh division in place.
                let div_inst = pos.func.dfg.value_def(div).unwrap_inst();
                let saved = pos.position();
                pos.goto_inst(div_inst);
                expand_udiv_magic(pos, div_inst, ty, x, c);
                pos.set_position(saved);
                true
            }
            _ => false,
        },
        Opcode::Sdiv => match yc {
            Some(1) => {
                replace_with_value(pos, inst, x);
                true
            }
            Some(c) if c > 1 && (c as u64).is_power_of_two() => {
                expand_sdiv_pow2(pos, inst, ty, x, (c as u64).trailing_zeros());
                true
            }
            Some(c)
                if c != 0 && c != -1 && c != 1 && (ty == types::I32 || ty == types::I64) =>
            {
                expand_sdiv_magic(pos, inst, ty, x, c);
                true
            }
            _ => false,
        },
        Opcode::Srem => match yc {
            Some(1) | Some(-1) => {
                let zero = pos.ins().iconst(ty, 0i64);
                replace_with_value(pos, inst, zero);
                true
            }
            Some(c) if c > 1 && (c as u64).is_power_of_two() => {
                // r = x - (x / 2^k << k), with a bias so the quotient rounds
                // toward zero.
                let k = (c as u64).trailing_zeros();
                let div = pos.ins().sdiv(x, y);
                let kval = pos.ins().iconst(ty, k as i64);
                let back = pos.ins().ishl(div, kval);
                pos.func.dfg.replace(inst).isub(x, back);
                let div_inst = pos.func.dfg.value_def(div).unwrap_inst();
                let saved = pos.position();
                pos.goto_inst(div_inst);
                expand_sdiv_pow2(pos, div_inst, ty, x, k);
                pos.set_position(saved);
                true
            }
            Some(c)
                if c != 0 && c != -1 && c != 1 && (ty == types::I32 || ty == types::I64) =>
            {
                let div = pos.ins().sdiv(x, y);
                let prod = pos.ins().imul(div, y);
                pos.func.dfg.replace(inst).isub(x, prod);
                let div_inst = pos.func.dfg.value_def(div).unwrap_inst();
                let saved = pos.position();
                pos.goto_inst(div_inst);
                expand_sdiv_magic(pos, div_inst, ty, x, c);
                pos.set_position(saved);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn mask(c: i64, ty: Type) -> u64 {
    let bits = ty.bits().min(64);
    if bits >= 64 {
        c as u64
    } else {
        (c as u64) & ((1 << bits) - 1)
    }
}

/// Unsigned division by a non-power-of-2 constant: multiply by the magic
/// number and shift, with the add fixup when the multiplier lost a bit.
fn expand_udiv_magic(pos: &mut FuncCursor, inst: Inst, ty: Type, x: Value, d: u64) {
    if ty == types::I32 {
        let m = magic_u32(d as u32);
        let mul = pos.ins().iconst(ty, m.mul_by as i64);
        let hi = pos.ins().umulhi(x, mul);
        if m.do_add {
            let diff = pos.ins().isub(x, hi);
            let one = pos.ins().iconst(ty, 1i64);
            let half = pos.ins().ushr(diff, one);
            let sum = pos.ins().iadd(half, hi);
            let sh = pos.ins().iconst(ty, (m.shift_by - 1) as i64);
            pos.func.dfg.replace(inst).ushr(sum, sh);
        } else {
            let sh = pos.ins().iconst(ty, m.shift_by as i64);
            pos.func.dfg.replace(inst).ushr(hi, sh);
        }
    } else {
        let m = magic_u64(d);
        let mul = pos.ins().iconst(ty, m.mul_by as i64);
        let hi = pos.ins().umulhi(x, mul);
        if m.do_add {
            let diff = pos.ins().isub(x, hi);
            let one = pos.ins().iconst(ty, 1i64);
            let half = pos.ins().ushr(diff, one);
            let sum = pos.ins().iadd(half, hi);
            let sh = pos.ins().iconst(ty, (m.shift_by - 1) as i64);
            pos.func.dfg.replace(inst).ushr(sum, sh);
        } else {
            let sh = pos.ins().iconst(ty, m.shift_by as i64);
            pos.func.dfg.replace(inst).ushr(hi, sh);
        }
    }
}

/// Signed division by 2^k: bias the dividend so the shift rounds toward
/// zero, then shift arithmetically.
fn expand_sdiv_pow2(pos: &mut FuncCursor, inst: Inst, ty: Type, x: Value, k: u32) {
    let bits = ty.bits() as i64;
    let sign_sh = pos.ins().iconst(ty, bits - 1);
    let sign = pos.ins().sshr(x, sign_sh);
    let bias_sh = pos.ins().iconst(ty, bits - k as i64);
    let bias = pos.ins().ushr(sign, bias_sh);
    let biased = pos.ins().iadd(x, bias);
    let kval = pos.ins().iconst(ty, k as i64);
    pos.func.dfg.replace(inst).sshr(biased, kval);
}

/// Signed division by an arbitrary constant through the signed magic
/// multiplier.
fn expand_sdiv_magic(pos: &mut FuncCursor, inst: Inst, ty: Type, x: Value, d: i64) {
    let (mul_by, shift_by) = if ty == types::I32 {
        let m = magic_s32(d as i32);
        (m.mul_by as i64, m.shift_by)
    } else {
        let m = magic_s64(d);
        (m.mul_by, m.shift_by)
    };
    let mul = pos.ins().iconst(ty, mul_by);
    let mut q = pos.ins().smulhi(x, mul);
    // The multiplier's sign forces a corrective add or subtract of the
    // dividend.
    if d > 0 && mul_by < 0 {
        q = pos.ins().iadd(q, x);
    } else if d < 0 && mul_by > 0 {
        q = pos.ins().isub(q, x);
    }
    let sh = pos.ins().iconst(ty, shift_by as i64);
    let shifted = pos.ins().sshr(q, sh);
    // Add one when the intermediate quotient is negative.
    let bits = ty.bits() as i64;
    let sign_sh = pos.ins().iconst(ty, bits - 1);
    let sign = pos.ins().ushr(shifted, sign_sh);
    pos.func.dfg.replace(inst).iadd(shifted, sign);
}

/// Local branch simplifications.
fn simplify_brif(
    pos: &mut FuncCursor,
    inst: Inst,
    arg: Value,
    blocks: [crate::ir::BlockCall; 2],
) -> bool {
    // A constant condition picks its side.
    if let Some(c) = iconst_value(pos.func, arg) {
        let taken = blocks[if c != 0 { 0 } else { 1 }];
        let dest = taken.block(&pos.func.dfg.value_lists);
        let args: Vec<Value> = taken.args_slice(&pos.func.dfg.value_lists).to_vec();
        pos.func.dfg.replace(inst).jump(dest, &args);
        return true;
    }

    // brif(icmp_imm ne x, 0) tests exactly what brif(x) tests; the eq form
    // swaps the destinations.
    let arg = pos.func.dfg.resolve_aliases(arg);
    if let Some(def) = pos.func.dfg.value_def(arg).inst() {
        if let InstructionData::IntCompareImm {
            opcode: Opcode::IcmpImm,
            arg: tested,
            cond,
            imm,
        } = pos.func.dfg.insts[def]
        {
            if imm == Imm64::new(0) {
                let tested = pos.func.dfg.resolve_aliases(tested);
                match cond {
                    IntCC::NotEqual => {
                        let (d0, a0) = dest_parts(pos.func, blocks[0]);
                        let (d1, a1) = dest_parts(pos.func, blocks[1]);
                        pos.func.dfg.replace(inst).brif(tested, d0, &a0, d1, &a1);
                        return true;
                    }
                    IntCC::Equal => {
                        let (d0, a0) = dest_parts(pos.func, blocks[0]);
                        let (d1, a1) = dest_parts(pos.func, blocks[1]);
                        pos.func.dfg.replace(inst).brif(tested, d1, &a1, d0, &a0);
                        return true;
                    }
                    _ => {}
                }
            }
        }
    }
    false
}

fn dest_parts(func: &Function, call: crate::ir::BlockCall) -> (crate::ir::Block, Vec<Value>) {
    (
        call.block(&func.dfg.value_lists),
        call.args_slice(&func.dfg.value_lists).to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(func: &Function) -> Vec<Opcode> {
        let block = func.layout.entry_block().unwrap();
        func.layout
            .block_insts(block)
            .map(|i| func.dfg.insts[i].opcode())
            .collect()
    }

    #[test]
    fn add_zero_collapses() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let x = func.dfg.append_block_param(block0, types::I32);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let zero = cur.ins().iconst(types::I32, 0);
            let sum = cur.ins().iadd(x, zero);
            cur.ins().return_(&[sum]);
        }
        assert!(do_preopt(&mut func));
        assert_eq!(ops(&func), [Opcode::Iconst, Opcode::Return]);
        let ret = func.layout.last_inst(block0).unwrap();
        assert_eq!(func.dfg.resolve_aliases(func.dfg.inst_args(ret)[0]), x);
    }

    #[test]
    fn mul_pow2_becomes_shift() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let x = func.dfg.append_block_param(block0, types::I64);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let eight = cur.ins().iconst(types::I64, 8);
            let prod = cur.ins().imul(x, eight);
            cur.ins().return_(&[prod]);
        }
        assert!(do_preopt(&mut func));
        assert!(ops(&func).contains(&Opcode::Ishl));
        assert!(!ops(&func).contains(&Opcode::Imul));
    }

    #[test]
    fn udiv_by_7_uses_magic() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let x = func.dfg.append_block_param(block0, types::I32);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let seven = cur.ins().iconst(types::I32, 7);
            let q = cur.ins().udiv(x, seven);
            cur.ins().return_(&[q]);
        }
        assert!(do_preopt(&mut func));
        let ops = ops(&func);
        assert!(!ops.contains(&Opcode::Udiv));
        assert!(ops.contains(&Opcode::Umulhi));
        // Divisor 7 needs the add fixup.
        assert!(ops.contains(&Opcode::Isub));
    }

    #[test]
    fn sdiv_pow2_uses_bias_sequence() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let x = func.dfg.append_block_param(block0, types::I32);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let four = cur.ins().iconst(types::I32, 4);
            let q = cur.ins().sdiv(x, four);
            cur.ins().return_(&[q]);
        }
        assert!(do_preopt(&mut func));
        let ops = ops(&func);
        assert!(!ops.contains(&Opcode::Sdiv));
        assert!(ops.contains(&Opcode::Sshr));
        assert!(ops.contains(&Opcode::Ushr));
        assert!(ops.contains(&Opcode::Iadd));
    }

    #[test]
    fn brif_on_icmp_ne_zero_folds() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();
        let x = func.dfg.append_block_param(block0, types::I32);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let c = cur.ins().icmp_imm(IntCC::NotEqual, x, 0);
            cur.ins().brif(c, block1, &[], block2, &[]);
            cur.insert_block(block1);
            cur.ins().return_(&[]);
            cur.insert_block(block2);
            cur.ins().return_(&[]);
        }
        assert!(do_preopt(&mut func));
        let term = func.layout.last_inst(block0).unwrap();
        // The branch now tests x directly.
        assert_eq!(
            func.dfg.resolve_aliases(func.dfg.inst_args(term)[0]),
            x
        );
    }
}
