//! Sparse conditional constant propagation.
//!
//! Every SSA value carries a three-point lattice state: nothing known yet,
//! a known constant, or provably varying. Two worklists drive the analysis:
//! newly-executable CFG edges, and instructions whose operand states
//! changed. Conditional branches with a constant condition only mark the
//! taken edge executable, so code behind never-taken branches keeps
//! constant states that a straight forward pass would lose.
//!
//! At the fixedpoint, instructions whose result is a known constant are
//! replaced by constant instructions, and conditional branches with a
//! constant condition become plain jumps. Blocks that were never marked
//! executable are left for unreachable-code elimination to delete.

use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::condcodes::IntCC;
use crate::ir::immediates::{Ieee32, Ieee64};
use crate::ir::instructions::BlockCall;
use crate::ir::{
    Block, Function, Inst, InstBuilder, InstructionData, Opcode, Type, Value, types,
};
use crate::timing;
use std::collections::VecDeque;

/// A constant value carried by the lattice.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ConstValue {
    /// An integer constant, stored sign-extended, with its type.
    Int(i64, Type),
    /// A 32-bit float constant.
    F32(Ieee32),
    /// A 64-bit float constant.
    F64(Ieee64),
}

/// The lattice state of one SSA value.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
enum Lattice {
    /// No evidence yet; the optimistic initial state.
    #[default]
    Unknown,
    /// Known to be this constant on every executable path.
    Const(ConstValue),
    /// Provably not a single constant.
    Varying,
}

impl Lattice {
    fn meet(self, other: Lattice) -> Lattice {
        match (self, other) {
            (Lattice::Unknown, x) | (x, Lattice::Unknown) => x,
            (Lattice::Const(a), Lattice::Const(b)) if a == b => self,
            (Lattice::Const(_), Lattice::Const(_)) => Lattice::Varying,
            _ => Lattice::Varying,
        }
    }
}

/// Perform sparse conditional constant propagation on `func`.
pub fn do_sccp(func: &mut Function) {
    let _tt = timing::sccp();
    let mut solver = Solver::new(func);
    solver.solve(func);
    solver.apply(func);
}

struct Solver {
    lattice: FxHashMap<Value, Lattice>,
    /// Instructions using each value, including through branch arguments.
    uses: FxHashMap<Value, Vec<Inst>>,
    executable_blocks: FxHashSet<Block>,
    executable_edges: FxHashSet<(Inst, Block)>,
    block_worklist: VecDeque<Block>,
    inst_worklist: VecDeque<Inst>,
}

impl Solver {
    fn new(func: &Function) -> Self {
        let mut uses: FxHashMap<Value, Vec<Inst>> = FxHashMap::default();
        for block in func.layout.blocks() {
            for inst in func.layout.block_insts(block) {
                for &arg in func.dfg.inst_args(inst) {
                    uses.entry(func.dfg.resolve_aliases(arg)).or_default().push(inst);
                }
                for dest in func.dfg.insts[inst].branch_destination(&func.dfg.jump_tables) {
                    for &arg in dest.args_slice(&func.dfg.value_lists) {
                        uses.entry(func.dfg.resolve_aliases(arg)).or_default().push(inst);
                    }
                }
            }
        }
        Self {
            lattice: FxHashMap::default(),
            uses,
            executable_blocks: FxHashSet::default(),
            executable_edges: FxHashSet::default(),
            block_worklist: VecDeque::new(),
            inst_worklist: VecDeque::new(),
        }
    }

    fn value_state(&self, func: &Function, value: Value) -> Lattice {
        let value = func.dfg.resolve_aliases(value);
        // Function arguments are the entry block's parameters and can hold
        // anything.
        if let crate::ir::ValueDef::Param(block, _) = func.dfg.value_def(value) {
            if Some(block) == func.layout.entry_block() {
                return Lattice::Varying;
            }
        }
        self.lattice.get(&value).copied().unwrap_or_default()
    }

    fn set_state(&mut self, func: &Function, value: Value, state: Lattice) {
        let old = self.lattice.get(&value).copied().unwrap_or_default();
        let new = old.meet(state);
        if new != old {
            self.lattice.insert(value, new);
            if let Some(users) = self.uses.get(&value) {
                for &user in users {
                    self.inst_worklist.push_back(user);
                }
            }
        }
    }

    fn mark_block_executable(&mut self, block: Block) {
        if self.executable_blocks.insert(block) {
            self.block_worklist.push_back(block);
        }
    }

    fn mark_edge_executable(&mut self, func: &Function, from: Inst, dest: BlockCall) {
        let block = dest.block(&func.dfg.value_lists);
        let first_time = self.executable_edges.insert((from, block));
        self.mark_block_executable(block);
        if first_time {
            // The destination's parameters meet in the arguments along this
            // edge.
            self.propagate_branch_args(func, dest);
        }
    }

    fn propagate_branch_args(&mut self, func: &Function, dest: BlockCall) {
        let block = dest.block(&func.dfg.value_lists);
        let args: Vec<Value> = dest.args_slice(&func.dfg.value_lists).to_vec();
        let params: Vec<Value> = func.dfg.block_params(block).to_vec();
        for (param, arg) in params.into_iter().zip(args) {
            let state = self.value_state(func, arg);
            self.set_state(func, param, state);
        }
    }

    fn solve(&mut self, func: &Function) {
        let entry = match func.layout.entry_block() {
            Some(entry) => entry,
            None => return,
        };
        self.mark_block_executable(entry);

        loop {
            if let Some(block) = self.block_worklist.pop_front() {
                for inst in func.layout.block_insts(block) {
                    self.inst_worklist.push_back(inst);
                }
                continue;
            }
            if let Some(inst) = self.inst_worklist.pop_front() {
                // Only evaluate instructions in executable blocks.
                let in_executable = func
                    .layout
                    .inst_block(inst)
                    .is_some_and(|b| self.executable_blocks.contains(&b));
                if in_executable {
                    self.evaluate(func, inst);
                }
                continue;
            }
            break;
        }
    }

    fn evaluate(&mut self, func: &Function, inst: Inst) {
        let data = &func.dfg.insts[inst];
        let opcode = data.opcode();

        // Control flow: decide which out-edges are executable.
        match data {
            InstructionData::Jump { destination, .. } => {
                self.mark_edge_executable(func, inst, *destination);
                // Re-propagate in case argument states changed.
                self.propagate_branch_args(func, *destination);
                return;
            }
            InstructionData::Brif { arg, blocks, .. } => {
                match self.value_state(func, *arg) {
                    Lattice::Unknown => {}
                    Lattice::Const(c) => {
                        let taken = if const_is_nonzero(c) { 0 } else { 1 };
                        self.mark_edge_executable(func, inst, blocks[taken]);
                        self.propagate_branch_args(func, blocks[taken]);
                    }
                    Lattice::Varying => {
                        for dest in *blocks {
                            self.mark_edge_executable(func, inst, dest);
                            self.propagate_branch_args(func, dest);
                        }
                    }
                }
                return;
            }
            InstructionData::BranchTable { arg, table, .. } => {
                let jt = func.dfg.jump_tables.get(*table).unwrap();
                match self.value_state(func, *arg) {
                    Lattice::Unknown => {}
                    Lattice::Const(ConstValue::Int(x, _)) => {
                        let entries = jt.as_slice();
                        let dest = if (x as u64) < entries.len() as u64 {
                            entries[x as usize]
                        } else {
                            jt.default_block()
                        };
                        self.mark_edge_executable(func, inst, dest);
                        self.propagate_branch_args(func, dest);
                    }
                    _ => {
                        for &dest in jt.all_branches() {
                            self.mark_edge_executable(func, inst, dest);
                            self.propagate_branch_args(func, dest);
                        }
                    }
                }
                return;
            }
            InstructionData::TryCall { blocks, .. } => {
                for dest in *blocks {
                    self.mark_edge_executable(func, inst, dest);
                    self.propagate_branch_args(func, dest);
                }
                // Results are varying, handled below.
            }
            _ => {}
        }

        // Dataflow: compute result states.
        let results: Vec<Value> = func.dfg.inst_results(inst).to_vec();
        if results.is_empty() {
            return;
        }
        let state = self.transfer(func, inst);
        match state {
            TransferResult::All(state) => {
                for &result in &results {
                    self.set_state(func, result, state);
                }
            }
            TransferResult::One(state) => {
                self.set_state(func, results[0], state);
                for &result in &results[1..] {
                    self.set_state(func, result, Lattice::Varying);
                }
            }
        }
        let _ = opcode;
    }

    /// The transfer function: combine operand states under the opcode.
    fn transfer(&self, func: &Function, inst: Inst) -> TransferResult {
        let data = &func.dfg.insts[inst];
        let dfg = &func.dfg;

        let arg_state = |n: usize| self.value_state(func, dfg.inst_args(inst)[n]);

        // A helper tri-state: if any operand is Unknown, stay optimistic;
        // if any is Varying, give up; otherwise fold.
        macro_rules! operands {
            ($($n:expr),*) => {{
                let states = [$(arg_state($n)),*];
                if states.iter().any(|s| matches!(s, Lattice::Unknown)) {
                    return TransferResult::All(Lattice::Unknown);
                }
                if states.iter().any(|s| matches!(s, Lattice::Varying)) {
                    return TransferResult::All(Lattice::Varying);
                }
                states.map(|s| match s {
                    Lattice::Const(c) => c,
                    _ => unreachable!(),
                })
            }};
        }

        match data {
            InstructionData::UnaryImm { opcode: Opcode::Iconst, imm } => {
                let ty = dfg.value_type(dfg.first_result(inst));
                TransferResult::One(Lattice::Const(ConstValue::Int(imm.bits(), ty)))
            }
            InstructionData::UnaryIeee32 { imm, .. } => {
                TransferResult::One(Lattice::Const(ConstValue::F32(*imm)))
            }
            InstructionData::UnaryIeee64 { imm, .. } => {
                TransferResult::One(Lattice::Const(ConstValue::F64(*imm)))
            }
            InstructionData::Unary { opcode, .. } => {
                let [a] = operands!(0);
                let ty = dfg.value_type(dfg.first_result(inst));
                match fold_unary(*opcode, ty, a) {
                    Some(c) => TransferResult::One(Lattice::Const(c)),
                    None => TransferResult::All(Lattice::Varying),
                }
            }
            InstructionData::Binary { opcode, .. } => {
                let [a, b] = operands!(0, 1);
                match fold_binary(*opcode, a, b) {
                    Some(c) => TransferResult::One(Lattice::Const(c)),
                    None => TransferResult::All(Lattice::Varying),
                }
            }
            InstructionData::IntCompare { cond, .. } => {
                let [a, b] = operands!(0, 1);
                match fold_icmp(*cond, a, b) {
                    Some(c) => TransferResult::One(Lattice::Const(c)),
                    None => TransferResult::All(Lattice::Varying),
                }
            }
            InstructionData::IntCompareImm { cond, imm, arg, .. } => {
                let a = self.value_state(func, *arg);
                match a {
                    Lattice::Unknown => TransferResult::All(Lattice::Unknown),
                    Lattice::Const(ConstValue::Int(x, ty)) => {
                        let b = ConstValue::Int(imm.bits(), ty);
                        match fold_icmp(*cond, ConstValue::Int(x, ty), b) {
                            Some(c) => TransferResult::One(Lattice::Const(c)),
                            None => TransferResult::All(Lattice::Varying),
                        }
                    }
                    _ => TransferResult::All(Lattice::Varying),
                }
            }
            InstructionData::FloatCompare { cond, .. } => {
                let [a, b] = operands!(0, 1);
                match fold_fcmp(*cond, a, b) {
                    Some(c) => TransferResult::One(Lattice::Const(c)),
                    None => TransferResult::All(Lattice::Varying),
                }
            }
            InstructionData::Ternary { opcode: Opcode::Select, .. } => {
                // select folds on a constant condition; when the condition
                // is varying but both sides agree on one constant, that
                // constant is still the answer.
                let c = arg_state(0);
                let x = arg_state(1);
                let y = arg_state(2);
                match c {
                    Lattice::Unknown => TransferResult::All(Lattice::Unknown),
                    Lattice::Const(cond) => {
                        let side = if const_is_nonzero(cond) { x } else { y };
                        TransferResult::One(side)
                    }
                    Lattice::Varying => TransferResult::One(x.meet(y)),
                }
            }
            _ => TransferResult::All(Lattice::Varying),
        }
    }

    /// Rewrite the function using the solved lattice.
    fn apply(&self, func: &mut Function) {
        let blocks: Vec<Block> = func.layout.blocks().collect();
        for block in blocks {
            if !self.executable_blocks.contains(&block) {
                continue;
            }
            let insts: Vec<Inst> = func.layout.block_insts(block).collect();
            for inst in insts {
                let opcode = func.dfg.insts[inst].opcode();

                // Fold a conditional branch on a constant into a jump.
                if opcode == Opcode::Brif {
                    if let InstructionData::Brif { arg, blocks, .. } = func.dfg.insts[inst] {
                        if let Lattice::Const(c) = self.value_state(func, arg) {
                            let taken = blocks[if const_is_nonzero(c) { 0 } else { 1 }];
                            let dest = taken.block(&func.dfg.value_lists);
                            let args: Vec<Value> =
                                taken.args_slice(&func.dfg.value_lists).to_vec();
                            trace!("sccp: folding {} to jump {dest}", func.dfg.display_inst(inst));
                            func.dfg.replace(inst).jump(dest, &args);
                        }
                    }
                    continue;
                }

                // Pure single-result instructions with a constant state
                // become constants.
                if !opcode.is_pure() || opcode == Opcode::Iconst {
                    continue;
                }
                let results = func.dfg.inst_results(inst);
                if results.len() != 1 {
                    continue;
                }
                let result = results[0];
                if let Lattice::Const(c) = self.value_state(func, result) {
                    trace!(
                        "sccp: replacing {} with {:?}",
                        func.dfg.display_inst(inst),
                        c
                    );
                    match c {
                        ConstValue::Int(x, ty) => {
                            func.dfg.replace(inst).iconst(ty, x);
                        }
                        ConstValue::F32(x) => {
                            func.dfg.replace(inst).f32const(x);
                        }
                        ConstValue::F64(x) => {
                            func.dfg.replace(inst).f64const(x);
                        }
                    }
                }
            }
        }
    }
}

enum TransferResult {
    /// All results take this state.
    All(Lattice),
    /// The first result takes this state; the rest are varying.
    One(Lattice),
}

fn const_is_nonzero(c: ConstValue) -> bool {
    match c {
        ConstValue::Int(x, ty) => mask_to_type(x, ty) != 0,
        ConstValue::F32(x) => x.bits() != 0,
        ConstValue::F64(x) => x.bits() != 0,
    }
}

/// Interpret `x` as an unsigned value of width `ty`.
fn mask_to_type(x: i64, ty: Type) -> u64 {
    let bits = ty.bits().min(64);
    if bits >= 64 {
        x as u64
    } else {
        (x as u64) & ((1u64 << bits) - 1)
    }
}

/// Sign-extend the masked value back to 64 bits.
fn sext_to_type(x: u64, ty: Type) -> i64 {
    let bits = ty.bits().min(64);
    if bits >= 64 {
        x as i64
    } else {
        let shift = 64 - bits;
        ((x << shift) as i64) >> shift
    }
}

fn int_pair(a: ConstValue, b: ConstValue) -> Option<(i64, i64, Type)> {
    match (a, b) {
        (ConstValue::Int(x, tx), ConstValue::Int(y, ty)) if tx == ty => Some((x, y, tx)),
        _ => None,
    }
}

fn fold_unary(opcode: Opcode, result_ty: Type, a: ConstValue) -> Option<ConstValue> {
    let int = |x: i64| Some(ConstValue::Int(x, result_ty));
    match (opcode, a) {
        (Opcode::Ineg, ConstValue::Int(x, ty)) => {
            int(sext_to_type(mask_to_type(x.wrapping_neg(), ty), ty))
        }
        (Opcode::Bnot, ConstValue::Int(x, ty)) => int(sext_to_type(mask_to_type(!x, ty), ty)),
        (Opcode::Clz, ConstValue::Int(x, ty)) => {
            let bits = ty.bits().min(64);
            let v = mask_to_type(x, ty);
            int((v.leading_zeros() as i64) - (64 - bits as i64))
        }
        (Opcode::Ctz, ConstValue::Int(x, ty)) => {
            let bits = ty.bits().min(64) as i64;
            let v = mask_to_type(x, ty);
            int(if v == 0 { bits } else { v.trailing_zeros() as i64 })
        }
        (Opcode::Popcnt, ConstValue::Int(x, ty)) => int(mask_to_type(x, ty).count_ones() as i64),
        (Opcode::Uextend, ConstValue::Int(x, ty)) => {
            int(sext_to_type(mask_to_type(x, ty), result_ty))
        }
        (Opcode::Sextend, ConstValue::Int(x, _)) => int(x),
        (Opcode::Ireduce, ConstValue::Int(x, _)) => {
            int(sext_to_type(mask_to_type(x, result_ty), result_ty))
        }
        (Opcode::Fneg, ConstValue::F32(x)) => {
            Some(ConstValue::F32(Ieee32::with_bits(x.bits() ^ 0x8000_0000)))
        }
        (Opcode::Fneg, ConstValue::F64(x)) => Some(ConstValue::F64(Ieee64::with_bits(
            x.bits() ^ 0x8000_0000_0000_0000,
        ))),
        (Opcode::Fabs, ConstValue::F32(x)) => {
            Some(ConstValue::F32(Ieee32::with_bits(x.bits() & 0x7fff_ffff)))
        }
        (Opcode::Fabs, ConstValue::F64(x)) => Some(ConstValue::F64(Ieee64::with_bits(
            x.bits() & 0x7fff_ffff_ffff_ffff,
        ))),
        _ => None,
    }
}

fn fold_binary(opcode: Opcode, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    // Integer cases.
    if let Some((x, y, ty)) = int_pair(a, b) {
        let norm = |v: i64| sext_to_type(mask_to_type(v, ty), ty);
        let ux = mask_to_type(x, ty);
        let uy = mask_to_type(y, ty);
        let bits = ty.bits().min(64);
        let shift_mask = (bits - 1) as u64;
        let folded = match opcode {
            Opcode::Iadd => norm(x.wrapping_add(y)),
            Opcode::Isub => norm(x.wrapping_sub(y)),
            Opcode::Imul => norm(x.wrapping_mul(y)),
            Opcode::Band => norm(x & y),
            Opcode::Bor => norm(x | y),
            Opcode::Bxor => norm(x ^ y),
            Opcode::BandNot => norm(x & !y),
            Opcode::BorNot => norm(x | !y),
            Opcode::BxorNot => norm(x ^ !y),
            Opcode::Ishl => norm((ux << (uy & shift_mask)) as i64),
            Opcode::Ushr => norm((ux >> (uy & shift_mask)) as i64),
            Opcode::Sshr => norm(x >> (uy & shift_mask)),
            // Division by a constant zero cannot fold: the trap must stay.
            Opcode::Udiv if uy != 0 => norm((ux / uy) as i64),
            Opcode::Urem if uy != 0 => norm((ux % uy) as i64),
            Opcode::Sdiv if y != 0 && !(x == i64::MIN && y == -1) => norm(x.wrapping_div(y)),
            Opcode::Srem if y != 0 && !(x == i64::MIN && y == -1) => norm(x.wrapping_rem(y)),
            _ => return None,
        };
        return Some(ConstValue::Int(folded, ty));
    }

    // Float cases fold through host arithmetic on the bit patterns.
    match (opcode, a, b) {
        (Opcode::Fadd, ConstValue::F32(x), ConstValue::F32(y)) => {
            Some(ConstValue::F32(Ieee32::from(x.as_f32() + y.as_f32())))
        }
        (Opcode::Fsub, ConstValue::F32(x), ConstValue::F32(y)) => {
            Some(ConstValue::F32(Ieee32::from(x.as_f32() - y.as_f32())))
        }
        (Opcode::Fmul, ConstValue::F32(x), ConstValue::F32(y)) => {
            Some(ConstValue::F32(Ieee32::from(x.as_f32() * y.as_f32())))
        }
        (Opcode::Fdiv, ConstValue::F32(x), ConstValue::F32(y)) => {
            Some(ConstValue::F32(Ieee32::from(x.as_f32() / y.as_f32())))
        }
        (Opcode::Fadd, ConstValue::F64(x), ConstValue::F64(y)) => {
            Some(ConstValue::F64(Ieee64::from(x.as_f64() + y.as_f64())))
        }
        (Opcode::Fsub, ConstValue::F64(x), ConstValue::F64(y)) => {
            Some(ConstValue::F64(Ieee64::from(x.as_f64() - y.as_f64())))
        }
        (Opcode::Fmul, ConstValue::F64(x), ConstValue::F64(y)) => {
            Some(ConstValue::F64(Ieee64::from(x.as_f64() * y.as_f64())))
        }
        (Opcode::Fdiv, ConstValue::F64(x), ConstValue::F64(y)) => {
            Some(ConstValue::F64(Ieee64::from(x.as_f64() / y.as_f64())))
        }
        _ => None,
    }
}

fn fold_icmp(cond: IntCC, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    let (x, y, ty) = int_pair(a, b)?;
    let ux = mask_to_type(x, ty);
    let uy = mask_to_type(y, ty);
    let sx = sext_to_type(ux, ty);
    let sy = sext_to_type(uy, ty);
    let result = match cond {
        IntCC::Equal => ux == uy,
        IntCC::NotEqual => ux != uy,
        IntCC::SignedLessThan => sx < sy,
        IntCC::SignedGreaterThanOrEqual => sx >= sy,
        IntCC::SignedGreaterThan => sx > sy,
        IntCC::SignedLessThanOrEqual => sx <= sy,
        IntCC::UnsignedLessThan => ux < uy,
        IntCC::UnsignedGreaterThanOrEqual => ux >= uy,
        IntCC::UnsignedGreaterThan => ux > uy,
        IntCC::UnsignedLessThanOrEqual => ux <= uy,
    };
    Some(ConstValue::Int(result as i64, types::I8))
}

fn fold_fcmp(cond: crate::ir::condcodes::FloatCC, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    use crate::ir::condcodes::FloatCC;
    let (lt, eq, gt, uno) = match (a, b) {
        (ConstValue::F32(x), ConstValue::F32(y)) => {
            let (x, y) = (x.as_f32(), y.as_f32());
            (x < y, x == y, x > y, x.is_nan() || y.is_nan())
        }
        (ConstValue::F64(x), ConstValue::F64(y)) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            (x < y, x == y, x > y, x.is_nan() || y.is_nan())
        }
        _ => return None,
    };
    let result = match cond {
        FloatCC::Ordered => !uno,
        FloatCC::Unordered => uno,
        FloatCC::Equal => eq,
        FloatCC::NotEqual => lt | gt | uno,
        FloatCC::OrderedNotEqual => lt | gt,
        FloatCC::UnorderedOrEqual => eq | uno,
        FloatCC::LessThan => lt,
        FloatCC::LessThanOrEqual => lt | eq,
        FloatCC::GreaterThan => gt,
        FloatCC::GreaterThanOrEqual => gt | eq,
        FloatCC::UnorderedOrLessThan => lt | uno,
        FloatCC::UnorderedOrLessThanOrEqual => lt | eq | uno,
        FloatCC::UnorderedOrGreaterThan => gt | uno,
        FloatCC::UnorderedOrGreaterThanOrEqual => gt | eq | uno,
    };
    Some(ConstValue::Int(result as i64, types::I8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::condcodes::IntCC;

    #[test]
    fn folds_straightline_arithmetic() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let ret;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let a = cur.ins().iconst(types::I32, 6);
            let b = cur.ins().iconst(types::I32, 7);
            let c = cur.ins().imul(a, b);
            ret = cur.ins().return_(&[c]);
        }
        do_sccp(&mut func);

        // The imul's result is now an iconst 42.
        let c = func.dfg.inst_args(ret)[0];
        let def = func.dfg.value_def(c).unwrap_inst();
        match func.dfg.insts[def] {
            InstructionData::UnaryImm { imm, .. } => assert_eq!(imm.bits(), 42),
            ref other => panic!("expected folded constant, got {other:?}"),
        }
    }

    #[test]
    fn constant_branch_becomes_jump() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        let block2 = func.dfg.make_block();
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let c = cur.ins().iconst(types::I8, 0);
            cur.ins().brif(c, block1, &[], block2, &[]);
            cur.insert_block(block1);
            cur.ins().return_(&[]);
            cur.insert_block(block2);
            cur.ins().return_(&[]);
        }
        do_sccp(&mut func);

        let term = func.layout.last_inst(block0).unwrap();
        assert_eq!(func.dfg.insts[term].opcode(), Opcode::Jump);
        match &func.dfg.insts[term] {
            InstructionData::Jump { destination, .. } => {
                assert_eq!(destination.block(&func.dfg.value_lists), block2);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn constants_survive_through_untaken_paths() {
        // x = 1; if x then y = 10 else y = 20; return y + 1
        // SCCP sees only the taken edge, so y is the constant 10 and the
        // add folds to 11.
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block_then = func.dfg.make_block();
        let block_else = func.dfg.make_block();
        let join = func.dfg.make_block();
        let y = func.dfg.append_block_param(join, types::I32);
        let ret;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let x = cur.ins().iconst(types::I8, 1);
            cur.ins().brif(x, block_then, &[], block_else, &[]);

            cur.insert_block(block_then);
            let ten = cur.ins().iconst(types::I32, 10);
            cur.ins().jump(join, &[ten]);

            cur.insert_block(block_else);
            let twenty = cur.ins().iconst(types::I32, 20);
            cur.ins().jump(join, &[twenty]);

            cur.insert_block(join);
            let one = cur.ins().iconst(types::I32, 1);
            let sum = cur.ins().iadd(y, one);
            ret = cur.ins().return_(&[sum]);
        }
        do_sccp(&mut func);

        let sum = func.dfg.inst_args(ret)[0];
        let def = func.dfg.value_def(sum).unwrap_inst();
        match func.dfg.insts[def] {
            InstructionData::UnaryImm { imm, .. } => assert_eq!(imm.bits(), 11),
            ref other => panic!("expected folded constant, got {other:?}"),
        }
    }

    #[test]
    fn select_with_equal_arms_folds() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let c = func.dfg.append_block_param(block0, types::I8);
        let ret;
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let a = cur.ins().iconst(types::I64, 5);
            let b = cur.ins().iconst(types::I64, 5);
            let s = cur.ins().select(c, a, b);
            ret = cur.ins().return_(&[s]);
        }
        do_sccp(&mut func);

        let s = func.dfg.inst_args(ret)[0];
        let def = func.dfg.value_def(s).unwrap_inst();
        assert_eq!(func.dfg.insts[def].opcode(), Opcode::Iconst);
    }
}
