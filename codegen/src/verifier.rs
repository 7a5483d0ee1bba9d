//! A verifier for ensuring that functions are well formed.
//! It verifies:
//!
//! block integrity
//!
//! - All instructions reached from the `block_insts` iterator must belong to
//!   the block as reported by `inst_block()`.
//! - Every block must end in a terminator instruction, and no other
//!   instruction can be a terminator.
//! - Every branch destination must be a block inserted in the layout, and
//!   the passed arguments must agree in number and type with the
//!   destination's parameters.
//! - The entry block must not have any predecessors.
//!
//! Instruction integrity
//!
//! - All referenced entities must exist: values, blocks, stack slots,
//!   signatures, functions, global values, jump tables.
//! - Operand and result types must obey the opcode's typing rule.
//! - Value aliases must not form cycles.
//!
//! SSA form
//!
//! - Values must be defined by an instruction that exists and that is
//!   inserted in a block, or be a parameter of an existing block.
//! - All the values used by an instruction must dominate the instruction.

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::instructions::{BlockCall, CallInfo};
use crate::ir::{
    types, AnyEntity, Block, Function, Inst, InstructionData, Opcode, Type, Value, ValueDef,
};
use crate::settings::FlagsOrIsa;
use crate::timing;
use core::fmt;

/// A verifier error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierError {
    /// The entity causing the verifier error.
    pub location: AnyEntity,
    /// Optionally, the rendering of the problematic instruction.
    pub context: Option<String>,
    /// The error message.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.context {
            None => write!(f, "{}: {}", self.location, self.message),
            Some(context) => write!(f, "{} ({}): {}", self.location, context, self.message),
        }
    }
}

/// Result of a verification operation; the error side carries the complete
/// list of problems found.
pub type VerifierResult<T> = Result<T, VerifierErrors>;

/// List of verifier errors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// Return a new `VerifierErrors` struct.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Return whether no errors were reported.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Report an error.
    pub fn report(&mut self, error: VerifierError) {
        self.0.push(error);
    }

    /// Convert the accumulated errors into a result.
    pub fn as_result(self) -> VerifierResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn fatal(
        &mut self,
        location: impl Into<AnyEntity>,
        context: Option<String>,
        message: impl Into<String>,
    ) {
        self.report(VerifierError {
            location: location.into(),
            context,
            message: message.into(),
        });
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for err in &self.0 {
            writeln!(f, "- {err}")?;
        }
        Ok(())
    }
}

/// Verify `func` after computing its control flow graph and dominator tree.
pub fn verify_function<'a, FOI: Into<FlagsOrIsa<'a>>>(
    func: &Function,
    fisa: FOI,
) -> VerifierResult<()> {
    let cfg = ControlFlowGraph::with_function(func);
    let domtree = DominatorTree::with_function(func, &cfg);
    let mut errors = VerifierErrors::new();
    let _ = verify_context(func, &cfg, &domtree, fisa, &mut errors);
    errors.as_result()
}

/// Verify `func` against the provided control flow graph and dominator tree.
pub fn verify_context<'a, FOI: Into<FlagsOrIsa<'a>>>(
    func: &Function,
    cfg: &ControlFlowGraph,
    domtree: &DominatorTree,
    fisa: FOI,
    errors: &mut VerifierErrors,
) -> VerifierResult<()> {
    let _tt = timing::verifier();
    let _ = fisa.into();
    let verifier = Verifier {
        func,
        cfg,
        domtree,
    };
    verifier.run(errors)
}

struct Verifier<'a> {
    func: &'a Function,
    cfg: &'a ControlFlowGraph,
    domtree: &'a DominatorTree,
}

impl<'a> Verifier<'a> {
    fn run(&self, errors: &mut VerifierErrors) -> VerifierResult<()> {
        self.verify_entry_block(errors);
        for block in self.func.layout.blocks() {
            self.verify_block(block, errors);
            for inst in self.func.layout.block_insts(block) {
                self.verify_inst(block, inst, errors);
            }
        }
        self.verify_value_aliases(errors);
        errors.clone().as_result()
    }

    fn context(&self, inst: Inst) -> Option<String> {
        Some(self.func.dfg.display_inst(inst).to_string())
    }

    fn verify_entry_block(&self, errors: &mut VerifierErrors) {
        let entry = match self.func.layout.entry_block() {
            Some(entry) => entry,
            None => return,
        };
        if self.cfg.pred_iter(entry).len() != 0 {
            errors.fatal(entry, None, "entry block must have no predecessors");
        }
        // The entry block's parameters are dictated by the signature.
        let params = self.func.dfg.block_params(entry);
        if params.len() != self.func.signature.params.len() {
            errors.fatal(
                entry,
                None,
                format!(
                    "entry block has {} parameters, signature has {}",
                    params.len(),
                    self.func.signature.params.len()
                ),
            );
        } else {
            for (&param, abi) in params.iter().zip(&self.func.signature.params) {
                let ty = self.func.dfg.value_type(param);
                if ty != abi.value_type {
                    errors.fatal(
                        param,
                        None,
                        format!(
                            "entry block parameter {param} has type {ty}, signature says {}",
                            abi.value_type
                        ),
                    );
                }
            }
        }
    }

    fn verify_block(&self, block: Block, errors: &mut VerifierErrors) {
        if !self.func.dfg.block_is_valid(block) {
            errors.fatal(block, None, "block is not defined in the DFG");
            return;
        }
        match self.func.layout.last_inst(block) {
            None => errors.fatal(block, None, "block has no terminator"),
            Some(last) => {
                if !self.func.dfg.insts[last].opcode().is_terminator() {
                    errors.fatal(
                        block,
                        self.context(last),
                        "block does not end in a terminator",
                    );
                }
            }
        }
        for inst in self.func.layout.block_insts(block) {
            let is_last = self.func.layout.last_inst(block) == Some(inst);
            if !is_last && self.func.dfg.insts[inst].opcode().is_terminator() {
                errors.fatal(
                    block,
                    self.context(inst),
                    "terminator instruction in the middle of a block",
                );
            }
        }
    }

    fn verify_inst(&self, _block: Block, inst: Inst, errors: &mut VerifierErrors) {
        if !self.func.dfg.inst_is_valid(inst) {
            errors.fatal(inst, None, "instruction is not defined in the DFG");
            return;
        }

        // Referenced entities exist.
        self.verify_entity_refs(inst, errors);

        // Every operand value is valid and dominated by its definition.
        for &arg in self.func.dfg.inst_args(inst) {
            self.verify_value_use(inst, arg, errors);
        }

        // Branch destinations agree with destination block parameters.
        for dest in self.func.dfg.insts[inst].branch_destination(&self.func.dfg.jump_tables) {
            self.verify_branch_args(inst, *dest, errors);
            for &arg in dest.args_slice(&self.func.dfg.value_lists) {
                self.verify_value_use(inst, arg, errors);
            }
        }

        // Typing rules.
        self.verify_inst_types(inst, errors);
    }

    fn verify_entity_refs(&self, inst: Inst, errors: &mut VerifierErrors) {
        match &self.func.dfg.insts[inst] {
            InstructionData::Call { func_ref, .. }
            | InstructionData::TryCall { func_ref, .. }
            | InstructionData::FuncAddr { func_ref, .. } => {
                if !self.func.dfg.ext_funcs.is_valid(*func_ref) {
                    errors.fatal(inst, self.context(inst), "invalid function reference");
                }
            }
            InstructionData::CallIndirect { sig_ref, .. } => {
                if !self.func.dfg.signatures.is_valid(*sig_ref) {
                    errors.fatal(inst, self.context(inst), "invalid signature reference");
                }
            }
            InstructionData::UnaryGlobalValue { global_value, .. } => {
                if !self.func.global_values.is_valid(*global_value) {
                    errors.fatal(inst, self.context(inst), "invalid global value reference");
                }
            }
            InstructionData::StackLoad { stack_slot, .. }
            | InstructionData::StackStore { stack_slot, .. } => {
                if !self.func.stack_slots.is_valid(*stack_slot) {
                    errors.fatal(inst, self.context(inst), "invalid stack slot reference");
                }
            }
            InstructionData::BranchTable { table, .. } => {
                if self.func.dfg.jump_tables.get(*table).is_none() {
                    errors.fatal(inst, self.context(inst), "invalid jump table reference");
                }
            }
            _ => {}
        }
    }

    fn verify_value_use(&self, use_inst: Inst, value: Value, errors: &mut VerifierErrors) {
        if !self.func.dfg.value_is_valid(value) {
            errors.fatal(
                use_inst,
                self.context(use_inst),
                format!("uses undefined value {value}"),
            );
            return;
        }
        let value = match self.resolve_aliases_checked(value) {
            Some(v) => v,
            // Cycle; reported by verify_value_aliases.
            None => return,
        };

        let use_block = match self.func.layout.inst_block(use_inst) {
            Some(block) => block,
            None => return,
        };
        // Dominance is only meaningful for reachable code.
        if !self.domtree.is_reachable(use_block) {
            return;
        }

        match self.func.dfg.value_def(value) {
            ValueDef::Result(def_inst, _) => {
                if self.func.layout.inst_block(def_inst).is_none() {
                    errors.fatal(
                        use_inst,
                        self.context(use_inst),
                        format!("uses value {value} defined by an instruction not in the layout"),
                    );
                } else if def_inst == use_inst {
                    // A call-with-exception-edge terminator defines its
                    // results before control transfers, so it may pass them
                    // along its own edges.
                    if self.func.dfg.insts[use_inst].opcode() != Opcode::TryCall {
                        errors.fatal(
                            use_inst,
                            self.context(use_inst),
                            format!("uses value {value} from non-dominating {def_inst}"),
                        );
                    }
                } else if !self
                    .domtree
                    .dominates(def_inst, use_inst, &self.func.layout)
                {
                    errors.fatal(
                        use_inst,
                        self.context(use_inst),
                        format!("uses value {value} from non-dominating {def_inst}"),
                    );
                }
            }
            ValueDef::Param(def_block, _) => {
                if !self.func.layout.is_block_inserted(def_block) {
                    errors.fatal(
                        use_inst,
                        self.context(use_inst),
                        format!("uses value {value} from a block not in the layout"),
                    );
                } else if !self
                    .domtree
                    .dominates(def_block, use_inst, &self.func.layout)
                {
                    errors.fatal(
                        use_inst,
                        self.context(use_inst),
                        format!("uses value {value} from non-dominating {def_block}"),
                    );
                }
            }
        }
    }

    fn verify_branch_args(&self, inst: Inst, dest: BlockCall, errors: &mut VerifierErrors) {
        let block = dest.block(&self.func.dfg.value_lists);
        if !self.func.dfg.block_is_valid(block) || !self.func.layout.is_block_inserted(block) {
            errors.fatal(
                inst,
                self.context(inst),
                format!("branch to {block} which is not in the layout"),
            );
            return;
        }
        let args = dest.args_slice(&self.func.dfg.value_lists);
        let params = self.func.dfg.block_params(block);
        if args.len() != params.len() {
            errors.fatal(
                inst,
                self.context(inst),
                format!(
                    "branch to {block} passes {} arguments, block has {} parameters",
                    args.len(),
                    params.len()
                ),
            );
            return;
        }
        for (&arg, &param) in args.iter().zip(params) {
            if !self.func.dfg.value_is_valid(arg) {
                continue;
            }
            let arg_ty = self.func.dfg.value_type(arg);
            let param_ty = self.func.dfg.value_type(param);
            if arg_ty != param_ty {
                errors.fatal(
                    inst,
                    self.context(inst),
                    format!(
                        "branch argument {arg} has type {arg_ty}, {block} parameter \
                         {param} has type {param_ty}"
                    ),
                );
            }
        }
    }

    fn arg_ty(&self, value: Value) -> Type {
        self.func.dfg.value_type(value)
    }

    fn verify_inst_types(&self, inst: Inst, errors: &mut VerifierErrors) {
        let dfg = &self.func.dfg;
        let data = &dfg.insts[inst];
        let opcode = data.opcode();
        let args = dfg.inst_args(inst);
        let results = dfg.inst_results(inst);

        let mut fail = |message: String| {
            errors.report(VerifierError {
                location: inst.into(),
                context: Some(dfg.display_inst(inst).to_string()),
                message,
            });
        };

        match opcode {
            // Integer binary operations: both operands and the result share
            // one integer type.
            Opcode::Iadd
            | Opcode::Isub
            | Opcode::Imul
            | Opcode::Smulhi
            | Opcode::Umulhi
            | Opcode::Udiv
            | Opcode::Sdiv
            | Opcode::Urem
            | Opcode::Srem
            | Opcode::Band
            | Opcode::Bor
            | Opcode::Bxor
            | Opcode::BandNot
            | Opcode::BorNot
            | Opcode::BxorNot => {
                let ty = self.arg_ty(args[0]);
                if !ty.lane_type().is_int() {
                    fail(format!("{opcode} requires integer operands, got {ty}"));
                }
                if self.arg_ty(args[1]) != ty || dfg.value_type(results[0]) != ty {
                    fail(format!("{opcode} operand/result types must all be {ty}"));
                }
            }

            // Shifts and rotates: the amount may be any integer type.
            Opcode::Ishl | Opcode::Ushr | Opcode::Sshr | Opcode::Rotl | Opcode::Rotr => {
                let ty = self.arg_ty(args[0]);
                if !ty.lane_type().is_int() {
                    fail(format!("{opcode} requires an integer operand, got {ty}"));
                }
                if !self.arg_ty(args[1]).is_int() {
                    fail(format!("{opcode} shift amount must be an integer"));
                }
                if dfg.value_type(results[0]) != ty {
                    fail(format!("{opcode} result must have type {ty}"));
                }
            }

            Opcode::Icmp => {
                let ty = self.arg_ty(args[0]);
                if !ty.is_int() || self.arg_ty(args[1]) != ty {
                    fail("icmp operands must share one integer type".into());
                }
                if dfg.value_type(results[0]) != types::I8 {
                    fail("icmp result must be i8".into());
                }
            }

            Opcode::IcmpImm => {
                if !self.arg_ty(args[0]).is_int() {
                    fail("icmp_imm operand must be an integer".into());
                }
            }

            Opcode::Fcmp => {
                let ty = self.arg_ty(args[0]);
                if !ty.is_float() || self.arg_ty(args[1]) != ty {
                    fail("fcmp operands must share one float type".into());
                }
            }

            // Float binary operations.
            Opcode::Fadd
            | Opcode::Fsub
            | Opcode::Fmul
            | Opcode::Fdiv
            | Opcode::Fmin
            | Opcode::Fmax
            | Opcode::Fcopysign => {
                let ty = self.arg_ty(args[0]);
                if !ty.lane_type().is_float() {
                    fail(format!("{opcode} requires float operands, got {ty}"));
                }
                if self.arg_ty(args[1]) != ty || dfg.value_type(results[0]) != ty {
                    fail(format!("{opcode} operand/result types must all be {ty}"));
                }
            }

            Opcode::Select => {
                if !self.arg_ty(args[0]).is_int() {
                    fail("select condition must be an integer".into());
                }
                let ty = self.arg_ty(args[1]);
                if self.arg_ty(args[2]) != ty || dfg.value_type(results[0]) != ty {
                    fail("select arms and result must share one type".into());
                }
            }

            Opcode::Uextend | Opcode::Sextend => {
                let from = self.arg_ty(args[0]);
                let to = dfg.value_type(results[0]);
                if !from.is_int() || !to.is_int() || from.bits() >= to.bits() {
                    fail(format!("{opcode} must widen an integer: {from} -> {to}"));
                }
            }

            Opcode::Ireduce => {
                let from = self.arg_ty(args[0]);
                let to = dfg.value_type(results[0]);
                if !from.is_int() || !to.is_int() || from.bits() <= to.bits() {
                    fail(format!("ireduce must narrow an integer: {from} -> {to}"));
                }
            }

            Opcode::Bitcast => {
                let from = self.arg_ty(args[0]);
                let to = dfg.value_type(results[0]);
                if from.bits() != to.bits() {
                    fail(format!("bitcast must preserve width: {from} -> {to}"));
                }
            }

            Opcode::Fpromote => {
                if self.arg_ty(args[0]) != types::F32
                    || dfg.value_type(results[0]) != types::F64
                {
                    fail("fpromote must convert f32 -> f64".into());
                }
            }

            Opcode::Fdemote => {
                if self.arg_ty(args[0]) != types::F64
                    || dfg.value_type(results[0]) != types::F32
                {
                    fail("fdemote must convert f64 -> f32".into());
                }
            }

            Opcode::FcvtToSint | Opcode::FcvtToUint => {
                if !self.arg_ty(args[0]).is_float() || !dfg.value_type(results[0]).is_int() {
                    fail(format!("{opcode} must convert float -> int"));
                }
            }

            Opcode::FcvtFromSint | Opcode::FcvtFromUint => {
                if !self.arg_ty(args[0]).is_int() || !dfg.value_type(results[0]).is_float() {
                    fail(format!("{opcode} must convert int -> float"));
                }
            }

            Opcode::Iconcat => {
                let half = self.arg_ty(args[0]);
                if self.arg_ty(args[1]) != half {
                    fail("iconcat halves must have the same type".into());
                }
                if half.double_width() != Some(dfg.value_type(results[0])) {
                    fail("iconcat result must be twice the operand width".into());
                }
            }

            Opcode::Isplit => {
                let whole = self.arg_ty(args[0]);
                if whole.half_width() != Some(dfg.value_type(results[0])) {
                    fail("isplit results must be half the operand width".into());
                }
            }

            // Loads and stores address through a pointer-sized integer.
            Opcode::Load
            | Opcode::Uload8
            | Opcode::Sload8
            | Opcode::Uload16
            | Opcode::Sload16
            | Opcode::Uload32
            | Opcode::Sload32
            | Opcode::AtomicLoad => {
                let addr = *args.last().unwrap();
                if self.arg_ty(addr) != types::I64 {
                    fail(format!("{opcode} address must be i64"));
                }
            }

            Opcode::Store
            | Opcode::Istore8
            | Opcode::Istore16
            | Opcode::Istore32
            | Opcode::AtomicStore => {
                if self.arg_ty(args[1]) != types::I64 {
                    fail(format!("{opcode} address must be i64"));
                }
            }

            Opcode::AtomicRmw | Opcode::AtomicCas => {
                if self.arg_ty(args[0]) != types::I64 {
                    fail(format!("{opcode} address must be i64"));
                }
            }

            // Calls: arguments match the signature.
            Opcode::Call | Opcode::ReturnCall | Opcode::TryCall | Opcode::CallIndirect
            | Opcode::ReturnCallIndirect => {
                let (sig, fixed_args): (_, &[Value]) =
                    match data.analyze_call(&dfg.value_lists) {
                        CallInfo::Direct(fref, args) => (dfg.ext_funcs[fref].signature, args),
                        CallInfo::Indirect(sig, args) => {
                            if let Some((&callee, _)) = args.split_first() {
                                if self.arg_ty(callee) != types::I64 {
                                    fail("indirect call callee must be i64".into());
                                }
                            }
                            (sig, &args[1..])
                        }
                        CallInfo::NotACall => unreachable!(),
                    };
                let params = &dfg.signatures[sig].params;
                if fixed_args.len() != params.len() {
                    fail(format!(
                        "call passes {} arguments, signature expects {}",
                        fixed_args.len(),
                        params.len()
                    ));
                } else {
                    for (&arg, param) in fixed_args.iter().zip(params) {
                        if self.arg_ty(arg) != param.value_type {
                            fail(format!(
                                "call argument {arg} has type {}, expected {}",
                                self.arg_ty(arg),
                                param.value_type
                            ));
                        }
                    }
                }
            }

            Opcode::Return => {
                let returns = &self.func.signature.returns;
                if args.len() != returns.len() {
                    fail(format!(
                        "return has {} values, signature expects {}",
                        args.len(),
                        returns.len()
                    ));
                } else {
                    for (&arg, ret) in args.iter().zip(returns) {
                        if self.arg_ty(arg) != ret.value_type {
                            fail(format!(
                                "returned value {arg} has type {}, expected {}",
                                self.arg_ty(arg),
                                ret.value_type
                            ));
                        }
                    }
                }
            }

            Opcode::Brif | Opcode::Trapz | Opcode::Trapnz => {
                if !self.arg_ty(args[0]).is_int() {
                    fail(format!("{opcode} condition must be an integer"));
                }
            }

            Opcode::BrTable => {
                if !self.arg_ty(args[0]).is_int() {
                    fail("br_table index must be an integer".into());
                }
            }

            _ => {}
        }
    }

    /// Resolve aliases with an explicit bound; `None` means a cycle.
    fn resolve_aliases_checked(&self, value: Value) -> Option<Value> {
        let mut v = value;
        for _ in 0..=self.func.dfg.num_values() {
            match self.func.dfg.alias_target(v) {
                Some(next) => v = next,
                None => return Some(v),
            }
        }
        None
    }

    fn verify_value_aliases(&self, errors: &mut VerifierErrors) {
        // Alias chains are validated by bounded resolution; `change_to_alias`
        // cannot create cycles, but IR read from outside could.
        for block in self.func.layout.blocks() {
            for inst in self.func.layout.block_insts(block) {
                for &arg in self.func.dfg.inst_args(inst) {
                    if self.func.dfg.value_is_valid(arg)
                        && self.resolve_aliases_checked(arg).is_none()
                    {
                        errors.fatal(
                            inst,
                            self.context(inst),
                            format!("value {arg} is part of an alias cycle"),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Cursor, FuncCursor};
    use crate::ir::{types, AbiParam, Function, InstBuilder, Signature};
    use crate::isa::CallConv;
    use crate::settings::Flags;

    fn flags() -> Flags {
        Flags::new(crate::settings::builder())
    }

    #[test]
    fn empty_function_is_fine() {
        let func = Function::new();
        assert!(verify_function(&func, &flags()).is_ok());
    }

    #[test]
    fn missing_terminator_is_caught() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        func.layout.append_block(block0);
        {
            let mut cur = FuncCursor::new(&mut func).at_bottom(block0);
            cur.ins().iconst(types::I32, 3);
        }
        let errors = verify_function(&func, &flags()).unwrap_err();
        assert!(errors
            .0
            .iter()
            .any(|e| e.message.contains("terminator")));
    }

    #[test]
    fn branch_arg_mismatch_is_caught() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        func.dfg.append_block_param(block1, types::I64);
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let v = cur.ins().iconst(types::I32, 1);
            cur.ins().jump(block1, &[v]);
            cur.insert_block(block1);
            cur.ins().return_(&[]);
        }
        let errors = verify_function(&func, &flags()).unwrap_err();
        assert!(errors.0.iter().any(|e| e.message.contains("branch argument")));
    }

    #[test]
    fn use_before_def_is_caught() {
        let mut sig = Signature::new(CallConv::SystemV);
        sig.returns.push(AbiParam::new(types::I32));
        let mut func = Function::with_name_signature(Default::default(), sig);
        let block0 = func.dfg.make_block();
        let block1 = func.dfg.make_block();
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            cur.ins().jump(block1, &[]);
            cur.insert_block(block1);
            cur.ins().return_(&[]);
        }
        // Create a value defined only in block1 and use it in block0.
        let v = {
            let mut cur = FuncCursor::new(&mut func).at_first_inst(block1);
            cur.ins().iconst(types::I32, 9)
        };
        let jump = func.layout.first_inst(block0).unwrap();
        // block0 now returns a value defined in block1.
        func.dfg.replace(jump).return_(&[v]);
        let errors = verify_function(&func, &flags()).unwrap_err();
        assert!(errors.0.iter().any(|e| e.message.contains("non-dominating")));
    }

    #[test]
    fn type_mismatch_is_caught() {
        let mut func = Function::new();
        let block0 = func.dfg.make_block();
        {
            let mut cur = FuncCursor::new(&mut func);
            cur.insert_block(block0);
            let a = cur.ins().iconst(types::I32, 1);
            let b = cur.ins().iconst(types::I64, 2);
            // Force an ill-typed add by splicing mismatched args.
            let bad = cur.ins().iadd(a, a);
            let bad_inst = cur.func.dfg.value_def(bad).unwrap_inst();
            cur.func.dfg.inst_args_mut(bad_inst)[1] = b;
            cur.ins().return_(&[]);
        }
        let errors = verify_function(&func, &flags()).unwrap_err();
        assert!(errors
            .0
            .iter()
            .any(|e| e.message.contains("operand/result types")));
    }
}
