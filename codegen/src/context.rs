//! Compilation context and main entry point.
//!
//! When compiling many small functions, it is important to avoid repeatedly
//! allocating and deallocating the data structures needed for compilation.
//! The `Context` struct is used to hold on to memory allocations between
//! function compilations.
//!
//! The context does not hold a `TargetIsa` instance which has to be provided
//! as an argument instead. This is because an ISA instance is immutable and
//! can be used by multiple compilation contexts concurrently. Typically, you
//! would have one context per compilation thread and only a single ISA
//! instance.

use crate::alias_analysis::AliasAnalysis;
use crate::copyprop::do_copy_propagation;
use crate::dce::do_dce;
use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::Function;
use crate::isa::TargetIsa;
use crate::licm::do_licm;
use crate::loop_analysis::LoopAnalysis;
use crate::machinst::CompiledCode;
use crate::nan_canonicalization::do_nan_canonicalization;
use crate::preopt::do_preopt;
use crate::result::CodegenResult;
use crate::sccp::do_sccp;
use crate::settings::{FlagsOrIsa, OptLevel};
use crate::simple_gvn::do_simple_gvn;
use crate::timing;
use crate::unreachable_code::eliminate_unreachable_code;
use crate::verifier::{verify_context, VerifierErrors, VerifierResult};

/// Bound on fixedpoint re-runs of the cheap cleanup passes. The rewrites
/// strictly reduce a measure of the function in practice; the bound is a
/// backstop.
const FIXEDPOINT_LIMIT: usize = 8;

/// Persistent data structures and compilation pipeline.
pub struct Context {
    /// The function we're compiling.
    pub func: Function,

    /// The control flow graph of `func`.
    pub cfg: ControlFlowGraph,

    /// Dominator tree for `func`.
    pub domtree: DominatorTree,

    /// Loop analysis of `func`.
    pub loop_analysis: LoopAnalysis,

    /// Result of the last compilation, if any.
    compiled_code: Option<CompiledCode>,
}

impl Context {
    /// Allocate a new compilation context.
    ///
    /// The returned instance should be reused for compiling multiple
    /// functions in order to avoid needless allocator thrashing.
    pub fn new() -> Self {
        Self::for_function(Function::new())
    }

    /// Allocate a new compilation context with an existing Function.
    pub fn for_function(func: Function) -> Self {
        Self {
            func,
            cfg: ControlFlowGraph::new(),
            domtree: DominatorTree::new(),
            loop_analysis: LoopAnalysis::new(),
            compiled_code: None,
        }
    }

    /// Clear all data structures in this context.
    pub fn clear(&mut self) {
        self.func.clear();
        self.cfg.clear();
        self.domtree.clear();
        self.loop_analysis.clear();
        self.compiled_code = None;
    }

    /// Returns the compilation result for this context, available after any
    /// `compile` function has been called.
    pub fn compiled_code(&self) -> Option<&CompiledCode> {
        self.compiled_code.as_ref()
    }

    /// Compile the function.
    ///
    /// Runs the function through every stage necessary to generate code for
    /// the target ISA represented by `isa`: verification, the mid-end
    /// optimizer at the configured level, lowering, register allocation,
    /// and emission.
    ///
    /// Returns information about the function's code and read-only data.
    pub fn compile(&mut self, isa: &dyn TargetIsa) -> CodegenResult<&CompiledCode> {
        let _tt = timing::compile();
        self.verify_if(isa)?;

        let opt_level = isa.flags().opt_level();
        debug!(
            "compiling (opt level {opt_level:?}):\n{}",
            self.func
        );

        self.compute_cfg();
        if opt_level != OptLevel::None {
            self.optimize(isa)?;
        } else {
            self.compute_domtree();
            self.eliminate_unreachable_code(isa)?;
        }

        self.func.dfg.resolve_all_aliases();
        self.verify_if(isa)?;

        let compiled = isa.compile_function(&self.func)?;
        Ok(self.compiled_code.insert(compiled))
    }

    /// Run the mid-end optimization pipeline. The CFG must be computed.
    fn optimize(&mut self, isa: &dyn TargetIsa) -> CodegenResult<()> {
        if isa.flags().enable_nan_canonicalization() {
            self.canonicalize_nans(isa)?;
        }

        self.sccp(isa)?;
        self.compute_cfg();
        self.compute_domtree();
        self.eliminate_unreachable_code(isa)?;
        self.compute_domtree();

        self.preopt(isa)?;
        self.compute_cfg();
        self.compute_domtree();
        self.compute_loop_analysis();
        self.licm(isa)?;

        self.compute_cfg();
        self.compute_domtree();
        self.simple_gvn(isa)?;
        self.dce(isa)?;
        self.copy_propagate(isa)?;

        self.compute_cfg();
        self.compute_domtree();
        self.replace_redundant_loads()?;
        self.simple_gvn(isa)?;

        // At the highest level, re-run the cheap cleanup passes until they
        // stop finding rewrites.
        if isa.flags().opt_level() == OptLevel::SpeedAndSize {
            for _ in 0..FIXEDPOINT_LIMIT {
                let changed = do_preopt(&mut self.func);
                self.compute_cfg();
                self.compute_domtree();
                self.dce(isa)?;
                self.copy_propagate(isa)?;
                self.compute_cfg();
                self.compute_domtree();
                self.simple_gvn(isa)?;
                if !changed {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Run the verifier on the function.
    ///
    /// Also check that the dominator tree and control flow graph are
    /// consistent with the function.
    pub fn verify<'a, FOI: Into<FlagsOrIsa<'a>>>(&self, fisa: FOI) -> VerifierResult<()> {
        let cfg = ControlFlowGraph::with_function(&self.func);
        let domtree = DominatorTree::with_function(&self.func, &cfg);
        let mut errors = VerifierErrors::default();
        let _ = verify_context(&self.func, &cfg, &domtree, fisa, &mut errors);
        errors.as_result()
    }

    /// Run the verifier only if the `enable_verifier` setting is true.
    pub fn verify_if<'a, FOI: Into<FlagsOrIsa<'a>>>(&self, fisa: FOI) -> CodegenResult<()> {
        let fisa = fisa.into();
        if fisa.flags.enable_verifier() {
            self.verify(fisa)?;
        }
        Ok(())
    }

    /// Perform constant propagation on the function.
    pub fn sccp<'a, FOI: Into<FlagsOrIsa<'a>>>(&mut self, fisa: FOI) -> CodegenResult<()> {
        do_sccp(&mut self.func);
        self.verify_if(fisa)
    }

    /// Perform pre-lowering peephole rewrites on the function.
    pub fn preopt<'a, FOI: Into<FlagsOrIsa<'a>>>(&mut self, fisa: FOI) -> CodegenResult<()> {
        do_preopt(&mut self.func);
        self.verify_if(fisa)
    }

    /// Perform NaN canonicalizing rewrites on the function.
    pub fn canonicalize_nans<'a, FOI: Into<FlagsOrIsa<'a>>>(
        &mut self,
        fisa: FOI,
    ) -> CodegenResult<()> {
        do_nan_canonicalization(&mut self.func);
        self.verify_if(fisa)
    }

    /// Compute the control flow graph.
    pub fn compute_cfg(&mut self) {
        self.cfg.compute(&self.func)
    }

    /// Compute the dominator tree.
    pub fn compute_domtree(&mut self) {
        self.domtree.compute(&self.func, &self.cfg)
    }

    /// Compute the loop analysis.
    pub fn compute_loop_analysis(&mut self) {
        self.loop_analysis
            .compute(&self.func, &self.cfg, &self.domtree)
    }

    /// Compute the control flow graph and dominator tree.
    pub fn flowgraph(&mut self) {
        self.compute_cfg();
        self.compute_domtree()
    }

    /// Perform simple GVN on the function.
    pub fn simple_gvn<'a, FOI: Into<FlagsOrIsa<'a>>>(&mut self, fisa: FOI) -> CodegenResult<()> {
        do_simple_gvn(&mut self.func, &mut self.domtree);
        self.verify_if(fisa)
    }

    /// Perform LICM on the function.
    pub fn licm<'a, FOI: Into<FlagsOrIsa<'a>>>(&mut self, fisa: FOI) -> CodegenResult<()> {
        do_licm(
            &mut self.func,
            &mut self.cfg,
            &mut self.domtree,
            &mut self.loop_analysis,
        );
        self.verify_if(fisa)
    }

    /// Perform dead-code elimination on the function.
    pub fn dce<'a, FOI: Into<FlagsOrIsa<'a>>>(&mut self, fisa: FOI) -> CodegenResult<()> {
        do_dce(&mut self.func, &mut self.domtree);
        self.verify_if(fisa)?;
        Ok(())
    }

    /// Perform copy propagation on the function.
    pub fn copy_propagate<'a, FOI: Into<FlagsOrIsa<'a>>>(
        &mut self,
        fisa: FOI,
    ) -> CodegenResult<()> {
        do_copy_propagation(&mut self.func, &self.cfg, &self.domtree);
        self.verify_if(fisa)
    }

    /// Perform unreachable code elimination.
    pub fn eliminate_unreachable_code<'a, FOI>(&mut self, fisa: FOI) -> CodegenResult<()>
    where
        FOI: Into<FlagsOrIsa<'a>>,
    {
        eliminate_unreachable_code(&mut self.func, &mut self.cfg);
        self.verify_if(fisa)
    }

    /// Replace all redundant loads with the known values in memory. These
    /// are loads whose values were already loaded by other loads earlier,
    /// as well as loads whose values were stored by a store instruction to
    /// the same location (store-to-load forwarding).
    pub fn replace_redundant_loads(&mut self) -> CodegenResult<()> {
        let mut analysis = AliasAnalysis::new(&self.func, &self.domtree);
        analysis.compute_and_update_aliases(&mut self.func);
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
