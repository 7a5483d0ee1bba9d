//! Pass timing.
//!
//! Every pass opens with `let _tt = timing::<pass>();`. The returned token
//! records elapsed time into a thread-local accumulator when dropped, so
//! nested passes attribute their time to the innermost active pass only.
//! Collect the table with [`take_current`] and print it with its `Display`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::time::{Duration, Instant};

// Each pass gets a numbered descriptor and a constructor function of the same
// name returning the timing token.
macro_rules! define_passes {
    ($($idx:expr, $pass:ident, $desc:expr;)+) => {
        /// A single compilation pass, for timing attribution.
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum Pass {
            $(#[doc = $desc] $pass = $idx,)+
            /// No active pass.
            None,
        }

        const NUM_PASSES: usize = Pass::None as usize;

        const PASS_DESCRIPTIONS: [&str; NUM_PASSES] = [$($desc,)+];

        impl Pass {
            fn description(self) -> &'static str {
                match self {
                    $(Pass::$pass => $desc,)+
                    Pass::None => "<no pass>",
                }
            }
        }

        $(
            #[doc = $desc]
            pub fn $pass() -> TimingToken {
                start_pass(Pass::$pass)
            }
        )+
    }
}

define_passes! {
    0, compile, "Compilation passes";
    1, verifier, "Verify IR";
    2, flowgraph, "Control flow graph";
    3, domtree, "Dominator tree";
    4, loop_analysis, "Loop analysis";
    5, sccp, "Conditional constant propagation";
    6, preopt, "Pre-lowering peephole rewrites";
    7, licm, "Loop invariant code motion";
    8, gvn, "Global value numbering";
    9, dce, "Dead code elimination";
    10, unreachable_code, "Remove unreachable blocks";
    11, copy_propagation, "Copy propagation";
    12, alias_analysis, "Alias analysis and load elimination";
    13, nan_canonicalization, "NaN canonicalization";
    14, layout_renumber, "Layout full renumbering";
    15, vcode_lower, "Lowering to machine instructions";
    16, regalloc, "Register allocation";
    17, vcode_emit, "Machine code emission";
    18, unwind_emit, "Unwind info generation";
}

thread_local! {
    static CURRENT_PASS: Cell<Pass> = const { Cell::new(Pass::None) };
    static PASS_TIME: RefCell<PassTimes> = RefCell::new(PassTimes::default());
}

/// A timing token: the active pass and the moment it became active.
pub struct TimingToken {
    start: Instant,
    prev: Pass,
}

/// Start timing `pass`, suspending whichever pass was active.
fn start_pass(pass: Pass) -> TimingToken {
    let prev = CURRENT_PASS.with(|p| p.replace(pass));
    trace!("timing: starting {:?}, (during {:?})", pass, prev);
    TimingToken {
        start: Instant::now(),
        prev,
    }
}

impl Drop for TimingToken {
    fn drop(&mut self) {
        let pass = CURRENT_PASS.with(|p| p.replace(self.prev));
        trace!("timing: ending {:?}", pass);
        let elapsed = self.start.elapsed();
        PASS_TIME.with(|t| t.borrow_mut().pass[pass as usize] += elapsed);
    }
}

/// Accumulated time per pass.
#[derive(Clone)]
pub struct PassTimes {
    pass: [Duration; NUM_PASSES],
}

impl Default for PassTimes {
    fn default() -> Self {
        Self {
            pass: [Duration::ZERO; NUM_PASSES],
        }
    }
}

impl fmt::Display for PassTimes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "======== ========  ==================================")?;
        writeln!(f, "   Total     Pass")?;
        writeln!(f, "-------- --------  ----------------------------------")?;
        for (idx, time) in self.pass.iter().enumerate() {
            if *time != Duration::ZERO {
                writeln!(
                    f,
                    "{:8.3}           {}",
                    time.as_secs_f64(),
                    PASS_DESCRIPTIONS[idx]
                )?;
            }
        }
        writeln!(f, "======== ========  ==================================")
    }
}

/// Take the current accumulated pass timings, resetting them to zero.
pub fn take_current() -> PassTimes {
    PASS_TIME.with(|t| std::mem::take(&mut *t.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_restores_outer_pass() {
        let _t0 = compile();
        assert_eq!(CURRENT_PASS.with(|p| p.get()), Pass::compile);
        {
            let _t1 = verifier();
            assert_eq!(CURRENT_PASS.with(|p| p.get()), Pass::verifier);
        }
        assert_eq!(CURRENT_PASS.with(|p| p.get()), Pass::compile);
    }

    #[test]
    fn descriptions() {
        assert_eq!(Pass::dce.description(), "Dead code elimination");
        assert_eq!(Pass::None.description(), "<no pass>");
    }
}
