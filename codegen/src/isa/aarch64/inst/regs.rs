//! AArch64 ISA definitions: registers.

use crate::isa::CallConv;
use crate::machinst::regalloc::MachineEnv;
use crate::machinst::{RealReg, Reg, RegClass, Writable};

/// Get a reference to an X-register (integer register).
pub fn xreg(num: u8) -> Reg {
    assert!(num < 31);
    RealReg::new(RegClass::Int, num).into()
}

/// Get a writable reference to an X-register.
pub fn writable_xreg(num: u8) -> Writable<Reg> {
    Writable::from_reg(xreg(num))
}

/// Get a reference to a V-register (vector/FP register).
pub fn vreg(num: u8) -> Reg {
    assert!(num < 32);
    RealReg::new(RegClass::Float, num).into()
}

/// Get a writable reference to a V-register.
pub fn writable_vreg(num: u8) -> Writable<Reg> {
    Writable::from_reg(vreg(num))
}

/// Get a reference to the zero-register.
///
/// XZR and SP share hardware encoding 31; which one an instruction means is
/// context-dependent, so the encoders take the distinction from the
/// instruction, not the register. We give the zero register encoding 31.
pub fn zero_reg() -> Reg {
    RealReg::new(RegClass::Int, 31).into()
}

/// Get a writable reference to the zero-register, to discard a result.
pub fn writable_zero_reg() -> Writable<Reg> {
    Writable::from_reg(zero_reg())
}

/// Get a reference to the stack-pointer register.
pub fn stack_reg() -> Reg {
    // Encoded identically to XZR; the emitter knows from the instruction
    // which is meant.
    RealReg::new(RegClass::Int, 31).into()
}

/// Get a writable reference to the stack-pointer register.
pub fn writable_stack_reg() -> Writable<Reg> {
    Writable::from_reg(stack_reg())
}

/// Get a reference to the link register (x30).
pub fn link_reg() -> Reg {
    xreg(30)
}

/// Get a writable reference to the link register.
pub fn writable_link_reg() -> Writable<Reg> {
    Writable::from_reg(link_reg())
}

/// Get a reference to the frame pointer (x29).
pub fn fp_reg() -> Reg {
    xreg(29)
}

/// Get a writable reference to the frame pointer.
pub fn writable_fp_reg() -> Writable<Reg> {
    Writable::from_reg(fp_reg())
}

/// Get a reference to the first temporary, sometimes "spill temporary",
/// register. This register is excluded from allocation and used when an
/// address computation needs a scratch register (spill-slot offsets beyond
/// the immediate range, overflowing constants).
///
/// We use x16, aka IP0 in the AArch64 ABI: a scratch register that linker
/// veneers may also use, which is fine as long as it never lives across a
/// call.
pub fn spilltmp_reg() -> Reg {
    xreg(16)
}

/// Get a writable reference to the spill temporary.
pub fn writable_spilltmp_reg() -> Writable<Reg> {
    Writable::from_reg(spilltmp_reg())
}

/// Get a reference to the second temporary register (x17, aka IP1), for the
/// cases that need two scratch registers at once.
pub fn tmp2_reg() -> Reg {
    xreg(17)
}

/// Get a writable reference to the second temporary.
pub fn writable_tmp2_reg() -> Writable<Reg> {
    Writable::from_reg(tmp2_reg())
}

/// Build the allocatable-register environment for the given calling
/// convention.
///
/// Excluded outright: x16/x17 (scratch, see above), x18 (platform register
/// on Apple targets; excluded everywhere for simplicity of cross-target
/// output), x29 (FP), x30 (LR), x31 (SP/XZR). Preference order puts
/// caller-saved temporaries first so short-lived values avoid forcing
/// callee-save spills.
pub fn machine_env(call_conv: CallConv) -> MachineEnv {
    let mut int_regs = Vec::new();
    // x9..x15: pure temporaries.
    for i in 9..=15u8 {
        int_regs.push(RealReg::new(RegClass::Int, i));
    }
    // x0..x8: argument/result registers, usable between calls.
    for i in 0..=8u8 {
        int_regs.push(RealReg::new(RegClass::Int, i));
    }
    // x19..x28: callee-saved.
    for i in 19..=28u8 {
        int_regs.push(RealReg::new(RegClass::Int, i));
    }

    let mut float_regs = Vec::new();
    // v16..v31: temporaries.
    for i in 16..=31u8 {
        float_regs.push(RealReg::new(RegClass::Float, i));
    }
    // v0..v7: argument/result registers.
    for i in 0..=7u8 {
        float_regs.push(RealReg::new(RegClass::Float, i));
    }
    // v8..v15: callee-saved (low 64 bits).
    for i in 8..=15u8 {
        float_regs.push(RealReg::new(RegClass::Float, i));
    }

    let mut callee_saves = Vec::new();
    for i in 19..=28u8 {
        callee_saves.push(RealReg::new(RegClass::Int, i));
    }
    for i in 8..=15u8 {
        callee_saves.push(RealReg::new(RegClass::Float, i));
    }

    let _ = call_conv;
    MachineEnv {
        int_regs,
        float_regs,
        callee_saves,
    }
}

/// The registers a call under the given convention may clobber: everything
/// not callee-saved (and not otherwise reserved).
pub fn call_clobbers(call_conv: CallConv) -> crate::machinst::RealRegSet {
    let mut set = crate::machinst::RealRegSet::empty();
    for i in 0..=15u8 {
        set.insert(RealReg::new(RegClass::Int, i));
    }
    if !call_conv.reserves_x18() {
        set.insert(RealReg::new(RegClass::Int, 18));
    }
    set.insert(RealReg::new(RegClass::Int, 30));
    for i in 0..=7u8 {
        set.insert(RealReg::new(RegClass::Float, i));
    }
    for i in 16..=31u8 {
        set.insert(RealReg::new(RegClass::Float, i));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_regs_not_allocatable() {
        let env = machine_env(CallConv::SystemV);
        for reserved in [16u8, 17, 18, 29, 30, 31] {
            assert!(
                !env.int_regs
                    .iter()
                    .any(|r| r.hw_enc() == reserved && r.class() == RegClass::Int),
                "x{reserved} must not be allocatable"
            );
        }
        assert_eq!(env.int_regs.len(), 7 + 9 + 10);
        assert_eq!(env.float_regs.len(), 32);
    }

    #[test]
    fn callee_saves_cover_aapcs64() {
        let env = machine_env(CallConv::SystemV);
        assert!(env
            .callee_saves
            .contains(&RealReg::new(RegClass::Int, 19)));
        assert!(env
            .callee_saves
            .contains(&RealReg::new(RegClass::Float, 8)));
        assert!(!env.callee_saves.contains(&RealReg::new(RegClass::Int, 0)));
    }
}
