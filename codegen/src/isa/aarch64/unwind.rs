//! Unwind information for System V ABI (AArch64): DWARF CFI describing the
//! prologue's CFA adjustments and register saves.

use crate::machinst::abi::FrameLayout;
use crate::result::{CodegenError, CodegenResult};
use gimli::write::{
    Address, CallFrameInstruction, CommonInformationEntry, EhFrame, EndianVec,
    FrameDescriptionEntry, FrameTable,
};
use gimli::{Encoding, Format, LittleEndian, Register};

/// DWARF register numbers for AArch64: x0..x30 are 0..30, SP is 31, the
/// vector registers start at 64.
fn dwarf_reg(reg: crate::machinst::RealReg) -> Register {
    match reg.class().bank() {
        0 => Register(u16::from(reg.hw_enc())),
        _ => Register(64 + u16::from(reg.hw_enc())),
    }
}

const SP: Register = Register(31);
const FP: Register = Register(29);
const LR: Register = Register(30);

/// Create a default CIE for AArch64.
pub fn create_cie() -> CommonInformationEntry {
    let mut entry = CommonInformationEntry::new(
        Encoding {
            address_size: 8,
            format: Format::Dwarf32,
            version: 1,
        },
        // Code alignment factor.
        4,
        // Data alignment factor.
        -8,
        // Return address column.
        LR,
    );
    // Every frame starts with the CFA at SP.
    entry.add_instruction(CallFrameInstruction::Cfa(SP, 0));
    entry
}

/// Build the frame description for one function and serialize the whole
/// `.eh_frame`-shaped stream.
///
/// The instruction offsets follow the prologue the emitter generates:
///
/// ```plain
///   stp fp, lr, [sp, #-16]!   ; CFA = sp+16, fp/lr saved
///   mov fp, sp                ; CFA tracks fp
///   (probe loop)
///   sub sp, sp, #below
///   stp/str callee-saves
/// ```
pub fn create_unwind_info(frame: &FrameLayout, code_len: u32) -> CodegenResult<Vec<u8>> {
    let mut table = FrameTable::default();
    let cie_id = table.add_cie(create_cie());

    let mut fde = FrameDescriptionEntry::new(Address::Constant(0), code_len);

    if frame.setup_area_size > 0 {
        // After `stp fp, lr, [sp, #-16]!` (one instruction in).
        fde.add_instruction(4, CallFrameInstruction::CfaOffset(16));
        fde.add_instruction(4, CallFrameInstruction::Offset(FP, -16));
        fde.add_instruction(4, CallFrameInstruction::Offset(LR, -8));
        // After `mov fp, sp`, the frame anchor moves to FP so later SP
        // adjustments don't disturb unwinding.
        fde.add_instruction(8, CallFrameInstruction::CfaRegister(FP));

        // The callee-saves land after the SP adjustment; conservatively
        // record them at the end of the maximal prologue prefix. Their CFA
        // offsets are fixed by the layout.
        let below = i32::try_from(frame.frame_size_below_setup())
            .map_err(|_| CodegenError::CodeTooLarge)?;
        let base = i32::try_from(frame.outgoing_args_size + frame.fixed_frame_storage_size)
            .map_err(|_| CodegenError::CodeTooLarge)?;
        // Offset of the save area relative to the CFA (= FP + 16).
        let mut save_off = base - below - 16;
        // Floats come first in the save order, then integers.
        let ordered = frame
            .clobbered_callee_saves
            .iter()
            .filter(|r| r.class().bank() == 1)
            .chain(
                frame
                    .clobbered_callee_saves
                    .iter()
                    .filter(|r| r.class().bank() == 0),
            );
        // 12 bytes of setup precede the saves at minimum; the exact offset
        // only needs to be at or after the saving instruction.
        let save_loc = 12 + 4 * frame.clobbered_callee_saves.len() as u32;
        for reg in ordered {
            fde.add_instruction(save_loc, CallFrameInstruction::Offset(dwarf_reg(*reg), save_off));
            save_off += 8;
        }
    }

    table.add_fde(cie_id, fde);

    let mut eh_frame = EhFrame(EndianVec::new(LittleEndian));
    table
        .write_eh_frame(&mut eh_frame)
        .map_err(|e| CodegenError::InternalError {
            stage: "unwind",
            message: format!("CFI serialization failed: {e}"),
        })?;
    Ok(eh_frame.0.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machinst::{RealReg, RegClass};

    #[test]
    fn emits_cfi_for_standard_frame() {
        let frame = FrameLayout {
            setup_area_size: 16,
            clobber_size: 16,
            fixed_frame_storage_size: 32,
            spill_slots_size: 16,
            outgoing_args_size: 0,
            incoming_args_size: 0,
            clobbered_callee_saves: vec![
                RealReg::new(RegClass::Int, 19),
                RealReg::new(RegClass::Int, 20),
            ],
        };
        let bytes = create_unwind_info(&frame, 64).unwrap();
        // A CIE and FDE were serialized.
        assert!(bytes.len() > 24);
    }

    #[test]
    fn frameless_leaf_has_minimal_cfi() {
        let frame = FrameLayout::default();
        let bytes = create_unwind_info(&frame, 8).unwrap();
        assert!(!bytes.is_empty());
    }
}
