//! AArch64 ISA definitions: instruction arguments.

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::Type;
use crate::isa::aarch64::inst::imms::{SImm7Scaled, SImm9, UImm12Scaled};
use crate::machinst::{MachLabel, Reg};

/// The size of an operand: 32 or 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandSize {
    /// 32-bit (W registers).
    Size32,
    /// 64-bit (X registers).
    Size64,
}

impl OperandSize {
    /// The operand size to use for a value of the given type. Narrow
    /// integers compute in 32-bit registers.
    pub fn from_ty(ty: Type) -> Self {
        if ty.bits() <= 32 {
            Self::Size32
        } else {
            Self::Size64
        }
    }

    /// The `sf` bit of most integer instructions.
    pub fn sf_bit(self) -> u32 {
        match self {
            Self::Size32 => 0,
            Self::Size64 => 1,
        }
    }

    /// Is this the 32-bit size?
    pub fn is32(self) -> bool {
        self == Self::Size32
    }

    /// Width in bits.
    pub fn bits(self) -> u32 {
        match self {
            Self::Size32 => 32,
            Self::Size64 => 64,
        }
    }
}

/// The size of a scalar floating point operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarSize {
    /// 32-bit (S registers).
    Size32,
    /// 64-bit (D registers).
    Size64,
}

impl ScalarSize {
    /// The scalar size for a float type.
    pub fn from_ty(ty: Type) -> Self {
        match ty.bits() {
            32 => Self::Size32,
            64 => Self::Size64,
            bits => panic!("unexpected float width {bits}"),
        }
    }

    /// The `ftype` field of scalar FP instructions.
    pub fn ftype(self) -> u32 {
        match self {
            Self::Size32 => 0b00,
            Self::Size64 => 0b01,
        }
    }
}

/// A shift operator for a register or immediate.
#[derive(Clone, Copy, Debug)]
#[repr(u8)]
pub enum ShiftOp {
    /// Logical shift left.
    LSL = 0b00,
    /// Logical shift right.
    LSR = 0b01,
    /// Arithmetic shift right.
    ASR = 0b10,
    /// Rotate right.
    ROR = 0b11,
}

impl ShiftOp {
    /// Get the encoding of this shift op.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// A shift operator with an amount, guaranteed in range.
#[derive(Clone, Copy, Debug)]
pub struct ShiftOpAndAmt {
    op: ShiftOp,
    shift: u8,
}

impl ShiftOpAndAmt {
    /// Maximum shift for shifted-register operands.
    pub const MAX_SHIFT: u64 = 63;

    /// Create a new shift operand, when in range.
    pub fn maybe_new(op: ShiftOp, shift: u64) -> Option<ShiftOpAndAmt> {
        if shift <= Self::MAX_SHIFT {
            Some(ShiftOpAndAmt {
                op,
                shift: shift as u8,
            })
        } else {
            None
        }
    }

    /// Get the shift op.
    pub fn op(&self) -> ShiftOp {
        self.op
    }

    /// Get the shift amount.
    pub fn amt(&self) -> u8 {
        self.shift
    }
}

/// An extend operator for a register.
#[derive(Clone, Copy, Debug)]
#[repr(u8)]
pub enum ExtendOp {
    /// Unsigned extend byte.
    UXTB = 0b000,
    /// Unsigned extend halfword.
    UXTH = 0b001,
    /// Unsigned extend word.
    UXTW = 0b010,
    /// Unsigned extend doubleword (no-op).
    UXTX = 0b011,
    /// Signed extend byte.
    SXTB = 0b100,
    /// Signed extend halfword.
    SXTH = 0b101,
    /// Signed extend word.
    SXTW = 0b110,
    /// Signed extend doubleword (no-op).
    SXTX = 0b111,
}

impl ExtendOp {
    /// Encoding of this op.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// A reference to some memory address.
#[derive(Clone, Copy, Debug)]
pub enum MemLabel {
    /// A value in a constant pool, to be emitted into an island; addressed
    /// PC-relative through the label.
    Mach(MachLabel),
}

/// A memory argument to load/store, encapsulating the possible addressing
/// modes.
#[derive(Clone, Copy, Debug)]
pub enum AMode {
    /// PC-relative addressing of a nearby label (constant pool entry).
    Label(MemLabel),

    /// Unscaled signed 9-bit immediate offset from a register.
    Unscaled(Reg, SImm9),

    /// Scaled (by the access size) unsigned 12-bit immediate offset from a
    /// register.
    UnsignedOffset(Reg, UImm12Scaled),

    /// Register plus register offset.
    RegReg(Reg, Reg),

    /// Register plus register offset, scaled by the access size.
    RegScaled(Reg, Reg, Type),

    /// Register plus register offset, scaled, with the index sign- or
    /// zero-extended first.
    RegScaledExtended(Reg, Reg, Type, ExtendOp),

    /// Offset from the stack pointer. Lowered into a real mode at emission.
    SPOffset(i64),

    /// Offset from the frame pointer. Lowered into a real mode at emission.
    FPOffset(i64),

    /// Offset into the register-allocator spill area. Resolved against the
    /// frame layout at emission.
    SlotOffset(i64),

    /// Offset into the IR stack-slot storage, which sits just above the
    /// spill area. Resolved against the frame layout at emission.
    StackSlotOffset(i64),

    /// Offset into the incoming (caller-pushed) argument area.
    IncomingArg(i64),
}

impl AMode {
    /// Memory reference using an address in a register with no offset.
    pub fn reg(reg: Reg) -> AMode {
        AMode::UnsignedOffset(reg, UImm12Scaled::zero(crate::ir::types::I64))
    }

    /// Memory reference using an address in a register and an offset, if
    /// representable.
    pub fn reg_maybe_offset(reg: Reg, offset: i64, access_ty: Type) -> Option<AMode> {
        if offset == 0 {
            Some(AMode::reg(reg))
        } else if let Some(simm9) = SImm9::maybe_from_i64(offset) {
            Some(AMode::Unscaled(reg, simm9))
        } else if let Some(uimm12) = UImm12Scaled::maybe_from_i64(offset, access_ty) {
            Some(AMode::UnsignedOffset(reg, uimm12))
        } else {
            None
        }
    }
}

/// A memory argument to a load/store-pair.
#[derive(Clone, Copy, Debug)]
pub enum PairAMode {
    /// Signed, scaled 7-bit offset from a register.
    SignedOffset(Reg, SImm7Scaled),
    /// Pre-indexed (decrement-before) off the stack pointer; the prologue's
    /// `stp fp, lr, [sp, #-N]!` form.
    SPPreIndexed(SImm7Scaled),
    /// Post-indexed (increment-after) off the stack pointer.
    SPPostIndexed(SImm7Scaled),
}

/// Condition for conditional branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    /// Equal.
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Unsigned higher or same (carry set).
    Hs = 2,
    /// Unsigned lower (carry clear).
    Lo = 3,
    /// Minus, negative.
    Mi = 4,
    /// Plus, positive or zero.
    Pl = 5,
    /// Signed overflow.
    Vs = 6,
    /// No signed overflow.
    Vc = 7,
    /// Unsigned higher.
    Hi = 8,
    /// Unsigned lower or same.
    Ls = 9,
    /// Signed greater or equal.
    Ge = 10,
    /// Signed less than.
    Lt = 11,
    /// Signed greater than.
    Gt = 12,
    /// Signed less or equal.
    Le = 13,
    /// Always executed.
    Al = 14,
    /// Always executed (yes, twice).
    Nv = 15,
}

impl Cond {
    /// Return the inverted condition.
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Hs => Cond::Lo,
            Cond::Lo => Cond::Hs,
            Cond::Mi => Cond::Pl,
            Cond::Pl => Cond::Mi,
            Cond::Vs => Cond::Vc,
            Cond::Vc => Cond::Vs,
            Cond::Hi => Cond::Ls,
            Cond::Ls => Cond::Hi,
            Cond::Ge => Cond::Lt,
            Cond::Lt => Cond::Ge,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
            Cond::Al => Cond::Nv,
            Cond::Nv => Cond::Al,
        }
    }

    /// Return the machine encoding of this condition.
    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// Translate an integer condition code to an AArch64 condition.
pub fn cond_from_intcc(cc: IntCC) -> Cond {
    match cc {
        IntCC::Equal => Cond::Eq,
        IntCC::NotEqual => Cond::Ne,
        IntCC::SignedGreaterThanOrEqual => Cond::Ge,
        IntCC::SignedGreaterThan => Cond::Gt,
        IntCC::SignedLessThanOrEqual => Cond::Le,
        IntCC::SignedLessThan => Cond::Lt,
        IntCC::UnsignedGreaterThanOrEqual => Cond::Hs,
        IntCC::UnsignedGreaterThan => Cond::Hi,
        IntCC::UnsignedLessThanOrEqual => Cond::Ls,
        IntCC::UnsignedLessThan => Cond::Lo,
    }
}

/// Translate a float condition code to an AArch64 condition, given the NZCV
/// semantics of `fcmp`.
pub fn cond_from_floatcc(cc: FloatCC) -> Cond {
    match cc {
        FloatCC::Ordered => Cond::Vc,
        FloatCC::Unordered => Cond::Vs,
        FloatCC::Equal => Cond::Eq,
        FloatCC::NotEqual | FloatCC::OrderedNotEqual => Cond::Ne,
        FloatCC::LessThan => Cond::Mi,
        FloatCC::LessThanOrEqual => Cond::Ls,
        FloatCC::GreaterThan => Cond::Gt,
        FloatCC::GreaterThanOrEqual => Cond::Ge,
        FloatCC::UnorderedOrLessThan => Cond::Lt,
        FloatCC::UnorderedOrLessThanOrEqual => Cond::Le,
        FloatCC::UnorderedOrGreaterThan => Cond::Hi,
        FloatCC::UnorderedOrGreaterThanOrEqual => Cond::Hs,
        FloatCC::UnorderedOrEqual => {
            // No single condition captures EQ|UN; callers lower this case
            // with an explicit two-test sequence before reaching here.
            panic!("UnorderedOrEqual must be lowered as a compound test")
        }
    }
}

/// The kind of conditional branch: the common-case-optimized "reg is zero" /
/// "reg is nonzero" variants, or the generic one that tests the machine
/// condition codes.
#[derive(Clone, Copy, Debug)]
pub enum CondBrKind {
    /// Condition: given register is zero.
    Zero(Reg, OperandSize),
    /// Condition: given register is nonzero.
    NotZero(Reg, OperandSize),
    /// Condition: the given condition-code test is true.
    Cond(Cond),
}

impl CondBrKind {
    /// Return the inverted branch condition.
    pub fn invert(self) -> CondBrKind {
        match self {
            CondBrKind::Zero(reg, size) => CondBrKind::NotZero(reg, size),
            CondBrKind::NotZero(reg, size) => CondBrKind::Zero(reg, size),
            CondBrKind::Cond(c) => CondBrKind::Cond(c.invert()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cond_inversion_is_involutive() {
        for i in 0..16u8 {
            // Transmute-free: go through the constructor table.
            let cond = match i {
                0 => Cond::Eq,
                1 => Cond::Ne,
                2 => Cond::Hs,
                3 => Cond::Lo,
                4 => Cond::Mi,
                5 => Cond::Pl,
                6 => Cond::Vs,
                7 => Cond::Vc,
                8 => Cond::Hi,
                9 => Cond::Ls,
                10 => Cond::Ge,
                11 => Cond::Lt,
                12 => Cond::Gt,
                13 => Cond::Le,
                14 => Cond::Al,
                _ => Cond::Nv,
            };
            assert_eq!(cond.invert().invert(), cond);
            assert_eq!(cond.bits(), i as u32);
        }
    }

    #[test]
    fn intcc_translation() {
        assert_eq!(cond_from_intcc(IntCC::SignedLessThan), Cond::Lt);
        assert_eq!(cond_from_intcc(IntCC::UnsignedGreaterThan), Cond::Hi);
        assert_eq!(cond_from_intcc(IntCC::Equal), Cond::Eq);
    }
}
