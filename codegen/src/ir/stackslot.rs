//! Stack slots.
//!
//! The `StackSlotData` struct keeps track of a single stack slot in a
//! function. The frame lowering assigns each slot a concrete offset from the
//! frame base once the callee-save set is known.

use crate::entity::PrimaryMap;
use crate::ir::StackSlot;
use core::fmt;

/// Map of stack slots declared in the function preamble.
pub type StackSlots = PrimaryMap<StackSlot, StackSlotData>;

/// The kind of a stack slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StackSlotKind {
    /// An explicit slot, allocated by the producer for function-local data.
    ExplicitSlot,
}

impl fmt::Display for StackSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::ExplicitSlot => f.write_str("explicit_slot"),
        }
    }
}

/// Contents of a stack slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StackSlotData {
    /// The kind of stack slot.
    pub kind: StackSlotKind,

    /// Size of stack slot in bytes.
    pub size: u32,

    /// Alignment of the stack slot as a power-of-two exponent.
    ///
    /// The frame layout honors this up to the stack alignment of the
    /// calling convention (16 bytes); larger requests are an error caught by
    /// the verifier.
    pub align_shift: u8,
}

impl StackSlotData {
    /// Create a stack slot with the specified byte size and alignment.
    pub fn new(kind: StackSlotKind, size: u32, align_shift: u8) -> Self {
        Self {
            kind,
            size,
            align_shift,
        }
    }

    /// The alignment of the slot in bytes.
    pub fn align(&self) -> u32 {
        1 << self.align_shift
    }
}

impl fmt::Display for StackSlotData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.align_shift != 0 {
            write!(
                f,
                "{} {}, align = {}",
                self.kind,
                self.size,
                self.align()
            )
        } else {
            write!(f, "{} {}", self.kind, self.size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let slot = StackSlotData::new(StackSlotKind::ExplicitSlot, 8, 0);
        assert_eq!(slot.to_string(), "explicit_slot 8");
        let aligned = StackSlotData::new(StackSlotKind::ExplicitSlot, 24, 4);
        assert_eq!(aligned.to_string(), "explicit_slot 24, align = 16");
    }
}
