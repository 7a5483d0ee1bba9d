//! ABI definitions shared by all targets: where arguments and return values
//! live, and how the frame is laid out.
//!
//! The target's `abi` module classifies signatures into these types; the
//! lowering driver consumes them to bind entry-block parameters and marshal
//! call arguments, and the emitter consumes the frame layout to generate the
//! prologue and epilogue.

use crate::ir::{ArgumentExtension, ArgumentPurpose, Type};
use crate::machinst::reg::RealReg;
use smallvec::SmallVec;

/// Are we computing information about arguments or return values? Much of
/// the handling is factored out into common routines; this enum allows us to
/// distinguish which case we're handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgsOrRets {
    /// Arguments.
    Args,
    /// Return values.
    Rets,
}

/// One register or stack slot holding (part of) an ABI value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ABIArgSlot {
    /// In a real register.
    Reg {
        /// Register that holds this arg.
        reg: RealReg,
        /// Value type of this arg.
        ty: Type,
        /// Should the value be extended when loaded into a register?
        extension: ArgumentExtension,
    },
    /// Arguments only: on the stack, at the given offset from SP at entry.
    Stack {
        /// Offset of this arg relative to the base of stack args.
        offset: i64,
        /// Value type of this arg.
        ty: Type,
        /// Should the value be extended before storing?
        extension: ArgumentExtension,
    },
}

/// An ABI-level argument or return value: one or more slots (a 128-bit
/// integer takes two), or a struct passed by reference into the argument
/// area.
#[derive(Clone, Debug)]
pub enum ABIArg {
    /// Storage slots (registers or stack locations) for the argument.
    Slots {
        /// Slots, one per register part of the value.
        slots: SmallVec<[ABIArgSlot; 2]>,
        /// The purpose of this arg.
        purpose: ArgumentPurpose,
    },
    /// Structure argument: a pointer to the in-memory copy in the caller's
    /// outgoing argument area.
    StructArg {
        /// Offset of the struct body in the argument area.
        offset: i64,
        /// Size of the struct body.
        size: u64,
        /// Register or stack slot holding the pointer, when the convention
        /// passes one.
        pointer: Option<ABIArgSlot>,
    },
}

impl ABIArg {
    /// Create an ABIArg from one register slot.
    pub fn reg(reg: RealReg, ty: Type, extension: ArgumentExtension, purpose: ArgumentPurpose) -> Self {
        Self::Slots {
            slots: smallvec::smallvec![ABIArgSlot::Reg { reg, ty, extension }],
            purpose,
        }
    }

    /// Create an ABIArg from one stack slot.
    pub fn stack(offset: i64, ty: Type, extension: ArgumentExtension, purpose: ArgumentPurpose) -> Self {
        Self::Slots {
            slots: smallvec::smallvec![ABIArgSlot::Stack { offset, ty, extension }],
            purpose,
        }
    }
}

/// A classified signature: argument and return locations plus stack space
/// requirements.
#[derive(Clone, Debug)]
pub struct SigData {
    /// Classified arguments.
    pub args: Vec<ABIArg>,
    /// Classified return values.
    pub rets: Vec<ABIArg>,
    /// Space for stack-passed arguments, 16-byte aligned.
    pub sized_stack_arg_space: u32,
    /// Space for stack-passed return values.
    pub sized_stack_ret_space: u32,
    /// Index in `args` of the pointer to the return-value area, when the
    /// return values do not fit in registers.
    pub stack_ret_arg: Option<usize>,
    /// The calling convention.
    pub call_conv: crate::isa::CallConv,
}

/// The layout of a function frame, fixed once register allocation has
/// decided the clobbered callee-saves and the spill area size.
///
/// From higher addresses to lower:
///
/// ```plain
///   incoming stack arguments     (caller owned)
///   saved FP, LR pair            <- FP points at the saved FP
///   callee-saved integer regs
///   callee-saved float regs
///   stack slots + spill slots
///   outgoing call arguments      <- SP
/// ```
#[derive(Clone, Debug, Default)]
pub struct FrameLayout {
    /// Size of the FP/LR setup area (16, or 0 for leaf functions that need
    /// no frame).
    pub setup_area_size: u32,
    /// Size of the callee-save area, 16-byte aligned.
    pub clobber_size: u32,
    /// Size of stack slots plus spill slots.
    pub fixed_frame_storage_size: u32,
    /// The portion of the fixed storage holding register-allocator spill
    /// slots; they sit below the IR stack slots.
    pub spill_slots_size: u32,
    /// Size of the outgoing argument area.
    pub outgoing_args_size: u32,
    /// Size of incoming stack-passed arguments (above the frame).
    pub incoming_args_size: u32,
    /// The callee-saved registers this function actually clobbers, integer
    /// registers first.
    pub clobbered_callee_saves: Vec<RealReg>,
}

impl FrameLayout {
    /// The frame size below the FP/LR pair: what the prologue subtracts from
    /// SP after saving FP/LR.
    pub fn frame_size_below_setup(&self) -> u32 {
        self.clobber_size + self.fixed_frame_storage_size + self.outgoing_args_size
    }

    /// Total frame size including the setup area.
    pub fn total_frame_size(&self) -> u32 {
        self.setup_area_size + self.frame_size_below_setup()
    }

    /// Offset from SP (after the prologue) to the base of the spill/slot
    /// storage area.
    pub fn spill_base_offset(&self) -> u32 {
        self.outgoing_args_size
    }
}
