//! This module exposes the machine-specific backend definition pieces.
//!
//! The IR compilation pipeline ends with lowering into *machine
//! instructions* (`MachInst`s): target-specific instruction types that still
//! operate on virtual registers. The `machinst` module owns everything that
//! happens after lowering starts:
//!
//! - [`VCode`](vcode::VCode) is the container of lowered instructions,
//!   organized into final basic-block order;
//! - the register allocator replaces virtual registers with real ones and
//!   assigns spill slots;
//! - [`MachBuffer`](buffer::MachBuffer) receives the encoded bytes along
//!   with labels, fixups, traps and relocations, and finalizes them into a
//!   [`CompiledCode`] artifact.

use crate::ir::{ExternalName, TrapCode, Type};
use crate::result::CodegenResult;
use core::fmt::Debug;

pub mod abi;
pub mod buffer;
pub mod lower;
pub mod reg;
pub mod regalloc;
pub mod vcode;

pub use abi::*;
pub use buffer::*;
pub use lower::*;
pub use reg::*;
pub use vcode::*;

/// A machine instruction.
pub trait MachInst: Clone + Debug {
    /// The kinds of label references this machine supports.
    type LabelUse: MachInstLabelUse;

    /// Report every register this instruction touches.
    fn get_operands(&self, collector: &mut OperandCollector);

    /// Rewrite every register slot through `map`, applying the allocator's
    /// assignment.
    fn map_regs(&mut self, map: &mut dyn FnMut(Reg) -> Reg);

    /// If this is a simple register-to-register move, return the
    /// (destination, source) pair.
    fn is_move(&self) -> Option<(Writable<Reg>, Reg)>;

    /// What kind of terminator is this instruction, if any?
    fn is_term(&self) -> MachTerminator;

    /// Generate a move instruction.
    fn gen_move(dst: Writable<Reg>, src: Reg, ty: Type) -> Self;

    /// Generate an unconditional jump to `target`.
    fn gen_jump(target: MachLabel) -> Self;

    /// Generate a no-op of zero size.
    fn gen_nop() -> Self;

    /// The register class used for values of the given type.
    fn rc_for_type(ty: Type) -> CodegenResult<RegClass>;

    /// The worst-case encoded size of one instruction, used to budget
    /// island placement.
    fn worst_case_size() -> u32;
}

/// The terminator shape of an instruction, from the perspective of block
/// layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachTerminator {
    /// Not a terminator.
    None,
    /// A return.
    Ret,
    /// An unconditional branch to one target.
    Uncond(MachLabel),
    /// A conditional branch: (taken, not taken).
    Cond(MachLabel, MachLabel),
    /// An indirect branch (jump table dispatch); targets listed.
    Indirect(Vec<MachLabel>),
    /// A call with normal and exceptional continuations.
    TryCall(MachLabel, MachLabel),
}

/// A relocation kind, target-defined but shared through this enum so the
/// artifact type is machine-independent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reloc {
    /// An absolute 8-byte pointer.
    Abs8,
    /// AArch64 B/BL: 26-bit PC-relative word offset.
    Call26,
    /// AArch64 ADRP: page (4 KiB) PC-relative, 21 bits.
    AdrpPage21,
    /// AArch64 ADD immediate: low 12 bits of a symbol address.
    AddLo12,
    /// AArch64 LDR immediate: low 12 bits, scaled by access size.
    LdrLo12,
    /// GOT entry page address.
    GotPage21,
    /// GOT entry low 12 bits for a load.
    GotLo12,
    /// TLSDESC page address.
    TlsDescAdrPage21,
    /// TLSDESC low-12 load.
    TlsDescLdLo12,
    /// TLSDESC low-12 add.
    TlsDescAddLo12,
    /// Marker on the TLSDESC indirect call for linker relaxation.
    TlsDescCall,
    /// AArch64 TLS local-exec ADD immediate: high 12 bits of tprel offset.
    TlsLeAddHi12,
    /// AArch64 TLS local-exec ADD immediate: low 12 bits of tprel offset.
    TlsLeAddLo12,
}

/// A relocation resulting from a compilation.
#[derive(Clone, Debug, PartialEq)]
pub struct MachReloc {
    /// The offset at which the relocation applies, *relative to the
    /// containing section*.
    pub offset: u32,
    /// The kind of relocation.
    pub kind: Reloc,
    /// The external symbol / name to which this relocation refers.
    pub name: ExternalName,
    /// The addend to add to the symbol value.
    pub addend: i64,
}

/// A trap record resulting from a compilation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MachTrap {
    /// The offset at which the trap instruction occurs.
    pub offset: u32,
    /// The trap code.
    pub code: TrapCode,
}

/// A call site record: the extent of the call sequence and, for exception-
/// bearing calls, the landing pad.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MachCallSite {
    /// The offset of the call's return address.
    pub ret_addr: u32,
    /// Offset of the landing pad, when the call has an exception edge.
    pub exception_handler: Option<u32>,
}

/// A stack map record. Carried for API shape; reference-typed values are
/// outside this core, so the table stays empty.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MachStackMap {
    /// The offset of the instruction the map describes.
    pub offset: u32,
}

/// The result of compiling one function: code bytes plus everything a
/// linker or JIT needs to install them.
#[derive(Debug)]
pub struct CompiledCode {
    /// The finalized machine code buffer.
    pub buffer: MachBufferFinalized,
    /// Size of stack frame, in bytes.
    pub frame_size: u32,
    /// Byte offset of every lowered basic block start.
    pub bb_starts: Vec<u32>,
    /// (from, to) offset pairs for every inter-block edge.
    pub bb_edges: Vec<(u32, u32)>,
    /// DWARF CFI unwind information, when requested.
    pub unwind_info: Option<Vec<u8>>,
    /// The language-specific data area describing exception landing pads,
    /// when the function has exception-bearing calls.
    pub lsda: Option<Vec<u8>>,
    /// Stack maps (empty; see [`MachStackMap`]).
    pub stack_maps: Vec<MachStackMap>,
}

impl CompiledCode {
    /// The code bytes.
    pub fn code_buffer(&self) -> &[u8] {
        self.buffer.data()
    }

    /// The relocations to apply.
    pub fn relocs(&self) -> &[MachReloc] {
        self.buffer.relocs()
    }

    /// The trap records.
    pub fn traps(&self) -> &[MachTrap] {
        self.buffer.traps()
    }

    /// The call site records.
    pub fn call_sites(&self) -> &[MachCallSite] {
        self.buffer.call_sites()
    }

    /// The total stack frame size, in bytes.
    pub fn stack_frame_size(&self) -> u32 {
        self.frame_size
    }
}
