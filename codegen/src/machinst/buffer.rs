//! In-memory representation of compiled machine code, with labels and
//! fixups to refer to those labels.
//!
//! The emitter writes encoded instructions into a `MachBuffer` and refers to
//! not-yet-known code offsets through `MachLabel`s. A *fixup* records a site
//! whose bytes must be rewritten once its label's offset is known. Each
//! fixup carries a target-defined *label use* kind describing the reachable
//! range and the patch encoding.
//!
//! The buffer also holds deferred constants (literal-pool entries). When a
//! pending fixup would go out of range, the emitter asks for an *island*: a
//! region emitted between blocks holding the constants and, for branches
//! whose target is still too far, *veneers* (an unconditional branch with a
//! longer range that the short branch is redirected through). Range
//! legalization at `finish()` works the same way: a conditional branch that
//! cannot reach its target is re-pointed at a veneer branch that can.

use crate::ir::{ExternalName, TrapCode};
use crate::machinst::{MachCallSite, MachReloc, MachTrap, Reloc};
use crate::result::{CodegenError, CodegenResult};
use core::fmt;

/// A label refers to some offset in a `MachBuffer`. It may not be resolved
/// at the point at which it is used by emitted code; the buffer records
/// every use so it can patch them when the label is bound.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachLabel(u32);

impl MachLabel {
    /// Get a label for a block. (The first N labels are always block
    /// labels.)
    pub fn from_block(bindex: u32) -> Self {
        Self(bindex)
    }

    /// Get the numeric label index.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for MachLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "label{}", self.0)
    }
}

/// A target-defined label reference kind.
pub trait MachInstLabelUse: Copy + Clone + fmt::Debug {
    /// Maximum PC-relative distance to a label *after* this use.
    fn max_pos_range(self) -> u32;
    /// Maximum PC-relative distance to a label *before* this use.
    fn max_neg_range(self) -> u32;
    /// Size of the region that `patch` rewrites.
    fn patch_size(self) -> u32;
    /// Rewrite the encoded bytes at `use_offset` to refer to `label_offset`.
    fn patch(self, buffer: &mut [u8], use_offset: u32, label_offset: u32);
    /// Can this use be redirected through an unconditional-branch veneer?
    fn supports_veneer(self) -> bool;
    /// Size of the veneer code, when supported.
    fn veneer_size(self) -> u32;
    /// Write a veneer at `veneer_offset` redirecting this use; returns the
    /// offset of the fixup within the veneer and its label-use kind.
    fn generate_veneer(self, buffer: &mut [u8], veneer_offset: u32) -> (u32, Self);
    /// Alignment required for this use site.
    fn align(self) -> u32 {
        4
    }
}

/// A fixup to perform on the buffer once code is emitted.
#[derive(Clone, Copy, Debug)]
struct MachLabelFixup<U> {
    label: MachLabel,
    offset: u32,
    kind: U,
}

/// A deferred constant with the label that will address it.
struct MachConstant {
    label: MachLabel,
    data: Vec<u8>,
    align: u32,
}

/// Implementation limit: the buffer refuses to grow past 2 GiB so all
/// offsets fit comfortably in a `u32` with room for sign handling.
const MAX_BUFFER_SIZE: usize = 1 << 31;

/// A buffer of output to be produced, fixed up, and then emitted to a
/// `CompiledCode` in bulk.
pub struct MachBuffer<U: MachInstLabelUse> {
    /// The buffer contents, as raw bytes.
    data: Vec<u8>,
    /// Label offsets; `u32::MAX` while unbound.
    label_offsets: Vec<u32>,
    /// Fixups not yet resolved.
    fixups: Vec<MachLabelFixup<U>>,
    /// Constants waiting for the next island.
    pending_constants: Vec<MachConstant>,
    /// Size of all pending constants, including worst-case padding.
    pending_constants_size: u32,
    /// The offset up to which every pending fixup stays in range. Emission
    /// must place an island before crossing it.
    island_deadline: u32,
    /// Trap records.
    traps: Vec<MachTrap>,
    /// Relocation records.
    relocs: Vec<MachReloc>,
    /// Call site records.
    call_sites: Vec<MachCallSite>,
    /// Landing-pad uses to resolve at finish: (call site index, label).
    pending_handlers: Vec<(usize, MachLabel)>,
}

impl<U: MachInstLabelUse> MachBuffer<U> {
    /// Create a new section, known to start at `start_offset` and with a
    /// length limited to 2 GiB.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            label_offsets: Vec::new(),
            fixups: Vec::new(),
            pending_constants: Vec::new(),
            pending_constants_size: 0,
            island_deadline: u32::MAX,
            traps: Vec::new(),
            relocs: Vec::new(),
            call_sites: Vec::new(),
            pending_handlers: Vec::new(),
        }
    }

    /// Current offset from the start of the buffer.
    pub fn cur_offset(&self) -> u32 {
        self.data.len() as u32
    }

    /// Add 1 byte.
    pub fn put1(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Add 4 bytes, little-endian.
    pub fn put4(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Add 8 bytes, little-endian.
    pub fn put8(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Add a slice of data.
    pub fn put_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Align the buffer to `align` bytes, padding with zeroes (which encode
    /// as invalid instructions and are never reachable).
    pub fn align_to(&mut self, align: u32) {
        debug_assert!(align.is_power_of_two());
        while self.cur_offset() & (align - 1) != 0 {
            self.put1(0);
        }
    }

    /// Allocate a new label without binding it.
    pub fn get_label(&mut self) -> MachLabel {
        let l = self.label_offsets.len() as u32;
        self.label_offsets.push(u32::MAX);
        MachLabel(l)
    }

    /// Reserve the first `blocks` labels for basic blocks, so that
    /// `MachLabel::from_block(i)` is valid.
    pub fn reserve_labels_for_blocks(&mut self, blocks: u32) {
        debug_assert!(self.label_offsets.is_empty());
        self.label_offsets.resize(blocks as usize, u32::MAX);
    }

    /// Bind `label` to the current offset.
    pub fn bind_label(&mut self, label: MachLabel) {
        debug_assert_eq!(
            self.label_offsets[label.index() as usize],
            u32::MAX,
            "label bound twice"
        );
        self.label_offsets[label.index() as usize] = self.cur_offset();
    }

    /// The offset of a bound label, if it is bound.
    pub fn label_offset(&self, label: MachLabel) -> Option<u32> {
        match self.label_offsets[label.index() as usize] {
            u32::MAX => None,
            off => Some(off),
        }
    }

    /// Inform the buffer of a use of `label` at `offset`, with the given
    /// reference kind. The referenced bytes must already be emitted.
    pub fn use_label_at_offset(&mut self, offset: u32, label: MachLabel, kind: U) {
        debug_assert!(offset + kind.patch_size() <= self.cur_offset());
        // The earliest this fixup can go out of range bounds island
        // placement.
        let deadline = offset.saturating_add(kind.max_pos_range());
        self.island_deadline = self.island_deadline.min(deadline);
        self.fixups.push(MachLabelFixup {
            label,
            offset,
            kind,
        });
    }

    /// Add a constant to be placed in the next island, returning the label
    /// that will address it.
    pub fn defer_constant(&mut self, data: &[u8], align: u32) -> MachLabel {
        let label = self.get_label();
        self.pending_constants_size += data.len() as u32 + align;
        self.pending_constants.push(MachConstant {
            label,
            data: data.to_vec(),
            align,
        });
        // Wherever the island lands, pc-relative loads must still reach it:
        // conservatively require an island within the shortest load range.
        let deadline = self.cur_offset().saturating_add(1 << 20).saturating_sub(self.pending_constants_size);
        self.island_deadline = self.island_deadline.min(deadline);
        label
    }

    /// Is an island needed within the next `distance` bytes?
    pub fn island_needed(&self, distance: u32) -> bool {
        if self.pending_constants.is_empty() && self.fixups.is_empty() {
            return false;
        }
        self.cur_offset()
            .saturating_add(distance)
            .saturating_add(self.pending_constants_size)
            > self.island_deadline
    }

    /// Emit an island: all pending constants, and veneers for any fixup
    /// that could go out of range before the next opportunity.
    ///
    /// The caller must ensure control flow does not fall into the island
    /// (emit it after an unconditional branch).
    pub fn emit_island(&mut self, next_distance: u32) {
        let constants = core::mem::take(&mut self.pending_constants);
        for constant in constants {
            self.align_to(constant.align);
            self.bind_label(constant.label);
            self.put_data(&constant.data);
        }
        self.pending_constants_size = 0;
        self.island_deadline = u32::MAX;

        // Redirect short-range fixups whose deadline falls before the next
        // island opportunity through veneers, and resolve what can be
        // resolved.
        let fixups = core::mem::take(&mut self.fixups);
        for fixup in fixups {
            let deadline = fixup.offset.saturating_add(fixup.kind.max_pos_range());
            let horizon = self.cur_offset().saturating_add(next_distance);
            match self.label_offset(fixup.label) {
                Some(target) if self.in_range(&fixup, target) => {
                    self.patch_fixup(&fixup, target);
                }
                _ if deadline <= horizon && fixup.kind.supports_veneer() => {
                    self.emit_veneer(fixup);
                }
                _ => {
                    self.keep_fixup(fixup);
                }
            }
        }
    }

    fn keep_fixup(&mut self, fixup: MachLabelFixup<U>) {
        let deadline = fixup.offset.saturating_add(fixup.kind.max_pos_range());
        self.island_deadline = self.island_deadline.min(deadline);
        self.fixups.push(fixup);
    }

    fn in_range(&self, fixup: &MachLabelFixup<U>, target: u32) -> bool {
        if target >= fixup.offset {
            target - fixup.offset <= fixup.kind.max_pos_range()
        } else {
            fixup.offset - target <= fixup.kind.max_neg_range()
        }
    }

    fn patch_fixup(&mut self, fixup: &MachLabelFixup<U>, target: u32) {
        let start = fixup.offset as usize;
        let end = start + fixup.kind.patch_size() as usize;
        fixup.kind.patch(&mut self.data[start..end], fixup.offset, target);
    }

    /// Emit an unconditional-branch veneer for `fixup` at the current
    /// offset and repoint the fixup at it.
    fn emit_veneer(&mut self, fixup: MachLabelFixup<U>) {
        self.align_to(fixup.kind.align());
        let veneer_offset = self.cur_offset();
        trace!(
            "machbuffer: veneer at {veneer_offset:#x} for fixup at {:#x}",
            fixup.offset
        );
        self.data
            .resize(self.data.len() + fixup.kind.veneer_size() as usize, 0);
        let (veneer_fixup_off, veneer_kind) = fixup
            .kind
            .generate_veneer(&mut self.data[veneer_offset as usize..], veneer_offset);
        // The island deadline machinery placed this veneer before the use
        // could drift out of range.
        debug_assert!(self.in_range(&fixup, veneer_offset));
        self.patch_fixup(&fixup, veneer_offset);
        // The veneer itself now needs the original label.
        self.keep_fixup(MachLabelFixup {
            label: fixup.label,
            offset: veneer_offset + veneer_fixup_off,
            kind: veneer_kind,
        });
    }

    /// Add a trap record at the current offset.
    pub fn add_trap(&mut self, code: TrapCode) {
        self.traps.push(MachTrap {
            offset: self.cur_offset(),
            code,
        });
    }

    /// Add a relocation at the given offset.
    pub fn add_reloc_at_offset(
        &mut self,
        offset: u32,
        kind: Reloc,
        name: &ExternalName,
        addend: i64,
    ) {
        self.relocs.push(MachReloc {
            offset,
            kind,
            name: name.clone(),
            addend,
        });
    }

    /// Add a relocation at the current offset.
    pub fn add_reloc(&mut self, kind: Reloc, name: &ExternalName, addend: i64) {
        self.add_reloc_at_offset(self.cur_offset(), kind, name, addend);
    }

    /// Add a call site record whose return address is the current offset.
    pub fn add_call_site(&mut self) {
        self.call_sites.push(MachCallSite {
            ret_addr: self.cur_offset(),
            exception_handler: None,
        });
    }

    /// Add a call site with an exception handler label, resolved when the
    /// buffer is finished.
    pub fn add_try_call_site(&mut self, handler: MachLabel) {
        let index = self.call_sites.len();
        self.call_sites.push(MachCallSite {
            ret_addr: self.cur_offset(),
            exception_handler: None,
        });
        self.pending_handlers.push((index, handler));
    }

    /// Finish any deferred emissions and patches and convert into a
    /// finalized buffer.
    pub fn finish(mut self) -> CodegenResult<MachBufferFinalized> {
        if self.data.len() > MAX_BUFFER_SIZE {
            return Err(CodegenError::CodeTooLarge);
        }

        // Flush remaining constants (nothing follows, so no branch-over is
        // needed).
        let constants = core::mem::take(&mut self.pending_constants);
        for constant in constants {
            self.align_to(constant.align);
            self.bind_label(constant.label);
            self.put_data(&constant.data);
        }

        // Resolve every fixup; out-of-range ones get one veneer round. The
        // veneer expansion is bounded, so a second pass always succeeds or
        // the branch genuinely cannot be encoded.
        for _round in 0..2 {
            let fixups = core::mem::take(&mut self.fixups);
            for fixup in fixups {
                let target = match self.label_offset(fixup.label) {
                    Some(target) => target,
                    None => {
                        return Err(CodegenError::InternalError {
                            stage: "emit",
                            message: format!("label {:?} never bound", fixup.label),
                        });
                    }
                };
                if self.in_range(&fixup, target) {
                    self.patch_fixup(&fixup, target);
                } else if fixup.kind.supports_veneer()
                    && self.in_range(&fixup, self.cur_offset())
                {
                    self.emit_veneer(fixup);
                } else {
                    return Err(CodegenError::Lowering(format!(
                        "branch fixup at {:#x} cannot reach offset {target:#x}",
                        fixup.offset
                    )));
                }
            }
            if self.fixups.is_empty() {
                break;
            }
        }
        if !self.fixups.is_empty() {
            return Err(CodegenError::Lowering(
                "branch fixups still unresolved after veneer expansion".into(),
            ));
        }

        // Resolve landing pads.
        for (index, label) in core::mem::take(&mut self.pending_handlers) {
            let target = self.label_offset(label).ok_or_else(|| {
                CodegenError::InternalError {
                    stage: "emit",
                    message: "landing pad label never bound".into(),
                }
            })?;
            self.call_sites[index].exception_handler = Some(target);
        }

        self.traps.sort_by_key(|t| t.offset);
        self.relocs.sort_by_key(|r| r.offset);

        Ok(MachBufferFinalized {
            data: self.data,
            relocs: self.relocs,
            traps: self.traps,
            call_sites: self.call_sites,
        })
    }
}

/// A `MachBuffer` once emission is completed: holds the data and records of
/// traps, relocations and call sites.
#[derive(Debug, Default)]
pub struct MachBufferFinalized {
    data: Vec<u8>,
    relocs: Vec<MachReloc>,
    traps: Vec<MachTrap>,
    call_sites: Vec<MachCallSite>,
}

impl MachBufferFinalized {
    /// Get the code bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the total required size for the code.
    pub fn total_size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Get the list of relocations.
    pub fn relocs(&self) -> &[MachReloc] {
        &self.relocs
    }

    /// Get the list of trap records.
    pub fn traps(&self) -> &[MachTrap] {
        &self.traps
    }

    /// Get the list of call sites.
    pub fn call_sites(&self) -> &[MachCallSite] {
        &self.call_sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A miniature label-use kind for exercising the buffer: a one-byte
    /// forward-only offset with a 16-byte range, veneered by a 4-byte
    /// far-offset form.
    #[derive(Clone, Copy, Debug)]
    enum TestUse {
        Short,
        Long,
    }

    impl MachInstLabelUse for TestUse {
        fn max_pos_range(self) -> u32 {
            match self {
                TestUse::Short => 16,
                TestUse::Long => 1 << 30,
            }
        }
        fn max_neg_range(self) -> u32 {
            match self {
                TestUse::Short => 0,
                TestUse::Long => 1 << 30,
            }
        }
        fn patch_size(self) -> u32 {
            match self {
                TestUse::Short => 1,
                TestUse::Long => 4,
            }
        }
        fn patch(self, buffer: &mut [u8], use_offset: u32, label_offset: u32) {
            match self {
                TestUse::Short => buffer[0] = (label_offset - use_offset) as u8,
                TestUse::Long => {
                    buffer.copy_from_slice(&label_offset.wrapping_sub(use_offset).to_le_bytes())
                }
            }
        }
        fn supports_veneer(self) -> bool {
            matches!(self, TestUse::Short)
        }
        fn veneer_size(self) -> u32 {
            4
        }
        fn generate_veneer(self, _buffer: &mut [u8], _veneer_offset: u32) -> (u32, Self) {
            (0, TestUse::Long)
        }
        fn align(self) -> u32 {
            1
        }
    }

    #[test]
    fn bind_and_patch_forward_reference() {
        let mut buf: MachBuffer<TestUse> = MachBuffer::new();
        let label = buf.get_label();
        buf.put1(0xff);
        buf.use_label_at_offset(0, label, TestUse::Short);
        buf.put1(0x00);
        buf.bind_label(label);
        buf.put1(0xaa);
        let done = buf.finish().unwrap();
        // The byte at 0 now holds the forward distance to the label (2).
        assert_eq!(done.data()[0], 2);
    }

    #[test]
    fn out_of_range_use_gets_veneer() {
        let mut buf: MachBuffer<TestUse> = MachBuffer::new();
        let label = buf.get_label();
        buf.put1(0);
        buf.use_label_at_offset(0, label, TestUse::Short);
        for _ in 0..9 {
            buf.put1(0x11);
        }
        // The next stretch of code is longer than the short range, so an
        // island is due; it redirects the pending fixup through a veneer.
        assert!(buf.island_needed(100));
        buf.emit_island(100);
        for _ in 0..90 {
            buf.put1(0x11);
        }
        buf.bind_label(label);
        buf.put1(0x22);
        let done = buf.finish().unwrap();
        // The short use points at a veneer within its 16-byte range, and
        // the veneer's 32-bit cell holds the remaining distance to the
        // label at offset 100.
        let veneer_off = done.data()[0] as u32;
        assert!(veneer_off <= 16);
        let cell = &done.data()[veneer_off as usize..veneer_off as usize + 4];
        let delta = u32::from_le_bytes(cell.try_into().unwrap());
        assert_eq!(veneer_off.wrapping_add(delta), 100);
    }

    #[test]
    fn constants_emit_in_islands() {
        let mut buf: MachBuffer<TestUse> = MachBuffer::new();
        buf.put4(0xdead_beef);
        let c = buf.defer_constant(&[1, 2, 3, 4, 5, 6, 7, 8], 8);
        assert!(buf.label_offset(c).is_none());
        buf.emit_island(0);
        let off = buf.label_offset(c).unwrap();
        assert_eq!(off % 8, 0);
        let done = buf.finish().unwrap();
        assert_eq!(&done.data()[off as usize..off as usize + 8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn traps_and_relocs_sorted() {
        let mut buf: MachBuffer<TestUse> = MachBuffer::new();
        buf.put4(0);
        buf.add_trap(TrapCode::IntegerDivisionByZero);
        buf.put4(0);
        buf.add_reloc(Reloc::Abs8, &ExternalName::user(0, 1), 0);
        let done = buf.finish().unwrap();
        assert_eq!(done.traps().len(), 1);
        assert_eq!(done.traps()[0].offset, 4);
        assert_eq!(done.relocs()[0].offset, 8);
        assert_eq!(done.relocs()[0].kind, Reloc::Abs8);
    }
}
