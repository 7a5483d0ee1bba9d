//! Function layout.
//!
//! The order of basic blocks in a function and the order of instructions in
//! a block is determined by the `Layout` data structure defined in this
//! module.

use crate::entity::packed_option::PackedOption;
use crate::entity::SecondaryMap;
use crate::ir::progpoint::ProgramPoint;
use crate::ir::{Block, Inst};
use crate::timing;
use core::cmp;

/// The `Layout` struct determines the layout of blocks and instructions in a
/// function. It does not contain definitions of instructions or blocks, but
/// depends on `Inst` and `Block` entity references being defined elsewhere.
///
/// This data structure determines:
///
/// - The order of blocks in the function.
/// - Which block contains a given instruction.
/// - The order of instructions within a block.
///
/// While data dependencies are not recorded, instruction ordering does
/// affect control dependencies, so part of the semantics of the program are
/// determined by the layout.
#[derive(Clone)]
pub struct Layout {
    /// Linked list nodes for the layout order of blocks. Forms a doubly
    /// linked list, terminated in both ends by `None`.
    blocks: SecondaryMap<Block, BlockNode>,

    /// Linked list nodes for the layout order of instructions. Forms a
    /// doubly linked list per block, terminated in both ends by `None`.
    insts: SecondaryMap<Inst, InstNode>,

    /// First block in the layout order, or `None` when no blocks have been
    /// laid out.
    first_block: Option<Block>,

    /// Last block in the layout order, or `None` when no blocks have been
    /// laid out.
    last_block: Option<Block>,
}

#[derive(Clone, Debug, Default)]
struct BlockNode {
    prev: PackedOption<Block>,
    next: PackedOption<Block>,
    first_inst: PackedOption<Inst>,
    last_inst: PackedOption<Inst>,
    seq: SequenceNumber,
}

/// Block instructions.
#[derive(Clone, Debug, Default)]
struct InstNode {
    /// The block containing this instruction, or `None` when the
    /// instruction is not yet inserted.
    block: PackedOption<Block>,
    prev: PackedOption<Inst>,
    next: PackedOption<Inst>,
    seq: SequenceNumber,
}

/// Sequence numbers.
///
/// All instructions and blocks are given a sequence number that can be used
/// to quickly determine their relative position in the layout. The sequence
/// numbers are not contiguous, but are assigned like line numbers in BASIC:
/// 10, 20, 30, ... This leaves room for inserting elements in the middle
/// without renumbering everything.
///
/// The block sequence numbers are strictly increasing, and so are the
/// instruction sequence numbers within a block. The instruction sequence
/// numbers are all between the sequence number of their containing block and
/// the following block.
type SequenceNumber = u32;

/// Initial stride assigned to new sequence numbers.
const MAJOR_STRIDE: SequenceNumber = 10;

/// Compute the midpoint between `a` and `b`.
/// Return `None` if the midpoint would be equal to either.
fn midpoint(a: SequenceNumber, b: SequenceNumber) -> Option<SequenceNumber> {
    debug_assert!(a < b);
    let m = a + (b - a) / 2;
    if m > a {
        Some(m)
    } else {
        None
    }
}

impl Layout {
    /// Create a new empty `Layout`.
    pub fn new() -> Self {
        Self {
            blocks: SecondaryMap::new(),
            insts: SecondaryMap::new(),
            first_block: None,
            last_block: None,
        }
    }

    /// Clear the layout.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.insts.clear();
        self.first_block = None;
        self.last_block = None;
    }

    /// Compare the program order of two program points.
    pub fn pp_cmp<A, B>(&self, a: A, b: B) -> cmp::Ordering
    where
        A: Into<ProgramPoint>,
        B: Into<ProgramPoint>,
    {
        self.seq(a.into()).cmp(&self.seq(b.into()))
    }

    /// Get the sequence number of a program point, which must be inserted in
    /// the layout.
    fn seq(&self, pp: ProgramPoint) -> SequenceNumber {
        match pp {
            ProgramPoint::Block(block) => self.blocks[block].seq,
            ProgramPoint::Inst(inst) => self.insts[inst].seq,
        }
    }

    /// Assign a valid sequence number to `block` such that the numbers are
    /// still monotonic, renumbering the whole layout when the local gap is
    /// exhausted.
    fn assign_block_seq(&mut self, block: Block) {
        debug_assert!(self.is_block_inserted(block));

        // Get the sequence number immediately before `block`, or 0.
        let prev_seq = self.blocks[block]
            .prev
            .map(|prev_block| self.last_seq_in_block(prev_block))
            .unwrap_or(0);

        // Get the sequence number immediately following `block`.
        let next_seq = if let Some(inst) = self.blocks[block].first_inst.expand() {
            Some(self.insts[inst].seq)
        } else if let Some(next_block) = self.blocks[block].next.expand() {
            Some(self.blocks[next_block].seq)
        } else {
            None
        };

        match next_seq {
            None => self.blocks[block].seq = prev_seq + MAJOR_STRIDE,
            Some(next_seq) => match midpoint(prev_seq, next_seq) {
                Some(seq) => self.blocks[block].seq = seq,
                None => self.full_renumber(),
            },
        }
    }

    /// Assign a valid sequence number to `inst`, renumbering everything when
    /// the gap between neighbors is exhausted.
    fn assign_inst_seq(&mut self, inst: Inst) {
        let block = self
            .inst_block(inst)
            .expect("inst must be inserted before assigning a seq");

        let prev_seq = match self.insts[inst].prev.expand() {
            Some(prev_inst) => self.insts[prev_inst].seq,
            None => self.blocks[block].seq,
        };

        let next_seq = if let Some(next_inst) = self.insts[inst].next.expand() {
            Some(self.insts[next_inst].seq)
        } else if let Some(next_block) = self.blocks[block].next.expand() {
            Some(self.blocks[next_block].seq)
        } else {
            None
        };

        match next_seq {
            None => self.insts[inst].seq = prev_seq + MAJOR_STRIDE,
            Some(next_seq) => match midpoint(prev_seq, next_seq) {
                Some(seq) => self.insts[inst].seq = seq,
                None => self.full_renumber(),
            },
        }
    }

    /// The last sequence number used inside `block`, which is the block's
    /// own when it is empty.
    fn last_seq_in_block(&self, block: Block) -> SequenceNumber {
        self.blocks[block]
            .last_inst
            .map(|inst| self.insts[inst].seq)
            .unwrap_or(self.blocks[block].seq)
    }

    /// Renumber all blocks and instructions in the layout.
    ///
    /// This doesn't affect the position of anything, but it gives more room
    /// in the internal sequence numbers for inserting instructions later.
    fn full_renumber(&mut self) {
        let _tt = timing::layout_renumber();
        let mut seq = 0;
        let mut next_block = self.first_block;
        while let Some(block) = next_block {
            self.blocks[block].seq = seq;
            seq += MAJOR_STRIDE;
            let mut next_inst = self.blocks[block].first_inst.expand();
            while let Some(inst) = next_inst {
                self.insts[inst].seq = seq;
                seq += MAJOR_STRIDE;
                next_inst = self.insts[inst].next.expand();
            }
            next_block = self.blocks[block].next.expand();
        }
        trace!("layout: renumbered {} program points", seq / MAJOR_STRIDE);
    }
}

/// Methods for laying out blocks.
///
/// An unknown block starts out as *not inserted* in the block layout. The
/// layout is a linear order of inserted blocks. Once a block has been
/// inserted in the layout, instructions can be added. A block can only be
/// removed from the layout when it is empty.
impl Layout {
    /// Is `block` currently part of the layout?
    pub fn is_block_inserted(&self, block: Block) -> bool {
        Some(block) == self.first_block || self.blocks[block].prev.is_some()
    }

    /// Insert `block` as the last block in the layout.
    pub fn append_block(&mut self, block: Block) {
        debug_assert!(
            !self.is_block_inserted(block),
            "cannot append block that is already in the layout"
        );
        {
            let node = &mut self.blocks[block];
            debug_assert!(node.first_inst.is_none() && node.last_inst.is_none());
            node.prev = self.last_block.into();
            node.next = None.into();
        }
        if let Some(last) = self.last_block {
            self.blocks[last].next = block.into();
        } else {
            self.first_block = Some(block);
        }
        self.last_block = Some(block);
        self.assign_block_seq(block);
    }

    /// Insert `block` in the layout before the existing block `before`.
    pub fn insert_block(&mut self, block: Block, before: Block) {
        debug_assert!(
            !self.is_block_inserted(block),
            "cannot insert block that is already in the layout"
        );
        debug_assert!(
            self.is_block_inserted(before),
            "block insertion point not in the layout"
        );
        let after = self.blocks[before].prev;
        {
            let node = &mut self.blocks[block];
            node.next = before.into();
            node.prev = after;
        }
        self.blocks[before].prev = block.into();
        match after.expand() {
            None => self.first_block = Some(block),
            Some(a) => self.blocks[a].next = block.into(),
        }
        self.assign_block_seq(block);
    }

    /// Insert `block` in the layout *after* the existing block `after`.
    pub fn insert_block_after(&mut self, block: Block, after: Block) {
        debug_assert!(
            !self.is_block_inserted(block),
            "cannot insert block that is already in the layout"
        );
        debug_assert!(
            self.is_block_inserted(after),
            "block insertion point not in the layout"
        );
        let before = self.blocks[after].next;
        {
            let node = &mut self.blocks[block];
            node.next = before;
            node.prev = after.into();
        }
        self.blocks[after].next = block.into();
        match before.expand() {
            None => self.last_block = Some(block),
            Some(b) => self.blocks[b].prev = block.into(),
        }
        self.assign_block_seq(block);
    }

    /// Remove `block` from the layout. The block must be empty.
    pub fn remove_block(&mut self, block: Block) {
        debug_assert!(self.is_block_inserted(block), "block not in the layout");
        debug_assert!(
            self.first_inst(block).is_none(),
            "cannot remove block with instructions"
        );
        let prev = self.blocks[block].prev;
        let next = self.blocks[block].next;
        match prev.expand() {
            None => self.first_block = next.expand(),
            Some(p) => self.blocks[p].next = next,
        }
        match next.expand() {
            None => self.last_block = prev.expand(),
            Some(n) => self.blocks[n].prev = prev,
        }
        self.blocks[block].prev = None.into();
        self.blocks[block].next = None.into();
    }

    /// Return an iterator over all blocks in layout order.
    pub fn blocks(&self) -> Blocks {
        Blocks {
            layout: self,
            next: self.first_block,
        }
    }

    /// Get the function's entry block: the first block in the layout.
    pub fn entry_block(&self) -> Option<Block> {
        self.first_block
    }

    /// Get the last block in the layout.
    pub fn last_block(&self) -> Option<Block> {
        self.last_block
    }

    /// Get the block preceding `block` in the layout order.
    pub fn prev_block(&self, block: Block) -> Option<Block> {
        self.blocks[block].prev.expand()
    }

    /// Get the block following `block` in the layout order.
    pub fn next_block(&self, block: Block) -> Option<Block> {
        self.blocks[block].next.expand()
    }
}

/// Methods for arranging instructions.
impl Layout {
    /// Get the block containing `inst`, or `None` if `inst` is not inserted
    /// in the layout.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block.expand()
    }

    /// Append `inst` to the end of `block`.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        debug_assert_eq!(self.inst_block(inst), None);
        debug_assert!(
            self.is_block_inserted(block),
            "cannot append instructions to a block not in the layout"
        );
        let old_last = self.blocks[block].last_inst;
        {
            let inst_node = &mut self.insts[inst];
            inst_node.block = block.into();
            inst_node.prev = old_last;
            debug_assert!(inst_node.next.is_none());
        }
        match old_last.expand() {
            None => self.blocks[block].first_inst = inst.into(),
            Some(last) => self.insts[last].next = inst.into(),
        }
        self.blocks[block].last_inst = inst.into();
        self.assign_inst_seq(inst);
    }

    /// Insert `inst` before the instruction `before` in the same block.
    pub fn insert_inst(&mut self, inst: Inst, before: Inst) {
        debug_assert_eq!(self.inst_block(inst), None);
        let block = self
            .inst_block(before)
            .expect("instruction insertion point not in the layout");
        let after = self.insts[before].prev;
        {
            let inst_node = &mut self.insts[inst];
            inst_node.block = block.into();
            inst_node.next = before.into();
            inst_node.prev = after;
        }
        self.insts[before].prev = inst.into();
        match after.expand() {
            None => self.blocks[block].first_inst = inst.into(),
            Some(a) => self.insts[a].next = inst.into(),
        }
        self.assign_inst_seq(inst);
    }

    /// Remove `inst` from the layout.
    ///
    /// The instruction stays in the DFG arena and can be re-inserted later;
    /// it is merely invisible to layout traversal and emission.
    pub fn remove_inst(&mut self, inst: Inst) {
        let block = self.inst_block(inst).expect("instruction already removed");
        let prev = self.insts[inst].prev;
        let next = self.insts[inst].next;
        match prev.expand() {
            None => self.blocks[block].first_inst = next,
            Some(p) => self.insts[p].next = next,
        }
        match next.expand() {
            None => self.blocks[block].last_inst = prev,
            Some(n) => self.insts[n].prev = prev,
        }
        let inst_node = &mut self.insts[inst];
        inst_node.block = None.into();
        inst_node.prev = None.into();
        inst_node.next = None.into();
    }

    /// Iterate over the instructions in `block` in layout order.
    pub fn block_insts(&self, block: Block) -> Insts {
        Insts {
            layout: self,
            head: self.blocks[block].first_inst.expand(),
            tail: self.blocks[block].last_inst.expand(),
        }
    }

    /// Get the first instruction in `block`.
    pub fn first_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].first_inst.expand()
    }

    /// Get the last instruction in `block`; when the block is well-formed
    /// this is its terminator.
    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].last_inst.expand()
    }

    /// Get the instruction following `inst` in the same block.
    pub fn next_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].next.expand()
    }

    /// Get the instruction preceding `inst` in the same block.
    pub fn prev_inst(&self, inst: Inst) -> Option<Inst> {
        self.insts[inst].prev.expand()
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over blocks in layout order. See [`Layout::blocks`].
pub struct Blocks<'f> {
    layout: &'f Layout,
    next: Option<Block>,
}

impl<'f> Iterator for Blocks<'f> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.next?;
        self.next = self.layout.next_block(block);
        Some(block)
    }
}

impl<'f> IntoIterator for &'f Layout {
    type Item = Block;
    type IntoIter = Blocks<'f>;

    fn into_iter(self) -> Blocks<'f> {
        self.blocks()
    }
}

/// Double-ended iterator over the instructions in a block.
pub struct Insts<'f> {
    layout: &'f Layout,
    head: Option<Inst>,
    tail: Option<Inst>,
}

impl<'f> Iterator for Insts<'f> {
    type Item = Inst;

    fn next(&mut self) -> Option<Inst> {
        let inst = self.head?;
        if self.head == self.tail {
            self.head = None;
            self.tail = None;
        } else {
            self.head = self.layout.next_inst(inst);
        }
        Some(inst)
    }
}

impl<'f> DoubleEndedIterator for Insts<'f> {
    fn next_back(&mut self) -> Option<Inst> {
        let inst = self.tail?;
        if self.head == self.tail {
            self.head = None;
            self.tail = None;
        } else {
            self.tail = self.layout.prev_inst(inst);
        }
        Some(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Inst};

    fn blocks_of(layout: &Layout) -> Vec<Block> {
        layout.blocks().collect()
    }

    fn insts_of(layout: &Layout, block: Block) -> Vec<Inst> {
        layout.block_insts(block).collect()
    }

    #[test]
    fn block_ordering() {
        let mut layout = Layout::new();
        let b0 = Block::from_u32(0);
        let b1 = Block::from_u32(1);
        let b2 = Block::from_u32(2);
        let b3 = Block::from_u32(3);

        layout.append_block(b1);
        layout.append_block(b3);
        layout.insert_block(b2, b3);
        layout.insert_block_after(b0, b1);
        assert_eq!(blocks_of(&layout), [b1, b0, b2, b3]);
        assert_eq!(layout.entry_block(), Some(b1));
        assert_eq!(layout.last_block(), Some(b3));

        assert!(layout.pp_cmp(b1, b0).is_lt());
        assert!(layout.pp_cmp(b3, b2).is_gt());

        layout.remove_block(b0);
        assert_eq!(blocks_of(&layout), [b1, b2, b3]);
        assert!(!layout.is_block_inserted(b0));
    }

    #[test]
    fn inst_ordering() {
        let mut layout = Layout::new();
        let b0 = Block::from_u32(0);
        layout.append_block(b0);

        let i0 = Inst::from_u32(0);
        let i1 = Inst::from_u32(1);
        let i2 = Inst::from_u32(2);

        layout.append_inst(i0, b0);
        layout.append_inst(i2, b0);
        layout.insert_inst(i1, i2);
        assert_eq!(insts_of(&layout, b0), [i0, i1, i2]);
        assert_eq!(layout.inst_block(i1), Some(b0));
        assert_eq!(layout.first_inst(b0), Some(i0));
        assert_eq!(layout.last_inst(b0), Some(i2));
        assert!(layout.pp_cmp(i0, i1).is_lt());
        assert!(layout.pp_cmp(b0, i0).is_lt());

        layout.remove_inst(i1);
        assert_eq!(insts_of(&layout, b0), [i0, i2]);
        assert_eq!(layout.inst_block(i1), None);

        // Reverse iteration sees the same elements backwards.
        let rev: Vec<Inst> = layout.block_insts(b0).rev().collect();
        assert_eq!(rev, [i2, i0]);
    }

    #[test]
    fn dense_insertion_renumbers() {
        let mut layout = Layout::new();
        let b0 = Block::from_u32(0);
        layout.append_block(b0);

        // Repeatedly inserting at the front of the block exhausts the gap
        // between the block header and the first instruction, forcing
        // renumbering; order must survive.
        let insts: Vec<Inst> = (0..40).map(Inst::from_u32).collect();
        layout.append_inst(insts[0], b0);
        for pair in insts.windows(2) {
            layout.insert_inst(pair[1], pair[0]);
        }
        let expect: Vec<Inst> = insts.iter().rev().copied().collect();
        assert_eq!(insts_of(&layout, b0), expect);
        for pair in expect.windows(2) {
            assert!(layout.pp_cmp(pair[0], pair[1]).is_lt());
        }
    }
}
