//! Jump table representation.
//!
//! Jump tables are declared in the function preamble and assigned a
//! `JumpTable` reference. The `br_table` instruction selects an entry by
//! zero-based index, falling back to the default destination when the index
//! is out of bounds.

use crate::ir::instructions::{BlockCall, ValueListPool};
use core::fmt;

/// Contents of a jump table.
///
/// All branches are stored in a single vector, with the default destination
/// at index 0 and the indexed destinations following it. Every destination
/// is a full [`BlockCall`], so each table entry can pass its own block
/// arguments.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct JumpTableData {
    table: Vec<BlockCall>,
}

impl JumpTableData {
    /// Create a new jump table with the provided default and entry blocks.
    pub fn new(def: BlockCall, table: &[BlockCall]) -> Self {
        Self {
            table: std::iter::once(def).chain(table.iter().copied()).collect(),
        }
    }

    /// Fetch the default block for this jump table.
    pub fn default_block(&self) -> BlockCall {
        *self.table.first().unwrap()
    }

    /// Mutable access to the default block of this jump table.
    pub fn default_block_mut(&mut self) -> &mut BlockCall {
        self.table.first_mut().unwrap()
    }

    /// The jump table entries, not including the default.
    pub fn as_slice(&self) -> &[BlockCall] {
        &self.table[1..]
    }

    /// The jump table entries, not including the default; mutable.
    pub fn as_mut_slice(&mut self) -> &mut [BlockCall] {
        &mut self.table[1..]
    }

    /// All branches of the table: the default first, then the entries.
    pub fn all_branches(&self) -> &[BlockCall] {
        &self.table
    }

    /// All branches of the table, mutable.
    pub fn all_branches_mut(&mut self) -> &mut [BlockCall] {
        &mut self.table
    }

    /// Returns a displayable form of this table.
    pub fn display<'a>(&'a self, pool: &'a ValueListPool) -> DisplayJumpTable<'a> {
        DisplayJumpTable { jt: self, pool }
    }
}

/// A wrapper for the context required to display a [`JumpTableData`].
pub struct DisplayJumpTable<'a> {
    jt: &'a JumpTableData,
    pool: &'a ValueListPool,
}

impl<'a> fmt::Display for DisplayJumpTable<'a> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}, [", self.jt.default_block().display(self.pool))?;
        for (ix, entry) in self.jt.as_slice().iter().enumerate() {
            if ix != 0 {
                write!(fmt, ", ")?;
            }
            write!(fmt, "{}", entry.display(self.pool))?;
        }
        write!(fmt, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Block;

    #[test]
    fn entries_and_default() {
        let mut pool = ValueListPool::new();
        let def = BlockCall::new(Block::from_u32(0), &[], &mut pool);
        let e1 = BlockCall::new(Block::from_u32(1), &[], &mut pool);
        let e2 = BlockCall::new(Block::from_u32(2), &[], &mut pool);
        let jt = JumpTableData::new(def, &[e1, e2]);

        assert_eq!(jt.default_block().block(&pool), Block::from_u32(0));
        assert_eq!(jt.as_slice().len(), 2);
        assert_eq!(jt.all_branches().len(), 3);
        assert_eq!(jt.display(&pool).to_string(), "block0, [block1, block2]");
    }
}
