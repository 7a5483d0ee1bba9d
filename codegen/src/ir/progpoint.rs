//! Program points.

use crate::ir::{Block, Inst};
use core::fmt;

/// A program point is a position in a function where the live range of an
/// SSA value can begin or end. It can be either an instruction or a block
/// header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramPoint {
    /// An instruction in the function.
    Inst(Inst),
    /// A block header.
    Block(Block),
}

impl From<Inst> for ProgramPoint {
    fn from(inst: Inst) -> Self {
        Self::Inst(inst)
    }
}

impl From<Block> for ProgramPoint {
    fn from(block: Block) -> Self {
        Self::Block(block)
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Inst(x) => write!(f, "{x}"),
            Self::Block(x) => write!(f, "{x}"),
        }
    }
}

impl fmt::Debug for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ProgramPoint({self})")
    }
}
