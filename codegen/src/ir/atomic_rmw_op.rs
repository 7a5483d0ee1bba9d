//! Read-modify-write operations on memory.

use core::fmt;

/// The operation an `atomic_rmw` instruction performs on its memory
/// location.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum AtomicRmwOp {
    /// Add.
    Add,
    /// Sub.
    Sub,
    /// And.
    And,
    /// Nand.
    Nand,
    /// Or.
    Or,
    /// Xor.
    Xor,
    /// Exchange.
    Xchg,
    /// Unsigned min.
    Umin,
    /// Unsigned max.
    Umax,
    /// Signed min.
    Smin,
    /// Signed max.
    Smax,
}

impl fmt::Display for AtomicRmwOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::And => "and",
            Self::Nand => "nand",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Xchg => "xchg",
            Self::Umin => "umin",
            Self::Umax => "umax",
            Self::Smin => "smin",
            Self::Smax => "smax",
        };
        f.write_str(s)
    }
}
