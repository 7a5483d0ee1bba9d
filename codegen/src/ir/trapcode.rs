//! Trap codes describing the reason for a trap.

use core::fmt::{self, Display, Formatter};

/// A trap code describing the reason for a trap.
///
/// All trap instructions have an explicit trap code, and the emitter records
/// a `(code offset, trap code)` pair for every potentially trapping machine
/// instruction so the embedder can map faults back to a reason.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TrapCode {
    /// The current stack space was exhausted.
    StackOverflow,
    /// A heap access was outside the bounds of the accessed memory.
    HeapOutOfBounds,
    /// A table access was outside the bounds of the accessed table.
    TableOutOfBounds,
    /// An integer arithmetic operation caused an overflow.
    IntegerOverflow,
    /// An integer division by zero.
    IntegerDivisionByZero,
    /// Failed float-to-int conversion.
    BadConversionToInteger,
    /// Execution reached code that should not be reachable.
    UnreachableCodeReached,
    /// A misaligned atomic access.
    HeapMisaligned,
    /// A user-defined trap code.
    User(u16),
}

impl Display for TrapCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        use self::TrapCode::*;
        match *self {
            StackOverflow => f.write_str("stk_ovf"),
            HeapOutOfBounds => f.write_str("heap_oob"),
            TableOutOfBounds => f.write_str("table_oob"),
            IntegerOverflow => f.write_str("int_ovf"),
            IntegerDivisionByZero => f.write_str("int_divz"),
            BadConversionToInteger => f.write_str("bad_toint"),
            UnreachableCodeReached => f.write_str("unreachable"),
            HeapMisaligned => f.write_str("heap_misaligned"),
            User(x) => write!(f, "user{x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(TrapCode::IntegerDivisionByZero.to_string(), "int_divz");
        assert_eq!(TrapCode::User(17).to_string(), "user17");
    }
}
