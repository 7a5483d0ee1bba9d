//! Global values.

use crate::ir::ExternalName;
use core::fmt;

/// Information about a global value declared in the function preamble.
///
/// A global value names an object whose address is fixed at link time. The
/// `global_value` instruction materializes the address; how it does so
/// depends on the relocation model (absolute, GOT-indirect, or TLS).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GlobalValueData {
    /// Value is symbolic, meaning it's a name which will be resolved to an
    /// actual value later (eg. by linking).
    Symbol {
        /// The symbolic name.
        name: ExternalName,
        /// Byte offset to be added to the symbol's address.
        offset: i64,
        /// Will this symbol be defined nearby, such that it will always be a
        /// certain distance away, after linking? If so, PC-relative `adrp`
        /// addressing can be used; if not, the address goes through the GOT
        /// under the PIC model.
        colocated: bool,
        /// Does this symbol refer to a thread-local storage value?
        tls: bool,
    },
}

impl fmt::Display for GlobalValueData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Symbol {
                name,
                offset,
                colocated,
                tls,
            } => {
                write!(f, "symbol ")?;
                if *colocated {
                    write!(f, "colocated ")?;
                }
                if *tls {
                    write!(f, "tls ")?;
                }
                write!(f, "{name}")?;
                if *offset != 0 {
                    write!(f, "{offset:+}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let gv = GlobalValueData::Symbol {
            name: ExternalName::user(0, 3),
            offset: 16,
            colocated: true,
            tls: false,
        };
        assert_eq!(gv.to_string(), "symbol colocated u0:3+16");
    }
}
