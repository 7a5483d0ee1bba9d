//! External function calls.
//!
//! To a function under compilation, all other functions are external. A
//! function that is called must be declared in the preamble: its signature
//! describes how arguments and return values travel, and its name is an
//! abstract symbol the embedder resolves through relocations.

use crate::ir::{SigRef, Type};
use crate::isa::CallConv;
use core::fmt;

/// Function signature.
///
/// The function signature describes the types of formal parameters and
/// return values along with other details that are needed to call a function
/// correctly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// The arguments passed to the function.
    pub params: Vec<AbiParam>,
    /// Values returned from the function.
    pub returns: Vec<AbiParam>,
    /// Calling convention.
    pub call_conv: CallConv,
}

impl Signature {
    /// Create a new blank signature.
    pub fn new(call_conv: CallConv) -> Self {
        Self {
            params: Vec::new(),
            returns: Vec::new(),
            call_conv,
        }
    }

    /// Clear the signature so it is identical to a fresh one.
    pub fn clear(&mut self, call_conv: CallConv) {
        self.params.clear();
        self.returns.clear();
        self.call_conv = call_conv;
    }

    /// Find the index of a presumed unique special-purpose parameter.
    pub fn special_param_index(&self, purpose: ArgumentPurpose) -> Option<usize> {
        self.params.iter().rposition(|arg| arg.purpose == purpose)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")?;
        if !self.returns.is_empty() {
            write!(f, " -> ")?;
            for (i, r) in self.returns.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{r}")?;
            }
        }
        write!(f, " {}", self.call_conv)
    }
}

/// Function parameter or return value descriptor.
///
/// This describes the value type being passed to or from a function along
/// with flags that affect how the argument is passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AbiParam {
    /// Type of the argument value.
    pub value_type: Type,
    /// Special purpose of argument, or `Normal`.
    pub purpose: ArgumentPurpose,
    /// Method for extending argument to a full register.
    pub extension: ArgumentExtension,
}

impl AbiParam {
    /// Create a parameter with default flags.
    pub fn new(value_type: Type) -> Self {
        Self {
            value_type,
            extension: ArgumentExtension::None,
            purpose: ArgumentPurpose::Normal,
        }
    }

    /// Create a special-purpose parameter that is not (yet) bound to a
    /// specific register.
    pub fn special(value_type: Type, purpose: ArgumentPurpose) -> Self {
        Self {
            value_type,
            extension: ArgumentExtension::None,
            purpose,
        }
    }

    /// Convert `self` to a parameter with the `uext` flag set.
    pub fn uext(self) -> Self {
        debug_assert!(self.value_type.is_int(), "uext on {} arg", self.value_type);
        Self {
            extension: ArgumentExtension::Uext,
            ..self
        }
    }

    /// Convert `self` to a parameter with the `sext` flag set.
    pub fn sext(self) -> Self {
        debug_assert!(self.value_type.is_int(), "sext on {} arg", self.value_type);
        Self {
            extension: ArgumentExtension::Sext,
            ..self
        }
    }
}

impl fmt::Display for AbiParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value_type)?;
        match self.extension {
            ArgumentExtension::None => {}
            ArgumentExtension::Uext => write!(f, " uext")?,
            ArgumentExtension::Sext => write!(f, " sext")?,
        }
        if self.purpose != ArgumentPurpose::Normal {
            write!(f, " {}", self.purpose)?;
        }
        Ok(())
    }
}

/// Function argument extension options.
///
/// On some architectures, small integer function arguments are extended to
/// the width of a full register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgumentExtension {
    /// No extension, high bits are indeterminate.
    None,
    /// Unsigned extension.
    Uext,
    /// Signed extension.
    Sext,
}

/// The special purpose of a function argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgumentPurpose {
    /// A normal user program value.
    Normal,
    /// A C struct passed as argument; the value carries the pointer, the
    /// payload lives in the outgoing argument area.
    StructArgument(u32),
    /// Struct return pointer: the caller passes a buffer for a large return
    /// value here (X8 on AArch64).
    StructReturn,
}

impl fmt::Display for ArgumentPurpose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::StructArgument(size) => write!(f, "sarg({size})"),
            Self::StructReturn => f.write_str("sret"),
        }
    }
}

/// An external function.
///
/// Information about a function that can be called directly with a direct
/// `call` instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExtFuncData {
    /// Name of the external function.
    pub name: ExternalName,
    /// Call signature of function.
    pub signature: SigRef,
    /// Will this function be defined nearby, such that it will always be a
    /// certain distance away, after linking? If so, short direct-call
    /// relocations can be used (B/BL on AArch64); if not, the address must
    /// be materialized and the call made indirect.
    pub colocated: bool,
}

impl fmt::Display for ExtFuncData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.colocated {
            write!(f, "colocated ")?;
        }
        write!(f, "{} {}", self.name, self.signature)
    }
}

/// The name of an external symbol: a function or data object the linker or
/// JIT resolves.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExternalName {
    /// A name in a user-controlled namespace pair.
    User {
        /// Arbitrary. The embedder decides what the namespaces mean.
        namespace: u32,
        /// Arbitrary.
        index: u32,
    },
    /// A well-known runtime library routine.
    LibCall(LibCall),
    /// A test-case name of up to 16 ascii characters.
    TestCase {
        /// Ascii bytes of the name.
        name: Vec<u8>,
    },
}

impl ExternalName {
    /// Create a new external name from a user namespace/index pair.
    pub fn user(namespace: u32, index: u32) -> Self {
        Self::User { namespace, index }
    }

    /// Create a testcase name from a string.
    pub fn testcase<S: AsRef<[u8]>>(v: S) -> Self {
        Self::TestCase {
            name: v.as_ref().to_vec(),
        }
    }
}

impl Default for ExternalName {
    fn default() -> Self {
        Self::user(0, 0)
    }
}

impl fmt::Display for ExternalName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::User { namespace, index } => write!(f, "u{namespace}:{index}"),
            Self::LibCall(lc) => write!(f, "%{lc}"),
            Self::TestCase { name } => {
                f.write_str("%")?;
                for byte in name {
                    write!(f, "{}", *byte as char)?;
                }
                Ok(())
            }
        }
    }
}

/// The name of a runtime library routine the generated code may call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LibCall {
    /// probe for stack overflow.
    Probestack,
    /// `memcpy`.
    Memcpy,
    /// `memset`.
    Memset,
    /// `memmove`.
    Memmove,
    /// `fmodf`, kept for soft-float targets; unused on AArch64.
    FmodF32,
    /// `fmod`.
    FmodF64,
}

impl fmt::Display for LibCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Probestack => "Probestack",
            Self::Memcpy => "Memcpy",
            Self::Memset => "Memset",
            Self::Memmove => "Memmove",
            Self::FmodF32 => "FmodF32",
            Self::FmodF64 => "FmodF64",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{F32, I32};

    #[test]
    fn signature_display() {
        let mut sig = Signature::new(CallConv::SystemV);
        assert_eq!(sig.to_string(), "() system_v");
        sig.params.push(AbiParam::new(I32));
        sig.params.push(AbiParam::new(F32));
        sig.returns.push(AbiParam::new(I32).uext());
        assert_eq!(sig.to_string(), "(i32, f32) -> i32 uext system_v");
    }

    #[test]
    fn external_names() {
        assert_eq!(ExternalName::user(2, 14).to_string(), "u2:14");
        assert_eq!(ExternalName::testcase("adds").to_string(), "%adds");
        assert_eq!(
            ExternalName::LibCall(LibCall::Memcpy).to_string(),
            "%Memcpy"
        );
    }
}
