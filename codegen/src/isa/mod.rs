//! Instruction Set Architectures.
//!
//! The `isa` module provides a `TargetIsa` trait that hides the details of
//! the target's instruction set, registers and calling conventions from the
//! rest of the pipeline. An ISA instance is immutable and can be shared by
//! any number of compilation contexts running in parallel.
//!
//! Construction goes through [`lookup`]:
//!
//! ```
//! use ingot_codegen::isa;
//! use ingot_codegen::settings::{self, Flags};
//! use target_lexicon::Triple;
//!
//! let builder = isa::lookup(Triple::host()).or_else(|_| {
//!     isa::lookup("aarch64-unknown-linux-gnu".parse().unwrap())
//! }).unwrap();
//! let isa = builder.finish(Flags::new(settings::builder()));
//! ```

pub mod aarch64;
mod call_conv;

pub use call_conv::CallConv;

use crate::ir::Function;
use crate::machinst::CompiledCode;
use crate::result::CodegenResult;
use crate::settings::Flags;
use core::fmt;
use std::sync::Arc;
use target_lexicon::{Architecture, Triple};

/// Methods implemented by every instruction set architecture.
pub trait TargetIsa: fmt::Display + Send + Sync {
    /// The name of this ISA.
    fn name(&self) -> &'static str;

    /// The triple this ISA was built for.
    fn triple(&self) -> &Triple;

    /// The shared flags this ISA was built with.
    fn flags(&self) -> &Flags;

    /// Compile a (verified, optimized) function to machine code.
    fn compile_function(&self, func: &Function) -> CodegenResult<CompiledCode>;

    /// The pointer width of this ISA, in bits.
    fn pointer_bits(&self) -> u32 {
        64
    }
}

/// An owned, shareable ISA handle.
pub type OwnedTargetIsa = Arc<dyn TargetIsa>;

/// The error produced by looking up an unsupported ISA.
#[derive(Debug, PartialEq, Eq)]
pub enum LookupError {
    /// Support for this target was disabled in the current build.
    SupportDisabled,
    /// Support for this target has not yet been implemented.
    Unsupported,
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SupportDisabled => write!(f, "support for this target is disabled"),
            Self::Unsupported => write!(f, "support for this target has not been implemented yet"),
        }
    }
}

impl std::error::Error for LookupError {}

/// Builder for an ISA: target-specific settings can be applied before the
/// ISA is frozen with the shared flags.
#[derive(Debug)]
pub struct Builder {
    triple: Triple,
    constructor: fn(Triple, Flags) -> OwnedTargetIsa,
}

impl Builder {
    /// The triple this builder targets.
    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    /// Combine the ISA-specific settings with the provided shared flags and
    /// allocate a fully configured `TargetIsa` instance.
    pub fn finish(self, flags: Flags) -> OwnedTargetIsa {
        (self.constructor)(self.triple, flags)
    }
}

/// Look up an ISA builder for the given target triple.
pub fn lookup(triple: Triple) -> Result<Builder, LookupError> {
    match triple.architecture {
        Architecture::Aarch64(_) => Ok(Builder {
            triple,
            constructor: aarch64::isa_constructor,
        }),
        _ => Err(LookupError::Unsupported),
    }
}

/// Look up an ISA builder by name.
pub fn lookup_by_name(name: &str) -> Result<Builder, LookupError> {
    lookup(name.parse().map_err(|_| LookupError::Unsupported)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_aarch64() {
        assert!(lookup_by_name("aarch64-unknown-linux-gnu").is_ok());
        assert!(lookup_by_name("aarch64-apple-darwin").is_ok());
        assert_eq!(
            lookup_by_name("riscv64gc-unknown-linux-gnu").unwrap_err(),
            LookupError::Unsupported
        );
    }
}
