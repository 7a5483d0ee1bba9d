//! Result and error types representing the outcome of compiling a function.

use crate::verifier::VerifierErrors;
use std::fmt;

/// A compilation error.
///
/// When a function fails to compile, the compilation is aborted at the stage
/// that discovered the problem and one of these is returned. No partial
/// artifact is produced; the input `Function` remains valid for inspection or
/// retry with different flags.
#[derive(Debug)]
pub enum CodegenError {
    /// A list of IR verifier errors.
    ///
    /// This always represents a bug in the code that produced the IR, either
    /// a frontend or an optimization pass.
    Verifier(VerifierErrors),

    /// The lowering has no rule for this opcode at this type.
    Unsupported(String),

    /// A legal IR construct could not be encoded on the target, even after
    /// every legalization fallback. Fixups found out of range after emission
    /// also land here, since earlier stages should have sized operand forms.
    Lowering(String),

    /// The register allocator ran out of registers after its spill heuristics
    /// failed to find a victim. An implementation limit; well-formed IR
    /// should not reach it.
    Regalloc(String),

    /// The code size for the function is too large.
    CodeTooLarge,

    /// An internal invariant was broken; names the stage and function.
    /// Indicates a bug in the compiler itself.
    InternalError {
        /// Pipeline stage that detected the violation.
        stage: &'static str,
        /// Description of the broken invariant.
        message: String,
    },
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error
/// type.
pub type CodegenResult<T> = Result<T, CodegenError>;

impl std::error::Error for CodegenError {}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Verifier(errors) => write!(f, "verifier errors: {errors}"),
            Self::Unsupported(feature) => write!(f, "unsupported instruction: {feature}"),
            Self::Lowering(msg) => write!(f, "cannot encode on this target: {msg}"),
            Self::Regalloc(msg) => write!(f, "register allocation failed: {msg}"),
            Self::CodeTooLarge => write!(f, "code size exceeds implementation limit"),
            Self::InternalError { stage, message } => {
                write!(f, "internal invariant broken in {stage}: {message}")
            }
        }
    }
}

impl From<VerifierErrors> for CodegenError {
    fn from(errors: VerifierErrors) -> Self {
        Self::Verifier(errors)
    }
}
