//! The rewrite-rule DSL compiler.
//!
//! Instruction selection is driven by rules written in a small S-expression
//! language: `type` declarations introduce extern types, `decl` declares
//! terms with their signatures, `extern` binds terms to Rust constructors
//! and extractors, and `rule` relates a left-hand-side pattern to a
//! right-hand-side expression, optionally with an explicit priority.
//!
//! The compiler runs lex → parse → semantic analysis → trie construction →
//! code generation, producing the Rust source of a dispatch function whose
//! body is a nested match over terms and extractor results. Rule order in
//! the trie is deterministic and observable: explicit priority first, then
//! pattern specificity (more bound structure wins), then declaration order.
//!
//! ```
//! let src = r#"
//!     (type Value extern)
//!     (decl lower (Value) Value)
//!     (decl iadd (Value Value) Value)
//!     (extern extractor iadd extract_iadd)
//!     (decl add_inst (Value Value) Value)
//!     (extern constructor add_inst emit_add)
//!     (rule (lower (iadd x y)) (add_inst x y))
//! "#;
//! let rust = ingot_dsl::compile(src).unwrap();
//! assert!(rust.contains("fn constructor_lower"));
//! ```

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod sema;
pub mod trie;

pub use error::{Error, Errors};

/// Compile DSL source into the Rust source of its dispatch functions.
///
/// This is the one-shot entry point a build script calls.
pub fn compile(src: &str) -> Result<String, Errors> {
    let tokens = lexer::lex(src)?;
    let defs = parser::parse(tokens)?;
    let sema = sema::analyze(&defs)?;
    let tries = trie::build_tries(&sema);
    Ok(codegen::emit(&sema, &tries))
}

#[cfg(test)]
mod tests {
    #[test]
    fn end_to_end_smoke() {
        let src = r#"
            ;; Minimal rule set.
            (type Value extern)
            (decl lower (Value) Value)
            (decl iadd (Value Value) Value)
            (extern extractor iadd extract_iadd)
            (decl isub (Value Value) Value)
            (extern extractor isub extract_isub)
            (decl add_inst (Value Value) Value)
            (extern constructor add_inst emit_add)
            (decl sub_inst (Value Value) Value)
            (extern constructor sub_inst emit_sub)
            (rule (lower (iadd x y)) (add_inst x y))
            (rule (lower (isub x y)) (sub_inst x y))
        "#;
        let out = super::compile(src).unwrap();
        assert!(out.contains("fn constructor_lower"));
        assert!(out.contains("extract_iadd"));
        assert!(out.contains("emit_sub"));
    }
}
