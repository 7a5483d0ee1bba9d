//! Ingot code generation library.
//!
//! This crate lowers a machine-independent SSA intermediate representation to
//! binary machine code. A host program builds an [`ir::Function`] through the
//! builder API, hands it to a [`Context`], and receives a
//! [`CompiledCode`](machinst::CompiledCode) artifact: the encoded bytes
//! together with relocations, trap records, and unwind metadata ready for
//! linking or JIT loading.
//!
//! The pipeline is strictly sequential within one compilation:
//! verify, optimize, lower to virtual-register machine instructions, allocate
//! registers, emit. Traversal orders are deterministic, so identical input
//! and flags produce bytewise-identical output.

#![allow(clippy::new_without_default)]

pub use crate::context::Context;
pub use crate::result::{CodegenError, CodegenResult};

#[macro_use]
extern crate log;

pub mod cursor;
pub mod dominator_tree;
pub mod flowgraph;
pub mod frontend;
pub mod ir;
pub mod isa;
pub mod loop_analysis;
pub mod machinst;
pub mod settings;
pub mod timing;
pub mod verifier;

mod alias_analysis;
mod context;
mod copyprop;
mod dce;
mod divconst_magic_numbers;
mod fx;
mod inst_predicates;
mod licm;
mod nan_canonicalization;
mod preopt;
mod result;
mod sccp;
mod simple_gvn;
mod unreachable_code;

pub use ingot_entity as entity;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
