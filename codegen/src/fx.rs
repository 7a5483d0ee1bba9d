//! Fast, non-cryptographic hash containers used throughout the crate.
//! Compilation is single-threaded and the keys are small integers, so HashDoS
//! resistance buys nothing here.

pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
