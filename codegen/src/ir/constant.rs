//! Constants.
//!
//! Large constants (anything that does not fit in an instruction immediate,
//! such as 128-bit vectors) are stored in a per-function constant pool and
//! referenced by `Constant` handles. The pool deduplicates, so repeated uses
//! of the same bytes share one entry, and the emitter places the pool in
//! constant islands reachable by PC-relative loads.

use crate::entity::PrimaryMap;
use crate::fx::FxHashMap;
use crate::ir::Constant;
use core::fmt;
use core::slice;

/// The raw bytes of a constant, little-endian.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConstantData(Vec<u8>);

impl ConstantData {
    /// The length of the constant in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Is the constant empty?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The bytes of the constant.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Iterate over the bytes.
    pub fn iter(&self) -> slice::Iter<u8> {
        self.0.iter()
    }
}

impl From<Vec<u8>> for ConstantData {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for ConstantData {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl From<u64> for ConstantData {
    fn from(v: u64) -> Self {
        Self(v.to_le_bytes().to_vec())
    }
}

impl From<u128> for ConstantData {
    fn from(v: u128) -> Self {
        Self(v.to_le_bytes().to_vec())
    }
}

impl fmt::Display for ConstantData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for b in self.0.iter().rev() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Deduplicating pool of constants used within a function.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    handles: PrimaryMap<Constant, ConstantData>,
    cache: FxHashMap<ConstantData, Constant>,
}

impl ConstantPool {
    /// Create a new constant pool instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the constant pool of all data.
    pub fn clear(&mut self) {
        self.handles.clear();
        self.cache.clear();
    }

    /// Insert constant data into the pool, returning a handle for later
    /// referencing; when the data was inserted previously, the existing
    /// handle is returned.
    pub fn insert(&mut self, data: ConstantData) -> Constant {
        if let Some(&handle) = self.cache.get(&data) {
            return handle;
        }
        let handle = self.handles.push(data.clone());
        self.cache.insert(data, handle);
        handle
    }

    /// Retrieve the data of a constant, panicking on an invalid handle.
    pub fn get(&self, constant: Constant) -> &ConstantData {
        &self.handles[constant]
    }

    /// Iterate over the constants in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Constant, &ConstantData)> {
        self.handles.iter()
    }

    /// The number of constants in the pool.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Is the pool empty?
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl core::hash::Hash for ConstantPool {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        // The cache is derived data; only the handles define identity.
        self.handles.hash(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.insert(ConstantData::from(1u64));
        let b = pool.insert(ConstantData::from(2u64));
        let c = pool.insert(ConstantData::from(1u64));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(a).as_slice(), &1u64.to_le_bytes());
    }

    #[test]
    fn display_bytes_big_endian() {
        let data = ConstantData::from(vec![0x01, 0x02, 0x03]);
        assert_eq!(data.to_string(), "0x030201");
    }
}
