//! Memory operation flags.

use core::fmt;

/// The disjoint region of memory a load or store accesses.
///
/// Memory is statically partitioned: an address belongs to exactly one
/// region, and a producer of IR must never access the same memory under two
/// different regions. Alias analysis relies on this to keep one "last store"
/// slot per region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AliasRegion {
    /// Function-local stack memory.
    Stack,
    /// General heap memory.
    Heap,
    /// Global/static data.
    Global,
    /// Anything else; may alias all other `Unknown` accesses.
    Unknown,
}

/// Flags for memory operations like load/store.
///
/// Each of these flags introduce a limited form of undefined behavior. The
/// flags each enable certain optimizations that need to make additional
/// assumptions. Generally, the semantics of a program does not change when a
/// flag is removed, but adding a flag will.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemFlags {
    bits: u8,
}

const BIT_NOTRAP: u8 = 1;
const BIT_ALIGNED: u8 = 2;
const REGION_SHIFT: u8 = 2;
const REGION_MASK: u8 = 0b11 << REGION_SHIFT;

impl MemFlags {
    /// Create a new empty set of flags. The access is to the `Unknown`
    /// region.
    pub fn new() -> Self {
        Self { bits: 0 }.with_alias_region(AliasRegion::Unknown)
    }

    /// Create a set of flags representing an access from a "trusted"
    /// address, meaning it's known to be aligned and non-trapping.
    pub fn trusted() -> Self {
        Self::new().with_notrap().with_aligned()
    }

    /// Test if the `notrap` flag is set.
    ///
    /// Loads and stores are all assumed to trap if they touch invalid
    /// memory; this flag asserts the access cannot trap.
    pub fn notrap(self) -> bool {
        self.bits & BIT_NOTRAP != 0
    }

    /// Set the `notrap` flag, returning new flags.
    pub fn with_notrap(mut self) -> Self {
        self.bits |= BIT_NOTRAP;
        self
    }

    /// Test if the `aligned` flag is set.
    ///
    /// By default, loads and stores are allowed to be misaligned; this flag
    /// asserts natural alignment.
    pub fn aligned(self) -> bool {
        self.bits & BIT_ALIGNED != 0
    }

    /// Set the `aligned` flag, returning new flags.
    pub fn with_aligned(mut self) -> Self {
        self.bits |= BIT_ALIGNED;
        self
    }

    /// Which disjoint memory region does this access touch?
    pub fn alias_region(self) -> AliasRegion {
        match (self.bits & REGION_MASK) >> REGION_SHIFT {
            0 => AliasRegion::Unknown,
            1 => AliasRegion::Stack,
            2 => AliasRegion::Heap,
            _ => AliasRegion::Global,
        }
    }

    /// Set the alias region, returning new flags.
    pub fn with_alias_region(mut self, region: AliasRegion) -> Self {
        let code = match region {
            AliasRegion::Unknown => 0,
            AliasRegion::Stack => 1,
            AliasRegion::Heap => 2,
            AliasRegion::Global => 3,
        };
        self.bits = (self.bits & !REGION_MASK) | (code << REGION_SHIFT);
        self
    }
}

impl Default for MemFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.notrap() {
            write!(f, " notrap")?;
        }
        if self.aligned() {
            write!(f, " aligned")?;
        }
        match self.alias_region() {
            AliasRegion::Unknown => {}
            AliasRegion::Stack => write!(f, " stack")?,
            AliasRegion::Heap => write!(f, " heap")?,
            AliasRegion::Global => write!(f, " global")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_round_trip() {
        for region in [
            AliasRegion::Stack,
            AliasRegion::Heap,
            AliasRegion::Global,
            AliasRegion::Unknown,
        ] {
            let flags = MemFlags::new().with_alias_region(region);
            assert_eq!(flags.alias_region(), region);
        }
    }

    #[test]
    fn flags_are_independent() {
        let flags = MemFlags::new()
            .with_notrap()
            .with_alias_region(AliasRegion::Heap);
        assert!(flags.notrap());
        assert!(!flags.aligned());
        assert_eq!(flags.alias_region(), AliasRegion::Heap);
        assert_eq!(flags.to_string(), " notrap heap");
    }
}
