//! Registers: virtual registers assigned by lowering, real registers
//! assigned by the register allocator, and the operand descriptions that
//! connect them.

use core::fmt;

/// The class of a register: which bank of the machine's register file it
/// lives in. Generic code never assumes anything about the classes beyond
/// their identity; the target decides how classes map onto hardware banks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegClass {
    /// General-purpose integer registers.
    Int,
    /// Scalar floating point registers.
    Float,
    /// SIMD vector registers. On AArch64 these are the float registers
    /// viewed at full width.
    Vector,
}

impl RegClass {
    /// The hardware bank index backing this class. Float and vector
    /// registers share the V-register bank.
    pub fn bank(self) -> usize {
        match self {
            RegClass::Int => 0,
            RegClass::Float | RegClass::Vector => 1,
        }
    }
}

/// A real (hardware) register: a hardware encoding plus a class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealReg {
    hw_enc: u8,
    class: RegClass,
}

impl RealReg {
    /// Construct a real register from its hardware encoding.
    pub const fn new(class: RegClass, hw_enc: u8) -> Self {
        Self { hw_enc, class }
    }

    /// The hardware encoding (register number within the bank).
    pub fn hw_enc(self) -> u8 {
        self.hw_enc
    }

    /// The register class.
    pub fn class(self) -> RegClass {
        self.class
    }

    /// A dense index usable for bit sets: bank * 64 + encoding.
    pub fn index(self) -> usize {
        self.class.bank() * 64 + self.hw_enc as usize
    }
}

impl fmt::Debug for RealReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.class {
            RegClass::Int => write!(f, "x{}", self.hw_enc),
            RegClass::Float | RegClass::Vector => write!(f, "v{}", self.hw_enc),
        }
    }
}

/// A virtual register, allocated freely during lowering and replaced by a
/// real register (or spill slot) by the register allocator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualReg {
    index: u32,
    class: RegClass,
}

impl VirtualReg {
    /// Construct a virtual register.
    pub const fn new(index: u32, class: RegClass) -> Self {
        Self { index, class }
    }

    /// The dense index of this vreg.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// The register class.
    pub fn class(self) -> RegClass {
        self.class
    }
}

impl fmt::Debug for VirtualReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%v{}", self.index)
    }
}

/// A register, either virtual or real.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    /// A virtual register.
    Virtual(VirtualReg),
    /// A real register.
    Real(RealReg),
}

impl Reg {
    /// The class of this register.
    pub fn class(self) -> RegClass {
        match self {
            Reg::Virtual(v) => v.class(),
            Reg::Real(r) => r.class(),
        }
    }

    /// Is this a real register?
    pub fn is_real(self) -> bool {
        matches!(self, Reg::Real(_))
    }

    /// Is this a virtual register?
    pub fn is_virtual(self) -> bool {
        matches!(self, Reg::Virtual(_))
    }

    /// View as a real register, if it is one.
    pub fn to_real_reg(self) -> Option<RealReg> {
        match self {
            Reg::Real(r) => Some(r),
            Reg::Virtual(_) => None,
        }
    }

    /// View as a virtual register, if it is one.
    pub fn to_virtual_reg(self) -> Option<VirtualReg> {
        match self {
            Reg::Virtual(v) => Some(v),
            Reg::Real(_) => None,
        }
    }
}

impl From<RealReg> for Reg {
    fn from(r: RealReg) -> Self {
        Reg::Real(r)
    }
}

impl From<VirtualReg> for Reg {
    fn from(v: VirtualReg) -> Self {
        Reg::Virtual(v)
    }
}

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reg::Virtual(v) => v.fmt(f),
            Reg::Real(r) => r.fmt(f),
        }
    }
}

/// A newtype wrapper around a register, for defs.
///
/// An instruction field of type `Writable<Reg>` is a register the
/// instruction writes. Constructing one is an explicit act, which keeps
/// accidental writes to a use-position register out of the instruction
/// constructors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Writable<T> {
    reg: T,
}

impl<T: Copy> Writable<T> {
    /// Explicitly construct a `Writable<T>` from a `T`.
    pub const fn from_reg(reg: T) -> Self {
        Self { reg }
    }

    /// Get the underlying register.
    pub fn to_reg(self) -> T {
        self.reg
    }

    /// Map the underlying register.
    pub fn map<U: Copy>(self, f: impl Fn(T) -> U) -> Writable<U> {
        Writable { reg: f(self.reg) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Writable({:?})", self.reg)
    }
}

/// How an instruction touches one of its registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    /// Read at instruction start.
    Use,
    /// Written at instruction end.
    Def,
    /// Read, and must be in the given real register.
    FixedUse(RealReg),
    /// Written, and must be in the given real register.
    FixedDef(RealReg),
    /// Written, and must share the register of the n'th operand collected
    /// for this instruction (a two-address-form constraint).
    Reuse(usize),
}

/// One operand record: a register and the way it is accessed.
#[derive(Clone, Copy, Debug)]
pub struct Operand {
    /// The (virtual, pre-allocation) register.
    pub reg: Reg,
    /// Access kind.
    pub kind: OperandKind,
}

/// A compact set of real registers.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct RealRegSet {
    bits: [u64; 2],
}

impl RealRegSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a register.
    pub fn insert(&mut self, reg: RealReg) {
        self.bits[reg.class().bank()] |= 1 << reg.hw_enc();
    }

    /// Does the set contain `reg`?
    pub fn contains(&self, reg: RealReg) -> bool {
        self.bits[reg.class().bank()] & (1 << reg.hw_enc()) != 0
    }

    /// Iterate over the registers in bank order.
    pub fn iter(&self) -> impl Iterator<Item = RealReg> + '_ {
        (0..2).flat_map(move |bank| {
            let bits = self.bits[bank];
            (0..64).filter_map(move |enc| {
                if bits & (1 << enc) != 0 {
                    let class = if bank == 0 {
                        RegClass::Int
                    } else {
                        RegClass::Float
                    };
                    Some(RealReg::new(class, enc as u8))
                } else {
                    None
                }
            })
        })
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.bits == [0, 0]
    }
}

impl fmt::Debug for RealRegSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Collects the operand descriptions of one instruction.
///
/// Each machine instruction reports its registers to a collector; the
/// register allocator consumes the records, and the same reporting drives
/// the post-allocation register renaming.
#[derive(Default)]
pub struct OperandCollector {
    /// The operand records, in collection order.
    pub operands: Vec<Operand>,
    /// Real registers clobbered by the instruction (calls).
    pub clobbers: RealRegSet,
}

impl OperandCollector {
    /// Reset for a new instruction.
    pub fn clear(&mut self) {
        self.operands.clear();
        self.clobbers = RealRegSet::empty();
    }

    /// Record a register read.
    pub fn reg_use(&mut self, reg: Reg) {
        self.operands.push(Operand {
            reg,
            kind: OperandKind::Use,
        });
    }

    /// Record a register write.
    pub fn reg_def(&mut self, reg: Writable<Reg>) {
        self.operands.push(Operand {
            reg: reg.to_reg(),
            kind: OperandKind::Def,
        });
    }

    /// Record a read constrained to a specific real register.
    pub fn reg_fixed_use(&mut self, reg: Reg, fixed: RealReg) {
        self.operands.push(Operand {
            reg,
            kind: OperandKind::FixedUse(fixed),
        });
    }

    /// Record a write constrained to a specific real register.
    pub fn reg_fixed_def(&mut self, reg: Writable<Reg>, fixed: RealReg) {
        self.operands.push(Operand {
            reg: reg.to_reg(),
            kind: OperandKind::FixedDef(fixed),
        });
    }

    /// Record a write that must land in the same register as the `idx`'th
    /// collected operand.
    pub fn reg_reuse_def(&mut self, reg: Writable<Reg>, idx: usize) {
        self.operands.push(Operand {
            reg: reg.to_reg(),
            kind: OperandKind::Reuse(idx),
        });
    }

    /// Record the clobber set of a call.
    pub fn reg_clobbers(&mut self, set: RealRegSet) {
        for reg in set.iter() {
            self.clobbers.insert(reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_classification() {
        let x5 = RealReg::new(RegClass::Int, 5);
        let v9 = RealReg::new(RegClass::Float, 9);
        assert_eq!(x5.class(), RegClass::Int);
        assert_ne!(x5.index(), v9.index());
        assert_eq!(format!("{x5:?}"), "x5");
        assert_eq!(format!("{v9:?}"), "v9");

        let vreg = VirtualReg::new(3, RegClass::Int);
        let reg: Reg = vreg.into();
        assert!(reg.is_virtual());
        assert_eq!(reg.to_virtual_reg(), Some(vreg));
        assert_eq!(reg.to_real_reg(), None);
    }

    #[test]
    fn reg_set() {
        let mut set = RealRegSet::empty();
        assert!(set.is_empty());
        set.insert(RealReg::new(RegClass::Int, 0));
        set.insert(RealReg::new(RegClass::Float, 31));
        assert!(set.contains(RealReg::new(RegClass::Int, 0)));
        assert!(!set.contains(RealReg::new(RegClass::Int, 1)));
        // Vector and float registers share a bank.
        assert!(set.contains(RealReg::new(RegClass::Vector, 31)));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn collector_records_kinds() {
        let mut col = OperandCollector::default();
        let v0: Reg = VirtualReg::new(0, RegClass::Int).into();
        let v1: Reg = VirtualReg::new(1, RegClass::Int).into();
        col.reg_use(v0);
        col.reg_fixed_def(Writable::from_reg(v1), RealReg::new(RegClass::Int, 0));
        assert_eq!(col.operands.len(), 2);
        assert_eq!(col.operands[0].kind, OperandKind::Use);
        assert!(matches!(col.operands[1].kind, OperandKind::FixedDef(r) if r.hw_enc() == 0));
    }
}
