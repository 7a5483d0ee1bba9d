//! AArch64 ISA definitions: immediate constants.

use crate::ir::Type;
use crate::isa::aarch64::inst::OperandSize;

/// An immediate that represents the NZCV flags.
#[derive(Clone, Copy, Debug)]
pub struct NZCV {
    /// The negative condition flag.
    n: bool,
    /// The zero condition flag.
    z: bool,
    /// The carry condition flag.
    c: bool,
    /// The overflow condition flag.
    v: bool,
}

impl NZCV {
    /// Create an NZCV flag bundle.
    pub fn new(n: bool, z: bool, c: bool, v: bool) -> NZCV {
        NZCV { n, z, c, v }
    }

    /// Bits for encoding.
    pub fn bits(&self) -> u32 {
        (u32::from(self.n) << 3)
            | (u32::from(self.z) << 2)
            | (u32::from(self.c) << 1)
            | u32::from(self.v)
    }
}

/// A signed, scaled 7-bit offset for load/store-pair.
#[derive(Clone, Copy, Debug)]
pub struct SImm7Scaled {
    /// The value.
    pub value: i16,
    /// Multiplied by the size of this type.
    pub scale_ty: Type,
}

impl SImm7Scaled {
    /// Create a `SImm7Scaled` from a raw offset and the known scale type,
    /// if possible.
    pub fn maybe_from_i64(value: i64, scale_ty: Type) -> Option<SImm7Scaled> {
        let scale = i64::from(scale_ty.bytes());
        debug_assert!((scale as u64).is_power_of_two());
        let upper_limit = 63 * scale;
        let lower_limit = -(64 * scale);
        if value >= lower_limit && value <= upper_limit && (value & (scale - 1)) == 0 {
            Some(SImm7Scaled {
                value: i16::try_from(value).unwrap(),
                scale_ty,
            })
        } else {
            None
        }
    }

    /// Bits for encoding.
    pub fn bits(&self) -> u32 {
        let scaled = self.value / self.scale_ty.bytes() as i16;
        debug_assert!((-64..=63).contains(&scaled));
        (scaled as u32) & 0x7f
    }
}

/// A signed 9-bit offset for unscaled load/store.
#[derive(Clone, Copy, Debug)]
pub struct SImm9 {
    /// The value.
    pub value: i16,
}

impl SImm9 {
    /// Create a signed 9-bit offset from a full-range value, if possible.
    pub fn maybe_from_i64(value: i64) -> Option<SImm9> {
        if (-256..=255).contains(&value) {
            Some(SImm9 {
                value: value as i16,
            })
        } else {
            None
        }
    }

    /// A zero immediate.
    pub fn zero() -> SImm9 {
        SImm9 { value: 0 }
    }

    /// Bits for encoding.
    pub fn bits(&self) -> u32 {
        (self.value as u32) & 0x1ff
    }
}

/// An unsigned, scaled 12-bit offset for register-plus-offset load/store.
#[derive(Clone, Copy, Debug)]
pub struct UImm12Scaled {
    /// The value.
    pub value: u16,
    /// Multiplied by the size of this type.
    pub scale_ty: Type,
}

impl UImm12Scaled {
    /// Create a `UImm12Scaled` from a raw offset and the known scale type,
    /// if possible.
    pub fn maybe_from_i64(value: i64, scale_ty: Type) -> Option<UImm12Scaled> {
        let scale = i64::from(scale_ty.bytes());
        debug_assert!((scale as u64).is_power_of_two());
        let limit = 4095 * scale;
        if value >= 0 && value <= limit && (value & (scale - 1)) == 0 {
            Some(UImm12Scaled {
                value: value as u16,
                scale_ty,
            })
        } else {
            None
        }
    }

    /// A zero immediate of this scale.
    pub fn zero(scale_ty: Type) -> UImm12Scaled {
        UImm12Scaled { value: 0, scale_ty }
    }

    /// Encoded bits.
    pub fn bits(&self) -> u32 {
        (self.value as u32 / self.scale_ty.bytes()) & 0xfff
    }
}

/// A shifted arithmetic immediate in "imm12" format: 12 bits, shifted left
/// by 0 or 12 places.
#[derive(Clone, Copy, Debug)]
pub struct Imm12 {
    /// The immediate bits.
    pub bits: u16,
    /// Whether the immediate bits are shifted left by 12 or not.
    pub shift12: bool,
}

impl Imm12 {
    /// Compute an `Imm12` from raw bits, if possible.
    pub fn maybe_from_u64(val: u64) -> Option<Imm12> {
        if val < 0x1000 {
            Some(Imm12 {
                bits: val as u16,
                shift12: false,
            })
        } else if val < 0x1_000_000 && (val & 0xfff) == 0 {
            Some(Imm12 {
                bits: (val >> 12) as u16,
                shift12: true,
            })
        } else {
            None
        }
    }

    /// A zero immediate.
    pub fn zero() -> Self {
        Imm12 {
            bits: 0,
            shift12: false,
        }
    }

    /// Bits for the 2-bit "shift" field.
    pub fn shift_bits(&self) -> u32 {
        u32::from(self.shift12)
    }

    /// Bits for the 12-bit "imm" field.
    pub fn imm_bits(&self) -> u32 {
        self.bits as u32
    }
}

/// An immediate for logical instructions.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct ImmLogic {
    /// The actual value.
    value: u64,
    /// `N` flag.
    pub n: bool,
    /// `R` field: rotate amount.
    pub r: u8,
    /// `S` field: element size and element bits.
    pub s: u8,
    /// Was this constructed for a 32-bit or 64-bit instruction?
    pub size: OperandSize,
}

impl ImmLogic {
    /// Compute an `ImmLogic` from raw bits, if possible.
    ///
    /// A logical immediate is a single contiguous run of set bits,
    /// replicated across the word at power-of-two intervals and rotated.
    /// The analysis locates the lowest run of ones, the next one bit above
    /// it, and checks that the value equals the immediate those parameters
    /// would decode to.
    pub fn maybe_from_u64(original_value: u64, ty: Type) -> Option<ImmLogic> {
        if ty != crate::ir::types::I64 && ty != crate::ir::types::I32 {
            return None;
        }
        let inst_size = OperandSize::from_ty(ty);

        let value = if ty == crate::ir::types::I32 {
            // A 32-bit logical immediate is encodable exactly when the
            // value repeated into 64 bits is; duplicate to reuse one
            // analysis.
            let v = original_value & 0xffff_ffff;
            v | (v << 32)
        } else {
            original_value
        };

        // All-zeroes and all-ones are not encodable.
        if value == 0 || value == u64::MAX {
            return None;
        }

        // Rotations can make the run of ones wrap around the word ends; in
        // every such case the complement does not wrap, and identifies the
        // same immediate.
        let (value, inverted) = if value & 1 == 1 {
            (!value, true)
        } else {
            (value, false)
        };

        fn lowest_set_bit(value: u64) -> u64 {
            1u64.checked_shl(value.trailing_zeros()).unwrap_or(0)
        }

        // a: lowest set bit. b: lowest set bit after clearing the bottom
        // run. c: lowest set bit after also removing the bottom run, i.e.
        // the start of the next replication.
        let a = lowest_set_bit(value);
        debug_assert_ne!(a, 0);
        let value_plus_a = value.wrapping_add(a);
        let b = lowest_set_bit(value_plus_a);
        let value_plus_a_minus_b = value_plus_a - b;
        let c = lowest_set_bit(value_plus_a_minus_b);

        let (d, clz_a, out_n, mask) = if c != 0 {
            // More than one replication: d is the replication period.
            let clz_a = a.leading_zeros();
            let clz_c = c.leading_zeros();
            let d = clz_a - clz_c;
            let mask = (1u64 << d) - 1;
            (d, clz_a, 0, mask)
        } else {
            (64, a.leading_zeros(), 1, u64::MAX)
        };

        if !d.is_power_of_two() {
            return None;
        }

        if ((b.wrapping_sub(a)) & !mask) != 0 {
            // The run of ones does not fit within the replication period.
            return None;
        }

        // Rebuild the only immediate these parameters could decode to: the
        // unit `b - a`, replicated every `d` bits. If it differs from the
        // input, the input is not encodable.
        static MULTIPLIERS: [u64; 6] = [
            0x0000000000000001, // d = 64
            0x0000000100000001, // d = 32
            0x0001000100010001, // d = 16
            0x0101010101010101, // d = 8
            0x1111111111111111, // d = 4
            0x5555555555555555, // d = 2
        ];
        let multiplier = MULTIPLIERS[(u64::from(d).leading_zeros() - 57) as usize];
        let candidate = b.wrapping_sub(a).wrapping_mul(multiplier);
        if candidate != value {
            return None;
        }

        // Derive the (element size, run length, rotation) encoding.
        let clz_b = if b == 0 {
            -1i32
        } else {
            b.leading_zeros() as i32
        };
        let mut s = clz_a as i32 - clz_b;
        let r;
        if inverted {
            s = d as i32 - s;
            r = (clz_b + 1) & (d as i32 - 1);
        } else {
            r = (clz_a as i32 + 1) & (d as i32 - 1);
        }
        // The S field carries the element size in its high bits (as the
        // complement of 2d) and the run length minus one in its low bits.
        let s_field = ((-(d as i32) << 1) | (s - 1)) & 0x3f;

        Some(ImmLogic {
            value: original_value,
            n: out_n != 0,
            r: r as u8,
            s: s_field as u8,
            size: inst_size,
        })
    }

    /// The value this immediate represents.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Bits for encoding: N:immr:imms in their instruction positions.
    pub fn enc_bits(&self) -> u32 {
        (u32::from(self.n) << 12) | (u32::from(self.r) << 6) | u32::from(self.s)
    }
}

/// An immediate for shift instructions.
#[derive(Clone, Copy, Debug)]
pub struct ImmShift {
    /// 6-bit shift amount.
    pub imm: u8,
}

impl ImmShift {
    /// Create an `ImmShift` from a shift amount, if possible.
    pub fn maybe_from_u64(val: u64) -> Option<ImmShift> {
        if val < 64 {
            Some(ImmShift { imm: val as u8 })
        } else {
            None
        }
    }

    /// Get the immediate value.
    pub fn value(&self) -> u8 {
        self.imm
    }
}

/// A 16-bit immediate for the move-wide instructions, with a word shift.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveWideConst {
    /// The value.
    pub bits: u16,
    /// Shifted by `shift` 16-bit words.
    pub shift: u8,
}

impl MoveWideConst {
    /// Construct a `MoveWideConst` from an arbitrary 64-bit constant if
    /// exactly one 16-bit chunk is non-zero.
    pub fn maybe_from_u64(value: u64) -> Option<MoveWideConst> {
        for shift in 0..4u8 {
            let mask = 0xffffu64 << (16 * shift);
            if value & !mask == 0 {
                return Some(MoveWideConst {
                    bits: (value >> (16 * shift)) as u16,
                    shift,
                });
            }
        }
        None
    }

    /// The chunk at a given word position, for a movk sequence.
    pub fn maybe_with_shift(chunk: u16, shift: u8) -> Option<MoveWideConst> {
        if shift <= 3 {
            Some(MoveWideConst {
                bits: chunk,
                shift,
            })
        } else {
            None
        }
    }

    /// Zero.
    pub fn zero() -> MoveWideConst {
        MoveWideConst { bits: 0, shift: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{I32, I64};

    #[test]
    fn imm12() {
        assert!(Imm12::maybe_from_u64(0).is_some());
        assert!(Imm12::maybe_from_u64(0xfff).is_some());
        assert!(Imm12::maybe_from_u64(0x1000).is_some());
        assert!(Imm12::maybe_from_u64(0xfff000).is_some());
        assert!(Imm12::maybe_from_u64(0x1001).is_none());
        assert!(Imm12::maybe_from_u64(0x1000000).is_none());
        let imm = Imm12::maybe_from_u64(0x5000).unwrap();
        assert_eq!(imm.imm_bits(), 5);
        assert_eq!(imm.shift_bits(), 1);
    }

    #[test]
    fn simm9_and_uimm12() {
        assert!(SImm9::maybe_from_i64(-256).is_some());
        assert!(SImm9::maybe_from_i64(255).is_some());
        assert!(SImm9::maybe_from_i64(256).is_none());
        assert_eq!(SImm9::maybe_from_i64(-1).unwrap().bits(), 0x1ff);

        let u = UImm12Scaled::maybe_from_i64(32, I64).unwrap();
        assert_eq!(u.bits(), 4);
        assert!(UImm12Scaled::maybe_from_i64(33, I64).is_none());
        assert!(UImm12Scaled::maybe_from_i64(-8, I64).is_none());
    }

    #[test]
    fn move_wide() {
        assert_eq!(
            MoveWideConst::maybe_from_u64(42),
            Some(MoveWideConst { bits: 42, shift: 0 })
        );
        assert_eq!(
            MoveWideConst::maybe_from_u64(0x0001_0000),
            Some(MoveWideConst { bits: 1, shift: 1 })
        );
        assert_eq!(MoveWideConst::maybe_from_u64(0x0001_0001), None);
        assert_eq!(
            MoveWideConst::maybe_from_u64(0xffff_0000_0000_0000),
            Some(MoveWideConst {
                bits: 0xffff,
                shift: 3
            })
        );
    }

    #[test]
    fn logical_immediates() {
        // Encodable patterns.
        for (value, ty) in [
            (0xffu64, I64),
            (0x0f0f_0f0f_0f0f_0f0fu64, I64),
            (0x5555_5555_5555_5555u64, I64),
            (0xff00_ff00u64, I32),
            (0x0000_fff0u64, I64),
            (0x7u64, I32),
        ] {
            assert!(
                ImmLogic::maybe_from_u64(value, ty).is_some(),
                "{value:#x} should be encodable"
            );
        }
        // Unencodable patterns.
        for (value, ty) in [
            (0u64, I64),
            (u64::MAX, I64),
            (0x1234_5678u64, I64),
            (0xab_cdefu64, I32),
        ] {
            assert!(
                ImmLogic::maybe_from_u64(value, ty).is_none(),
                "{value:#x} should not be encodable"
            );
        }
    }

    /// Decode (n, immr, imms) back into the immediate, mirroring the
    /// pseudocode in the architecture manual, and check the round trip.
    fn decode_logical(n: bool, immr: u8, imms: u8, width: u32) -> Option<u64> {
        // Element size comes from the position of the highest set bit of
        // N:NOT(imms).
        let combined = ((n as u32) << 6) | ((!imms as u32) & 0x3f);
        let esize_log2 = 31 - combined.leading_zeros();
        let esize = 1u32 << esize_log2;
        if esize > width {
            return None;
        }
        let s = (imms as u32) & (esize - 1);
        let r = (immr as u32) & (esize - 1);
        if s == esize - 1 {
            return None;
        }
        let ones = (1u128 << (s + 1)) - 1;
        let rotated = (((ones >> r) | (ones << (esize - r as u32))) as u128
            & ((1u128 << esize) - 1)) as u64;
        let mut rep = rotated;
        let mut w = esize;
        while w < width {
            rep |= rep << w;
            w *= 2;
        }
        Some(rep & (u64::MAX >> (64 - width)))
    }

    #[test]
    fn logical_immediate_round_trip() {
        for value in [
            0xffu64,
            0xff00u64,
            0x0f0f_0f0f_0f0f_0f0fu64,
            0x5555_5555_5555_5555u64,
            0xffff_fffeu64,
            0x3fff_ffff_ffff_fffcu64,
        ] {
            let imm = ImmLogic::maybe_from_u64(value, I64)
                .unwrap_or_else(|| panic!("{value:#x} should encode"));
            let decoded = decode_logical(imm.n, imm.r, imm.s, 64)
                .unwrap_or_else(|| panic!("{value:#x} produced undecodable fields"));
            assert_eq!(decoded, value, "round trip failed for {value:#x}");
        }
    }
}
