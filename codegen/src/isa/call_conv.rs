//! Calling convention enumeration.

use core::fmt;
use core::str::FromStr;
use target_lexicon::Triple;

/// Calling convention identifiers.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CallConv {
    /// Best performance, not ABI-stable: integer arguments extend through
    /// x17 and float arguments through v15.
    Fast,
    /// Smallest caller code size, not ABI-stable. Register usage matches
    /// the C convention; the callee is assumed rarely executed.
    Cold,
    /// The AAPCS64 System V-style ABI.
    SystemV,
    /// AAPCS64 as implemented by Apple platforms: x18 is reserved and
    /// there is no red zone.
    AppleAarch64,
}

impl CallConv {
    /// Return the default calling convention for the given target triple.
    pub fn triple_default(triple: &Triple) -> Self {
        match triple.operating_system {
            target_lexicon::OperatingSystem::MacOSX(_)
            | target_lexicon::OperatingSystem::Darwin(_)
            | target_lexicon::OperatingSystem::IOS(_) => Self::AppleAarch64,
            _ => Self::SystemV,
        }
    }

    /// Is the x18 platform register reserved under this convention?
    pub fn reserves_x18(self) -> bool {
        self == Self::AppleAarch64
    }

    /// Is there a red zone below the stack pointer?
    ///
    /// AAPCS64 grants leaf functions 128 bytes below SP; Apple platforms
    /// do not.
    pub fn has_red_zone(self) -> bool {
        self != Self::AppleAarch64
    }

    /// Does this convention extend the argument registers beyond the
    /// AAPCS64 set?
    pub fn extends_arg_regs(self) -> bool {
        self == Self::Fast
    }
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Cold => "cold",
            Self::SystemV => "system_v",
            Self::AppleAarch64 => "apple_aarch64",
        })
    }
}

impl FromStr for CallConv {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Self::Fast),
            "cold" => Ok(Self::Cold),
            "system_v" => Ok(Self::SystemV),
            "apple_aarch64" => Ok(Self::AppleAarch64),
            _ => Err(()),
        }
    }
}
