//! Shared settings controlling compilation.
//!
//! Settings are assembled through a [`Builder`] and frozen into an immutable
//! [`Flags`] value which the ISA and every pass read. The same `Flags` can be
//! shared by any number of compilations.

use std::fmt;
use std::str::FromStr;

/// Optimization level for generated code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptLevel {
    /// Don't do any optimization.
    None,
    /// Optimize for speed.
    Speed,
    /// Optimize for speed and code size; re-runs the cheap cleanup passes to
    /// a fixedpoint.
    SpeedAndSize,
}

impl FromStr for OptLevel {
    type Err = SetError;

    fn from_str(s: &str) -> Result<Self, SetError> {
        match s {
            "none" => Ok(Self::None),
            "speed" => Ok(Self::Speed),
            "speed_and_size" => Ok(Self::SpeedAndSize),
            _ => Err(SetError::BadValue("opt_level".into())),
        }
    }
}

/// An error produced when changing a setting.
#[derive(Debug, PartialEq, Eq)]
pub enum SetError {
    /// No setting by this name exists.
    BadName(String),
    /// The setting does not accept this value.
    BadValue(String),
}

impl fmt::Display for SetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadName(name) => write!(f, "no setting named '{name}'"),
            Self::BadValue(setting) => write!(f, "invalid value for setting '{setting}'"),
        }
    }
}

impl std::error::Error for SetError {}

/// Collect settings values before they are frozen into a `Flags` value.
#[derive(Clone)]
pub struct Builder {
    flags: Flags,
}

impl Builder {
    /// Create a builder with all settings at their defaults.
    pub fn new() -> Self {
        Self {
            flags: Flags::default(),
        }
    }

    /// Set the value of a named setting.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), SetError> {
        let bool_value = || -> Result<bool, SetError> {
            match value {
                "true" | "on" | "yes" | "1" => Ok(true),
                "false" | "off" | "no" | "0" => Ok(false),
                _ => Err(SetError::BadValue(name.into())),
            }
        };
        match name {
            "opt_level" => self.flags.opt_level = value.parse()?,
            "enable_verifier" => self.flags.enable_verifier = bool_value()?,
            "enable_probestack" => self.flags.enable_probestack = bool_value()?,
            "enable_spectre_mitigation" => self.flags.enable_spectre_mitigation = bool_value()?,
            "enable_nan_canonicalization" => {
                self.flags.enable_nan_canonicalization = bool_value()?
            }
            "is_pic" => self.flags.is_pic = bool_value()?,
            "use_lse_atomics" => self.flags.use_lse_atomics = bool_value()?,
            _ => return Err(SetError::BadName(name.into())),
        }
        Ok(())
    }

    /// Enable a boolean setting.
    pub fn enable(&mut self, name: &str) -> Result<(), SetError> {
        self.set(name, "true")
    }
}

/// Flags group for shared settings.
///
/// Immutable once constructed from a [`Builder`].
#[derive(Clone, Debug)]
pub struct Flags {
    opt_level: OptLevel,
    enable_verifier: bool,
    enable_probestack: bool,
    enable_spectre_mitigation: bool,
    enable_nan_canonicalization: bool,
    is_pic: bool,
    use_lse_atomics: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Speed,
            enable_verifier: true,
            enable_probestack: true,
            enable_spectre_mitigation: false,
            enable_nan_canonicalization: false,
            is_pic: false,
            use_lse_atomics: false,
        }
    }
}

impl Flags {
    /// Freeze the builder into a flags value.
    pub fn new(builder: Builder) -> Self {
        builder.flags
    }

    /// Optimization level for generated code.
    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Run the IR verifier at pipeline boundaries.
    pub fn enable_verifier(&self) -> bool {
        self.enable_verifier
    }

    /// Emit stack-probe loops for frames larger than a guard page.
    pub fn enable_probestack(&self) -> bool {
        self.enable_probestack
    }

    /// Harden table dispatch against speculative out-of-bounds reads.
    pub fn enable_spectre_mitigation(&self) -> bool {
        self.enable_spectre_mitigation
    }

    /// Replace NaN results of float ops with a single canonical pattern.
    pub fn enable_nan_canonicalization(&self) -> bool {
        self.enable_nan_canonicalization
    }

    /// Generate position-independent addressing for symbols (GOT / TLSDESC).
    pub fn is_pic(&self) -> bool {
        self.is_pic
    }

    /// Use large-system-extension atomic instructions instead of
    /// load-linked/store-conditional loops.
    pub fn use_lse_atomics(&self) -> bool {
        self.use_lse_atomics
    }
}

/// Either a `Flags` reference or a full ISA, whichever the caller has handy.
/// Verifier entry points accept this so they can be called both before and
/// after an ISA is selected.
pub struct FlagsOrIsa<'a> {
    /// Shared flags.
    pub flags: &'a Flags,
    /// The ISA, if known.
    pub isa: Option<&'a dyn crate::isa::TargetIsa>,
}

impl<'a> From<&'a Flags> for FlagsOrIsa<'a> {
    fn from(flags: &'a Flags) -> Self {
        Self { flags, isa: None }
    }
}

impl<'a> From<&'a dyn crate::isa::TargetIsa> for FlagsOrIsa<'a> {
    fn from(isa: &'a dyn crate::isa::TargetIsa) -> Self {
        Self {
            flags: isa.flags(),
            isa: Some(isa),
        }
    }
}

/// Create a settings builder.
pub fn builder() -> Builder {
    Builder::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let flags = Flags::new(builder());
        assert_eq!(flags.opt_level(), OptLevel::Speed);
        assert!(flags.enable_verifier());
        assert!(!flags.is_pic());
    }

    #[test]
    fn set_and_reject() {
        let mut b = builder();
        b.set("opt_level", "speed_and_size").unwrap();
        b.set("is_pic", "true").unwrap();
        assert_eq!(
            b.set("no_such_setting", "true"),
            Err(SetError::BadName("no_such_setting".into()))
        );
        assert_eq!(
            b.set("opt_level", "fastest"),
            Err(SetError::BadValue("opt_level".into()))
        );
        let flags = Flags::new(b);
        assert_eq!(flags.opt_level(), OptLevel::SpeedAndSize);
        assert!(flags.is_pic());
    }
}
