//! Mutation targets and per-family mutation options.
//!
//! A mutation reconfigures the zone model of a device. The target selects the
//! device type to become, the option selects the zone layout within that
//! family. Both travel on the wire as the numeric codes defined by the Zone
//! Domains extension of the ZBC command set, reproduced here as constants.
//!
//! # Construction Paths
//!
//! | Path                | Produces                               | Validation |
//! |---------------------|----------------------------------------|------------|
//! | `Mutation::new`     | family-checked `(target, option)`      | full       |
//! | `Mutation::from_raw`| `(target, MutationOption::Raw(code))`  | target id only |
//!
//! The raw path exists for advanced use (device-specific option codes) and is
//! kept apart from the symbolic catalog.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::error::{DevControlError, Result};

/// Device type a mutation converts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumIter)]
#[repr(u8)]
pub enum MutationTarget {
    /// Not a valid target, only used for unresolved numeric ids
    #[default]
    #[strum(serialize = "unknown")]
    Unknown = 0x00,
    #[strum(serialize = "non-zoned")]
    NonZoned = 0x01,
    #[strum(serialize = "host-managed")]
    HostManagedZoned = 0x02,
    #[strum(serialize = "host-aware")]
    HostAwareZoned = 0x03,
    #[strum(serialize = "zone-domains")]
    ZoneDomain = 0x04,
}

impl MutationTarget {
    /// Wire id of the target
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Maps a wire id to a target. Out-of-range ids map to `Unknown`.
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x01 => Self::NonZoned,
            0x02 => Self::HostManagedZoned,
            0x03 => Self::HostAwareZoned,
            0x04 => Self::ZoneDomain,
            _ => Self::Unknown,
        }
    }

    #[inline]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// True for the two SMR families sharing the `SmrOption` layout
    #[inline]
    pub const fn is_smr(self) -> bool {
        matches!(self, Self::HostManagedZoned | Self::HostAwareZoned)
    }
}

/// Option sub-code for `NonZoned` targets.
pub mod non_zoned {
    /// Generic, classic non-zoned device
    pub const GENERIC: u32 = 0x01;
}

/// Zone layout options for host-managed and host-aware SMR targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter)]
#[repr(u8)]
pub enum SmrOption {
    /// No CMR zones
    #[strum(serialize = "no CMR")]
    NoCmr = 0x01,
    /// 1% CMR zones at the bottom of the LBA range
    #[strum(serialize = "1% CMR bottom")]
    OnePercentBottom = 0x02,
    /// 2% CMR zones at the bottom, one CMR zone at the top
    #[strum(serialize = "2% CMR bottom, 1 top")]
    TwoPercentBottomTop = 0x03,
    /// Offline and read-only zones injected
    #[strum(serialize = "faulty")]
    Faulty = 0x04,
}

/// Zone layout options for Zone Domains targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter)]
#[repr(u8)]
pub enum ZoneDomainOption {
    /// Conventional CMR zones, no CMR-only realms
    #[strum(serialize = "no CMR realms")]
    NoCmr = 0x01,
    /// First zone realm is CMR-only
    #[strum(serialize = "1 CMR realm bottom")]
    OneCmrBottom = 0x02,
    /// First and last zone realms are CMR-only
    #[strum(serialize = "1 CMR realm bottom and top")]
    OneCmrBottomTop = 0x03,
    /// SOBR CMR zones, no CMR-only realms
    #[strum(serialize = "SOBR, no CMR realms")]
    SobrNoCmr = 0x04,
    /// First and last zone realms are SOBR-only
    #[strum(serialize = "1 SOBR realm bottom and top")]
    OneSobrBottomTop = 0x05,
    /// SOBR zones start empty instead of full
    #[strum(serialize = "SOBR, empty")]
    SobrEmpty = 0x06,
    /// Minimal feature set
    #[strum(serialize = "bare bone")]
    BareBone = 0x07,
    /// Offline and read-only zones injected
    #[strum(serialize = "faulty")]
    Faulty = 0x08,
    /// SOBR empty layout with offline and read-only zones injected
    #[strum(serialize = "SOBR, faulty")]
    SobrFaulty = 0x09,
    /// One CMR realm at the bottom, SWP zones instead of SWR
    #[strum(serialize = "1 CMR realm bottom, SWP")]
    OneCmrBottomSwp = 0x0a,
    /// SOBR layout with SWP zones instead of SWR
    #[strum(serialize = "SOBR, SWP")]
    SobrSwp = 0x0b,
    /// CMR realms at bottom and top, initially all SMR
    #[strum(serialize = "1 CMR realm bottom and top, all SMR")]
    OneCmrBottomTopAllSmr = 0x0c,
}

/// Option half of a mutation, tagged by the family it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationOption {
    /// Device-specific non-zoned sub-code
    NonZoned(u32),
    /// Host-managed or host-aware layout
    Smr(SmrOption),
    /// Zone Domains layout
    ZoneDomain(ZoneDomainOption),
    /// Unvalidated option code from numeric input
    Raw(u32),
}

impl MutationOption {
    /// Wire code of the option
    pub const fn code(self) -> u32 {
        match self {
            Self::NonZoned(code) | Self::Raw(code) => code,
            Self::Smr(opt) => opt as u32,
            Self::ZoneDomain(opt) => opt as u32,
        }
    }

    /// Returns true if this option has a valid shape for `target`.
    ///
    /// Raw options are accepted for any known target: the device decides.
    pub const fn fits(self, target: MutationTarget) -> bool {
        match (self, target) {
            (_, MutationTarget::Unknown) => false,
            (Self::Raw(_), _) => true,
            (Self::NonZoned(_), MutationTarget::NonZoned) => true,
            (Self::Smr(_), t) => t.is_smr(),
            (Self::ZoneDomain(_), MutationTarget::ZoneDomain) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MutationOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZoned(code) => write!(f, "non-zoned option {:#x}", code),
            Self::Smr(opt) => write!(f, "{}", opt),
            Self::ZoneDomain(opt) => write!(f, "{}", opt),
            Self::Raw(code) => write!(f, "option {:#x}", code),
        }
    }
}

/// A validated `(target, option)` pair, immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mutation {
    target: MutationTarget,
    option: MutationOption,
}

impl Mutation {
    /// Build a mutation, checking that the option belongs to the target family.
    ///
    /// # Errors
    ///
    /// - `Usage` if the target is `Unknown` or the option shape does not fit it
    pub fn new(target: MutationTarget, option: MutationOption) -> Result<Self> {
        if !option.fits(target) {
            return Err(DevControlError::usage(format!(
                "{} is not a valid option for {} mutation target",
                option, target
            )));
        }
        Ok(Self { target, option })
    }

    /// Build a mutation from raw numeric input.
    ///
    /// Only the target id is interpreted. An unresolvable id yields an
    /// `Unknown` target, which callers must reject before use.
    pub const fn from_raw(target_id: u32, option_code: u32) -> Self {
        Self {
            target: MutationTarget::from_code(target_id),
            option: MutationOption::Raw(option_code),
        }
    }

    /// Caller guarantees `option.fits(target)`.
    pub(crate) const fn from_parts_unchecked(
        target: MutationTarget,
        option: MutationOption,
    ) -> Self {
        Self { target, option }
    }

    #[inline]
    pub const fn target(&self) -> MutationTarget {
        self.target
    }

    #[inline]
    pub const fn option(&self) -> MutationOption {
        self.option
    }

    /// True if the target resolved to a usable device type
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.target.is_known()
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.target, self.option)
    }
}

/// One mutation capability advertised by a device.
///
/// Purely descriptive: values are whatever the device reported. The zeroed
/// default only exists to size the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SupportedMutation {
    /// Target wire id
    pub target: u8,
    /// Raw option code
    pub option: u32,
}

impl SupportedMutation {
    /// The target id interpreted against the known targets
    pub const fn target_kind(&self) -> MutationTarget {
        MutationTarget::from_code(self.target as u32)
    }
}

impl fmt::Display for SupportedMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MT: {}, Opt: {}", self.target, self.option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_target_codes_round_trip() {
        for target in MutationTarget::iter() {
            assert_eq!(MutationTarget::from_code(target.code() as u32), target);
        }
    }

    #[test]
    fn test_out_of_range_target_is_unknown() {
        assert_eq!(MutationTarget::from_code(0x05), MutationTarget::Unknown);
        assert_eq!(MutationTarget::from_code(0xff), MutationTarget::Unknown);
        assert_eq!(MutationTarget::from_code(u32::MAX), MutationTarget::Unknown);
    }

    #[test]
    fn test_target_wire_ids() {
        assert_eq!(MutationTarget::Unknown.code(), 0x00);
        assert_eq!(MutationTarget::NonZoned.code(), 0x01);
        assert_eq!(MutationTarget::HostManagedZoned.code(), 0x02);
        assert_eq!(MutationTarget::HostAwareZoned.code(), 0x03);
        assert_eq!(MutationTarget::ZoneDomain.code(), 0x04);
        assert_eq!(non_zoned::GENERIC, 0x01);
    }

    #[test]
    fn test_smr_option_codes() {
        let codes = [
            (SmrOption::NoCmr, 0x01),
            (SmrOption::OnePercentBottom, 0x02),
            (SmrOption::TwoPercentBottomTop, 0x03),
            (SmrOption::Faulty, 0x04),
        ];
        assert_eq!(codes.len(), SmrOption::iter().count());
        for (opt, code) in codes {
            assert_eq!(MutationOption::Smr(opt).code(), code, "{:?}", opt);
        }
    }

    #[test]
    fn test_zone_domain_option_codes() {
        use ZoneDomainOption as Zd;
        let codes = [
            (Zd::NoCmr, 0x01),
            (Zd::OneCmrBottom, 0x02),
            (Zd::OneCmrBottomTop, 0x03),
            (Zd::SobrNoCmr, 0x04),
            (Zd::OneSobrBottomTop, 0x05),
            (Zd::SobrEmpty, 0x06),
            (Zd::BareBone, 0x07),
            (Zd::Faulty, 0x08),
            (Zd::SobrFaulty, 0x09),
            (Zd::OneCmrBottomSwp, 0x0a),
            (Zd::SobrSwp, 0x0b),
            (Zd::OneCmrBottomTopAllSmr, 0x0c),
        ];
        assert_eq!(codes.len(), ZoneDomainOption::iter().count());
        for (opt, code) in codes {
            assert_eq!(MutationOption::ZoneDomain(opt).code(), code, "{:?}", opt);
        }
    }

    #[test]
    fn test_smr_options_fit_only_smr_targets() {
        let opt = MutationOption::Smr(SmrOption::NoCmr);
        for target in MutationTarget::iter() {
            assert_eq!(opt.fits(target), target.is_smr(), "{:?}", target);
        }
    }

    #[test]
    fn test_option_family_mismatch_rejected() {
        let err = Mutation::new(
            MutationTarget::NonZoned,
            MutationOption::Smr(SmrOption::NoCmr),
        )
        .unwrap_err();
        assert!(matches!(err, DevControlError::Usage(_)));

        assert!(Mutation::new(
            MutationTarget::ZoneDomain,
            MutationOption::Smr(SmrOption::Faulty)
        )
        .is_err());
    }

    #[test]
    fn test_smr_option_fits_both_smr_families() {
        let opt = MutationOption::Smr(SmrOption::OnePercentBottom);
        assert!(Mutation::new(MutationTarget::HostManagedZoned, opt).is_ok());
        assert!(Mutation::new(MutationTarget::HostAwareZoned, opt).is_ok());
    }

    #[test]
    fn test_unknown_target_rejected_even_with_raw_option() {
        assert!(Mutation::new(MutationTarget::Unknown, MutationOption::Raw(1)).is_err());
    }

    #[test]
    fn test_from_raw_keeps_option_code() {
        let m = Mutation::from_raw(2, 0x77);
        assert_eq!(m.target(), MutationTarget::HostManagedZoned);
        assert_eq!(m.option(), MutationOption::Raw(0x77));
        assert!(m.is_valid());

        let m = Mutation::from_raw(9, 1);
        assert!(!m.is_valid());
    }

    #[test]
    fn test_supported_mutation_display() {
        let sm = SupportedMutation { target: 4, option: 6 };
        assert_eq!(sm.to_string(), "MT: 4, Opt: 6");
        assert_eq!(sm.target_kind(), MutationTarget::ZoneDomain);
    }
}
