//! Catalog of documented mutation target names.
//!
//! Maps the symbolic names accepted by `-mu <target>` to validated
//! `(target, option)` pairs. Matching is exact and case-sensitive.
//!
//! `ZD_SOBR` and `ZONE_DOM_SOBR` are both documented names for the same
//! Zone Domains layout and resolve to the same option code.

use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumMessage, EnumString, IntoEnumIterator};

use crate::error::{DevControlError, Result};
use crate::mutation::{
    non_zoned, Mutation, MutationOption, MutationTarget, SmrOption, ZoneDomainOption,
};

/// A documented mutation target name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(AsRefStr, EnumIter, EnumMessage, EnumString)]
pub enum MutationPreset {
    #[strum(serialize = "NON_ZONED", message = "A classic, not zoned, device")]
    NonZoned,
    #[strum(serialize = "HM_ZONED", message = "Host-managed SMR device, no CMR zones")]
    HmZoned,
    #[strum(
        serialize = "HM_ZONED_1PCNT_B",
        message = "Host-managed SMR device, 1% CMR at bottom"
    )]
    HmZoned1PcntB,
    #[strum(
        serialize = "HM_ZONED_2PCNT_BT",
        message = "Host-managed SMR device, 2% CMR at bottom, one CMR zone at top"
    )]
    HmZoned2PcntBt,
    #[strum(
        serialize = "HM_ZONED_FAULTY",
        message = "Host-managed SMR device with offline and read-only zones"
    )]
    HmZonedFaulty,
    #[strum(serialize = "HA_ZONED", message = "Host-aware SMR device, no CMR zones")]
    HaZoned,
    #[strum(
        serialize = "HA_ZONED_1PCNT_B",
        message = "Host-aware SMR device, 1% CMR at bottom"
    )]
    HaZoned1PcntB,
    #[strum(
        serialize = "HA_ZONED_2PCNT_BT",
        message = "Host-aware SMR device, 2% CMR at bottom, one CMR zone at top"
    )]
    HaZoned2PcntBt,
    #[strum(
        serialize = "ZONE_DOM",
        message = "DH-SMR device supporting Zone Domains command set, conventional CMR zones, no CMR-only realms"
    )]
    ZoneDom,
    #[strum(
        serialize = "ZD_1CMR_BOT",
        message = "Same as ZONE_DOM, but the first zone realm is CMR-only"
    )]
    Zd1CmrBot,
    #[strum(
        serialize = "ZD_1CMR_BOT_SWP",
        message = "Same as ZD_1CMR_BOT, but with SWP zones instead of SWR"
    )]
    Zd1CmrBotSwp,
    #[strum(
        serialize = "ZD_1CMR_BOT_TOP",
        message = "Same as ZONE_DOM, but the first and last zone realms are CMR-only"
    )]
    Zd1CmrBotTop,
    #[strum(
        serialize = "ZD_1CMR_BT_SMR",
        message = "Same as ZD_1CMR_BOT_TOP, but initially all SMR"
    )]
    Zd1CmrBtSmr,
    // `to_string` keeps ZD_SOBR as the display name, ZONE_DOM_SOBR still parses
    #[strum(
        to_string = "ZD_SOBR",
        serialize = "ZONE_DOM_SOBR",
        message = "DH-SMR device supporting Zone Domains command set, SOBR CMR zones, no CMR-only realms"
    )]
    ZdSobr,
    #[strum(
        serialize = "ZD_1SOBR_BOT_TOP",
        message = "Same as ZD_1CMR_BOT_TOP, but SOBR instead of Conventional"
    )]
    Zd1SobrBotTop,
    #[strum(
        serialize = "ZD_SOBR_SWP",
        message = "Same as ZD_SOBR, but with SWP zones instead of SWR"
    )]
    ZdSobrSwp,
    #[strum(
        serialize = "ZD_SOBR_EMPTY",
        message = "Same as ZD_SOBR, but SOBR zones start EMPTY instead of FULL"
    )]
    ZdSobrEmpty,
    #[strum(
        serialize = "ZD_BARE_BONE",
        message = "DH-SMR device supporting Zone Domains and minimal features"
    )]
    ZdBareBone,
    #[strum(
        serialize = "ZD_FAULTY",
        message = "Same as ZONE_DOM, several offline and read-only zones injected"
    )]
    ZdFaulty,
    #[strum(
        serialize = "ZD_SOBR_FAULTY",
        message = "Same as ZD_SOBR_EMPTY, several offline and read-only zones injected"
    )]
    ZdSobrFaulty,
}

impl MutationPreset {
    /// The `(target, option)` pair this name stands for
    pub const fn mutation_parts(self) -> (MutationTarget, MutationOption) {
        use MutationOption::{Smr, ZoneDomain};
        use MutationTarget::{HostAwareZoned, HostManagedZoned};
        use ZoneDomainOption as Zd;

        match self {
            Self::NonZoned => (
                MutationTarget::NonZoned,
                MutationOption::NonZoned(non_zoned::GENERIC),
            ),
            Self::HmZoned => (HostManagedZoned, Smr(SmrOption::NoCmr)),
            Self::HmZoned1PcntB => (HostManagedZoned, Smr(SmrOption::OnePercentBottom)),
            Self::HmZoned2PcntBt => (HostManagedZoned, Smr(SmrOption::TwoPercentBottomTop)),
            Self::HmZonedFaulty => (HostManagedZoned, Smr(SmrOption::Faulty)),
            Self::HaZoned => (HostAwareZoned, Smr(SmrOption::NoCmr)),
            Self::HaZoned1PcntB => (HostAwareZoned, Smr(SmrOption::OnePercentBottom)),
            Self::HaZoned2PcntBt => (HostAwareZoned, Smr(SmrOption::TwoPercentBottomTop)),
            Self::ZoneDom => (MutationTarget::ZoneDomain, ZoneDomain(Zd::NoCmr)),
            Self::Zd1CmrBot => (MutationTarget::ZoneDomain, ZoneDomain(Zd::OneCmrBottom)),
            Self::Zd1CmrBotSwp => (MutationTarget::ZoneDomain, ZoneDomain(Zd::OneCmrBottomSwp)),
            Self::Zd1CmrBotTop => (MutationTarget::ZoneDomain, ZoneDomain(Zd::OneCmrBottomTop)),
            Self::Zd1CmrBtSmr => (
                MutationTarget::ZoneDomain,
                ZoneDomain(Zd::OneCmrBottomTopAllSmr),
            ),
            Self::ZdSobr => (MutationTarget::ZoneDomain, ZoneDomain(Zd::SobrNoCmr)),
            Self::Zd1SobrBotTop => (
                MutationTarget::ZoneDomain,
                ZoneDomain(Zd::OneSobrBottomTop),
            ),
            Self::ZdSobrSwp => (MutationTarget::ZoneDomain, ZoneDomain(Zd::SobrSwp)),
            Self::ZdSobrEmpty => (MutationTarget::ZoneDomain, ZoneDomain(Zd::SobrEmpty)),
            Self::ZdBareBone => (MutationTarget::ZoneDomain, ZoneDomain(Zd::BareBone)),
            Self::ZdFaulty => (MutationTarget::ZoneDomain, ZoneDomain(Zd::Faulty)),
            Self::ZdSobrFaulty => (MutationTarget::ZoneDomain, ZoneDomain(Zd::SobrFaulty)),
        }
    }

    /// The validated mutation this name stands for
    pub fn mutation(self) -> Mutation {
        let (target, option) = self.mutation_parts();
        // Every catalog row pairs a known target with an option of its own family
        Mutation::from_parts_unchecked(target, option)
    }

    /// One-line description shown in the usage text
    pub fn description(self) -> &'static str {
        self.get_message().unwrap_or("")
    }
}

/// Resolve a documented target name.
///
/// # Errors
///
/// - `UnknownMutationTarget` for any name not in the catalog. The lookup
///   never falls back to an `Unknown` target.
pub fn resolve_by_name(name: &str) -> Result<Mutation> {
    MutationPreset::from_str(name)
        .map(MutationPreset::mutation)
        .map_err(|_| DevControlError::UnknownMutationTarget(name.to_string()))
}

/// Resolve raw numeric input.
///
/// Performs no validation beyond mapping the target id. Check
/// [`Mutation::is_valid`] before issuing the result to a device.
pub fn resolve_numeric(target_id: u32, option_code: u32) -> Mutation {
    Mutation::from_raw(target_id, option_code)
}

/// Usage text listing every documented target name.
pub fn targets_help() -> String {
    let mut lines = vec!["Mutation targets:".to_string()];
    for preset in MutationPreset::iter() {
        let name = match preset {
            MutationPreset::ZdSobr => "ZD_SOBR or ZONE_DOM_SOBR",
            _ => preset.as_ref(),
        };
        lines.push(format!("  {:<25} : {}", name, preset.description()));
    }
    lines.join("\n")
}
