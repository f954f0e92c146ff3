//! Zone Domains activation control settings.
//!
//! A Zone Domains device keeps three persistent settings that govern zone
//! activation:
//!
//! | Field          | Wire type | "Leave unchanged" sentinel |
//! |----------------|-----------|----------------------------|
//! | FSNOZ          | `u32`     | `0xFFFF_FFFF`              |
//! | URSWRZ         | `u8`      | `0xFF`                     |
//! | MAX ACTIVATION | `u16`     | `0xFFFF` (`0xFFFE` = unlimited) |
//!
//! Domain code never sees a sentinel. Settings read from the device are
//! concrete values ([`ActivationSettings`]), requested changes are optional
//! fields ([`ActivationUpdate`]), and the merged set request
//! ([`ActivationRequest`]) only becomes sentinel-filled in
//! [`ActivationRequest::encode`], right before it is handed to the driver.
//!
//! Note the asymmetry: a merged request is NOT a snapshot. A field the caller
//! did not ask to change is sent as "leave unchanged", not as its current value.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DevControlError, Result};

/// Sentinel for "leave the default number of zones to activate unchanged"
pub const NR_ZONES_UNCHANGED: u32 = 0xFFFF_FFFF;
/// Sentinel for "leave the unrestricted read setting unchanged"
pub const URSWRZ_UNCHANGED: u8 = 0xFF;
/// Sentinel for "leave the maximum activation setting unchanged"
pub const MAX_ACTIVATE_UNCHANGED: u16 = 0xFFFF;
/// Maximum activation value meaning "no limit"
pub const MAX_ACTIVATE_UNLIMITED: u16 = 0xFFFE;

const OP_DECODE: &str = "zone activation control get";

/// Raw zone activation control block as exchanged with the driver.
///
/// Used in both directions: filled by the device on a get, filled by
/// [`ActivationRequest::encode`] on a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneActivationControl {
    /// FSNOZ
    pub nr_zones: u32,
    /// URSWRZ
    pub urswrz: u8,
    pub max_activate: u16,
}

impl ZoneActivationControl {
    /// True if every field holds its "leave unchanged" sentinel
    pub fn is_all_unchanged(&self) -> bool {
        self.nr_zones == NR_ZONES_UNCHANGED
            && self.urswrz == URSWRZ_UNCHANGED
            && self.max_activate == MAX_ACTIVATE_UNCHANGED
    }
}

/// Maximum number of zone realms that may be activated at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaxActivation {
    Limited(u16),
    Unlimited,
}

impl MaxActivation {
    /// Build a limit, rejecting values that collide with reserved encodings.
    ///
    /// # Errors
    ///
    /// - `Usage` for zero, `0xFFFE` and `0xFFFF`
    pub fn limited(value: u16) -> Result<Self> {
        match value {
            0 => Err(DevControlError::usage("invalid -maxr value")),
            MAX_ACTIVATE_UNLIMITED | MAX_ACTIVATE_UNCHANGED => Err(DevControlError::usage(
                format!("-maxr value {} is reserved, use \"unlimited\"", value),
            )),
            v => Ok(Self::Limited(v)),
        }
    }

    /// Wire encoding
    pub const fn code(self) -> u16 {
        match self {
            Self::Limited(v) => v,
            Self::Unlimited => MAX_ACTIVATE_UNLIMITED,
        }
    }
}

impl fmt::Display for MaxActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(v) => write!(f, "{}", v),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Concrete activation settings as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationSettings {
    /// Default number of zones to activate (FSNOZ)
    pub nr_zones: u32,
    /// Unrestricted reads of sequential write required zones (URSWRZ)
    pub unrestricted_read: bool,
    pub max_activate: MaxActivation,
}

impl ActivationSettings {
    /// Decode a get response.
    ///
    /// A device always reports concrete values on a get, so a sentinel here
    /// is a protocol violation rather than "unchanged".
    ///
    /// # Errors
    ///
    /// - `InvalidResponse` if any field holds its sentinel
    pub fn decode(raw: &ZoneActivationControl) -> Result<Self> {
        if raw.nr_zones == NR_ZONES_UNCHANGED {
            return Err(DevControlError::invalid_response(
                OP_DECODE,
                "FSNOZ holds the reserved value 0xffffffff",
            ));
        }
        let unrestricted_read = match raw.urswrz {
            URSWRZ_UNCHANGED => {
                return Err(DevControlError::invalid_response(
                    OP_DECODE,
                    "URSWRZ holds the reserved value 0xff",
                ));
            }
            v => v != 0,
        };
        let max_activate = match raw.max_activate {
            MAX_ACTIVATE_UNCHANGED => {
                return Err(DevControlError::invalid_response(
                    OP_DECODE,
                    "MAX ACTIVATION holds the reserved value 0xffff",
                ));
            }
            MAX_ACTIVATE_UNLIMITED => MaxActivation::Unlimited,
            v => MaxActivation::Limited(v),
        };

        Ok(Self {
            nr_zones: raw.nr_zones,
            unrestricted_read,
            max_activate,
        })
    }

    /// Encode as a raw control block holding these exact values
    pub fn encode(&self) -> ZoneActivationControl {
        ZoneActivationControl {
            nr_zones: self.nr_zones,
            urswrz: u8::from(self.unrestricted_read),
            max_activate: self.max_activate.code(),
        }
    }
}

impl fmt::Display for ActivationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FSNOZ: {}, URSWRZ: {}, MAX ACTIVATION: {}",
            self.nr_zones,
            if self.unrestricted_read { "Y" } else { "N" },
            self.max_activate
        )
    }
}

/// Changes requested by the caller. `None` means "not requested".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivationUpdate {
    pub nr_zones: Option<u32>,
    pub unrestricted_read: Option<bool>,
    pub max_activate: Option<MaxActivation>,
}

impl ActivationUpdate {
    /// True if no field change was requested
    pub fn is_empty(&self) -> bool {
        self.nr_zones.is_none() && self.unrestricted_read.is_none() && self.max_activate.is_none()
    }
}

/// A set request: each field is either a new value or "leave unchanged".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivationRequest {
    pub nr_zones: Option<u32>,
    pub unrestricted_read: Option<bool>,
    pub max_activate: Option<MaxActivation>,
}

impl ActivationRequest {
    /// True if sending this request would not change anything.
    ///
    /// Such a request must never be issued.
    pub fn is_noop(&self) -> bool {
        self.nr_zones.is_none() && self.unrestricted_read.is_none() && self.max_activate.is_none()
    }

    /// Encode for the driver, filling untouched fields with their sentinels
    pub fn encode(&self) -> ZoneActivationControl {
        ZoneActivationControl {
            nr_zones: self.nr_zones.unwrap_or(NR_ZONES_UNCHANGED),
            urswrz: self
                .unrestricted_read
                .map_or(URSWRZ_UNCHANGED, u8::from),
            max_activate: self
                .max_activate
                .map_or(MAX_ACTIVATE_UNCHANGED, MaxActivation::code),
        }
    }
}

/// Merge requested changes into a set request.
///
/// Requested fields carry the caller's value. Every other field is "leave
/// unchanged", regardless of `current`: the device keeps its own value, the
/// client does not echo back the snapshot it read.
pub fn merge_update(current: &ActivationSettings, changes: &ActivationUpdate) -> ActivationRequest {
    tracing::debug!(%current, ?changes, "merging activation control changes");
    ActivationRequest {
        nr_zones: changes.nr_zones,
        unrestricted_read: changes.unrestricted_read,
        max_activate: changes.max_activate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> ActivationSettings {
        ActivationSettings {
            nr_zones: 4,
            unrestricted_read: false,
            max_activate: MaxActivation::Limited(100),
        }
    }

    #[test]
    fn test_empty_merge_is_all_sentinel() {
        let req = merge_update(&current(), &ActivationUpdate::default());
        assert!(req.is_noop());
        let raw = req.encode();
        assert!(raw.is_all_unchanged());
        assert_eq!(raw.nr_zones, 0xFFFF_FFFF);
        assert_eq!(raw.urswrz, 0xFF);
        assert_eq!(raw.max_activate, 0xFFFF);
    }

    #[test]
    fn test_single_field_merge() {
        let changes = ActivationUpdate {
            nr_zones: Some(10),
            ..Default::default()
        };
        let raw = merge_update(&current(), &changes).encode();
        assert_eq!(
            raw,
            ZoneActivationControl {
                nr_zones: 10,
                urswrz: URSWRZ_UNCHANGED,
                max_activate: MAX_ACTIVATE_UNCHANGED,
            }
        );
    }

    #[test]
    fn test_merge_ignores_current_values() {
        let changes = ActivationUpdate {
            unrestricted_read: Some(false),
            ..Default::default()
        };
        let raw = merge_update(&current(), &changes).encode();
        assert_eq!(raw.urswrz, 0x00);
        // current nr_zones is 4, but the request must not echo it
        assert_eq!(raw.nr_zones, NR_ZONES_UNCHANGED);
    }

    #[test]
    fn test_unlimited_is_not_the_sentinel() {
        let changes = ActivationUpdate {
            max_activate: Some(MaxActivation::Unlimited),
            ..Default::default()
        };
        let raw = merge_update(&current(), &changes).encode();
        assert_eq!(raw.max_activate, 0xFFFE);
        assert!(!raw.is_all_unchanged());
    }

    #[test]
    fn test_decode_concrete_values() {
        let raw = ZoneActivationControl {
            nr_zones: 8,
            urswrz: 0x01,
            max_activate: MAX_ACTIVATE_UNLIMITED,
        };
        let s = ActivationSettings::decode(&raw).expect("concrete values decode");
        assert_eq!(s.nr_zones, 8);
        assert!(s.unrestricted_read);
        assert_eq!(s.max_activate, MaxActivation::Unlimited);
        assert_eq!(s.encode(), raw);
    }

    #[test]
    fn test_decode_rejects_sentinels() {
        let good = current().encode();
        for raw in [
            ZoneActivationControl { nr_zones: NR_ZONES_UNCHANGED, ..good },
            ZoneActivationControl { urswrz: URSWRZ_UNCHANGED, ..good },
            ZoneActivationControl { max_activate: MAX_ACTIVATE_UNCHANGED, ..good },
        ] {
            let err = ActivationSettings::decode(&raw).unwrap_err();
            assert!(matches!(err, DevControlError::InvalidResponse { .. }));
        }
    }

    #[test]
    fn test_max_activation_reserved_values() {
        assert!(MaxActivation::limited(0).is_err());
        assert!(MaxActivation::limited(0xFFFE).is_err());
        assert!(MaxActivation::limited(0xFFFF).is_err());
        assert_eq!(MaxActivation::limited(32).expect("valid"), MaxActivation::Limited(32));
    }

    #[test]
    fn test_settings_display() {
        assert_eq!(
            current().to_string(),
            "FSNOZ: 4, URSWRZ: N, MAX ACTIVATION: 100"
        );
    }
}
