//! Device driver interface consumed by the control workflow.
//!
//! The workflow never talks to a transport directly. It opens a device
//! through a [`DeviceDriver`] and issues commands on the returned
//! [`ZonedDevice`] handle. The handle is held by a [`DeviceSession`], which
//! guarantees it is closed exactly once on every exit path.

pub mod emulated;

use std::fmt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::activation::ZoneActivationControl;
use crate::mutation::{Mutation, SupportedMutation};

pub use emulated::{EmulatedDevice, EmulatedDriver, EmulatedImage};

bitflags! {
    /// Capability flags reported in the device information.
    pub struct DeviceFlags: u32 {
        /// Reads of unwritten sectors in sequential zones are allowed
        const UNRESTRICTED_READ = 0x0000_0001;
        /// Zone Domains command set is supported
        const ZONE_DOMAINS_SUPPORT = 0x0000_0002;
        /// Zone realms reporting is supported
        const ZONE_REALMS_SUPPORT = 0x0000_0004;
        /// MUTATE and REPORT MUTATIONS are supported
        const MUTATE_SUPPORT = 0x0000_0008;
    }
}

bitflags! {
    /// Flags passed to [`DeviceDriver::open`].
    pub struct OpenFlags: u32 {
        const READ_ONLY = 0x0000_0001;
        const DRV_BLOCK = 0x0100_0000;
        const DRV_SCSI = 0x0200_0000;
        const DRV_ATA = 0x0400_0000;
        /// Accept any backend driver
        const DRV_MASK = Self::DRV_BLOCK.bits | Self::DRV_SCSI.bits | Self::DRV_ATA.bits;
    }
}

/// Zone model of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceModel {
    #[default]
    #[strum(serialize = "Unknown")]
    Unknown,
    #[strum(serialize = "Standard block device")]
    Standard,
    #[strum(serialize = "Host-aware")]
    HostAware,
    #[strum(serialize = "Host-managed")]
    HostManaged,
    #[strum(serialize = "Zone domains")]
    ZoneDomains,
}

/// Device information snapshot.
///
/// Only valid for the handle it was read from: a mutation changes geometry
/// and capability flags, so a new handle must be opened to observe them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: String,
    pub model: DeviceModel,
    pub flags: DeviceFlags,
    /// Capacity in 512 B sectors
    pub sectors: u64,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    /// Maximum number of explicitly open sequential zones, if limited
    pub max_nr_open_seq_req: Option<u32>,
}

impl DeviceInfo {
    #[inline]
    pub fn supports_mutate(&self) -> bool {
        self.flags.contains(DeviceFlags::MUTATE_SUPPORT)
    }

    #[inline]
    pub fn supports_zone_domains(&self) -> bool {
        self.flags.contains(DeviceFlags::ZONE_DOMAINS_SUPPORT)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    Vendor ID: {}", self.vendor_id)?;
        writeln!(f, "    {} interface", self.model)?;
        let bytes = self.sectors.saturating_mul(512);
        writeln!(
            f,
            "    {} 512-bytes sectors ({:.3} GB)",
            self.sectors,
            bytes as f64 / 1_000_000_000.0
        )?;
        writeln!(
            f,
            "    {} B logical blocks, {} B physical blocks",
            self.logical_block_size, self.physical_block_size
        )?;
        if matches!(self.model, DeviceModel::HostManaged | DeviceModel::ZoneDomains) {
            match self.max_nr_open_seq_req {
                Some(n) => writeln!(f, "    Maximum number of open sequential write required zones: {}", n)?,
                None => writeln!(f, "    Maximum number of open sequential write required zones: unlimited")?,
            }
        }
        writeln!(
            f,
            "    Unrestricted read: {}",
            yes_no(self.flags.contains(DeviceFlags::UNRESTRICTED_READ))
        )?;
        writeln!(f, "    Zone domains command set: {}", yes_no(self.supports_zone_domains()))?;
        writeln!(
            f,
            "    Zone realms reporting: {}",
            yes_no(self.flags.contains(DeviceFlags::ZONE_REALMS_SUPPORT))
        )?;
        write!(f, "    Mutate: {}", yes_no(self.supports_mutate()))
    }
}

fn yes_no(v: bool) -> &'static str {
    if v { "supported" } else { "not supported" }
}

/// Failure reported by a driver call.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The device completed the command with an error status
    #[error("{0}")]
    Status(#[from] Errno),

    /// The backing store of the device could not be accessed
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The device image is malformed
    #[error("invalid device image: {0}")]
    Image(String),
}

/// Opens devices.
pub trait DeviceDriver {
    type Device: ZonedDevice;

    /// Open the device at `path`.
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Self::Device, DriverError>;
}

/// Commands available on an open device handle.
///
/// All calls are synchronous. Blocking and timeouts are the driver's concern.
pub trait ZonedDevice {
    /// Information captured when the handle was opened
    fn info(&self) -> DeviceInfo;

    /// Number of supported mutation records the device will report
    fn report_mutation_count(&mut self) -> Result<u32, DriverError>;

    /// Fill `buf` with supported mutation records.
    ///
    /// Returns the number of records the device reported. The device may
    /// report more than `buf.len()` if its state changed since the count was
    /// read. Only `buf.len()` records are ever written.
    fn report_mutations(&mut self, buf: &mut [SupportedMutation]) -> Result<usize, DriverError>;

    fn mutate(&mut self, mutation: &Mutation) -> Result<(), DriverError>;

    /// Get (`set == false`) or set (`set == true`) the activation control block.
    ///
    /// On a get, `ctl` is overwritten with the current settings. On a set,
    /// fields holding their sentinel are left unchanged by the device.
    fn zone_activation_control(
        &mut self,
        ctl: &mut ZoneActivationControl,
        set: bool,
    ) -> Result<(), DriverError>;

    /// Release the handle
    fn close(self) -> Result<(), DriverError>
    where
        Self: Sized;
}

/// Scoped ownership of one open device handle.
///
/// Closing is explicit through [`DeviceSession::close`]. If the session is
/// dropped while still holding a handle (early return, `?`), `Drop` closes
/// it. Either way the handle is closed exactly once.
pub struct DeviceSession<D: ZonedDevice> {
    path: PathBuf,
    device: Option<D>,
}

impl<D: ZonedDevice> DeviceSession<D> {
    /// Open `path` through `driver`.
    pub fn open<Drv>(driver: &Drv, path: &Path, flags: OpenFlags) -> Result<Self, DriverError>
    where
        Drv: DeviceDriver<Device = D>,
    {
        tracing::debug!(path = %path.display(), flags = ?flags, "opening device");
        let device = driver.open(path, flags)?;
        Ok(Self {
            path: path.to_path_buf(),
            device: Some(device),
        })
    }

    /// Borrow the open handle.
    ///
    /// # Errors
    ///
    /// - `Status(EBADF)` once the handle has been released
    pub fn device(&mut self) -> Result<&mut D, DriverError> {
        self.device.as_mut().ok_or(DriverError::Status(Errno::EBADF))
    }

    /// Information reported by the open handle
    ///
    /// # Errors
    ///
    /// - `Status(EBADF)` once the handle has been released
    pub fn info(&self) -> Result<DeviceInfo, DriverError> {
        self.device
            .as_ref()
            .map(ZonedDevice::info)
            .ok_or(DriverError::Status(Errno::EBADF))
    }

    /// Close the handle and report the close status.
    pub fn close(mut self) -> Result<(), DriverError> {
        match self.device.take() {
            Some(device) => {
                tracing::debug!(path = %self.path.display(), "closing device");
                device.close()
            }
            None => Ok(()),
        }
    }
}

impl<D: ZonedDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            tracing::debug!(path = %self.path.display(), "closing device on early exit");
            if let Err(e) = device.close() {
                tracing::warn!(path = %self.path.display(), "failed to close device: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drv_mask_covers_all_backends() {
        assert!(OpenFlags::DRV_MASK.contains(OpenFlags::DRV_BLOCK));
        assert!(OpenFlags::DRV_MASK.contains(OpenFlags::DRV_SCSI));
        assert!(OpenFlags::DRV_MASK.contains(OpenFlags::DRV_ATA));
        assert!(!OpenFlags::DRV_MASK.contains(OpenFlags::READ_ONLY));
    }

    #[test]
    fn test_capability_checks() {
        let mut info = DeviceInfo {
            vendor_id: "ATA TEST".into(),
            model: DeviceModel::HostManaged,
            flags: DeviceFlags::MUTATE_SUPPORT,
            sectors: 1 << 20,
            logical_block_size: 4096,
            physical_block_size: 4096,
            max_nr_open_seq_req: Some(128),
        };
        assert!(info.supports_mutate());
        assert!(!info.supports_zone_domains());

        info.flags = DeviceFlags::ZONE_DOMAINS_SUPPORT | DeviceFlags::ZONE_REALMS_SUPPORT;
        assert!(!info.supports_mutate());
        assert!(info.supports_zone_domains());
    }

    #[test]
    fn test_info_display_mentions_capabilities() {
        let info = DeviceInfo {
            vendor_id: "ATA TEST".into(),
            model: DeviceModel::ZoneDomains,
            flags: DeviceFlags::ZONE_DOMAINS_SUPPORT,
            sectors: 2_000_000,
            logical_block_size: 512,
            physical_block_size: 4096,
            max_nr_open_seq_req: None,
        };
        let text = info.to_string();
        assert!(text.contains("Vendor ID: ATA TEST"));
        assert!(text.contains("Zone domains interface"));
        assert!(text.contains("Zone domains command set: supported"));
        assert!(text.contains("Mutate: not supported"));
    }

    /// Handle counting its closes in a shared cell
    struct Counted(std::rc::Rc<std::cell::Cell<usize>>);

    impl ZonedDevice for Counted {
        fn info(&self) -> DeviceInfo {
            DeviceInfo {
                vendor_id: "ATA COUNTED".into(),
                model: DeviceModel::Standard,
                flags: DeviceFlags::empty(),
                sectors: 8,
                logical_block_size: 512,
                physical_block_size: 512,
                max_nr_open_seq_req: None,
            }
        }

        fn report_mutation_count(&mut self) -> Result<u32, DriverError> {
            Ok(0)
        }

        fn report_mutations(&mut self, _: &mut [SupportedMutation]) -> Result<usize, DriverError> {
            Ok(0)
        }

        fn mutate(&mut self, _: &Mutation) -> Result<(), DriverError> {
            Ok(())
        }

        fn zone_activation_control(
            &mut self,
            _: &mut ZoneActivationControl,
            _: bool,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        fn close(self) -> Result<(), DriverError> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    struct CountingDriver(std::rc::Rc<std::cell::Cell<usize>>);

    impl DeviceDriver for CountingDriver {
        type Device = Counted;

        fn open(&self, _: &Path, _: OpenFlags) -> Result<Counted, DriverError> {
            Ok(Counted(std::rc::Rc::clone(&self.0)))
        }
    }

    #[test]
    fn test_session_accessors_on_open_handle() {
        let closes = std::rc::Rc::new(std::cell::Cell::new(0));
        let driver = CountingDriver(std::rc::Rc::clone(&closes));
        let mut session =
            DeviceSession::open(&driver, Path::new("/dev/sdz"), OpenFlags::DRV_MASK).expect("open");

        assert_eq!(session.info().expect("info").vendor_id, "ATA COUNTED");
        assert_eq!(session.device().expect("device").report_mutation_count().expect("count"), 0);

        session.close().expect("close");
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_dropped_session_closes_once() {
        let closes = std::rc::Rc::new(std::cell::Cell::new(0));
        let driver = CountingDriver(std::rc::Rc::clone(&closes));
        {
            let _session = DeviceSession::open(&driver, Path::new("/dev/sdz"), OpenFlags::DRV_MASK)
                .expect("open");
        }
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_driver_error_from_errno() {
        let err: DriverError = Errno::ENOTSUP.into();
        assert!(matches!(err, DriverError::Status(Errno::ENOTSUP)));
    }
}
