//! File-backed emulated zoned device.
//!
//! An emulated device is a JSON image describing what a real drive would
//! report and persist: its zone model, capability flags, the mutations it
//! advertises and its Zone Domains activation settings. Mutations and
//! activation control writes are written back to the image, so they survive
//! across handles exactly like the persistent state of a drive.
//!
//! The image file is locked (`flock`, exclusive, non-blocking) for as long as
//! a handle is open. A second open of the same image fails with
//! `EWOULDBLOCK` instead of racing the first handle.
//!
//! Updates are staged: the new image is written to a locked sibling file,
//! synced and renamed over the old one. A failed write leaves both the file
//! and the handle's view of the image as they were.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

use super::{DeviceDriver, DeviceFlags, DeviceInfo, DeviceModel, DriverError, OpenFlags, ZonedDevice};
use crate::activation::{
    ZoneActivationControl, MAX_ACTIVATE_UNCHANGED, NR_ZONES_UNCHANGED, URSWRZ_UNCHANGED,
};
use crate::mutation::{non_zoned, Mutation, MutationTarget, SupportedMutation};

/// Persistent state of an emulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedImage {
    pub vendor_id: String,
    pub model: DeviceModel,
    /// Raw `DeviceFlags` bits, unknown bits are dropped on load
    pub flags: u32,
    pub sectors: u64,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    #[serde(default)]
    pub max_nr_open_seq_req: Option<u32>,
    #[serde(default)]
    pub supported_mutations: Vec<SupportedMutation>,
    pub activation: ZoneActivationControl,
}

impl EmulatedImage {
    /// A Zone Domains drive advertising every documented mutation.
    pub fn zone_domains(vendor_id: impl Into<String>) -> Self {
        let mut supported = vec![
            SupportedMutation {
                target: MutationTarget::NonZoned.code(),
                option: non_zoned::GENERIC,
            },
        ];
        for target in [MutationTarget::HostManagedZoned, MutationTarget::HostAwareZoned] {
            supported.extend((0x01..=0x04).map(|option| SupportedMutation {
                target: target.code(),
                option,
            }));
        }
        supported.extend((0x01..=0x0c).map(|option| SupportedMutation {
            target: MutationTarget::ZoneDomain.code(),
            option,
        }));

        Self {
            vendor_id: vendor_id.into(),
            model: DeviceModel::ZoneDomains,
            flags: (DeviceFlags::MUTATE_SUPPORT
                | DeviceFlags::ZONE_DOMAINS_SUPPORT
                | DeviceFlags::ZONE_REALMS_SUPPORT)
                .bits(),
            sectors: 29_297_213_440,
            logical_block_size: 4096,
            physical_block_size: 4096,
            max_nr_open_seq_req: Some(128),
            supported_mutations: supported,
            activation: ZoneActivationControl {
                nr_zones: 4,
                urswrz: 0x00,
                max_activate: 100,
            },
        }
    }

    /// Capability flags held by the image
    pub fn device_flags(&self) -> DeviceFlags {
        DeviceFlags::from_bits_truncate(self.flags)
    }

    /// Device information a freshly opened handle reports
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            vendor_id: self.vendor_id.clone(),
            model: self.model,
            flags: self.device_flags(),
            sectors: self.sectors,
            logical_block_size: self.logical_block_size,
            physical_block_size: self.physical_block_size,
            max_nr_open_seq_req: self.max_nr_open_seq_req,
        }
    }

    /// Save the image to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize device image")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write device image to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load an image from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read device image from {:?}", path.as_ref()))?;

        let image: Self =
            serde_json::from_str(&content).context("Failed to parse device image JSON")?;

        Ok(image)
    }

    /// Validate the image
    pub fn validate(&self) -> Result<()> {
        if self.vendor_id.trim().is_empty() {
            bail!("Vendor ID must be specified");
        }
        if self.sectors == 0 {
            bail!("Device capacity must not be zero");
        }
        for bs in [self.logical_block_size, self.physical_block_size] {
            if bs < 512 || !bs.is_power_of_two() {
                bail!("Block size {} is not a power of two of at least 512", bs);
            }
        }

        // Stored settings are what a get reports, so they must be concrete
        let ctl = &self.activation;
        if ctl.nr_zones == NR_ZONES_UNCHANGED || ctl.nr_zones == 0 {
            bail!("Stored FSNOZ {:#x} is not a valid setting", ctl.nr_zones);
        }
        if ctl.urswrz > 0x01 {
            bail!("Stored URSWRZ {:#x} is not a valid setting", ctl.urswrz);
        }
        if ctl.max_activate == MAX_ACTIVATE_UNCHANGED || ctl.max_activate == 0 {
            bail!("Stored MAX ACTIVATION {:#x} is not a valid setting", ctl.max_activate);
        }

        if let Some(sm) = self
            .supported_mutations
            .iter()
            .find(|sm| !sm.target_kind().is_known())
        {
            bail!("Advertised mutation has unknown target {:#x}", sm.target);
        }

        Ok(())
    }

    /// Apply a mutation to the persistent model and capability flags
    fn apply_mutation(&mut self, target: MutationTarget) -> std::result::Result<(), Errno> {
        let mut flags = DeviceFlags::MUTATE_SUPPORT;
        self.model = match target {
            MutationTarget::NonZoned => DeviceModel::Standard,
            MutationTarget::HostManagedZoned => DeviceModel::HostManaged,
            MutationTarget::HostAwareZoned => {
                flags |= DeviceFlags::UNRESTRICTED_READ;
                DeviceModel::HostAware
            }
            MutationTarget::ZoneDomain => {
                flags |= DeviceFlags::ZONE_DOMAINS_SUPPORT | DeviceFlags::ZONE_REALMS_SUPPORT;
                if self.activation.urswrz != 0 {
                    flags |= DeviceFlags::UNRESTRICTED_READ;
                }
                DeviceModel::ZoneDomains
            }
            MutationTarget::Unknown => return Err(Errno::EINVAL),
        };
        self.flags = flags.bits();
        Ok(())
    }

    /// Apply the non-sentinel fields of a set request
    fn apply_activation(&mut self, req: &ZoneActivationControl) -> std::result::Result<(), Errno> {
        if req.nr_zones == 0 || (req.urswrz != URSWRZ_UNCHANGED && req.urswrz > 0x01) {
            return Err(Errno::EINVAL);
        }
        if req.max_activate == 0 {
            return Err(Errno::EINVAL);
        }

        if req.nr_zones != NR_ZONES_UNCHANGED {
            self.activation.nr_zones = req.nr_zones;
        }
        if req.urswrz != URSWRZ_UNCHANGED {
            self.activation.urswrz = req.urswrz;
            let mut flags = self.device_flags();
            flags.set(DeviceFlags::UNRESTRICTED_READ, req.urswrz != 0);
            self.flags = flags.bits();
        }
        if req.max_activate != MAX_ACTIVATE_UNCHANGED {
            self.activation.max_activate = req.max_activate;
        }
        Ok(())
    }
}

/// Driver opening emulated device images.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmulatedDriver;

impl DeviceDriver for EmulatedDriver {
    type Device = EmulatedDevice;

    fn open(&self, path: &Path, flags: OpenFlags) -> std::result::Result<EmulatedDevice, DriverError> {
        if !flags.intersects(OpenFlags::DRV_MASK) {
            return Err(Errno::ENODEV.into());
        }

        // Control state is persisted even for read-only opens: READ_ONLY
        // restricts user data access, not device management commands
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut file = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|(_, errno)| DriverError::Status(errno))?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let image: EmulatedImage = serde_json::from_str(&content)
            .map_err(|e| DriverError::Image(e.to_string()))?;
        image
            .validate()
            .map_err(|e| DriverError::Image(format!("{:#}", e)))?;

        let info = image.info();
        tracing::debug!(model = %info.model, flags = ?info.flags, "emulated device opened");

        Ok(EmulatedDevice {
            path: path.to_path_buf(),
            file,
            image,
            info,
        })
    }
}

/// Open handle on an emulated device image.
pub struct EmulatedDevice {
    path: PathBuf,
    file: Flock<File>,
    image: EmulatedImage,
    /// Snapshot taken at open, not refreshed by `mutate`
    info: DeviceInfo,
}

/// Sibling file a new image is staged in before it replaces `path`
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl EmulatedDevice {
    /// Persist `next` and make it the current image.
    ///
    /// The lock moves to the new file before the old one is released, so
    /// the image is never left unlocked while this handle is open.
    fn commit(&mut self, next: EmulatedImage) -> std::result::Result<(), DriverError> {
        let json =
            serde_json::to_vec_pretty(&next).map_err(|e| DriverError::Image(e.to_string()))?;

        let staging = staging_path(&self.path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)?;
        let mut file = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|(_, errno)| DriverError::Status(errno))?;

        let written = file
            .write_all(&json)
            .and_then(|()| file.sync_data())
            .and_then(|()| fs::rename(&staging, &self.path));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&staging) {
                tracing::warn!(path = %staging.display(), "failed to remove staged image: {}", cleanup);
            }
            return Err(e.into());
        }

        // Dropping the previous Flock releases the lock on the replaced file
        self.file = file;
        self.image = next;
        Ok(())
    }

    fn require(&self, flag: DeviceFlags) -> std::result::Result<(), DriverError> {
        if self.image.device_flags().contains(flag) {
            Ok(())
        } else {
            Err(Errno::EOPNOTSUPP.into())
        }
    }
}

impl ZonedDevice for EmulatedDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn report_mutation_count(&mut self) -> std::result::Result<u32, DriverError> {
        self.require(DeviceFlags::MUTATE_SUPPORT)?;
        u32::try_from(self.image.supported_mutations.len()).map_err(|_| Errno::EOVERFLOW.into())
    }

    fn report_mutations(
        &mut self,
        buf: &mut [SupportedMutation],
    ) -> std::result::Result<usize, DriverError> {
        self.require(DeviceFlags::MUTATE_SUPPORT)?;
        let records = &self.image.supported_mutations;
        let n = records.len().min(buf.len());
        buf[..n].copy_from_slice(&records[..n]);
        Ok(records.len())
    }

    fn mutate(&mut self, mutation: &Mutation) -> std::result::Result<(), DriverError> {
        self.require(DeviceFlags::MUTATE_SUPPORT)?;
        let target = mutation.target().code();
        let option = mutation.option().code();
        let advertised = self
            .image
            .supported_mutations
            .iter()
            .any(|sm| sm.target == target && sm.option == option);
        if !advertised {
            tracing::debug!(target, option, "mutation not advertised by emulated device");
            return Err(Errno::EINVAL.into());
        }

        let mut next = self.image.clone();
        next.apply_mutation(mutation.target())?;
        self.commit(next)
    }

    fn zone_activation_control(
        &mut self,
        ctl: &mut ZoneActivationControl,
        set: bool,
    ) -> std::result::Result<(), DriverError> {
        self.require(DeviceFlags::ZONE_DOMAINS_SUPPORT)?;
        if set {
            let mut next = self.image.clone();
            next.apply_activation(ctl)?;
            self.commit(next)
        } else {
            *ctl = self.image.activation;
            Ok(())
        }
    }

    fn close(self) -> std::result::Result<(), DriverError> {
        // Dropping the Flock releases the lock before the file is closed
        let file = self
            .file
            .unlock()
            .map_err(|(_, errno)| DriverError::Status(errno))?;
        drop(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::resolve_by_name;

    fn write_image(dir: &tempfile::TempDir, image: &EmulatedImage) -> std::path::PathBuf {
        let path = dir.path().join("zd.json");
        image.save_to_file(&path).expect("write image");
        path
    }

    fn open(path: &Path) -> EmulatedDevice {
        EmulatedDriver
            .open(path, OpenFlags::DRV_MASK | OpenFlags::READ_ONLY)
            .expect("open image")
    }

    #[test]
    fn test_default_image_is_valid() {
        let image = EmulatedImage::zone_domains("ATA EMULATED");
        image.validate().expect("valid image");
        assert_eq!(image.supported_mutations.len(), 21);
    }

    #[test]
    fn test_validate_rejects_sentinel_settings() {
        let mut image = EmulatedImage::zone_domains("ATA EMULATED");
        image.activation.max_activate = MAX_ACTIVATE_UNCHANGED;
        assert!(image.validate().is_err());

        let mut image = EmulatedImage::zone_domains("ATA EMULATED");
        image.activation.urswrz = URSWRZ_UNCHANGED;
        assert!(image.validate().is_err());
    }

    #[test]
    fn test_open_requires_a_driver_bit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_image(&dir, &EmulatedImage::zone_domains("ATA EMULATED"));
        let err = EmulatedDriver
            .open(&path, OpenFlags::READ_ONLY)
            .err()
            .expect("no driver selected");
        assert!(matches!(err, DriverError::Status(Errno::ENODEV)));
    }

    #[test]
    fn test_second_open_is_refused_while_locked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_image(&dir, &EmulatedImage::zone_domains("ATA EMULATED"));

        let first = open(&path);
        let err = EmulatedDriver
            .open(&path, OpenFlags::DRV_MASK)
            .err()
            .expect("image is locked");
        assert!(matches!(err, DriverError::Status(Errno::EWOULDBLOCK)));

        first.close().expect("close");
        open(&path).close().expect("reopen after close");
    }

    #[test]
    fn test_mutation_persists_but_info_is_per_handle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_image(&dir, &EmulatedImage::zone_domains("ATA EMULATED"));

        let mut dev = open(&path);
        let m = resolve_by_name("HM_ZONED").expect("catalog");
        dev.mutate(&m).expect("mutate");
        // Stale until reopened
        assert_eq!(dev.info().model, DeviceModel::ZoneDomains);
        dev.close().expect("close");

        let dev = open(&path);
        assert_eq!(dev.info().model, DeviceModel::HostManaged);
        assert!(!dev.info().supports_zone_domains());
        dev.close().expect("close");
    }

    #[test]
    fn test_unadvertised_mutation_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut image = EmulatedImage::zone_domains("ATA EMULATED");
        image.supported_mutations.retain(|sm| sm.target != 0x02);
        let path = write_image(&dir, &image);

        let mut dev = open(&path);
        let err = dev
            .mutate(&resolve_by_name("HM_ZONED").expect("catalog"))
            .unwrap_err();
        assert!(matches!(err, DriverError::Status(Errno::EINVAL)));
        dev.close().expect("close");
    }

    #[test]
    fn test_set_keeps_fields_holding_sentinels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_image(&dir, &EmulatedImage::zone_domains("ATA EMULATED"));

        let mut dev = open(&path);
        let mut req = ZoneActivationControl {
            nr_zones: NR_ZONES_UNCHANGED,
            urswrz: 0x01,
            max_activate: MAX_ACTIVATE_UNCHANGED,
        };
        dev.zone_activation_control(&mut req, true).expect("set");

        let mut ctl = ZoneActivationControl::default();
        dev.zone_activation_control(&mut ctl, false).expect("get");
        assert_eq!(
            ctl,
            ZoneActivationControl {
                nr_zones: 4,
                urswrz: 0x01,
                max_activate: 100,
            }
        );
        dev.close().expect("close");

        assert!(!staging_path(&path).exists());
        let image = EmulatedImage::load_from_file(&path).expect("reload");
        assert_eq!(image.activation.urswrz, 0x01);
        assert!(image.device_flags().contains(DeviceFlags::UNRESTRICTED_READ));
    }

    #[test]
    fn test_failed_write_leaves_image_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let original = EmulatedImage::zone_domains("ATA EMULATED");
        let path = write_image(&dir, &original);
        // A directory in the way makes staging the new image fail
        fs::create_dir(staging_path(&path)).expect("block staging file");

        let mut dev = open(&path);
        let mut req = ZoneActivationControl {
            nr_zones: 9,
            urswrz: URSWRZ_UNCHANGED,
            max_activate: MAX_ACTIVATE_UNCHANGED,
        };
        let err = dev.zone_activation_control(&mut req, true).unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));

        let err = dev
            .mutate(&resolve_by_name("HM_ZONED").expect("catalog"))
            .unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));

        let mut ctl = ZoneActivationControl::default();
        dev.zone_activation_control(&mut ctl, false).expect("get");
        assert_eq!(ctl, original.activation);
        dev.close().expect("close");

        let image = EmulatedImage::load_from_file(&path).expect("reload");
        assert_eq!(image, original);
    }

    #[test]
    fn test_activation_control_needs_zone_domains() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut image = EmulatedImage::zone_domains("ATA EMULATED");
        image.model = DeviceModel::HostManaged;
        image.flags = DeviceFlags::MUTATE_SUPPORT.bits();
        let path = write_image(&dir, &image);

        let mut dev = open(&path);
        let mut ctl = ZoneActivationControl::default();
        let err = dev.zone_activation_control(&mut ctl, false).unwrap_err();
        assert!(matches!(err, DriverError::Status(Errno::EOPNOTSUPP)));
        dev.close().expect("close");
    }
}
