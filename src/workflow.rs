//! Device control workflow.
//!
//! Sequences the commands issued for one invocation as an explicit state
//! machine. Every stage names what has been done so far, and each step
//! performs the work leading to the next stage.
//!
//! # Stage Flow
//!
//! ```text
//! Opened
//!     ↓
//! InfoQueried ──────────────┬──────────────┐
//!     ↓                     ↓              ↓
//! Listed ──────────────→ Mutated         Idle
//!     │                     │ └─ non-zoned target ──────────→ Reported
//!     │                     ↓                                    ↑
//!     │                  Reopened                                │
//!     ↓                     ↓                                    │
//! ZoneDomainChecked ←───────┴──────── (no zone domains) ─────────┤
//!     ↓                                                          │
//! ControlRead ───────────── (no changes requested) ──────────────┤
//!     ↓                                                          │
//! ControlWritten → ControlVerified ──────────────────────────────┘
//!
//! Reported → Closed            (any stage can transition to Closed)
//! ```
//!
//! A mutation invalidates the device information read before it. The
//! workflow drops that snapshot, reopens the device and only uses the
//! refreshed information from then on.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::activation::{
    merge_update, ActivationSettings, ActivationUpdate, ZoneActivationControl, NR_ZONES_UNCHANGED,
};
use crate::device::{DeviceDriver, DeviceInfo, DeviceSession, OpenFlags, ZonedDevice};
use crate::error::{DevControlError, Result};
use crate::mutation::{Mutation, MutationTarget, SupportedMutation};
use crate::query::list_supported_mutations;

/// Workflow stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Device handle acquired
    Opened,
    /// Capability flags read from the open handle
    InfoQueried,
    /// Supported mutations fetched
    Listed,
    /// Mutate command completed
    Mutated,
    /// Neither a listing nor a mutation was requested
    Idle,
    /// Handle closed and reopened after a mutation, information refreshed
    Reopened,
    /// Zone Domains support confirmed
    ZoneDomainChecked,
    /// Activation control settings read
    ControlRead,
    /// Activation control set request issued
    ControlWritten,
    /// Activation control settings read back after the set
    ControlVerified,
    /// Everything requested has been done
    Reported,
    /// Device handle released (terminal)
    Closed,
}

impl Stage {
    /// Stages reachable in one step from this one, excluding `Closed`
    pub const fn successors(self) -> &'static [Stage] {
        match self {
            Self::Opened => &[Self::InfoQueried],
            Self::InfoQueried => &[Self::Listed, Self::Mutated, Self::Idle],
            Self::Listed => &[Self::Mutated, Self::ZoneDomainChecked, Self::Reported],
            Self::Mutated => &[Self::Reopened, Self::Reported],
            Self::Idle | Self::Reopened => &[Self::ZoneDomainChecked, Self::Reported],
            Self::ZoneDomainChecked => &[Self::ControlRead],
            Self::ControlRead => &[Self::ControlWritten, Self::Reported],
            Self::ControlWritten => &[Self::ControlVerified],
            Self::ControlVerified => &[Self::Reported],
            Self::Reported | Self::Closed => &[],
        }
    }

    /// Returns true if moving from `self` to `to` is a valid transition.
    ///
    /// The handle can be released from any stage, so `Closed` is reachable
    /// from everywhere except itself.
    pub fn can_transition_to(self, to: Stage) -> bool {
        match to {
            Self::Closed => self != Self::Closed,
            _ => self.successors().contains(&to),
        }
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Opened => "Device opened",
            Self::InfoQueried => "Device information queried",
            Self::Listed => "Supported mutations listed",
            Self::Mutated => "Device mutated",
            Self::Idle => "No mutation requested",
            Self::Reopened => "Device reopened",
            Self::ZoneDomainChecked => "Zone domains supported",
            Self::ControlRead => "Activation settings read",
            Self::ControlWritten => "Activation settings written",
            Self::ControlVerified => "Activation settings verified",
            Self::Reported => "Reported",
            Self::Closed => "Device closed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot move from \"{from}\" to \"{to}\"")]
    Invalid { from: Stage, to: Stage },

    #[error("No device is open at stage \"{stage}\"")]
    NoDevice { stage: Stage },
}

impl From<TransitionError> for DevControlError {
    fn from(err: TransitionError) -> Self {
        DevControlError::Transition(err.to_string())
    }
}

/// Everything one invocation asks of the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub path: PathBuf,
    /// List the mutations the device supports
    pub list_mutations: bool,
    /// Mutate the device
    pub mutation: Option<Mutation>,
    /// Activation control fields to change
    pub activation: ActivationUpdate,
}

impl ControlRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            list_mutations: false,
            mutation: None,
            activation: ActivationUpdate::default(),
        }
    }

    /// Check the request before any device is touched.
    ///
    /// # Errors
    ///
    /// - `Usage` for an unresolved mutation target or a reserved FSNOZ value
    pub fn validate(&self) -> Result<()> {
        if let Some(m) = &self.mutation {
            if !m.is_valid() {
                return Err(DevControlError::usage(format!(
                    "unknown mutation target ({})",
                    m.option()
                )));
            }
        }
        if let Some(nz) = self.activation.nr_zones {
            if nz == 0 || nz == NR_ZONES_UNCHANGED {
                return Err(DevControlError::usage("invalid -nz value"));
            }
        }
        Ok(())
    }
}

/// Outcome of a successful workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub path: PathBuf,
    /// Information read at open, shown when no mutation was requested
    pub initial_info: Option<DeviceInfo>,
    pub supported_mutations: Option<Vec<SupportedMutation>>,
    pub mutation: Option<Mutation>,
    /// Information read after the post-mutation reopen
    pub refreshed_info: Option<DeviceInfo>,
    /// Final (verified, if written) activation settings
    pub settings: Option<ActivationSettings>,
    stages: Vec<Stage>,
}

impl Report {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            initial_info: None,
            supported_mutations: None,
            mutation: None,
            refreshed_info: None,
            settings: None,
            stages: Vec::new(),
        }
    }

    /// Stages traversed, in order, ending with `Closed`
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device {}:", self.path.display())?;
        if let Some(info) = &self.initial_info {
            writeln!(f, "{}", info)?;
        }
        if let Some(list) = &self.supported_mutations {
            if !list.is_empty() {
                writeln!(
                    f,
                    "    {} supported mutation{}",
                    list.len(),
                    if list.len() > 1 { "s" } else { "" }
                )?;
            }
            for sm in list {
                writeln!(f, "{}", sm)?;
            }
        }
        if let Some(info) = &self.refreshed_info {
            writeln!(f, "{}", info)?;
        }
        if let Some(settings) = &self.settings {
            writeln!(f, "    {}", settings)?;
        }
        Ok(())
    }
}

/// Flags every open of the workflow uses
pub const OPEN_FLAGS: OpenFlags = OpenFlags::from_bits_truncate(
    OpenFlags::DRV_MASK.bits() | OpenFlags::READ_ONLY.bits(),
);

/// Run the workflow for `request` on a device opened through `driver`.
///
/// The device handle is released before returning, on success and on
/// every error path, exactly once.
///
/// # Errors
///
/// The first failure aborts the remaining steps:
/// - `Usage` if the request is malformed (no device is opened)
/// - `DeviceOpen` if the initial open or the post-mutation reopen fails
/// - `FeatureUnsupported` if a required capability flag is absent
/// - `Protocol` / `InvalidResponse` if a device command fails
/// - `Allocation` if the supported mutation buffer cannot be sized
pub fn run<Drv: DeviceDriver>(driver: &Drv, request: &ControlRequest) -> Result<Report> {
    request.validate()?;

    let session = DeviceSession::open(driver, &request.path, OPEN_FLAGS)
        .map_err(|e| DevControlError::device_open(request.path.display().to_string(), e))?;

    let mut workflow = Workflow::new(driver, request, session);
    let outcome = workflow.drive();
    workflow.close()?;

    outcome.map(|()| workflow.report)
}

/// Owns the device session and the state of one run.
struct Workflow<'a, Drv: DeviceDriver> {
    driver: &'a Drv,
    request: &'a ControlRequest,
    session: Option<DeviceSession<Drv::Device>>,
    stage: Stage,
    /// Information of the currently open handle
    info: Option<DeviceInfo>,
    settings: Option<ActivationSettings>,
    report: Report,
}

impl<'a, Drv: DeviceDriver> Workflow<'a, Drv> {
    fn new(
        driver: &'a Drv,
        request: &'a ControlRequest,
        session: DeviceSession<Drv::Device>,
    ) -> Self {
        let mut report = Report::new(request.path.clone());
        report.stages.push(Stage::Opened);
        Self {
            driver,
            request,
            session: Some(session),
            stage: Stage::Opened,
            info: None,
            settings: None,
            report,
        }
    }

    /// Step until everything requested has been done
    fn drive(&mut self) -> Result<()> {
        while self.stage != Stage::Reported {
            let next = self.step()?;
            self.transition(next)?;
        }
        Ok(())
    }

    fn transition(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                from: self.stage,
                to: next,
            }
            .into());
        }
        tracing::debug!(from = %self.stage, to = %next, "workflow transition");
        self.stage = next;
        self.report.stages.push(next);
        Ok(())
    }

    /// Perform the work that leads out of the current stage
    fn step(&mut self) -> Result<Stage> {
        match self.stage {
            Stage::Opened => {
                let info = self.device()?.info();
                if self.request.mutation.is_none() {
                    self.report.initial_info = Some(info.clone());
                }
                self.info = Some(info);
                Ok(Stage::InfoQueried)
            }
            Stage::InfoQueried => {
                if self.request.list_mutations {
                    self.list()
                } else if let Some(mutation) = self.request.mutation {
                    self.mutate(mutation)
                } else {
                    Ok(Stage::Idle)
                }
            }
            Stage::Listed => match self.request.mutation {
                Some(mutation) => self.mutate(mutation),
                None => self.check_zone_domains(),
            },
            Stage::Mutated => {
                let target = self
                    .report
                    .mutation
                    .map(|m| m.target())
                    .unwrap_or_default();
                if target == MutationTarget::NonZoned {
                    // A non-zoned device has no zone domain settings
                    tracing::info!("device is now non-zoned, skipping zone domains");
                    Ok(Stage::Reported)
                } else {
                    self.reopen()
                }
            }
            Stage::Idle | Stage::Reopened => self.check_zone_domains(),
            Stage::ZoneDomainChecked => {
                self.settings = Some(self.get_activation()?);
                Ok(Stage::ControlRead)
            }
            Stage::ControlRead => {
                if self.request.activation.is_empty() {
                    self.report.settings = self.settings;
                    Ok(Stage::Reported)
                } else {
                    self.set_activation()?;
                    Ok(Stage::ControlWritten)
                }
            }
            Stage::ControlWritten => {
                let verified = self.get_activation()?;
                tracing::info!(settings = %verified, "activation settings verified");
                self.settings = Some(verified);
                self.report.settings = Some(verified);
                Ok(Stage::ControlVerified)
            }
            Stage::ControlVerified => Ok(Stage::Reported),
            Stage::Reported | Stage::Closed => Err(TransitionError::Invalid {
                from: self.stage,
                to: self.stage,
            }
            .into()),
        }
    }

    fn device(&mut self) -> Result<&mut Drv::Device> {
        let stage = self.stage;
        let session = self
            .session
            .as_mut()
            .ok_or(TransitionError::NoDevice { stage })?;
        session
            .device()
            .map_err(|_| TransitionError::NoDevice { stage }.into())
    }

    fn current_info(&self) -> Result<&DeviceInfo> {
        self.info.as_ref().ok_or_else(|| {
            TransitionError::NoDevice { stage: self.stage }.into()
        })
    }

    fn require_mutate_support(&self) -> Result<()> {
        if self.current_info()?.supports_mutate() {
            Ok(())
        } else {
            Err(DevControlError::unsupported("Device doesn't support MUTATE"))
        }
    }

    fn list(&mut self) -> Result<Stage> {
        self.require_mutate_support()?;
        let list = list_supported_mutations(self.device()?)?;
        tracing::debug!(count = list.len(), "supported mutations fetched");
        self.report.supported_mutations = Some(list);
        Ok(Stage::Listed)
    }

    fn mutate(&mut self, mutation: Mutation) -> Result<Stage> {
        self.require_mutate_support()?;
        tracing::info!(%mutation, "mutating device");
        self.device()?
            .mutate(&mutation)
            .map_err(|e| DevControlError::protocol("mutate", e))?;
        self.report.mutation = Some(mutation);
        Ok(Stage::Mutated)
    }

    /// Replace the handle with a fresh one, dropping the stale information
    fn reopen(&mut self) -> Result<Stage> {
        self.info = None;
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::warn!("failed to close device before reopen: {}", e);
            }
        }

        let path = &self.request.path;
        let session = DeviceSession::open(self.driver, path, OPEN_FLAGS)
            .map_err(|e| DevControlError::device_open(path.display().to_string(), e))?;
        let info = session
            .info()
            .map_err(|e| DevControlError::device_open(path.display().to_string(), e))?;
        tracing::debug!(model = %info.model, flags = ?info.flags, "device reopened");

        self.report.refreshed_info = Some(info.clone());
        self.info = Some(info);
        self.session = Some(session);
        Ok(Stage::Reopened)
    }

    fn check_zone_domains(&mut self) -> Result<Stage> {
        if self.current_info()?.supports_zone_domains() {
            return Ok(Stage::ZoneDomainChecked);
        }
        if !self.request.activation.is_empty() {
            return Err(DevControlError::unsupported("Not a Zone Domains device"));
        }
        tracing::debug!("device does not support zone domains");
        Ok(Stage::Reported)
    }

    fn get_activation(&mut self) -> Result<ActivationSettings> {
        let mut ctl = ZoneActivationControl::default();
        self.device()?
            .zone_activation_control(&mut ctl, false)
            .map_err(|e| DevControlError::protocol("zone activation control get", e))?;
        ActivationSettings::decode(&ctl)
    }

    fn set_activation(&mut self) -> Result<()> {
        let current = self.settings.ok_or_else(|| TransitionError::Invalid {
            from: self.stage,
            to: Stage::ControlWritten,
        })?;
        let request = merge_update(&current, &self.request.activation);
        if request.is_noop() {
            // Guarded by the caller, an all-sentinel set must never reach a device
            return Err(TransitionError::Invalid {
                from: self.stage,
                to: Stage::ControlWritten,
            }
            .into());
        }

        let mut ctl = request.encode();
        tracing::info!(?ctl, "setting activation control");
        self.device()?
            .zone_activation_control(&mut ctl, true)
            .map_err(|e| DevControlError::protocol("zone activation control set", e))
    }

    /// Release the handle and record the terminal stage
    fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::warn!("failed to close device: {}", e);
            }
        }
        self.transition(Stage::Closed)
    }
}
