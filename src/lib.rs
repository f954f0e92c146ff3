//! zbc-dev-control library
//!
//! Control-plane logic for mutating zoned block devices and for managing
//! their persistent Zone Domains activation settings.

pub mod activation;
pub mod catalog;
pub mod cli;
pub mod device;
pub mod error;
pub mod mutation;
pub mod query;
pub mod workflow;

// Re-export main types for convenience
pub use activation::{
    merge_update, ActivationRequest, ActivationSettings, ActivationUpdate, MaxActivation,
    ZoneActivationControl,
};
pub use catalog::{resolve_by_name, resolve_numeric, MutationPreset};
pub use device::{
    DeviceDriver, DeviceFlags, DeviceInfo, DeviceModel, DeviceSession, DriverError,
    EmulatedDriver, EmulatedImage, OpenFlags, ZonedDevice,
};
pub use error::DevControlError;
pub use mutation::{
    Mutation, MutationOption, MutationTarget, SmrOption, SupportedMutation, ZoneDomainOption,
};
pub use query::list_supported_mutations;
pub use workflow::{run, ControlRequest, Report, Stage};
