//! Supported-mutation query.
//!
//! Two round trips: the device first reports how many records it holds, then
//! fills a buffer sized for that count. The buffer is a slice, so a device
//! whose state changed between the two calls can report a different count
//! but can never write past the capacity that was allocated.

use crate::device::ZonedDevice;
use crate::error::{DevControlError, Result};
use crate::mutation::SupportedMutation;

/// List the mutations a device advertises, in device order.
///
/// # Errors
///
/// - `Protocol` if either the count or the fetch command fails
/// - `Allocation` if a buffer for the reported count cannot be allocated
pub fn list_supported_mutations<D: ZonedDevice>(device: &mut D) -> Result<Vec<SupportedMutation>> {
    let count = device
        .report_mutation_count()
        .map_err(|e| DevControlError::protocol("report mutation count", e))?;
    tracing::debug!(count, "device reported supported mutation count");

    if count == 0 {
        return Ok(Vec::new());
    }

    let capacity = usize::try_from(count).map_err(|_| DevControlError::Allocation(count))?;
    let mut records = Vec::new();
    records
        .try_reserve_exact(capacity)
        .map_err(|_| DevControlError::Allocation(count))?;
    records.resize(capacity, SupportedMutation::default());

    let reported = device
        .report_mutations(&mut records)
        .map_err(|e| DevControlError::protocol("report mutations", e))?;

    if reported != capacity {
        tracing::warn!(
            announced = capacity,
            reported,
            "supported mutation count changed between calls"
        );
    }
    records.truncate(reported.min(capacity));

    Ok(records)
}
