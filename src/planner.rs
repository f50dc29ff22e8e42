//! Chunk planner: tiles a trial count across two independent backend
//! ceilings. A chunk may hold at most `per_invocation_ceiling` trials (the
//! outcome buffer cap) and a single dispatch may address at most
//! `execution_unit_ceiling` units (the dispatch cap); both must hold at once.

use std::fmt;

use serde::Serialize;

use crate::backend::UnitRange;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchDescriptor {
    /// Number of trials this chunk's outcome buffer holds.
    pub chunk_trials: usize,
    /// Ordered sub-dispatch ranges tiling `[0, required_units)`.
    pub sub_dispatches: Vec<UnitRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    ZeroPerInvocationCeiling,
    ZeroExecutionUnitCeiling,
    ZeroUnitGroupSize,
    /// A full chunk would need more execution units than the dispatch
    /// interface can address.
    UnitCountOverflow,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroPerInvocationCeiling => write!(f, "per-invocation trial ceiling must be > 0"),
            Self::ZeroExecutionUnitCeiling => write!(f, "execution unit ceiling must be > 0"),
            Self::ZeroUnitGroupSize => write!(f, "unit group size must be > 0"),
            Self::UnitCountOverflow => {
                write!(f, "per-invocation ceiling needs more execution units than are addressable")
            }
        }
    }
}

impl std::error::Error for PlanError {}

/// Split `total_trials` into ordered chunk descriptors, largest-first.
/// Every chunk holds `min(per_invocation_ceiling, remaining)` trials, so only
/// the final chunk may be short. `total_trials == 0` yields an empty plan.
pub fn plan(
    total_trials: u64,
    per_invocation_ceiling: usize,
    execution_unit_ceiling: u32,
    unit_group_size: u32,
) -> Result<Vec<DispatchDescriptor>, PlanError> {
    validate_ceilings(per_invocation_ceiling, execution_unit_ceiling, unit_group_size)?;

    let mut descriptors = Vec::new();
    let mut remaining = total_trials;
    while remaining > 0 {
        let chunk_trials = (per_invocation_ceiling as u64).min(remaining) as usize;
        descriptors.push(plan_chunk_unchecked(
            chunk_trials,
            execution_unit_ceiling,
            unit_group_size,
        ));
        remaining -= chunk_trials as u64;
    }
    Ok(descriptors)
}

/// Plan a single chunk of exactly `chunk_trials` trials. Continuous mode
/// calls this once per cycle instead of materializing an unbounded plan.
pub fn plan_chunk(
    chunk_trials: usize,
    per_invocation_ceiling: usize,
    execution_unit_ceiling: u32,
    unit_group_size: u32,
) -> Result<DispatchDescriptor, PlanError> {
    validate_ceilings(per_invocation_ceiling, execution_unit_ceiling, unit_group_size)?;
    let chunk_trials = chunk_trials.min(per_invocation_ceiling);
    Ok(plan_chunk_unchecked(
        chunk_trials,
        execution_unit_ceiling,
        unit_group_size,
    ))
}

fn validate_ceilings(
    per_invocation_ceiling: usize,
    execution_unit_ceiling: u32,
    unit_group_size: u32,
) -> Result<(), PlanError> {
    if per_invocation_ceiling == 0 {
        return Err(PlanError::ZeroPerInvocationCeiling);
    }
    if execution_unit_ceiling == 0 {
        return Err(PlanError::ZeroExecutionUnitCeiling);
    }
    if unit_group_size == 0 {
        return Err(PlanError::ZeroUnitGroupSize);
    }
    // Every chunk is clamped to the per-invocation ceiling, so checking the
    // ceiling bounds the unit count of all chunks.
    if (per_invocation_ceiling as u64).div_ceil(unit_group_size as u64) > u32::MAX as u64 {
        return Err(PlanError::UnitCountOverflow);
    }
    Ok(())
}

fn plan_chunk_unchecked(
    chunk_trials: usize,
    execution_unit_ceiling: u32,
    unit_group_size: u32,
) -> DispatchDescriptor {
    // Last unit group may be partially idle; the backend tolerates that.
    let required_units = (chunk_trials as u64).div_ceil(unit_group_size as u64) as u32;

    let mut sub_dispatches = Vec::new();
    let mut start = 0u32;
    while start < required_units {
        let end = required_units.min(start + execution_unit_ceiling);
        sub_dispatches.push(UnitRange { start, end });
        start = end;
    }

    DispatchDescriptor {
        chunk_trials,
        sub_dispatches,
    }
}
