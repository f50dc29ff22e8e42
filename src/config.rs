//! Run configuration. Supplied once at run start and treated as read-only by
//! every component; defaults mirror the original billion-trial hunt.

use std::fmt;
use std::fs;

use serde::{Deserialize, Serialize};

/// Trials the ETA projects toward by default (one billion).
pub const DEFAULT_TARGET_TRIALS: u64 = 1_000_000_000;
/// Nominal trials per chunk and the outcome-buffer cap per invocation.
pub const DEFAULT_CHUNK_SIZE: usize = 5_000_000;
/// Execution units addressable by a single dispatch call.
pub const DEFAULT_EXECUTION_UNIT_CEILING: u32 = 65_535;
/// Trials covered by one execution unit.
pub const DEFAULT_UNIT_GROUP_SIZE: u32 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Requested trial count for a fixed run.
    pub total_trials: u64,
    /// Unbounded soak mode: ignore `total_trials` and run until cancelled.
    pub continuous: bool,
    /// Starting resource (PP) per trial.
    pub pp_initial: u32,
    /// Survival threshold: outcomes at or above this count as survivors.
    pub turns_required: u32,
    /// Nominal trials per chunk; clamped to `per_invocation_ceiling`.
    pub chunk_size: usize,
    /// Hardware cap on trials per kernel invocation (outcome buffer size).
    pub per_invocation_ceiling: usize,
    /// Hardware cap on execution units per dispatch call.
    pub execution_unit_ceiling: u32,
    /// Trials per execution unit.
    pub unit_group_size: u32,
    /// Trial count the ETA projects toward.
    pub target_trials: u64,
    /// Worker threads for the CPU backend; 0 means all cores.
    pub workers: usize,
    /// Interval between readback polls.
    pub readback_poll_ms: u64,
    /// Watchdog: a readback pending longer than this fails the chunk. 0 disables.
    pub readback_timeout_secs: u64,
    /// Display refresh interval for the live summary.
    pub display_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            total_trials: 1_000_000,
            continuous: false,
            pp_initial: 54,
            turns_required: 231,
            chunk_size: DEFAULT_CHUNK_SIZE,
            per_invocation_ceiling: DEFAULT_CHUNK_SIZE,
            execution_unit_ceiling: DEFAULT_EXECUTION_UNIT_CEILING,
            unit_group_size: DEFAULT_UNIT_GROUP_SIZE,
            target_trials: DEFAULT_TARGET_TRIALS,
            workers: 0,
            readback_poll_ms: 5,
            readback_timeout_secs: 60,
            display_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroCeiling(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCeiling(field) => write!(f, "configuration field '{field}' must be > 0"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RunConfig {
    /// Fail fast on a misconfiguration before any dispatch is attempted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroCeiling("chunk_size"));
        }
        if self.per_invocation_ceiling == 0 {
            return Err(ConfigError::ZeroCeiling("per_invocation_ceiling"));
        }
        if self.execution_unit_ceiling == 0 {
            return Err(ConfigError::ZeroCeiling("execution_unit_ceiling"));
        }
        if self.unit_group_size == 0 {
            return Err(ConfigError::ZeroCeiling("unit_group_size"));
        }
        Ok(())
    }

    /// Chunk ceiling actually used when planning: the nominal chunk size
    /// never exceeds what one invocation's buffer may hold.
    pub fn effective_chunk_ceiling(&self) -> usize {
        self.chunk_size.min(self.per_invocation_ceiling)
    }
}

pub fn load_config(path: &str) -> Result<RunConfig, Box<dyn std::error::Error + Send + Sync>> {
    let raw = fs::read_to_string(path)?;
    let config: RunConfig = serde_json::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}
