//! Throughput and ETA derivation. Snapshots are computed on demand from the
//! shared statistics plus the monotonic run clock; nothing here is stored.

use serde::Serialize;

use crate::aggregate::{SharedAggregate, StatsSnapshot};

/// Point-in-time progress view for the display collaborator. `rate` and
/// `eta_seconds` are `None` (JSON `null`) until at least one trial has
/// completed and measurable time has passed; never NaN or infinity.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProgressSnapshot {
    pub trials_completed: u64,
    pub survivor_count: u64,
    pub min_outcome: Option<u32>,
    pub max_outcome: Option<u32>,
    pub elapsed_seconds: f64,
    /// Trials per second over the run so far.
    pub rate: Option<f64>,
    /// Projected seconds to complete `target_trials` at the observed rate.
    pub eta_seconds: Option<f64>,
    pub target_trials: u64,
}

pub fn snapshot(stats: StatsSnapshot, elapsed_seconds: f64, target_trials: u64) -> ProgressSnapshot {
    let rate = if elapsed_seconds > 0.0 && stats.trials_completed > 0 {
        Some(stats.trials_completed as f64 / elapsed_seconds)
    } else {
        None
    };
    let eta_seconds = rate.map(|r| {
        let remaining = target_trials.saturating_sub(stats.trials_completed);
        remaining as f64 / r
    });

    ProgressSnapshot {
        trials_completed: stats.trials_completed,
        survivor_count: stats.survivor_count,
        min_outcome: stats.min_outcome,
        max_outcome: stats.max_outcome,
        elapsed_seconds,
        rate,
        eta_seconds,
        target_trials,
    }
}

/// Convenience read straight off the shared aggregate.
pub fn snapshot_shared(shared: &SharedAggregate, target_trials: u64) -> ProgressSnapshot {
    snapshot(shared.stats(), shared.elapsed_seconds(), target_trials)
}

/// One-line human rendering, printed by the live display loop.
pub fn summary_line(s: &ProgressSnapshot) -> String {
    let rate = s
        .rate
        .map(|r| format!("{r:.0}/s"))
        .unwrap_or_else(|| "n/a".to_string());
    let eta = s
        .eta_seconds
        .map(|e| format!("{e:.1}s"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "trials={} survivors={} min={} max={} elapsed={:.2}s rate={} eta={}",
        s.trials_completed,
        s.survivor_count,
        s.min_outcome.map_or_else(|| "-".to_string(), |v| v.to_string()),
        s.max_outcome.map_or_else(|| "-".to_string(), |v| v.to_string()),
        s.elapsed_seconds,
        rate,
        eta,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(trials: u64) -> StatsSnapshot {
        StatsSnapshot {
            trials_completed: trials,
            survivor_count: 0,
            min_outcome: None,
            max_outcome: None,
        }
    }

    #[test]
    fn zero_elapsed_reports_undefined_rate_and_eta() {
        let s = snapshot(stats(100), 0.0, 1_000);
        assert!(s.rate.is_none());
        assert!(s.eta_seconds.is_none());
    }

    #[test]
    fn zero_trials_reports_undefined_rate_and_eta() {
        let s = snapshot(stats(0), 5.0, 1_000);
        assert!(s.rate.is_none());
        assert!(s.eta_seconds.is_none());
    }

    #[test]
    fn rate_and_eta_derive_from_throughput() {
        let s = snapshot(stats(500), 2.0, 1_500);
        assert_eq!(s.rate, Some(250.0));
        assert_eq!(s.eta_seconds, Some(4.0));
    }

    #[test]
    fn eta_is_zero_once_target_is_reached() {
        let s = snapshot(stats(2_000), 2.0, 1_500);
        assert_eq!(s.eta_seconds, Some(0.0));
    }

    #[test]
    fn undefined_fields_serialize_as_null() {
        let s = snapshot(stats(0), 0.0, 10);
        let json = serde_json::to_value(&s).expect("serialize");
        assert!(json["rate"].is_null());
        assert!(json["eta_seconds"].is_null());
    }

    #[test]
    fn summary_line_is_humane_before_first_chunk() {
        let line = summary_line(&snapshot(stats(0), 0.0, 10));
        assert!(line.contains("rate=n/a"));
        assert!(line.contains("min=-"));
    }
}
