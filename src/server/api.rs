//! JSON payloads for the display collaborator. Every payload is built from a
//! snapshot copy, so a slow or stalled client never holds up aggregation.

use serde::Serialize;

use crate::progress::{self, ProgressSnapshot};
use crate::server::ServerContext;

pub fn health_payload() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&serde_json::json!({
        "status": "ok",
        "service": "graveler-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Serialize)]
struct SummaryPayload {
    status: &'static str,
    started_at: String,
    #[serde(flatten)]
    snapshot: ProgressSnapshot,
}

/// GET /api/summary: scalar run statistics plus derived rate/ETA.
pub fn summary_payload(ctx: &ServerContext) -> Result<String, serde_json::Error> {
    let payload = SummaryPayload {
        status: "ok",
        started_at: ctx.shared.started_at().to_rfc3339(),
        snapshot: progress::snapshot_shared(&ctx.shared, ctx.target_trials),
    };
    serde_json::to_string_pretty(&payload)
}

/// GET /api/histogram: turns-survived -> occurrence count, as of now.
pub fn histogram_payload(ctx: &ServerContext) -> Result<String, serde_json::Error> {
    let histogram = ctx.shared.histogram_snapshot();
    let total: u64 = histogram.values().sum();
    serde_json::to_string_pretty(&serde_json::json!({
        "status": "ok",
        "total": total,
        "histogram": histogram,
    }))
}
