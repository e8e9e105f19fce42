//! Metrics commands.

use serde::Serialize;

use crate::metrics;

/// Response wrapper for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub success: bool,
    pub metrics: Option<metrics::QueryMetricsSnapshot>,
    pub error: Option<String>,
}

/// Returns the current in-process query counters.
pub async fn get_metrics() -> MetricsResponse {
    MetricsResponse {
        success: true,
        metrics: Some(metrics::snapshot()),
        error: None,
    }
}
