//! Log export commands.

use serde::Serialize;

use crate::observability;
use crate::AppState;

/// Response wrapper for log export
#[derive(Debug, Serialize)]
pub struct LogsExportResponse {
    pub success: bool,
    pub filename: Option<String>,
    pub content: Option<String>,
    pub error: Option<String>,
}

/// Exports backend logs for support.
pub async fn export_logs(state: &AppState) -> LogsExportResponse {
    let log_dir = state.config.log_dir.clone();
    let collected = tokio::task::spawn_blocking(move || observability::collect_logs(&log_dir))
        .await
        .unwrap_or_else(|e| Err(format!("Log export task failed: {}", e)));

    match collected {
        Ok(export) => LogsExportResponse {
            success: true,
            filename: Some(export.filename),
            content: Some(export.content),
            error: None,
        },
        Err(err) => LogsExportResponse {
            success: false,
            filename: None,
            content: None,
            error: Some(err),
        },
    }
}
