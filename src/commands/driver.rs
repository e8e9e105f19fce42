// SPDX-License-Identifier: Apache-2.0

//! Driver metadata commands
//!
//! Lets the UI know which engine ids (and aliases) a profile may use.

use serde::Serialize;

use crate::engine::types::DriverInfo;
use crate::AppState;

/// Response wrapper for listing all drivers.
#[derive(Debug, Serialize)]
pub struct DriverListResponse {
    pub success: bool,
    pub drivers: Vec<DriverInfo>,
    pub error: Option<String>,
}

/// Lists all registered drivers.
pub async fn list_drivers(state: &AppState) -> DriverListResponse {
    DriverListResponse {
        success: true,
        drivers: state.registry.list_infos(),
        error: None,
    }
}
