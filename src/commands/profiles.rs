//! Saved profile commands
//!
//! Passwords never appear in responses.

use crate::commands::DataResponse;
use crate::engine::types::ConnectionProfile;
use crate::vault::ProfileUpdate;
use crate::AppState;

fn not_found(id: &str) -> String {
    format!("Connection profile not found: {}", id)
}

pub async fn list_profiles(state: &AppState) -> DataResponse<Vec<ConnectionProfile>> {
    state.profiles.list().into()
}

pub async fn get_profile(state: &AppState, id: String) -> DataResponse<ConnectionProfile> {
    match state.profiles.get(&id) {
        Ok(Some(profile)) => DataResponse::ok(profile),
        Ok(None) => DataResponse::err(not_found(&id)),
        Err(e) => DataResponse::err(e),
    }
}

/// Saves a profile; `data` is its id
pub async fn save_profile(state: &AppState, profile: ConnectionProfile) -> DataResponse<String> {
    state.profiles.save(profile).into()
}

pub async fn update_profile(
    state: &AppState,
    id: String,
    changes: ProfileUpdate,
) -> DataResponse<bool> {
    match state.profiles.update(&id, changes) {
        Ok(true) => DataResponse::ok(true),
        Ok(false) => DataResponse::err(not_found(&id)),
        Err(e) => DataResponse::err(e),
    }
}

pub async fn delete_profile(state: &AppState, id: String) -> DataResponse<bool> {
    match state.profiles.delete(&id) {
        Ok(true) => DataResponse::ok(true),
        Ok(false) => DataResponse::err(not_found(&id)),
        Err(e) => DataResponse::err(e),
    }
}
