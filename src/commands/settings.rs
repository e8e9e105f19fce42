//! Settings commands

use crate::commands::DataResponse;
use crate::settings::AppSettings;
use crate::AppState;

pub async fn load_settings(state: &AppState) -> DataResponse<AppSettings> {
    state.settings.load().into()
}

pub async fn save_settings(state: &AppState, settings: AppSettings) -> DataResponse<()> {
    state.settings.save(&settings).into()
}
