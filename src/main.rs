// Headless entry point: NDJSON on stdin/stdout, logs to file

use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::BufReader;

use pgdesk_lib::config::AppConfig;
use pgdesk_lib::{ipc, observability, AppState, SharedState};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pgdesk: {}", e);
            return ExitCode::FAILURE;
        }
    };

    observability::init_tracing(&config);
    tracing::info!(
        data_dir = %config.data_dir.display(),
        version = env!("CARGO_PKG_VERSION"),
        "pgdesk starting"
    );

    let state: SharedState = Arc::new(AppState::new(config));
    let input = BufReader::new(tokio::io::stdin());

    match ipc::serve(state, input, tokio::io::stdout()).await {
        Ok(()) => {
            tracing::info!("pgdesk stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read requests");
            ExitCode::FAILURE
        }
    }
}
