// pgdesk - headless backend for a desktop PostgreSQL client
// Core library

pub mod commands;
pub mod config;
pub mod engine;
pub mod ipc;
pub mod metrics;
pub mod observability;
pub mod settings;
pub mod vault;

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use engine::drivers::postgres::PostgresDriver;
use engine::{CatalogService, DriverRegistry, PlanService, QueryExecutor, SessionManager};
use settings::SettingsStore;
use vault::{CredentialProvider, KeyringProvider, ProfileStore};

/// Grace period on top of the driver's own acquire timeout
const CONNECT_TIMEOUT_MARGIN_SECS: u64 = 5;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<DriverRegistry>,
    pub session_manager: Arc<SessionManager>,
    pub queries: QueryExecutor,
    pub catalog: CatalogService,
    pub plans: PlanService,
    pub profiles: ProfileStore,
    pub settings: SettingsStore,
}

impl AppState {
    /// Production wiring: PostgreSQL driver and the OS keychain
    pub fn new(config: AppConfig) -> Self {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(PostgresDriver::new(config.pool)));

        Self::with_parts(config, registry, Arc::new(KeyringProvider::new()))
    }

    pub fn with_parts(
        config: AppConfig,
        registry: DriverRegistry,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let registry = Arc::new(registry);
        let connect_timeout =
            Duration::from_secs(config.pool.connect_timeout_secs + CONNECT_TIMEOUT_MARGIN_SECS);
        let session_manager = Arc::new(SessionManager::with_connect_timeout(
            Arc::clone(&registry),
            connect_timeout,
        ));

        Self {
            queries: QueryExecutor::new(Arc::clone(&session_manager), config.stream_batch_size),
            catalog: CatalogService::new(Arc::clone(&session_manager)),
            plans: PlanService::new(Arc::clone(&session_manager)),
            profiles: ProfileStore::new(config.data_dir.clone(), credentials),
            settings: SettingsStore::new(&config.data_dir),
            registry,
            session_manager,
            config,
        }
    }
}
