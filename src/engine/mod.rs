// Data Engine Module
// Sessions, drivers and the query/catalog/plan façades

pub mod catalog;
pub mod drivers;
pub mod plan;
pub mod query;
pub mod registry;
pub mod session_manager;
pub mod statement;

pub use pgdesk_core::{catalog as descriptors, error, traits, types};

pub use catalog::CatalogService;
pub use error::{EngineError, EngineResult};
pub use plan::PlanService;
pub use query::QueryExecutor;
pub use registry::DriverRegistry;
pub use session_manager::{SessionEvent, SessionManager};
pub use traits::{DataEngine, PoolHandle, TransactionHandle};
pub use types::*;
