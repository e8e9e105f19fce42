// Boundary commands
//
// Every command takes the shared state plus plain arguments and returns a
// serializable response. Failures are reported inside the response.

use serde::Serialize;

use crate::engine::error::EngineError;

pub mod catalog;
pub mod connection;
pub mod driver;
pub mod logs;
pub mod metrics;
pub mod profiles;
pub mod query;
pub mod settings;

/// `{success, data?, error?}` wrapper shared by the data-returning commands
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> DataResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl<T> From<Result<T, EngineError>> for DataResponse<T> {
    fn from(result: Result<T, EngineError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e),
        }
    }
}
