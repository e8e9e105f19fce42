// SPDX-License-Identifier: Apache-2.0

//! pgdesk-core: engine abstraction shared by the backend.

pub mod catalog;
pub mod error;
pub mod sensitive;
pub mod traits;
pub mod types;

pub use catalog::*;
pub use error::{EngineError, EngineResult};
pub use sensitive::Sensitive;
pub use traits::{DataEngine, PoolHandle, TransactionHandle};
pub use types::*;
