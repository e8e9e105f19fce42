// SPDX-License-Identifier: Apache-2.0

pub mod backend;
pub mod storage;

pub use backend::{CredentialProvider, KeyringProvider, MockProvider};
pub use storage::{ProfileStore, ProfileUpdate};
