//! # Data Models
//!
//! SeaORM entities for the hook registry plus the service info payload.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod hook;
pub mod repo_connection;
pub mod vcs_provider;

pub use hook::Entity as Hook;
pub use repo_connection::Entity as RepoConnection;
pub use vcs_provider::Entity as VcsProvider;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "vcs-hooks".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
