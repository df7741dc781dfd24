//! # Repository Layer
//!
//! SeaORM data access for hooks, connections and VCS providers. Hook and
//! connection functions take any executor so they compose inside the
//! locked transaction owned by the connection service.

pub mod connection;
pub mod hook;
pub mod vcs_provider;

pub use connection::{Connection, ResourceType};
pub use hook::HookRepository;
pub use vcs_provider::VcsProviderRepository;
