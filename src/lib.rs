//! # VCS Hooks Library
//!
//! Repository connections and the webhook lifecycle: a single [`hook::Hook`]
//! per repository shared by every connected workspace or module, reconciled
//! against the VCS provider on connect and torn down with its last
//! connection.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod hook;
pub mod models;
pub mod purger;
pub mod repositories;
pub mod server;
pub mod service;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vcs;
pub mod webhook_verification;
pub use migration;
