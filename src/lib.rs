//! Registry Transfer Library
//!
//! Discovers container images across a GitLab project registry and Docker Hub
//! namespaces, and transfers selected local images to a target registry by
//! retagging and pushing them through the local container runtime.

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod transfer;

pub use config::{AppConfig, AuthConfig};
pub use error::{Result, TransferError};
pub use logging::Logger;
