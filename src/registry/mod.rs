//! Remote registry access: catalog discovery, authentication and manifest lookups

pub mod auth;
pub mod catalog;
pub mod gitlab;
pub mod hub;
pub mod manifest;
pub mod paginate;

pub use auth::{DockerCliLogin, FallbackLogin, RegistryLogin, TokenExchangeLogin};
pub use catalog::{
    Discovery, DiscoveryOptions, Listing, Package, RegistryCatalog, Tag, discover,
    discover_mirrors,
};
pub use gitlab::{GitLabCatalog, Group};
pub use hub::HubCatalog;
pub use manifest::{DigestResolver, ManifestDigestClient};

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 registry timestamp; malformed values are treated as absent
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
