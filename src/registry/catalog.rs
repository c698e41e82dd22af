//! Catalog records and the discovery contract shared by both registry flavours

use crate::error::{Result, TransferError};
use crate::image::glob::glob_match;
use crate::logging::Logger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A repository inside a registry namespace or project.
/// Identity is `(namespace, name)`; the registry-side id is informational.
#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub namespace: String,
    pub name: String,
    pub id: Option<u64>,
}

impl Package {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.name.hash(state);
    }
}

/// Flat discovery record: package, tag name and whatever metadata the
/// registry returned. Missing fields stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub package: Package,
    pub name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub digest: Option<String>,
    pub size: Option<u64>,
}

impl Tag {
    pub fn new(package: Package, name: impl Into<String>) -> Self {
        Self {
            package,
            name: name.into(),
            timestamp: None,
            digest: None,
            size: None,
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn size_mb(&self) -> Option<f64> {
        self.size
            .map(|bytes| (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0)
    }
}

/// Accumulated items of a paginated listing, plus the error that stopped it
/// early. Partial items are valid; check [`Listing::is_complete`] before
/// assuming the sequence is exhaustive.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub error: Option<TransferError>,
}

impl<T> Listing<T> {
    pub fn complete(items: Vec<T>) -> Self {
        Self { items, error: None }
    }

    pub fn partial(items: Vec<T>, error: TransferError) -> Self {
        Self {
            items,
            error: Some(error),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Strict view: any early stop becomes a `Pagination` error
    pub fn into_result(self) -> Result<Vec<T>> {
        match self.error {
            None => Ok(self.items),
            Some(cause) => Err(TransferError::Pagination {
                fetched: self.items.len(),
                cause: Box::new(cause),
            }),
        }
    }

    /// Items plus the early-stop error, if any, as a `Pagination` error
    pub fn into_parts(self) -> (Vec<T>, Option<TransferError>) {
        let fetched = self.items.len();
        let error = self.error.map(|cause| TransferError::Pagination {
            fetched,
            cause: Box::new(cause),
        });
        (self.items, error)
    }
}

#[async_trait]
pub trait RegistryCatalog: Send + Sync {
    /// Human-readable name for logs, e.g. `docker hub microfocusidolserver`
    fn describe(&self) -> String;

    async fn list_packages(&self) -> Listing<Package>;

    async fn list_tags(&self, package: &Package) -> Listing<Tag>;

    /// Fill in timestamp, digest and size when the tag listing omits them
    async fn tag_details(&self, tag: &Tag) -> Result<Tag> {
        Ok(tag.clone())
    }
}

/// What to discover from a catalog
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Restrict to these package names; `None` means every package
    pub packages: Option<Vec<String>>,
    /// Keep only tags matching this glob
    pub tag_glob: Option<String>,
    /// Look up per-tag details for the kept tags
    pub with_details: bool,
}

/// Flattened discovery output of one catalog
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub source: String,
    pub tags: Vec<Tag>,
    /// Requested package names the catalog does not have
    pub missing_packages: Vec<String>,
    pub errors: Vec<TransferError>,
}

impl Discovery {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Walk packages and tags of one catalog into flat `(package, tag, timestamp)` records
pub async fn discover(
    catalog: &dyn RegistryCatalog,
    options: &DiscoveryOptions,
    logger: &Logger,
) -> Discovery {
    let mut discovery = Discovery {
        source: catalog.describe(),
        ..Default::default()
    };

    let (packages, error) = catalog.list_packages().await.into_parts();
    if let Some(err) = error {
        logger.warning(&format!(
            "{}: package listing is incomplete: {}",
            discovery.source, err
        ));
        discovery.errors.push(err);
    }
    logger.detail(&format!(
        "{}: {} packages listed",
        discovery.source,
        packages.len()
    ));

    let selected: Vec<Package> = match &options.packages {
        None => packages,
        Some(wanted) => {
            let mut selected = Vec::new();
            for name in wanted {
                match packages.iter().find(|p| &p.name == name) {
                    Some(package) => selected.push(package.clone()),
                    None => {
                        logger.warning(&format!("Package '{}' not found", name));
                        discovery.missing_packages.push(name.clone());
                    }
                }
            }
            selected
        }
    };

    for package in &selected {
        let (tags, error) = catalog.list_tags(package).await.into_parts();
        if let Some(err) = error {
            logger.warning(&format!(
                "{}: tag listing for {} is incomplete: {}",
                discovery.source, package.name, err
            ));
            discovery.errors.push(err);
        }

        for tag in tags {
            if let Some(pattern) = &options.tag_glob {
                if !glob_match(pattern, &tag.name) {
                    continue;
                }
            }
            let tag = if options.with_details {
                match catalog.tag_details(&tag).await {
                    Ok(detailed) => detailed,
                    Err(err) => {
                        logger.warning(&format!(
                            "Could not get details for tag {}: {}",
                            tag.name, err
                        ));
                        tag
                    }
                }
            } else {
                tag
            };
            discovery.tags.push(tag);
        }
    }

    discovery
}

/// Discover several independent mirrors concurrently, at most `max_workers`
/// at a time. Results are merged after every worker finished and keep the
/// order of `catalogs`.
pub async fn discover_mirrors(
    catalogs: Vec<Arc<dyn RegistryCatalog>>,
    options: DiscoveryOptions,
    max_workers: usize,
    logger: &Logger,
) -> Vec<Discovery> {
    let permits = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut workers = JoinSet::new();

    for (index, catalog) in catalogs.iter().enumerate() {
        let catalog = Arc::clone(catalog);
        let options = options.clone();
        let logger = logger.clone();
        let permits = Arc::clone(&permits);

        workers.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let discovery = discover(catalog.as_ref(), &options, &logger).await;
            (index, discovery)
        });
    }

    let mut results: Vec<Option<Discovery>> = vec![None; catalogs.len()];
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((index, discovery)) => results[index] = Some(discovery),
            Err(err) => logger.error(&format!("Discovery worker failed: {}", err)),
        }
    }

    results
        .into_iter()
        .zip(catalogs.iter())
        .map(|(result, catalog)| {
            result.unwrap_or_else(|| Discovery {
                source: catalog.describe(),
                errors: vec![TransferError::Unexpected(
                    "discovery worker did not complete".to_string(),
                )],
                ..Default::default()
            })
        })
        .collect()
}
