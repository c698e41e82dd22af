//! GitLab project container registry catalog

use crate::config::{EndpointCredential, RegistryEndpoint};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, TransferError};
use crate::registry::catalog::{Listing, Package, RegistryCatalog, Tag};
use crate::registry::paginate::{Page, Paginator, link_next};
use crate::registry::parse_timestamp;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

const PAGE_SIZE: usize = 100;

/// A GitLab group visible to the token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    id: u64,
    #[serde(default)]
    name: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct TagRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagDetailRecord {
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    total_size: Option<u64>,
}

pub struct GitLabCatalog {
    client: Client,
    endpoint: RegistryEndpoint,
    project: String,
}

impl GitLabCatalog {
    pub fn new(endpoint: RegistryEndpoint, project: impl Into<String>) -> Result<Self> {
        endpoint.validate()?;
        let client = Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "client setup"))?;

        Ok(Self {
            client,
            endpoint,
            project: project.into(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn api(&self) -> String {
        format!("{}/api/v4", self.endpoint.base_url)
    }

    fn project_api(&self) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(self.project.as_bytes()).collect();
        format!("{}/projects/{}/registry/repositories", self.api(), encoded)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let EndpointCredential::PrivateToken(token) = &self.endpoint.credential {
            let value = HeaderValue::from_str(token)
                .map_err(|e| TransferError::Validation(format!("invalid private token: {}", e)))?;
            headers.insert(HeaderName::from_static("private-token"), value);
        }
        Ok(headers)
    }

    fn decode_page<R, T>(
        headers: &HeaderMap,
        body: &[u8],
        operation: &str,
        convert: impl Fn(R) -> T,
    ) -> Result<Page<T>>
    where
        R: for<'de> Deserialize<'de>,
    {
        let records: Vec<R> = serde_json::from_slice(body)
            .map_err(|e| TransferError::Parse(format!("{}: {}", operation, e)))?;
        Ok(Page {
            items: records.into_iter().map(convert).collect(),
            next: link_next(headers),
        })
    }

    /// Groups visible to the configured token
    pub async fn list_groups(&self) -> Listing<Group> {
        let headers = match self.headers() {
            Ok(headers) => headers,
            Err(err) => return Listing::partial(Vec::new(), err),
        };
        let url = format!("{}/groups?per_page={}", self.api(), PAGE_SIZE);
        Paginator::new(&self.client, headers, "list gitlab groups")
            .collect(&url, |headers, body| {
                Self::decode_page(headers, body, "list gitlab groups", |g: Group| g)
            })
            .await
    }
}

#[async_trait]
impl RegistryCatalog for GitLabCatalog {
    fn describe(&self) -> String {
        format!("gitlab {}", self.project)
    }

    async fn list_packages(&self) -> Listing<Package> {
        let headers = match self.headers() {
            Ok(headers) => headers,
            Err(err) => return Listing::partial(Vec::new(), err),
        };
        let url = format!("{}?per_page={}", self.project_api(), PAGE_SIZE);
        let project = self.project.clone();

        Paginator::new(&self.client, headers, "list gitlab repositories")
            .collect(&url, |headers, body| {
                Self::decode_page(headers, body, "list gitlab repositories", |r: RepositoryRecord| {
                    let name = r
                        .path
                        .rsplit('/')
                        .next()
                        .filter(|last| !last.is_empty())
                        .map(str::to_string)
                        .unwrap_or(r.name);
                    Package::new(project.clone(), name).with_id(r.id)
                })
            })
            .await
    }

    async fn list_tags(&self, package: &Package) -> Listing<Tag> {
        let Some(id) = package.id else {
            return Listing::partial(
                Vec::new(),
                TransferError::Validation(format!(
                    "package {} has no registry repository id",
                    package.name
                )),
            );
        };
        let headers = match self.headers() {
            Ok(headers) => headers,
            Err(err) => return Listing::partial(Vec::new(), err),
        };
        let url = format!("{}/{}/tags?per_page={}", self.project_api(), id, PAGE_SIZE);

        Paginator::new(&self.client, headers, "list gitlab tags")
            .collect(&url, |headers, body| {
                Self::decode_page(headers, body, "list gitlab tags", |t: TagRecord| {
                    Tag::new(package.clone(), t.name)
                })
            })
            .await
    }

    async fn tag_details(&self, tag: &Tag) -> Result<Tag> {
        let id = tag.package.id.ok_or_else(|| {
            TransferError::Validation(format!(
                "package {} has no registry repository id",
                tag.package.name
            ))
        })?;
        let url = format!("{}/{}/tags/{}", self.project_api(), id, tag.name);

        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "gitlab tag details"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &text,
                "gitlab tag details",
            ));
        }

        let detail: TagDetailRecord = response
            .json()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "gitlab tag details"))?;

        Ok(Tag {
            package: tag.package.clone(),
            name: tag.name.clone(),
            timestamp: detail
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .or(tag.timestamp),
            digest: detail.digest.or_else(|| tag.digest.clone()),
            size: detail.total_size.or(tag.size),
        })
    }
}
