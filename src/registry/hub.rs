//! Docker Hub catalog: namespace repositories and their tags

use crate::config::{AuthConfig, EndpointCredential, RegistryEndpoint};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, TransferError};
use crate::registry::catalog::{Listing, Package, RegistryCatalog, Tag};
use crate::registry::paginate::{Page, Paginator};
use crate::registry::parse_timestamp;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

const PAGE_SIZE: usize = 100;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope<T> {
    next: Option<String>,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    name: String,
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagRecord {
    name: String,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    full_size: Option<u64>,
}

pub struct HubCatalog {
    client: Client,
    endpoint: RegistryEndpoint,
    namespace: String,
    session: OnceCell<Option<String>>,
}

impl HubCatalog {
    pub fn new(endpoint: RegistryEndpoint, namespace: impl Into<String>) -> Result<Self> {
        endpoint.validate()?;
        let client = Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "client setup"))?;

        Ok(Self {
            client,
            endpoint,
            namespace: namespace.into(),
            session: OnceCell::new(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Log in at most once per catalog; anonymous access needs no session
    async fn session_token(&self) -> Result<Option<String>> {
        self.session
            .get_or_try_init(|| async {
                match &self.endpoint.credential {
                    EndpointCredential::Login(auth) => self.login(auth).await.map(Some),
                    EndpointCredential::PrivateToken(token) => Ok(Some(token.clone())),
                    EndpointCredential::Anonymous => Ok(None),
                }
            })
            .await
            .cloned()
    }

    async fn login(&self, auth: &AuthConfig) -> Result<String> {
        let url = format!("{}/v2/users/login/", self.endpoint.base_url);
        tracing::debug!(url = %url, user = %auth.username, "logging in to docker hub");

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: &auth.username,
                password: &auth.password,
            })
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "docker hub login"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &text,
                "docker hub login",
            ));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "docker hub login"))?;

        body.token.filter(|t| !t.is_empty()).ok_or_else(|| {
            TransferError::AuthenticationRequired(
                "docker hub login returned no token".to_string(),
            )
        })
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.session_token().await? {
            let value = HeaderValue::from_str(&format!("JWT {}", token))
                .map_err(|e| TransferError::Validation(format!("invalid hub token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn decode_page<R, T>(
        body: &[u8],
        operation: &str,
        convert: impl Fn(R) -> T,
    ) -> Result<Page<T>>
    where
        R: for<'de> Deserialize<'de>,
    {
        let envelope: PageEnvelope<R> = serde_json::from_slice(body)
            .map_err(|e| TransferError::Parse(format!("{}: {}", operation, e)))?;
        Ok(Page {
            items: envelope.results.into_iter().map(convert).collect(),
            next: envelope.next.filter(|n| !n.is_empty()),
        })
    }
}

#[async_trait]
impl RegistryCatalog for HubCatalog {
    fn describe(&self) -> String {
        format!("docker hub {}", self.namespace)
    }

    async fn list_packages(&self) -> Listing<Package> {
        let headers = match self.headers().await {
            Ok(headers) => headers,
            Err(err) => return Listing::partial(Vec::new(), err),
        };

        let url = format!(
            "{}/v2/namespaces/{}/repositories/?page_size={}",
            self.endpoint.base_url, self.namespace, PAGE_SIZE
        );
        let namespace = self.namespace.clone();
        Paginator::new(&self.client, headers, "list hub repositories")
            .collect(&url, |_, body| {
                Self::decode_page(body, "list hub repositories", |r: RepositoryRecord| {
                    Package::new(r.namespace.unwrap_or_else(|| namespace.clone()), r.name)
                })
            })
            .await
    }

    async fn list_tags(&self, package: &Package) -> Listing<Tag> {
        let headers = match self.headers().await {
            Ok(headers) => headers,
            Err(err) => return Listing::partial(Vec::new(), err),
        };

        let url = format!(
            "{}/v2/repositories/{}/{}/tags/?page_size={}",
            self.endpoint.base_url, package.namespace, package.name, PAGE_SIZE
        );
        Paginator::new(&self.client, headers, "list hub tags")
            .collect(&url, |_, body| {
                Self::decode_page(body, "list hub tags", |r: TagRecord| Tag {
                    package: package.clone(),
                    name: r.name,
                    timestamp: r.last_updated.as_deref().and_then(parse_timestamp),
                    digest: r.digest.filter(|d| !d.is_empty()),
                    size: r.full_size,
                })
            })
            .await
    }
}
