//! Remote manifest digest lookup for the idempotency check

use crate::config::AuthConfig;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::Result;
use crate::image::ImageRef;
use crate::registry::auth::{AuthChallenge, api_host, fetch_token};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::collections::HashMap;
use tokio::sync::Mutex;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.oci.image.index.v1+json";

const DIGEST_HEADER: &str = "docker-content-digest";

#[async_trait]
pub trait DigestResolver: Send + Sync {
    /// Digest the registry reports for `reference`, `None` when it has no such tag
    async fn remote_digest(&self, reference: &ImageRef) -> Result<Option<String>>;
}

/// Resolves digests with `HEAD /v2/<name>/manifests/<tag>`, answering bearer
/// and basic challenges with the configured credential
pub struct ManifestDigestClient {
    client: Client,
    auth: Option<AuthConfig>,
    scheme: String,
    resolved: Mutex<HashMap<String, String>>,
}

impl ManifestDigestClient {
    pub fn new(client: Client, auth: Option<AuthConfig>) -> Self {
        Self {
            client,
            auth,
            scheme: "https".to_string(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    fn head(&self, url: &str) -> RequestBuilder {
        self.client
            .head(url)
            .header(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "manifest lookup"))
    }

    async fn authorized_retry(&self, first: Response, url: &str, repository: &str) -> Result<Response> {
        match AuthChallenge::from_headers(first.headers()) {
            Some(AuthChallenge::Bearer {
                realm,
                service,
                scope,
            }) => {
                let scope = scope.unwrap_or_else(|| format!("repository:{}:pull", repository));
                let token =
                    fetch_token(&self.client, &realm, &service, Some(&scope), self.auth.as_ref())
                        .await?;
                self.send(self.head(url).bearer_auth(token)).await
            }
            Some(AuthChallenge::Basic) => match &self.auth {
                Some(auth) => {
                    self.send(self.head(url).basic_auth(&auth.username, Some(&auth.password)))
                        .await
                }
                None => Ok(first),
            },
            None => Ok(first),
        }
    }
}

#[async_trait]
impl DigestResolver for ManifestDigestClient {
    async fn remote_digest(&self, reference: &ImageRef) -> Result<Option<String>> {
        let key = reference.to_string();
        if let Some(digest) = self.resolved.lock().await.get(&key) {
            return Ok(Some(digest.clone()));
        }

        let repository = reference.remote_path();
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme,
            api_host(reference.registry_host()),
            repository,
            reference.tag
        );

        let mut response = self.send(self.head(&url)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            response = self.authorized_retry(response, &url, &repository).await?;
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &text,
                "manifest lookup",
            ));
        }

        let digest = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(digest) = &digest {
            self.resolved.lock().await.insert(key, digest.clone());
        }
        Ok(digest)
    }
}
