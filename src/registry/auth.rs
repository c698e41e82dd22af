//! Registry authentication: challenge parsing, token exchange and re-login transports

use crate::config::AuthConfig;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Registry API host for a reference host; Docker Hub serves its API elsewhere
pub fn api_host(registry_host: &str) -> &str {
    match registry_host {
        "docker.io" | "index.docker.io" => "registry-1.docker.io",
        other => other,
    }
}

/// A parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Bearer {
        realm: String,
        service: String,
        scope: Option<String>,
    },
    Basic,
}

impl AuthChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."` or a `Basic` challenge
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        if header.len() >= 5 && header[..5].eq_ignore_ascii_case("basic") {
            return Some(AuthChallenge::Basic);
        }
        if header.len() < 7 || !header[..7].eq_ignore_ascii_case("bearer ") {
            return None;
        }

        let mut params = HashMap::new();
        for param in split_params(&header[7..]) {
            if let Some(eq_pos) = param.find('=') {
                let key = param[..eq_pos].trim().to_lowercase();
                let value = param[eq_pos + 1..].trim().trim_matches('"').to_string();
                params.insert(key, value);
            }
        }

        let realm = params.remove("realm")?;
        Some(AuthChallenge::Bearer {
            realm,
            service: params.remove("service").unwrap_or_default(),
            scope: params.remove("scope"),
        })
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(Self::parse)
    }
}

/// Split on commas outside quotes; scopes may contain commas (`pull,push`)
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Exchange a bearer challenge for a token, with basic auth when credentials are known
pub async fn fetch_token(
    client: &Client,
    realm: &str,
    service: &str,
    scope: Option<&str>,
    auth: Option<&AuthConfig>,
) -> Result<String> {
    let mut query = vec![("service", service)];
    if let Some(scope) = scope {
        query.push(("scope", scope));
    }

    let mut request = client.get(realm).query(&query);
    if let Some(auth) = auth {
        request = request.basic_auth(&auth.username, Some(&auth.password));
    }
    tracing::debug!(realm = %realm, service = %service, scope = ?scope, "requesting registry token");

    let response = request
        .send()
        .await
        .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(HttpErrorHandler::handle_registry_error(
            status,
            &text,
            "token request",
        ));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

    body.token
        .or(body.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            TransferError::AuthenticationRequired("token response carried no token".to_string())
        })
}

/// A way to re-establish registry credentials after an authentication failure
#[async_trait]
pub trait RegistryLogin: Send + Sync {
    fn name(&self) -> &str;

    async fn login(&self, registry_host: &str, auth: &AuthConfig) -> Result<()>;
}

/// Verifies credentials against the registry API itself via the
/// `/v2/` challenge and the token service it names
pub struct TokenExchangeLogin {
    client: Client,
    scheme: String,
}

impl TokenExchangeLogin {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            scheme: "https".to_string(),
        }
    }

    /// Plain-HTTP registries, e.g. a local test registry
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

#[async_trait]
impl RegistryLogin for TokenExchangeLogin {
    fn name(&self) -> &str {
        "token exchange"
    }

    async fn login(&self, registry_host: &str, auth: &AuthConfig) -> Result<()> {
        auth.validate()?;
        let url = format!("{}://{}/v2/", self.scheme, api_host(registry_host));

        let probe = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry login"))?;

        if probe.status().is_success() {
            tracing::debug!(registry = %registry_host, "registry does not require authentication");
            return Ok(());
        }
        if probe.status() != StatusCode::UNAUTHORIZED {
            let status = probe.status();
            let text = probe.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &text,
                "registry login",
            ));
        }

        match AuthChallenge::from_headers(probe.headers()) {
            Some(AuthChallenge::Bearer {
                realm,
                service,
                scope,
            }) => fetch_token(&self.client, &realm, &service, scope.as_deref(), Some(auth))
                .await
                .map(|_| ()),
            Some(AuthChallenge::Basic) => {
                let response = self
                    .client
                    .get(&url)
                    .basic_auth(&auth.username, Some(&auth.password))
                    .send()
                    .await
                    .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry login"))?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    let text = response.text().await.unwrap_or_default();
                    Err(HttpErrorHandler::handle_registry_error(
                        status,
                        &text,
                        "registry login",
                    ))
                }
            }
            None => Err(TransferError::AuthenticationRequired(format!(
                "{} returned 401 without a usable challenge",
                registry_host
            ))),
        }
    }
}

/// Runs `docker login --password-stdin` to check the credential with the
/// registry. It only updates the CLI's own config; pushes through the engine
/// API still carry their credentials per request.
pub struct DockerCliLogin {
    program: String,
}

impl DockerCliLogin {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerCliLogin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryLogin for DockerCliLogin {
    fn name(&self) -> &str {
        "docker cli"
    }

    async fn login(&self, registry_host: &str, auth: &AuthConfig) -> Result<()> {
        auth.validate()?;
        let mut child = Command::new(&self.program)
            .args(["login", "--username", &auth.username, "--password-stdin", registry_host])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TransferError::RuntimeUnavailable(format!("cannot run {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(auth.password.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() || stdout.contains("Login Succeeded") {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(TransferError::AuthenticationRequired(format!(
            "docker login to {} failed: {}",
            registry_host,
            stderr.trim()
        )))
    }
}

/// Tries each transport in order; the whole chain counts as one attempt
pub struct FallbackLogin {
    methods: Vec<Box<dyn RegistryLogin>>,
}

impl FallbackLogin {
    pub fn new(methods: Vec<Box<dyn RegistryLogin>>) -> Self {
        Self { methods }
    }

    /// Registry API token exchange first, then the docker CLI
    pub fn standard(client: Client) -> Self {
        Self::new(vec![
            Box::new(TokenExchangeLogin::new(client)),
            Box::new(DockerCliLogin::new()),
        ])
    }
}

#[async_trait]
impl RegistryLogin for FallbackLogin {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn login(&self, registry_host: &str, auth: &AuthConfig) -> Result<()> {
        let mut last_error = TransferError::AuthenticationRequired(format!(
            "no login method configured for {}",
            registry_host
        ));

        for method in &self.methods {
            match method.login(registry_host, auth).await {
                Ok(()) => {
                    tracing::info!(registry = %registry_host, method = method.name(), "login succeeded");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(registry = %registry_host, method = method.name(), error = %err, "login failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}
