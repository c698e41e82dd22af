//! Run configuration: registry endpoints, credentials, repositories and filters
//!
//! Values come from the environment (see [`AppConfig::from_env`]) and are
//! overridden by command-line flags in `cli::runner`.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_GITLAB_PROJECT: &str = "advanced-search/content-services/idol";
pub const DEFAULT_HUB_URL: &str = "https://hub.docker.com";
pub const DEFAULT_HUB_NAMESPACE: &str = "microfocusidolserver";
pub const DEFAULT_TARGET_USERNAME: &str = "oauth2";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Username/password pair for a registry login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(TransferError::Validation(
                "Username cannot be empty".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(TransferError::Validation(
                "Password cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a catalog authenticates its API requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointCredential {
    /// Sent as a `PRIVATE-TOKEN` header
    PrivateToken(String),
    /// Exchanged for a session token on first use
    Login(AuthConfig),
    Anonymous,
}

/// Immutable per-run description of a registry API
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    pub base_url: String,
    pub credential: EndpointCredential,
    pub timeout: Duration,
}

impl RegistryEndpoint {
    pub fn new(base_url: impl Into<String>, credential: EndpointCredential) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(TransferError::Validation(
                "Registry address cannot be empty".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(TransferError::Validation(format!(
                "Invalid registry address: {}. Must start with http:// or https://",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(TransferError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gitlab_url: Option<String>,
    pub gitlab_token: Option<String>,
    pub gitlab_project: String,
    pub hub_url: String,
    pub hub_username: Option<String>,
    pub hub_password: Option<String>,
    pub hub_namespace: String,
    pub source_repo: Option<String>,
    pub target_repo: Option<String>,
    pub target_username: String,
    pub target_password: Option<String>,
    pub name_filters: Vec<String>,
    pub tag_filters: Vec<String>,
    pub request_timeout: Duration,
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gitlab_url: None,
            gitlab_token: None,
            gitlab_project: DEFAULT_GITLAB_PROJECT.to_string(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            hub_username: None,
            hub_password: None,
            hub_namespace: DEFAULT_HUB_NAMESPACE.to_string(),
            source_repo: None,
            target_repo: None,
            target_username: DEFAULT_TARGET_USERNAME.to_string(),
            target_password: None,
            name_filters: vec!["*".to_string()],
            tag_filters: vec!["*".to_string()],
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            log_dir: PathBuf::from("./logs"),
        }
    }
}

impl AppConfig {
    /// Create config from environment variables and defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.gitlab_url = get("GITLAB_URL").map(|v| v.trim_end_matches('/').to_string());
        config.gitlab_token = get("GITLAB_TOKEN");
        if let Some(project) = get("GITLAB_PROJECT") {
            config.gitlab_project = project;
        }
        if let Some(url) = get("DOCKER_HUB_URL") {
            config.hub_url = url.trim_end_matches('/').to_string();
        }
        config.hub_username = get("DOCKER_HUB_USERNAME");
        config.hub_password = get("DOCKER_HUB_PASSWORD");
        if let Some(namespace) = get("DOCKER_HUB_NAMESPACE") {
            config.hub_namespace = namespace;
        }
        config.source_repo = get("OLD_REPO").map(|v| v.trim_end_matches('/').to_string());
        config.target_repo = get("NEW_REPO").map(|v| v.trim_end_matches('/').to_string());
        if let Some(user) = get("TARGET_USERNAME") {
            config.target_username = user;
        }
        config.target_password = get("TARGET_PASSWORD");
        if let Some(names) = get("NAME_FILTERS") {
            config.name_filters = parse_filter_list(&names);
        }
        if let Some(tags) = get("TAG_FILTERS") {
            config.tag_filters = parse_filter_list(&tags);
        }
        if let Some(timeout) = get("REQUEST_TIMEOUT").and_then(|v| v.trim().parse::<u64>().ok()) {
            if timeout > 0 {
                config.request_timeout = Duration::from_secs(timeout);
            }
        }
        if let Some(dir) = get("TRANSFER_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        config
    }

    /// Project registry endpoint; needs both `GITLAB_URL` and `GITLAB_TOKEN`
    pub fn gitlab_endpoint(&self) -> Result<RegistryEndpoint> {
        match (&self.gitlab_url, &self.gitlab_token) {
            (Some(url), Some(token)) => {
                let endpoint = RegistryEndpoint::new(
                    url.clone(),
                    EndpointCredential::PrivateToken(token.clone()),
                )
                .with_timeout(self.request_timeout);
                endpoint.validate()?;
                Ok(endpoint)
            }
            _ => Err(TransferError::Validation(
                "Missing required environment variables GITLAB_URL or GITLAB_TOKEN".to_string(),
            )),
        }
    }

    /// Namespace registry endpoint; anonymous when no credentials are set
    pub fn hub_endpoint(&self) -> Result<RegistryEndpoint> {
        let credential = self.hub_auth().map_or(EndpointCredential::Anonymous, |auth| {
            EndpointCredential::Login(auth)
        });
        let endpoint = RegistryEndpoint::new(self.hub_url.clone(), credential)
            .with_timeout(self.request_timeout);
        endpoint.validate()?;
        Ok(endpoint)
    }

    pub fn hub_auth(&self) -> Option<AuthConfig> {
        match (&self.hub_username, &self.hub_password) {
            (Some(user), Some(password)) => Some(AuthConfig::new(user.clone(), password.clone())),
            _ => None,
        }
    }

    /// Credential used for the target registry re-login.
    /// The password falls back to the project registry token.
    pub fn target_auth(&self) -> Option<AuthConfig> {
        self.target_password
            .clone()
            .or_else(|| self.gitlab_token.clone())
            .map(|password| AuthConfig::new(self.target_username.clone(), password))
    }

    /// Target repository prefix. Without `NEW_REPO` it is derived from the
    /// project registry host and project path.
    pub fn target_repository(&self) -> Result<String> {
        if let Some(repo) = &self.target_repo {
            return Ok(repo.clone());
        }
        if let Some(url) = &self.gitlab_url {
            let host = url
                .split_once("://")
                .map(|(_, rest)| rest)
                .unwrap_or(url.as_str());
            return Ok(format!("{}/{}", host.trim_end_matches('/'), self.gitlab_project));
        }
        Err(TransferError::Validation(
            "Repository not specified. Set NEW_REPO, pass --target-repo, or set GITLAB_URL"
                .to_string(),
        ))
    }
}

/// Split a comma-separated filter list; an empty list means "match everything"
pub fn parse_filter_list(value: &str) -> Vec<String> {
    let filters: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if filters.is_empty() {
        vec!["*".to_string()]
    } else {
        filters
    }
}

/// Parse list-file content: one entry per line, blank lines and `#` comments ignored
pub fn parse_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn read_list_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TransferError::Io(format!("Error reading file {}: {}", path.display(), e))
    })?;
    Ok(parse_list(&content))
}
