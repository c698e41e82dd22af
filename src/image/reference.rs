//! Image reference parsing
//!
//! Handles references such as:
//! - `content:24.4`
//! - `microfocusidolserver/content:24.4`
//! - `docker.io/microfocusidolserver/content:24.4`
//! - `registry.example.com:5000/group/project/content:24.4`

use crate::error::{Result, TransferError};
use std::fmt;
use std::hash::{Hash, Hasher};

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// Fully qualified image reference. Equality and hashing use the string form.
#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Registry host when the reference names one explicitly
    pub registry: Option<String>,
    /// Namespace or project path between the host and the package name
    pub path: String,
    /// Package (bare image) name
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransferError::Validation(
                "Empty image reference".to_string(),
            ));
        }
        if s.contains('@') {
            return Err(TransferError::Validation(format!(
                "Digest references are not supported here: {}",
                s
            )));
        }

        // A ':' only separates the tag when it follows the last '/'
        let last_slash = s.rfind('/');
        let (repository, tag) = match s.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => {
                (&s[..colon], &s[colon + 1..])
            }
            _ => (s, DEFAULT_TAG),
        };
        if tag.is_empty() {
            return Err(TransferError::Validation(format!(
                "Empty tag in image reference: {}",
                s
            )));
        }

        let mut components: Vec<&str> = repository.split('/').collect();
        if components.iter().any(|c| c.is_empty()) {
            return Err(TransferError::Validation(format!(
                "Invalid image reference: {}",
                s
            )));
        }

        let registry = if components.len() > 1 && looks_like_registry(components[0]) {
            Some(components.remove(0).to_string())
        } else {
            None
        };

        let name = components.pop().unwrap_or_default().to_string();
        let path = components.join("/");

        Ok(Self {
            registry,
            path,
            name,
            tag: tag.to_string(),
        })
    }

    /// Reference for `name:tag` under a repository prefix such as `host/group/project`
    pub fn in_repository(repository: &str, name: &str, tag: &str) -> Result<Self> {
        Self::parse(&format!(
            "{}/{}:{}",
            repository.trim_end_matches('/'),
            name,
            tag
        ))
    }

    /// Everything except the tag
    pub fn repository(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(registry) = &self.registry {
            parts.push(registry);
        }
        if !self.path.is_empty() {
            parts.push(&self.path);
        }
        parts.push(&self.name);
        parts.join("/")
    }

    /// Repository path as the registry's distribution API sees it
    pub fn remote_path(&self) -> String {
        if self.path.is_empty() {
            if self.registry_host() == DEFAULT_REGISTRY {
                format!("library/{}", self.name)
            } else {
                self.name.clone()
            }
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    /// Host used for logins and digest lookups
    pub fn registry_host(&self) -> &str {
        self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY)
    }

    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..self.clone()
        }
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        !prefix.is_empty() && self.to_string().starts_with(&format!("{}/", prefix))
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository(), self.tag)
    }
}

impl PartialEq for ImageRef {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for ImageRef {}

impl Hash for ImageRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl std::str::FromStr for ImageRef {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
