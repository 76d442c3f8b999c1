//! Registry configuration loading and descriptor parsing
//!
//! The persisted configuration file is owned by an external collaborator;
//! this module consumes it read-only at startup and turns each entry into a
//! [`RegistryDescriptor`]. A missing or corrupt file falls back to an empty
//! registry set rather than aborting startup.

use crate::error::{CatalogError, Result};
use serde::Deserialize;
use std::path::Path;

/// Backend kind, derived from the endpoint scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    /// Docker Registry HTTP API v2 / OCI Distribution endpoint
    Remote,
    /// `local://<runtime>` — podman/docker queried via CLI
    Local,
    /// `mock://<name>` — seeded synthetic source
    Mock,
}

/// How requests against one registry authenticate
#[derive(Debug, Clone)]
pub enum AuthMethod {
    None,
    /// Credentials attached to every request; no session state machine
    Basic { username: String, password: String },
    /// Static token supplied at configuration time; rejection is terminal
    BearerStatic { token: String },
    /// Credentials exchanged at the challenge realm for a scoped token
    TokenExchange { username: String, password: String },
}

/// Static configuration for one backend; immutable after load
#[derive(Debug, Clone)]
pub struct RegistryDescriptor {
    pub id: String,
    /// Endpoint URL, or `local://<runtime>` / `mock://<name>`
    pub endpoint: String,
    pub auth: AuthMethod,
    /// Ordered: monitored repositories always head the merged view
    pub monitored: Vec<String>,
    pub skip_tls: bool,
}

impl RegistryDescriptor {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            auth: AuthMethod::None,
            monitored: Vec::new(),
            skip_tls: false,
        }
    }

    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_monitored(mut self, monitored: Vec<String>) -> Self {
        self.monitored = monitored;
        self
    }

    pub fn kind(&self) -> RegistryKind {
        if self.endpoint.starts_with("local://") {
            RegistryKind::Local
        } else if self.endpoint.starts_with("mock://") {
            RegistryKind::Mock
        } else {
            RegistryKind::Remote
        }
    }

    /// Runtime name for `local://` endpoints, e.g. `podman`.
    pub fn runtime_name(&self) -> Option<&str> {
        self.endpoint.strip_prefix("local://")
    }

    pub fn is_monitored(&self, repository: &str) -> bool {
        self.monitored.iter().any(|name| name == repository)
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    registries: Vec<RegistryEntry>,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    id: String,
    url: String,
    #[serde(default)]
    auth: Option<AuthEntry>,
    #[serde(default)]
    monitored_repos: Vec<String>,
    #[serde(default)]
    skip_tls: bool,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    method: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

impl AuthEntry {
    fn into_method(self, registry_id: &str) -> Result<AuthMethod> {
        let credentials = |entry: &AuthEntry| -> Result<(String, String)> {
            match (&entry.username, &entry.password) {
                (Some(user), Some(pass)) => Ok((user.clone(), pass.clone())),
                _ => Err(CatalogError::Configuration(format!(
                    "registry '{}': auth method '{}' requires username and password",
                    registry_id, entry.method
                ))),
            }
        };

        match self.method.as_str() {
            "none" => Ok(AuthMethod::None),
            "basic" => {
                let (username, password) = credentials(&self)?;
                Ok(AuthMethod::Basic { username, password })
            }
            "bearer-static" => match self.token {
                Some(token) => Ok(AuthMethod::BearerStatic { token }),
                None => Err(CatalogError::Configuration(format!(
                    "registry '{}': bearer-static auth requires a token",
                    registry_id
                ))),
            },
            "token-exchange" => {
                let (username, password) = credentials(&self)?;
                Ok(AuthMethod::TokenExchange { username, password })
            }
            other => Err(CatalogError::Configuration(format!(
                "registry '{}': unknown auth method '{}'",
                registry_id, other
            ))),
        }
    }
}

/// Strict parse of configuration JSON into descriptors.
pub fn parse_registries(json: &str) -> Result<Vec<RegistryDescriptor>> {
    let file: ConfigFile =
        serde_json::from_str(json).map_err(|e| CatalogError::Configuration(e.to_string()))?;

    let mut descriptors = Vec::with_capacity(file.registries.len());
    for entry in file.registries {
        let auth = match entry.auth {
            Some(auth_entry) => auth_entry.into_method(&entry.id)?,
            None => AuthMethod::None,
        };
        descriptors.push(RegistryDescriptor {
            id: entry.id,
            endpoint: entry.url.trim_end_matches('/').to_string(),
            auth,
            monitored: entry.monitored_repos,
            skip_tls: entry.skip_tls,
        });
    }
    Ok(descriptors)
}

/// Load descriptors from a config file, falling back to an empty set when
/// the file is missing, unreadable, or corrupt.
pub fn load_registries(path: &Path) -> Vec<RegistryDescriptor> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "config unreadable, using empty registry set");
            return Vec::new();
        }
    };

    match parse_registries(&contents) {
        Ok(descriptors) => {
            tracing::info!(path = %path.display(), count = descriptors.len(), "loaded registry configuration");
            descriptors
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "config corrupt, using empty registry set");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_endpoint_scheme() {
        assert_eq!(
            RegistryDescriptor::new("q", "https://quay.io").kind(),
            RegistryKind::Remote
        );
        assert_eq!(
            RegistryDescriptor::new("p", "local://podman").kind(),
            RegistryKind::Local
        );
        assert_eq!(
            RegistryDescriptor::new("m", "mock://massive-registry").kind(),
            RegistryKind::Mock
        );
        assert_eq!(
            RegistryDescriptor::new("p", "local://podman")
                .runtime_name()
                .unwrap(),
            "podman"
        );
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "registries": [
                {
                    "id": "quay",
                    "url": "https://quay.io/",
                    "auth": {"method": "token-exchange", "username": "bot", "password": "hunter2"},
                    "monitored_repos": ["coreos/etcd", "prometheus/prometheus"]
                },
                {"id": "podman", "url": "local://podman"},
                {
                    "id": "internal",
                    "url": "https://registry.internal:5000",
                    "auth": {"method": "bearer-static", "token": "abc123"},
                    "skip_tls": true
                }
            ]
        }"#;

        let descriptors = parse_registries(json).unwrap();
        assert_eq!(descriptors.len(), 3);

        assert_eq!(descriptors[0].endpoint, "https://quay.io");
        assert!(matches!(descriptors[0].auth, AuthMethod::TokenExchange { .. }));
        assert!(descriptors[0].is_monitored("coreos/etcd"));
        assert!(!descriptors[0].is_monitored("coreos/flannel"));

        assert_eq!(descriptors[1].kind(), RegistryKind::Local);
        assert!(matches!(descriptors[1].auth, AuthMethod::None));

        assert!(descriptors[2].skip_tls);
        assert!(matches!(
            descriptors[2].auth,
            AuthMethod::BearerStatic { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_incomplete_auth() {
        let json = r#"{"registries": [{"id": "r", "url": "https://r.test", "auth": {"method": "basic", "username": "u"}}]}"#;
        assert!(matches!(
            parse_registries(json),
            Err(CatalogError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_falls_back_to_empty_on_corrupt_file() {
        let dir = std::env::temp_dir().join("card-catalog-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(load_registries(&path).is_empty());
        assert!(load_registries(&dir.join("missing.json")).is_empty());
    }
}
