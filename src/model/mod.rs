//! Shared data model for repositories, tags, manifests, and catalog pages
//!
//! All three backend kinds (remote registry, local runtime, mock) normalize
//! into these shapes so the aggregator treats them uniformly.

use chrono::{DateTime, Utc};

/// Manifest and config media types for Docker v2 and OCI content negotiation
pub mod media_type {
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

    /// True for multi-platform index/list media types, which reference
    /// per-platform manifests instead of layers.
    pub fn is_index(media_type: &str) -> bool {
        media_type == DOCKER_MANIFEST_LIST || media_type == OCI_INDEX
    }
}

/// Outcome of the most recent fetch for a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    Pending,
    Failed,
}

/// One repository as seen through the unified catalog view.
///
/// Identity is (registry_id, name); the aggregator's deduplication set is
/// scoped per registry, not global.
#[derive(Debug, Clone)]
pub struct Repository {
    pub registry_id: String,
    pub name: String,
    /// Lazily known; `None` until tag enrichment has run
    pub tag_count: Option<usize>,
    /// Up to three recent tags, `latest` excluded
    pub recent_tags: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub monitored: bool,
    pub status: FetchStatus,
}

impl Repository {
    pub fn new(registry_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            registry_id: registry_id.into(),
            name: name.into(),
            tag_count: None,
            recent_tags: Vec::new(),
            last_updated: None,
            monitored: false,
            status: FetchStatus::Pending,
        }
    }
}

/// One tag within a repository
#[derive(Debug, Clone)]
pub struct Tag {
    pub repository: String,
    pub name: String,
    pub digest: Option<String>,
    /// Resolved from the manifest config blob (remote), the runtime's image
    /// listing (local), or seeded data (mock) — never from list order
    pub created: Option<DateTime<Utc>>,
    pub media_type: Option<String>,
}

impl Tag {
    pub fn new(repository: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            name: name.into(),
            digest: None,
            created: None,
            media_type: None,
        }
    }
}

/// Content descriptor: the config reference inside a manifest
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

/// One image layer
#[derive(Debug, Clone)]
pub struct Layer {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

/// Normalized image manifest, common to Docker v2 and OCI
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Content digest (`Docker-Content-Digest` header when available)
    pub digest: Option<String>,
    pub media_type: String,
    pub schema_version: u32,
    pub config: Option<Descriptor>,
    pub layers: Vec<Layer>,
}

impl Manifest {
    pub fn total_size(&self) -> u64 {
        let config = self.config.as_ref().map(|c| c.size).unwrap_or(0);
        config + self.layers.iter().map(|l| l.size).sum::<u64>()
    }
}

/// One merged, deduplicated page of the unified catalog view
#[derive(Debug, Clone)]
pub struct CatalogPage {
    /// Newly applied repositories, monitored entries first
    pub repositories: Vec<Repository>,
    /// Opaque continuation cursor; `None` means the catalog is exhausted
    pub next_cursor: Option<String>,
    /// Deduplicated repositories observed so far in this aggregation session
    pub total: usize,
    /// Monitored names present in that set
    pub monitored: usize,
}

impl CatalogPage {
    /// The `total(monitored)` rendering, e.g. `1003(3)`.
    pub fn counts_label(&self) -> String {
        format!("{}({})", self.total, self.monitored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_label() {
        let page = CatalogPage {
            repositories: Vec::new(),
            next_cursor: None,
            total: 1003,
            monitored: 3,
        };
        assert_eq!(page.counts_label(), "1003(3)");
    }

    #[test]
    fn test_manifest_total_size() {
        let manifest = Manifest {
            digest: None,
            media_type: media_type::DOCKER_MANIFEST.to_string(),
            schema_version: 2,
            config: Some(Descriptor {
                media_type: media_type::DOCKER_CONFIG.to_string(),
                size: 1000,
                digest: "sha256:cfg".to_string(),
            }),
            layers: vec![
                Layer {
                    media_type: media_type::DOCKER_LAYER.to_string(),
                    size: 5000,
                    digest: "sha256:l1".to_string(),
                },
                Layer {
                    media_type: media_type::DOCKER_LAYER.to_string(),
                    size: 2500,
                    digest: "sha256:l2".to_string(),
                },
            ],
        };
        assert_eq!(manifest.total_size(), 8500);
    }

    #[test]
    fn test_index_media_types() {
        assert!(media_type::is_index(media_type::OCI_INDEX));
        assert!(media_type::is_index(media_type::DOCKER_MANIFEST_LIST));
        assert!(!media_type::is_index(media_type::DOCKER_MANIFEST));
    }
}
