//! Deterministic mock registry source
//!
//! Satisfies the same contract as the remote client over fixed, seeded
//! synthetic data, including multi-page catalogs above 1000 repositories,
//! so every aggregator code path can run without a backend.

use crate::error::{CatalogError, Result};
use crate::model::{media_type, Descriptor, Layer, Manifest, Tag};
use crate::recorder::{CallRecorder, CallTimer};
use crate::registry::{CatalogSource, RepoPage, SourceHealth, TagPage};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::time::Duration;

pub struct MockClient {
    name: String,
    repositories: Vec<String>,
    recorder: CallRecorder,
}

impl MockClient {
    pub fn new(endpoint: &str, recorder: CallRecorder) -> Self {
        let name = endpoint
            .strip_prefix("mock://")
            .unwrap_or(endpoint)
            .to_string();
        let repositories = repositories_for(&name);
        Self {
            name,
            repositories,
            recorder,
        }
    }

    /// Mock over a caller-supplied catalog, for exercising pagination and
    /// deduplication at arbitrary sizes.
    pub fn with_repositories(
        endpoint: &str,
        mut repositories: Vec<String>,
        recorder: CallRecorder,
    ) -> Self {
        repositories.sort();
        repositories.dedup();
        Self {
            name: endpoint
                .strip_prefix("mock://")
                .unwrap_or(endpoint)
                .to_string(),
            repositories,
            recorder,
        }
    }

    fn record(&self, path: &str) {
        let timer = CallTimer::start("GET", format!("mock://{}{}", self.name, path));
        self.recorder.record(timer.finish(Some(200), 0));
    }
}

#[async_trait]
impl CatalogSource for MockClient {
    async fn list_catalog(&self, cursor: Option<&str>, page_size: usize) -> Result<RepoPage> {
        self.record("/v2/_catalog");

        let start = match cursor {
            // Same `last=<name>` continuation the Distribution API uses
            Some(last) => self
                .repositories
                .partition_point(|name| name.as_str() <= last),
            None => 0,
        };
        let end = start.saturating_add(page_size).min(self.repositories.len());
        let names = self.repositories[start..end].to_vec();
        let next_cursor = if end < self.repositories.len() {
            names.last().cloned()
        } else {
            None
        };

        Ok(RepoPage { names, next_cursor })
    }

    async fn list_tags(
        &self,
        repository: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<TagPage> {
        self.record(&format!("/v2/{}/tags/list", repository));

        if !self.repositories.iter().any(|name| name == repository) {
            return Err(CatalogError::NotFound(format!("repository {}", repository)));
        }

        let all_tags = tags_for(repository);
        let start = match cursor {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                CatalogError::Parse(format!("unusable tag cursor '{}'", cursor))
            })?,
            None => 0,
        };
        let end = start.saturating_add(page_size).min(all_tags.len());
        let tags = all_tags[start..end]
            .iter()
            .map(|name| Tag::new(repository, name.clone()))
            .collect();
        let next_cursor = (end < all_tags.len()).then(|| end.to_string());

        Ok(TagPage { tags, next_cursor })
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        self.record(&format!("/v2/{}/manifests/{}", repository, reference));

        if !self.repositories.iter().any(|name| name == repository) {
            return Err(CatalogError::NotFound(format!(
                "manifest {}:{}",
                repository, reference
            )));
        }

        // Layer count and sizes vary by image family, like real catalogs do
        let (layer_count, base_size) = if repository.contains("alpine") || repository.contains("distroless") {
            (1, 2_500_000u64)
        } else if repository.contains("ubuntu") || repository.contains("debian") {
            (4, 28_000_000)
        } else if repository.contains("node") || repository.contains("python") || repository.contains("golang") {
            (6, 45_000_000)
        } else if repository.contains("service") || repository.contains("webapp") {
            (8, 12_000_000)
        } else {
            (3, 5_432_100)
        };

        let oci = self.name.contains("gcr") || self.name.contains("quay");
        let (manifest_type, config_type, layer_type) = if oci {
            (
                media_type::OCI_MANIFEST,
                media_type::OCI_CONFIG,
                "application/vnd.oci.image.layer.v1.tar+gzip",
            )
        } else {
            (
                media_type::DOCKER_MANIFEST,
                media_type::DOCKER_CONFIG,
                media_type::DOCKER_LAYER,
            )
        };

        let layers = (0..layer_count)
            .map(|i| {
                let size = if i == 0 {
                    base_size
                } else if i == layer_count - 1 {
                    base_size / 10
                } else {
                    base_size / (2 + i as u64)
                };
                Layer {
                    media_type: layer_type.to_string(),
                    size,
                    digest: seeded_digest(&format!("{}:{}:layer{}", repository, reference, i)),
                }
            })
            .collect();

        Ok(Manifest {
            digest: Some(seeded_digest(&format!("{}:{}:manifest", repository, reference))),
            media_type: manifest_type.to_string(),
            schema_version: 2,
            config: Some(Descriptor {
                media_type: config_type.to_string(),
                size: 1234 + seed(repository) % 5000,
                digest: seeded_digest(&format!("{}:{}:config", repository, reference)),
            }),
            layers,
        })
    }

    async fn resolve_tag_timestamp(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        self.record(&format!("/v2/{}/blobs/config", repository));
        Ok(Some(seeded_timestamp(repository, tag)))
    }

    async fn check_health(&self) -> Result<SourceHealth> {
        self.record("/v2/");
        Ok(SourceHealth {
            reachable: true,
            api_version: Some("registry/2.0".to_string()),
            response_time: Duration::from_millis(1),
            detail: None,
        })
    }
}

/// Stable 64-bit seed from a name
fn seed(input: &str) -> u64 {
    let hash = Sha256::digest(input.as_bytes());
    u64::from_be_bytes(hash[..8].try_into().unwrap_or_default())
}

fn seeded_digest(input: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(input.as_bytes())))
}

/// Deterministic creation instant within the year before the seed epoch
fn seeded_timestamp(repository: &str, tag: &str) -> DateTime<Utc> {
    let epoch = Utc.with_ymd_and_hms(2025, 8, 15, 0, 0, 0).unwrap();
    let key = seed(&format!("{}:{}", repository, tag));
    epoch - ChronoDuration::days((key % 365) as i64) - ChronoDuration::minutes((key % 1440) as i64)
}

fn repositories_for(name: &str) -> Vec<String> {
    let mut repositories: Vec<String> = match name {
        "quay-io" => vec![
            "coreos/etcd",
            "prometheus/prometheus",
            "grafana/grafana",
            "jaegertracing/jaeger",
            "bitnami/kafka",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        "gcr-io" => vec![
            "distroless/base",
            "distroless/java",
            "cloud-sql-proxy",
            "gke/pause",
            "tensorflow/tensorflow",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        "local-dev" => vec![
            "webapp",
            "api-server",
            "database",
            "cache",
            "frontend",
            "worker",
            "scheduler",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        "enterprise" => vec![
            "microservice-a",
            "microservice-b",
            "shared-lib",
            "base-image",
            "monitoring",
            "logging",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        "massive-registry" => generate_large_catalog(),
        // public-registry, and the fallback for unmapped names
        _ => vec![
            "alpine", "nginx", "redis", "postgres", "ubuntu", "debian", "node", "python",
            "golang", "mysql",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    };
    repositories.sort();
    repositories
}

/// A catalog well above the 1000-item auto-load threshold, composed the way
/// real registries accumulate images: base images, language runtimes,
/// databases, and a long tail of service build tags.
fn generate_large_catalog() -> Vec<String> {
    let mut repos = BTreeSet::new();

    for base in ["ubuntu", "debian", "alpine", "centos", "fedora", "amazonlinux"] {
        for version in ["latest", "18.04", "20.04", "22.04", "bullseye", "bookworm", "3.17", "3.18"] {
            repos.insert(format!("{}/{}", base, version));
        }
    }

    for lang in ["node", "python", "golang", "java", "dotnet", "ruby", "php", "rust"] {
        for version in ["latest", "18", "16", "14", "3.11", "3.10", "3.9", "1.20", "1.19", "17", "11", "8"] {
            repos.insert(format!("{}/{}", lang, version));
            repos.insert(format!("{}/{}-alpine", lang, version));
            repos.insert(format!("{}/{}-slim", lang, version));
        }
    }

    for db in ["mysql", "postgres", "mongodb", "redis", "elasticsearch", "cassandra"] {
        for version in ["latest", "8.0", "15", "14", "6.2", "7.0"] {
            repos.insert(format!("{}/{}", db, version));
            repos.insert(format!("{}/{}-alpine", db, version));
        }
    }

    for server in ["nginx", "apache", "traefik", "caddy"] {
        for version in ["latest", "1.25", "1.24", "2.4", "stable", "alpine"] {
            repos.insert(format!("{}/{}", server, version));
        }
    }

    for tool in ["jenkins", "sonarqube", "nexus", "gitlab", "prometheus", "grafana", "vault"] {
        for version in ["latest", "lts", "latest-alpine"] {
            repos.insert(format!("{}/{}", tool, version));
        }
    }

    let services = [
        "auth-service",
        "user-service",
        "order-service",
        "payment-service",
        "notification-service",
        "catalog-service",
        "inventory-service",
        "shipping-service",
        "analytics-service",
        "reporting-service",
    ];
    for service in services {
        for env in ["prod", "staging", "dev"] {
            for major in 1..=3u32 {
                for minor in 0..5u32 {
                    for patch in 0..3u32 {
                        repos.insert(format!("{}/{}-v{}.{}.{}", service, env, major, minor, patch));
                    }
                }
            }
        }
    }

    repos.into_iter().collect()
}

fn tags_for(repository: &str) -> Vec<String> {
    let mut tags = vec!["latest".to_string(), "stable".to_string()];

    if ["alpine", "ubuntu", "debian"].iter().any(|n| repository.contains(n)) {
        tags.extend(
            ["3.18", "3.17", "3.16", "jammy", "focal", "bullseye", "slim"]
                .iter()
                .map(|t| t.to_string()),
        );
    } else if repository.contains("nginx") {
        tags.extend(
            ["1.25", "1.24", "1.23", "alpine", "mainline", "stable-alpine"]
                .iter()
                .map(|t| t.to_string()),
        );
    } else if repository.contains("postgres") || repository.contains("mysql") {
        tags.extend(
            ["15", "14", "13", "alpine", "15-alpine", "14-alpine"]
                .iter()
                .map(|t| t.to_string()),
        );
    } else if repository.contains("node") || repository.contains("python") {
        tags.extend(["18", "16", "3.11", "alpine", "slim"].iter().map(|t| t.to_string()));
        // Long patch-version tails exercise tag pagination
        for minor in 0..6 {
            for patch in 0..4 {
                tags.push(format!("18.{}.{}", minor, patch));
            }
        }
    } else if repository.contains("golang") {
        tags.extend(["1.21", "1.20", "alpine"].iter().map(|t| t.to_string()));
        for minor in 15..22 {
            tags.push(format!("1.{}.0", minor));
        }
    } else if repository.contains("service") || repository.contains("webapp") {
        tags.extend(["dev", "staging", "prod"].iter().map(|t| t.to_string()));
        for major in 1..3 {
            for minor in 0..5 {
                tags.push(format!("v{}.{}.0", major, minor));
            }
        }
    } else if repository.contains("prometheus") || repository.contains("grafana") {
        tags.extend(
            ["v2.45.0", "v2.44.0", "main", "latest-ubuntu"]
                .iter()
                .map(|t| t.to_string()),
        );
    } else {
        tags.extend(
            ["v1.2.3", "v1.2.2", "v1.1.0", "dev", "test"]
                .iter()
                .map(|t| t.to_string()),
        );
    }

    tags
}
