//! Local container runtime client (podman/docker)
//!
//! Shells out to a detected container runtime and parses its structured
//! output into the same repository/tag/manifest shape as the remote model.
//! Never performs network I/O; every failure is isolated to this source.

use crate::common::short_digest;
use crate::error::{CatalogError, Result};
use crate::model::{media_type, Descriptor, Layer, Manifest, Tag};
use crate::recorder::{CallRecorder, CallTimer};
use crate::registry::{CatalogSource, RepoPage, SourceHealth, TagPage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Probe order: podman preferred over docker
const RUNTIME_CANDIDATES: [&str; 2] = ["podman", "docker"];

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Pseudo-repository collecting images with no tags and no digests
const ORPHANED_REPO: &str = "<orphaned>";

#[derive(Debug, Clone, Deserialize)]
struct LocalImage {
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "RepoDigests", default)]
    repo_digests: Option<Vec<String>>,
    #[serde(rename = "Names", default)]
    names: Option<Vec<String>>,
    #[serde(rename = "Created", default)]
    created: i64,
}

#[derive(Debug, Deserialize)]
struct InspectRecord {
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "RootFS", default)]
    rootfs: Option<RootFs>,
    #[serde(rename = "History", default)]
    history: Vec<HistoryEntry>,
    #[serde(rename = "Config", default)]
    config: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RootFs {
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(rename = "Size", default)]
    size: u64,
}

/// One (repository, tag) reference extracted from an image record
#[derive(Debug, Clone)]
struct TagRef {
    repository: String,
    tag: String,
    digest: String,
    created: i64,
}

pub struct LocalRuntimeClient {
    /// Runtime requested by the descriptor (`local://podman`); detection
    /// probes candidates when absent
    preferred: Option<String>,
    detected: OnceCell<Option<String>>,
    recorder: CallRecorder,
}

impl LocalRuntimeClient {
    pub fn new(preferred: Option<String>, recorder: CallRecorder) -> Self {
        Self {
            preferred,
            detected: OnceCell::new(),
            recorder,
        }
    }

    async fn runtime(&self) -> Result<&str> {
        let detected = self
            .detected
            .get_or_init(|| async {
                let candidates: Vec<&str> = match &self.preferred {
                    Some(name) => vec![name.as_str()],
                    None => RUNTIME_CANDIDATES.to_vec(),
                };
                for candidate in candidates {
                    match self
                        .run_command(candidate, &["version", "--format", "json"])
                        .await
                    {
                        Ok(_) => {
                            tracing::debug!(runtime = candidate, "local runtime detected");
                            return Some(candidate.to_string());
                        }
                        Err(err) => {
                            tracing::debug!(runtime = candidate, error = %err, "runtime probe failed");
                        }
                    }
                }
                None
            })
            .await;

        detected.as_deref().ok_or_else(|| {
            CatalogError::LocalUnavailable("no container runtime found (tried podman, docker)".into())
        })
    }

    async fn run_command(&self, runtime: &str, args: &[&str]) -> Result<String> {
        let target = format!("{} {}", runtime, args.join(" "));
        let timer = CallTimer::start("LOCAL", &target);

        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new(runtime).args(args).output(),
        )
        .await;

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                self.recorder.record(timer.finish(None, 0));
                return Err(CatalogError::LocalUnavailable(format!(
                    "failed to run {}: {}",
                    target, err
                )));
            }
            Err(_) => {
                self.recorder.record(timer.finish(None, 0));
                return Err(CatalogError::LocalUnavailable(format!(
                    "{} timed out after {:?}",
                    target, COMMAND_TIMEOUT
                )));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        self.recorder
            .record(timer.finish(Some(exit_code.max(0) as u16), stdout.len()));

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CatalogError::LocalUnavailable(format!(
                "{} exited with {}: {}",
                target,
                exit_code,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }

    async fn list_images(&self) -> Result<Vec<LocalImage>> {
        let runtime = self.runtime().await?;
        let stdout = self
            .run_command(runtime, &["images", "--format", "json"])
            .await?;
        parse_images(&stdout)
    }

    async fn inspect(&self, image_id: &str) -> Result<InspectRecord> {
        let runtime = self.runtime().await?;
        let stdout = self.run_command(runtime, &["inspect", image_id]).await?;
        let mut records: Vec<InspectRecord> = serde_json::from_str(&stdout)
            .map_err(|e| CatalogError::Parse(format!("unparsable inspect output: {}", e)))?;
        if records.is_empty() {
            return Err(CatalogError::NotFound(format!("image {}", image_id)));
        }
        Ok(records.swap_remove(0))
    }
}

#[async_trait]
impl CatalogSource for LocalRuntimeClient {
    async fn list_catalog(&self, _cursor: Option<&str>, _page_size: usize) -> Result<RepoPage> {
        let images = self.list_images().await?;

        let mut names = BTreeSet::new();
        let mut has_orphaned = false;
        for image in &images {
            let refs = tag_refs(image);
            if refs.is_empty() {
                has_orphaned = true;
                continue;
            }
            for tag_ref in refs {
                names.insert(tag_ref.repository);
            }
        }
        let mut names: Vec<String> = names.into_iter().collect();
        if has_orphaned {
            names.push(ORPHANED_REPO.to_string());
        }

        // The runtime's listing is complete; no continuation
        Ok(RepoPage {
            names,
            next_cursor: None,
        })
    }

    async fn list_tags(
        &self,
        repository: &str,
        _cursor: Option<&str>,
        _page_size: usize,
    ) -> Result<TagPage> {
        let images = self.list_images().await?;
        let mut tags: Vec<Tag> = Vec::new();

        if repository == ORPHANED_REPO {
            for image in &images {
                if !tag_refs(image).is_empty() {
                    continue;
                }
                let short_id = image.id.chars().take(12).collect::<String>();
                tags.push(Tag {
                    repository: repository.to_string(),
                    name: format!("<none>:{}", short_id),
                    digest: Some(format!("sha256:{}", image.id)),
                    created: DateTime::from_timestamp(image.created, 0),
                    media_type: Some(media_type::DOCKER_MANIFEST.to_string()),
                });
            }
        } else {
            for image in &images {
                for tag_ref in tag_refs(image) {
                    if tag_ref.repository != repository {
                        continue;
                    }
                    tags.push(Tag {
                        repository: repository.to_string(),
                        name: tag_ref.tag,
                        digest: Some(tag_ref.digest),
                        created: DateTime::from_timestamp(tag_ref.created, 0),
                        media_type: Some(media_type::DOCKER_MANIFEST.to_string()),
                    });
                }
            }
        }

        // Newest first, then name, matching the remote view's ordering
        tags.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));
        let mut seen = BTreeSet::new();
        tags.retain(|tag| seen.insert(tag.name.clone()));

        Ok(TagPage {
            tags,
            next_cursor: None,
        })
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        if repository == ORPHANED_REPO {
            return Err(CatalogError::NotFound(
                "manifests are not available for orphaned images".into(),
            ));
        }

        let images = self.list_images().await?;
        let image_id = images
            .iter()
            .find(|image| {
                tag_refs(image)
                    .iter()
                    .any(|r| r.repository == repository && r.tag == reference)
            })
            .map(|image| image.id.clone())
            .ok_or_else(|| {
                CatalogError::NotFound(format!("image {}:{}", repository, reference))
            })?;

        let record = self.inspect(&image_id).await?;
        Ok(manifest_from_inspect(&record))
    }

    async fn resolve_tag_timestamp(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let images = self.list_images().await?;
        for image in &images {
            for tag_ref in tag_refs(image) {
                if tag_ref.repository == repository && tag_ref.tag == tag {
                    return Ok(DateTime::from_timestamp(tag_ref.created, 0));
                }
            }
        }
        Ok(None)
    }

    async fn check_health(&self) -> Result<SourceHealth> {
        let started = Instant::now();
        match self.runtime().await {
            Ok(runtime) => Ok(SourceHealth {
                reachable: true,
                api_version: Some(format!("local/{}", runtime)),
                response_time: started.elapsed(),
                detail: None,
            }),
            Err(err) => Ok(SourceHealth {
                reachable: false,
                api_version: None,
                response_time: started.elapsed(),
                detail: Some(err.to_string()),
            }),
        }
    }
}

/// Accept the array form (podman) and the line-delimited form (docker).
fn parse_images(stdout: &str) -> Result<Vec<LocalImage>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(images) = serde_json::from_str::<Vec<LocalImage>>(trimmed) {
        return Ok(images);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<LocalImage>(line)
                .map_err(|e| CatalogError::Parse(format!("unparsable image listing: {}", e)))
        })
        .collect()
}

/// Extract every (repository, tag) reference from one image record.
///
/// `RepoTags` and `Names` are combined and deduplicated; `name@sha256:...`
/// references become digest tags shortened to 12 hex chars; plain
/// `name:tag` references carry the image id as their digest. Digest-only
/// images fall back to `RepoDigests`. An empty result marks the image
/// orphaned.
fn tag_refs(image: &LocalImage) -> Vec<TagRef> {
    let mut all_refs: Vec<String> = Vec::new();
    if let Some(repo_tags) = &image.repo_tags {
        all_refs.extend(repo_tags.iter().cloned());
    }
    if let Some(names) = &image.names {
        all_refs.extend(names.iter().cloned());
    }
    all_refs.dedup();

    let mut refs = Vec::new();
    let mut seen = BTreeSet::new();

    for reference in &all_refs {
        let tag_ref = if let Some((repo, digest_part)) = reference.split_once("@sha256:") {
            let full_digest = format!("sha256:{}", digest_part);
            TagRef {
                repository: repo.to_string(),
                tag: short_digest(&full_digest),
                digest: full_digest,
                created: image.created,
            }
        } else {
            let (repo, tag) = match reference.rsplit_once(':') {
                Some((repo, tag)) => (repo.to_string(), tag.to_string()),
                None => (reference.clone(), "latest".to_string()),
            };
            TagRef {
                repository: repo,
                tag,
                digest: format!("sha256:{}", image.id),
                created: image.created,
            }
        };
        if seen.insert((tag_ref.repository.clone(), tag_ref.tag.clone())) {
            refs.push(tag_ref);
        }
    }

    if refs.is_empty() {
        if let Some(repo_digests) = &image.repo_digests {
            for digest_ref in repo_digests {
                if let Some((repo, digest_part)) = digest_ref.split_once('@') {
                    let tag_ref = TagRef {
                        repository: repo.to_string(),
                        tag: short_digest(digest_part),
                        digest: digest_part.to_string(),
                        created: image.created,
                    };
                    if seen.insert((tag_ref.repository.clone(), tag_ref.tag.clone())) {
                        refs.push(tag_ref);
                    }
                }
            }
        }
    }

    refs
}

/// Build the normalized manifest shape from `inspect` output, estimating
/// layer sizes from the image history the way the runtime reports them.
fn manifest_from_inspect(record: &InspectRecord) -> Manifest {
    let history_sizes: Vec<u64> = record
        .history
        .iter()
        .map(|entry| entry.size)
        .filter(|size| *size > 0)
        .collect();
    let average = if history_sizes.is_empty() {
        0
    } else {
        history_sizes.iter().sum::<u64>() / history_sizes.len() as u64
    };

    let layers = record
        .rootfs
        .as_ref()
        .map(|rootfs| {
            rootfs
                .layers
                .iter()
                .enumerate()
                .map(|(i, digest)| Layer {
                    media_type: media_type::DOCKER_LAYER.to_string(),
                    size: history_sizes.get(i).copied().unwrap_or(average),
                    digest: digest.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let config_size = record
        .config
        .as_ref()
        .and_then(|config| serde_json::to_string(config).ok())
        .map(|json| json.len() as u64)
        .unwrap_or(0);

    Manifest {
        digest: Some(format!("sha256:{}", record.id)),
        media_type: media_type::DOCKER_MANIFEST.to_string(),
        schema_version: 2,
        config: Some(Descriptor {
            media_type: media_type::DOCKER_CONFIG.to_string(),
            size: config_size,
            digest: format!("sha256:{}", record.id),
        }),
        layers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGES_JSON: &str = r#"[
        {
            "Id": "a1b2c3d4e5f60718293a4b5c6d7e8f901122334455667788990011223344aabb",
            "RepoTags": ["quay.io/coreos/etcd:v3.5.9", "quay.io/coreos/etcd:latest"],
            "RepoDigests": ["quay.io/coreos/etcd@sha256:feedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedface"],
            "Names": ["quay.io/coreos/etcd:v3.5.9"],
            "Size": 182000000,
            "Created": 1723456789
        },
        {
            "Id": "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
            "RepoTags": null,
            "RepoDigests": ["registry.local/app@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"],
            "Size": 9000000,
            "Created": 1713456789
        },
        {
            "Id": "0000111122223333444455556666777788889999aaaabbbbccccddddeeeeffff",
            "RepoTags": null,
            "RepoDigests": null,
            "Size": 100,
            "Created": 1703456789
        }
    ]"#;

    #[test]
    fn test_parse_array_and_line_delimited() {
        let images = parse_images(IMAGES_JSON).unwrap();
        assert_eq!(images.len(), 3);

        let ndjson = "{\"Id\": \"aaa\", \"Created\": 1}\n{\"Id\": \"bbb\", \"Created\": 2}\n";
        let images = parse_images(ndjson).unwrap();
        assert_eq!(images.len(), 2);

        assert!(parse_images("   ").unwrap().is_empty());
        assert!(parse_images("not json").is_err());
    }

    #[test]
    fn test_tag_refs_tagged_image() {
        let images = parse_images(IMAGES_JSON).unwrap();
        let refs = tag_refs(&images[0]);

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].repository, "quay.io/coreos/etcd");
        assert_eq!(refs[0].tag, "v3.5.9");
        assert!(refs[0].digest.starts_with("sha256:a1b2c3d4"));
        assert_eq!(refs[1].tag, "latest");
    }

    #[test]
    fn test_tag_refs_digest_only_image() {
        let images = parse_images(IMAGES_JSON).unwrap();
        let refs = tag_refs(&images[1]);

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].repository, "registry.local/app");
        assert_eq!(refs[0].tag, "0123456789ab");
        assert!(refs[0].digest.starts_with("sha256:0123456789abcdef"));
    }

    #[test]
    fn test_tag_refs_orphaned_image() {
        let images = parse_images(IMAGES_JSON).unwrap();
        assert!(tag_refs(&images[2]).is_empty());
    }

    #[test]
    fn test_manifest_from_inspect() {
        let json = r#"[{
            "Id": "a1b2c3",
            "RootFS": {"Layers": ["sha256:l1", "sha256:l2", "sha256:l3"]},
            "History": [{"Size": 28000000}, {"Size": 4000000}],
            "Config": {"Env": ["PATH=/usr/bin"]}
        }]"#;
        let records: Vec<InspectRecord> = serde_json::from_str(json).unwrap();
        let manifest = manifest_from_inspect(&records[0]);

        assert_eq!(manifest.layers.len(), 3);
        assert_eq!(manifest.layers[0].size, 28000000);
        assert_eq!(manifest.layers[1].size, 4000000);
        // Missing history entry falls back to the average of known sizes
        assert_eq!(manifest.layers[2].size, 16000000);
        assert_eq!(manifest.digest.as_deref(), Some("sha256:a1b2c3"));
        assert!(manifest.config.is_some());
    }

    #[tokio::test]
    async fn test_missing_runtime_reports_local_unavailable() {
        let client = LocalRuntimeClient::new(
            Some("definitely-not-a-container-runtime".to_string()),
            CallRecorder::new(),
        );
        let err = client.list_catalog(None, 100).await.unwrap_err();
        assert!(matches!(err, CatalogError::LocalUnavailable(_)));

        let health = client.check_health().await.unwrap();
        assert!(!health.reachable);
    }
}
