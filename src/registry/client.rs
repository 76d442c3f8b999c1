//! Remote catalog client for the Docker Registry HTTP API v2 / OCI
//! Distribution spec
//!
//! Implements paginated catalog and tag listing, manifest retrieval with
//! Docker v2 / OCI content negotiation, and tag creation-timestamp
//! resolution through the manifest config blob. Each operation consults the
//! owning [`AuthSession`] and retries once through a 401 challenge.

use crate::common::{with_retry, RetryConfig};
use crate::config::AuthMethod;
use crate::error::{CatalogError, Result};
use crate::model::{media_type, Descriptor, Layer, Manifest, Tag};
use crate::recorder::{CallRecorder, CallTimer};
use crate::registry::auth::parse_www_authenticate;
use crate::registry::session::{AuthSession, RequestAuth};
use crate::registry::{CatalogSource, RepoPage, SourceHealth, TagPage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, LINK, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Accept header covering every manifest shape we can normalize
const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.image.index.v1+json"
);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WireDescriptor {
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    #[serde(default)]
    size: u64,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct WireManifest {
    #[serde(rename = "schemaVersion", default)]
    schema_version: u32,
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<WireDescriptor>,
    #[serde(default)]
    layers: Vec<WireDescriptor>,
}

#[derive(Debug, Deserialize)]
struct WireIndex {
    #[serde(default)]
    manifests: Vec<WireDescriptor>,
}

/// Image config blob; only the creation timestamp matters here
#[derive(Debug, Deserialize)]
struct ImageConfig {
    created: Option<DateTime<Utc>>,
}

pub struct RemoteCatalogClientBuilder {
    endpoint: String,
    auth: AuthMethod,
    skip_tls: bool,
    timeout: Duration,
    recorder: CallRecorder,
}

impl RemoteCatalogClientBuilder {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            auth: AuthMethod::None,
            skip_tls: false,
            timeout: DEFAULT_TIMEOUT,
            recorder: CallRecorder::new(),
        }
    }

    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_recorder(mut self, recorder: CallRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn build(self) -> Result<RemoteCatalogClient> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("container-card-catalog/", env!("CARGO_PKG_VERSION")));
        if self.skip_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let http = builder
            .build()
            .map_err(|e| CatalogError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(RemoteCatalogClient {
            http,
            endpoint: self.endpoint.trim_end_matches('/').to_string(),
            session: AuthSession::new(self.auth),
            recorder: self.recorder,
            retry: RetryConfig::default(),
            timestamp_cache: Mutex::new(HashMap::new()),
        })
    }
}

pub struct RemoteCatalogClient {
    http: Client,
    endpoint: String,
    session: AuthSession,
    recorder: CallRecorder,
    retry: RetryConfig,
    /// Tag creation timestamps memoized per config digest for this client's
    /// lifetime, so repeated tag listings skip the blob fetch
    timestamp_cache: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
}

impl RemoteCatalogClient {
    pub fn builder(endpoint: String) -> RemoteCatalogClientBuilder {
        RemoteCatalogClientBuilder::new(endpoint)
    }

    /// Issue one GET with retry on transport failure, recording every attempt.
    async fn send(&self, url: &str, accept: Option<&str>, auth: &RequestAuth) -> Result<Response> {
        with_retry(&self.retry, || async {
            let timer = CallTimer::start("GET", url);
            let mut request = self.http.get(url);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }
            request = auth.apply(request);

            match request.send().await {
                Ok(response) => {
                    let size = response.content_length().unwrap_or(0) as usize;
                    self.recorder
                        .record(timer.finish(Some(response.status().as_u16()), size));
                    Ok(response)
                }
                Err(err) => {
                    self.recorder.record(timer.finish(None, 0));
                    Err(CatalogError::from(err))
                }
            }
        })
        .await
    }

    /// GET with session auth, retrying exactly once through a 401 challenge.
    async fn get_authorized(&self, url: &str, accept: Option<&str>) -> Result<Response> {
        let snapshot = self.session.authorize(&self.http, &self.recorder).await?;
        let response = self.send(url, accept, &snapshot.auth).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_www_authenticate);

        let auth = self
            .session
            .handle_rejection(snapshot.epoch, challenge, &self.http, &self.recorder)
            .await?;
        let retried = self.send(url, accept, &auth).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            return Err(CatalogError::Auth(format!(
                "registry rejected refreshed credentials for {}",
                url
            )));
        }
        Ok(retried)
    }

    fn catalog_url(&self, cursor: Option<&str>, page_size: usize) -> String {
        match cursor {
            // Cursors are server-defined opaque URLs; forward them verbatim
            Some(cursor) => cursor.to_string(),
            None => format!("{}/v2/_catalog?n={}", self.endpoint, page_size),
        }
    }

    fn tags_url(&self, repository: &str, cursor: Option<&str>, page_size: usize) -> String {
        match cursor {
            Some(cursor) => cursor.to_string(),
            None => format!(
                "{}/v2/{}/tags/list?n={}",
                self.endpoint, repository, page_size
            ),
        }
    }

    /// Continuation cursor from the response `Link` header, absolutized
    /// against the endpoint but otherwise untouched.
    fn next_cursor(&self, response: &Response) -> Option<String> {
        let link = response.headers().get(LINK)?.to_str().ok()?;
        let target = parse_next_link(link)?;
        if target.starts_with('/') {
            Some(format!("{}{}", self.endpoint, target))
        } else {
            Some(target)
        }
    }

    async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
        follow_index: bool,
    ) -> Result<Manifest> {
        let url = format!("{}/v2/{}/manifests/{}", self.endpoint, repository, reference);
        let response = self.get_authorized(&url, Some(MANIFEST_ACCEPT)).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(format!(
                "manifest {}:{}",
                repository, reference
            )));
        }
        if !status.is_success() {
            return Err(CatalogError::from_status(status, "manifest fetch"));
        }

        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("malformed manifest payload: {}", e)))?;

        let effective_type = body
            .get("mediaType")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or(content_type)
            .unwrap_or_else(|| media_type::DOCKER_MANIFEST.to_string());

        if media_type::is_index(&effective_type) {
            if !follow_index {
                return Err(CatalogError::Parse(format!(
                    "index {}:{} references another index",
                    repository, reference
                )));
            }
            // Multi-platform index: follow the first referenced manifest so
            // callers always get the single-image shape
            let index: WireIndex = serde_json::from_value(body)?;
            let first = index.manifests.into_iter().next().ok_or_else(|| {
                CatalogError::Parse(format!("index {}:{} lists no manifests", repository, reference))
            })?;
            return Box::pin(self.fetch_manifest(repository, &first.digest, false)).await;
        }

        normalize_manifest(body, &effective_type, digest)
    }

    async fn fetch_config_blob(&self, repository: &str, digest: &str) -> Result<ImageConfig> {
        let url = format!("{}/v2/{}/blobs/{}", self.endpoint, repository, digest);
        let response = self.get_authorized(&url, None).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(format!("config blob {}", digest)));
        }
        if !status.is_success() {
            return Err(CatalogError::from_status(status, "config blob fetch"));
        }

        response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("malformed config blob: {}", e)))
    }
}

#[async_trait]
impl CatalogSource for RemoteCatalogClient {
    async fn list_catalog(&self, cursor: Option<&str>, page_size: usize) -> Result<RepoPage> {
        let url = self.catalog_url(cursor, page_size);
        let response = self.get_authorized(&url, None).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::from_status(status, "catalog listing"));
        }

        let next_cursor = self.next_cursor(&response);
        let body: CatalogResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("malformed catalog payload: {}", e)))?;

        Ok(RepoPage {
            names: body.repositories,
            next_cursor,
        })
    }

    async fn list_tags(
        &self,
        repository: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<TagPage> {
        let url = self.tags_url(repository, cursor, page_size);
        let response = self.get_authorized(&url, None).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(format!("repository {}", repository)));
        }
        if !status.is_success() {
            return Err(CatalogError::from_status(status, "tag listing"));
        }

        let next_cursor = self.next_cursor(&response);
        let body: TagListResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(format!("malformed tag list payload: {}", e)))?;

        let tags = body
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|name| Tag::new(repository, name))
            .collect();

        Ok(TagPage { tags, next_cursor })
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        self.fetch_manifest(repository, reference, true).await
    }

    async fn resolve_tag_timestamp(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let manifest = self.get_manifest(repository, tag).await?;
        let Some(config) = manifest.config else {
            return Ok(None);
        };

        if let Some(cached) = self.timestamp_cache.lock().await.get(&config.digest) {
            return Ok(*cached);
        }

        let created = match self.fetch_config_blob(repository, &config.digest).await {
            Ok(config_blob) => config_blob.created,
            Err(CatalogError::Parse(msg)) => {
                tracing::warn!(repository, tag, error = %msg, "skipping unparsable config blob");
                None
            }
            Err(err) => return Err(err),
        };

        self.timestamp_cache
            .lock()
            .await
            .insert(config.digest, created);
        Ok(created)
    }

    async fn check_health(&self) -> Result<SourceHealth> {
        let url = format!("{}/v2/", self.endpoint);
        let started = Instant::now();

        match self.get_authorized(&url, None).await {
            Ok(response) => {
                let api_version = response
                    .headers()
                    .get("Docker-Distribution-API-Version")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let status = response.status();
                Ok(SourceHealth {
                    reachable: status.is_success(),
                    api_version,
                    response_time: started.elapsed(),
                    detail: (!status.is_success()).then(|| format!("status {}", status)),
                })
            }
            // An auth rejection still proves the endpoint answered
            Err(CatalogError::Auth(msg)) => Ok(SourceHealth {
                reachable: true,
                api_version: None,
                response_time: started.elapsed(),
                detail: Some(msg),
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

/// Extract the `rel="next"` target from a `Link` header value.
fn parse_next_link(link: &str) -> Option<String> {
    for part in link.split(',') {
        let part = part.trim();
        let Some(end) = part.find('>') else { continue };
        if !part.starts_with('<') {
            continue;
        }
        let target = &part[1..end];
        let params = &part[end + 1..];
        if params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == r#"rel="next""#)
        {
            return Some(target.to_string());
        }
    }
    None
}

/// Normalize a single-image manifest body (Docker v2 or OCI) into the
/// common [`Manifest`] shape.
fn normalize_manifest(
    body: serde_json::Value,
    effective_type: &str,
    digest: Option<String>,
) -> Result<Manifest> {
    let wire: WireManifest = serde_json::from_value(body)
        .map_err(|e| CatalogError::Parse(format!("malformed manifest: {}", e)))?;

    Ok(Manifest {
        digest,
        media_type: wire
            .media_type
            .unwrap_or_else(|| effective_type.to_string()),
        schema_version: wire.schema_version,
        config: wire.config.map(|c| Descriptor {
            media_type: c
                .media_type
                .unwrap_or_else(|| media_type::DOCKER_CONFIG.to_string()),
            size: c.size,
            digest: c.digest,
        }),
        layers: wire
            .layers
            .into_iter()
            .map(|l| Layer {
                media_type: l
                    .media_type
                    .unwrap_or_else(|| media_type::DOCKER_LAYER.to_string()),
                size: l.size,
                digest: l.digest,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_next_link() {
        let link = r#"</v2/_catalog?last=redis&n=100>; rel="next""#;
        assert_eq!(
            parse_next_link(link).unwrap(),
            "/v2/_catalog?last=redis&n=100"
        );

        let link = r#"<https://registry.test/v2/_catalog?last=zz>; rel="next""#;
        assert_eq!(
            parse_next_link(link).unwrap(),
            "https://registry.test/v2/_catalog?last=zz"
        );

        assert!(parse_next_link(r#"</v2/_catalog?n=100>; rel="prev""#).is_none());
        assert!(parse_next_link("garbage").is_none());
    }

    #[test]
    fn test_normalize_docker_manifest() {
        let body = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::DOCKER_MANIFEST,
            "config": {
                "mediaType": media_type::DOCKER_CONFIG,
                "size": 1469,
                "digest": "sha256:cfgcfg"
            },
            "layers": [
                {"mediaType": media_type::DOCKER_LAYER, "size": 2800000, "digest": "sha256:l1"},
                {"mediaType": media_type::DOCKER_LAYER, "size": 120, "digest": "sha256:l2"}
            ]
        });

        let manifest =
            normalize_manifest(body, media_type::DOCKER_MANIFEST, Some("sha256:mf".into()))
                .unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(manifest.digest.as_deref(), Some("sha256:mf"));
        assert_eq!(manifest.total_size(), 1469 + 2800000 + 120);
    }

    #[test]
    fn test_normalize_oci_manifest_without_media_type_field() {
        // OCI manifests may omit mediaType in the body; the Content-Type
        // header supplies it
        let body = serde_json::json!({
            "schemaVersion": 2,
            "config": {"size": 100, "digest": "sha256:cfg"},
            "layers": [{"size": 4096, "digest": "sha256:l1"}]
        });

        let manifest = normalize_manifest(body, media_type::OCI_MANIFEST, None).unwrap();
        assert_eq!(manifest.media_type, media_type::OCI_MANIFEST);
        assert_eq!(manifest.layers[0].media_type, media_type::DOCKER_LAYER);
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        let body = serde_json::json!({"schemaVersion": "two", "layers": "nope"});
        assert!(matches!(
            normalize_manifest(body, media_type::DOCKER_MANIFEST, None),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn test_catalog_url_uses_cursor_verbatim() {
        let client = RemoteCatalogClient::builder("https://registry.test/".to_string())
            .build()
            .unwrap();
        assert_eq!(
            client.catalog_url(None, 100),
            "https://registry.test/v2/_catalog?n=100"
        );
        // Stored cursors are opaque URLs and must not be rebuilt
        assert_eq!(
            client.catalog_url(Some("https://registry.test/v2/_catalog?last=x&n=50"), 100),
            "https://registry.test/v2/_catalog?last=x&n=50"
        );
    }
}
