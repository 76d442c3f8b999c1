//! Registry backends: remote Distribution API, local runtime, and mock
//!
//! All three backend kinds implement [`CatalogSource`], the capability
//! interface the aggregator dispatches through. Selection is by descriptor
//! kind, derived from the endpoint scheme.

pub mod auth;
pub mod client;
pub mod local;
pub mod mock;
pub mod session;

use crate::config::{RegistryDescriptor, RegistryKind};
use crate::error::Result;
use crate::model::{Manifest, Tag};
use crate::recorder::CallRecorder;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub use client::{RemoteCatalogClient, RemoteCatalogClientBuilder};
pub use local::LocalRuntimeClient;
pub use mock::MockClient;
pub use session::AuthSession;

/// Repositories requested per catalog/tag page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One page of repository names from a backend catalog
#[derive(Debug, Clone)]
pub struct RepoPage {
    pub names: Vec<String>,
    /// Opaque continuation cursor, forwarded verbatim; `None` = exhausted
    pub next_cursor: Option<String>,
}

/// One page of tags for a repository
#[derive(Debug, Clone)]
pub struct TagPage {
    pub tags: Vec<Tag>,
    pub next_cursor: Option<String>,
}

/// Reachability report for one backend
#[derive(Debug, Clone)]
pub struct SourceHealth {
    pub reachable: bool,
    pub api_version: Option<String>,
    pub response_time: Duration,
    pub detail: Option<String>,
}

/// Capability interface shared by every backend kind.
///
/// Implementations isolate their own failures: an error from one repository
/// or tag never represents the whole source.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// One catalog page. The cursor is the opaque token a previous page
    /// returned; `None` starts from the beginning.
    async fn list_catalog(&self, cursor: Option<&str>, page_size: usize) -> Result<RepoPage>;

    /// One tag page, in server order. Chronological re-ordering is the
    /// aggregator's job, driven by resolved creation timestamps.
    async fn list_tags(
        &self,
        repository: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<TagPage>;

    /// Manifest for a tag or digest reference, normalized to the common
    /// shape regardless of Docker v2 / OCI media type.
    async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest>;

    /// Creation timestamp for one tag, resolved from backend metadata
    /// (config blob, runtime listing, or seeded data).
    async fn resolve_tag_timestamp(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Probe the backend for reachability.
    async fn check_health(&self) -> Result<SourceHealth>;
}

/// Build the client implementation matching a descriptor's kind.
pub fn source_for(
    descriptor: &RegistryDescriptor,
    recorder: CallRecorder,
) -> Result<Arc<dyn CatalogSource>> {
    match descriptor.kind() {
        RegistryKind::Remote => {
            let client = RemoteCatalogClient::builder(descriptor.endpoint.clone())
                .with_auth(descriptor.auth.clone())
                .with_skip_tls(descriptor.skip_tls)
                .with_recorder(recorder)
                .build()?;
            Ok(Arc::new(client))
        }
        RegistryKind::Local => Ok(Arc::new(LocalRuntimeClient::new(
            descriptor.runtime_name().map(str::to_string),
            recorder,
        ))),
        RegistryKind::Mock => Ok(Arc::new(MockClient::new(&descriptor.endpoint, recorder))),
    }
}
