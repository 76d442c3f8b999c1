//! Aggregation of catalog pages across configured registries
//!
//! The aggregator owns the registry descriptors and their per-registry
//! fetch state, dispatches to the client implementation matching each
//! descriptor's kind, merges monitored repositories ahead of the bulk
//! catalog, deduplicates across pages, and recomputes `total(monitored)`
//! counts. Each fetch carries a per-registry generation number; `cancel`
//! and `refresh` bump it, and any in-flight result whose generation no
//! longer matches is discarded instead of applied.

use crate::config::RegistryDescriptor;
use crate::error::{CatalogError, Result};
use crate::model::{CatalogPage, FetchStatus, Repository, Tag};
use crate::recorder::CallRecorder;
use crate::registry::{source_for, CatalogSource, SourceHealth, TagPage};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Repositories requested per catalog/tag page
    pub page_size: usize,
    /// Concurrent registry fetches in `fetch_all_configured`
    pub max_parallelism: usize,
    /// Concurrent per-repository enrichment fetches within one page
    pub enrich_concurrency: usize,
    /// Keep auto-loading until this many repositories are visible
    pub auto_load_threshold: usize,
    /// Rows from the loaded tail at which continuation triggers
    pub load_more_margin: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            page_size: crate::registry::DEFAULT_PAGE_SIZE,
            max_parallelism: 4,
            enrich_concurrency: 8,
            auto_load_threshold: 1000,
            load_more_margin: 10,
        }
    }
}

#[derive(Debug, Default)]
struct RegistrySession {
    generation: u64,
    cursor: Option<String>,
    exhausted: bool,
    seen: HashSet<String>,
    loaded: Vec<Repository>,
}

struct RegistryHandle {
    descriptor: RegistryDescriptor,
    source: Arc<dyn CatalogSource>,
    state: Mutex<RegistrySession>,
}

/// Orchestrates concurrent catalog fetches across all configured registries
/// and exposes a single paginated, deduplicated view per registry.
pub struct Aggregator {
    options: AggregatorOptions,
    recorder: CallRecorder,
    registries: HashMap<String, Arc<RegistryHandle>>,
}

impl Aggregator {
    pub fn new(descriptors: Vec<RegistryDescriptor>) -> Result<Self> {
        Self::with_options(descriptors, AggregatorOptions::default())
    }

    pub fn with_options(
        descriptors: Vec<RegistryDescriptor>,
        options: AggregatorOptions,
    ) -> Result<Self> {
        let recorder = CallRecorder::new();
        let mut aggregator = Self {
            options,
            recorder,
            registries: HashMap::new(),
        };
        for descriptor in descriptors {
            let source = source_for(&descriptor, aggregator.recorder.clone())?;
            aggregator.register_source(descriptor, source);
        }
        Ok(aggregator)
    }

    /// Attach a backend directly, bypassing kind-based selection. This is
    /// the seam for custom sources and for failure-injection in tests.
    pub fn register_source(
        &mut self,
        descriptor: RegistryDescriptor,
        source: Arc<dyn CatalogSource>,
    ) {
        self.registries.insert(
            descriptor.id.clone(),
            Arc::new(RegistryHandle {
                descriptor,
                source,
                state: Mutex::new(RegistrySession::default()),
            }),
        );
    }

    /// Replace the registry collection on reconfiguration. All fetch state
    /// and generations start over.
    pub fn reload(&mut self, descriptors: Vec<RegistryDescriptor>) -> Result<()> {
        self.registries.clear();
        for descriptor in descriptors {
            let source = source_for(&descriptor, self.recorder.clone())?;
            self.register_source(descriptor, source);
        }
        Ok(())
    }

    /// The shared sink every client call reports to.
    pub fn recorder(&self) -> &CallRecorder {
        &self.recorder
    }

    pub fn registry_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn descriptor(&self, registry_id: &str) -> Option<&RegistryDescriptor> {
        self.registries
            .get(registry_id)
            .map(|handle| &handle.descriptor)
    }

    fn handle(&self, registry_id: &str) -> Result<&Arc<RegistryHandle>> {
        self.registries
            .get(registry_id)
            .ok_or_else(|| CatalogError::NotFound(format!("registry '{}'", registry_id)))
    }

    /// Fetch one merged catalog page.
    ///
    /// With no cursor this begins a new aggregation pass: fetch state is
    /// reset, the generation is bumped (stale in-flight results will be
    /// discarded), and the registry's monitored repositories are resolved
    /// first, ahead of the bulk catalog. With a cursor it continues the
    /// current pass from that opaque position.
    pub async fn fetch_catalog_page(
        &self,
        registry_id: &str,
        cursor: Option<&str>,
    ) -> Result<CatalogPage> {
        let handle = self.handle(registry_id)?;

        let generation = {
            let mut state = handle.state.lock().await;
            if cursor.is_none() {
                state.generation += 1;
                state.cursor = None;
                state.exhausted = false;
                state.seen.clear();
                state.loaded.clear();
            }
            state.generation
        };

        self.run_fetch(handle, generation, cursor.map(str::to_string))
            .await
    }

    /// Continue from the last stored cursor for this registry.
    ///
    /// When the catalog is already exhausted this returns an empty page with
    /// the current totals instead of re-fetching.
    pub async fn load_more(&self, registry_id: &str) -> Result<CatalogPage> {
        let handle = self.handle(registry_id)?;

        let (generation, cursor) = {
            let state = handle.state.lock().await;
            if state.exhausted || state.cursor.is_none() {
                return Ok(CatalogPage {
                    repositories: Vec::new(),
                    next_cursor: None,
                    total: state.loaded.len(),
                    monitored: monitored_count(&state.loaded),
                });
            }
            (state.generation, state.cursor.clone())
        };

        self.run_fetch(handle, generation, cursor).await
    }

    /// Whether the caller should continue pagination for this registry:
    /// below the auto-load threshold it always continues; beyond it, only
    /// when the viewed row is within the margin of the loaded tail.
    pub async fn should_load_more(&self, registry_id: &str, visible_index: usize) -> Result<bool> {
        let handle = self.handle(registry_id)?;
        let state = handle.state.lock().await;
        if state.exhausted || state.cursor.is_none() {
            return Ok(false);
        }
        if state.loaded.len() < self.options.auto_load_threshold {
            return Ok(true);
        }
        Ok(state.loaded.len().saturating_sub(visible_index) <= self.options.load_more_margin)
    }

    /// Run one fetch per configured registry concurrently, bounded by
    /// `max_parallelism`, collecting independent success or failure per
    /// registry. One bad backend never blocks the rest.
    pub async fn fetch_all_configured(&self) -> HashMap<String, Result<CatalogPage>> {
        let ids = self.registry_ids();
        stream::iter(ids.into_iter().map(|id| async move {
            let page = self.fetch_catalog_page(&id, None).await;
            (id, page)
        }))
        .buffer_unordered(self.options.max_parallelism.max(1))
        .collect()
        .await
    }

    /// Discard cached cursor/state for this registry and start a new
    /// aggregation pass.
    pub async fn refresh(&self, registry_id: &str) -> Result<CatalogPage> {
        self.fetch_catalog_page(registry_id, None).await
    }

    /// Mark the current fetch generation stale. In-flight responses for
    /// prior generations are discarded on arrival rather than applied.
    pub async fn cancel(&self, registry_id: &str) -> Result<()> {
        let handle = self.handle(registry_id)?;
        let mut state = handle.state.lock().await;
        state.generation += 1;
        tracing::debug!(registry = registry_id, generation = state.generation, "fetch cancelled");
        Ok(())
    }

    /// The accumulated, deduplicated, monitored-first view applied so far
    /// in the current generation.
    pub async fn catalog_snapshot(&self, registry_id: &str) -> Result<Vec<Repository>> {
        let handle = self.handle(registry_id)?;
        let state = handle.state.lock().await;
        Ok(state.loaded.clone())
    }

    /// `(total, monitored)` for the current aggregation session.
    pub async fn counts(&self, registry_id: &str) -> Result<(usize, usize)> {
        let handle = self.handle(registry_id)?;
        let state = handle.state.lock().await;
        Ok((state.loaded.len(), monitored_count(&state.loaded)))
    }

    /// One tag page, re-ordered chronologically (newest first) by resolved
    /// creation timestamps. Tag name order alone is not authoritative; a
    /// tag whose timestamp cannot be resolved sorts last and is otherwise
    /// unaffected.
    pub async fn fetch_tags(
        &self,
        registry_id: &str,
        repository: &str,
        cursor: Option<&str>,
    ) -> Result<TagPage> {
        let handle = self.handle(registry_id)?;
        let page = handle
            .source
            .list_tags(repository, cursor, self.options.page_size)
            .await?;

        let source = &handle.source;
        let mut tags: Vec<Tag> = stream::iter(page.tags.into_iter().map(|mut tag| async move {
            if tag.created.is_none() {
                match source.resolve_tag_timestamp(repository, &tag.name).await {
                    Ok(created) => tag.created = created,
                    Err(err) => {
                        tracing::warn!(
                            repository,
                            tag = %tag.name,
                            error = %err,
                            "timestamp resolution failed, tag kept unordered"
                        );
                    }
                }
            }
            tag
        }))
        .buffer_unordered(self.options.enrich_concurrency.max(1))
        .collect()
        .await;

        tags.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));

        Ok(TagPage {
            tags,
            next_cursor: page.next_cursor,
        })
    }

    /// Manifest for one tag or digest reference, normalized across Docker
    /// v2 and OCI media types by the owning client.
    pub async fn fetch_manifest(
        &self,
        registry_id: &str,
        repository: &str,
        reference: &str,
    ) -> Result<crate::model::Manifest> {
        let handle = self.handle(registry_id)?;
        handle.source.get_manifest(repository, reference).await
    }

    /// Reachability probe for one registry.
    pub async fn registry_status(&self, registry_id: &str) -> Result<SourceHealth> {
        let handle = self.handle(registry_id)?;
        handle.source.check_health().await
    }

    async fn run_fetch(
        &self,
        handle: &Arc<RegistryHandle>,
        generation: u64,
        cursor: Option<String>,
    ) -> Result<CatalogPage> {
        let first_page = cursor.is_none();

        // Monitored repositories are resolved first, independent of how far
        // bulk pagination has progressed
        let monitored_entries = if first_page {
            self.resolve_monitored(handle).await
        } else {
            Vec::new()
        };

        let bulk = match handle
            .source
            .list_catalog(cursor.as_deref(), self.options.page_size)
            .await
        {
            Ok(page) => Some(page),
            Err(CatalogError::LocalUnavailable(msg)) => {
                // Absent local runtime: empty source, not an error
                tracing::debug!(registry = %handle.descriptor.id, detail = %msg, "local source empty");
                None
            }
            Err(err) => return Err(err),
        };

        let (fresh_names, next_cursor) = match bulk {
            Some(page) => {
                let seen_snapshot = {
                    let state = handle.state.lock().await;
                    state.seen.clone()
                };
                let monitored: HashSet<&str> = handle
                    .descriptor
                    .monitored
                    .iter()
                    .map(String::as_str)
                    .collect();
                let fresh: Vec<String> = page
                    .names
                    .into_iter()
                    .filter(|name| {
                        !seen_snapshot.contains(name) && !monitored.contains(name.as_str())
                    })
                    .collect();
                (fresh, page.next_cursor)
            }
            None => (Vec::new(), None),
        };

        let enriched = self.enrich(handle, fresh_names).await;

        // Apply under the state lock; a stale generation mutates nothing
        let mut state = handle.state.lock().await;
        if state.generation != generation {
            return Err(CatalogError::Cancelled(format!(
                "generation {} superseded by {}",
                generation, state.generation
            )));
        }

        let mut applied = Vec::new();
        for repository in monitored_entries.into_iter().chain(enriched) {
            if state.seen.insert(repository.name.clone()) {
                state.loaded.push(repository.clone());
                applied.push(repository);
            }
        }

        state.cursor = next_cursor.clone();
        state.exhausted = next_cursor.is_none();

        Ok(CatalogPage {
            repositories: applied,
            next_cursor,
            total: state.loaded.len(),
            monitored: monitored_count(&state.loaded),
        })
    }

    /// Resolve the registry's monitored repositories with full tag data,
    /// preserving their configured order. A failed monitored fetch yields a
    /// `Failed` entry that still heads the list.
    async fn resolve_monitored(&self, handle: &Arc<RegistryHandle>) -> Vec<Repository> {
        let names = handle.descriptor.monitored.clone();
        if names.is_empty() {
            return Vec::new();
        }

        let mut indexed: Vec<(usize, Repository)> =
            stream::iter(names.into_iter().enumerate().map(|(index, name)| async move {
                let repository = self.resolve_repository(handle, name, true).await;
                (index, repository)
            }))
            .buffer_unordered(self.options.enrich_concurrency.max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, repository)| repository).collect()
    }

    async fn enrich(&self, handle: &Arc<RegistryHandle>, names: Vec<String>) -> Vec<Repository> {
        let mut indexed: Vec<(usize, Repository)> =
            stream::iter(names.into_iter().enumerate().map(|(index, name)| async move {
                let repository = self.resolve_repository(handle, name, false).await;
                (index, repository)
            }))
            .buffer_unordered(self.options.enrich_concurrency.max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, repository)| repository).collect()
    }

    /// Fetch tag data for one repository. Failures mark only this
    /// repository; the enclosing catalog fetch continues.
    async fn resolve_repository(
        &self,
        handle: &Arc<RegistryHandle>,
        name: String,
        monitored: bool,
    ) -> Repository {
        let mut repository = Repository::new(handle.descriptor.id.clone(), name.clone());
        repository.monitored = monitored;

        let page = match handle
            .source
            .list_tags(&name, None, self.options.page_size)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(
                    registry = %handle.descriptor.id,
                    repository = %name,
                    error = %err,
                    "repository fetch failed"
                );
                repository.status = FetchStatus::Failed;
                return repository;
            }
        };

        let tag_names: Vec<String> = page.tags.iter().map(|tag| tag.name.clone()).collect();
        repository.tag_count = Some(tag_names.len());
        repository.recent_tags = tag_names
            .iter()
            .filter(|tag| tag.as_str() != "latest")
            .take(3)
            .cloned()
            .collect();

        // Monitored entries carry fully resolved tag data, including the
        // most recent creation time; bulk entries stay cheap
        if monitored {
            let recent_tags = repository.recent_tags.clone();
            for tag in &recent_tags {
                match handle.source.resolve_tag_timestamp(&name, tag).await {
                    Ok(Some(created)) => {
                        if repository.last_updated.map_or(true, |seen| created > seen) {
                            repository.last_updated = Some(created);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(
                            registry = %handle.descriptor.id,
                            repository = %name,
                            tag = %tag,
                            error = %err,
                            "tag timestamp resolution failed"
                        );
                    }
                }
            }
        }

        repository.status = FetchStatus::Ok;
        repository
    }
}

fn monitored_count(loaded: &[Repository]) -> usize {
    loaded.iter().filter(|repository| repository.monitored).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryDescriptor;
    use crate::registry::{MockClient, RepoPage};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn mock_aggregator(monitored: Vec<String>) -> Aggregator {
        let descriptor = RegistryDescriptor::new("massive", "mock://massive-registry")
            .with_monitored(monitored);
        Aggregator::new(vec![descriptor]).unwrap()
    }

    #[tokio::test]
    async fn test_no_duplicates_across_load_more_calls() {
        let aggregator = mock_aggregator(vec![]);

        let mut names = Vec::new();
        let mut page = aggregator.fetch_catalog_page("massive", None).await.unwrap();
        loop {
            names.extend(page.repositories.iter().map(|r| r.name.clone()));
            if page.next_cursor.is_none() {
                break;
            }
            page = aggregator.load_more("massive").await.unwrap();
        }

        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names.len(), aggregator.counts("massive").await.unwrap().0);
    }

    #[tokio::test]
    async fn test_paginated_dedup_matches_unpaginated_fetch() {
        let recorder = CallRecorder::new();
        let repos: Vec<String> = (0..1500).map(|i| format!("bulk/repo-{:04}", i)).collect();

        let mut aggregator = Aggregator::with_options(
            vec![],
            AggregatorOptions {
                page_size: 100,
                ..AggregatorOptions::default()
            },
        )
        .unwrap();
        aggregator.register_source(
            RegistryDescriptor::new("paged", "mock://synthetic"),
            Arc::new(MockClient::with_repositories(
                "mock://synthetic",
                repos.clone(),
                recorder.clone(),
            )),
        );
        let mut unpaginated = Aggregator::with_options(
            vec![],
            AggregatorOptions {
                page_size: usize::MAX,
                ..AggregatorOptions::default()
            },
        )
        .unwrap();
        unpaginated.register_source(
            RegistryDescriptor::new("single", "mock://synthetic"),
            Arc::new(MockClient::with_repositories(
                "mock://synthetic",
                repos,
                recorder,
            )),
        );

        let mut page = aggregator.fetch_catalog_page("paged", None).await.unwrap();
        while page.next_cursor.is_some() {
            page = aggregator.load_more("paged").await.unwrap();
        }
        let paged: Vec<String> = aggregator
            .catalog_snapshot("paged")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();

        unpaginated.fetch_catalog_page("single", None).await.unwrap();
        let single: Vec<String> = unpaginated
            .catalog_snapshot("single")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();

        assert_eq!(paged.len(), 1500);
        assert_eq!(paged, single);
    }

    #[tokio::test]
    async fn test_monitored_first_with_resolved_tag_data() {
        let aggregator = mock_aggregator(vec![
            "vault/latest".to_string(),
            "nginx/stable".to_string(),
        ]);

        let page = aggregator.fetch_catalog_page("massive", None).await.unwrap();

        assert!(page.repositories[0].monitored);
        assert!(page.repositories[1].monitored);
        assert_eq!(page.repositories[0].name, "vault/latest");
        assert_eq!(page.repositories[1].name, "nginx/stable");
        // Monitored entries are fully resolved even though the bulk cursor
        // has not reached them
        assert!(page.repositories[0].tag_count.unwrap() > 0);
        assert!(!page.repositories[0].recent_tags.is_empty());
        assert!(page.repositories[0].last_updated.is_some());
        assert_eq!(page.repositories[0].status, FetchStatus::Ok);

        // No non-monitored entry precedes a monitored one
        let first_bulk = page
            .repositories
            .iter()
            .position(|r| !r.monitored)
            .unwrap();
        assert!(page.repositories[..first_bulk].iter().all(|r| r.monitored));
        assert_eq!(page.monitored, 2);
    }

    #[tokio::test]
    async fn test_counts_label_for_full_catalog() {
        let aggregator = mock_aggregator(vec!["vault/latest".to_string()]);

        let mut page = aggregator.fetch_catalog_page("massive", None).await.unwrap();
        while page.next_cursor.is_some() {
            page = aggregator.load_more("massive").await.unwrap();
        }

        let (total, monitored) = aggregator.counts("massive").await.unwrap();
        assert_eq!(monitored, 1);
        assert!(total > 1400);
        assert_eq!(page.counts_label(), format!("{}({})", total, monitored));
    }

    /// Source that parks before answering so a cancellation can land first
    struct DelayedSource {
        inner: MockClient,
        delay: Duration,
    }

    #[async_trait]
    impl CatalogSource for DelayedSource {
        async fn list_catalog(&self, cursor: Option<&str>, page_size: usize) -> crate::error::Result<RepoPage> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_catalog(cursor, page_size).await
        }

        async fn list_tags(
            &self,
            repository: &str,
            cursor: Option<&str>,
            page_size: usize,
        ) -> crate::error::Result<TagPage> {
            self.inner.list_tags(repository, cursor, page_size).await
        }

        async fn get_manifest(
            &self,
            repository: &str,
            reference: &str,
        ) -> crate::error::Result<crate::model::Manifest> {
            self.inner.get_manifest(repository, reference).await
        }

        async fn resolve_tag_timestamp(
            &self,
            repository: &str,
            tag: &str,
        ) -> crate::error::Result<Option<DateTime<Utc>>> {
            self.inner.resolve_tag_timestamp(repository, tag).await
        }

        async fn check_health(&self) -> crate::error::Result<SourceHealth> {
            self.inner.check_health().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_generation_never_mutates_visible_state() {
        let recorder = CallRecorder::new();
        let mut aggregator = Aggregator::new(vec![]).unwrap();
        aggregator.register_source(
            RegistryDescriptor::new("slow", "mock://public-registry"),
            Arc::new(DelayedSource {
                inner: MockClient::new("mock://public-registry", recorder),
                delay: Duration::from_millis(100),
            }),
        );
        let aggregator = Arc::new(aggregator);

        let fetcher = {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move { aggregator.fetch_catalog_page("slow", None).await })
        };

        // Let the fetch get in flight, then supersede its generation
        tokio::time::sleep(Duration::from_millis(20)).await;
        aggregator.cancel("slow").await.unwrap();

        let result = fetcher.await.unwrap();
        assert!(matches!(result, Err(CatalogError::Cancelled(_))));
        assert!(aggregator.catalog_snapshot("slow").await.unwrap().is_empty());
        assert_eq!(aggregator.counts("slow").await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_refresh_discards_previous_session_state() {
        let aggregator = mock_aggregator(vec![]);

        let first = aggregator.fetch_catalog_page("massive", None).await.unwrap();
        aggregator.load_more("massive").await.unwrap();
        let (total_before, _) = aggregator.counts("massive").await.unwrap();
        assert!(total_before > first.repositories.len());

        let refreshed = aggregator.refresh("massive").await.unwrap();
        let (total_after, _) = aggregator.counts("massive").await.unwrap();
        assert_eq!(total_after, refreshed.repositories.len());
    }

    #[tokio::test]
    async fn test_should_load_more_thresholds() {
        let aggregator = mock_aggregator(vec![]);
        aggregator.fetch_catalog_page("massive", None).await.unwrap();

        // Below the auto-load threshold: always continue
        assert!(aggregator.should_load_more("massive", 0).await.unwrap());

        let mut page = aggregator.load_more("massive").await.unwrap();
        while page.next_cursor.is_some() {
            page = aggregator.load_more("massive").await.unwrap();
        }
        // Exhausted: never continue
        assert!(!aggregator.should_load_more("massive", 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_registry_is_not_found() {
        let aggregator = mock_aggregator(vec![]);
        assert!(matches!(
            aggregator.fetch_catalog_page("nope", None).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_all_configured_isolates_failures() {
        let mut aggregator = Aggregator::new(vec![
            RegistryDescriptor::new("public", "mock://public-registry"),
            RegistryDescriptor::new("quay", "mock://quay-io"),
        ])
        .unwrap();
        // A local registry whose runtime does not exist on this machine
        aggregator.register_source(
            RegistryDescriptor::new("local", "local://no-such-runtime"),
            Arc::new(crate::registry::LocalRuntimeClient::new(
                Some("no-such-runtime".to_string()),
                CallRecorder::new(),
            )),
        );

        let results = aggregator.fetch_all_configured().await;
        assert_eq!(results.len(), 3);
        assert!(results["public"].is_ok());
        assert!(results["quay"].is_ok());

        // Local absence yields an empty page with status ok, not an error
        let local = results["local"].as_ref().unwrap();
        assert!(local.repositories.is_empty());
        assert_eq!(local.total, 0);
        assert!(local.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_tags_ordered_newest_first() {
        let aggregator = mock_aggregator(vec![]);
        aggregator.fetch_catalog_page("massive", None).await.unwrap();

        let page = aggregator
            .fetch_tags("massive", "vault/latest", None)
            .await
            .unwrap();
        assert!(!page.tags.is_empty());
        for pair in page.tags.windows(2) {
            assert!(pair[0].created >= pair[1].created);
        }
    }
}
