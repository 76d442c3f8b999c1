//! Container Card Catalog Library
//!
//! Registry aggregation and authentication client: browses container image
//! catalogs across remote registries (Docker Registry HTTP API v2 / OCI
//! Distribution), local container runtimes (podman/docker), and a mock
//! source, through one unified, paginated, de-duplicated view.

pub mod aggregator;
pub mod common;
pub mod config;
pub mod error;
pub mod model;
pub mod recorder;
pub mod registry;

pub use aggregator::{Aggregator, AggregatorOptions};
pub use config::{load_registries, AuthMethod, RegistryDescriptor, RegistryKind};
pub use error::{CatalogError, Result};
pub use model::{CatalogPage, FetchStatus, Layer, Manifest, Repository, Tag};
pub use recorder::{CallRecord, CallRecorder};
pub use registry::{
    CatalogSource, LocalRuntimeClient, MockClient, RemoteCatalogClient, SourceHealth,
};
