//! # Epi Core
//!
//! Runtime services around the pure `fhir` mapping crate:
//! - configuration resolved once at startup ([`CoreConfig`])
//! - the bundle persistence shim ([`BundleStore`])
//! - outbound delivery of bundles or raw records ([`DeliveryClient`])
//! - file-change subscriptions ([`FileWatcher`])
//! - the validate → assemble → persist → deliver pipeline ([`IngestService`])
//!
//! **No HTTP server concerns**: routing and request handling belong in `api-rest`.

pub mod config;
pub mod constants;
pub mod delivery;
mod error;
pub mod ingest;
pub mod persistence;
pub mod watcher;

pub use config::{CoreConfig, DeliveryConfig, DeliveryPayload};
pub use constants::*;
pub use delivery::DeliveryClient;
pub use error::{CoreError, CoreResult};
pub use ingest::IngestService;
pub use persistence::BundleStore;
pub use watcher::{FileWatch, FileWatcher};

// Re-export the mapping crate so callers need only one dependency for common types.
pub use fhir;
