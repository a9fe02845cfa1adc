//! Constants used throughout the epi core crate.
//!
//! Defaults for paths, addresses and timings, kept in one place so the binaries and tests agree.

/// Default REST bind address.
pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:8000";

/// Default input record file.
pub const DEFAULT_SOURCE_FILE: &str = "style/sample.json";

/// Default output bundle file.
pub const DEFAULT_OUTPUT_FILE: &str = "style/fhir_sample.json";

/// Default directory for static assets.
pub const DEFAULT_STATIC_DIR: &str = "style";

/// Filename served at `/`.
pub const INDEX_HTML_FILENAME: &str = "index.html";

/// Default outbound delivery timeout, in seconds.
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;

/// Default debounce for source file change notifications, in milliseconds.
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 500;
