//! FHIR wire/boundary support for epidemiological case reports.
//!
//! This crate provides **wire models** and **translation helpers** between flat tabular records
//! (`dateRep`, `cases`, `deaths`, country identifier) and FHIR resources:
//! - `Observation` resources, in a complete (cases + deaths components) or reduced
//!   (single `valueQuantity`) form
//! - `collection` Bundles wrapping one Observation per valid record
//!
//! This crate focuses on:
//! - pure, side-effect-free mapping in both directions
//! - required-field validation with best-effort batch assembly
//! - strict parsing of FHIR JSON with path-aware error messages
//!
//! No I/O and no logging happen here. Callers (see `epi-core`) decide how to report skipped
//! records and where bundles are written.

pub mod bundle;
pub mod observation;
pub mod record;

// Re-export facades
pub use bundle::{AssemblyReport, Bundle, BundleAssembler, BundleEntry, ReverseReport, SkippedRecord};
pub use observation::{
    CompleteMapper, Mapper, MapperKind, MissingCasesPolicy, Observation, ObservationMapper,
    ReducedMapper,
};
pub use record::{CountryKey, Record};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unrecognised date format: {0} (expected YYYY-MM-DD or DD/MM/YYYY)")]
    DateFormat(String),

    #[error("component with coding {0} not found")]
    ComponentNotFound(String),

    #[error("bundle assembly failed: {0}")]
    Assembly(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
