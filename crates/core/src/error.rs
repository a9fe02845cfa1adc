use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid JSON: {0}")]
    InvalidJson(serde_json::Error),
    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),

    #[error("failed to read source file (path: {path}): {source}", path = path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read bundle file (path: {path}): {source}", path = path.display())]
    BundleRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to persist bundle (path: {path}): {source}", path = path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("delivery to {url} failed: {reason}")]
    Delivery { url: String, reason: String },
    #[error("delivery to {url} returned HTTP {status}")]
    DeliveryStatus { url: String, status: u16 },

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
