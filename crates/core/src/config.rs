//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Request handlers, the file watcher and the startup pass all read
//! the same [`CoreConfig`] value instead of consulting environment variables themselves.

use crate::constants::{
    DEFAULT_DELIVERY_TIMEOUT_SECS, DEFAULT_OUTPUT_FILE, DEFAULT_SOURCE_FILE, DEFAULT_STATIC_DIR,
    DEFAULT_WATCH_DEBOUNCE_MS,
};
use crate::{CoreError, CoreResult};
use fhir::{CountryKey, Mapper, MapperKind, MissingCasesPolicy};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// What an outbound delivery carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryPayload {
    /// The assembled FHIR Bundle.
    #[default]
    Bundle,
    /// The raw record batch that produced the bundle.
    Records,
}

impl FromStr for DeliveryPayload {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bundle" => Ok(DeliveryPayload::Bundle),
            "records" => Ok(DeliveryPayload::Records),
            other => Err(CoreError::InvalidInput(format!(
                "unknown delivery payload '{other}' (expected bundle or records)"
            ))),
        }
    }
}

/// Outbound delivery target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub url: String,
    pub payload: DeliveryPayload,
    pub timeout: Duration,
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    source_file: PathBuf,
    output_file: PathBuf,
    static_dir: PathBuf,
    mapper: Mapper,
    delivery: Option<DeliveryConfig>,
    watch_debounce: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] if:
    /// - the source and output files are the same path,
    /// - the delivery URL is not an absolute `http`/`https` URL.
    pub fn new(
        source_file: PathBuf,
        output_file: PathBuf,
        static_dir: PathBuf,
        mapper: Mapper,
        delivery: Option<DeliveryConfig>,
    ) -> CoreResult<Self> {
        if source_file == output_file {
            return Err(CoreError::InvalidInput(
                "source file and output file must differ".into(),
            ));
        }

        if let Some(delivery) = &delivery {
            validate_delivery_url(&delivery.url)?;
        }

        Ok(Self {
            source_file,
            output_file,
            static_dir,
            mapper,
            delivery,
            watch_debounce: Duration::from_millis(DEFAULT_WATCH_DEBOUNCE_MS),
        })
    }

    pub fn with_watch_debounce(mut self, debounce: Duration) -> Self {
        self.watch_debounce = debounce;
        self
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    pub fn mapper(&self) -> Mapper {
        self.mapper
    }

    pub fn delivery(&self) -> Option<&DeliveryConfig> {
        self.delivery.as_ref()
    }

    pub fn watch_debounce(&self) -> Duration {
        self.watch_debounce
    }
}

fn validate_delivery_url(url: &str) -> CoreResult<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| CoreError::InvalidInput(format!("invalid delivery URL '{url}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CoreError::InvalidInput(format!(
            "delivery URL must use http or https, got '{other}'"
        ))),
    }
}

/// Trim an optional environment value, treating empty/whitespace as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build the mapper from optional string values.
///
/// Unset values fall back to the complete mapper, `countryterritoryCode`, and failing on
/// missing case values.
pub fn mapper_from_env_values(
    kind: Option<String>,
    country_key: Option<String>,
    missing_cases: Option<String>,
) -> CoreResult<Mapper> {
    let kind = non_empty(kind)
        .map(|v| v.parse::<MapperKind>())
        .transpose()?
        .unwrap_or_default();
    let country_key = non_empty(country_key)
        .map(|v| v.parse::<CountryKey>())
        .transpose()?
        .unwrap_or_default();
    let missing_cases = non_empty(missing_cases)
        .map(|v| v.parse::<MissingCasesPolicy>())
        .transpose()?
        .unwrap_or_default();

    Ok(Mapper::new(kind, country_key, missing_cases))
}

/// Build the delivery target from optional string values.
///
/// Returns `None` when no URL is configured, which disables outbound delivery.
pub fn delivery_from_env_values(
    url: Option<String>,
    payload: Option<String>,
    timeout_secs: Option<String>,
) -> CoreResult<Option<DeliveryConfig>> {
    let Some(url) = non_empty(url) else {
        return Ok(None);
    };

    let payload = non_empty(payload)
        .map(|v| v.parse::<DeliveryPayload>())
        .transpose()?
        .unwrap_or_default();
    let timeout = non_empty(timeout_secs)
        .map(|v| {
            v.parse::<u64>().map_err(|e| {
                CoreError::InvalidInput(format!("invalid delivery timeout '{v}': {e}"))
            })
        })
        .transpose()?
        .unwrap_or(DEFAULT_DELIVERY_TIMEOUT_SECS);

    Ok(Some(DeliveryConfig {
        url,
        payload,
        timeout: Duration::from_secs(timeout),
    }))
}

/// Parse a millisecond duration from an optional string value, falling back to `default_ms`.
pub fn duration_ms_from_env_value(value: Option<String>, default_ms: u64) -> CoreResult<Duration> {
    let ms = non_empty(value)
        .map(|v| {
            v.parse::<u64>()
                .map_err(|e| CoreError::InvalidInput(format!("invalid duration '{v}': {e}")))
        })
        .transpose()?
        .unwrap_or(default_ms);

    Ok(Duration::from_millis(ms))
}

/// Resolve a [`CoreConfig`] from the `EPI_*` environment variables.
///
/// Intended to be called once by a binary's `main`; everything downstream receives the result.
///
/// # Errors
///
/// Returns [`CoreError::InvalidInput`] (or [`CoreError::Fhir`] for mapper values) if any variable
/// holds an unrecognised value, or if the resolved configuration is inconsistent.
pub fn core_config_from_env() -> CoreResult<CoreConfig> {
    let var = |name: &str| std::env::var(name).ok();
    let path_var = |name: &str, default: &str| {
        non_empty(var(name))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(default))
    };

    let mapper = mapper_from_env_values(
        var("EPI_MAPPER"),
        var("EPI_COUNTRY_KEY"),
        var("EPI_MISSING_CASES"),
    )?;
    let delivery = delivery_from_env_values(
        var("EPI_DELIVERY_URL"),
        var("EPI_DELIVERY_PAYLOAD"),
        var("EPI_DELIVERY_TIMEOUT_SECS"),
    )?;
    let debounce =
        duration_ms_from_env_value(var("EPI_WATCH_DEBOUNCE_MS"), DEFAULT_WATCH_DEBOUNCE_MS)?;

    Ok(CoreConfig::new(
        path_var("EPI_SOURCE_FILE", DEFAULT_SOURCE_FILE),
        path_var("EPI_OUTPUT_FILE", DEFAULT_OUTPUT_FILE),
        path_var("EPI_STATIC_DIR", DEFAULT_STATIC_DIR),
        mapper,
        delivery,
    )?
    .with_watch_debounce(debounce))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> (PathBuf, PathBuf, PathBuf) {
        (
            PathBuf::from("style/sample.json"),
            PathBuf::from("style/fhir_sample.json"),
            PathBuf::from("style"),
        )
    }

    #[test]
    fn rejects_same_source_and_output() {
        let (source, _, static_dir) = paths();
        let err = CoreConfig::new(source.clone(), source, static_dir, Mapper::default(), None)
            .expect_err("same path must be rejected");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn rejects_non_http_delivery_url() {
        let (source, output, static_dir) = paths();
        let delivery = DeliveryConfig {
            url: "ftp://example.org/upload".into(),
            payload: DeliveryPayload::Bundle,
            timeout: Duration::from_secs(1),
        };
        let err = CoreConfig::new(source, output, static_dir, Mapper::default(), Some(delivery))
            .expect_err("ftp is not allowed");
        assert!(matches!(err, CoreError::InvalidInput(msg) if msg.contains("ftp")));
    }

    #[test]
    fn mapper_defaults_when_unset_or_blank() {
        let mapper = mapper_from_env_values(None, Some("  ".into()), None).expect("defaults");
        assert_eq!(mapper, Mapper::default());
    }

    #[test]
    fn mapper_parses_explicit_values() {
        let mapper = mapper_from_env_values(
            Some("reduced".into()),
            Some("countriesAndTerritories".into()),
            Some("zero".into()),
        )
        .expect("valid values");
        assert_eq!(
            mapper,
            Mapper::new(
                MapperKind::Reduced,
                CountryKey::CountryName,
                MissingCasesPolicy::DefaultZero
            )
        );
    }

    #[test]
    fn mapper_rejects_unknown_kind() {
        let err = mapper_from_env_values(Some("partial".into()), None, None)
            .expect_err("unknown mapper");
        assert!(matches!(err, CoreError::Fhir(_)));
    }

    #[test]
    fn delivery_is_disabled_without_url() {
        assert!(delivery_from_env_values(None, Some("records".into()), None)
            .expect("no url")
            .is_none());
    }

    #[test]
    fn delivery_parses_payload_and_timeout() {
        let delivery = delivery_from_env_values(
            Some("http://localhost:9000/receive".into()),
            Some("records".into()),
            Some("3".into()),
        )
        .expect("valid")
        .expect("configured");
        assert_eq!(delivery.payload, DeliveryPayload::Records);
        assert_eq!(delivery.timeout, Duration::from_secs(3));
    }

    #[test]
    fn duration_falls_back_to_default() {
        assert_eq!(
            duration_ms_from_env_value(None, 250).expect("default"),
            Duration::from_millis(250)
        );
        assert!(duration_ms_from_env_value(Some("soon".into()), 250).is_err());
    }
}
