//! Ingest pipeline: validate → assemble → persist → deliver.
//!
//! Every trigger (inbound update, source file change, startup pass) goes through
//! [`IngestService`]. Per-record problems are logged and dropped here; persistence and delivery
//! failures are logged and never change the bundle handed back to the trigger.

use crate::config::{CoreConfig, DeliveryPayload};
use crate::persistence::{self, BundleStore};
use crate::{CoreError, CoreResult, DeliveryClient};
use fhir::{AssemblyReport, Bundle, BundleAssembler, ReverseReport};
use serde_json::Value;
use std::sync::Arc;

/// Runs the ingest pipeline against one [`CoreConfig`].
#[derive(Clone, Debug)]
pub struct IngestService {
    cfg: Arc<CoreConfig>,
    assembler: BundleAssembler,
    store: BundleStore,
    delivery: Option<DeliveryClient>,
}

impl IngestService {
    /// Create a service for `cfg`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Delivery`] if a delivery target is configured and its HTTP client
    /// cannot be built.
    pub fn new(cfg: Arc<CoreConfig>) -> CoreResult<Self> {
        let delivery = cfg.delivery().map(DeliveryClient::from_config).transpose()?;

        Ok(Self {
            assembler: BundleAssembler::new(cfg.mapper()),
            store: BundleStore::new(cfg.output_file()),
            delivery,
            cfg,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn assembler(&self) -> &BundleAssembler {
        &self.assembler
    }

    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    /// Validate and assemble a JSON batch, logging each skipped record.
    pub fn assemble(&self, input: &Value) -> AssemblyReport {
        let report = self.assembler.assemble(input);

        for skipped in &report.skipped {
            tracing::warn!("Skipping record {}: {}", skipped.index, skipped.error);
        }
        if let Some(error) = &report.error {
            tracing::error!("Failed to create FHIR bundle: {}", error);
        }

        tracing::debug!(
            entries = report.bundle.len(),
            skipped = report.skipped.len(),
            "assembled bundle"
        );
        report
    }

    /// Parse raw bytes as JSON and assemble them.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidJson`] if the bytes are not JSON.
    pub fn assemble_bytes(&self, bytes: &[u8]) -> CoreResult<(Value, AssemblyReport)> {
        let input: Value = serde_json::from_slice(bytes).map_err(CoreError::InvalidJson)?;
        let report = self.assemble(&input);
        Ok((input, report))
    }

    /// Write `bundle` to the output file.
    ///
    /// Failures are logged here as well as returned, so callers that only care about the
    /// in-memory bundle may ignore the result.
    pub fn persist(&self, bundle: &Bundle) -> CoreResult<()> {
        match self.store.write(bundle) {
            Ok(()) => {
                tracing::info!("FHIR bundle saved to {}", self.store.path().display());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to save FHIR bundle: {}", e);
                Err(e)
            }
        }
    }

    /// Write `bundle` on the blocking pool without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn persist_in_background(&self, bundle: Bundle) -> tokio::task::JoinHandle<CoreResult<()>> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.persist(&bundle))
    }

    /// Startup pass: read the source file, assemble it, and write the output file.
    ///
    /// An empty or malformed source, or one without a single valid record, leaves the current
    /// output file untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the source file cannot be read or is not JSON. A failed write is
    /// logged and does not fail the pass.
    pub fn load_and_convert(&self) -> CoreResult<Bundle> {
        let input = persistence::read_records(self.cfg.source_file())?;
        tracing::info!("Loaded records from {}", self.cfg.source_file().display());

        let report = self.assemble(&input);
        match unpublishable(&input, &report) {
            Some(reason) => tracing::warn!(
                "Not saving bundle from {}: {}",
                self.cfg.source_file().display(),
                reason
            ),
            None => {
                let _ = self.persist(&report.bundle);
            }
        }
        Ok(report.bundle)
    }

    /// Handle freshly written source file bytes: assemble, persist in the background, deliver.
    ///
    /// Returns the assembled bundle regardless of persistence or delivery outcome. Batches the
    /// inbound endpoint would refuse are neither saved nor delivered.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidJson`] if the bytes are not JSON.
    pub async fn handle_file_change(&self, bytes: Vec<u8>) -> CoreResult<Bundle> {
        let (input, report) = self.assemble_bytes(&bytes)?;
        if let Some(reason) = unpublishable(&input, &report) {
            tracing::warn!(
                "Ignoring change to {}: {}",
                self.cfg.source_file().display(),
                reason
            );
            return Ok(report.bundle);
        }

        let bundle = report.bundle;
        let _ = self.persist_in_background(bundle.clone());
        self.deliver(&bundle, &input).await;

        Ok(bundle)
    }

    /// POST the configured payload to the delivery target, if any.
    ///
    /// Returns the parsed response on success; failures are logged and yield `None`.
    pub async fn deliver(&self, bundle: &Bundle, records: &Value) -> Option<Value> {
        let client = self.delivery.as_ref()?;
        let payload = self
            .cfg
            .delivery()
            .map(|d| d.payload)
            .unwrap_or_default();

        let result = match payload {
            DeliveryPayload::Bundle => client.send(bundle).await,
            DeliveryPayload::Records => client.send(records).await,
        };

        match result {
            Ok(response) => {
                tracing::info!("POST to {} successful: {}", client.url(), response);
                Some(response)
            }
            Err(e) => {
                tracing::error!("POST request failed: {}", e);
                None
            }
        }
    }

    /// Reverse a bundle into flat records, logging each entry that cannot be reversed.
    pub fn reverse(&self, bundle: &Bundle) -> ReverseReport {
        let report = self.assembler.reverse(bundle);
        for failure in &report.failures {
            tracing::warn!("Cannot reverse entry {}: {}", failure.index, failure.error);
        }
        report
    }
}

/// Why an assembled batch must not replace the saved bundle, if it must not.
fn unpublishable(input: &Value, report: &AssemblyReport) -> Option<&'static str> {
    if is_empty_payload(input) {
        Some("no data")
    } else if report.error.is_some() {
        Some("malformed batch")
    } else if report.bundle.is_empty() {
        Some("no valid records")
    } else {
        None
    }
}

/// `null`, `[]` and `{}` carry no records.
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use fhir::Mapper;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_records() -> Value {
        json!([
            {"dateRep": "14/12/2020", "cases": 788, "deaths": 14, "countryterritoryCode": "ALB"},
            {"dateRep": "13/12/2020", "cases": 879, "countryterritoryCode": "ALB"},
            {"dateRep": "12/12/2020", "cases": 802, "deaths": 12, "countryterritoryCode": "ALB"}
        ])
    }

    fn service_in(dir: &Path, delivery: Option<DeliveryConfig>) -> IngestService {
        let cfg = CoreConfig::new(
            dir.join("sample.json"),
            dir.join("fhir_sample.json"),
            dir.to_path_buf(),
            Mapper::default(),
            delivery,
        )
        .expect("valid config");
        IngestService::new(Arc::new(cfg)).expect("service")
    }

    #[test]
    fn startup_pass_writes_output_file() {
        let temp_dir = TempDir::new().expect("temp dir");
        std::fs::write(
            temp_dir.path().join("sample.json"),
            serde_json::to_vec(&sample_records()).expect("json"),
        )
        .expect("write source");
        let service = service_in(temp_dir.path(), None);

        let bundle = service.load_and_convert().expect("startup pass");
        assert_eq!(bundle.len(), 2);
        assert_eq!(service.store().read().expect("read output"), bundle);
    }

    #[test]
    fn startup_pass_reports_missing_source() {
        let temp_dir = TempDir::new().expect("temp dir");
        let service = service_in(temp_dir.path(), None);

        let err = service.load_and_convert().expect_err("no source file");
        assert!(matches!(err, CoreError::SourceRead { .. }));
    }

    #[test]
    fn persistence_failure_does_not_alter_bundle() {
        let temp_dir = TempDir::new().expect("temp dir");
        let source = temp_dir.path().join("sample.json");
        std::fs::write(&source, serde_json::to_vec(&sample_records()).expect("json"))
            .expect("write source");

        let cfg = CoreConfig::new(
            source,
            temp_dir.path().join("missing").join("fhir_sample.json"),
            temp_dir.path().to_path_buf(),
            Mapper::default(),
            None,
        )
        .expect("valid config");
        let service = IngestService::new(Arc::new(cfg)).expect("service");

        let expected = service.assembler().assemble_bundle(&sample_records());
        let bundle = service.load_and_convert().expect("write failure is not fatal");
        assert_eq!(bundle, expected);
        assert!(service.persist(&bundle).is_err());
        assert_eq!(bundle, expected);
    }

    #[test]
    fn assemble_bytes_rejects_non_json() {
        let temp_dir = TempDir::new().expect("temp dir");
        let service = service_in(temp_dir.path(), None);
        assert!(matches!(
            service.assemble_bytes(b"not json"),
            Err(CoreError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn file_change_persists_and_delivers_bundle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().expect("temp dir");
        let delivery = DeliveryConfig {
            url: format!("{}/api/data", server.uri()),
            payload: DeliveryPayload::Bundle,
            timeout: Duration::from_secs(5),
        };
        let service = service_in(temp_dir.path(), Some(delivery));

        let bytes = serde_json::to_vec(&sample_records()).expect("json");
        let bundle = service.handle_file_change(bytes).await.expect("handled");
        assert_eq!(bundle.len(), 2);

        let delivered = server.received_requests().await.expect("recording enabled");
        let body: Value = serde_json::from_slice(&delivered[0].body).expect("json body");
        assert_eq!(body["resourceType"], "Bundle");
        assert_eq!(body["entry"].as_array().map(Vec::len), Some(2));

        // Background write settles shortly after.
        let store = service.store().clone();
        let mut written = None;
        for _ in 0..50 {
            if let Ok(read) = store.read() {
                written = Some(read);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(written, Some(bundle));
    }

    #[tokio::test]
    async fn delivery_failure_still_returns_bundle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().expect("temp dir");
        let delivery = DeliveryConfig {
            url: server.uri(),
            payload: DeliveryPayload::Records,
            timeout: Duration::from_secs(5),
        };
        let service = service_in(temp_dir.path(), Some(delivery));

        let bytes = serde_json::to_vec(&sample_records()).expect("json");
        let bundle = service.handle_file_change(bytes).await.expect("handled");
        assert_eq!(bundle.len(), 2);

        let delivered = server.received_requests().await.expect("recording enabled");
        let body: Value = serde_json::from_slice(&delivered[0].body).expect("json body");
        assert_eq!(body, sample_records());
    }

    #[test]
    fn startup_pass_keeps_output_when_source_is_empty() {
        let temp_dir = TempDir::new().expect("temp dir");
        let service = service_in(temp_dir.path(), None);
        let saved = service.assembler().assemble_bundle(&sample_records());
        service.persist(&saved).expect("seed output");

        std::fs::write(temp_dir.path().join("sample.json"), b"[]").expect("write source");
        let bundle = service.load_and_convert().expect("startup pass");

        assert!(bundle.is_empty());
        assert_eq!(service.store().read().expect("read output"), saved);
    }

    #[tokio::test]
    async fn rejected_file_changes_keep_saved_bundle_and_skip_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().expect("temp dir");
        let delivery = DeliveryConfig {
            url: server.uri(),
            payload: DeliveryPayload::Bundle,
            timeout: Duration::from_secs(5),
        };
        let service = service_in(temp_dir.path(), Some(delivery));
        let saved = service.assembler().assemble_bundle(&sample_records());
        service.persist(&saved).expect("seed output");

        let rejected: [&[u8]; 4] = [
            br#""oops""#,
            b"[]",
            b"{}",
            br#"[{"dateRep": "14/12/2020", "countryterritoryCode": "ALB"}]"#,
        ];
        for bytes in rejected {
            let bundle = service
                .handle_file_change(bytes.to_vec())
                .await
                .expect("valid JSON");
            assert!(bundle.is_empty());
        }

        // Give any stray background write a chance to land before checking.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.store().read().expect("read output"), saved);
        server.verify().await;
    }

    #[test]
    fn reverse_returns_records_in_order() {
        let temp_dir = TempDir::new().expect("temp dir");
        let service = service_in(temp_dir.path(), None);
        let bundle = service.assembler().assemble_bundle(&sample_records());

        let report = service.reverse(&bundle);
        let dates: Vec<&str> = report.records.iter().map(|r| r.date_rep.as_str()).collect();
        assert_eq!(dates, vec!["14/12/2020", "12/12/2020"]);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn empty_payload_detection() {
        assert!(is_empty_payload(&Value::Null));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!([{}])));
        assert!(!is_empty_payload(&json!("text")));
    }
}
