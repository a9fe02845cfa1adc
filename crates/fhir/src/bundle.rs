//! FHIR collection Bundle assembly and validation.
//!
//! Responsibilities:
//! - Define the Bundle wire model (`{fullUrl, resource}` entries, input order)
//! - Validate each input record before mapping and drop the invalid ones
//! - Report every skipped record and any top-level malformation to the caller
//! - Reverse a Bundle back into flat records
//!
//! Notes:
//! - Assembly never fails outright: a malformed batch yields the empty bundle plus an
//!   [`FhirError::Assembly`] in the report
//! - `fullUrl` and `Observation.id` derive from the same `dateRep`

use crate::observation::{Mapper, Observation, ObservationMapper};
use crate::{FhirError, FhirResult, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BUNDLE_RESOURCE_TYPE: &str = "Bundle";
pub const BUNDLE_TYPE_COLLECTION: &str = "collection";

// ============================================================================
// Wire types
// ============================================================================

/// Bundle resource as written to and read from JSON.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(rename = "type")]
    pub bundle_type: String,

    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BundleEntry {
    #[serde(rename = "fullUrl", default)]
    pub full_url: String,

    #[serde(default)]
    pub resource: Observation,
}

impl BundleEntry {
    /// Pair an Observation with its `urn:uuid:` full URL.
    pub fn new(resource: Observation) -> Self {
        Self {
            full_url: format!("urn:uuid:{}", resource.id),
            resource,
        }
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bundle {
    /// A collection bundle with no entries.
    pub fn empty() -> Self {
        Self {
            resource_type: BUNDLE_RESOURCE_TYPE.to_string(),
            bundle_type: BUNDLE_TYPE_COLLECTION.to_string(),
            entry: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    /// Parse a Bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the JSON does not match the Bundle wire model (the message names the failing path),
    /// - resourceType is not "Bundle".
    pub fn parse(json_text: &str) -> FhirResult<Bundle> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);

        let bundle = match serde_path_to_error::deserialize::<_, Bundle>(&mut deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(FhirError::Translation(format!(
                    "Bundle schema mismatch at {path}: {source}"
                )));
            }
        };

        if bundle.resource_type != BUNDLE_RESOURCE_TYPE {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'Bundle', got '{}'",
                bundle.resource_type
            )));
        }

        Ok(bundle)
    }

    /// Render the bundle as pretty-printed JSON with four-space indentation.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Json`] if serialisation fails.
    pub fn render(&self) -> FhirResult<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        String::from_utf8(buf)
            .map_err(|e| FhirError::Translation(format!("Failed to serialise bundle: {e}")))
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// A record (or bundle entry) that was left out, with the reason.
#[derive(Debug)]
pub struct SkippedRecord {
    /// Position in the input.
    pub index: usize,
    pub error: FhirError,
}

/// Outcome of assembling a batch.
///
/// `bundle` is always well formed. `error` is set only when the input as a whole was
/// malformed, in which case `bundle` is empty.
#[derive(Debug)]
pub struct AssemblyReport {
    pub bundle: Bundle,
    pub skipped: Vec<SkippedRecord>,
    pub error: Option<FhirError>,
}

/// Outcome of reversing a bundle.
#[derive(Debug, Default)]
pub struct ReverseReport {
    /// Reversed records, in entry order.
    pub records: Vec<Record>,
    pub failures: Vec<SkippedRecord>,
}

/// Builds Bundles from record batches with a configured mapper.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BundleAssembler {
    mapper: Mapper,
}

impl BundleAssembler {
    pub fn new(mapper: Mapper) -> Self {
        Self { mapper }
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    /// Assemble a bundle from a JSON batch.
    ///
    /// The batch may be an array of records or a single record object. Invalid records are
    /// skipped and listed in the report; they never abort the batch.
    pub fn assemble(&self, input: &Value) -> AssemblyReport {
        match input {
            Value::Array(records) => self.assemble_records(records),
            Value::Object(_) => self.assemble_records(std::slice::from_ref(input)),
            other => AssemblyReport {
                bundle: Bundle::empty(),
                skipped: Vec::new(),
                error: Some(FhirError::Assembly(format!(
                    "expected an array of records or a record object, got {}",
                    json_type_name(other)
                ))),
            },
        }
    }

    /// Convenience form of [`BundleAssembler::assemble`] returning only the bundle.
    pub fn assemble_bundle(&self, input: &Value) -> Bundle {
        self.assemble(input).bundle
    }

    /// Assemble a bundle from a slice of records, keeping input order.
    pub fn assemble_records(&self, records: &[Value]) -> AssemblyReport {
        let mut bundle = Bundle::empty();
        let mut skipped = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let mapped = match record.as_object() {
                Some(fields) => self.mapper.to_observation(fields),
                None => Err(FhirError::InvalidInput(format!(
                    "record is {}, not an object",
                    json_type_name(record)
                ))),
            };

            match mapped {
                Ok(observation) => bundle.entry.push(BundleEntry::new(observation)),
                Err(error) => skipped.push(SkippedRecord { index, error }),
            }
        }

        AssemblyReport {
            bundle,
            skipped,
            error: None,
        }
    }

    /// Reverse every entry of a bundle back into a record.
    ///
    /// Entries that cannot be reversed are listed in [`ReverseReport::failures`].
    pub fn reverse(&self, bundle: &Bundle) -> ReverseReport {
        let mut report = ReverseReport::default();

        for (index, entry) in bundle.entry.iter().enumerate() {
            let reversed = entry
                .resource
                .ensure_resource_type()
                .and_then(|()| self.mapper.from_observation(&entry.resource));

            match reversed {
                Ok(record) => report.records.push(record),
                Err(error) => report.failures.push(SkippedRecord { index, error }),
            }
        }

        report
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
