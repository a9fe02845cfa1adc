//! FHIR Observation wire models and record translation.
//!
//! This module provides the Observation wire model and the two forward mapping variants:
//! - [`CompleteMapper`]: cases and deaths as two coded `component` entries
//! - [`ReducedMapper`]: cases only, as a single top-level `valueQuantity`
//!
//! Responsibilities:
//! - Define the Observation wire model with a stable field order
//! - Translate a flat record into an Observation, enforcing required fields
//! - Translate an Observation back into a [`Record`], canonicalising the date
//!
//! Notes:
//! - Counts are carried through as raw JSON values, never coerced
//! - The reverse direction is shape-driven: observations with components are read in complete
//!   form, observations without components are read in reduced form

use crate::record::{required_text, required_value, CASES_KEY, DATE_REP_KEY, DEATHS_KEY};
use crate::{CountryKey, FhirError, FhirResult, Record};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// `resourceType` of every Observation produced here.
pub const OBSERVATION_RESOURCE_TYPE: &str = "Observation";

pub const LOINC_SYSTEM: &str = "http://loinc.org";
pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

/// LOINC code of the top-level Observation code.
pub const CASE_REPORT_CODE: &str = "94500-6";
/// LOINC code identifying the case count component.
pub const CASES_CODE: &str = "94531-1";
/// LOINC code identifying the death count component.
pub const DEATHS_CODE: &str = "9279-1";

const COUNT_UNIT: &str = "count";
/// Accepted input formats, each with the exact shape it must have (`9` stands for a digit).
/// chrono's `%Y` takes any number of digits, so the shape pins the year to four.
const ACCEPTED_DATE_FORMATS: [(&str, &str); 2] =
    [("%Y-%m-%d", "9999-99-99"), ("%d/%m/%Y", "99/99/9999")];
const CANONICAL_DATE_FORMAT: &str = "%d/%m/%Y";

// ============================================================================
// Wire types
// ============================================================================

/// Observation resource as written to and read from JSON.
///
/// Unknown keys are tolerated on input because reversed bundles may come from other producers.
/// Missing keys deserialise to empty values; reversing such an Observation fails for that
/// Observation alone.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Observation {
    #[serde(rename = "resourceType", default)]
    pub resource_type: String,

    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(default)]
    pub subject: Reference,

    #[serde(rename = "effectiveDateTime", default)]
    pub effective_date_time: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component: Vec<ObservationComponent>,

    #[serde(
        rename = "valueQuantity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub value_quantity: Option<Quantity>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CodeableConcept {
    #[serde(default)]
    pub coding: Vec<Coding>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Reference {
    #[serde(default)]
    pub reference: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ObservationComponent {
    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(
        rename = "valueQuantity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub value_quantity: Option<Quantity>,
}

/// A counted quantity. `value` is whatever JSON value the source record held.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Observation {
    /// Parse an Observation from JSON text.
    ///
    /// Uses `serde_path_to_error` so a schema mismatch names the failing path
    /// (e.g. `subject.reference`).
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the JSON does not match the Observation wire model,
    /// - resourceType is not "Observation".
    pub fn parse(json_text: &str) -> FhirResult<Observation> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);

        let observation = match serde_path_to_error::deserialize::<_, Observation>(&mut deserializer)
        {
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
                    "Observation schema mismatch at {path}: {source}"
                )));
            }
        };

        observation.ensure_resource_type()?;
        Ok(observation)
    }

    pub(crate) fn ensure_resource_type(&self) -> FhirResult<()> {
        if self.resource_type != OBSERVATION_RESOURCE_TYPE {
            return Err(FhirError::InvalidInput(format!(
                "Expected resourceType 'Observation', got '{}'",
                self.resource_type
            )));
        }
        Ok(())
    }

    /// Identifier for an Observation built from a record dated `date_rep`.
    pub fn id_for(date_rep: &str) -> String {
        format!("observation-{date_rep}")
    }
}

// ============================================================================
// Mapper configuration
// ============================================================================

/// Which forward mapping variant to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MapperKind {
    /// Cases and deaths as two components.
    #[default]
    Complete,
    /// Cases only, as a top-level `valueQuantity`. Death counts are dropped.
    Reduced,
}

impl FromStr for MapperKind {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(MapperKind::Complete),
            "reduced" => Ok(MapperKind::Reduced),
            other => Err(FhirError::InvalidInput(format!(
                "unknown mapper '{other}' (expected complete or reduced)"
            ))),
        }
    }
}

/// What reversing a reduced Observation does when it has no case value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingCasesPolicy {
    /// Fail with [`FhirError::MissingField`], consistent with the forward path.
    #[default]
    Fail,
    /// Report zero cases.
    DefaultZero,
}

impl FromStr for MissingCasesPolicy {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(MissingCasesPolicy::Fail),
            "zero" => Ok(MissingCasesPolicy::DefaultZero),
            other => Err(FhirError::InvalidInput(format!(
                "unknown missing-cases policy '{other}' (expected fail or zero)"
            ))),
        }
    }
}

// ============================================================================
// Mappers
// ============================================================================

/// Translation between flat records and Observations.
pub trait ObservationMapper {
    fn kind(&self) -> MapperKind;

    fn country_key(&self) -> CountryKey;

    fn missing_cases(&self) -> MissingCasesPolicy;

    /// Keys a record must carry for this mapper, in the order they are checked.
    fn required_fields(&self) -> Vec<&'static str>;

    /// Check a record carries every required field.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::MissingField`] naming the first absent key.
    fn validate(&self, record: &Map<String, Value>) -> FhirResult<()> {
        self.required_fields()
            .into_iter()
            .try_for_each(|key| required_value(record, key).map(|_| ()))
    }

    /// Map a record to an Observation.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::MissingField`] if the record lacks a required key.
    fn to_observation(&self, record: &Map<String, Value>) -> FhirResult<Observation>;

    /// Map an Observation back to a record.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - `effectiveDateTime` is in neither accepted format,
    /// - a coded component is absent,
    /// - a required value is absent.
    fn from_observation(&self, observation: &Observation) -> FhirResult<Record> {
        reverse_observation(observation, self.country_key(), self.missing_cases())
    }
}

/// Maps cases and deaths as two coded components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompleteMapper {
    pub country_key: CountryKey,
    pub missing_cases: MissingCasesPolicy,
}

/// Maps cases only, as a single top-level quantity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReducedMapper {
    pub country_key: CountryKey,
    pub missing_cases: MissingCasesPolicy,
}

impl ObservationMapper for CompleteMapper {
    fn kind(&self) -> MapperKind {
        MapperKind::Complete
    }

    fn country_key(&self) -> CountryKey {
        self.country_key
    }

    fn missing_cases(&self) -> MissingCasesPolicy {
        self.missing_cases
    }

    fn required_fields(&self) -> Vec<&'static str> {
        vec![DATE_REP_KEY, CASES_KEY, DEATHS_KEY, self.country_key.as_key()]
    }

    fn to_observation(&self, record: &Map<String, Value>) -> FhirResult<Observation> {
        self.validate(record)?;
        let mut observation = base_observation(record, self.country_key)?;
        observation.component = vec![
            count_component(
                CASES_CODE,
                "Number of COVID-19 cases",
                required_value(record, CASES_KEY)?,
            ),
            count_component(
                DEATHS_CODE,
                "Number of deaths",
                required_value(record, DEATHS_KEY)?,
            ),
        ];
        Ok(observation)
    }
}

impl ObservationMapper for ReducedMapper {
    fn kind(&self) -> MapperKind {
        MapperKind::Reduced
    }

    fn country_key(&self) -> CountryKey {
        self.country_key
    }

    fn missing_cases(&self) -> MissingCasesPolicy {
        self.missing_cases
    }

    fn required_fields(&self) -> Vec<&'static str> {
        vec![DATE_REP_KEY, CASES_KEY, self.country_key.as_key()]
    }

    fn to_observation(&self, record: &Map<String, Value>) -> FhirResult<Observation> {
        self.validate(record)?;
        let mut observation = base_observation(record, self.country_key)?;
        observation.value_quantity = Some(count_quantity(required_value(record, CASES_KEY)?));
        Ok(observation)
    }
}

/// A mapper selected by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mapper {
    Complete(CompleteMapper),
    Reduced(ReducedMapper),
}

impl Mapper {
    pub fn new(kind: MapperKind, country_key: CountryKey, missing_cases: MissingCasesPolicy) -> Self {
        match kind {
            MapperKind::Complete => Mapper::Complete(CompleteMapper {
                country_key,
                missing_cases,
            }),
            MapperKind::Reduced => Mapper::Reduced(ReducedMapper {
                country_key,
                missing_cases,
            }),
        }
    }

    fn inner(&self) -> &dyn ObservationMapper {
        match self {
            Mapper::Complete(m) => m,
            Mapper::Reduced(m) => m,
        }
    }
}

impl Default for Mapper {
    fn default() -> Self {
        Mapper::Complete(CompleteMapper::default())
    }
}

impl ObservationMapper for Mapper {
    fn kind(&self) -> MapperKind {
        self.inner().kind()
    }

    fn country_key(&self) -> CountryKey {
        self.inner().country_key()
    }

    fn missing_cases(&self) -> MissingCasesPolicy {
        self.inner().missing_cases()
    }

    fn required_fields(&self) -> Vec<&'static str> {
        self.inner().required_fields()
    }

    fn to_observation(&self, record: &Map<String, Value>) -> FhirResult<Observation> {
        self.inner().to_observation(record)
    }
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

/// Everything both variants share: identity, status, code, subject and date.
fn base_observation(record: &Map<String, Value>, country_key: CountryKey) -> FhirResult<Observation> {
    let date_rep = required_text(record, DATE_REP_KEY)?;
    let country = required_text(record, country_key.as_key())?;

    Ok(Observation {
        resource_type: OBSERVATION_RESOURCE_TYPE.to_string(),
        id: Observation::id_for(&date_rep),
        status: "final".to_string(),
        code: loinc_concept(CASE_REPORT_CODE, "COVID-19 case report"),
        subject: Reference {
            reference: format!("Country/{country}"),
        },
        effective_date_time: date_rep,
        component: Vec::new(),
        value_quantity: None,
    })
}

fn loinc_concept(code: &str, display: &str) -> CodeableConcept {
    CodeableConcept {
        coding: vec![Coding {
            system: Some(LOINC_SYSTEM.to_string()),
            code: Some(code.to_string()),
            display: Some(display.to_string()),
        }],
    }
}

fn count_quantity(value: &Value) -> Quantity {
    Quantity {
        value: Some(value.clone()),
        unit: Some(COUNT_UNIT.to_string()),
        system: Some(UCUM_SYSTEM.to_string()),
        code: Some(COUNT_UNIT.to_string()),
    }
}

fn count_component(code: &str, display: &str, value: &Value) -> ObservationComponent {
    ObservationComponent {
        code: loinc_concept(code, display),
        value_quantity: Some(count_quantity(value)),
    }
}

/// Normalise a report date to `DD/MM/YYYY`.
///
/// Accepts `YYYY-MM-DD` or `DD/MM/YYYY`. Already-canonical input comes back unchanged.
///
/// # Errors
///
/// Returns [`FhirError::DateFormat`] if neither format matches.
pub fn canonical_date(text: &str) -> FhirResult<String> {
    ACCEPTED_DATE_FORMATS
        .iter()
        .filter(|(_, shape)| has_shape(text, shape))
        .find_map(|(format, _)| NaiveDate::parse_from_str(text, format).ok())
        .map(|date| date.format(CANONICAL_DATE_FORMAT).to_string())
        .ok_or_else(|| FhirError::DateFormat(text.to_string()))
}

fn has_shape(text: &str, shape: &str) -> bool {
    text.len() == shape.len()
        && text.bytes().zip(shape.bytes()).all(|(c, s)| match s {
            b'9' => c.is_ascii_digit(),
            _ => c == s,
        })
}

fn find_component<'a>(
    observation: &'a Observation,
    code: &str,
) -> FhirResult<&'a ObservationComponent> {
    observation
        .component
        .iter()
        .find(|component| {
            component
                .code
                .coding
                .iter()
                .any(|coding| coding.code.as_deref() == Some(code))
        })
        .ok_or_else(|| FhirError::ComponentNotFound(code.to_string()))
}

fn component_value(observation: &Observation, code: &str) -> FhirResult<Value> {
    find_component(observation, code)?
        .value_quantity
        .as_ref()
        .and_then(|quantity| quantity.value.clone())
        .ok_or_else(|| FhirError::MissingField(format!("component[{code}].valueQuantity.value")))
}

fn reverse_observation(
    observation: &Observation,
    country_key: CountryKey,
    missing_cases: MissingCasesPolicy,
) -> FhirResult<Record> {
    if observation.effective_date_time.is_empty() {
        return Err(FhirError::MissingField("effectiveDateTime".to_string()));
    }
    let date_rep = canonical_date(&observation.effective_date_time)?;

    let (cases, deaths) = if observation.component.is_empty() {
        let cases = observation
            .value_quantity
            .as_ref()
            .and_then(|quantity| quantity.value.clone());
        let cases = match (cases, missing_cases) {
            (Some(value), _) => value,
            (None, MissingCasesPolicy::DefaultZero) => Value::from(0),
            (None, MissingCasesPolicy::Fail) => {
                return Err(FhirError::MissingField("valueQuantity.value".to_string()))
            }
        };
        (cases, None)
    } else {
        (
            component_value(observation, CASES_CODE)?,
            Some(component_value(observation, DEATHS_CODE)?),
        )
    };

    let country = observation
        .subject
        .reference
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| FhirError::MissingField("subject.reference".to_string()))?
        .to_string();

    Ok(Record {
        date_rep,
        cases,
        deaths,
        country,
        country_key,
    })
}
