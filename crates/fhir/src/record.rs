//! Flat tabular record helpers.
//!
//! Input records arrive as JSON objects with arbitrary keys (the source data carries `day`,
//! `month`, `geoId`, `popData2019`, ... alongside the fields we map). This module provides:
//! - the configured choice of country identifier key
//! - required-field lookups that treat absent and `null` values alike
//! - the [`Record`] type produced by reversing an Observation

use crate::{FhirError, FhirResult};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Key holding the report date.
pub const DATE_REP_KEY: &str = "dateRep";

/// Key holding the case count.
pub const CASES_KEY: &str = "cases";

/// Key holding the death count.
pub const DEATHS_KEY: &str = "deaths";

/// Which record key carries the country identifier.
///
/// Source files exist with either naming, so this is configuration rather than something the
/// mapper infers from the data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountryKey {
    /// `countryterritoryCode`, an ISO 3166 alpha-3 code such as `ALB`.
    #[default]
    TerritoryCode,
    /// `countriesAndTerritories`, a free-text name such as `Albania`.
    CountryName,
}

impl CountryKey {
    /// The JSON key this variant reads and writes.
    pub fn as_key(self) -> &'static str {
        match self {
            CountryKey::TerritoryCode => "countryterritoryCode",
            CountryKey::CountryName => "countriesAndTerritories",
        }
    }
}

impl fmt::Display for CountryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for CountryKey {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "countryterritoryCode" => Ok(CountryKey::TerritoryCode),
            "countriesAndTerritories" => Ok(CountryKey::CountryName),
            other => Err(FhirError::InvalidInput(format!(
                "unknown country key '{other}' (expected countryterritoryCode or countriesAndTerritories)"
            ))),
        }
    }
}

/// A record recovered from an Observation.
///
/// `cases` and `deaths` keep whatever JSON value the Observation carried. `deaths` is `None`
/// when the Observation was in the reduced, cases-only form.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Report date, always `DD/MM/YYYY`.
    pub date_rep: String,

    pub cases: Value,

    pub deaths: Option<Value>,

    /// Country identifier taken from `subject.reference`.
    pub country: String,

    /// Key the country identifier is written under.
    pub country_key: CountryKey,
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.deaths.is_some() { 4 } else { 3 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(DATE_REP_KEY, &self.date_rep)?;
        map.serialize_entry(CASES_KEY, &self.cases)?;
        if let Some(deaths) = &self.deaths {
            map.serialize_entry(DEATHS_KEY, deaths)?;
        }
        map.serialize_entry(self.country_key.as_key(), &self.country)?;
        map.end()
    }
}

/// Look up a required field, treating `null` as absent.
pub(crate) fn required_value<'a>(record: &'a Map<String, Value>, key: &str) -> FhirResult<&'a Value> {
    match record.get(key) {
        Some(Value::Null) | None => Err(FhirError::MissingField(key.to_string())),
        Some(value) => Ok(value),
    }
}

/// Look up a required field and render it as text.
///
/// Strings are taken verbatim; any other scalar is rendered as its JSON text.
pub(crate) fn required_text(record: &Map<String, Value>, key: &str) -> FhirResult<String> {
    let value = required_value(record, key)?;
    Ok(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
