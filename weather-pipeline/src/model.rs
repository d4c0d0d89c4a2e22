use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::error::{ErrorKind, LookupFailure};

/// Unit system requested from the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }

    /// Temperature suffix for human output.
    pub fn symbol(&self) -> &'static str {
        match self {
            Units::Metric => "°C",
            Units::Imperial => "°F",
            Units::Standard => "K",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown units '{0}'. Supported units: metric, imperial, standard.")]
pub struct ParseUnitsError(String);

impl FromStr for Units {
    type Err = ParseUnitsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            "standard" => Ok(Units::Standard),
            _ => Err(ParseUnitsError(value.to_string())),
        }
    }
}

/// One unit of work: a place name plus the unit system to report in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    pub location: String,
    pub units: Units,
}

impl LocationQuery {
    pub fn new(location: impl Into<String>, units: Units) -> Self {
        Self { location: location.into(), units }
    }

    /// Case and whitespace insensitive form used for cache keys and coalescing.
    pub fn normalized(&self) -> String {
        normalize_location(&self.location)
    }
}

/// Lowercase, trim and collapse inner whitespace.
pub fn normalize_location(location: &str) -> String {
    location
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A successful lookup, in the unit system that was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Display name as resolved by the provider.
    pub location: String,
    pub temperature: f64,
    pub feels_like: f64,
    /// Relative humidity, 0–100.
    pub humidity: u8,
    pub conditions: String,
}

/// What happened to one input location.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// The location exactly as it was given.
    pub input: String,
    pub units: Units,
    pub result: Result<Reading, LookupFailure>,
}

impl FetchOutcome {
    pub fn success(query: &LocationQuery, reading: Reading) -> Self {
        Self {
            input: query.location.clone(),
            units: query.units,
            result: Ok(reading),
        }
    }

    pub fn failure(query: &LocationQuery, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            input: query.location.clone(),
            units: query.units,
            result: Err(LookupFailure::new(kind, detail)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn reading(&self) -> Option<&Reading> {
        self.result.as_ref().ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(|f| f.kind)
    }
}
