use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::ErrorKind,
    model::{FetchOutcome, Units},
};

pub const DEFAULT_PRECISION: usize = 2;

/// One human-readable line per outcome.
pub fn format_line(outcome: &FetchOutcome, precision: usize) -> String {
    match &outcome.result {
        Ok(reading) => format!(
            "{}: {:.prec$}{}, Humidity {}%",
            reading.location,
            reading.temperature,
            outcome.units.symbol(),
            reading.humidity,
            prec = precision,
        ),
        Err(failure) => {
            let city = outcome.input.trim();
            match failure.kind {
                ErrorKind::NotFound => format!("{city}: not found (check spelling)"),
                ErrorKind::Auth => format!(
                    "{city}: auth error ({}). {}",
                    failure.detail,
                    failure.kind.hint()
                ),
                ErrorKind::TransientExhausted => format!(
                    "{city}: temporary server issue ({}). Please try again.",
                    failure.detail
                ),
                ErrorKind::Network => format!("Network error for {city}: {}", failure.detail),
                ErrorKind::MalformedResponse => {
                    format!("{city}: unexpected response ({})", failure.detail)
                }
            }
        }
    }
}

/// Structured form of an outcome, one JSON object per location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub date: NaiveDate,
    pub input: String,
    pub ok: bool,
    pub units: Units,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feels_like: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl OutcomeRecord {
    pub fn new(outcome: &FetchOutcome, date: NaiveDate) -> Self {
        let mut record = Self {
            date,
            input: outcome.input.clone(),
            ok: outcome.is_success(),
            units: outcome.units,
            city: None,
            temp: None,
            feels_like: None,
            humidity: None,
            conditions: None,
            error: None,
            detail: None,
            hint: None,
        };

        match &outcome.result {
            Ok(reading) => {
                record.city = Some(reading.location.clone());
                record.temp = Some(reading.temperature);
                record.feels_like = Some(reading.feels_like);
                record.humidity = Some(reading.humidity);
                record.conditions = Some(reading.conditions.clone());
            }
            Err(failure) => {
                record.error = Some(failure.kind);
                record.detail = Some(failure.detail.clone());
                record.hint = Some(failure.kind.hint().to_string());
            }
        }

        record
    }
}
