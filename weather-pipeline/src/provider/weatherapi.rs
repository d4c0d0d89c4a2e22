use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    error::AttemptError,
    model::{LocationQuery, Reading, Units},
    provider::{retry_after, transport_error, truncate_body},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";

/// WeatherAPI.com error code for "No matching location found".
const NO_MATCHING_LOCATION: u32 = 1006;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn with_client(api_key: String, base_url: &str, http: Client) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn fetch_current(&self, query: &LocationQuery) -> Result<Reading, AttemptError> {
        let url = format!("{}/current.json", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", query.location.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        let hint = retry_after(res.headers());
        let body = res.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let error = serde_json::from_str::<WaErrorBody>(&body).ok().map(|b| b.error);
            let detail = error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| truncate_body(&body));

            return Err(match (status, error.map(|e| e.code)) {
                (_, Some(NO_MATCHING_LOCATION)) | (StatusCode::NOT_FOUND, _) => {
                    AttemptError::NotFound(detail)
                }
                (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
                    AttemptError::Unauthorized(detail)
                }
                _ => AttemptError::Status {
                    status: status.as_u16(),
                    retry_after: hint,
                    detail,
                },
            });
        }

        let parsed: WaResponse = serde_json::from_str(&body).map_err(|err| {
            AttemptError::Malformed(format!(
                "failed to parse WeatherAPI JSON ({err}): {}",
                truncate_body(&body)
            ))
        })?;

        let current = parsed.current;
        let (temperature, feels_like) = match query.units {
            Units::Metric => (current.temp_c, current.feelslike_c),
            Units::Imperial => (current.temp_f, current.feelslike_f),
            Units::Standard => (
                celsius_to_kelvin(current.temp_c),
                celsius_to_kelvin(current.feelslike_c),
            ),
        };

        Ok(Reading {
            location: parsed.location.name,
            temperature,
            feels_like,
            humidity: current.humidity,
            conditions: current.condition.text,
        })
    }
}

fn celsius_to_kelvin(celsius: f64) -> f64 {
    celsius + 273.15
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    temp_f: f64,
    feelslike_c: f64,
    feelslike_f: f64,
    humidity: u8,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

#[derive(Debug, Deserialize)]
struct WaError {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WaErrorBody {
    error: WaError,
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    #[tracing::instrument(name = "weatherapi", level = "debug", skip(self))]
    async fn lookup(&self, query: &LocationQuery) -> Result<Reading, AttemptError> {
        self.fetch_current(query).await
    }
}
