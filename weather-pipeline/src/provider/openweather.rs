use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    error::AttemptError,
    model::{LocationQuery, Reading},
    provider::{retry_after, transport_error, truncate_body},
};

use super::WeatherProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn with_client(api_key: String, base_url: &str, http: Client) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn fetch_current(&self, query: &LocationQuery) -> Result<Reading, AttemptError> {
        let url = format!("{}/weather", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[
                ("q", query.location.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", query.units.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        let hint = retry_after(res.headers());
        let body = res.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let detail = error_message(&body);
            return Err(match status {
                StatusCode::NOT_FOUND => AttemptError::NotFound(detail),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    AttemptError::Unauthorized(detail)
                }
                _ => AttemptError::Status {
                    status: status.as_u16(),
                    retry_after: hint,
                    detail,
                },
            });
        }

        let parsed: OwCurrentResponse = serde_json::from_str(&body).map_err(|err| {
            AttemptError::Malformed(format!(
                "failed to parse OpenWeather JSON ({err}): {}",
                truncate_body(&body)
            ))
        })?;

        let conditions = parsed
            .weather
            .first()
            .map(|w| w.description.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let location = if parsed.name.trim().is_empty() {
            query.location.trim().to_string()
        } else {
            parsed.name
        };

        Ok(Reading {
            location,
            temperature: parsed.main.temp,
            feels_like: parsed.main.feels_like,
            humidity: parsed.main.humidity,
            conditions,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    #[serde(default)]
    name: String,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

#[derive(Debug, Deserialize)]
struct OwError {
    message: String,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    #[tracing::instrument(name = "openweather", level = "debug", skip(self))]
    async fn lookup(&self, query: &LocationQuery) -> Result<Reading, AttemptError> {
        self.fetch_current(query).await
    }
}

/// OpenWeather error bodies look like `{"cod":"404","message":"city not found"}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<OwError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| truncate_body(body))
}
