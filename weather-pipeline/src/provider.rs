use crate::{
    error::AttemptError,
    model::{LocationQuery, Reading},
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, header::HeaderMap};
use std::{convert::TryFrom, fmt::Debug, time::Duration};

pub mod openweather;
pub mod weatherapi;

const USER_AGENT: &str = concat!("weather-pipeline/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    /// Environment variable the entry point reads the credential from.
    pub fn env_key(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OPENWEATHER_API_KEY",
            ProviderId::WeatherApi => "WEATHERAPI_API_KEY",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// A single attempt against an external weather service.
///
/// Implementations perform exactly one request and never retry; retry and
/// backoff belong to [`crate::LookupClient`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn lookup(&self, query: &LocationQuery) -> Result<Reading, AttemptError>;
}

/// Builds one provider per worker so no transport is shared across tasks.
pub trait ProviderFactory: Send + Sync {
    fn build(&self) -> Box<dyn WeatherProvider>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Box<dyn WeatherProvider> + Send + Sync,
{
    fn build(&self) -> Box<dyn WeatherProvider> {
        self()
    }
}

/// Everything needed to construct a concrete provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub id: ProviderId,
    pub api_key: String,
    /// Overrides the provider's public endpoint (used against mock servers).
    pub base_url: Option<String>,
}

impl ProviderFactory for ProviderSettings {
    fn build(&self) -> Box<dyn WeatherProvider> {
        let http = http_client();
        let api_key = self.api_key.clone();

        match self.id {
            ProviderId::OpenWeather => {
                let base = self.base_url.as_deref().unwrap_or(openweather::DEFAULT_BASE_URL);
                Box::new(OpenWeatherProvider::with_client(api_key, base, http))
            }
            ProviderId::WeatherApi => {
                let base = self.base_url.as_deref().unwrap_or(weatherapi::DEFAULT_BASE_URL);
                Box::new(WeatherApiProvider::with_client(api_key, base, http))
            }
        }
    }
}

fn http_client() -> Client {
    Client::builder().user_agent(USER_AGENT).build().unwrap_or_else(|err| {
        tracing::warn!(%err, "falling back to default HTTP client");
        Client::new()
    })
}

/// Map a `reqwest` send/read failure onto an attempt error.
pub(crate) fn transport_error(err: reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Transport(format!("request timed out: {err}"))
    } else {
        AttemptError::Transport(err.to_string())
    }
}

/// Read a `Retry-After` header as delta-seconds or an HTTP-date.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value, Utc::now())
}

pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
