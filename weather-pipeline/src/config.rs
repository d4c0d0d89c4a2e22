use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::{PipelineError, PipelineResult},
    format::DEFAULT_PRECISION,
    model::Units,
    orchestrator::DuplicatePolicy,
    provider::{ProviderId, ProviderSettings},
    retry::{DEFAULT_ATTEMPTS, DEFAULT_BACKOFF, DEFAULT_TIMEOUT, MAX_DELAY, RetryPolicy},
};

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Alternate endpoint, mostly useful for testing against a mock server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Run defaults stored on disk; every field can be overridden per run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Defaults {
    pub units: Option<Units>,
    pub timeout_secs: Option<f64>,
    pub retries: Option<u32>,
    pub backoff_secs: Option<f64>,
    pub max_workers: Option<usize>,
    pub precision: Option<usize>,
    pub csv_out: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub run_log: Option<PathBuf>,
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather" or "weatherapi".
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Example TOML:
    /// [defaults]
    /// units = "imperial"
    /// retries = 5
    #[serde(default)]
    pub defaults: Defaults,
}

/// Per-run values from the command line and environment.
///
/// The entry point fills this in; nothing below it reads the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<ProviderId>,
    /// Credentials found outside the config file, keyed by provider.
    pub api_keys: HashMap<ProviderId, String>,
    pub units: Option<Units>,
    pub timeout_secs: Option<f64>,
    pub retries: Option<u32>,
    pub backoff_secs: Option<f64>,
    pub max_workers: Option<usize>,
    pub precision: Option<usize>,
    pub csv_out: Option<PathBuf>,
    pub cache_day: bool,
    pub cache_dir: Option<PathBuf>,
    pub coalesce_duplicates: bool,
    pub run_log: Option<PathBuf>,
    pub no_run_log: bool,
}

/// Fully resolved settings for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub provider: ProviderSettings,
    pub units: Units,
    pub retry: RetryPolicy,
    /// `0` sizes the pool to the batch, capped at eight.
    pub max_workers: usize,
    pub precision: usize,
    pub csv_out: Option<PathBuf>,
    /// Present only when the same-day cache is enabled.
    pub cache_dir: Option<PathBuf>,
    pub duplicates: DuplicatePolicy,
    /// Per-run summary CSV; `None` when disabled.
    pub run_log: Option<PathBuf>,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `weather configure <provider>` \
                 (e.g. `weather configure openweather`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Load config from `path`, or return an empty default if it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Where daily cache files live unless configured otherwise.
    pub fn default_cache_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.cache_dir().join("daily"))
    }

    /// Where run summaries are appended unless configured otherwise.
    pub fn default_run_log() -> Result<PathBuf> {
        Ok(project_dirs()?.data_local_dir().join("weather_runs.csv"))
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        let base_url = self
            .providers
            .get(provider_id.as_str())
            .and_then(|p| p.base_url.clone());
        self.providers
            .insert(provider_id.as_str().to_string(), ProviderConfig { api_key, base_url });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers
            .get(provider_id.as_str())
            .map(|cfg| cfg.api_key.as_str())
            .filter(|key| !key.trim().is_empty())
    }

    /// Merge file values with per-run overrides and validate the result.
    pub fn resolve(&self, overrides: Overrides) -> PipelineResult<PipelineConfig> {
        let id = match overrides.provider {
            Some(id) => id,
            None => match self.default_provider.as_deref() {
                Some(name) => ProviderId::try_from(name)
                    .map_err(|err| PipelineError::configuration(err.to_string()))?,
                None => ProviderId::OpenWeather,
            },
        };

        let api_key = overrides
            .api_keys
            .get(&id)
            .map(String::as_str)
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.provider_api_key(id))
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "No API key configured for provider '{id}'.\n\
                     Hint: set {} (or add it to .env) or run `weather configure {id}`.",
                    id.env_key()
                ))
            })?
            .trim()
            .to_string();

        let defaults = &self.defaults;

        let attempts = overrides.retries.or(defaults.retries).unwrap_or(DEFAULT_ATTEMPTS);
        if attempts == 0 {
            return Err(PipelineError::configuration(
                "retries must be at least 1 (it counts the first attempt)",
            ));
        }

        let timeout = seconds(
            "timeout",
            overrides.timeout_secs.or(defaults.timeout_secs),
            DEFAULT_TIMEOUT,
        )?;
        if timeout.is_zero() {
            return Err(PipelineError::configuration("timeout must be greater than zero"));
        }

        let backoff = seconds(
            "backoff",
            overrides.backoff_secs.or(defaults.backoff_secs),
            DEFAULT_BACKOFF,
        )?;

        let cache_dir = if overrides.cache_day {
            let dir = match overrides.cache_dir.or_else(|| defaults.cache_dir.clone()) {
                Some(dir) => dir,
                None => Self::default_cache_dir()
                    .map_err(|err| PipelineError::configuration(err.to_string()))?,
            };
            Some(dir)
        } else {
            None
        };

        // Without a platform data dir the run log is skipped, not fatal.
        let run_log = if overrides.no_run_log {
            None
        } else {
            overrides
                .run_log
                .or_else(|| defaults.run_log.clone())
                .or_else(|| Self::default_run_log().ok())
        };

        let duplicates = if overrides.coalesce_duplicates {
            DuplicatePolicy::Coalesce
        } else {
            DuplicatePolicy::Independent
        };

        Ok(PipelineConfig {
            provider: ProviderSettings {
                id,
                api_key,
                base_url: self.provider_config(id).and_then(|p| p.base_url.clone()),
            },
            units: overrides.units.or(defaults.units).unwrap_or_default(),
            retry: RetryPolicy {
                attempts,
                backoff,
                timeout,
                max_delay: MAX_DELAY,
            },
            max_workers: overrides.max_workers.or(defaults.max_workers).unwrap_or(0),
            precision: overrides
                .precision
                .or(defaults.precision)
                .unwrap_or(DEFAULT_PRECISION),
            csv_out: overrides.csv_out.or_else(|| defaults.csv_out.clone()),
            cache_dir,
            duplicates,
            run_log,
        })
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "weather-pipeline", "weather")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}

fn seconds(name: &str, value: Option<f64>, default: Duration) -> PipelineResult<Duration> {
    match value {
        None => Ok(default),
        Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
            PipelineError::configuration(format!(
                "{name} must be a non-negative number of seconds, got {secs}"
            ))
        }),
    }
}
