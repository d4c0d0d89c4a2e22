//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Abstraction over weather providers, plus a retrying lookup client
//! - A same-day response cache, a deduplicated CSV log and a per-run log
//! - The concurrent orchestrator tying them together
//! - Result formatting (text lines and JSON records)
//!
//! It is used by `weather-cli`, but can equally drive a scheduled job.

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod log_sink;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod run_log;

#[cfg(test)]
mod test_support;

pub use cache::{CacheKey, DailyCache};
pub use config::{Config, Defaults, Overrides, PipelineConfig, ProviderConfig};
pub use error::{AttemptError, ErrorKind, LookupFailure, PipelineError, PipelineResult};
pub use format::{OutcomeRecord, format_line};
pub use log_sink::{DedupLog, LogKey, LogRow};
pub use model::{FetchOutcome, LocationQuery, Reading, Units};
pub use orchestrator::{DuplicatePolicy, Orchestrator, RunReport};
pub use provider::{ProviderFactory, ProviderId, ProviderSettings, WeatherProvider};
pub use retry::{LookupClient, RetryPolicy};
pub use run_log::{RunLog, RunSummary};
