//! One CSV row per batch run, kept across runs.
//!
//! Columns: `timestamp`, `units`, `provider`, `cities`, `success_count`,
//! `error_count`, `lookups`, `cache_hits`, `rows_logged`, `csv_out`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{
    error::{PipelineError, PipelineResult},
    log_sink::{append_record, open_append},
    model::Units,
    orchestrator::RunReport,
    provider::ProviderId,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub units: Units,
    pub provider: &'static str,
    /// Inputs in order, joined with `;`.
    pub cities: String,
    pub success_count: usize,
    pub error_count: usize,
    pub lookups: usize,
    pub cache_hits: usize,
    pub rows_logged: usize,
    /// Empty when the run had no CSV log.
    pub csv_out: String,
}

impl RunSummary {
    pub fn new(
        report: &RunReport,
        timestamp: DateTime<Utc>,
        units: Units,
        provider: ProviderId,
        csv_out: Option<&Path>,
    ) -> Self {
        let cities = report
            .outcomes
            .iter()
            .map(|o| o.input.as_str())
            .collect::<Vec<_>>()
            .join(";");

        Self {
            timestamp,
            units,
            provider: provider.as_str(),
            cities,
            success_count: report.succeeded(),
            error_count: report.failed(),
            lookups: report.lookups,
            cache_hits: report.cache_hits,
            rows_logged: report.rows_logged,
            csv_out: csv_out.map(|p| p.display().to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(&self, summary: &RunSummary) -> PipelineResult<()> {
        let log_err = |source: csv::Error| PipelineError::Log {
            path: self.path.clone(),
            source,
        };

        let mut file = open_append(&self.path).map_err(|err| log_err(err.into()))?;
        append_record(&mut file, summary).map_err(log_err)?;

        debug!(path = %self.path.display(), cities = %summary.cities, "Recorded run");
        Ok(())
    }
}
