use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Text};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use weather_pipeline::{
    Config, LocationQuery, Orchestrator, OutcomeRecord, Overrides, ProviderId, RunLog, RunReport,
    RunSummary, Units, format_line,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather",
    version,
    about = "Fetch current weather for a batch of locations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the TOML config file (defaults to the platform config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug diagnostics on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Locations to look up, e.g. "Seattle" "London,GB".
    pub cities: Vec<String>,

    /// Newline-delimited file of extra locations, merged after the positional ones.
    #[arg(long)]
    pub cities_file: Option<PathBuf>,

    /// Unit system for temperatures.
    #[arg(long, env = "UNITS")]
    pub units: Option<Units>,

    /// Per-attempt timeout in seconds.
    #[arg(long, env = "TIMEOUT")]
    pub timeout: Option<f64>,

    /// Total attempts per location, first attempt included.
    #[arg(long, env = "RETRIES")]
    pub retries: Option<u32>,

    /// Initial backoff in seconds; doubles on every retry.
    #[arg(long, env = "BACKOFF")]
    pub backoff: Option<f64>,

    /// Concurrent lookups (0 = one per location, at most 8).
    #[arg(long, env = "MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Serve repeat lookups from today's cache.
    #[arg(long)]
    pub cache_day: bool,

    /// Append successful readings to this CSV log.
    #[arg(long, env = "CSV_OUT")]
    pub csv_out: Option<PathBuf>,

    /// Append a one-line summary of each run to this CSV file.
    #[arg(long, env = "RUN_LOG")]
    pub run_log: Option<PathBuf>,

    /// Do not record this run in the run log.
    #[arg(long)]
    pub no_run_log: bool,

    /// Emit one JSON object per location instead of a text line.
    #[arg(long)]
    pub json: bool,

    /// Weather provider to query (overrides the configured default).
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderId>,

    /// Decimal places for temperatures.
    #[arg(long)]
    pub precision: Option<usize>,

    /// Look up repeated locations only once per run.
    #[arg(long)]
    pub coalesce_duplicates: bool,

    /// Print a closing summary line.
    #[arg(long)]
    pub summary: bool,

    /// Only print failures (text mode).
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_provider(value: &str) -> Result<ProviderId, String> {
    ProviderId::try_from(value).map_err(|err| err.to_string())
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => Config::config_file_path()?,
        };

        match self.command {
            Some(Command::Configure { provider }) => configure(&provider, &config_path),
            None => self.run.execute(&config_path).await,
        }
    }
}

impl RunArgs {
    async fn execute(self, config_path: &Path) -> Result<()> {
        let config = Config::load_from(config_path)?;
        let pipeline = config.resolve(self.overrides())?;
        debug!(provider = %pipeline.provider.id, units = %pipeline.units, "resolved configuration");

        let mut cities = self.cities.clone();
        if let Some(path) = &self.cities_file {
            cities.extend(read_cities_file(path)?);
        }
        let cities = clean_cities(cities);
        let cities = if cities.is_empty() {
            vec![prompt_city()?]
        } else {
            cities
        };

        let run_date = chrono::Local::now().date_naive();
        let queries: Vec<LocationQuery> = cities
            .iter()
            .map(|city| LocationQuery::new(city.as_str(), pipeline.units))
            .collect();

        let mut orchestrator = Orchestrator::from_config(&pipeline, run_date)?;
        let report = orchestrator.run(&queries, pipeline.max_workers).await;

        let stdout = io::stdout();
        self.render(&report, pipeline.precision, run_date, &mut stdout.lock())?;

        if self.summary && self.json {
            eprintln!("{}", report.summary_line());
        }

        if let Some(path) = &pipeline.run_log {
            let summary = RunSummary::new(
                &report,
                Utc::now(),
                pipeline.units,
                pipeline.provider.id,
                pipeline.csv_out.as_deref(),
            );
            // A run that already printed its results still succeeds.
            if let Err(err) = RunLog::new(path).record(&summary) {
                warn!(%err, "Failed to record run");
            }
        }

        Ok(())
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            provider: self.provider,
            api_keys: env_api_keys(),
            units: self.units,
            timeout_secs: self.timeout,
            retries: self.retries,
            backoff_secs: self.backoff,
            max_workers: self.max_workers,
            precision: self.precision,
            csv_out: self.csv_out.clone(),
            run_log: self.run_log.clone(),
            no_run_log: self.no_run_log,
            cache_day: self.cache_day,
            cache_dir: None,
            coalesce_duplicates: self.coalesce_duplicates,
        }
    }

    /// Write one line per outcome, in input order.
    fn render(
        &self,
        report: &RunReport,
        precision: usize,
        run_date: NaiveDate,
        out: &mut impl Write,
    ) -> Result<()> {
        for outcome in &report.outcomes {
            if self.json {
                let record = OutcomeRecord::new(outcome, run_date);
                writeln!(out, "{}", serde_json::to_string(&record)?)?;
            } else if !(self.quiet && outcome.is_success()) {
                writeln!(out, "{}", format_line(outcome, precision))?;
            }
        }

        // JSON mode keeps stdout machine-readable; the caller sends the summary to stderr.
        if self.summary && !self.json {
            writeln!(out, "{}", report.summary_line())?;
        }

        Ok(())
    }
}

fn env_api_keys() -> std::collections::HashMap<ProviderId, String> {
    ProviderId::all()
        .iter()
        .filter_map(|id| {
            std::env::var(id.env_key())
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(|key| (*id, key))
        })
        .collect()
}

fn read_cities_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read cities file: {}", path.display()))?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn clean_cities(cities: Vec<String>) -> Vec<String> {
    cities
        .into_iter()
        .map(|city| city.trim().to_string())
        .filter(|city| !city.is_empty())
        .collect()
}

fn prompt_city() -> Result<String> {
    let city = Text::new("City:")
        .with_help_message("Pass locations as arguments to skip this prompt")
        .prompt()
        .context("No locations given and the interactive prompt is unavailable")?;

    let city = city.trim().to_string();
    if city.is_empty() {
        bail!("No location entered");
    }
    Ok(city)
}

fn configure(provider: &str, config_path: &Path) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load_from(config_path)?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        bail!("API key must not be empty");
    }

    config.upsert_provider_api_key(id, api_key);
    config.save_to(config_path)?;

    println!("Saved {id} credentials to {}", config_path.display());
    if config.default_provider_id().ok() == Some(id) {
        println!("Default provider: {id}");
    }

    Ok(())
}
