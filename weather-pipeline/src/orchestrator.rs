//! Fans a batch of queries out over a bounded worker pool.
//!
//! Workers only perform lookups. Every cache and log mutation happens in the
//! collecting task as results arrive, so neither store is ever touched
//! concurrently. Results land in a slot indexed by input position, which
//! keeps output order independent of completion order.

use chrono::NaiveDate;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    cache::{CacheKey, DailyCache},
    config::PipelineConfig,
    error::{ErrorKind, PipelineResult},
    log_sink::{DedupLog, LogRow},
    model::{FetchOutcome, LocationQuery, Reading, Units},
    provider::ProviderFactory,
    retry::{LookupClient, RetryPolicy},
};

/// Default ceiling on concurrent lookups when the caller asks for "auto".
pub const MAX_AUTO_WORKERS: usize = 8;

/// What to do when the same location appears more than once in a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Each occurrence is looked up on its own (unless the cache is on).
    #[default]
    Independent,
    /// One lookup per distinct normalized location; the result is shared.
    Coalesce,
}

/// Number of workers for `pending` lookups; `requested == 0` means auto.
pub fn worker_count(requested: usize, pending: usize) -> usize {
    let cap = if requested == 0 { MAX_AUTO_WORKERS } else { requested };
    cap.min(pending)
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// One per input query, in input order.
    pub outcomes: Vec<FetchOutcome>,
    /// Lookups dispatched to the worker pool.
    pub lookups: usize,
    pub cache_hits: usize,
    pub rows_logged: usize,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} locations: {} ok, {} failed ({} lookups, {} cache hits, {} rows logged)",
            self.outcomes.len(),
            self.succeeded(),
            self.failed(),
            self.lookups,
            self.cache_hits,
            self.rows_logged,
        )
    }
}

/// One lookup and every input position waiting on it.
#[derive(Debug)]
struct Dispatch {
    query: LocationQuery,
    slots: Vec<usize>,
}

pub struct Orchestrator {
    factory: Arc<dyn ProviderFactory>,
    retry: RetryPolicy,
    run_date: NaiveDate,
    cache: Option<DailyCache>,
    log: Option<DedupLog>,
    duplicates: DuplicatePolicy,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn ProviderFactory>, retry: RetryPolicy, run_date: NaiveDate) -> Self {
        Self {
            factory,
            retry,
            run_date,
            cache: None,
            log: None,
            duplicates: DuplicatePolicy::default(),
        }
    }

    /// Wire up the configured provider, cache and log for one run.
    pub fn from_config(config: &PipelineConfig, run_date: NaiveDate) -> PipelineResult<Self> {
        let factory: Arc<dyn ProviderFactory> = Arc::new(config.provider.clone());
        let mut orchestrator =
            Self::new(factory, config.retry, run_date).with_duplicate_policy(config.duplicates);

        if let Some(dir) = &config.cache_dir {
            orchestrator = orchestrator.with_cache(DailyCache::new(dir, run_date));
        }
        if let Some(path) = &config.csv_out {
            orchestrator = orchestrator.with_log(DedupLog::open(path)?);
        }

        Ok(orchestrator)
    }

    /// Enable the same-day cache.
    pub fn with_cache(mut self, cache: DailyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_log(mut self, log: DedupLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    /// Look up every query and return outcomes in input order.
    #[instrument(skip_all, fields(queries = queries.len(), worker_limit = worker_limit))]
    pub async fn run(&mut self, queries: &[LocationQuery], worker_limit: usize) -> RunReport {
        let mut report = RunReport::default();
        let mut slots: Vec<Option<FetchOutcome>> = vec![None; queries.len()];

        let dispatches = self.plan(queries, &mut slots, &mut report);
        report.lookups = dispatches.len();

        let workers = worker_count(worker_limit, dispatches.len());
        info!(
            lookups = dispatches.len(),
            cache_hits = report.cache_hits,
            workers,
            "Dispatching lookups"
        );

        let queue: VecDeque<(usize, LocationQuery)> = dispatches
            .iter()
            .enumerate()
            .map(|(job, d)| (job, d.query.clone()))
            .collect();
        let queue = Arc::new(Mutex::new(queue));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, FetchOutcome)>();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let client = LookupClient::new(self.factory.build(), self.retry);
            let queue = Arc::clone(&queue);
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((job, query)) = next else { break };

                    let outcome = client.fetch(&query).await;
                    if tx.send((job, outcome)).is_err() {
                        break;
                    }
                }
                debug!(worker, "Worker finished");
            }));
        }
        drop(tx);

        while let Some((job, outcome)) = rx.recv().await {
            self.collect(&dispatches[job], outcome, queries, &mut slots, &mut report);
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!(%err, "Lookup worker failed");
            }
        }

        if let Some(cache) = self.cache.as_mut() {
            if let Err(err) = cache.flush() {
                warn!(%err, "Failed to flush cache");
            }
        }

        report.outcomes = slots
            .into_iter()
            .zip(queries)
            .map(|(slot, query)| {
                slot.unwrap_or_else(|| {
                    FetchOutcome::failure(query, ErrorKind::Network, "lookup did not complete")
                })
            })
            .collect();

        report
    }

    /// Serve cache hits and group the remaining queries into lookups.
    fn plan(
        &mut self,
        queries: &[LocationQuery],
        slots: &mut [Option<FetchOutcome>],
        report: &mut RunReport,
    ) -> Vec<Dispatch> {
        let coalesce = self.cache.is_some() || self.duplicates == DuplicatePolicy::Coalesce;
        let mut dispatches: Vec<Dispatch> = Vec::new();
        let mut pending: HashMap<(Units, String), usize> = HashMap::new();

        for (idx, query) in queries.iter().enumerate() {
            let cached = self.cache.as_mut().and_then(|cache| {
                cache.get(&CacheKey::new(self.run_date, query.units, &query.location))
            });

            if let Some(reading) = cached {
                debug!(location = %query.location, "Served from cache");
                report.cache_hits += 1;
                self.offer_to_log(&reading, query.units, report);
                slots[idx] = Some(FetchOutcome::success(query, reading));
                continue;
            }

            if coalesce {
                let key = (query.units, query.normalized());
                if let Some(&job) = pending.get(&key) {
                    dispatches[job].slots.push(idx);
                    continue;
                }
                pending.insert(key, dispatches.len());
            }

            dispatches.push(Dispatch {
                query: query.clone(),
                slots: vec![idx],
            });
        }

        dispatches
    }

    /// Record one finished lookup. Runs sequentially on the collecting task.
    fn collect(
        &mut self,
        dispatch: &Dispatch,
        outcome: FetchOutcome,
        queries: &[LocationQuery],
        slots: &mut [Option<FetchOutcome>],
        report: &mut RunReport,
    ) {
        match &outcome.result {
            Ok(reading) => {
                if let Some(cache) = self.cache.as_mut() {
                    let key = CacheKey::new(self.run_date, outcome.units, &dispatch.query.location);
                    cache.put(key, reading.clone());
                }
                self.offer_to_log(reading, outcome.units, report);
            }
            Err(failure) => {
                debug!(location = %outcome.input, kind = %failure.kind, "Lookup failed");
            }
        }

        for &slot in &dispatch.slots {
            let query = &queries[slot];
            slots[slot] = Some(FetchOutcome {
                input: query.location.clone(),
                units: query.units,
                result: outcome.result.clone(),
            });
        }
    }

    fn offer_to_log(&mut self, reading: &Reading, units: Units, report: &mut RunReport) {
        let Some(log) = self.log.as_mut() else { return };

        match log.append(&LogRow::new(self.run_date, units, reading.clone())) {
            Ok(true) => report.rows_logged += 1,
            Ok(false) => {}
            Err(err) => warn!(%err, city = %reading.location, "Failed to append log row"),
        }
    }
}
