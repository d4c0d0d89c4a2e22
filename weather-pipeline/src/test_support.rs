//! Fake providers shared by the unit tests.

use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    error::AttemptError,
    model::{LocationQuery, Reading, normalize_location},
    provider::{ProviderFactory, WeatherProvider},
};

pub fn reading(location: &str, temperature: f64, humidity: u8) -> Reading {
    Reading {
        location: location.to_string(),
        temperature,
        feels_like: temperature - 1.0,
        humidity,
        conditions: "light rain".to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Replays a fixed script of attempt results, then repeats the last one.
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Reading, AttemptError>>>,
    last: Result<Reading, AttemptError>,
    delay: Duration,
    calls: Counter,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Reading, AttemptError>>) -> Self {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| Err(AttemptError::Transport("empty script".into())));
        Self {
            script: Mutex::new(script.into()),
            last,
            delay: Duration::ZERO,
            calls: Counter::default(),
        }
    }

    pub fn repeating(result: Result<Reading, AttemptError>) -> Self {
        Self::new(vec![result])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Counter {
        self.calls.clone()
    }
}

#[async_trait]
impl WeatherProvider for ScriptedProvider {
    async fn lookup(&self, _query: &LocationQuery) -> Result<Reading, AttemptError> {
        self.calls.bump();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.last.clone())
    }
}

#[derive(Debug, Clone)]
struct Canned {
    result: Result<Reading, AttemptError>,
    delay: Duration,
}

#[derive(Debug, Default)]
struct Shared {
    canned: HashMap<String, Canned>,
    calls: Mutex<HashMap<String, usize>>,
    total: Counter,
    in_flight: Counter,
    peak: Counter,
    built: Counter,
}

/// Answers per location and records how it was called.
///
/// Cloning shares all counters, so one instance can hand out a provider per
/// worker and still be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct CityProvider {
    shared: Arc<Shared>,
}

impl CityProvider {
    pub fn builder() -> CityProviderBuilder {
        CityProviderBuilder::default()
    }

    pub fn calls_for(&self, location: &str) -> usize {
        let calls = self.shared.calls.lock().unwrap();
        calls.get(&normalize_location(location)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.shared.total.get()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.shared.peak.get()
    }

    pub fn providers_built(&self) -> usize {
        self.shared.built.get()
    }

    pub fn factory(&self) -> Arc<dyn ProviderFactory> {
        Arc::new(self.clone())
    }
}

impl ProviderFactory for CityProvider {
    fn build(&self) -> Box<dyn WeatherProvider> {
        self.shared.built.bump();
        Box::new(self.clone())
    }
}

#[async_trait]
impl WeatherProvider for CityProvider {
    async fn lookup(&self, query: &LocationQuery) -> Result<Reading, AttemptError> {
        let key = query.normalized();
        self.shared.total.bump();
        *self.shared.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        let now = self.shared.in_flight.bump();
        self.shared.peak.0.fetch_max(now, Ordering::SeqCst);

        let canned = self.shared.canned.get(&key).cloned().unwrap_or(Canned {
            result: Err(AttemptError::NotFound("city not found".into())),
            delay: Duration::ZERO,
        });
        if !canned.delay.is_zero() {
            tokio::time::sleep(canned.delay).await;
        }

        self.shared.in_flight.0.fetch_sub(1, Ordering::SeqCst);
        canned.result
    }
}

#[derive(Debug, Default)]
pub struct CityProviderBuilder {
    canned: HashMap<String, Canned>,
}

impl CityProviderBuilder {
    pub fn city(self, location: &str, temperature: f64, humidity: u8) -> Self {
        self.city_after(location, temperature, humidity, Duration::ZERO)
    }

    pub fn city_after(
        mut self,
        location: &str,
        temperature: f64,
        humidity: u8,
        delay: Duration,
    ) -> Self {
        self.canned.insert(
            normalize_location(location),
            Canned {
                result: Ok(reading(location, temperature, humidity)),
                delay,
            },
        );
        self
    }

    pub fn failing(mut self, location: &str, err: AttemptError) -> Self {
        self.canned.insert(
            normalize_location(location),
            Canned { result: Err(err), delay: Duration::ZERO },
        );
        self
    }

    pub fn build(self) -> CityProvider {
        CityProvider {
            shared: Arc::new(Shared {
                canned: self.canned,
                ..Shared::default()
            }),
        }
    }
}
