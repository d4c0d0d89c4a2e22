//! Same-day cache of successful readings.
//!
//! Each (date, units) pair gets its own JSON file, e.g.
//! `2026-10-19_metric.json`, mapping a normalized location to the last
//! reading seen for it that day. Files from earlier days are never opened.

use chrono::NaiveDate;
use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::PathBuf,
};
use tracing::{debug, warn};

use crate::{
    error::{PipelineError, PipelineResult},
    model::{Reading, Units, normalize_location},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub date: NaiveDate,
    pub units: Units,
    /// Already normalized.
    pub location: String,
}

impl CacheKey {
    pub fn new(date: NaiveDate, units: Units, location: &str) -> Self {
        Self {
            date,
            units,
            location: normalize_location(location),
        }
    }
}

#[derive(Debug)]
struct Container {
    path: PathBuf,
    entries: BTreeMap<String, Reading>,
    dirty: bool,
}

impl Container {
    fn load(path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "Ignoring unreadable cache file");
                BTreeMap::new()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), %err, "Failed to read cache file, starting cold");
                BTreeMap::new()
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "Loaded cache container");
        Self { path, entries, dirty: false }
    }

    fn write(&self) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.entries).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Cache scoped to a single calendar day.
#[derive(Debug)]
pub struct DailyCache {
    dir: PathBuf,
    date: NaiveDate,
    containers: HashMap<Units, Container>,
}

impl DailyCache {
    pub fn new(dir: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            dir: dir.into(),
            date,
            containers: HashMap::new(),
        }
    }

    /// Backing file for one unit system on this cache's day.
    fn container_path(&self, units: Units) -> PathBuf {
        self.dir.join(format!("{}_{}.json", self.date.format("%Y-%m-%d"), units))
    }

    fn container(&mut self, units: Units) -> &mut Container {
        let path = self.container_path(units);
        self.containers
            .entry(units)
            .or_insert_with(|| Container::load(path))
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Reading> {
        if key.date != self.date {
            return None;
        }

        let hit = self.container(key.units).entries.get(&key.location).cloned();
        debug!(location = %key.location, units = %key.units, hit = hit.is_some(), "Cache lookup");
        hit
    }

    /// Overwrites any previous reading for the key. Not durable until [`flush`](Self::flush).
    pub fn put(&mut self, key: CacheKey, reading: Reading) {
        if key.date != self.date {
            debug!(date = %key.date, "Ignoring cache write for another day");
            return;
        }

        let container = self.container(key.units);
        container.entries.insert(key.location, reading);
        container.dirty = true;
    }

    /// Persist every container touched since the last flush.
    pub fn flush(&mut self) -> PipelineResult<()> {
        if !self.containers.values().any(|c| c.dirty) {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).map_err(|source| PipelineError::Cache {
            path: self.dir.clone(),
            source,
        })?;

        for container in self.containers.values_mut().filter(|c| c.dirty) {
            container.write().map_err(|source| PipelineError::Cache {
                path: container.path.clone(),
                source,
            })?;
            container.dirty = false;
            debug!(
                path = %container.path.display(),
                entries = container.entries.len(),
                "Flushed cache"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::reading;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn lookups_are_normalized() {
        let dir = tempdir().unwrap();
        let mut cache = DailyCache::new(dir.path(), day(19));

        cache.put(CacheKey::new(day(19), Units::Metric, "Seattle"), reading("Seattle", 18.0, 70));

        let hit = cache.get(&CacheKey::new(day(19), Units::Metric, "  seattle "));
        assert_eq!(hit.map(|r| r.location), Some("Seattle".to_string()));
    }

    #[test]
    fn flush_persists_for_next_run() {
        let dir = tempdir().unwrap();
        let mut cache = DailyCache::new(dir.path(), day(19));
        cache.put(CacheKey::new(day(19), Units::Metric, "Seattle"), reading("Seattle", 18.0, 70));
        cache.flush().unwrap();

        assert!(dir.path().join("2026-10-19_metric.json").exists());

        let mut reopened = DailyCache::new(dir.path(), day(19));
        assert!(reopened.get(&CacheKey::new(day(19), Units::Metric, "seattle")).is_some());
    }

    #[test]
    fn unflushed_writes_are_not_durable() {
        let dir = tempdir().unwrap();
        let mut cache = DailyCache::new(dir.path(), day(19));
        cache.put(CacheKey::new(day(19), Units::Metric, "Seattle"), reading("Seattle", 18.0, 70));

        let mut other = DailyCache::new(dir.path(), day(19));
        assert!(other.get(&CacheKey::new(day(19), Units::Metric, "Seattle")).is_none());
    }

    #[test]
    fn put_keeps_unrelated_entries() {
        let dir = tempdir().unwrap();
        let mut first = DailyCache::new(dir.path(), day(19));
        first.put(CacheKey::new(day(19), Units::Metric, "Seattle"), reading("Seattle", 18.0, 70));
        first.flush().unwrap();

        let mut second = DailyCache::new(dir.path(), day(19));
        second.put(CacheKey::new(day(19), Units::Metric, "London"), reading("London", 12.0, 80));
        second.put(CacheKey::new(day(19), Units::Metric, "London"), reading("London", 13.0, 81));
        second.flush().unwrap();

        let mut third = DailyCache::new(dir.path(), day(19));
        assert!(third.get(&CacheKey::new(day(19), Units::Metric, "Seattle")).is_some());
        let london = third.get(&CacheKey::new(day(19), Units::Metric, "London")).unwrap();
        assert_eq!(london.temperature, 13.0);
    }

    #[test]
    fn previous_day_is_never_read() {
        let dir = tempdir().unwrap();
        let mut yesterday = DailyCache::new(dir.path(), day(18));
        yesterday.put(
            CacheKey::new(day(18), Units::Metric, "Seattle"),
            reading("Seattle", 18.0, 70),
        );
        yesterday.flush().unwrap();

        let mut today = DailyCache::new(dir.path(), day(19));
        assert!(today.get(&CacheKey::new(day(19), Units::Metric, "Seattle")).is_none());
        assert!(today.get(&CacheKey::new(day(18), Units::Metric, "Seattle")).is_none());
    }

    #[test]
    fn unit_systems_do_not_collide() {
        let dir = tempdir().unwrap();
        let mut cache = DailyCache::new(dir.path(), day(19));
        cache.put(CacheKey::new(day(19), Units::Metric, "Seattle"), reading("Seattle", 18.0, 70));
        cache.put(CacheKey::new(day(19), Units::Imperial, "Seattle"), reading("Seattle", 64.4, 70));
        cache.flush().unwrap();

        assert!(dir.path().join("2026-10-19_metric.json").exists());
        assert!(dir.path().join("2026-10-19_imperial.json").exists());

        let mut reopened = DailyCache::new(dir.path(), day(19));
        let f = reopened.get(&CacheKey::new(day(19), Units::Imperial, "Seattle")).unwrap();
        assert_eq!(f.temperature, 64.4);
        assert!(reopened.get(&CacheKey::new(day(19), Units::Standard, "Seattle")).is_none());
    }

    #[test]
    fn corrupted_file_is_a_cold_start() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("2026-10-19_metric.json"), "{ not json").unwrap();

        let mut cache = DailyCache::new(dir.path(), day(19));
        assert!(cache.get(&CacheKey::new(day(19), Units::Metric, "Seattle")).is_none());

        cache.put(CacheKey::new(day(19), Units::Metric, "Seattle"), reading("Seattle", 18.0, 70));
        cache.flush().unwrap();

        let mut reopened = DailyCache::new(dir.path(), day(19));
        assert!(reopened.get(&CacheKey::new(day(19), Units::Metric, "Seattle")).is_some());
    }

    #[test]
    fn flush_without_writes_creates_nothing() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let mut cache = DailyCache::new(&cache_dir, day(19));
        let _ = cache.get(&CacheKey::new(day(19), Units::Metric, "Seattle"));

        cache.flush().unwrap();
        assert!(!cache_dir.exists());
    }
}
