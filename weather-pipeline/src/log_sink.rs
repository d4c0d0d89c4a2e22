//! Append-only CSV log holding at most one row per (date, city).
//!
//! Header: `date,city,temp,units,humidity,feels_like,conditions`.
//! Existing keys are loaded once when the sink opens, which costs a full
//! scan of the file on every run; a sidecar key index would remove that
//! without changing this interface.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::{
    error::{PipelineError, PipelineResult},
    model::{Reading, Units},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub date: NaiveDate,
    /// Location name as resolved by the provider.
    pub city: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub date: NaiveDate,
    pub units: Units,
    pub reading: Reading,
}

impl LogRow {
    pub fn new(date: NaiveDate, units: Units, reading: Reading) -> Self {
        Self { date, units, reading }
    }

    pub fn key(&self) -> LogKey {
        LogKey {
            date: self.date,
            city: self.reading.location.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    date: NaiveDate,
    city: &'a str,
    temp: f64,
    units: Units,
    humidity: u8,
    feels_like: f64,
    conditions: &'a str,
}

impl<'a> From<&'a LogRow> for CsvRow<'a> {
    fn from(row: &'a LogRow) -> Self {
        Self {
            date: row.date,
            city: &row.reading.location,
            temp: row.reading.temperature,
            units: row.units,
            humidity: row.reading.humidity,
            feels_like: row.reading.feels_like,
            conditions: &row.reading.conditions,
        }
    }
}

/// Only the key columns are required, so rows written by older or newer
/// versions with a different set of columns still load.
#[derive(Debug, Deserialize)]
struct KeyColumns {
    date: String,
    city: String,
}

#[derive(Debug)]
pub struct DedupLog {
    path: PathBuf,
    keys: HashSet<LogKey>,
    file: Option<File>,
}

impl DedupLog {
    /// Open (or prepare to create) the log and index its existing keys.
    pub fn open(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let path = path.into();
        let keys = load_keys(&path)?;
        info!(path = %path.display(), rows = keys.len(), "Opened weather log");

        Ok(Self { path, keys, file: None })
    }

    pub fn contains(&self, key: &LogKey) -> bool {
        self.keys.contains(key)
    }

    /// Write the row unless its key is already present.
    ///
    /// The key is recorded only after the row has reached the file. A failed
    /// write leaves neither the key nor any pending bytes behind.
    pub fn append(&mut self, row: &LogRow) -> PipelineResult<bool> {
        let key = row.key();
        if self.keys.contains(&key) {
            debug!(date = %key.date, city = %key.city, "Skip duplicate row");
            return Ok(false);
        }

        let written = self
            .file()
            .map_err(csv::Error::from)
            .and_then(|file| append_record(file, &CsvRow::from(row)));

        if let Err(source) = written {
            self.file = None;
            return Err(PipelineError::Log {
                path: self.path.clone(),
                source,
            });
        }

        debug!(date = %key.date, city = %key.city, "Logged row");
        self.keys.insert(key);
        Ok(true)
    }

    fn file(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => open_append(&self.path)?,
        };
        Ok(self.file.insert(file))
    }
}

pub(crate) fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Append one CSV record, with a header line if the file is empty.
///
/// The record is encoded in memory and written in one go; on failure the
/// file is cut back to its previous length.
pub(crate) fn append_record<T: Serialize>(file: &mut File, record: &T) -> csv::Result<()> {
    let start = file.metadata()?.len();

    let mut encoder = csv::WriterBuilder::new()
        .has_headers(start == 0)
        .from_writer(Vec::new());
    encoder.serialize(record)?;
    let bytes = encoder
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))?;

    if let Err(err) = file.write_all(&bytes).and_then(|()| file.sync_data()) {
        if let Err(trim) = file.set_len(start) {
            warn!(%trim, "Failed to roll back partial CSV write");
        }
        return Err(err.into());
    }

    Ok(())
}

fn load_keys(path: &Path) -> PipelineResult<HashSet<LogKey>> {
    let mut keys = HashSet::new();

    let mut reader = match csv::ReaderBuilder::new().flexible(true).from_path(path) {
        Ok(reader) => reader,
        Err(err) => {
            if let csv::ErrorKind::Io(io_err) = err.kind() {
                if io_err.kind() == io::ErrorKind::NotFound {
                    return Ok(keys);
                }
            }
            return Err(PipelineError::Log {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };

    let mut skipped = 0usize;
    for record in reader.deserialize::<KeyColumns>() {
        let parsed = record
            .ok()
            .and_then(|row| Some((row.date.parse::<NaiveDate>().ok()?, row.city)));

        match parsed {
            Some((date, city)) if !city.is_empty() => {
                keys.insert(LogKey { date, city });
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "Skipped unreadable log rows");
    }

    Ok(keys)
}
