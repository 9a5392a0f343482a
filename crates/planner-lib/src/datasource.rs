//! Historical data sources
//!
//! The pipeline reads past observations through [`HistoricalDataSource`].
//! Sources may return fewer rows than requested; whether to pad is a policy
//! of the source, never of the pipeline.

use crate::error::DataSourceError;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Identifier used for series shared by every service
pub const WILDCARD_IDENTIFIER: &str = "*";

/// Read access to a metric's history
pub trait HistoricalDataSource: Send + Sync {
    /// Return up to the last `hours` observations, oldest first
    fn fetch(&self, identifier: &str, metric: &str, hours: usize) -> Result<Vec<f64>, DataSourceError>;
}

fn tail(series: &[f64], hours: usize) -> Vec<f64> {
    series[series.len().saturating_sub(hours)..].to_vec()
}

/// In-memory series keyed by (identifier, metric)
#[derive(Debug, Default, Clone)]
pub struct InMemoryDataSource {
    series: HashMap<String, HashMap<String, Vec<f64>>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series, replacing any existing one for the same key
    pub fn with_series(mut self, identifier: &str, metric: &str, values: Vec<f64>) -> Self {
        self.insert(identifier, metric, values);
        self
    }

    pub fn insert(&mut self, identifier: &str, metric: &str, values: Vec<f64>) {
        self.series
            .entry(identifier.to_string())
            .or_default()
            .insert(metric.to_string(), values);
    }

    fn lookup(&self, identifier: &str, metric: &str) -> Option<&Vec<f64>> {
        self.series
            .get(identifier)
            .and_then(|metrics| metrics.get(metric))
            .or_else(|| {
                self.series
                    .get(WILDCARD_IDENTIFIER)
                    .and_then(|metrics| metrics.get(metric))
            })
    }
}

impl HistoricalDataSource for InMemoryDataSource {
    fn fetch(&self, identifier: &str, metric: &str, hours: usize) -> Result<Vec<f64>, DataSourceError> {
        self.lookup(identifier, metric)
            .map(|series| tail(series, hours))
            .ok_or_else(|| DataSourceError::not_found(identifier, metric))
    }
}

/// History loaded from a JSON document
///
/// The document maps identifiers to metrics to series:
/// `{ "<identifier>": { "<metric>": [1.0, 2.0, ...] } }`. An identifier of
/// `"*"` provides series shared by every service.
#[derive(Debug, Clone)]
pub struct JsonFileDataSource {
    inner: InMemoryDataSource,
    pad_to_requested: bool,
}

impl JsonFileDataSource {
    /// Load the whole document once
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataSourceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let doc: HashMap<String, HashMap<String, Vec<f64>>> = serde_json::from_str(&raw)?;

        let rows: usize = doc.values().flat_map(|m| m.values()).map(Vec::len).sum();
        info!(path = %path.display(), services = doc.len(), rows, "Loaded metric history");

        Ok(Self {
            inner: InMemoryDataSource { series: doc },
            pad_to_requested: false,
        })
    }

    /// Left-pad short series with their first value up to the requested length
    pub fn with_padding(mut self, pad: bool) -> Self {
        self.pad_to_requested = pad;
        self
    }
}

impl HistoricalDataSource for JsonFileDataSource {
    fn fetch(&self, identifier: &str, metric: &str, hours: usize) -> Result<Vec<f64>, DataSourceError> {
        let mut data = self.inner.fetch(identifier, metric, hours)?;
        if self.pad_to_requested && !data.is_empty() && data.len() < hours {
            let missing = hours - data.len();
            debug!(identifier, metric, missing, "Padding short history");
            let first = data[0];
            data.splice(0..0, std::iter::repeat(first).take(missing));
        }
        Ok(data)
    }
}

/// Source used when no history backend is configured
#[derive(Debug, Clone)]
pub struct UnavailableDataSource {
    reason: String,
}

impl UnavailableDataSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl HistoricalDataSource for UnavailableDataSource {
    fn fetch(&self, _identifier: &str, _metric: &str, _hours: usize) -> Result<Vec<f64>, DataSourceError> {
        Err(DataSourceError::Unavailable(self.reason.clone()))
    }
}
