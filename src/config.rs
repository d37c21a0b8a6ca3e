use std::{env, fs, num::NonZeroUsize, path::PathBuf, str::FromStr, thread, time::Duration};

use serde::Deserialize;

use crate::{
    error::{EngineErr, Result},
    metric::Metric,
};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Validated bounds of a prediction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictConfig {
    chunk_size: NonZeroUsize,
    worker_count: NonZeroUsize,
    metric: Metric,
    chunk_deadline: Option<Duration>,
    shm_dir: Option<PathBuf>,
}

/// The on-disk form of a `PredictConfig`, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    chunk_size: Option<usize>,
    worker_count: Option<usize>,
    metric: Option<String>,
    chunk_deadline_ms: Option<u64>,
    shm_dir: Option<PathBuf>,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            worker_count: thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            metric: Metric::Dot,
            chunk_deadline: None,
            shm_dir: None,
        }
    }
}

impl PredictConfig {
    /// Creates a configuration from raw values.
    ///
    /// # Args
    /// * `chunk_size` - Rows per chunk, must be positive.
    /// * `worker_count` - Number of workers, must be positive.
    /// * `metric` - The metric's name, `dot` or `cosine`.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero size or count, `UnsupportedMetric` for an
    /// unknown metric name.
    pub fn new(chunk_size: usize, worker_count: usize, metric: &str) -> Result<Self> {
        Ok(Self {
            chunk_size: positive("chunk_size", chunk_size)?,
            worker_count: positive("worker_count", worker_count)?,
            metric: metric.parse()?,
            ..Self::default()
        })
    }

    /// Parses a JSON configuration, missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        Self::default().merge(raw)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        Self::from_json(&content)
    }

    /// Applies `XC_CHUNK_SIZE`, `XC_WORKERS`, `XC_METRIC`, `XC_CHUNK_DEADLINE_MS`
    /// and `XC_SHM_DIR` on top of this configuration.
    pub fn with_env_overrides(self) -> Result<Self> {
        let raw = RawConfig {
            chunk_size: env_var("XC_CHUNK_SIZE")?,
            worker_count: env_var("XC_WORKERS")?,
            metric: env::var("XC_METRIC").ok(),
            chunk_deadline_ms: env_var("XC_CHUNK_DEADLINE_MS")?,
            shm_dir: env::var_os("XC_SHM_DIR").map(PathBuf::from),
        };

        self.merge(raw)
    }

    pub fn with_chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_worker_count(mut self, worker_count: NonZeroUsize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// A chunk still being scored `deadline` after a worker picked it up
    /// fails the run, however many other chunks finish meanwhile.
    pub fn with_chunk_deadline(mut self, deadline: Duration) -> Self {
        self.chunk_deadline = Some(deadline);
        self
    }

    pub fn with_shm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shm_dir = Some(dir.into());
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.get()
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn chunk_deadline(&self) -> Option<Duration> {
        self.chunk_deadline
    }

    pub fn shm_dir(&self) -> Option<&PathBuf> {
        self.shm_dir.as_ref()
    }

    fn merge(mut self, raw: RawConfig) -> Result<Self> {
        if let Some(size) = raw.chunk_size {
            self.chunk_size = positive("chunk_size", size)?;
        }
        if let Some(count) = raw.worker_count {
            self.worker_count = positive("worker_count", count)?;
        }
        if let Some(metric) = raw.metric {
            self.metric = metric.parse()?;
        }
        if let Some(ms) = raw.chunk_deadline_ms {
            if ms == 0 {
                return Err(EngineErr::invalid("chunk_deadline_ms", "must be positive"));
            }
            self.chunk_deadline = Some(Duration::from_millis(ms));
        }
        if raw.shm_dir.is_some() {
            self.shm_dir = raw.shm_dir;
        }

        Ok(self)
    }
}

fn positive(name: &'static str, value: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value).ok_or_else(|| EngineErr::invalid(name, "must be a positive integer"))
}

fn env_var<T: FromStr>(key: &'static str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineErr::invalid(key, format!("cannot parse {value:?}"))),
        Err(_) => Ok(None),
    }
}
