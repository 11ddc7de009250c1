use crate::distance::PairMode;
use crate::error::ConfigError;
use crate::metric::{Metric, Threshold};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Worker count used when none is configured.
pub fn default_workers() -> usize {
    num_cpus::get() / 4 + 1
}

/// Settings shared by every operating mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of the distance worker pool.
    pub workers: usize,
    /// Draw progress bars on stderr.
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            show_progress: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    pub fn build_pool(&self) -> Result<ThreadPool, ConfigError> {
        self.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("simbucket-worker-{}", i))
            .build()?;
        Ok(pool)
    }

    pub(crate) fn progress_bar(&self, len: u64, message: &'static str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::with_template("{msg} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}]")
        {
            bar.set_style(style);
        }
        bar.set_message(message);
        bar
    }
}

/// Greedy bucketing ("pachinko") settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Name of a built-in metric, see [`Metric::by_name`].
    pub metric: String,
    pub threshold: f64,
    /// Buckets smaller than this are dropped from the result.
    pub min_bucket_size: usize,
    /// Full mode evaluates both orderings, which matters for asymmetric
    /// metrics such as Chi-Squared.
    pub pair_mode: PairMode,
    /// Directory for JSON trace dumps, if any.
    pub trace_dir: Option<PathBuf>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            metric: "Chi-Squared".to_string(),
            threshold: 0.0,
            min_bucket_size: 0,
            pair_mode: PairMode::Full,
            trace_dir: None,
        }
    }
}

impl BucketConfig {
    pub fn metric(&self) -> Result<Metric, ConfigError> {
        Ok(Metric::by_name(&self.metric)?)
    }

    pub fn threshold(&self) -> Result<Threshold, ConfigError> {
        if !self.threshold.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        Ok(Threshold::for_metric(self.threshold, &self.metric()?))
    }
}

/// Duplicate detection settings. Always Chi-Squared with a `<=` cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub threshold: f64,
    pub trace_dir: Option<PathBuf>,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            trace_dir: None,
        }
    }
}

impl DedupeConfig {
    pub fn metric(&self) -> Metric {
        Metric::chi_squared()
    }

    pub fn threshold(&self) -> Result<Threshold, ConfigError> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "dedupe threshold must be a non-negative number, got {}",
                self.threshold
            )));
        }
        Ok(Threshold::for_metric(self.threshold, &self.metric()))
    }
}

/// Nearest-center assignment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearestConfig {
    pub metric: String,
    pub trace_dir: Option<PathBuf>,
}

impl Default for NearestConfig {
    fn default() -> Self {
        Self {
            metric: "Chi-Squared".to_string(),
            trace_dir: None,
        }
    }
}

impl NearestConfig {
    pub fn metric(&self) -> Result<Metric, ConfigError> {
        Ok(Metric::by_name(&self.metric)?)
    }
}

/// Parse any of the config types from JSON.
pub fn from_json_str<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

pub fn from_path<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path)?;
    from_json_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Direction;
    use tempfile::TempDir;

    #[test]
    fn test_default_workers_positive() {
        let config = EngineConfig::default();
        assert!(config.workers >= 1);
        assert!(!config.show_progress);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig {
            workers: 0,
            show_progress: false,
        };
        assert!(matches!(config.build_pool(), Err(ConfigError::NoWorkers)));
    }

    #[test]
    fn test_pool_has_requested_threads() {
        let config = EngineConfig {
            workers: 3,
            show_progress: false,
        };
        let pool = config.build_pool().unwrap();
        assert_eq!(pool.current_num_threads(), 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BucketConfig = from_json_str(r#"{ "threshold": 0.25 }"#).unwrap();
        assert_eq!(config.threshold, 0.25);
        assert_eq!(config.metric, "Chi-Squared");
        assert_eq!(config.min_bucket_size, 0);
        assert_eq!(config.pair_mode, PairMode::Full);
        assert!(config.trace_dir.is_none());
    }

    #[test]
    fn test_threshold_direction_follows_metric() {
        let config = BucketConfig {
            metric: "Correlation".to_string(),
            threshold: 0.9,
            ..Default::default()
        };
        let threshold = config.threshold().unwrap();
        assert_eq!(threshold.direction, Direction::Descending);
        assert!(threshold.accepts(0.95));
    }

    #[test]
    fn test_unknown_metric_in_config() {
        let config = BucketConfig {
            metric: "Cosine".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.metric(), Err(ConfigError::Metric(_))));
    }

    #[test]
    fn test_negative_dedupe_threshold_rejected() {
        let config = DedupeConfig {
            threshold: -1.0,
            trace_dir: None,
        };
        assert!(matches!(config.threshold(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        fs::write(&path, r#"{ "workers": 2, "show_progress": true }"#).unwrap();

        let config: EngineConfig = from_path(&path).unwrap();
        assert_eq!(config.workers, 2);
        assert!(config.show_progress);

        let missing: Result<EngineConfig, _> = from_path(&temp_dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
