//! Pipeline configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tcadana_cache::CacheConfig;
use tcadana_core::{AnalysisConfig, FormatTag};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// When cache entries belonging to a superseded run fingerprint are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// As soon as a run is seen with a new fingerprint.
    #[default]
    Eager,
    /// Never explicitly; superseded entries age out through LRU eviction.
    Lazy,
}

/// What a run fingerprint covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Relative paths, sizes and modification times.
    #[default]
    Metadata,
    /// Relative paths and full file contents.
    Content,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads (None = rayon default).
    pub threads: Option<usize>,
    /// Cache location, bounds and lock timeout.
    pub cache: CacheConfig,
    /// Disable the cache entirely.
    pub use_cache: bool,
    /// Retry policy for cache writes.
    pub retry: RetryPolicy,
    pub stale_policy: StalePolicy,
    pub fingerprint_mode: FingerprintMode,
    /// Recompute everything, overwriting cached artifacts.
    pub force: bool,
    /// Failure rate above which the batch counts as failed (None = never).
    pub max_failure_rate: Option<f64>,
    /// File extension (without dot) → format, bypassing header sniffing.
    pub extension_formats: BTreeMap<String, FormatTag>,
    /// Parser and metric configuration.
    pub analysis: AnalysisConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            cache: CacheConfig::default(),
            use_cache: true,
            retry: RetryPolicy::default(),
            stale_policy: StalePolicy::default(),
            fingerprint_mode: FingerprintMode::default(),
            force: false,
            max_failure_rate: None,
            extension_formats: BTreeMap::new(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.version != tcadana_core::CONFIG_VERSION {
            return Err(Error::Config(format!(
                "analysis config version {} is not supported (expected {})",
                self.analysis.version,
                tcadana_core::CONFIG_VERSION
            )));
        }
        if self.threads == Some(0) {
            return Err(Error::Config("threads must be at least 1".into()));
        }
        if let Some(rate) = self.max_failure_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::Config(format!("max_failure_rate {} is outside [0, 1]", rate)));
            }
        }
        if self.analysis.metrics.chunk_size == 0 {
            return Err(Error::Config("metrics.chunk_size must be positive".into()));
        }
        Ok(())
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_cache_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache.root = root.into();
        self
    }

    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn with_fingerprint_mode(mut self, mode: FingerprintMode) -> Self {
        self.fingerprint_mode = mode;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_max_failure_rate(mut self, rate: Option<f64>) -> Self {
        self.max_failure_rate = rate;
        self
    }

    pub fn with_extension_format(mut self, extension: impl Into<String>, format: FormatTag) -> Self {
        self.extension_formats
            .insert(extension.into().trim_start_matches('.').to_ascii_lowercase(), format);
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    /// Format forced for `path` by its extension, if any.
    pub fn format_override(&self, path: &Path) -> Option<FormatTag> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extension_formats.get(&ext).copied()
    }
}
