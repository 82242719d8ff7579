// Themis Configuration
//
// Defines configuration for the triage pipeline and its background jobs:
// tier thresholds, connector overrides, model endpoints, scheduling
// intervals, and batch sizes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main Themis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemisConfig {
    /// Path to the SQLite database
    pub database_path: String,

    /// Pipeline tier settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Learning loop settings
    #[serde(default)]
    pub learning: LearningConfig,

    /// Background job configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Model caller configuration
    #[serde(default)]
    pub models: ModelsConfig,
}

/// Pipeline tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Connectors whose items are always reviewed individually
    /// (meeting-record sources), short-circuiting every model tier
    pub individual_connectors: Vec<String>,

    /// Sender substrings marking an item as automated, making it eligible
    /// for the fast tier; real-person correspondence skips that tier
    pub automated_sender_markers: Vec<String>,

    /// Connectors whose items are always considered automated
    pub automated_connectors: Vec<String>,

    /// Minimum confidence for accepting a fast-tier result
    pub fast_confidence_threshold: f32,

    /// TTL for the cached guidance-text lookup
    #[serde(with = "serde_duration")]
    pub guidance_cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            individual_connectors: vec!["granola".to_string()],
            automated_sender_markers: vec![
                "no-reply".to_string(),
                "noreply".to_string(),
                "notifications@".to_string(),
                "newsletter@".to_string(),
                "updates@".to_string(),
                "mailer-daemon".to_string(),
            ],
            automated_connectors: vec![],
            fast_confidence_threshold: 0.85,
            guidance_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Learning loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Trailing window of decisions to mine
    #[serde(with = "serde_duration")]
    pub window: Duration,

    /// Minimum confidence for keeping a suggestion
    pub min_confidence: f32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(86400), // 24 hours
            min_confidence: 0.6,
        }
    }
}

/// Background job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Classification pass over unclassified items
    pub classification: JobConfig,

    /// Batch card assignment pass
    pub assignment: JobConfig,

    /// Learning loop
    pub learning: JobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            classification: JobConfig {
                enabled: true,
                interval: Duration::from_secs(300), // 5 minutes
                batch_size: 100,
                max_duration: Duration::from_secs(300),
            },
            assignment: JobConfig {
                enabled: true,
                interval: Duration::from_secs(300),
                batch_size: 500,
                max_duration: Duration::from_secs(120),
            },
            learning: JobConfig {
                enabled: true,
                interval: Duration::from_secs(86400), // 24 hours
                batch_size: 500,
                max_duration: Duration::from_secs(300),
            },
        }
    }
}

/// Configuration for individual background jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Enable/disable this specific job
    pub enabled: bool,

    /// Interval between job runs (in seconds)
    #[serde(with = "serde_duration")]
    pub interval: Duration,

    /// Maximum number of items to process per run
    pub batch_size: usize,

    /// Maximum duration for job execution (in seconds)
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,
}

/// Model caller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Cloud classifier (always configured)
    pub cloud: CloudModelConfig,

    /// Local classifier; None means the fast tier is skipped entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalModelConfig>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cloud: CloudModelConfig::default(),
            local: None,
        }
    }
}

/// Cloud model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudModelConfig {
    /// Model to use
    pub model: String,

    /// Max tokens for responses
    pub max_tokens: usize,

    /// Temperature for sampling
    pub temperature: f32,

    /// Request timeout (in seconds)
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
}

impl Default for CloudModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Local model settings (Ollama-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelConfig {
    /// Endpoint base URL
    pub endpoint: String,

    /// Model to use
    pub model: String,

    /// Request timeout (in seconds)
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for ThemisConfig {
    fn default() -> Self {
        Self {
            database_path: "themis.db".to_string(),
            pipeline: PipelineConfig::default(),
            learning: LearningConfig::default(),
            jobs: JobsConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

impl ThemisConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ThemisConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ThemisConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.pipeline.fast_confidence_threshold) {
            return Err(ConfigError::ValidationError(
                "pipeline: fast_confidence_threshold must be within [0, 1]".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.learning.min_confidence) {
            return Err(ConfigError::ValidationError(
                "learning: min_confidence must be within [0, 1]".to_string(),
            ));
        }

        // A sub-minute window would mine partial passes
        if self.learning.window < Duration::from_secs(60) {
            return Err(ConfigError::ValidationError(
                "learning: window must be at least 1 minute".to_string(),
            ));
        }

        self.validate_job_config("classification", &self.jobs.classification)?;
        self.validate_job_config("assignment", &self.jobs.assignment)?;
        self.validate_job_config("learning", &self.jobs.learning)?;

        Ok(())
    }

    fn validate_job_config(&self, name: &str, config: &JobConfig) -> Result<(), ConfigError> {
        if config.batch_size == 0 || config.batch_size > 10000 {
            return Err(ConfigError::ValidationError(format!(
                "{}: batch_size must be between 1 and 10000",
                name
            )));
        }

        if config.interval < Duration::from_secs(60) {
            return Err(ConfigError::ValidationError(format!(
                "{}: interval must be at least 1 minute",
                name
            )));
        }

        if config.max_duration < Duration::from_secs(10)
            || config.max_duration > Duration::from_secs(1800)
        {
            return Err(ConfigError::ValidationError(format!(
                "{}: max_duration must be between 10 seconds and 30 minutes",
                name
            )));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}
