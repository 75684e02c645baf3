//! # Unified Application Configuration
//!
//! This module provides a centralized configuration system that consolidates
//! all settings for the recognition pipeline and categorizer into a single,
//! structured configuration object. It supports loading from environment
//! variables, validation, and provides a clean interface for accessing
//! configuration throughout the application.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Parse an environment variable, falling back to a default when unset.
fn env_parse<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Image preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Maximum width or height in pixels; larger images are downscaled,
    /// smaller images are never upscaled
    pub max_dimension: u32,
    /// JPEG re-encode quality (1-100)
    pub jpeg_quality: u8,
    /// Fraction of darkest/brightest pixels clipped when stretching contrast
    pub contrast_clip_fraction: f32,
    /// Unsharp mask blur sigma
    pub sharpen_sigma: f32,
    /// Unsharp mask threshold
    pub sharpen_threshold: i32,
    /// Gamma correction factor; values above 1.0 brighten midtones
    pub gamma: f32,
    /// Maximum accepted input image size in bytes
    pub max_input_bytes: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_dimension: 2048,
            jpeg_quality: 90,
            contrast_clip_fraction: 0.01,
            sharpen_sigma: 1.0,
            sharpen_threshold: 4,
            gamma: 1.1,
            max_input_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl PreprocessConfig {
    /// Load preprocessing configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_dimension: env_parse("PREPROCESS_MAX_DIMENSION", defaults.max_dimension)?,
            jpeg_quality: env_parse("PREPROCESS_JPEG_QUALITY", defaults.jpeg_quality)?,
            contrast_clip_fraction: env_parse(
                "PREPROCESS_CONTRAST_CLIP_FRACTION",
                defaults.contrast_clip_fraction,
            )?,
            sharpen_sigma: env_parse("PREPROCESS_SHARPEN_SIGMA", defaults.sharpen_sigma)?,
            sharpen_threshold: env_parse("PREPROCESS_SHARPEN_THRESHOLD", defaults.sharpen_threshold)?,
            gamma: env_parse("PREPROCESS_GAMMA", defaults.gamma)?,
            max_input_bytes: env_parse("PREPROCESS_MAX_INPUT_BYTES", defaults.max_input_bytes)?,
        })
    }

    /// Validate preprocessing configuration
    pub fn validate(&self) -> AppResult<()> {
        if !(256..=8192).contains(&self.max_dimension) {
            return Err(AppError::Config(
                "max_dimension must be between 256 and 8192 pixels".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(AppError::Config(
                "jpeg_quality must be between 1 and 100".to_string(),
            ));
        }
        if !(0.0..0.5).contains(&self.contrast_clip_fraction) {
            return Err(AppError::Config(
                "contrast_clip_fraction must be in [0.0, 0.5)".to_string(),
            ));
        }
        if self.sharpen_sigma <= 0.0 {
            return Err(AppError::Config(
                "sharpen_sigma must be greater than 0".to_string(),
            ));
        }
        if !(0.1..=5.0).contains(&self.gamma) {
            return Err(AppError::Config(
                "gamma must be between 0.1 and 5.0".to_string(),
            ));
        }
        if self.max_input_bytes == 0 {
            return Err(AppError::Config(
                "max_input_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recognition cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached recognition results in seconds
    pub recognition_ttl_secs: u64,
    /// Maximum number of cached recognition results
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recognition_ttl_secs: 30 * 60, // 30 minutes
            max_entries: 1024,
        }
    }
}

impl CacheConfig {
    /// Load cache configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            recognition_ttl_secs: env_parse(
                "RECOGNITION_CACHE_TTL_SECS",
                defaults.recognition_ttl_secs,
            )?,
            max_entries: env_parse("RECOGNITION_CACHE_MAX_ENTRIES", defaults.max_entries)?,
        })
    }

    /// Validate cache configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.recognition_ttl_secs == 0 {
            return Err(AppError::Config(
                "recognition_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(AppError::Config(
                "max_entries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum number of concurrent recognition workers
    pub max_workers: usize,
    /// Resident memory threshold in bytes above which dequeued tasks are delayed
    pub memory_threshold_bytes: u64,
    /// Cooldown delay in milliseconds applied under memory pressure
    pub cooldown_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            memory_threshold_bytes: 512 * 1024 * 1024, // 512MB
            cooldown_ms: 1000,
        }
    }
}

impl WorkerPoolConfig {
    /// Load worker pool configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        let threshold_mb = env_parse(
            "RECOGNITION_MEMORY_THRESHOLD_MB",
            defaults.memory_threshold_bytes / (1024 * 1024),
        )?;
        Ok(Self {
            max_workers: env_parse("MAX_RECOGNITION_WORKERS", defaults.max_workers)?,
            memory_threshold_bytes: threshold_mb * 1024 * 1024,
            cooldown_ms: env_parse("RECOGNITION_COOLDOWN_MS", defaults.cooldown_ms)?,
        })
    }

    /// Validate worker pool configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.max_workers == 0 {
            return Err(AppError::Config(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if self.max_workers > 64 {
            return Err(AppError::Config(
                "max_workers cannot be greater than 64".to_string(),
            ));
        }
        if self.memory_threshold_bytes == 0 {
            return Err(AppError::Config(
                "memory_threshold_bytes must be greater than 0".to_string(),
            ));
        }
        if self.cooldown_ms > 60_000 {
            return Err(AppError::Config(
                "cooldown_ms cannot be greater than 60000".to_string(),
            ));
        }
        Ok(())
    }
}

/// Smart categorizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizerConfig {
    /// Minimum score for a prediction to be considered confident
    pub confidence_threshold: f64,
    /// Maximum number of recent transactions used to build a user profile
    pub history_limit: usize,
    /// Maximum number of similar transactions tallied for the history signal
    pub similar_transaction_limit: usize,
    /// Default number of suggestions returned when the caller gives no limit
    pub default_suggestion_limit: usize,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            history_limit: 100,
            similar_transaction_limit: 10,
            default_suggestion_limit: 5,
        }
    }
}

impl CategorizerConfig {
    /// Load categorizer configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            confidence_threshold: env_parse(
                "CATEGORY_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            )?,
            history_limit: env_parse("CATEGORY_HISTORY_LIMIT", defaults.history_limit)?,
            similar_transaction_limit: env_parse(
                "CATEGORY_SIMILAR_TRANSACTION_LIMIT",
                defaults.similar_transaction_limit,
            )?,
            default_suggestion_limit: env_parse(
                "CATEGORY_SUGGESTION_LIMIT",
                defaults.default_suggestion_limit,
            )?,
        })
    }

    /// Validate categorizer configuration
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) || self.confidence_threshold == 0.0 {
            return Err(AppError::Config(
                "confidence_threshold must be in (0.0, 1.0]".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(AppError::Config(
                "history_limit must be greater than 0".to_string(),
            ));
        }
        if self.similar_transaction_limit == 0 {
            return Err(AppError::Config(
                "similar_transaction_limit must be greater than 0".to_string(),
            ));
        }
        if self.default_suggestion_limit == 0 {
            return Err(AppError::Config(
                "default_suggestion_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Unified application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Image preprocessing settings
    pub preprocess: PreprocessConfig,
    /// Recognition cache settings
    pub cache: CacheConfig,
    /// Worker pool settings
    pub pool: WorkerPoolConfig,
    /// Smart categorizer settings
    pub categorizer: CategorizerConfig,
}

impl AppConfig {
    /// Load the full configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            preprocess: PreprocessConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            pool: WorkerPoolConfig::from_env()?,
            categorizer: CategorizerConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> AppResult<()> {
        self.preprocess.validate()?;
        self.cache.validate()?;
        self.pool.validate()?;
        self.categorizer.validate()?;
        Ok(())
    }
}
