// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the cardflow pipeline.
//!
//! Configuration comes exclusively from environment variables (the service
//! is deployed containerised). Loading is split so tests can drive it from
//! a plain map: [`PipelineConfig::from_env`] snapshots the process
//! environment and delegates to [`PipelineConfig::from_vars`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("missing required environment variable: {name}")]
    MissingVar {
        /// Variable name.
        name: &'static str,
    },

    /// A variable is present but unparseable.
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// Human-readable parse failure.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve
/// attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The job timeout is unusually large.
    LargeTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
    /// The free-disk threshold is very low; uploads may fill the disk.
    LowDiskThreshold {
        /// Threshold in bytes.
        bytes: u64,
    },
    /// More than one worker configured against a rasterizer that is a
    /// host-wide singleton.
    MultipleWorkersSharedRasterizer {
        /// Configured worker count.
        workers: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeTimeout { secs } => {
                write!(f, "JOB_TIMEOUT_SECONDS is large ({secs}s)")
            }
            ConfigWarning::LowDiskThreshold { bytes } => {
                write!(f, "MIN_FREE_DISK_BYTES is very low ({bytes} bytes)")
            }
            ConfigWarning::MultipleWorkersSharedRasterizer { workers } => {
                write!(
                    f,
                    "{workers} workers configured; reduce WORKERS to 1 if the rasterizer is a host-wide singleton"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Top-level runtime configuration.
///
/// Secrets are excluded from the serialized form so the config snapshot can
/// be echoed by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// HTTP listen port (`PORT`, default 8000).
    pub port: u16,
    /// Worker task count (`WORKERS`, default 3).
    pub workers: usize,
    /// Waiting-queue capacity (`QUEUE_CAPACITY`, default 16).
    pub queue_capacity: usize,
    /// Upload size limit (`MAX_UPLOAD_BYTES`, default 100 MiB).
    pub max_upload_bytes: u64,
    /// Record/result TTL (`JOB_TTL_SECONDS`, default 86 400).
    #[serde(serialize_with = "secs")]
    pub job_ttl: Duration,
    /// Per-job wall-clock deadline (`JOB_TIMEOUT_SECONDS`, default 180).
    #[serde(serialize_with = "secs")]
    pub job_timeout: Duration,
    /// Shared API key (`API_KEY`, required).
    #[serde(skip_serializing)]
    pub api_key: String,
    /// HMAC signing secret (`HMAC_SECRET`, required).
    #[serde(skip_serializing)]
    pub hmac_secret: String,
    /// Rasterizer command line (`RASTERIZER_CMD`, required).
    pub rasterizer_cmd: String,
    /// Root of per-job result directories (`RESULT_DIR`).
    pub result_dir: PathBuf,
    /// Directory uploads are spooled into (`INTAKE_DIR`).
    pub intake_dir: PathBuf,
    /// Free-disk floor below which uploads are refused
    /// (`MIN_FREE_DISK_BYTES`, default 512 MiB).
    pub min_free_disk_bytes: u64,
    /// Reaper cadence (`REAP_INTERVAL_SECONDS`, default 300).
    #[serde(serialize_with = "secs")]
    pub reap_interval: Duration,
}

fn secs<S: serde::Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_u64(d.as_secs())
}

impl PipelineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load from an explicit variable map.
    pub fn from_vars(
        vars: &BTreeMap<String, String>,
    ) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        let config = Self {
            port: parse_or(vars, "PORT", 8000)?,
            workers: parse_or(vars, "WORKERS", 3)?,
            queue_capacity: parse_or(vars, "QUEUE_CAPACITY", 16)?,
            max_upload_bytes: parse_or(vars, "MAX_UPLOAD_BYTES", 100 * 1024 * 1024)?,
            job_ttl: Duration::from_secs(parse_or(vars, "JOB_TTL_SECONDS", 86_400)?),
            job_timeout: Duration::from_secs(parse_or(vars, "JOB_TIMEOUT_SECONDS", 180)?),
            api_key: required(vars, "API_KEY")?,
            hmac_secret: required(vars, "HMAC_SECRET")?,
            rasterizer_cmd: required(vars, "RASTERIZER_CMD")?,
            result_dir: PathBuf::from(
                vars.get("RESULT_DIR").map(String::as_str).unwrap_or("results"),
            ),
            intake_dir: PathBuf::from(
                vars.get("INTAKE_DIR").map(String::as_str).unwrap_or("intake"),
            ),
            min_free_disk_bytes: parse_or(vars, "MIN_FREE_DISK_BYTES", 512 * 1024 * 1024)?,
            reap_interval: Duration::from_secs(parse_or(vars, "REAP_INTERVAL_SECONDS", 300)?),
        };

        config.validate()?;
        let warnings = config.warnings();
        Ok((config, warnings))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidVar {
                name: "WORKERS",
                reason: "must be at least 1".into(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidVar {
                name: "QUEUE_CAPACITY",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidVar {
                name: "MAX_UPLOAD_BYTES",
                reason: "must be positive".into(),
            });
        }
        if self.job_timeout.is_zero() {
            return Err(ConfigError::InvalidVar {
                name: "JOB_TIMEOUT_SECONDS",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.job_timeout.as_secs() > 1800 {
            warnings.push(ConfigWarning::LargeTimeout {
                secs: self.job_timeout.as_secs(),
            });
        }
        if self.min_free_disk_bytes < 16 * 1024 * 1024 {
            warnings.push(ConfigWarning::LowDiskThreshold {
                bytes: self.min_free_disk_bytes,
            });
        }
        if self.workers > 1 {
            warnings.push(ConfigWarning::MultipleWorkersSharedRasterizer {
                workers: self.workers,
            });
        }
        warnings
    }
}

fn required(vars: &BTreeMap<String, String>, name: &'static str) -> Result<String, ConfigError> {
    match vars.get(name) {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(ConfigError::MissingVar { name }),
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &BTreeMap<String, String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
