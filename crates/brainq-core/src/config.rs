//! Configuration for the queue and the segmentation toolchain.
//!
//! Loaded from TOML; every field has a default so a partial file (or no file)
//! works. Toolchain paths are checked once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read `path` if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Scheduling limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Worker pool size; at most this many tasks process at once.
    pub max_concurrent: usize,

    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,

    pub retry: RetryPolicy,

    /// Longest a single attempt may run before it is failed for good.
    #[serde(with = "duration_secs")]
    pub process_timeout: Duration,

    /// How long shutdown waits for in-flight tasks before aborting them.
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_retries: 3,
            retry: RetryPolicy::default(),
            process_timeout: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_concurrent must be at least 1".into(),
            ));
        }
        if self.process_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "queue.process_timeout must be positive".into(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "queue.retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        Ok(())
    }
}

/// MATLAB / SPM12 / CAT12 locations and CAT12 options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub matlab_path: PathBuf,
    pub spm_path: PathBuf,
    pub cat12_path: PathBuf,

    /// Cortical surface reconstruction (slow; not needed for volumes).
    pub surface: bool,

    /// Atlas ROI measures.
    pub roi: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            matlab_path: PathBuf::from("/usr/local/MATLAB/bin/matlab"),
            spm_path: PathBuf::from("/opt/spm12"),
            cat12_path: PathBuf::from("/opt/spm12/toolbox/cat12"),
            surface: false,
            roi: true,
        }
    }
}

impl PipelineConfig {
    /// Fails when any toolchain path is missing. Paths must be absolute so
    /// the generated scripts do not depend on a working directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, &Path, bool); 3] = [
            ("MATLAB executable", &self.matlab_path, false),
            ("SPM12 directory", &self.spm_path, true),
            ("CAT12 directory", &self.cat12_path, true),
        ];
        for (name, path, is_dir) in checks {
            if !path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{name} path must be absolute: {}",
                    path.display()
                )));
            }
            let present = if is_dir { path.is_dir() } else { path.is_file() };
            if !present {
                return Err(ConfigError::MissingExecutable {
                    name,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }
}

/// Serde adapter: `Duration` as (fractional) seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.process_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn partial_file_overrides_selected_fields() {
        let config = AppConfig::from_toml_str(
            r#"
            [queue]
            max_concurrent = 4
            process_timeout = 1.5

            [queue.retry]
            base_delay = 0

            [pipeline]
            matlab_path = "/opt/matlab/bin/matlab"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.max_concurrent, 4);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.process_timeout, Duration::from_millis(1500));
        assert_eq!(config.queue.retry.base_delay, Duration::ZERO);
        assert_eq!(config.queue.retry.multiplier, 2.0);
        assert_eq!(
            config.pipeline.matlab_path,
            PathBuf::from("/opt/matlab/bin/matlab")
        );
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = AppConfig::from_toml_str("[queue\nmax_concurrent = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = QueueConfig {
            max_concurrent: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let mut config = QueueConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_toolchain_is_fatal() {
        let config = PipelineConfig {
            matlab_path: PathBuf::from("/definitely/not/here/matlab"),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingExecutable { .. })
        ));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let config = PipelineConfig {
            matlab_path: PathBuf::from("bin/matlab"),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn existing_toolchain_validates() {
        let dir = tempfile::tempdir().unwrap();
        let matlab = dir.path().join("matlab");
        std::fs::write(&matlab, "#!/bin/sh\n").unwrap();
        let spm = dir.path().join("spm12");
        let cat12 = spm.join("toolbox/cat12");
        std::fs::create_dir_all(&cat12).unwrap();

        let config = PipelineConfig {
            matlab_path: matlab,
            spm_path: spm,
            cat12_path: cat12,
            ..PipelineConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brainq.toml");
        std::fs::write(&path, "[queue]\nmax_retries = 0\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.queue.max_retries, 0);

        let missing = AppConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
