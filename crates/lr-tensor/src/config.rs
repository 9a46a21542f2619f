//! Process-wide runtime configuration.
//!
//! The configuration is set at most once. [`init`] installs an explicit
//! value; otherwise the first call to [`get`] latches the values read from
//! the environment (`LR_CONTENT_DIR`, `LR_DEFAULT_DEVICE`,
//! `LR_DEFAULT_SCALAR_TYPE`), falling back to the defaults.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use lr_engine::Options;
use thiserror::Error;

use crate::scalar::{DeviceType, ScalarType};

pub const CONTENT_DIR_ENV: &str = "LR_CONTENT_DIR";
pub const DEFAULT_DEVICE_ENV: &str = "LR_DEFAULT_DEVICE";
pub const DEFAULT_SCALAR_TYPE_ENV: &str = "LR_DEFAULT_SCALAR_TYPE";

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("runtime configuration is already initialized")]
    AlreadyInitialized,
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
    #[error("default {0} must not be Undefined")]
    UndefinedDefault(&'static str),
}

/// Defaults applied by factories and file operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Root that relative archive paths resolve against.
    pub content_dir: PathBuf,
    pub default_device: DeviceType,
    pub default_scalar_type: ScalarType,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            content_dir: PathBuf::from("."),
            default_device: DeviceType::Cpu,
            default_scalar_type: ScalarType::Float,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by any environment variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = RuntimeConfig::default();
        if let Ok(dir) = std::env::var(CONTENT_DIR_ENV) {
            config.content_dir = PathBuf::from(dir);
        }
        if let Ok(device) = std::env::var(DEFAULT_DEVICE_ENV) {
            config.default_device = device.parse().map_err(|reason| ConfigError::InvalidEnv {
                var: DEFAULT_DEVICE_ENV,
                reason,
            })?;
        }
        if let Ok(scalar) = std::env::var(DEFAULT_SCALAR_TYPE_ENV) {
            config.default_scalar_type =
                scalar.parse().map_err(|reason| ConfigError::InvalidEnv {
                    var: DEFAULT_SCALAR_TYPE_ENV,
                    reason,
                })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_device == DeviceType::Undefined {
            return Err(ConfigError::UndefinedDefault("device"));
        }
        if self.default_scalar_type == ScalarType::Undefined {
            return Err(ConfigError::UndefinedDefault("scalar type"));
        }
        Ok(())
    }

    /// Resolves `relative` against the content directory. Absolute paths
    /// are returned unchanged.
    pub fn content_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.content_dir.join(relative)
    }

    /// Native factory options for the configured defaults.
    pub fn default_options(&self) -> crate::Result<Options> {
        Ok(Options::new(
            self.default_scalar_type.to_native()?,
            self.default_device.to_native()?,
        ))
    }
}

/// Installs `config` as the process-wide configuration.
///
/// # Errors
/// Fails if a configuration was already installed or latched by [`get`].
pub fn init(config: RuntimeConfig) -> Result<(), ConfigError> {
    config.validate()?;
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    tracing::debug!(config = ?get(), "runtime configuration initialized");
    Ok(())
}

/// The process-wide configuration.
pub fn get() -> &'static RuntimeConfig {
    CONFIG.get_or_init(|| {
        RuntimeConfig::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring environment configuration");
            RuntimeConfig::default()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lr_engine::{Device, Kind};

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.content_dir, PathBuf::from("."));
        let opts = config.default_options().unwrap();
        assert_eq!(opts.kind, Kind::Float32);
        assert_eq!(opts.device, Device::Cpu);
    }

    #[test]
    fn test_content_path() {
        let config = RuntimeConfig {
            content_dir: PathBuf::from("/data/content"),
            ..RuntimeConfig::default()
        };
        assert_eq!(
            config.content_path("nets/bn.lrar"),
            PathBuf::from("/data/content/nets/bn.lrar")
        );
    }

    #[test]
    fn test_validate_rejects_undefined() {
        let config = RuntimeConfig {
            default_scalar_type: ScalarType::Undefined,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(init(config).is_err());
    }
}
