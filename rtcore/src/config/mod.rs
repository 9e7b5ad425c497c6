//! Runtime configuration
//!
//! Settings for the collector budget and the evaluator's call depth. Every
//! field has a default, so a TOML file only needs to name what it changes:
//!
//! ```toml
//! max_call_depth = 512
//!
//! [gc]
//! initial_threshold = 8192
//! max_heap_slots = 2000000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Collector budget, counted in live heap slots (values, environments and
/// promises together).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Live slots at which the first tracing pass runs
    pub initial_threshold: usize,
    /// Floor for the threshold recomputed after each triggered pass
    pub min_threshold: usize,
    /// Next threshold is `live * growth_factor`
    pub growth_factor: usize,
    /// Hard limit; a pass that cannot get below it is fatal
    pub max_heap_slots: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 4096,
            min_threshold: 1024,
            growth_factor: 2,
            max_heap_slots: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Nested closure calls allowed before `StackOverflow`
    pub max_call_depth: usize,
    pub gc: GcConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            gc: GcConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let gc = &self.gc;
        if gc.initial_threshold == 0 || gc.min_threshold == 0 {
            return Err(ConfigError::Invalid(
                "gc thresholds must be greater than zero".to_string(),
            ));
        }
        if gc.growth_factor < 1 {
            return Err(ConfigError::Invalid(
                "gc.growth_factor must be at least 1".to_string(),
            ));
        }
        if gc.max_heap_slots < gc.initial_threshold {
            return Err(ConfigError::Invalid(format!(
                "gc.max_heap_slots ({}) is below gc.initial_threshold ({})",
                gc.max_heap_slots, gc.initial_threshold
            )));
        }
        if self.max_call_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_call_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(RuntimeConfig::from_toml_str("").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            max_call_depth = 64

            [gc]
            initial_threshold = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.gc.initial_threshold, 16);
        assert_eq!(config.gc.growth_factor, GcConfig::default().growth_factor);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        for doc in [
            "[gc]\ngrowth_factor = 0",
            "[gc]\ninitial_threshold = 0",
            "[gc]\ninitial_threshold = 100\nmax_heap_slots = 10",
            "max_call_depth = 0",
        ] {
            assert!(
                matches!(RuntimeConfig::from_toml_str(doc), Err(ConfigError::Invalid(_))),
                "accepted {:?}",
                doc
            );
        }
        assert!(matches!(
            RuntimeConfig::from_toml_str("max_call_depth = \"deep\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.toml");
        let mut config = RuntimeConfig::default();
        config.gc.max_heap_slots = 50_000;
        config.max_call_depth = 32;
        config.save_to_file(&path).unwrap();
        assert_eq!(RuntimeConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RuntimeConfig::from_file(dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
