//! Selection settings. A copy travels inside every stored level set so a replay can report
//! exactly how its levels were chosen.

use crate::scoring::{DEFAULT_COHESION_WEIGHT, ZeroVariancePolicy};
use crate::select::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Level budget used when none is given.
pub const DEFAULT_N_LEVELS: usize = 10;

/// How the outcome column is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Two distinct values, or any non-numeric values, mean classification; otherwise
    /// regression.
    #[default]
    Auto,
    Regression,
    Classification,
}

fn default_n_levels() -> usize {
    DEFAULT_N_LEVELS
}

fn default_cohesion_weight() -> f64 {
    DEFAULT_COHESION_WEIGHT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_n_levels")]
    pub n_levels: usize,
    #[serde(default)]
    pub outcome_kind: OutcomeKind,
    /// Exponent ξ on the class-purity factor. Classification only.
    #[serde(default = "default_cohesion_weight")]
    pub cohesion_weight: f64,
    /// Regression only.
    #[serde(default)]
    pub zero_variance: ZeroVariancePolicy,
    /// Label treated as the positive class. Defaults to the greater of the two observed
    /// labels in natural order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_class: Option<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            n_levels: DEFAULT_N_LEVELS,
            outcome_kind: OutcomeKind::Auto,
            cohesion_weight: DEFAULT_COHESION_WEIGHT,
            zero_variance: ZeroVariancePolicy::Saturate,
            positive_class: None,
        }
    }
}

/// Failures reading a configuration file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigFileError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigurationError),
}

impl SelectionConfig {
    pub fn with_levels(n_levels: usize) -> Self {
        Self {
            n_levels,
            ..Self::default()
        }
    }

    /// Checks everything that can be checked without looking at data.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.n_levels == 0 {
            return Err(ConfigurationError::NonPositiveLevelCount);
        }
        if !self.cohesion_weight.is_finite() || self.cohesion_weight <= 0.0 {
            return Err(ConfigurationError::InvalidCohesionWeight(
                self.cohesion_weight,
            ));
        }
        if let ZeroVariancePolicy::Cap(cap) = self.zero_variance {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(ConfigurationError::InvalidZeroVarianceCap(cap));
            }
        }
        Ok(())
    }

    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}
