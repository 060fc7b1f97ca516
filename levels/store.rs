//! # Level Store
//!
//! A frozen, replayable record of a selected level set. It is written once by a training
//! call and only ever read afterwards; a new training run replaces it wholesale.
//! Saved as human-readable TOML.

use crate::config::SelectionConfig;
use crate::data::ColumnRoles;
use crate::encode::FillConfig;
use crate::select::ConfigurationError;
use crate::types::SelectedLevelSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Newest artifact layout this build reads and writes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    ARTIFACT_FORMAT_VERSION
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write level store file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML level store file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize level store to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Level store format version {found} is newer than the supported version {supported}."
    )]
    UnsupportedVersion { found: u32, supported: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelStoreArtifact {
    #[serde(default = "default_format_version")]
    format_version: u32,
    #[serde(default)]
    created_by: String,
    columns: ColumnRoles,
    config: SelectionConfig,
    #[serde(default)]
    fill: FillConfig,
    levels: SelectedLevelSet,
}

impl LevelStoreArtifact {
    pub fn new(
        columns: ColumnRoles,
        config: SelectionConfig,
        fill: FillConfig,
        levels: SelectedLevelSet,
    ) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            created_by: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
                .to_string(),
            columns,
            config,
            fill,
            levels,
        }
    }

    pub fn grouping_attribute(&self) -> &str {
        &self.columns.grouping_attribute
    }

    pub fn outcome(&self) -> &str {
        &self.columns.outcome
    }

    pub fn columns(&self) -> &ColumnRoles {
        &self.columns
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn fill(&self) -> &FillConfig {
        &self.fill
    }

    pub fn levels(&self) -> &SelectedLevelSet {
        &self.levels
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// Fails unless this artifact was built for `grouping_attribute`.
    pub fn check_grouping_attribute(
        &self,
        grouping_attribute: &str,
    ) -> Result<(), ConfigurationError> {
        if self.columns.grouping_attribute == grouping_attribute {
            Ok(())
        } else {
            Err(ConfigurationError::GroupingAttributeMismatch {
                stored: self.columns.grouping_attribute.clone(),
                requested: grouping_attribute.to_string(),
            })
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ArtifactError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ArtifactError> {
        let artifact: Self = toml::from_str(text)?;
        if artifact.format_version > ARTIFACT_FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found: artifact.format_version,
                supported: ARTIFACT_FORMAT_VERSION,
            });
        }
        Ok(artifact)
    }

    /// Saves the artifact to a file in TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let toml_string = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads an artifact from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }
}
