#![forbid(unsafe_code)]

//! TOML settings for building optimizers.
//!
//! ```toml
//! [context]
//! supports_lazy_loading = true
//! performance_threshold = 7.5
//!
//! [context.field_sizes]
//! body = 4096
//!
//! [verification]
//! equivalence = "strict"            # or "allow_documented_pruning"
//!
//! [field_selection]
//! mode = "prune"                    # or "flag"
//! keep = 8
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::context::OptimizationContext;
use crate::optimizer::ProjectionOptimizer;
use crate::strategy::FieldSelectionMode;
use crate::verify::EquivalencePolicy;

/// Validated optimizer settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptimizerSettings {
    path: Option<PathBuf>,
    /// Context handed to `optimize` calls.
    pub context: OptimizationContext,
    /// Verification equivalence policy.
    pub equivalence: EquivalencePolicy,
    /// Field selection mode.
    pub field_selection: FieldSelectionMode,
}

impl OptimizerSettings {
    /// Loads settings from `explicit`, else from [`default_config_path`].
    ///
    /// A missing file yields the defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let raw = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let mut settings = convert(raw)?;
        let shown = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        info!(
            path = %shown,
            found = path.as_ref().is_some_and(|p| p.exists()),
            equivalence = ?settings.equivalence,
            field_selection = ?settings.field_selection,
            "config.load"
        );
        settings.path = path;
        Ok(settings)
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        convert(raw)
    }

    /// File the settings were loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes the settings to `target` as TOML, creating parent directories.
    pub fn persist(&self, target: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = toml::to_string_pretty(&RawConfig::from(self))
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(target, serialized).map_err(|source| ConfigError::Write {
            path: target.to_path_buf(),
            source,
        })
    }

    /// Builds a projection optimizer with these settings.
    pub fn build_optimizer(&self) -> ProjectionOptimizer {
        ProjectionOptimizer::builder()
            .field_selection(self.field_selection)
            .equivalence(self.equivalence)
            .build()
    }
}

/// Default settings location: `<config dir>/reverify/optimizer.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("reverify").join("optimizer.toml"))
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn convert(raw: RawConfig) -> Result<OptimizerSettings, ConfigError> {
    if !raw.context.performance_threshold.is_finite() {
        return Err(ConfigError::InvalidValue {
            key: "context.performance_threshold",
            value: raw.context.performance_threshold.to_string(),
        });
    }
    let equivalence = match raw.verification.equivalence.as_deref() {
        None | Some("strict") => EquivalencePolicy::Strict,
        Some("allow_documented_pruning") => EquivalencePolicy::AllowDocumentedPruning,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                key: "verification.equivalence",
                value: other.to_string(),
            })
        }
    };
    let field_selection = match (raw.field_selection.mode.as_deref(), raw.field_selection.keep) {
        (None | Some("flag"), _) => FieldSelectionMode::Flag,
        (Some("prune"), Some(keep)) => FieldSelectionMode::Prune { keep },
        (Some("prune"), None) => {
            return Err(ConfigError::InvalidValue {
                key: "field_selection.keep",
                value: "missing".to_string(),
            })
        }
        (Some(other), _) => {
            return Err(ConfigError::InvalidValue {
                key: "field_selection.mode",
                value: other.to_string(),
            })
        }
    };
    Ok(OptimizerSettings {
        path: None,
        context: raw.context,
        equivalence,
        field_selection,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    context: OptimizationContext,
    #[serde(default)]
    verification: RawVerification,
    #[serde(default)]
    field_selection: RawFieldSelection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawVerification {
    equivalence: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawFieldSelection {
    mode: Option<String>,
    keep: Option<usize>,
}

impl From<&OptimizerSettings> for RawConfig {
    fn from(settings: &OptimizerSettings) -> Self {
        let equivalence = match settings.equivalence {
            EquivalencePolicy::Strict => "strict",
            EquivalencePolicy::AllowDocumentedPruning => "allow_documented_pruning",
        };
        let field_selection = match settings.field_selection {
            FieldSelectionMode::Flag => RawFieldSelection {
                mode: Some("flag".to_string()),
                keep: None,
            },
            FieldSelectionMode::Prune { keep } => RawFieldSelection {
                mode: Some("prune".to_string()),
                keep: Some(keep),
            },
        };
        RawConfig {
            context: settings.context.clone(),
            verification: RawVerification {
                equivalence: Some(equivalence.to_string()),
            },
            field_selection,
        }
    }
}

/// Errors raised while loading or writing settings files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read optimizer config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse optimizer config {path}: {source}")]
    Parse {
        /// File path, empty for in-memory text.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A key holds an unsupported value.
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Dotted key.
        key: &'static str,
        /// Offending value.
        value: String,
    },
    /// The settings could not be rendered as TOML.
    #[error("failed to serialize optimizer config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// The file could not be written.
    #[error("failed to write optimizer config {path}: {source}")]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The parent directory could not be created.
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "ConfigRead",
            ConfigError::Parse { .. } => "ConfigParse",
            ConfigError::InvalidValue { .. } => "ConfigInvalidValue",
            ConfigError::Serialize { .. } => "ConfigSerialize",
            ConfigError::Write { .. } => "ConfigWrite",
            ConfigError::CreateDir { .. } => "ConfigCreateDir",
        }
    }
}
