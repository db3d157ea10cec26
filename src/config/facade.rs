//! Config loading entry points.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::StoryloomConfig;
use crate::error::ApiError;
use config::{ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace from every layered source.
    pub fn load(workspace_root: &Path) -> Result<StoryloomConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);

        let config: StoryloomConfig = builder.build()?.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from one explicit file on top of the defaults.
    /// Environment overrides still apply.
    pub fn load_from_file(path: &Path) -> Result<StoryloomConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true));
        let builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Load from `config_path` when given, else from the workspace layers,
    /// then validate.
    pub fn load_validated(
        workspace_root: &Path,
        config_path: Option<&Path>,
    ) -> Result<StoryloomConfig, ApiError> {
        let config = match config_path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(workspace_root),
        }
        .map_err(|e| ApiError::ConfigError(format!("Failed to load config: {}", e)))?;

        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(config)
    }

    /// Path of the user-level config file, when a home directory is known.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
