//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `InspectionBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("line.toml")).unwrap();
//! println!("Channels: {}", blueprint.channel_count());
//! ```

mod parser;
mod validator;

pub use contracts::InspectionBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;
use tracing::{debug, instrument};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    #[instrument(name = "config_load_from_path", fields(path = %path.display()))]
    pub fn load_from_path(path: &Path) -> Result<InspectionBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let blueprint = Self::load_from_str(&content, format)?;
        debug!(
            channels = blueprint.channel_count(),
            sinks = blueprint.sinks.len(),
            "Configuration loaded"
        );
        Ok(blueprint)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<InspectionBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Validate an already-built blueprint (e.g. after CLI overrides)
    pub fn validate(blueprint: &InspectionBlueprint) -> Result<(), ContractError> {
        validator::validate(blueprint)
    }

    pub fn to_toml(blueprint: &InspectionBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    pub fn to_json(blueprint: &InspectionBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}
