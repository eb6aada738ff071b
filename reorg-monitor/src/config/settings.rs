//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files.

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Default cache retention bound, within the spec's recommended 200-1000 range.
const DEFAULT_MAX_BLOCKS: u32 = 1000;

/// Root configuration structure.
///
/// Mirrors the recognized options table: upstream URI list, optional status
/// listen address, the simulate-blocks toggle, cache retention bound, and
/// debug verbosity.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Upstream node endpoints to subscribe to. One feed per entry.
    pub upstream_uris: Vec<String>,
    /// Optional address for the (external) status HTTP endpoint.
    pub listen_address: Option<String>,
    /// Toggles the external block-simulation collaborator. The core engine
    /// itself ignores this; it is read and handed to that collaborator.
    pub simulate_blocks: bool,
    /// Cache retention bound, in blocks.
    pub max_blocks: u32,
    /// Verbose logging.
    pub debug: bool,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Precedence, later overriding earlier:
    /// 1. Built-in defaults
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (if present)
    /// 4. Environment variables with a `REORG_MONITOR_` prefix (`__` as the
    ///    nesting separator)
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("upstream_uris", Vec::<String>::new())?
            .set_default("listen_address", Option::<String>::None)?
            .set_default("simulate_blocks", false)?
            .set_default("max_blocks", DEFAULT_MAX_BLOCKS)?
            .set_default("debug", false)?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("REORG_MONITOR")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings, returning every violation found (not just the
    /// first).
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.upstream_uris.is_empty() {
            errors.push("upstream_uris must contain at least one URI".into());
        }
        if self.max_blocks == 0 {
            errors.push("max_blocks must be non-zero".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        Settings {
            upstream_uris: vec!["ws://localhost:8546".into()],
            listen_address: None,
            simulate_blocks: false,
            max_blocks: DEFAULT_MAX_BLOCKS,
            debug: false,
        }
    }

    #[test]
    fn validation_passes_for_valid_settings() {
        assert!(valid_settings().validate().is_ok());
    }

    #[test]
    fn validation_catches_empty_upstream_list() {
        let mut settings = valid_settings();
        settings.upstream_uris.clear();

        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("upstream_uris")));
    }

    #[test]
    fn validation_catches_zero_max_blocks() {
        let mut settings = valid_settings();
        settings.max_blocks = 0;

        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_blocks")));
    }

    #[test]
    fn default_max_blocks_within_spec_range() {
        assert!((200..=1000).contains(&DEFAULT_MAX_BLOCKS));
    }
}
