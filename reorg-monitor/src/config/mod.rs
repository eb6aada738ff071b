//! Configuration loading and validation for the reorg-detection engine.
//!
//! Configuration is loaded from multiple sources in order of precedence:
//! 1. Environment variables (highest)
//! 2. Environment-specific file (e.g., `development.toml`)
//! 3. Default file (`default.toml`)
//!
//! # Example
//!
//! ```ignore
//! use reorg_monitor::config::Settings;
//!
//! let settings = Settings::load("development")?;
//! println!("upstreams: {:?}", settings.upstream_uris);
//! ```

mod settings;

pub use settings::Settings;
