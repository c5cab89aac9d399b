//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let profile = std::env::var("SKETCHWIRE_ENV").unwrap_or_else(|_| "development".to_string());

    let config = Config::builder()
        // Embedded defaults, always present
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // Optional files: shared, per profile, then local
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{profile}")).required(false))
        .add_source(File::with_name("config/local").required(false))
        // Environment wins over files,
        // e.g. SKETCHWIRE_SERVER__PORT=9000 or SKETCHWIRE_COLLAB__RATE_LIMIT__ENABLED=false
        .add_source(
            Environment::with_prefix("SKETCHWIRE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let app: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    app.collab
        .validate()
        .context("Invalid collaboration settings")?;
    Ok(app)
}
