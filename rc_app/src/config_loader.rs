use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use rc_http::ClientConfig;
use serde::Deserialize;

/// Prefix for environment overrides, e.g. `RC_CLIENT__TIMEOUT_MS=5000`
pub const ENV_PREFIX: &str = "RC";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Top-level application configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfigFile {
    pub client: ClientConfig,

    /// Directory for rolling log files; stdout only when unset
    pub log_dir: Option<String>,
}

/// Load configuration from an optional TOML file with environment overrides
pub fn load_config(path: Option<&Path>) -> Result<AppConfigFile, ConfigError> {
    load_with_env(path, Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator(ENV_SEPARATOR))
}

fn load_with_env(path: Option<&Path>, env: Environment) -> Result<AppConfigFile, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }

    let config = builder.add_source(env.try_parsing(true)).build()?;

    config.try_deserialize()
}

/// Load configuration with fallback to defaults
pub fn load_config_or_default(path: Option<&Path>) -> AppConfigFile {
    match load_config(path) {
        Ok(config) => {
            match path {
                Some(path) => tracing::info!("Loaded config from {}", path.display()),
                None => tracing::info!("Using default config with environment overrides"),
            }
            config
        }
        Err(err) => {
            tracing::warn!("Failed to load config: {}. Using defaults.", err);
            AppConfigFile::default()
        }
    }
}
