use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::module::Module;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in module catalog")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown module {0:?}")]
    UnknownModule(String),
}

/// The module catalog, keyed by module name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modules: HashMap<String, Module>,
}

impl Config {
    pub fn module(&self, name: &str) -> Result<&Module, ConfigError> {
        self.modules
            .get(name)
            .ok_or_else(|| ConfigError::UnknownModule(name.to_string()))
    }
}

pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}

pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&config_str)
}

/// Load the module catalog from the file named by `CONFIG_FILE`,
/// falling back to `config.yml` in the working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file_location =
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yml".to_string());
    log::info!("Loading modules from {}", config_file_location);
    load_config_file(Path::new(&config_file_location))
}
