pub mod app_config;
pub mod module;

pub use app_config::{Config, ConfigError, load_config, load_config_file, parse_config};
pub use module::*;
