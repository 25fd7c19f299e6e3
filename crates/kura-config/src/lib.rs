//! kura configuration: the `config.toml` settings model and the data
//! directory bootstrap.

pub mod dirs;
pub mod settings;

pub use settings::{ConfigError, Settings};
