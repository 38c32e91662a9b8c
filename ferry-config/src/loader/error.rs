use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file {path} does not exist")]
    MissingFile { path: PathBuf },

    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read env file {path}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
