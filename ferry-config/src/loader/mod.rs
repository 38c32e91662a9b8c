pub mod error;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::models::Config;
use crate::util::parse_csv;
use error::ConfigLoadError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_VAR: &str = "FERRY_CONFIG_PATH";

const DEFAULT_CANDIDATES: &[&str] = &["ferry.toml", "config/ferry.toml"];

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where the file layer of the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// No file was found; built-in defaults plus environment.
    Defaults,
    File(PathBuf),
}

/// Result of [`ConfigLoader::load`].
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub source: ConfigSource,
    pub env_file_loaded: bool,
}

/// Builds a [`Config`] from file, `.env` and environment layers.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    root: PathBuf,
    env_file: bool,
    env: EnvLookup,
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("config_path", &self.config_path)
            .field("root", &self.root)
            .field("env_file", &self.env_file)
            .finish_non_exhaustive()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            root: PathBuf::from("."),
            env_file: true,
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Use this file instead of searching. It must exist.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Directory `.env` and the default config candidates are resolved
    /// against.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.env_file = false;
        self
    }

    /// Replace the process environment, mainly for tests.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.env = Box::new(move |key| vars.get(key).cloned());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let dotenv = self.read_env_file()?;
        let env_file_loaded = dotenv.is_some();
        let dotenv = dotenv.unwrap_or_default();
        // Real environment beats `.env`, as dotenvy does.
        let lookup = |key: &str| {
            (self.env)(key)
                .or_else(|| dotenv.get(key).cloned())
                .filter(|value| !value.trim().is_empty())
        };

        let (mut config, source) = match self.locate(&lookup)? {
            Some(path) => (read_file(&path)?, ConfigSource::File(path)),
            None => (Config::default(), ConfigSource::Defaults),
        };
        apply_env(&mut config, &lookup)?;
        config
            .validate()
            .map_err(|err| ConfigLoadError::Invalid(format!("{err:#}")))?;

        info!(
            source = ?source,
            env_file_loaded,
            queue = %config.publisher.queue,
            "configuration loaded"
        );
        Ok(ConfigLoad {
            config,
            source,
            env_file_loaded,
        })
    }

    fn read_env_file(&self) -> Result<Option<HashMap<String, String>>, ConfigLoadError> {
        if !self.env_file {
            return Ok(None);
        }
        let path = self.root.join(".env");
        if !path.exists() {
            return Ok(None);
        }
        let env_error = |source| ConfigLoadError::EnvFile {
            path: path.clone(),
            source,
        };
        let mut vars = HashMap::new();
        for item in dotenvy::from_path_iter(&path).map_err(env_error)? {
            let (key, value) = item.map_err(env_error)?;
            vars.insert(key, value);
        }
        debug!(path = %path.display(), entries = vars.len(), "read env file");
        Ok(Some(vars))
    }

    fn locate(
        &self,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<Option<PathBuf>, ConfigLoadError> {
        let explicit = self
            .config_path
            .clone()
            .or_else(|| lookup(CONFIG_PATH_VAR).map(PathBuf::from));
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigLoadError::MissingFile { path });
            }
            return Ok(Some(path));
        }

        Ok(DEFAULT_CANDIDATES
            .iter()
            .map(|candidate| self.root.join(candidate))
            .find(|path| path.exists()))
    }
}

fn read_file(path: &Path) -> Result<Config, ConfigLoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env(
    config: &mut Config,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigLoadError> {
    if let Some(port) = parsed(lookup, "FERRY_BROKER_PORT")? {
        config.broker.port = port;
    }
    if let Some(queue) = lookup("FERRY_QUEUE") {
        config.publisher.queue = queue;
    }
    if let Some(group) = lookup("FERRY_GROUP") {
        config.consumer.group = group;
    }
    if let Some(port) = parsed(lookup, "FERRY_TRANSFER_PORT")? {
        config.transfer.port = port;
    }
    if let Some(raw) = lookup("FERRY_WATCH_EXTENSIONS") {
        config.watch.extensions = parse_csv(&raw);
    }
    if let Some(ms) = parsed(lookup, "FERRY_PUBLISH_INTERVAL_MS")? {
        config.publisher.publish_interval_ms = ms;
    }
    if let Some(ms) = parsed(lookup, "FERRY_RECONNECT_DELAY_MS")? {
        config.publisher.reconnect_delay_ms = ms;
    }
    Ok(())
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|err: T::Err| ConfigLoadError::InvalidEnv {
                    key,
                    value: raw.clone(),
                    reason: err.to_string(),
                })
        })
        .transpose()
}
