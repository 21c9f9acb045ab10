use link_unfurler::config::{Config as UnfurlerConfig, ValidationError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

pub const SIGNING_SECRET_ENV: &str = "SLACK_SIGNING_SECRET";
pub const ACCESS_TOKEN_ENV: &str = "SLACK_ACCESS_TOKEN";
pub const PORT_ENV: &str = "PORT";
pub const DOTENV_FILE: &str = ".env";

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(flatten)]
    pub unfurler: UnfurlerConfig,
}

impl Config {
    /// Loads the optional config file, then applies environment overrides.
    ///
    /// Variables missing from the process environment are looked up in
    /// `.env` in the working directory, if there is one.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let dotenv = read_dotenv(Path::new(DOTENV_FILE))?;
        config.apply_env(|name: &str| {
            std::env::var(name)
                .ok()
                .or_else(|| dotenv.get(name).cloned())
        })?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Environment values win over the file.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(SIGNING_SECRET_ENV) {
            self.unfurler.slack.signing_secret = secret;
        }
        if let Some(token) = lookup(ACCESS_TOKEN_ENV) {
            self.unfurler.slack.access_token = token;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.unfurler.listener.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv(PORT_ENV, port))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Ok(self.unfurler.validate()?)
    }
}

/// Reads `KEY=value` pairs from a dotenv file. A missing file has no pairs.
pub fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(iter.collect::<Result<_, _>>()?)
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("could not read {DOTENV_FILE}: {0}")]
    DotenvError(#[from] dotenvy::Error),
    #[error("invalid value for {0}: {1:?}")]
    InvalidEnv(&'static str, String),
    #[error("invalid config: {0}")]
    ValidationError(#[from] ValidationError),
}
