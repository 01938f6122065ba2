use proxy::config::Config as ProxyConfig;
use registry::config::Config as RegistryConfig;
use serde::Deserialize;
use std::fs::File;
use usersync::config::{MirrorConfig, SyncConfig};

fn default_metrics_prefix() -> String {
    "bridge".to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub proxy: ProxyConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data: Config = serde_yaml::from_reader(file)?;
        data.validate()?;

        Ok(data)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(logging) = &self.common.logging {
            logging
                .sentry_dsn
                .parse::<sentry::types::Dsn>()
                .map_err(|e| ConfigError::InvalidSentryDsn(e.to_string()))?;
        }
        self.proxy.validate()?;
        self.registry.validate()?;
        self.mirror.validate().map_err(ConfigError::Mirror)?;
        self.sync.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid sentry dsn: {0}")]
    InvalidSentryDsn(String),
    #[error("invalid proxy config: {0}")]
    Proxy(#[from] proxy::config::ValidationError),
    #[error("invalid registry config: {0}")]
    Registry(#[from] registry::config::ValidationError),
    #[error("invalid mirror config: {0}")]
    Mirror(usersync::config::ValidationError),
    #[error("invalid sync config: {0}")]
    Sync(#[from] usersync::config::ValidationError),
}
