use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Upstream URL must use http, got {0}")]
    UnsupportedScheme(String),

    #[error("Upstream URL has no host: {0}")]
    MissingHost(String),

    #[error("Upstream timeouts must be greater than zero")]
    InvalidTimeout,

    #[error("Legacy prefix must be empty or start with '/', got {0:?}")]
    InvalidLegacyPrefix(String),
}

/// What happens to an intercepted request when its sync side call fails.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Answer the error to the client and do not forward.
    #[default]
    Reject,
    /// Log the error and forward the request anyway.
    Forward,
}

fn default_legacy_prefix() -> String {
    "/prod".to_string()
}

/// Forwarding engine configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// The single backend every request is forwarded to
    pub upstream: UpstreamConfig,
    /// Path prefix stripped from inbound paths before forwarding. Empty disables stripping.
    #[serde(default = "default_legacy_prefix")]
    pub legacy_prefix: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.upstream.validate()?;

        if !self.legacy_prefix.is_empty() && !self.legacy_prefix.starts_with('/') {
            return Err(ValidationError::InvalidLegacyPrefix(
                self.legacy_prefix.clone(),
            ));
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Base URL of the backend. Rewritten request paths are joined onto it.
    pub url: Url,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bounds sending the request and receiving the response headers. The body streams after.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl UpstreamConfig {
    pub fn new(url: Url) -> Self {
        UpstreamConfig {
            url,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.scheme() != "http" {
            return Err(ValidationError::UnsupportedScheme(
                self.url.scheme().to_string(),
            ));
        }
        if self.url.host_str().is_none() {
            return Err(ValidationError::MissingHost(self.url.to_string()));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 8080
admin_listener:
    host: "127.0.0.1"
    port: 8081
upstream:
    url: "http://10.0.0.5:9000/"
    request_timeout_secs: 15
failure_policy: forward
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.legacy_prefix, "/prod");
        assert_eq!(config.failure_policy, FailurePolicy::Forward);
        assert_eq!(config.upstream.url.as_str(), "http://10.0.0.5:9000/");
        assert_eq!(config.upstream.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.upstream.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.upstream.pool_max_idle_per_host, 100);
    }

    #[test]
    fn test_validation_errors() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 0
admin_listener:
    host: "127.0.0.1"
    port: 8081
upstream:
    url: "http://backend:9000"
"#;
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Reject);
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        config.listener.port = 8080;
        config.legacy_prefix = "prod".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidLegacyPrefix(_))
        ));

        config.legacy_prefix = String::new();
        assert!(config.validate().is_ok());

        config.upstream.url = Url::parse("https://backend:9000").unwrap();
        assert_eq!(
            config.validate(),
            Err(ValidationError::UnsupportedScheme("https".into()))
        );

        config.upstream = UpstreamConfig {
            request_timeout_secs: 0,
            ..UpstreamConfig::new(Url::parse("http://backend:9000").unwrap())
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidTimeout));

        // Invalid URLs never get past deserialization
        let yaml = yaml.replace("http://backend:9000", "not a url");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }
}
