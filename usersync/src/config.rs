use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("sync timeout must be greater than zero")]
    InvalidTimeout,
    #[error("mirror store path cannot be empty")]
    EmptyMirrorPath,
    #[error("mirror store needs at least one connection")]
    InvalidPoolSize,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Downstream sync call settings
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct SyncConfig {
    /// Total time allowed for one downstream call, connect through body read
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_mirror_path() -> PathBuf {
    PathBuf::from("./myapp.db")
}

fn default_max_connections() -> u32 {
    4
}

/// Embedded mirror store settings
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct MirrorConfig {
    #[serde(default = "default_mirror_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            path: default_mirror_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl MirrorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::EmptyMirrorPath);
        }
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidPoolSize);
        }
        Ok(())
    }
}
