use serde::Deserialize;
use std::collections::HashSet;
use store::types::{ProjectId, ProjectKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Main and admin listeners cannot share an address")]
    ListenerClash,

    #[error("Event size limit cannot be 0")]
    InvalidSizeLimit,

    #[error("Clock skew window cannot be 0")]
    InvalidClockSkew,

    #[error("Empty public key for project {0}")]
    EmptyPublicKey(ProjectId),

    #[error("Duplicate public key: {0}")]
    DuplicateKey(String),
}

/// Ingestion service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for event submission
    #[serde(default)]
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    #[serde(default = "Listener::default_admin")]
    pub admin_listener: Listener,
    /// Server-wide origin allow-list, applied on top of per-key origins.
    /// Empty means no restriction.
    #[serde(default)]
    pub allow_origin: Vec<String>,
    /// Upper bound on the decompressed payload size, in bytes
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
    /// Accepted distance between a signature timestamp and server time,
    /// in seconds
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
    /// Project keys provisioned at startup
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
}

fn default_max_event_bytes() -> usize {
    1024 * 1024
}

fn default_max_clock_skew_secs() -> u64 {
    300
}

impl Config {
    /// Validates the service configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener == self.admin_listener {
            return Err(ValidationError::ListenerClash);
        }

        if self.max_event_bytes == 0 {
            return Err(ValidationError::InvalidSizeLimit);
        }
        if self.max_clock_skew_secs == 0 {
            return Err(ValidationError::InvalidClockSkew);
        }

        let mut public_keys = HashSet::new();
        for key in &self.keys {
            if key.public_key.is_empty() {
                return Err(ValidationError::EmptyPublicKey(key.project_id));
            }
            if !public_keys.insert(&key.public_key) {
                return Err(ValidationError::DuplicateKey(key.public_key.clone()));
            }
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

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl Listener {
    fn default_admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3001,
        }
    }

    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// One project key provisioned at startup
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct KeyConfig {
    /// Project the key writes into
    pub project_id: ProjectId,
    /// Public identifier sent by clients
    pub public_key: String,
    /// Shared secret; omit for public-only keys handed to browsers
    pub secret_key: Option<String>,
    /// Origin allow-list for this key, on top of the server-wide list
    #[serde(default)]
    pub origins: Vec<String>,
    /// Revoked keys can be kept on file with `is_active: false`
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn default_is_active() -> bool {
    true
}

impl From<KeyConfig> for ProjectKey {
    fn from(config: KeyConfig) -> Self {
        ProjectKey {
            project_id: config.project_id,
            public_key: config.public_key,
            secret_key: config.secret_key,
            origins: config.origins,
            is_active: config.is_active,
        }
    }
}
