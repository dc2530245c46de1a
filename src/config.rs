// Configuration file for the control-node integration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::ConnectionPool;
use crate::hosts::{ManagedHost, StaticHostDirectory};
use crate::output::errors::ControlNodeError;
use crate::output::messages::MessageCatalog;

/// Top-level configuration, loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlNodeConfig {
    /// JSON file holding the path records
    pub store_path: PathBuf,
    pub gateway: GatewayConfig,
    pub ssh: SshConfig,
    pub scheduler: SchedulerConfig,
    /// Managed hosts known to this installation
    pub hosts: Vec<ManagedHost>,
    /// Message catalog overrides, keyed by message key
    pub messages: HashMap<String, String>,
}

impl Default for ControlNodeConfig {
    fn default() -> Self {
        ControlNodeConfig {
            store_path: PathBuf::from(".nexus/ansible-paths.json"),
            gateway: GatewayConfig::default(),
            ssh: SshConfig::default(),
            scheduler: SchedulerConfig::default(),
            hosts: Vec::new(),
            messages: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// How long a control node gets to answer
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: Option<String>,
    pub private_key: Option<String>,
    /// Prefer `--ask-pass` over storing this in a file
    pub password: Option<String>,
    pub connect_timeout_secs: u64,
    pub max_per_host: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig {
            user: None,
            private_key: None,
            password: None,
            connect_timeout_secs: 10,
            max_per_host: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            url: "http://localhost:2829/api".to_string(),
            timeout_secs: 10,
        }
    }
}

impl ControlNodeConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ControlNodeError> {
        let content = std::fs::read_to_string(path).map_err(|e| ControlNodeError::Config {
            message: format!("Failed to read configuration: {}", e),
            path: Some(path.to_path_buf()),
        })?;

        Self::from_yaml(&content).map_err(|e| match e {
            ControlNodeError::Config { message, .. } => ControlNodeError::Config {
                message,
                path: Some(path.to_path_buf()),
            },
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, ControlNodeError> {
        let config: ControlNodeConfig =
            serde_yaml::from_str(content).map_err(|e| ControlNodeError::Config {
                message: format!("Failed to parse configuration: {}", e),
                path: None,
            })?;

        if config.gateway.timeout_secs == 0 {
            return Err(ControlNodeError::Config {
                message: "gateway.timeout_secs must be greater than zero".to_string(),
                path: None,
            });
        }

        Ok(config)
    }

    /// Load the file when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self, ControlNodeError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(ControlNodeConfig::default()),
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs)
    }

    pub fn scheduler_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.timeout_secs)
    }

    pub fn host_directory(&self) -> StaticHostDirectory {
        StaticHostDirectory::new(self.hosts.iter().cloned())
    }

    pub fn message_catalog(&self) -> MessageCatalog {
        MessageCatalog::new().with_overrides(self.messages.clone())
    }

    /// SSH pool configured from the `ssh` section
    pub fn connection_pool(&self) -> ConnectionPool {
        let mut pool = ConnectionPool::new()
            .with_max_per_host(self.ssh.max_per_host)
            .with_connect_timeout(Duration::from_secs(self.ssh.connect_timeout_secs))
            .with_command_timeout(self.gateway_timeout());

        if let Some(ref user) = self.ssh.user {
            pool = pool.with_default_user(user.clone());
        }
        if let Some(ref key) = self.ssh.private_key {
            pool = pool.with_private_key(key.clone());
        }
        if let Some(ref password) = self.ssh.password {
            pool = pool.with_password(password.clone());
        }

        pool
    }
}
