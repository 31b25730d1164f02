use std::{env, path::PathBuf, thread};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per node settings. Every field has a default except `node_id`, which must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub mining_threads: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: String::new(),
            data_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            mining_threads: thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: &str, data_dir: PathBuf) -> Self {
        NodeConfig {
            node_id: node_id.to_string(),
            data_dir,
            ..Default::default()
        }
    }

    /// Read NODE_ID, DATA_DIR, LOG_LEVEL and MINING_THREADS from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, with variables taken from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = NodeConfig {
            node_id: lookup("NODE_ID").ok_or(ConfigError::Missing("NODE_ID"))?,
            ..Default::default()
        };
        if let Some(data_dir) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(log_level) = lookup("LOG_LEVEL") {
            config.log_level = log_level;
        }
        if let Some(threads) = lookup("MINING_THREADS") {
            config.mining_threads = threads.parse().map_err(|_| ConfigError::Invalid {
                key: "MINING_THREADS",
                value: threads.clone(),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file body, missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Missing("NODE_ID"));
        }
        if !self
            .node_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid {
                key: "NODE_ID",
                value: self.node_id.clone(),
            });
        }
        if self.mining_threads == 0 {
            return Err(ConfigError::Invalid {
                key: "MINING_THREADS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Where this node's ledger lives
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(format!("blocks_{}", self.node_id))
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
