use crate::backoff::BackoffKind;
use gridwan::{Address, GridwanError, LinkCredentials, Result, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 5701;
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONNECT_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    /// Port this node listens on; targets without a port inherit it.
    #[serde(default = "default_port")]
    pub local_port: u16,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

/// One WAN link to one peer cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    #[serde(flatten)]
    pub credentials: LinkCredentials,
    /// `host` or `host:port` endpoints of the peer cluster, tried in rotation.
    pub targets: Vec<String>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_connect_delay_ms() -> u64 {
    DEFAULT_CONNECT_DELAY_MS
}

impl LinkConfig {
    pub fn new(
        name: impl Into<String>,
        credentials: LinkCredentials,
        targets: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            credentials,
            targets,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_delay_ms: DEFAULT_CONNECT_DELAY_MS,
            backoff: BackoffKind::default(),
        }
    }
}

impl NodeConfig {
    /// Load node configuration from {data_dir}/wan.json or fall back to the environment
    pub fn load_or_default(data_dir: &Path) -> Self {
        let wan_json = data_dir.join("wan.json");

        if wan_json.exists() {
            match std::fs::read_to_string(&wan_json) {
                Ok(content) => match serde_json::from_str::<NodeConfig>(&content) {
                    Ok(config) => {
                        tracing::info!(
                            "Loaded WAN config: node_id={}, links={}",
                            config.node_id,
                            config.links.len()
                        );
                        return config;
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse wan.json: {}, using environment", e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read wan.json: {}, using environment", e);
                }
            }
        }

        let config = Self::from_env();
        if config.links.is_empty() {
            tracing::info!(
                "No WAN targets configured, running standalone: node_id={}",
                config.node_id
            );
        }
        config
    }

    /// Build a configuration from `GRIDWAN_*` environment variables.
    ///
    /// A single link is created when `GRIDWAN_TARGETS` (comma separated) is set.
    pub fn from_env() -> Self {
        let node_id = std::env::var("GRIDWAN_NODE_ID").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        });

        let local_port = env_parse("GRIDWAN_PORT").unwrap_or(DEFAULT_PORT);
        let queue_capacity = env_parse("GRIDWAN_QUEUE_CAPACITY").unwrap_or(DEFAULT_QUEUE_CAPACITY);

        let targets: Vec<String> = std::env::var("GRIDWAN_TARGETS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        let links = if targets.is_empty() {
            vec![]
        } else {
            let group_name =
                std::env::var("GRIDWAN_GROUP_NAME").unwrap_or_else(|_| "dev".to_string());
            let password =
                std::env::var("GRIDWAN_GROUP_PASSWORD").unwrap_or_else(|_| "dev-pass".to_string());
            let name = std::env::var("GRIDWAN_LINK_NAME").unwrap_or_else(|_| group_name.clone());
            vec![LinkConfig::new(
                name,
                LinkCredentials::new(group_name, password),
                targets,
            )]
        };

        NodeConfig {
            node_id,
            local_port,
            queue_capacity,
            links,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(GridwanError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }

        let mut names = HashSet::new();
        for link in &self.links {
            if link.name.is_empty() {
                return Err(GridwanError::Config("link name must not be empty".into()));
            }
            if !names.insert(link.name.as_str()) {
                return Err(GridwanError::Config(format!(
                    "duplicate link name: {}",
                    link.name
                )));
            }
            if link.targets.is_empty() {
                return Err(GridwanError::Config(format!(
                    "link {} has no targets",
                    link.name
                )));
            }
            if link.connect_attempts == 0 {
                return Err(GridwanError::Config(format!(
                    "link {} connect_attempts must be at least 1",
                    link.name
                )));
            }
            for target in &link.targets {
                Address::parse(target, self.local_port)?;
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", name, raw);
            None
        }
    }
}
