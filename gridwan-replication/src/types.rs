use crate::stats::{LinkState, StatsSnapshot};
use serde::{Deserialize, Serialize};

/// Health of one WAN link, for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatus {
    pub name: String,
    pub state: LinkState,
    pub targets: Vec<String>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub offered: u64,
    /// Updates dropped because the replication queue was full
    pub evicted: u64,
    #[serde(flatten)]
    pub counters: StatsSnapshot,
}

/// Replication status of this node across all of its links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub node_id: String,
    pub replication_enabled: bool,
    pub link_count: usize,
    pub links: Vec<LinkStatus>,
}
