use super::config::NodeConfig;
use super::link::WanLink;
use super::transport::Transport;
use super::types::ReplicationStatus;
use bytes::Bytes;
use gridwan::{PendingUpdate, Result};
use std::sync::Arc;

/// Owns every WAN link of this node and fans committed mutations out to them.
///
/// Created by whoever starts replication and handed to the mutation source;
/// there is no process-wide instance.
pub struct WanReplicationManager {
    node_config: NodeConfig,
    links: Vec<WanLink>,
}

impl WanReplicationManager {
    /// Validate the configuration and start one link per configured peer cluster.
    pub fn start(node_config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        node_config.validate()?;

        let links = node_config
            .links
            .iter()
            .map(|link_config| {
                WanLink::init(
                    link_config,
                    node_config.local_port,
                    node_config.queue_capacity,
                    Arc::clone(&transport),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            node_id = %node_config.node_id,
            links = links.len(),
            "WAN replication started"
        );

        Ok(Arc::new(Self { node_config, links }))
    }

    pub fn node_id(&self) -> &str {
        &self.node_config.node_id
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link(&self, name: &str) -> Option<&WanLink> {
        self.links.iter().find(|link| link.name() == name)
    }

    /// Admission callback for the record store.
    ///
    /// Safe to call from any thread; never blocks beyond a queue admission
    /// and never reports an error to the caller.
    pub fn on_mutation_committed(
        &self,
        container_name: &str,
        key: impl Into<Bytes>,
        value_envelope: impl Into<Bytes>,
    ) {
        if self.links.is_empty() {
            return;
        }
        let update = PendingUpdate::new(container_name, key, value_envelope);
        for link in &self.links {
            link.offer(update.clone());
        }
    }

    /// Signal every link to stop. Stopped links are never restarted.
    pub fn stop(&self) {
        for link in &self.links {
            link.stop();
        }
    }

    /// Wait for every worker thread to exit.
    pub fn join(&self) {
        for link in &self.links {
            if let Err(e) = link.join() {
                tracing::error!("[WAN {}] {}", link.name(), e);
            }
        }
    }

    /// True when no link has anything queued or waiting for retry.
    pub fn is_idle(&self) -> bool {
        self.links.iter().all(WanLink::is_idle)
    }

    pub fn status(&self) -> ReplicationStatus {
        ReplicationStatus {
            node_id: self.node_config.node_id.clone(),
            replication_enabled: !self.links.is_empty(),
            link_count: self.links.len(),
            links: self.links.iter().map(WanLink::status).collect(),
        }
    }
}
