use crate::backoff::policy_for;
use crate::config::LinkConfig;
use crate::resolver::ConnectionResolver;
use crate::stats::{LinkState, LinkStats};
use crate::transport::Transport;
use crate::types::LinkStatus;
use crate::worker::ForwarderWorker;
use bytes::Bytes;
use gridwan::{GridwanError, PendingUpdate, ReplicationQueue, Result};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::watch;

/// A running replication link to one peer cluster.
///
/// Owns the producer side of the link (the replication queue) and the
/// shutdown signal of its worker. The worker runs on its own thread so a
/// stuck peer cannot hold up other background work. Once stopped a link
/// stays stopped; build a new one to resume replication.
pub struct WanLink {
    name: String,
    targets: Vec<String>,
    queue: Arc<ReplicationQueue>,
    stats: Arc<LinkStats>,
    shutdown: watch::Sender<bool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WanLink {
    /// Wire the group identity, credentials and target rotation, then start
    /// the forwarder immediately.
    pub fn init(
        config: &LinkConfig,
        local_port: u16,
        queue_capacity: usize,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let queue = Arc::new(ReplicationQueue::new(&config.name, queue_capacity));
        let stats = Arc::new(LinkStats::new());
        let resolver = ConnectionResolver::new(
            &config.name,
            config.targets.clone(),
            local_port,
            config.credentials.clone(),
            transport,
            policy_for(config),
            Arc::clone(&stats),
        )?;
        let worker =
            ForwarderWorker::new(&config.name, Arc::clone(&queue), resolver, Arc::clone(&stats));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread = std::thread::Builder::new()
            .name(format!("gridwan-wan-{}", config.name))
            .spawn(move || runtime.block_on(worker.run(shutdown_rx)))?;

        tracing::info!(
            link = %config.name,
            group = %config.credentials.group_name,
            targets = ?config.targets,
            queue_capacity = queue.capacity(),
            "[WAN {}] link initialized",
            config.name
        );

        Ok(Self {
            name: config.name.clone(),
            targets: config.targets.clone(),
            queue,
            stats,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit an update. Never blocks beyond the queue lock and never fails;
    /// updates offered to a stopped link are discarded.
    pub fn offer(&self, update: PendingUpdate) {
        if self.is_stopping() {
            tracing::debug!(
                link = %self.name,
                container = update.container_name(),
                "[WAN {}] link stopped, discarding update",
                self.name
            );
            return;
        }
        self.queue.offer(update);
    }

    pub fn on_mutation_committed(&self, container_name: &str, key: Bytes, value_envelope: Bytes) {
        self.offer(PendingUpdate::new(container_name, key, value_envelope));
    }

    /// Signal the worker to stop. Returns immediately.
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!(link = %self.name, "[WAN {}] stop requested", self.name);
        }
    }

    /// Wait for the worker thread to exit. Call after [`WanLink::stop`].
    pub fn join(&self) -> Result<()> {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match handle {
            Some(handle) => handle.join().map_err(|payload| {
                GridwanError::Transport(format!(
                    "worker thread for link {} panicked: {}",
                    self.name,
                    crate::panic_message(payload.as_ref())
                ))
            }),
            None => Ok(()),
        }
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn state(&self) -> LinkState {
        self.stats.state()
    }

    /// True when nothing is queued, in flight or waiting for retry.
    pub fn is_idle(&self) -> bool {
        let counters = self.stats.snapshot();
        self.queue.is_empty() && !counters.in_flight && counters.retry_depth == 0
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            name: self.name.clone(),
            state: self.stats.state(),
            targets: self.targets.clone(),
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            offered: self.queue.offered(),
            evicted: self.queue.evicted(),
            counters: self.stats.snapshot(),
        }
    }
}

impl Drop for WanLink {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Connection;
    use gridwan::{Address, LinkCredentials};
    use std::time::Duration;

    struct NeverReady;

    impl Transport for NeverReady {
        fn connect_or_get(
            &self,
            _address: &Address,
            _credentials: &LinkCredentials,
        ) -> Result<Option<Arc<dyn Connection>>> {
            Ok(None)
        }
    }

    fn config() -> LinkConfig {
        LinkConfig::new(
            "tokyo",
            LinkCredentials::new("tokyo", "tokyo-pass"),
            vec!["h1".to_string()],
        )
    }

    #[test]
    fn test_init_runs_worker_on_dedicated_thread_and_stops() {
        let link = WanLink::init(&config(), 5701, 10, Arc::new(NeverReady)).unwrap();
        assert_eq!(link.name(), "tokyo");
        assert_eq!(link.state(), LinkState::Running);

        link.stop();
        link.join().unwrap();
        assert_eq!(link.state(), LinkState::Stopped);

        // A second join is a no-op.
        link.join().unwrap();
    }

    #[test]
    fn test_offers_after_stop_are_discarded() {
        let link = WanLink::init(&config(), 5701, 10, Arc::new(NeverReady)).unwrap();
        link.stop();
        link.join().unwrap();

        link.on_mutation_committed("orders", Bytes::from_static(b"k"), Bytes::from_static(b"v"));
        let status = link.status();
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.offered, 0);
    }

    #[test]
    fn test_status_reports_queue_overflow() {
        let link = WanLink::init(&config(), 5701, 2, Arc::new(NeverReady)).unwrap();
        for i in 0..6u8 {
            link.on_mutation_committed("orders", Bytes::from(vec![i]), Bytes::from_static(b"v"));
        }
        // Give the worker time to pull one update into the resolver.
        std::thread::sleep(Duration::from_millis(50));

        let status = link.status();
        assert_eq!(status.name, "tokyo");
        assert_eq!(status.offered, 6);
        assert!(status.queue_depth <= 2);
        assert_eq!(status.queue_capacity, 2);
        assert!(status.evicted >= 3);
        assert_eq!(status.counters.sent, 0);
        assert_eq!(status.targets, vec!["h1"]);

        link.stop();
        link.join().unwrap();
    }

    #[test]
    fn test_init_rejects_link_without_targets() {
        let mut cfg = config();
        cfg.targets.clear();
        assert!(WanLink::init(&cfg, 5701, 10, Arc::new(NeverReady)).is_err());
    }
}
