use crate::resolver::ConnectionResolver;
use crate::stats::LinkStats;
use crate::transport::Connection;
use gridwan::{wire, GridwanError, PendingUpdate, ReplicationQueue, Result, RetryQueue};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;

/// Single consumer of a link's replication queue.
///
/// Each iteration takes the next update (retry queue first), obtains a
/// connection, encodes and submits the update, then checks the connection.
/// If the connection is no longer live the update goes back to the front of
/// the retry queue. Errors and panics from encode, submit or the liveness
/// check are recorded and the update is dropped; the loop keeps running until
/// the shutdown signal.
pub struct ForwarderWorker {
    link: String,
    queue: Arc<ReplicationQueue>,
    retry: RetryQueue,
    resolver: ConnectionResolver,
    stats: Arc<LinkStats>,
}

impl ForwarderWorker {
    pub fn new(
        link: impl Into<String>,
        queue: Arc<ReplicationQueue>,
        resolver: ConnectionResolver,
        stats: Arc<LinkStats>,
    ) -> Self {
        Self {
            link: link.into(),
            queue,
            retry: RetryQueue::new(),
            resolver,
            stats,
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// Updates still queued or in flight at that point are abandoned.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let _guard = RunGuard {
            link: self.link.clone(),
            stats: Arc::clone(&self.stats),
        };
        self.stats.mark_running();
        tracing::info!(link = %self.link, "[WAN {}] forwarder started", self.link);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let update = match self.retry.pop_front() {
                Some(update) => {
                    self.stats.set_retry_depth(self.retry.len());
                    update
                }
                None => tokio::select! {
                    biased;
                    _ = crate::wait_stopped(&mut shutdown) => break,
                    update = self.queue.take() => update,
                },
            };

            self.stats.set_in_flight(true);

            let conn = tokio::select! {
                biased;
                _ = crate::wait_stopped(&mut shutdown) => break,
                conn = self.resolver.get_connection() => conn,
            };

            match deliver(conn.as_ref(), &update) {
                Ok(Delivery::Sent) => self.stats.record_sent(),
                Ok(Delivery::Dead) => {
                    let failures = self.stats.record_send_failure();
                    let target = self.resolver.active_target().unwrap_or("<none>");
                    tracing::warn!(
                        link = %self.link,
                        target = %target,
                        container = update.container_name(),
                        send_failures = failures,
                        "[WAN {}] connection to {} died after submit, requeueing update",
                        self.link,
                        target
                    );
                    self.retry.push_front(update);
                    self.stats.set_retry_depth(self.retry.len());
                }
                Err(fault) => self.record_fault(&update, &fault),
            }
            self.stats.set_in_flight(false);
        }

        tracing::info!(
            link = %self.link,
            abandoned_queued = self.queue.len(),
            abandoned_retries = self.retry.len(),
            "[WAN {}] forwarder stopped",
            self.link
        );
    }

    fn record_fault(&self, update: &PendingUpdate, fault: &GridwanError) {
        let faults = self.stats.record_fault(format!("{}: {}", fault.kind(), fault));
        tracing::error!(
            link = %self.link,
            container = update.container_name(),
            key_len = update.key().len(),
            kind = fault.kind(),
            faults = faults,
            error = %fault,
            "[WAN {}] failed to forward update, dropping it: {}",
            self.link,
            fault
        );
    }
}

/// Marks the link stopped however `run` exits, recording a fault if it unwound.
struct RunGuard {
    link: String,
    stats: Arc<LinkStats>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.stats
                .record_fault("panic: forwarder loop unwound".to_string());
            tracing::error!(
                link = %self.link,
                "[WAN {}] forwarder loop panicked, link is stopped",
                self.link
            );
        }
        self.stats.set_in_flight(false);
        self.stats.mark_stopped();
    }
}

/// Outcome of submitting one update.
#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    /// The connection was not live right after submission.
    Dead,
}

/// Encode, submit and check liveness of one update, turning a panic into an error.
fn deliver(conn: &dyn Connection, update: &PendingUpdate) -> Result<Delivery> {
    panic::catch_unwind(AssertUnwindSafe(|| -> Result<Delivery> {
        let frame = wire::encode_update(update)?;
        conn.enqueue_write(frame)?;
        Ok(if conn.is_live() {
            Delivery::Sent
        } else {
            Delivery::Dead
        })
    }))
    .unwrap_or_else(|payload| {
        Err(GridwanError::Transport(format!(
            "delivery panicked: {}",
            crate::panic_message(payload.as_ref())
        )))
    })
}
