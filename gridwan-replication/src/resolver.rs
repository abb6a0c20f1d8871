use crate::backoff::ConnectPolicy;
use crate::stats::LinkStats;
use crate::transport::{Connection, Transport};
use gridwan::{Address, GridwanError, LinkCredentials, Result};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Finds a live connection to the peer cluster, rotating through its targets.
///
/// A target that does not become ready within the policy's poll budget is
/// moved to the tail of the rotation and the next one is tried. The target
/// behind the current connection is held out of the rotation while that
/// connection is live and goes back to the tail once it dies. Used only by
/// the forwarder worker, so nothing here is shared.
pub struct ConnectionResolver {
    link: String,
    rotation: VecDeque<String>,
    active: Option<(String, Arc<dyn Connection>)>,
    default_port: u16,
    credentials: LinkCredentials,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn ConnectPolicy>,
    stats: Arc<LinkStats>,
}

impl ConnectionResolver {
    pub fn new(
        link: impl Into<String>,
        targets: Vec<String>,
        default_port: u16,
        credentials: LinkCredentials,
        transport: Arc<dyn Transport>,
        policy: Arc<dyn ConnectPolicy>,
        stats: Arc<LinkStats>,
    ) -> Result<Self> {
        let link = link.into();
        if targets.is_empty() {
            return Err(GridwanError::Config(format!("link {} has no targets", link)));
        }
        Ok(Self {
            link,
            rotation: targets.into(),
            active: None,
            default_port,
            credentials,
            transport,
            policy,
            stats,
        })
    }

    /// Targets waiting their turn, head first. Excludes the active target.
    pub fn rotation(&self) -> Vec<String> {
        self.rotation.iter().cloned().collect()
    }

    pub fn active_target(&self) -> Option<&str> {
        self.active.as_ref().map(|(target, _)| target.as_str())
    }

    /// Return a live connection, blocking until one is established.
    ///
    /// Never returns while no target can be reached. Cancel safe: dropping
    /// the future leaves every target in the rotation.
    pub async fn get_connection(&mut self) -> Arc<dyn Connection> {
        if let Some((target, conn)) = &self.active {
            match check_live(conn.as_ref()) {
                Ok(true) => return Arc::clone(conn),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    link = %self.link,
                    target = %target,
                    error = %e,
                    "[WAN {}] liveness check on {} failed: {}",
                    self.link,
                    target,
                    e
                ),
            }
        }
        if let Some((target, _)) = self.active.take() {
            tracing::info!(
                link = %self.link,
                target = %target,
                "[WAN {}] connection to {} is no longer live, reconnecting",
                self.link,
                target
            );
            self.stats.record_disconnected();
            self.rotation.push_back(target);
        }

        loop {
            let Some(candidate) = self.rotation.front().cloned() else {
                tokio::time::sleep(self.policy.rotate_delay()).await;
                continue;
            };

            match self.try_candidate(&candidate).await {
                Ok(Some(conn)) => {
                    self.rotation.pop_front();
                    self.stats.record_connected(&candidate);
                    tracing::info!(
                        link = %self.link,
                        target = %candidate,
                        "[WAN {}] connected to target {}",
                        self.link,
                        candidate
                    );
                    self.active = Some((candidate, Arc::clone(&conn)));
                    return conn;
                }
                Ok(None) => {
                    let failures = self.stats.record_connect_failure();
                    tracing::warn!(
                        link = %self.link,
                        target = %candidate,
                        attempts = self.policy.attempts(),
                        connect_failures = failures,
                        "[WAN {}] target {} not ready after {} attempts, rotating",
                        self.link,
                        candidate,
                        self.policy.attempts()
                    );
                }
                Err(e) => {
                    let failures = self.stats.record_connect_failure();
                    tracing::warn!(
                        link = %self.link,
                        target = %candidate,
                        connect_failures = failures,
                        error = %e,
                        "[WAN {}] failed to connect to {}: {}",
                        self.link,
                        candidate,
                        e
                    );
                }
            }

            tokio::time::sleep(self.policy.rotate_delay()).await;
            if let Some(failed) = self.rotation.pop_front() {
                self.rotation.push_back(failed);
            }
        }
    }

    async fn try_candidate(&self, candidate: &str) -> Result<Option<Arc<dyn Connection>>> {
        let address = Address::parse(candidate, self.default_port)?;

        for attempt in 0..self.policy.attempts() {
            if let Some(conn) = self.poll_transport(&address)? {
                return Ok(Some(conn));
            }
            tokio::time::sleep(self.policy.poll_delay(attempt)).await;
        }
        Ok(None)
    }

    /// Return the connection only once it is live. A panicking transport or
    /// liveness check is treated like a failed connect.
    fn poll_transport(&self, address: &Address) -> Result<Option<Arc<dyn Connection>>> {
        let transport = &self.transport;
        let credentials = &self.credentials;
        panic::catch_unwind(AssertUnwindSafe(|| -> Result<Option<Arc<dyn Connection>>> {
            Ok(transport
                .connect_or_get(address, credentials)?
                .filter(|conn| conn.is_live()))
        }))
        .unwrap_or_else(|payload| {
            Err(GridwanError::Transport(format!(
                "transport panicked: {}",
                crate::panic_message(payload.as_ref())
            )))
        })
    }
}

fn check_live(conn: &dyn Connection) -> Result<bool> {
    panic::catch_unwind(AssertUnwindSafe(|| conn.is_live())).map_err(|payload| {
        GridwanError::Transport(format!(
            "liveness check panicked: {}",
            crate::panic_message(payload.as_ref())
        ))
    })
}
