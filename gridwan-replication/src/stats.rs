use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Running,
    /// Terminal. A stopped link is never restarted.
    Stopped,
}

const STATE_RUNNING: u8 = 0;
const STATE_STOPPED: u8 = 1;

/// Counters a single WAN link exposes for operators.
///
/// Written by the worker and resolver, read by anyone through [`LinkStats::snapshot`].
#[derive(Debug, Default)]
pub struct LinkStats {
    state: AtomicU8,
    sent: AtomicU64,
    send_failures: AtomicU64,
    connect_failures: AtomicU64,
    connections_established: AtomicU64,
    faults: AtomicU64,
    retry_depth: AtomicUsize,
    in_flight: AtomicBool,
    active_target: Mutex<Option<String>>,
    last_fault: Mutex<Option<String>>,
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub send_failures: u64,
    pub connect_failures: u64,
    pub connections_established: u64,
    pub faults: u64,
    pub retry_depth: usize,
    /// An update has been taken and is being resolved or submitted.
    pub in_flight: bool,
    pub active_target: Option<String>,
    pub last_fault: Option<String>,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        match self.state.load(Ordering::Acquire) {
            STATE_STOPPED => LinkState::Stopped,
            _ => LinkState::Running,
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(STATE_STOPPED, Ordering::Release);
    }

    pub(crate) fn mark_running(&self) {
        self.state.store(STATE_RUNNING, Ordering::Release);
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) -> u64 {
        self.send_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_connect_failure(&self) -> u64 {
        self.connect_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_connected(&self, target: &str) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        *self.active_target.lock().unwrap_or_else(|e| e.into_inner()) = Some(target.to_string());
    }

    pub(crate) fn record_disconnected(&self) {
        *self.active_target.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub(crate) fn record_fault(&self, description: String) -> u64 {
        *self.last_fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(description);
        self.faults.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn set_retry_depth(&self, depth: usize) {
        self.retry_depth.store(depth, Ordering::Relaxed);
    }

    pub(crate) fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            retry_depth: self.retry_depth.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            active_target: self
                .active_target
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            last_fault: self
                .last_fault
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_state() {
        let stats = LinkStats::new();
        assert_eq!(stats.state(), LinkState::Running);

        stats.record_sent();
        stats.record_sent();
        assert_eq!(stats.record_send_failure(), 1);
        assert_eq!(stats.record_connect_failure(), 1);
        stats.record_connected("h2:5701");
        assert_eq!(stats.record_fault("encode: boom".into()), 1);
        stats.set_retry_depth(1);

        let snap = stats.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.send_failures, 1);
        assert_eq!(snap.connect_failures, 1);
        assert_eq!(snap.connections_established, 1);
        assert_eq!(snap.faults, 1);
        assert_eq!(snap.retry_depth, 1);
        assert_eq!(snap.active_target.as_deref(), Some("h2:5701"));
        assert_eq!(snap.last_fault.as_deref(), Some("encode: boom"));

        stats.record_disconnected();
        stats.mark_stopped();
        assert_eq!(stats.state(), LinkState::Stopped);
        assert!(stats.snapshot().active_target.is_none());
    }
}
