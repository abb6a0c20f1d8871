#![allow(dead_code)]

use bytes::Bytes;
use gridwan::wire::{self, Packet};
use gridwan::{Address, GridwanError, LinkCredentials, PendingUpdate, Result};
use gridwan_replication::{Connection, LinkConfig, NodeConfig, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Containers that make a scripted connection fail the write.
pub const FAULT_CONTAINER: &str = "poison-error";
/// Containers that make a scripted connection panic inside the write.
pub const PANIC_CONTAINER: &str = "poison-panic";

/// Frames written to scripted connections, in submission order.
#[derive(Default)]
pub struct Recorder {
    writes: Mutex<Vec<(Address, PendingUpdate)>>,
}

impl Recorder {
    pub fn writes(&self) -> Vec<(Address, PendingUpdate)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.writes()
            .into_iter()
            .map(|(_, update)| update.key().clone())
            .collect()
    }
}

pub struct ScriptedConnection {
    address: Address,
    live: AtomicBool,
    writes: AtomicUsize,
    /// Goes not-live right after this many accepted writes.
    die_after: Option<usize>,
    recorder: Arc<Recorder>,
}

impl Connection for ScriptedConnection {
    fn address(&self) -> &Address {
        &self.address
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn enqueue_write(&self, frame: Bytes) -> Result<()> {
        let update = match wire::decode_frame(frame)? {
            Packet::Merge(update) => update,
            Packet::Auth(_) => return Err(GridwanError::Transport("unexpected handshake".into())),
        };
        if update.container_name() == PANIC_CONTAINER {
            panic!("scripted panic for key {:?}", update.key());
        }
        if update.container_name() == FAULT_CONTAINER {
            return Err(GridwanError::Transport("scripted write failure".into()));
        }
        if !self.is_live() {
            return Ok(());
        }

        self.recorder
            .writes
            .lock()
            .unwrap()
            .push((self.address.clone(), update));
        let written = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.die_after.is_some_and(|limit| written >= limit) {
            self.live.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out connections per host from a script.
///
/// Hosts without a script (or whose script is used up) stay pending forever.
/// A script entry of `Some(n)` yields a connection that dies after `n`
/// writes; `None` yields one that stays live.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Option<usize>>>>,
    current: Mutex<HashMap<String, Arc<ScriptedConnection>>>,
    pub recorder: Arc<Recorder>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, host: &str, connections: Vec<Option<usize>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(host.to_string(), connections.into());
        self
    }
}

impl Transport for ScriptedTransport {
    fn connect_or_get(
        &self,
        address: &Address,
        _credentials: &LinkCredentials,
    ) -> Result<Option<Arc<dyn Connection>>> {
        let mut current = self.current.lock().unwrap();
        if let Some(conn) = current.get(&address.host) {
            if conn.is_live() {
                return Ok(Some(Arc::clone(conn) as Arc<dyn Connection>));
            }
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&address.host)
            .and_then(|script| script.pop_front());
        let Some(die_after) = next else {
            return Ok(None);
        };

        let conn = Arc::new(ScriptedConnection {
            address: address.clone(),
            live: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
            die_after,
            recorder: Arc::clone(&self.recorder),
        });
        current.insert(address.host.clone(), Arc::clone(&conn));
        let conn: Arc<dyn Connection> = conn;
        Ok(Some(conn))
    }
}

pub fn fast_link(name: &str, targets: &[&str]) -> LinkConfig {
    let mut link = LinkConfig::new(
        name,
        LinkCredentials::new(name, format!("{}-pass", name)),
        targets.iter().map(|t| t.to_string()).collect(),
    );
    link.connect_attempts = 2;
    link.connect_delay_ms = 10;
    link
}

pub fn node(links: Vec<LinkConfig>) -> NodeConfig {
    NodeConfig {
        node_id: "node-a".to_string(),
        local_port: 5701,
        queue_capacity: 1000,
        links,
    }
}

pub fn update(container: &str, key: &str) -> PendingUpdate {
    PendingUpdate::new(container, key.as_bytes().to_vec(), b"{\"v\":1}".to_vec())
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
