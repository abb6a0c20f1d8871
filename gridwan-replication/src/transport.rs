use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gridwan::{wire, Address, GridwanError, LinkCredentials, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// An established duplex connection to a peer cluster member.
pub trait Connection: Send + Sync {
    fn address(&self) -> &Address;

    fn is_live(&self) -> bool;

    /// Queue a complete frame for writing. Does not wait for the peer.
    ///
    /// A frame handed to a connection that has already died is discarded;
    /// callers find out through [`Connection::is_live`].
    fn enqueue_write(&self, frame: Bytes) -> Result<()>;
}

/// Connection manager primitives the resolver builds on.
pub trait Transport: Send + Sync {
    /// Return the live connection to `address`, or start establishing one.
    ///
    /// `Ok(None)` means a connection is pending; poll again later.
    fn connect_or_get(
        &self,
        address: &Address,
        credentials: &LinkCredentials,
    ) -> Result<Option<Arc<dyn Connection>>>;
}

enum Slot {
    Pending,
    Ready(Arc<TcpConnection>),
}

/// Tokio TCP connection table.
///
/// Connects run in the background on the runtime the transport was built
/// on. Each connection sends the group handshake first, then drains its
/// outbound frames from a channel. A write error or the peer closing the
/// socket marks the connection not-live.
pub struct TcpTransport {
    runtime: Handle,
    connections: Arc<DashMap<Address, Slot>>,
}

impl TcpTransport {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| GridwanError::Transport(format!("no tokio runtime: {}", e)))?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            connections: Arc::new(DashMap::new()),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(c) if c.is_live()))
            .count()
    }

    fn spawn_connect(&self, address: Address, credentials: LinkCredentials) {
        let connections = Arc::clone(&self.connections);
        let runtime = self.runtime.clone();

        self.runtime.spawn(async move {
            let connect = TcpStream::connect((address.host.as_str(), address.port));
            match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("[WAN] set_nodelay failed for {}: {}", address, e);
                    }
                    match TcpConnection::start(address.clone(), stream, &credentials, &runtime) {
                        Ok(conn) => {
                            tracing::info!(
                                target_addr = %address,
                                "[WAN] connected to {}",
                                address
                            );
                            connections.insert(address, Slot::Ready(conn));
                        }
                        Err(e) => {
                            tracing::warn!("[WAN] handshake to {} failed: {}", address, e);
                            connections.remove(&address);
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("[WAN] connect to {} failed: {}", address, e);
                    connections.remove(&address);
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        "[WAN] connect to {} timed out after {:?}",
                        address,
                        CONNECT_TIMEOUT
                    );
                    connections.remove(&address);
                }
            }
        });
    }
}

impl Transport for TcpTransport {
    fn connect_or_get(
        &self,
        address: &Address,
        credentials: &LinkCredentials,
    ) -> Result<Option<Arc<dyn Connection>>> {
        match self.connections.entry(address.clone()) {
            Entry::Occupied(mut entry) => {
                let live = match entry.get() {
                    Slot::Pending => return Ok(None),
                    Slot::Ready(conn) if conn.is_live() => Some(Arc::clone(conn)),
                    Slot::Ready(_) => None,
                };
                if let Some(conn) = live {
                    let conn: Arc<dyn Connection> = conn;
                    return Ok(Some(conn));
                }
                entry.insert(Slot::Pending);
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::Pending);
            }
        }

        self.spawn_connect(address.clone(), credentials.clone());
        Ok(None)
    }
}

pub struct TcpConnection {
    address: Address,
    live: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl TcpConnection {
    fn start(
        address: Address,
        stream: TcpStream,
        credentials: &LinkCredentials,
        runtime: &Handle,
    ) -> Result<Arc<Self>> {
        let handshake = wire::encode_auth(credentials)?;
        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let live = Arc::new(AtomicBool::new(true));

        tx.send(handshake)
            .map_err(|_| GridwanError::Transport("outbound channel closed".into()))?;

        let writer_live = Arc::clone(&live);
        let writer_addr = address.clone();
        runtime.spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_half.write_all(&frame).await {
                    tracing::warn!("[WAN] write to {} failed: {}", writer_addr, e);
                    writer_live.store(false, Ordering::Release);
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        // The peer never replies; any read completion means the socket is gone.
        let reader_live = Arc::clone(&live);
        let reader_addr = address.clone();
        runtime.spawn(async move {
            let mut scratch = [0u8; 512];
            loop {
                match read_half.read(&mut scratch).await {
                    Ok(0) => {
                        tracing::info!("[WAN] peer {} closed the connection", reader_addr);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("[WAN] connection to {} lost: {}", reader_addr, e);
                        break;
                    }
                }
            }
            reader_live.store(false, Ordering::Release);
        });

        Ok(Arc::new(Self {
            address,
            live,
            outbound: tx,
        }))
    }
}

impl Connection for TcpConnection {
    fn address(&self) -> &Address {
        &self.address
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    fn enqueue_write(&self, frame: Bytes) -> Result<()> {
        if self.outbound.send(frame).is_err() {
            self.live.store(false, Ordering::Release);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwan::PendingUpdate;
    use tokio::net::TcpListener;

    async fn wait_for_connection(
        transport: &TcpTransport,
        address: &Address,
        credentials: &LinkCredentials,
    ) -> Arc<dyn Connection> {
        for _ in 0..200 {
            if let Some(conn) = transport.connect_or_get(address, credentials).unwrap() {
                return conn;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection to {} never became ready", address);
    }

    #[tokio::test]
    async fn test_connect_sends_handshake_then_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = TcpTransport::new().unwrap();
        let address = Address::new("127.0.0.1", port);
        let creds = LinkCredentials::new("tokyo", "tokyo-pass");

        assert!(transport.connect_or_get(&address, &creds).unwrap().is_none());
        let (mut socket, _) = listener.accept().await.unwrap();

        let conn = wait_for_connection(&transport, &address, &creds).await;
        assert!(conn.is_live());
        assert_eq!(conn.address(), &address);
        assert_eq!(transport.connection_count(), 1);

        let update = PendingUpdate::new("orders", b"k".to_vec(), b"v".to_vec());
        conn.enqueue_write(wire::encode_update(&update).unwrap())
            .unwrap();

        let first = wire::read_frame(&mut socket).await.unwrap().unwrap();
        assert_eq!(wire::decode(first).unwrap(), wire::Packet::Auth(creds));
        let second = wire::read_frame(&mut socket).await.unwrap().unwrap();
        assert_eq!(wire::decode(second).unwrap(), wire::Packet::Merge(update));
    }

    #[tokio::test]
    async fn test_connection_goes_dead_when_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = TcpTransport::new().unwrap();
        let address = Address::new("127.0.0.1", port);
        let creds = LinkCredentials::new("tokyo", "tokyo-pass");

        transport.connect_or_get(&address, &creds).unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let conn = wait_for_connection(&transport, &address, &creds).await;

        drop(socket);
        for _ in 0..200 {
            if !conn.is_live() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!conn.is_live());

        // A dead connection is replaced by a fresh pending connect.
        assert!(transport.connect_or_get(&address, &creds).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_target_stays_pending() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = TcpTransport::new().unwrap();
        let address = Address::new("127.0.0.1", port);
        let creds = LinkCredentials::new("tokyo", "tokyo-pass");

        for _ in 0..5 {
            assert!(transport.connect_or_get(&address, &creds).unwrap().is_none());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(transport.connection_count(), 0);
    }
}
