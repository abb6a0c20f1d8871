use gridwan::wire::{self, Packet};
use gridwan::{GridwanError, LinkCredentials, PendingUpdate, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Where the peer side hands decoded replication merges.
pub trait UpdateSink: Send + Sync {
    fn apply(&self, source_group: &str, update: PendingUpdate);
}

/// Peer-side ingestion endpoint for WAN links.
///
/// Every connection must open with an AUTH frame; when expected credentials
/// are configured a mismatch closes the connection. Merge frames that follow
/// are decoded and passed to the sink.
pub struct Receiver {
    listener: TcpListener,
    expected: Option<LinkCredentials>,
    sink: Arc<dyn UpdateSink>,
}

impl Receiver {
    pub async fn bind(
        addr: &str,
        expected: Option<LinkCredentials>,
        sink: Arc<dyn UpdateSink>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("[WAN-RX] listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            expected,
            sink,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = crate::wait_stopped(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let expected = self.expected.clone();
                        let sink = Arc::clone(&self.sink);
                        tokio::spawn(async move {
                            match handle_peer(stream, expected, sink).await {
                                Ok(applied) => tracing::info!(
                                    peer = %peer,
                                    applied,
                                    "[WAN-RX] peer {} disconnected after {} updates",
                                    peer,
                                    applied
                                ),
                                Err(e) => tracing::warn!(
                                    peer = %peer,
                                    "[WAN-RX] dropping peer {}: {}",
                                    peer,
                                    e
                                ),
                            }
                        });
                    }
                    Err(e) => tracing::warn!("[WAN-RX] accept failed: {}", e),
                },
            }
        }
        tracing::info!("[WAN-RX] receiver stopped");
    }
}

async fn handle_peer(
    stream: TcpStream,
    expected: Option<LinkCredentials>,
    sink: Arc<dyn UpdateSink>,
) -> Result<u64> {
    let mut reader = BufReader::new(stream);

    let first = wire::read_frame(&mut reader)
        .await?
        .ok_or_else(|| GridwanError::Decode("connection closed before handshake".into()))?;
    let group = match wire::decode(first)? {
        Packet::Auth(presented) => {
            if let Some(ref expected) = expected {
                if !credentials_match(&presented, expected) {
                    return Err(GridwanError::Authentication(presented.group_name));
                }
            }
            presented.group_name
        }
        Packet::Merge(_) => {
            return Err(GridwanError::Authentication(
                "<missing handshake>".to_string(),
            ))
        }
    };
    tracing::info!(group = %group, "[WAN-RX] peer authenticated as group {}", group);

    let mut applied = 0u64;
    while let Some(body) = wire::read_frame(&mut reader).await? {
        match wire::decode(body)? {
            Packet::Merge(update) => {
                sink.apply(&group, update);
                applied += 1;
            }
            Packet::Auth(_) => {
                tracing::warn!(group = %group, "[WAN-RX] ignoring repeated handshake");
            }
        }
    }
    Ok(applied)
}

/// Password bytes are compared in constant time.
fn credentials_match(presented: &LinkCredentials, expected: &LinkCredentials) -> bool {
    let password_ok: bool = presented
        .password
        .as_bytes()
        .ct_eq(expected.password.as_bytes())
        .into();
    password_ok && presented.group_name == expected.group_name
}
