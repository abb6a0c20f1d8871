pub mod backoff;
pub mod config;
pub mod link;
pub mod manager;
pub mod receiver;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod types;
pub mod worker;

pub use config::{LinkConfig, NodeConfig};
pub use link::WanLink;
pub use manager::WanReplicationManager;
pub use receiver::{Receiver, UpdateSink};
pub use stats::{LinkState, LinkStats};
pub use transport::{Connection, TcpTransport, Transport};

use std::any::Any;
use tokio::sync::watch;

/// Resolves once the shutdown flag is set or its sender is gone.
pub(crate) async fn wait_stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
