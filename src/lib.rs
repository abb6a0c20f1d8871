//! # Gridwan
//!
//! Core building blocks of an asynchronous cross-cluster replication link
//! ("WAN link") for an in-memory data grid node: the pending-update model,
//! the bounded drop-oldest replication queue, the head-of-line retry queue,
//! and the wire encoding shipped to the peer cluster.
//!
//! The forwarder worker, connection resolver and TCP transport live in the
//! companion `gridwan-replication` crate.
//!
//! ## Quick start
//!
//! ```rust
//! use gridwan::queue::ReplicationQueue;
//! use gridwan::wire::{self, Packet};
//! use gridwan::PendingUpdate;
//!
//! let queue = ReplicationQueue::new("tokyo", 3);
//! for key in ["a", "b", "c", "d"] {
//!     queue.offer(PendingUpdate::new("orders", key.as_bytes().to_vec(), b"v".to_vec()));
//! }
//! // Capacity 3: the oldest update was dropped.
//! assert_eq!(queue.len(), 3);
//! assert_eq!(queue.evicted(), 1);
//!
//! let update = queue.try_take().unwrap();
//! let frame = wire::encode_update(&update).unwrap();
//! assert_eq!(wire::decode_frame(frame).unwrap(), Packet::Merge(update));
//! ```

pub mod error;
pub mod queue;
pub mod types;
pub mod wire;

pub use error::{GridwanError, Result};
pub use queue::{ReplicationQueue, RetryQueue, DEFAULT_QUEUE_CAPACITY};
pub use types::{Address, LinkCredentials, PendingUpdate};
