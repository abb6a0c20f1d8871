//! Buffers between the mutation source and the forwarder worker.

pub mod replication;
pub mod retry;

pub use replication::ReplicationQueue;
pub use retry::RetryQueue;

/// Default capacity of a link's replication queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;
