//! Adapters for the ports in `domain::ports`.

pub mod clock;
pub mod in_memory;
pub mod lock;
pub mod profiles;
pub mod publisher;
pub mod queue;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
