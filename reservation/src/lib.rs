//! Resource reservation through leases in a shared key-value store.
//!
//! A [`Lease`] reserves a named resource for a bounded time, renews the
//! reservation in the background while held, and releases it when its scope
//! exits or the process receives a termination signal.

mod error;

pub mod lease;
pub mod signal;
pub mod store;

pub use error::{BoxError, Error, Result, StoreError, StoreOp};
pub use lease::{Lease, LeaseConfig, LeaseState, LeaseStatus};
pub use signal::SignalDispatch;
pub use store::{MemoryStore, RedisStore, Store};

#[cfg(test)]
pub mod tests;
