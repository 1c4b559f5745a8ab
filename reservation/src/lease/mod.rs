//! Leases
//!
//! A lease is an exclusive, time-bounded claim on a named resource, recorded
//! as a key in a shared [`Store`](crate::Store). Mutual exclusion across
//! processes rests entirely on the store's atomic set-if-absent; this module
//! adds renewal, scoped release and release on termination.

mod handle;
mod owner;
mod renewal;
mod types;

#[cfg(test)]
mod tests;

pub use handle::Lease;
pub use owner::owner_token;
pub use types::{LeaseConfig, LeaseState, LeaseStatus, DEFAULT_KEY_PREFIX};
