//! Types for leases

use std::time::Duration;

use crate::error::{Error, Result};

/// Prefix applied to resource names so lease keys do not collide with
/// unrelated keys in a shared store.
pub const DEFAULT_KEY_PREFIX: &str = "reservation-";

/// Configuration for a lease
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Time after which the store expires a lease that is not renewed
    pub ttl: Duration,

    /// Interval between renewals; zero disables renewal
    pub heartbeat: Duration,

    /// Sleep between attempts while blocking for a lease
    pub poll_interval: Duration,

    /// Prepended to the resource name to form the store key
    pub key_prefix: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            heartbeat: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_secs(1),
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
        }
    }
}

impl LeaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::InvalidConfig("ttl must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "poll interval must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Whether a held lease runs a renewal task.
    pub fn renews(&self) -> bool {
        !self.heartbeat.is_zero()
    }

    pub fn key_for(&self, resource: &str) -> String {
        format!("{}{}", self.key_prefix, resource)
    }
}

/// Lifecycle of a lease instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Never acquired, or the last acquisition attempt lost
    Unheld,

    /// This instance wrote the key and is renewing it
    Held,

    /// The key was deleted, or its deletion was attempted, by this instance
    Released,
}

/// What a scoped acquisition hands to its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    Held,

    /// Someone else holds the lease. `holder` is their owner token, if the key
    /// was still present when read.
    Contended { holder: Option<String> },
}

impl LeaseStatus {
    pub fn is_held(&self) -> bool {
        matches!(self, LeaseStatus::Held)
    }
}
