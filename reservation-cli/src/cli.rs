use std::time::Duration;

use clap::{Parser, Subcommand};
use reservation::{lease::DEFAULT_KEY_PREFIX, LeaseConfig};

#[derive(Parser, Debug)]
#[command(name = "reserve")]
#[command(bin_name = "reserve")]
pub struct Cli {
    /// Redis server holding the leases
    #[arg(long, env = "RESERVATION_REDIS_URL", default_value = "redis://127.0.0.1/")]
    pub redis_url: String,

    /// Prefix namespacing lease keys in the store
    #[arg(long, env = "RESERVATION_KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub prefix: String,

    /// Seconds before an unrenewed lease expires
    #[arg(long, env = "RESERVATION_TTL", default_value = "1800", value_parser = parse_secs)]
    pub ttl: Duration,

    /// Seconds between renewals; 0 disables renewal
    #[arg(long, env = "RESERVATION_HEARTBEAT", default_value = "600", value_parser = parse_secs)]
    pub heartbeat: Duration,

    /// Seconds between attempts with --wait
    #[arg(long, env = "RESERVATION_POLL_INTERVAL", default_value = "1", value_parser = parse_secs)]
    pub poll_interval: Duration,

    #[command(subcommand)]
    pub commands: Commands,
}

impl Cli {
    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            ttl: self.ttl,
            heartbeat: self.heartbeat,
            poll_interval: self.poll_interval,
            key_prefix: self.prefix.to_owned(),
        }
    }

    pub fn version(&self) -> bool {
        matches!(self.commands, Commands::Version)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command while holding the lease on a resource
    Run {
        /// Resource to reserve
        #[arg(long, short = 'k')]
        key: String,

        /// Owner name recorded in the lease
        #[arg(long = "by", short = 'b', env = "RESERVATION_OWNER")]
        owner: String,

        /// Wait for the resource instead of giving up when it is reserved
        #[arg(long, short = 'w')]
        wait: bool,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the current holder of a resource
    Holder {
        #[arg(long, short = 'k')]
        key: String,
    },
    Version,
}

/// Parse a possibly fractional number of seconds. Negative values become
/// zero.
fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{s}: {e}"))?;
    Duration::try_from_secs_f64(secs.max(0.0)).map_err(|e| format!("{s}: {e}"))
}
