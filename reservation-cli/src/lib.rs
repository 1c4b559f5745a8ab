#![recursion_limit = "256"]

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod app;
pub mod cli;

pub use app::App;
pub use cli::Cli;

/// Log to stderr, leaving stdout to the wrapped command.
pub fn initialize_stderr_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter())
        .init();
}

fn env_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::builder().from_env_lossy()
    } else {
        EnvFilter::new("reservation=info,reservation_cli=info,reserve=info")
    }
}
