#![recursion_limit = "256"]

use std::process::ExitCode;

use clap::Parser;

use reservation_cli::{App, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut app = App::new(cli);
    match app.run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:?}", e);
            eprintln!("reserve: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
