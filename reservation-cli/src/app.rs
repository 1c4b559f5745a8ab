use std::process::{ExitCode, ExitStatus};

use anyhow::{anyhow, Context, Result};
use reservation::{Lease, LeaseStatus, RedisStore, SignalDispatch, Store};
use tokio::{process::Command, select, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{cli::Commands, initialize_stderr_logging, Cli};

/// Exit status when the resource is reserved by someone else (EX_TEMPFAIL).
pub const EXIT_CONTENDED: u8 = 75;

/// Exit status when interrupted before the lease was acquired.
pub const EXIT_INTERRUPTED: u8 = 130;

pub struct App {
    cli: Cli,
}

impl App {
    pub fn new(cli: Cli) -> App {
        App { cli }
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self) -> Result<ExitCode> {
        if self.cli.version() {
            println!("reserve {}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }

        initialize_stderr_logging();

        match self.cli.commands {
            Commands::Run {
                ref key,
                ref owner,
                wait,
                ref command,
            } => self.run_command(key, owner, wait, command).await,
            Commands::Holder { ref key } => self.print_holder(key).await,
            Commands::Version => Ok(ExitCode::SUCCESS),
        }
    }

    async fn connect(&self) -> Result<RedisStore> {
        RedisStore::connect_with_backoff(&self.cli.redis_url)
            .await
            .with_context(|| format!("connecting to {}", self.cli.redis_url))
    }

    #[tracing::instrument(skip_all, err)]
    async fn print_holder(&self, key: &str) -> Result<ExitCode> {
        let store = self.connect().await?;
        let stored_key = self.cli.lease_config().key_for(key);
        match store.get(&stored_key).await? {
            Some(holder) => {
                println!("{}", holder);
                Ok(ExitCode::SUCCESS)
            }
            None => Ok(ExitCode::FAILURE),
        }
    }

    #[tracing::instrument(skip_all, fields(key = %key, owner = %owner), err)]
    async fn run_command(
        &self,
        key: &str,
        owner: &str,
        wait: bool,
        command: &[String],
    ) -> Result<ExitCode> {
        let store = self.connect().await?;
        let lease = Lease::new(store, key, owner, self.cli.lease_config())?;
        SignalDispatch::install_global()?;
        hold_and_run(&lease, SignalDispatch::global(), wait, command).await
    }
}

/// Run `command` within the scope of `lease`.
///
/// A termination dispatched through `dispatch` stops the command and waits
/// for the scope to end, lease release included, before the lease's own
/// handler runs. The lease is never released while the command is alive.
async fn hold_and_run<S: Store>(
    lease: &Lease<S>,
    dispatch: &SignalDispatch,
    wait: bool,
    command: &[String],
) -> Result<ExitCode> {
    let mut tasks = JoinSet::new();

    // Set up cancellation token
    let cancel = CancellationToken::new();
    let scope_done = CancellationToken::new();
    let scope_guard = scope_done.clone().drop_guard();

    // Registered after the lease, so it runs ahead of the lease's handler.
    let term_cancel = cancel.clone();
    let term_done = scope_done.clone();
    let _term = dispatch.register(move || {
        let term_cancel = term_cancel.clone();
        let term_done = term_done.clone();
        async move {
            term_cancel.cancel();
            term_done.cancelled().await;
        }
    });

    // Set up ctrl-c handler
    let ctrl_c_cancel = cancel.clone();
    tasks.spawn(async move {
        select! {
            _ = ctrl_c_cancel.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received ctrl-c, shutting down...");
                ctrl_c_cancel.cancel();
            }
        }
    });

    let child_cancel = cancel.clone();
    let res = lease
        .with_lease_until(&cancel, wait, |status| async move {
            match status {
                LeaseStatus::Held => run_child(command, &child_cancel).await,
                LeaseStatus::Contended { holder } => {
                    warn!(
                        holder = holder.as_deref().unwrap_or("<expired>"),
                        "resource already reserved"
                    );
                    Ok(ExitCode::from(EXIT_CONTENDED))
                }
            }
        })
        .await;
    drop(scope_guard);

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(err = ?e, "background task");
        }
    }

    match res {
        Ok(code) => code,
        Err(e) if e.is_cancelled() => Ok(ExitCode::from(EXIT_INTERRUPTED)),
        Err(e) => Err(e.into()),
    }
}

/// Run `command` to completion, killing it if `cancel` fires first.
async fn run_child(command: &[String], cancel: &CancellationToken) -> Result<ExitCode> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("no command given"))?;
    let mut child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {}", program))?;
    debug!(pid = child.id(), %program, "started");

    select! {
        status = child.wait() => {
            let status = status?;
            info!(%status, "command exited");
            Ok(exit_code(status))
        }
        _ = cancel.cancelled() => {
            warn!(%program, "stopping command");
            child.kill().await?;
            Ok(exit_code(child.wait().await?))
        }
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    if let Some(code) = status.code() {
        return ExitCode::from(u8::try_from(code).unwrap_or(1));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitCode::from(128u8.saturating_add(u8::try_from(signal).unwrap_or(0)));
        }
    }
    ExitCode::FAILURE
}
