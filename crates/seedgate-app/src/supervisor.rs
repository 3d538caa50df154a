//! Lifecycle supervision: every servable runs in its own task; the first
//! fatal error, a termination signal, or the grace listener ends the process
//! after an orderly drain.

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long servables get to wind down after the shutdown signal.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// One long-running service owned by the supervisor.
#[async_trait]
pub trait Servable: Send + 'static {
    /// Name used in logs and error contexts.
    fn name(&self) -> &'static str;

    /// Run until completion or until `shutdown` fires. Returning an error
    /// terminates the whole process.
    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Run all servables, propagating the first fatal error upward.
///
/// `SIGINT`/`SIGTERM` (and any servable that cancels the token itself, such
/// as the grace listener) cause an orderly shutdown with exit code zero.
pub async fn supervise(
    servables: Vec<Box<dyn Servable>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();
    for servable in servables {
        let name = servable.name();
        let token = shutdown.clone();
        info!(servable = name, "starting");
        tasks.spawn(async move { (name, servable.serve(token).await) });
    }

    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;

    let outcome = loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("got SIGINT");
                break Ok(());
            }
            _ = sigterm.recv() => {
                info!("got SIGTERM");
                break Ok(());
            }
            joined = tasks.join_next() => match joined {
                None => break Ok(()),
                Some(Ok((name, Ok(())))) => {
                    info!(servable = name, "finished");
                }
                Some(Ok((name, Err(err)))) => {
                    error!(servable = name, error = %err, "servable failed");
                    break Err(err.context(name));
                }
                Some(Err(err)) => {
                    break Err(anyhow::anyhow!("servable task panicked: {err}"));
                }
            }
        }
    };

    shutdown.cancel();
    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
        warn!("servables did not stop within the drain window; aborting");
        tasks.abort_all();
    }
    outcome
}
