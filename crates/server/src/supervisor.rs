use std::future::Future;

use anyhow::{Error, Result};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs named child tasks that share one shutdown token. The first child to
/// fail, or a termination signal, cancels the rest.
pub struct Supervisor {
    shutdown: CancellationToken,
    tasks: JoinSet<(String, Result<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn spawn<F, Fut>(&mut self, name: &'static str, factory: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown.child_token();
        self.tasks.spawn(async move {
            let result = factory(shutdown).await;
            (name.to_string(), result)
        });
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Like [`Supervisor::run`], with the termination trigger supplied by the
    /// caller.
    pub async fn run_until<S>(mut self, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut first_err: Option<Error> = None;
        tokio::pin!(signal);

        while !self.tasks.is_empty() {
            tokio::select! {
                Some(outcome) = self.tasks.join_next() => {
                    self.handle_task_outcome(&mut first_err, outcome);
                }
                _ = &mut signal, if !self.shutdown.is_cancelled() => {
                    info!("shutdown requested");
                    self.shutdown.cancel();
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn handle_task_outcome(
        &self,
        first_err: &mut Option<Error>,
        outcome: std::result::Result<(String, Result<()>), JoinError>,
    ) {
        match outcome {
            Ok((name, Ok(()))) => {
                info!(child = %name, "child exited gracefully");
            }
            Ok((name, Err(err))) => {
                error!(child = %name, error = %format!("{err:#}"), "child exited with error");
                if first_err.is_none() {
                    *first_err = Some(err);
                }
                self.cancel_all();
            }
            Err(join_err) => {
                error!(error = ?join_err, "child panicked");
                if first_err.is_none() {
                    *first_err = Some(join_err.into());
                }
                self.cancel_all();
            }
        }
    }

    fn cancel_all(&self) {
        if !self.shutdown.is_cancelled() {
            warn!("supervisor shutting down");
            self.shutdown.cancel();
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
