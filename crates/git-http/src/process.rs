//! Stateless-RPC invocations of `git upload-pack` / `git receive-pack`.
//!
//! Output is buffered in full so that the exit status is known before any
//! byte reaches the client. Children are spawned with `kill_on_drop`, so a
//! dropped request future (client disconnect, timeout) never leaves a
//! subprocess running.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::errors::GitHttpError;
use crate::service::Service;

/// Captured result of one subprocess run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    fn status_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "signal".to_string(),
        }
    }
}

impl From<std::process::Output> for ProcessOutput {
    fn from(output: std::process::Output) -> Self {
        ProcessOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Converts a non-zero exit into a [`GitHttpError::Process`].
pub fn require_success(
    service: Service,
    output: ProcessOutput,
) -> Result<ProcessOutput, GitHttpError> {
    if output.success() {
        return Ok(output);
    }
    metrics::counter!("git_http.process_failures", "service" => service.as_str()).increment(1);
    Err(GitHttpError::Process {
        service,
        status: output.status_label(),
        stderr: output.stderr_lossy(),
    })
}

/// Capability to run the repository-manipulation subprocess.
#[async_trait]
pub trait ServiceProcessRunner: Send + Sync {
    /// `<service> --stateless-rpc --advertise-refs <repo>` with empty stdin.
    async fn advertise(
        &self,
        service: Service,
        repo: &Path,
        git_protocol: Option<&str>,
    ) -> anyhow::Result<ProcessOutput>;

    /// `<service> --stateless-rpc <repo>` with `body` piped to stdin.
    async fn execute(
        &self,
        service: Service,
        repo: &Path,
        body: Bytes,
        git_protocol: Option<&str>,
    ) -> anyhow::Result<ProcessOutput>;
}

/// Runs the services through the system git binary.
#[derive(Debug, Clone)]
pub struct GitProcessRunner {
    git_bin: PathBuf,
}

impl Default for GitProcessRunner {
    fn default() -> Self {
        GitProcessRunner::new("git")
    }
}

impl GitProcessRunner {
    pub fn new(git_bin: impl Into<PathBuf>) -> Self {
        GitProcessRunner {
            git_bin: git_bin.into(),
        }
    }

    fn command(&self, service: Service, git_protocol: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.git_bin);
        cmd.arg(service.subcommand()).arg("--stateless-rpc");
        if let Some(protocol) = git_protocol {
            cmd.env("GIT_PROTOCOL", protocol);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ServiceProcessRunner for GitProcessRunner {
    #[instrument(skip(self, repo), fields(repo = %repo.display()))]
    async fn advertise(
        &self,
        service: Service,
        repo: &Path,
        git_protocol: Option<&str>,
    ) -> anyhow::Result<ProcessOutput> {
        let mut cmd = self.command(service, git_protocol);
        cmd.arg("--advertise-refs").arg(repo);
        cmd.stdin(Stdio::null());

        debug!("spawning git {} --advertise-refs", service.subcommand());

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn git {}", service.subcommand()))?;
        Ok(output.into())
    }

    #[instrument(skip(self, repo, body), fields(repo = %repo.display(), body_len = body.len()))]
    async fn execute(
        &self,
        service: Service,
        repo: &Path,
        body: Bytes,
        git_protocol: Option<&str>,
    ) -> anyhow::Result<ProcessOutput> {
        let mut cmd = self.command(service, git_protocol);
        cmd.arg(repo);
        cmd.stdin(Stdio::piped());

        debug!("spawning git {}", service.subcommand());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn git {}", service.subcommand()))?;
        let mut stdin = child.stdin.take().context("missing git stdin")?;

        // Feed stdin while stdout/stderr drain, otherwise a large response
        // can fill the pipe and deadlock both sides.
        let feed = async move {
            match stdin.write_all(&body).await {
                Ok(()) => {}
                // git may exit before consuming everything; its exit status
                // carries the actual failure.
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("git closed stdin early");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
            stdin.shutdown().await.or_else(|err| {
                if err.kind() == io::ErrorKind::BrokenPipe {
                    Ok(())
                } else {
                    Err(err)
                }
            })
        };

        let ((), output) = futures::try_join!(feed, child.wait_with_output())
            .with_context(|| format!("git {} i/o failed", service.subcommand()))?;
        Ok(output.into())
    }
}
