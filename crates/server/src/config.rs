//! Process configuration read from the environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use tempfile::TempDir;
use tracing::info;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_GIT_BIN: &str = "git";
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_MAX_BODY: usize = 512 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(anyhow!("unknown log format `{other}` (expected `pretty` or `json`)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `None` means a temporary root is created at startup.
    pub repo_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub git_bin: PathBuf,
    pub git_timeout: Duration,
    pub git_max_body: usize,
    pub git_max_concurrency: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_dir: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            git_bin: PathBuf::from(DEFAULT_GIT_BIN),
            git_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            git_max_body: DEFAULT_MAX_BODY,
            git_max_concurrency: DEFAULT_MAX_CONCURRENCY,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unset and blank
    /// values fall back to the defaults; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let config = Self {
            repo_dir: get("GIT_REPO_DIR").map(PathBuf::from),
            host: get("ASGI_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse(&get, "ASGI_PORT", DEFAULT_PORT)?,
            workers: parse(&get, "ASGI_WORKERS", DEFAULT_WORKERS)?,
            git_bin: get("GIT_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GIT_BIN)),
            git_timeout: Duration::from_millis(parse(
                &get,
                "GIT_HTTP_TIMEOUT_MS",
                DEFAULT_TIMEOUT_MS,
            )?),
            git_max_body: parse(&get, "GIT_HTTP_MAX_BODY", DEFAULT_MAX_BODY)?,
            git_max_concurrency: parse(&get, "GIT_HTTP_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?,
            log_format: parse(&get, "LOG_FORMAT", LogFormat::Pretty)?,
        };

        if config.workers == 0 {
            bail!("ASGI_WORKERS must be at least 1");
        }
        if config.git_max_concurrency == 0 {
            bail!("GIT_HTTP_MAX_CONCURRENCY must be at least 1");
        }
        if config.git_timeout.is_zero() {
            bail!("GIT_HTTP_TIMEOUT_MS must be at least 1");
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow!("{err}"))
            .with_context(|| format!("invalid value `{raw}` for {key}")),
    }
}

/// Directory that holds the repositories. A temporary root is deleted when
/// this value is dropped.
#[derive(Debug)]
pub struct RepoRoot {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl RepoRoot {
    pub fn prepare(config: &Config) -> Result<Self> {
        match &config.repo_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("failed to create repository root {}", dir.display())
                })?;
                info!(root = %dir.display(), "using repository root");
                Ok(Self {
                    path: dir.clone(),
                    temp: None,
                })
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("git-gateway-")
                    .tempdir()
                    .context("failed to create temporary repository root")?;
                info!(root = %temp.path().display(), "using temporary repository root");
                Ok(Self {
                    path: temp.path().to_path_buf(),
                    temp: Some(temp),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}
