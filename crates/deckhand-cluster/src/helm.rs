// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Helm child-process management.
//!
//! Runs the `helm` binary with captured output, timeouts and a sanitised
//! environment. Install/upgrade returns a live process handle the caller
//! polls; uninstall and listing block. The chart repository index is
//! refreshed at most every five minutes, guarded by an OS file lock shared
//! with other processes on the host.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant, SystemTime};

use nix::fcntl::{Flock, FlockArg};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{HelmError, HelmResult};

/// How long the chart index cache stays fresh.
pub const INDEX_TTL: Duration = Duration::from_secs(5 * 60);

/// Poll interval while waiting on a helm process.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// stderr content that reports an error but must not fail the operation.
const ERRORS_TO_IGNORE: &[&str] = &[
    "release: already exists",
    "uninstallation completed with 1 error(s): uninstall: failed to purge the release",
];

/// Helm configuration.
#[derive(Debug, Clone)]
pub struct HelmConfig {
    /// Chart repository name, e.g. `mojanalytics`.
    pub repo_name: String,
    /// Chart repository URL.
    pub repo_url: String,
    /// Directory holding the repository index cache.
    pub cache_dir: PathBuf,
    /// Timeout for blocking uninstalls.
    pub uninstall_timeout: Duration,
}

impl HelmConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `DECKHAND_HELM_REPO` (default: mojanalytics)
    /// - `DECKHAND_HELM_REPO_URL`
    /// - `DECKHAND_HELM_CACHE_DIR` (default: .helm-cache)
    /// - `DECKHAND_HELM_UNINSTALL_TIMEOUT_SECS` (default: 300)
    pub fn from_env() -> Self {
        Self {
            repo_name: std::env::var("DECKHAND_HELM_REPO")
                .unwrap_or_else(|_| "mojanalytics".to_string()),
            repo_url: std::env::var("DECKHAND_HELM_REPO_URL").unwrap_or_default(),
            cache_dir: PathBuf::from(
                std::env::var("DECKHAND_HELM_CACHE_DIR").unwrap_or_else(|_| ".helm-cache".into()),
            ),
            uninstall_timeout: Duration::from_secs(
                std::env::var("DECKHAND_HELM_UNINSTALL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }
}

/// Lifecycle of a spawned helm process.
#[derive(Debug)]
pub enum ProcessState {
    /// Still running.
    Running {
        /// PID captured at spawn time.
        pid: Option<u32>,
    },
    /// Exited; output fully drained.
    Done {
        /// Exit code (-1 when terminated by signal).
        code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// A live helm subprocess with captured output.
///
/// The handle is process-local and never shared across processes; callers
/// poll [`HelmProcess::poll`] until the state is `Done`.
pub struct HelmProcess {
    child: Child,
    pid: Option<u32>,
    stdout_reader: Option<JoinHandle<String>>,
    stderr_reader: Option<JoinHandle<String>>,
    done: Option<(i32, String, String)>,
    /// The argument list, kept for logging.
    pub args: Vec<String>,
}

fn drain_reader<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = String::new();
        let _ = reader.read_to_string(&mut buf).await;
        buf
    })
}

impl HelmProcess {
    fn spawn(args: Vec<String>) -> HelmResult<Self> {
        info!(command = %format!("helm {}", args.join(" ")), "Spawning helm");

        let mut cmd = Command::new("helm");
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // helm changes behaviour when DEBUG is present
            .env_remove("DEBUG");

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, "Failed to spawn helm");
            HelmError::Spawn(e.to_string())
        })?;
        let pid = child.id();
        let stdout_reader = child.stdout.take().map(drain_reader);
        let stderr_reader = child.stderr.take().map(drain_reader);

        Ok(Self {
            child,
            pid,
            stdout_reader,
            stderr_reader,
            done: None,
            args,
        })
    }

    /// PID of the running process, when available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn collect_output(&mut self, code: i32) -> (i32, String, String) {
        let stdout = match self.stdout_reader.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match self.stderr_reader.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        (code, stdout, stderr)
    }

    /// Non-blocking check of the process state.
    pub async fn poll(&mut self) -> HelmResult<ProcessState> {
        if let Some((code, stdout, stderr)) = &self.done {
            return Ok(ProcessState::Done {
                code: *code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            });
        }
        match self.child.try_wait()? {
            None => Ok(ProcessState::Running { pid: self.pid }),
            Some(status) => {
                let code = status.code().unwrap_or(-1);
                let (code, stdout, stderr) = self.collect_output(code).await;
                self.done = Some((code, stdout.clone(), stderr.clone()));
                Ok(ProcessState::Done {
                    code,
                    stdout,
                    stderr,
                })
            }
        }
    }

    /// Wait for exit, killing the process when the timeout expires.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> HelmResult<(i32, String, String)> {
        let start = Instant::now();
        loop {
            if let ProcessState::Done {
                code,
                stdout,
                stderr,
            } = self.poll().await?
            {
                return Ok((code, stdout, stderr));
            }
            if let Some(timeout) = timeout {
                if start.elapsed() > timeout {
                    warn!(args = ?self.args, "Helm command timed out, killing");
                    let _ = self.child.start_kill();
                    return Err(HelmError::Timeout {
                        seconds: timeout.as_secs(),
                    });
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn contains_ignorable_error(text: &str) -> bool {
    ERRORS_TO_IGNORE.iter().any(|e| text.contains(e))
}

/// Whether captured output reports an error that must fail the command.
fn should_raise_error(stderr: &str, stdout: &str) -> bool {
    let stderr = stderr.to_lowercase();
    let stdout = stdout.to_lowercase();
    if !stderr.contains("error") && !stdout.contains("error") {
        return false;
    }
    !(contains_ignorable_error(&stderr) || contains_ignorable_error(&stdout))
}

fn is_release_not_found(stderr: &str) -> bool {
    stderr.to_lowercase().contains("not found")
}

/// Render `--set key=value` arguments; commas in values are escaped, and
/// parameters with empty values are dropped with a log line.
pub fn set_value_args(values: &[(String, String)]) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in values {
        if value.is_empty() {
            warn!(key = %key, "Missing value for helm chart param, skipping");
            continue;
        }
        args.push("--set".to_string());
        args.push(format!("{}={}", key, value.replace(',', "\\,")));
    }
    args
}

/// Helm command runner.
pub struct Helm {
    config: HelmConfig,
}

impl Helm {
    /// Create a runner with the given configuration.
    pub fn new(config: HelmConfig) -> Self {
        Self { config }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(HelmConfig::from_env())
    }

    /// The runner's configuration.
    pub fn config(&self) -> &HelmConfig {
        &self.config
    }

    /// Path of the chart repository index cache file.
    pub fn index_path(&self) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}-index.yaml", self.config.repo_name))
    }

    /// Run a blocking helm command, classifying failures.
    async fn execute(&self, args: Vec<String>, timeout: Option<Duration>) -> HelmResult<String> {
        let mut process = HelmProcess::spawn(args)?;
        let (code, stdout, stderr) = process.wait(timeout).await?;

        if code != 0 {
            warn!(code, stderr = %stderr, "Helm returned non-zero");
            if is_release_not_found(&stderr) {
                return Err(HelmError::ReleaseNotFound {
                    release: stderr.trim().to_string(),
                });
            }
            return Err(HelmError::Failed {
                code: Some(code),
                stderr,
            });
        }
        if !stderr.is_empty() {
            error!(stderr = %stderr, "Helm wrote to stderr");
            if should_raise_error(&stderr, &stdout) {
                if is_release_not_found(&stderr) {
                    return Err(HelmError::ReleaseNotFound {
                        release: stderr.trim().to_string(),
                    });
                }
                return Err(HelmError::Failed { code: None, stderr });
            }
            info!("Error safely ignored");
        }
        Ok(stdout)
    }

    /// Whether the index cache is younger than the TTL.
    fn index_is_fresh(&self) -> bool {
        let Ok(metadata) = std::fs::metadata(self.index_path()) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age < INDEX_TTL)
            .unwrap_or(false)
    }

    /// Refresh the local chart repository index. Skipped while the cache
    /// is fresh unless forced. The update runs under an exclusive file
    /// lock shared with other processes on the host; the command itself is
    /// unbounded.
    pub async fn repo_update(&self, force: bool) -> HelmResult<()> {
        if !force && self.index_is_fresh() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.config.cache_dir)?;
        let lock_path = self.config.cache_dir.join(".repo-update.lock");
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        let lock = tokio::task::spawn_blocking(move || {
            Flock::lock(lock_file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| std::io::Error::from(errno))
        })
        .await
        .map_err(|e| HelmError::Spawn(e.to_string()))??;

        // another process may have refreshed while we waited on the lock
        if !force && self.index_is_fresh() {
            drop(lock);
            return Ok(());
        }

        let result = self
            .execute(vec!["repo".to_string(), "update".to_string()], None)
            .await;
        drop(lock);
        result.map(|_| ())
    }

    /// Default values of a chart, as YAML.
    pub async fn show_values(&self, chart: &str) -> HelmResult<String> {
        self.execute(
            vec!["show".to_string(), "values".to_string(), chart.to_string()],
            Some(Duration::from_secs(5 * 60)),
        )
        .await
    }

    /// Start `helm upgrade --install` and return the live process for the
    /// caller to poll.
    pub fn upgrade_install(
        &self,
        release: &str,
        chart: &str,
        version: Option<&str>,
        namespace: &str,
        set_values: &[(String, String)],
    ) -> HelmResult<HelmProcess> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            "--wait".to_string(),
            "--force".to_string(),
            release.to_string(),
            chart.to_string(),
        ];
        if let Some(version) = version {
            args.push("--version".to_string());
            args.push(version.to_string());
        }
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
        args.extend(set_value_args(set_values));
        HelmProcess::spawn(args)
    }

    /// Uninstall releases from a namespace, blocking up to the configured
    /// timeout. Returns stdout. A missing release surfaces as
    /// [`HelmError::ReleaseNotFound`], which callers treat as non-fatal.
    pub async fn uninstall(&self, namespace: &str, releases: &[String]) -> HelmResult<String> {
        if namespace.is_empty() {
            return Err(HelmError::Failed {
                code: None,
                stderr: "a namespace is needed for removal of a release".to_string(),
            });
        }
        if releases.is_empty() {
            return Ok(String::new());
        }
        let mut args = vec!["uninstall".to_string()];
        args.extend(releases.iter().cloned());
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
        let stdout = self
            .execute(args, Some(self.config.uninstall_timeout))
            .await?;
        info!(stdout = %stdout.trim(), "Helm uninstall complete");
        Ok(stdout)
    }

    /// Names of releases, optionally filtered by release and namespace.
    pub async fn list_releases(
        &self,
        release: Option<&str>,
        namespace: Option<&str>,
    ) -> HelmResult<Vec<String>> {
        let mut args = vec!["list".to_string(), "-aq".to_string()];
        if let Some(release) = release {
            args.push("--filter".to_string());
            args.push(release.to_string());
        }
        if let Some(namespace) = namespace {
            args.push("--namespace".to_string());
            args.push(namespace.to_string());
        }
        let stdout = self.execute(args, Some(Duration::from_secs(60))).await?;
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }
}
