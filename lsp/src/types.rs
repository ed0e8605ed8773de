//! Public configuration and report types.
//!
//! [`ServerConfig`] and [`ClientOptions`] deserialize from the `[server]` and
//! `[client]` tables of a probe configuration file; [`ExitReport`] is what
//! [`crate::LspClient::close`] hands back.

use std::collections::BTreeMap;
use std::process::ExitStatus;
use std::time::Duration;

use serde::Deserialize;

fn default_log_level_flag() -> String {
    String::from("--log-level")
}

/// How to launch a language server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable command (e.g. "rust-analyzer"), resolved through `PATH`.
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Verbosity passed to the server at startup. Omitted when unset.
    #[serde(default)]
    pub log_level: Option<String>,
    /// Flag that carries `log_level`. Default: `--log-level`.
    #[serde(default = "default_log_level_flag")]
    pub log_level_flag: String,
    /// Extra environment for the server process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            log_level: None,
            log_level_flag: default_log_level_flag(),
            env: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Full argument list: configured args, then the verbosity flag.
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(level) = &self.log_level {
            args.push(self.log_level_flag.clone());
            args.push(level.clone());
        }
        args
    }
}

/// Tuning for one client connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Deadline for each request in milliseconds. `0` waits forever.
    pub request_timeout_ms: u64,
    /// How long `close` waits after requesting termination before killing.
    pub shutdown_timeout_ms: u64,
    /// Notifications buffered until the caller drains them.
    pub notification_capacity: usize,
    /// Server stderr lines buffered until the caller drains them.
    pub diagnostic_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            shutdown_timeout_ms: 2_000,
            notification_capacity: 256,
            diagnostic_capacity: 1024,
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Outcome of closing a client: how the server exited and what it said last.
#[derive(Debug)]
pub struct ExitReport {
    status: ExitStatus,
    diagnostics: Vec<String>,
    dropped_diagnostics: u64,
}

impl ExitReport {
    pub(crate) fn new(status: ExitStatus, diagnostics: Vec<String>, dropped_diagnostics: u64) -> Self {
        Self {
            status,
            diagnostics,
            dropped_diagnostics,
        }
    }

    #[must_use]
    pub fn status(&self) -> ExitStatus {
        self.status
    }

    /// Exit code, `None` when the process was killed by a signal.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Stderr lines not yet drained when the server exited.
    #[must_use]
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Stderr lines discarded over the client's lifetime because the buffer
    /// was full.
    #[must_use]
    pub fn dropped_diagnostics(&self) -> u64 {
        self.dropped_diagnostics
    }
}
