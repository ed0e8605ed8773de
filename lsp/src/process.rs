//! Server process launch and teardown.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::error::ClientError;
use crate::types::ServerConfig;

/// Spawn the server with all three standard streams piped.
///
/// `kill_on_drop` guarantees the child does not outlive a client that was
/// never closed.
pub(crate) fn spawn(config: &ServerConfig) -> Result<Child, ClientError> {
    let resolved_cmd =
        which::which(&config.command).map_err(|source| ClientError::CommandNotFound {
            command: config.command.clone(),
            source,
        })?;

    let mut cmd = Command::new(&resolved_cmd);
    cmd.args(config.command_args())
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn().map_err(|source| ClientError::Spawn {
        command: config.command.clone(),
        source,
    })
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
    // SAFETY: `pid` is our own child and has not been reaped (`id()` is Some).
    if unsafe { libc::kill(pid, libc::SIGTERM) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Ask the server to exit, wait up to `grace`, then kill. Reaps the child.
pub(crate) async fn terminate(
    child: &mut Child,
    server: &str,
    grace: Duration,
) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    if let Err(e) = request_termination(child) {
        tracing::debug!("terminating '{server}' failed: {e}");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::debug!("LSP '{server}' didn't exit in time, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}
