//! Blocking SSH session helpers.
//!
//! `ssh2` is a synchronous binding, so every call here blocks. The async
//! backend runs them on the blocking pool through [`blocking`].

use std::io::Read;
use std::net::TcpStream;

use splatscan_core::backend::BackendError;
use ssh2::Session;

use crate::RemoteConfig;

/// Captured result of a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

/// Open and authenticate a session using the configured credentials.
pub fn connect(config: &RemoteConfig) -> Result<Session, BackendError> {
    let address = format!("{}:{}", config.host, config.port);
    let tcp = TcpStream::connect(&address)
        .map_err(|e| BackendError::Connect(format!("cannot reach {address}: {e}")))?;

    let mut session =
        Session::new().map_err(|e| BackendError::Connect(format!("session init: {e}")))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(config.timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| BackendError::Connect(format!("handshake with {address}: {e}")))?;
    session
        .userauth_password(&config.credentials.username, config.credentials.password())
        .map_err(|e| BackendError::Connect(format!("authentication as {}: {e}", config.credentials.username)))?;

    if !session.authenticated() {
        return Err(BackendError::Connect(format!(
            "authentication as {} was rejected",
            config.credentials.username
        )));
    }

    tracing::info!(host = %config.host, user = %config.credentials.username, "SSH session established");
    Ok(session)
}

/// Run `command` on the remote host and collect its output.
pub fn exec(session: &Session, command: &str) -> std::io::Result<CommandOutput> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let (stdout, stderr) = collect_output(channel.stream(0), channel.stderr())?;

    channel.wait_close()?;
    let exit_status = channel.exit_status()?;

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_status,
    })
}

/// Read both output streams of a command to the end.
///
/// stderr is drained first. The commands run here print little on stdout
/// but a failing scheduler call can flood stderr, and an unread stderr
/// stalls the remote side before stdout reaches EOF.
fn collect_output<O, E>(mut stdout: O, mut stderr: E) -> std::io::Result<(String, String)>
where
    O: Read,
    E: Read,
{
    let mut err = String::new();
    stderr.read_to_string(&mut err)?;
    let mut out = String::new();
    stdout.read_to_string(&mut out)?;
    Ok((out, err))
}

/// Close the session, logging rather than returning failures.
pub fn disconnect(session: &Session) {
    if let Err(e) = session.disconnect(None, "job finished", None) {
        tracing::warn!(error = %e, "SSH disconnect failed");
    } else {
        tracing::info!("SSH session closed");
    }
}

/// Run a blocking closure on the blocking thread pool.
pub async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Io(std::io::Error::other(format!("blocking task failed: {e}"))))?
}
