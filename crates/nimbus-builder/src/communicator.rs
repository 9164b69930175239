//! Remote command execution on the source instance.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ConnectError;
use crate::ssh::SshConfig;

/// Result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An established session on the source instance.
#[async_trait]
pub trait Communicator: Send + Sync {
    async fn execute(&self, command: &str) -> Result<RemoteOutput, ConnectError>;
}

/// Opens sessions. One attempt per call; retrying is the caller's job.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        config: &SshConfig,
    ) -> Result<Arc<dyn Communicator>, ConnectError>;
}

/// [`Connector`] backed by libssh2.
#[derive(Debug, Clone)]
pub struct Ssh2Connector {
    handshake_timeout: Duration,
}

impl Default for Ssh2Connector {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl Ssh2Connector {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for Ssh2Connector {
    async fn connect(
        &self,
        address: &str,
        config: &SshConfig,
    ) -> Result<Arc<dyn Communicator>, ConnectError> {
        let address = address.to_string();
        let config = config.clone();
        let timeout = self.handshake_timeout;

        let session = tokio::task::spawn_blocking(move || -> Result<_, ConnectError> {
            let socket = address
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| ConnectError::Resolve(address.clone()))?;
            let tcp = TcpStream::connect_timeout(&socket, timeout)?;

            let mut session = ssh2::Session::new()?;
            session.set_tcp_stream(tcp);
            session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
            session.handshake()?;
            session.userauth_pubkey_memory(&config.username, None, config.private_key(), None)?;
            if !session.authenticated() {
                return Err(ConnectError::AuthRejected(config.username));
            }
            // Commands may run far longer than the handshake.
            session.set_timeout(0);
            Ok(session)
        })
        .await
        .map_err(|e| ConnectError::Task(e.to_string()))??;

        debug!("SSH session established");
        Ok(Arc::new(Ssh2Communicator {
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

struct Ssh2Communicator {
    session: Arc<Mutex<ssh2::Session>>,
}

#[async_trait]
impl Communicator for Ssh2Communicator {
    async fn execute(&self, command: &str) -> Result<RemoteOutput, ConnectError> {
        let session = Arc::clone(&self.session);
        let command = command.to_string();

        tokio::task::spawn_blocking(move || -> Result<_, ConnectError> {
            let session = session.lock();
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;

            session.set_blocking(false);
            let read = read_interleaved(
                &mut channel.stream(0),
                &mut channel.stderr(),
                OUTPUT_POLL_INTERVAL,
            );
            session.set_blocking(true);
            let (stdout, stderr) = read?;

            channel.wait_close()?;
            Ok(RemoteOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_status: channel.exit_status()?,
            })
        })
        .await
        .map_err(|e| ConnectError::Task(e.to_string()))?
    }
}

/// Pause between polls when neither stream had data.
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Drain two non-blocking streams of one channel together until both reach
/// EOF, so a full window on one never stalls the other.
fn read_interleaved<O, E>(
    stdout: &mut O,
    stderr: &mut E,
    poll_interval: Duration,
) -> io::Result<(Vec<u8>, Vec<u8>)>
where
    O: Read,
    E: Read,
{
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_open = true;
    let mut err_open = true;
    let mut buf = [0u8; 8192];

    while out_open || err_open {
        let mut progressed = false;
        if out_open {
            out_open = read_chunk(stdout, &mut buf, &mut out, &mut progressed)?;
        }
        if err_open {
            err_open = read_chunk(stderr, &mut buf, &mut err, &mut progressed)?;
        }
        if !progressed && (out_open || err_open) {
            std::thread::sleep(poll_interval);
        }
    }
    Ok((out, err))
}

/// One read attempt. Returns whether the stream is still open.
fn read_chunk<R: Read>(
    stream: &mut R,
    buf: &mut [u8],
    into: &mut Vec<u8>,
    progressed: &mut bool,
) -> io::Result<bool> {
    match stream.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            into.extend_from_slice(&buf[..n]);
            *progressed = true;
            Ok(true)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
