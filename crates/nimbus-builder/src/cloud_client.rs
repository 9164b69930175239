//! Wrapper around the Nimbus `cloud-client.sh` command line tool.
//!
//! Every operation spawns the tool once and captures its output. Calls that
//! take a [`CancellationToken`] kill the child process when the token fires
//! and hand back what it printed before dying. Terminate runs during cleanup
//! and is never cancellable.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CloudClientError;

/// Location of the tool inside a cloud client installation.
pub const CLOUD_CLIENT_SCRIPT: &str = "bin/cloud-client.sh";

/// How long output is still collected after a cancelled call is killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(2);

/// Parameters for launching an instance.
#[derive(Debug, Clone, Copy)]
pub struct RunInstance<'a> {
    pub conf: &'a Path,
    pub hours: u32,
    pub image: &'a str,
    pub ssh_pubkey: &'a Path,
}

/// Parameters for capturing an instance into an image.
#[derive(Debug, Clone, Copy)]
pub struct SaveInstance<'a> {
    pub conf: &'a Path,
    pub handle: &'a str,
    pub new_name: &'a str,
    /// Publish to the common repository.
    pub common: bool,
}

#[derive(Debug, Clone)]
pub struct CloudClient {
    command: PathBuf,
}

impl CloudClient {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Find the tool under a cloud client installation directory.
    ///
    /// # Errors
    ///
    /// [`CloudClientError::NotFound`] unless the script exists and is
    /// executable.
    pub fn locate(install_dir: &Path) -> Result<Self, CloudClientError> {
        let command = install_dir.join(CLOUD_CLIENT_SCRIPT);
        if !is_executable(&command) {
            return Err(CloudClientError::NotFound { path: command });
        }
        Ok(Self::new(command))
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    /// Launch an instance and return the tool's stdout.
    pub async fn run_instance(
        &self,
        request: RunInstance<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, CloudClientError> {
        let mut args = conf_args(request.conf);
        args.push("--run".into());
        args.push("--hours".into());
        args.push(request.hours.to_string().into());
        args.push("--name".into());
        args.push(request.image.into());
        args.push("--ssh-pubkey".into());
        args.push(request.ssh_pubkey.into());
        self.invoke(args, Some(cancel)).await
    }

    /// Capture a running instance as a new image.
    pub async fn save(
        &self,
        request: SaveInstance<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, CloudClientError> {
        let mut args = conf_args(request.conf);
        args.push("--save".into());
        args.push("--handle".into());
        args.push(request.handle.into());
        args.push("--newname".into());
        args.push(request.new_name.into());
        if request.common {
            args.push("--common".into());
        }
        self.invoke(args, Some(cancel)).await
    }

    pub async fn terminate(&self, conf: &Path, handle: &str) -> Result<String, CloudClientError> {
        let mut args = conf_args(conf);
        args.push("--terminate".into());
        args.push("--handle".into());
        args.push(handle.into());
        self.invoke(args, None).await
    }

    async fn invoke(
        &self,
        args: Vec<OsString>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, CloudClientError> {
        debug!(command = %self.command.display(), args = ?args, "executing cloud client");

        let spawn_error = |source| CloudClientError::Spawn {
            command: self.command.display().to_string(),
            source,
        };

        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let token = cancel.cloned().unwrap_or_default();

        let cancelled = {
            let pipes = async {
                tokio::try_join!(
                    read_pipe(stdout_pipe, &mut stdout),
                    read_pipe(stderr_pipe, &mut stderr)
                )
            };
            tokio::pin!(pipes);

            tokio::select! {
                read = &mut pipes => {
                    read.map_err(spawn_error)?;
                    false
                }
                () = token.cancelled() => {
                    debug!(command = %self.command.display(), "cloud client killed by cancellation");
                    if let Err(e) = child.start_kill() {
                        debug!(error = %e, "cloud client already exited");
                    }
                    // Keep whatever the tool printed before it died.
                    if tokio::time::timeout(DRAIN_AFTER_KILL, &mut pipes).await.is_err() {
                        debug!("cloud client output still open after kill");
                    }
                    true
                }
            }
        };

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        if cancelled {
            return Err(CloudClientError::Cancelled { stdout });
        }

        let status = child.wait().await.map_err(spawn_error)?;
        let stderr = String::from_utf8_lossy(&stderr);
        debug!(stdout = %stdout.trim_end(), "cloud client stdout");
        if !stderr.is_empty() {
            debug!(stderr = %stderr.trim_end(), "cloud client stderr");
        }

        if !status.success() {
            return Err(CloudClientError::Exit {
                code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Read `pipe` to EOF into `buf`. Bytes read so far stay in `buf` if the
/// future is dropped early.
async fn read_pipe<R>(pipe: Option<R>, buf: &mut Vec<u8>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(buf).await?;
    }
    Ok(())
}

fn conf_args(conf: &Path) -> Vec<OsString> {
    vec!["--conf".into(), conf.into()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn create_client_script(dir: &Path, script: &str) -> PathBuf {
        let bin = dir.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let path = bin.join("cloud-client.sh");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_locate_requires_executable_script() {
        let tmp = TempDir::new().unwrap();
        let err = CloudClient::locate(tmp.path()).unwrap_err();
        assert!(matches!(err, CloudClientError::NotFound { .. }));

        let script = create_client_script(tmp.path(), "#!/bin/sh\n");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(CloudClient::locate(tmp.path()).is_err());

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let client = CloudClient::locate(tmp.path()).unwrap();
        assert_eq!(client.command(), script);
    }

    #[tokio::test]
    async fn test_run_instance_passes_arguments_and_returns_stdout() {
        let tmp = TempDir::new().unwrap();
        create_client_script(tmp.path(), "#!/bin/sh\necho \"$@\"\n");
        let client = CloudClient::locate(tmp.path()).unwrap();

        let stdout = client
            .run_instance(
                RunInstance {
                    conf: Path::new("/tmp/conf"),
                    hours: 2,
                    image: "base.img",
                    ssh_pubkey: Path::new("/tmp/key.pub"),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            stdout.trim(),
            "--conf /tmp/conf --run --hours 2 --name base.img --ssh-pubkey /tmp/key.pub"
        );
    }

    #[tokio::test]
    async fn test_save_adds_common_only_when_public() {
        let tmp = TempDir::new().unwrap();
        create_client_script(tmp.path(), "#!/bin/sh\necho \"$@\"\n");
        let client = CloudClient::locate(tmp.path()).unwrap();
        let token = CancellationToken::new();

        let mut request = SaveInstance {
            conf: Path::new("c"),
            handle: "vm-7",
            new_name: "img-1",
            common: false,
        };
        let private = client.save(request, &token).await.unwrap();
        assert_eq!(private.trim(), "--conf c --save --handle vm-7 --newname img-1");

        request.common = true;
        let public = client.save(request, &token).await.unwrap();
        assert!(public.trim().ends_with("--newname img-1 --common"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let tmp = TempDir::new().unwrap();
        create_client_script(
            tmp.path(),
            "#!/bin/sh\necho 'partial output'\necho 'Problem: no such workspace' >&2\nexit 3\n",
        );
        let client = CloudClient::locate(tmp.path()).unwrap();

        let err = client.terminate(Path::new("c"), "vm-1").await.unwrap_err();
        match err {
            CloudClientError::Exit { code, stderr } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "Problem: no such workspace");
            }
            other => panic!("expected Exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let tmp = TempDir::new().unwrap();
        create_client_script(tmp.path(), "#!/bin/sh\nexec sleep 30\n");
        let client = CloudClient::locate(tmp.path()).unwrap();
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            })
        };

        let started = Instant::now();
        let err = client
            .run_instance(
                RunInstance {
                    conf: Path::new("c"),
                    hours: 1,
                    image: "base.img",
                    ssh_pubkey: Path::new("k"),
                },
                &token,
            )
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, CloudClientError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_output_printed_so_far() {
        let tmp = TempDir::new().unwrap();
        create_client_script(
            tmp.path(),
            "#!/bin/sh\necho 'Creating workspace \"vm-9\"... done.'\nexec sleep 30\n",
        );
        let client = CloudClient::locate(tmp.path()).unwrap();
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                token.cancel();
            })
        };

        let err = client
            .run_instance(
                RunInstance {
                    conf: Path::new("c"),
                    hours: 1,
                    image: "base.img",
                    ssh_pubkey: Path::new("k"),
                },
                &token,
            )
            .await
            .unwrap_err();
        canceller.await.unwrap();

        match err {
            CloudClientError::Cancelled { stdout } => {
                assert!(stdout.contains("Creating workspace \"vm-9\""));
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let client = CloudClient::new(tmp.path().join("absent.sh"));
        let err = client.terminate(Path::new("c"), "vm-1").await.unwrap_err();
        assert!(matches!(err, CloudClientError::Spawn { .. }));
    }
}
