//! Host process capabilities consumed by nodes.

use std::io;
use std::path::Path;
use std::process::Stdio;

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::debug;

/// How a server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "termination by signal"),
        }
    }
}

/// Captured output of a short-lived invocation such as `mongod --version`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A running server process.
#[async_trait::async_trait]
pub trait ServerProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Ask the process to shut down cleanly.
    async fn terminate(&mut self) -> io::Result<()>;

    /// Force the process down and reap it.
    async fn kill(&mut self) -> io::Result<()>;

    async fn wait(&mut self) -> io::Result<ProcessExit>;
}

/// Everything a node needs from its host: spawning server processes,
/// capturing version output and clearing data directories.
#[async_trait::async_trait]
pub trait Launcher: Send + Sync {
    async fn spawn(&self, binary: &str, args: &[String]) -> io::Result<Box<dyn ServerProcess>>;

    async fn capture(&self, binary: &str, args: &[String]) -> io::Result<CapturedOutput>;

    /// Remove everything under `path`, leaving an empty directory behind.
    async fn purge_dir(&self, path: &Path) -> io::Result<()>;
}

/// Launches real processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait::async_trait]
impl Launcher for TokioLauncher {
    async fn spawn(&self, binary: &str, args: &[String]) -> io::Result<Box<dyn ServerProcess>> {
        debug!("Spawning {binary} {}", args.join(" "));
        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Box::new(TokioProcess { child }))
    }

    async fn capture(&self, binary: &str, args: &[String]) -> io::Result<CapturedOutput> {
        let output = Command::new(binary).args(args).output().await?;
        Ok(CapturedOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn purge_dir(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(path).await
    }
}

struct TokioProcess {
    child: Child,
}

#[async_trait::async_trait]
impl ServerProcess for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit {
                code: status.code(),
            }))
    }

    async fn terminate(&mut self) -> io::Result<()> {
        request_shutdown(&mut self.child)
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(ProcessExit {
            code: status.code(),
        })
    }
}

#[cfg(unix)]
fn request_shutdown(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn request_shutdown(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
