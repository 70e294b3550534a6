//! A single mongod or mongos process.

mod options;
mod process;

use std::sync::Mutex;
use std::time::Duration;

use admin_command::{commands, CommandError, Credentials, Document, HostPort, IsMasterReply};
use server_version::ServerBuild;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

pub use options::{NodeOptions, TlsFiles, TlsFlags};
pub use process::{CapturedOutput, Launcher, ProcessExit, ServerProcess, TokioLauncher};

use crate::discover::probe_server;
use crate::error::{Result, TopologyError};
use crate::event::{LifecycleState, Notifier};
use crate::services::Services;

/// Process start/stop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSettings {
    /// How long a freshly spawned process may take to answer its first probe.
    pub start_timeout: Duration,
    pub probe_interval: Duration,
    /// Time between the graceful shutdown request and a forced kill.
    pub stop_grace: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_millis(250),
            stop_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Handle to one server process and its data directory.
pub struct Node {
    binary: String,
    options: NodeOptions,
    settings: NodeSettings,
    credentials: Option<Credentials>,
    services: Services,
    notifier: Notifier,
    state: NodeState,
    process: Option<Box<dyn ServerProcess>>,
    last_status: Mutex<Option<IsMasterReply>>,
}

impl Node {
    pub fn new(
        services: Services,
        notifier: Notifier,
        binary: impl Into<String>,
        options: NodeOptions,
        settings: NodeSettings,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            binary: binary.into(),
            options,
            settings,
            credentials,
            services,
            notifier,
            state: NodeState::Stopped,
            process: None,
            last_status: Mutex::new(None),
        }
    }

    pub fn address(&self) -> HostPort {
        self.options.address()
    }

    pub fn host(&self) -> &str {
        &self.options.bind_ip
    }

    pub fn port(&self) -> u16 {
        self.options.port
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// The most recent `isMaster` reply this node returned.
    pub fn last_status(&self) -> Option<IsMasterReply> {
        self.last_status.lock().ok().and_then(|status| status.clone())
    }

    fn set_state(&mut self, state: NodeState) {
        self.state = state;
        let event = match state {
            NodeState::Stopped => LifecycleState::Stopped,
            NodeState::Starting => LifecycleState::Starting,
            NodeState::Running => LifecycleState::Running,
            NodeState::Stopping => LifecycleState::Stopping,
        };
        self.notifier.emit(event);
    }

    /// Spawn the process and wait until it answers a status probe.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let address = self.address();
        let args = self.launch_args().await.inspect_err(|e| error!("{e}"))?;
        self.set_state(NodeState::Starting);
        info!("Starting {} at {address}", self.binary);

        match self.services.launcher.spawn(&self.binary, &args).await {
            Ok(process) => self.process = Some(process),
            Err(e) => {
                self.set_state(NodeState::Stopped);
                let err = TopologyError::ProcessStart {
                    target: address.to_string(),
                    reason: format!("failed to spawn {}: {e}", self.binary),
                };
                error!("{err}");
                return Err(err);
            }
        }

        if let Err(err) = self.await_responsive().await {
            error!("{err}");
            if let Some(mut process) = self.process.take() {
                if let Err(e) = process.kill().await {
                    warn!("Failed to kill unresponsive process at {address}: {e}");
                }
            }
            self.set_state(NodeState::Stopped);
            return Err(err);
        }

        self.set_state(NodeState::Running);
        info!("{} at {address} is accepting connections", self.binary);
        Ok(())
    }

    /// Launch arguments. TLS flags left open follow the version of the binary.
    async fn launch_args(&self) -> Result<Vec<String>> {
        if self.options.tls.is_none() || self.options.tls_flags.is_some() {
            return Ok(self.options.to_args());
        }
        let build = self.probe_version().await?;
        let flags = TlsFlags::for_version(&build.version);
        debug!("{} {} takes {flags:?} flags", self.binary, build.version);
        Ok(self.options.clone().with_tls_flags(flags).to_args())
    }

    async fn await_responsive(&mut self) -> Result<()> {
        let address = self.address();
        let deadline = Instant::now() + self.settings.start_timeout;

        loop {
            if let Some(process) = self.process.as_mut() {
                let exited = process
                    .try_wait()
                    .map_err(|e| TopologyError::io(format!("checking process at {address}"), e))?;
                if let Some(exit) = exited {
                    return Err(TopologyError::ProcessStart {
                        target: address.to_string(),
                        reason: format!("process ended with {exit} before accepting connections"),
                    });
                }
            }

            match self.is_master().await {
                Ok(_) => return Ok(()),
                Err(e) => debug!("{address} not ready yet: {e}"),
            }

            if Instant::now() >= deadline {
                return Err(TopologyError::ProcessStart {
                    target: address.to_string(),
                    reason: format!(
                        "not accepting connections within {:?}",
                        self.settings.start_timeout
                    ),
                });
            }
            sleep(self.settings.probe_interval).await;
        }
    }

    /// Request a graceful shutdown, killing the process if it outlives the
    /// grace period. Stopping a stopped node is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        let address = self.address();
        self.set_state(NodeState::Stopping);
        info!("Stopping {} at {address}", self.binary);

        if let Err(e) = process.terminate().await {
            warn!("Graceful shutdown request to {address} failed: {e}");
        }

        match timeout(self.settings.stop_grace, process.wait()).await {
            Ok(Ok(exit)) => debug!("{address} exited with {exit}"),
            Ok(Err(e)) => warn!("Failed waiting for {address} to exit: {e}"),
            Err(_) => {
                warn!(
                    "{address} still running after {:?}, killing it",
                    self.settings.stop_grace
                );
                process
                    .kill()
                    .await
                    .map_err(|e| TopologyError::io(format!("killing process at {address}"), e))?;
            }
        }

        self.set_state(NodeState::Stopped);
        Ok(())
    }

    /// Clear the data directory. Refused while the process runs.
    pub async fn purge(&self) -> Result<()> {
        if self.is_running() {
            return Err(TopologyError::PurgeConflict {
                address: self.address().to_string(),
            });
        }
        if let Some(dbpath) = &self.options.dbpath {
            info!("Purging {}", dbpath.display());
            self.services
                .launcher
                .purge_dir(dbpath)
                .await
                .map_err(|e| TopologyError::io(format!("purging {}", dbpath.display()), e))?;
        }
        self.notifier.emit(LifecycleState::Purged);
        Ok(())
    }

    /// Version and TLS capability of this node's binary.
    pub async fn probe_version(&self) -> Result<ServerBuild> {
        probe_server(self.services.launcher.as_ref(), &self.binary).await
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Run a command with this node's credentials, keeping the raw error.
    pub async fn run_command(
        &self,
        db: &str,
        command: Document,
    ) -> std::result::Result<Document, CommandError> {
        self.run_command_as(db, command, self.credentials.as_ref()).await
    }

    pub async fn run_command_as(
        &self,
        db: &str,
        command: Document,
        credentials: Option<&Credentials>,
    ) -> std::result::Result<Document, CommandError> {
        self.services
            .client
            .run_command(&self.address(), db, command, credentials)
            .await
    }

    /// Run an admin command, reporting failures as [`TopologyError::Command`].
    pub async fn admin_command(&self, command: Document) -> Result<Document> {
        let name = commands::command_name(&command)
            .unwrap_or("command")
            .to_string();
        self.run_command("admin", command)
            .await
            .map_err(|source| TopologyError::Command {
                command: name,
                target: self.address().to_string(),
                source,
            })
    }

    /// Probe the server's role and record the reply.
    pub async fn is_master(&self) -> Result<IsMasterReply> {
        let reply = self.admin_command(commands::is_master()).await?;
        let reply = IsMasterReply::from_document(reply).map_err(|source| TopologyError::Command {
            command: "isMaster".to_string(),
            target: self.address().to_string(),
            source,
        })?;
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(reply.clone());
        }
        Ok(reply)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("binary", &self.binary)
            .field("address", &self.address())
            .field("state", &self.state)
            .finish()
    }
}
