//! An in-memory deployment of mongod and mongos processes.
//!
//! Processes are entries in a shared table keyed by address. Replica set
//! state (config, primary, maintenance flags) lives beside it and survives
//! process restarts until the member's data directory is purged, the way a
//! real mongod keeps its config on disk. Elections complete after a
//! configurable number of `isMaster` probes.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use admin_command::{
    codes, commands, doc, CommandClient, CommandError, Credentials, Document, HostPort,
};

use crate::node::{CapturedOutput, Launcher, ProcessExit, ServerProcess};
use crate::replset::ReplicaSetConfig;
use crate::services::Services;

const DEFAULT_VERSION_OUTPUT: &str = "db version v4.0.28\ngit version: af1a9dc12adcfa83cc19571cb3faba26eeddac92\nallocator: tcmalloc\n";

const COMMAND_NOT_FOUND: i32 = 59;
const NO_REPLICATION_ENABLED: i32 = 76;
const OPERATION_FAILED: i32 = 96;
const ILLEGAL_OPERATION: i32 = 20;
const FAILED_TO_PARSE: i32 = 9;

/// One command as the simulated servers received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub target: HostPort,
    pub db: String,
    pub name: String,
    pub command: Document,
}

/// Implements [`Launcher`] and [`CommandClient`] over shared in-memory state.
/// Clones share the same deployment.
#[derive(Clone)]
pub struct SimulatedDeployment {
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug, Clone)]
enum ServerKind {
    Mongod { repl_set: Option<String> },
    Mongos,
}

struct Server {
    pid: u32,
    kind: ServerKind,
}

struct SimSet {
    config: ReplicaSetConfig,
    primary: Option<String>,
    /// Probes left before the next election completes.
    countdown: usize,
    /// A member that just stepped down and may not win the next election.
    excluded: Option<String>,
}

struct InjectedFailure {
    target: HostPort,
    command: String,
    remaining: usize,
    error: CommandError,
}

#[derive(Default)]
struct SimState {
    servers: HashMap<HostPort, Server>,
    exited: HashMap<u32, ProcessExit>,
    next_pid: u32,
    dbpaths: HashMap<PathBuf, HostPort>,
    sets: HashMap<String, SimSet>,
    maintenance: HashSet<String>,
    shards: Vec<String>,
    sharded_dbs: HashSet<String>,
    commands: Vec<RecordedCommand>,
    failures: Vec<InjectedFailure>,
    launches: Vec<Vec<String>>,
    purged: Vec<PathBuf>,
    election_delay: usize,
    version_output: String,
    version_probes: usize,
    unresponsive: HashSet<HostPort>,
    exit_on_start: HashSet<HostPort>,
    ignore_terminate: HashSet<HostPort>,
    stepdown_drops_connection: bool,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn ok() -> Document {
    doc! { "ok": 1.0 }
}

fn invalid_config(message: impl Into<String>) -> CommandError {
    CommandError::server(
        codes::INVALID_REPLICA_SET_CONFIG,
        "InvalidReplicaSetConfig",
        message,
    )
}

fn not_yet_initialized() -> CommandError {
    CommandError::server(
        codes::NOT_YET_INITIALIZED,
        "NotYetInitialized",
        "no replset config has been received",
    )
}

fn not_primary() -> CommandError {
    CommandError::server(codes::NOT_WRITABLE_PRIMARY, "NotWritablePrimary", "not primary")
}

impl Default for SimulatedDeployment {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDeployment {
    pub fn new() -> Self {
        let state = SimState {
            election_delay: 1,
            version_output: DEFAULT_VERSION_OUTPUT.to_string(),
            ..SimState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    /// Launcher and client both backed by this deployment.
    pub fn services(&self) -> Services {
        Services::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    /// Stdout of `mongod --version`.
    pub fn set_version_output(&self, stdout: &str) {
        self.lock().version_output = stdout.to_string();
    }

    pub fn version_probes(&self) -> usize {
        self.lock().version_probes
    }

    /// Number of `isMaster` probes an election takes. `usize::MAX` means
    /// never.
    pub fn set_election_delay(&self, probes: usize) {
        self.lock().election_delay = probes;
    }

    /// Fail the next `times` invocations of `command` on `target`.
    pub fn fail_command(
        &self,
        target: &HostPort,
        command: &str,
        times: usize,
        error: CommandError,
    ) {
        self.lock().failures.push(InjectedFailure {
            target: target.clone(),
            command: command.to_string(),
            remaining: times,
            error,
        });
    }

    /// The process at `address` runs but never answers.
    pub fn make_unresponsive(&self, address: HostPort) {
        self.lock().unresponsive.insert(address);
    }

    /// A process started at `address` exits immediately.
    pub fn exit_on_start(&self, address: HostPort) {
        self.lock().exit_on_start.insert(address);
    }

    /// The process at `address` ignores graceful shutdown requests.
    pub fn ignore_terminate(&self, address: HostPort) {
        self.lock().ignore_terminate.insert(address);
    }

    /// Stepdown closes the connection instead of replying, like older servers.
    pub fn set_stepdown_drops_connection(&self, drops: bool) {
        self.lock().stepdown_drops_connection = drops;
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.lock().commands.clone()
    }

    pub fn commands_named(&self, name: &str) -> Vec<RecordedCommand> {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    /// Every spawn, binary first.
    pub fn launches(&self) -> Vec<Vec<String>> {
        self.lock().launches.clone()
    }

    pub fn purged_paths(&self) -> Vec<PathBuf> {
        self.lock().purged.clone()
    }

    pub fn running_count(&self) -> usize {
        self.lock().servers.len()
    }

    pub fn is_running(&self, address: &HostPort) -> bool {
        self.lock().servers.contains_key(address)
    }

    pub fn primary_of(&self, set_name: &str) -> Option<String> {
        self.lock()
            .sets
            .get(set_name)
            .and_then(|set| set.primary.clone())
    }

    pub fn config_of(&self, set_name: &str) -> Option<ReplicaSetConfig> {
        self.lock().sets.get(set_name).map(|set| set.config.clone())
    }

    /// Shard names registered through any router.
    pub fn registered_shards(&self) -> Vec<String> {
        self.lock().shards.clone()
    }

    /// Treat `set_name` as already added through a router.
    pub fn register_shard(&self, set_name: &str) {
        let mut state = self.lock();
        if !state.shards.iter().any(|s| s == set_name) {
            state.shards.push(set_name.to_string());
        }
    }
}

#[async_trait::async_trait]
impl Launcher for SimulatedDeployment {
    async fn spawn(&self, binary: &str, args: &[String]) -> io::Result<Box<dyn ServerProcess>> {
        let port: u16 = flag_value(args, "--port")
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing --port"))?;
        let address = HostPort::new(flag_value(args, "--bind_ip").unwrap_or("127.0.0.1"), port);

        let mut state = self.lock();
        state
            .launches
            .push(std::iter::once(binary.to_string()).chain(args.iter().cloned()).collect());
        if state.servers.contains_key(&address) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{address} is already in use"),
            ));
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        if state.exit_on_start.contains(&address) {
            state.exited.insert(pid, ProcessExit { code: Some(48) });
        } else {
            let kind = if flag_value(args, "--configdb").is_some() {
                ServerKind::Mongos
            } else {
                ServerKind::Mongod {
                    repl_set: flag_value(args, "--replSet").map(str::to_string),
                }
            };
            if let Some(dbpath) = flag_value(args, "--dbpath") {
                state.dbpaths.insert(PathBuf::from(dbpath), address.clone());
            }
            state.servers.insert(address.clone(), Server { pid, kind });
        }

        Ok(Box::new(SimProcess {
            pid,
            address,
            state: self.state.clone(),
        }))
    }

    async fn capture(&self, _binary: &str, args: &[String]) -> io::Result<CapturedOutput> {
        let mut state = self.lock();
        if args.iter().any(|arg| arg == "--version") {
            state.version_probes += 1;
        }
        Ok(CapturedOutput {
            stdout: state.version_output.clone(),
            stderr: String::new(),
        })
    }

    async fn purge_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        state.purged.push(path.to_path_buf());
        if let Some(address) = state.dbpaths.get(path).cloned() {
            let host = address.to_string();
            state.sets.retain(|_, set| set.config.member(&host).is_none());
            state.maintenance.remove(&host);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandClient for SimulatedDeployment {
    async fn run_command(
        &self,
        target: &HostPort,
        db: &str,
        command: Document,
        _credentials: Option<&Credentials>,
    ) -> Result<Document, CommandError> {
        let name = commands::command_name(&command)
            .unwrap_or_default()
            .to_string();
        let mut state = self.lock();
        state.commands.push(RecordedCommand {
            target: target.clone(),
            db: db.to_string(),
            name: name.clone(),
            command: command.clone(),
        });

        if let Some(error) = state.take_failure(target, &name) {
            return Err(error);
        }
        state.execute(target, &name, &command)
    }
}

struct SimProcess {
    pid: u32,
    address: HostPort,
    state: Arc<Mutex<SimState>>,
}

impl SimProcess {
    fn exit(&self, exit: ProcessExit) {
        let mut state = lock(&self.state);
        if state
            .servers
            .get(&self.address)
            .is_some_and(|server| server.pid == self.pid)
        {
            state.servers.remove(&self.address);
            state.exited.insert(self.pid, exit);
        }
    }

    fn exit_status(&self) -> Option<ProcessExit> {
        lock(&self.state).exited.get(&self.pid).copied()
    }
}

#[async_trait::async_trait]
impl ServerProcess for SimProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.exit_status())
    }

    async fn terminate(&mut self) -> io::Result<()> {
        let ignored = lock(&self.state).ignore_terminate.contains(&self.address);
        if !ignored {
            self.exit(ProcessExit { code: Some(0) });
        }
        Ok(())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.exit(ProcessExit { code: None });
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        loop {
            if let Some(exit) = self.exit_status() {
                return Ok(exit);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl SimState {
    fn take_failure(&mut self, target: &HostPort, name: &str) -> Option<CommandError> {
        let failure = self
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && &f.target == target && f.command == name)?;
        failure.remaining -= 1;
        Some(failure.error.clone())
    }

    fn is_up(&self, host: &str) -> bool {
        host.parse::<HostPort>()
            .is_ok_and(|address| {
                self.servers.contains_key(&address) && !self.unresponsive.contains(&address)
            })
    }

    fn execute(
        &mut self,
        target: &HostPort,
        name: &str,
        command: &Document,
    ) -> Result<Document, CommandError> {
        if self.unresponsive.contains(target) {
            return Err(CommandError::Transport(format!("{target}: timed out")));
        }
        let kind = match self.servers.get(target) {
            Some(server) => server.kind.clone(),
            None => return Err(CommandError::Transport(format!("{target}: connection refused"))),
        };

        let host = target.to_string();
        match kind {
            ServerKind::Mongos => self.mongos_command(name, command),
            ServerKind::Mongod { repl_set } => {
                let repl_set = repl_set.as_deref();
                match name {
                    "isMaster" | "ismaster" | "hello" => Ok(self.is_master(&host, repl_set)),
                    "replSetInitiate" => self.initiate(&host, repl_set, command),
                    "replSetGetConfig" => self.get_config(&host, repl_set),
                    "replSetReconfig" => self.reconfig(&host, repl_set, command),
                    "replSetStepDown" => self.step_down(&host, repl_set),
                    "replSetMaintenance" => self.maintenance(&host, repl_set, command),
                    _ => Err(CommandError::server(
                        COMMAND_NOT_FOUND,
                        "CommandNotFound",
                        format!("no such command: '{name}'"),
                    )),
                }
            }
        }
    }

    /// Advance the election of `set_name` by one probe.
    fn tick_election(&mut self, set_name: &str) {
        let delay = self.election_delay;
        let up: HashSet<String> = self
            .servers
            .keys()
            .filter(|address| !self.unresponsive.contains(*address))
            .map(ToString::to_string)
            .collect();
        let maintenance = &self.maintenance;
        let Some(set) = self.sets.get_mut(set_name) else {
            return;
        };

        if let Some(primary) = &set.primary {
            let still_primary = up.contains(primary)
                && set
                    .config
                    .member(primary)
                    .is_some_and(|m| m.is_electable());
            if still_primary {
                return;
            }
            set.primary = None;
            set.countdown = delay;
        }

        if set.countdown > 0 {
            set.countdown -= 1;
            return;
        }

        let voters: Vec<&str> = set
            .config
            .members
            .iter()
            .filter(|m| m.can_vote())
            .map(|m| m.host.as_str())
            .collect();
        let reachable = voters.iter().filter(|host| up.contains(**host)).count();
        if reachable * 2 <= voters.len() {
            return;
        }

        let winner = set
            .config
            .members
            .iter()
            .filter(|m| {
                m.is_electable()
                    && up.contains(&m.host)
                    && !maintenance.contains(&m.host)
                    && set.excluded.as_deref() != Some(m.host.as_str())
            })
            .fold(None, |best: Option<&crate::replset::MemberConfig>, m| match best {
                Some(b) if b.priority >= m.priority => Some(b),
                _ => Some(m),
            })
            .map(|m| m.host.clone());

        if winner.is_some() {
            set.primary = winner;
            set.excluded = None;
        }
    }

    fn is_master(&mut self, host: &str, repl_set: Option<&str>) -> Document {
        let Some(set_name) = repl_set else {
            return doc! { "ismaster": true, "maxWireVersion": 7, "ok": 1.0 };
        };
        self.tick_election(set_name);

        let uninitiated = doc! {
            "ismaster": false,
            "secondary": false,
            "info": "Does not have a valid replica set config",
            "isreplicaset": true,
            "ok": 1.0,
        };
        let Some(set) = self.sets.get(set_name) else {
            return uninitiated;
        };
        let Some(member) = set.config.member(host) else {
            return uninitiated;
        };

        let listed = |wanted: fn(&crate::replset::MemberConfig) -> bool| -> Vec<String> {
            set.config
                .members
                .iter()
                .filter(|m| wanted(m))
                .map(|m| m.host.clone())
                .collect()
        };
        let hosts = listed(|m| !m.arbiter_only && !m.hidden && m.priority > 0.0);
        let passives = listed(|m| !m.arbiter_only && !m.hidden && m.priority == 0.0);
        let arbiters = listed(|m| m.arbiter_only);

        let is_primary = set.primary.as_deref() == Some(host);
        let secondary = !is_primary && !member.arbiter_only && !self.maintenance.contains(host);
        let mut reply = doc! {
            "ismaster": is_primary,
            "secondary": secondary,
            "setName": set_name,
            "setVersion": set.config.version,
            "hosts": hosts,
            "passives": passives,
            "arbiters": arbiters,
            "me": host,
            "ok": 1.0,
        };
        if member.arbiter_only {
            reply.insert("arbiterOnly", true);
        }
        if member.hidden {
            reply.insert("hidden", true);
        }
        if !member.arbiter_only && member.priority == 0.0 {
            reply.insert("passive", true);
        }
        if let Some(primary) = &set.primary {
            reply.insert("primary", primary.clone());
        }
        reply
    }

    fn initiate(
        &mut self,
        host: &str,
        repl_set: Option<&str>,
        command: &Document,
    ) -> Result<Document, CommandError> {
        let Some(set_name) = repl_set else {
            return Err(CommandError::server(
                NO_REPLICATION_ENABLED,
                "NoReplicationEnabled",
                "server is not running with --replSet",
            ));
        };
        if self.sets.contains_key(set_name) {
            return Err(CommandError::server(
                codes::ALREADY_INITIALIZED,
                "AlreadyInitialized",
                "already initialized",
            ));
        }

        let config = command
            .get_document("replSetInitiate")
            .map_err(|e| invalid_config(e.to_string()))
            .and_then(|doc| {
                ReplicaSetConfig::from_document(doc.clone())
                    .map_err(|e| invalid_config(e.to_string()))
            })?;
        config.validate().map_err(|e| invalid_config(e.to_string()))?;
        if config.id != set_name {
            return Err(invalid_config(format!(
                "set name '{}' does not match --replSet {set_name}",
                config.id
            )));
        }
        if config.member(host).is_none() {
            return Err(invalid_config(format!("{host} is not a member of the config")));
        }
        if let Some(down) = config.members.iter().find(|m| !self.is_up(&m.host)) {
            return Err(CommandError::server(
                codes::NODE_NOT_FOUND,
                "NodeNotFound",
                format!("replSetInitiate quorum check failed because {} is down", down.host),
            ));
        }

        let countdown = self.election_delay;
        self.sets.insert(
            set_name.to_string(),
            SimSet {
                config,
                primary: None,
                countdown,
                excluded: None,
            },
        );
        Ok(ok())
    }

    fn get_config(&self, host: &str, repl_set: Option<&str>) -> Result<Document, CommandError> {
        let set = repl_set
            .and_then(|name| self.sets.get(name))
            .filter(|set| set.config.member(host).is_some())
            .ok_or_else(not_yet_initialized)?;
        let config = set
            .config
            .to_document()
            .map_err(|e| invalid_config(e.to_string()))?;
        Ok(doc! { "config": config, "ok": 1.0 })
    }

    fn reconfig(
        &mut self,
        host: &str,
        repl_set: Option<&str>,
        command: &Document,
    ) -> Result<Document, CommandError> {
        let set_name = repl_set.ok_or_else(not_yet_initialized)?;
        self.tick_election(set_name);

        let force = command.get_bool("force").unwrap_or(false);
        let config = command
            .get_document("replSetReconfig")
            .map_err(|e| invalid_config(e.to_string()))
            .and_then(|doc| {
                ReplicaSetConfig::from_document(doc.clone())
                    .map_err(|e| invalid_config(e.to_string()))
            })?;
        config.validate().map_err(|e| invalid_config(e.to_string()))?;
        let down: Vec<String> = config
            .members
            .iter()
            .filter(|m| !self.is_up(&m.host))
            .map(|m| m.host.clone())
            .collect();

        let delay = self.election_delay;
        let set = self.sets.get_mut(set_name).ok_or_else(not_yet_initialized)?;
        if !force && set.primary.as_deref() != Some(host) {
            return Err(not_primary());
        }
        if config.id != set_name {
            return Err(invalid_config(format!(
                "set name '{}' does not match {set_name}",
                config.id
            )));
        }
        if !force && config.version <= set.config.version {
            return Err(CommandError::server(
                codes::NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE,
                "NewReplicaSetConfigurationIncompatible",
                format!(
                    "version {} is not greater than the current version {}",
                    config.version, set.config.version
                ),
            ));
        }
        if !force && !down.is_empty() {
            return Err(CommandError::server(
                codes::NODE_NOT_FOUND,
                "NodeNotFound",
                format!(
                    "Quorum check failed because not all proposed set members responded affirmatively: {}",
                    down.join(", ")
                ),
            ));
        }

        set.config = config;
        let keeps_primary = set
            .primary
            .as_deref()
            .and_then(|primary| set.config.member(primary))
            .is_some_and(|m| m.is_electable());
        if !keeps_primary {
            set.primary = None;
            set.countdown = delay;
        }
        Ok(ok())
    }

    fn step_down(&mut self, host: &str, repl_set: Option<&str>) -> Result<Document, CommandError> {
        let set_name = repl_set.ok_or_else(not_yet_initialized)?;
        self.tick_election(set_name);

        let delay = self.election_delay;
        let drops_connection = self.stepdown_drops_connection;
        let set = self.sets.get_mut(set_name).ok_or_else(not_yet_initialized)?;
        if set.primary.as_deref() != Some(host) {
            return Err(not_primary());
        }
        set.primary = None;
        set.excluded = Some(host.to_string());
        set.countdown = delay;

        if drops_connection {
            return Err(CommandError::Transport(format!(
                "{host}: connection closed during stepdown"
            )));
        }
        Ok(ok())
    }

    fn maintenance(
        &mut self,
        host: &str,
        repl_set: Option<&str>,
        command: &Document,
    ) -> Result<Document, CommandError> {
        let enable = command.get_bool("replSetMaintenance").unwrap_or(false);
        let set = repl_set
            .and_then(|name| self.sets.get(name))
            .ok_or_else(not_yet_initialized)?;
        let member = set.config.member(host).ok_or_else(not_yet_initialized)?;
        if set.primary.as_deref() == Some(host) || member.arbiter_only {
            return Err(CommandError::server(
                codes::NOT_PRIMARY_OR_SECONDARY,
                "NotSecondary",
                "only secondaries can modify maintenance mode",
            ));
        }

        if enable {
            self.maintenance.insert(host.to_string());
        } else if !self.maintenance.remove(host) {
            return Err(CommandError::server(
                OPERATION_FAILED,
                "OperationFailed",
                "already out of maintenance mode",
            ));
        }
        Ok(ok())
    }

    fn mongos_command(&mut self, name: &str, command: &Document) -> Result<Document, CommandError> {
        match name {
            "isMaster" | "ismaster" | "hello" => {
                Ok(doc! { "ismaster": true, "msg": "isdbgrid", "ok": 1.0 })
            }
            "addShard" => self.add_shard(command),
            "enableSharding" => {
                let db = command.get_str("enableSharding").map_err(|e| {
                    CommandError::server(FAILED_TO_PARSE, "FailedToParse", e.to_string())
                })?;
                if self.shards.is_empty() {
                    return Err(CommandError::server(
                        codes::SHARD_NOT_FOUND,
                        "ShardNotFound",
                        "no such shard available to be the primary shard",
                    ));
                }
                self.sharded_dbs.insert(db.to_string());
                Ok(ok())
            }
            "shardCollection" => {
                let namespace = command.get_str("shardCollection").map_err(|e| {
                    CommandError::server(FAILED_TO_PARSE, "FailedToParse", e.to_string())
                })?;
                let db = namespace.split('.').next().unwrap_or_default();
                if !self.sharded_dbs.contains(db) {
                    return Err(CommandError::server(
                        ILLEGAL_OPERATION,
                        "IllegalOperation",
                        format!("sharding not enabled for db {db}"),
                    ));
                }
                Ok(doc! { "collectionsharded": namespace, "ok": 1.0 })
            }
            _ => Err(CommandError::server(
                COMMAND_NOT_FOUND,
                "CommandNotFound",
                format!("no such command: '{name}'"),
            )),
        }
    }

    fn add_shard(&mut self, command: &Document) -> Result<Document, CommandError> {
        let url = command
            .get_str("addShard")
            .map_err(|e| CommandError::server(FAILED_TO_PARSE, "FailedToParse", e.to_string()))?;
        let (set_name, hosts) = url.split_once('/').ok_or_else(|| {
            CommandError::server(
                FAILED_TO_PARSE,
                "FailedToParse",
                format!("'{url}' is not a replica set connection string"),
            )
        })?;

        self.tick_election(set_name);
        let set = self.sets.get(set_name).ok_or_else(|| {
            CommandError::server(
                OPERATION_FAILED,
                "OperationFailed",
                format!("couldn't connect to new shard {url}"),
            )
        })?;
        if let Some(stranger) = hosts.split(',').find(|h| set.config.member(h).is_none()) {
            return Err(CommandError::server(
                OPERATION_FAILED,
                "OperationFailed",
                format!("host {stranger} does not belong to replica set {set_name}"),
            ));
        }
        if set.primary.is_none() {
            return Err(CommandError::server(
                codes::FAILED_TO_SATISFY_READ_PREFERENCE,
                "FailedToSatisfyReadPreference",
                format!(
                    "Could not find host matching read preference {{ mode: \"primary\" }} for set {set_name}"
                ),
            ));
        }

        if !self.shards.iter().any(|s| s == set_name) {
            self.shards.push(set_name.to_string());
        }
        Ok(doc! { "shardAdded": set_name, "ok": 1.0 })
    }
}
