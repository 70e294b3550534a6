//! Sharded cluster composition and start/stop sequencing.
//!
//! A [`ShardedTopology`] owns its shards, exactly one metadata topology and
//! its routers. Startup runs in strictly ordered phases:
//!
//! 1. purge all shards, 2. start all shards, 3. purge then start the metadata
//! topology, 4. purge all routers, 5. start all routers, 6. register every
//! shard with the first router, one at a time in registration order.
//!
//! Within a phase, siblings run concurrently and the next phase begins only
//! once every sibling has settled.

use admin_command::{commands, Credentials, Document, HostPort};
use server_version::{MetadataShape, ServerBuild};
use tracing::{debug, error, info};

use crate::config::BackoffPolicy;
use crate::config_servers::ConfigServerSet;
use crate::discover::probe_server;
use crate::error::{Result, TopologyError};
use crate::event::{LifecycleState, Notifier, StateEvent};
use crate::node::{NodeOptions, NodeSettings, TlsFlags};
use crate::phase::settle;
use crate::replset::{MemberSpec, ReplicaSet, ReplicaSetOptions};
use crate::router::{ExecuteOptions, Router};
use crate::services::Services;

const ADMIN_NAMESPACE: &str = "admin.$cmd";

/// Settings shared by every component of a sharded topology.
#[derive(Debug, Clone)]
pub struct ShardedOptions {
    pub mongod_binary: String,
    pub mongos_binary: String,
    pub node: NodeSettings,
    /// Re-execution budget for commands a router may not be ready for yet.
    pub router_retry: BackoffPolicy,
    /// Default credentials for components registered without their own.
    pub credentials: Option<Credentials>,
}

impl Default for ShardedOptions {
    fn default() -> Self {
        Self {
            mongod_binary: "mongod".to_string(),
            mongos_binary: "mongos".to_string(),
            node: NodeSettings::default(),
            router_retry: BackoffPolicy::router_discovery(),
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardCollectionOptions {
    pub unique: bool,
}

/// Where the cluster keeps its routing metadata.
pub enum MetadataTopology {
    /// A `configsvr` replica set (3.2 and later).
    Replicated(ReplicaSet),
    /// Three mirrored config servers (before 3.2).
    Legacy(ConfigServerSet),
}

impl MetadataTopology {
    pub fn shape(&self) -> MetadataShape {
        match self {
            Self::Replicated(_) => MetadataShape::Replicated,
            Self::Legacy(_) => MetadataShape::Legacy,
        }
    }

    /// The `--configdb` value routers are started with.
    pub fn router_target(&self) -> String {
        match self {
            Self::Replicated(set) => set.shard_url(),
            Self::Legacy(servers) => servers.url(),
        }
    }

    fn has_live_processes(&self) -> bool {
        match self {
            Self::Replicated(set) => set.nodes().any(|n| n.is_running()),
            Self::Legacy(servers) => servers.nodes().iter().any(|n| n.is_running()),
        }
    }

    async fn start(&mut self) -> Result<()> {
        match self {
            Self::Replicated(set) => set.start().await,
            Self::Legacy(servers) => servers.start().await,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Replicated(set) => set.stop().await,
            Self::Legacy(servers) => servers.stop().await,
        }
    }

    async fn purge(&mut self) -> Result<()> {
        match self {
            Self::Replicated(set) => set.purge().await,
            Self::Legacy(servers) => servers.purge().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyState {
    Stopped,
    Running,
}

impl std::fmt::Display for TopologyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Shards, one metadata topology and routers, operated as one cluster.
pub struct ShardedTopology {
    options: ShardedOptions,
    services: Services,
    notifier: Notifier,
    build: Option<ServerBuild>,
    shards: Vec<ReplicaSet>,
    metadata: Option<MetadataTopology>,
    routers: Vec<Router>,
    state: TopologyState,
}

impl ShardedTopology {
    pub fn new(services: Services, options: ShardedOptions) -> Self {
        Self {
            options,
            services,
            notifier: Notifier::root("sharded"),
            build: None,
            shards: Vec::new(),
            metadata: None,
            routers: Vec::new(),
            state: TopologyState::Stopped,
        }
    }

    pub fn state(&self) -> TopologyState {
        self.state
    }

    pub fn options(&self) -> &ShardedOptions {
        &self.options
    }

    /// Events from every component of the topology.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StateEvent> {
        self.notifier.subscribe()
    }

    pub fn shards(&self) -> &[ReplicaSet] {
        &self.shards
    }

    pub fn metadata(&self) -> Option<&MetadataTopology> {
        self.metadata.as_ref()
    }

    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    /// `mongodb://router1,router2/`
    pub fn url(&self) -> String {
        let routers: Vec<HostPort> = self.routers.iter().map(Router::address).collect();
        format!("mongodb://{}/", HostPort::join(&routers))
    }

    /// Probe the mongod binary for its version and TLS support. The result is
    /// cached for the lifetime of the topology.
    pub async fn discover(&mut self) -> Result<ServerBuild> {
        if let Some(build) = self.build {
            return Ok(build);
        }
        let build =
            probe_server(self.services.launcher.as_ref(), &self.options.mongod_binary).await?;
        info!(
            "Discovered {} version {} (tls: {})",
            self.options.mongod_binary, build.version, build.tls
        );
        self.build = Some(build);
        Ok(build)
    }

    fn replica_set_options(&self, mut options: ReplicaSetOptions) -> ReplicaSetOptions {
        options.binary = self.options.mongod_binary.clone();
        options.node = self.options.node;
        if options.credentials.is_none() {
            options.credentials = self.options.credentials.clone();
        }
        options
    }

    /// Once the server version is known, TLS options name the flag family
    /// it accepts.
    fn pin_tls_flags(&self, options: NodeOptions) -> NodeOptions {
        match self.build {
            Some(build) if options.tls.is_some() && options.tls_flags.is_none() => {
                options.with_tls_flags(TlsFlags::for_version(&build.version))
            }
            _ => options,
        }
    }

    fn pin_member_tls_flags(&self, members: Vec<MemberSpec>) -> Vec<MemberSpec> {
        members
            .into_iter()
            .map(|mut member| {
                member.options = self.pin_tls_flags(member.options);
                member
            })
            .collect()
    }

    /// Register a replica set shard. It starts with the topology.
    pub fn add_shard(
        &mut self,
        options: ReplicaSetOptions,
        members: Vec<MemberSpec>,
    ) -> Result<()> {
        let members = self.pin_member_tls_flags(members);
        let mut options = self.replica_set_options(options);
        options.shard_server = true;

        let notifier = self.notifier.scoped(&options.set_name);
        let shard = ReplicaSet::with_notifier(self.services.clone(), notifier, options, members)?;
        debug!("Registered shard {}", shard.shard_url());
        self.shards.push(shard);
        Ok(())
    }

    /// Register the metadata topology, choosing its shape from the server
    /// version: a config server replica set from 3.2 on, otherwise three
    /// legacy config servers. Arbiter flags on `members` are ignored.
    pub async fn add_configuration_servers(
        &mut self,
        options: ReplicaSetOptions,
        members: Vec<MemberSpec>,
    ) -> Result<MetadataShape> {
        if self.metadata.is_some() {
            return Err(TopologyError::ConfigOrder(
                "a metadata topology is already registered".to_string(),
            ));
        }

        let shape = MetadataShape::for_version(&self.discover().await?.version);
        let members: Vec<MemberSpec> = self
            .pin_member_tls_flags(members)
            .into_iter()
            .map(|mut member| {
                member.arbiter = false;
                member
            })
            .collect();

        let metadata = match shape {
            MetadataShape::Replicated => {
                let mut options = self.replica_set_options(options);
                options.config_server = true;
                let notifier = self.notifier.scoped(&options.set_name);
                MetadataTopology::Replicated(ReplicaSet::with_notifier(
                    self.services.clone(),
                    notifier,
                    options,
                    members,
                )?)
            }
            MetadataShape::Legacy => MetadataTopology::Legacy(ConfigServerSet::new(
                self.services.clone(),
                self.notifier.scoped("config"),
                &self.options.mongod_binary,
                members.into_iter().map(|m| m.options).collect(),
                self.options.node,
                options.credentials.or_else(|| self.options.credentials.clone()),
            )?),
        };

        info!(
            "Registered {shape} metadata topology {}",
            metadata.router_target()
        );
        self.metadata = Some(metadata);
        Ok(shape)
    }

    /// Register one router per entry, each targeting the metadata topology.
    pub fn add_proxies(&mut self, proxies: Vec<NodeOptions>) -> Result<()> {
        let Some(metadata) = &self.metadata else {
            let err = TopologyError::ConfigOrder(
                "a configuration server topology must be registered before adding proxies"
                    .to_string(),
            );
            error!("{err}");
            return Err(err);
        };

        let configdb = metadata.router_target();
        let routers: Vec<Router> = proxies
            .into_iter()
            .map(|options| {
                Router::new(
                    self.services.clone(),
                    &self.notifier,
                    self.pin_tls_flags(options),
                    configdb.clone(),
                    &self.options,
                )
            })
            .collect();
        self.routers.extend(routers);
        Ok(())
    }

    fn first_router(&self) -> Result<&Router> {
        self.routers.first().ok_or(TopologyError::NoRouter)
    }

    pub async fn enable_sharding(
        &self,
        db: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Document> {
        info!("Enabling sharding for database {db}");
        let reply = self
            .first_router()?
            .execute_command(
                ADMIN_NAMESPACE,
                commands::enable_sharding(db),
                credentials,
                ExecuteOptions::default(),
            )
            .await?;
        debug!("enableSharding {db} replied {reply}");
        Ok(reply)
    }

    pub async fn shard_collection(
        &self,
        db: &str,
        collection: &str,
        shard_key: Document,
        options: ShardCollectionOptions,
        credentials: Option<&Credentials>,
    ) -> Result<Document> {
        let namespace = format!("{db}.{collection}");
        let command = commands::shard_collection(&namespace, shard_key, options.unique);
        info!("Sharding collection {namespace} with {command}");
        let reply = self
            .first_router()?
            .execute_command(ADMIN_NAMESPACE, command, credentials, ExecuteOptions::default())
            .await?;
        debug!("shardCollection {namespace} replied {reply}");
        Ok(reply)
    }

    /// Purge and start every component, then register the shards.
    pub async fn start(&mut self) -> Result<()> {
        if self.metadata.is_none() {
            return Err(TopologyError::ConfigOrder(
                "a configuration server topology must be registered before starting".to_string(),
            ));
        }
        if self.routers.is_empty() {
            return Err(TopologyError::ConfigOrder(
                "at least one proxy must be registered before starting".to_string(),
            ));
        }

        self.notifier.emit(LifecycleState::Starting);
        if let Err(e) = self.run_start_phases().await {
            error!("Sharded topology failed to start: {e}");
            return Err(e);
        }

        self.state = TopologyState::Running;
        self.notifier.emit(LifecycleState::Running);
        info!("Sharded topology is up at {}", self.url());
        Ok(())
    }

    async fn run_start_phases(&mut self) -> Result<()> {
        info!("Purging shard directories");
        settle("purge shard", self.shards.iter_mut().map(ReplicaSet::purge)).await?;
        for shard in &self.shards {
            info!("Starting shard {}", shard.shard_url());
        }
        settle("start shard", self.shards.iter_mut().map(ReplicaSet::start)).await?;

        if let Some(metadata) = self.metadata.as_mut() {
            info!("Starting configuration servers {}", metadata.router_target());
            metadata.purge().await?;
            metadata.start().await?;
        }

        settle("purge router", self.routers.iter().map(Router::purge)).await?;
        settle("start router", self.routers.iter_mut().map(Router::start)).await?;

        let router = self.first_router()?;
        for shard in &self.shards {
            let shard_url = shard.shard_url();
            info!("Adding shard {shard_url}");
            let reply = router
                .execute_command(
                    ADMIN_NAMESPACE,
                    commands::add_shard(&shard_url),
                    None,
                    ExecuteOptions {
                        re_execute_on_error: true,
                    },
                )
                .await?;
            debug!("addShard {shard_url} replied {reply}");
        }
        Ok(())
    }

    fn has_live_processes(&self) -> bool {
        self.routers.iter().any(|r| r.node().is_running())
            || self.metadata.as_ref().is_some_and(MetadataTopology::has_live_processes)
            || self.shards.iter().any(|s| s.nodes().any(|n| n.is_running()))
    }

    /// Stop routers, then the metadata topology, then shards. A stopped
    /// topology with no live process is left alone, so stopping after a
    /// failed start still cleans up what did come up.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != TopologyState::Running && !self.has_live_processes() {
            debug!("Sharded topology is not running, nothing to stop");
            return Ok(());
        }

        self.notifier.emit(LifecycleState::Stopping);
        info!("Shutting down routers");
        settle("stop router", self.routers.iter_mut().map(Router::stop)).await?;

        if let Some(metadata) = self.metadata.as_mut() {
            info!("Shutting down configuration servers");
            metadata.stop().await?;
        }

        info!("Shutting down shards");
        settle("stop shard", self.shards.iter_mut().map(ReplicaSet::stop)).await?;

        self.state = TopologyState::Stopped;
        self.notifier.emit(LifecycleState::Stopped);
        info!("Sharded topology is down");
        Ok(())
    }

    /// Purge routers, then the metadata topology, then shards. Ignored while
    /// the topology runs.
    pub async fn purge(&mut self) -> Result<()> {
        if self.state == TopologyState::Running {
            debug!("Sharded topology is running, not purging");
            return Ok(());
        }

        info!("Purging router directories");
        settle("purge router", self.routers.iter().map(Router::purge)).await?;

        if let Some(metadata) = self.metadata.as_mut() {
            info!("Purging configuration server directories");
            metadata.purge().await?;
        }

        info!("Purging shard directories");
        settle("purge shard", self.shards.iter_mut().map(ReplicaSet::purge)).await?;
        self.notifier.emit(LifecycleState::Purged);
        Ok(())
    }

    /// `stop()` followed by `start()`.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }
}
