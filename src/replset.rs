//! Replica set lifecycle: initiation, role discovery, membership changes,
//! stepdown and maintenance mode.

mod config;
mod role;

use std::future::Future;
use std::time::Duration;

use admin_command::{codes, commands, CommandError, Credentials, HostPort, IsMasterReply};
use futures::future::join_all;
use server_version::ServerBuild;
use tracing::{debug, error, info};

pub use config::{MemberConfig, MemberSpec, ReplicaSetConfig};
pub use role::MemberRole;

use crate::config::BackoffPolicy;
use crate::discover::probe_server;
use crate::error::{Result, TopologyError};
use crate::event::{LifecycleState, Notifier, StateEvent};
use crate::node::{Node, NodeSettings};
use crate::phase::{poll_until, retry_transient, settle, settle_all};
use crate::services::Services;

/// Replica set construction and timing options.
#[derive(Debug, Clone)]
pub struct ReplicaSetOptions {
    pub set_name: String,
    pub binary: String,
    /// Bound for every convergence wait (election, reconfigure, maintenance).
    pub election_timeout: Duration,
    pub poll_interval: Duration,
    pub reconfigure_retry: BackoffPolicy,
    pub node: NodeSettings,
    pub credentials: Option<Credentials>,
    /// Launch members with `--configsvr` and initiate with `configsvr: true`.
    pub config_server: bool,
    /// Launch members with `--shardsvr`.
    pub shard_server: bool,
}

impl ReplicaSetOptions {
    pub fn new(set_name: impl Into<String>) -> Self {
        Self {
            set_name: set_name.into(),
            binary: "mongod".to_string(),
            election_timeout: Duration::from_secs(31),
            poll_interval: Duration::from_secs(1),
            reconfigure_retry: BackoffPolicy::reconfigure(),
            node: NodeSettings::default(),
            credentials: None,
            config_server: false,
            shard_server: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSetState {
    Uninitiated,
    Converging,
    Stable,
    Reconfiguring,
    Stopped,
    Failed,
}

/// Options for membership changes and reconfiguration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconfigureOptions {
    /// Skip waiting for the members to converge on the new config.
    pub return_immediately: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDownOptions {
    pub step_down_secs: u64,
    pub force: bool,
}

impl Default for StepDownOptions {
    fn default() -> Self {
        Self {
            step_down_secs: 60,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceOptions {
    pub return_immediately: bool,
}

struct Member {
    spec: MemberSpec,
    node: Node,
}

struct MembershipChange<'a> {
    host: &'a str,
    /// Whether member views must list `host`; `None` skips the check.
    listed: Option<bool>,
    version: i64,
    require_primary: bool,
}

/// A group of mongod processes configured as one replica set.
pub struct ReplicaSet {
    options: ReplicaSetOptions,
    services: Services,
    notifier: Notifier,
    members: Vec<Member>,
    /// Accepted configurations, oldest first; the last one is the local view.
    configurations: Vec<ReplicaSetConfig>,
    initiated: bool,
    state: ReplicaSetState,
}

impl ReplicaSet {
    pub fn new(
        services: Services,
        options: ReplicaSetOptions,
        specs: Vec<MemberSpec>,
    ) -> Result<Self> {
        let notifier = Notifier::root(options.set_name.clone());
        Self::with_notifier(services, notifier, options, specs)
    }

    pub(crate) fn with_notifier(
        services: Services,
        notifier: Notifier,
        options: ReplicaSetOptions,
        specs: Vec<MemberSpec>,
    ) -> Result<Self> {
        let config = ReplicaSetConfig::initial(&options.set_name, &specs, options.config_server);
        config.validate()?;

        let mut set = Self {
            options,
            services,
            notifier,
            members: Vec::with_capacity(specs.len()),
            configurations: vec![config],
            initiated: false,
            state: ReplicaSetState::Uninitiated,
        };
        set.members = specs.into_iter().map(|spec| set.member_from(spec)).collect();
        Ok(set)
    }

    fn member_from(&self, spec: MemberSpec) -> Member {
        let mut options = spec.options.clone().in_replica_set(self.options.set_name.clone());
        if self.options.config_server {
            options = options.as_config_server();
        }
        if self.options.shard_server {
            options = options.as_shard_server();
        }
        let node = Node::new(
            self.services.clone(),
            self.notifier.scoped(options.address().to_string()),
            self.options.binary.clone(),
            options,
            self.options.node,
            self.options.credentials.clone(),
        );
        Member { spec, node }
    }

    pub fn name(&self) -> &str {
        &self.options.set_name
    }

    pub fn state(&self) -> ReplicaSetState {
        self.state
    }

    pub fn options(&self) -> &ReplicaSetOptions {
        &self.options
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StateEvent> {
        self.notifier.subscribe()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.members.iter().map(|m| &m.node)
    }

    pub fn node(&self, address: &HostPort) -> Result<&Node> {
        self.members
            .iter()
            .map(|m| &m.node)
            .find(|n| &n.address() == address)
            .ok_or_else(|| self.not_a_member(address))
    }

    pub fn addresses(&self) -> Vec<HostPort> {
        self.nodes().map(Node::address).collect()
    }

    /// The local view of the configuration.
    pub fn config(&self) -> &ReplicaSetConfig {
        // Never empty: seeded with the initial config on construction.
        &self.configurations[self.configurations.len() - 1]
    }

    pub fn configurations(&self) -> &[ReplicaSetConfig] {
        &self.configurations
    }

    /// `mongodb://h1:p1,h2:p2/?replicaSet=name`
    pub fn url(&self) -> String {
        format!(
            "mongodb://{}/?replicaSet={}",
            HostPort::join(&self.addresses()),
            self.name()
        )
    }

    /// `name/h1:p1,h2:p2`, the form `addShard` and `--configdb` expect.
    pub fn shard_url(&self) -> String {
        format!("{}/{}", self.name(), HostPort::join(&self.addresses()))
    }

    /// Poll at the poll interval for up to one election timeout.
    async fn poll_for_election<T, F, Fut>(&self, check: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        poll_until(self.options.election_timeout, self.options.poll_interval, check).await
    }

    fn not_a_member(&self, address: &HostPort) -> TopologyError {
        TopologyError::MemberNotFound {
            set_name: self.name().to_string(),
            address: address.to_string(),
        }
    }

    fn timeout_error(&self, waiting_for: impl Into<String>) -> TopologyError {
        let err = TopologyError::ElectionTimeout {
            set_name: self.name().to_string(),
            waiting_for: waiting_for.into(),
            waited: self.options.election_timeout,
        };
        error!("{err}");
        err
    }

    /// Version and TLS capability of the member binary.
    pub async fn discover(&self) -> Result<ServerBuild> {
        probe_server(self.services.launcher.as_ref(), &self.options.binary).await
    }

    /// Purge every member's data directory, reporting every failure.
    pub async fn purge(&mut self) -> Result<()> {
        info!("Purging replica set {}", self.name());
        settle_all("purge member", self.members.iter().map(|m| m.node.purge())).await?;

        let specs: Vec<MemberSpec> = self.members.iter().map(|m| m.spec.clone()).collect();
        self.configurations = vec![ReplicaSetConfig::initial(
            self.name(),
            &specs,
            self.options.config_server,
        )];
        self.initiated = false;
        self.state = ReplicaSetState::Uninitiated;
        self.notifier.emit(LifecycleState::Purged);
        Ok(())
    }

    /// Start every member, initiate the set on first start, and wait until
    /// one primary and otherwise settled roles are observed.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting replica set {}", self.name());
        self.notifier.emit(LifecycleState::Starting);

        let result = self.start_members_and_converge().await;
        match &result {
            Ok(primary) => {
                self.state = ReplicaSetState::Stable;
                self.notifier.emit(LifecycleState::Running);
                info!("Replica set {} is up with primary {primary}", self.name());
            }
            Err(e) => {
                self.state = ReplicaSetState::Failed;
                error!("Replica set {} failed to start: {e}", self.name());
            }
        }
        result.map(|_| ())
    }

    async fn start_members_and_converge(&mut self) -> Result<HostPort> {
        settle(
            "start member",
            self.members.iter_mut().map(|m| m.node.start()),
        )
        .await?;

        if !self.initiated {
            self.initiate().await?;
        }

        self.state = ReplicaSetState::Converging;
        self.await_convergence().await
    }

    async fn initiate(&mut self) -> Result<()> {
        let seed = self
            .members
            .iter()
            .find(|m| !m.spec.arbiter)
            .map(|m| &m.node)
            .ok_or_else(|| {
                TopologyError::InvalidConfig(format!(
                    "replica set '{}' has no data-bearing member to initiate from",
                    self.name()
                ))
            })?;

        let config = self.config().to_document()?;
        info!("Initiating replica set {} via {}", self.name(), seed.address());

        match seed.run_command("admin", commands::repl_set_initiate(config)).await {
            Ok(_) => {}
            Err(CommandError::Server { code: codes::ALREADY_INITIALIZED, .. }) => {
                debug!("Replica set {} was already initiated", self.name());
            }
            Err(source) => {
                return Err(TopologyError::Command {
                    command: "replSetInitiate".to_string(),
                    target: seed.address().to_string(),
                    source,
                })
            }
        }

        self.initiated = true;
        self.notifier.emit(LifecycleState::Initiated);
        Ok(())
    }

    async fn await_convergence(&self) -> Result<HostPort> {
        let converged = self.poll_for_election(|| async {
            let roles = self.member_roles().await;
            let mut primaries = roles.iter().filter(|(_, role)| *role == MemberRole::Primary);
            let primary = primaries.next()?;
            let settled = roles.iter().all(|(_, role)| role.is_settled());
            (primaries.next().is_none() && settled).then(|| primary.0.address())
        })
        .await;

        converged.ok_or_else(|| self.timeout_error("one primary with all members settled"))
    }

    /// Live role of every member, in registration order.
    pub async fn member_roles(&self) -> Vec<(&Node, MemberRole)> {
        let replies = join_all(self.members.iter().map(|m| m.node.is_master())).await;
        self.members
            .iter()
            .zip(replies)
            .map(|(m, reply)| {
                let role = match reply {
                    Ok(reply) => MemberRole::classify(&reply),
                    Err(e) => {
                        debug!("{} did not answer isMaster: {e}", m.node.address());
                        MemberRole::Other
                    }
                };
                (&m.node, role)
            })
            .collect()
    }

    async fn nodes_with_role(&self, wanted: MemberRole) -> Vec<&Node> {
        self.member_roles()
            .await
            .into_iter()
            .filter(|(_, role)| *role == wanted)
            .map(|(node, _)| node)
            .collect()
    }

    pub async fn primary(&self) -> Option<&Node> {
        self.nodes_with_role(MemberRole::Primary)
            .await
            .into_iter()
            .next()
    }

    pub async fn secondaries(&self) -> Vec<&Node> {
        self.nodes_with_role(MemberRole::Secondary).await
    }

    pub async fn passives(&self) -> Vec<&Node> {
        self.nodes_with_role(MemberRole::Passive).await
    }

    pub async fn arbiters(&self) -> Vec<&Node> {
        self.nodes_with_role(MemberRole::Arbiter).await
    }

    /// Poll until exactly one member reports primary.
    pub async fn wait_for_primary(&self, timeout: Duration) -> Result<HostPort> {
        let primary = poll_until(timeout, self.options.poll_interval, || async {
            let primaries = self.nodes_with_role(MemberRole::Primary).await;
            match primaries.as_slice() {
                [only] => Some(only.address()),
                _ => None,
            }
        })
        .await;

        primary.ok_or_else(|| TopologyError::ElectionTimeout {
            set_name: self.name().to_string(),
            waiting_for: "a primary".to_string(),
            waited: timeout,
        })
    }

    /// Fetch the live configuration as seen by `address`.
    pub async fn configuration(&self, address: &HostPort) -> Result<ReplicaSetConfig> {
        let reply = self
            .node(address)?
            .admin_command(commands::repl_set_get_config())
            .await?;
        let config = reply.get_document("config").map_err(|e| {
            TopologyError::InvalidConfig(format!("replSetGetConfig reply from {address}: {e}"))
        })?;
        ReplicaSetConfig::from_document(config.clone())
    }

    async fn live_config(&self) -> Result<ReplicaSetConfig> {
        let primary = self.wait_for_primary(self.options.election_timeout).await?;
        self.configuration(&primary).await
    }

    /// Replace the set's configuration. The version sent is always one above
    /// the live version, so re-applying a document is an idempotent success.
    pub async fn reconfigure(
        &mut self,
        config: ReplicaSetConfig,
        options: ReconfigureOptions,
    ) -> Result<ReplicaSetConfig> {
        config.validate()?;
        for member in &config.members {
            let address: HostPort = member
                .host
                .parse()
                .map_err(|e| TopologyError::InvalidConfig(format!("{e}")))?;
            self.node(&address)?;
        }

        self.state = ReplicaSetState::Reconfiguring;
        let result = self.apply_config(config, options).await;
        self.state = if result.is_ok() {
            ReplicaSetState::Stable
        } else {
            ReplicaSetState::Failed
        };
        result
    }

    async fn apply_config(
        &mut self,
        config: ReplicaSetConfig,
        options: ReconfigureOptions,
    ) -> Result<ReplicaSetConfig> {
        let this = &*self;
        let accepted = retry_transient(
            &this.options.reconfigure_retry,
            codes::is_replication_transient,
            || {
                let config = config.clone();
                async move { this.send_reconfig(config, options.force).await }
            },
        )
        .await
        .map_err(|e| match e {
            TopologyError::Command { source, .. } => TopologyError::ReconfigureRejected {
                set_name: this.name().to_string(),
                source,
            },
            other => other,
        })
        .inspect_err(|e| error!("{e}"))?;

        info!(
            "Replica set {} accepted config version {}",
            self.name(),
            accepted.version
        );
        self.configurations.push(accepted.clone());
        self.notifier.emit(LifecycleState::Reconfigured);

        if !options.return_immediately {
            self.await_config_applied(&accepted).await?;
        }
        Ok(accepted)
    }

    async fn send_reconfig(
        &self,
        mut config: ReplicaSetConfig,
        force: bool,
    ) -> Result<ReplicaSetConfig> {
        let primary = self.wait_for_primary(self.options.election_timeout).await?;
        let live = self.configuration(&primary).await?;
        config.version = live.version + 1;

        debug!(
            "Sending config version {} of {} to {primary}",
            config.version,
            self.name()
        );
        self.node(&primary)?
            .admin_command(commands::repl_set_reconfig(config.to_document()?, force))
            .await?;
        Ok(config)
    }

    /// Wait until every configured member reports `config.version` and a
    /// primary exists.
    async fn await_config_applied(&self, config: &ReplicaSetConfig) -> Result<()> {
        let hosts: Vec<&str> = config.members.iter().map(|m| m.host.as_str()).collect();
        let applied = self.poll_for_election(|| async {
            let replies = self.configured_replies(&hosts).await;
            let all_current = replies
                .iter()
                .all(|r| r.as_ref().and_then(|r| r.set_version) >= Some(config.version));
            let primaries = replies
                .iter()
                .flatten()
                .filter(|r| MemberRole::classify(r) == MemberRole::Primary)
                .count();
            (all_current && primaries == 1).then_some(())
        })
        .await;

        applied.ok_or_else(|| self.timeout_error(format!("config version {}", config.version)))
    }

    async fn configured_replies(&self, hosts: &[&str]) -> Vec<Option<IsMasterReply>> {
        let nodes = self
            .nodes()
            .filter(|n| hosts.contains(&n.address().to_string().as_str()));
        join_all(nodes.map(|n| async move { n.is_master().await.ok() })).await
    }

    /// Wait until every member runs config `change.version` and shows (or no
    /// longer shows) `change.host`, optionally also requiring a primary.
    async fn await_membership(&self, change: MembershipChange<'_>) -> Result<()> {
        let converged = self.poll_for_election(|| async {
            let replies: Vec<Option<IsMasterReply>> =
                join_all(self.nodes().map(|n| async move { n.is_master().await.ok() })).await;
            let views_agree = replies.iter().all(|r| {
                r.as_ref().is_some_and(|r| {
                    r.set_version >= Some(change.version)
                        && change.listed.is_none_or(|listed| r.lists_member(change.host) == listed)
                })
            });
            let has_primary = replies
                .iter()
                .flatten()
                .any(|r| MemberRole::classify(r) == MemberRole::Primary);
            (views_agree && (has_primary || !change.require_primary)).then_some(())
        })
        .await;

        converged.ok_or_else(|| {
            self.timeout_error(format!(
                "config version {} on every member around {}",
                change.version, change.host
            ))
        })
    }

    /// Start a new member and add it to the live configuration.
    pub async fn add_member(
        &mut self,
        spec: MemberSpec,
        options: ReconfigureOptions,
    ) -> Result<()> {
        let address = spec.options.address();
        if self.node(&address).is_ok() {
            return Err(TopologyError::InvalidConfig(format!(
                "{address} is already a member of replica set '{}'",
                self.name()
            )));
        }

        info!("Adding {address} to replica set {}", self.name());
        let mut member = self.member_from(spec);
        member.node.start().await?;
        self.members.push(member);

        if let Err(e) = self.reconfigure_with_new_member(options).await {
            error!("Adding {address} failed, stopping it: {e}");
            if let Some(mut member) = self.members.pop() {
                if let Err(stop_err) = member.node.stop().await {
                    error!("Failed to stop {address}: {stop_err}");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn reconfigure_with_new_member(&mut self, options: ReconfigureOptions) -> Result<()> {
        let Some(new_member) = self.members.last() else {
            return Ok(());
        };
        let host = new_member.node.address().to_string();

        let mut next = self.live_config().await?;
        let member_config = new_member.spec.member_config(next.next_member_id());
        let can_vote = member_config.can_vote();
        // Hidden members never appear in isMaster host lists.
        let listed = (!member_config.hidden).then_some(true);
        next.members.push(member_config);

        let accepted = self
            .reconfigure(
                next,
                ReconfigureOptions {
                    return_immediately: true,
                    ..options
                },
            )
            .await?;

        if !options.return_immediately {
            self.await_membership(MembershipChange {
                host: &host,
                listed,
                version: accepted.version,
                require_primary: can_vote,
            })
            .await?;
        }
        Ok(())
    }

    /// Drop a member from the live configuration, then stop and purge it.
    pub async fn remove_member(
        &mut self,
        address: &HostPort,
        options: ReconfigureOptions,
    ) -> Result<()> {
        let index = self
            .members
            .iter()
            .position(|m| &m.node.address() == address)
            .ok_or_else(|| self.not_a_member(address))?;
        let host = address.to_string();

        let mut next = self.live_config().await?;
        let before = next.members.len();
        next.members.retain(|m| m.host != host);
        if next.members.len() == before {
            return Err(self.not_a_member(address));
        }

        info!("Removing {address} from replica set {}", self.name());
        let accepted = self
            .reconfigure(
                next,
                ReconfigureOptions {
                    return_immediately: true,
                    ..options
                },
            )
            .await?;

        let mut removed = self.members.remove(index);
        removed.node.stop().await?;
        removed.node.purge().await?;

        if !options.return_immediately {
            self.await_membership(MembershipChange {
                host: &host,
                listed: Some(false),
                version: accepted.version,
                require_primary: true,
            })
            .await?;
        }
        Ok(())
    }

    /// Ask the current primary to step down. Unless `return_immediately`,
    /// waits for a different member to become primary and returns it.
    pub async fn step_down_primary(
        &self,
        return_immediately: bool,
        options: StepDownOptions,
    ) -> Result<Option<HostPort>> {
        let old = self.wait_for_primary(self.options.election_timeout).await?;
        info!("Stepping down primary {old} of replica set {}", self.name());

        let command = commands::repl_set_step_down(options.step_down_secs, options.force);
        match self.node(&old)?.run_command("admin", command).await {
            Ok(_) => {}
            Err(CommandError::Transport(e)) => {
                debug!("{old} closed the connection while stepping down: {e}");
            }
            Err(source) => {
                return Err(TopologyError::Command {
                    command: "replSetStepDown".to_string(),
                    target: old.to_string(),
                    source,
                })
            }
        }
        self.notifier.emit(LifecycleState::SteppedDown);

        if return_immediately {
            return Ok(None);
        }

        let new_primary = self.poll_for_election(|| {
            let old = old.clone();
            async move {
                match self.nodes_with_role(MemberRole::Primary).await.as_slice() {
                    [only] if only.address() != old => Some(only.address()),
                    _ => None,
                }
            }
        })
        .await;

        new_primary
            .map(Some)
            .ok_or_else(|| self.timeout_error(format!("a primary other than {old}")))
    }

    /// Toggle maintenance mode on one member.
    pub async fn maintenance(
        &self,
        enable: bool,
        address: &HostPort,
        options: MaintenanceOptions,
    ) -> Result<()> {
        let node = self.node(address)?;
        info!(
            "{} maintenance mode on {address}",
            if enable { "Enabling" } else { "Disabling" }
        );
        node.admin_command(commands::repl_set_maintenance(enable)).await?;
        self.notifier.emit(if enable {
            LifecycleState::MaintenanceEnabled
        } else {
            LifecycleState::MaintenanceDisabled
        });

        if options.return_immediately {
            return Ok(());
        }

        let reached = self.poll_for_election(|| async {
            let reply = node.is_master().await.ok()?;
            (reply.secondary != enable).then_some(())
        })
        .await;

        let wanted = if enable { "leave" } else { "return to" };
        reached.ok_or_else(|| self.timeout_error(format!("{address} to {wanted} secondary state")))
    }

    /// Stop every member.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping replica set {}", self.name());
        self.notifier.emit(LifecycleState::Stopping);
        settle("stop member", self.members.iter_mut().map(|m| m.node.stop())).await?;
        self.state = ReplicaSetState::Stopped;
        self.notifier.emit(LifecycleState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_member, quick_replica_set_options, SimulatedDeployment};

    fn three_member_set(sim: &SimulatedDeployment) -> ReplicaSet {
        ReplicaSet::new(
            sim.services(),
            quick_replica_set_options("rs"),
            vec![
                local_member(31000),
                local_member(31001),
                local_member(31002).arbiter(),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_initiates_once() {
        let sim = SimulatedDeployment::new();
        let mut set = three_member_set(&sim);
        assert_eq!(set.state(), ReplicaSetState::Uninitiated);

        set.start().await.unwrap();
        assert_eq!(set.state(), ReplicaSetState::Stable);
        assert_eq!(sim.commands_named("replSetInitiate").len(), 1);

        set.stop().await.unwrap();
        assert_eq!(set.state(), ReplicaSetState::Stopped);
        set.start().await.unwrap();
        assert_eq!(sim.commands_named("replSetInitiate").len(), 1);
        set.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_initiate_targets_data_bearing_member() {
        let sim = SimulatedDeployment::new();
        let mut set = ReplicaSet::new(
            sim.services(),
            quick_replica_set_options("rs"),
            vec![
                local_member(31002).arbiter(),
                local_member(31000),
                local_member(31001),
            ],
        )
        .unwrap();
        set.start().await.unwrap();

        let initiate = &sim.commands_named("replSetInitiate")[0];
        assert_eq!(initiate.target, HostPort::new("127.0.0.1", 31000));
        set.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_refused_while_running() {
        let sim = SimulatedDeployment::new();
        let mut set = three_member_set(&sim);
        set.start().await.unwrap();

        match set.purge().await {
            Err(TopologyError::Aggregate(errors)) => {
                assert_eq!(errors.len(), 3);
                assert!(errors
                    .iter()
                    .all(|e| matches!(e, TopologyError::PurgeConflict { .. })));
            }
            other => panic!("expected aggregated purge conflicts, got {other:?}"),
        }

        set.stop().await.unwrap();
        set.purge().await.unwrap();
        assert_eq!(set.state(), ReplicaSetState::Uninitiated);
        assert_eq!(sim.purged_paths().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_members_rejected() {
        let sim = SimulatedDeployment::new();
        let result = ReplicaSet::new(
            sim.services(),
            quick_replica_set_options("rs"),
            vec![local_member(31000), local_member(31000)],
        );
        assert!(matches!(result, Err(TopologyError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_urls() {
        let sim = SimulatedDeployment::new();
        let set = three_member_set(&sim);
        assert_eq!(
            set.shard_url(),
            "rs/127.0.0.1:31000,127.0.0.1:31001,127.0.0.1:31002"
        );
        assert_eq!(
            set.url(),
            "mongodb://127.0.0.1:31000,127.0.0.1:31001,127.0.0.1:31002/?replicaSet=rs"
        );
    }

    #[tokio::test]
    async fn test_remove_unknown_member() {
        let sim = SimulatedDeployment::new();
        let mut set = three_member_set(&sim);
        set.start().await.unwrap();

        let result = set
            .remove_member(&HostPort::new("127.0.0.1", 39999), ReconfigureOptions::default())
            .await;
        assert!(matches!(result, Err(TopologyError::MemberNotFound { .. })));
        set.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconfigure_rejection_is_not_retried() {
        let sim = SimulatedDeployment::new();
        let mut set = three_member_set(&sim);
        set.start().await.unwrap();

        let primary = set.primary().await.unwrap().address();
        sim.fail_command(
            &primary,
            "replSetReconfig",
            1,
            CommandError::server(
                codes::NODE_NOT_FOUND,
                "NodeNotFound",
                "Quorum check failed",
            ),
        );

        let config = set.config().clone();
        let result = set.reconfigure(config, ReconfigureOptions::default()).await;
        assert!(matches!(result, Err(TopologyError::ReconfigureRejected { .. })));
        assert_eq!(set.state(), ReplicaSetState::Failed);
        assert_eq!(sim.commands_named("replSetReconfig").len(), 1);
        set.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconfigure_retries_stepdown_race() {
        let sim = SimulatedDeployment::new();
        let mut set = three_member_set(&sim);
        set.start().await.unwrap();

        let primary = set.primary().await.unwrap().address();
        sim.fail_command(
            &primary,
            "replSetReconfig",
            2,
            CommandError::server(
                codes::NOT_WRITABLE_PRIMARY,
                "NotWritablePrimary",
                "not primary",
            ),
        );

        let config = set.config().clone();
        let accepted = set
            .reconfigure(config, ReconfigureOptions::default())
            .await
            .unwrap();
        assert_eq!(accepted.version, 2);
        assert_eq!(sim.commands_named("replSetReconfig").len(), 3);
        assert_eq!(set.state(), ReplicaSetState::Stable);
        set.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconfigure_rejects_unknown_host() {
        let sim = SimulatedDeployment::new();
        let mut set = three_member_set(&sim);
        set.start().await.unwrap();

        let mut config = set.config().clone();
        config.members[1].host = "127.0.0.1:39999".to_string();
        let result = set.reconfigure(config, ReconfigureOptions::default()).await;
        assert!(matches!(result, Err(TopologyError::MemberNotFound { .. })));
        assert!(sim.commands_named("replSetReconfig").is_empty());
        set.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_election_timeout() {
        let sim = SimulatedDeployment::new();
        sim.set_election_delay(usize::MAX);
        let mut set = three_member_set(&sim);

        let result = set.start().await;
        assert!(matches!(result, Err(TopologyError::ElectionTimeout { .. })));
        assert_eq!(set.state(), ReplicaSetState::Failed);
        set.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_bubble_from_members() {
        let sim = SimulatedDeployment::new();
        let mut set = three_member_set(&sim);
        let mut events = set.subscribe();
        set.start().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push((event.component, event.state));
        }
        assert!(seen.contains(&("rs/127.0.0.1:31000".to_string(), LifecycleState::Running)));
        assert!(seen.contains(&("rs".to_string(), LifecycleState::Initiated)));
        assert_eq!(seen.last(), Some(&("rs".to_string(), LifecycleState::Running)));
        set.stop().await.unwrap();
    }
}
