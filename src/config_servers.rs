//! Legacy (pre 3.2) metadata topology: three independent config servers.

use admin_command::{Credentials, HostPort};
use tracing::info;

use crate::error::{Result, TopologyError};
use crate::event::{LifecycleState, Notifier, StateEvent};
use crate::node::{Node, NodeOptions, NodeSettings};
use crate::phase::settle;
use crate::services::Services;

const CONFIG_SERVER_COUNT: usize = 3;

/// Three `--configsvr` processes without replication or election.
pub struct ConfigServerSet {
    nodes: Vec<Node>,
    notifier: Notifier,
}

impl ConfigServerSet {
    pub fn new(
        services: Services,
        notifier: Notifier,
        binary: &str,
        members: Vec<NodeOptions>,
        settings: NodeSettings,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        if members.len() != CONFIG_SERVER_COUNT {
            return Err(TopologyError::InvalidConfig(format!(
                "a legacy config server set needs exactly {CONFIG_SERVER_COUNT} members, got {}",
                members.len()
            )));
        }

        let nodes = members
            .into_iter()
            .map(|options| {
                let options = options.as_config_server();
                Node::new(
                    services.clone(),
                    notifier.scoped(options.address().to_string()),
                    binary,
                    options,
                    settings,
                    credentials.clone(),
                )
            })
            .collect();
        Ok(Self { nodes, notifier })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn addresses(&self) -> Vec<HostPort> {
        self.nodes.iter().map(Node::address).collect()
    }

    /// `h1:p1,h2:p2,h3:p3`, the `--configdb` value for routers.
    pub fn url(&self) -> String {
        HostPort::join(&self.addresses())
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StateEvent> {
        self.notifier.subscribe()
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Starting config servers {}", self.url());
        self.notifier.emit(LifecycleState::Starting);
        settle("start config server", self.nodes.iter_mut().map(Node::start)).await?;
        self.notifier.emit(LifecycleState::Running);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping config servers {}", self.url());
        self.notifier.emit(LifecycleState::Stopping);
        settle("stop config server", self.nodes.iter_mut().map(Node::stop)).await?;
        self.notifier.emit(LifecycleState::Stopped);
        Ok(())
    }

    pub async fn purge(&self) -> Result<()> {
        settle("purge config server", self.nodes.iter().map(Node::purge)).await?;
        self.notifier.emit(LifecycleState::Purged);
        Ok(())
    }
}
