//! A topology built from a [`TopologyFile`].

use tracing::info;

use crate::config::{Layout, TopologyFile};
use crate::error::Result;
use crate::event::StateEvent;
use crate::replset::ReplicaSet;
use crate::services::Services;
use crate::sharded::ShardedTopology;

pub enum Deployment {
    ReplicaSet(ReplicaSet),
    Sharded(ShardedTopology),
}

impl Deployment {
    /// Register every component the file describes. Sharded layouts probe the
    /// mongod binary to choose the metadata topology shape.
    pub async fn from_file(services: Services, file: &TopologyFile) -> Result<Self> {
        match file.layout()? {
            Layout::ReplicaSet(section) => {
                let set = ReplicaSet::new(
                    services,
                    file.replica_set_options(&section.name),
                    section.members.clone(),
                )?;
                Ok(Self::ReplicaSet(set))
            }
            Layout::Sharded(section) => {
                let mut topology = ShardedTopology::new(services, file.sharded_options());
                for shard in &section.shards {
                    topology.add_shard(
                        file.replica_set_options(&shard.name),
                        shard.members.clone(),
                    )?;
                }
                let shape = topology
                    .add_configuration_servers(
                        file.replica_set_options(&section.config_servers.name),
                        section.config_servers.members.clone(),
                    )
                    .await?;
                info!("Using {shape} config servers");
                topology.add_proxies(section.routers.clone())?;
                Ok(Self::Sharded(topology))
            }
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StateEvent> {
        match self {
            Self::ReplicaSet(set) => set.subscribe(),
            Self::Sharded(topology) => topology.subscribe(),
        }
    }

    /// Connection string for clients.
    pub fn url(&self) -> String {
        match self {
            Self::ReplicaSet(set) => set.url(),
            Self::Sharded(topology) => topology.url(),
        }
    }

    /// Purge leftovers and start. A replica set is purged here; a sharded
    /// topology purges every component as part of its own start.
    pub async fn start(&mut self) -> Result<()> {
        match self {
            Self::ReplicaSet(set) => {
                set.purge().await?;
                set.start().await
            }
            Self::Sharded(topology) => topology.start().await,
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        match self {
            Self::ReplicaSet(set) => set.stop().await,
            Self::Sharded(topology) => topology.stop().await,
        }
    }

    pub async fn purge(&mut self) -> Result<()> {
        match self {
            Self::ReplicaSet(set) => set.purge().await,
            Self::Sharded(topology) => topology.purge().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedDeployment;

    const REPLICA_SET: &str = r#"
timeouts: { start: 1s, probe_interval: 5ms, stop_grace: 1s, election: 2s, poll_interval: 5ms }
replica_set:
  name: rs0
  members:
    - { port: 31000, dbpath: /data/rs0-0 }
    - { port: 31001, dbpath: /data/rs0-1 }
    - { port: 31002, dbpath: /data/rs0-2, arbiter: true }
"#;

    #[tokio::test]
    async fn test_replica_set_from_file() {
        let sim = SimulatedDeployment::new();
        let file = TopologyFile::from_yaml_str(REPLICA_SET).unwrap();
        let mut deployment = Deployment::from_file(sim.services(), &file).await.unwrap();

        deployment.start().await.unwrap();
        assert_eq!(
            deployment.url(),
            "mongodb://127.0.0.1:31000,127.0.0.1:31001,127.0.0.1:31002/?replicaSet=rs0"
        );
        assert_eq!(sim.running_count(), 3);

        deployment.stop().await.unwrap();
        assert_eq!(sim.running_count(), 0);
    }
}
