//! Topology files.
//!
//! A topology file describes either one replica set or one sharded cluster:
//!
//! ```yaml
//! mongod: /opt/mongodb/bin/mongod
//! timeouts:
//!   start: 30s
//!   election: 31s
//! replica_set:
//!   name: rs0
//!   members:
//!     - { port: 31000, dbpath: /tmp/rs0-0 }
//!     - { port: 31001, dbpath: /tmp/rs0-1 }
//!     - { port: 31002, dbpath: /tmp/rs0-2, arbiter: true }
//! ```

pub mod duration;
mod retry;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

pub use retry::BackoffPolicy;

use crate::error::{Result, TopologyError};
use crate::node::{NodeOptions, NodeSettings};
use crate::replset::{MemberSpec, ReplicaSetOptions};
use crate::sharded::ShardedOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyFile {
    #[serde(default = "default_mongod")]
    pub mongod: String,
    #[serde(default = "default_mongos")]
    pub mongos: String,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub router_retry: BackoffPolicy,
    #[serde(default)]
    pub replica_set: Option<ReplicaSetSection>,
    #[serde(default)]
    pub sharded: Option<ShardedSection>,
}

fn default_mongod() -> String {
    "mongod".to_string()
}
fn default_mongos() -> String {
    "mongos".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_start", deserialize_with = "duration::deserialize")]
    pub start: Duration,
    #[serde(default = "default_probe_interval", deserialize_with = "duration::deserialize")]
    pub probe_interval: Duration,
    #[serde(default = "default_stop_grace", deserialize_with = "duration::deserialize")]
    pub stop_grace: Duration,
    /// Bound for election and reconfigure convergence.
    #[serde(default = "default_election", deserialize_with = "duration::deserialize")]
    pub election: Duration,
    #[serde(default = "default_poll_interval", deserialize_with = "duration::deserialize")]
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            start: default_start(),
            probe_interval: default_probe_interval(),
            stop_grace: default_stop_grace(),
            election: default_election(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_start() -> Duration {
    NodeSettings::default().start_timeout
}
fn default_probe_interval() -> Duration {
    NodeSettings::default().probe_interval
}
fn default_stop_grace() -> Duration {
    NodeSettings::default().stop_grace
}
fn default_election() -> Duration {
    Duration::from_secs(31)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaSetSection {
    pub name: String,
    pub members: Vec<MemberSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardedSection {
    pub shards: Vec<ReplicaSetSection>,
    pub config_servers: ReplicaSetSection,
    pub routers: Vec<NodeOptions>,
}

/// What a topology file asks for.
#[derive(Debug, Clone, Copy)]
pub enum Layout<'a> {
    ReplicaSet(&'a ReplicaSetSection),
    Sharded(&'a ShardedSection),
}

impl TopologyFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(yaml)
            .map_err(|e| TopologyError::InvalidConfig(format!("malformed topology file: {e}")))?;
        file.layout()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| TopologyError::io(format!("reading {}", path.display()), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Exactly one of `replica_set` and `sharded` must be present.
    pub fn layout(&self) -> Result<Layout<'_>> {
        match (&self.replica_set, &self.sharded) {
            (Some(set), None) => Ok(Layout::ReplicaSet(set)),
            (None, Some(sharded)) => Ok(Layout::Sharded(sharded)),
            (Some(_), Some(_)) => Err(TopologyError::InvalidConfig(
                "a topology file describes either a replica_set or a sharded cluster, not both"
                    .to_string(),
            )),
            (None, None) => Err(TopologyError::InvalidConfig(
                "a topology file needs a replica_set or a sharded section".to_string(),
            )),
        }
    }

    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings {
            start_timeout: self.timeouts.start,
            probe_interval: self.timeouts.probe_interval,
            stop_grace: self.timeouts.stop_grace,
        }
    }

    pub fn replica_set_options(&self, set_name: &str) -> ReplicaSetOptions {
        let mut options = ReplicaSetOptions::new(set_name);
        options.binary = self.mongod.clone();
        options.election_timeout = self.timeouts.election;
        options.poll_interval = self.timeouts.poll_interval;
        options.node = self.node_settings();
        options
    }

    pub fn sharded_options(&self) -> ShardedOptions {
        ShardedOptions {
            mongod_binary: self.mongod.clone(),
            mongos_binary: self.mongos.clone(),
            node: self.node_settings(),
            router_retry: self.router_retry,
            credentials: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARDED: &str = r#"
mongod: /opt/mongo/bin/mongod
timeouts:
  start: 10s
  probe_interval: 100ms
  election: 1m
router_retry:
  max_attempts: 3
  base_delay: 250ms
sharded:
  shards:
    - name: rs0
      members:
        - { port: 31000, dbpath: /tmp/rs0-0 }
        - { port: 31001, dbpath: /tmp/rs0-1, priority: 2.5 }
        - { port: 31002, dbpath: /tmp/rs0-2, arbiter: true }
  config_servers:
    name: csrs
    members:
      - { port: 35000, dbpath: /tmp/cfg-0 }
  routers:
    - port: 51000
    - port: 51001
      extra: { setParameter: "enableTestCommands=1" }
"#;

    #[test]
    fn test_sharded_file() {
        let file = TopologyFile::from_yaml_str(SHARDED).unwrap();
        assert_eq!(file.mongod, "/opt/mongo/bin/mongod");
        assert_eq!(file.mongos, "mongos");

        let settings = file.node_settings();
        assert_eq!(settings.start_timeout, Duration::from_secs(10));
        assert_eq!(settings.probe_interval, Duration::from_millis(100));
        assert_eq!(settings.stop_grace, Duration::from_secs(10));
        assert_eq!(file.replica_set_options("rs0").election_timeout, Duration::from_secs(60));
        assert_eq!(file.router_retry.max_attempts, 3);
        assert_eq!(file.router_retry.max_delay, Duration::from_secs(8));

        let Layout::Sharded(sharded) = file.layout().unwrap() else {
            panic!("expected a sharded layout");
        };
        let shard = &sharded.shards[0];
        assert_eq!(shard.members.len(), 3);
        assert_eq!(shard.members[0].options.bind_ip, "127.0.0.1");
        assert_eq!(shard.members[1].priority, Some(2.5));
        assert!(shard.members[2].arbiter);
        assert_eq!(sharded.config_servers.name, "csrs");
        assert_eq!(
            sharded.routers[1].extra.get("setParameter"),
            Some(&Some("enableTestCommands=1".to_string()))
        );
    }

    #[test]
    fn test_layout_must_be_unambiguous() {
        let neither = TopologyFile::from_yaml_str("mongod: mongod\n");
        assert!(matches!(neither, Err(TopologyError::InvalidConfig(_))));

        let both = r#"
replica_set: { name: rs0, members: [{ port: 31000 }] }
sharded:
  shards: []
  config_servers: { name: csrs, members: [] }
  routers: []
"#;
        assert!(TopologyFile::from_yaml_str(both).is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.yaml");
        std::fs::write(
            &path,
            "replica_set:\n  name: rs0\n  members:\n    - port: 31000\n",
        )
        .unwrap();

        let file = TopologyFile::load(&path).unwrap();
        assert!(matches!(file.layout().unwrap(), Layout::ReplicaSet(set) if set.name == "rs0"));
        assert!(TopologyFile::load(&dir.path().join("missing.yaml")).is_err());
    }
}
